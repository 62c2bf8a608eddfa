use lapis_core::{ArithOp, CompareOp, LuaError, Status, Vm};

use super::helpers::*;

fn add_fields(vm: &mut Vm) -> Result<usize, LuaError> {
    vm.get_field(1, "v")?;
    vm.push_integer(100);
    vm.arith(ArithOp::Add)?;
    Ok(1)
}

#[test]
fn test_push_two_integers_and_add() {
    let mut vm = Vm::new();
    vm.push_integer(10);
    vm.push_integer(20);
    vm.arith(ArithOp::Add).unwrap();
    assert_eq!(vm.get_top(), 1);
    assert_int(&vm, -1, 30);
}

#[test]
fn test_integer_and_float_results() {
    let mut vm = Vm::new();
    vm.push_integer(7);
    vm.push_integer(2);
    vm.arith(ArithOp::IDiv).unwrap();
    assert_int(&vm, -1, 3);
    vm.push_integer(2);
    vm.arith(ArithOp::Div).unwrap();
    assert!(!vm.is_integer(-1));
    assert_eq!(vm.to_number(-1), Some(1.5));
}

#[test]
fn test_arith_metamethod() {
    let mut vm = Vm::new();
    vm.create_table(0, 1).unwrap();
    vm.push_integer(5);
    vm.set_field(-2, "v").unwrap();
    vm.create_table(0, 1).unwrap();
    vm.push_native_function(add_fields);
    vm.set_field(-2, "__add").unwrap();
    vm.set_metatable(-2).unwrap();
    vm.push_integer(1);
    vm.arith(ArithOp::Add).unwrap();
    assert_int(&vm, -1, 105);
}

#[test]
fn test_division_by_zero() {
    fn divide(vm: &mut Vm) -> Result<usize, LuaError> {
        vm.push_integer(1);
        vm.push_integer(0);
        vm.arith(ArithOp::Mod)?;
        Ok(1)
    }
    let mut vm = Vm::new();
    vm.push_native_function(divide);
    assert_eq!(vm.pcall(0, 1, 0), Status::ErrRun);
    assert_str(&mut vm, -1, "attempt to perform 'n%0'");
}

#[test]
fn test_compare_and_concat() {
    let mut vm = Vm::new();
    vm.push_integer(1);
    vm.push_number(1.5);
    assert!(vm.compare(1, 2, CompareOp::Lt).unwrap());
    assert!(!vm.compare(1, 2, CompareOp::Eq).unwrap());
    vm.push_string("-").unwrap();
    vm.concat(3).unwrap();
    assert_str(&mut vm, -1, "11.5-");
}

#[test]
fn test_string_to_number() {
    let mut vm = Vm::new();
    assert_eq!(vm.string_to_number("0x10"), 5);
    assert_int(&vm, -1, 16);
    assert_eq!(vm.string_to_number("1e2"), 4);
    assert_eq!(vm.to_number(-1), Some(100.0));
    assert_eq!(vm.string_to_number("nope"), 0);
    assert_eq!(vm.get_top(), 2);
}
