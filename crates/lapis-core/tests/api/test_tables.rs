use lapis_core::{LuaError, LuaType, Status, Vm};

use super::helpers::*;

fn default_seven(vm: &mut Vm) -> Result<usize, LuaError> {
    vm.push_integer(7);
    Ok(1)
}

#[test]
fn test_raw_seti_then_geti() {
    let mut vm = Vm::new();
    vm.create_table(0, 0).unwrap();
    vm.push_string("x").unwrap();
    vm.raw_set_i(-2, 1).unwrap();
    assert_eq!(vm.raw_get_i(-1, 1).unwrap(), LuaType::String);
    assert_str(&mut vm, -1, "x");
    vm.pop(1);
    assert_eq!(vm.raw_len(-1), 1);
}

#[test]
fn test_missing_key_reads_nil() {
    let mut vm = Vm::new();
    vm.create_table(0, 0).unwrap();
    assert_eq!(vm.get_field(-1, "nope").unwrap(), LuaType::Nil);
    assert!(vm.is_nil(-1));
    vm.pop(1);
    assert_eq!(vm.get_i(-1, 42).unwrap(), LuaType::Nil);
}

#[test]
fn test_index_function_supplies_defaults() {
    let mut vm = Vm::new();
    vm.create_table(0, 1).unwrap();
    vm.push_integer(1);
    vm.set_field(-2, "present").unwrap();
    vm.create_table(0, 1).unwrap();
    vm.push_native_function(default_seven);
    vm.set_field(-2, "__index").unwrap();
    vm.set_metatable(-2).unwrap();
    vm.get_field(-1, "present").unwrap();
    assert_int(&vm, -1, 1);
    vm.pop(1);
    vm.get_field(-1, "absent").unwrap();
    assert_int(&vm, -1, 7);
    vm.pop(1);
    vm.raw_get_i(-1, 5).unwrap();
    assert!(vm.is_nil(-1));
}

#[test]
fn test_get_and_set_table_with_any_key() {
    let mut vm = Vm::new();
    vm.create_table(0, 0).unwrap();
    vm.push_number(2.0);
    vm.push_string("two").unwrap();
    vm.set_table(1).unwrap();
    // float keys with an integer value land in the integer slot
    vm.push_integer(2);
    vm.get_table(1).unwrap();
    assert_str(&mut vm, -1, "two");
}

#[test]
fn test_nil_key_is_rejected() {
    fn store_nil_key(vm: &mut Vm) -> Result<usize, LuaError> {
        vm.create_table(0, 0)?;
        vm.push_nil();
        vm.push_integer(1);
        vm.set_table(-3)?;
        Ok(0)
    }
    let mut vm = Vm::new();
    vm.push_native_function(store_nil_key);
    assert_eq!(vm.pcall(0, 0, 0), Status::ErrRun);
    assert_str(&mut vm, -1, "table index is nil");
}

#[test]
fn test_next_visits_every_pair() {
    let mut vm = Vm::new();
    vm.create_table(3, 2).unwrap();
    for i in 1..=3 {
        vm.push_integer(i * 10);
        vm.raw_set_i(1, i).unwrap();
    }
    vm.push_integer(100);
    vm.set_field(1, "a").unwrap();
    vm.push_integer(200);
    vm.set_field(1, "b").unwrap();

    let mut total = 0;
    let mut count = 0;
    vm.push_nil();
    while vm.next(1).unwrap() {
        total += vm.to_integer(-1).unwrap();
        count += 1;
        vm.pop(1);
    }
    assert_eq!(count, 5);
    assert_eq!(total, 360);
    assert_eq!(vm.get_top(), 1);
}

#[test]
fn test_len_uses_metamethod() {
    fn fixed_len(vm: &mut Vm) -> Result<usize, LuaError> {
        vm.push_integer(12);
        Ok(1)
    }
    let mut vm = Vm::new();
    vm.create_table(0, 0).unwrap();
    vm.len(1).unwrap();
    assert_int(&vm, -1, 0);
    vm.pop(1);
    vm.create_table(0, 1).unwrap();
    vm.push_native_function(fixed_len);
    vm.set_field(-2, "__len").unwrap();
    vm.set_metatable(1).unwrap();
    vm.len(1).unwrap();
    assert_int(&vm, -1, 12);
    assert_eq!(vm.raw_len(1), 0);
}

#[test]
fn test_globals_live_in_the_registry() {
    let mut vm = Vm::new();
    vm.push_integer(5);
    vm.set_global("answer").unwrap();
    assert_eq!(vm.get_global("answer").unwrap(), LuaType::Number);
    assert_int(&vm, -1, 5);
    assert_eq!(vm.get_global("missing").unwrap(), LuaType::Nil);
}

#[test]
fn test_metatable_round_trip() {
    let mut vm = Vm::new();
    vm.create_table(0, 0).unwrap();
    assert!(!vm.get_metatable(1));
    vm.create_table(0, 0).unwrap();
    vm.push_value(-1);
    vm.set_metatable(1).unwrap();
    assert!(vm.get_metatable(1));
    assert!(vm.raw_equal(-1, 2));
    vm.pop(1);
    vm.push_nil();
    vm.set_metatable(1).unwrap();
    assert!(!vm.get_metatable(1));
}

#[test]
fn test_userdata_memory_and_user_value() {
    let mut vm = Vm::new();
    vm.new_userdata(8).unwrap();
    vm.to_userdata(1).unwrap().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    vm.push_string("attached").unwrap();
    vm.set_uservalue(1);
    assert_eq!(vm.get_uservalue(1), LuaType::String);
    assert_str(&mut vm, -1, "attached");
    assert_eq!(vm.to_userdata(1).unwrap()[7], 8);
    assert_eq!(vm.raw_len(1), 8);
}
