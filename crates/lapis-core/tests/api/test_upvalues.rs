use lapis_core::{upvalue_index, LuaError, Status, Vm};
use proptest::prelude::*;

use super::helpers::*;

fn nth_upvalue(vm: &mut Vm) -> Result<usize, LuaError> {
    let n = vm.to_integer(1).unwrap_or(1) as i32;
    vm.push_value(upvalue_index(n));
    Ok(1)
}

/// Two script chunks on top of the stack: one returning its second
/// upvalue `b`, one returning its only upvalue `c`.
fn load_pair(vm: &mut Vm) {
    load_asm(vm, "upval a 1 0\nupval b 1 1\ngetupval 0 1\nreturn 0 2");
    load_asm(vm, "upval c 1 0\ngetupval 0 0\nreturn 0 2");
}

#[test]
fn test_native_upvalues_are_pseudo_indices() {
    let mut vm = Vm::new();
    vm.push_string("first").unwrap();
    vm.push_integer(2);
    vm.push_native_closure(nth_upvalue, 2).unwrap();
    assert_eq!(vm.get_top(), 1);
    vm.push_value(1);
    vm.push_integer(1);
    vm.call(1, 1).unwrap();
    assert_str(&mut vm, -1, "first");
    vm.pop(1);
    vm.push_value(1);
    vm.push_integer(3);
    vm.call(1, 1).unwrap();
    // past the last upvalue
    assert!(vm.is_nil(-1));
}

#[test]
fn test_set_then_get_native_upvalue() {
    let mut vm = Vm::new();
    vm.push_integer(1);
    vm.push_native_closure(nth_upvalue, 1).unwrap();
    vm.push_string("replaced").unwrap();
    assert_eq!(vm.set_upvalue(1, 1).as_deref(), Some(""));
    assert_eq!(vm.get_upvalue(1, 1).as_deref(), Some(""));
    assert_str(&mut vm, -1, "replaced");
    assert_eq!(vm.get_upvalue(1, 2), None);
    assert_eq!(vm.get_top(), 2);
}

#[test]
fn test_script_upvalue_names() {
    let mut vm = new_vm();
    load_pair(&mut vm);
    assert_eq!(vm.get_upvalue(1, 2).as_deref(), Some("b"));
    vm.pop(1);
    vm.push_integer(5);
    assert_eq!(vm.set_upvalue(2, 1).as_deref(), Some("c"));
    assert_eq!(vm.get_upvalue(2, 2), None);
}

#[test]
fn test_upvalue_join_shares_the_cell() {
    let mut vm = new_vm();
    load_pair(&mut vm);
    assert_ne!(vm.upvalue_id(1, 2), vm.upvalue_id(2, 1));
    vm.upvalue_join(1, 2, 2, 1);
    assert_eq!(vm.upvalue_id(1, 2), vm.upvalue_id(2, 1));

    vm.push_integer(77);
    vm.set_upvalue(2, 1);
    vm.get_upvalue(1, 2);
    assert_int(&vm, -1, 77);
    vm.pop(1);

    // the first function now returns what the second one sees
    vm.push_value(1);
    assert_eq!(vm.pcall(0, 1, 0), Status::Ok);
    assert_int(&vm, -1, 77);
}

#[test]
fn test_join_survives_collection() {
    let mut vm = new_vm();
    load_pair(&mut vm);
    vm.upvalue_join(1, 1, 2, 1);
    vm.push_string("kept").unwrap();
    vm.set_upvalue(1, 1);
    vm.remove(2);
    vm.gc(lapis_core::GcOp::Collect).unwrap();
    vm.get_upvalue(1, 1);
    assert_str(&mut vm, -1, "kept");
}

const COUNTER_FACTORY: &str = "
    const int 0
    loadk 0 0
    closure 1 0
    return 1 2
    function
        upval n 1 0
        const int 1
        getupval 0 0
        loadk 1 0
        add 0 0 1
        setupval 0 0
        return 0 2
    end
";

#[test]
fn test_closed_upvalue_outlives_its_frame() {
    let mut vm = new_vm();
    load_asm(&mut vm, COUNTER_FACTORY);
    vm.call(0, 1).unwrap();
    for expected in 1..=3 {
        vm.push_value(1);
        vm.call(0, 1).unwrap();
        assert_int(&vm, -1, expected);
        vm.pop(1);
    }
    assert_eq!(vm.get_upvalue(1, 1).as_deref(), Some("n"));
    assert_int(&vm, -1, 3);
}

#[test]
fn test_each_factory_call_gets_a_fresh_cell() {
    let mut vm = new_vm();
    load_asm(&mut vm, COUNTER_FACTORY);
    vm.push_value(1);
    vm.call(0, 1).unwrap();
    vm.push_value(1);
    vm.call(0, 1).unwrap();
    assert_ne!(vm.upvalue_id(2, 1), vm.upvalue_id(3, 1));
    vm.push_value(2);
    vm.call(0, 1).unwrap();
    vm.push_value(3);
    vm.call(0, 1).unwrap();
    assert_int(&vm, -2, 1);
    assert_int(&vm, -1, 1);
}

proptest! {
    #[test]
    fn prop_upvalues_read_back_in_order(values in prop::collection::vec(any::<i64>(), 1..16)) {
        let mut vm = Vm::new();
        for v in &values {
            vm.push_integer(*v);
        }
        vm.push_native_closure(nth_upvalue, values.len() as i32).unwrap();
        for (i, v) in values.iter().enumerate() {
            prop_assert!(vm.get_upvalue(1, i as i32 + 1).is_some());
            prop_assert_eq!(vm.to_integer(-1), Some(*v));
            vm.pop(1);
        }
        prop_assert_eq!(vm.get_upvalue(1, values.len() as i32 + 1), None);
    }

    #[test]
    fn prop_set_upvalue_round_trips(n in 1usize..8, which in 0usize..8, value in any::<i64>()) {
        let which = which % n + 1;
        let mut vm = Vm::new();
        for _ in 0..n {
            vm.push_nil();
        }
        vm.push_native_closure(nth_upvalue, n as i32).unwrap();
        vm.push_integer(value);
        prop_assert!(vm.set_upvalue(1, which as i32).is_some());
        vm.get_upvalue(1, which as i32);
        prop_assert_eq!(vm.to_integer(-1), Some(value));
    }
}
