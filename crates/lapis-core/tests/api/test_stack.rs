use lapis_core::{LuaType, Vm, REGISTRY_INDEX};
use proptest::prelude::*;

use super::helpers::*;

#[test]
fn test_base_frame_holds_twenty_values() {
    let mut vm = Vm::new();
    for i in 0..20 {
        vm.push_integer(i);
    }
    assert_eq!(vm.get_top(), 20);
    assert_int(&vm, 1, 0);
    assert_int(&vm, -1, 19);
}

#[test]
fn test_settop_fills_with_nil() {
    let mut vm = Vm::new();
    vm.push_integer(1);
    vm.set_top(4);
    assert_eq!(vm.get_top(), 4);
    for i in 2..=4 {
        assert!(vm.is_nil(i));
    }
    vm.set_top(-3);
    assert_eq!(vm.get_top(), 2);
    vm.set_top(0);
    assert_eq!(vm.get_top(), 0);
}

#[test]
fn test_absent_index_is_none() {
    let mut vm = Vm::new();
    vm.push_integer(1);
    assert_eq!(vm.type_of(2), None);
    assert!(vm.is_none(2));
    assert_eq!(vm.type_name(vm.type_of(2)), "no value");
    assert_eq!(vm.type_of(REGISTRY_INDEX), Some(LuaType::Table));
}

#[test]
fn test_abs_index() {
    let mut vm = Vm::new();
    vm.push_integer(1);
    vm.push_integer(2);
    vm.push_integer(3);
    assert_eq!(vm.abs_index(-1), 3);
    assert_eq!(vm.abs_index(-3), 1);
    assert_eq!(vm.abs_index(2), 2);
    assert_eq!(vm.abs_index(REGISTRY_INDEX), REGISTRY_INDEX);
}

#[test]
fn test_insert_remove_replace_copy() {
    let mut vm = Vm::new();
    for i in 1..=4 {
        vm.push_integer(i);
    }
    // 1 2 3 4 -> 1 4 2 3
    vm.insert(2);
    assert_int(&vm, 2, 4);
    assert_int(&vm, 4, 3);
    // 1 4 2 3 -> 1 2 3
    vm.remove(2);
    assert_eq!(vm.get_top(), 3);
    assert_int(&vm, 2, 2);
    // 1 2 3 -> 3 2
    vm.replace(1);
    assert_eq!(vm.get_top(), 2);
    assert_int(&vm, 1, 3);
    vm.copy(1, 2);
    assert_int(&vm, 2, 3);
}

#[test]
fn test_check_stack_grows_the_frame() {
    let mut vm = Vm::new();
    assert!(vm.check_stack(500));
    for i in 0..500 {
        vm.push_integer(i);
    }
    assert_eq!(vm.get_top(), 500);
    assert_int(&vm, 500, 499);
    assert!(!vm.check_stack(2_000_000));
}

#[test]
fn test_xmove_between_threads() {
    let mut vm = Vm::new();
    let co = vm.new_thread().unwrap();
    vm.push_integer(7);
    vm.push_string("moved").unwrap();
    vm.xmove(co, 2);
    assert_eq!(vm.get_top(), 1);
    vm.with_thread(co, |vm| {
        assert_eq!(vm.get_top(), 2);
        assert_int(vm, 1, 7);
        assert_str(vm, 2, "moved");
    });
}

proptest! {
    #[test]
    fn prop_rotate_then_inverse_restores(values in prop::collection::vec(any::<i64>(), 1..18), n in -17i32..18) {
        let mut vm = Vm::new();
        for v in &values {
            vm.push_integer(*v);
        }
        let len = values.len() as i32;
        let n = n % len;
        vm.rotate(1, n);
        vm.rotate(1, -n);
        for (i, v) in values.iter().enumerate() {
            prop_assert_eq!(vm.to_integer(i as i32 + 1), Some(*v));
        }
    }

    #[test]
    fn prop_rotate_moves_top_down(values in prop::collection::vec(any::<i64>(), 2..18)) {
        let mut vm = Vm::new();
        for v in &values {
            vm.push_integer(*v);
        }
        vm.rotate(1, 1);
        prop_assert_eq!(vm.to_integer(1), values.last().copied());
        prop_assert_eq!(vm.to_integer(2), Some(values[0]));
    }
}
