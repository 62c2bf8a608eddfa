use std::cell::Cell;
use std::rc::Rc;

use lapis_core::{Allocator, EngineConfig, GcOp, LuaError, LuaType, Vm};

use super::helpers::*;

fn bytes_in_use(vm: &mut Vm) -> usize {
    let kib = vm.gc(GcOp::Count).unwrap() as usize;
    let rem = vm.gc(GcOp::CountB).unwrap() as usize;
    kib * 1024 + rem
}

fn count_finalized(vm: &mut Vm) -> Result<usize, LuaError> {
    let n = match vm.get_global("finalized")? {
        LuaType::Number => vm.to_integer(-1).unwrap_or(0),
        _ => 0,
    };
    vm.pop(1);
    vm.push_integer(n + 1);
    vm.set_global("finalized")?;
    Ok(0)
}

/// Approves everything and records the bytes it believes are live.
struct TrackingAllocator(Rc<Cell<usize>>);

impl Allocator for TrackingAllocator {
    fn realloc(&mut self, old_size: usize, new_size: usize) -> bool {
        self.0.set(self.0.get() + new_size - old_size);
        true
    }
}

#[test]
fn test_table_growth_is_charged_to_the_allocator() {
    let seen = Rc::new(Cell::new(0));
    let mut vm = Vm::with_allocator(EngineConfig::default(), Box::new(TrackingAllocator(seen.clone())))
        .expect("engine fits");
    vm.gc(GcOp::Stop).unwrap();
    let engine_before = bytes_in_use(&mut vm);
    let host_before = seen.get();

    vm.create_table(0, 0).unwrap();
    for i in 2..=5000 {
        vm.push_integer(i);
        vm.raw_set_i(1, i).unwrap();
    }
    // closing the gap moves the sparse keys into the array part
    vm.push_integer(1);
    vm.raw_set_i(1, 1).unwrap();
    for i in 0..3000 {
        vm.push_number(i as f64 + 0.5);
        vm.push_boolean(true);
        vm.raw_set(1).unwrap();
    }

    let engine_growth = bytes_in_use(&mut vm) - engine_before;
    let host_growth = seen.get() - host_before;
    assert!(engine_growth > 0);
    assert_eq!(engine_growth, host_growth);
}

#[test]
fn test_collecting_a_cycle_frees_memory() {
    let mut vm = Vm::new();
    vm.gc(GcOp::Collect).unwrap();
    let before = bytes_in_use(&mut vm);

    vm.create_table(0, 1).unwrap();
    vm.create_table(0, 1).unwrap();
    vm.push_value(2);
    vm.set_field(1, "other").unwrap();
    vm.push_value(1);
    vm.set_field(2, "other").unwrap();
    for i in 0..64 {
        vm.push_integer(i);
        vm.raw_set_i(1, i + 1).unwrap();
    }
    let with_cycle = bytes_in_use(&mut vm);
    assert!(with_cycle > before);

    vm.set_top(0);
    vm.gc(GcOp::Collect).unwrap();
    assert!(bytes_in_use(&mut vm) < with_cycle);
}

#[test]
fn test_finalizer_runs_once_for_dead_userdata() {
    let mut vm = Vm::new();
    vm.new_userdata(16).unwrap();
    vm.create_table(0, 1).unwrap();
    vm.push_native_function(count_finalized);
    vm.set_field(-2, "__gc").unwrap();
    vm.set_metatable(-2).unwrap();
    vm.gc(GcOp::Collect).unwrap();
    vm.get_global("finalized").unwrap();
    assert!(vm.is_nil(-1));
    vm.set_top(0);

    vm.gc(GcOp::Collect).unwrap();
    vm.gc(GcOp::Collect).unwrap();
    vm.get_global("finalized").unwrap();
    assert_int(&vm, -1, 1);
}

#[test]
fn test_stop_and_restart() {
    let mut vm = Vm::new();
    assert_eq!(vm.gc(GcOp::IsRunning).unwrap(), 1);
    vm.gc(GcOp::Stop).unwrap();
    assert_eq!(vm.gc(GcOp::IsRunning).unwrap(), 0);
    // allocation alone does not collect while stopped
    for _ in 0..200 {
        vm.create_table(16, 0).unwrap();
        vm.pop(1);
    }
    let grown = bytes_in_use(&mut vm);
    vm.gc(GcOp::Restart).unwrap();
    assert_eq!(vm.gc(GcOp::IsRunning).unwrap(), 1);
    vm.gc(GcOp::Collect).unwrap();
    assert!(bytes_in_use(&mut vm) < grown);
}

#[test]
fn test_steps_finish_a_cycle() {
    let mut vm = Vm::new();
    for _ in 0..50 {
        vm.create_table(8, 8).unwrap();
        vm.pop(1);
    }
    let mut finished = false;
    for _ in 0..10_000 {
        if vm.gc(GcOp::Step(0)).unwrap() == 1 {
            finished = true;
            break;
        }
    }
    assert!(finished, "incremental steps never completed a cycle");
}

#[test]
fn test_tuning_returns_previous_values() {
    let mut vm = Vm::new();
    let pause = vm.gc(GcOp::SetPause(150)).unwrap();
    assert_eq!(vm.gc(GcOp::SetPause(pause)).unwrap(), 150);
    let stepmul = vm.gc(GcOp::SetStepMul(10)).unwrap();
    // clamped to the minimum
    assert_eq!(vm.gc(GcOp::SetStepMul(stepmul)).unwrap(), 40);
}

#[test]
fn test_strings_and_closures_survive_while_reachable() {
    let mut vm = new_vm();
    load_asm(&mut vm, "const str a long enough constant to be a long string value\nloadk 0 0\nreturn 0 2");
    vm.set_global("f").unwrap();
    vm.gc(GcOp::Collect).unwrap();
    vm.get_global("f").unwrap();
    vm.call(0, 1).unwrap();
    assert_str(&mut vm, -1, "a long enough constant to be a long string value");
}
