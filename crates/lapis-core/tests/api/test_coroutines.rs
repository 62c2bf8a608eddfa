use lapis_core::{LuaError, Status, Vm, MULTRET};

use super::helpers::*;

fn pass_through(vm: &mut Vm) -> Result<usize, LuaError> {
    let n = vm.get_top();
    vm.yield_k(n, None)
}

fn count_up(vm: &mut Vm) -> Result<usize, LuaError> {
    vm.push_integer(1);
    vm.yield_k(
        1,
        Some(Box::new(|vm, _| {
            vm.push_integer(2);
            vm.yield_k(1, Some(Box::new(|vm, _| {
                vm.push_string("done")?;
                Ok(1)
            })))
        })),
    )
}

/// Script body: `return pass(5)`, suspended inside the native call.
const YIELD_FROM_SCRIPT: &str = "
upval _ENV 1 0
const str pass
const int 5
getglobal 0 0
loadk 1 1
call 0 2 2
return 0 2
";

#[test]
fn test_native_body_yields_and_finishes() {
    let mut vm = Vm::new();
    let co = vm.new_thread().unwrap();
    vm.with_thread(co, |vm| vm.push_native_function(count_up));
    assert_eq!(vm.resume(co, 0), Status::Yield);
    vm.with_thread(co, |vm| assert_int(vm, -1, 1));
    assert_eq!(vm.resume(co, 0), Status::Yield);
    vm.with_thread(co, |vm| assert_int(vm, -1, 2));
    assert_eq!(vm.resume(co, 0), Status::Ok);
    vm.with_thread(co, |vm| assert_str(vm, -1, "done"));
    // a finished coroutine cannot be resumed
    vm.with_thread(co, |vm| vm.set_top(0));
    assert_eq!(vm.resume(co, 0), Status::ErrRun);
    vm.with_thread(co, |vm| assert_str(vm, -1, "cannot resume dead coroutine"));
}

#[test]
fn test_script_frame_resumes_after_yield() {
    let mut vm = new_vm();
    vm.push_native_function(pass_through);
    vm.set_global("pass").unwrap();
    let co = vm.new_thread().unwrap();
    load_asm(&mut vm, YIELD_FROM_SCRIPT);
    vm.xmove(co, 1);

    assert_eq!(vm.resume(co, 0), Status::Yield);
    vm.with_thread(co, |vm| {
        assert_eq!(vm.status(), Status::Yield);
        assert_int(vm, -1, 5);
        vm.set_top(0);
        vm.push_integer(42);
    });
    assert_eq!(vm.resume(co, 1), Status::Ok);
    vm.with_thread(co, |vm| {
        assert_eq!(vm.get_top(), 1);
        assert_int(vm, -1, 42);
    });
}

#[test]
fn test_error_kills_the_coroutine() {
    fn fail(vm: &mut Vm) -> Result<usize, LuaError> {
        vm.push_string("inside")?;
        vm.error()
    }
    let mut vm = Vm::new();
    let co = vm.new_thread().unwrap();
    vm.with_thread(co, |vm| vm.push_native_function(fail));
    assert_eq!(vm.resume(co, 0), Status::ErrRun);
    vm.with_thread(co, |vm| {
        assert_eq!(vm.status(), Status::ErrRun);
        assert_str(vm, -1, "inside");
    });
    assert_eq!(vm.resume(co, 0), Status::ErrRun);
}

#[test]
fn test_main_thread_cannot_yield() {
    let mut vm = Vm::new();
    assert!(!vm.is_yieldable());
    vm.push_native_function(pass_through);
    assert_eq!(vm.pcall(0, 0, 0), Status::ErrRun);
    assert_str(&mut vm, -1, "attempt to yield from outside a coroutine");
}

#[test]
fn test_yield_across_pcall_is_refused() {
    fn guarded(vm: &mut Vm) -> Result<usize, LuaError> {
        vm.push_native_function(pass_through);
        let status = vm.pcall(0, 0, 0);
        vm.push_boolean(status == Status::Ok);
        Ok(2)
    }
    let mut vm = Vm::new();
    let co = vm.new_thread().unwrap();
    vm.with_thread(co, |vm| vm.push_native_function(guarded));
    assert_eq!(vm.resume(co, 0), Status::Ok);
    vm.with_thread(co, |vm| {
        assert!(!vm.to_boolean(-1));
        assert_str(vm, -2, "attempt to yield across a C-call boundary");
    });
}

#[test]
fn test_call_k_continuation_finishes_the_caller() {
    fn add_to_marker(vm: &mut Vm) -> Result<usize, LuaError> {
        vm.push_integer(100);
        vm.push_native_function(pass_through);
        vm.push_integer(7);
        vm.call_k(
            1,
            MULTRET,
            Some(Box::new(|vm, status| {
                assert_eq!(status, Status::Yield);
                assert_eq!(vm.get_top(), 2);
                let sum = vm.to_integer(-1).unwrap_or(0) + vm.to_integer(-2).unwrap_or(0);
                vm.push_integer(sum);
                Ok(1)
            })),
        )?;
        vm.push_string("callee returned without yielding")?;
        Ok(1)
    }
    let mut vm = Vm::new();
    let co = vm.new_thread().unwrap();
    vm.with_thread(co, |vm| vm.push_native_function(add_to_marker));
    assert_eq!(vm.resume(co, 0), Status::Yield);
    vm.with_thread(co, |vm| {
        assert_eq!(vm.get_top(), 1);
        assert_int(vm, -1, 7);
        vm.set_top(0);
        vm.push_integer(8);
    });
    assert_eq!(vm.resume(co, 1), Status::Ok);
    vm.with_thread(co, |vm| {
        assert_eq!(vm.get_top(), 1);
        assert_int(vm, -1, 108);
    });
}

#[test]
fn test_resuming_a_waiting_thread_is_refused() {
    fn resume_main(vm: &mut Vm) -> Result<usize, LuaError> {
        let main = vm.main_thread();
        let status = vm.resume(main, 0);
        let msg = vm.with_thread(main, |vm| {
            let msg = top_string(vm);
            vm.pop(1);
            msg
        });
        vm.push_boolean(status == Status::ErrRun);
        vm.push_string(&msg)?;
        Ok(2)
    }
    let mut vm = Vm::new();
    vm.push_integer(5);
    let co = vm.new_thread().unwrap();
    vm.with_thread(co, |vm| vm.push_native_function(resume_main));
    assert_eq!(vm.resume(co, 0), Status::Ok);
    vm.with_thread(co, |vm| {
        assert!(vm.to_boolean(-2));
        assert_str(vm, -1, "cannot resume non-suspended coroutine");
    });
    assert_eq!(vm.status(), Status::Ok);
    vm.pop(1);
    assert_eq!(vm.get_top(), 1);
    assert_int(&vm, 1, 5);
}
