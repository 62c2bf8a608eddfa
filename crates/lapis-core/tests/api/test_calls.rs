use lapis_core::{LuaError, Status, Vm, MULTRET};

use super::helpers::*;

fn three_results(vm: &mut Vm) -> Result<usize, LuaError> {
    vm.push_integer(1);
    vm.push_integer(2);
    vm.push_integer(3);
    Ok(3)
}

fn sum_args(vm: &mut Vm) -> Result<usize, LuaError> {
    let n = vm.get_top();
    let mut total = 0;
    for i in 1..=n {
        total += vm.to_integer(i).unwrap_or(0);
    }
    vm.push_integer(total);
    Ok(1)
}

fn fail(vm: &mut Vm) -> Result<usize, LuaError> {
    vm.push_string("boom")?;
    vm.error()
}

fn decorate(vm: &mut Vm) -> Result<usize, LuaError> {
    vm.push_string("handled: ")?;
    vm.insert(1);
    vm.concat(2)?;
    Ok(1)
}

fn recurse(vm: &mut Vm) -> Result<usize, LuaError> {
    vm.push_native_function(recurse);
    vm.call(0, 0)?;
    Ok(0)
}

#[test]
fn test_call_adjusts_results() {
    let mut vm = Vm::new();
    vm.push_native_function(three_results);
    vm.call(0, MULTRET).unwrap();
    assert_eq!(vm.get_top(), 3);
    vm.set_top(0);
    vm.push_native_function(three_results);
    vm.call(0, 1).unwrap();
    assert_eq!(vm.get_top(), 1);
    assert_int(&vm, 1, 1);
    vm.push_native_function(three_results);
    vm.call(0, 5).unwrap();
    assert_eq!(vm.get_top(), 6);
    assert!(vm.is_nil(6));
}

#[test]
fn test_call_passes_arguments() {
    let mut vm = Vm::new();
    vm.push_native_function(sum_args);
    vm.push_integer(4);
    vm.push_integer(5);
    vm.call(2, 1).unwrap();
    assert_int(&vm, -1, 9);
}

#[test]
fn test_pcall_error_leaves_message_at_saved_top() {
    let mut vm = Vm::new();
    vm.push_integer(10);
    vm.push_integer(20);
    vm.push_integer(30);
    let saved = vm.get_top();
    vm.push_native_function(fail);
    vm.push_integer(1);
    vm.push_integer(2);
    assert_eq!(vm.pcall(2, 1, 0), Status::ErrRun);
    assert_eq!(vm.get_top(), saved + 1);
    assert_str(&mut vm, -1, "boom");
    assert_int(&vm, 3, 30);
}

#[test]
fn test_message_handler_rewrites_error() {
    let mut vm = Vm::new();
    vm.push_native_function(decorate);
    vm.push_native_function(fail);
    assert_eq!(vm.pcall(0, 1, 1), Status::ErrRun);
    assert_eq!(vm.get_top(), 2);
    assert_str(&mut vm, -1, "handled: boom");
}

#[test]
fn test_failing_handler_is_error_in_error_handling() {
    let mut vm = Vm::new();
    vm.push_native_function(fail);
    vm.push_native_function(fail);
    assert_eq!(vm.pcall(0, 0, 1), Status::ErrErr);
    assert_str(&mut vm, -1, "error in error handling");
}

#[test]
fn test_unbounded_native_recursion_is_caught() {
    let mut vm = Vm::new();
    vm.push_native_function(recurse);
    assert_eq!(vm.pcall(0, 0, 0), Status::ErrRun);
    assert_str(&mut vm, -1, "C stack overflow");
    // the engine stays usable
    vm.set_top(0);
    vm.push_native_function(sum_args);
    vm.push_integer(1);
    vm.call(1, 1).unwrap();
    assert_int(&vm, 1, 1);
}

#[test]
fn test_call_metamethod() {
    fn call_handler(vm: &mut Vm) -> Result<usize, LuaError> {
        // self plus the original argument
        vm.push_integer(vm.get_top() as i64);
        Ok(1)
    }
    let mut vm = Vm::new();
    vm.create_table(0, 0).unwrap();
    vm.create_table(0, 1).unwrap();
    vm.push_native_function(call_handler);
    vm.set_field(-2, "__call").unwrap();
    vm.set_metatable(-2).unwrap();
    vm.push_integer(99);
    vm.call(1, 1).unwrap();
    assert_int(&vm, -1, 2);
}

#[test]
fn test_calling_a_number_fails() {
    let mut vm = Vm::new();
    vm.push_integer(3);
    assert_eq!(vm.pcall(0, 0, 0), Status::ErrRun);
    assert_str(&mut vm, -1, "attempt to call a number value");
}

#[test]
fn test_script_function_calls_native() {
    let mut vm = new_vm();
    vm.push_native_function(sum_args);
    vm.set_global("sum").unwrap();
    let results = run_asm(
        &mut vm,
        "
        const str sum
        const int 20
        const int 22
        getglobal 0 0
        loadk 1 1
        loadk 2 2
        call 0 3 2
        return 0 2
        ",
    );
    assert_eq!(results.len(), 1);
    assert_result_int(&results, 0, 42);
}

#[test]
fn test_script_error_propagates_to_pcall() {
    let mut vm = new_vm();
    vm.push_native_function(fail);
    vm.set_global("fail").unwrap();
    load_asm(
        &mut vm,
        "
        const str fail
        getglobal 0 0
        call 0 1 1
        return 0 1
        ",
    );
    assert_eq!(vm.pcall(0, 0, 0), Status::ErrRun);
    assert_str(&mut vm, -1, "boom");
    assert_eq!(vm.get_top(), 1);
}

#[test]
fn test_script_without_executor() {
    let mut vm = new_vm();
    load_asm(&mut vm, "return 0 1");
    let mut plain = Vm::new();
    // a bare engine has nothing to run script frames with
    plain.set_codec(std::rc::Rc::new(AsmCodec));
    load_asm(&mut plain, "return 0 1");
    assert_eq!(plain.pcall(0, 0, 0), Status::ErrRun);
    assert_str(&mut plain, -1, "no executor installed");
    assert_eq!(vm.pcall(0, 0, 0), Status::Ok);
}

const ABORT_CHILD_ENV: &str = "LAPIS_TEST_ABORT_CHILD";

fn report_to_stderr(vm: &mut Vm) -> Result<usize, LuaError> {
    let msg = top_string(vm);
    eprintln!("panic callback saw: {msg}");
    Ok(0)
}

#[test]
fn test_unprotected_error_runs_panic_callback_then_aborts() {
    if std::env::var_os(ABORT_CHILD_ENV).is_some() {
        let mut vm = Vm::new();
        vm.at_panic(Some(report_to_stderr));
        vm.push_integer(1);
        let _ = vm.call(0, 0);
        unreachable!("an unprotected error returned to the host");
    }
    let out = std::process::Command::new(std::env::current_exe().unwrap())
        .args([
            "--exact",
            "api::test_calls::test_unprotected_error_runs_panic_callback_then_aborts",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(ABORT_CHILD_ENV, "1")
        .output()
        .unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("panic callback saw: attempt to call a number value"),
        "child stderr: {stderr}"
    );
    assert!(!stderr.contains("an unprotected error returned"));
}
