use lapis_core::{LuaType, Status, Vm, REGISTRY_INDEX, RIDX_GLOBALS};

use super::helpers::*;

const RETURN_GLOBAL: &str = "
upval _ENV 1 0
const str greeting
getglobal 0 0
return 0 2
";

fn reader(source: &[u8]) -> impl FnMut() -> Option<Vec<u8>> {
    // feed the chunk a few bytes at a time
    let mut blocks: Vec<Vec<u8>> = source.chunks(5).map(|c| c.to_vec()).collect();
    blocks.reverse();
    move || blocks.pop()
}

fn dump_top(vm: &mut Vm, strip: bool) -> Vec<u8> {
    let mut out = Vec::new();
    let status = vm.dump(
        |b: &[u8]| {
            out.extend_from_slice(b);
            0
        },
        strip,
    );
    assert_eq!(status, 0);
    out
}

#[test]
fn test_loaded_chunk_runs() {
    let mut vm = new_vm();
    vm.push_string("hello").unwrap();
    vm.set_global("greeting").unwrap();
    load_asm(&mut vm, RETURN_GLOBAL);
    vm.call(0, 1).unwrap();
    assert_str(&mut vm, -1, "hello");
    let results = run_asm(&mut vm, RETURN_GLOBAL);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_string());
    assert_eq!(vm.get_top(), 1);
}

#[test]
fn test_first_upvalue_is_the_globals_table() {
    let mut vm = new_vm();
    assert_eq!(vm.load(reader(RETURN_GLOBAL.as_bytes()), Some("=g"), None), Status::Ok);
    assert_eq!(vm.get_upvalue(1, 1).as_deref(), Some("_ENV"));
    vm.raw_get_i(REGISTRY_INDEX, RIDX_GLOBALS).unwrap();
    assert!(vm.raw_equal(-1, -2));
}

#[test]
fn test_syntax_error_is_reported() {
    let mut vm = new_vm();
    vm.push_integer(1);
    let status = vm.load(reader(b"frobnicate 1 2"), Some("=bad"), None);
    assert_eq!(status, Status::ErrSyntax);
    assert_eq!(vm.get_top(), 2);
    assert_str(&mut vm, -1, "=bad: unknown instruction 'frobnicate'");
}

#[test]
fn test_missing_end_is_reported() {
    let mut vm = new_vm();
    let status = vm.load(reader(b"function\nreturn 0 1\n"), Some("=open"), None);
    assert_eq!(status, Status::ErrSyntax);
    assert_str(&mut vm, -1, "=open: 'end' expected");
}

#[test]
fn test_mode_restricts_chunk_kind() {
    let mut vm = new_vm();
    let status = vm.load(reader(b"return 0 1"), Some("=t"), Some("b"));
    assert_eq!(status, Status::ErrSyntax);
    assert_str(&mut vm, -1, "attempt to load a text chunk (mode is 'b')");
    vm.set_top(0);
    assert_eq!(vm.load(reader(b"return 0 1"), Some("=t"), Some("t")), Status::Ok);
}

#[test]
fn test_dump_and_reload_behaves_the_same() {
    let mut vm = new_vm();
    vm.push_integer(31);
    vm.set_global("greeting").unwrap();
    load_asm(&mut vm, RETURN_GLOBAL);
    let bytes = dump_top(&mut vm, false);
    assert_eq!(bytes[0], 0x1b);
    vm.set_top(0);

    assert_eq!(vm.load(reader(&bytes), Some("=bin"), Some("b")), Status::Ok);
    assert_eq!(vm.get_upvalue(1, 1).as_deref(), Some("_ENV"));
    vm.pop(1);
    vm.call(0, 1).unwrap();
    assert_int(&vm, -1, 31);
}

#[test]
fn test_stripped_dump_drops_names() {
    let mut vm = new_vm();
    load_asm(&mut vm, RETURN_GLOBAL);
    let bytes = dump_top(&mut vm, true);
    vm.set_top(0);
    assert_eq!(vm.load(reader(&bytes), None, None), Status::Ok);
    assert_eq!(vm.get_upvalue(1, 1).as_deref(), Some("(*no name)"));
    // still bound to the globals
    assert_eq!(vm.type_of(-1), Some(LuaType::Table));
}

#[test]
fn test_dump_of_native_function_fails() {
    let mut vm = new_vm();
    vm.push_native_function(|_| Ok(0));
    assert_eq!(vm.dump(|_: &[u8]| 0, false), 1);
}

#[test]
fn test_nested_prototypes_survive_a_round_trip() {
    let mut vm = new_vm();
    load_asm(
        &mut vm,
        "
        const int 40
        loadk 0 0
        closure 1 0
        call 1 1 2
        return 1 2
        function
            upval x 1 0
            const int 2
            getupval 0 0
            loadk 1 0
            add 0 0 1
            return 0 2
        end
        ",
    );
    let bytes = dump_top(&mut vm, false);
    vm.set_top(0);
    assert_eq!(vm.load(reader(&bytes), Some("=nested"), None), Status::Ok);
    vm.call(0, 1).unwrap();
    assert_int(&vm, -1, 42);
}
