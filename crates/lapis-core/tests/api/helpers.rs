//! Shared fixtures: a toy register machine standing in for the script
//! executor, and a matching text assembler as the chunk codec.
//!
//! Chunk text is one directive per line:
//!
//! ```text
//! params 1          # fixed parameter count
//! vararg
//! stack 4           # frame size
//! upval _ENV 1 0    # name (or -), in_stack, index
//! const int 5       # also: num 1.5, str some text, bool true, nil
//! loadk 0 1         # instruction with up to three operands
//! function ... end  # nested prototype
//! ```

use std::rc::Rc;

use lapis_core::{
    ChunkCodec, Constant, Executor, FunctionPrototype, LuaError, Status, TValue, UpvalDesc, Vm,
    MULTRET,
};

pub const LOADK: u32 = 0;
pub const MOVE: u32 = 1;
pub const GETUPVAL: u32 = 2;
pub const SETUPVAL: u32 = 3;
pub const CLOSURE: u32 = 4;
pub const CALL: u32 = 5;
pub const RETURN: u32 = 6;
pub const ADD: u32 = 7;
pub const GETGLOBAL: u32 = 8;

const MNEMONICS: [&str; 9] = [
    "loadk", "move", "getupval", "setupval", "closure", "call", "return", "add", "getglobal",
];

fn decode(word: u32) -> (u32, usize, usize, usize) {
    (
        word & 0xff,
        ((word >> 8) & 0xff) as usize,
        ((word >> 16) & 0xff) as usize,
        (word >> 24) as usize,
    )
}

// ---- executor ----

/// Runs one script frame per `execute` call; nested script calls recurse
/// through the core.
pub struct AsmExecutor;

fn frame_size(vm: &Vm) -> usize {
    vm.current_proto().max_stack_size as usize
}

fn count_operand(x: usize) -> Option<usize> {
    if x == 0 {
        None
    } else {
        Some(x - 1)
    }
}

impl Executor for AsmExecutor {
    fn execute(&self, vm: &mut Vm) -> Result<(), LuaError> {
        loop {
            let pc = vm.saved_pc();
            let word = match vm.current_proto().code.get(pc) {
                Some(&w) => w,
                None => {
                    vm.script_return(0, Some(0));
                    return Ok(());
                }
            };
            vm.set_saved_pc(pc + 1);
            let (op, a, b, c) = decode(word);
            match op {
                LOADK => {
                    let k = vm.constant(b);
                    vm.set_register(a, k);
                }
                MOVE => {
                    let v = vm.register(b);
                    vm.set_register(a, v);
                }
                GETUPVAL => {
                    let v = vm.closure_upvalue(b);
                    vm.set_register(a, v);
                }
                SETUPVAL => {
                    let v = vm.register(a);
                    vm.set_closure_upvalue(b, v);
                }
                CLOSURE => vm.push_script_closure(b, a)?,
                CALL => vm.call_at(a, count_operand(b), c as i32 - 1)?,
                RETURN => {
                    vm.script_return(a, count_operand(b));
                    return Ok(());
                }
                ADD => {
                    let v = match (vm.register(b), vm.register(c)) {
                        (TValue::Integer(x), TValue::Integer(y)) => TValue::Integer(x.wrapping_add(y)),
                        _ => return Err(LuaError::runtime("add expects integers")),
                    };
                    vm.set_register(a, v);
                }
                GETGLOBAL => {
                    let k = vm.constant(b);
                    vm.set_register(a, k);
                    vm.set_stack_top(a + 1);
                    let name = vm
                        .to_lstring(-1)?
                        .map(|s| String::from_utf8_lossy(s).into_owned())
                        .unwrap_or_default();
                    vm.pop(1);
                    vm.get_global(&name)?;
                    let size = frame_size(vm);
                    vm.set_stack_top(size);
                }
                _ => return Err(LuaError::runtime(format!("bad opcode {op}"))),
            }
        }
    }

    fn finish_op(&self, vm: &mut Vm) -> Result<(), LuaError> {
        let pc = vm.saved_pc();
        if pc == 0 {
            return Ok(());
        }
        let (op, _, _, c) = decode(vm.current_proto().code[pc - 1]);
        if op == CALL && c != 0 {
            let size = frame_size(vm);
            vm.set_stack_top(size);
        }
        Ok(())
    }
}

// ---- codec ----

/// Text assembler; binary chunks are `\x1bLua` followed by the same text.
pub struct AsmCodec;

fn syntax(chunkname: &str, msg: impl std::fmt::Display) -> LuaError {
    LuaError::Syntax(format!("{chunkname}: {msg}"))
}

fn operand<T: std::str::FromStr>(args: &[&str], i: usize, chunkname: &str) -> Result<T, LuaError> {
    match args.get(i) {
        Some(s) => s
            .parse()
            .map_err(|_| syntax(chunkname, format!("malformed operand '{s}'"))),
        None => Err(syntax(chunkname, "missing operand")),
    }
}

fn parse_constant(args: &[&str], chunkname: &str) -> Result<Constant, LuaError> {
    Ok(match args.first().copied() {
        Some("nil") => Constant::Nil,
        Some("bool") => Constant::Boolean(args.get(1) == Some(&"true")),
        Some("int") => Constant::Integer(operand(args, 1, chunkname)?),
        Some("num") => Constant::Float(operand(args, 1, chunkname)?),
        Some("str") => Constant::String(args[1..].join(" ").into_bytes()),
        _ => return Err(syntax(chunkname, "bad constant")),
    })
}

fn parse_function(
    lines: &mut std::str::Lines<'_>,
    chunkname: &str,
    nested: bool,
) -> Result<FunctionPrototype, LuaError> {
    let mut fp = FunctionPrototype {
        source: chunkname.to_string(),
        max_stack_size: 8,
        ..FunctionPrototype::default()
    };
    while let Some(line) = lines.next() {
        let line = line.split('#').next().unwrap_or("");
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else { continue };
        let args: Vec<&str> = words.collect();
        match head {
            "end" if nested => return Ok(fp),
            "params" => fp.num_params = operand(&args, 0, chunkname)?,
            "vararg" => fp.is_vararg = true,
            "stack" => fp.max_stack_size = operand(&args, 0, chunkname)?,
            "upval" => fp.upvalues.push(UpvalDesc {
                name: args.first().filter(|n| **n != "-").map(|n| n.to_string()),
                in_stack: operand::<u8>(&args, 1, chunkname)? == 1,
                index: operand(&args, 2, chunkname)?,
            }),
            "const" => fp.constants.push(parse_constant(&args, chunkname)?),
            "function" => fp.protos.push(parse_function(lines, chunkname, true)?),
            op => {
                let code = MNEMONICS
                    .iter()
                    .position(|m| *m == op)
                    .ok_or_else(|| syntax(chunkname, format!("unknown instruction '{op}'")))?;
                let mut word = code as u32;
                for (i, shift) in [8, 16, 24].into_iter().enumerate() {
                    if i < args.len() {
                        word |= operand::<u32>(&args, i, chunkname)? << shift;
                    }
                }
                fp.code.push(word);
            }
        }
    }
    if nested {
        Err(syntax(chunkname, "'end' expected"))
    } else {
        Ok(fp)
    }
}

fn write_function(fp: &FunctionPrototype, out: &mut String) {
    out.push_str(&format!("stack {}\nparams {}\n", fp.max_stack_size, fp.num_params));
    if fp.is_vararg {
        out.push_str("vararg\n");
    }
    for u in &fp.upvalues {
        let name = u.name.as_deref().unwrap_or("-");
        out.push_str(&format!("upval {name} {} {}\n", u8::from(u.in_stack), u.index));
    }
    for k in &fp.constants {
        let line = match k {
            Constant::Nil => "const nil".to_string(),
            Constant::Boolean(b) => format!("const bool {b}"),
            Constant::Integer(i) => format!("const int {i}"),
            Constant::Float(f) => format!("const num {f}"),
            Constant::String(s) => format!("const str {}", String::from_utf8_lossy(s)),
        };
        out.push_str(&line);
        out.push('\n');
    }
    for &word in &fp.code {
        let (op, a, b, c) = decode(word);
        out.push_str(&format!("{} {a} {b} {c}\n", MNEMONICS[op as usize]));
    }
    for child in &fp.protos {
        out.push_str("function\n");
        write_function(child, out);
        out.push_str("end\n");
    }
}

impl ChunkCodec for AsmCodec {
    fn parse(&self, source: &[u8], chunkname: &str) -> Result<FunctionPrototype, LuaError> {
        let text = std::str::from_utf8(source).map_err(|_| syntax(chunkname, "invalid utf-8"))?;
        parse_function(&mut text.lines(), chunkname, false)
    }

    fn undump(&self, bytes: &[u8], chunkname: &str) -> Result<FunctionPrototype, LuaError> {
        let body = bytes
            .strip_prefix(b"\x1bLua")
            .ok_or_else(|| syntax(chunkname, "bad binary format (not a chunk)"))?;
        self.parse(body, chunkname)
    }

    fn dump(&self, proto: &FunctionPrototype, _strip: bool, writer: &mut dyn FnMut(&[u8]) -> i32) -> i32 {
        let mut text = String::new();
        write_function(proto, &mut text);
        match writer(b"\x1bLua") {
            0 => writer(text.as_bytes()),
            status => status,
        }
    }
}

// ---- fixtures ----

/// An engine with the assembler codec and the toy executor installed.
pub fn new_vm() -> Vm {
    let mut vm = Vm::new();
    vm.set_executor(Rc::new(AsmExecutor));
    vm.set_codec(Rc::new(AsmCodec));
    vm
}

/// Load `source` and leave the function on top of the stack.
pub fn load_asm(vm: &mut Vm, source: &str) {
    let mut block = Some(source.as_bytes().to_vec());
    let status = vm.load(move || block.take(), Some("=test"), None);
    if status != Status::Ok {
        let msg = top_string(vm);
        panic!("load failed ({status:?}): {msg}");
    }
}

/// Load and call `source`, returning every result.
pub fn run_asm(vm: &mut Vm, source: &str) -> Vec<TValue> {
    let base = vm.get_top();
    load_asm(vm, source);
    let status = vm.pcall(0, MULTRET, 0);
    if status != Status::Ok {
        let msg = top_string(vm);
        panic!("call failed ({status:?}): {msg}");
    }
    results_above(vm, base)
}

/// Values from `base + 1` to the top, popped.
pub fn results_above(vm: &mut Vm, base: i32) -> Vec<TValue> {
    let top = vm.get_top();
    let out = (base + 1..=top).map(|i| vm.value_at(i)).collect();
    vm.set_top(base);
    out
}

/// The top value as text; numbers are converted in place.
pub fn top_string(vm: &mut Vm) -> String {
    match vm.to_lstring(-1) {
        Ok(Some(s)) => String::from_utf8_lossy(s).into_owned(),
        _ => String::from("<not a string>"),
    }
}

/// Check that the value at `idx` is the integer `expected`.
pub fn assert_int(vm: &Vm, idx: i32, expected: i64) {
    assert!(vm.is_integer(idx), "value at {idx} is not an integer");
    assert_eq!(vm.to_integer(idx), Some(expected), "value at {idx}");
}

/// Check that the value at `idx` is the string `expected`.
pub fn assert_str(vm: &mut Vm, idx: i32, expected: &str) {
    assert!(vm.is_string(idx), "value at {idx} is not a string");
    let got = vm.to_lstring(idx).unwrap().map(|s| s.to_vec());
    assert_eq!(got.as_deref(), Some(expected.as_bytes()), "value at {idx}");
}

/// Check that results[idx] is an integer with the expected value.
pub fn assert_result_int(results: &[TValue], idx: usize, expected: i64) {
    let got = results[idx]
        .as_integer()
        .unwrap_or_else(|| panic!("result[{idx}] = {:?}, expected integer {expected}", results[idx]));
    assert_eq!(got, expected, "result[{idx}] = {got}, expected {expected}");
}
