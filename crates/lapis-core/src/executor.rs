//! Collaborators outside the core: the instruction executor and the chunk
//! codec, plus the frame API an executor drives.

use crate::callinfo::FrameKind;
use crate::config::MULTRET;
use crate::error::LuaError;
use crate::func::UpvalId;
use crate::gc::GcIdx;
use crate::object::{LuaClosure, Proto, UpvalDesc};
use crate::state::Vm;
use crate::value::TValue;

/// Runs script frames. The core enters it for every call of a script
/// closure and on resumption of an interrupted script frame.
pub trait Executor {
    /// Run the current script frame until it returns.
    fn execute(&self, vm: &mut Vm) -> Result<(), LuaError>;

    /// Complete the instruction that was interrupted by a suspension before
    /// `execute` continues the frame.
    fn finish_op(&self, _vm: &mut Vm) -> Result<(), LuaError> {
        Ok(())
    }
}

/// Turns source text and binary chunks into prototypes and back.
pub trait ChunkCodec {
    /// Compile a text chunk.
    fn parse(&self, source: &[u8], chunkname: &str) -> Result<FunctionPrototype, LuaError>;

    /// Read a binary chunk (starting with the `\x1bLua` signature).
    fn undump(&self, bytes: &[u8], chunkname: &str) -> Result<FunctionPrototype, LuaError>;

    /// Serialize a prototype through `writer`. Returns the first non-zero
    /// writer status, or 0.
    fn dump(
        &self,
        proto: &FunctionPrototype,
        strip: bool,
        writer: &mut dyn FnMut(&[u8]) -> i32,
    ) -> i32;
}

/// Pull callback feeding a chunk to `load`. `None` or an empty block ends
/// the input.
pub trait ChunkReader {
    fn read_block(&mut self) -> Option<Vec<u8>>;
}

impl<F: FnMut() -> Option<Vec<u8>>> ChunkReader for F {
    fn read_block(&mut self) -> Option<Vec<u8>> {
        self()
    }
}

/// Push callback receiving the output of `dump`. A non-zero return stops
/// the dump.
pub trait ChunkWriter {
    fn write_block(&mut self, block: &[u8]) -> i32;
}

impl<F: FnMut(&[u8]) -> i32> ChunkWriter for F {
    fn write_block(&mut self, block: &[u8]) -> i32 {
        self(block)
    }
}

/// A constant as the codec sees it.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
}

/// A compiled function outside the heap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FunctionPrototype {
    pub source: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub code: Vec<u32>,
    pub constants: Vec<Constant>,
    pub upvalues: Vec<UpvalDesc>,
    pub protos: Vec<FunctionPrototype>,
    pub line_info: Vec<u32>,
}

impl Vm {
    /// Build heap prototypes for `fp` and its nested functions. Nothing
    /// anchors the new objects yet, so the caller keeps emergency
    /// collections off.
    pub(crate) fn materialize(&mut self, fp: &FunctionPrototype) -> Result<GcIdx<Proto>, LuaError> {
        let mut protos = Vec::with_capacity(fp.protos.len());
        for child in &fp.protos {
            protos.push(self.materialize(child)?);
        }
        let mut constants = Vec::with_capacity(fp.constants.len());
        for c in &fp.constants {
            constants.push(match c {
                Constant::Nil => TValue::Nil,
                Constant::Boolean(b) => TValue::Boolean(*b),
                Constant::Integer(i) => TValue::Integer(*i),
                Constant::Float(f) => TValue::Float(*f),
                Constant::String(s) => self.new_string(s)?,
            });
        }
        self.new_proto(Proto {
            source: fp.source.clone(),
            line_defined: fp.line_defined,
            last_line_defined: fp.last_line_defined,
            num_params: fp.num_params,
            is_vararg: fp.is_vararg,
            max_stack_size: fp.max_stack_size,
            code: fp.code.clone(),
            constants,
            upvalues: fp.upvalues.clone(),
            protos,
            line_info: fp.line_info.clone(),
        })
    }

    /// Copy a heap prototype out for the codec. Stripping drops the debug
    /// information.
    pub(crate) fn export_proto(&self, p: GcIdx<Proto>, strip: bool) -> FunctionPrototype {
        let proto = self.g.protos.get(p);
        let constants = proto
            .constants
            .iter()
            .map(|c| match *c {
                TValue::Boolean(b) => Constant::Boolean(b),
                TValue::Integer(i) => Constant::Integer(i),
                TValue::Float(f) => Constant::Float(f),
                TValue::ShortStr(s) | TValue::LongStr(s) => {
                    Constant::String(self.g.strings.get(s).as_bytes().to_vec())
                }
                _ => Constant::Nil,
            })
            .collect();
        let upvalues = proto
            .upvalues
            .iter()
            .map(|u| UpvalDesc {
                name: if strip { None } else { u.name.clone() },
                ..u.clone()
            })
            .collect();
        FunctionPrototype {
            source: if strip { String::from("=?") } else { proto.source.clone() },
            line_defined: proto.line_defined,
            last_line_defined: proto.last_line_defined,
            num_params: proto.num_params,
            is_vararg: proto.is_vararg,
            max_stack_size: proto.max_stack_size,
            code: proto.code.clone(),
            constants,
            upvalues,
            protos: proto.protos.iter().map(|&c| self.export_proto(c, strip)).collect(),
            line_info: if strip { Vec::new() } else { proto.line_info.clone() },
        }
    }

    // ---- frame API ----

    fn script_base(&self) -> usize {
        let ci = self.th.ci.current();
        debug_assert!(ci.is_lua(), "not a script frame");
        ci.base().unwrap_or(ci.func + 1)
    }

    fn running_closure(&self) -> GcIdx<LuaClosure> {
        match self.th.stack[self.th.ci.current().func] {
            TValue::LuaClosure(c) => c,
            _ => unreachable!("script frame without a script closure"),
        }
    }

    /// Stack slot of register 0 of the current script frame.
    pub fn frame_base(&self) -> usize {
        self.script_base()
    }

    /// Prototype of the running script closure.
    pub fn current_proto(&self) -> &Proto {
        let c = self.running_closure();
        self.g.protos.get(self.g.lua_closures.get(c).proto)
    }

    #[inline]
    pub fn register(&self, r: usize) -> TValue {
        self.th.stack[self.script_base() + r]
    }

    #[inline]
    pub fn set_register(&mut self, r: usize, v: TValue) {
        let slot = self.script_base() + r;
        self.th.stack[slot] = v;
    }

    /// Constant `k` of the running prototype.
    pub fn constant(&self, k: usize) -> TValue {
        self.current_proto().constants[k]
    }

    fn closure_cell(&self, n: usize) -> UpvalId {
        let c = self.running_closure();
        self.g.lua_closures.get(c).upvals[n]
    }

    /// Upvalue `n` (0-based) of the running script closure.
    pub fn closure_upvalue(&self, n: usize) -> TValue {
        self.upval_get(self.closure_cell(n))
    }

    pub fn set_closure_upvalue(&mut self, n: usize, v: TValue) {
        let id = self.closure_cell(n);
        self.upval_set(id, v);
    }

    /// Instantiate nested prototype `index` into register `dest`. Captured
    /// locals share open cells with any other closure over the same slot.
    pub fn push_script_closure(&mut self, index: usize, dest: usize) -> Result<(), LuaError> {
        let base = self.script_base();
        let enclosing = self.running_closure();
        let p = self.current_proto().protos[index];
        let descs = self.g.protos.get(p).upvalues.clone();
        let mut cells = Vec::with_capacity(descs.len());
        for d in &descs {
            let id = if d.in_stack {
                self.find_upval(base + d.index as usize)?
            } else {
                self.g.lua_closures.get(enclosing).upvals[d.index as usize]
            };
            cells.push(id);
        }
        let cl = self.new_lua_closure(p, cells.clone())?;
        for id in cells {
            self.g.upvals.get_mut(id).refcount += 1;
        }
        self.th.stack[base + dest] = TValue::LuaClosure(cl);
        let top = self.th.top;
        // anchor the closure while collecting
        self.th.top = top.max(base + dest + 1);
        let r = self.check_gc();
        self.th.top = top;
        r
    }

    /// Call the function in register `func` with `nargs` arguments above
    /// it (`None`: up to the current top). A fixed result count restores
    /// the top to the frame bound afterwards.
    pub fn call_at(&mut self, func: usize, nargs: Option<usize>, nresults: i32) -> Result<(), LuaError> {
        let slot = self.script_base() + func;
        if let Some(n) = nargs {
            self.th.top = slot + 1 + n;
        }
        self.call_value(slot, nresults)?;
        if nresults != MULTRET {
            self.th.top = self.th.ci.current().top;
        }
        Ok(())
    }

    /// Return `n` values starting at register `first` (`None`: up to the
    /// current top) from the current script frame. Returns false if the
    /// caller wanted every result.
    pub fn script_return(&mut self, first: usize, n: Option<usize>) -> bool {
        let base = self.script_base();
        let first = base + first;
        let n = n.unwrap_or(self.th.top - first);
        self.close_upvals(base);
        self.poscall(first, n)
    }

    /// Top of the stack, in registers of the current script frame.
    pub fn stack_top(&self) -> usize {
        self.th.top - self.script_base()
    }

    pub fn set_stack_top(&mut self, r: usize) {
        self.th.top = self.script_base() + r;
    }

    /// Resume point of the current script frame.
    pub fn saved_pc(&self) -> usize {
        match self.th.ci.current().kind {
            FrameKind::Script { saved_pc, .. } => saved_pc,
            FrameKind::Native { .. } => 0,
        }
    }

    pub fn set_saved_pc(&mut self, pc: usize) {
        if let FrameKind::Script { saved_pc, .. } = &mut self.th.ci.current_mut().kind {
            *saved_pc = pc;
        }
    }
}
