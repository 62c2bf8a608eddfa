//! Heap object payloads (closures, userdata, prototypes) and basic type names.

use crate::func::UpvalId;
use crate::gc::GcIdx;
use crate::table::Table;
use crate::value::{NativeFn, TValue};
use std::mem::size_of;

/// Host-visible basic types, numbered like the reference C API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LuaType {
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
    Thread = 8,
}

/// Number of basic types; sizes the per-type metatable array.
pub const NUM_TYPES: usize = 9;

impl LuaType {
    pub fn name(self) -> &'static str {
        match self {
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }
}

/// Type name for a possibly-invalid stack slot.
pub fn lua_type_name(t: Option<LuaType>) -> &'static str {
    match t {
        Some(t) => t.name(),
        None => "no value",
    }
}

/// Compile-time description of one upvalue of a prototype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpvalDesc {
    pub name: Option<String>,
    /// Captures a register of the enclosing function (else one of its upvalues).
    pub in_stack: bool,
    pub index: u8,
}

/// A function prototype as the executor sees it.
#[derive(Debug, Default)]
pub struct Proto {
    pub source: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub code: Vec<u32>,
    pub constants: Vec<TValue>,
    pub upvalues: Vec<UpvalDesc>,
    pub protos: Vec<GcIdx<Proto>>,
    pub line_info: Vec<u32>,
}

impl Proto {
    pub fn mem_size(&self) -> usize {
        size_of::<Proto>()
            + self.source.len()
            + self.code.len() * size_of::<u32>()
            + self.constants.len() * size_of::<TValue>()
            + self.upvalues.len() * size_of::<UpvalDesc>()
            + self.protos.len() * size_of::<GcIdx<Proto>>()
            + self.line_info.len() * size_of::<u32>()
    }
}

/// A script closure: a prototype plus shared upvalue cells.
#[derive(Debug)]
pub struct LuaClosure {
    pub proto: GcIdx<Proto>,
    pub upvals: Vec<UpvalId>,
}

impl LuaClosure {
    pub fn mem_size(&self) -> usize {
        size_of::<LuaClosure>() + self.upvals.len() * size_of::<UpvalId>()
    }
}

/// A native closure keeps its upvalues by value.
pub struct NativeClosure {
    pub func: NativeFn,
    pub upvalues: Vec<TValue>,
}

impl NativeClosure {
    pub fn mem_size(&self) -> usize {
        size_of::<NativeClosure>() + self.upvalues.len() * size_of::<TValue>()
    }
}

impl std::fmt::Debug for NativeClosure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeClosure")
            .field("func", &(self.func as usize))
            .field("upvalues", &self.upvalues)
            .finish()
    }
}

/// A full userdata: a host-owned memory block with a metatable and one
/// associated user value.
#[derive(Debug)]
pub struct Userdata {
    pub block: Box<[u8]>,
    pub metatable: Option<GcIdx<Table>>,
    pub user_value: TValue,
}

impl Userdata {
    pub fn new(size: usize) -> Self {
        Userdata {
            block: vec![0u8; size].into_boxed_slice(),
            metatable: None,
            user_value: TValue::Nil,
        }
    }

    pub fn mem_size(&self) -> usize {
        size_of::<Userdata>() + self.block.len()
    }
}
