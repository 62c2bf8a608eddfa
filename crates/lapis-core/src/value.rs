//! Tagged Lua value.
//!
//! Scalars (nil, boolean, integer, float, light userdata, light native
//! function) are stored inline; every other variant is a handle into one of
//! the heap arenas.
use crate::error::LuaError;
use crate::gc::{GcIdx, GcRef};
use crate::object::{LuaClosure, LuaType, NativeClosure, Userdata};
use crate::state::{ThreadObj, Vm};
use crate::string::LuaString;
use crate::table::Table;
use std::fmt;

/// A native function: receives the engine and returns how many results it
/// left on top of its stack frame.
pub type NativeFn = fn(&mut Vm) -> Result<usize, LuaError>;

#[derive(Clone, Copy, Default)]
pub enum TValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    LightUserdata(usize),
    LightFunction(NativeFn),
    ShortStr(GcIdx<LuaString>),
    LongStr(GcIdx<LuaString>),
    Table(GcIdx<Table>),
    LuaClosure(GcIdx<LuaClosure>),
    NativeClosure(GcIdx<NativeClosure>),
    Userdata(GcIdx<Userdata>),
    Thread(GcIdx<ThreadObj>),
}

impl TValue {
    // ---- Constructors ----

    #[inline]
    pub fn nil() -> Self {
        TValue::Nil
    }

    #[inline]
    pub fn from_bool(b: bool) -> Self {
        TValue::Boolean(b)
    }

    #[inline]
    pub fn from_integer(i: i64) -> Self {
        TValue::Integer(i)
    }

    #[inline]
    pub fn from_float(f: f64) -> Self {
        TValue::Float(f)
    }

    #[inline]
    pub fn from_table(idx: GcIdx<Table>) -> Self {
        TValue::Table(idx)
    }

    #[inline]
    pub fn from_light_userdata(p: usize) -> Self {
        TValue::LightUserdata(p)
    }

    /// Rebuild the value a collector reference stands for. Prototypes are
    /// not first-class values.
    pub fn from_gc_ref(r: GcRef, short: bool) -> Option<Self> {
        Some(match r {
            GcRef::String(s) if short => TValue::ShortStr(s),
            GcRef::String(s) => TValue::LongStr(s),
            GcRef::Table(t) => TValue::Table(t),
            GcRef::LuaClosure(c) => TValue::LuaClosure(c),
            GcRef::NativeClosure(c) => TValue::NativeClosure(c),
            GcRef::Userdata(u) => TValue::Userdata(u),
            GcRef::Thread(t) => TValue::Thread(t),
            GcRef::Proto(_) => return None,
        })
    }

    // ---- Type checks ----

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, TValue::Nil)
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        matches!(self, TValue::Boolean(_))
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, TValue::Integer(_))
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, TValue::Float(_))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, TValue::Integer(_) | TValue::Float(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, TValue::ShortStr(_) | TValue::LongStr(_))
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        matches!(self, TValue::Table(_))
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(
            self,
            TValue::LightFunction(_) | TValue::LuaClosure(_) | TValue::NativeClosure(_)
        )
    }

    /// True for light functions and native closures.
    #[inline]
    pub fn is_native_function(&self) -> bool {
        matches!(self, TValue::LightFunction(_) | TValue::NativeClosure(_))
    }

    #[inline]
    pub fn is_collectable(&self) -> bool {
        self.gc_ref().is_some()
    }

    // ---- Extractors ----

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            TValue::Boolean(b) => Some(b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            TValue::Integer(i) => Some(i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            TValue::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Numeric value as a float, without string coercion.
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            TValue::Integer(i) => Some(i as f64),
            TValue::Float(f) => Some(f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<GcIdx<LuaString>> {
        match *self {
            TValue::ShortStr(s) | TValue::LongStr(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_table(&self) -> Option<GcIdx<Table>> {
        match *self {
            TValue::Table(t) => Some(t),
            _ => None,
        }
    }

    #[inline]
    pub fn as_thread(&self) -> Option<GcIdx<ThreadObj>> {
        match *self {
            TValue::Thread(t) => Some(t),
            _ => None,
        }
    }

    /// The heap object this value references, if any.
    #[inline]
    pub fn gc_ref(&self) -> Option<GcRef> {
        match *self {
            TValue::ShortStr(s) | TValue::LongStr(s) => Some(GcRef::String(s)),
            TValue::Table(t) => Some(GcRef::Table(t)),
            TValue::LuaClosure(c) => Some(GcRef::LuaClosure(c)),
            TValue::NativeClosure(c) => Some(GcRef::NativeClosure(c)),
            TValue::Userdata(u) => Some(GcRef::Userdata(u)),
            TValue::Thread(t) => Some(GcRef::Thread(t)),
            _ => None,
        }
    }

    /// Basic (host-visible) type of the value.
    pub fn base_type(&self) -> LuaType {
        match self {
            TValue::Nil => LuaType::Nil,
            TValue::Boolean(_) => LuaType::Boolean,
            TValue::Integer(_) | TValue::Float(_) => LuaType::Number,
            TValue::LightUserdata(_) => LuaType::LightUserdata,
            TValue::ShortStr(_) | TValue::LongStr(_) => LuaType::String,
            TValue::Table(_) => LuaType::Table,
            TValue::LightFunction(_) | TValue::LuaClosure(_) | TValue::NativeClosure(_) => {
                LuaType::Function
            }
            TValue::Userdata(_) => LuaType::Userdata,
            TValue::Thread(_) => LuaType::Thread,
        }
    }

    // ---- Truthiness ----

    /// Only nil and false are falsy.
    #[inline]
    pub fn is_falsy(&self) -> bool {
        matches!(self, TValue::Nil | TValue::Boolean(false))
    }

    #[inline]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    /// Equality without metamethods for every variant whose identity does
    /// not depend on heap contents. Long strings compare by reference here;
    /// content comparison needs the heap (see `compare::raw_equal`).
    pub fn raw_identical(&self, other: &TValue) -> bool {
        match (*self, *other) {
            (TValue::Nil, TValue::Nil) => true,
            (TValue::Boolean(a), TValue::Boolean(b)) => a == b,
            (TValue::Integer(a), TValue::Integer(b)) => a == b,
            (TValue::Float(a), TValue::Float(b)) => a == b,
            (TValue::Integer(i), TValue::Float(f)) | (TValue::Float(f), TValue::Integer(i)) => {
                crate::coerce::float_to_integer(f) == Some(i)
            }
            (TValue::LightUserdata(a), TValue::LightUserdata(b)) => a == b,
            (TValue::LightFunction(a), TValue::LightFunction(b)) => a as usize == b as usize,
            (TValue::ShortStr(a), TValue::ShortStr(b)) => a == b,
            (TValue::LongStr(a), TValue::LongStr(b)) => a == b,
            (TValue::Table(a), TValue::Table(b)) => a == b,
            (TValue::LuaClosure(a), TValue::LuaClosure(b)) => a == b,
            (TValue::NativeClosure(a), TValue::NativeClosure(b)) => a == b,
            (TValue::Userdata(a), TValue::Userdata(b)) => a == b,
            (TValue::Thread(a), TValue::Thread(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for TValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TValue::Nil => write!(f, "nil"),
            TValue::Boolean(b) => write!(f, "{b}"),
            TValue::Integer(i) => write!(f, "{i}"),
            TValue::Float(x) => write!(f, "{x:?}"),
            TValue::LightUserdata(p) => write!(f, "lightuserdata({p:#x})"),
            TValue::LightFunction(func) => write!(f, "function(builtin: {:#x})", *func as usize),
            TValue::ShortStr(s) | TValue::LongStr(s) => write!(f, "string({})", s.0),
            TValue::Table(t) => write!(f, "table({})", t.0),
            TValue::LuaClosure(c) => write!(f, "function({})", c.0),
            TValue::NativeClosure(c) => write!(f, "function(native {})", c.0),
            TValue::Userdata(u) => write!(f, "userdata({})", u.0),
            TValue::Thread(t) => write!(f, "thread({})", t.0),
        }
    }
}
