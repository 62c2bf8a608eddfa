//! Metamethod lookup and invocation.

use crate::error::LuaError;
use crate::gc::GcIdx;
use crate::state::{GlobalState, Vm};
use crate::string::{lua_hash, LuaString};
use crate::table::Table;
use crate::value::TValue;

/// Metamethod events. The first six are "fast" events whose absence is
/// cached in the metatable's flag byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tm {
    Index = 0,
    NewIndex,
    Gc,
    Mode,
    Len,
    Eq,
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
    Lt,
    Le,
    Concat,
    Call,
}

/// Event names, in `Tm` order.
pub const TM_NAMES: [&str; 24] = [
    "__index", "__newindex", "__gc", "__mode", "__len", "__eq", "__add", "__sub", "__mul",
    "__mod", "__pow", "__div", "__idiv", "__band", "__bor", "__bxor", "__shl", "__shr", "__unm",
    "__bnot", "__lt", "__le", "__concat", "__call",
];

impl Tm {
    #[inline]
    pub fn name(self) -> &'static str {
        TM_NAMES[self as usize]
    }

    #[inline]
    fn is_bitwise(self) -> bool {
        matches!(
            self,
            Tm::BAnd | Tm::BOr | Tm::BXor | Tm::Shl | Tm::Shr | Tm::BNot
        )
    }
}

impl GlobalState {
    #[inline]
    pub(crate) fn tm_name(&self, e: Tm) -> GcIdx<LuaString> {
        self.tm_names[e as usize]
    }

    /// Metamethod `e` of metatable `mt`. Absence is remembered in the
    /// metatable's flags until the next raw write to it.
    pub(crate) fn fast_tm(&mut self, mt: Option<GcIdx<Table>>, e: Tm) -> Option<TValue> {
        debug_assert!(e as u8 <= Tm::Eq as u8);
        let mt = mt?;
        let bit = 1u8 << (e as u8);
        if self.tables.get(mt).flags & bit != 0 {
            return None;
        }
        let v = self.tables.get(mt).get_short_str(self.tm_name(e));
        if v.is_nil() {
            self.tables.get_mut(mt).flags |= bit;
            None
        } else {
            Some(v)
        }
    }

    /// Metatable of any value: per-object for tables and full userdata,
    /// per-type for the rest.
    pub(crate) fn metatable_of(&self, v: TValue) -> Option<GcIdx<Table>> {
        match v {
            TValue::Table(t) => self.tables.get(t).metatable,
            TValue::Userdata(u) => self.userdata.get(u).metatable,
            other => self.mt[other.base_type() as usize],
        }
    }

    /// Metamethod `e` of `v`, or nil.
    pub(crate) fn tm_by_obj(&self, v: TValue, e: Tm) -> TValue {
        match self.metatable_of(v) {
            Some(mt) => self.tables.get(mt).get_short_str(self.tm_name(e)),
            None => TValue::Nil,
        }
    }

    /// Type name used in error messages. Tables and full userdata may
    /// override it with a string `__name` field in their metatable.
    pub(crate) fn obj_type_name(&self, v: TValue) -> String {
        let mt = match v {
            TValue::Table(t) => self.tables.get(t).metatable,
            TValue::Userdata(u) => self.userdata.get(u).metatable,
            _ => None,
        };
        if let Some(mt) = mt {
            let key = b"__name";
            if let Some(id) = self.strt.find(key, lua_hash(key, self.seed), &self.strings) {
                if let Some(s) = self.tables.get(mt).get_short_str(id).as_string() {
                    return String::from_utf8_lossy(self.strings.get(s).as_bytes()).into_owned();
                }
            }
        }
        v.base_type().name().to_string()
    }

    /// "attempt to `op` a `type` value"
    pub(crate) fn type_error(&self, v: TValue, op: &str) -> LuaError {
        LuaError::Runtime(format!("attempt to {} a {} value", op, self.obj_type_name(v)))
    }

    /// Blame whichever operand is not a number.
    pub(crate) fn op_int_error(&self, p1: TValue, p2: TValue, op: &str) -> LuaError {
        let culprit = if p1.is_number() { p2 } else { p1 };
        self.type_error(culprit, op)
    }

    pub(crate) fn concat_error(&self, p1: TValue, p2: TValue) -> LuaError {
        let culprit = if p1.is_string() || p1.is_number() { p2 } else { p1 };
        self.type_error(culprit, "concatenate")
    }

    pub(crate) fn order_error(&self, p1: TValue, p2: TValue) -> LuaError {
        let t1 = self.obj_type_name(p1);
        let t2 = self.obj_type_name(p2);
        if t1 == t2 {
            LuaError::Runtime(format!("attempt to compare two {t1} values"))
        } else {
            LuaError::Runtime(format!("attempt to compare {t1} with {t2}"))
        }
    }
}

/// Integer conversion failure of a bitwise operand.
pub(crate) fn to_int_error() -> LuaError {
    LuaError::runtime("number has no integer representation")
}

impl Vm {
    /// Call `f` at the current top with the given arguments and run it in
    /// the calling context (yieldable only when called from script code).
    fn call_tm_at(&mut self, args: &[TValue], nresults: i32) -> Result<usize, LuaError> {
        let func = self.th.top;
        for (i, &a) in args.iter().enumerate() {
            self.th.stack[func + i] = a;
        }
        self.th.top = func + args.len();
        if self.th.ci.current().is_lua() {
            self.call_value(func, nresults)?;
        } else {
            self.call_no_yield(func, nresults)?;
        }
        Ok(func)
    }

    /// Call metamethod `f(p1, p2)` and return its first result.
    pub(crate) fn call_tm_res(&mut self, f: TValue, p1: TValue, p2: TValue) -> Result<TValue, LuaError> {
        let func = self.call_tm_at(&[f, p1, p2], 1)?;
        let r = self.th.stack[func];
        self.th.top = func;
        Ok(r)
    }

    /// Call metamethod `f(p1, p2, p3)` discarding results.
    pub(crate) fn call_tm_set(
        &mut self,
        f: TValue,
        p1: TValue,
        p2: TValue,
        p3: TValue,
    ) -> Result<(), LuaError> {
        self.call_tm_at(&[f, p1, p2, p3], 0)?;
        Ok(())
    }

    /// Look for a binary metamethod in either operand and call it.
    pub(crate) fn try_bin_tm(&mut self, p1: TValue, p2: TValue, e: Tm) -> Result<Option<TValue>, LuaError> {
        let mut tm = self.g.tm_by_obj(p1, e);
        if tm.is_nil() {
            tm = self.g.tm_by_obj(p2, e);
        }
        if tm.is_nil() {
            return Ok(None);
        }
        self.call_tm_res(tm, p1, p2).map(Some)
    }

    /// Binary metamethod that must exist; raises the operator's error
    /// otherwise.
    pub(crate) fn arith_tm(&mut self, p1: TValue, p2: TValue, e: Tm) -> Result<TValue, LuaError> {
        if let Some(v) = self.try_bin_tm(p1, p2, e)? {
            return Ok(v);
        }
        Err(match e {
            Tm::Concat => self.g.concat_error(p1, p2),
            _ if e.is_bitwise() => {
                if p1.is_number() && p2.is_number() {
                    to_int_error()
                } else {
                    self.g.op_int_error(p1, p2, "perform bitwise operation on")
                }
            }
            _ => self.g.op_int_error(p1, p2, "perform arithmetic on"),
        })
    }

    /// Order metamethod. `None` when neither operand has one.
    pub(crate) fn call_order_tm(&mut self, p1: TValue, p2: TValue, e: Tm) -> Result<Option<bool>, LuaError> {
        Ok(self.try_bin_tm(p1, p2, e)?.map(|v| v.is_truthy()))
    }
}
