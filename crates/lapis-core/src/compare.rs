//! Equality and ordering.

use crate::coerce::{float_ceil_to_integer, float_floor_to_integer, int_fits_float};
use crate::error::LuaError;
use crate::metamethod::Tm;
use crate::stack::Slot;
use crate::state::Vm;
use crate::value::TValue;

/// Comparison operators accepted by `Vm::compare`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq = 0,
    Lt = 1,
    Le = 2,
}

/// `i < f`, exact for every integer.
fn lt_int_float(i: i64, f: f64) -> bool {
    if int_fits_float(i) {
        return (i as f64) < f;
    }
    // i < f <=> i < ceil(f)
    match float_ceil_to_integer(f) {
        Some(fi) => i < fi,
        None => f > 0.0,
    }
}

/// `i <= f`, exact for every integer.
fn le_int_float(i: i64, f: f64) -> bool {
    if int_fits_float(i) {
        return (i as f64) <= f;
    }
    // i <= f <=> i <= floor(f)
    match float_floor_to_integer(f) {
        Some(fi) => i <= fi,
        None => f > 0.0,
    }
}

/// Numeric `<`; both values must be numbers.
fn lt_num(a: TValue, b: TValue) -> bool {
    match (a, b) {
        (TValue::Integer(i), TValue::Integer(j)) => i < j,
        (TValue::Integer(i), TValue::Float(f)) => lt_int_float(i, f),
        (TValue::Float(f), TValue::Float(g)) => f < g,
        (TValue::Float(f), TValue::Integer(i)) => !f.is_nan() && !le_int_float(i, f),
        _ => unreachable!("lt_num on non-numbers"),
    }
}

/// Numeric `<=`; both values must be numbers.
fn le_num(a: TValue, b: TValue) -> bool {
    match (a, b) {
        (TValue::Integer(i), TValue::Integer(j)) => i <= j,
        (TValue::Integer(i), TValue::Float(f)) => le_int_float(i, f),
        (TValue::Float(f), TValue::Float(g)) => f <= g,
        (TValue::Float(f), TValue::Integer(i)) => !f.is_nan() && !lt_int_float(i, f),
        _ => unreachable!("le_num on non-numbers"),
    }
}

impl Vm {
    /// Primitive equality: no metamethods, long strings by content.
    pub(crate) fn raw_equal_values(&self, a: TValue, b: TValue) -> bool {
        match (a, b) {
            (TValue::LongStr(x), TValue::LongStr(y)) => {
                x == y || self.g.strings.get(x).as_bytes() == self.g.strings.get(y).as_bytes()
            }
            _ => a.raw_identical(&b),
        }
    }

    /// `a == b`, consulting `__eq` for distinct tables or full userdata.
    pub(crate) fn equal_values(&mut self, a: TValue, b: TValue) -> Result<bool, LuaError> {
        let (mt1, mt2) = match (a, b) {
            (TValue::Table(x), TValue::Table(y)) if x != y => {
                (self.g.tables.get(x).metatable, self.g.tables.get(y).metatable)
            }
            (TValue::Userdata(x), TValue::Userdata(y)) if x != y => {
                (self.g.userdata.get(x).metatable, self.g.userdata.get(y).metatable)
            }
            _ => return Ok(self.raw_equal_values(a, b)),
        };
        let tm = match self.g.fast_tm(mt1, Tm::Eq) {
            Some(tm) => tm,
            None => match self.g.fast_tm(mt2, Tm::Eq) {
                Some(tm) => tm,
                None => return Ok(false),
            },
        };
        Ok(self.call_tm_res(tm, a, b)?.is_truthy())
    }

    fn str_cmp(&self, a: TValue, b: TValue) -> Option<std::cmp::Ordering> {
        match (a.as_string(), b.as_string()) {
            (Some(x), Some(y)) => Some(
                self.g
                    .strings
                    .get(x)
                    .as_bytes()
                    .cmp(self.g.strings.get(y).as_bytes()),
            ),
            _ => None,
        }
    }

    /// `a < b`.
    pub(crate) fn less_than(&mut self, a: TValue, b: TValue) -> Result<bool, LuaError> {
        if a.is_number() && b.is_number() {
            return Ok(lt_num(a, b));
        }
        if let Some(ord) = self.str_cmp(a, b) {
            return Ok(ord.is_lt());
        }
        match self.call_order_tm(a, b, Tm::Lt)? {
            Some(r) => Ok(r),
            None => Err(self.g.order_error(a, b)),
        }
    }

    /// `a <= b`. Without `__le`, tries `not (b < a)` through `__lt`.
    pub(crate) fn less_equal(&mut self, a: TValue, b: TValue) -> Result<bool, LuaError> {
        if a.is_number() && b.is_number() {
            return Ok(le_num(a, b));
        }
        if let Some(ord) = self.str_cmp(a, b) {
            return Ok(ord.is_le());
        }
        if let Some(r) = self.call_order_tm(a, b, Tm::Le)? {
            return Ok(r);
        }
        // mark the frame so a resumed executor knows to negate the result
        self.th.ci.current_mut().set_is_leq(true);
        let r = self.call_order_tm(b, a, Tm::Lt);
        self.th.ci.current_mut().set_is_leq(false);
        match r? {
            Some(r) => Ok(!r),
            None => Err(self.g.order_error(a, b)),
        }
    }

    /// Primitive equality of two stack entries. Invalid indices compare
    /// unequal.
    pub fn raw_equal(&self, index1: i32, index2: i32) -> bool {
        let (s1, s2) = (self.index2slot(index1), self.index2slot(index2));
        if s1 == Slot::Invalid || s2 == Slot::Invalid {
            return false;
        }
        self.raw_equal_values(self.slot_value(s1), self.slot_value(s2))
    }

    /// Compare two stack entries with metamethods. Invalid indices give
    /// false.
    pub fn compare(&mut self, index1: i32, index2: i32, op: CompareOp) -> Result<bool, LuaError> {
        let r = self.compare_raw(index1, index2, op);
        self.api(r)
    }

    fn compare_raw(&mut self, index1: i32, index2: i32, op: CompareOp) -> Result<bool, LuaError> {
        let (s1, s2) = (self.index2slot(index1), self.index2slot(index2));
        if s1 == Slot::Invalid || s2 == Slot::Invalid {
            return Ok(false);
        }
        let (a, b) = (self.slot_value(s1), self.slot_value(s2));
        match op {
            CompareOp::Eq => self.equal_values(a, b),
            CompareOp::Lt => self.less_than(a, b),
            CompareOp::Le => self.less_equal(a, b),
        }
    }
}
