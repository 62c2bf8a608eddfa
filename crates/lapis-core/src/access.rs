//! Table access protocol: raw lookups, `__index`/`__newindex` chains,
//! length and concatenation.

use crate::coerce::number_to_string;
use crate::error::LuaError;
use crate::gc::GcIdx;
use crate::metamethod::Tm;
use crate::state::Vm;
use crate::table::{Table, TableKey};
use crate::value::TValue;

/// Limit on `__index`/`__newindex` chains, to catch loops.
pub const MAXTAGLOOP: usize = 2000;

impl Vm {
    /// Raw lookup in table `h`; nil when absent.
    pub(crate) fn table_get(&self, h: GcIdx<Table>, key: TValue) -> TValue {
        let t = self.g.tables.get(h);
        match key {
            TValue::Integer(i) => t.get_int(i),
            TValue::ShortStr(s) => t.get_short_str(s),
            TValue::Nil => TValue::Nil,
            other => match TableKey::from_value(other, &self.g.strings) {
                Some(k) => t.get(&k),
                None => TValue::Nil,
            },
        }
    }

    /// Raw store into table `h`. Charges the allocator for growth, drops
    /// the metamethod cache and runs the backward barrier.
    pub(crate) fn table_raw_set(&mut self, h: GcIdx<Table>, key: TValue, v: TValue) -> Result<(), LuaError> {
        let k = match TableKey::from_value(key, &self.g.strings) {
            Some(k) => k,
            None if key.is_nil() => return Err(LuaError::runtime("table index is nil")),
            None => return Err(LuaError::runtime("table index is NaN")),
        };
        let projected = self.g.tables.get(h).size_after_insert(&k);
        self.reserve_table(h, projected)?;
        let t = self.g.tables.get_mut(h);
        t.set(k, key, v);
        t.invalidate_tm_cache();
        self.g.barrier_back(h, v);
        self.g.barrier_back(h, key);
        self.sync_table_size(h)
    }

    /// `t[key]` with `__index` handling.
    pub(crate) fn get_value(&mut self, t: TValue, key: TValue) -> Result<TValue, LuaError> {
        let mut t = t;
        for _ in 0..MAXTAGLOOP {
            let tm = match t {
                TValue::Table(h) => {
                    let v = self.table_get(h, key);
                    if !v.is_nil() {
                        return Ok(v);
                    }
                    let mt = self.g.tables.get(h).metatable;
                    match self.g.fast_tm(mt, Tm::Index) {
                        Some(tm) => tm,
                        None => return Ok(TValue::Nil),
                    }
                }
                _ => {
                    let tm = self.g.tm_by_obj(t, Tm::Index);
                    if tm.is_nil() {
                        return Err(self.g.type_error(t, "index"));
                    }
                    tm
                }
            };
            if tm.is_function() {
                return self.call_tm_res(tm, t, key);
            }
            // repeat the access on the handler
            t = tm;
        }
        Err(LuaError::runtime("'__index' chain too long; possible loop"))
    }

    /// `t[key] = v` with `__newindex` handling.
    pub(crate) fn set_value(&mut self, t: TValue, key: TValue, v: TValue) -> Result<(), LuaError> {
        let mut t = t;
        for _ in 0..MAXTAGLOOP {
            let tm = match t {
                TValue::Table(h) => {
                    // existing fields are written without consulting the metatable
                    if !self.table_get(h, key).is_nil() {
                        return self.table_raw_set(h, key, v);
                    }
                    let mt = self.g.tables.get(h).metatable;
                    match self.g.fast_tm(mt, Tm::NewIndex) {
                        Some(tm) => tm,
                        None => return self.table_raw_set(h, key, v),
                    }
                }
                _ => {
                    let tm = self.g.tm_by_obj(t, Tm::NewIndex);
                    if tm.is_nil() {
                        return Err(self.g.type_error(t, "index"));
                    }
                    tm
                }
            };
            if tm.is_function() {
                return self.call_tm_set(tm, t, key, v);
            }
            t = tm;
        }
        Err(LuaError::runtime("'__newindex' chain too long; possible loop"))
    }

    // ---- length and concatenation ----

    /// `#v`: string length, `__len`, or the table border.
    pub(crate) fn obj_len(&mut self, v: TValue) -> Result<TValue, LuaError> {
        let tm = match v {
            TValue::Table(h) => {
                let mt = self.g.tables.get(h).metatable;
                match self.g.fast_tm(mt, Tm::Len) {
                    Some(tm) => tm,
                    None => return Ok(TValue::Integer(self.g.tables.get(h).length())),
                }
            }
            TValue::ShortStr(s) | TValue::LongStr(s) => {
                return Ok(TValue::Integer(self.g.strings.get(s).len() as i64));
            }
            _ => {
                let tm = self.g.tm_by_obj(v, Tm::Len);
                if tm.is_nil() {
                    return Err(self.g.type_error(v, "get length of"));
                }
                tm
            }
        };
        self.call_tm_res(tm, v, v)
    }

    fn concat_piece(&self, v: TValue, out: &mut Vec<u8>) {
        match v {
            TValue::ShortStr(s) | TValue::LongStr(s) => {
                out.extend_from_slice(self.g.strings.get(s).as_bytes())
            }
            other => {
                if let Some(s) = number_to_string(other) {
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
    }

    /// Concatenate the `total` values at the top of the stack, right to
    /// left, leaving the result in place of the first one. Runs of strings
    /// and numbers are joined in one step; anything else goes through
    /// `__concat` pairwise.
    pub(crate) fn concat_top(&mut self, mut total: usize) -> Result<(), LuaError> {
        let joinable = |v: &TValue| v.is_string() || v.is_number();
        while total > 1 {
            let top = self.th.top;
            let (a, b) = (self.th.stack[top - 2], self.th.stack[top - 1]);
            let n = if !joinable(&a) || !joinable(&b) {
                let v = self.arith_tm(a, b, Tm::Concat)?;
                self.th.stack[top - 2] = v;
                2
            } else {
                let mut n = 2;
                while n < total && joinable(&self.th.stack[top - n - 1]) {
                    n += 1;
                }
                let mut buf = Vec::new();
                for i in top - n..top {
                    self.concat_piece(self.th.stack[i], &mut buf);
                }
                if buf.len() >= isize::MAX as usize {
                    return Err(LuaError::runtime("string length overflow"));
                }
                // the operands stay on the stack until the result exists
                let v = self.new_string(&buf)?;
                self.th.stack[top - n] = v;
                n
            };
            total -= n - 1;
            self.th.top = top - (n - 1);
        }
        Ok(())
    }
}
