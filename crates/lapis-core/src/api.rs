//! Host API: reading, pushing, getting and setting values through stack
//! indices.
//!
//! Every fallible operation passes its result through `Vm::api`, so an
//! error raised with no recovery boundary above it aborts the process after
//! running the panic callback.

use crate::coerce::{self, number_to_string, str_to_number};
use crate::config::MAX_UPVAL;
use crate::error::LuaError;
use crate::func::{UpvalId, UpvalState};
use crate::gc::{GcIdx, GcRef};
use crate::object::{lua_type_name, LuaClosure, LuaType, NativeClosure};
use crate::stack::Slot;
use crate::state::{ThreadObj, Vm};
use crate::string::LuaString;
use crate::table::{Table, TableKey};
use crate::value::{NativeFn, TValue};

/// Tag mixed into upvalue ids of script closures so they never collide
/// with native closure upvalue ids.
const SCRIPT_UPVAL_TAG: usize = 9 << 32;

/// An upvalue slot of some closure.
enum UpvalRef {
    Native(GcIdx<NativeClosure>, usize),
    Script(GcIdx<LuaClosure>, usize),
}

impl Vm {
    // ---- access functions ----

    /// Type of the value at `idx`; `None` for an empty index.
    pub fn type_of(&self, idx: i32) -> Option<LuaType> {
        match self.index2slot(idx) {
            Slot::Invalid => None,
            slot => Some(self.slot_value(slot).base_type()),
        }
    }

    pub fn type_name(&self, t: Option<LuaType>) -> &'static str {
        lua_type_name(t)
    }

    pub fn is_none(&self, idx: i32) -> bool {
        self.type_of(idx).is_none()
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        self.index_to_value(idx).is_nil()
    }

    /// A number, or a string convertible to one.
    pub fn is_number(&self, idx: i32) -> bool {
        coerce::to_number(self.index_to_value(idx), &self.g.strings).is_some()
    }

    /// A string, or a number (always convertible to a string).
    pub fn is_string(&self, idx: i32) -> bool {
        let v = self.index_to_value(idx);
        v.is_string() || v.is_number()
    }

    pub fn is_integer(&self, idx: i32) -> bool {
        self.index_to_value(idx).is_integer()
    }

    pub fn is_native_function(&self, idx: i32) -> bool {
        self.index_to_value(idx).is_native_function()
    }

    pub fn is_function(&self, idx: i32) -> bool {
        self.index_to_value(idx).is_function()
    }

    /// Full or light userdata.
    pub fn is_userdata(&self, idx: i32) -> bool {
        matches!(
            self.index_to_value(idx),
            TValue::Userdata(_) | TValue::LightUserdata(_)
        )
    }

    pub fn is_table(&self, idx: i32) -> bool {
        self.index_to_value(idx).is_table()
    }

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        coerce::to_number(self.index_to_value(idx), &self.g.strings)
    }

    /// Integer value of the entry; floats must be integral.
    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        coerce::to_integer(self.index_to_value(idx), &self.g.strings)
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.index_to_value(idx).is_truthy()
    }

    /// Bytes of a string entry. A number is converted to a string in
    /// place; anything else gives `None`.
    pub fn to_lstring(&mut self, idx: i32) -> Result<Option<&[u8]>, LuaError> {
        let r = self.to_lstring_raw(idx);
        let id = self.api(r)?;
        Ok(id.map(|id| self.g.strings.get(id).as_bytes()))
    }

    fn to_lstring_raw(&mut self, idx: i32) -> Result<Option<GcIdx<LuaString>>, LuaError> {
        let slot = self.index2slot(idx);
        let v = self.slot_value(slot);
        if let Some(s) = v.as_string() {
            return Ok(Some(s));
        }
        let text = match number_to_string(v) {
            Some(t) => t,
            None => return Ok(None),
        };
        let s = self.new_string(text.as_bytes())?;
        self.set_slot(slot, s);
        self.check_gc()?;
        Ok(s.as_string())
    }

    /// Raw length: bytes of a string or userdata, border of a table, 0
    /// otherwise.
    pub fn raw_len(&self, idx: i32) -> usize {
        match self.index_to_value(idx) {
            TValue::ShortStr(s) | TValue::LongStr(s) => self.g.strings.get(s).len(),
            TValue::Userdata(u) => self.g.userdata.get(u).block.len(),
            TValue::Table(t) => self.g.tables.get(t).length() as usize,
            _ => 0,
        }
    }

    pub fn to_native_function(&self, idx: i32) -> Option<NativeFn> {
        match self.index_to_value(idx) {
            TValue::LightFunction(f) => Some(f),
            TValue::NativeClosure(c) => Some(self.g.native_closures.get(c).func),
            _ => None,
        }
    }

    /// Memory block of a full userdata.
    pub fn to_userdata(&mut self, idx: i32) -> Option<&mut [u8]> {
        match self.index_to_value(idx) {
            TValue::Userdata(u) => Some(&mut self.g.userdata.get_mut(u).block[..]),
            _ => None,
        }
    }

    pub fn to_thread(&self, idx: i32) -> Option<GcIdx<ThreadObj>> {
        self.index_to_value(idx).as_thread()
    }

    /// Identity of a reference value, for hashing and debugging only.
    pub fn to_pointer(&self, idx: i32) -> Option<usize> {
        match self.index_to_value(idx) {
            TValue::LightUserdata(p) => Some(p),
            TValue::LightFunction(f) => Some(f as usize),
            v @ (TValue::Table(_)
            | TValue::LuaClosure(_)
            | TValue::NativeClosure(_)
            | TValue::Userdata(_)
            | TValue::Thread(_)) => v.gc_ref().map(GcRef::identity),
            _ => None,
        }
    }

    // ---- push functions ----

    pub fn push_nil(&mut self) {
        self.api_push(TValue::Nil);
    }

    pub fn push_number(&mut self, n: f64) {
        self.api_push(TValue::Float(n));
    }

    pub fn push_integer(&mut self, n: i64) {
        self.api_push(TValue::Integer(n));
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.api_push(TValue::Boolean(b));
    }

    pub fn push_light_userdata(&mut self, p: usize) {
        self.api_push(TValue::LightUserdata(p));
    }

    /// Push a copy of the bytes as a string.
    pub fn push_lstring(&mut self, s: &[u8]) -> Result<(), LuaError> {
        let r = self.push_string_with(|vm| vm.new_string(s));
        self.api(r)
    }

    /// Push a string, going through the string cache.
    pub fn push_string(&mut self, s: &str) -> Result<(), LuaError> {
        let r = self.push_string_with(|vm| vm.new_string_cached(s.as_bytes()));
        self.api(r)
    }

    fn push_string_with(
        &mut self,
        make: impl FnOnce(&mut Vm) -> Result<TValue, LuaError>,
    ) -> Result<(), LuaError> {
        let v = make(self)?;
        self.api_push(v);
        self.check_gc()
    }

    pub fn push_native_function(&mut self, f: NativeFn) {
        self.api_push(TValue::LightFunction(f));
    }

    /// Pop `n` values and push a native closure holding them as upvalues.
    /// With `n == 0` this pushes a light function.
    pub fn push_native_closure(&mut self, f: NativeFn, n: i32) -> Result<(), LuaError> {
        let r = self.push_native_closure_raw(f, n);
        self.api(r)
    }

    fn push_native_closure_raw(&mut self, f: NativeFn, n: i32) -> Result<(), LuaError> {
        if n == 0 {
            self.api_push(TValue::LightFunction(f));
            return Ok(());
        }
        let n = n as usize;
        debug_assert!(n <= self.get_top() as usize, "not enough elements in the stack");
        debug_assert!(n <= MAX_UPVAL, "upvalue index too large");
        self.check_gc()?;
        let top = self.th.top;
        let upvalues = self.th.stack[top - n..top].to_vec();
        // the values stay anchored on the stack while the closure is built
        let c = self.new_native_closure(f, upvalues)?;
        self.th.top = top - n;
        self.api_push(TValue::NativeClosure(c));
        Ok(())
    }

    /// Push the running thread. Returns true if it is the main thread.
    pub fn push_thread(&mut self) -> bool {
        let t = self.running;
        self.api_push(TValue::Thread(t));
        t == self.g.main_thread
    }

    // ---- get functions ----

    fn table_at(&self, idx: i32) -> Result<GcIdx<Table>, LuaError> {
        let v = self.index_to_value(idx);
        v.as_table().ok_or_else(|| {
            LuaError::Runtime(format!("table expected, got {}", self.g.obj_type_name(v)))
        })
    }

    /// Push `t[k]` for a string key.
    fn aux_get_str(&mut self, t: TValue, k: &str) -> Result<LuaType, LuaError> {
        let key = self.new_string_cached(k.as_bytes())?;
        self.api_push(key);
        let v = self.get_value(t, key)?;
        let top = self.th.top;
        self.th.stack[top - 1] = v;
        Ok(v.base_type())
    }

    /// Push the global `name`. Returns its type.
    pub fn get_global(&mut self, name: &str) -> Result<LuaType, LuaError> {
        let globals = self.g.globals();
        let r = self.aux_get_str(globals, name);
        self.api(r)
    }

    /// Replace the key on top with `t[key]`, where `t` is at `idx`.
    pub fn get_table(&mut self, idx: i32) -> Result<LuaType, LuaError> {
        let t = self.index_to_value(idx);
        let r = self.get_table_raw(t);
        self.api(r)
    }

    fn get_table_raw(&mut self, t: TValue) -> Result<LuaType, LuaError> {
        let top = self.th.top;
        let v = self.get_value(t, self.th.stack[top - 1])?;
        self.th.stack[top - 1] = v;
        Ok(v.base_type())
    }

    /// Push `t[k]`, where `t` is at `idx`.
    pub fn get_field(&mut self, idx: i32, k: &str) -> Result<LuaType, LuaError> {
        let t = self.index_to_value(idx);
        let r = self.aux_get_str(t, k);
        self.api(r)
    }

    /// Push `t[n]`, where `t` is at `idx`.
    pub fn get_i(&mut self, idx: i32, n: i64) -> Result<LuaType, LuaError> {
        let t = self.index_to_value(idx);
        let r = self.get_value(t, TValue::Integer(n)).map(|v| {
            self.api_push(v);
            v.base_type()
        });
        self.api(r)
    }

    /// Like `get_table` without metamethods. The target must be a table.
    pub fn raw_get(&mut self, idx: i32) -> Result<LuaType, LuaError> {
        let r = self.table_at(idx).map(|h| {
            let top = self.th.top;
            let v = self.table_get(h, self.th.stack[top - 1]);
            self.th.stack[top - 1] = v;
            v.base_type()
        });
        self.api(r)
    }

    /// Push `t[n]` without metamethods.
    pub fn raw_get_i(&mut self, idx: i32, n: i64) -> Result<LuaType, LuaError> {
        let r = self.table_at(idx).map(|h| {
            let v = self.g.tables.get(h).get_int(n);
            self.api_push(v);
            v.base_type()
        });
        self.api(r)
    }

    /// Push `t[p]` for a light userdata key, without metamethods.
    pub fn raw_get_p(&mut self, idx: i32, p: usize) -> Result<LuaType, LuaError> {
        let r = self.table_at(idx).map(|h| {
            let v = self.g.tables.get(h).get(&TableKey::LightUserdata(p));
            self.api_push(v);
            v.base_type()
        });
        self.api(r)
    }

    /// Push a new table with room for `narr` sequence entries and `nrec`
    /// other fields.
    pub fn create_table(&mut self, narr: usize, nrec: usize) -> Result<(), LuaError> {
        let r = self.create_table_raw(narr, nrec);
        self.api(r)
    }

    fn create_table_raw(&mut self, narr: usize, nrec: usize) -> Result<(), LuaError> {
        let t = self.new_table(narr, nrec)?;
        self.api_push(TValue::Table(t));
        self.check_gc()
    }

    /// Push a new full userdata with a zeroed block of `size` bytes.
    pub fn new_userdata(&mut self, size: usize) -> Result<(), LuaError> {
        let r = self.new_userdata_raw(size);
        self.api(r)
    }

    fn new_userdata_raw(&mut self, size: usize) -> Result<(), LuaError> {
        let u = self.new_userdata_obj(size)?;
        self.api_push(TValue::Userdata(u));
        self.check_gc()
    }

    /// Push the metatable of the value at `idx`, if it has one.
    pub fn get_metatable(&mut self, idx: i32) -> bool {
        let v = self.index_to_value(idx);
        match self.g.metatable_of(v) {
            Some(mt) => {
                self.api_push(TValue::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Push the user value of the full userdata at `idx`.
    pub fn get_uservalue(&mut self, idx: i32) -> LuaType {
        let v = match self.index_to_value(idx) {
            TValue::Userdata(u) => self.g.userdata.get(u).user_value,
            _ => {
                debug_assert!(false, "full userdata expected");
                TValue::Nil
            }
        };
        self.api_push(v);
        v.base_type()
    }

    // ---- set functions ----

    /// `t[k] = top` for a string key; pops the value.
    fn aux_set_str(&mut self, t: TValue, k: &str) -> Result<(), LuaError> {
        let key = self.new_string_cached(k.as_bytes())?;
        self.push_raw(key);
        let top = self.th.top;
        let v = self.th.stack[top - 2];
        self.set_value(t, key, v)?;
        self.th.top = top - 2;
        Ok(())
    }

    /// Pop a value into the global `name`.
    pub fn set_global(&mut self, name: &str) -> Result<(), LuaError> {
        let globals = self.g.globals();
        let r = self.aux_set_str(globals, name);
        self.api(r)
    }

    /// `t[key] = value` with the key and value on top (value topmost);
    /// pops both.
    pub fn set_table(&mut self, idx: i32) -> Result<(), LuaError> {
        let t = self.index_to_value(idx);
        let top = self.th.top;
        let (k, v) = (self.th.stack[top - 2], self.th.stack[top - 1]);
        let r = self.set_value(t, k, v);
        self.api(r)?;
        self.th.top = top - 2;
        Ok(())
    }

    /// Pop a value into `t[k]`, where `t` is at `idx`.
    pub fn set_field(&mut self, idx: i32, k: &str) -> Result<(), LuaError> {
        let t = self.index_to_value(idx);
        let r = self.aux_set_str(t, k);
        self.api(r)
    }

    /// Pop a value into `t[n]`, where `t` is at `idx`.
    pub fn set_i(&mut self, idx: i32, n: i64) -> Result<(), LuaError> {
        let t = self.index_to_value(idx);
        let top = self.th.top;
        let r = self.set_value(t, TValue::Integer(n), self.th.stack[top - 1]);
        self.api(r)?;
        self.th.top = top - 1;
        Ok(())
    }

    /// Like `set_table` without metamethods. The target must be a table.
    pub fn raw_set(&mut self, idx: i32) -> Result<(), LuaError> {
        let top = self.th.top;
        let (k, v) = (self.th.stack[top - 2], self.th.stack[top - 1]);
        let r = self
            .table_at(idx)
            .and_then(|h| self.table_raw_set(h, k, v));
        self.api(r)?;
        self.th.top = top - 2;
        Ok(())
    }

    /// Pop a value into `t[n]` without metamethods.
    pub fn raw_set_i(&mut self, idx: i32, n: i64) -> Result<(), LuaError> {
        let top = self.th.top;
        let v = self.th.stack[top - 1];
        let r = self
            .table_at(idx)
            .and_then(|h| self.table_raw_set(h, TValue::Integer(n), v));
        self.api(r)?;
        self.th.top = top - 1;
        Ok(())
    }

    /// Pop a value into `t[p]` for a light userdata key, without
    /// metamethods.
    pub fn raw_set_p(&mut self, idx: i32, p: usize) -> Result<(), LuaError> {
        let top = self.th.top;
        let v = self.th.stack[top - 1];
        let r = self
            .table_at(idx)
            .and_then(|h| self.table_raw_set(h, TValue::LightUserdata(p), v));
        self.api(r)?;
        self.th.top = top - 1;
        Ok(())
    }

    /// Pop a table (or nil) and make it the metatable of the value at
    /// `idx`. Values other than tables and full userdata share one
    /// metatable per type.
    pub fn set_metatable(&mut self, idx: i32) -> Result<(), LuaError> {
        let obj = self.index_to_value(idx);
        let r = match self.th.stack[self.th.top - 1] {
            TValue::Nil => Ok(None),
            TValue::Table(mt) => Ok(Some(mt)),
            _ => Err(LuaError::runtime("table expected")),
        };
        let mt = self.api(r)?;
        match obj {
            TValue::Table(t) => {
                self.g.tables.get_mut(t).metatable = mt;
                if let Some(m) = mt {
                    let o = GcRef::Table(t);
                    self.g.obj_barrier(o, GcRef::Table(m));
                    self.g.check_finalizer(o, mt);
                }
            }
            TValue::Userdata(u) => {
                self.g.userdata.get_mut(u).metatable = mt;
                if let Some(m) = mt {
                    let o = GcRef::Userdata(u);
                    self.g.obj_barrier(o, GcRef::Table(m));
                    self.g.check_finalizer(o, mt);
                }
            }
            other => self.g.mt[other.base_type() as usize] = mt,
        }
        self.th.top -= 1;
        Ok(())
    }

    /// Pop a value into the user value of the full userdata at `idx`.
    pub fn set_uservalue(&mut self, idx: i32) {
        let v = self.th.stack[self.th.top - 1];
        match self.index_to_value(idx) {
            TValue::Userdata(u) => {
                self.g.userdata.get_mut(u).user_value = v;
                self.g.barrier(GcRef::Userdata(u), v);
            }
            _ => debug_assert!(false, "full userdata expected"),
        }
        self.th.top -= 1;
    }

    // ---- miscellaneous ----

    /// Raise the value on top as an error.
    pub fn error<T>(&mut self) -> Result<T, LuaError> {
        let v = self.th.stack[self.th.top - 1];
        let e = match (v, self.g.mem_err_msg) {
            // raising the memory message keeps the memory status
            (TValue::ShortStr(s), Some(m)) if s == m => LuaError::Memory,
            _ => LuaError::Value(v),
        };
        self.api(Err(e))
    }

    /// Pop a key and push the next key-value pair of the table at `idx`.
    /// Returns false (pushing nothing) when the traversal is over.
    pub fn next(&mut self, idx: i32) -> Result<bool, LuaError> {
        let r = self.next_raw(idx);
        self.api(r)
    }

    fn next_raw(&mut self, idx: i32) -> Result<bool, LuaError> {
        let h = self.table_at(idx)?;
        let top = self.th.top;
        let key = self.th.stack[top - 1];
        let invalid = || LuaError::runtime("invalid key to 'next'");
        let k = if key.is_nil() {
            None
        } else {
            Some(TableKey::from_value(key, &self.g.strings).ok_or_else(invalid)?)
        };
        match self.g.tables.get(h).next(k.as_ref()) {
            Err(()) => Err(invalid()),
            Ok(Some((k, v))) => {
                self.th.stack[top - 1] = k;
                self.api_push(v);
                Ok(true)
            }
            Ok(None) => {
                self.th.top = top - 1;
                Ok(false)
            }
        }
    }

    /// Concatenate the `n` values on top, leaving the result. `n == 0`
    /// pushes the empty string.
    pub fn concat(&mut self, n: i32) -> Result<(), LuaError> {
        let r = self.concat_raw(n);
        self.api(r)
    }

    fn concat_raw(&mut self, n: i32) -> Result<(), LuaError> {
        debug_assert!(n >= 0 && n <= self.get_top(), "not enough elements in the stack");
        if n >= 2 {
            self.concat_top(n as usize)?;
        } else if n == 0 {
            let empty = self.new_string(b"")?;
            self.api_push(empty);
        }
        self.check_gc()
    }

    /// Push the length of the value at `idx`, honoring `__len`.
    pub fn len(&mut self, idx: i32) -> Result<(), LuaError> {
        let v = self.index_to_value(idx);
        let r = self.obj_len(v).map(|n| self.api_push(n));
        self.api(r)
    }

    /// Convert a numeral and push it. Returns the string length plus one on
    /// success, 0 (pushing nothing) otherwise.
    pub fn string_to_number(&mut self, s: &str) -> usize {
        match str_to_number(s.as_bytes()) {
            Some(v) => {
                self.api_push(v);
                s.len() + 1
            }
            None => 0,
        }
    }

    // ---- upvalues ----

    fn aux_upvalue(&self, f: TValue, n: i32) -> Option<(String, UpvalRef)> {
        if n < 1 {
            return None;
        }
        let i = (n - 1) as usize;
        match f {
            TValue::NativeClosure(c) if i < self.g.native_closures.get(c).upvalues.len() => {
                Some((String::new(), UpvalRef::Native(c, i)))
            }
            TValue::LuaClosure(c) if i < self.g.lua_closures.get(c).upvals.len() => {
                let p = self.g.protos.get(self.g.lua_closures.get(c).proto);
                let name = p
                    .upvalues
                    .get(i)
                    .and_then(|d| d.name.clone())
                    .unwrap_or_else(|| String::from("(*no name)"));
                Some((name, UpvalRef::Script(c, i)))
            }
            _ => None,
        }
    }

    fn script_cell(&self, c: GcIdx<LuaClosure>, i: usize) -> UpvalId {
        self.g.lua_closures.get(c).upvals[i]
    }

    /// Push upvalue `n` (1-based) of the closure at `funcindex` and return
    /// its name: empty for native closures. `None` (pushing nothing) if
    /// there is no such upvalue.
    pub fn get_upvalue(&mut self, funcindex: i32, n: i32) -> Option<String> {
        let f = self.index_to_value(funcindex);
        let (name, r) = self.aux_upvalue(f, n)?;
        let v = match r {
            UpvalRef::Native(c, i) => self.g.native_closures.get(c).upvalues[i],
            UpvalRef::Script(c, i) => self.upval_get(self.script_cell(c, i)),
        };
        self.api_push(v);
        Some(name)
    }

    /// Pop a value into upvalue `n` of the closure at `funcindex`. Returns
    /// the upvalue's name, or `None` (popping nothing) if it does not exist.
    pub fn set_upvalue(&mut self, funcindex: i32, n: i32) -> Option<String> {
        let f = self.index_to_value(funcindex);
        let (name, r) = self.aux_upvalue(f, n)?;
        let v = self.th.stack[self.th.top - 1];
        self.th.top -= 1;
        match r {
            UpvalRef::Native(c, i) => {
                self.g.native_closures.get_mut(c).upvalues[i] = v;
                self.g.barrier(GcRef::NativeClosure(c), v);
            }
            UpvalRef::Script(c, i) => {
                let id = self.script_cell(c, i);
                self.upval_set(id, v);
            }
        }
        Some(name)
    }

    /// Identity of upvalue `n` of the closure at `funcindex`. Two script
    /// closures share a variable exactly when their ids are equal.
    pub fn upvalue_id(&self, funcindex: i32, n: i32) -> Option<usize> {
        let f = self.index_to_value(funcindex);
        match self.aux_upvalue(f, n)?.1 {
            UpvalRef::Native(c, i) => Some((GcRef::NativeClosure(c).identity() << 8) | i),
            UpvalRef::Script(c, i) => Some(SCRIPT_UPVAL_TAG | self.script_cell(c, i).0 as usize),
        }
    }

    /// Make upvalue `n1` of the script closure at `f1` refer to the cell of
    /// upvalue `n2` of the script closure at `f2`.
    pub fn upvalue_join(&mut self, f1: i32, n1: i32, f2: i32, n2: i32) {
        let (c1, c2) = match (self.index_to_value(f1), self.index_to_value(f2)) {
            (TValue::LuaClosure(a), TValue::LuaClosure(b)) => (a, b),
            _ => {
                debug_assert!(false, "script closures expected");
                return;
            }
        };
        let len1 = self.g.lua_closures.get(c1).upvals.len();
        let len2 = self.g.lua_closures.get(c2).upvals.len();
        debug_assert!(n1 >= 1 && n1 as usize <= len1, "invalid upvalue index");
        debug_assert!(n2 >= 1 && n2 as usize <= len2, "invalid upvalue index");
        let (i1, i2) = ((n1 - 1) as usize, (n2 - 1) as usize);
        let old = self.script_cell(c1, i1);
        let new = self.script_cell(c2, i2);
        if old == new {
            return;
        }
        self.g.upval_decref(old);
        self.g.lua_closures.get_mut(c1).upvals[i1] = new;
        let state = {
            let uv = self.g.upvals.get_mut(new);
            uv.refcount += 1;
            if uv.is_open() {
                uv.touched = true;
            }
            uv.state
        };
        if let UpvalState::Closed(v) = state {
            self.g.upval_barrier(v);
        }
    }
}
