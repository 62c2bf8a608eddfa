//! Hybrid array+hash table.

use crate::coerce::float_to_integer;
use crate::gc::{Arena, GcIdx, GcRef};
use crate::string::LuaString;
use crate::value::TValue;
use indexmap::IndexMap;
use std::mem::size_of;
use std::rc::Rc;

/// A normalized key of the hash part.
///
/// Floats with an exact integer value are stored as `Integer`. Long strings
/// are not interned, so they key by content.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    Integer(i64),
    /// Float key, stored as raw bits for hashing.
    Float(u64),
    Boolean(bool),
    ShortStr(GcIdx<LuaString>),
    LongStr(Rc<[u8]>),
    Object(GcRef),
    LightUserdata(usize),
    LightFunction(usize),
}

impl TableKey {
    /// Normalize a value into a key. Returns `None` for nil and NaN, which
    /// can never be present in a table.
    pub fn from_value(v: TValue, strings: &Arena<LuaString>) -> Option<TableKey> {
        Some(match v {
            TValue::Nil => return None,
            TValue::Boolean(b) => TableKey::Boolean(b),
            TValue::Integer(i) => TableKey::Integer(i),
            TValue::Float(f) => {
                if f.is_nan() {
                    return None;
                }
                match float_to_integer(f) {
                    Some(i) => TableKey::Integer(i),
                    None => TableKey::Float(f.to_bits()),
                }
            }
            TValue::LightUserdata(p) => TableKey::LightUserdata(p),
            TValue::LightFunction(f) => TableKey::LightFunction(f as usize),
            TValue::ShortStr(s) => TableKey::ShortStr(s),
            TValue::LongStr(s) => TableKey::LongStr(strings.get(s).shared_bytes()),
            other => TableKey::Object(other.gc_ref()?),
        })
    }
}

/// A hash-part entry. The original key value is kept so iteration can hand
/// it back and the collector can trace it.
#[derive(Clone, Copy, Debug)]
pub struct Node {
    pub key: TValue,
    pub value: TValue,
}

/// A Lua table: hybrid array + hash map.
pub struct Table {
    /// Array part (1-indexed: array[0] corresponds to key 1).
    array: Vec<TValue>,
    /// Hash part for non-sequential keys (insertion-order preserving).
    /// Entries whose value became nil stay as tombstones so `next` keeps
    /// working while a traversal clears fields.
    hash: IndexMap<TableKey, Node>,
    dead: usize,
    pub metatable: Option<GcIdx<Table>>,
    /// Bit `e` set means metamethod `e` is known to be absent when this table
    /// is used as a metatable.
    pub flags: u8,
}

impl Table {
    /// Create a new empty table with size hints.
    pub fn new(array_hint: usize, hash_hint: usize) -> Self {
        Table {
            array: Vec::with_capacity(array_hint),
            hash: IndexMap::with_capacity(hash_hint),
            dead: 0,
            metatable: None,
            flags: 0,
        }
    }

    pub fn mem_size(&self) -> usize {
        size_of::<Table>()
            + self.array.capacity() * size_of::<TValue>()
            + self.hash.capacity() * (size_of::<TableKey>() + size_of::<Node>() + size_of::<usize>())
    }

    /// Projected size if `key` were inserted now. Used to charge the
    /// allocator before the table grows.
    pub fn size_after_insert(&self, key: &TableKey) -> usize {
        let current = self.mem_size();
        if let TableKey::Integer(i) = *key {
            if i >= 1 && (i as usize) <= self.array.len() {
                return current;
            }
            if i >= 1 && i as usize == self.array.len() + 1 {
                if self.array.len() < self.array.capacity() {
                    return current;
                }
                let grow = self.array.capacity().max(4);
                return current + grow * size_of::<TValue>();
            }
        }
        if self.hash.contains_key(key) || self.hash.len() < self.hash.capacity() {
            return current;
        }
        let grow = self.hash.capacity().max(4);
        current + grow * (size_of::<TableKey>() + size_of::<Node>() + size_of::<usize>())
    }

    /// Invalidate the cached metamethod-absence flags.
    #[inline]
    pub fn invalidate_tm_cache(&mut self) {
        self.flags = 0;
    }

    /// Raw get by normalized key.
    pub fn get(&self, key: &TableKey) -> TValue {
        if let TableKey::Integer(i) = *key {
            return self.get_int(i);
        }
        self.hash.get(key).map(|n| n.value).unwrap_or(TValue::Nil)
    }

    /// Fast integer get (1-indexed).
    pub fn get_int(&self, key: i64) -> TValue {
        if key >= 1 && (key as usize) <= self.array.len() {
            self.array[(key - 1) as usize]
        } else {
            self.hash
                .get(&TableKey::Integer(key))
                .map(|n| n.value)
                .unwrap_or(TValue::Nil)
        }
    }

    /// Fast short-string get.
    pub fn get_short_str(&self, key: GcIdx<LuaString>) -> TValue {
        self.hash
            .get(&TableKey::ShortStr(key))
            .map(|n| n.value)
            .unwrap_or(TValue::Nil)
    }

    /// True if `key` has a non-nil value.
    pub fn has(&self, key: &TableKey) -> bool {
        !self.get(key).is_nil()
    }

    /// Raw set. `key_value` is the value form of `key`, stored for
    /// iteration; a float key with an integral value is normalized.
    pub fn set(&mut self, key: TableKey, key_value: TValue, value: TValue) {
        if let TableKey::Integer(i) = key {
            self.set_int(i, value);
            return;
        }
        match self.hash.get_mut(&key) {
            Some(node) => {
                if node.value.is_nil() && !value.is_nil() {
                    self.dead -= 1;
                } else if !node.value.is_nil() && value.is_nil() {
                    self.dead += 1;
                }
                node.key = key_value;
                node.value = value;
            }
            None => {
                if value.is_nil() {
                    return;
                }
                self.purge_tombstones();
                self.hash.insert(
                    key,
                    Node {
                        key: key_value,
                        value,
                    },
                );
            }
        }
    }

    /// Fast integer set (1-indexed).
    pub fn set_int(&mut self, key: i64, value: TValue) {
        if key >= 1 {
            let idx = (key - 1) as usize;
            if idx < self.array.len() {
                self.array[idx] = value;
                return;
            }
            if idx == self.array.len() {
                if value.is_nil() {
                    return;
                }
                self.array.push(value);
                self.migrate_hash_to_array();
                return;
            }
        }
        let tk = TableKey::Integer(key);
        match self.hash.get_mut(&tk) {
            Some(node) => {
                if node.value.is_nil() && !value.is_nil() {
                    self.dead -= 1;
                } else if !node.value.is_nil() && value.is_nil() {
                    self.dead += 1;
                }
                node.value = value;
            }
            None if !value.is_nil() => {
                self.purge_tombstones();
                self.hash.insert(
                    tk,
                    Node {
                        key: TValue::Integer(key),
                        value,
                    },
                );
            }
            None => {}
        }
    }

    /// Get the "length" of a table: a border `n` such that t[n] is non-nil
    /// and t[n+1] is nil (or 0 if t[1] is nil).
    pub fn length(&self) -> i64 {
        let n = self.array.len();
        if n == 0 || !self.array[n - 1].is_nil() {
            return n as i64;
        }
        // Binary search for a border inside the array part
        let mut lo = 0usize;
        let mut hi = n;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.array[mid].is_nil() {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo as i64
    }

    /// Get the next key-value pair after `key` (for iteration).
    /// Returns Ok(Some(k,v)) for next pair, Ok(None) for end of iteration,
    /// Err(()) if the key is not present in the table.
    #[allow(clippy::result_unit_err)]
    pub fn next(&self, key: Option<&TableKey>) -> Result<Option<(TValue, TValue)>, ()> {
        let hash_start = match key {
            None => {
                if let Some(kv) = self.next_in_array(0) {
                    return Ok(Some(kv));
                }
                0
            }
            Some(TableKey::Integer(i)) if *i >= 1 && (*i as usize) <= self.array.len() => {
                if let Some(kv) = self.next_in_array(*i as usize) {
                    return Ok(Some(kv));
                }
                0
            }
            Some(k) => match self.hash.get_index_of(k) {
                Some(pos) => pos + 1,
                None => return Err(()),
            },
        };
        Ok(self
            .hash
            .values()
            .skip(hash_start)
            .find(|n| !n.value.is_nil())
            .map(|n| (n.key, n.value)))
    }

    fn next_in_array(&self, from: usize) -> Option<(TValue, TValue)> {
        self.array[from..]
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_nil())
            .map(|(j, v)| (TValue::Integer((from + j + 1) as i64), *v))
    }

    /// Drop tombstones once they make up a large share of the hash part.
    fn purge_tombstones(&mut self) {
        if self.dead > 8 && self.dead * 2 > self.hash.len() {
            self.hash.retain(|_, n| !n.value.is_nil());
            self.dead = 0;
        }
    }

    /// Move consecutive integer entries from hash into array.
    fn migrate_hash_to_array(&mut self) {
        loop {
            let next_idx = self.array.len() as i64 + 1;
            match self.hash.get(&TableKey::Integer(next_idx)) {
                Some(n) if !n.value.is_nil() => {
                    let v = n.value;
                    self.hash.shift_remove(&TableKey::Integer(next_idx));
                    self.array.push(v);
                }
                _ => break,
            }
        }
    }

    /// Array part, for collector traversal.
    pub fn array_values(&self) -> &[TValue] {
        &self.array
    }

    /// Mutable array part, for weak-table clearing.
    pub fn array_values_mut(&mut self) -> &mut [TValue] {
        &mut self.array
    }

    /// Hash entries, tombstones included.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.hash.values()
    }

    /// Clear every hash entry whose node matches `dead`; cleared entries
    /// become tombstones.
    pub fn clear_nodes<F>(&mut self, mut dead: F)
    where
        F: FnMut(&Node) -> bool,
    {
        let mut cleared = 0;
        for node in self.hash.values_mut() {
            if !node.value.is_nil() && dead(node) {
                node.value = TValue::Nil;
                cleared += 1;
            }
        }
        self.dead += cleared;
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn hash_len(&self) -> usize {
        self.hash.len() - self.dead
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::new(0, 0)
    }
}
