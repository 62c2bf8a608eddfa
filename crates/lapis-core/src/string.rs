//! Lua string type with SSO (Small String Optimization) and interning.
//!
//! Short strings (<=40 bytes) are stored inline and interned (deduplicated)
//! through `StringTable`. Long strings (>40 bytes) are shared byte buffers
//! and are NOT interned.
use crate::gc::{Arena, GcIdx};
use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;
use std::rc::Rc;

/// Maximum bytes for inline (short) string storage.
pub const MAX_SHORT_LEN: usize = 40;

/// Internal storage for string data.
#[derive(Clone)]
enum StringData {
    Short { buf: [u8; MAX_SHORT_LEN], len: u8 },
    Long(Rc<[u8]>),
}

/// A Lua string with precomputed hash.
#[derive(Clone)]
pub struct LuaString {
    data: StringData,
    hash: u32,
}

impl LuaString {
    pub fn new(bytes: &[u8], seed: u32) -> Self {
        let hash = lua_hash(bytes, seed);
        if bytes.len() <= MAX_SHORT_LEN {
            let mut buf = [0u8; MAX_SHORT_LEN];
            buf[..bytes.len()].copy_from_slice(bytes);
            LuaString {
                data: StringData::Short {
                    buf,
                    len: bytes.len() as u8,
                },
                hash,
            }
        } else {
            LuaString {
                data: StringData::Long(Rc::from(bytes)),
                hash,
            }
        }
    }

    /// Get the bytes of this string.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            StringData::Short { buf, len } => &buf[..*len as usize],
            StringData::Long(v) => v,
        }
    }

    /// Shared handle to the bytes; long-string table keys use it.
    pub fn shared_bytes(&self) -> Rc<[u8]> {
        match &self.data {
            StringData::Short { buf, len } => Rc::from(&buf[..*len as usize]),
            StringData::Long(v) => Rc::clone(v),
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            StringData::Short { len, .. } => *len as usize,
            StringData::Long(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if this is a short (inline, interned) string.
    pub fn is_short(&self) -> bool {
        matches!(&self.data, StringData::Short { .. })
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn mem_size(&self) -> usize {
        match &self.data {
            StringData::Short { .. } => std::mem::size_of::<LuaString>(),
            StringData::Long(v) => std::mem::size_of::<LuaString>() + v.len(),
        }
    }
}

impl fmt::Debug for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(s) = std::str::from_utf8(self.as_bytes()) {
            write!(f, "\"{}\"", s)
        } else {
            write!(f, "<binary string len={}>", self.len())
        }
    }
}

/// PUC Lua compatible hash function (luaS_hash), seeded per engine.
pub fn lua_hash(bytes: &[u8], seed: u32) -> u32 {
    let len = bytes.len();
    let mut h = seed ^ (len as u32);
    // Hash step: skip some bytes for long strings
    let step = (len >> 5) + 1;
    let mut i = len;
    while i >= step {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(bytes[i - 1] as u32);
        i -= step;
    }
    h
}

/// Fresh per-engine hash seed.
pub fn make_seed() -> u32 {
    std::collections::hash_map::RandomState::new().hash_one(0x6c61_7069u64) as u32
}

/// Interning table for short strings: hash → candidates in the string arena.
#[derive(Debug, Default)]
pub struct StringTable {
    buckets: HashMap<u32, Vec<GcIdx<LuaString>>>,
    count: usize,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(
        &self,
        bytes: &[u8],
        hash: u32,
        arena: &Arena<LuaString>,
    ) -> Option<GcIdx<LuaString>> {
        self.buckets
            .get(&hash)?
            .iter()
            .copied()
            .find(|&id| arena.get(id).as_bytes() == bytes)
    }

    pub fn insert(&mut self, hash: u32, id: GcIdx<LuaString>) {
        self.buckets.entry(hash).or_default().push(id);
        self.count += 1;
    }

    /// Forget a string that the sweeper is freeing.
    pub fn remove(&mut self, hash: u32, id: GcIdx<LuaString>) {
        if let Some(ids) = self.buckets.get_mut(&hash) {
            if let Some(pos) = ids.iter().position(|&x| x == id) {
                ids.swap_remove(pos);
                self.count -= 1;
            }
            if ids.is_empty() {
                self.buckets.remove(&hash);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

const STRCACHE_N: usize = 53;
const STRCACHE_M: usize = 2;

/// Small cache from host string addresses to string objects. A hit is
/// confirmed by comparing contents, so a stale address can only miss.
pub struct StringCache {
    entries: [[Option<GcIdx<LuaString>>; STRCACHE_M]; STRCACHE_N],
}

impl StringCache {
    pub fn new() -> Self {
        StringCache {
            entries: [[None; STRCACHE_M]; STRCACHE_N],
        }
    }

    #[inline]
    fn bucket(addr: usize) -> usize {
        addr % STRCACHE_N
    }

    pub fn lookup(&self, s: &[u8], arena: &Arena<LuaString>) -> Option<GcIdx<LuaString>> {
        self.entries[Self::bucket(s.as_ptr() as usize)]
            .iter()
            .flatten()
            .copied()
            .find(|&id| arena.contains(id) && arena.get(id).as_bytes() == s)
    }

    /// Insert at the front of the bucket, evicting the oldest entry.
    pub fn insert(&mut self, s: &[u8], id: GcIdx<LuaString>) {
        let bucket = &mut self.entries[Self::bucket(s.as_ptr() as usize)];
        for j in (1..STRCACHE_M).rev() {
            bucket[j] = bucket[j - 1];
        }
        bucket[0] = Some(id);
    }

    /// Drop entries the predicate reports as about to be collected.
    pub fn clear_dead<F>(&mut self, mut is_dead: F)
    where
        F: FnMut(GcIdx<LuaString>) -> bool,
    {
        for slot in self.entries.iter_mut().flatten() {
            if slot.is_some_and(&mut is_dead) {
                *slot = None;
            }
        }
    }
}

impl Default for StringCache {
    fn default() -> Self {
        Self::new()
    }
}
