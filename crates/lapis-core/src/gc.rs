//! Typed arena indices, collector headers and the slab that stores heap objects.

use crate::object::{LuaClosure, NativeClosure, Proto, Userdata};
use crate::state::ThreadObj;
use crate::string::LuaString;
use crate::table::Table;
use std::marker::PhantomData;

/// A typed index into one of the heap arenas.
pub struct GcIdx<T>(pub u32, pub PhantomData<T>);

impl<T> std::fmt::Debug for GcIdx<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GcIdx({})", self.0)
    }
}

impl<T> Clone for GcIdx<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcIdx<T> {}

impl<T> PartialEq for GcIdx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for GcIdx<T> {}

impl<T> std::hash::Hash for GcIdx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> GcIdx<T> {
    #[inline]
    pub fn new(index: u32) -> Self {
        GcIdx(index, PhantomData)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// An untyped reference to any collectable object.
///
/// The collector lists and gray queues hold these; the variant doubles as
/// the object's type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GcRef {
    String(GcIdx<LuaString>),
    Table(GcIdx<Table>),
    LuaClosure(GcIdx<LuaClosure>),
    NativeClosure(GcIdx<NativeClosure>),
    Userdata(GcIdx<Userdata>),
    Thread(GcIdx<ThreadObj>),
    Proto(GcIdx<Proto>),
}

impl GcRef {
    /// Stable identity used by `to_pointer`.
    pub fn identity(self) -> usize {
        let (kind, idx) = match self {
            GcRef::String(i) => (1usize, i.0),
            GcRef::Table(i) => (2, i.0),
            GcRef::LuaClosure(i) => (3, i.0),
            GcRef::NativeClosure(i) => (4, i.0),
            GcRef::Userdata(i) => (5, i.0),
            GcRef::Thread(i) => (6, i.0),
            GcRef::Proto(i) => (7, i.0),
        };
        (kind << 32) | idx as usize
    }
}

// Color bits of `GcHeader::marked`. An object with neither white bit nor the
// black bit is gray.
pub const WHITE0_BIT: u8 = 1 << 0;
pub const WHITE1_BIT: u8 = 1 << 1;
pub const BLACK_BIT: u8 = 1 << 2;
/// Object is on the finalizer-tracked list (or queued for finalization).
pub const FINALIZED_BIT: u8 = 1 << 3;

pub const WHITE_BITS: u8 = WHITE0_BIT | WHITE1_BIT;
const MASK_COLORS: u8 = !(BLACK_BIT | WHITE_BITS);

/// Common header carried by every heap object.
#[derive(Clone, Copy, Debug)]
pub struct GcHeader {
    pub marked: u8,
    /// Next object in the owning collector list.
    pub next: Option<GcRef>,
    /// Bytes charged to the allocator for this object.
    pub size: usize,
}

impl GcHeader {
    pub fn new(current_white: u8, next: Option<GcRef>, size: usize) -> Self {
        GcHeader {
            marked: current_white & WHITE_BITS,
            next,
            size,
        }
    }

    #[inline(always)]
    pub fn is_white(&self) -> bool {
        self.marked & WHITE_BITS != 0
    }

    #[inline(always)]
    pub fn is_black(&self) -> bool {
        self.marked & BLACK_BIT != 0
    }

    #[inline(always)]
    pub fn is_gray(&self) -> bool {
        self.marked & (WHITE_BITS | BLACK_BIT) == 0
    }

    #[inline(always)]
    pub fn to_finalize(&self) -> bool {
        self.marked & FINALIZED_BIT != 0
    }

    /// Dead means it still carries the white of the previous cycle.
    #[inline(always)]
    pub fn is_dead(&self, other_white: u8) -> bool {
        self.marked & other_white != 0
    }

    #[inline(always)]
    pub fn white_to_gray(&mut self) {
        self.marked &= !WHITE_BITS;
    }

    #[inline(always)]
    pub fn gray_to_black(&mut self) {
        self.marked |= BLACK_BIT;
    }

    #[inline(always)]
    pub fn black_to_gray(&mut self) {
        self.marked &= !BLACK_BIT;
    }

    #[inline(always)]
    pub fn make_white(&mut self, current_white: u8) {
        self.marked = (self.marked & MASK_COLORS) | (current_white & WHITE_BITS);
    }

    /// Flip between the two whites, resurrecting an object the sweeper has
    /// not reached yet.
    #[inline(always)]
    pub fn change_white(&mut self) {
        self.marked ^= WHITE_BITS;
    }
}

struct Slot<T> {
    header: GcHeader,
    value: T,
}

/// Index-stable slab with a free list. Freed indices are reused.
pub struct Arena<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, header: GcHeader, value: T) -> GcIdx<T> {
        self.live += 1;
        let slot = Some(Slot { header, value });
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = slot;
            GcIdx::new(idx)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(slot);
            GcIdx::new(idx)
        }
    }

    pub fn remove(&mut self, idx: GcIdx<T>) -> (GcHeader, T) {
        let slot = self.slots[idx.0 as usize]
            .take()
            .expect("object was already freed");
        self.free.push(idx.0);
        self.live -= 1;
        (slot.header, slot.value)
    }

    #[inline]
    pub fn contains(&self, idx: GcIdx<T>) -> bool {
        matches!(self.slots.get(idx.0 as usize), Some(Some(_)))
    }

    #[inline]
    pub fn get(&self, idx: GcIdx<T>) -> &T {
        &self.slots[idx.0 as usize]
            .as_ref()
            .expect("object was freed")
            .value
    }

    #[inline]
    pub fn get_mut(&mut self, idx: GcIdx<T>) -> &mut T {
        &mut self.slots[idx.0 as usize]
            .as_mut()
            .expect("object was freed")
            .value
    }

    #[inline]
    pub fn header(&self, idx: GcIdx<T>) -> &GcHeader {
        &self.slots[idx.0 as usize]
            .as_ref()
            .expect("object was freed")
            .header
    }

    #[inline]
    pub fn header_mut(&mut self, idx: GcIdx<T>) -> &mut GcHeader {
        &mut self.slots[idx.0 as usize]
            .as_mut()
            .expect("object was freed")
            .header
    }

    /// Move the payload out, leaving a default value behind, so the
    /// collector can walk it while marking other objects of this arena.
    pub fn take(&mut self, idx: GcIdx<T>) -> T
    where
        T: Default,
    {
        std::mem::take(self.get_mut(idx))
    }

    /// Put back a payload moved out with `take`.
    pub fn put(&mut self, idx: GcIdx<T>, value: T) {
        *self.get_mut(idx) = value;
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Indices of all live objects.
    pub fn indices(&self) -> impl Iterator<Item = GcIdx<T>> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| GcIdx::new(i as u32))
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
