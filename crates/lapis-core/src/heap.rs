//! Allocation, memory accounting and collector bookkeeping state.
//!
//! Every object, stack, frame and upvalue cell is charged through the
//! host [`Allocator`]. The engine keeps `total_bytes + debt` equal to the
//! bytes currently in use; a positive debt is what drives collector steps.

use crate::error::LuaError;
use crate::gc::{GcHeader, GcIdx, GcRef};
use crate::object::{LuaClosure, NativeClosure, Proto, Userdata};
use crate::state::{GlobalState, LuaThread, ThreadObj, Vm};
use crate::string::{LuaString, MAX_SHORT_LEN};
use crate::table::Table;
use crate::value::{NativeFn, TValue};

/// Host allocator hook. The implementing value doubles as the opaque
/// allocator context.
pub trait Allocator {
    /// Approve resizing a block from `old_size` to `new_size` bytes.
    /// `old_size == 0` is a fresh allocation and `new_size == 0` a free.
    /// Returning `false` for a shrink or a free is not allowed.
    fn realloc(&mut self, old_size: usize, new_size: usize) -> bool;
}

/// Approves every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultAllocator;

impl Allocator for DefaultAllocator {
    fn realloc(&mut self, _old_size: usize, _new_size: usize) -> bool {
        true
    }
}

/// Enforces a fixed byte budget.
#[derive(Clone, Debug)]
pub struct LimitedAllocator {
    limit: usize,
    used: usize,
}

impl LimitedAllocator {
    pub fn new(limit: usize) -> Self {
        LimitedAllocator { limit, used: 0 }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }
}

impl Allocator for LimitedAllocator {
    fn realloc(&mut self, old_size: usize, new_size: usize) -> bool {
        if new_size <= old_size {
            self.used = self.used.saturating_sub(old_size - new_size);
            return true;
        }
        let grow = new_size - old_size;
        if self.used + grow > self.limit {
            return false;
        }
        self.used += grow;
        true
    }
}

/// Collector phases, in cycle order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum GcPhase {
    Propagate,
    Atomic,
    SweepAllGc,
    SweepFinObj,
    SweepToBeFnz,
    SweepEnd,
    CallFin,
    Pause,
}

impl GcPhase {
    /// Black objects may exist only while marking.
    #[inline]
    pub fn keeps_invariant(self) -> bool {
        self <= GcPhase::Atomic
    }

    #[inline]
    pub fn is_sweep(self) -> bool {
        (GcPhase::SweepAllGc..=GcPhase::SweepEnd).contains(&self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcKind {
    Normal,
    /// Triggered by a refused allocation: no finalizers, no stack resizing.
    Emergency,
}

/// The intrusive object lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjList {
    AllGc,
    FinObj,
    ToBeFnz,
    Fixed,
}

/// Position of the incremental sweeper: either the head of a list, or
/// just after an object already swept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepCursor {
    Head(ObjList),
    After(GcRef),
}

/// Work units of a basic step.
pub const GCSTEPSIZE: isize = 100 * std::mem::size_of::<TValue>() as isize;
pub const STEPMULADJ: isize = 200;
pub const PAUSEADJ: usize = 100;
/// Objects swept per step.
pub const GCSWEEPMAX: usize = 80;
pub const GCSWEEPCOST: usize = 10;
pub const GCFINALIZECOST: usize = GCSWEEPCOST;

#[derive(Debug)]
pub struct GcState {
    /// Bytes allocated minus `debt`.
    pub total_bytes: usize,
    /// Bytes allocated and not yet paid for by collector work.
    pub debt: isize,
    /// Estimate of live bytes after the last cycle.
    pub estimate: usize,
    /// Bytes traversed by the current step.
    pub memtrav: usize,
    pub current_white: u8,
    pub phase: GcPhase,
    pub kind: GcKind,
    /// Collector enabled by the host.
    pub running: bool,
    /// Emergency collections are suspended.
    pub stopem: bool,
    /// Set while the atomic phase runs.
    pub in_atomic: bool,
    pub allgc: Option<GcRef>,
    pub finobj: Option<GcRef>,
    pub tobefnz: Option<GcRef>,
    pub fixedgc: Option<GcRef>,
    pub sweep: Option<SweepCursor>,
    pub gray: Vec<GcRef>,
    pub grayagain: Vec<GcRef>,
    /// Weak-value tables that may need clearing.
    pub weak: Vec<GcIdx<Table>>,
    /// Weak-key tables with white-to-white entries.
    pub ephemeron: Vec<GcIdx<Table>>,
    /// Tables whose keys and values may need clearing.
    pub allweak: Vec<GcIdx<Table>>,
    pub pause: i32,
    pub stepmul: i32,
    /// Finalizers to run in the next batch.
    pub finnum: usize,
}

impl GcState {
    pub fn new(pause: i32, stepmul: i32) -> Self {
        GcState {
            total_bytes: 0,
            debt: 0,
            estimate: 0,
            memtrav: 0,
            current_white: crate::gc::WHITE0_BIT,
            phase: GcPhase::Pause,
            kind: GcKind::Normal,
            running: false,
            stopem: false,
            in_atomic: false,
            allgc: None,
            finobj: None,
            tobefnz: None,
            fixedgc: None,
            sweep: None,
            gray: Vec::new(),
            grayagain: Vec::new(),
            weak: Vec::new(),
            ephemeron: Vec::new(),
            allweak: Vec::new(),
            pause,
            stepmul,
            finnum: 0,
        }
    }

    #[inline]
    pub fn other_white(&self) -> u8 {
        self.current_white ^ crate::gc::WHITE_BITS
    }

    /// Bytes in use.
    #[inline]
    pub fn total(&self) -> usize {
        (self.total_bytes as isize + self.debt).max(0) as usize
    }

    /// Re-split the byte count so that `debt` has the given value.
    pub fn set_debt(&mut self, debt: isize) {
        let total = self.total() as isize;
        let debt = debt.max(total - isize::MAX);
        self.total_bytes = (total - debt) as usize;
        self.debt = debt;
    }

    pub fn head(&self, list: ObjList) -> Option<GcRef> {
        match list {
            ObjList::AllGc => self.allgc,
            ObjList::FinObj => self.finobj,
            ObjList::ToBeFnz => self.tobefnz,
            ObjList::Fixed => self.fixedgc,
        }
    }

    pub fn head_mut(&mut self, list: ObjList) -> &mut Option<GcRef> {
        match list {
            ObjList::AllGc => &mut self.allgc,
            ObjList::FinObj => &mut self.finobj,
            ObjList::ToBeFnz => &mut self.tobefnz,
            ObjList::Fixed => &mut self.fixedgc,
        }
    }
}

impl GlobalState {
    pub(crate) fn header(&self, r: GcRef) -> &GcHeader {
        match r {
            GcRef::String(i) => self.strings.header(i),
            GcRef::Table(i) => self.tables.header(i),
            GcRef::LuaClosure(i) => self.lua_closures.header(i),
            GcRef::NativeClosure(i) => self.native_closures.header(i),
            GcRef::Userdata(i) => self.userdata.header(i),
            GcRef::Thread(i) => self.threads.header(i),
            GcRef::Proto(i) => self.protos.header(i),
        }
    }

    pub(crate) fn header_mut(&mut self, r: GcRef) -> &mut GcHeader {
        match r {
            GcRef::String(i) => self.strings.header_mut(i),
            GcRef::Table(i) => self.tables.header_mut(i),
            GcRef::LuaClosure(i) => self.lua_closures.header_mut(i),
            GcRef::NativeClosure(i) => self.native_closures.header_mut(i),
            GcRef::Userdata(i) => self.userdata.header_mut(i),
            GcRef::Thread(i) => self.threads.header_mut(i),
            GcRef::Proto(i) => self.protos.header_mut(i),
        }
    }

    /// Header for a new object, linked at the head of `allgc`.
    #[inline]
    fn fresh_header(&self, size: usize) -> GcHeader {
        GcHeader::new(self.gc.current_white, self.gc.allgc, size)
    }

    /// Give `size` bytes back to the allocator.
    pub(crate) fn release(&mut self, size: usize) {
        if size > 0 {
            self.allocator.realloc(size, 0);
            self.gc.debt -= size as isize;
        }
    }

    /// Record a size change that cannot fail (shrinks).
    pub(crate) fn resize_infallible(&mut self, old: usize, new: usize) {
        debug_assert!(new <= old);
        self.allocator.realloc(old, new);
        self.gc.debt += new as isize - old as isize;
    }

    /// Move the newest object of `allgc` to the never-collected list. Fixed
    /// objects stay gray forever.
    pub(crate) fn fix_object(&mut self, r: GcRef) {
        debug_assert_eq!(self.gc.allgc, Some(r));
        let fixed = self.gc.fixedgc;
        let h = self.header_mut(r);
        let next = h.next;
        h.white_to_gray();
        h.next = fixed;
        self.gc.allgc = next;
        self.gc.fixedgc = Some(r);
    }

    /// Free an object the sweeper found dead.
    pub(crate) fn free_object(&mut self, r: GcRef) {
        let size = match r {
            GcRef::String(i) => {
                let (h, s) = self.strings.remove(i);
                if s.is_short() {
                    self.strt.remove(s.hash(), i);
                }
                h.size
            }
            GcRef::Table(i) => self.tables.remove(i).0.size,
            GcRef::LuaClosure(i) => {
                let (h, cl) = self.lua_closures.remove(i);
                for id in cl.upvals {
                    self.upval_decref(id);
                }
                h.size
            }
            GcRef::NativeClosure(i) => self.native_closures.remove(i).0.size,
            GcRef::Userdata(i) => self.userdata.remove(i).0.size,
            GcRef::Thread(i) => {
                let (h, t) = self.threads.remove(i);
                let mut extra = 0;
                if let Some(mut th) = t.state {
                    self.close_thread_upvals(&mut th, 0);
                    extra = th.mem_size();
                }
                h.size + extra
            }
            GcRef::Proto(i) => self.protos.remove(i).0.size,
        };
        self.release(size);
    }
}

impl Vm {
    /// Ask the allocator to grow a block from `old` to `new` bytes and
    /// charge the difference. A refused growth runs an emergency collection
    /// and retries once.
    pub(crate) fn reserve(&mut self, old: usize, new: usize) -> Result<(), LuaError> {
        if new > old && !self.g.allocator.realloc(old, new) {
            if !self.g.complete || self.g.gc.stopem {
                return Err(LuaError::Memory);
            }
            tracing::warn!(
                target: "lapis::gc",
                requested = new - old,
                in_use = self.g.gc.total(),
                "allocation refused, running emergency collection"
            );
            self.full_gc(true)?;
            if !self.g.allocator.realloc(old, new) {
                return Err(LuaError::Memory);
            }
        } else if new <= old {
            self.g.allocator.realloc(old, new);
        }
        self.g.gc.debt += new as isize - old as isize;
        Ok(())
    }

    /// Create a string value. Short strings are interned; a dead short
    /// string the sweeper has not reached yet is brought back.
    pub(crate) fn new_string(&mut self, bytes: &[u8]) -> Result<TValue, LuaError> {
        let s = LuaString::new(bytes, self.g.seed);
        if bytes.len() <= MAX_SHORT_LEN {
            let hash = s.hash();
            if let Some(id) = self.g.strt.find(bytes, hash, &self.g.strings) {
                let other = self.g.gc.other_white();
                let h = self.g.strings.header_mut(id);
                if h.is_dead(other) {
                    h.change_white();
                }
                return Ok(TValue::ShortStr(id));
            }
            let size = s.mem_size();
            self.reserve(0, size)?;
            let id = self.g.strings.insert(self.g.fresh_header(size), s);
            self.g.gc.allgc = Some(GcRef::String(id));
            self.g.strt.insert(hash, id);
            Ok(TValue::ShortStr(id))
        } else {
            let size = s.mem_size();
            self.reserve(0, size)?;
            let id = self.g.strings.insert(self.g.fresh_header(size), s);
            self.g.gc.allgc = Some(GcRef::String(id));
            Ok(TValue::LongStr(id))
        }
    }

    /// Create a string through the address-keyed cache.
    pub(crate) fn new_string_cached(&mut self, s: &[u8]) -> Result<TValue, LuaError> {
        if let Some(id) = self.g.strcache.lookup(s, &self.g.strings) {
            let h = self.g.strings.header(id);
            if !h.is_dead(self.g.gc.other_white()) {
                let short = self.g.strings.get(id).is_short();
                return Ok(if short {
                    TValue::ShortStr(id)
                } else {
                    TValue::LongStr(id)
                });
            }
        }
        let v = self.new_string(s)?;
        if let Some(id) = v.as_string() {
            self.g.strcache.insert(s, id);
        }
        Ok(v)
    }

    pub(crate) fn new_table(&mut self, narr: usize, nrec: usize) -> Result<GcIdx<Table>, LuaError> {
        let t = Table::new(narr, nrec);
        let size = t.mem_size();
        self.reserve(0, size)?;
        let idx = self.g.tables.insert(self.g.fresh_header(size), t);
        self.g.gc.allgc = Some(GcRef::Table(idx));
        Ok(idx)
    }

    pub(crate) fn new_native_closure(
        &mut self,
        func: NativeFn,
        upvalues: Vec<TValue>,
    ) -> Result<GcIdx<NativeClosure>, LuaError> {
        let cl = NativeClosure { func, upvalues };
        let size = cl.mem_size();
        self.reserve(0, size)?;
        let idx = self.g.native_closures.insert(self.g.fresh_header(size), cl);
        self.g.gc.allgc = Some(GcRef::NativeClosure(idx));
        Ok(idx)
    }

    /// Create a script closure. The caller bumps the reference counts of
    /// `upvals` once the closure exists.
    pub(crate) fn new_lua_closure(
        &mut self,
        proto: GcIdx<Proto>,
        upvals: Vec<crate::func::UpvalId>,
    ) -> Result<GcIdx<LuaClosure>, LuaError> {
        let cl = LuaClosure { proto, upvals };
        let size = cl.mem_size();
        self.reserve(0, size)?;
        let idx = self.g.lua_closures.insert(self.g.fresh_header(size), cl);
        self.g.gc.allgc = Some(GcRef::LuaClosure(idx));
        Ok(idx)
    }

    pub(crate) fn new_userdata_obj(&mut self, size: usize) -> Result<GcIdx<Userdata>, LuaError> {
        let u = Userdata::new(size);
        let bytes = u.mem_size();
        self.reserve(0, bytes)?;
        let idx = self.g.userdata.insert(self.g.fresh_header(bytes), u);
        self.g.gc.allgc = Some(GcRef::Userdata(idx));
        Ok(idx)
    }

    pub(crate) fn new_proto(&mut self, p: Proto) -> Result<GcIdx<Proto>, LuaError> {
        let size = p.mem_size();
        self.reserve(0, size)?;
        let idx = self.g.protos.insert(self.g.fresh_header(size), p);
        self.g.gc.allgc = Some(GcRef::Proto(idx));
        Ok(idx)
    }

    /// Create a thread object whose stack is not built yet.
    pub(crate) fn new_thread_obj(&mut self, state: LuaThread) -> Result<GcIdx<ThreadObj>, LuaError> {
        let size = std::mem::size_of::<ThreadObj>() + std::mem::size_of::<LuaThread>();
        self.reserve(0, size)?;
        let obj = ThreadObj {
            state: Some(Box::new(state)),
        };
        let idx = self.g.threads.insert(self.g.fresh_header(size), obj);
        self.g.gc.allgc = Some(GcRef::Thread(idx));
        Ok(idx)
    }

    /// Re-charge a table after a mutation changed its footprint. The header
    /// holds the size the allocator agreed to; a refused growth leaves it
    /// unchanged and reports `Memory`.
    pub(crate) fn sync_table_size(&mut self, t: GcIdx<Table>) -> Result<(), LuaError> {
        let charged = self.g.tables.header(t).size;
        let actual = self.g.tables.get(t).mem_size();
        if actual != charged {
            self.reserve(charged, actual)?;
            self.g.tables.header_mut(t).size = actual;
        }
        Ok(())
    }

    /// Charge the allocator up front for a table about to grow to `projected`.
    pub(crate) fn reserve_table(&mut self, t: GcIdx<Table>, projected: usize) -> Result<(), LuaError> {
        let charged = self.g.tables.header(t).size;
        if projected > charged {
            self.reserve(charged, projected)?;
            self.g.tables.header_mut(t).size = projected;
        }
        Ok(())
    }
}
