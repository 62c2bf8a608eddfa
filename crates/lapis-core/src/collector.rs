//! Incremental tri-color mark & sweep.
//!
//! Objects start white. Marking turns reachable objects gray (queued) and
//! then black (traversed). The atomic phase finishes marking in one go,
//! clears weak tables and flips the current white, after which everything
//! still carrying the old white is dead and is freed by the sweeper. Black
//! objects may only point to white ones through a barrier: the forward
//! barrier marks the target, the backward barrier re-queues the owner.

use crate::error::{LuaError, Status};
use crate::gc::{GcIdx, GcRef, FINALIZED_BIT};
use crate::heap::{
    GcKind, GcPhase, ObjList, SweepCursor, GCFINALIZECOST, GCSTEPSIZE, GCSWEEPCOST, GCSWEEPMAX,
    PAUSEADJ, STEPMULADJ,
};
use crate::func::UpvalState;
use crate::metamethod::Tm;
use crate::object::{LuaClosure, NativeClosure, Proto};
use crate::state::{GlobalState, LuaThread, ThreadObj, Vm};
use crate::table::Table;
use crate::value::TValue;
use std::mem::size_of;

/// Collector control selector for [`Vm::gc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcOp {
    /// Stop automatic collection.
    Stop,
    /// Restart automatic collection.
    Restart,
    /// Run a full cycle.
    Collect,
    /// Bytes in use, in KiB.
    Count,
    /// Remainder of `Count`, in bytes.
    CountB,
    /// Do some incremental work; `Step(0)` runs one basic step, otherwise
    /// the step is sized as if `n` KiB had been allocated.
    Step(i32),
    SetPause(i32),
    SetStepMul(i32),
    IsRunning,
}

impl GlobalState {
    // ---- marking ----

    #[inline]
    pub(crate) fn mark_value(&mut self, v: TValue) {
        if let Some(r) = v.gc_ref() {
            self.mark_object(r);
        }
    }

    #[inline]
    pub(crate) fn mark_object(&mut self, r: GcRef) {
        if self.header(r).is_white() {
            self.really_mark(r);
        }
    }

    fn really_mark(&mut self, mut r: GcRef) {
        loop {
            self.header_mut(r).white_to_gray();
            match r {
                GcRef::String(_) => {
                    self.blacken(r);
                    return;
                }
                GcRef::Userdata(u) => {
                    let (mt, uv) = {
                        let ud = self.userdata.get(u);
                        (ud.metatable, ud.user_value)
                    };
                    if let Some(mt) = mt {
                        self.mark_object(GcRef::Table(mt));
                    }
                    self.blacken(r);
                    match uv.gc_ref() {
                        Some(next) if self.header(next).is_white() => r = next,
                        _ => return,
                    }
                }
                _ => {
                    self.gc.gray.push(r);
                    return;
                }
            }
        }
    }

    /// Objects without outgoing references go straight to black.
    fn blacken(&mut self, r: GcRef) {
        let h = self.header_mut(r);
        h.gray_to_black();
        let size = h.size;
        self.gc.memtrav += size;
    }

    fn val_is_white(&self, v: TValue) -> bool {
        v.gc_ref().is_some_and(|r| self.header(r).is_white())
    }

    /// A weak entry referencing `v` must be cleared. Strings are values,
    /// not referents, so they are marked instead.
    fn is_cleared(&mut self, v: TValue) -> bool {
        match v.gc_ref() {
            None => false,
            Some(GcRef::String(_)) => {
                self.mark_value(v);
                false
            }
            Some(r) => self.header(r).is_white(),
        }
    }

    fn mark_mt(&mut self) {
        for mt in self.mt.into_iter().flatten() {
            self.mark_object(GcRef::Table(mt));
        }
    }

    fn mark_being_fnz(&mut self) {
        let mut cur = self.gc.tobefnz;
        while let Some(r) = cur {
            cur = self.header(r).next;
            self.mark_object(r);
        }
    }

    fn mark_roots(&mut self, running: GcIdx<ThreadObj>, callers: &[GcIdx<ThreadObj>]) {
        self.mark_object(GcRef::Thread(self.main_thread));
        self.mark_object(GcRef::Thread(running));
        for &t in callers {
            self.mark_object(GcRef::Thread(t));
        }
        self.mark_value(self.registry);
        self.mark_mt();
    }

    fn restart_collection(&mut self, running: GcIdx<ThreadObj>, callers: &[GcIdx<ThreadObj>]) {
        self.gc.gray.clear();
        self.gc.grayagain.clear();
        self.gc.weak.clear();
        self.gc.allweak.clear();
        self.gc.ephemeron.clear();
        self.mark_roots(running, callers);
        self.mark_being_fnz();
    }

    // ---- traversal ----

    fn weak_mode(&self, mode: TValue) -> (bool, bool) {
        match mode.as_string() {
            Some(s) => {
                let bytes = self.strings.get(s).as_bytes();
                (bytes.contains(&b'k'), bytes.contains(&b'v'))
            }
            None => (false, false),
        }
    }

    fn traverse_table(&mut self, t: GcIdx<Table>) -> usize {
        let mt = self.tables.get(t).metatable;
        let mode = self.fast_tm(mt, Tm::Mode);
        if let Some(mt) = mt {
            self.mark_object(GcRef::Table(mt));
        }
        let (weak_keys, weak_values) = mode.map_or((false, false), |m| self.weak_mode(m));
        if weak_keys || weak_values {
            self.header_mut(GcRef::Table(t)).black_to_gray();
            if !weak_keys {
                self.traverse_weak_value(t);
            } else if !weak_values {
                self.traverse_ephemeron(t);
            } else {
                self.gc.allweak.push(t);
            }
        } else {
            let tab = self.tables.take(t);
            for &v in tab.array_values() {
                self.mark_value(v);
            }
            for n in tab.nodes() {
                if !n.value.is_nil() {
                    self.mark_value(n.key);
                    self.mark_value(n.value);
                }
            }
            self.tables.put(t, tab);
        }
        self.tables.header(t).size
    }

    fn traverse_weak_value(&mut self, t: GcIdx<Table>) {
        let tab = self.tables.take(t);
        let mut has_clears = tab.array_len() > 0;
        for n in tab.nodes() {
            if n.value.is_nil() {
                continue;
            }
            self.mark_value(n.key);
            if !has_clears && self.is_cleared(n.value) {
                has_clears = true;
            }
        }
        self.tables.put(t, tab);
        if self.gc.phase == GcPhase::Propagate {
            self.gc.grayagain.push(GcRef::Table(t));
        } else if has_clears {
            self.gc.weak.push(t);
        }
    }

    /// Traverse a weak-key table, marking values whose keys are marked.
    /// Returns whether anything was marked.
    fn traverse_ephemeron(&mut self, t: GcIdx<Table>) -> bool {
        let tab = self.tables.take(t);
        let mut marked = false;
        let mut has_clears = false;
        let mut has_white_white = false;
        for &v in tab.array_values() {
            if self.val_is_white(v) {
                marked = true;
                self.mark_value(v);
            }
        }
        for n in tab.nodes() {
            if n.value.is_nil() {
                continue;
            }
            if self.is_cleared(n.key) {
                has_clears = true;
                if self.val_is_white(n.value) {
                    has_white_white = true;
                }
            } else if self.val_is_white(n.value) {
                marked = true;
                self.mark_value(n.value);
            }
        }
        self.tables.put(t, tab);
        if self.gc.phase == GcPhase::Propagate {
            self.gc.grayagain.push(GcRef::Table(t));
        } else if has_white_white {
            self.gc.ephemeron.push(t);
        } else if has_clears {
            self.gc.allweak.push(t);
        }
        marked
    }

    fn traverse_proto(&mut self, p: GcIdx<Proto>) -> usize {
        let proto = self.protos.take(p);
        for &k in &proto.constants {
            self.mark_value(k);
        }
        for &child in &proto.protos {
            self.mark_object(GcRef::Proto(child));
        }
        self.protos.put(p, proto);
        self.protos.header(p).size
    }

    fn traverse_native_closure(&mut self, c: GcIdx<NativeClosure>) -> usize {
        let upvalues = self.native_closures.get(c).upvalues.clone();
        for v in upvalues {
            self.mark_value(v);
        }
        self.native_closures.header(c).size
    }

    /// Open cells are only flagged here; their values belong to a stack and
    /// are marked with it, or in the atomic phase if the thread is dead.
    fn traverse_lua_closure(
        &mut self,
        c: GcIdx<LuaClosure>,
        th: &LuaThread,
        running: GcIdx<ThreadObj>,
    ) -> usize {
        let (proto, upvals) = {
            let cl = self.lua_closures.get(c);
            (cl.proto, cl.upvals.clone())
        };
        self.mark_object(GcRef::Proto(proto));
        for id in upvals {
            match self.upvals.get(id).state {
                UpvalState::Closed(v) => self.mark_value(v),
                UpvalState::Open { .. } if self.gc.in_atomic => {
                    let v = self.upval_value(id, running, th);
                    self.mark_value(v);
                }
                UpvalState::Open { .. } => self.upvals.get_mut(id).touched = true,
            }
        }
        self.lua_closures.header(c).size
    }

    fn traverse_thread(
        &mut self,
        t: GcIdx<ThreadObj>,
        th: &mut LuaThread,
        running: GcIdx<ThreadObj>,
    ) -> usize {
        let own = size_of::<ThreadObj>() + size_of::<LuaThread>();
        if t == running {
            return own + self.traverse_thread_state(th);
        }
        match self.threads.get_mut(t).state.take() {
            Some(mut state) => {
                let n = self.traverse_thread_state(&mut state);
                self.threads.get_mut(t).state = Some(state);
                own + n
            }
            // only the running state is ever checked out
            None => own,
        }
    }

    fn traverse_thread_state(&mut self, th: &mut LuaThread) -> usize {
        if th.stack.is_empty() {
            return 0;
        }
        for i in 0..th.top {
            self.mark_value(th.stack[i]);
        }
        if self.gc.in_atomic {
            for v in &mut th.stack[th.top..] {
                *v = TValue::Nil;
            }
        } else if self.gc.kind != GcKind::Emergency {
            self.shrink_stack(th);
        }
        th.mem_size()
    }

    /// Traverse one gray object.
    fn propagate_mark(&mut self, th: &mut LuaThread, running: GcIdx<ThreadObj>) {
        let Some(r) = self.gc.gray.pop() else {
            return;
        };
        self.header_mut(r).gray_to_black();
        let size = match r {
            GcRef::Table(t) => self.traverse_table(t),
            GcRef::LuaClosure(c) => self.traverse_lua_closure(c, th, running),
            GcRef::NativeClosure(c) => self.traverse_native_closure(c),
            GcRef::Proto(p) => self.traverse_proto(p),
            GcRef::Thread(t) => {
                // threads stay gray: their stacks change without barriers
                self.header_mut(r).black_to_gray();
                self.gc.grayagain.push(r);
                self.traverse_thread(t, th, running)
            }
            GcRef::String(_) | GcRef::Userdata(_) => 0,
        };
        self.gc.memtrav += size;
    }

    fn propagate_all(&mut self, th: &mut LuaThread, running: GcIdx<ThreadObj>) {
        while !self.gc.gray.is_empty() {
            self.propagate_mark(th, running);
        }
    }

    fn converge_ephemerons(&mut self, th: &mut LuaThread, running: GcIdx<ThreadObj>) {
        loop {
            let list = std::mem::take(&mut self.gc.ephemeron);
            let mut changed = false;
            for t in list {
                if self.traverse_ephemeron(t) {
                    self.propagate_all(th, running);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Open cells whose thread was not marked would otherwise lose their
    /// values.
    fn remark_upvals(&mut self, th: &LuaThread, running: GcIdx<ThreadObj>) {
        let touched: Vec<_> = self
            .upvals
            .ids()
            .filter(|&id| {
                let uv = self.upvals.get(id);
                uv.touched && uv.is_open()
            })
            .collect();
        for id in touched {
            self.upvals.get_mut(id).touched = false;
            if let UpvalState::Open { thread, .. } = self.upvals.get(id).state {
                if self.threads.header(thread).is_white() {
                    let v = self.upval_value(id, running, th);
                    self.mark_value(v);
                }
            }
        }
    }

    // ---- weak-table clearing ----

    fn clear_keys(&mut self, list: &[GcIdx<Table>]) {
        for &t in list {
            let mut tab = self.tables.take(t);
            tab.clear_nodes(|n| self.is_cleared(n.key));
            self.tables.put(t, tab);
        }
    }

    fn clear_values(&mut self, list: &[GcIdx<Table>]) {
        for &t in list {
            let mut tab = self.tables.take(t);
            for i in 0..tab.array_len() {
                let v = tab.array_values()[i];
                if self.is_cleared(v) {
                    tab.array_values_mut()[i] = TValue::Nil;
                }
            }
            tab.clear_nodes(|n| self.is_cleared(n.value));
            self.tables.put(t, tab);
        }
    }

    fn clear_string_cache(&mut self) {
        let strings = &self.strings;
        self.strcache
            .clear_dead(|id| !strings.contains(id) || strings.header(id).is_white());
    }

    // ---- finalization lists ----

    /// Move unreachable objects with finalizers (all of them when `all`)
    /// from `finobj` to the end of `tobefnz`.
    fn separate_tobefnz(&mut self, all: bool) {
        let mut last = None;
        let mut cur = self.gc.tobefnz;
        while let Some(r) = cur {
            last = Some(r);
            cur = self.header(r).next;
        }
        let mut prev: Option<GcRef> = None;
        let mut cur = self.gc.finobj;
        while let Some(r) = cur {
            let next = self.header(r).next;
            if !(all || self.header(r).is_white()) {
                prev = Some(r);
            } else {
                match prev {
                    None => self.gc.finobj = next,
                    Some(p) => self.header_mut(p).next = next,
                }
                self.header_mut(r).next = None;
                match last {
                    None => self.gc.tobefnz = Some(r),
                    Some(l) => self.header_mut(l).next = Some(r),
                }
                last = Some(r);
            }
            cur = next;
        }
    }

    /// Take the first object queued for finalization back into `allgc`.
    fn udata_to_finalize(&mut self) -> Option<GcRef> {
        let o = self.gc.tobefnz?;
        let next = self.header(o).next;
        self.gc.tobefnz = next;
        let allgc = self.gc.allgc;
        let sweeping = self.gc.phase.is_sweep();
        let white = self.gc.current_white;
        let h = self.header_mut(o);
        h.next = allgc;
        h.marked &= !FINALIZED_BIT;
        if sweeping {
            h.make_white(white);
        }
        self.gc.allgc = Some(o);
        Some(o)
    }

    /// Register `o` for finalization if its new metatable has `__gc`.
    pub(crate) fn check_finalizer(&mut self, o: GcRef, mt: Option<GcIdx<Table>>) {
        if self.header(o).to_finalize() || self.fast_tm(mt, Tm::Gc).is_none() {
            return;
        }
        if self.gc.phase.is_sweep() {
            let white = self.gc.current_white;
            self.header_mut(o).make_white(white);
            if self.gc.sweep == Some(SweepCursor::After(o)) {
                self.gc.sweep = self.sweep_to_live(SweepCursor::After(o));
            }
        }
        let next = self.header(o).next;
        if self.gc.allgc == Some(o) {
            self.gc.allgc = next;
        } else {
            let mut p = self.gc.allgc;
            while let Some(r) = p {
                let n = self.header(r).next;
                if n == Some(o) {
                    self.header_mut(r).next = next;
                    break;
                }
                p = n;
            }
        }
        let finobj = self.gc.finobj;
        let h = self.header_mut(o);
        h.next = finobj;
        h.marked |= FINALIZED_BIT;
        self.gc.finobj = Some(o);
    }

    // ---- atomic phase ----

    fn atomic(
        &mut self,
        th: &mut LuaThread,
        running: GcIdx<ThreadObj>,
        callers: &[GcIdx<ThreadObj>],
    ) -> usize {
        let grayagain = std::mem::take(&mut self.gc.grayagain);
        self.gc.in_atomic = true;
        self.gc.memtrav = 0;
        self.mark_roots(running, callers);
        self.remark_upvals(th, running);
        self.propagate_all(th, running);
        let mut work = self.gc.memtrav;
        self.gc.gray = grayagain;
        self.propagate_all(th, running);
        self.gc.memtrav = 0;
        self.converge_ephemerons(th, running);
        // strong marking is complete: clear values from weak tables
        let weak = std::mem::take(&mut self.gc.weak);
        self.clear_values(&weak);
        let allweak = std::mem::take(&mut self.gc.allweak);
        self.clear_values(&allweak);
        self.gc.weak = weak;
        self.gc.allweak = allweak;
        let orig_weak = self.gc.weak.len();
        let orig_all = self.gc.allweak.len();
        work += self.gc.memtrav;
        // objects to be finalized are resurrected for one more cycle
        self.separate_tobefnz(false);
        self.gc.finnum = 1;
        self.mark_being_fnz();
        self.propagate_all(th, running);
        self.gc.memtrav = 0;
        self.converge_ephemerons(th, running);
        let ephemeron = std::mem::take(&mut self.gc.ephemeron);
        self.clear_keys(&ephemeron);
        let allweak = std::mem::take(&mut self.gc.allweak);
        self.clear_keys(&allweak);
        let weak = std::mem::take(&mut self.gc.weak);
        self.clear_values(&weak[..orig_weak.min(weak.len())]);
        self.clear_values(&allweak[..orig_all.min(allweak.len())]);
        self.clear_string_cache();
        self.gc.current_white = self.gc.other_white();
        work += self.gc.memtrav;
        self.gc.in_atomic = false;
        work
    }

    // ---- sweeping ----

    /// Sweep up to `count` objects after `cursor`, freeing dead ones and
    /// whitening live ones. Returns `None` once the list is exhausted.
    fn sweep_list(&mut self, mut cursor: SweepCursor, count: usize) -> Option<SweepCursor> {
        let other = self.gc.other_white();
        let white = self.gc.current_white;
        for _ in 0..count {
            let Some(obj) = self.cursor_next(cursor) else {
                return None;
            };
            let h = self.header(obj);
            if h.is_dead(other) {
                let next = h.next;
                match cursor {
                    SweepCursor::Head(l) => *self.gc.head_mut(l) = next,
                    SweepCursor::After(r) => self.header_mut(r).next = next,
                }
                self.free_object(obj);
            } else {
                self.header_mut(obj).make_white(white);
                cursor = SweepCursor::After(obj);
            }
        }
        self.cursor_next(cursor).map(|_| cursor)
    }

    fn cursor_next(&self, cursor: SweepCursor) -> Option<GcRef> {
        match cursor {
            SweepCursor::Head(l) => self.gc.head(l),
            SweepCursor::After(r) => self.header(r).next,
        }
    }

    /// Advance past dead objects until a live one has been swept.
    fn sweep_to_live(&mut self, cursor: SweepCursor) -> Option<SweepCursor> {
        loop {
            match self.sweep_list(cursor, 1) {
                Some(next) if next == cursor => continue,
                other => return other,
            }
        }
    }

    fn enter_sweep(&mut self) {
        self.gc.phase = GcPhase::SweepAllGc;
        self.gc.sweep = self.sweep_to_live(SweepCursor::Head(ObjList::AllGc));
    }

    fn sweep_step(&mut self, next_phase: GcPhase, next_list: Option<ObjList>) -> usize {
        if let Some(cursor) = self.gc.sweep {
            let old_debt = self.gc.debt;
            self.gc.sweep = self.sweep_list(cursor, GCSWEEPMAX);
            self.gc.estimate = (self.gc.estimate as isize + self.gc.debt - old_debt).max(0) as usize;
            if self.gc.sweep.is_some() {
                return GCSWEEPMAX * GCSWEEPCOST;
            }
        }
        self.gc.phase = next_phase;
        self.gc.sweep = next_list.map(SweepCursor::Head);
        0
    }

    /// Debt threshold for the next cycle, `pause` percent of the live
    /// estimate.
    pub(crate) fn set_pause(&mut self) {
        let estimate = (self.gc.estimate / PAUSEADJ).max(1);
        let threshold = estimate.saturating_mul(self.gc.pause.max(0) as usize);
        let threshold = threshold.min(isize::MAX as usize) as isize;
        let debt = self.gc.total() as isize - threshold;
        self.gc.set_debt(debt);
    }

    /// Debt converted to work units.
    fn pending_work(&self) -> isize {
        if self.gc.debt <= 0 {
            0
        } else {
            (self.gc.debt / STEPMULADJ + 1).saturating_mul(self.gc.stepmul as isize)
        }
    }

    // ---- barriers ----

    /// Forward barrier: black `owner` now references `v`.
    pub(crate) fn barrier(&mut self, owner: GcRef, v: TValue) {
        if let Some(r) = v.gc_ref() {
            self.obj_barrier(owner, r);
        }
    }

    pub(crate) fn obj_barrier(&mut self, owner: GcRef, o: GcRef) {
        if self.header(owner).is_black() && self.header(o).is_white() {
            if self.gc.phase.keeps_invariant() {
                self.really_mark(o);
            } else {
                let white = self.gc.current_white;
                self.header_mut(owner).make_white(white);
            }
        }
    }

    /// Backward barrier for tables: a black table written with a white
    /// value goes back to gray and is re-traversed in the atomic phase.
    pub(crate) fn barrier_back(&mut self, t: GcIdx<Table>, v: TValue) {
        let r = GcRef::Table(t);
        if self.header(r).is_black() && self.val_is_white(v) {
            self.header_mut(r).black_to_gray();
            self.gc.grayagain.push(r);
        }
    }

    /// A closed upvalue cell was written.
    pub(crate) fn upval_barrier(&mut self, v: TValue) {
        if self.gc.phase.keeps_invariant() {
            self.mark_value(v);
        }
    }

    /// Shrink an oversized stack and free spare frames.
    pub(crate) fn shrink_stack(&mut self, th: &mut LuaThread) {
        let mut in_use = th.top;
        for ci in th.ci.live() {
            in_use = in_use.max(ci.top);
        }
        in_use += 1;
        let max = self.config.max_stack;
        let good = (in_use + in_use / 8 + 2 * crate::config::EXTRA_STACK).min(max);
        let freed = if th.stack.len() > max {
            th.ci.free_spare()
        } else {
            th.ci.shrink()
        };
        self.release(freed * size_of::<crate::callinfo::CallInfo>());
        if in_use <= max.saturating_sub(crate::config::EXTRA_STACK) && good < th.stack.len() {
            let old = th.stack.len();
            th.stack.truncate(good);
            th.stack.shrink_to_fit();
            self.resize_infallible(old * size_of::<TValue>(), good * size_of::<TValue>());
            tracing::trace!(target: "lapis::stack", old, new = good, "stack shrunk");
        }
    }
}

impl Vm {
    /// One unit of collector work. Returns the work done.
    fn single_step(&mut self) -> Result<usize, LuaError> {
        if self.g.gc.phase == GcPhase::CallFin {
            if self.g.gc.tobefnz.is_some() && self.g.gc.kind != GcKind::Emergency {
                let n = self.run_a_few_finalizers()?;
                return Ok(n * GCFINALIZECOST);
            }
            self.g.gc.phase = GcPhase::Pause;
            return Ok(0);
        }
        let Vm {
            g,
            th,
            running,
            callers,
        } = self;
        let work = match g.gc.phase {
            GcPhase::Pause => {
                g.gc.memtrav = g.strt.len() * size_of::<usize>();
                g.restart_collection(*running, callers);
                g.gc.phase = GcPhase::Propagate;
                tracing::debug!(target: "lapis::gc", in_use = g.gc.total(), "cycle started");
                g.gc.memtrav
            }
            GcPhase::Propagate => {
                g.gc.memtrav = 0;
                g.propagate_mark(th, *running);
                if g.gc.gray.is_empty() {
                    g.gc.phase = GcPhase::Atomic;
                }
                g.gc.memtrav
            }
            GcPhase::Atomic => {
                g.propagate_all(th, *running);
                let work = g.atomic(th, *running, callers);
                g.enter_sweep();
                g.gc.estimate = g.gc.total();
                work
            }
            GcPhase::SweepAllGc => g.sweep_step(GcPhase::SweepFinObj, Some(ObjList::FinObj)),
            GcPhase::SweepFinObj => g.sweep_step(GcPhase::SweepToBeFnz, Some(ObjList::ToBeFnz)),
            GcPhase::SweepToBeFnz => g.sweep_step(GcPhase::SweepEnd, None),
            GcPhase::SweepEnd => {
                let white = g.gc.current_white;
                let main = g.main_thread;
                g.threads.header_mut(main).make_white(white);
                g.gc.phase = GcPhase::CallFin;
                tracing::debug!(target: "lapis::gc", in_use = g.gc.total(), "cycle swept");
                0
            }
            GcPhase::CallFin => unreachable!("handled above"),
        };
        Ok(work)
    }

    fn run_until(&mut self, done: impl Fn(GcPhase) -> bool) -> Result<(), LuaError> {
        while !done(self.g.gc.phase) {
            self.single_step()?;
        }
        Ok(())
    }

    /// Pay off allocation debt with collector work.
    pub(crate) fn gc_step(&mut self) -> Result<(), LuaError> {
        let mut debt = self.g.pending_work();
        if !self.g.gc.running {
            self.g.gc.set_debt(-GCSTEPSIZE * 10);
            return Ok(());
        }
        loop {
            debt -= self.single_step()? as isize;
            if debt <= -GCSTEPSIZE || self.g.gc.phase == GcPhase::Pause {
                break;
            }
        }
        if self.g.gc.phase == GcPhase::Pause {
            self.g.set_pause();
        } else {
            let debt = (debt / self.g.gc.stepmul as isize) * STEPMULADJ;
            self.g.gc.set_debt(debt);
            self.run_a_few_finalizers()?;
        }
        Ok(())
    }

    /// Run a collector step if allocation debt is positive.
    #[inline]
    pub(crate) fn check_gc(&mut self) -> Result<(), LuaError> {
        if self.g.gc.debt > 0 {
            self.gc_step()?;
        }
        Ok(())
    }

    /// Run a complete cycle. An emergency cycle runs no finalizers and
    /// leaves stacks alone.
    pub(crate) fn full_gc(&mut self, emergency: bool) -> Result<(), LuaError> {
        let before = self.g.gc.total();
        if emergency {
            self.g.gc.kind = GcKind::Emergency;
        }
        tracing::debug!(target: "lapis::gc", emergency, in_use = before, "full collection started");
        if self.g.gc.phase.keeps_invariant() {
            // discard the partial mark: sweep everything back to white
            self.g.enter_sweep();
        }
        let r = self
            .run_until(|p| p == GcPhase::Pause)
            .and_then(|_| self.run_until(|p| p != GcPhase::Pause))
            .and_then(|_| self.run_until(|p| p == GcPhase::CallFin))
            .and_then(|_| self.run_until(|p| p == GcPhase::Pause));
        self.g.gc.kind = GcKind::Normal;
        r?;
        self.g.set_pause();
        let after = self.g.gc.total();
        tracing::debug!(
            target: "lapis::gc",
            freed = before.saturating_sub(after),
            in_use = after,
            "full collection finished"
        );
        Ok(())
    }

    /// Run the `__gc` metamethod of the next object queued for
    /// finalization.
    fn call_one_finalizer(&mut self, propagate_errors: bool) -> Result<(), LuaError> {
        let Some(obj) = self.g.udata_to_finalize() else {
            return Ok(());
        };
        let Some(v) = TValue::from_gc_ref(obj, false) else {
            return Ok(());
        };
        let tm = self.g.tm_by_obj(v, Tm::Gc);
        if !tm.is_function() {
            return Ok(());
        }
        let old_allowhook = self.th.allowhook;
        let was_running = self.g.gc.running;
        self.th.allowhook = false;
        self.g.gc.running = false;
        let top = self.th.top;
        self.th.stack[top] = tm;
        self.th.stack[top + 1] = v;
        self.th.top = top + 2;
        self.th.ci.current_mut().set_is_fin(true);
        let status = self.pcall_raw(top, 0, |vm| vm.call_no_yield(top, 0));
        self.th.ci.current_mut().set_is_fin(false);
        self.th.allowhook = old_allowhook;
        self.g.gc.running = was_running;
        if status == Status::Ok {
            return Ok(());
        }
        let msg = match self.th.stack[top].as_string() {
            Some(s) => String::from_utf8_lossy(self.g.strings.get(s).as_bytes()).into_owned(),
            None => "no message".to_string(),
        };
        self.th.top = top;
        tracing::warn!(target: "lapis::gc", error = %msg, "finalizer failed");
        if !propagate_errors {
            return Ok(());
        }
        Err(match status {
            Status::ErrRun => LuaError::Runtime(format!("error in __gc metamethod ({msg})")),
            Status::ErrMem => LuaError::Memory,
            _ => LuaError::ErrorInHandler,
        })
    }

    /// Run a batch of pending finalizers, doubling the batch size each time
    /// the queue is not drained.
    fn run_a_few_finalizers(&mut self) -> Result<usize, LuaError> {
        let mut i = 0;
        while self.g.gc.tobefnz.is_some() && i < self.g.gc.finnum {
            self.call_one_finalizer(true)?;
            i += 1;
        }
        self.g.gc.finnum = if self.g.gc.tobefnz.is_none() {
            0
        } else {
            self.g.gc.finnum * 2
        };
        Ok(i)
    }

    /// Finalize every object with a finalizer, reachable or not. Used when
    /// the engine closes.
    pub(crate) fn call_all_pending_finalizers(&mut self) {
        self.g.separate_tobefnz(true);
        while self.g.gc.tobefnz.is_some() {
            let _ = self.call_one_finalizer(false);
        }
    }

    /// Control the collector.
    pub fn gc(&mut self, op: GcOp) -> Result<i32, LuaError> {
        let r = self.gc_raw(op);
        self.api(r)
    }

    fn gc_raw(&mut self, op: GcOp) -> Result<i32, LuaError> {
        Ok(match op {
            GcOp::Stop => {
                self.g.gc.running = false;
                0
            }
            GcOp::Restart => {
                self.g.gc.set_debt(0);
                self.g.gc.running = true;
                0
            }
            GcOp::Collect => {
                self.full_gc(false)?;
                0
            }
            GcOp::Count => (self.g.gc.total() >> 10) as i32,
            GcOp::CountB => (self.g.gc.total() & 0x3ff) as i32,
            GcOp::Step(data) => {
                let was_running = self.g.gc.running;
                self.g.gc.running = true;
                let mut debt: isize = 1;
                let r = if data == 0 {
                    self.g.gc.set_debt(-GCSTEPSIZE);
                    self.gc_step()
                } else {
                    debt = data as isize * 1024 + self.g.gc.debt;
                    self.g.gc.set_debt(debt);
                    self.check_gc()
                };
                self.g.gc.running = was_running;
                r?;
                i32::from(debt > 0 && self.g.gc.phase == GcPhase::Pause)
            }
            GcOp::SetPause(data) => std::mem::replace(&mut self.g.gc.pause, data),
            GcOp::SetStepMul(data) => {
                std::mem::replace(&mut self.g.gc.stepmul, data.max(crate::config::MIN_STEPMUL))
            }
            GcOp::IsRunning => i32::from(self.g.gc.running),
        })
    }
}
