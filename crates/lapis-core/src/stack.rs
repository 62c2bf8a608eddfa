//! Stack slots, index resolution and the stack-manipulation API.
//!
//! Positive indices count from the current frame's function slot, negative
//! ones from the top. Pseudo-indices at and below `REGISTRY_INDEX` name the
//! registry and the upvalues of the running native closure.

use crate::config::{EXTRA_STACK, MIN_STACK, REGISTRY_INDEX};
use crate::error::LuaError;
use crate::gc::{GcIdx, GcRef};
use crate::object::NativeClosure;
use crate::state::{ThreadObj, Vm};
use crate::value::TValue;
use std::mem::size_of;

/// Extra slots granted on overflow so the error can be handled.
const ERROR_STACK_EXTRA: usize = 200;

/// Where an API index points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    Stack(usize),
    Registry,
    /// Upvalue `n` (0-based) of a native closure.
    Upvalue(GcIdx<NativeClosure>, usize),
    /// Acceptable but empty index.
    Invalid,
}

#[inline]
fn is_pseudo(idx: i32) -> bool {
    idx <= REGISTRY_INDEX
}

impl Vm {
    pub(crate) fn index2slot(&self, idx: i32) -> Slot {
        let ci = self.th.ci.current();
        let func = ci.func;
        if idx > 0 {
            debug_assert!(idx as usize <= ci.top - (func + 1), "unacceptable index");
            let o = func + idx as usize;
            if o >= self.th.top {
                Slot::Invalid
            } else {
                Slot::Stack(o)
            }
        } else if !is_pseudo(idx) {
            let depth = idx.unsigned_abs() as usize;
            debug_assert!(idx != 0, "invalid index 0");
            if idx == 0 || depth > self.th.top - (func + 1) {
                Slot::Invalid
            } else {
                Slot::Stack(self.th.top - depth)
            }
        } else if idx == REGISTRY_INDEX {
            Slot::Registry
        } else {
            let n = (REGISTRY_INDEX - idx) as usize;
            match self.th.stack[func] {
                TValue::NativeClosure(c) if n <= self.g.native_closures.get(c).upvalues.len() => {
                    Slot::Upvalue(c, n - 1)
                }
                // light functions have no upvalues
                _ => Slot::Invalid,
            }
        }
    }

    #[inline]
    pub(crate) fn slot_value(&self, slot: Slot) -> TValue {
        match slot {
            Slot::Stack(i) => self.th.stack[i],
            Slot::Registry => self.g.registry,
            Slot::Upvalue(c, n) => self.g.native_closures.get(c).upvalues[n],
            Slot::Invalid => TValue::Nil,
        }
    }

    /// Value at an API index; nil for an empty index.
    #[inline]
    pub(crate) fn index_to_value(&self, idx: i32) -> TValue {
        self.slot_value(self.index2slot(idx))
    }

    /// Copy of the value at `idx`; nil for an invalid index.
    pub fn value_at(&self, idx: i32) -> TValue {
        self.index_to_value(idx)
    }

    pub(crate) fn set_slot(&mut self, slot: Slot, v: TValue) {
        match slot {
            Slot::Stack(i) => self.th.stack[i] = v,
            Slot::Registry => self.g.registry = v,
            Slot::Upvalue(c, n) => {
                self.g.native_closures.get_mut(c).upvalues[n] = v;
                self.g.barrier(GcRef::NativeClosure(c), v);
            }
            Slot::Invalid => debug_assert!(false, "write to an invalid index"),
        }
    }

    /// Stack slot of an index that must name a live stack entry.
    pub(crate) fn stack_slot(&self, idx: i32) -> usize {
        match self.index2slot(idx) {
            Slot::Stack(i) => i,
            other => panic!("index {idx} does not name a stack slot ({other:?})"),
        }
    }

    /// Push without checking the frame's bound.
    #[inline]
    pub(crate) fn push_raw(&mut self, v: TValue) {
        let top = self.th.top;
        self.th.stack[top] = v;
        self.th.top = top + 1;
    }

    /// Push from the API: the frame must have room.
    #[inline]
    pub(crate) fn api_push(&mut self, v: TValue) {
        debug_assert!(self.th.top < self.th.ci.current().top, "stack overflow");
        self.push_raw(v);
    }

    // ---- growth ----

    fn realloc_stack(&mut self, new_size: usize) -> Result<(), LuaError> {
        let old = self.th.stack.len();
        self.reserve(old * size_of::<TValue>(), new_size * size_of::<TValue>())?;
        self.th.stack.resize(new_size, TValue::Nil);
        tracing::trace!(target: "lapis::stack", old, new = new_size, "stack resized");
        Ok(())
    }

    /// Grow the stack so that `n` more slots fit above the top.
    pub(crate) fn grow_stack(&mut self, n: usize) -> Result<(), LuaError> {
        let size = self.th.stack.len();
        let max = self.g.config.max_stack;
        if size > max {
            // already using the overflow allowance
            return Err(LuaError::ErrorInHandler);
        }
        let needed = self.th.top + n + EXTRA_STACK;
        let new_size = (2 * size).min(max).max(needed);
        if new_size > max {
            self.realloc_stack(max + ERROR_STACK_EXTRA)?;
            tracing::debug!(target: "lapis::stack", max, needed, "stack overflow");
            return Err(LuaError::StackOverflow);
        }
        self.realloc_stack(new_size)
    }

    /// Make sure `n` slots are free above the top.
    #[inline]
    pub(crate) fn ensure_stack(&mut self, n: usize) -> Result<(), LuaError> {
        if self.th.stack_last() <= self.th.top + n {
            self.grow_stack(n)?;
        }
        Ok(())
    }

    /// Like `ensure_stack`, giving the collector a chance to run first.
    pub(crate) fn ensure_stack_gc(&mut self, n: usize) -> Result<(), LuaError> {
        if self.th.stack_last() <= self.th.top + n {
            self.check_gc()?;
            self.grow_stack(n)?;
        }
        Ok(())
    }

    // ---- stack API ----

    /// Convert a relative index into an absolute one. Pseudo-indices are
    /// returned unchanged.
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 || is_pseudo(idx) {
            idx
        } else {
            (self.th.top - self.th.ci.current().func) as i32 + idx
        }
    }

    /// Number of values in the current frame.
    pub fn get_top(&self) -> i32 {
        (self.th.top - (self.th.ci.current().func + 1)) as i32
    }

    /// Set the top. Growing fills the new slots with nil.
    pub fn set_top(&mut self, idx: i32) {
        let func = self.th.ci.current().func;
        if idx >= 0 {
            let new_top = func + 1 + idx as usize;
            debug_assert!(new_top <= self.th.stack_last(), "new top too large");
            while self.th.top < new_top {
                self.push_raw(TValue::Nil);
            }
            self.th.top = new_top;
        } else {
            let drop = (-(idx + 1)) as usize;
            debug_assert!(drop <= self.th.top - (func + 1), "invalid new top");
            self.th.top -= drop;
        }
    }

    #[inline]
    pub fn pop(&mut self, n: i32) {
        self.set_top(-n - 1);
    }

    /// Push a copy of the value at `idx`.
    pub fn push_value(&mut self, idx: i32) {
        let v = self.index_to_value(idx);
        self.api_push(v);
    }

    /// Rotate the values from `idx` to the top `n` positions towards the
    /// top (away from it for negative `n`).
    pub fn rotate(&mut self, idx: i32, n: i32) {
        let start = self.stack_slot(idx);
        let end = self.th.top;
        let seg = &mut self.th.stack[start..end];
        debug_assert!(n.unsigned_abs() as usize <= seg.len(), "invalid rotation");
        if seg.is_empty() {
            return;
        }
        let k = n.unsigned_abs() as usize % seg.len();
        if n >= 0 {
            seg.rotate_right(k);
        } else {
            seg.rotate_left(k);
        }
    }

    /// Move the top value into position `idx`, shifting up the values above.
    pub fn insert(&mut self, idx: i32) {
        self.rotate(idx, 1);
    }

    /// Remove the value at `idx`, shifting down the values above.
    pub fn remove(&mut self, idx: i32) {
        self.rotate(idx, -1);
        self.pop(1);
    }

    /// Pop the top value into position `idx`.
    pub fn replace(&mut self, idx: i32) {
        self.copy(-1, idx);
        self.pop(1);
    }

    /// Copy the value at `from` into `to` without shifting anything.
    pub fn copy(&mut self, from: i32, to: i32) {
        let v = self.index_to_value(from);
        let slot = self.index2slot(to);
        self.set_slot(slot, v);
    }

    /// Ensure room for `n` more values. Returns false if the stack cannot
    /// grow that far.
    pub fn check_stack(&mut self, n: i32) -> bool {
        let n = n.max(0) as usize;
        let ok = if self.th.stack_last() > self.th.top + n {
            true
        } else {
            let in_use = self.th.top + EXTRA_STACK;
            if in_use + n > self.g.config.max_stack {
                false
            } else {
                self.raw_run_protected(|vm| vm.grow_stack(n)).is_ok()
            }
        };
        if ok {
            let want = self.th.top + n;
            let ci = self.th.ci.current_mut();
            if ci.top < want {
                ci.top = want;
            }
        }
        ok
    }

    /// Pop `n` values from the running thread and push them onto `to`.
    pub fn xmove(&mut self, to: GcIdx<ThreadObj>, n: i32) {
        if to == self.running || n <= 0 {
            return;
        }
        let n = n as usize;
        debug_assert!(n <= self.th.top - (self.th.ci.current().func + 1), "not enough elements");
        let from = self.th.top - n;
        let values: Vec<TValue> = self.th.stack[from..self.th.top].to_vec();
        self.th.top = from;
        let dest = self.g.thread_state_mut(to);
        debug_assert!(dest.top + n <= dest.ci.current().top, "stack overflow");
        for v in values {
            let top = dest.top;
            dest.stack[top] = v;
            dest.top = top + 1;
        }
    }

    /// Room guaranteed to a native function on entry.
    #[inline]
    pub(crate) fn native_frame_top(&self) -> usize {
        self.th.top + MIN_STACK
    }
}
