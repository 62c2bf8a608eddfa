//! Call frames and the reusable frame chain.

use crate::error::{LuaError, Status};
use crate::state::Vm;

/// A stored continuation: called instead of returning into a native
/// function whose callee suspended or failed inside a yieldable protected
/// call. Receives `Status::Yield` on a plain resumption, or the error status
/// when recovering from an error.
pub type Continuation = Box<dyn FnOnce(&mut Vm, Status) -> Result<usize, LuaError>>;

// Flags for CallInfo::status
/// Saved value of the thread's allow-hook flag.
const CIST_OAH: u16 = 1 << 0;
/// Frame runs a script function.
const CIST_LUA: u16 = 1 << 1;
/// Frame runs a debug hook.
const CIST_HOOKED: u16 = 1 << 2;
/// Frame was entered by a fresh executor invocation.
const CIST_FRESH: u16 = 1 << 3;
/// Frame is doing a yieldable protected call.
const CIST_YPCALL: u16 = 1 << 4;
/// Frame was tail-called.
const CIST_TAIL: u16 = 1 << 5;
/// Last hook called yielded.
const CIST_HOOKYIELD: u16 = 1 << 6;
/// Emulating `a <= b` through `not (b < a)`.
const CIST_LEQ: u16 = 1 << 7;
/// Frame is running a finalizer.
const CIST_FIN: u16 = 1 << 8;

/// Per-kind frame data.
pub enum FrameKind {
    Script {
        base: usize,
        saved_pc: usize,
    },
    Native {
        k: Option<Continuation>,
        old_errfunc: usize,
    },
}

impl std::fmt::Debug for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameKind::Script { base, saved_pc } => f
                .debug_struct("Script")
                .field("base", base)
                .field("saved_pc", saved_pc)
                .finish(),
            FrameKind::Native { k, old_errfunc } => f
                .debug_struct("Native")
                .field("k", &k.is_some())
                .field("old_errfunc", old_errfunc)
                .finish(),
        }
    }
}

/// A call frame.
#[derive(Debug)]
pub struct CallInfo {
    /// Stack slot of the called function.
    pub func: usize,
    /// Top bound for this frame.
    pub top: usize,
    pub kind: FrameKind,
    /// Saved function slot while suspended, or the pre-call top of a
    /// yieldable protected call.
    pub extra: usize,
    /// Expected number of results (-1 = multi-return).
    pub nresults: i32,
    status: u16,
}

impl CallInfo {
    pub fn new_native(func: usize, top: usize, nresults: i32) -> Self {
        CallInfo {
            func,
            top,
            kind: FrameKind::Native {
                k: None,
                old_errfunc: 0,
            },
            extra: 0,
            nresults,
            status: 0,
        }
    }

    /// Re-initialize a reused frame.
    fn reset(&mut self) {
        self.func = 0;
        self.top = 0;
        self.kind = FrameKind::Native {
            k: None,
            old_errfunc: 0,
        };
        self.extra = 0;
        self.nresults = 0;
        self.status = 0;
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        self.status & CIST_LUA != 0
    }

    #[inline(always)]
    pub fn set_is_lua(&mut self, v: bool) {
        self.set_flag(CIST_LUA, v);
    }

    #[inline(always)]
    pub fn is_hooked(&self) -> bool {
        self.status & CIST_HOOKED != 0
    }

    #[inline(always)]
    pub fn is_fresh(&self) -> bool {
        self.status & CIST_FRESH != 0
    }

    #[inline(always)]
    pub fn set_is_fresh(&mut self, v: bool) {
        self.set_flag(CIST_FRESH, v);
    }

    #[inline(always)]
    pub fn is_ypcall(&self) -> bool {
        self.status & CIST_YPCALL != 0
    }

    #[inline(always)]
    pub fn set_is_ypcall(&mut self, v: bool) {
        self.set_flag(CIST_YPCALL, v);
    }

    #[inline(always)]
    pub fn is_tail(&self) -> bool {
        self.status & CIST_TAIL != 0
    }

    #[inline(always)]
    pub fn set_is_tail(&mut self, v: bool) {
        self.set_flag(CIST_TAIL, v);
    }

    #[inline(always)]
    pub fn is_hook_yield(&self) -> bool {
        self.status & CIST_HOOKYIELD != 0
    }

    #[inline(always)]
    pub fn is_leq(&self) -> bool {
        self.status & CIST_LEQ != 0
    }

    #[inline(always)]
    pub fn set_is_leq(&mut self, v: bool) {
        self.set_flag(CIST_LEQ, v);
    }

    #[inline(always)]
    pub fn is_fin(&self) -> bool {
        self.status & CIST_FIN != 0
    }

    #[inline(always)]
    pub fn set_is_fin(&mut self, v: bool) {
        self.set_flag(CIST_FIN, v);
    }

    /// Allow-hook flag saved when a yieldable protected call started.
    #[inline(always)]
    pub fn saved_allowhook(&self) -> bool {
        self.status & CIST_OAH != 0
    }

    #[inline(always)]
    pub fn set_saved_allowhook(&mut self, v: bool) {
        self.set_flag(CIST_OAH, v);
    }

    #[inline(always)]
    fn set_flag(&mut self, flag: u16, v: bool) {
        if v {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    /// Base register of a script frame.
    pub fn base(&self) -> Option<usize> {
        match self.kind {
            FrameKind::Script { base, .. } => Some(base),
            FrameKind::Native { .. } => None,
        }
    }

    /// Take the stored continuation, leaving none behind.
    pub fn take_continuation(&mut self) -> Option<Continuation> {
        match &mut self.kind {
            FrameKind::Native { k, .. } => k.take(),
            FrameKind::Script { .. } => None,
        }
    }

    pub fn has_continuation(&self) -> bool {
        matches!(&self.kind, FrameKind::Native { k: Some(_), .. })
    }

    /// Error-handler index saved by a yieldable protected call.
    pub fn old_errfunc(&self) -> usize {
        match self.kind {
            FrameKind::Native { old_errfunc, .. } => old_errfunc,
            FrameKind::Script { .. } => 0,
        }
    }
}

/// The frame chain of one thread: a vector whose prefix `0..=current` is
/// the live call stack. Frames above `current` are kept for reuse.
#[derive(Debug)]
pub struct CallChain {
    frames: Vec<CallInfo>,
    current: usize,
}

impl CallChain {
    /// A chain holding only the base frame.
    pub fn new(base: CallInfo) -> Self {
        CallChain {
            frames: vec![base],
            current: 0,
        }
    }

    #[inline]
    pub fn current(&self) -> &CallInfo {
        &self.frames[self.current]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut CallInfo {
        &mut self.frames[self.current]
    }

    /// Index of the current frame (0 = base frame).
    #[inline]
    pub fn depth(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn at(&self, depth: usize) -> &CallInfo {
        &self.frames[depth]
    }

    #[inline]
    pub fn at_mut(&mut self, depth: usize) -> &mut CallInfo {
        &mut self.frames[depth]
    }

    #[inline]
    pub fn is_base(&self) -> bool {
        self.current == 0
    }

    /// Number of allocated frames, live or reusable.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.frames.len()
    }

    /// True if entering one more frame needs a new allocation.
    #[inline]
    pub fn needs_extend(&self) -> bool {
        self.current + 1 == self.frames.len()
    }

    /// Enter a new frame, reusing a spare one when available.
    pub fn push(&mut self) -> &mut CallInfo {
        self.current += 1;
        if self.current == self.frames.len() {
            self.frames.push(CallInfo::new_native(0, 0, 0));
        } else {
            self.frames[self.current].reset();
        }
        &mut self.frames[self.current]
    }

    /// Return to the previous frame. The popped frame stays allocated.
    pub fn pop(&mut self) {
        debug_assert!(self.current > 0, "cannot pop the base frame");
        self.current -= 1;
    }

    /// Unwind to a saved depth.
    pub fn unwind_to(&mut self, depth: usize) {
        debug_assert!(depth <= self.current);
        self.current = depth;
    }

    /// Innermost live frame matching the predicate.
    pub fn find_from_top<F>(&self, pred: F) -> Option<usize>
    where
        F: Fn(&CallInfo) -> bool,
    {
        (0..=self.current).rev().find(|&i| pred(&self.frames[i]))
    }

    /// Free every other spare frame. Returns how many frames were freed.
    pub fn shrink(&mut self) -> usize {
        let spare = self.frames.len() - self.current - 1;
        let keep = spare / 2;
        let freed = spare - keep;
        self.frames.truncate(self.current + 1 + keep);
        freed
    }

    /// Free all spare frames. Returns how many frames were freed.
    pub fn free_spare(&mut self) -> usize {
        let freed = self.frames.len() - self.current - 1;
        self.frames.truncate(self.current + 1);
        freed
    }

    /// Live frames, base first.
    pub fn live(&self) -> &[CallInfo] {
        &self.frames[..=self.current]
    }
}
