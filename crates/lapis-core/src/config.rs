//! Engine limits and collector tuning.

/// Hard ceiling on stack slots per thread.
pub const LUAI_MAXSTACK: usize = 1_000_000;
/// Slots kept free above `stack_last` for metamethod calls and error objects.
pub const EXTRA_STACK: usize = 5;
/// Free slots guaranteed to every native function on entry.
pub const MIN_STACK: usize = 20;
/// Pseudo-index of the registry.
pub const REGISTRY_INDEX: i32 = -(LUAI_MAXSTACK as i32) - 1000;
/// Maximum upvalues of a native closure.
pub const MAX_UPVAL: usize = 255;
/// "Return every result" marker for `nresults`.
pub const MULTRET: i32 = -1;
/// Registry slot of the main thread.
pub const RIDX_MAINTHREAD: i64 = 1;
/// Registry slot of the globals table.
pub const RIDX_GLOBALS: i64 = 2;
/// Minimum accepted step multiplier.
pub const MIN_STEPMUL: i32 = 40;
/// Version number reported by `Vm::version`.
pub const VERSION_NUM: f64 = 503.0;

/// Pseudo-index of upvalue `i` (1-based) of the running native closure.
#[inline]
pub const fn upvalue_index(i: i32) -> i32 {
    REGISTRY_INDEX - i
}

/// Host-tunable engine settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum stack slots per thread (clamped to `LUAI_MAXSTACK`).
    pub max_stack: usize,
    /// Maximum nesting of native calls before "C stack overflow".
    pub max_c_calls: u16,
    /// Collector pause, in percent of the live size after a cycle.
    pub gc_pause: i32,
    /// Collector speed relative to allocation.
    pub gc_stepmul: i32,
    /// Stack slots allocated for a new thread.
    pub initial_stack: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_stack: LUAI_MAXSTACK,
            max_c_calls: 200,
            gc_pause: 200,
            gc_stepmul: 200,
            initial_stack: 2 * MIN_STACK,
        }
    }
}

impl EngineConfig {
    /// Limits with out-of-range values pulled back into range.
    pub fn normalized(mut self) -> Self {
        self.max_stack = self.max_stack.clamp(2 * MIN_STACK, LUAI_MAXSTACK);
        self.initial_stack = self.initial_stack.clamp(2 * MIN_STACK, self.max_stack);
        self.max_c_calls = self.max_c_calls.max(8);
        self.gc_stepmul = self.gc_stepmul.max(MIN_STEPMUL);
        self.gc_pause = self.gc_pause.max(0);
        self
    }
}
