//! Engine-wide state, per-thread state and the `Vm` handle.

use crate::callinfo::{CallChain, CallInfo};
use crate::config::{EngineConfig, EXTRA_STACK, MIN_STACK, RIDX_GLOBALS, RIDX_MAINTHREAD, VERSION_NUM};
use crate::error::{LuaError, Status};
use crate::executor::{ChunkCodec, Executor};
use crate::func::{UpvalId, UpvalSlab};
use crate::gc::{Arena, GcHeader, GcIdx, GcRef};
use crate::heap::{Allocator, DefaultAllocator, GcState};
use crate::metamethod::TM_NAMES;
use crate::object::{LuaClosure, NativeClosure, Proto, Userdata, NUM_TYPES};
use crate::string::{make_seed, LuaString, StringCache, StringTable};
use crate::table::Table;
use crate::value::{NativeFn, TValue};
use std::mem::size_of;
use std::rc::Rc;

/// Execution state of one thread: its stack, frames and open upvalues.
#[derive(Debug)]
pub struct LuaThread {
    pub(crate) stack: Vec<TValue>,
    /// First free slot.
    pub(crate) top: usize,
    pub(crate) ci: CallChain,
    pub(crate) status: Status,
    /// Number of non-yieldable calls in progress.
    pub(crate) nny: u16,
    /// Number of nested native calls.
    pub(crate) n_ccalls: u16,
    /// Open upvalue cells of this stack, highest slot first.
    pub(crate) open_upvals: Vec<UpvalId>,
    /// Stack slot of the current message handler (0 = none).
    pub(crate) errfunc: usize,
    /// Number of active recovery boundaries.
    pub(crate) error_jmp: u32,
    pub(crate) allowhook: bool,
}

impl LuaThread {
    /// A thread with no stack yet.
    pub(crate) fn new() -> Self {
        LuaThread {
            stack: Vec::new(),
            top: 0,
            ci: CallChain::new(CallInfo::new_native(0, 0, 0)),
            status: Status::Ok,
            nny: 1,
            n_ccalls: 0,
            open_upvals: Vec::new(),
            errfunc: 0,
            error_jmp: 0,
            allowhook: true,
        }
    }

    /// Last usable slot; `EXTRA_STACK` slots above it stay free.
    #[inline]
    pub(crate) fn stack_last(&self) -> usize {
        self.stack.len().saturating_sub(EXTRA_STACK)
    }

    /// Bytes held by the stack and the frame chain.
    pub(crate) fn mem_size(&self) -> usize {
        self.stack.len() * size_of::<TValue>() + self.ci.allocated() * size_of::<CallInfo>()
    }

    /// The thread can suspend.
    #[inline]
    pub(crate) fn is_yieldable(&self) -> bool {
        self.nny == 0
    }
}

/// A thread object on the heap. The state of the running thread is checked
/// out into the `Vm` and this slot holds `None` meanwhile.
#[derive(Debug)]
pub struct ThreadObj {
    pub(crate) state: Option<Box<LuaThread>>,
}

/// State shared by all threads of one engine.
pub struct GlobalState {
    pub(crate) strings: Arena<LuaString>,
    pub(crate) tables: Arena<Table>,
    pub(crate) lua_closures: Arena<LuaClosure>,
    pub(crate) native_closures: Arena<NativeClosure>,
    pub(crate) userdata: Arena<Userdata>,
    pub(crate) threads: Arena<ThreadObj>,
    pub(crate) protos: Arena<Proto>,
    pub(crate) upvals: UpvalSlab,
    pub(crate) strt: StringTable,
    pub(crate) strcache: StringCache,
    pub(crate) allocator: Box<dyn Allocator>,
    pub(crate) gc: GcState,
    pub(crate) seed: u32,
    pub(crate) registry: TValue,
    /// Metatables of the basic non-table, non-userdata types.
    pub(crate) mt: [Option<GcIdx<Table>>; NUM_TYPES],
    pub(crate) tm_names: Vec<GcIdx<LuaString>>,
    pub(crate) mem_err_msg: Option<GcIdx<LuaString>>,
    pub(crate) main_thread: GcIdx<ThreadObj>,
    pub(crate) panic: Option<NativeFn>,
    pub(crate) config: EngineConfig,
    pub(crate) executor: Option<Rc<dyn Executor>>,
    pub(crate) codec: Option<Rc<dyn ChunkCodec>>,
    /// The engine finished building itself.
    pub(crate) complete: bool,
}

impl GlobalState {
    pub(crate) fn thread_state(&self, t: GcIdx<ThreadObj>) -> &LuaThread {
        self.threads
            .get(t)
            .state
            .as_deref()
            .expect("thread state is checked out")
    }

    pub(crate) fn thread_state_mut(&mut self, t: GcIdx<ThreadObj>) -> &mut LuaThread {
        self.threads
            .get_mut(t)
            .state
            .as_deref_mut()
            .expect("thread state is checked out")
    }

    /// Globals table stored in the registry.
    pub(crate) fn globals(&self) -> TValue {
        match self.registry {
            TValue::Table(r) => self.tables.get(r).get_int(RIDX_GLOBALS),
            _ => TValue::Nil,
        }
    }
}

/// An engine instance and its running thread.
///
/// All host operations act on the running thread. Holding `&mut Vm` is the
/// single-mutator boundary: the engine has no internal parallelism.
pub struct Vm {
    pub(crate) g: GlobalState,
    pub(crate) th: Box<LuaThread>,
    pub(crate) running: GcIdx<ThreadObj>,
    /// Threads suspended by `with_thread`, innermost last. Collector roots.
    pub(crate) callers: Vec<GcIdx<ThreadObj>>,
}

impl Vm {
    /// An engine with the default limits and an unbounded allocator.
    pub fn new() -> Vm {
        Vm::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Vm {
        match Vm::with_allocator(config, Box::new(DefaultAllocator)) {
            Some(vm) => vm,
            None => unreachable!("the default allocator never refuses"),
        }
    }

    /// Build an engine on a host allocator. Returns `None` if the allocator
    /// refuses the initial state.
    pub fn with_allocator(config: EngineConfig, mut allocator: Box<dyn Allocator>) -> Option<Vm> {
        let config = config.normalized();
        let base = size_of::<GlobalState>();
        if !allocator.realloc(0, base) {
            return None;
        }
        let mut gc = GcState::new(config.gc_pause, config.gc_stepmul);
        gc.total_bytes = base;
        let mut threads = Arena::new();
        // the main thread is never linked into a collector list
        let main_size = size_of::<ThreadObj>() + size_of::<LuaThread>();
        let main_thread = threads.insert(
            GcHeader::new(gc.current_white, None, main_size),
            ThreadObj { state: None },
        );
        let g = GlobalState {
            strings: Arena::new(),
            tables: Arena::new(),
            lua_closures: Arena::new(),
            native_closures: Arena::new(),
            userdata: Arena::new(),
            threads,
            protos: Arena::new(),
            upvals: UpvalSlab::new(),
            strt: StringTable::new(),
            strcache: StringCache::new(),
            allocator,
            gc,
            seed: make_seed(),
            registry: TValue::Nil,
            mt: [None; NUM_TYPES],
            tm_names: Vec::with_capacity(TM_NAMES.len()),
            mem_err_msg: None,
            main_thread,
            panic: None,
            config,
            executor: None,
            codec: None,
            complete: false,
        };
        let mut vm = Vm {
            g,
            th: Box::new(LuaThread::new()),
            running: main_thread,
            callers: Vec::new(),
        };
        if vm.g.allocator.realloc(0, main_size) {
            vm.g.gc.total_bytes += main_size;
        } else {
            return None;
        }
        if let Err(e) = vm.open() {
            tracing::debug!(target: "lapis::api", error = %e, "engine construction failed");
            return None;
        }
        vm.g.complete = true;
        vm.g.gc.running = true;
        Some(vm)
    }

    /// Build the main stack, the registry and the fixed strings.
    fn open(&mut self) -> Result<(), LuaError> {
        let mut th = std::mem::replace(&mut self.th, Box::new(LuaThread::new()));
        let r = self.init_stack(&mut th);
        self.th = th;
        r?;
        let reg = self.new_table(2, 0)?;
        self.g.registry = TValue::Table(reg);
        let main = TValue::Thread(self.g.main_thread);
        self.registry_set_int(reg, RIDX_MAINTHREAD, main)?;
        let globals = self.new_table(0, 0)?;
        self.registry_set_int(reg, RIDX_GLOBALS, TValue::Table(globals))?;
        if let Some(id) = self.new_string(b"not enough memory")?.as_string() {
            self.g.fix_object(GcRef::String(id));
            self.g.mem_err_msg = Some(id);
        }
        for name in TM_NAMES {
            if let Some(id) = self.new_string(name.as_bytes())?.as_string() {
                self.g.fix_object(GcRef::String(id));
                self.g.tm_names.push(id);
            }
        }
        Ok(())
    }

    fn registry_set_int(&mut self, reg: GcIdx<Table>, k: i64, v: TValue) -> Result<(), LuaError> {
        let projected = self.g.tables.get(reg).size_after_insert(&crate::table::TableKey::Integer(k));
        self.reserve_table(reg, projected)?;
        self.g.tables.get_mut(reg).set_int(k, v);
        self.sync_table_size(reg)
    }

    /// Allocate the initial stack and base frame of a thread.
    pub(crate) fn init_stack(&mut self, th: &mut LuaThread) -> Result<(), LuaError> {
        let size = self.g.config.initial_stack;
        self.reserve(0, size * size_of::<TValue>() + size_of::<CallInfo>())?;
        th.stack = vec![TValue::Nil; size];
        // slot 0 is the "function" entry of the base frame
        th.top = 1;
        th.ci = CallChain::new(CallInfo::new_native(0, 1 + MIN_STACK, 0));
        Ok(())
    }

    /// Create a new thread sharing this engine's global state and push it.
    pub fn new_thread(&mut self) -> Result<GcIdx<ThreadObj>, LuaError> {
        let r = self.new_thread_raw();
        self.api(r)
    }

    fn new_thread_raw(&mut self) -> Result<GcIdx<ThreadObj>, LuaError> {
        self.check_gc()?;
        let t = self.new_thread_obj(LuaThread::new())?;
        self.push_raw(TValue::Thread(t));
        let mut th = self
            .g
            .threads
            .get_mut(t)
            .state
            .take()
            .expect("new thread has a state");
        let r = self.init_stack(&mut th);
        th.allowhook = self.th.allowhook;
        self.g.threads.get_mut(t).state = Some(th);
        r.map(|_| t)
    }

    /// Make `thread` the running thread while `f` runs. The previous
    /// running thread is kept alive as a collector root meanwhile.
    pub fn with_thread<R>(&mut self, thread: GcIdx<ThreadObj>, f: impl FnOnce(&mut Vm) -> R) -> R {
        if thread == self.running {
            return f(self);
        }
        let target = self
            .g
            .threads
            .get_mut(thread)
            .state
            .take()
            .expect("thread is already running");
        let prev = std::mem::replace(&mut self.th, target);
        self.g.threads.get_mut(self.running).state = Some(prev);
        self.callers.push(self.running);
        self.running = thread;

        let r = f(self);

        let back = self.callers.pop().expect("caller stack underflow");
        let prev = self
            .g
            .threads
            .get_mut(back)
            .state
            .take()
            .expect("caller state is missing");
        let cur = std::mem::replace(&mut self.th, prev);
        self.g.threads.get_mut(thread).state = Some(cur);
        self.running = back;
        r
    }

    /// Handle of the running thread.
    pub fn running_thread(&self) -> GcIdx<ThreadObj> {
        self.running
    }

    pub fn main_thread(&self) -> GcIdx<ThreadObj> {
        self.g.main_thread
    }

    /// Install the callback run before aborting on an unprotected error.
    /// Returns the previous one.
    pub fn at_panic(&mut self, panicf: Option<NativeFn>) -> Option<NativeFn> {
        std::mem::replace(&mut self.g.panic, panicf)
    }

    pub fn allocator_mut(&mut self) -> &mut dyn Allocator {
        self.g.allocator.as_mut()
    }

    /// Replace the allocator. The new allocator inherits the blocks the
    /// old one approved.
    pub fn set_allocator(&mut self, allocator: Box<dyn Allocator>) -> Box<dyn Allocator> {
        std::mem::replace(&mut self.g.allocator, allocator)
    }

    pub fn set_executor(&mut self, executor: Rc<dyn Executor>) {
        self.g.executor = Some(executor);
    }

    pub fn set_codec(&mut self, codec: Rc<dyn ChunkCodec>) {
        self.g.codec = Some(codec);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.g.config
    }

    pub fn version(&self) -> f64 {
        VERSION_NUM
    }

    /// Status of the running thread.
    pub fn status(&self) -> Status {
        self.th.status
    }

    /// Whether the running thread can suspend.
    pub fn is_yieldable(&self) -> bool {
        self.th.is_yieldable()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        if !self.g.complete {
            return;
        }
        self.close_upvals(0);
        self.call_all_pending_finalizers();
        tracing::debug!(
            target: "lapis::gc",
            in_use = self.g.gc.total(),
            "engine closed"
        );
    }
}
