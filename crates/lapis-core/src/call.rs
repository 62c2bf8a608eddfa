//! Calls, returns and protected execution.
//!
//! Errors travel as `Err(LuaError)` up to the nearest recovery boundary,
//! which is `raw_run_protected`. A protected call records the frame depth,
//! top and thread flags before running and restores them when an error
//! reaches it, leaving the error object where the called function was.

use crate::callinfo::{CallInfo, Continuation, FrameKind};
use crate::config::{MIN_STACK, MULTRET};
use crate::error::{LuaError, Status};
use crate::executor::Executor;
use crate::metamethod::Tm;
use crate::stack::Slot;
use crate::state::Vm;
use crate::value::{NativeFn, TValue};
use std::mem::size_of;
use std::rc::Rc;

impl Vm {
    // ---- recovery boundary ----

    /// Run `f` under a recovery boundary. Errors come back as `Err` with
    /// the native-call depth restored.
    pub(crate) fn raw_run_protected<T>(
        &mut self,
        f: impl FnOnce(&mut Vm) -> Result<T, LuaError>,
    ) -> Result<T, LuaError> {
        let old_n_ccalls = self.th.n_ccalls;
        self.th.error_jmp += 1;
        let r = f(self);
        self.th.error_jmp -= 1;
        if r.is_err() {
            self.th.n_ccalls = old_n_ccalls;
        }
        r
    }

    /// True if some active boundary will catch an error raised now.
    pub(crate) fn has_boundary(&self) -> bool {
        self.th.error_jmp > 0
            || self
                .callers
                .iter()
                .any(|&t| self.g.thread_state(t).error_jmp > 0)
    }

    /// Pass a host operation's result through. An error with no boundary
    /// to catch it is fatal: the panic callback runs and the process aborts.
    pub(crate) fn api<T>(&mut self, r: Result<T, LuaError>) -> Result<T, LuaError> {
        match r {
            Err(e) if !self.has_boundary() => self.panic_abort(e),
            r => r,
        }
    }

    fn panic_abort(&mut self, e: LuaError) -> ! {
        let obj = self.error_object(&e);
        if self.th.top < self.th.stack.len() {
            self.push_raw(obj);
        }
        tracing::error!(target: "lapis::api", error = %e, "unprotected error");
        if let Some(panicf) = self.g.panic {
            let _ = panicf(self);
        }
        std::process::abort()
    }

    /// The value an error leaves on the stack.
    pub(crate) fn error_object(&mut self, e: &LuaError) -> TValue {
        let mem = self.g.mem_err_msg.map_or(TValue::Nil, TValue::ShortStr);
        let msg: &[u8] = match e {
            LuaError::Memory => return mem,
            LuaError::Value(v) => return *v,
            LuaError::Yield => return TValue::Nil,
            LuaError::ErrorInHandler => b"error in error handling",
            LuaError::StackOverflow => b"stack overflow",
            LuaError::Runtime(m) | LuaError::Syntax(m) => m.as_bytes(),
        };
        self.new_string(msg).unwrap_or(mem)
    }

    /// Put the error object at `old_top` and make it the top value.
    pub(crate) fn set_error_obj(&mut self, old_top: usize, obj: TValue) {
        self.th.stack[old_top] = obj;
        self.th.top = old_top + 1;
    }

    /// Run the active message handler on a runtime error. A failing handler
    /// turns the error into an error in error handling.
    pub(crate) fn apply_handler(&mut self, e: LuaError) -> LuaError {
        let ef = self.th.errfunc;
        if ef == 0
            || !matches!(
                e,
                LuaError::Runtime(_) | LuaError::Value(_) | LuaError::StackOverflow
            )
        {
            return e;
        }
        let handler = self.th.stack[ef];
        let r = self.raw_run_protected(|vm| {
            vm.ensure_stack(2)?;
            let msg = vm.error_object(&e);
            let top = vm.th.top;
            vm.th.stack[top] = handler;
            vm.th.stack[top + 1] = msg;
            vm.th.top = top + 2;
            vm.call_value(top, 1)?;
            Ok(vm.th.stack[top])
        });
        match r {
            Ok(v) => LuaError::Value(v),
            Err(_) => LuaError::ErrorInHandler,
        }
    }

    /// Run `f` as a protected call. `old_top` is where the error object
    /// goes; `ef` is the stack slot of the message handler (0 for none).
    pub(crate) fn pcall_raw(
        &mut self,
        old_top: usize,
        ef: usize,
        f: impl FnOnce(&mut Vm) -> Result<(), LuaError>,
    ) -> Status {
        let old_ci = self.th.ci.depth();
        let old_allowhook = self.th.allowhook;
        let old_nny = self.th.nny;
        let old_errfunc = std::mem::replace(&mut self.th.errfunc, ef);
        let status = match self.raw_run_protected(f) {
            Ok(()) => Status::Ok,
            Err(e) => {
                let e = self.apply_handler(e);
                self.close_upvals(old_top);
                let obj = self.error_object(&e);
                self.set_error_obj(old_top, obj);
                self.th.ci.unwind_to(old_ci);
                self.th.allowhook = old_allowhook;
                self.th.nny = old_nny;
                self.g.shrink_stack(&mut self.th);
                e.status()
            }
        };
        self.th.errfunc = old_errfunc;
        status
    }

    // ---- calls ----

    /// Enter a fresh frame, charging a new one if none is spare.
    fn next_ci(&mut self) -> Result<&mut CallInfo, LuaError> {
        if self.th.ci.needs_extend() {
            self.reserve(0, size_of::<CallInfo>())?;
        }
        Ok(self.th.ci.push())
    }

    /// Call the value at `func` with the arguments above it. Results
    /// replace the function; `MULTRET` keeps them all and sets the top past
    /// them.
    pub(crate) fn call_value(&mut self, func: usize, nresults: i32) -> Result<(), LuaError> {
        self.th.n_ccalls += 1;
        let max = self.g.config.max_c_calls;
        if self.th.n_ccalls >= max {
            if self.th.n_ccalls == max {
                return Err(LuaError::runtime("C stack overflow"));
            } else if self.th.n_ccalls >= max + (max >> 3) {
                return Err(LuaError::ErrorInHandler);
            }
        }
        if !self.precall(func, nresults)? {
            self.run_script()?;
        }
        self.th.n_ccalls -= 1;
        Ok(())
    }

    /// Same as `call_value`, but the callee cannot yield.
    pub(crate) fn call_no_yield(&mut self, func: usize, nresults: i32) -> Result<(), LuaError> {
        self.th.nny += 1;
        self.call_value(func, nresults)?;
        self.th.nny -= 1;
        Ok(())
    }

    pub(crate) fn executor(&self) -> Result<Rc<dyn Executor>, LuaError> {
        self.g
            .executor
            .clone()
            .ok_or_else(|| LuaError::runtime("no executor installed"))
    }

    /// Hand the current script frame to the executor.
    pub(crate) fn run_script(&mut self) -> Result<(), LuaError> {
        self.th.ci.current_mut().set_is_fresh(true);
        self.executor()?.execute(self)
    }

    /// Prepare a call. A native function runs to completion here and
    /// `true` is returned; a script function gets its frame and `false`
    /// tells the caller to run the executor.
    pub(crate) fn precall(&mut self, func: usize, nresults: i32) -> Result<bool, LuaError> {
        match self.th.stack[func] {
            TValue::LightFunction(f) => self.precall_native(func, nresults, f),
            TValue::NativeClosure(c) => {
                let f = self.g.native_closures.get(c).func;
                self.precall_native(func, nresults, f)
            }
            TValue::LuaClosure(c) => {
                let p = self.g.lua_closures.get(c).proto;
                let (num_params, is_vararg, frame_size) = {
                    let proto = self.g.protos.get(p);
                    (
                        proto.num_params as usize,
                        proto.is_vararg,
                        proto.max_stack_size as usize,
                    )
                };
                self.ensure_stack_gc(frame_size.max(num_params))?;
                let mut n = self.th.top - func - 1;
                let base = if is_vararg {
                    self.adjust_varargs(num_params, n)
                } else {
                    while n < num_params {
                        self.push_raw(TValue::Nil);
                        n += 1;
                    }
                    func + 1
                };
                let ci = self.next_ci()?;
                ci.nresults = nresults;
                ci.func = func;
                ci.kind = FrameKind::Script { base, saved_pc: 0 };
                ci.top = base + frame_size;
                ci.set_is_lua(true);
                let top = ci.top;
                self.th.top = top;
                Ok(false)
            }
            _ => {
                self.ensure_stack_gc(1)?;
                self.try_func_tm(func)?;
                self.precall(func, nresults)
            }
        }
    }

    fn precall_native(&mut self, func: usize, nresults: i32, f: NativeFn) -> Result<bool, LuaError> {
        self.ensure_stack_gc(MIN_STACK)?;
        let top = self.native_frame_top();
        let ci = self.next_ci()?;
        ci.nresults = nresults;
        ci.func = func;
        ci.top = top;
        let n = f(self)?;
        debug_assert!(
            n <= self.th.top - (self.th.ci.current().func + 1),
            "not enough elements in the stack"
        );
        let first = self.th.top - n;
        self.poscall(first, n);
        Ok(true)
    }

    /// Move fixed parameters above the varargs. Returns the new base.
    fn adjust_varargs(&mut self, num_params: usize, actual: usize) -> usize {
        let fixed = self.th.top - actual;
        let base = self.th.top;
        let mut i = 0;
        while i < num_params && i < actual {
            let v = self.th.stack[fixed + i];
            self.push_raw(v);
            self.th.stack[fixed + i] = TValue::Nil;
            i += 1;
        }
        while i < num_params {
            self.push_raw(TValue::Nil);
            i += 1;
        }
        base
    }

    /// Insert the `__call` handler of a non-function below its arguments.
    fn try_func_tm(&mut self, func: usize) -> Result<(), LuaError> {
        let f = self.th.stack[func];
        let tm = self.g.tm_by_obj(f, Tm::Call);
        if tm.is_nil() {
            return Err(self.g.type_error(f, "call"));
        }
        let top = self.th.top;
        self.th.stack.copy_within(func..top, func + 1);
        self.th.top = top + 1;
        self.th.stack[func] = tm;
        Ok(())
    }

    /// Finish a call: pop the frame and move `n` results starting at
    /// `first` into place. Returns false for a variable result count.
    pub(crate) fn poscall(&mut self, first: usize, n: usize) -> bool {
        let (res, wanted) = {
            let ci = self.th.ci.current();
            (ci.func, ci.nresults)
        };
        self.th.ci.pop();
        self.move_results(first, res, n, wanted)
    }

    fn move_results(&mut self, first: usize, res: usize, n: usize, wanted: i32) -> bool {
        let stack = &mut self.th.stack;
        match wanted {
            0 => {}
            1 => {
                stack[res] = if n == 0 { TValue::Nil } else { stack[first] };
            }
            MULTRET => {
                stack.copy_within(first..first + n, res);
                self.th.top = res + n;
                return false;
            }
            w => {
                let w = w as usize;
                let copied = w.min(n);
                stack.copy_within(first..first + copied, res);
                for v in &mut stack[res + copied..res + w] {
                    *v = TValue::Nil;
                }
            }
        }
        self.th.top = res + wanted as usize;
        true
    }

    /// After a multi-result call from the API, keep the frame bound above
    /// the results.
    pub(crate) fn adjust_results(&mut self, nresults: i32) {
        let top = self.th.top;
        let ci = self.th.ci.current_mut();
        if nresults == MULTRET && ci.top < top {
            ci.top = top;
        }
    }

    pub(crate) fn set_continuation(&mut self, k: Continuation, old_errfunc: Option<usize>) {
        if let FrameKind::Native {
            k: slot,
            old_errfunc: saved,
        } = &mut self.th.ci.current_mut().kind
        {
            *slot = Some(k);
            if let Some(ef) = old_errfunc {
                *saved = ef;
            }
        }
    }

    fn call_target(&self, nargs: i32, nresults: i32) -> usize {
        debug_assert!(
            nargs >= 0 && nargs < self.get_top(),
            "not enough elements in the stack"
        );
        debug_assert!(
            nresults == MULTRET
                || self.th.ci.current().top as i64 - self.th.top as i64 >= i64::from(nresults - nargs),
            "results from function overflow current stack size"
        );
        self.th.top - (nargs as usize + 1)
    }

    // ---- host API ----

    /// Call the function below the top `nargs` values.
    pub fn call(&mut self, nargs: i32, nresults: i32) -> Result<(), LuaError> {
        self.call_k(nargs, nresults, None)
    }

    /// Call with a continuation. When the running thread can yield, a
    /// suspension inside the callee finishes this frame through `k`
    /// instead of returning here.
    pub fn call_k(
        &mut self,
        nargs: i32,
        nresults: i32,
        k: Option<Continuation>,
    ) -> Result<(), LuaError> {
        let r = self.call_k_raw(nargs, nresults, k);
        self.api(r)
    }

    fn call_k_raw(
        &mut self,
        nargs: i32,
        nresults: i32,
        k: Option<Continuation>,
    ) -> Result<(), LuaError> {
        debug_assert!(
            k.is_none() || !self.th.ci.current().is_lua(),
            "cannot use continuations inside hooks"
        );
        let func = self.call_target(nargs, nresults);
        match k {
            Some(k) if self.th.nny == 0 => {
                self.set_continuation(k, None);
                self.call_value(func, nresults)?;
            }
            _ => self.call_no_yield(func, nresults)?,
        }
        self.adjust_results(nresults);
        Ok(())
    }

    /// Protected call. `errfunc` is the stack index of a message handler,
    /// or 0. On error the function and arguments are replaced by the error
    /// object.
    pub fn pcall(&mut self, nargs: i32, nresults: i32, errfunc: i32) -> Status {
        let func = self.call_target(nargs, nresults);
        let ef = self.errfunc_slot(errfunc);
        let status = self.pcall_raw(func, ef, |vm| vm.call_no_yield(func, nresults));
        self.adjust_results(nresults);
        status
    }

    /// Protected call with a continuation. In a yieldable context errors
    /// are not caught here: they unwind to the resume boundary, which
    /// recovers at this frame and runs `k` with the error status. A yield
    /// also comes back as `Err(LuaError::Yield)` to be propagated.
    pub fn pcall_k(
        &mut self,
        nargs: i32,
        nresults: i32,
        errfunc: i32,
        k: Option<Continuation>,
    ) -> Result<Status, LuaError> {
        let func = self.call_target(nargs, nresults);
        let ef = self.errfunc_slot(errfunc);
        let k = match k {
            Some(k) if self.th.nny == 0 => k,
            _ => {
                let status = self.pcall_raw(func, ef, |vm| vm.call_no_yield(func, nresults));
                self.adjust_results(nresults);
                return Ok(status);
            }
        };
        let old_errfunc = self.th.errfunc;
        self.set_continuation(k, Some(old_errfunc));
        let allowhook = self.th.allowhook;
        let ci = self.th.ci.current_mut();
        ci.extra = func;
        ci.set_saved_allowhook(allowhook);
        ci.set_is_ypcall(true);
        self.th.errfunc = ef;
        let r = self.call_value(func, nresults);
        let r = self.api(r);
        r?;
        let ci = self.th.ci.current_mut();
        ci.set_is_ypcall(false);
        let old = ci.old_errfunc();
        self.th.errfunc = old;
        self.adjust_results(nresults);
        Ok(Status::Ok)
    }

    fn errfunc_slot(&self, errfunc: i32) -> usize {
        if errfunc == 0 {
            return 0;
        }
        match self.index2slot(errfunc) {
            Slot::Stack(i) => i,
            _ => {
                debug_assert!(false, "invalid message handler index");
                0
            }
        }
    }
}
