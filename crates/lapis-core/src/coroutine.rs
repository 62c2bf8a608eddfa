//! Suspend and resume.
//!
//! A suspension unwinds the Rust stack as `Err(LuaError::Yield)` up to the
//! resume boundary while the frame chain stays in place. Resuming finishes
//! the interrupted native frames through their stored continuations and
//! hands interrupted script frames back to the executor.

use crate::callinfo::Continuation;
use crate::config::MULTRET;
use crate::error::{LuaError, Status};
use crate::gc::GcIdx;
use crate::state::{ThreadObj, Vm};
use crate::value::TValue;

impl Vm {
    /// Start or continue `co` with the `nargs` values on top of its stack.
    /// On `Ok` or `Yield` the results (or yielded values) are on top of
    /// `co`'s stack; on an error the thread is dead and holds the error
    /// object.
    pub fn resume(&mut self, co: GcIdx<ThreadObj>, nargs: i32) -> Status {
        let nargs = nargs.max(0) as usize;
        if self.callers.contains(&co) {
            // waiting on a resume of its own
            return self.with_thread(co, |vm| {
                vm.resume_error("cannot resume non-suspended coroutine", nargs)
            });
        }
        let from_ccalls = self.th.n_ccalls;
        self.with_thread(co, |vm| vm.resume_here(from_ccalls, nargs))
    }

    fn resume_here(&mut self, from_ccalls: u16, nargs: usize) -> Status {
        match self.th.status {
            Status::Ok => {
                if !self.th.ci.is_base() {
                    return self.resume_error("cannot resume non-suspended coroutine", nargs);
                }
                if self.th.top - (self.th.ci.current().func + 1) == nargs {
                    return self.resume_error("cannot resume dead coroutine", nargs);
                }
            }
            Status::Yield => {}
            _ => return self.resume_error("cannot resume dead coroutine", nargs),
        }
        self.th.n_ccalls = from_ccalls + 1;
        if self.th.n_ccalls >= self.g.config.max_c_calls {
            return self.resume_error("C stack overflow", nargs);
        }
        let old_nny = self.th.nny;
        self.th.nny = 0;
        let mut r = self.raw_run_protected(|vm| vm.resume_body(nargs));
        let status = loop {
            let e = match r {
                Ok(()) => break Status::Ok,
                Err(LuaError::Yield) => break Status::Yield,
                Err(e) => self.apply_handler(e),
            };
            let status = e.status();
            let obj = self.error_object(&e);
            match self.find_pcall() {
                Some(depth) => {
                    self.recover(depth, obj);
                    r = self.raw_run_protected(|vm| vm.unroll(Some(status)));
                }
                None => {
                    // the thread is dead; its frames stay for inspection
                    self.th.status = status;
                    let top = self.th.top;
                    self.set_error_obj(top, obj);
                    let top = self.th.top;
                    self.th.ci.current_mut().top = top;
                    break status;
                }
            }
        };
        self.th.nny = old_nny;
        self.th.n_ccalls -= 1;
        status
    }

    fn resume_error(&mut self, msg: &str, nargs: usize) -> Status {
        self.th.top -= nargs;
        let mem = self.g.mem_err_msg.map_or(TValue::Nil, TValue::ShortStr);
        let v = self.new_string(msg.as_bytes()).unwrap_or(mem);
        self.push_raw(v);
        Status::ErrRun
    }

    fn resume_body(&mut self, nargs: usize) -> Result<(), LuaError> {
        let first_arg = self.th.top - nargs;
        if self.th.status == Status::Ok {
            if !self.precall(first_arg - 1, MULTRET)? {
                self.run_script()?;
            }
            return Ok(());
        }
        self.th.status = Status::Ok;
        let ci = self.th.ci.current_mut();
        ci.func = ci.extra;
        if ci.is_lua() {
            self.executor()?.execute(self)?;
        } else {
            let mut first = first_arg;
            let mut n = nargs;
            if let Some(k) = self.th.ci.current_mut().take_continuation() {
                n = k(self, Status::Yield)?;
                first = self.th.top - n;
            }
            self.poscall(first, n);
        }
        self.unroll(None)
    }

    /// Finish every interrupted frame down to the base.
    fn unroll(&mut self, status: Option<Status>) -> Result<(), LuaError> {
        if let Some(status) = status {
            self.finish_ccall(status)?;
        }
        while !self.th.ci.is_base() {
            if self.th.ci.current().is_lua() {
                let exec = self.executor()?;
                exec.finish_op(self)?;
                exec.execute(self)?;
            } else {
                self.finish_ccall(Status::Yield)?;
            }
        }
        Ok(())
    }

    /// Finish a native frame that was interrupted inside `call_k` or
    /// `pcall_k` by running its continuation.
    fn finish_ccall(&mut self, status: Status) -> Result<(), LuaError> {
        let ci = self.th.ci.current_mut();
        if ci.is_ypcall() {
            ci.set_is_ypcall(false);
            self.th.errfunc = ci.old_errfunc();
        }
        let nresults = self.th.ci.current().nresults;
        self.adjust_results(nresults);
        let k = self
            .th
            .ci
            .current_mut()
            .take_continuation()
            .ok_or_else(|| LuaError::runtime("interrupted native frame has no continuation"))?;
        let n = k(self, status)?;
        debug_assert!(
            n <= self.th.top - (self.th.ci.current().func + 1),
            "not enough elements in the stack"
        );
        let first = self.th.top - n;
        self.poscall(first, n);
        Ok(())
    }

    /// Innermost frame doing a yieldable protected call.
    fn find_pcall(&self) -> Option<usize> {
        self.th.ci.find_from_top(|ci| ci.is_ypcall())
    }

    /// Unwind to the protected call at `depth` as if it had caught the
    /// error itself.
    fn recover(&mut self, depth: usize, obj: TValue) {
        let ci = self.th.ci.at(depth);
        let old_top = ci.extra;
        let allowhook = ci.saved_allowhook();
        let old_errfunc = ci.old_errfunc();
        self.close_upvals(old_top);
        self.set_error_obj(old_top, obj);
        self.th.ci.unwind_to(depth);
        self.th.allowhook = allowhook;
        self.th.nny = 0;
        self.g.shrink_stack(&mut self.th);
        self.th.errfunc = old_errfunc;
    }

    /// Suspend the running coroutine with the top `nresults` values as the
    /// values handed to the resumer. A native function returns the result
    /// of this call. When resumed, `k` finishes the suspended function; with
    /// no continuation, the resume arguments become its results.
    pub fn yield_k(&mut self, nresults: i32, k: Option<Continuation>) -> Result<usize, LuaError> {
        let r = self.yield_raw(nresults, k);
        self.api(r)
    }

    fn yield_raw(&mut self, nresults: i32, k: Option<Continuation>) -> Result<usize, LuaError> {
        debug_assert!(
            nresults >= 0 && nresults <= self.get_top(),
            "not enough elements in the stack"
        );
        if self.th.nny > 0 {
            return Err(LuaError::runtime(if self.running != self.g.main_thread {
                "attempt to yield across a C-call boundary"
            } else {
                "attempt to yield from outside a coroutine"
            }));
        }
        self.th.status = Status::Yield;
        let top = self.th.top;
        let ci = self.th.ci.current_mut();
        ci.extra = ci.func;
        if !ci.is_lua() {
            ci.func = top - nresults as usize - 1;
            if let Some(k) = k {
                self.set_continuation(k, None);
            }
        }
        Err(LuaError::Yield)
    }
}
