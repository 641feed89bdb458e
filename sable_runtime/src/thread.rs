//! Cooperative coroutines and the continuation trampoline.
//!
//! Each coroutine is backed by one OS thread, but logical control is
//! cooperative and single-active-at-a-time: resume/yield is a strict
//! two-party synchronous rendezvous over an unbuffered channel, gated by a
//! mutex on each side's status, so no two logically-related threads ever
//! run simultaneously. One side is always blocked waiting on the channel
//! while the other runs.
//!
//! A quota abort travels the other result channel of [`VmError`]: every
//! trampoline layer re-propagates it unconditionally until the
//! thread-start boundary converts it into a terminal result for the
//! resuming caller. It is not observable inside the aborting thread's own
//! script-level error handling.

use crate::cont::{Collector, ContKind, Continuation, HostCont, Termination};
use crate::error::{QuotaError, RuntimeError, VmError};
use crate::interpreter::BytecodeCont;
use crate::runtime::Runtime;
use crate::value::{Function, Value};
use parking_lot::Mutex;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

/// Memory charged for the native stack backing a started coroutine,
/// released when the coroutine ends.
pub const COROUTINE_STACK_BYTES: u64 = 2 << 10;

/// Rough footprint of the hand-off channel, charged at thread creation.
const HANDOFF_FOOTPRINT: usize = 100;

/// Status of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Executing, or blocked mid-call waiting for a resumed thread.
    Running,
    /// Yielded (or never started); waiting to be resumed.
    Suspended,
    /// Finished or aborted. Terminal: a dead thread can never be resumed.
    Dead,
}

/// The tuple handed between a thread and whichever thread awaits it.
struct Handoff {
    values: Vec<Value>,
    error: Option<RuntimeError>,
    quota: Option<QuotaError>,
}

impl Handoff {
    fn values(values: Vec<Value>) -> Handoff {
        Handoff {
            values,
            error: None,
            quota: None,
        }
    }
}

struct ThreadState {
    status: ThreadStatus,
    /// The thread that resumed this one; cleared on yield and on death.
    /// If `status == Running` and this thread was resumed by another, the
    /// caller is present.
    caller: Option<Arc<Thread>>,
}

/// A cooperative execution context.
pub struct Thread {
    runtime: Arc<Runtime>,
    state: Mutex<ThreadState>,
    tx: SyncSender<Handoff>,
    rx: Mutex<Receiver<Handoff>>,
    current: Mutex<Option<ContKind>>,
}

impl Thread {
    fn with_status(runtime: Arc<Runtime>, status: ThreadStatus) -> Arc<Thread> {
        // Rendezvous channel: strict send/receive pairing, no buffering.
        let (tx, rx) = sync_channel(0);
        Arc::new(Thread {
            runtime,
            state: Mutex::new(ThreadState {
                status,
                caller: None,
            }),
            tx,
            rx: Mutex::new(rx),
            current: Mutex::new(None),
        })
    }

    /// The root thread of a runtime. Starts Running and has no caller, so
    /// yielding from it fails.
    pub fn main(runtime: Arc<Runtime>) -> Arc<Thread> {
        Self::with_status(runtime, ThreadStatus::Running)
    }

    /// A new coroutine. Its initial status is Suspended; call
    /// [`Thread::start`] to give it a callable and [`Thread::resume`] to
    /// run it.
    pub fn new(runtime: Arc<Runtime>) -> Result<Arc<Thread>, QuotaError> {
        runtime.require_size(std::mem::size_of::<Thread>() + HANDOFF_FOOTPRINT)?;
        Ok(Self::with_status(runtime, ThreadStatus::Suspended))
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn status(&self) -> ThreadStatus {
        self.state.lock().status
    }

    /// The kind of continuation currently running (or last run) in this
    /// thread.
    pub fn current_cont(&self) -> Option<ContKind> {
        *self.current.lock()
    }

    // =========================================================================
    // Metering Forwarders
    // =========================================================================

    #[inline]
    pub fn require_cpu(&self, amount: u64) -> Result<(), QuotaError> {
        self.runtime.require_cpu(amount)
    }

    #[inline]
    pub fn require_mem(&self, amount: u64) -> Result<(), QuotaError> {
        self.runtime.require_mem(amount)
    }

    #[inline]
    pub fn release_mem(&self, amount: u64) {
        self.runtime.release_mem(amount)
    }

    #[inline]
    pub fn unused_cpu(&self) -> u64 {
        self.runtime.unused_cpu()
    }

    // =========================================================================
    // Trampoline
    // =========================================================================

    /// Run `cont` until the chain completes or a step fails.
    ///
    /// No continuation's step function invokes the next one; it returns
    /// it, so deeply nested calls, tail calls and coroutine hand-offs all
    /// execute in bounded native stack space.
    pub fn run_continuation(
        self: &Arc<Self>,
        mut cont: Box<dyn Continuation>,
    ) -> Result<(), VmError> {
        loop {
            *self.current.lock() = Some(cont.kind());
            match cont.step(self)? {
                Some(next) => cont = next,
                None => return Ok(()),
            }
        }
    }

    /// Build the continuation chain for a callable and run it, feeding the
    /// final results into `next`.
    pub fn call(
        self: &Arc<Self>,
        f: &Function,
        args: Vec<Value>,
        next: Box<dyn Continuation>,
    ) -> Result<(), VmError> {
        let mut cont: Box<dyn Continuation> = match f {
            Function::Host(host) => HostCont::new(Arc::clone(host), next),
            Function::Lua(chunk) => BytecodeCont::new(Arc::clone(chunk), next),
        };
        for a in args {
            cont.push(a);
        }
        self.run_continuation(cont)
    }

    /// Call a function and collect its results.
    pub fn call_values(self: &Arc<Self>, f: &Function, args: &[Value]) -> Result<Vec<Value>, VmError> {
        let out = Collector::new();
        self.call(f, args.to_vec(), Termination::new(out.clone()))?;
        Ok(out.take())
    }

    /// A protected-call boundary: intercepts recoverable script errors and
    /// re-propagates quota aborts unconditionally.
    ///
    /// The outer `Err` is the uncatchable tier; the inner result is what a
    /// script-level protected-call construct observes.
    pub fn protected_call(
        self: &Arc<Self>,
        f: &Function,
        args: &[Value],
    ) -> Result<Result<Vec<Value>, RuntimeError>, QuotaError> {
        match self.call_values(f, args) {
            Ok(values) => Ok(Ok(values)),
            Err(VmError::Runtime(e)) => Ok(Err(e)),
            Err(VmError::Quota(q)) => Err(q),
        }
    }

    // =========================================================================
    // Coroutine Hand-off
    // =========================================================================

    /// Launch the coroutine's execution unit with the callable it will
    /// run. The unit blocks until the first [`Thread::resume`] provides
    /// the initial arguments.
    pub fn start(self: &Arc<Self>, callable: Function) -> Result<(), QuotaError> {
        self.runtime.require_mem(COROUTINE_STACK_BYTES)?;
        let thread = Arc::clone(self);
        std::thread::spawn(move || {
            let mut values = Vec::new();
            let mut error = None;
            let mut quota = None;
            match thread.await_handoff() {
                Err(VmError::Quota(q)) => quota = Some(q),
                Err(VmError::Runtime(e)) => error = Some(e),
                Ok(args) => {
                    let out = Collector::new();
                    match thread.call(&callable, args, Termination::new(out.clone())) {
                        Ok(()) => values = out.take(),
                        Err(VmError::Runtime(e)) => error = Some(e),
                        Err(VmError::Quota(q)) => quota = Some(q),
                    }
                }
            }
            thread.end(values, error, quota);
        });
        Ok(())
    }

    /// Resume a suspended thread, handing it `args` and blocking until it
    /// yields or ends.
    ///
    /// The target switches to Running; the caller stays Running (it is
    /// blocked mid-call, which is why resuming *it* fails with "cannot
    /// resume running thread"). A quota abort delivered by the target
    /// re-propagates out of this call as `VmError::Quota`.
    pub fn resume(
        self: &Arc<Self>,
        caller: &Arc<Thread>,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, VmError> {
        {
            let mut st = self.state.lock();
            match st.status {
                ThreadStatus::Dead => return Err(RuntimeError::resume_dead().into()),
                ThreadStatus::Running => return Err(RuntimeError::resume_running().into()),
                ThreadStatus::Suspended => {}
            }
            let cst = caller.state.lock();
            debug_assert_eq!(
                cst.status,
                ThreadStatus::Running,
                "caller of thread to resume is not running"
            );
            st.status = ThreadStatus::Running;
            st.caller = Some(Arc::clone(caller));
        }
        tracing::trace!("resuming thread");
        self.send_handoff(Handoff::values(args))?;
        caller.await_handoff()
    }

    /// Yield to the caller thread, handing it `args` and blocking until
    /// resumed again.
    pub fn yield_values(self: &Arc<Self>, args: Vec<Value>) -> Result<Vec<Value>, VmError> {
        let caller = {
            let mut st = self.state.lock();
            debug_assert_eq!(st.status, ThreadStatus::Running, "thread to yield is not running");
            let caller = match st.caller.take() {
                Some(caller) => caller,
                None => return Err(RuntimeError::yield_main().into()),
            };
            {
                let cst = caller.state.lock();
                debug_assert_eq!(
                    cst.status,
                    ThreadStatus::Running,
                    "caller of yielding thread is not running"
                );
            }
            st.status = ThreadStatus::Suspended;
            caller
        };
        tracing::trace!("yielding to caller");
        caller.send_handoff(Handoff::values(args))?;
        self.await_handoff()
    }

    /// Terminate this thread and deliver its final result tuple to the
    /// thread that last resumed it.
    ///
    /// Locks are taken in a fixed thread-then-caller order. The hand-off
    /// channel is not torn down; the Dead status makes any later resume
    /// fail before it would touch the channel.
    fn end(self: &Arc<Self>, values: Vec<Value>, error: Option<RuntimeError>, quota: Option<QuotaError>) {
        let caller = {
            let mut st = self.state.lock();
            debug_assert_eq!(st.status, ThreadStatus::Running, "ending a non-running thread");
            let caller = st.caller.take();
            if let Some(caller) = &caller {
                let cst = caller.state.lock();
                debug_assert_eq!(
                    cst.status,
                    ThreadStatus::Running,
                    "caller of ending thread is not running"
                );
            }
            st.status = ThreadStatus::Dead;
            caller
        };
        tracing::debug!(
            had_error = error.is_some(),
            quota_abort = quota.is_some(),
            "thread ended"
        );
        if let Some(caller) = caller {
            let _ = caller.tx.send(Handoff {
                values,
                error,
                quota,
            });
        }
        self.runtime.release_mem(COROUTINE_STACK_BYTES);
    }

    fn send_handoff(&self, handoff: Handoff) -> Result<(), VmError> {
        self.tx
            .send(handoff)
            .map_err(|_| RuntimeError::internal("hand-off channel closed").into())
    }

    /// Block on this thread's own channel for the next hand-off.
    ///
    /// A received quota tuple re-raises as the uncatchable tier; an error
    /// tuple as the recoverable one.
    fn await_handoff(&self) -> Result<Vec<Value>, VmError> {
        let handoff = self
            .rx
            .lock()
            .recv()
            .map_err(|_| RuntimeError::internal("hand-off channel closed"))?;
        if let Some(quota) = handoff.quota {
            return Err(quota.into());
        }
        if let Some(error) = handoff.error {
            return Err(error.into());
        }
        Ok(handoff.values)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RuntimeContextDef;

    fn main_thread() -> Arc<Thread> {
        Thread::main(Runtime::new(&RuntimeContextDef::default()))
    }

    #[test]
    fn test_main_thread_cannot_yield() {
        let t = main_thread();
        let err = t.yield_values(vec![]).unwrap_err();
        match err {
            VmError::Runtime(e) => assert_eq!(e.message(), "cannot yield from main thread"),
            VmError::Quota(_) => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn test_resume_running_thread_fails() {
        let main = main_thread();
        // The main thread is Running; resuming it from itself must fail
        // fast without touching the channel.
        let err = main.resume(&main, vec![]).unwrap_err();
        match err {
            VmError::Runtime(e) => assert_eq!(e.message(), "cannot resume running thread"),
            VmError::Quota(_) => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn test_call_values_host_function() {
        let main = main_thread();
        let double = Function::host(|_, args| {
            let n = args[0].as_int().unwrap_or(0);
            Ok(vec![Value::Int(n * 2)])
        });
        let out = main.call_values(&double, &[Value::Int(21)]).unwrap();
        assert_eq!(out[0].as_int(), Some(42));
        assert_eq!(main.current_cont(), Some(ContKind::Termination));
    }

    #[test]
    fn test_protected_call_catches_runtime_errors() {
        let main = main_thread();
        let fail = Function::host(|_, _| Err(RuntimeError::msg("boom").into()));
        let caught = main.protected_call(&fail, &[]).unwrap();
        assert_eq!(caught.unwrap_err().message(), "boom");
    }

    #[cfg(feature = "quotas")]
    #[test]
    fn test_protected_call_does_not_catch_quota_aborts() {
        let rt = Runtime::new(&RuntimeContextDef {
            cpu_limit: 100,
            ..Default::default()
        });
        let main = Thread::main(rt);
        let burn = Function::host(|t, _| {
            t.require_cpu(150)?;
            Ok(vec![])
        });
        let quota = main.protected_call(&burn, &[]).unwrap_err();
        assert_eq!(quota.limit, 100);
        assert_eq!(quota.attempted, 150);
    }
}
