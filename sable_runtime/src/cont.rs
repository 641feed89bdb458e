//! Continuations: the unit of "what runs next".
//!
//! Instruction dispatch, script-level calls and host-function calls are
//! all driven by the same trampoline: running one continuation returns the
//! next instead of invoking it, so arbitrarily deep call chains execute in
//! bounded native stack space. Values flow between continuations through
//! [`Continuation::push`].

use crate::error::VmError;
use crate::thread::Thread;
use crate::value::Value;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

/// The kind of a continuation, for introspection of a thread's current
/// execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContKind {
    /// Interpreting packed bytecode.
    Bytecode,
    /// Invoking a natively-implemented function.
    Host,
    /// End of a call chain, collecting final results.
    Termination,
}

/// A resumable unit of execution.
///
/// `step` runs one unit of work and returns the continuation to run next,
/// `None` at normal completion, or an error. Implementations must never
/// call `step` on the returned continuation themselves; that is the
/// trampoline's job.
pub trait Continuation: Send {
    fn kind(&self) -> ContKind;

    /// Receive one value from the predecessor in the chain (an argument or
    /// a returned result).
    fn push(&mut self, value: Value);

    fn step(
        self: Box<Self>,
        thread: &Arc<Thread>,
    ) -> Result<Option<Box<dyn Continuation>>, VmError>;
}

// =============================================================================
// Termination
// =============================================================================

/// Shared handle to the values a [`Termination`] collects.
#[derive(Clone, Default)]
pub struct Collector(Arc<Mutex<Vec<Value>>>);

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the collected values out.
    pub fn take(&self) -> Vec<Value> {
        std::mem::take(&mut self.0.lock())
    }
}

/// Terminal continuation: marks the end of a call chain and collects the
/// final result values through its [`Collector`].
pub struct Termination {
    out: Collector,
}

impl Termination {
    pub fn new(out: Collector) -> Box<Termination> {
        Box::new(Termination { out })
    }
}

impl Continuation for Termination {
    fn kind(&self) -> ContKind {
        ContKind::Termination
    }

    fn push(&mut self, value: Value) {
        self.out.0.lock().push(value);
    }

    fn step(
        self: Box<Self>,
        _thread: &Arc<Thread>,
    ) -> Result<Option<Box<dyn Continuation>>, VmError> {
        Ok(None)
    }
}

// =============================================================================
// Host Continuation
// =============================================================================

/// Continuation invoking a natively-implemented function.
///
/// Arguments arrive through `push`; results are pushed into `next`, which
/// is then handed back to the trampoline.
pub struct HostCont {
    f: Arc<crate::value::HostFn>,
    args: SmallVec<[Value; 4]>,
    next: Box<dyn Continuation>,
}

impl HostCont {
    pub fn new(f: Arc<crate::value::HostFn>, next: Box<dyn Continuation>) -> Box<HostCont> {
        Box::new(HostCont {
            f,
            args: SmallVec::new(),
            next,
        })
    }
}

impl Continuation for HostCont {
    fn kind(&self) -> ContKind {
        ContKind::Host
    }

    fn push(&mut self, value: Value) {
        self.args.push(value);
    }

    fn step(
        self: Box<Self>,
        thread: &Arc<Thread>,
    ) -> Result<Option<Box<dyn Continuation>>, VmError> {
        let HostCont { f, args, mut next } = *self;
        let results = f(thread, &args)?;
        for v in results {
            next.push(v);
        }
        Ok(Some(next))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_collects_pushed_values() {
        let out = Collector::new();
        let mut term = Termination::new(out.clone());
        term.push(Value::Int(1));
        term.push(Value::Int(2));
        assert_eq!(
            out.take().iter().map(|v| v.as_int()).collect::<Vec<_>>(),
            vec![Some(1), Some(2)]
        );
        // Taking drains.
        assert!(out.take().is_empty());
    }
}
