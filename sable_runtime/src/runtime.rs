//! The runtime root object shared by every thread of one sandbox.
//!
//! Holds the context stack and forwards metering calls to the current
//! scope's quota manager so metered code never reaches around the scope
//! structure. Multiple independent runtimes (sandboxes) can coexist in one
//! process; nothing here is process-global.

use crate::context::{ContextFlags, ContextStatus, RuntimeContext, RuntimeContextDef};
use crate::error::{QuotaError, RuntimeError};
use parking_lot::RwLock;
use std::sync::Arc;

/// One sandbox: a context tree and the quota scope currently in force.
pub struct Runtime {
    current: RwLock<Arc<RuntimeContext>>,
}

impl Runtime {
    /// Open a runtime whose root context is described by `def`.
    pub fn new(def: &RuntimeContextDef) -> Arc<Runtime> {
        Arc::new(Runtime {
            current: RwLock::new(RuntimeContext::new(def, None)),
        })
    }

    /// The context currently in force.
    pub fn context(&self) -> Arc<RuntimeContext> {
        Arc::clone(&self.current.read())
    }

    // =========================================================================
    // Context Scopes
    // =========================================================================

    /// Open a nested scope with its own budgets and flags. Returns the new
    /// context.
    pub fn push_context(&self, def: &RuntimeContextDef) -> Arc<RuntimeContext> {
        let mut current = self.current.write();
        let child = RuntimeContext::new(def, Some(Arc::clone(&current)));
        *current = Arc::clone(&child);
        child
    }

    /// Close the current scope with the given terminal status and restore
    /// its parent. Closing the root scope only records the status.
    pub fn pop_context(&self, status: ContextStatus) -> Arc<RuntimeContext> {
        let mut current = self.current.write();
        let closed = Arc::clone(&current);
        closed.set_status(status);
        if let Some(parent) = closed.parent() {
            *current = Arc::clone(parent);
        }
        closed
    }

    // =========================================================================
    // Metering Forwarders
    // =========================================================================

    #[inline]
    pub fn require_cpu(&self, amount: u64) -> Result<(), QuotaError> {
        self.current.read().quota().require_cpu(amount)
    }

    #[inline]
    pub fn require_mem(&self, amount: u64) -> Result<(), QuotaError> {
        self.current.read().quota().require_mem(amount)
    }

    #[inline]
    pub fn require_size(&self, size: usize) -> Result<(), QuotaError> {
        self.current.read().quota().require_size(size)
    }

    #[inline]
    pub fn release_mem(&self, amount: u64) {
        self.current.read().quota().release_mem(amount)
    }

    #[inline]
    pub fn unused_cpu(&self) -> u64 {
        self.current.read().quota().unused_cpu()
    }

    // =========================================================================
    // Capability Checks
    // =========================================================================

    /// Fail with the dedicated "io disabled" condition when the current
    /// context forbids I/O. Library functions surface this instead of
    /// performing the guarded operation.
    pub fn check_io(&self) -> Result<(), RuntimeError> {
        if ContextFlags::NO_IO.is_set(&self.current.read()) {
            return Err(RuntimeError::io_disabled());
        }
        Ok(())
    }

    /// As [`Self::check_io`], for host-bridge calls.
    pub fn check_host(&self) -> Result<(), RuntimeError> {
        if ContextFlags::NO_HOST.is_set(&self.current.read()) {
            return Err(RuntimeError::host_disabled());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_io_disabled() {
        let rt = Runtime::new(&RuntimeContextDef {
            flags: ContextFlags::NO_IO,
            ..Default::default()
        });
        let err = rt.check_io().unwrap_err();
        assert_eq!(err.message(), "io disabled");
        assert!(rt.check_host().is_ok());
    }

    #[test]
    fn test_check_host_disabled() {
        let rt = Runtime::new(&RuntimeContextDef {
            flags: ContextFlags::NO_HOST,
            ..Default::default()
        });
        assert!(rt.check_io().is_ok());
        let err = rt.check_host().unwrap_err();
        assert_eq!(err.message(), "host bridge disabled");
    }

    #[test]
    fn test_push_pop_context() {
        let rt = Runtime::new(&RuntimeContextDef::default());
        let root = rt.context();
        let child = rt.push_context(&RuntimeContextDef {
            cpu_limit: 5,
            flags: ContextFlags::NO_IO,
            ..Default::default()
        });
        assert!(Arc::ptr_eq(&rt.context(), &child));
        assert!(rt.check_io().is_err());
        // Flags do not propagate: the parent scope is unrestricted again
        // after the child closes.
        let closed = rt.pop_context(ContextStatus::Done);
        assert!(Arc::ptr_eq(&closed, &child));
        assert_eq!(closed.status(), ContextStatus::Done);
        assert!(Arc::ptr_eq(&rt.context(), &root));
        assert!(rt.check_io().is_ok());
    }

    #[cfg(feature = "quotas")]
    #[test]
    fn test_metering_targets_current_scope() {
        let rt = Runtime::new(&RuntimeContextDef::default());
        rt.push_context(&RuntimeContextDef {
            cpu_limit: 3,
            ..Default::default()
        });
        assert!(rt.require_cpu(3).is_ok());
        assert!(rt.require_cpu(1).is_err());
        let killed = rt.pop_context(ContextStatus::Killed);
        assert_eq!(killed.status(), ContextStatus::Killed);
        assert!(rt.require_cpu(1).is_ok());
    }
}
