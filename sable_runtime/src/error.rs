//! Two-tier error taxonomy.
//!
//! [`RuntimeError`] is an ordinary script-level failure: it propagates as
//! a result through the continuation trampoline and may be intercepted at
//! a protected-call boundary. [`QuotaError`] is a budget violation: it
//! bypasses every protected boundary inside a thread and is only caught at
//! the thread-start boundary, where it terminates the thread. Letting
//! scripts catch quota exhaustion would defeat the sandbox, so the two
//! tiers are distinct types unified in [`VmError`].

use thiserror::Error;

// =============================================================================
// Recoverable Script Errors
// =============================================================================

/// A recoverable script-level runtime error.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RuntimeError {
    message: String,
}

impl RuntimeError {
    /// Generic error with a message.
    pub fn msg(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
        }
    }

    /// An engine invariant was violated.
    pub fn internal(message: impl Into<String>) -> Self {
        RuntimeError {
            message: format!("internal error: {}", message.into()),
        }
    }

    /// Relational comparison with no native rule and no metamethod.
    pub fn not_comparable(op: &str, lhs: &str, rhs: &str) -> Self {
        Self::msg(format!("attempt to compare {lhs} {op} {rhs}"))
    }

    /// I/O attempted in a context with the no-I/O flag set.
    pub fn io_disabled() -> Self {
        Self::msg("io disabled")
    }

    /// Host-bridge call attempted in a context with the no-host flag set.
    pub fn host_disabled() -> Self {
        Self::msg("host bridge disabled")
    }

    pub fn resume_dead() -> Self {
        Self::msg("cannot resume dead thread")
    }

    pub fn resume_running() -> Self {
        Self::msg("cannot resume running thread")
    }

    pub fn yield_main() -> Self {
        Self::msg("cannot yield from main thread")
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// =============================================================================
// Quota Aborts
// =============================================================================

/// Which budget was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    Cpu,
    Memory,
}

impl QuotaKind {
    fn as_str(self) -> &'static str {
        match self {
            QuotaKind::Cpu => "CPU",
            QuotaKind::Memory => "memory",
        }
    }
}

/// An unrecoverable budget violation.
///
/// Not interceptable by script-level error handling: every trampoline
/// layer re-propagates it until the thread boundary converts it into a
/// terminal result for the resuming caller.
#[derive(Debug, Clone, Error)]
#[error("{} quota exceeded: limit {limit}, attempted {attempted}", kind.as_str())]
pub struct QuotaError {
    pub kind: QuotaKind,
    /// The budget limit in force at the time of the violation.
    pub limit: u64,
    /// What `used` would have become had the charge succeeded.
    pub attempted: u64,
}

// =============================================================================
// Unified Result Channel
// =============================================================================

/// The two-channel error type threaded through the trampoline.
#[derive(Debug, Clone, Error)]
pub enum VmError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
}

impl VmError {
    /// True for the unconditional-abort tier.
    #[inline]
    pub fn is_quota(&self) -> bool {
        matches!(self, VmError::Quota(_))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_condition_messages() {
        assert_eq!(RuntimeError::resume_dead().message(), "cannot resume dead thread");
        assert_eq!(
            RuntimeError::resume_running().message(),
            "cannot resume running thread"
        );
        assert_eq!(RuntimeError::yield_main().message(), "cannot yield from main thread");
        assert_eq!(RuntimeError::io_disabled().message(), "io disabled");
        assert_eq!(RuntimeError::host_disabled().message(), "host bridge disabled");
    }

    #[test]
    fn test_quota_error_display() {
        let err = QuotaError {
            kind: QuotaKind::Cpu,
            limit: 100,
            attempted: 150,
        };
        assert_eq!(err.to_string(), "CPU quota exceeded: limit 100, attempted 150");
    }

    #[test]
    fn test_vm_error_tiers() {
        let recoverable: VmError = RuntimeError::msg("boom").into();
        assert!(!recoverable.is_quota());
        let abort: VmError = QuotaError {
            kind: QuotaKind::Memory,
            limit: 1,
            attempted: 2,
        }
        .into();
        assert!(abort.is_quota());
    }
}
