//! Resource metering: CPU-step and memory-byte budgets.
//!
//! Every CPU- or memory-consuming operation in the engine asks the quota
//! manager first; a charge that would push `used` past `limit` fails with
//! a [`QuotaError`] and leaves the counters untouched. The checks are
//! load-bearing for sandboxing: metered library code must call
//! `require_cpu` / `require_mem` proportionally to the work it performs.
//!
//! Compiling without the `quotas` feature replaces the manager with a
//! zero-overhead variant where every operation is a cost-free no-op with
//! an identical interface; the interface carries no behavior beyond
//! accounting.
//!
//! Counters use relaxed atomics: only the logically active thread of a
//! call chain mutates them, the atomics just make the manager shareable
//! across the OS threads that back coroutines.

use crate::error::QuotaError;

/// Whether this build enforces quotas.
pub const QUOTAS_AVAILABLE: bool = cfg!(feature = "quotas");

// =============================================================================
// Metered Variant
// =============================================================================

#[cfg(feature = "quotas")]
mod imp {
    use super::*;
    use crate::error::QuotaKind;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// One budget: a limit (0 = unlimited) and the amount consumed.
    ///
    /// Invariant: `used <= limit` after every successful charge.
    #[derive(Debug, Default)]
    struct Budget {
        limit: AtomicU64,
        used: AtomicU64,
    }

    impl Budget {
        fn require(&self, kind: QuotaKind, amount: u64) -> Result<(), QuotaError> {
            let limit = self.limit.load(Ordering::Relaxed);
            let used = self.used.load(Ordering::Relaxed);
            let attempted = used.saturating_add(amount);
            if limit > 0 && attempted > limit {
                tracing::debug!(?kind, limit, used, amount, "quota exceeded");
                return Err(QuotaError {
                    kind,
                    limit,
                    attempted,
                });
            }
            self.used.store(attempted, Ordering::Relaxed);
            Ok(())
        }

        fn release(&self, amount: u64) {
            let used = self.used.load(Ordering::Relaxed);
            self.used.store(used.saturating_sub(amount), Ordering::Relaxed);
        }

        fn status(&self) -> (u64, u64) {
            (
                self.limit.load(Ordering::Relaxed),
                self.used.load(Ordering::Relaxed),
            )
        }
    }

    /// Tracks the CPU-step and memory-byte budgets of one quota scope.
    #[derive(Debug, Default)]
    pub struct QuotaManager {
        cpu: Budget,
        mem: Budget,
    }

    impl QuotaManager {
        /// Unconstrained manager (both limits unlimited).
        pub fn new() -> Self {
            Self::default()
        }

        /// Manager with explicit limits; 0 means unlimited.
        pub fn with_limits(cpu_limit: u64, mem_limit: u64) -> Self {
            let m = Self::new();
            m.cpu.limit.store(cpu_limit, Ordering::Relaxed);
            m.mem.limit.store(mem_limit, Ordering::Relaxed);
            m
        }

        /// Debit `amount` CPU steps.
        #[inline]
        pub fn require_cpu(&self, amount: u64) -> Result<(), QuotaError> {
            self.cpu.require(QuotaKind::Cpu, amount)
        }

        /// Debit `amount` memory bytes.
        #[inline]
        pub fn require_mem(&self, amount: u64) -> Result<(), QuotaError> {
            self.mem.require(QuotaKind::Memory, amount)
        }

        /// Debit a size in bytes (convenience over [`Self::require_mem`]
        /// for `size_of`-style values).
        #[inline]
        pub fn require_size(&self, size: usize) -> Result<(), QuotaError> {
            self.require_mem(size as u64)
        }

        /// Credit memory back when a resource is freed. Never drives
        /// `used` below zero.
        #[inline]
        pub fn release_mem(&self, amount: u64) {
            self.mem.release(amount);
        }

        /// Remaining CPU budget; 0 when unlimited.
        ///
        /// Metered library calls use this to charge proportionally to work
        /// done and to cap a sub-operation's internal budget.
        pub fn unused_cpu(&self) -> u64 {
            let (limit, used) = self.cpu.status();
            limit.saturating_sub(used)
        }

        /// Rewrite the CPU limit (a nested scope was granted a new budget).
        pub fn update_cpu_quota(&self, new_limit: u64) {
            self.cpu
                .limit
                .store(new_limit, Ordering::Relaxed);
        }

        /// Rewrite the memory limit.
        pub fn update_mem_quota(&self, new_limit: u64) {
            self.mem
                .limit
                .store(new_limit, Ordering::Relaxed);
        }

        /// Restore both `used` counters to zero.
        pub fn reset_quota(&self) {
            self.cpu.used.store(0, Ordering::Relaxed);
            self.mem.used.store(0, Ordering::Relaxed);
        }

        /// `(limit, used)` for the CPU budget.
        pub fn cpu_quota_status(&self) -> (u64, u64) {
            self.cpu.status()
        }

        /// `(limit, used)` for the memory budget.
        pub fn mem_quota_status(&self) -> (u64, u64) {
            self.mem.status()
        }
    }
}

// =============================================================================
// Disabled Variant
// =============================================================================

#[cfg(not(feature = "quotas"))]
mod imp {
    use super::*;

    /// No-op quota manager: both budgets are unconstrained and every
    /// operation is free.
    #[derive(Debug, Default)]
    pub struct QuotaManager;

    impl QuotaManager {
        pub fn new() -> Self {
            QuotaManager
        }

        pub fn with_limits(_cpu_limit: u64, _mem_limit: u64) -> Self {
            QuotaManager
        }

        #[inline]
        pub fn require_cpu(&self, _amount: u64) -> Result<(), QuotaError> {
            Ok(())
        }

        #[inline]
        pub fn require_mem(&self, _amount: u64) -> Result<(), QuotaError> {
            Ok(())
        }

        #[inline]
        pub fn require_size(&self, _size: usize) -> Result<(), QuotaError> {
            Ok(())
        }

        #[inline]
        pub fn release_mem(&self, _amount: u64) {}

        pub fn unused_cpu(&self) -> u64 {
            0
        }

        pub fn update_cpu_quota(&self, _new_limit: u64) {}

        pub fn update_mem_quota(&self, _new_limit: u64) {}

        pub fn reset_quota(&self) {}

        pub fn cpu_quota_status(&self) -> (u64, u64) {
            (0, 0)
        }

        pub fn mem_quota_status(&self) -> (u64, u64) {
            (0, 0)
        }
    }
}

pub use imp::QuotaManager;

// =============================================================================
// Tests
// =============================================================================

#[cfg(all(test, feature = "quotas"))]
mod tests {
    use super::*;
    use crate::error::QuotaKind;

    #[test]
    fn test_unlimited_by_default() {
        let q = QuotaManager::new();
        assert!(q.require_cpu(u64::MAX / 2).is_ok());
        assert!(q.require_mem(u64::MAX / 2).is_ok());
    }

    #[test]
    fn test_cpu_abort_on_first_exceeding_charge() {
        let q = QuotaManager::with_limits(100, 0);
        // Cumulative charges below the limit all succeed.
        assert!(q.require_cpu(40).is_ok());
        assert!(q.require_cpu(40).is_ok());
        assert!(q.require_cpu(20).is_ok());
        assert_eq!(q.cpu_quota_status(), (100, 100));
        // The next exceeding charge aborts, and `used` stays the exact
        // cumulative sum up to (not including) the aborting call.
        let err = q.require_cpu(1).unwrap_err();
        assert_eq!(err.kind, QuotaKind::Cpu);
        assert_eq!(err.limit, 100);
        assert_eq!(err.attempted, 101);
        assert_eq!(q.cpu_quota_status(), (100, 100));
    }

    #[test]
    fn test_single_oversized_charge_aborts() {
        let q = QuotaManager::with_limits(100, 0);
        let err = q.require_cpu(150).unwrap_err();
        assert_eq!(err.attempted, 150);
        assert_eq!(q.cpu_quota_status(), (100, 0));
    }

    #[test]
    fn test_mem_release_never_underflows() {
        let q = QuotaManager::with_limits(0, 1000);
        q.require_mem(100).unwrap();
        q.release_mem(500);
        assert_eq!(q.mem_quota_status(), (1000, 0));
    }

    #[test]
    fn test_release_makes_room() {
        let q = QuotaManager::with_limits(0, 100);
        q.require_mem(100).unwrap();
        assert!(q.require_mem(1).is_err());
        q.release_mem(50);
        assert!(q.require_mem(50).is_ok());
    }

    #[test]
    fn test_unused_cpu() {
        let q = QuotaManager::with_limits(100, 0);
        q.require_cpu(30).unwrap();
        assert_eq!(q.unused_cpu(), 70);
        let unlimited = QuotaManager::new();
        assert_eq!(unlimited.unused_cpu(), 0);
    }

    #[test]
    fn test_update_and_reset() {
        let q = QuotaManager::with_limits(10, 0);
        q.require_cpu(10).unwrap();
        assert!(q.require_cpu(1).is_err());
        q.update_cpu_quota(20);
        assert!(q.require_cpu(10).is_ok());
        q.reset_quota();
        assert_eq!(q.cpu_quota_status(), (20, 0));
    }

    #[test]
    fn test_quotas_available() {
        assert!(QUOTAS_AVAILABLE);
    }
}

#[cfg(all(test, not(feature = "quotas")))]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_charges_always_succeed() {
        // Limits are accepted but carry no behavior.
        let q = QuotaManager::with_limits(10, 10);
        assert!(q.require_cpu(u64::MAX).is_ok());
        assert!(q.require_mem(u64::MAX).is_ok());
        assert!(q.require_size(usize::MAX).is_ok());
        q.release_mem(1);
        assert_eq!(q.cpu_quota_status(), (0, 0));
        assert_eq!(q.mem_quota_status(), (0, 0));
    }

    #[test]
    fn test_disabled_reports_no_budget() {
        let q = QuotaManager::new();
        assert_eq!(q.unused_cpu(), 0);
        q.update_cpu_quota(5);
        q.update_mem_quota(5);
        q.reset_quota();
        assert!(q.require_cpu(1).is_ok());
        assert_eq!(q.cpu_quota_status(), (0, 0));
    }

    #[test]
    fn test_quotas_not_available() {
        assert!(!QUOTAS_AVAILABLE);
    }
}
