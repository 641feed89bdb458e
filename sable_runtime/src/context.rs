//! Runtime contexts: nested quota scopes with capability flags.
//!
//! Contexts form a strictly hierarchical, acyclic tree: opening a
//! sandboxed scope (a nested call with a tighter budget) creates a child
//! whose `parent` is a non-owning back-reference; a context never outlives
//! its parent. Flags are per-context and do not propagate to children;
//! only the quota tree is hierarchical.

use crate::quota::QuotaManager;
use parking_lot::Mutex;
use std::sync::Arc;

// =============================================================================
// Status and Flags
// =============================================================================

/// Lifecycle of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    /// The scope is open and may consume resources.
    Live,
    /// The scope exited normally.
    Done,
    /// Forced termination: quota exceeded or external cancellation.
    Killed,
}

/// Capability bits restricting what code in a context may do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextFlags(pub u8);

impl ContextFlags {
    /// No restrictions.
    pub const EMPTY: ContextFlags = ContextFlags(0);
    /// File-system and stream I/O is disabled.
    pub const NO_IO: ContextFlags = ContextFlags(1 << 1);
    /// Calls through the host bridge are disabled.
    pub const NO_HOST: ContextFlags = ContextFlags(1 << 2);

    /// Whether any of these bits is active for `ctx`.
    #[inline]
    pub fn is_set(self, ctx: &RuntimeContext) -> bool {
        self.0 & ctx.flags().0 != 0
    }

    #[inline]
    pub const fn union(self, other: ContextFlags) -> ContextFlags {
        ContextFlags(self.0 | other.0)
    }
}

/// Safety guarantees a context claims to uphold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyFlags(pub u16);

impl SafetyFlags {
    /// Memory consumption is bounded.
    pub const MEM_SAFE: SafetyFlags = SafetyFlags(1 << 0);
    /// CPU consumption is bounded.
    pub const CPU_SAFE: SafetyFlags = SafetyFlags(1 << 1);
    /// No ambient I/O is reachable.
    pub const IO_SAFE: SafetyFlags = SafetyFlags(1 << 2);

    #[inline]
    pub const fn contains(self, other: SafetyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: SafetyFlags) -> SafetyFlags {
        SafetyFlags(self.0 | other.0)
    }
}

// =============================================================================
// Context Definition
// =============================================================================

/// Parameters for opening a context.
///
/// A zero limit means unlimited.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContextDef {
    pub cpu_limit: u64,
    pub mem_limit: u64,
    pub flags: ContextFlags,
    pub safety: SafetyFlags,
}

// =============================================================================
// Runtime Context
// =============================================================================

/// A node in the tree of quota/capability scopes.
///
/// Each context owns its own quota counters. Charges debit the current
/// scope only; the parent link exists for inspection and for restoring the
/// enclosing scope when this one closes, not for cascading debits.
#[derive(Debug)]
pub struct RuntimeContext {
    quota: QuotaManager,
    status: Mutex<ContextStatus>,
    parent: Option<Arc<RuntimeContext>>,
    flags: ContextFlags,
    safety: SafetyFlags,
}

impl RuntimeContext {
    pub fn new(def: &RuntimeContextDef, parent: Option<Arc<RuntimeContext>>) -> Arc<Self> {
        Arc::new(RuntimeContext {
            quota: QuotaManager::with_limits(def.cpu_limit, def.mem_limit),
            status: Mutex::new(ContextStatus::Live),
            parent,
            flags: def.flags,
            safety: def.safety,
        })
    }

    /// This scope's quota counters.
    #[inline]
    pub fn quota(&self) -> &QuotaManager {
        &self.quota
    }

    pub fn cpu_limit(&self) -> u64 {
        self.quota.cpu_quota_status().0
    }

    pub fn cpu_used(&self) -> u64 {
        self.quota.cpu_quota_status().1
    }

    pub fn mem_limit(&self) -> u64 {
        self.quota.mem_quota_status().0
    }

    pub fn mem_used(&self) -> u64 {
        self.quota.mem_quota_status().1
    }

    pub fn status(&self) -> ContextStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: ContextStatus) {
        *self.status.lock() = status;
    }

    /// Non-owning back-reference to the enclosing scope.
    pub fn parent(&self) -> Option<&Arc<RuntimeContext>> {
        self.parent.as_ref()
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    pub fn safety_flags(&self) -> SafetyFlags {
        self.safety
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_is_set() {
        let def = RuntimeContextDef {
            flags: ContextFlags::NO_IO,
            ..Default::default()
        };
        let ctx = RuntimeContext::new(&def, None);
        assert!(ContextFlags::NO_IO.is_set(&ctx));
        assert!(!ContextFlags::NO_HOST.is_set(&ctx));
        // A combined mask matches if any bit is active.
        assert!(ContextFlags::NO_IO.union(ContextFlags::NO_HOST).is_set(&ctx));
    }

    #[test]
    fn test_safety_flags_contains() {
        let s = SafetyFlags::MEM_SAFE.union(SafetyFlags::CPU_SAFE);
        assert!(s.contains(SafetyFlags::MEM_SAFE));
        assert!(!s.contains(SafetyFlags::IO_SAFE));
    }

    #[test]
    fn test_context_tree_parent_chain() {
        let root = RuntimeContext::new(&RuntimeContextDef::default(), None);
        let child = RuntimeContext::new(
            &RuntimeContextDef {
                cpu_limit: 10,
                ..Default::default()
            },
            Some(Arc::clone(&root)),
        );
        assert!(child.parent().is_some());
        assert!(root.parent().is_none());
        assert_eq!(child.status(), ContextStatus::Live);
    }

    #[cfg(feature = "quotas")]
    #[test]
    fn test_child_budget_independent_of_parent() {
        let root = RuntimeContext::new(
            &RuntimeContextDef {
                cpu_limit: 100,
                ..Default::default()
            },
            None,
        );
        let child = RuntimeContext::new(
            &RuntimeContextDef {
                cpu_limit: 10,
                ..Default::default()
            },
            Some(Arc::clone(&root)),
        );
        child.quota().require_cpu(10).unwrap();
        assert!(child.quota().require_cpu(1).is_err());
        // Charges stay in the child scope.
        assert_eq!(root.cpu_used(), 0);
    }
}
