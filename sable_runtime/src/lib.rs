//! Execution engine for the Sable virtual machine.
//!
//! This crate provides:
//! - Two-tier error taxonomy: recoverable script errors vs quota aborts
//! - Resource metering (CPU steps and memory bytes) with hard budgets
//! - A tree of runtime contexts carrying budgets and capability flags
//! - Raw and metamethod-aware equality / ordering over the value domain
//! - A continuation trampoline that runs call chains in bounded native
//!   stack space
//! - Cooperative coroutines with synchronous resume/yield hand-off
//!
//! The bytecode format lives in [`sable_code`]; the lexer, parser,
//! compiler and standard library are external collaborators.

pub mod compare;
pub mod cont;
pub mod context;
pub mod error;
pub mod interpreter;
pub mod quota;
pub mod runtime;
pub mod thread;
pub mod value;

pub use cont::{Collector, ContKind, Continuation, HostCont, Termination};
pub use context::{
    ContextFlags, ContextStatus, RuntimeContext, RuntimeContextDef, SafetyFlags,
};
pub use error::{QuotaError, QuotaKind, RuntimeError, VmError};
pub use interpreter::BytecodeCont;
pub use quota::{QuotaManager, QUOTAS_AVAILABLE};
pub use runtime::Runtime;
pub use thread::{Thread, ThreadStatus};
pub use value::{Chunk, Function, Table, Value};
