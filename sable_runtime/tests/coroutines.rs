//! Coroutine integration tests.
//!
//! Exercises the full resume/yield hand-off across real OS threads,
//! including value transport in both directions, terminal results, and
//! quota aborts crossing the thread boundary.

use sable_code::{BinOp, Flag, Instruction, JumpOp, Lit16, Reg, UnOpK16};
use sable_runtime::{
    Chunk, Function, Runtime, RuntimeContextDef, Thread, ThreadStatus, Value, VmError,
};
use std::sync::Arc;

fn unlimited() -> (Arc<Runtime>, Arc<Thread>) {
    let rt = Runtime::new(&RuntimeContextDef::default());
    let main = Thread::main(Arc::clone(&rt));
    (rt, main)
}

fn ints(values: &[Value]) -> Vec<Option<i64>> {
    values.iter().map(|v| v.as_int()).collect()
}

// =============================================================================
// Resume / Yield Round Trips
// =============================================================================

#[test]
fn test_yield_values_then_final_return() {
    let (rt, main) = unlimited();
    let co = Thread::new(rt).unwrap();
    let body = Function::host(|t, _| {
        let mut resumed = t.yield_values(vec![Value::Int(1), Value::Int(2), Value::Int(3)])?;
        // The next resume's arguments come back as the yield's result.
        let n = resumed.swap_remove(0);
        Ok(vec![n.clone(), n])
    });
    co.start(body).unwrap();

    let yielded = co.resume(&main, vec![]).unwrap();
    assert_eq!(ints(&yielded), vec![Some(1), Some(2), Some(3)]);
    assert_eq!(co.status(), ThreadStatus::Suspended);
    assert_eq!(main.status(), ThreadStatus::Running);

    let finished = co.resume(&main, vec![Value::Int(9)]).unwrap();
    assert_eq!(ints(&finished), vec![Some(9), Some(9)]);
    assert_eq!(co.status(), ThreadStatus::Dead);
}

#[test]
fn test_resume_after_death_fails_fast() {
    let (rt, main) = unlimited();
    let co = Thread::new(rt).unwrap();
    co.start(Function::host(|_, _| Ok(vec![Value::Int(7)]))).unwrap();
    assert_eq!(ints(&co.resume(&main, vec![]).unwrap()), vec![Some(7)]);
    assert_eq!(co.status(), ThreadStatus::Dead);

    // No hand-off happens for a dead thread; the status check rejects the
    // resume before any channel operation could block.
    let err = co.resume(&main, vec![]).unwrap_err();
    match err {
        VmError::Runtime(e) => assert_eq!(e.message(), "cannot resume dead thread"),
        VmError::Quota(_) => panic!("expected a runtime error"),
    }
}

#[test]
fn test_script_error_in_coroutine_reaches_resumer() {
    let (rt, main) = unlimited();
    let co = Thread::new(rt).unwrap();
    co.start(Function::host(|_, _| {
        Err(sable_runtime::RuntimeError::msg("boom").into())
    }))
    .unwrap();
    let err = co.resume(&main, vec![]).unwrap_err();
    match err {
        VmError::Runtime(e) => assert_eq!(e.message(), "boom"),
        VmError::Quota(_) => panic!("expected a runtime error"),
    }
    assert_eq!(co.status(), ThreadStatus::Dead);
}

// =============================================================================
// Bytecode-Driven Coroutines
// =============================================================================

#[test]
fn test_coroutine_running_bytecode_yields() {
    let (rt, main) = unlimited();
    let co = Thread::new(rt).unwrap();

    // consts[0] is a host bridge to yield; the chunk yields its argument
    // doubled, then returns the resume value plus one.
    let yielder = Function::host(|t, args| t.yield_values(args.to_vec()));
    let r = Reg::new;
    let chunk = Chunk::new(
        vec![
            Instruction::args(Flag::Off, 1, r(1), r(0), r(0)),
            Instruction::binary(BinOp::Add, r(1), r(1), r(1)),
            Instruction::load_k16(Flag::Off, UnOpK16::K, r(0), Lit16(0)),
            Instruction::jump(Flag::Off, JumpOp::Call, r(0), Lit16(1)),
            Instruction::args(Flag::On, 1, r(1), r(0), r(0)),
            Instruction::load_k16(Flag::Off, UnOpK16::Int16, r(2), Lit16(1)),
            Instruction::binary(BinOp::Add, r(1), r(1), r(2)),
            Instruction::jump(Flag::On, JumpOp::Call, r(1), Lit16(1)),
        ],
        vec![Value::Function(yielder)],
        3,
    );
    co.start(Function::Lua(chunk)).unwrap();

    let yielded = co.resume(&main, vec![Value::Int(21)]).unwrap();
    assert_eq!(ints(&yielded), vec![Some(42)]);
    assert_eq!(co.status(), ThreadStatus::Suspended);

    let finished = co.resume(&main, vec![Value::Int(10)]).unwrap();
    assert_eq!(ints(&finished), vec![Some(11)]);
    assert_eq!(co.status(), ThreadStatus::Dead);
}

// =============================================================================
// Quota Aborts Across the Thread Boundary
// =============================================================================

#[cfg(feature = "quotas")]
#[test]
fn test_quota_abort_terminates_coroutine() {
    let rt = Runtime::new(&RuntimeContextDef {
        cpu_limit: 100,
        ..Default::default()
    });
    let main = Thread::main(Arc::clone(&rt));
    let co = Thread::new(rt).unwrap();
    co.start(Function::host(|t, _| {
        t.require_cpu(150)?;
        Ok(vec![])
    }))
    .unwrap();
    let err = co.resume(&main, vec![]).unwrap_err();
    match err {
        VmError::Quota(q) => {
            assert_eq!(q.limit, 100);
            assert_eq!(q.attempted, 150);
        }
        VmError::Runtime(_) => panic!("expected a quota abort"),
    }
    assert_eq!(co.status(), ThreadStatus::Dead);
}

#[cfg(feature = "quotas")]
#[test]
fn test_quota_abort_bypasses_protected_call_in_coroutine() {
    let rt = Runtime::new(&RuntimeContextDef {
        cpu_limit: 100,
        ..Default::default()
    });
    let main = Thread::main(Arc::clone(&rt));
    let co = Thread::new(rt).unwrap();
    co.start(Function::host(|t, _| {
        let burn = Function::host(|t, _| {
            t.require_cpu(150)?;
            Ok(vec![])
        });
        // A protected boundary inside the coroutine must not intercept
        // the abort.
        match t.protected_call(&burn, &[]) {
            Ok(_) => Ok(vec![Value::str("caught")]),
            Err(q) => Err(q.into()),
        }
    }))
    .unwrap();
    let err = co.resume(&main, vec![]).unwrap_err();
    assert!(err.is_quota());
    assert_eq!(co.status(), ThreadStatus::Dead);
}
