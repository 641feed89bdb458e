//! The bytecode continuation: resumes interpreting packed instructions
//! from a saved program counter and register window.
//!
//! One CPU step is charged per instruction before dispatch, so a runaway
//! loop exhausts its budget instead of the host's patience. Calls never
//! recurse: a call instruction returns the callee continuation to the
//! trampoline with this continuation saved as its `next`; returned values
//! come back through [`Continuation::push`] and a following args
//! instruction moves them into registers.

use crate::compare;
use crate::cont::{ContKind, Continuation, HostCont};
use crate::error::{RuntimeError, VmError};
use crate::thread::Thread;
use crate::value::{Chunk, Function, Table, Value};
use sable_code::{BinOp, Instruction, JumpOp, Layout, Reg, UnOp, UnOpK, UnOpK16};
use smallvec::SmallVec;
use std::sync::Arc;

/// A resumable bytecode interpreter frame.
pub struct BytecodeCont {
    chunk: Arc<Chunk>,
    pc: usize,
    regs: Vec<Value>,
    /// Values pushed by the predecessor in the chain (arguments on entry,
    /// call results on re-entry), consumed by args instructions.
    pending: SmallVec<[Value; 4]>,
    next: Option<Box<dyn Continuation>>,
}

impl BytecodeCont {
    pub fn new(chunk: Arc<Chunk>, next: Box<dyn Continuation>) -> Box<BytecodeCont> {
        let regs = vec![Value::Nil; chunk.reg_count as usize];
        Box::new(BytecodeCont {
            chunk,
            pc: 0,
            regs,
            pending: SmallVec::new(),
            next: Some(next),
        })
    }

    /// Checked register read: an operand outside the chunk's declared
    /// window is a malformed chunk, reported instead of aborting the host.
    #[inline]
    fn reg(&self, r: Reg) -> Result<&Value, VmError> {
        self.regs
            .get(r.idx() as usize)
            .ok_or_else(bad_register)
    }

    #[inline]
    fn set_reg(&mut self, r: Reg, v: Value) -> Result<(), VmError> {
        let slot = self
            .regs
            .get_mut(r.idx() as usize)
            .ok_or_else(bad_register)?;
        *slot = v;
        Ok(())
    }

    fn take_next(&mut self) -> Result<Box<dyn Continuation>, VmError> {
        self.next
            .take()
            .ok_or_else(|| RuntimeError::internal("continuation chain broken").into())
    }

    /// Read one trailing literal payload word.
    fn payload_word(&mut self) -> Result<u32, VmError> {
        let word = self
            .chunk
            .code
            .get(self.pc)
            .map(|i| i.word())
            .ok_or_else(|| RuntimeError::internal("truncated literal payload"))?;
        self.pc += 1;
        Ok(word)
    }

    fn payload_i64(&mut self) -> Result<i64, VmError> {
        let lo = self.payload_word()? as u64;
        let hi = self.payload_word()? as u64;
        Ok(((hi << 32) | lo) as i64)
    }

    /// Relative branch: the 16-bit literal is a signed offset from the
    /// instruction after this one (payload words included).
    fn branch(&mut self, n: u16) -> Result<(), VmError> {
        let target = self.pc as i64 + (n as i16) as i64;
        if target < 0 {
            return Err(RuntimeError::internal("jump out of range").into());
        }
        self.pc = target as usize;
        Ok(())
    }

    // =========================================================================
    // Dispatch Helpers
    // =========================================================================

    fn binary(&mut self, thread: &Arc<Thread>, instr: Instruction) -> Result<(), VmError> {
        let x = self.reg(instr.get_b())?.clone();
        let y = self.reg(instr.get_c())?.clone();
        let v = match instr.get_x() {
            BinOp::Add => arith(&x, &y, i64::wrapping_add, |a, b| a + b)?,
            BinOp::Sub => arith(&x, &y, i64::wrapping_sub, |a, b| a - b)?,
            BinOp::Mul => arith(&x, &y, i64::wrapping_mul, |a, b| a * b)?,
            BinOp::Div => {
                let (a, b) = numbers(&x, &y)?;
                Value::Float(a / b)
            }
            BinOp::FloorDiv => floor_div(&x, &y)?,
            BinOp::Mod => modulo(&x, &y)?,
            BinOp::Pow => {
                let (a, b) = numbers(&x, &y)?;
                Value::Float(a.powf(b))
            }
            BinOp::BitAnd => {
                let (a, b) = ints(&x, &y)?;
                Value::Int(a & b)
            }
            BinOp::BitOr => {
                let (a, b) = ints(&x, &y)?;
                Value::Int(a | b)
            }
            BinOp::BitXor => {
                let (a, b) = ints(&x, &y)?;
                Value::Int(a ^ b)
            }
            BinOp::ShiftL => {
                let (a, b) = ints(&x, &y)?;
                Value::Int(shift_left(a, b))
            }
            BinOp::ShiftR => {
                let (a, b) = ints(&x, &y)?;
                Value::Int(shift_left(a, b.wrapping_neg()))
            }
            BinOp::Eq => Value::Bool(compare::equals(thread, &x, &y)?),
            BinOp::Lt => Value::Bool(compare::less_than(thread, &x, &y)?),
            BinOp::Leq => Value::Bool(compare::less_or_equal(thread, &x, &y)?),
            BinOp::Concat => {
                let s = format!("{}{}", concat_part(&x)?, concat_part(&y)?);
                thread.require_mem(s.len() as u64)?;
                Value::str(s)
            }
        };
        self.set_reg(instr.get_a(), v)
    }

    fn lookup(&mut self, instr: Instruction) -> Result<(), VmError> {
        let table = {
            let v = self.reg(instr.get_b())?;
            v.as_table()
                .cloned()
                .ok_or_else(|| RuntimeError::msg(format!("attempt to index a {} value", v.type_name())))?
        };
        let key = self.reg(instr.get_c())?.clone();
        if instr.get_f() {
            let value = self.reg(instr.get_a())?.clone();
            table.raw_set(&key, value)?;
            Ok(())
        } else {
            let value = table.raw_get(&key)?;
            self.set_reg(instr.get_a(), value)
        }
    }

    fn load_k16(&mut self, thread: &Arc<Thread>, instr: Instruction) -> Result<(), VmError> {
        let n = instr.get_n();
        let v = match UnOpK16::from_y(instr.get_y()) {
            UnOpK16::Int16 => Value::Int((n as i16) as i64),
            UnOpK16::K => self.constant(n)?,
            UnOpK16::ClosureK => {
                let k = self.constant(n)?;
                if k.as_function().is_none() {
                    return Err(RuntimeError::internal("closure constant is not a function").into());
                }
                k
            }
            UnOpK16::Str2 => {
                thread.require_mem(2)?;
                let bytes = [n as u8, (n >> 8) as u8];
                Value::str(String::from_utf8_lossy(&bytes).into_owned())
            }
        };
        self.set_reg(instr.get_a(), v)
    }

    fn constant(&self, idx: u16) -> Result<Value, VmError> {
        self.chunk
            .consts
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| RuntimeError::internal("constant index out of range").into())
    }

    fn unary(&mut self, instr: Instruction) -> Result<(), VmError> {
        let x = self.reg(instr.get_b())?.clone();
        let v = match UnOp::from_z(instr.get_z()) {
            UnOp::Neg => match x {
                Value::Int(n) => Value::Int(n.wrapping_neg()),
                Value::Float(f) => Value::Float(-f),
                other => {
                    return Err(RuntimeError::msg(format!(
                        "attempt to perform arithmetic on a {} value",
                        other.type_name()
                    ))
                    .into())
                }
            },
            UnOp::BitNot => Value::Int(!int_operand(&x)?),
            UnOp::Len => match &x {
                Value::Str(s) => Value::Int(s.len() as i64),
                Value::Table(t) => Value::Int(t.len()),
                other => {
                    return Err(RuntimeError::msg(format!(
                        "attempt to get length of a {} value",
                        other.type_name()
                    ))
                    .into())
                }
            },
            UnOp::Id => x,
            UnOp::Truth => Value::Bool(x.truth()),
            UnOp::Closure | UnOp::Cont | UnOp::Cell => {
                return Err(
                    RuntimeError::internal("closure opcodes are emitted by the compiler runtime")
                        .into(),
                )
            }
        };
        self.set_reg(instr.get_a(), v)
    }

    fn load_k8(&mut self, thread: &Arc<Thread>, instr: Instruction) -> Result<(), VmError> {
        let lit = (instr.word() >> 8) as u8;
        let op = UnOpK::from_z(instr.get_z())
            .ok_or_else(|| RuntimeError::internal("invalid constant-load opcode"))?;
        let v = match op {
            UnOpK::Nil => Value::Nil,
            UnOpK::Bool => Value::Bool(lit != 0),
            UnOpK::Str0 => Value::str(""),
            UnOpK::Str1 => {
                thread.require_mem(1)?;
                Value::str(String::from_utf8_lossy(&[lit]).into_owned())
            }
            UnOpK::Table => {
                thread.require_mem(std::mem::size_of::<Table>() as u64)?;
                Value::Table(Table::new())
            }
            UnOpK::Int => Value::Int(self.payload_i64()?),
            UnOpK::Float => Value::Float(f64::from_bits(self.payload_i64()? as u64)),
            UnOpK::StrN => {
                let len = lit as usize;
                thread.require_mem(len as u64)?;
                let mut bytes = Vec::with_capacity(len);
                while bytes.len() < len {
                    let word = self.payload_word()?;
                    bytes.extend_from_slice(&word.to_le_bytes());
                }
                bytes.truncate(len);
                Value::str(String::from_utf8_lossy(&bytes).into_owned())
            }
            UnOpK::CC => {
                return Err(
                    RuntimeError::internal("continuation capture is emitted by the compiler runtime")
                        .into(),
                )
            }
        };
        self.set_reg(instr.get_a(), v)
    }

    /// Call (flag off) or return (flag on).
    fn call_or_return(
        mut self: Box<Self>,
        instr: Instruction,
    ) -> Result<Option<Box<dyn Continuation>>, VmError> {
        let base = instr.get_a().idx() as usize;
        let n = instr.get_n() as usize;
        if instr.get_f() {
            // Return: hand rA..rA+N to the next continuation.
            let mut next = self.take_next()?;
            let rets = self.regs.get(base..base + n).ok_or_else(bad_register)?;
            for v in rets {
                next.push(v.clone());
            }
            return Ok(Some(next));
        }
        // Call: the callee's chain hands results back into this frame.
        let f = {
            let v = self.reg(instr.get_a())?;
            v.as_function()
                .cloned()
                .ok_or_else(|| RuntimeError::msg(format!("attempt to call a {} value", v.type_name())))?
        };
        let args: SmallVec<[Value; 4]> = self
            .regs
            .get(base + 1..base + 1 + n)
            .ok_or_else(bad_register)?
            .iter()
            .cloned()
            .collect();
        let mut callee: Box<dyn Continuation> = match &f {
            Function::Host(host) => HostCont::new(Arc::clone(host), self),
            Function::Lua(chunk) => BytecodeCont::new(Arc::clone(chunk), self),
        };
        for a in args {
            callee.push(a);
        }
        Ok(Some(callee))
    }

    fn receive(&mut self, instr: Instruction) -> Result<(), VmError> {
        let targets = [instr.get_a(), instr.get_b(), instr.get_c()];
        for &target in targets.iter().take(instr.get_count() as usize) {
            let v = if self.pending.is_empty() {
                Value::Nil
            } else {
                self.pending.remove(0)
            };
            self.set_reg(target, v)?;
        }
        if instr.get_f() {
            self.pending.clear();
        }
        Ok(())
    }

    fn for_loop_done(&mut self, triple: Instruction) -> Result<bool, VmError> {
        let var = self.reg(triple.get_a())?.clone();
        let limit = self.reg(triple.get_b())?.clone();
        let step = self.reg(triple.get_c())?.clone();
        if let (Some(s), Some(v), Some(l)) = (step.as_int(), var.as_int(), limit.as_int()) {
            return match s {
                0 => Err(RuntimeError::msg("'for' step is zero").into()),
                s if s > 0 => Ok(v > l),
                _ => Ok(v < l),
            };
        }
        let v = var
            .as_number()
            .ok_or_else(|| RuntimeError::msg("'for' initial value must be a number"))?;
        let l = limit
            .as_number()
            .ok_or_else(|| RuntimeError::msg("'for' limit must be a number"))?;
        let s = step
            .as_number()
            .ok_or_else(|| RuntimeError::msg("'for' step must be a number"))?;
        if s == 0.0 {
            return Err(RuntimeError::msg("'for' step is zero").into());
        }
        Ok(if s > 0.0 { v > l } else { v < l })
    }
}

impl Continuation for BytecodeCont {
    fn kind(&self) -> ContKind {
        ContKind::Bytecode
    }

    fn push(&mut self, value: Value) {
        self.pending.push(value);
    }

    fn step(
        mut self: Box<Self>,
        thread: &Arc<Thread>,
    ) -> Result<Option<Box<dyn Continuation>>, VmError> {
        loop {
            let instr = match self.chunk.code.get(self.pc) {
                Some(&i) => i,
                // Running off the end is an implicit return of no values.
                None => return Ok(Some(self.take_next()?)),
            };
            thread.require_cpu(1)?;
            self.pc += 1;
            match instr.layout() {
                Layout::Binary => self.binary(thread, instr)?,
                Layout::Lookup => self.lookup(instr)?,
                Layout::LoadK16 => self.load_k16(thread, instr)?,
                Layout::Unary => self.unary(instr)?,
                Layout::LoadK8 => self.load_k8(thread, instr)?,
                Layout::Jump => match JumpOp::from_y(instr.get_y()) {
                    JumpOp::Call => return self.call_or_return(instr),
                    JumpOp::Jump => self.branch(instr.get_n())?,
                    JumpOp::JumpIf => {
                        if self.reg(instr.get_a())?.truth() == instr.get_f() {
                            self.branch(instr.get_n())?;
                        }
                    }
                    JumpOp::JumpIfForLoopDone => {
                        let triple = Instruction(self.payload_word()?);
                        if self.for_loop_done(triple)? {
                            self.branch(instr.get_n())?;
                        }
                    }
                },
                Layout::Args => self.receive(instr)?,
            }
        }
    }
}

// =============================================================================
// Arithmetic Helpers
// =============================================================================

fn arith(
    x: &Value,
    y: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, VmError> {
    if let (Some(a), Some(b)) = (x.as_int(), y.as_int()) {
        return Ok(Value::Int(int_op(a, b)));
    }
    let (a, b) = numbers(x, y)?;
    Ok(Value::Float(float_op(a, b)))
}

fn numbers(x: &Value, y: &Value) -> Result<(f64, f64), VmError> {
    numbers_msg(x, y, "attempt to perform arithmetic on a")
}

fn numbers_msg(x: &Value, y: &Value, what: &str) -> Result<(f64, f64), VmError> {
    match (x.as_number(), y.as_number()) {
        (Some(a), Some(b)) => Ok((a, b)),
        (None, _) => Err(RuntimeError::msg(format!("{what} {} value", x.type_name())).into()),
        (_, None) => Err(RuntimeError::msg(format!("{what} {} value", y.type_name())).into()),
    }
}

fn ints(x: &Value, y: &Value) -> Result<(i64, i64), VmError> {
    Ok((int_operand(x)?, int_operand(y)?))
}

fn int_operand(x: &Value) -> Result<i64, VmError> {
    x.as_int().ok_or_else(|| {
        RuntimeError::msg(format!(
            "attempt to perform bitwise operation on a {} value",
            x.type_name()
        ))
        .into()
    })
}

fn floor_div(x: &Value, y: &Value) -> Result<Value, VmError> {
    if let (Some(a), Some(b)) = (x.as_int(), y.as_int()) {
        if b == 0 {
            return Err(RuntimeError::msg("attempt to perform 'n//0'").into());
        }
        let q = a.wrapping_div(b);
        let exact = a.wrapping_rem(b) == 0;
        return Ok(Value::Int(if !exact && (a < 0) != (b < 0) { q - 1 } else { q }));
    }
    let (a, b) = numbers(x, y)?;
    Ok(Value::Float((a / b).floor()))
}

fn modulo(x: &Value, y: &Value) -> Result<Value, VmError> {
    if let (Some(a), Some(b)) = (x.as_int(), y.as_int()) {
        if b == 0 {
            return Err(RuntimeError::msg("attempt to perform 'n%%0'").into());
        }
        let r = a.wrapping_rem(b);
        return Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }));
    }
    let (a, b) = numbers(x, y)?;
    Ok(Value::Float(a - (a / b).floor() * b))
}

/// Logical 64-bit shift; negative counts flip direction, counts past the
/// word width produce zero.
fn shift_left(a: i64, n: i64) -> i64 {
    if n < 0 {
        if n <= -64 {
            0
        } else {
            ((a as u64) >> (-n) as u32) as i64
        }
    } else if n >= 64 {
        0
    } else {
        ((a as u64) << n as u32) as i64
    }
}

fn bad_register() -> VmError {
    RuntimeError::internal("register out of range").into()
}

fn concat_part(v: &Value) -> Result<String, VmError> {
    match v {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(n) => Ok(n.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        other => Err(RuntimeError::msg(format!(
            "attempt to concatenate a {} value",
            other.type_name()
        ))
        .into()),
    }
}

// =============================================================================
// Tests
// =============================================================================
