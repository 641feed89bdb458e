//! Bit-packed bytecode format for the Sable register VM.
//!
//! This crate is the bytecode contract between the compiler and the
//! interpreter. Key components:
//!
//! - [`Instruction`] - 32-bit packed instruction word with six structural
//!   layouts, selected on decode by a fixed priority chain of bit tests
//! - [`Layout`] - the decoded structural layout of a word
//! - [`BinOp`], [`UnOp`], [`UnOpK`], [`UnOpK16`], [`JumpOp`] - closed
//!   operation enumerations packed into the instruction word
//! - [`Reg`] - 9-bit operand register reference

mod instruction;
mod ops;

pub use instruction::{Instruction, Layout};
pub use ops::{BinOp, Flag, JumpOp, Lit8, Lit16, Reg, UnOp, UnOpK, UnOpK16};
