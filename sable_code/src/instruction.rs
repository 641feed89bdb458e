//! The packed 32-bit instruction word.
//!
//! Six structural layouts share one word; the top bits select the layout
//! on decode through a fixed priority chain:
//!
//! ```text
//! Binary:  1XXXXabc AAAAAAAA BBBBBBBB CCCCCCCC   binary ops
//! Lookup:  0111Fabc AAAAAAAA BBBBBBBB CCCCCCCC   table lookup / setting
//! LoadK16: 0110FaYY AAAAAAAA NNNNNNNN NNNNNNNN   reg from constant (16-bit)
//! Unary:   0101Fab1 AAAAAAAA BBBBBBBB CCCCCCCC   unary ops
//! LoadK8:  0101Fa00 AAAAAAAA BBBBBBBB CCCCCCCC   reg from constant (8-bit)
//! Jump:    0100FaYY AAAAAAAA NNNNNNNN NNNNNNNN   jump / call
//! Args:    00RRFabc AAAAAAAA BBBBBBBB CCCCCCCC   receiving args / closures
//! ```
//!
//! `a`/`b`/`c` are the ninth bits of the three register operands, `F` is
//! the flag bit, `X`/`Y` are operation selectors, `N` a 16-bit literal and
//! `RR` a 2-bit count. The layouts deliberately overlap bit ranges and are
//! disambiguated only by the priority order encoded in [`Instruction::layout`];
//! a decoder that tests in any other order will misread words silently.

use crate::ops::{BinOp, Flag, JumpOp, Lit8, Lit16, Reg, UnOp, UnOpK, UnOpK16};

/// Layout prefix for binary operations (bit 31).
pub const BINARY_PFX: u32 = 1 << 31;
/// Layout prefix for table lookup / set.
pub const LOOKUP_PFX: u32 = 7 << 28;
/// Layout prefix for 16-bit constant loads.
pub const LOADK16_PFX: u32 = 6 << 28;
/// Layout prefix shared by unary ops and 8-bit constant loads.
pub const UNARY_PFX: u32 = 5 << 28;
/// Layout prefix for jumps and calls.
pub const JUMP_PFX: u32 = 4 << 28;

/// A packed instruction word.
///
/// Immutable once constructed: the compiler encodes, the interpreter only
/// reads. Encoding never fails; operand range checking is the encoder's
/// caller's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

/// The structural layout of an instruction word, fully determined by the
/// priority-chain bit tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Binary op: `dst = src1 <op> src2`.
    Binary,
    /// Table lookup (flag off) or table set (flag on).
    Lookup,
    /// Register from constant, 16-bit literal.
    LoadK16,
    /// Unary op: `dst = <op> src`.
    Unary,
    /// Register from constant, 8-bit literal (may consume payload words).
    LoadK8,
    /// Jump, conditional jump, call or for-loop test.
    Jump,
    /// Receiving arguments / closure creation, with a 2-bit count.
    Args,
}

// =============================================================================
// Constructors
// =============================================================================

impl Instruction {
    /// Binary operation: `rA = rB <op> rC`.
    #[inline]
    pub const fn binary(op: BinOp, ra: Reg, rb: Reg, rc: Reg) -> Self {
        Instruction(BINARY_PFX | ra.to_a() | rb.to_b() | rc.to_c() | op.to_x())
    }

    /// Table access: flag off is `rA = rB[rC]`, flag on is `rB[rC] = rA`.
    #[inline]
    pub const fn lookup(f: Flag, ra: Reg, rb: Reg, rc: Reg) -> Self {
        Instruction(LOOKUP_PFX | ra.to_a() | rb.to_b() | rc.to_c() | f.to_f())
    }

    /// Load a constant selected by `op` and a 16-bit literal into `rA`.
    #[inline]
    pub const fn load_k16(f: Flag, op: UnOpK16, ra: Reg, k: Lit16) -> Self {
        Instruction(LOADK16_PFX | f.to_f() | op.to_y() | ra.to_a() | k.to_n())
    }

    /// Unary operation: `rA = <op> rB`.
    #[inline]
    pub const fn unary(f: Flag, op: UnOp, ra: Reg, rb: Reg) -> Self {
        Instruction(UNARY_PFX | 1 << 24 | f.to_f() | op.to_z() | ra.to_a() | rb.to_b())
    }

    /// Load a constant selected by `op` and an 8-bit literal into `rA`.
    #[inline]
    pub const fn load_k8(f: Flag, op: UnOpK, ra: Reg, k: Lit8) -> Self {
        Instruction(UNARY_PFX | f.to_f() | ra.to_a() | k.to_b() | op.to_z())
    }

    /// Jump or call with a 16-bit literal operand.
    #[inline]
    pub const fn jump(f: Flag, op: JumpOp, ra: Reg, k: Lit16) -> Self {
        Instruction(JUMP_PFX | f.to_f() | op.to_y() | ra.to_a() | k.to_n())
    }

    /// Receive `n` (0-3) pending values / create a closure.
    #[inline]
    pub const fn args(f: Flag, n: u8, ra: Reg, rb: Reg, rc: Reg) -> Self {
        Instruction(((n as u32 & 0x3) << 28) | f.to_f() | ra.to_a() | rb.to_b() | rc.to_c())
    }

    /// Bare register triple, used as the trailing payload word of
    /// [`JumpOp::JumpIfForLoopDone`].
    #[inline]
    pub const fn triple(ra: Reg, rb: Reg, rc: Reg) -> Self {
        Instruction(ra.to_a() | rb.to_b() | rc.to_c())
    }

    /// Raw payload word (literal halves of `Int`/`Float`/`StrN` loads).
    #[inline]
    pub const fn payload(word: u32) -> Self {
        Instruction(word)
    }
}

// =============================================================================
// Decode Accessors
// =============================================================================

impl Instruction {
    /// Operand register A (low byte at bits 16-23, ninth bit at bit 26).
    #[inline]
    pub const fn get_a(self) -> Reg {
        Reg::new(((self.0 >> 18 & 0x100) | (self.0 >> 16 & 0xff)) as u16)
    }

    /// Operand register B (low byte at bits 8-15, ninth bit at bit 25).
    #[inline]
    pub const fn get_b(self) -> Reg {
        Reg::new(((self.0 >> 17 & 0x100) | (self.0 >> 8 & 0xff)) as u16)
    }

    /// Operand register C (low byte at bits 0-7, ninth bit at bit 24).
    #[inline]
    pub const fn get_c(self) -> Reg {
        Reg::new(((self.0 >> 16 & 0x100) | (self.0 & 0xff)) as u16)
    }

    /// The 16-bit literal field.
    #[inline]
    pub const fn get_n(self) -> u16 {
        self.0 as u16
    }

    /// The 4-bit binary-op selector.
    #[inline]
    pub const fn get_x(self) -> BinOp {
        BinOp::from_x((self.0 >> 27 & 0xf) as u8)
    }

    /// The 2-bit sub-operation selector of the LoadK16/Jump layouts.
    #[inline]
    pub const fn get_y(self) -> u8 {
        (self.0 >> 24 & 0x3) as u8
    }

    /// The low-byte operation selector of the Unary/LoadK8 layouts.
    #[inline]
    pub const fn get_z(self) -> u8 {
        self.0 as u8
    }

    /// The flag bit (bit 27).
    #[inline]
    pub const fn get_f(self) -> bool {
        self.0 & (1 << 27) != 0
    }

    /// The top nibble; for the Args layout its low two bits are the count.
    #[inline]
    pub const fn get_type(self) -> u8 {
        (self.0 >> 28) as u8
    }

    /// The 2-bit receive count of the Args layout.
    #[inline]
    pub const fn get_count(self) -> u8 {
        (self.0 >> 28 & 0x3) as u8
    }

    /// The raw word, for payload reads.
    #[inline]
    pub const fn word(self) -> u32 {
        self.0
    }
}

// =============================================================================
// Layout Recovery
// =============================================================================

impl Instruction {
    #[inline]
    pub const fn has_binary_layout(self) -> bool {
        self.0 & (1 << 31) != 0
    }

    #[inline]
    pub const fn has_lookup_or_unary_layout(self) -> bool {
        self.0 & (1 << 28) != 0
    }

    #[inline]
    pub const fn has_subtype_flag_set(self) -> bool {
        self.0 & (1 << 29) != 0
    }

    /// Bit 24 disambiguates the unary layout from the 8-bit constant load.
    #[inline]
    pub const fn has_unary_marker(self) -> bool {
        self.0 & (1 << 24) != 0
    }

    /// Recover the layout of this word.
    ///
    /// Tests run in the documented priority order (bit 31, then the top
    /// nibble, then bit 24); every 32-bit word selects exactly one layout.
    #[inline]
    pub const fn layout(self) -> Layout {
        if self.has_binary_layout() {
            return Layout::Binary;
        }
        match self.get_type() {
            0x7 => Layout::Lookup,
            0x6 => Layout::LoadK16,
            0x5 => {
                if self.has_unary_marker() {
                    Layout::Unary
                } else {
                    Layout::LoadK8
                }
            }
            0x4 => Layout::Jump,
            _ => Layout::Args,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
