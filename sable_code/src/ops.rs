//! Operand references, literals and operation enumerations.
//!
//! Each enumeration is a closed set whose discriminants are part of the
//! bytecode contract: the packed bit patterns must never be renumbered.

// =============================================================================
// Registers and Literals
// =============================================================================

/// A 9-bit operand register reference (0-511).
///
/// The low 8 bits travel in one of the three operand bytes of an
/// instruction word; the ninth bit is folded into the top byte and
/// recovered on decode by a bit-OR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(u16);

impl Reg {
    /// Largest encodable register index.
    pub const MAX: u16 = 0x1ff;

    /// Create a register reference. Out-of-range operands are a compiler
    /// bug, not a runtime condition.
    #[inline]
    pub const fn new(idx: u16) -> Self {
        debug_assert!(idx <= Self::MAX);
        Reg(idx & Self::MAX)
    }

    #[inline]
    pub const fn idx(self) -> u16 {
        self.0
    }

    /// Pack into operand slot A (bits 16-23, extension at bit 26).
    #[inline]
    pub(crate) const fn to_a(self) -> u32 {
        ((self.0 as u32 & 0x100) << 18) | ((self.0 as u32 & 0xff) << 16)
    }

    /// Pack into operand slot B (bits 8-15, extension at bit 25).
    #[inline]
    pub(crate) const fn to_b(self) -> u32 {
        ((self.0 as u32 & 0x100) << 17) | ((self.0 as u32 & 0xff) << 8)
    }

    /// Pack into operand slot C (bits 0-7, extension at bit 24).
    #[inline]
    pub(crate) const fn to_c(self) -> u32 {
        ((self.0 as u32 & 0x100) << 16) | (self.0 as u32 & 0xff)
    }
}

impl From<u16> for Reg {
    #[inline]
    fn from(idx: u16) -> Self {
        Reg::new(idx)
    }
}

/// An unsigned 16-bit literal operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lit16(pub u16);

impl Lit16 {
    #[inline]
    pub(crate) const fn to_n(self) -> u32 {
        self.0 as u32
    }
}

/// An 8-bit literal operand, packed into slot B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lit8(pub u8);

impl Lit8 {
    #[inline]
    pub(crate) const fn to_b(self) -> u32 {
        (self.0 as u32) << 8
    }
}

/// Per-instruction flag bit (bit 27 in every non-binary layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Off,
    On,
}

impl Flag {
    #[inline]
    pub(crate) const fn to_f(self) -> u32 {
        match self {
            Flag::Off => 0,
            Flag::On => 1 << 27,
        }
    }
}

impl From<bool> for Flag {
    #[inline]
    fn from(on: bool) -> Self {
        if on { Flag::On } else { Flag::Off }
    }
}

// =============================================================================
// Binary Operations
// =============================================================================

/// Binary arithmetic / relational / concat operations.
///
/// Exactly 16 values so the selector fits the 4-bit X field of the binary
/// layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinOp {
    Add = 0,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    ShiftL,
    ShiftR,
    Eq,
    Lt,
    Leq,
    Concat,
}

impl BinOp {
    #[inline]
    pub(crate) const fn to_x(self) -> u32 {
        (self as u32) << 27
    }

    /// Decode from the 4-bit X field. Total: every 4-bit value is an op.
    #[inline]
    pub const fn from_x(x: u8) -> Self {
        match x & 0xf {
            0 => BinOp::Add,
            1 => BinOp::Sub,
            2 => BinOp::Mul,
            3 => BinOp::Div,
            4 => BinOp::FloorDiv,
            5 => BinOp::Mod,
            6 => BinOp::Pow,
            7 => BinOp::BitAnd,
            8 => BinOp::BitOr,
            9 => BinOp::BitXor,
            10 => BinOp::ShiftL,
            11 => BinOp::ShiftR,
            12 => BinOp::Eq,
            13 => BinOp::Lt,
            14 => BinOp::Leq,
            _ => BinOp::Concat,
        }
    }
}

// =============================================================================
// Unary Operations
// =============================================================================

/// Unary operations (register-to-register layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnOp {
    Neg = 0,
    BitNot,
    Len,
    /// Capture a closure from a function prototype.
    Closure,
    /// Wrap a callable into a continuation.
    Cont,
    Id,
    /// Coerce the operand to a boolean.
    Truth,
    /// Box the operand into a mutable cell.
    Cell,
}

impl UnOp {
    #[inline]
    pub(crate) const fn to_z(self) -> u32 {
        self as u32
    }

    /// Decode from the 3-bit selector in the low operand byte.
    #[inline]
    pub const fn from_z(z: u8) -> Self {
        match z & 0x7 {
            0 => UnOp::Neg,
            1 => UnOp::BitNot,
            2 => UnOp::Len,
            3 => UnOp::Closure,
            4 => UnOp::Cont,
            5 => UnOp::Id,
            6 => UnOp::Truth,
            _ => UnOp::Cell,
        }
    }
}

/// Constant-loading operations with an 8-bit literal.
///
/// `Int` and `Float` consume two trailing instruction words of literal
/// payload; `StrN` consumes `ceil(n / 4)` trailing words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnOpK {
    Nil = 0,
    Str0,
    Table,
    Str1,
    Bool,
    /// Load the current continuation.
    CC,
    Int,
    Float,
    StrN,
}

impl UnOpK {
    #[inline]
    pub(crate) const fn to_z(self) -> u32 {
        self as u32
    }

    /// Decode from the low operand byte. Values above `StrN` do not
    /// correspond to an operation.
    #[inline]
    pub const fn from_z(z: u8) -> Option<Self> {
        Some(match z {
            0 => UnOpK::Nil,
            1 => UnOpK::Str0,
            2 => UnOpK::Table,
            3 => UnOpK::Str1,
            4 => UnOpK::Bool,
            5 => UnOpK::CC,
            6 => UnOpK::Int,
            7 => UnOpK::Float,
            8 => UnOpK::StrN,
            _ => return None,
        })
    }
}

/// Constant-loading operations with a 16-bit literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnOpK16 {
    /// Sign-extended 16-bit integer literal.
    Int16 = 0,
    /// Load from the constant pool by index.
    K,
    /// Load a closure constant by index.
    ClosureK,
    /// Two-byte string literal.
    Str2,
}

impl UnOpK16 {
    #[inline]
    pub(crate) const fn to_y(self) -> u32 {
        (self as u32) << 24
    }

    /// Decode from the 2-bit Y field. Total.
    #[inline]
    pub const fn from_y(y: u8) -> Self {
        match y & 0x3 {
            0 => UnOpK16::Int16,
            1 => UnOpK16::K,
            2 => UnOpK16::ClosureK,
            _ => UnOpK16::Str2,
        }
    }
}

// =============================================================================
// Jump / Call Operations
// =============================================================================

/// Jump and call operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JumpOp {
    Call = 0,
    Jump,
    JumpIf,
    /// For-loop termination test; consumes one trailing register-triple
    /// word naming the loop variable, limit and step.
    JumpIfForLoopDone,
}

impl JumpOp {
    #[inline]
    pub(crate) const fn to_y(self) -> u32 {
        (self as u32) << 24
    }

    /// Decode from the 2-bit Y field. Total.
    #[inline]
    pub const fn from_y(y: u8) -> Self {
        match y & 0x3 {
            0 => JumpOp::Call,
            1 => JumpOp::Jump,
            2 => JumpOp::JumpIf,
            _ => JumpOp::JumpIfForLoopDone,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_packs_nine_bits() {
        let r = Reg::new(0x1ff);
        assert_eq!(r.to_a(), (1 << 26) | (0xff << 16));
        assert_eq!(r.to_b(), (1 << 25) | (0xff << 8));
        assert_eq!(r.to_c(), (1 << 24) | 0xff);
    }

    #[test]
    fn test_reg_low_only() {
        let r = Reg::new(0x42);
        assert_eq!(r.to_a(), 0x42 << 16);
        assert_eq!(r.to_b(), 0x42 << 8);
        assert_eq!(r.to_c(), 0x42);
    }

    #[test]
    fn test_binop_from_x_total() {
        for x in 0u8..16 {
            assert_eq!(BinOp::from_x(x) as u8, x);
        }
    }

    #[test]
    fn test_unop_from_z_total() {
        for z in 0u8..8 {
            assert_eq!(UnOp::from_z(z) as u8, z);
        }
    }

    #[test]
    fn test_unopk_from_z_partial() {
        for z in 0u8..9 {
            assert_eq!(UnOpK::from_z(z).map(|op| op as u8), Some(z));
        }
        assert_eq!(UnOpK::from_z(9), None);
        assert_eq!(UnOpK::from_z(0xff), None);
    }

    #[test]
    fn test_two_bit_selectors_total() {
        for y in 0u8..4 {
            assert_eq!(UnOpK16::from_y(y) as u8, y);
            assert_eq!(JumpOp::from_y(y) as u8, y);
        }
    }
}
