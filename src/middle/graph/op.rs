//! Operation tags carried by graph nodes. The meaning of a node's ordered
//! inputs depends on its tag:
//!
//! | op | inputs |
//! |---|---|
//! | `Binary`, `Compare` | `[lhs, rhs]` |
//! | `Unary`, `Cast`, `Projection` | `[operand]` |
//! | `Build` | `[member...]` |
//! | `Load`, `AddressOf` | `[base]` |
//! | `Store` | `[base, value]` |
//! | `Region`, `Loop` | `[predecessor...]` |
//! | `Phi` | `[region, case...]` |
//! | `Call` | `[callee, argument...]` |
//! | `Return`, `Exit` | `[value]` (empty for a void return) |
//! | `Function` | `[return...]` appended once the body is built |

use strum::{EnumCount, EnumDiscriminants, EnumIter, IntoStaticStr};

use crate::{
    frontend::{intern::InternedSymbol, lexer::Span},
    index::simple_index,
};

simple_index! {
    /// Identifies a stack slot reserved by an `Alloca`
    pub struct SlotId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    ShiftLeft,
    ShiftRight,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulus => "%",
            BinaryOp::BitwiseAnd => "&",
            BinaryOp::BitwiseOr => "|",
            BinaryOp::BitwiseXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum UnaryOp {
    Negate,
    BitwiseNot,
    LogicalNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::BitwiseNot => "~",
            UnaryOp::LogicalNot => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Equal => "==",
            CompareOp::NotEqual => "!=",
            CompareOp::Less => "<",
            CompareOp::LessEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEqual => ">=",
        }
    }

    pub fn is_equality(self) -> bool {
        matches!(self, CompareOp::Equal | CompareOp::NotEqual)
    }

    /// Evaluates the comparison on an already computed ordering
    pub fn holds(self, ordering: core::cmp::Ordering) -> bool {
        use core::cmp::Ordering::*;

        match self {
            CompareOp::Equal => ordering == Equal,
            CompareOp::NotEqual => ordering != Equal,
            CompareOp::Less => ordering == Less,
            CompareOp::LessEqual => ordering != Greater,
            CompareOp::Greater => ordering == Greater,
            CompareOp::GreaterEqual => ordering != Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumDiscriminants)]
#[strum_discriminants(
    name(OpKind),
    derive(EnumCount, EnumIter, Hash, IntoStaticStr),
    strum(serialize_all = "snake_case")
)]
pub enum Op {
    /* Values */
    Constant,
    Binary(BinaryOp),
    Unary(UnaryOp),
    Compare(CompareOp),

    /* Structure */
    Projection(u32),
    Build,
    Alloca(SlotId),
    Load { offset: u32 },
    Store { offset: u32 },
    AddressOf { offset: u32 },
    Cast,

    /* Control */
    Start,
    Function(InternedSymbol),
    BranchTrue,
    BranchFalse,
    Region,
    Loop,

    /* Effects */
    Call,
    Return,
    Exit,
    Phi,

    Error(Span),
}

impl Op {
    pub fn kind(&self) -> OpKind {
        self.into()
    }

    pub fn is_memory_access(&self) -> bool {
        matches!(self, Op::Load { .. } | Op::Store { .. })
    }

    /// Nodes that produce control for the nodes that hang off them
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Op::Start
                | Op::Function(_)
                | Op::BranchTrue
                | Op::BranchFalse
                | Op::Region
                | Op::Loop
        )
    }

    /// Byte offset addressed by a memory access, if any
    pub fn offset(&self) -> Option<u32> {
        match self {
            Op::Load { offset } | Op::Store { offset } | Op::AddressOf { offset } => Some(*offset),
            _ => None,
        }
    }
}

impl core::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name: &'static str = self.kind().into();

        match self {
            Op::Binary(op) => write!(f, "{name}.{}", <&'static str>::from(op)),
            Op::Unary(op) => write!(f, "{name}.{}", <&'static str>::from(op)),
            Op::Compare(op) => write!(f, "{name}.{}", <&'static str>::from(op)),
            Op::Projection(index) => write!(f, "{name}.{index}"),
            Op::Alloca(slot) => write!(f, "{name}#{slot}"),
            Op::Load { offset } | Op::Store { offset } | Op::AddressOf { offset } => {
                write!(f, "{name}+{offset}")
            }
            Op::Function(symbol) => write!(f, "{name} {symbol}"),
            _ => f.write_str(name),
        }
    }
}

/// A set of [`OpKind`]s, used by peephole passes to declare what they rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpMask(u32);

const _: () = assert!(OpKind::COUNT <= u32::BITS as usize);

impl OpMask {
    pub const EMPTY: Self = Self(0);

    pub const fn of(kinds: &[OpKind]) -> Self {
        let mut bits = 0;
        let mut i = 0;

        while i < kinds.len() {
            bits |= 1 << kinds[i] as u32;
            i += 1;
        }

        Self(bits)
    }

    pub fn contains(self, kind: OpKind) -> bool {
        self.0 & (1 << kind as u32) != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_contains_only_listed_kinds() {
        let mask = OpMask::of(&[OpKind::Phi, OpKind::Region]);

        assert!(mask.contains(OpKind::Phi));
        assert!(mask.contains(OpKind::Region));
        assert!(!mask.contains(OpKind::Load));
        assert!(!OpMask::EMPTY.contains(OpKind::Constant));
    }

    #[test]
    fn display_includes_payload() {
        assert_eq!(Op::Binary(BinaryOp::Add).to_string(), "binary.add");
        assert_eq!(Op::Load { offset: 8 }.to_string(), "load+8");
        assert_eq!(Op::Projection(1).to_string(), "projection.1");
    }
}
