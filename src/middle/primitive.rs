use strum::{EnumIter, EnumString};

use crate::middle::{
    graph::op::{BinaryOp, CompareOp, UnaryOp},
    lattice::{FloatWidth, IntWidth, Level, Type},
};

/// Built-in scalar types. The untyped kinds belong to literals and are not
/// nameable in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum PrimitiveKind {
    #[strum(disabled)]
    UntypedInt,
    #[strum(disabled)]
    UntypedFloat,
    Int,
    I8,
    I16,
    I32,
    I64,
    Uint,
    U8,
    U16,
    U32,
    U64,
    Float,
    F32,
    F64,
    Bool,
    String,
    Rune,
}

impl core::fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimitiveKind::UntypedInt => write!(f, "untyped int"),
            PrimitiveKind::UntypedFloat => write!(f, "untyped float"),
            PrimitiveKind::Int => write!(f, "int"),
            PrimitiveKind::I8 => write!(f, "i8"),
            PrimitiveKind::I16 => write!(f, "i16"),
            PrimitiveKind::I32 => write!(f, "i32"),
            PrimitiveKind::I64 => write!(f, "i64"),
            PrimitiveKind::Uint => write!(f, "uint"),
            PrimitiveKind::U8 => write!(f, "u8"),
            PrimitiveKind::U16 => write!(f, "u16"),
            PrimitiveKind::U32 => write!(f, "u32"),
            PrimitiveKind::U64 => write!(f, "u64"),
            PrimitiveKind::Float => write!(f, "float"),
            PrimitiveKind::F32 => write!(f, "f32"),
            PrimitiveKind::F64 => write!(f, "f64"),
            PrimitiveKind::Bool => write!(f, "bool"),
            PrimitiveKind::String => write!(f, "string"),
            PrimitiveKind::Rune => write!(f, "rune"),
        }
    }
}

impl PrimitiveKind {
    pub fn is_integer(&self) -> bool {
        self.int_width().is_some()
    }

    pub fn is_float(&self) -> bool {
        self.float_width().is_some()
    }

    pub fn int_width(&self) -> Option<IntWidth> {
        Some(match self {
            PrimitiveKind::UntypedInt => IntWidth::Untyped,
            PrimitiveKind::Int => IntWidth::Int,
            PrimitiveKind::I8 => IntWidth::I8,
            PrimitiveKind::I16 => IntWidth::I16,
            PrimitiveKind::I32 => IntWidth::I32,
            PrimitiveKind::I64 => IntWidth::I64,
            PrimitiveKind::Uint => IntWidth::Uint,
            PrimitiveKind::U8 => IntWidth::U8,
            PrimitiveKind::U16 => IntWidth::U16,
            PrimitiveKind::U32 => IntWidth::U32,
            PrimitiveKind::U64 => IntWidth::U64,
            _ => return None,
        })
    }

    pub fn float_width(&self) -> Option<FloatWidth> {
        Some(match self {
            PrimitiveKind::UntypedFloat => FloatWidth::Untyped,
            PrimitiveKind::Float => FloatWidth::Float,
            PrimitiveKind::F32 => FloatWidth::F32,
            PrimitiveKind::F64 => FloatWidth::F64,
            _ => return None,
        })
    }

    /// The declared type: this kind's lattice value at bottom
    pub fn bottom_type(&self) -> Type {
        if let Some(width) = self.int_width() {
            return Type::Int {
                width,
                level: Level::Bottom,
            };
        }

        if let Some(width) = self.float_width() {
            return Type::Float {
                width,
                level: Level::Bottom,
            };
        }

        match self {
            PrimitiveKind::Bool => Type::Bool(Level::Bottom),
            PrimitiveKind::String => Type::String(Level::Bottom),
            PrimitiveKind::Rune => Type::Rune(Level::Bottom),
            _ => unreachable!("numeric kinds are handled above"),
        }
    }

    pub fn supports_binary_op(&self, op: BinaryOp) -> bool {
        match self {
            // All ops besides logical
            kind if kind.is_integer() => match op {
                BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulus
                | BinaryOp::BitwiseAnd
                | BinaryOp::BitwiseOr
                | BinaryOp::BitwiseXor
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight => true,
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => false,
            },
            // No bitwise or logical ops
            kind if kind.is_float() => match op {
                BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulus => true,
                BinaryOp::LogicalAnd
                | BinaryOp::LogicalOr
                | BinaryOp::BitwiseAnd
                | BinaryOp::BitwiseOr
                | BinaryOp::BitwiseXor
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight => false,
            },
            // Logical ops, and the non short-circuiting bitwise forms
            PrimitiveKind::Bool => match op {
                BinaryOp::LogicalAnd
                | BinaryOp::LogicalOr
                | BinaryOp::BitwiseAnd
                | BinaryOp::BitwiseOr
                | BinaryOp::BitwiseXor => true,
                BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulus
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight => false,
            },
            // Concatenation only
            PrimitiveKind::String => op == BinaryOp::Add,
            _ => false,
        }
    }

    pub fn supports_compare_op(&self, op: CompareOp) -> bool {
        match self {
            PrimitiveKind::Bool => op.is_equality(),
            _ => true,
        }
    }

    pub fn supports_unary_op(&self, op: UnaryOp) -> bool {
        match self {
            kind if kind.is_integer() => match op {
                UnaryOp::Negate | UnaryOp::BitwiseNot => true,
                UnaryOp::LogicalNot => false,
            },
            kind if kind.is_float() => op == UnaryOp::Negate,
            PrimitiveKind::Bool => op == UnaryOp::LogicalNot,
            _ => false,
        }
    }

    pub fn can_be_cast_to(&self, target: Self) -> bool {
        match self {
            kind if kind.is_integer() => match target {
                target if target.is_integer() || target.is_float() => true,
                PrimitiveKind::Rune | PrimitiveKind::String | PrimitiveKind::Bool => true,
                _ => false,
            },
            kind if kind.is_float() => target.is_integer() || target.is_float(),
            PrimitiveKind::Rune => {
                target.is_integer() || matches!(target, PrimitiveKind::Rune | PrimitiveKind::String)
            }
            PrimitiveKind::Bool => target.is_integer() || target == PrimitiveKind::Bool,
            PrimitiveKind::String => target == PrimitiveKind::String,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn untyped_kinds_are_not_nameable() {
        assert_eq!("u16".parse::<PrimitiveKind>(), Ok(PrimitiveKind::U16));
        assert!("untypedint".parse::<PrimitiveKind>().is_err());
        assert!("untyped_int".parse::<PrimitiveKind>().is_err());
    }

    #[test]
    fn every_kind_casts_to_itself() {
        for kind in PrimitiveKind::iter() {
            assert!(kind.can_be_cast_to(kind), "{kind} should cast to itself");
        }
    }

    #[test]
    fn bool_has_no_arithmetic() {
        assert!(!PrimitiveKind::Bool.supports_binary_op(BinaryOp::Add));
        assert!(PrimitiveKind::Bool.supports_binary_op(BinaryOp::LogicalAnd));
        assert!(!PrimitiveKind::Bool.supports_compare_op(CompareOp::Less));
    }
}
