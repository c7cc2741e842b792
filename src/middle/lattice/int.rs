use crate::middle::{
    graph::op::{BinaryOp, CompareOp, UnaryOp},
    lattice::{Level, Type, lift},
    primitive::PrimitiveKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    /// Literal with no width yet, adopts the width of whatever it meets
    Untyped,
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
}

impl IntWidth {
    pub fn bits(self) -> Option<u32> {
        match self {
            IntWidth::Untyped => None,
            IntWidth::I8 | IntWidth::U8 => Some(8),
            IntWidth::I16 | IntWidth::U16 => Some(16),
            IntWidth::I32 | IntWidth::U32 => Some(32),
            IntWidth::Int | IntWidth::I64 | IntWidth::Uint | IntWidth::U64 => Some(64),
        }
    }

    pub fn is_signed(self) -> bool {
        !matches!(
            self,
            IntWidth::Uint | IntWidth::U8 | IntWidth::U16 | IntWidth::U32 | IntWidth::U64
        )
    }

    pub fn primitive(self) -> PrimitiveKind {
        match self {
            IntWidth::Untyped => PrimitiveKind::UntypedInt,
            IntWidth::Int => PrimitiveKind::Int,
            IntWidth::I8 => PrimitiveKind::I8,
            IntWidth::I16 => PrimitiveKind::I16,
            IntWidth::I32 => PrimitiveKind::I32,
            IntWidth::I64 => PrimitiveKind::I64,
            IntWidth::Uint => PrimitiveKind::Uint,
            IntWidth::U8 => PrimitiveKind::U8,
            IntWidth::U16 => PrimitiveKind::U16,
            IntWidth::U32 => PrimitiveKind::U32,
            IntWidth::U64 => PrimitiveKind::U64,
        }
    }

    /// Truncates `value` to this width, two's complement
    pub fn wrap(self, value: i128) -> i128 {
        let Some(bits) = self.bits() else {
            return value;
        };

        let shift = 128 - bits;

        if self.is_signed() {
            (value << shift) >> shift
        } else {
            ((value as u128) << shift >> shift) as i128
        }
    }

    pub fn fits(self, value: i128) -> bool {
        self.wrap(value) == value
    }

    /// Width of a binary operation's result, or `None` if the widths disagree
    pub fn unify(self, other: IntWidth) -> Option<IntWidth> {
        match (self, other) {
            (IntWidth::Untyped, w) | (w, IntWidth::Untyped) => Some(w),
            (a, b) if a == b => Some(a),
            _ => None,
        }
    }
}

fn int(width: IntWidth, level: Level<i128>) -> Type {
    Type::Int { width, level }
}

fn evaluate(op: BinaryOp, width: IntWidth, a: i128, b: i128) -> Result<i128, &'static str> {
    let bits = width.bits().unwrap_or(128);

    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Subtract => a.wrapping_sub(b),
        BinaryOp::Multiply => a.wrapping_mul(b),
        BinaryOp::Divide => a.wrapping_div(b),
        BinaryOp::Modulus => a.wrapping_rem(b),
        BinaryOp::BitwiseAnd => a & b,
        BinaryOp::BitwiseOr => a | b,
        BinaryOp::BitwiseXor => a ^ b,
        BinaryOp::ShiftLeft | BinaryOp::ShiftRight if b < 0 => {
            return Err("negative shift amount");
        }
        BinaryOp::ShiftLeft if b >= bits as i128 => 0,
        BinaryOp::ShiftLeft => a.wrapping_shl(b as u32),
        BinaryOp::ShiftRight if b >= bits as i128 => {
            if a < 0 {
                -1
            } else {
                0
            }
        }
        BinaryOp::ShiftRight => a >> b,
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
            return Err("logical operator on integers");
        }
    };

    Ok(width.wrap(value))
}

pub(super) fn binary(
    op: BinaryOp,
    (lw, l): (IntWidth, &Level<i128>),
    (rw, r): (IntWidth, &Level<i128>),
) -> Type {
    let width = if matches!(op, BinaryOp::ShiftLeft | BinaryOp::ShiftRight) {
        lw
    } else {
        match lw.unify(rw) {
            Some(width) => width,
            None => {
                return Type::error(format!(
                    "mismatched types `{}` and `{}`",
                    lw.primitive(),
                    rw.primitive()
                ));
            }
        }
    };

    if matches!(op, BinaryOp::Divide | BinaryOp::Modulus) && *r == Level::Const(0) {
        return Type::error("division by zero");
    }

    // Zero absorbs regardless of what is on the other side
    if matches!(op, BinaryOp::Multiply | BinaryOp::BitwiseAnd)
        && (*l == Level::Const(0) || *r == Level::Const(0))
    {
        return int(width, Level::Const(0));
    }

    if let (Level::Const(a), Level::Const(b)) = (l, r) {
        return match evaluate(op, width, *a, *b) {
            Ok(value) => int(width, Level::Const(value)),
            Err(message) => Type::error(message),
        };
    }

    int(width, lift(l, r, |_, _| 0))
}

pub(super) fn compare(
    op: CompareOp,
    (lw, l): (IntWidth, &Level<i128>),
    (rw, r): (IntWidth, &Level<i128>),
) -> Type {
    if lw.unify(rw).is_none() {
        return Type::error(format!(
            "mismatched types `{}` and `{}`",
            lw.primitive(),
            rw.primitive()
        ));
    }

    Type::Bool(lift(l, r, |a, b| op.holds(a.cmp(b))))
}

pub(super) fn unary(op: UnaryOp, width: IntWidth, level: &Level<i128>) -> Type {
    let level = level.map_const(|v| match op {
        UnaryOp::Negate => width.wrap(v.wrapping_neg()),
        UnaryOp::BitwiseNot => width.wrap(!v),
        UnaryOp::LogicalNot => *v,
    });

    int(width, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_respects_signedness() {
        assert_eq!(IntWidth::U8.wrap(256 + 7), 7);
        assert_eq!(IntWidth::U8.wrap(-1), 255);
        assert_eq!(IntWidth::I8.wrap(128), -128);
        assert_eq!(IntWidth::Untyped.wrap(1 << 100), 1 << 100);
    }

    #[test]
    fn constants_wrap_to_width() {
        let result = binary(
            BinaryOp::Add,
            (IntWidth::U8, &Level::Const(250)),
            (IntWidth::Untyped, &Level::Const(10)),
        );

        assert_eq!(result, Type::int_of(IntWidth::U8, 4));
    }

    #[test]
    fn multiply_by_zero_absorbs_bottom() {
        let result = binary(
            BinaryOp::Multiply,
            (IntWidth::Int, &Level::Bottom),
            (IntWidth::Untyped, &Level::Const(0)),
        );

        assert_eq!(result, Type::int_of(IntWidth::Int, 0));
    }

    #[test]
    fn division_by_constant_zero_is_an_error() {
        let result = binary(
            BinaryOp::Divide,
            (IntWidth::Int, &Level::Bottom),
            (IntWidth::Int, &Level::Const(0)),
        );

        assert!(result.is_error());
    }

    #[test]
    fn mismatched_widths_are_an_error() {
        let result = binary(
            BinaryOp::Add,
            (IntWidth::I32, &Level::Const(1)),
            (IntWidth::I64, &Level::Const(1)),
        );

        assert!(result.is_error());
    }

    #[test]
    fn unsigned_bitwise_not_stays_in_range() {
        assert_eq!(
            unary(UnaryOp::BitwiseNot, IntWidth::U8, &Level::Const(5)),
            Type::int_of(IntWidth::U8, 250)
        );
    }
}
