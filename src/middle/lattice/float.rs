use std::hash::{Hash, Hasher};

use crate::middle::{
    graph::op::{BinaryOp, CompareOp, UnaryOp},
    lattice::{Level, Type, lift},
    primitive::PrimitiveKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    Untyped,
    Float,
    F32,
    F64,
}

impl FloatWidth {
    pub fn primitive(self) -> PrimitiveKind {
        match self {
            FloatWidth::Untyped => PrimitiveKind::UntypedFloat,
            FloatWidth::Float => PrimitiveKind::Float,
            FloatWidth::F32 => PrimitiveKind::F32,
            FloatWidth::F64 => PrimitiveKind::F64,
        }
    }

    pub fn round(self, value: f64) -> f64 {
        match self {
            FloatWidth::F32 => value as f32 as f64,
            _ => value,
        }
    }

    pub fn unify(self, other: FloatWidth) -> Option<FloatWidth> {
        match (self, other) {
            (FloatWidth::Untyped, w) | (w, FloatWidth::Untyped) => Some(w),
            (a, b) if a == b => Some(a),
            _ => None,
        }
    }
}

/// A float constant. Equality is bitwise so the lattice stays reflexive for NaN.
#[derive(Debug, Clone, Copy)]
pub struct Float64(pub f64);

impl PartialEq for Float64 {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Float64 {}

impl Hash for Float64 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl core::fmt::Display for Float64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

fn float(width: FloatWidth, level: Level<Float64>) -> Type {
    Type::Float { width, level }
}

pub(super) fn binary(
    op: BinaryOp,
    (lw, l): (FloatWidth, &Level<Float64>),
    (rw, r): (FloatWidth, &Level<Float64>),
) -> Type {
    let Some(width) = lw.unify(rw) else {
        return Type::error(format!(
            "mismatched types `{}` and `{}`",
            lw.primitive(),
            rw.primitive()
        ));
    };

    let level = lift(l, r, |a, b| {
        let value = match op {
            BinaryOp::Add => a.0 + b.0,
            BinaryOp::Subtract => a.0 - b.0,
            BinaryOp::Multiply => a.0 * b.0,
            BinaryOp::Divide => a.0 / b.0,
            BinaryOp::Modulus => a.0 % b.0,
            _ => f64::NAN,
        };

        Float64(width.round(value))
    });

    float(width, level)
}

pub(super) fn compare(
    op: CompareOp,
    (lw, l): (FloatWidth, &Level<Float64>),
    (rw, r): (FloatWidth, &Level<Float64>),
) -> Type {
    if lw.unify(rw).is_none() {
        return Type::error(format!(
            "mismatched types `{}` and `{}`",
            lw.primitive(),
            rw.primitive()
        ));
    }

    Type::Bool(lift(l, r, |a, b| match a.0.partial_cmp(&b.0) {
        Some(ordering) => op.holds(ordering),
        // Unordered: only `!=` holds
        None => op == CompareOp::NotEqual,
    }))
}

pub(super) fn unary(op: UnaryOp, width: FloatWidth, level: &Level<Float64>) -> Type {
    let level = level.map_const(|v| match op {
        UnaryOp::Negate => Float64(-v.0),
        UnaryOp::BitwiseNot | UnaryOp::LogicalNot => *v,
    });

    float(width, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_equal_to_itself_in_the_lattice() {
        assert_eq!(Float64(f64::NAN), Float64(f64::NAN));
        assert_ne!(Float64(0.0), Float64(-0.0));
    }

    #[test]
    fn nan_compares_unordered() {
        let nan = Level::Const(Float64(f64::NAN));
        let result = compare(
            CompareOp::Equal,
            (FloatWidth::F64, &nan),
            (FloatWidth::F64, &nan),
        );

        assert_eq!(result, Type::Bool(Level::Const(false)));
    }

    #[test]
    fn f32_rounds_results() {
        let result = binary(
            BinaryOp::Add,
            (FloatWidth::F32, &Level::Const(Float64(0.1))),
            (FloatWidth::Untyped, &Level::Const(Float64(0.2))),
        );

        assert_eq!(
            result,
            Type::Float {
                width: FloatWidth::F32,
                level: Level::Const(Float64((0.1f64 + 0.2) as f32 as f64)),
            }
        );
    }
}
