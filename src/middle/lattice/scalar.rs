//! Booleans, runes and strings

use crate::{
    frontend::intern::InternedSymbol,
    middle::{
        graph::op::{BinaryOp, CompareOp, UnaryOp},
        lattice::{Level, Type, lift},
    },
};

pub(super) fn bool_binary(op: BinaryOp, l: &Level<bool>, r: &Level<bool>) -> Type {
    let t = Level::Const(true);
    let f = Level::Const(false);

    match op {
        BinaryOp::LogicalAnd | BinaryOp::BitwiseAnd if *l == f || *r == f => Type::Bool(f),
        BinaryOp::LogicalOr | BinaryOp::BitwiseOr if *l == t || *r == t => Type::Bool(t),
        BinaryOp::LogicalAnd | BinaryOp::BitwiseAnd => Type::Bool(lift(l, r, |a, b| *a && *b)),
        BinaryOp::LogicalOr | BinaryOp::BitwiseOr => Type::Bool(lift(l, r, |a, b| *a || *b)),
        BinaryOp::BitwiseXor => Type::Bool(lift(l, r, |a, b| a != b)),
        _ => Type::error(format!(
            "operator `{}` not supported for type `bool`",
            op.symbol()
        )),
    }
}

pub(super) fn bool_unary(op: UnaryOp, level: &Level<bool>) -> Type {
    match op {
        UnaryOp::LogicalNot => Type::Bool(level.map_const(|b| !*b)),
        _ => Type::error(format!(
            "operator `{}` not supported for type `bool`",
            op.symbol()
        )),
    }
}

pub(super) fn string_binary(
    op: BinaryOp,
    l: &Level<InternedSymbol>,
    r: &Level<InternedSymbol>,
) -> Type {
    match op {
        BinaryOp::Add => Type::String(lift(l, r, |a, b| {
            InternedSymbol::new(&format!("{}{}", a.value(), b.value()))
        })),
        _ => Type::error(format!(
            "operator `{}` not supported for type `string`",
            op.symbol()
        )),
    }
}

pub(super) fn compare_levels<T: Ord>(op: CompareOp, l: &Level<T>, r: &Level<T>) -> Type {
    Type::Bool(lift(l, r, |a, b| op.holds(a.cmp(b))))
}

pub(super) fn string_compare(
    op: CompareOp,
    l: &Level<InternedSymbol>,
    r: &Level<InternedSymbol>,
) -> Type {
    Type::Bool(lift(l, r, |a, b| op.holds(a.value().cmp(b.value()))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_circuit_identities_absorb_bottom() {
        assert_eq!(
            bool_binary(BinaryOp::LogicalAnd, &Level::Const(false), &Level::Bottom),
            Type::Bool(Level::Const(false))
        );
        assert_eq!(
            bool_binary(BinaryOp::LogicalOr, &Level::Const(true), &Level::Bottom),
            Type::Bool(Level::Const(true))
        );
        assert_eq!(
            bool_binary(BinaryOp::LogicalAnd, &Level::Const(true), &Level::Bottom),
            Type::Bool(Level::Bottom)
        );
    }

    #[test]
    fn strings_concatenate() {
        let hello = Level::Const(InternedSymbol::new("hello, "));
        let world = Level::Const(InternedSymbol::new("world"));

        assert_eq!(
            string_binary(BinaryOp::Add, &hello, &world),
            Type::String(Level::Const(InternedSymbol::new("hello, world")))
        );
    }

    #[test]
    fn runes_order_by_code_point() {
        assert_eq!(
            compare_levels(CompareOp::Less, &Level::Const('a'), &Level::Const('b')),
            Type::Bool(Level::Const(true))
        );
    }
}
