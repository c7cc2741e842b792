use std::rc::Rc;

use crate::middle::{
    graph::op::CompareOp,
    lattice::{Level, Type, lift},
};

/// `nil` before it has been assigned anywhere. The pointee is resolved by
/// `assign_to` or `meet` against a typed pointer.
pub fn nil() -> Type {
    Type::Pointer {
        pointee: Rc::new(Type::Void),
        level: Level::Const(()),
    }
}

pub fn is_untyped_nil(pointee: &Type, level: &Level<()>) -> bool {
    *pointee == Type::Void && level.is_const()
}

/// Pointers meet when they point to the same shape. Untyped `nil` takes on the
/// other side's pointee.
pub(super) fn meet(
    (lp, l): (&Rc<Type>, &Level<()>),
    (rp, r): (&Rc<Type>, &Level<()>),
) -> Type {
    let pointee = if is_untyped_nil(lp, l) {
        rp.clone()
    } else if is_untyped_nil(rp, r) || lp.same_shape(rp) {
        lp.clone()
    } else {
        let (a, b) = (lp.name(), rp.name());
        let (a, b) = if a <= b { (a, b) } else { (b, a) };

        return Type::error(format!("mismatched types `*{a}` and `*{b}`"));
    };

    Type::Pointer {
        pointee,
        level: l.meet(r),
    }
}

pub(super) fn compare(
    op: CompareOp,
    (lp, l): (&Rc<Type>, &Level<()>),
    (rp, r): (&Rc<Type>, &Level<()>),
) -> Type {
    if !op.is_equality() {
        return Type::error(format!(
            "operator `{}` not supported for type `*{}`",
            op.symbol(),
            lp.name()
        ));
    }

    if !(is_untyped_nil(lp, l) || is_untyped_nil(rp, r) || lp.same_shape(rp)) {
        return Type::error(format!(
            "mismatched types `*{}` and `*{}`",
            lp.name(),
            rp.name()
        ));
    }

    // Only two nils are known to be equal, a non-nil pointer has no known address
    Type::Bool(lift(l, r, |_, _| op == CompareOp::Equal))
}

pub(super) fn assign_to(
    (lp, l): (&Rc<Type>, &Level<()>),
    target_pointee: &Rc<Type>,
) -> Type {
    if is_untyped_nil(lp, l) || lp.same_shape(target_pointee) {
        Type::Pointer {
            pointee: target_pointee.clone(),
            level: l.clone(),
        }
    } else {
        Type::error(format!(
            "cannot use value of type `*{}` as `*{}`",
            lp.name(),
            target_pointee.name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_adopts_pointee_on_meet() {
        let int_ptr = Type::pointer_to(Type::int_type());
        let merged = nil().meet(&int_ptr);

        assert_eq!(merged, int_ptr);
    }

    #[test]
    fn nil_equals_nil() {
        assert_eq!(
            nil().compare(CompareOp::Equal, &nil()),
            Type::Bool(Level::Const(true))
        );
    }
}
