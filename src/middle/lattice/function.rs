use std::rc::Rc;

use itertools::Itertools;

use crate::{
    frontend::intern::InternedSymbol,
    middle::lattice::{Level, Type},
};

/// Signature of a function type, ignoring which function it is
pub(super) fn same_signature(
    (lp, lr): (&[Type], &Type),
    (rp, rr): (&[Type], &Type),
) -> bool {
    lp.len() == rp.len()
        && lp.iter().zip(rp).all(|(l, r)| l.same_shape(r))
        && lr.same_shape(rr)
}

pub(super) fn name(params: &[Type], ret: &Type) -> String {
    let params = params.iter().map(Type::name).join(", ");

    match ret {
        Type::Void => format!("func({params})"),
        ret => format!("func({params}) {}", ret.name()),
    }
}

pub(super) fn function(params: Rc<[Type]>, ret: Rc<Type>, level: Level<InternedSymbol>) -> Type {
    Type::Function { params, ret, level }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_functions_meet_to_bottom() {
        let params: Rc<[Type]> = Rc::from(vec![Type::int_type()]);
        let ret = Rc::new(Type::Void);

        let a = function(params.clone(), ret.clone(), Level::Const("a".into()));
        let b = function(params.clone(), ret.clone(), Level::Const("b".into()));

        assert_eq!(a.meet(&b), function(params, ret, Level::Bottom));
        assert_eq!(a.name(), "func(int)");
    }
}
