//! Structs, arrays and tuples. Their lattice values are built from the
//! lattice values of their members.

use std::rc::Rc;

use itertools::Itertools;

use crate::{
    frontend::intern::InternedSymbol,
    middle::lattice::{Level, Type},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: u32,
    pub align: u32,
}

impl Layout {
    pub const fn new(size: u32, align: u32) -> Self {
        Self { size, align }
    }

    /// Distance between consecutive elements of an array of this layout
    pub fn stride(self) -> u32 {
        self.size.next_multiple_of(self.align.max(1))
    }
}

/// Lays members out in order, each at the next offset aligned for it
pub fn sequential<'a>(members: impl IntoIterator<Item = &'a Type>) -> (Vec<u32>, Layout) {
    let mut offsets = Vec::new();
    let mut size = 0u32;
    let mut align = 1u32;

    for member in members {
        let layout = member.layout();

        size = size.next_multiple_of(layout.align.max(1));
        offsets.push(size);
        size = size.saturating_add(layout.size);
        align = align.max(layout.align);
    }

    (offsets, Layout::new(size.next_multiple_of(align), align))
}

/// Applies `f` pairwise, stopping at the first error
pub(super) fn zip_members(
    lhs: &[Type],
    rhs: &[Type],
    mut f: impl FnMut(&Type, &Type) -> Type,
) -> Result<Vec<Type>, Type> {
    lhs.iter()
        .zip(rhs)
        .map(|(l, r)| {
            let merged = f(l, r);

            if merged.is_error() { Err(merged) } else { Ok(merged) }
        })
        .collect()
}

pub(super) fn struct_type(
    name: InternedSymbol,
    fields: &[(InternedSymbol, Type)],
    values: Vec<Type>,
) -> Type {
    Type::Struct {
        name,
        fields: fields
            .iter()
            .zip(values)
            .map(|((field, _), ty)| (*field, ty))
            .collect(),
    }
}

pub(super) fn array_type(element: &Rc<Type>, values: Vec<Type>) -> Type {
    Type::Array {
        element: element.clone(),
        elements: values.into(),
    }
}

pub(super) fn name(ty: &Type) -> String {
    match ty {
        Type::Struct { name, .. } => name.to_string(),
        Type::Array { element, elements } => format!("[{}]{}", elements.len(), element.name()),
        Type::Tuple(elements) => format!("({})", elements.iter().map(Type::name).join(", ")),
        _ => unreachable!("not an aggregate"),
    }
}

/// Element at a constant index, or an error value describing why there is none
pub(super) fn index(elements: &[Type], index: &Type) -> Type {
    match index {
        Type::Int {
            level: Level::Const(i),
            ..
        } => match usize::try_from(*i).ok().and_then(|i| elements.get(i)) {
            Some(element) => element.clone(),
            None => Type::error(format!(
                "index {i} out of range for array of length {}",
                elements.len()
            )),
        },
        Type::Int { .. } => Type::error("non-constant member access"),
        Type::Error(_) => index.clone(),
        other => Type::error(format!("cannot index with a value of type `{}`", other.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::lattice::IntWidth;

    #[test]
    fn members_are_aligned() {
        let byte = Type::Int {
            width: IntWidth::U8,
            level: Level::Bottom,
        };
        let word = Type::int_type();

        let (offsets, layout) = sequential([&byte, &word, &byte]);

        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(layout, Layout::new(24, 8));
    }

    #[test]
    fn index_requires_a_constant() {
        let elements = [Type::int_type(), Type::int_type()];

        assert_eq!(index(&elements, &Type::int(1)), Type::int_type());
        assert_eq!(
            index(&elements, &Type::int_type()),
            Type::error("non-constant member access")
        );
        assert!(index(&elements, &Type::int(2)).is_error());
    }
}
