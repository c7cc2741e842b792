//! The type lattice. Every graph node carries a [`Type`], which is both its
//! static type and everything known about its value at compile time.
//!
//! Each scalar category is a three level lattice:
//!
//! ```text
//!            Top            nothing known yet (unreachable, or not computed)
//!      /   /  |  \   \
//!    ... c1  c2  c3 ...     a single known constant
//!      \   \  |  /   /
//!           Bottom          any value of the category
//! ```
//!
//! Aggregates compose the lattices of their members. `meet` moves down the
//! lattice and is used wherever values merge.

use std::{iter, rc::Rc};

use itertools::Itertools;

use crate::{
    frontend::intern::InternedSymbol,
    middle::{
        graph::op::{BinaryOp, CompareOp, UnaryOp},
        primitive::PrimitiveKind,
    },
};

pub mod aggregate;
mod float;
mod function;
mod int;
pub mod pointer;
mod scalar;

pub use self::{
    aggregate::Layout,
    float::{Float64, FloatWidth},
    int::IntWidth,
};

/// Most scalars a value may hold once nested aggregates are flattened. Loads,
/// stores and zero values of aggregates are built member by member.
pub const MAX_SCALARS: u64 = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Level<T> {
    Top,
    Const(T),
    Bottom,
}

impl<T: Clone + PartialEq> Level<T> {
    pub fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Level::Top, x) | (x, Level::Top) => x.clone(),
            (Level::Const(a), Level::Const(b)) if a == b => Level::Const(a.clone()),
            _ => Level::Bottom,
        }
    }
}

impl<T> Level<T> {
    pub fn is_const(&self) -> bool {
        matches!(self, Level::Const(_))
    }

    pub fn as_const(&self) -> Option<&T> {
        match self {
            Level::Const(value) => Some(value),
            _ => None,
        }
    }

    pub fn map_const<U>(&self, f: impl FnOnce(&T) -> U) -> Level<U> {
        self.then_const(|value| Level::Const(f(value)))
    }

    pub fn then_const<U>(&self, f: impl FnOnce(&T) -> Level<U>) -> Level<U> {
        match self {
            Level::Top => Level::Top,
            Level::Const(value) => f(value),
            Level::Bottom => Level::Bottom,
        }
    }
}

/// Combines two operand levels: bottom on either side wins, then top, and two
/// constants are evaluated with `f`.
fn lift<A, B, R>(l: &Level<A>, r: &Level<B>, f: impl FnOnce(&A, &B) -> R) -> Level<R> {
    match (l, r) {
        (Level::Bottom, _) | (_, Level::Bottom) => Level::Bottom,
        (Level::Top, _) | (_, Level::Top) => Level::Top,
        (Level::Const(a), Level::Const(b)) => Level::Const(f(a, b)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Liveness {
    Dead,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int {
        width: IntWidth,
        level: Level<i128>,
    },
    Float {
        width: FloatWidth,
        level: Level<Float64>,
    },
    Bool(Level<bool>),
    Rune(Level<char>),
    String(Level<InternedSymbol>),
    /// `Const(())` is `nil`
    Pointer {
        pointee: Rc<Type>,
        level: Level<()>,
    },
    Struct {
        name: InternedSymbol,
        fields: Rc<[(InternedSymbol, Type)]>,
    },
    Array {
        element: Rc<Type>,
        elements: Rc<[Type]>,
    },
    Tuple(Rc<[Type]>),
    /// `Const(name)` is a reference to a known function
    Function {
        params: Rc<[Type]>,
        ret: Rc<Type>,
        level: Level<InternedSymbol>,
    },
    Void,
    Control(Liveness),
    Memory,
    Error(Rc<str>),
}

/* Constructors */
impl Type {
    /// An untyped integer constant
    pub fn int(value: i128) -> Type {
        Type::int_of(IntWidth::Untyped, value)
    }

    pub fn int_of(width: IntWidth, value: i128) -> Type {
        Type::Int {
            width,
            level: Level::Const(width.wrap(value)),
        }
    }

    /// The declared type `int`
    pub fn int_type() -> Type {
        Type::Int {
            width: IntWidth::Int,
            level: Level::Bottom,
        }
    }

    /// An untyped float constant
    pub fn float(value: f64) -> Type {
        Type::Float {
            width: FloatWidth::Untyped,
            level: Level::Const(Float64(value)),
        }
    }

    pub fn bool(value: bool) -> Type {
        Type::Bool(Level::Const(value))
    }

    pub fn rune(value: char) -> Type {
        Type::Rune(Level::Const(value))
    }

    pub fn string(value: &str) -> Type {
        Type::String(Level::Const(InternedSymbol::new(value)))
    }

    pub fn pointer_to(pointee: Type) -> Type {
        Type::Pointer {
            pointee: Rc::new(pointee),
            level: Level::Bottom,
        }
    }

    pub fn live() -> Type {
        Type::Control(Liveness::Live)
    }

    pub fn dead() -> Type {
        Type::Control(Liveness::Dead)
    }

    pub fn error(message: impl Into<String>) -> Type {
        Type::Error(message.into().into())
    }

    pub fn function(params: Vec<Type>, ret: Type, name: Option<InternedSymbol>) -> Type {
        function::function(
            params.into(),
            Rc::new(ret),
            name.map_or(Level::Bottom, Level::Const),
        )
    }

    pub fn tuple(elements: Vec<Type>) -> Type {
        Type::Tuple(elements.into())
    }

    /// `None` if the array would hold more than [`MAX_SCALARS`] scalars
    pub fn array(element: Type, length: usize) -> Option<Type> {
        let scalars = element.scalar_count().checked_mul(length as u64)?;

        if scalars > MAX_SCALARS {
            return None;
        }

        Some(Type::Array {
            elements: vec![element.clone(); length].into(),
            element: Rc::new(element),
        })
    }
}

/* Queries */
impl Type {
    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error(_))
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, Type::Control(Liveness::Dead))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float { .. })
    }

    /// Number of scalars in a value of this type, counting through nested
    /// aggregates
    pub fn scalar_count(&self) -> u64 {
        match self {
            Type::Struct { fields, .. } => fields
                .iter()
                .map(|(_, ty)| ty.scalar_count())
                .fold(0, u64::saturating_add),
            Type::Tuple(elements) => elements
                .iter()
                .map(Type::scalar_count)
                .fold(0, u64::saturating_add),
            Type::Array { element, elements } => element
                .scalar_count()
                .saturating_mul(elements.len() as u64),
            _ => 1,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Type::Struct { .. } | Type::Array { .. } | Type::Tuple(_)
        )
    }

    /// Whether the value is completely known at compile time
    pub fn is_constant(&self) -> bool {
        match self {
            Type::Int { level, .. } => level.is_const(),
            Type::Float { level, .. } => level.is_const(),
            Type::Bool(level) => level.is_const(),
            Type::Rune(level) => level.is_const(),
            Type::String(level) => level.is_const(),
            Type::Pointer { level, .. } => level.is_const(),
            Type::Function { level, .. } => level.is_const(),
            Type::Struct { .. } | Type::Array { .. } | Type::Tuple(_) => {
                self.member_types().iter().all(Type::is_constant)
            }
            Type::Void | Type::Control(_) | Type::Memory | Type::Error(_) => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Type::Bool(Level::Const(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Type::Int {
                level: Level::Const(value),
                ..
            } => Some(*value),
            _ => None,
        }
    }

    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            Type::Int { width, .. } => Some(width.primitive()),
            Type::Float { width, .. } => Some(width.primitive()),
            Type::Bool(_) => Some(PrimitiveKind::Bool),
            Type::Rune(_) => Some(PrimitiveKind::Rune),
            Type::String(_) => Some(PrimitiveKind::String),
            _ => None,
        }
    }

    /// Whether both values have the same declared type, whatever their levels
    pub fn same_shape(&self, other: &Type) -> bool {
        self.bottom() == other.bottom()
    }

    /// Name of the type without anything known about the value
    pub fn name(&self) -> String {
        match self {
            Type::Int { width, .. } => width.primitive().to_string(),
            Type::Float { width, .. } => width.primitive().to_string(),
            Type::Bool(_) => "bool".into(),
            Type::Rune(_) => "rune".into(),
            Type::String(_) => "string".into(),
            Type::Pointer { pointee, level } if pointer::is_untyped_nil(pointee, level) => {
                "nil".into()
            }
            Type::Pointer { pointee, .. } => format!("*{}", pointee.name()),
            Type::Struct { .. } | Type::Array { .. } | Type::Tuple(_) => aggregate::name(self),
            Type::Function { params, ret, .. } => function::name(params, ret),
            Type::Void => "void".into(),
            Type::Control(_) => "control".into(),
            Type::Memory => "memory".into(),
            Type::Error(_) => "error".into(),
        }
    }
}

/// Names are sorted so the error does not depend on operand order
fn mismatched(lhs: &Type, rhs: &Type) -> Type {
    let (a, b) = (lhs.name(), rhs.name());
    let (a, b) = if a <= b { (a, b) } else { (b, a) };

    Type::error(format!("mismatched types `{a}` and `{b}`"))
}

fn unsupported(symbol: &str, ty: &Type) -> Type {
    Type::error(format!(
        "operator `{symbol}` not supported for type `{}`",
        ty.name()
    ))
}

/* Lattice structure */
impl Type {
    pub fn meet(&self, other: &Type) -> Type {
        match (self, other) {
            (Type::Error(a), Type::Error(b)) => Type::Error(a.min(b).clone()),
            (Type::Error(_), _) => self.clone(),
            (_, Type::Error(_)) => other.clone(),

            (
                Type::Int {
                    width: lw,
                    level: l,
                },
                Type::Int {
                    width: rw,
                    level: r,
                },
            ) => match lw.unify(*rw) {
                Some(width) => Type::Int {
                    width,
                    level: l.meet(r),
                },
                None => mismatched(self, other),
            },
            (
                Type::Float {
                    width: lw,
                    level: l,
                },
                Type::Float {
                    width: rw,
                    level: r,
                },
            ) => match lw.unify(*rw) {
                Some(width) => Type::Float {
                    width,
                    level: l.meet(r),
                },
                None => mismatched(self, other),
            },
            (Type::Bool(l), Type::Bool(r)) => Type::Bool(l.meet(r)),
            (Type::Rune(l), Type::Rune(r)) => Type::Rune(l.meet(r)),
            (Type::String(l), Type::String(r)) => Type::String(l.meet(r)),
            (
                Type::Pointer {
                    pointee: lp,
                    level: l,
                },
                Type::Pointer {
                    pointee: rp,
                    level: r,
                },
            ) => pointer::meet((lp, l), (rp, r)),

            (
                Type::Struct { name: ln, fields },
                Type::Struct { name: rn, .. },
            ) if ln == rn => self.zip_with(other, Type::meet, |values| {
                aggregate::struct_type(*ln, fields, values)
            }),
            (
                Type::Array {
                    element,
                    elements: l,
                },
                Type::Array { elements: r, .. },
            ) if l.len() == r.len() => {
                self.zip_with(other, Type::meet, |values| aggregate::array_type(element, values))
            }
            (Type::Tuple(l), Type::Tuple(r)) if l.len() == r.len() => {
                self.zip_with(other, Type::meet, Type::tuple)
            }

            (
                Type::Function {
                    params: lp,
                    ret: lr,
                    level: l,
                },
                Type::Function {
                    params: rp,
                    ret: rr,
                    level: r,
                },
            ) if function::same_signature((lp, lr), (rp, rr)) => {
                function::function(lp.clone(), lr.clone(), l.meet(r))
            }

            (Type::Void, Type::Void) => Type::Void,
            (Type::Memory, Type::Memory) => Type::Memory,
            (Type::Control(l), Type::Control(r)) => Type::Control((*l).max(*r)),

            _ => mismatched(self, other),
        }
    }

    fn zip_with(
        &self,
        other: &Type,
        f: impl FnMut(&Type, &Type) -> Type,
        rebuild: impl FnOnce(Vec<Type>) -> Type,
    ) -> Type {
        match aggregate::zip_members(&self.member_types(), &other.member_types(), f) {
            Ok(values) => rebuild(values),
            Err(error) => error,
        }
    }

    /// Merge of two values reaching the same join point
    pub fn phi(&self, other: &Type) -> Type {
        if self == other {
            self.clone()
        } else {
            self.meet(other)
        }
    }

    pub fn top(&self) -> Type {
        self.with_levels(false)
    }

    pub fn bottom(&self) -> Type {
        self.with_levels(true)
    }

    fn with_levels(&self, bottom: bool) -> Type {
        fn pick<T: Clone>(bottom: bool) -> Level<T> {
            if bottom { Level::Bottom } else { Level::Top }
        }

        match self {
            Type::Int { width, .. } => Type::Int {
                width: *width,
                level: pick(bottom),
            },
            Type::Float { width, .. } => Type::Float {
                width: *width,
                level: pick(bottom),
            },
            Type::Bool(_) => Type::Bool(pick(bottom)),
            Type::Rune(_) => Type::Rune(pick(bottom)),
            Type::String(_) => Type::String(pick(bottom)),
            Type::Pointer { pointee, .. } => Type::Pointer {
                pointee: pointee.clone(),
                level: pick(bottom),
            },
            Type::Function { params, ret, .. } => {
                function::function(params.clone(), ret.clone(), pick(bottom))
            }
            Type::Struct { .. } | Type::Array { .. } | Type::Tuple(_) => self.with_members(
                self.member_types()
                    .iter()
                    .map(|member| member.with_levels(bottom))
                    .collect(),
            ),
            Type::Control(_) if bottom => Type::live(),
            Type::Control(_) => Type::dead(),
            Type::Void | Type::Memory | Type::Error(_) => self.clone(),
        }
    }

    /// The value a declaration without an initializer starts with
    pub fn zero(&self) -> Type {
        match self {
            Type::Int { width, .. } => Type::int_of(*width, 0),
            Type::Float { width, .. } => Type::Float {
                width: *width,
                level: Level::Const(Float64(0.0)),
            },
            Type::Bool(_) => Type::bool(false),
            Type::Rune(_) => Type::rune('\0'),
            Type::String(_) => Type::string(""),
            Type::Pointer { pointee, .. } => Type::Pointer {
                pointee: pointee.clone(),
                level: Level::Const(()),
            },
            Type::Struct { .. } | Type::Array { .. } | Type::Tuple(_) => {
                let members = self.member_types().iter().map(Type::zero).collect_vec();

                match members.iter().find(|member| member.is_error()) {
                    Some(error) => error.clone(),
                    None => self.with_members(members),
                }
            }
            Type::Function { .. } => Type::error(format!(
                "`{}` has no zero value and must be initialized",
                self.name()
            )),
            Type::Void | Type::Control(_) | Type::Memory | Type::Error(_) => self.clone(),
        }
    }

    /// Replaces untyped literal widths with their defaults
    pub fn concrete(&self) -> Type {
        match self {
            Type::Int {
                width: IntWidth::Untyped,
                level,
            } => Type::Int {
                width: IntWidth::Int,
                level: level.map_const(|v| IntWidth::Int.wrap(*v)),
            },
            Type::Float {
                width: FloatWidth::Untyped,
                level,
            } => Type::Float {
                width: FloatWidth::Float,
                level: level.clone(),
            },
            Type::Struct { .. } | Type::Array { .. } | Type::Tuple(_) => {
                self.with_members(self.member_types().iter().map(Type::concrete).collect())
            }
            _ => self.clone(),
        }
    }
}

/* Operators */
impl Type {
    /// Untyped integer constants used next to a float become floats
    fn promote(&self, other: &Type) -> Type {
        match (self, other) {
            (
                Type::Int {
                    width: IntWidth::Untyped,
                    level,
                },
                Type::Float { .. },
            ) => Type::Float {
                width: FloatWidth::Untyped,
                level: level.map_const(|v| Float64(*v as f64)),
            },
            _ => self.clone(),
        }
    }

    pub fn binary(&self, op: BinaryOp, rhs: &Type) -> Type {
        if self.is_error() {
            return self.clone();
        }
        if rhs.is_error() {
            return rhs.clone();
        }

        let (lhs, rhs) = (self.promote(rhs), rhs.promote(self));

        let Some(kind) = lhs.primitive() else {
            return unsupported(op.symbol(), &lhs);
        };
        if !kind.supports_binary_op(op) {
            return unsupported(op.symbol(), &lhs);
        }

        match (&lhs, &rhs) {
            (
                Type::Int {
                    width: lw,
                    level: l,
                },
                Type::Int {
                    width: rw,
                    level: r,
                },
            ) => int::binary(op, (*lw, l), (*rw, r)),
            (
                Type::Float {
                    width: lw,
                    level: l,
                },
                Type::Float {
                    width: rw,
                    level: r,
                },
            ) => float::binary(op, (*lw, l), (*rw, r)),
            (Type::Bool(l), Type::Bool(r)) => scalar::bool_binary(op, l, r),
            (Type::String(l), Type::String(r)) => scalar::string_binary(op, l, r),
            _ => mismatched(&lhs, &rhs),
        }
    }

    pub fn compare(&self, op: CompareOp, rhs: &Type) -> Type {
        if self.is_error() {
            return self.clone();
        }
        if rhs.is_error() {
            return rhs.clone();
        }

        let (lhs, rhs) = (self.promote(rhs), rhs.promote(self));

        if let (
            Type::Pointer {
                pointee: lp,
                level: l,
            },
            Type::Pointer {
                pointee: rp,
                level: r,
            },
        ) = (&lhs, &rhs)
        {
            return pointer::compare(op, (lp, l), (rp, r));
        }

        let Some(kind) = lhs.primitive() else {
            return unsupported(op.symbol(), &lhs);
        };
        if !kind.supports_compare_op(op) {
            return unsupported(op.symbol(), &lhs);
        }

        match (&lhs, &rhs) {
            (
                Type::Int {
                    width: lw,
                    level: l,
                },
                Type::Int {
                    width: rw,
                    level: r,
                },
            ) => int::compare(op, (*lw, l), (*rw, r)),
            (
                Type::Float {
                    width: lw,
                    level: l,
                },
                Type::Float {
                    width: rw,
                    level: r,
                },
            ) => float::compare(op, (*lw, l), (*rw, r)),
            (Type::Bool(l), Type::Bool(r)) => scalar::compare_levels(op, l, r),
            (Type::Rune(l), Type::Rune(r)) => scalar::compare_levels(op, l, r),
            (Type::String(l), Type::String(r)) => scalar::string_compare(op, l, r),
            _ => mismatched(&lhs, &rhs),
        }
    }

    pub fn unary(&self, op: UnaryOp) -> Type {
        if self.is_error() {
            return self.clone();
        }

        let Some(kind) = self.primitive() else {
            return unsupported(op.symbol(), self);
        };
        if !kind.supports_unary_op(op) {
            return unsupported(op.symbol(), self);
        }

        match self {
            Type::Int { width, level } => int::unary(op, *width, level),
            Type::Float { width, level } => float::unary(op, *width, level),
            Type::Bool(level) => scalar::bool_unary(op, level),
            _ => unsupported(op.symbol(), self),
        }
    }

    /// Explicit conversion with `as`. `target` is a declared type.
    pub fn cast(&self, target: &Type) -> Type {
        if self.is_error() {
            return self.clone();
        }
        if target.is_error() {
            return target.clone();
        }
        if self.same_shape(target) {
            return self.clone();
        }

        let cannot_cast = || {
            Type::error(format!(
                "cannot cast `{}` to `{}`",
                self.name(),
                target.name()
            ))
        };

        if let (Type::Pointer { level, .. }, Type::Pointer { pointee, .. }) = (self, target) {
            return Type::Pointer {
                pointee: pointee.clone(),
                level: level.clone(),
            };
        }

        let (Some(from), Some(to)) = (self.primitive(), target.primitive()) else {
            return cannot_cast();
        };
        if !from.can_be_cast_to(to) {
            return cannot_cast();
        }

        match (self, target) {
            (
                Type::Int {
                    width: from_width,
                    level,
                },
                Type::Int { width, .. },
            ) => Type::Int {
                width: *width,
                level: level.then_const(|v| {
                    if *from_width != IntWidth::Untyped {
                        Level::Const(width.wrap(*v))
                    } else if width.fits(*v) {
                        Level::Const(*v)
                    } else {
                        Level::Bottom
                    }
                }),
            },
            (Type::Int { level, .. }, Type::Float { width, .. }) => Type::Float {
                width: *width,
                level: level.map_const(|v| Float64(width.round(*v as f64))),
            },
            (Type::Float { level, .. }, Type::Int { width, .. }) => Type::Int {
                width: *width,
                level: level.then_const(|f| {
                    if f.0.is_finite() {
                        Level::Const(width.wrap(f.0.trunc() as i128))
                    } else {
                        Level::Bottom
                    }
                }),
            },
            (Type::Float { level, .. }, Type::Float { width, .. }) => Type::Float {
                width: *width,
                level: level.map_const(|f| Float64(width.round(f.0))),
            },
            (Type::Int { level, .. }, Type::Rune(_)) => Type::Rune(level.then_const(char_of)),
            (Type::Rune(level), Type::Int { width, .. }) => Type::Int {
                width: *width,
                level: level.map_const(|c| width.wrap(*c as i128)),
            },
            (Type::Int { level, .. }, Type::Bool(_)) => Type::Bool(level.map_const(|v| *v != 0)),
            (Type::Bool(level), Type::Int { width, .. }) => Type::Int {
                width: *width,
                level: level.map_const(|b| *b as i128),
            },
            (Type::Int { level, .. }, Type::String(_)) => Type::String(
                level
                    .then_const(char_of)
                    .map_const(|c| InternedSymbol::new(&c.to_string())),
            ),
            (Type::Rune(level), Type::String(_)) => {
                Type::String(level.map_const(|c| InternedSymbol::new(&c.to_string())))
            }
            _ => cannot_cast(),
        }
    }

    /// Whether casting to `target` builds a new string at runtime
    pub fn materializes_string(&self, target: &Type) -> bool {
        matches!(target, Type::String(_)) && !matches!(self, Type::String(_))
    }

    /// Implicit conversion of an initializer, argument or return value to the
    /// declared type `target`
    pub fn assign_to(&self, target: &Type) -> Type {
        if self.is_error() {
            return self.clone();
        }
        if target.is_error() {
            return target.clone();
        }

        let cannot_use = || {
            Type::error(format!(
                "cannot use value of type `{}` as `{}`",
                self.name(),
                target.name()
            ))
        };

        match (self, target) {
            (
                Type::Int {
                    width: IntWidth::Untyped,
                    level,
                },
                Type::Int { width, .. },
            ) => match level {
                Level::Const(v) if !width.fits(*v) => {
                    Type::error(format!("constant {v} overflows `{}`", width.primitive()))
                }
                level => Type::Int {
                    width: *width,
                    level: level.clone(),
                },
            },
            (Type::Int { width: lw, .. }, Type::Int { width: rw, .. }) if lw == rw => self.clone(),
            (
                Type::Int {
                    width: IntWidth::Untyped,
                    level,
                },
                Type::Float { width, .. },
            ) => Type::Float {
                width: *width,
                level: level.map_const(|v| Float64(width.round(*v as f64))),
            },
            (
                Type::Float {
                    width: FloatWidth::Untyped,
                    level,
                },
                Type::Float { width, .. },
            ) => Type::Float {
                width: *width,
                level: level.map_const(|f| Float64(width.round(f.0))),
            },
            (Type::Float { width: lw, .. }, Type::Float { width: rw, .. }) if lw == rw => {
                self.clone()
            }
            (Type::Bool(_), Type::Bool(_))
            | (Type::Rune(_), Type::Rune(_))
            | (Type::String(_), Type::String(_))
            | (Type::Void, Type::Void) => self.clone(),

            (Type::Pointer { pointee, level }, Type::Pointer { pointee: target, .. }) => {
                pointer::assign_to((pointee, level), target)
            }

            (Type::Struct { name: ln, .. }, Type::Struct { name: rn, fields }) if ln == rn => self
                .zip_with(target, Type::assign_to, |values| {
                    aggregate::struct_type(*rn, fields, values)
                }),
            (Type::Array { elements: l, .. }, Type::Array { elements: r, element }) => {
                if l.len() != r.len() {
                    return Type::error(format!(
                        "mismatched array lengths: expected {}, found {}",
                        r.len(),
                        l.len()
                    ));
                }

                self.zip_with(target, Type::assign_to, |values| {
                    aggregate::array_type(element, values)
                })
            }
            (Type::Tuple(l), Type::Tuple(r)) if l.len() == r.len() => {
                self.zip_with(target, Type::assign_to, Type::tuple)
            }

            (
                Type::Function {
                    params: lp,
                    ret: lr,
                    level,
                },
                Type::Function {
                    params: rp,
                    ret: rr,
                    ..
                },
            ) if function::same_signature((lp, lr), (rp, rr)) => {
                function::function(rp.clone(), rr.clone(), level.clone())
            }

            _ => cannot_use(),
        }
    }
}

fn char_of(value: &i128) -> Level<char> {
    u32::try_from(*value)
        .ok()
        .and_then(char::from_u32)
        .map_or(Level::Bottom, Level::Const)
}

/* Aggregates and layout */
impl Type {
    pub fn layout(&self) -> Layout {
        match self {
            Type::Int { width, .. } => {
                let bytes = width.bits().unwrap_or(64) / 8;
                Layout::new(bytes, bytes)
            }
            Type::Float {
                width: FloatWidth::F32,
                ..
            } => Layout::new(4, 4),
            Type::Float { .. } => Layout::new(8, 8),
            Type::Bool(_) => Layout::new(1, 1),
            Type::Rune(_) => Layout::new(4, 4),
            Type::String(_) => Layout::new(16, 8),
            Type::Pointer { .. } | Type::Function { .. } => Layout::new(8, 8),
            Type::Struct { .. } | Type::Tuple(_) => aggregate::sequential(&self.member_types()).1,
            Type::Array { element, elements } => {
                let layout = element.layout();
                let length = u32::try_from(elements.len()).unwrap_or(u32::MAX);

                Layout::new(layout.stride().saturating_mul(length), layout.align)
            }
            Type::Void | Type::Control(_) | Type::Memory | Type::Error(_) => Layout::new(0, 1),
        }
    }

    /// Member values of an aggregate, in layout order. Empty for anything else.
    pub fn member_types(&self) -> Vec<Type> {
        match self {
            Type::Struct { fields, .. } => fields.iter().map(|(_, ty)| ty.clone()).collect(),
            Type::Array { elements, .. } | Type::Tuple(elements) => elements.to_vec(),
            _ => Vec::new(),
        }
    }

    /// Byte offset of every member, matching `member_types`
    pub fn member_offsets(&self) -> Vec<u32> {
        match self {
            Type::Array { element, elements } => {
                let stride = element.layout().stride();

                iter::successors(Some(0u32), |offset| offset.checked_add(stride))
                    .take(elements.len())
                    .collect()
            }
            _ => aggregate::sequential(&self.member_types()).0,
        }
    }

    /// Rebuilds an aggregate of the same shape from new member values
    pub fn with_members(&self, values: Vec<Type>) -> Type {
        match self {
            Type::Struct { name, fields } => aggregate::struct_type(*name, fields, values),
            Type::Array { element, .. } => aggregate::array_type(element, values),
            Type::Tuple(_) => Type::tuple(values),
            _ => self.clone(),
        }
    }

    pub fn member_index(&self, member: InternedSymbol) -> Option<usize> {
        match self {
            Type::Struct { fields, .. } => fields.iter().position(|(name, _)| *name == member),
            _ => None,
        }
    }

    pub fn member(&self, member: InternedSymbol) -> Type {
        if self.is_error() {
            return self.clone();
        }

        match self.member_index(member) {
            Some(index) => self.element(index),
            None => Type::error(format!(
                "member `{member}` not found in `{}`",
                self.name()
            )),
        }
    }

    /// Member `index` of a struct, array or tuple
    pub fn element(&self, index: usize) -> Type {
        if self.is_error() {
            return self.clone();
        }

        match self.member_types().get(index) {
            Some(member) => member.clone(),
            None if self.is_aggregate() => Type::error(format!(
                "no member {index} in `{}`",
                self.name()
            )),
            None => Type::error(format!("`{}` has no members", self.name())),
        }
    }

    /// Element of an array at the index value `index`
    pub fn index(&self, index: &Type) -> Type {
        match self {
            Type::Error(_) => self.clone(),
            Type::Array { elements, .. } => aggregate::index(elements, index),
            _ => Type::error(format!("cannot index into `{}`", self.name())),
        }
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn level<T>(
            f: &mut std::fmt::Formatter<'_>,
            name: &str,
            level: &Level<T>,
            show: impl FnOnce(&T) -> String,
        ) -> std::fmt::Result {
            match level {
                Level::Top => write!(f, "{name}:top"),
                Level::Const(value) => write!(f, "{name}:{}", show(value)),
                Level::Bottom => f.write_str(name),
            }
        }

        let name = self.name();

        match self {
            Type::Int { level: l, .. } => level(f, &name, l, |v| v.to_string()),
            Type::Float { level: l, .. } => level(f, &name, l, |v| v.to_string()),
            Type::Bool(l) => level(f, &name, l, |v| v.to_string()),
            Type::Rune(l) => level(f, &name, l, |v| format!("{v:?}")),
            Type::String(l) => level(f, &name, l, |v| format!("{:?}", v.value())),
            Type::Pointer { level: l, .. } => level(f, &name, l, |_| "nil".into()),
            Type::Function { level: l, .. } => level(f, &name, l, |v| v.to_string()),
            Type::Struct { .. } | Type::Array { .. } | Type::Tuple(_) => {
                write!(f, "{name}{{{}}}", self.member_types().iter().join(", "))
            }
            Type::Control(Liveness::Dead) => f.write_str("control:dead"),
            Type::Error(message) => write!(f, "error({message})"),
            Type::Void | Type::Control(_) | Type::Memory => f.write_str(&name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One representative of every level of every category
    fn samples() -> Vec<Type> {
        let point = Type::Struct {
            name: "Point".into(),
            fields: Rc::from(vec![
                (InternedSymbol::new("x"), Type::int_type()),
                (InternedSymbol::new("y"), Type::int_type()),
            ]),
        };

        let mut samples = vec![
            Type::int_type(),
            Type::int_type().top(),
            Type::int_of(IntWidth::Int, 1),
            Type::int_of(IntWidth::Int, 2),
            Type::Float {
                width: FloatWidth::F64,
                level: Level::Const(Float64(1.5)),
            },
            Type::Float {
                width: FloatWidth::F64,
                level: Level::Bottom,
            },
            Type::bool(true),
            Type::bool(false),
            Type::Bool(Level::Bottom),
            Type::Bool(Level::Top),
            Type::rune('a'),
            Type::string("a"),
            Type::string("b"),
            Type::pointer_to(Type::int_type()),
            pointer::nil(),
            Type::tuple(vec![Type::int_of(IntWidth::Int, 1), Type::bool(true)]),
            Type::array(Type::int_type(), 2).unwrap(),
            Type::function(vec![], Type::Void, Some("f".into())),
            Type::function(vec![], Type::Void, Some("g".into())),
            Type::Void,
            Type::live(),
            Type::dead(),
            Type::Memory,
            Type::error("boom"),
        ];

        samples.push(point.zero());
        samples.push(point);
        samples
    }

    #[test]
    fn meet_is_commutative() {
        for a in samples() {
            for b in samples() {
                assert_eq!(a.meet(&b), b.meet(&a), "meet({a}, {b})");
            }
        }
    }

    #[test]
    fn meet_is_idempotent() {
        for a in samples() {
            assert_eq!(a.meet(&a), a, "meet({a}, {a})");
        }
    }

    #[test]
    fn meet_is_associative() {
        let samples = samples();

        for a in &samples {
            for b in &samples {
                for c in &samples {
                    let (left, right) = (a.meet(&b.meet(c)), a.meet(b).meet(c));

                    // Which mismatch gets reported may depend on grouping
                    if left.is_error() || right.is_error() {
                        assert!(left.is_error() && right.is_error(), "meet over ({a}, {b}, {c})");
                    } else {
                        assert_eq!(left, right, "meet over ({a}, {b}, {c})");
                    }
                }
            }
        }
    }

    #[test]
    fn top_is_identity_and_bottom_absorbs() {
        for a in samples() {
            if a.is_error() {
                continue;
            }

            assert_eq!(a.top().meet(&a), a, "top meets {a}");
            assert_eq!(a.bottom().meet(&a), a.bottom(), "bottom meets {a}");
        }
    }

    #[test]
    fn distinct_constants_meet_to_bottom() {
        assert_eq!(
            Type::int_of(IntWidth::Int, 1).meet(&Type::int_of(IntWidth::Int, 2)),
            Type::int_type()
        );
        assert_eq!(Type::bool(true).meet(&Type::bool(false)), Type::Bool(Level::Bottom));
    }

    #[test]
    fn different_categories_meet_to_error() {
        assert!(Type::int_type().meet(&Type::Bool(Level::Bottom)).is_error());
    }

    #[test]
    fn phi_keeps_identical_values() {
        let one = Type::int_of(IntWidth::Int, 1);

        assert_eq!(one.phi(&one), one);
        assert_eq!(one.phi(&Type::int_of(IntWidth::Int, 2)), Type::int_type());
    }

    #[test]
    fn unsupported_operator_names_the_type() {
        assert_eq!(
            Type::bool(true).binary(BinaryOp::Add, &Type::bool(false)),
            Type::error("operator `+` not supported for type `bool`")
        );
    }

    #[test]
    fn untyped_literal_adopts_declared_width() {
        let u8_type = PrimitiveKind::U8.bottom_type();

        assert_eq!(Type::int(200).assign_to(&u8_type), Type::int_of(IntWidth::U8, 200));
        assert!(Type::int(300).assign_to(&u8_type).is_error());
        assert_eq!(Type::int(300).cast(&u8_type), u8_type);
        assert!(
            Type::int_of(IntWidth::I32, 1)
                .assign_to(&PrimitiveKind::I64.bottom_type())
                .is_error()
        );
    }

    #[test]
    fn array_assignment_checks_length() {
        let three = Type::array(Type::int_type(), 3).unwrap();
        let empty = Type::tuple(vec![]);

        assert!(Type::array(Type::int(1), 2).unwrap().assign_to(&three).is_error());
        assert!(empty.assign_to(&three).is_error());
    }

    #[test]
    fn aggregate_members_are_reachable_by_name_and_index() {
        let point = Type::Struct {
            name: "Point".into(),
            fields: Rc::from(vec![
                (InternedSymbol::new("x"), Type::int_type()),
                (InternedSymbol::new("y"), Type::bool(true)),
            ]),
        };

        assert_eq!(point.member("y".into()), Type::bool(true));
        assert!(point.member("z".into()).is_error());
        assert_eq!(point.member_offsets(), vec![0, 8]);
        assert_eq!(point.layout(), Layout::new(16, 8));
    }

    #[test]
    fn casts_convert_constants() {
        assert_eq!(
            Type::int(65).cast(&PrimitiveKind::Rune.bottom_type()),
            Type::rune('A')
        );
        assert_eq!(
            Type::float(2.9).cast(&Type::int_type()),
            Type::int_of(IntWidth::Int, 2)
        );
        assert!(Type::bool(true).cast(&PrimitiveKind::String.bottom_type()).is_error());
    }

    #[test]
    fn arrays_are_bounded_by_their_scalar_count() {
        let row = Type::array(PrimitiveKind::U8.bottom_type(), 256).unwrap();
        let pair = Type::tuple(vec![Type::int_type(), row.clone()]);

        assert_eq!(pair.scalar_count(), 257);
        assert!(Type::array(row.clone(), 256).is_some());
        assert!(Type::array(row, 257).is_none());
        assert!(Type::array(Type::int_type(), 70000).is_none());
        assert!(Type::array(Type::int_type(), usize::MAX).is_none());
    }

    #[test]
    fn casts_without_a_constant_result_are_runtime_values() {
        let rune = PrimitiveKind::Rune.bottom_type();

        assert_eq!(Type::float(f64::NAN).cast(&Type::int_type()), Type::int_type());
        assert_eq!(Type::float(f64::INFINITY).cast(&Type::int_type()), Type::int_type());
        assert_eq!(Type::int(-1).cast(&rune), rune);
        assert_eq!(Type::int(0xD800).cast(&rune), rune);
    }
}
