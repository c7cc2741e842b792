use paste::paste;

use crate::middle::{
    graph::{
        Graph, MemoryTag, NodeId,
        op::{BinaryOp, CompareOp, Op, UnaryOp},
    },
    lattice::Type,
    nodegen::{NodeBuilder, Nodegen},
};

/// Generates a snake_case constructor per operator, `Binary::add(lhs, rhs)`
macro_rules! operator_constructors {
    ($node:ident, $ops:ident: $($op:ident),* $(,)?) => {
        paste! {
            impl $node {
                $(
                    pub fn [<$op:snake>](lhs: NodeId, rhs: NodeId) -> Self {
                        Self {
                            op: $ops::$op,
                            lhs,
                            rhs,
                        }
                    }
                )*
            }
        }
    };
}

#[derive(Debug, Clone)]
pub struct Constant(pub Type);

impl Nodegen for Constant {
    fn infer(&self, _graph: &Graph) -> Type {
        self.0.clone()
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        builder.constant(ty)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Binary {
    pub op: BinaryOp,
    pub lhs: NodeId,
    pub rhs: NodeId,
}

operator_constructors!(Binary, BinaryOp:
    Add, Subtract, Multiply, Divide, Modulus,
    BitwiseAnd, BitwiseOr, BitwiseXor, ShiftLeft, ShiftRight,
);

fn is_int_constant(graph: &Graph, id: NodeId, value: i128) -> bool {
    graph.ty(id).as_int() == Some(value)
}

impl Binary {
    /// Algebraic identities on integers: `x - x`, `x ^ x`, `x + 0`, `x * 1`
    /// and `x | 0`. Floats are left alone because of NaN and signed zeros.
    fn simplify(&self, graph: &Graph, ty: &Type) -> Option<Simplified> {
        let integral = matches!(ty, Type::Int { .. } | Type::Bool(_));

        if !integral {
            return None;
        }

        let Binary { op, lhs, rhs } = *self;

        if lhs == rhs && matches!(op, BinaryOp::Subtract | BinaryOp::BitwiseXor) {
            return Some(Simplified::Constant(ty.zero()));
        }

        let keeps = |operand: NodeId| graph.ty(operand).same_shape(ty);
        let zero = |operand| is_int_constant(graph, operand, 0);
        let one = |operand| is_int_constant(graph, operand, 1);

        let operand = match op {
            BinaryOp::Add | BinaryOp::BitwiseOr if zero(rhs) => lhs,
            BinaryOp::Add | BinaryOp::BitwiseOr if zero(lhs) => rhs,
            BinaryOp::Subtract | BinaryOp::ShiftLeft | BinaryOp::ShiftRight if zero(rhs) => lhs,
            BinaryOp::Multiply | BinaryOp::Divide if one(rhs) => lhs,
            BinaryOp::Multiply if one(lhs) => rhs,
            _ => return None,
        };

        keeps(operand).then_some(Simplified::Operand(operand))
    }
}

enum Simplified {
    Constant(Type),
    Operand(NodeId),
}

impl Nodegen for Binary {
    fn infer(&self, graph: &Graph) -> Type {
        graph.ty(self.lhs).binary(self.op, graph.ty(self.rhs))
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        if ty.is_constant() {
            return builder.constant(ty);
        }

        match self.simplify(&builder.graph, &ty) {
            Some(Simplified::Constant(ty)) => builder.constant(ty),
            Some(Simplified::Operand(operand)) => operand,
            None => builder
                .graph
                .create(Op::Binary(self.op), ty, &[self.lhs, self.rhs]),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Unary {
    pub op: UnaryOp,
    pub operand: NodeId,
}

impl Nodegen for Unary {
    fn infer(&self, graph: &Graph) -> Type {
        graph.ty(self.operand).unary(self.op)
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        if ty.is_constant() {
            return builder.constant(ty);
        }

        // Every unary operator is its own inverse
        let inner = builder.graph.node(self.operand);
        if inner.op == Op::Unary(self.op) && !ty.is_float() {
            return inner.inputs[0];
        }

        builder.graph.create(Op::Unary(self.op), ty, &[self.operand])
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Compare {
    pub op: CompareOp,
    pub lhs: NodeId,
    pub rhs: NodeId,
}

operator_constructors!(Compare, CompareOp:
    Equal, NotEqual, Less, LessEqual, Greater, GreaterEqual,
);

impl Nodegen for Compare {
    fn infer(&self, graph: &Graph) -> Type {
        graph.ty(self.lhs).compare(self.op, graph.ty(self.rhs))
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        if ty.is_constant() {
            return builder.constant(ty);
        }

        if self.lhs == self.rhs && !builder.graph.ty(self.lhs).is_float() {
            let holds = self.op.holds(core::cmp::Ordering::Equal);
            return builder.constant(Type::bool(holds));
        }

        builder
            .graph
            .create(Op::Compare(self.op), ty, &[self.lhs, self.rhs])
    }
}

/// Explicit conversion with `as`
#[derive(Debug, Clone)]
pub struct Cast {
    pub value: NodeId,
    pub target: Type,
}

impl Nodegen for Cast {
    fn infer(&self, graph: &Graph) -> Type {
        graph.ty(self.value).cast(&self.target)
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        if ty.is_constant() {
            return builder.constant(ty);
        }

        let from = builder.graph.ty(self.value);

        if from.same_shape(&ty) {
            return self.value;
        }

        let materializes = from.materializes_string(&ty);
        let cast = builder.graph.create(Op::Cast, ty, &[self.value]);

        if materializes {
            builder.thread_memory(cast, None, MemoryTag::Heap);
        }

        cast
    }
}

/// Implicit conversion of a scalar to a declared type. Aggregates go through
/// [`NodeBuilder::coerce`], which applies this member by member.
#[derive(Debug, Clone)]
pub struct Coerce {
    pub value: NodeId,
    pub target: Type,
}

impl Nodegen for Coerce {
    fn infer(&self, graph: &Graph) -> Type {
        graph.ty(self.value).assign_to(&self.target)
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        if builder.graph.ty(self.value) == &ty {
            return self.value;
        }

        if ty.is_constant() {
            return builder.constant(ty);
        }

        // Only untyped values change representation here, and those are
        // always constants, so what is left is a relabelling
        builder.graph.create(Op::Cast, ty, &[self.value])
    }
}

/// A struct, array or tuple value assembled from its members
#[derive(Debug, Clone)]
pub struct Build {
    pub shape: Type,
    pub members: Vec<NodeId>,
}

impl Nodegen for Build {
    fn infer(&self, graph: &Graph) -> Type {
        let members = self
            .members
            .iter()
            .map(|member| graph.ty(*member).clone())
            .collect::<Vec<_>>();

        if let Some(error) = members.iter().find(|member| member.is_error()) {
            return error.clone();
        }

        if members.len() != self.shape.member_types().len() {
            return Type::error(format!(
                "`{}` has {} members but {} were given",
                self.shape.name(),
                self.shape.member_types().len(),
                members.len()
            ));
        }

        self.shape.with_members(members)
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        if ty.is_constant() {
            return builder.constant(ty);
        }

        builder.graph.create(Op::Build, ty, &self.members)
    }
}

/// Member `index` of an aggregate value
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    pub value: NodeId,
    pub index: usize,
}

impl Nodegen for Projection {
    fn infer(&self, graph: &Graph) -> Type {
        graph.ty(self.value).element(self.index)
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        if ty.is_constant() {
            return builder.constant(ty);
        }

        let aggregate = builder.graph.node(self.value);
        if aggregate.op == Op::Build {
            return aggregate.inputs[self.index];
        }

        builder
            .graph
            .create(Op::Projection(self.index as u32), ty, &[self.value])
    }
}

/// Parameter `index` of a function, projected out of its entry node
#[derive(Debug, Clone, Copy)]
pub struct Parameter {
    pub function: NodeId,
    pub index: usize,
}

impl Nodegen for Parameter {
    fn infer(&self, graph: &Graph) -> Type {
        match graph.ty(self.function) {
            Type::Function { params, .. } => match params.get(self.index) {
                Some(param) => param.bottom(),
                None => Type::error(format!("no parameter {}", self.index)),
            },
            other => Type::error(format!("`{}` is not a function", other.name())),
        }
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        builder
            .graph
            .create(Op::Projection(self.index as u32), ty, &[self.function])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{
        lattice::{IntWidth, Level},
        nodegen::{Alloca, Load},
    };

    fn opaque_int(builder: &mut NodeBuilder) -> NodeId {
        let slot = builder.make(Alloca {
            ty: Type::int_type(),
        });

        builder.make(Load {
            base: slot,
            offset: 0,
            ty: Type::int_type(),
        })
    }

    #[test]
    fn constant_operands_fold_to_one_node() {
        let mut builder = NodeBuilder::new();
        let two = builder.make(Constant(Type::int(2)));
        let three = builder.make(Constant(Type::int(3)));
        let before = builder.graph.len();

        let sum = builder.make(Binary::add(two, three));

        assert_eq!(builder.graph.len(), before + 1);
        assert_eq!(builder.graph.op(sum), &Op::Constant);
        assert_eq!(builder.graph.ty(sum), &Type::int(5));
    }

    #[test]
    fn identities_return_the_operand() {
        let mut builder = NodeBuilder::new();
        let x = opaque_int(&mut builder);
        let zero = builder.make(Constant(Type::int(0)));
        let one = builder.make(Constant(Type::int(1)));

        assert_eq!(builder.make(Binary::add(x, zero)), x);
        assert_eq!(builder.make(Binary::multiply(one, x)), x);
        assert_eq!(builder.make(Binary::bitwise_or(x, zero)), x);

        let difference = builder.make(Binary::subtract(x, x));
        assert_eq!(builder.graph.ty(difference), &Type::int_of(IntWidth::Int, 0));
    }

    #[test]
    fn self_comparison_folds_except_for_floats() {
        let mut builder = NodeBuilder::new();
        let x = opaque_int(&mut builder);

        let equal = builder.make(Compare::equal(x, x));
        let less = builder.make(Compare::less(x, x));
        assert_eq!(builder.graph.ty(equal), &Type::bool(true));
        assert_eq!(builder.graph.ty(less), &Type::bool(false));

        let slot = builder.make(Alloca {
            ty: Type::float(0.0).concrete().bottom(),
        });
        let f = builder.make(Load {
            base: slot,
            offset: 0,
            ty: Type::float(0.0).concrete().bottom(),
        });
        let float_equal = builder.make(Compare::equal(f, f));
        assert_eq!(builder.graph.op(float_equal), &Op::Compare(CompareOp::Equal));
    }

    #[test]
    fn projection_of_build_is_the_member() {
        let mut builder = NodeBuilder::new();
        let x = opaque_int(&mut builder);
        let one = builder.make(Constant(Type::int_of(IntWidth::Int, 1)));
        let shape = Type::tuple(vec![Type::int_type(), Type::int_type()]);

        let pair = builder.make(Build {
            shape,
            members: vec![one, x],
        });

        assert_eq!(builder.make(Projection { value: pair, index: 1 }), x);
    }

    #[test]
    fn cast_to_the_same_type_is_the_operand() {
        let mut builder = NodeBuilder::new();
        let x = opaque_int(&mut builder);

        let cast = builder.make(Cast {
            value: x,
            target: Type::int_type(),
        });

        assert_eq!(cast, x);
    }

    #[test]
    fn string_casts_thread_memory() {
        let mut builder = NodeBuilder::new();
        let x = opaque_int(&mut builder);

        let cast = builder.make(Cast {
            value: x,
            target: Type::String(Level::Bottom),
        });

        assert_eq!(builder.cursor.memory, cast);
        assert_eq!(builder.graph.memory_of(cast).unwrap().tag, MemoryTag::Heap);
    }
}
