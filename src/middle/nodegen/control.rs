use itertools::Itertools;

use crate::{
    frontend::intern::InternedSymbol,
    middle::{
        graph::{Graph, MemoryEffect, MemoryTag, NodeId, op::Op},
        lattice::{Level, Liveness, Type},
        nodegen::{NodeBuilder, Nodegen},
    },
};

fn liveness(graph: &Graph, control: NodeId) -> Type {
    if graph.is_dead_control(control) {
        Type::dead()
    } else {
        Type::live()
    }
}

/// One side of a two-way branch on `condition`, hanging off `control`
#[derive(Debug, Clone, Copy)]
pub struct Branch {
    pub condition: NodeId,
    pub control: NodeId,
    pub taken: bool,
}

impl Nodegen for Branch {
    fn infer(&self, graph: &Graph) -> Type {
        let Type::Bool(level) = graph.ty(self.condition) else {
            return match graph.ty(self.condition) {
                error @ Type::Error(_) => error.clone(),
                other => Type::error(format!(
                    "condition must be of type `bool`, found `{}`",
                    other.name()
                )),
            };
        };

        if graph.is_dead_control(self.control) {
            return Type::dead();
        }

        match level {
            Level::Const(value) if *value != self.taken => Type::dead(),
            _ => Type::live(),
        }
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        let op = if self.taken {
            Op::BranchTrue
        } else {
            Op::BranchFalse
        };

        let branch = builder.graph.create(op, ty, &[self.condition]);
        builder.graph.attach_control(branch, self.control);
        branch
    }
}

/// Join point of several control paths
#[derive(Debug, Clone)]
pub struct Region {
    pub predecessors: Vec<NodeId>,
}

impl Nodegen for Region {
    fn infer(&self, graph: &Graph) -> Type {
        let any_live = self
            .predecessors
            .iter()
            .any(|predecessor| !graph.is_dead_control(*predecessor));

        Type::Control(if any_live {
            Liveness::Live
        } else {
            Liveness::Dead
        })
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        builder.graph.create(Op::Region, ty, &self.predecessors)
    }
}

/// Loop entry. Back edges are appended once the body has been built.
#[derive(Debug, Clone, Copy)]
pub struct LoopHeader {
    pub entry: NodeId,
}

impl Nodegen for LoopHeader {
    fn infer(&self, graph: &Graph) -> Type {
        liveness(graph, self.entry)
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        builder.graph.create(Op::Loop, ty, &[self.entry])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhiKind {
    Value,
    Memory,
    /// Placeholder at a loop header, typed with the declared type of the
    /// binding until the back edges are known
    Loop(Type),
}

/// Selects one of `cases` depending on which predecessor of `region` control
/// arrived from
#[derive(Debug, Clone)]
pub struct Phi {
    pub region: NodeId,
    pub cases: Vec<NodeId>,
    pub kind: PhiKind,
}

impl Phi {
    pub fn value(region: NodeId, cases: Vec<NodeId>) -> Self {
        Self {
            region,
            cases,
            kind: PhiKind::Value,
        }
    }

    pub fn memory(region: NodeId, cases: Vec<NodeId>) -> Self {
        Self {
            region,
            cases,
            kind: PhiKind::Memory,
        }
    }

    pub fn looping(header: NodeId, entry: NodeId, ty: Type) -> Self {
        Self {
            region: header,
            cases: vec![entry],
            kind: PhiKind::Loop(ty),
        }
    }
}

impl Nodegen for Phi {
    fn infer(&self, graph: &Graph) -> Type {
        match &self.kind {
            PhiKind::Value => self
                .cases
                .iter()
                .map(|case| graph.ty(*case).clone())
                .reduce(|merged, case| merged.phi(&case))
                .unwrap_or(Type::Void),
            PhiKind::Memory => Type::Memory,
            PhiKind::Loop(ty) => ty.bottom(),
        }
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        let looping = matches!(self.kind, PhiKind::Loop(_));

        if !looping {
            if let Some(first) = self.cases.first().filter(|_| self.cases.iter().all_equal()) {
                return *first;
            }

            if ty.is_constant() {
                return builder.constant(ty);
            }
        }

        let mut inputs = Vec::with_capacity(self.cases.len() + 1);
        inputs.push(self.region);
        inputs.extend(self.cases);

        let phi = builder.graph.create(Op::Phi, ty, &inputs);
        builder.graph.attach_control(phi, self.region);
        builder.graph.set_phi_region(phi, self.region);
        phi
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub callee: NodeId,
    pub arguments: Vec<NodeId>,
}

impl Nodegen for Call {
    fn infer(&self, graph: &Graph) -> Type {
        let (params, ret) = match graph.ty(self.callee) {
            Type::Function { params, ret, .. } => (params, ret),
            error @ Type::Error(_) => return error.clone(),
            other => return Type::error(format!("`{}` is not callable", other.name())),
        };

        if params.len() != self.arguments.len() {
            return Type::error(format!(
                "expected {} argument(s), found {}",
                params.len(),
                self.arguments.len()
            ));
        }

        if let Some(error) = self
            .arguments
            .iter()
            .map(|argument| graph.ty(*argument))
            .find(|ty| ty.is_error())
        {
            return error.clone();
        }

        ret.bottom()
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        let mut inputs = Vec::with_capacity(self.arguments.len() + 1);
        inputs.push(self.callee);
        inputs.extend(self.arguments);

        let call = builder.graph.create(Op::Call, ty, &inputs);
        builder.graph.attach_control(call, builder.cursor.control);
        builder.thread_memory(call, None, MemoryTag::Unknown);
        call
    }
}

fn terminate(builder: &mut NodeBuilder, op: Op, ty: Type, value: Option<NodeId>) -> NodeId {
    let inputs = value.as_slice();
    let node = builder.graph.create(op, ty, inputs);

    builder.graph.attach_control(node, builder.cursor.control);
    builder.graph.attach_memory(node, MemoryEffect {
        previous: builder.cursor.memory,
        target: None,
        tag: MemoryTag::Unknown,
    });

    node
}

fn returned_type(graph: &Graph, value: Option<NodeId>) -> Type {
    value.map_or(Type::Void, |value| graph.ty(value).clone())
}

/// Leaves the current function. Consumes the memory state at the cursor.
#[derive(Debug, Clone, Copy)]
pub struct Return {
    pub value: Option<NodeId>,
}

impl Nodegen for Return {
    fn infer(&self, graph: &Graph) -> Type {
        returned_type(graph, self.value)
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        terminate(builder, Op::Return, ty, self.value)
    }
}

/// Ends the program with an exit status
#[derive(Debug, Clone, Copy)]
pub struct Exit {
    pub value: NodeId,
}

impl Nodegen for Exit {
    fn infer(&self, graph: &Graph) -> Type {
        returned_type(graph, Some(self.value))
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        let exit = terminate(builder, Op::Exit, ty, Some(self.value));
        builder.graph.mark_root(exit);
        exit
    }
}

/// Entry of a function body: its control and memory origin, and the node
/// parameters are projected from. Typed with the function's own constant.
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub name: InternedSymbol,
    pub ty: Type,
}

impl Nodegen for FunctionEntry {
    fn infer(&self, _graph: &Graph) -> Type {
        match &self.ty {
            Type::Function { params, ret, .. } => Type::Function {
                params: params.clone(),
                ret: ret.clone(),
                level: Level::Const(self.name),
            },
            other => other.clone(),
        }
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        let entry = builder.graph.create(Op::Function(self.name), ty, &[]);
        builder.graph.mark_root(entry);
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{
        lattice::IntWidth,
        nodegen::{Alloca, Constant, Load},
    };

    fn opaque_bool(builder: &mut NodeBuilder) -> NodeId {
        let slot = builder.make(Alloca {
            ty: Type::Bool(Level::Bottom),
        });

        builder.make(Load {
            base: slot,
            offset: 0,
            ty: Type::Bool(Level::Bottom),
        })
    }

    #[test]
    fn constant_condition_kills_the_untaken_side() {
        let mut builder = NodeBuilder::new();
        let yes = builder.make(Constant(Type::bool(true)));
        let control = builder.cursor.control;

        let taken = builder.make(Branch {
            condition: yes,
            control,
            taken: true,
        });
        let untaken = builder.make(Branch {
            condition: yes,
            control,
            taken: false,
        });

        assert_eq!(builder.graph.ty(taken), &Type::live());
        assert_eq!(builder.graph.ty(untaken), &Type::dead());
    }

    #[test]
    fn non_boolean_condition_is_an_error() {
        let mut builder = NodeBuilder::new();
        let one = builder.make(Constant(Type::int(1)));
        let control = builder.cursor.control;

        let branch = builder.make(Branch {
            condition: one,
            control,
            taken: true,
        });

        assert!(builder.graph.ty(branch).is_error());
    }

    #[test]
    fn phi_of_identical_cases_is_that_case() {
        let mut builder = NodeBuilder::new();
        let old = opaque_bool(&mut builder);
        let control = builder.cursor.control;
        let region = builder.make(Region {
            predecessors: vec![control, control],
        });
        let before = builder.graph.len();

        assert_eq!(builder.make(Phi::value(region, vec![old, old])), old);
        assert_eq!(builder.graph.len(), before);
    }

    #[test]
    fn phi_of_divergent_cases_is_a_node() {
        let mut builder = NodeBuilder::new();
        let old = opaque_bool(&mut builder);
        let x = builder.make(Constant(Type::bool(true)));
        let control = builder.cursor.control;
        let region = builder.make(Region {
            predecessors: vec![control, control],
        });

        let phi = builder.make(Phi::value(region, vec![x, old]));

        assert_eq!(builder.graph.node(phi).inputs.as_slice(), &[region, x, old]);
        assert_eq!(builder.graph.phi_region(phi), Some(region));
        assert_eq!(builder.graph.ty(phi), &Type::Bool(Level::Bottom));
    }

    #[test]
    fn calls_thread_memory_and_return_the_declared_type() {
        let mut builder = NodeBuilder::new();
        let ty = Type::function(vec![], Type::int_type(), None);
        let entry = builder.make(FunctionEntry {
            name: "answer".into(),
            ty,
        });

        let call = builder.make(Call {
            callee: entry,
            arguments: vec![],
        });

        assert_eq!(builder.graph.ty(call), &Type::Int {
            width: IntWidth::Int,
            level: Level::Bottom,
        });
        assert_eq!(builder.cursor.memory, call);
        assert!(builder.graph.roots().any(|root| root == entry));
    }
}
