//! Local rewrites of the finished graph. Most folding already happened while
//! the graph was built; these passes catch what only became foldable after a
//! later rewrite, like an operand that turned into a constant once a load
//! was forwarded or a branch that lost one side.

use std::collections::VecDeque;

use hashbrown::HashSet;
use itertools::Itertools;
use smallvec::SmallVec;
use strum::{EnumCount, IntoEnumIterator};
use tracing::{debug, trace};

use crate::middle::{
    graph::{
        Graph, NodeId,
        op::{Op, OpKind, OpMask},
    },
    lattice::Type,
};

pub trait Peephole {
    fn name(&self) -> &'static str;

    /// The ops this pass may rewrite. It is never offered anything else.
    fn mask(&self) -> OpMask;

    /// A node computing the same thing as `node`, or `None` to leave it alone.
    /// The pass may create the replacement but must not replace `node` itself.
    fn rewrite(&self, graph: &mut Graph, node: NodeId) -> Option<NodeId>;
}

fn constant(graph: &mut Graph, ty: Type) -> NodeId {
    graph.create(Op::Constant, ty, &[])
}

/// Re-evaluates operators whose operands have become constant
pub struct ConstantFold;

impl Peephole for ConstantFold {
    fn name(&self) -> &'static str {
        "constant-fold"
    }

    fn mask(&self) -> OpMask {
        OpMask::of(&[
            OpKind::Binary,
            OpKind::Unary,
            OpKind::Compare,
            OpKind::Cast,
            OpKind::Build,
            OpKind::Projection,
        ])
    }

    fn rewrite(&self, graph: &mut Graph, node: NodeId) -> Option<NodeId> {
        let inputs = graph.node(node).inputs.clone();
        let operand = |index: usize| graph.ty(inputs[index]);

        let ty = match graph.op(node) {
            Op::Binary(op) => operand(0).binary(*op, operand(1)),
            Op::Unary(op) => operand(0).unary(*op),
            Op::Compare(op) => operand(0).compare(*op, operand(1)),
            Op::Cast => operand(0).cast(graph.ty(node)),
            Op::Build => graph
                .ty(node)
                .with_members(inputs.iter().map(|input| graph.ty(*input).clone()).collect()),
            Op::Projection(index) => {
                let index = *index as usize;

                if *graph.op(inputs[0]) == Op::Build {
                    return graph.node(inputs[0]).inputs.get(index).copied();
                }

                operand(0).element(index)
            }
            _ => return None,
        };

        if ty.is_error() || !ty.is_constant() {
            return None;
        }

        Some(constant(graph, ty))
    }
}

/// `x == x` and friends, for anything but floats
pub struct ComparisonFold;

impl Peephole for ComparisonFold {
    fn name(&self) -> &'static str {
        "comparison-fold"
    }

    fn mask(&self) -> OpMask {
        OpMask::of(&[OpKind::Compare])
    }

    fn rewrite(&self, graph: &mut Graph, node: NodeId) -> Option<NodeId> {
        let Op::Compare(op) = *graph.op(node) else {
            return None;
        };

        let (lhs, rhs) = (graph.node(node).inputs[0], graph.node(node).inputs[1]);

        // NaN is not equal to itself
        if lhs != rhs || graph.ty(lhs).is_float() {
            return None;
        }

        Some(constant(graph, Type::bool(op.holds(core::cmp::Ordering::Equal))))
    }
}

/// Branches on constant conditions, and the regions and phis that lose all
/// but one of their predecessors because of them
pub struct PhiFold;

impl PhiFold {
    fn fold_branch(graph: &mut Graph, node: NodeId, taken: bool) -> Option<NodeId> {
        let condition = graph.node(node).inputs[0];
        let value = graph.ty(condition).as_bool()?;

        if graph.is_dead_control(node) {
            return None;
        }

        if value == taken {
            graph.control_of(node)
        } else {
            Some(graph.dead_control())
        }
    }

    fn fold_region(graph: &mut Graph, node: NodeId) -> Option<NodeId> {
        let predecessors = graph.node(node).inputs.clone();
        let live = predecessors
            .iter()
            .positions(|predecessor| !graph.is_dead_control(*predecessor))
            .collect::<SmallVec<[usize; 4]>>();

        let only = match live.as_slice() {
            [] if !graph.is_dead_control(node) => return Some(graph.dead_control()),
            [only] => *only,
            _ => return None,
        };

        let phis = graph
            .users(node)
            .into_iter()
            .map(|user| user.node)
            .filter(|user| graph.phi_region(*user) == Some(node) && graph.is_live(*user))
            .unique()
            .collect_vec();

        for phi in phis {
            let case = graph.node(phi).inputs[only + 1];
            graph.replace(phi, case);
        }

        Some(predecessors[only])
    }

    fn fold_phi(graph: &mut Graph, node: NodeId) -> Option<NodeId> {
        let inputs = graph.node(node).inputs.clone();
        let region = inputs[0];

        if !graph.is_live(region) {
            return None;
        }

        let predecessors = graph.node(region).inputs.clone();
        let cases = inputs[1..]
            .iter()
            .zip(&predecessors)
            .filter(|(case, predecessor)| **case != node && !graph.is_dead_control(**predecessor))
            .map(|(case, _)| *case)
            .collect_vec();

        if let Some(first) = cases.first().filter(|_| cases.iter().all_equal()) {
            return Some(*first);
        }

        let merged = cases
            .iter()
            .map(|case| graph.ty(*case).clone())
            .reduce(|merged, case| merged.phi(&case))?;

        if merged.is_constant() && !merged.is_error() {
            Some(constant(graph, merged))
        } else {
            None
        }
    }
}

impl Peephole for PhiFold {
    fn name(&self) -> &'static str {
        "phi-fold"
    }

    fn mask(&self) -> OpMask {
        OpMask::of(&[
            OpKind::BranchTrue,
            OpKind::BranchFalse,
            OpKind::Region,
            OpKind::Loop,
            OpKind::Phi,
        ])
    }

    fn rewrite(&self, graph: &mut Graph, node: NodeId) -> Option<NodeId> {
        match graph.op(node).kind() {
            OpKind::BranchTrue => Self::fold_branch(graph, node, true),
            OpKind::BranchFalse => Self::fold_branch(graph, node, false),
            OpKind::Region | OpKind::Loop => Self::fold_region(graph, node),
            OpKind::Phi => Self::fold_phi(graph, node),
            _ => None,
        }
    }
}

/// A load right after a store to the same place reads the stored value
pub struct RedundantLoad;

impl Peephole for RedundantLoad {
    fn name(&self) -> &'static str {
        "redundant-load"
    }

    fn mask(&self) -> OpMask {
        OpMask::of(&[OpKind::Load])
    }

    fn rewrite(&self, graph: &mut Graph, node: NodeId) -> Option<NodeId> {
        let Op::Load { offset } = *graph.op(node) else {
            return None;
        };

        let target = graph.memory_of(node)?.target;
        let mut previous = graph.memory_of(node)?.previous;

        loop {
            match *graph.op(previous) {
                Op::Store { offset: stored } if stored == offset => {
                    let effect = graph.memory_of(previous)?;
                    let value = graph.node(previous).inputs[1];

                    return (effect.target == target && graph.ty(value).same_shape(graph.ty(node)))
                        .then_some(value);
                }
                Op::Load { .. } => previous = graph.memory_of(previous)?.previous,
                _ => return None,
            }
        }
    }
}

/// Dispatches nodes to the passes registered for their op
pub struct PeepholeRegistry {
    passes: Vec<Box<dyn Peephole>>,
    by_kind: Vec<SmallVec<[usize; 2]>>,
}

impl Default for PeepholeRegistry {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ConstantFold),
            Box::new(ComparisonFold),
            Box::new(PhiFold),
            Box::new(RedundantLoad),
        ])
    }
}

impl PeepholeRegistry {
    pub fn new(passes: Vec<Box<dyn Peephole>>) -> Self {
        let mut by_kind = vec![SmallVec::new(); OpKind::COUNT];

        for (index, pass) in passes.iter().enumerate() {
            for kind in OpKind::iter().filter(|kind| pass.mask().contains(*kind)) {
                by_kind[kind as usize].push(index);
            }
        }

        Self { passes, by_kind }
    }

    /// Offers `node` to its passes in order. The first replacement wins: it
    /// takes over the users of `node` and is returned.
    pub fn apply(&self, graph: &mut Graph, node: NodeId) -> Option<NodeId> {
        let kind = graph.op(node).kind();

        for index in &self.by_kind[kind as usize] {
            let pass = &self.passes[*index];

            let Some(replacement) = pass.rewrite(graph, node) else {
                continue;
            };

            if replacement == node || !graph.is_live(node) {
                continue;
            }

            trace!(pass = pass.name(), %node, %replacement, "peephole rewrite");
            graph.replace(node, replacement);
            return Some(replacement);
        }

        None
    }

    /// Rewrites until nothing changes. Returns the number of rewrites.
    pub fn run(&self, graph: &mut Graph) -> usize {
        let mut worklist = graph
            .node_ids()
            .filter(|id| graph.is_live(*id))
            .collect::<VecDeque<_>>();
        let mut queued = worklist.iter().copied().collect::<HashSet<_>>();
        let mut rewrites = 0;

        while let Some(node) = worklist.pop_front() {
            queued.remove(&node);

            if !graph.is_live(node) {
                continue;
            }

            let Some(replacement) = self.apply(graph, node) else {
                continue;
            };

            rewrites += 1;

            let requeue = graph
                .users(replacement)
                .into_iter()
                .map(|user| user.node)
                .chain([replacement])
                .collect_vec();

            for user in requeue {
                if queued.insert(user) {
                    worklist.push_back(user);
                }
            }
        }

        debug!(rewrites, "peephole registry finished");
        rewrites
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{
        graph::op::{BinaryOp, CompareOp},
        lattice::{IntWidth, Level},
        nodegen::{Alloca, Branch, Constant, Load, NodeBuilder, Phi, Region, Store},
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
    fn registry_only_offers_masked_ops() {
        let registry = PeepholeRegistry::default();

        assert_eq!(registry.by_kind[OpKind::Load as usize].as_slice(), &[3]);
        assert_eq!(registry.by_kind[OpKind::Compare as usize].as_slice(), &[0, 1]);
        assert!(registry.by_kind[OpKind::Start as usize].is_empty());
    }

    #[test]
    fn binary_with_late_constant_operands_folds() {
        let mut builder = NodeBuilder::new();
        let x = opaque_int(&mut builder);
        let two = builder.make(Constant(Type::int_of(IntWidth::Int, 2)));
        let add = builder.graph.create(Op::Binary(BinaryOp::Add), Type::int_type(), &[x, two]);
        let mut graph = builder.into_graph();

        // The load turns out to be 1
        let one = graph.create(Op::Constant, Type::int_of(IntWidth::Int, 1), &[]);
        graph.replace(x, one);

        let replacement = PeepholeRegistry::default().apply(&mut graph, add).unwrap();

        assert_eq!(graph.ty(replacement), &Type::int_of(IntWidth::Int, 3));
        assert!(!graph.is_live(add));
    }

    #[test]
    fn self_comparison_of_an_opaque_value_folds() {
        let mut builder = NodeBuilder::new();
        let x = opaque_int(&mut builder);
        let compare = builder.graph.create(
            Op::Compare(CompareOp::LessEqual),
            Type::Bool(Level::Bottom),
            &[x, x],
        );
        let mut graph = builder.into_graph();

        let replacement = ComparisonFold.rewrite(&mut graph, compare).unwrap();

        assert_eq!(graph.ty(replacement), &Type::bool(true));
    }

    #[test]
    fn constant_branch_collapses_its_region_and_phis() {
        let mut builder = NodeBuilder::new();
        let x = opaque_int(&mut builder);
        let y = opaque_int(&mut builder);
        let flag = builder.make(Constant(Type::Bool(Level::Bottom)));
        let control = builder.cursor.control;

        let taken = builder.make(Branch {
            condition: flag,
            control,
            taken: true,
        });
        let untaken = builder.make(Branch {
            condition: flag,
            control,
            taken: false,
        });
        let region = builder.make(Region {
            predecessors: vec![taken, untaken],
        });
        let phi = builder.make(Phi::value(region, vec![x, y]));
        let mut graph = builder.into_graph();

        // The condition is found to be true after construction
        let yes = graph.create(Op::Constant, Type::bool(true), &[]);
        graph.replace(flag, yes);

        PeepholeRegistry::default().run(&mut graph);

        assert!(!graph.is_live(phi));
        assert!(!graph.is_live(region));
        assert!(graph.users(x).iter().all(|user| user.node != phi));
    }

    #[test]
    fn load_after_store_is_forwarded() {
        let mut builder = NodeBuilder::new();
        let slot = builder.make(Alloca {
            ty: Type::int_type(),
        });
        let seven = builder.make(Constant(Type::int_of(IntWidth::Int, 7)));
        builder.make(Store {
            base: slot,
            offset: 0,
            value: seven,
        });

        // Built by hand so construction does not forward it first
        let load = builder
            .graph
            .create(Op::Load { offset: 0 }, Type::int_type(), &[slot]);
        builder.thread_memory(load, Some(slot), builder.memory_tag(slot));
        let mut graph = builder.into_graph();

        assert_eq!(RedundantLoad.rewrite(&mut graph, load), Some(seven));
    }
}
