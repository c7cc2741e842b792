//! Moves loads and stores up the memory chain, past earlier effects they are
//! independent of. A load that ends up right behind a store to the same place
//! can then be forwarded by the peephole registry.

use hashbrown::HashSet;
use itertools::Itertools;
use tracing::{debug, trace};

use crate::middle::{
    graph::{EdgeKind, Graph, MemoryTag, NodeId, User, op::Op},
    lattice::Type,
};

/// Users that consume `id` as a memory state: the next effect in the chain,
/// or a memory phi at a join
fn memory_consumers(graph: &Graph, id: NodeId) -> Vec<User> {
    graph
        .users(id)
        .into_iter()
        .filter(|user| match user.edge {
            EdgeKind::MemoryPrevious => true,
            EdgeKind::Value(_) => {
                *graph.op(user.node) == Op::Phi && *graph.ty(user.node) == Type::Memory
            }
            _ => false,
        })
        .collect()
}

/// Bytes touched by a load or store
fn access_range(graph: &Graph, id: NodeId, offset: u32) -> (u32, u32) {
    let accessed = match graph.op(id) {
        Op::Store { .. } => graph.ty(graph.node(id).inputs[1]),
        _ => graph.ty(id),
    };

    (offset, offset + accessed.layout().size)
}

/// Whether `node` can be moved in front of `previous` without changing what
/// any access observes
fn commutes(graph: &Graph, node: NodeId, previous: NodeId) -> bool {
    let (Some(ours), Some(theirs)) = (graph.memory_of(node), graph.memory_of(previous)) else {
        return false;
    };

    match (graph.op(node), graph.op(previous)) {
        (Op::Load { .. }, Op::Load { .. }) => true,
        (
            Op::Load { offset: a } | Op::Store { offset: a },
            Op::Load { offset: b } | Op::Store { offset: b },
        ) => {
            if ours.tag.is_disjoint_from(theirs.tag) {
                return true;
            }

            if ours.target.is_none() || ours.target != theirs.target {
                return false;
            }

            let (start, end) = access_range(graph, node, *a);
            let (other_start, other_end) = access_range(graph, previous, *b);

            end <= other_start || other_end <= start
        }
        (_, Op::Alloca(slot)) => matches!(ours.tag, MemoryTag::Slot(own) if own != *slot),
        _ => false,
    }
}

/// Whether `node` reads the value of `previous`, directly or through other
/// values
fn depends_on(graph: &Graph, node: NodeId, previous: NodeId) -> bool {
    let mut stack = graph.node(node).inputs.to_vec();
    let mut seen = HashSet::new();

    while let Some(id) = stack.pop() {
        if id == previous {
            return true;
        }

        if seen.insert(id) {
            stack.extend(graph.node(id).inputs.iter().copied());
        }
    }

    false
}

fn can_pass(graph: &Graph, node: NodeId, previous: NodeId) -> bool {
    let consumers = memory_consumers(graph, previous);

    // A fork in the chain is a barrier
    if consumers.len() != 1 || consumers[0].node != node {
        return false;
    }

    commutes(graph, node, previous) && !depends_on(graph, node, previous)
}

/// Turns `before -> previous -> node -> consumers` into
/// `before -> node -> previous -> consumers`
fn swap(graph: &mut Graph, node: NodeId, previous: NodeId) {
    let Some(before) = graph.memory_of(previous).map(|effect| effect.previous) else {
        return;
    };

    for consumer in memory_consumers(graph, node) {
        match consumer.edge {
            EdgeKind::MemoryPrevious => graph.set_memory_previous(consumer.node, previous),
            _ => graph.replace_input(consumer.node, node, previous),
        }
    }

    graph.set_memory_previous(node, before);
    graph.set_memory_previous(previous, node);

    trace!(%node, past = %previous, "moved memory access");
}

/// Moves every load and store as far up the chain as it can go. Returns the
/// number of single steps taken.
pub fn reorder_memory(graph: &mut Graph) -> usize {
    let accesses = graph
        .node_ids()
        .filter(|id| graph.is_live(*id) && graph.op(*id).is_memory_access())
        .collect_vec();

    let mut moved = 0;

    for node in accesses {
        while let Some(previous) = graph.memory_of(node).map(|effect| effect.previous) {
            if !can_pass(graph, node, previous) {
                break;
            }

            swap(graph, node, previous);
            moved += 1;
        }
    }

    debug!(moved, "reordered memory accesses");
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{
        lattice::IntWidth,
        nodegen::{Alloca, Constant, NodeBuilder, Store},
    };

    fn int(builder: &mut NodeBuilder, value: i128) -> NodeId {
        builder.make(Constant(Type::int_of(IntWidth::Int, value)))
    }

    /// A load built by hand, so construction does not walk past anything
    fn raw_load(builder: &mut NodeBuilder, base: NodeId) -> NodeId {
        let load = builder
            .graph
            .create(Op::Load { offset: 0 }, Type::int_type(), &[base]);
        let tag = builder.memory_tag(base);

        builder.thread_memory(load, Some(base), tag);
        load
    }

    #[test]
    fn load_moves_past_a_store_to_another_slot() {
        let mut builder = NodeBuilder::new();
        let x = builder.make(Alloca {
            ty: Type::int_type(),
        });
        let y = builder.make(Alloca {
            ty: Type::int_type(),
        });
        let one = int(&mut builder, 1);
        let two = int(&mut builder, 2);

        let store_x = builder.make(Store {
            base: x,
            offset: 0,
            value: one,
        });
        let store_y = builder.make(Store {
            base: y,
            offset: 0,
            value: two,
        });
        let load_x = raw_load(&mut builder, x);
        let mut graph = builder.into_graph();

        // `store_x` passes the alloca of `y`, then `load_x` passes both
        // `store_y` and that alloca
        assert_eq!(reorder_memory(&mut graph), 3);
        assert_eq!(graph.memory_of(load_x).unwrap().previous, store_x);
        assert_eq!(graph.memory_of(y).unwrap().previous, load_x);
        assert_eq!(graph.memory_of(store_y).unwrap().previous, y);
    }

    #[test]
    fn stores_to_the_same_place_stay_in_order() {
        let mut builder = NodeBuilder::new();
        let x = builder.make(Alloca {
            ty: Type::int_type(),
        });
        let one = int(&mut builder, 1);
        let two = int(&mut builder, 2);

        let first = builder.make(Store {
            base: x,
            offset: 0,
            value: one,
        });
        let second = builder.make(Store {
            base: x,
            offset: 0,
            value: two,
        });
        let mut graph = builder.into_graph();

        assert_eq!(reorder_memory(&mut graph), 0);
        assert_eq!(graph.memory_of(second).unwrap().previous, first);
    }

    #[test]
    fn disjoint_members_of_one_slot_commute() {
        let mut builder = NodeBuilder::new();
        let pair = Type::tuple(vec![Type::int_type(), Type::int_type()]);
        let slot = builder.make(Alloca { ty: pair });
        let one = int(&mut builder, 1);
        let two = int(&mut builder, 2);

        let low = builder.make(Store {
            base: slot,
            offset: 0,
            value: one,
        });
        let high = builder.make(Store {
            base: slot,
            offset: 8,
            value: two,
        });
        let mut graph = builder.into_graph();

        // `high` moves above `low` but not above the alloca of its own slot
        assert_eq!(reorder_memory(&mut graph), 1);
        assert_eq!(graph.memory_of(high).unwrap().previous, slot);
        assert_eq!(graph.memory_of(low).unwrap().previous, high);
    }

    #[test]
    fn forks_are_barriers() {
        let mut builder = NodeBuilder::new();
        let x = builder.make(Alloca {
            ty: Type::int_type(),
        });
        let y = builder.make(Alloca {
            ty: Type::int_type(),
        });
        let one = int(&mut builder, 1);
        let store_y = builder.make(Store {
            base: y,
            offset: 0,
            value: one,
        });

        let first = raw_load(&mut builder, x);
        builder.cursor.memory = store_y;
        let second = raw_load(&mut builder, x);
        let mut graph = builder.into_graph();

        reorder_memory(&mut graph);

        assert_eq!(graph.memory_of(first).unwrap().previous, store_y);
        assert_eq!(graph.memory_of(second).unwrap().previous, store_y);
    }
}
