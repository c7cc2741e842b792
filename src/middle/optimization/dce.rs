use itertools::Itertools;
use tracing::debug;

use crate::middle::graph::{Graph, Reachability};

/// Mark and sweep from the graph's roots. Anything the roots do not reach
/// through a value, control, memory or phi edge is freed, then the user
/// lists of the survivors are pruned. Returns the number of nodes freed.
pub fn eliminate_dead_code(graph: &mut Graph) -> usize {
    graph.reset_marks();

    let mut stack = graph.roots().collect_vec();

    while let Some(id) = stack.pop() {
        if !graph.get(id).is_some_and(|node| node.mark == Reachability::Maybe) {
            continue;
        }

        graph.node_mut(id).mark = Reachability::Reachable;
        stack.extend(graph.dependencies(id));
    }

    let dead = graph
        .node_ids()
        .filter(|id| graph.node(*id).mark != Reachability::Reachable)
        .collect_vec();

    for id in &dead {
        graph.remove(*id);
    }

    graph.prune_users();

    debug!(removed = dead.len(), remaining = graph.len(), "eliminated dead code");
    dead.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{
        graph::{NodeId, op::Op},
        lattice::{IntWidth, Type},
        nodegen::{Constant, Exit, NodeBuilder},
    };

    fn program() -> (Graph, [NodeId; 3]) {
        let mut builder = NodeBuilder::new();
        let status = builder.make(Constant(Type::int_of(IntWidth::Int, 0)));
        let unused = builder.make(Constant(Type::int_of(IntWidth::Int, 9)));
        let exit = builder.make(Exit { value: status });

        (builder.into_graph(), [status, unused, exit])
    }

    #[test]
    fn unreachable_nodes_are_freed() {
        let (mut graph, [status, unused, exit]) = program();

        assert_eq!(eliminate_dead_code(&mut graph), 1);
        assert!(graph.get(unused).is_none());
        assert!(graph.is_live(status));
        assert!(graph.is_live(exit));
    }

    #[test]
    fn replaced_nodes_are_swept() {
        let (mut graph, [status, _, _]) = program();
        let other = graph.create(Op::Constant, Type::int_of(IntWidth::Int, 1), &[]);

        graph.replace(status, other);
        eliminate_dead_code(&mut graph);

        assert!(graph.get(status).is_none());
        assert_eq!(graph.users(other).len(), 1);
    }

    #[test]
    fn second_run_removes_nothing() {
        let (mut graph, _) = program();

        eliminate_dead_code(&mut graph);
        let survivors = graph.len();

        assert_eq!(eliminate_dead_code(&mut graph), 0);
        assert_eq!(graph.len(), survivors);
    }
}
