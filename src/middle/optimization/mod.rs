//! Whole-graph passes run after construction. Local rewrites already happen
//! while nodes are built; these revisit the finished graph where later
//! information (a phi closed, a store moved) opens new opportunities.

use tracing::info;

use crate::{CompileOptions, middle::graph::Graph};

pub mod dce;
pub mod peephole;
pub mod reorder;

use self::{dce::eliminate_dead_code, peephole::PeepholeRegistry, reorder::reorder_memory};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptimizationStats {
    pub rounds: usize,
    pub reordered: usize,
    pub rewrites: usize,
    pub removed: usize,
}

/// Alternates memory reordering and peephole rewriting until neither changes
/// anything or the round limit is hit, then sweeps dead nodes.
pub fn optimize(graph: &mut Graph, options: &CompileOptions) -> OptimizationStats {
    let mut stats = OptimizationStats::default();

    if !options.optimize {
        return stats;
    }

    let registry = PeepholeRegistry::default();

    while stats.rounds < options.max_peephole_rounds {
        stats.rounds += 1;

        let reordered = if options.reorder_memory {
            reorder_memory(graph)
        } else {
            0
        };
        let rewrites = if options.peephole {
            registry.run(graph)
        } else {
            0
        };

        stats.reordered += reordered;
        stats.rewrites += rewrites;

        if reordered == 0 && rewrites == 0 {
            break;
        }
    }

    stats.removed = eliminate_dead_code(graph);

    info!(
        rounds = stats.rounds,
        reordered = stats.reordered,
        rewrites = stats.rewrites,
        removed = stats.removed,
        "optimized graph"
    );

    stats
}
