//! Front end for the Kelp language. Source text is turned directly into a
//! sea-of-nodes graph: there is no syntax tree, and values, control and memory
//! effects are all nodes connected by typed edges.

use tracing::info;

use crate::{
    error::{CompileError, Diagnostic},
    frontend::{SourceFile, parser::Parser},
    middle::{
        graph::{Graph, NodeId},
        optimization::{OptimizationStats, optimize},
    },
};

pub mod error;
pub mod frontend;
pub mod index;
pub mod middle;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Run the whole-graph passes after construction
    pub optimize: bool,
    pub reorder_memory: bool,
    pub peephole: bool,
    pub max_peephole_rounds: usize,
    /// Keep locals as SSA values rather than stack slots where possible
    pub promote_locals: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            reorder_memory: true,
            peephole: true,
            max_peephole_rounds: 8,
            promote_locals: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub functions: usize,
    /// Nodes alive right after construction
    pub constructed: usize,
    pub optimization: OptimizationStats,
}

#[derive(Debug)]
pub struct Compilation {
    pub graph: Graph,
    pub exit: NodeId,
    /// Type errors carried by error nodes of the constructed graph
    pub diagnostics: Vec<Diagnostic>,
    pub stats: Stats,
}

impl Compilation {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Builds and optimizes the graph for a whole file. Structural problems stop
/// construction with an `Err`; type errors become diagnostics instead.
pub fn compile(source: &SourceFile, options: &CompileOptions) -> Result<Compilation, CompileError> {
    let construction = Parser::construct(source, options.promote_locals)?;
    let mut graph = construction.graph;

    // Collected before optimizing so errors in dead code are still reported
    let diagnostics = graph
        .errors()
        .into_iter()
        .map(|(_, span, message)| Diagnostic { span, message })
        .collect::<Vec<_>>();

    let constructed = graph.len();
    let optimization = optimize(&mut graph, options);

    info!(
        source = %source.origin,
        functions = construction.functions,
        nodes = graph.len(),
        errors = diagnostics.len(),
        "compiled"
    );

    Ok(Compilation {
        graph,
        exit: construction.exit,
        diagnostics,
        stats: Stats {
            functions: construction.functions,
            constructed,
            optimization,
        },
    })
}
