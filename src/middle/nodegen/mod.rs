//! Node constructors used while parsing. Every node kind implements
//! [`Nodegen`]: `infer` computes the type of the node from its operands
//! without touching the graph, then `emit` adds the node, or anything simpler
//! that computes the same value. [`NodeBuilder::make`] is the only way nodes
//! get into the graph during construction.

use std::rc::Rc;

use tracing::trace;

use crate::{
    frontend::lexer::Span,
    index::IndexVec,
    middle::{
        graph::{
            Graph, MemoryEffect, MemoryTag, NodeId,
            op::{Op, SlotId},
        },
        lattice::Type,
    },
};

pub mod control;
pub mod memory;
pub mod value;

pub use self::{
    control::{Branch, Call, Exit, FunctionEntry, LoopHeader, Phi, Region, Return},
    memory::{AddressOf, Alloca, Load, Store},
    value::{Binary, Build, Cast, Coerce, Compare, Constant, Parameter, Projection, Unary},
};

pub trait Nodegen {
    /// Type of the node about to be built. Must not mutate anything.
    fn infer(&self, graph: &Graph) -> Type;

    /// Adds the node typed `ty` and returns the node holding its value, which
    /// is not necessarily a new one
    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId;
}

/// Where new effects attach: the latest control node and the latest memory
/// effect on the current path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub control: NodeId,
    pub memory: NodeId,
}

#[derive(Debug)]
pub struct NodeBuilder {
    pub graph: Graph,
    pub cursor: Cursor,
    start: NodeId,
    span: Span,
    slots: IndexVec<SlotId, Type>,
    reported: Vec<(Rc<str>, NodeId)>,
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBuilder {
    pub fn new() -> Self {
        let mut graph = Graph::new();
        let start = graph.create(Op::Start, Type::live(), &[]);

        Self {
            graph,
            cursor: Cursor {
                control: start,
                memory: start,
            },
            start,
            span: Span::default(),
            slots: IndexVec::new(),
            reported: Vec::new(),
        }
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn span(&self) -> Span {
        self.span
    }

    /// Span recorded on error nodes made from now on. Returns the previous one.
    pub fn set_span(&mut self, span: Span) -> Span {
        std::mem::replace(&mut self.span, span)
    }

    pub fn make<N: Nodegen>(&mut self, node: N) -> NodeId {
        let ty = node.infer(&self.graph);

        if let Type::Error(message) = ty {
            return self.error_node(message);
        }

        node.emit(self, ty)
    }

    /// An error node for a problem found by the driver rather than the lattice
    pub fn error(&mut self, message: impl Into<String>) -> NodeId {
        self.error_node(message.into().into())
    }

    fn error_node(&mut self, message: Rc<str>) -> NodeId {
        // Errors flowing out of an operand were reported where they first appeared
        if let Some((_, id)) = self
            .reported
            .iter()
            .find(|(reported, _)| Rc::ptr_eq(reported, &message))
        {
            return *id;
        }

        let id = self
            .graph
            .create(Op::Error(self.span), Type::Error(message.clone()), &[]);
        self.reported.push((message, id));

        trace!(node = %id, span = ?self.span, "emitted error node");

        id
    }

    pub fn constant(&mut self, ty: Type) -> NodeId {
        self.graph.create(Op::Constant, ty, &[])
    }

    /// Whether the cursor is on a path that can never execute
    pub fn is_dead(&self) -> bool {
        self.graph.is_dead_control(self.cursor.control)
    }

    /// Moves the cursor onto dead control, after a `return` or a jump
    pub fn kill(&mut self) {
        self.cursor.control = self.graph.dead_control();
    }

    pub fn new_slot(&mut self, ty: Type) -> SlotId {
        self.slots.push(ty)
    }

    pub fn slot_type(&self, slot: SlotId) -> Option<&Type> {
        self.slots.get(slot)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Appends `node` to the memory chain at the cursor
    pub(crate) fn thread_memory(&mut self, node: NodeId, target: Option<NodeId>, tag: MemoryTag) {
        self.graph.attach_memory(node, MemoryEffect {
            previous: self.cursor.memory,
            target,
            tag,
        });
        self.cursor.memory = node;
    }

    pub fn memory_tag(&self, base: NodeId) -> MemoryTag {
        match self.graph.op(base) {
            Op::Alloca(slot) => MemoryTag::Slot(*slot),
            _ => MemoryTag::Unknown,
        }
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::graph::op::BinaryOp;

    #[test]
    fn errors_are_reported_once_per_origin() {
        let mut builder = NodeBuilder::new();
        let yes = builder.make(Constant(Type::bool(true)));
        let one = builder.make(Constant(Type::int(1)));

        let first = builder.make(Binary::add(yes, one));
        let second = builder.make(Binary::add(first, one));

        assert_eq!(first, second);
        assert_eq!(builder.graph.errors().len(), 1);
    }

    #[test]
    fn error_nodes_record_the_current_span() {
        let mut builder = NodeBuilder::new();
        builder.set_span(Span::new(3, 9));

        let yes = builder.make(Constant(Type::bool(true)));
        let error = builder.make(Binary {
            op: BinaryOp::Subtract,
            lhs: yes,
            rhs: yes,
        });

        assert_eq!(builder.graph.op(error), &Op::Error(Span::new(3, 9)));
        assert_eq!(
            builder.graph.errors()[0].2,
            "operator `-` not supported for type `bool`"
        );
    }
}
