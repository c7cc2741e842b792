//! The sea-of-nodes graph. Nodes live in a generational arena and are connected
//! by three kinds of edges: ordered value inputs stored on the node, and
//! control and memory edges stored in side tables. Every edge is mirrored by a
//! [`User`] entry on its target so liveness questions can be answered without
//! scanning the whole graph.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use tracing::trace;

use crate::{
    frontend::lexer::Span,
    index::{Index, IndexVec, simple_index},
    middle::lattice::Type,
};

use self::op::{Op, SlotId};

pub mod op;
pub mod pretty_print;

simple_index! {
    struct SlotIndex;
}

/// Handle to a node. A handle outlives the node it names: once the node is
/// freed its slot's generation moves on and lookups through the old handle
/// fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The user's value input at this position
    Value(u32),
    Control,
    MemoryPrevious,
    MemoryTarget,
}

/// Reverse edge: `node` refers to the node owning this entry through `edge`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct User {
    pub node: NodeId,
    pub edge: EdgeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Maybe,
    Reachable,
    /// Replaced by another node, waiting to be swept
    Dead,
}

/// What a memory access may touch, used to prove two accesses independent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryTag {
    Slot(SlotId),
    Unknown,
    Heap,
}

impl MemoryTag {
    /// Whether two tags can never name the same memory
    pub fn is_disjoint_from(self, other: MemoryTag) -> bool {
        match (self, other) {
            (MemoryTag::Slot(a), MemoryTag::Slot(b)) => a != b,
            (MemoryTag::Slot(_), MemoryTag::Heap) | (MemoryTag::Heap, MemoryTag::Slot(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryEffect {
    pub previous: NodeId,
    pub target: Option<NodeId>,
    pub tag: MemoryTag,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub op: Op,
    pub ty: Type,
    pub inputs: SmallVec<[NodeId; 3]>,
    users: Vec<User>,
    pub mark: Reachability,
}

impl Node {
    /// Raw reverse edges, possibly including stale ones. Prefer [`Graph::users`].
    pub fn raw_users(&self) -> &[User] {
        &self.users
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    slots: IndexVec<SlotIndex, Slot>,
    free: Vec<SlotIndex>,
    control: HashMap<NodeId, NodeId>,
    memory: HashMap<NodeId, MemoryEffect>,
    phi_regions: HashMap<NodeId, NodeId>,
    roots: HashSet<NodeId>,
    dead_control: Option<NodeId>,
    live: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated nodes, including replaced ones not yet swept
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn create(&mut self, op: Op, ty: Type, inputs: &[NodeId]) -> NodeId {
        let node = Node {
            op,
            ty,
            inputs: SmallVec::from_slice(inputs),
            users: Vec::new(),
            mark: Reachability::Maybe,
        };

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);

                NodeId {
                    index: index.index() as u32,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });

                NodeId {
                    index: index.index() as u32,
                    generation: 0,
                }
            }
        };

        self.live += 1;

        for (position, input) in inputs.iter().enumerate() {
            if inputs[..position].contains(input) {
                continue;
            }

            self.register_user(*input, User {
                node: id,
                edge: EdgeKind::Value(position as u32),
            });
        }

        trace!(node = %id, op = %self.node(id).op, ty = %self.node(id).ty, "created node");

        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(SlotIndex::new(id.index()))?;

        if slot.generation != id.generation {
            return None;
        }

        slot.node.as_ref()
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(SlotIndex::new(id.index()))?;

        if slot.generation != id.generation {
            return None;
        }

        slot.node.as_mut()
    }

    /// Panics on a stale handle
    pub fn node(&self, id: NodeId) -> &Node {
        match self.get(id) {
            Some(node) => node,
            None => panic!("stale node handle {id} (generation {})", id.generation),
        }
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("stale node handle {id} (generation {})", id.generation),
        }
    }

    /// Whether `id` names a node that has neither been freed nor replaced
    pub fn is_live(&self, id: NodeId) -> bool {
        self.get(id)
            .is_some_and(|node| node.mark != Reachability::Dead)
    }

    pub fn ty(&self, id: NodeId) -> &Type {
        &self.node(id).ty
    }

    pub fn op(&self, id: NodeId) -> &Op {
        &self.node(id).op
    }

    pub fn set_type(&mut self, id: NodeId, ty: Type) {
        self.node_mut(id).ty = ty;
    }

    /// Handles of every allocated node, in slot order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|_| NodeId {
                index: index.index() as u32,
                generation: slot.generation,
            })
        })
    }

    fn register_user(&mut self, target: NodeId, user: User) {
        let node = self.node_mut(target);

        if !node.users.contains(&user) {
            node.users.push(user);
        }
    }

    /* Side tables */

    pub fn attach_control(&mut self, node: NodeId, predecessor: NodeId) {
        self.control.insert(node, predecessor);
        self.register_user(predecessor, User {
            node,
            edge: EdgeKind::Control,
        });
    }

    pub fn control_of(&self, node: NodeId) -> Option<NodeId> {
        self.control.get(&node).copied()
    }

    pub fn attach_memory(&mut self, node: NodeId, effect: MemoryEffect) {
        self.memory.insert(node, effect);
        self.register_user(effect.previous, User {
            node,
            edge: EdgeKind::MemoryPrevious,
        });

        if let Some(target) = effect.target {
            self.register_user(target, User {
                node,
                edge: EdgeKind::MemoryTarget,
            });
        }
    }

    pub fn memory_of(&self, node: NodeId) -> Option<&MemoryEffect> {
        self.memory.get(&node)
    }

    pub fn set_memory_previous(&mut self, node: NodeId, previous: NodeId) {
        let Some(effect) = self.memory.get_mut(&node) else {
            panic!("{node} has no memory effect");
        };

        effect.previous = previous;
        self.register_user(previous, User {
            node,
            edge: EdgeKind::MemoryPrevious,
        });
    }

    /// Late value edge, for loop back edges and function return points
    pub fn append_input(&mut self, node: NodeId, input: NodeId) {
        let inputs = &mut self.node_mut(node).inputs;
        let position = inputs.len() as u32;
        let first = !inputs.contains(&input);

        inputs.push(input);

        if first {
            self.register_user(input, User {
                node,
                edge: EdgeKind::Value(position),
            });
        }
    }

    /// Points every value input of `node` that refers to `old` at `new`
    pub fn replace_input(&mut self, node: NodeId, old: NodeId, new: NodeId) {
        let inputs = &mut self.node_mut(node).inputs;
        let mut first = None;

        for (position, input) in inputs.iter_mut().enumerate() {
            if *input == old {
                *input = new;
                first.get_or_insert(position as u32);
            }
        }

        if let Some(position) = first {
            self.register_user(new, User {
                node,
                edge: EdgeKind::Value(position),
            });
        }
    }

    pub fn set_phi_region(&mut self, phi: NodeId, region: NodeId) {
        self.phi_regions.insert(phi, region);
    }

    pub fn phi_region(&self, phi: NodeId) -> Option<NodeId> {
        self.phi_regions.get(&phi).copied()
    }

    pub fn mark_root(&mut self, node: NodeId) {
        self.roots.insert(node);
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots.iter().copied()
    }

    /// The shared constant marking unreachable control
    pub fn dead_control(&mut self) -> NodeId {
        if let Some(id) = self.dead_control.filter(|id| self.is_live(*id)) {
            return id;
        }

        let id = self.create(Op::Constant, Type::dead(), &[]);
        self.dead_control = Some(id);
        id
    }

    pub fn is_dead_control(&self, id: NodeId) -> bool {
        self.ty(id).is_dead()
    }

    /* Users */

    fn edge_holds(&self, target: NodeId, user: User) -> bool {
        let Some(node) = self.get(user.node) else {
            return false;
        };

        if node.mark == Reachability::Dead {
            return false;
        }

        match user.edge {
            EdgeKind::Value(_) => node.inputs.contains(&target),
            EdgeKind::Control => self.control_of(user.node) == Some(target),
            EdgeKind::MemoryPrevious => self
                .memory_of(user.node)
                .is_some_and(|effect| effect.previous == target),
            EdgeKind::MemoryTarget => self
                .memory_of(user.node)
                .is_some_and(|effect| effect.target == Some(target)),
        }
    }

    /// Users whose edge still points at `id`
    pub fn users(&self, id: NodeId) -> Vec<User> {
        self.node(id)
            .users
            .iter()
            .copied()
            .filter(|user| self.edge_holds(id, *user))
            .collect()
    }

    /// Live nodes whose memory predecessor is `id`
    pub fn memory_users(&self, id: NodeId) -> Vec<NodeId> {
        self.users(id)
            .into_iter()
            .filter(|user| user.edge == EdgeKind::MemoryPrevious)
            .map(|user| user.node)
            .collect()
    }

    /// Every node `id` depends on through any kind of edge
    pub fn dependencies(&self, id: NodeId) -> SmallVec<[NodeId; 8]> {
        let mut dependencies = SmallVec::from_slice(&self.node(id).inputs);

        dependencies.extend(self.control_of(id));

        if let Some(effect) = self.memory_of(id) {
            dependencies.push(effect.previous);
            dependencies.extend(effect.target);
        }

        dependencies.extend(self.phi_region(id));
        dependencies
    }

    /// Points every user of `old` at `new` and marks `old` dead. A node or
    /// memory phi that followed `old` in the memory chain is attached to
    /// `old`'s own predecessor instead, so the chain stays linked.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }

        let users = self.users(old);
        let old_previous = self.memory_of(old).map(|effect| effect.previous);

        for user in users {
            match user.edge {
                EdgeKind::Value(_) => {
                    let memory_phi =
                        self.node(user.node).op == Op::Phi && self.node(user.node).ty == Type::Memory;

                    match old_previous {
                        Some(previous) if memory_phi => self.replace_input(user.node, old, previous),
                        _ => self.replace_input(user.node, old, new),
                    }
                }
                EdgeKind::Control => self.attach_control(user.node, new),
                EdgeKind::MemoryPrevious => {
                    self.set_memory_previous(user.node, old_previous.unwrap_or(new))
                }
                EdgeKind::MemoryTarget => {
                    if let Some(effect) = self.memory.get_mut(&user.node) {
                        effect.target = Some(new);
                    }

                    self.register_user(new, User {
                        node: user.node,
                        edge: EdgeKind::MemoryTarget,
                    });
                }
            }

            if self.phi_region(user.node) == Some(old) {
                self.set_phi_region(user.node, new);
            }
        }

        if self.roots.remove(&old) {
            self.roots.insert(new);
        }

        self.node_mut(old).mark = Reachability::Dead;

        trace!(%old, %new, "replaced node");
    }

    /* Sweeping */

    pub(crate) fn reset_marks(&mut self) {
        for slot in self.slots.raw.iter_mut() {
            if let Some(node) = &mut slot.node {
                node.mark = Reachability::Maybe;
            }
        }
    }

    /// Frees the slot of `id`, invalidating every handle to it
    pub(crate) fn remove(&mut self, id: NodeId) {
        let slot = &mut self.slots[SlotIndex::new(id.index())];

        if slot.generation != id.generation || slot.node.take().is_none() {
            return;
        }

        slot.generation += 1;
        self.free.push(SlotIndex::new(id.index()));
        self.live -= 1;

        self.control.remove(&id);
        self.memory.remove(&id);
        self.phi_regions.remove(&id);
        self.roots.remove(&id);
    }

    /// Drops reverse edges whose user is gone or no longer points here
    pub(crate) fn prune_users(&mut self) {
        let ids = self.node_ids().collect::<Vec<_>>();

        for id in ids {
            let users = self.users(id);
            self.node_mut(id).users = users;
        }
    }

    /* Queries */

    /// Error nodes that have not been replaced, with their spans and messages
    pub fn errors(&self) -> Vec<(NodeId, Span, String)> {
        self.node_ids()
            .filter_map(|id| {
                let node = self.node(id);

                match (&node.op, &node.ty) {
                    (Op::Error(span), Type::Error(message)) if node.mark != Reachability::Dead => {
                        Some((id, *span, message.to_string()))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    pub fn view(&self) -> GraphView<'_> {
        GraphView { graph: self }
    }
}

/// Read-only access to a graph for consumers downstream of the optimizer
#[derive(Debug, Clone, Copy)]
pub struct GraphView<'graph> {
    graph: &'graph Graph,
}

impl<'graph> GraphView<'graph> {
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &'graph Node)> + 'graph {
        let graph = self.graph;

        graph
            .node_ids()
            .filter(move |id| graph.is_live(*id))
            .map(move |id| (id, graph.node(id)))
    }

    pub fn node(&self, id: NodeId) -> Option<&'graph Node> {
        self.graph.get(id)
    }

    pub fn control(&self, id: NodeId) -> Option<NodeId> {
        self.graph.control_of(id)
    }

    pub fn memory(&self, id: NodeId) -> Option<&'graph MemoryEffect> {
        self.graph.memory_of(id)
    }

    pub fn phi_region(&self, id: NodeId) -> Option<NodeId> {
        self.graph.phi_region(id)
    }

    pub fn users(&self, id: NodeId) -> Vec<User> {
        self.graph.users(id)
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + 'graph {
        self.graph.roots()
    }

    pub fn len(&self) -> usize {
        self.nodes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live nodes matching `predicate`
    pub fn find(&self, predicate: impl Fn(&Node) -> bool) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, node)| predicate(node))
            .map(|(id, _)| id)
            .collect()
    }
}
