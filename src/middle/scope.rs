//! Lexical scopes and the merging of scopes where control flow joins.
//!
//! A `var` local either lives in a stack slot or, when promoted, is an SSA
//! value: assigning one rebinds the name in the frame that declared it. Where
//! paths join, [`merge_many`] compares the bindings each path ends with and
//! inserts phis for the ones that diverged. Slot locals only need the memory
//! state merged.

use hashbrown::HashMap;
use itertools::Itertools;
use tracing::trace;

use crate::{
    frontend::intern::InternedSymbol,
    middle::{
        graph::NodeId,
        lattice::Type,
        nodegen::{Cursor, NodeBuilder, Phi, Region},
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A named type
    Type(Type),
    /// An immutable value: a constant, a function or a `const` local
    Value(NodeId),
    /// A `var` local held as an SSA value, with its declared type
    Variable { value: NodeId, ty: Type },
    /// A `var` local living in the stack slot at `address`
    Slot { address: NodeId, ty: Type },
}

impl Binding {
    /// The SSA value bound to the name, if merging can change it
    fn merge_value(&self) -> Option<NodeId> {
        match self {
            Binding::Variable { value, .. } => Some(*value),
            _ => None,
        }
    }

    fn with_value(&self, value: NodeId) -> Binding {
        match self {
            Binding::Variable { ty, .. } => Binding::Variable {
                value,
                ty: ty.clone(),
            },
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Frame {
    bindings: HashMap<InternedSymbol, Binding>,
}

/// A chain of frames, innermost last
#[derive(Debug, Clone)]
pub struct Scope {
    frames: Vec<Frame>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// A scope with a single, global frame
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Drops every frame deeper than `depth`
    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    pub fn lookup(&self, name: InternedSymbol) -> Option<&Binding> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.bindings.get(&name))
    }

    /// Adds `name` to the innermost frame. Fails if the frame already has it.
    pub fn declare(&mut self, name: InternedSymbol, binding: Binding) -> bool {
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };

        if frame.bindings.contains_key(&name) {
            return false;
        }

        frame.bindings.insert(name, binding);
        true
    }

    /// Updates `name` in the frame that declares it
    pub fn rebind(&mut self, name: InternedSymbol, binding: Binding) -> bool {
        match self
            .frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.bindings.get_mut(&name))
        {
            Some(slot) => {
                *slot = binding;
                true
            }
            None => false,
        }
    }

    /// Every binding by frame, outermost first
    fn entries(&self) -> impl Iterator<Item = (usize, InternedSymbol, &Binding)> {
        self.frames.iter().enumerate().flat_map(|(depth, frame)| {
            frame
                .bindings
                .iter()
                .map(move |(name, binding)| (depth, *name, binding))
        })
    }

    fn get(&self, depth: usize, name: InternedSymbol) -> Option<&Binding> {
        self.frames.get(depth)?.bindings.get(&name)
    }

    fn set(&mut self, depth: usize, name: InternedSymbol, binding: Binding) {
        if let Some(frame) = self.frames.get_mut(depth) {
            frame.bindings.insert(name, binding);
        }
    }

    /// This scope seen through an earlier snapshot of it: the frames the
    /// snapshot had, holding only the names the snapshot knew, with their
    /// current bindings
    pub fn restrict_to(&self, snapshot: &Scope) -> Scope {
        let frames = snapshot
            .frames
            .iter()
            .zip(&self.frames)
            .map(|(old, current)| Frame {
                bindings: current
                    .bindings
                    .iter()
                    .filter(|(name, _)| old.bindings.contains_key(*name))
                    .map(|(name, binding)| (*name, binding.clone()))
                    .collect(),
            })
            .collect();

        Scope { frames }
    }

    /// Copies the bindings of `other` back into the frames they came from
    pub fn write_back(&mut self, other: &Scope) {
        for (depth, name, binding) in other.entries() {
            self.set(depth, name, binding.clone());
        }
    }

    /// Points every binding of `old` at `new`
    pub fn substitute(&mut self, old: NodeId, new: NodeId) {
        for frame in &mut self.frames {
            for binding in frame.bindings.values_mut() {
                if binding.merge_value() == Some(old) {
                    *binding = binding.with_value(new);
                }
            }
        }
    }
}

/// The state of one path arriving at a join
#[derive(Debug, Clone)]
pub struct Arm {
    pub scope: Scope,
    pub cursor: Cursor,
}

/// The state after a join
#[derive(Debug, Clone)]
pub struct Join {
    pub scope: Scope,
    pub cursor: Cursor,
    /// The region created for the join, if more than one path was live
    pub region: Option<NodeId>,
    /// Indices of the arms that were live, in order
    pub live: Vec<usize>,
}

impl Join {
    /// Merges one extra value per arm, like a binding
    pub fn merge_values(&self, builder: &mut NodeBuilder, values: &[NodeId]) -> NodeId {
        match (self.region, self.live.as_slice()) {
            (Some(region), live) => {
                let cases = live.iter().map(|arm| values[*arm]).collect();
                builder.make(Phi::value(region, cases))
            }
            (None, [arm]) => values[*arm],
            (None, _) => match values.first() {
                Some(value) => *value,
                None => builder.constant(Type::Void),
            },
        }
    }
}

/// Joins `arms`, all of which started out from `parent`. Dead arms are
/// dropped. A single live arm becomes the result as is. Otherwise a region
/// is created and every variable visible in `parent` whose value differs
/// between the arms gets a phi, as does the memory state.
pub fn merge_many(builder: &mut NodeBuilder, parent: &Scope, mut arms: Vec<Arm>) -> Join {
    for arm in &mut arms {
        arm.scope.truncate(parent.depth());
    }

    let live = arms
        .iter()
        .positions(|arm| !builder.graph.is_dead_control(arm.cursor.control))
        .collect_vec();

    match live.as_slice() {
        [] => {
            let memory = arms
                .first()
                .map_or(builder.cursor.memory, |arm| arm.cursor.memory);

            return Join {
                scope: parent.clone(),
                cursor: Cursor {
                    control: builder.graph.dead_control(),
                    memory,
                },
                region: None,
                live,
            };
        }
        [only] => {
            let arm = arms.swap_remove(*only);

            return Join {
                scope: arm.scope,
                cursor: arm.cursor,
                region: None,
                live,
            };
        }
        _ => {}
    }

    let region = builder.make(Region {
        predecessors: live.iter().map(|arm| arms[*arm].cursor.control).collect(),
    });

    let mut scope = parent.clone();
    let mut phis = 0;

    for (depth, name, binding) in parent.entries() {
        if binding.merge_value().is_none() {
            continue;
        }

        let cases = live
            .iter()
            .map(|arm| {
                arms[*arm]
                    .scope
                    .get(depth, name)
                    .and_then(Binding::merge_value)
                    .or(binding.merge_value())
            })
            .collect::<Option<Vec<_>>>();

        let Some(cases) = cases else {
            continue;
        };

        if cases.iter().all_equal() && cases.first() == binding.merge_value().as_ref() {
            continue;
        }

        let merged = builder.make(Phi::value(region, cases));
        scope.set(depth, name, binding.with_value(merged));
        phis += 1;
    }

    let memory = builder.make(Phi::memory(
        region,
        live.iter().map(|arm| arms[*arm].cursor.memory).collect(),
    ));

    trace!(%region, arms = live.len(), phis, "merged scopes");

    Join {
        scope,
        cursor: Cursor {
            control: region,
            memory,
        },
        region: Some(region),
        live,
    }
}

/// Two-way join, as after an `if`. A missing `else` is an arm holding the
/// parent scope.
pub fn merge(builder: &mut NodeBuilder, parent: &Scope, lhs: Arm, rhs: Arm) -> Join {
    merge_many(builder, parent, vec![lhs, rhs])
}

/// Phis at a loop header for every variable in scope and for memory. They
/// start out with the entry values and are completed by [`LoopPhis::close`].
#[derive(Debug)]
pub struct LoopPhis {
    header: NodeId,
    variables: Vec<(usize, InternedSymbol, NodeId)>,
    memory: NodeId,
}

impl LoopPhis {
    /// Rebinds every variable in `scope` to a fresh phi and moves the cursor
    /// to the header
    pub fn open(builder: &mut NodeBuilder, scope: &mut Scope, header: NodeId) -> Self {
        let entries = scope
            .entries()
            .filter_map(|(depth, name, binding)| match binding {
                Binding::Variable { value, ty } => Some((depth, name, *value, ty.clone())),
                _ => None,
            })
            .collect_vec();

        let mut variables = Vec::with_capacity(entries.len());

        for (depth, name, value, ty) in entries {
            let phi = builder.make(Phi::looping(header, value, ty.clone()));
            scope.set(depth, name, Binding::Variable { value: phi, ty });
            variables.push((depth, name, phi));
        }

        let entry_memory = builder.cursor.memory;
        let memory = builder.make(Phi::looping(header, entry_memory, Type::Memory));

        builder.cursor = Cursor {
            control: header,
            memory,
        };

        Self {
            header,
            variables,
            memory,
        }
    }

    pub fn header(&self) -> NodeId {
        self.header
    }

    /// Roots the header and the memory phi of a loop nothing leaves. No
    /// `Return` or `Exit` reaches such a loop, so dead code elimination would
    /// otherwise sweep its body.
    pub fn keep_alive(&self, builder: &mut NodeBuilder) {
        if builder.graph.ty(self.header).is_dead() {
            return;
        }

        builder.graph.mark_root(self.header);
        builder.graph.mark_root(self.memory);

        trace!(header = %self.header, "rooted loop without exits");
    }

    /// Adds the back edges, then replaces phis whose cases turned out to be
    /// all the same value. Returns the replacements made.
    pub fn close(self, builder: &mut NodeBuilder, back_edges: &[Arm]) -> Vec<(NodeId, NodeId)> {
        for edge in back_edges {
            if builder.graph.is_dead_control(edge.cursor.control) {
                continue;
            }

            builder.graph.append_input(self.header, edge.cursor.control);

            for (depth, name, phi) in &self.variables {
                let value = edge
                    .scope
                    .get(*depth, *name)
                    .and_then(Binding::merge_value)
                    .unwrap_or(*phi);

                builder.graph.append_input(*phi, value);
            }

            builder.graph.append_input(self.memory, edge.cursor.memory);
        }

        let mut replaced = Vec::new();

        for phi in self
            .variables
            .iter()
            .map(|(_, _, phi)| *phi)
            .chain([self.memory])
        {
            let cases = builder.graph.node(phi).inputs[1..]
                .iter()
                .copied()
                .filter(|case| *case != phi)
                .collect_vec();

            if let Some(first) = cases.first().filter(|_| cases.iter().all_equal()) {
                builder.graph.replace(phi, *first);
                replaced.push((phi, *first));
            }
        }

        // A replacement may itself have been replaced later in the list
        let resolved = replaced
            .iter()
            .map(|(old, new)| {
                let mut new = *new;

                while let Some((_, next)) = replaced.iter().find(|(old, _)| *old == new) {
                    new = *next;
                }

                (*old, new)
            })
            .collect_vec();

        trace!(header = %self.header, replaced = resolved.len(), "closed loop");

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{
        graph::op::Op,
        lattice::Level,
        nodegen::{Alloca, Branch, Constant, Load},
    };

    fn variable(builder: &mut NodeBuilder, scope: &mut Scope, name: &str) -> NodeId {
        let ty = Type::Bool(Level::Bottom);
        let slot = builder.make(Alloca { ty: ty.clone() });
        let value = builder.make(Load {
            base: slot,
            offset: 0,
            ty: ty.clone(),
        });

        scope.declare(name.into(), Binding::Variable { value, ty });
        value
    }

    fn branches(builder: &mut NodeBuilder, condition: NodeId) -> (Cursor, Cursor) {
        let control = builder.cursor.control;
        let memory = builder.cursor.memory;
        let arm = |builder: &mut NodeBuilder, taken| Cursor {
            control: builder.make(Branch {
                condition,
                control,
                taken,
            }),
            memory,
        };

        (arm(builder, true), arm(builder, false))
    }

    #[test]
    fn lookup_walks_outward_and_declare_targets_innermost() {
        let mut scope = Scope::new();
        let mut builder = NodeBuilder::new();
        let outer = builder.make(Constant(Type::int(1)));
        let inner = builder.make(Constant(Type::int(2)));

        assert!(scope.declare("x".into(), Binding::Value(outer)));
        scope.push();
        assert_eq!(scope.lookup("x".into()), Some(&Binding::Value(outer)));

        assert!(scope.declare("x".into(), Binding::Value(inner)));
        assert!(!scope.declare("x".into(), Binding::Value(inner)));
        assert_eq!(scope.lookup("x".into()), Some(&Binding::Value(inner)));

        scope.pop();
        assert_eq!(scope.lookup("x".into()), Some(&Binding::Value(outer)));
    }

    #[test]
    fn unchanged_bindings_get_no_phi() {
        let mut builder = NodeBuilder::new();
        let mut parent = Scope::new();
        let old = variable(&mut builder, &mut parent, "x");
        let (yes, no) = branches(&mut builder, old);
        let before = builder.graph.view().find(|node| node.op == Op::Phi).len();

        let join = merge(
            &mut builder,
            &parent,
            Arm {
                scope: parent.clone(),
                cursor: yes,
            },
            Arm {
                scope: parent.clone(),
                cursor: no,
            },
        );

        let phis = builder.graph.view().find(|node| node.op == Op::Phi).len();
        assert_eq!(phis, before);
        assert!(matches!(
            join.scope.lookup("x".into()),
            Some(Binding::Variable { value, .. }) if *value == old
        ));
    }

    #[test]
    fn divergent_bindings_get_one_phi() {
        let mut builder = NodeBuilder::new();
        let mut parent = Scope::new();
        let old = variable(&mut builder, &mut parent, "x");
        let (yes, no) = branches(&mut builder, old);
        let x = builder.make(Constant(Type::bool(true)));

        let mut assigned = parent.clone();
        assigned.rebind("x".into(), Binding::Variable {
            value: x,
            ty: Type::Bool(Level::Bottom),
        });

        let join = merge(
            &mut builder,
            &parent,
            Arm {
                scope: assigned,
                cursor: yes,
            },
            Arm {
                scope: parent.clone(),
                cursor: no,
            },
        );

        let Some(Binding::Variable { value: phi, .. }) = join.scope.lookup("x".into()) else {
            panic!("x should still be a variable");
        };
        let region = join.region.unwrap();

        assert_eq!(builder.graph.op(*phi), &Op::Phi);
        assert_eq!(builder.graph.node(*phi).inputs.as_slice(), &[region, x, old]);
    }

    #[test]
    fn dead_arm_is_dropped_without_a_region() {
        let mut builder = NodeBuilder::new();
        let mut parent = Scope::new();
        variable(&mut builder, &mut parent, "x");
        let yes = builder.make(Constant(Type::bool(true)));
        let (taken, untaken) = branches(&mut builder, yes);
        let x = builder.make(Constant(Type::bool(false)));

        let mut assigned = parent.clone();
        assigned.rebind("x".into(), Binding::Variable {
            value: x,
            ty: Type::Bool(Level::Bottom),
        });

        let join = merge(
            &mut builder,
            &parent,
            Arm {
                scope: assigned,
                cursor: taken,
            },
            Arm {
                scope: parent.clone(),
                cursor: untaken,
            },
        );

        assert_eq!(join.region, None);
        assert_eq!(join.cursor, taken);
        assert!(matches!(
            join.scope.lookup("x".into()),
            Some(Binding::Variable { value, .. }) if *value == x
        ));
    }

    #[test]
    fn restricted_scope_sees_current_values_of_captured_names() {
        let mut builder = NodeBuilder::new();
        let mut scope = Scope::new();
        let first = variable(&mut builder, &mut scope, "x");
        let captured = scope.clone();

        let second = builder.make(Constant(Type::bool(true)));
        scope.rebind("x".into(), Binding::Variable {
            value: second,
            ty: Type::Bool(Level::Bottom),
        });
        variable(&mut builder, &mut scope, "y");

        let restricted = scope.restrict_to(&captured);

        assert_ne!(first, second);
        assert!(restricted.lookup("y".into()).is_none());
        assert!(matches!(
            restricted.lookup("x".into()),
            Some(Binding::Variable { value, .. }) if *value == second
        ));
    }
}
