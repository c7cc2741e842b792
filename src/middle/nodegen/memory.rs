use tracing::trace;

use crate::middle::{
    graph::{Graph, NodeId, op::Op},
    lattice::Type,
    nodegen::{Build, Coerce, NodeBuilder, Nodegen, Projection},
};

/// Reserves a fresh stack slot for a value of type `ty`
#[derive(Debug, Clone)]
pub struct Alloca {
    pub ty: Type,
}

impl Nodegen for Alloca {
    fn infer(&self, _graph: &Graph) -> Type {
        match &self.ty {
            Type::Error(_) => self.ty.clone(),
            ty => Type::pointer_to(ty.bottom()),
        }
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        let slot = builder.new_slot(self.ty.bottom());
        let alloca = builder.graph.create(Op::Alloca(slot), ty, &[]);
        let tag = builder.memory_tag(alloca);

        builder.thread_memory(alloca, None, tag);
        alloca
    }
}

fn check_address(graph: &Graph, base: NodeId) -> Option<Type> {
    match graph.ty(base) {
        Type::Pointer { .. } => None,
        Type::Error(_) => Some(graph.ty(base).clone()),
        other => Some(Type::error(format!(
            "cannot dereference a value of type `{}`",
            other.name()
        ))),
    }
}

/// Scalar read of `ty` at `base + offset`
#[derive(Debug, Clone)]
pub struct Load {
    pub base: NodeId,
    pub offset: u32,
    pub ty: Type,
}

impl Nodegen for Load {
    fn infer(&self, graph: &Graph) -> Type {
        check_address(graph, self.base).unwrap_or_else(|| self.ty.bottom())
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        let graph = &builder.graph;
        let mut previous = builder.cursor.memory;

        loop {
            match graph.op(previous) {
                Op::Store { offset } if *offset == self.offset => {
                    let store = graph.node(previous);
                    let same_target = graph
                        .memory_of(previous)
                        .is_some_and(|effect| effect.target == Some(self.base));
                    let value = store.inputs[1];

                    if same_target && graph.ty(value).same_shape(&ty) {
                        trace!(load_from = %self.base, %value, "forwarded stored value");
                        return value;
                    }

                    break;
                }
                Op::Load { .. } => match graph.memory_of(previous) {
                    Some(effect) => previous = effect.previous,
                    None => break,
                },
                _ => break,
            }
        }

        let tag = builder.memory_tag(self.base);
        let load = builder
            .graph
            .create(Op::Load { offset: self.offset }, ty, &[self.base]);

        builder.cursor.memory = previous;
        builder.thread_memory(load, Some(self.base), tag);
        load
    }
}

/// Scalar write of `value` at `base + offset`
#[derive(Debug, Clone, Copy)]
pub struct Store {
    pub base: NodeId,
    pub offset: u32,
    pub value: NodeId,
}

impl Nodegen for Store {
    fn infer(&self, graph: &Graph) -> Type {
        if let Some(error) = check_address(graph, self.base) {
            return error;
        }

        match graph.ty(self.value) {
            Type::Error(_) => graph.ty(self.value).clone(),
            _ => Type::Memory,
        }
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        let tag = builder.memory_tag(self.base);
        let store = builder.graph.create(
            Op::Store {
                offset: self.offset,
            },
            ty,
            &[self.base, self.value],
        );

        builder.thread_memory(store, Some(self.base), tag);
        store
    }
}

/// Pointer to the member of type `ty` at `base + offset`
#[derive(Debug, Clone)]
pub struct AddressOf {
    pub base: NodeId,
    pub offset: u32,
    pub ty: Type,
}

impl Nodegen for AddressOf {
    fn infer(&self, graph: &Graph) -> Type {
        check_address(graph, self.base).unwrap_or_else(|| Type::pointer_to(self.ty.bottom()))
    }

    fn emit(self, builder: &mut NodeBuilder, ty: Type) -> NodeId {
        if self.offset == 0 && builder.graph.ty(self.base) == &ty {
            return self.base;
        }

        builder.graph.create(
            Op::AddressOf {
                offset: self.offset,
            },
            ty,
            &[self.base],
        )
    }
}

/* Member-wise access to values of any type */
impl NodeBuilder {
    /// Folds an `AddressOf` base into the offset so accesses through a derived
    /// pointer see the slot it came from
    pub fn resolve_address(&self, base: NodeId, offset: u32) -> (NodeId, u32) {
        match self.graph.op(base) {
            Op::AddressOf { offset: inner } => (self.graph.node(base).inputs[0], offset + inner),
            _ => (base, offset),
        }
    }

    /// Reads a value of declared type `ty` stored at `base + offset`. Aggregates
    /// are read one scalar at a time and reassembled.
    pub fn load_value(&mut self, base: NodeId, offset: u32, ty: &Type) -> NodeId {
        let (base, offset) = self.resolve_address(base, offset);

        if !ty.is_aggregate() {
            return self.make(Load {
                base,
                offset,
                ty: ty.clone(),
            });
        }

        let members = ty
            .member_types()
            .iter()
            .zip(ty.member_offsets())
            .map(|(member, member_offset)| self.load_value(base, offset + member_offset, member))
            .collect();

        self.make(Build {
            shape: ty.bottom(),
            members,
        })
    }

    /// Writes `value` of declared type `ty` to `base + offset`, one scalar at
    /// a time
    pub fn store_value(&mut self, base: NodeId, offset: u32, ty: &Type, value: NodeId) {
        let (base, offset) = self.resolve_address(base, offset);

        if !ty.is_aggregate() || self.graph.ty(value).is_error() {
            self.make(Store {
                base,
                offset,
                value,
            });
            return;
        }

        for (index, (member, member_offset)) in ty
            .member_types()
            .iter()
            .zip(ty.member_offsets())
            .enumerate()
        {
            let member_value = self.make(Projection { value, index });
            self.store_value(base, offset + member_offset, member, member_value);
        }
    }

    /// Converts `value` to the declared type `target`, member by member for
    /// aggregates
    pub fn coerce(&mut self, value: NodeId, target: &Type) -> NodeId {
        let ty = self.graph.ty(value).clone();

        if !target.is_aggregate() || ty.is_error() {
            return self.make(Coerce {
                value,
                target: target.clone(),
            });
        }

        // Shape problems (wrong struct, wrong length) are reported as a whole
        let checked = ty.assign_to(target);
        if checked == ty {
            return value;
        }
        if checked.is_error() {
            return self.make(Coerce {
                value,
                target: target.clone(),
            });
        }

        let members = target
            .member_types()
            .iter()
            .enumerate()
            .map(|(index, member)| {
                let member_value = self.make(Projection { value, index });
                self.coerce(member_value, member)
            })
            .collect();

        self.make(Build {
            shape: target.bottom(),
            members,
        })
    }

    /// Spills `value` into a fresh stack slot and returns its address
    pub fn spill(&mut self, value: NodeId) -> NodeId {
        let ty = self.graph.ty(value).concrete().bottom();
        self.spill_as(value, &ty)
    }

    /// Like [`NodeBuilder::spill`], with the slot typed `ty`
    pub fn spill_as(&mut self, value: NodeId, ty: &Type) -> NodeId {
        let address = self.make(Alloca { ty: ty.clone() });

        self.store_value(address, 0, ty, value);
        address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        index::Index,
        middle::{
            graph::{MemoryTag, op::SlotId},
            lattice::IntWidth,
            nodegen::Constant,
        },
    };

    #[test]
    fn load_after_store_returns_the_stored_value() {
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
        let before = builder.graph.len();

        let loaded = builder.load_value(slot, 0, &Type::int_type());

        assert_eq!(loaded, seven);
        assert_eq!(builder.graph.len(), before);
    }

    #[test]
    fn loads_are_skipped_and_other_effects_stop_the_walk() {
        let mut builder = NodeBuilder::new();
        let x = builder.make(Alloca {
            ty: Type::int_type(),
        });
        let y = builder.make(Alloca {
            ty: Type::int_type(),
        });

        let first = builder.load_value(x, 0, &Type::int_type());
        let second = builder.load_value(y, 0, &Type::int_type());

        // The second load walked past the first and hangs off the alloca of `y`
        assert_eq!(builder.graph.memory_of(first).unwrap().previous, y);
        assert_eq!(builder.graph.memory_of(second).unwrap().previous, y);
        assert_eq!(builder.cursor.memory, second);
        assert_eq!(
            builder.graph.memory_of(second).unwrap().tag,
            MemoryTag::Slot(SlotId::new(1))
        );
    }

    #[test]
    fn aggregates_are_accessed_member_wise() {
        let mut builder = NodeBuilder::new();
        let pair = Type::tuple(vec![Type::int_type(), Type::int_type()]);
        let slot = builder.make(Alloca { ty: pair.clone() });
        let one = builder.make(Constant(Type::int_of(IntWidth::Int, 1)));
        let two = builder.make(Constant(Type::int_of(IntWidth::Int, 2)));
        let value = builder.make(Build {
            shape: pair.clone(),
            members: vec![one, two],
        });

        builder.store_value(slot, 0, &pair, value);
        let loaded = builder.load_value(slot, 0, &pair);

        let first = builder.make(Projection {
            value: loaded,
            index: 0,
        });
        let second = builder.make(Projection {
            value: loaded,
            index: 1,
        });

        // The store at offset 8 sits between the first load and its store
        assert_eq!(builder.graph.op(first), &Op::Load { offset: 0 });
        assert_eq!(builder.graph.ty(second), &Type::int_of(IntWidth::Int, 2));
    }

    #[test]
    fn address_of_the_first_member_keeps_the_slot() {
        let mut builder = NodeBuilder::new();
        let slot = builder.make(Alloca {
            ty: Type::int_type(),
        });

        let address = builder.make(AddressOf {
            base: slot,
            offset: 0,
            ty: Type::int_type(),
        });

        assert_eq!(address, slot);
    }
}
