//! Everything between the token stream and the finished graph: the type
//! lattice, the graph store, the node constructors used while parsing, lexical
//! scopes and the global optimization passes.

pub mod graph;
pub mod lattice;
pub mod nodegen;
pub mod optimization;
pub mod primitive;
pub mod scope;
