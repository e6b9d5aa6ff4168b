//! Code property graph core: the node/edge model, the owning graph store,
//! and the construction passes that populate it.

pub mod builder;
pub mod graph;
pub mod types;

pub use builder::{generate_cpg, IndexNames, ModuleContext, NameGenerator};
pub use graph::Graph;
