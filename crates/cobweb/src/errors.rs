//! Error types for graph construction and queries.
//!
//! Construction either produces a complete graph or fails with one of these;
//! there are no recoverable mid-build errors. `Structural` means the input
//! module is malformed or outside the supported subset, `Invariant` means the
//! graph itself became inconsistent and indicates a bug in a builder pass.

use crate::cpg::types::NodeId;
use thiserror::Error;

/// Errors produced by the CPG core.
#[derive(Debug, Error)]
pub enum CpgError {
    /// The input module violates Wasm well-formedness (bad operand arity,
    /// unresolved branch depth, unsupported construct). Construction aborts.
    #[error("malformed module: {0}")]
    Structural(String),

    /// An internal consistency check failed during construction.
    #[error("graph invariant violated: {0}")]
    Invariant(String),

    /// A query asked for the module vertex before AST construction ran.
    #[error("no module vertex registered in this graph")]
    MissingModule,

    /// A positional `child`/`parent` lookup ran past the filtered adjacency.
    #[error("edge index {index} out of range for node {node} ({len} matching edges)")]
    EdgeIndex {
        node: NodeId,
        index: usize,
        len: usize,
    },

    /// A function-scoped query was given a non-Function vertex.
    #[error("node {0} is not a Function vertex")]
    NotAFunction(NodeId),
}

pub type Result<T> = std::result::Result<T, CpgError>;
