//! cobweb — code property graphs for WebAssembly.
//!
//! This crate builds a multi-relation code property graph (CPG) for a Wasm
//! module: one vertex set shared by an abstract syntax tree that also encodes
//! operand dataflow, an intra-procedural control-flow graph honouring Wasm's
//! structured control, and the edge taxonomy for program-dependence analyses.
//! A composable query engine serves static analyses over the finished graph.

pub mod cpg;
mod errors;
pub mod parser;
pub mod query;
pub mod writer;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
pub use cpg::graph::Graph;
pub use errors::CpgError;

use cpg::types::NodeId;
use std::collections::BTreeSet;

/// Configuration for graph construction.
///
/// AST edges are always emitted; the CFG pass can be skipped, and imported
/// functions only get control-flow scaffolding when asked for.
#[derive(Debug, Clone)]
pub struct CpgOptions {
    /// Name of the Module vertex. Defaults to `"module"`.
    pub module_name: Option<String>,
    /// Emit CFG edges.
    pub cfg: bool,
    /// Give imported Functions an empty CFG scaffold (an edge from the
    /// Function vertex to its Return sink).
    pub include_imports_in_cfg: bool,
}

impl Default for CpgOptions {
    fn default() -> Self {
        Self {
            module_name: None,
            cfg: true,
            include_imports_in_cfg: false,
        }
    }
}

/// A finished code property graph.
///
/// The store owns every node and edge; `unreachable` records the instruction
/// vertices control never enters (dead code and structural construct
/// vertices). Both live and die together.
#[derive(Debug)]
pub struct Cpg {
    pub graph: Graph,
    pub unreachable: BTreeSet<NodeId>,
}

/// Build a code property graph from a WebAssembly binary.
///
/// This is the main entry point: it parses the module, runs the AST pass,
/// and, unless disabled, the CFG pass over the same store.
///
/// # Example
/// ```no_run
/// use cobweb::{build_cpg, CpgOptions};
///
/// let wasm_bytes = std::fs::read("input.wasm").unwrap();
/// let cpg = build_cpg(&wasm_bytes, &CpgOptions::default()).unwrap();
/// println!("{} nodes", cpg.graph.node_count());
/// ```
pub fn build_cpg(wasm_bytes: &[u8], options: &CpgOptions) -> Result<Cpg> {
    let parsed =
        parser::parse_wasm(wasm_bytes).context("failed to parse WebAssembly module")?;

    let cpg = cpg::generate_cpg(&parsed, options, &cpg::IndexNames)
        .context("failed to build code property graph")?;

    Ok(cpg)
}
