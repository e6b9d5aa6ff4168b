//! Graph construction.
//!
//! Two passes over the parsed module populate one shared store: the AST pass
//! lays down every vertex and the lexical/operand edges (`ast`), then the CFG
//! pass superimposes intra-procedural control flow (`cfg`) on the same
//! vertices. The AST pass hands the CFG pass an [`AstIndex`] mapping source
//! expressions to their vertices, so the control pass can walk the structured
//! source in execution order while wiring graph nodes.

pub mod ast;
pub mod cfg;

use super::graph::Graph;
use super::types::{EdgeKind, NodeId, NodeKind};
use crate::errors::{CpgError, Result};
use crate::parser::{ExprKind, FuncSig, ParsedFunction, ParsedModule};
use crate::{Cpg, CpgOptions};
use std::collections::HashMap;

/// Signature and arity oracle over a parsed module.
///
/// Answers the per-opcode stack effect of every expression kind and resolves
/// callee signatures for direct and indirect calls.
#[derive(Debug, Clone, Copy)]
pub struct ModuleContext<'m> {
    pub module: &'m ParsedModule,
}

impl<'m> ModuleContext<'m> {
    pub fn new(module: &'m ParsedModule) -> Self {
        Self { module }
    }

    /// The function at `index` in the unified index space.
    pub fn func(&self, index: u32) -> Result<&'m ParsedFunction> {
        self.module
            .functions
            .get(index as usize)
            .ok_or_else(|| CpgError::Structural(format!("call to unknown function {}", index)))
    }

    /// Signature of the function at `index`.
    pub fn func_sig(&self, index: u32) -> Result<&'m FuncSig> {
        let func = self.func(index)?;
        self.type_sig(func.type_idx)
    }

    /// Signature at `type_idx` in the type section.
    pub fn type_sig(&self, type_idx: u32) -> Result<&'m FuncSig> {
        self.module
            .types
            .get(type_idx as usize)
            .ok_or_else(|| CpgError::Structural(format!("unknown type index {}", type_idx)))
    }

    /// Signature of a parsed function.
    pub fn sig_of(&self, func: &ParsedFunction) -> Result<&'m FuncSig> {
        self.type_sig(func.type_idx)
    }

    /// Stack effect `(consumed, produced)` of an expression inside `func`.
    ///
    /// `return` consumes the function's declared results; calls consult the
    /// callee signature, with `call_indirect` consuming one extra operand for
    /// the table index.
    pub fn arity(&self, func: &ParsedFunction, kind: &ExprKind) -> Result<(usize, usize)> {
        let arity = match kind {
            ExprKind::Nop | ExprKind::Unreachable => (0, 0),
            ExprKind::Return => (self.sig_of(func)?.results.len(), 0),
            ExprKind::Br { .. } => (0, 0),
            ExprKind::BrIf { .. } | ExprKind::BrTable { .. } => (1, 0),
            ExprKind::Drop => (1, 0),
            ExprKind::Select => (3, 1),
            ExprKind::MemorySize => (0, 1),
            ExprKind::MemoryGrow => (1, 1),
            ExprKind::Const(_) => (0, 1),
            ExprKind::Binary(_) | ExprKind::Compare(_) => (2, 1),
            ExprKind::Unary(_) | ExprKind::Convert(_) => (1, 1),
            ExprKind::Load { .. } => (1, 1),
            ExprKind::Store { .. } => (2, 0),
            ExprKind::GlobalGet { .. } | ExprKind::LocalGet { .. } => (0, 1),
            ExprKind::GlobalSet { .. } | ExprKind::LocalSet { .. } => (1, 0),
            ExprKind::LocalTee { .. } => (1, 1),
            ExprKind::Call { func } => {
                let sig = self.func_sig(*func)?;
                (sig.params.len(), sig.results.len())
            }
            ExprKind::CallIndirect { type_idx } => {
                let sig = self.type_sig(*type_idx)?;
                (sig.params.len() + 1, sig.results.len())
            }
            ExprKind::Block { nresults, .. } | ExprKind::Loop { nresults, .. } => (0, *nresults),
            ExprKind::If { nresults, .. } => (1, *nresults),
        };
        Ok(arity)
    }
}

/// Supplies textual names for the combined parameter+local index space of a
/// function when the source module carries none.
pub trait NameGenerator {
    fn local_name(&self, func: &ParsedFunction, nparams: usize, slot: usize) -> String;
}

/// Default naming: `$p{i}` for parameters, `$l{j}` for declared locals.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexNames;

impl NameGenerator for IndexNames {
    fn local_name(&self, _func: &ParsedFunction, nparams: usize, slot: usize) -> String {
        if slot < nparams {
            format!("$p{}", slot)
        } else {
            format!("$l{}", slot - nparams)
        }
    }
}

/// Returns the per-function Return sink, creating it (as an AST child of the
/// Function vertex) on first use. Both construction passes share the map.
pub(crate) fn ensure_return(
    graph: &mut Graph,
    returns: &mut HashMap<u32, NodeId>,
    func_index: u32,
    func_node: NodeId,
) -> Result<NodeId> {
    if let Some(r) = returns.get(&func_index) {
        return Ok(*r);
    }
    let r = graph.add_node(NodeKind::Return);
    graph.add_edge(func_node, r, EdgeKind::Ast)?;
    returns.insert(func_index, r);
    Ok(r)
}

/// Build a complete CPG for a parsed module.
///
/// Runs the AST pass, then, unless disabled, the CFG pass over the same
/// store. On error the partially built graph is discarded with the `Cpg`
/// that owns it.
pub fn generate_cpg(
    parsed: &ParsedModule,
    options: &CpgOptions,
    names: &dyn NameGenerator,
) -> Result<Cpg> {
    let mut graph = Graph::new();

    let builder = ast::AstBuilder::new(parsed, names, options);
    let index = builder.generate(&mut graph)?;
    log::debug!(
        "ast pass: {} nodes, {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    let unreachable = if options.cfg {
        let set = cfg::generate(&mut graph, parsed, &index, options)?;
        log::debug!(
            "cfg pass: {} edges total, {} unreachable instructions",
            graph.edge_count(),
            set.len()
        );
        set
    } else {
        Default::default()
    };

    Ok(Cpg { graph, unreachable })
}
