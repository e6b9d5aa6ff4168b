//! AST construction.
//!
//! Walks the structured expression trees of a parsed module and lays down
//! every vertex plus the AST edges, which model both lexical containment and
//! operand dataflow: when an instruction consumes operands, the vertices that
//! produced those values become its ordered children (operand index = child
//! position).
//!
//! The walk of one expression list keeps two structures:
//!
//! * `exp_stack` — the abstract operand stack of emitted instructions whose
//!   results are still unconsumed;
//! * `exp_list` — the emitted top-level children of the current holder. A
//!   vertex leaves the list when a later instruction absorbs it as an
//!   operand; whatever remains is attached to the holder in order.
//!
//! Underflow of the operand stack is a structural error and aborts the whole
//! build; the caller discards the partially built store.

use super::super::graph::Graph;
use super::super::types::{EdgeKind, InstKind, NodeId, NodeKind};
use super::{ensure_return, ModuleContext, NameGenerator};
use crate::errors::{CpgError, Result};
use crate::parser::{Expr, ExprId, ExprKind, ParsedFunction, ParsedModule};
use crate::CpgOptions;
use std::collections::HashMap;

/// Side tables produced by the AST pass and consumed by the CFG pass.
#[derive(Debug, Default)]
pub struct AstIndex {
    /// Source expression → its instruction vertex.
    pub expr_nodes: HashMap<ExprId, NodeId>,
    /// `block`/`loop` expression → its BeginBlock scaffolding vertex.
    pub begin_blocks: HashMap<ExprId, NodeId>,
    /// `if` expression with an else branch → its Else join vertex.
    pub else_nodes: HashMap<ExprId, NodeId>,
    /// Function index → its Return sink, for functions that have one so far.
    pub func_returns: HashMap<u32, NodeId>,
    /// Function vertices by function index.
    pub func_nodes: Vec<NodeId>,
}

pub(crate) struct AstBuilder<'m> {
    ctx: ModuleContext<'m>,
    names: &'m dyn NameGenerator,
    options: &'m CpgOptions,
}

impl<'m> AstBuilder<'m> {
    pub fn new(
        module: &'m ParsedModule,
        names: &'m dyn NameGenerator,
        options: &'m CpgOptions,
    ) -> Self {
        Self {
            ctx: ModuleContext::new(module),
            names,
            options,
        }
    }

    /// Build the module scaffolding and every function subtree.
    pub fn generate(&self, graph: &mut Graph) -> Result<AstIndex> {
        let name = self
            .options
            .module_name
            .clone()
            .unwrap_or_else(|| "module".to_string());
        let module_node = graph.add_node(NodeKind::Module { name });
        graph.set_module(module_node);

        let mut index = AstIndex::default();
        for func in &self.ctx.module.functions {
            log::debug!("ast: building function {} ({})", func.index, func.name);
            let func_node = self.build_function(graph, &mut index, func)?;
            graph.add_edge(module_node, func_node, EdgeKind::Ast)?;
            index.func_nodes.push(func_node);
        }
        Ok(index)
    }

    /// Build one Function vertex with its signature scaffolding and body.
    ///
    /// Child order is fixed: the FunctionSignature subtree first, then the
    /// Instructions container (present but empty for imports).
    fn build_function(
        &self,
        graph: &mut Graph,
        index: &mut AstIndex,
        func: &ParsedFunction,
    ) -> Result<NodeId> {
        let sig = self.ctx.sig_of(func)?;
        let nparams = sig.params.len();

        let func_node = graph.add_node(NodeKind::Function {
            name: func.name.clone(),
            index: func.index,
            nargs: nparams,
            nlocals: func.locals.len(),
            nresults: sig.results.len(),
            is_import: func.is_import,
        });

        let sig_node = graph.add_node(NodeKind::FunctionSignature);
        graph.add_edge(func_node, sig_node, EdgeKind::Ast)?;

        let params_node = graph.add_node(NodeKind::Parameters);
        graph.add_edge(sig_node, params_node, EdgeKind::Ast)?;
        let locals_node = graph.add_node(NodeKind::Locals);
        graph.add_edge(sig_node, locals_node, EdgeKind::Ast)?;
        let results_node = graph.add_node(NodeKind::Results);
        graph.add_edge(sig_node, results_node, EdgeKind::Ast)?;

        // One name per slot of the combined parameter+local space.
        let names: Vec<String> = (0..nparams + func.locals.len())
            .map(|slot| self.names.local_name(func, nparams, slot))
            .collect();

        for (i, ty) in sig.params.iter().enumerate() {
            let var = graph.add_node(NodeKind::VarNode {
                var_type: *ty,
                name: names[i].clone(),
            });
            graph.add_edge(params_node, var, EdgeKind::Ast)?;
        }
        for (j, ty) in func.locals.iter().enumerate() {
            let var = graph.add_node(NodeKind::VarNode {
                var_type: *ty,
                name: names[nparams + j].clone(),
            });
            graph.add_edge(locals_node, var, EdgeKind::Ast)?;
        }
        for ty in &sig.results {
            let var = graph.add_node(NodeKind::VarNode {
                var_type: *ty,
                name: String::new(),
            });
            graph.add_edge(results_node, var, EdgeKind::Ast)?;
        }

        let insts_node = graph.add_node(NodeKind::Instructions);
        graph.add_edge(func_node, insts_node, EdgeKind::Ast)?;

        if !func.is_import {
            self.construct_list(graph, index, func, func_node, &names, &func.body, insts_node)?;
        }
        Ok(func_node)
    }

    /// Walk one expression list and attach its surviving top-level vertices
    /// to `holder` in source order.
    #[allow(clippy::too_many_arguments)]
    fn construct_list(
        &self,
        graph: &mut Graph,
        index: &mut AstIndex,
        func: &ParsedFunction,
        func_node: NodeId,
        names: &[String],
        exprs: &[Expr],
        holder: NodeId,
    ) -> Result<()> {
        let mut exp_stack: Vec<NodeId> = Vec::new();
        let mut exp_list: Vec<NodeId> = Vec::new();
        for expr in exprs {
            self.construct_expr(
                graph,
                index,
                func,
                func_node,
                names,
                expr,
                &mut exp_stack,
                &mut exp_list,
            )?;
        }
        for node in exp_list {
            graph.add_edge(holder, node, EdgeKind::Ast)?;
        }
        Ok(())
    }

    /// Emit the vertex (or subtree) for one expression and thread the operand
    /// stack: pop `arity_in` operands as ordered children, push the vertex if
    /// it produces a value.
    #[allow(clippy::too_many_arguments)]
    fn construct_expr(
        &self,
        graph: &mut Graph,
        index: &mut AstIndex,
        func: &ParsedFunction,
        func_node: NodeId,
        names: &[String],
        expr: &Expr,
        exp_stack: &mut Vec<NodeId>,
        exp_list: &mut Vec<NodeId>,
    ) -> Result<()> {
        match &expr.kind {
            ExprKind::Block {
                label,
                nresults,
                body,
            }
            | ExprKind::Loop {
                label,
                nresults,
                body,
            } => {
                let is_loop = matches!(expr.kind, ExprKind::Loop { .. });
                let construct = graph.add_node(NodeKind::Instruction {
                    inst: if is_loop {
                        InstKind::Loop {
                            label: label.clone(),
                            nresults: *nresults,
                        }
                    } else {
                        InstKind::Block {
                            label: label.clone(),
                            nresults: *nresults,
                        }
                    },
                    location: expr.location,
                });
                // The BeginBlock sibling precedes the construct it opens and
                // holds the branch target for its label.
                let begin = graph.add_node(NodeKind::Instruction {
                    inst: InstKind::BeginBlock {
                        label: label.clone(),
                        block: construct,
                    },
                    location: expr.location,
                });
                index.begin_blocks.insert(expr.id, begin);
                exp_list.push(begin);

                self.construct_list(graph, index, func, func_node, names, body, construct)?;

                index.expr_nodes.insert(expr.id, construct);
                if *nresults > 0 {
                    exp_stack.push(construct);
                }
                exp_list.push(construct);
            }

            ExprKind::If {
                label: _,
                nresults,
                then_body,
                else_body,
            } => {
                // The condition is popped before recursing into the branches.
                let cond = self.pop_operands(exp_stack, exp_list, 1, func, expr)?;
                let if_node = graph.add_node(NodeKind::Instruction {
                    inst: InstKind::If {
                        nresults: *nresults,
                        has_else: else_body.is_some(),
                    },
                    location: expr.location,
                });
                for op in cond {
                    graph.add_edge(if_node, op, EdgeKind::Ast)?;
                }

                self.construct_list(graph, index, func, func_node, names, then_body, if_node)?;

                if let Some(else_exprs) = else_body {
                    let else_node = graph.add_node(NodeKind::Else);
                    graph.add_edge(if_node, else_node, EdgeKind::Ast)?;
                    index.else_nodes.insert(expr.id, else_node);
                    self.construct_list(
                        graph, index, func, func_node, names, else_exprs, else_node,
                    )?;
                }

                index.expr_nodes.insert(expr.id, if_node);
                if *nresults > 0 {
                    exp_stack.push(if_node);
                }
                exp_list.push(if_node);
            }

            _ => {
                let inst = self.inst_kind(func, names, expr)?;
                let (arity_in, arity_out) = self.ctx.arity(func, &expr.kind)?;
                let node = graph.add_node(NodeKind::Instruction {
                    inst,
                    location: expr.location,
                });
                let operands = self.pop_operands(exp_stack, exp_list, arity_in, func, expr)?;
                for op in operands {
                    graph.add_edge(node, op, EdgeKind::Ast)?;
                }

                if matches!(expr.kind, ExprKind::Return) {
                    // Make sure the function's Return sink exists; the CFG
                    // pass wires the control edge into it.
                    ensure_return(graph, &mut index.func_returns, func.index, func_node)?;
                }

                index.expr_nodes.insert(expr.id, node);
                if arity_out > 0 {
                    exp_stack.push(node);
                }
                exp_list.push(node);
            }
        }
        Ok(())
    }

    /// Pop `n` operands, in left-to-right order, removing them from the
    /// holder's pending top-level list (they are absorbed by their consumer).
    fn pop_operands(
        &self,
        exp_stack: &mut Vec<NodeId>,
        exp_list: &mut Vec<NodeId>,
        n: usize,
        func: &ParsedFunction,
        expr: &Expr,
    ) -> Result<Vec<NodeId>> {
        if exp_stack.len() < n {
            return Err(CpgError::Structural(format!(
                "operand stack underflow in function {} {}: {:?} needs {} operands, {} available",
                func.name,
                expr.location,
                expr.kind,
                n,
                exp_stack.len()
            )));
        }
        let operands = exp_stack.split_off(exp_stack.len() - n);
        exp_list.retain(|node| !operands.contains(node));
        Ok(operands)
    }

    /// Attribute payload for a leaf expression.
    fn inst_kind(
        &self,
        func: &ParsedFunction,
        names: &[String],
        expr: &Expr,
    ) -> Result<InstKind> {
        let local_name = |index: u32| -> Result<String> {
            names.get(index as usize).cloned().ok_or_else(|| {
                CpgError::Structural(format!(
                    "local index {} out of range in function {}",
                    index, func.name
                ))
            })
        };

        let inst = match &expr.kind {
            ExprKind::Nop => InstKind::Nop,
            ExprKind::Unreachable => InstKind::Unreachable,
            ExprKind::Return => InstKind::Return,
            ExprKind::Drop => InstKind::Drop,
            ExprKind::Select => InstKind::Select,
            ExprKind::MemorySize => InstKind::MemorySize,
            ExprKind::MemoryGrow => InstKind::MemoryGrow,
            ExprKind::Const(value) => InstKind::Const { value: *value },
            ExprKind::Binary(opcode) => InstKind::Binary { opcode: *opcode },
            ExprKind::Compare(opcode) => InstKind::Compare { opcode: *opcode },
            ExprKind::Convert(opcode) => InstKind::Convert { opcode: *opcode },
            ExprKind::Unary(opcode) => InstKind::Unary { opcode: *opcode },
            ExprKind::Load { opcode, offset } => InstKind::Load {
                opcode: *opcode,
                offset: *offset,
            },
            ExprKind::Store { opcode, offset } => InstKind::Store {
                opcode: *opcode,
                offset: *offset,
            },
            ExprKind::Br { label } => InstKind::Br {
                label: label.clone(),
            },
            ExprKind::BrIf { label } => InstKind::BrIf {
                label: label.clone(),
            },
            ExprKind::BrTable { .. } => InstKind::BrTable,
            ExprKind::GlobalGet { index } => InstKind::GlobalGet {
                label: format!("$g{}", index),
            },
            ExprKind::GlobalSet { index } => InstKind::GlobalSet {
                label: format!("$g{}", index),
            },
            ExprKind::LocalGet { index } => InstKind::LocalGet {
                label: local_name(*index)?,
            },
            ExprKind::LocalSet { index } => InstKind::LocalSet {
                label: local_name(*index)?,
            },
            ExprKind::LocalTee { index } => InstKind::LocalTee {
                label: local_name(*index)?,
            },
            ExprKind::Call { func: callee } => {
                let sig = self.ctx.func_sig(*callee)?;
                InstKind::Call {
                    label: self.ctx.func(*callee)?.name.clone(),
                    nargs: sig.params.len(),
                    nresults: sig.results.len(),
                }
            }
            ExprKind::CallIndirect { type_idx } => {
                let sig = self.ctx.type_sig(*type_idx)?;
                InstKind::CallIndirect {
                    label: "$T0".to_string(),
                    nargs: sig.params.len(),
                    nresults: sig.results.len(),
                }
            }
            ExprKind::Block { .. } | ExprKind::Loop { .. } | ExprKind::If { .. } => {
                return Err(CpgError::Invariant(
                    "structured construct reached leaf emission".to_string(),
                ))
            }
        };
        Ok(inst)
    }
}
