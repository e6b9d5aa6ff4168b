//! CFG construction.
//!
//! Superimposes intra-procedural control flow on the vertices the AST pass
//! laid down, walking each function's structured source in execution order
//! and mapping expressions to vertices through the [`AstIndex`].
//!
//! The traversal keeps, per function:
//!
//! * `pending` — the open fall-through edges: every `(source, label)` pair
//!   that control can flow out of into whatever executes next. A plain
//!   instruction drains the set into itself (this is what routes a
//!   construct's entry edge to the left-most leaf that actually executes);
//!   an unconditional branch leaves it empty. An empty set means the
//!   current position is unreachable.
//! * `scopes` — the open labelled constructs, innermost last. A `block`'s
//!   label resolves to its BeginBlock, wired to the successor when the block
//!   closes (forward exit); a `loop`'s BeginBlock is wired from the
//!   predecessor when the loop opens, so branches to it are back edges.
//!   An `if` label resolves to its Else join, or to the If vertex itself
//!   when there is no else.
//! * `unreachable` — instructions emitted while `pending` is empty. Dead
//!   instructions receive no predecessor edge and source no control edges.
//!
//! Wasm loops do not implicitly iterate: falling off a loop body exits to
//! the construct's successor, and only an explicit `br` forms the back edge.

use super::super::graph::Graph;
use super::super::types::{EdgeKind, EdgeType, NodeId, NodeType};
use super::ast::AstIndex;
use super::ensure_return;
use crate::errors::{CpgError, Result};
use crate::parser::{Expr, ExprKind, ParsedFunction, ParsedModule, FUNC_LABEL};
use crate::CpgOptions;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy)]
enum Target {
    Node(NodeId),
    /// Branches to the function-level label leave through the Return sink.
    FunctionExit,
}

#[derive(Debug)]
struct Scope {
    label: String,
    target: Target,
}

struct CfgVisitor<'g, 'a> {
    graph: &'g mut Graph,
    ast: &'a AstIndex,
    returns: HashMap<u32, NodeId>,
    pending: Vec<(NodeId, Option<String>)>,
    scopes: Vec<Scope>,
    unreachable: BTreeSet<NodeId>,
    func_index: u32,
    func_node: NodeId,
}

/// Add CFG edges for every function of the module.
///
/// Returns the set of instruction vertices control never enters: dead code
/// after divergence, unexited block joins, and the structural `Block`/`Loop`
/// vertices themselves (control enters a construct at its left-most leaf,
/// never at the construct vertex).
pub fn generate(
    graph: &mut Graph,
    parsed: &ParsedModule,
    ast: &AstIndex,
    options: &CpgOptions,
) -> Result<BTreeSet<NodeId>> {
    let mut visitor = CfgVisitor {
        graph,
        ast,
        returns: ast.func_returns.clone(),
        pending: Vec::new(),
        scopes: Vec::new(),
        unreachable: BTreeSet::new(),
        func_index: 0,
        func_node: NodeId(0),
    };

    for func in &parsed.functions {
        visitor.visit_function(func, options)?;
    }

    if let Some(start) = parsed.start_function {
        let func_node = visitor.ast.func_nodes[start as usize];
        let start_node = visitor.graph.start();
        visitor
            .graph
            .add_edge(start_node, func_node, EdgeKind::Cfg { label: None })?;
    }

    // No silent orphans: every instruction vertex without an incoming CFG
    // edge is recorded, not just the ones seen dead during the walk.
    let mut unreachable = visitor.unreachable;
    let ids: Vec<NodeId> = visitor
        .graph
        .nodes()
        .filter(|n| n.node_type() == NodeType::Instruction)
        .map(|n| n.id())
        .collect();
    for id in ids {
        if visitor.graph.in_edges_of(id, EdgeType::Cfg).next().is_none() {
            unreachable.insert(id);
        }
    }
    Ok(unreachable)
}

impl<'g, 'a> CfgVisitor<'g, 'a> {
    fn visit_function(&mut self, func: &ParsedFunction, options: &CpgOptions) -> Result<()> {
        self.func_index = func.index;
        self.func_node = self.ast.func_nodes[func.index as usize];

        if func.is_import {
            if options.include_imports_in_cfg {
                let ret = self.return_vertex()?;
                self.graph
                    .add_edge(self.func_node, ret, EdgeKind::Cfg { label: None })?;
            }
            return Ok(());
        }

        log::debug!("cfg: wiring function {} ({})", func.index, func.name);
        self.pending = vec![(self.func_node, None)];
        self.scopes = vec![Scope {
            label: FUNC_LABEL.to_string(),
            target: Target::FunctionExit,
        }];
        self.visit_list(&func.body)?;
        // A live tail falls off the end of the body without an edge; only an
        // explicit return reaches the Return sink.
        self.pending.clear();
        self.scopes.clear();
        Ok(())
    }

    fn visit_list(&mut self, exprs: &[Expr]) -> Result<()> {
        for expr in exprs {
            self.visit_expr(expr)?;
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Block { label, body, .. } => {
                let begin = self.begin_of(expr)?;
                self.scopes.push(Scope {
                    label: label.clone(),
                    target: Target::Node(begin),
                });
                self.visit_list(body)?;
                self.scopes.pop();

                // The BeginBlock is the block's forward exit: the live tail
                // and every br to this label converge there, and it falls
                // through to the successor.
                let tail = std::mem::take(&mut self.pending);
                for (src, lbl) in tail {
                    self.graph
                        .add_edge(src, begin, EdgeKind::Cfg { label: lbl })?;
                }
                if self.graph.in_edges_of(begin, EdgeType::Cfg).next().is_some() {
                    self.pending.push((begin, None));
                } else {
                    self.unreachable.insert(begin);
                }
            }

            ExprKind::Loop { label, body, .. } => {
                let begin = self.begin_of(expr)?;
                self.scopes.push(Scope {
                    label: label.clone(),
                    target: Target::Node(begin),
                });
                // The BeginBlock heads the loop: entry edge from the
                // predecessor, back edges from every br to this label.
                self.sequential(begin)?;
                self.visit_list(body)?;
                self.scopes.pop();
            }

            ExprKind::If {
                label,
                then_body,
                else_body,
                ..
            } => {
                let if_node = self.node_of(expr)?;
                let live = self.sequential(if_node)?;

                let join = match else_body {
                    Some(_) => Target::Node(self.else_of(expr)?),
                    None => Target::Node(if_node),
                };
                self.scopes.push(Scope {
                    label: label.clone(),
                    target: join,
                });

                if live {
                    self.pending = vec![(if_node, Some("true".to_string()))];
                    self.visit_list(then_body)?;
                    let then_tail = std::mem::take(&mut self.pending);

                    if let Some(else_exprs) = else_body {
                        // The Else vertex joins both branches' live tails.
                        let else_node = self.else_of(expr)?;
                        for (src, lbl) in then_tail {
                            self.graph
                                .add_edge(src, else_node, EdgeKind::Cfg { label: lbl })?;
                        }
                        self.pending = vec![(if_node, Some("false".to_string()))];
                        self.visit_list(else_exprs)?;
                        let else_tail = std::mem::take(&mut self.pending);
                        for (src, lbl) in else_tail {
                            self.graph
                                .add_edge(src, else_node, EdgeKind::Cfg { label: lbl })?;
                        }
                        if self
                            .graph
                            .in_edges_of(else_node, EdgeType::Cfg)
                            .next()
                            .is_some()
                        {
                            self.pending.push((else_node, None));
                        }
                    } else {
                        // No else: the false branch is a direct edge from the
                        // If to the successor, alongside the then tail.
                        self.pending = then_tail;
                        self.pending.push((if_node, Some("false".to_string())));
                    }
                } else {
                    // Dead conditional: walk the branches only to record them.
                    self.visit_list(then_body)?;
                    self.pending.clear();
                    if let Some(else_exprs) = else_body {
                        self.visit_list(else_exprs)?;
                        self.pending.clear();
                    }
                }

                self.scopes.pop();
            }

            ExprKind::Br { label } => {
                let node = self.node_of(expr)?;
                if self.sequential(node)? {
                    let target = self.resolve(label)?;
                    self.graph
                        .add_edge(node, target, EdgeKind::Cfg { label: None })?;
                }
                self.pending.clear();
            }

            ExprKind::BrIf { label } => {
                let node = self.node_of(expr)?;
                if self.sequential(node)? {
                    let target = self.resolve(label)?;
                    self.graph.add_edge(
                        node,
                        target,
                        EdgeKind::Cfg {
                            label: Some("true".to_string()),
                        },
                    )?;
                    self.pending = vec![(node, Some("false".to_string()))];
                }
            }

            ExprKind::BrTable { targets, default } => {
                let node = self.node_of(expr)?;
                if self.sequential(node)? {
                    for label in targets {
                        let target = self.resolve(label)?;
                        self.graph.add_edge(
                            node,
                            target,
                            EdgeKind::Cfg {
                                label: Some(label.clone()),
                            },
                        )?;
                    }
                    let target = self.resolve(default)?;
                    self.graph.add_edge(
                        node,
                        target,
                        EdgeKind::Cfg {
                            label: Some(default.clone()),
                        },
                    )?;
                }
                self.pending.clear();
            }

            ExprKind::Return => {
                let node = self.node_of(expr)?;
                if self.sequential(node)? {
                    let ret = self.return_vertex()?;
                    self.graph
                        .add_edge(node, ret, EdgeKind::Cfg { label: None })?;
                }
                self.pending.clear();
            }

            ExprKind::Unreachable => {
                let node = self.node_of(expr)?;
                if self.sequential(node)? {
                    let trap = self.graph.trap();
                    self.graph
                        .add_edge(node, trap, EdgeKind::Cfg { label: None })?;
                }
                self.pending.clear();
            }

            // Everything else flows sequentially.
            _ => {
                let node = self.node_of(expr)?;
                self.sequential(node)?;
            }
        }
        Ok(())
    }

    /// Drain the pending fall-through edges into `node` and make it the new
    /// fall-through source. With nothing pending, the node is dead: it gets
    /// no predecessor edge and does not become a source.
    fn sequential(&mut self, node: NodeId) -> Result<bool> {
        if self.pending.is_empty() {
            self.unreachable.insert(node);
            return Ok(false);
        }
        let pending = std::mem::take(&mut self.pending);
        for (src, label) in pending {
            self.graph.add_edge(src, node, EdgeKind::Cfg { label })?;
        }
        self.pending.push((node, None));
        Ok(true)
    }

    /// Resolve a branch label against the open scopes, innermost first.
    fn resolve(&mut self, label: &str) -> Result<NodeId> {
        let target = self
            .scopes
            .iter()
            .rev()
            .find(|s| s.label == label)
            .map(|s| s.target);
        match target {
            Some(Target::Node(id)) => Ok(id),
            Some(Target::FunctionExit) => self.return_vertex(),
            None => Err(CpgError::Invariant(format!(
                "unresolved branch label {} in function {}",
                label, self.func_index
            ))),
        }
    }

    fn return_vertex(&mut self) -> Result<NodeId> {
        ensure_return(
            self.graph,
            &mut self.returns,
            self.func_index,
            self.func_node,
        )
    }

    fn node_of(&self, expr: &Expr) -> Result<NodeId> {
        self.ast.expr_nodes.get(&expr.id).copied().ok_or_else(|| {
            CpgError::Invariant(format!("expression {:?} has no vertex", expr.id))
        })
    }

    fn begin_of(&self, expr: &Expr) -> Result<NodeId> {
        self.ast
            .begin_blocks
            .get(&expr.id)
            .copied()
            .ok_or_else(|| {
                CpgError::Invariant(format!("construct {:?} has no BeginBlock", expr.id))
            })
    }

    fn else_of(&self, expr: &Expr) -> Result<NodeId> {
        self.ast.else_nodes.get(&expr.id).copied().ok_or_else(|| {
            CpgError::Invariant(format!("if {:?} has no Else vertex", expr.id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpg::types::{Edge, ExprType};
    use crate::cpg::{generate_cpg, IndexNames};
    use crate::parser::parse_wasm;
    use crate::Cpg;

    fn build(wat: &str) -> Cpg {
        let parsed = parse_wasm(&wat::parse_str(wat).unwrap()).unwrap();
        generate_cpg(&parsed, &CpgOptions::default(), &IndexNames).unwrap()
    }

    fn find_inst(cpg: &Cpg, ty: ExprType) -> NodeId {
        cpg.graph
            .nodes()
            .find(|n| n.expr_type() == Some(ty))
            .map(|n| n.id())
            .unwrap_or_else(|| panic!("no {:?} instruction in graph", ty))
    }

    fn cfg_succs(cpg: &Cpg, node: NodeId) -> Vec<(NodeId, Option<String>)> {
        cpg.graph
            .out_edges_of(node, EdgeType::Cfg)
            .map(|e: &Edge| (e.dst(), e.label().map(str::to_string)))
            .collect()
    }

    #[test]
    fn straight_line_code_chains() {
        let cpg = build(
            r#"
            (module (func (result i32)
                i32.const 1
                i32.const 2
                i32.add))
        "#,
        );
        let add = find_inst(&cpg, ExprType::Binary);
        let preds: Vec<NodeId> = cpg
            .graph
            .in_edges_of(add, EdgeType::Cfg)
            .map(|e| e.src())
            .collect();
        assert_eq!(preds.len(), 1);
        assert_eq!(
            cpg.graph.node(preds[0]).value(),
            Some(crate::cpg::types::ConstValue::I32(2))
        );
        // The add falls off the end: no outgoing control flow.
        assert!(cfg_succs(&cpg, add).is_empty());
    }

    #[test]
    fn br_if_labels_true_and_false() {
        let cpg = build(
            r#"
            (module (func (param i32)
                (block
                    local.get 0
                    br_if 0
                    nop)))
        "#,
        );
        let br_if = find_inst(&cpg, ExprType::BrIf);
        let begin = find_inst(&cpg, ExprType::BeginBlock);
        let nop = find_inst(&cpg, ExprType::Nop);
        let succs = cfg_succs(&cpg, br_if);
        assert!(succs.contains(&(begin, Some("true".to_string()))));
        assert!(succs.contains(&(nop, Some("false".to_string()))));
    }

    #[test]
    fn dead_code_after_br_is_recorded() {
        let cpg = build(
            r#"
            (module (func
                (block
                    br 0
                    nop)))
        "#,
        );
        let nop = find_inst(&cpg, ExprType::Nop);
        let br = find_inst(&cpg, ExprType::Br);
        let begin = find_inst(&cpg, ExprType::BeginBlock);
        assert!(cpg.unreachable.contains(&nop));
        assert!(cpg.graph.in_edges_of(nop, EdgeType::Cfg).next().is_none());
        // The br still exits through the block's BeginBlock.
        assert_eq!(cfg_succs(&cpg, br), vec![(begin, None)]);
        assert!(!cpg.unreachable.contains(&begin));
    }

    #[test]
    fn control_reenters_after_block_exit() {
        let cpg = build(
            r#"
            (module (func
                (block
                    br 0
                    nop)
                i32.const 5
                drop))
        "#,
        );
        let begin = find_inst(&cpg, ExprType::BeginBlock);
        let constant = find_inst(&cpg, ExprType::Const);
        let succs = cfg_succs(&cpg, begin);
        assert_eq!(succs, vec![(constant, None)]);
        assert!(!cpg.unreachable.contains(&constant));
    }

    #[test]
    fn unreachable_instruction_flows_to_trap() {
        let cpg = build("(module (func unreachable))");
        let inst = find_inst(&cpg, ExprType::Unreachable);
        let succs = cfg_succs(&cpg, inst);
        assert_eq!(succs.len(), 1);
        assert_eq!(
            cpg.graph.node(succs[0].0).node_type(),
            NodeType::Trap
        );
    }

    #[test]
    fn return_flows_to_function_sink() {
        let cpg = build("(module (func (result i32) i32.const 1 return))");
        let ret = find_inst(&cpg, ExprType::Return);
        let succs = cfg_succs(&cpg, ret);
        assert_eq!(succs.len(), 1);
        assert_eq!(cpg.graph.node(succs[0].0).node_type(), NodeType::Return);
    }

    #[test]
    fn branch_to_function_label_exits_through_return_sink() {
        let cpg = build("(module (func br 0))");
        let br = find_inst(&cpg, ExprType::Br);
        let succs = cfg_succs(&cpg, br);
        assert_eq!(succs.len(), 1);
        assert_eq!(cpg.graph.node(succs[0].0).node_type(), NodeType::Return);
    }

    #[test]
    fn structural_vertices_are_never_entered() {
        let cpg = build("(module (func (block nop)))");
        let block = find_inst(&cpg, ExprType::Block);
        assert!(cpg.unreachable.contains(&block));
        let nop = find_inst(&cpg, ExprType::Nop);
        assert!(!cpg.unreachable.contains(&nop));
    }

    #[test]
    fn imported_function_scaffold_is_opt_in() {
        let wat = r#"
            (module (import "env" "log" (func (param i32))))
        "#;
        let parsed = parse_wasm(&wat::parse_str(wat).unwrap()).unwrap();

        let bare = generate_cpg(&parsed, &CpgOptions::default(), &IndexNames).unwrap();
        assert_eq!(
            bare.graph.edges().filter(|e| e.edge_type() == EdgeType::Cfg).count(),
            0
        );

        let options = CpgOptions {
            include_imports_in_cfg: true,
            ..CpgOptions::default()
        };
        let scaffolded = generate_cpg(&parsed, &options, &IndexNames).unwrap();
        let func = scaffolded
            .graph
            .nodes()
            .find(|n| n.node_type() == NodeType::Function)
            .map(|n| n.id())
            .unwrap();
        let succs: Vec<NodeId> = scaffolded
            .graph
            .out_edges_of(func, EdgeType::Cfg)
            .map(|e| e.dst())
            .collect();
        assert_eq!(succs.len(), 1);
        assert_eq!(
            scaffolded.graph.node(succs[0]).node_type(),
            NodeType::Return
        );
    }

    #[test]
    fn start_section_wires_start_vertex() {
        let cpg = build(
            r#"
            (module
                (func $main nop)
                (start $main))
        "#,
        );
        let start = cpg
            .graph
            .nodes()
            .find(|n| n.node_type() == NodeType::Start)
            .map(|n| n.id())
            .unwrap();
        let succs = cfg_succs(&cpg, start);
        assert_eq!(succs.len(), 1);
        assert_eq!(
            cpg.graph.node(succs[0].0).node_type(),
            NodeType::Function
        );
    }

    #[test]
    fn cfg_pass_can_be_disabled() {
        let parsed = parse_wasm(&wat::parse_str("(module (func nop))").unwrap()).unwrap();
        let options = CpgOptions {
            cfg: false,
            ..CpgOptions::default()
        };
        let cpg = generate_cpg(&parsed, &options, &IndexNames).unwrap();
        assert_eq!(
            cpg.graph.edges().filter(|e| e.edge_type() == EdgeType::Cfg).count(),
            0
        );
        assert!(cpg.unreachable.is_empty());
    }
}
