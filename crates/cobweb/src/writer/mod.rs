//! Graphviz DOT output for a finished graph.
//!
//! One node per vertex with a compact kind/attribute label; edges coloured
//! per relation (AST black, CFG red, PDG blue) with CFG/PDG labels shown.
//! Serialisation lives outside the core: the writer only reads the store.

use crate::cpg::graph::Graph;
use crate::cpg::types::{EdgeKind, InstKind, Node, NodeKind};
use std::io::{self, Write};

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn inst_label(inst: &InstKind) -> String {
    match inst {
        InstKind::Nop => "nop".to_string(),
        InstKind::Unreachable => "unreachable".to_string(),
        InstKind::Return => "return".to_string(),
        InstKind::Drop => "drop".to_string(),
        InstKind::Select => "select".to_string(),
        InstKind::MemorySize => "memory.size".to_string(),
        InstKind::MemoryGrow => "memory.grow".to_string(),
        InstKind::Const { value } => value.to_string(),
        InstKind::Binary { opcode }
        | InstKind::Compare { opcode }
        | InstKind::Convert { opcode }
        | InstKind::Unary { opcode } => opcode.to_string(),
        InstKind::Load { opcode, offset } | InstKind::Store { opcode, offset } => {
            format!("{} offset={}", opcode, offset)
        }
        InstKind::Br { label } => format!("br {}", label),
        InstKind::BrIf { label } => format!("br_if {}", label),
        InstKind::BrTable => "br_table".to_string(),
        InstKind::GlobalGet { label } => format!("global.get {}", label),
        InstKind::GlobalSet { label } => format!("global.set {}", label),
        InstKind::LocalGet { label } => format!("local.get {}", label),
        InstKind::LocalSet { label } => format!("local.set {}", label),
        InstKind::LocalTee { label } => format!("local.tee {}", label),
        InstKind::Call { label, .. } => format!("call {}", label),
        InstKind::CallIndirect { label, .. } => format!("call_indirect {}", label),
        InstKind::Block { label, .. } => format!("block {}", label),
        InstKind::Loop { label, .. } => format!("loop {}", label),
        InstKind::BeginBlock { label, .. } => format!("begin {}", label),
        InstKind::If { has_else, .. } => {
            if *has_else {
                "if/else".to_string()
            } else {
                "if".to_string()
            }
        }
    }
}

fn node_label(node: &Node) -> String {
    match node.kind() {
        NodeKind::Module { name } => format!("module {}", name),
        NodeKind::Function { name, .. } => format!("function {}", name),
        NodeKind::FunctionSignature => "signature".to_string(),
        NodeKind::Parameters => "parameters".to_string(),
        NodeKind::Locals => "locals".to_string(),
        NodeKind::Results => "results".to_string(),
        NodeKind::Instructions => "instructions".to_string(),
        NodeKind::VarNode { var_type, name } => {
            if name.is_empty() {
                var_type.to_string()
            } else {
                format!("{} {}", var_type, name)
            }
        }
        NodeKind::Instruction { inst, .. } => inst_label(inst),
        NodeKind::Return => "return-point".to_string(),
        NodeKind::Else => "else".to_string(),
        NodeKind::Trap => "trap".to_string(),
        NodeKind::Start => "start".to_string(),
    }
}

/// Write the whole graph in DOT format.
pub fn write_dot(graph: &Graph, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "digraph cpg {{")?;
    writeln!(out, "    node [shape=box, fontname=\"monospace\"];")?;
    for node in graph.nodes() {
        writeln!(
            out,
            "    {} [label=\"{}: {}\"];",
            node.id(),
            node.id(),
            escape(&node_label(node))
        )?;
    }
    for edge in graph.edges() {
        let (color, label) = match edge.kind() {
            EdgeKind::Ast => ("black", None),
            EdgeKind::Cfg { label } => ("red", label.as_deref()),
            EdgeKind::Pdg { label, .. } => ("blue", label.as_deref()),
        };
        match label {
            Some(l) => writeln!(
                out,
                "    {} -> {} [color={}, label=\"{}\"];",
                edge.src(),
                edge.dst(),
                color,
                escape(l)
            )?,
            None => writeln!(
                out,
                "    {} -> {} [color={}];",
                edge.src(),
                edge.dst(),
                color
            )?,
        }
    }
    writeln!(out, "}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpg::{generate_cpg, IndexNames};
    use crate::parser::parse_wasm;
    use crate::CpgOptions;

    #[test]
    fn dot_output_names_relations_and_labels() {
        let wat = r#"
            (module (func (param i32)
                (block
                    local.get 0
                    br_if 0
                    nop)))
        "#;
        let parsed = parse_wasm(&wat::parse_str(wat).unwrap()).unwrap();
        let cpg = generate_cpg(&parsed, &CpgOptions::default(), &IndexNames).unwrap();

        let mut buf = Vec::new();
        write_dot(&cpg.graph, &mut buf).unwrap();
        let dot = String::from_utf8(buf).unwrap();

        assert!(dot.starts_with("digraph cpg {"));
        assert!(dot.contains("br_if $B0"));
        assert!(dot.contains("color=red, label=\"true\""));
        assert!(dot.contains("color=black"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
