//! Node and edge model for the code property graph.
//!
//! Every vertex carries a [`NodeKind`] drawn from a closed set: the module
//! root, per-function scaffolding (signature, parameters, locals, results,
//! instructions), one vertex per instruction, and a handful of distinguished
//! sinks (Return, Else, Trap, Start). Edges superimpose three relations over
//! the same vertex set (AST, CFG and PDG), so a node routinely has edges of
//! several kinds at once.
//!
//! The deep class hierarchy of classic CPG implementations is flattened here
//! into tagged variants; consumers match on kinds instead of downcasting.

use std::fmt;

/// Stable identity of a node inside its owning [`Graph`](super::graph::Graph).
///
/// Ids are assigned monotonically at insertion and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Stable identity of an edge inside its owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub u32);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// WebAssembly value types (MVP numeric types).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmType {
    I32,
    I64,
    F32,
    F64,
}

impl fmt::Display for WasmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WasmType::I32 => write!(f, "i32"),
            WasmType::I64 => write!(f, "i64"),
            WasmType::F32 => write!(f, "f32"),
            WasmType::F64 => write!(f, "f64"),
        }
    }
}

/// Source location of an instruction.
///
/// The binary front end records the byte offset of the operator inside the
/// module; a text front end would map this to line/column instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub offset: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.offset)
    }
}

/// A typed constant value carried by `*.const` instructions and by
/// constant-flow PDG edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl ConstValue {
    pub fn ty(&self) -> WasmType {
        match self {
            ConstValue::I32(_) => WasmType::I32,
            ConstValue::I64(_) => WasmType::I64,
            ConstValue::F32(_) => WasmType::F32,
            ConstValue::F64(_) => WasmType::F64,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::I32(v) => write!(f, "i32.const {}", v),
            ConstValue::I64(v) => write!(f, "i64.const {}", v),
            ConstValue::F32(v) => write!(f, "f32.const {}", v),
            ConstValue::F64(v) => write!(f, "f64.const {}", v),
        }
    }
}

/// A Wasm opcode mnemonic, e.g. `i32.add` or `f64.promote_f32`.
///
/// The front end assigns the canonical names from the Wasm spec; the graph
/// treats the opcode as an opaque, comparable tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(pub &'static str);

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// The three superimposed relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeType {
    Ast,
    Cfg,
    Pdg,
}

/// Sub-kinds of program-dependence edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdgKind {
    Local,
    Global,
    Function,
    Control,
    Const,
}

/// Edge payload, one variant per relation.
///
/// AST edges carry nothing; child order is the insertion order of a node's
/// outgoing AST edges. CFG edges optionally carry a branch label (`"true"`,
/// `"false"`, or a branch-table target name). PDG edges carry a sub-kind, an
/// optional label, and, for constant flow, the constant itself.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeKind {
    Ast,
    Cfg {
        label: Option<String>,
    },
    Pdg {
        kind: PdgKind,
        label: Option<String>,
        value: Option<ConstValue>,
    },
}

impl EdgeKind {
    pub fn edge_type(&self) -> EdgeType {
        match self {
            EdgeKind::Ast => EdgeType::Ast,
            EdgeKind::Cfg { .. } => EdgeType::Cfg,
            EdgeKind::Pdg { .. } => EdgeType::Pdg,
        }
    }
}

/// Discriminant of an instruction vertex, mirroring the Wasm opcode families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprType {
    Nop,
    Unreachable,
    Return,
    Drop,
    Select,
    MemorySize,
    MemoryGrow,
    Const,
    Binary,
    Compare,
    Convert,
    Unary,
    Load,
    Store,
    Br,
    BrIf,
    BrTable,
    GlobalGet,
    GlobalSet,
    LocalGet,
    LocalSet,
    LocalTee,
    Call,
    CallIndirect,
    Block,
    Loop,
    BeginBlock,
    If,
}

/// Attributes of an instruction vertex, one variant per expression kind.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Nop,
    Unreachable,
    Return,
    Drop,
    Select,
    MemorySize,
    MemoryGrow,
    Const {
        value: ConstValue,
    },
    Binary {
        opcode: Opcode,
    },
    Compare {
        opcode: Opcode,
    },
    Convert {
        opcode: Opcode,
    },
    Unary {
        opcode: Opcode,
    },
    Load {
        opcode: Opcode,
        offset: u32,
    },
    Store {
        opcode: Opcode,
        offset: u32,
    },
    Br {
        label: String,
    },
    BrIf {
        label: String,
    },
    /// Target labels and the default live on the outgoing CFG edges.
    BrTable,
    GlobalGet {
        label: String,
    },
    GlobalSet {
        label: String,
    },
    LocalGet {
        label: String,
    },
    LocalSet {
        label: String,
    },
    LocalTee {
        label: String,
    },
    Call {
        label: String,
        nargs: usize,
        nresults: usize,
    },
    CallIndirect {
        label: String,
        nargs: usize,
        nresults: usize,
    },
    Block {
        label: String,
        nresults: usize,
    },
    Loop {
        label: String,
        nresults: usize,
    },
    /// Branch-target scaffolding paired with a `Block`/`Loop`; `block` is a
    /// non-owning handle to the construct it opens.
    BeginBlock {
        label: String,
        block: NodeId,
    },
    If {
        nresults: usize,
        has_else: bool,
    },
}

impl InstKind {
    pub fn expr_type(&self) -> ExprType {
        match self {
            InstKind::Nop => ExprType::Nop,
            InstKind::Unreachable => ExprType::Unreachable,
            InstKind::Return => ExprType::Return,
            InstKind::Drop => ExprType::Drop,
            InstKind::Select => ExprType::Select,
            InstKind::MemorySize => ExprType::MemorySize,
            InstKind::MemoryGrow => ExprType::MemoryGrow,
            InstKind::Const { .. } => ExprType::Const,
            InstKind::Binary { .. } => ExprType::Binary,
            InstKind::Compare { .. } => ExprType::Compare,
            InstKind::Convert { .. } => ExprType::Convert,
            InstKind::Unary { .. } => ExprType::Unary,
            InstKind::Load { .. } => ExprType::Load,
            InstKind::Store { .. } => ExprType::Store,
            InstKind::Br { .. } => ExprType::Br,
            InstKind::BrIf { .. } => ExprType::BrIf,
            InstKind::BrTable => ExprType::BrTable,
            InstKind::GlobalGet { .. } => ExprType::GlobalGet,
            InstKind::GlobalSet { .. } => ExprType::GlobalSet,
            InstKind::LocalGet { .. } => ExprType::LocalGet,
            InstKind::LocalSet { .. } => ExprType::LocalSet,
            InstKind::LocalTee { .. } => ExprType::LocalTee,
            InstKind::Call { .. } => ExprType::Call,
            InstKind::CallIndirect { .. } => ExprType::CallIndirect,
            InstKind::Block { .. } => ExprType::Block,
            InstKind::Loop { .. } => ExprType::Loop,
            InstKind::BeginBlock { .. } => ExprType::BeginBlock,
            InstKind::If { .. } => ExprType::If,
        }
    }
}

/// Coarse node category, one per [`NodeKind`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Module,
    Function,
    VarNode,
    FunctionSignature,
    Instructions,
    Instruction,
    Parameters,
    Locals,
    Results,
    Return,
    Else,
    Trap,
    Start,
}

/// The closed set of vertex kinds with their attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Module {
        name: String,
    },
    Function {
        name: String,
        index: u32,
        nargs: usize,
        nlocals: usize,
        nresults: usize,
        is_import: bool,
    },
    FunctionSignature,
    Parameters,
    Locals,
    Results,
    Instructions,
    VarNode {
        var_type: WasmType,
        name: String,
    },
    Instruction {
        inst: InstKind,
        location: Location,
    },
    Return,
    Else,
    Trap,
    Start,
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Module { .. } => NodeType::Module,
            NodeKind::Function { .. } => NodeType::Function,
            NodeKind::FunctionSignature => NodeType::FunctionSignature,
            NodeKind::Parameters => NodeType::Parameters,
            NodeKind::Locals => NodeType::Locals,
            NodeKind::Results => NodeType::Results,
            NodeKind::Instructions => NodeType::Instructions,
            NodeKind::VarNode { .. } => NodeType::VarNode,
            NodeKind::Instruction { .. } => NodeType::Instruction,
            NodeKind::Return => NodeType::Return,
            NodeKind::Else => NodeType::Else,
            NodeKind::Trap => NodeType::Trap,
            NodeKind::Start => NodeType::Start,
        }
    }
}

/// A vertex plus its adjacency, owned by the graph store.
///
/// `in_edges`/`out_edges` hold edge ids in insertion order; the positional
/// child/parent accessors on the store rely on that order being stable.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    in_edges: Vec<EdgeId>,
    out_edges: Vec<EdgeId>,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn in_edge_ids(&self) -> &[EdgeId] {
        &self.in_edges
    }

    pub fn out_edge_ids(&self) -> &[EdgeId] {
        &self.out_edges
    }

    pub(crate) fn push_in_edge(&mut self, e: EdgeId) {
        self.in_edges.push(e);
    }

    pub(crate) fn push_out_edge(&mut self, e: EdgeId) {
        self.out_edges.push(e);
    }

    // Attribute accessors return `None` on a node of the wrong kind, so
    // query predicates can probe any node safely.

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Module { name } => Some(name),
            NodeKind::Function { name, .. } => Some(name),
            NodeKind::VarNode { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn index(&self) -> Option<u32> {
        match &self.kind {
            NodeKind::Function { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn nargs(&self) -> Option<usize> {
        match &self.kind {
            NodeKind::Function { nargs, .. } => Some(*nargs),
            NodeKind::Instruction { inst, .. } => match inst {
                InstKind::Call { nargs, .. } | InstKind::CallIndirect { nargs, .. } => Some(*nargs),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn nlocals(&self) -> Option<usize> {
        match &self.kind {
            NodeKind::Function { nlocals, .. } => Some(*nlocals),
            _ => None,
        }
    }

    pub fn nresults(&self) -> Option<usize> {
        match &self.kind {
            NodeKind::Function { nresults, .. } => Some(*nresults),
            NodeKind::Instruction { inst, .. } => match inst {
                InstKind::Call { nresults, .. }
                | InstKind::CallIndirect { nresults, .. }
                | InstKind::Block { nresults, .. }
                | InstKind::Loop { nresults, .. }
                | InstKind::If { nresults, .. } => Some(*nresults),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_import(&self) -> Option<bool> {
        match &self.kind {
            NodeKind::Function { is_import, .. } => Some(*is_import),
            _ => None,
        }
    }

    pub fn var_type(&self) -> Option<WasmType> {
        match &self.kind {
            NodeKind::VarNode { var_type, .. } => Some(*var_type),
            _ => None,
        }
    }

    pub fn inst(&self) -> Option<&InstKind> {
        match &self.kind {
            NodeKind::Instruction { inst, .. } => Some(inst),
            _ => None,
        }
    }

    pub fn expr_type(&self) -> Option<ExprType> {
        self.inst().map(InstKind::expr_type)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        match self.inst()? {
            InstKind::Binary { opcode }
            | InstKind::Compare { opcode }
            | InstKind::Convert { opcode }
            | InstKind::Unary { opcode }
            | InstKind::Load { opcode, .. }
            | InstKind::Store { opcode, .. } => Some(*opcode),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<ConstValue> {
        match self.inst()? {
            InstKind::Const { value } => Some(*value),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self.inst()? {
            InstKind::Br { label }
            | InstKind::BrIf { label }
            | InstKind::GlobalGet { label }
            | InstKind::GlobalSet { label }
            | InstKind::LocalGet { label }
            | InstKind::LocalSet { label }
            | InstKind::LocalTee { label }
            | InstKind::Call { label, .. }
            | InstKind::CallIndirect { label, .. }
            | InstKind::Block { label, .. }
            | InstKind::Loop { label, .. }
            | InstKind::BeginBlock { label, .. } => Some(label),
            _ => None,
        }
    }

    pub fn has_else(&self) -> Option<bool> {
        match self.inst()? {
            InstKind::If { has_else, .. } => Some(*has_else),
            _ => None,
        }
    }

    pub fn offset(&self) -> Option<u32> {
        match self.inst()? {
            InstKind::Load { offset, .. } | InstKind::Store { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match &self.kind {
            NodeKind::Instruction { location, .. } => Some(*location),
            _ => None,
        }
    }

    /// For a `BeginBlock`, the `Block`/`Loop` vertex it opens.
    pub fn block(&self) -> Option<NodeId> {
        match self.inst()? {
            InstKind::BeginBlock { block, .. } => Some(*block),
            _ => None,
        }
    }
}

/// A directed edge between two resident vertices.
#[derive(Debug, Clone)]
pub struct Edge {
    id: EdgeId,
    src: NodeId,
    dst: NodeId,
    kind: EdgeKind,
}

impl Edge {
    pub(crate) fn new(id: EdgeId, src: NodeId, dst: NodeId, kind: EdgeKind) -> Self {
        Self { id, src, dst, kind }
    }

    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn src(&self) -> NodeId {
        self.src
    }

    pub fn dst(&self) -> NodeId {
        self.dst
    }

    pub fn kind(&self) -> &EdgeKind {
        &self.kind
    }

    pub fn edge_type(&self) -> EdgeType {
        self.kind.edge_type()
    }

    pub fn label(&self) -> Option<&str> {
        match &self.kind {
            EdgeKind::Cfg { label } | EdgeKind::Pdg { label, .. } => label.as_deref(),
            EdgeKind::Ast => None,
        }
    }

    pub fn pdg_kind(&self) -> Option<PdgKind> {
        match &self.kind {
            EdgeKind::Pdg { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<ConstValue> {
        match &self.kind {
            EdgeKind::Pdg { value, .. } => *value,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_value_display_uses_wat_mnemonics() {
        assert_eq!(ConstValue::I32(-7).to_string(), "i32.const -7");
        assert_eq!(ConstValue::I64(1).to_string(), "i64.const 1");
        assert_eq!(ConstValue::F32(0.5).to_string(), "f32.const 0.5");
    }

    #[test]
    fn accessors_return_none_on_wrong_kind() {
        let n = Node::new(NodeId(0), NodeKind::Parameters);
        assert_eq!(n.name(), None);
        assert_eq!(n.expr_type(), None);
        assert_eq!(n.has_else(), None);
        assert_eq!(n.node_type(), NodeType::Parameters);
    }

    #[test]
    fn instruction_attributes_round_trip() {
        let n = Node::new(
            NodeId(3),
            NodeKind::Instruction {
                inst: InstKind::Load {
                    opcode: Opcode("i32.load8_u"),
                    offset: 16,
                },
                location: Location { offset: 0x40 },
            },
        );
        assert_eq!(n.expr_type(), Some(ExprType::Load));
        assert_eq!(n.opcode(), Some(Opcode("i32.load8_u")));
        assert_eq!(n.offset(), Some(16));
        assert_eq!(n.location(), Some(Location { offset: 0x40 }));
    }
}
