//! WebAssembly module front end.
//!
//! This module wraps the `wasmparser` crate to extract the structured view
//! the graph builders consume: function signatures, locals, and function
//! bodies rebuilt as nested expression trees (`block`/`loop`/`if` nest, every
//! other operator is a leaf of its enclosing list).
//!
//! Branches in the binary format address lexically enclosing constructs by
//! relative depth. The front end resolves every depth to a symbolic label:
//! each `block`/`loop`/`if` receives a synthesized name (`$B0`, `$L1`, `$I2`)
//! and `br`/`br_if`/`br_table` store the names of their resolved targets. The
//! function body itself is addressable too (`br` to the outermost depth),
//! under the reserved label `$func`.

use crate::cpg::types::{ConstValue, Location, Opcode, WasmType};
use anyhow::{bail, Context, Result};
use wasmparser::{ExternalKind, Parser, Payload, TypeRef, ValType};

/// Label of the implicit function-level frame. Branches resolved to this
/// label leave the function.
pub const FUNC_LABEL: &str = "$func";

/// A function signature with MVP numeric types only.
#[derive(Debug, Clone, Default)]
pub struct FuncSig {
    pub params: Vec<WasmType>,
    pub results: Vec<WasmType>,
}

/// A single Wasm global (imported or defined).
#[derive(Debug, Clone, Copy)]
pub struct GlobalInfo {
    pub val_type: WasmType,
    pub mutable: bool,
}

/// A function in the unified index space (imports first, then defined).
#[derive(Debug, Clone)]
pub struct ParsedFunction {
    /// Export name, import field name, or a synthesized `$f{index}`.
    pub name: String,
    /// Position in the function index space.
    pub index: u32,
    /// Index into the type section.
    pub type_idx: u32,
    /// Declared locals (parameters live in the signature).
    pub locals: Vec<WasmType>,
    /// Structured body; empty for imported functions.
    pub body: Vec<Expr>,
    pub is_import: bool,
}

/// Parsed WebAssembly module.
#[derive(Debug, Clone, Default)]
pub struct ParsedModule {
    pub types: Vec<FuncSig>,
    pub functions: Vec<ParsedFunction>,
    pub globals: Vec<GlobalInfo>,
    /// Function index named by the start section, if any.
    pub start_function: Option<u32>,
    pub num_imported_functions: u32,
}

/// Identity of an expression within its module, unique across all function
/// bodies. The AST builder keys its expression→vertex map on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// One structured expression.
#[derive(Debug, Clone)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
    pub location: Location,
}

/// Expression kinds after re-nesting the flat operator stream.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Nop,
    Unreachable,
    Return,
    Drop,
    Select,
    MemorySize,
    MemoryGrow,
    Const(ConstValue),
    Binary(Opcode),
    Compare(Opcode),
    Convert(Opcode),
    Unary(Opcode),
    Load { opcode: Opcode, offset: u32 },
    Store { opcode: Opcode, offset: u32 },
    Br { label: String },
    BrIf { label: String },
    BrTable { targets: Vec<String>, default: String },
    GlobalGet { index: u32 },
    GlobalSet { index: u32 },
    LocalGet { index: u32 },
    LocalSet { index: u32 },
    LocalTee { index: u32 },
    Call { func: u32 },
    CallIndirect { type_idx: u32 },
    Block { label: String, nresults: usize, body: Vec<Expr> },
    Loop { label: String, nresults: usize, body: Vec<Expr> },
    If { label: String, nresults: usize, then_body: Vec<Expr>, else_body: Option<Vec<Expr>> },
}

/// Convert a wasmparser value type, rejecting anything outside the MVP
/// numeric types.
fn wasm_type(vt: ValType) -> Result<WasmType> {
    match vt {
        ValType::I32 => Ok(WasmType::I32),
        ValType::I64 => Ok(WasmType::I64),
        ValType::F32 => Ok(WasmType::F32),
        ValType::F64 => Ok(WasmType::F64),
        _ => bail!("unsupported value type {:?}", vt),
    }
}

/// Result count of a block type. Multi-value block signatures are out of the
/// supported subset.
fn block_results(blockty: &wasmparser::BlockType) -> Result<usize> {
    match blockty {
        wasmparser::BlockType::Empty => Ok(0),
        wasmparser::BlockType::Type(_) => Ok(1),
        wasmparser::BlockType::FuncType(_) => bail!("multi-value blocks not supported"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Func,
    Block,
    Loop,
    If,
}

/// An open construct while re-nesting one function body.
struct Frame {
    kind: FrameKind,
    label: String,
    nresults: usize,
    list: Vec<Expr>,
    else_list: Vec<Expr>,
    in_else: bool,
    location: Location,
}

impl Frame {
    fn new(kind: FrameKind, label: String, nresults: usize, location: Location) -> Self {
        Self {
            kind,
            label,
            nresults,
            list: Vec::new(),
            else_list: Vec::new(),
            in_else: false,
            location,
        }
    }

    fn current_list(&mut self) -> &mut Vec<Expr> {
        if self.in_else {
            &mut self.else_list
        } else {
            &mut self.list
        }
    }
}

/// Rebuilds nested expression trees from flat operator streams.
///
/// One instance per module so expression ids stay unique across functions;
/// label counters reset per function.
struct BodyBuilder {
    next_expr: u32,
    blocks: u32,
    loops: u32,
    ifs: u32,
}

impl BodyBuilder {
    fn new() -> Self {
        Self {
            next_expr: 0,
            blocks: 0,
            loops: 0,
            ifs: 0,
        }
    }

    fn expr(&mut self, kind: ExprKind, offset: usize) -> Expr {
        let id = ExprId(self.next_expr);
        self.next_expr += 1;
        Expr {
            id,
            kind,
            location: Location { offset },
        }
    }

    /// Resolve a relative branch depth against the open frames (innermost is
    /// the last element) to a label name.
    fn resolve_depth(frames: &[Frame], depth: u32) -> Result<String> {
        let idx = frames
            .len()
            .checked_sub(depth as usize + 1)
            .with_context(|| {
                format!(
                    "branch depth {} exceeds nesting depth {}",
                    depth,
                    frames.len()
                )
            })?;
        Ok(frames[idx].label.clone())
    }

    /// Close a finished frame into its structured expression.
    fn close_frame(&mut self, frame: Frame) -> Result<Expr> {
        let offset = frame.location.offset;
        let kind = match frame.kind {
            FrameKind::Block => ExprKind::Block {
                label: frame.label,
                nresults: frame.nresults,
                body: frame.list,
            },
            FrameKind::Loop => ExprKind::Loop {
                label: frame.label,
                nresults: frame.nresults,
                body: frame.list,
            },
            FrameKind::If => ExprKind::If {
                label: frame.label,
                nresults: frame.nresults,
                then_body: frame.list,
                else_body: frame.in_else.then_some(frame.else_list),
            },
            FrameKind::Func => bail!("function frame closed as expression"),
        };
        Ok(self.expr(kind, offset))
    }

    /// Re-nest one function body. `reader` must cover exactly the body's
    /// operators, terminated by the function-level `end`.
    fn build(&mut self, body: &wasmparser::FunctionBody<'_>) -> Result<Vec<Expr>> {
        self.blocks = 0;
        self.loops = 0;
        self.ifs = 0;

        let mut reader = body
            .get_operators_reader()
            .context("getting operators reader")?;
        let mut frames = vec![Frame::new(
            FrameKind::Func,
            FUNC_LABEL.to_string(),
            0,
            Location::default(),
        )];

        while !reader.eof() {
            let offset = reader.original_position();
            let op = reader.read().context("reading operator")?;

            use wasmparser::Operator;
            match op {
                Operator::Block { blockty } => {
                    let label = format!("$B{}", self.blocks);
                    self.blocks += 1;
                    frames.push(Frame::new(
                        FrameKind::Block,
                        label,
                        block_results(&blockty)?,
                        Location { offset },
                    ));
                }

                Operator::Loop { blockty } => {
                    let label = format!("$L{}", self.loops);
                    self.loops += 1;
                    frames.push(Frame::new(
                        FrameKind::Loop,
                        label,
                        block_results(&blockty)?,
                        Location { offset },
                    ));
                }

                Operator::If { blockty } => {
                    let label = format!("$I{}", self.ifs);
                    self.ifs += 1;
                    frames.push(Frame::new(
                        FrameKind::If,
                        label,
                        block_results(&blockty)?,
                        Location { offset },
                    ));
                }

                Operator::Else => {
                    let frame = frames
                        .last_mut()
                        .filter(|f| f.kind == FrameKind::If && !f.in_else)
                        .context("else without matching if")?;
                    frame.in_else = true;
                }

                Operator::End => {
                    if frames.len() == 1 {
                        // Function-level end.
                        let frame = frames.pop().context("unbalanced end")?;
                        if !reader.eof() {
                            bail!("trailing operators after function end");
                        }
                        return Ok(frame.list);
                    }
                    let frame = frames.pop().context("unbalanced end")?;
                    let expr = self.close_frame(frame)?;
                    frames
                        .last_mut()
                        .context("unbalanced end")?
                        .current_list()
                        .push(expr);
                }

                Operator::Br { relative_depth } => {
                    let label = Self::resolve_depth(&frames, relative_depth)?;
                    let expr = self.expr(ExprKind::Br { label }, offset);
                    frames
                        .last_mut()
                        .context("br outside any frame")?
                        .current_list()
                        .push(expr);
                }

                Operator::BrIf { relative_depth } => {
                    let label = Self::resolve_depth(&frames, relative_depth)?;
                    let expr = self.expr(ExprKind::BrIf { label }, offset);
                    frames
                        .last_mut()
                        .context("br_if outside any frame")?
                        .current_list()
                        .push(expr);
                }

                Operator::BrTable { targets } => {
                    let depths: Vec<u32> = targets
                        .targets()
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .context("reading br_table targets")?;
                    let labels = depths
                        .iter()
                        .map(|d| Self::resolve_depth(&frames, *d))
                        .collect::<Result<Vec<_>>>()?;
                    let default = Self::resolve_depth(&frames, targets.default())?;
                    let expr = self.expr(
                        ExprKind::BrTable {
                            targets: labels,
                            default,
                        },
                        offset,
                    );
                    frames
                        .last_mut()
                        .context("br_table outside any frame")?
                        .current_list()
                        .push(expr);
                }

                other => {
                    let kind = leaf_kind(&other)?;
                    let expr = self.expr(kind, offset);
                    frames
                        .last_mut()
                        .context("operator outside any frame")?
                        .current_list()
                        .push(expr);
                }
            }
        }

        bail!("function body missing terminating end")
    }
}

/// Map a non-control operator to its leaf expression kind.
fn leaf_kind(op: &wasmparser::Operator<'_>) -> Result<ExprKind> {
    use wasmparser::Operator;
    let kind = match op {
        Operator::Nop => ExprKind::Nop,
        Operator::Unreachable => ExprKind::Unreachable,
        Operator::Return => ExprKind::Return,
        Operator::Drop => ExprKind::Drop,
        Operator::Select => ExprKind::Select,

        // Constants
        Operator::I32Const { value } => ExprKind::Const(ConstValue::I32(*value)),
        Operator::I64Const { value } => ExprKind::Const(ConstValue::I64(*value)),
        Operator::F32Const { value } => {
            ExprKind::Const(ConstValue::F32(f32::from_bits(value.bits())))
        }
        Operator::F64Const { value } => {
            ExprKind::Const(ConstValue::F64(f64::from_bits(value.bits())))
        }

        // Variable access
        Operator::LocalGet { local_index } => ExprKind::LocalGet { index: *local_index },
        Operator::LocalSet { local_index } => ExprKind::LocalSet { index: *local_index },
        Operator::LocalTee { local_index } => ExprKind::LocalTee { index: *local_index },
        Operator::GlobalGet { global_index } => ExprKind::GlobalGet { index: *global_index },
        Operator::GlobalSet { global_index } => ExprKind::GlobalSet { index: *global_index },

        // Calls
        Operator::Call { function_index } => ExprKind::Call {
            func: *function_index,
        },
        Operator::CallIndirect {
            type_index,
            table_index,
        } => {
            if *table_index != 0 {
                bail!("multi-table not supported (table_index={})", table_index);
            }
            ExprKind::CallIndirect {
                type_idx: *type_index,
            }
        }

        // Memory management
        Operator::MemorySize { mem: 0, .. } => ExprKind::MemorySize,
        Operator::MemoryGrow { mem: 0, .. } => ExprKind::MemoryGrow,

        // === i32 binary operations ===
        Operator::I32Add => ExprKind::Binary(Opcode("i32.add")),
        Operator::I32Sub => ExprKind::Binary(Opcode("i32.sub")),
        Operator::I32Mul => ExprKind::Binary(Opcode("i32.mul")),
        Operator::I32DivS => ExprKind::Binary(Opcode("i32.div_s")),
        Operator::I32DivU => ExprKind::Binary(Opcode("i32.div_u")),
        Operator::I32RemS => ExprKind::Binary(Opcode("i32.rem_s")),
        Operator::I32RemU => ExprKind::Binary(Opcode("i32.rem_u")),
        Operator::I32And => ExprKind::Binary(Opcode("i32.and")),
        Operator::I32Or => ExprKind::Binary(Opcode("i32.or")),
        Operator::I32Xor => ExprKind::Binary(Opcode("i32.xor")),
        Operator::I32Shl => ExprKind::Binary(Opcode("i32.shl")),
        Operator::I32ShrS => ExprKind::Binary(Opcode("i32.shr_s")),
        Operator::I32ShrU => ExprKind::Binary(Opcode("i32.shr_u")),
        Operator::I32Rotl => ExprKind::Binary(Opcode("i32.rotl")),
        Operator::I32Rotr => ExprKind::Binary(Opcode("i32.rotr")),

        // i32 comparisons
        Operator::I32Eq => ExprKind::Compare(Opcode("i32.eq")),
        Operator::I32Ne => ExprKind::Compare(Opcode("i32.ne")),
        Operator::I32LtS => ExprKind::Compare(Opcode("i32.lt_s")),
        Operator::I32LtU => ExprKind::Compare(Opcode("i32.lt_u")),
        Operator::I32GtS => ExprKind::Compare(Opcode("i32.gt_s")),
        Operator::I32GtU => ExprKind::Compare(Opcode("i32.gt_u")),
        Operator::I32LeS => ExprKind::Compare(Opcode("i32.le_s")),
        Operator::I32LeU => ExprKind::Compare(Opcode("i32.le_u")),
        Operator::I32GeS => ExprKind::Compare(Opcode("i32.ge_s")),
        Operator::I32GeU => ExprKind::Compare(Opcode("i32.ge_u")),

        // i32 unary
        Operator::I32Eqz => ExprKind::Unary(Opcode("i32.eqz")),
        Operator::I32Clz => ExprKind::Unary(Opcode("i32.clz")),
        Operator::I32Ctz => ExprKind::Unary(Opcode("i32.ctz")),
        Operator::I32Popcnt => ExprKind::Unary(Opcode("i32.popcnt")),

        // === i64 binary operations ===
        Operator::I64Add => ExprKind::Binary(Opcode("i64.add")),
        Operator::I64Sub => ExprKind::Binary(Opcode("i64.sub")),
        Operator::I64Mul => ExprKind::Binary(Opcode("i64.mul")),
        Operator::I64DivS => ExprKind::Binary(Opcode("i64.div_s")),
        Operator::I64DivU => ExprKind::Binary(Opcode("i64.div_u")),
        Operator::I64RemS => ExprKind::Binary(Opcode("i64.rem_s")),
        Operator::I64RemU => ExprKind::Binary(Opcode("i64.rem_u")),
        Operator::I64And => ExprKind::Binary(Opcode("i64.and")),
        Operator::I64Or => ExprKind::Binary(Opcode("i64.or")),
        Operator::I64Xor => ExprKind::Binary(Opcode("i64.xor")),
        Operator::I64Shl => ExprKind::Binary(Opcode("i64.shl")),
        Operator::I64ShrS => ExprKind::Binary(Opcode("i64.shr_s")),
        Operator::I64ShrU => ExprKind::Binary(Opcode("i64.shr_u")),
        Operator::I64Rotl => ExprKind::Binary(Opcode("i64.rotl")),
        Operator::I64Rotr => ExprKind::Binary(Opcode("i64.rotr")),

        // i64 comparisons
        Operator::I64Eq => ExprKind::Compare(Opcode("i64.eq")),
        Operator::I64Ne => ExprKind::Compare(Opcode("i64.ne")),
        Operator::I64LtS => ExprKind::Compare(Opcode("i64.lt_s")),
        Operator::I64LtU => ExprKind::Compare(Opcode("i64.lt_u")),
        Operator::I64GtS => ExprKind::Compare(Opcode("i64.gt_s")),
        Operator::I64GtU => ExprKind::Compare(Opcode("i64.gt_u")),
        Operator::I64LeS => ExprKind::Compare(Opcode("i64.le_s")),
        Operator::I64LeU => ExprKind::Compare(Opcode("i64.le_u")),
        Operator::I64GeS => ExprKind::Compare(Opcode("i64.ge_s")),
        Operator::I64GeU => ExprKind::Compare(Opcode("i64.ge_u")),

        // i64 unary
        Operator::I64Eqz => ExprKind::Unary(Opcode("i64.eqz")),
        Operator::I64Clz => ExprKind::Unary(Opcode("i64.clz")),
        Operator::I64Ctz => ExprKind::Unary(Opcode("i64.ctz")),
        Operator::I64Popcnt => ExprKind::Unary(Opcode("i64.popcnt")),

        // === f32 operations ===
        Operator::F32Add => ExprKind::Binary(Opcode("f32.add")),
        Operator::F32Sub => ExprKind::Binary(Opcode("f32.sub")),
        Operator::F32Mul => ExprKind::Binary(Opcode("f32.mul")),
        Operator::F32Div => ExprKind::Binary(Opcode("f32.div")),
        Operator::F32Min => ExprKind::Binary(Opcode("f32.min")),
        Operator::F32Max => ExprKind::Binary(Opcode("f32.max")),
        Operator::F32Copysign => ExprKind::Binary(Opcode("f32.copysign")),
        Operator::F32Eq => ExprKind::Compare(Opcode("f32.eq")),
        Operator::F32Ne => ExprKind::Compare(Opcode("f32.ne")),
        Operator::F32Lt => ExprKind::Compare(Opcode("f32.lt")),
        Operator::F32Gt => ExprKind::Compare(Opcode("f32.gt")),
        Operator::F32Le => ExprKind::Compare(Opcode("f32.le")),
        Operator::F32Ge => ExprKind::Compare(Opcode("f32.ge")),
        Operator::F32Abs => ExprKind::Unary(Opcode("f32.abs")),
        Operator::F32Neg => ExprKind::Unary(Opcode("f32.neg")),
        Operator::F32Ceil => ExprKind::Unary(Opcode("f32.ceil")),
        Operator::F32Floor => ExprKind::Unary(Opcode("f32.floor")),
        Operator::F32Trunc => ExprKind::Unary(Opcode("f32.trunc")),
        Operator::F32Nearest => ExprKind::Unary(Opcode("f32.nearest")),
        Operator::F32Sqrt => ExprKind::Unary(Opcode("f32.sqrt")),

        // === f64 operations ===
        Operator::F64Add => ExprKind::Binary(Opcode("f64.add")),
        Operator::F64Sub => ExprKind::Binary(Opcode("f64.sub")),
        Operator::F64Mul => ExprKind::Binary(Opcode("f64.mul")),
        Operator::F64Div => ExprKind::Binary(Opcode("f64.div")),
        Operator::F64Min => ExprKind::Binary(Opcode("f64.min")),
        Operator::F64Max => ExprKind::Binary(Opcode("f64.max")),
        Operator::F64Copysign => ExprKind::Binary(Opcode("f64.copysign")),
        Operator::F64Eq => ExprKind::Compare(Opcode("f64.eq")),
        Operator::F64Ne => ExprKind::Compare(Opcode("f64.ne")),
        Operator::F64Lt => ExprKind::Compare(Opcode("f64.lt")),
        Operator::F64Gt => ExprKind::Compare(Opcode("f64.gt")),
        Operator::F64Le => ExprKind::Compare(Opcode("f64.le")),
        Operator::F64Ge => ExprKind::Compare(Opcode("f64.ge")),
        Operator::F64Abs => ExprKind::Unary(Opcode("f64.abs")),
        Operator::F64Neg => ExprKind::Unary(Opcode("f64.neg")),
        Operator::F64Ceil => ExprKind::Unary(Opcode("f64.ceil")),
        Operator::F64Floor => ExprKind::Unary(Opcode("f64.floor")),
        Operator::F64Trunc => ExprKind::Unary(Opcode("f64.trunc")),
        Operator::F64Nearest => ExprKind::Unary(Opcode("f64.nearest")),
        Operator::F64Sqrt => ExprKind::Unary(Opcode("f64.sqrt")),

        // === Conversions ===
        Operator::I32WrapI64 => ExprKind::Convert(Opcode("i32.wrap_i64")),
        Operator::I64ExtendI32S => ExprKind::Convert(Opcode("i64.extend_i32_s")),
        Operator::I64ExtendI32U => ExprKind::Convert(Opcode("i64.extend_i32_u")),
        Operator::I32TruncF32S => ExprKind::Convert(Opcode("i32.trunc_f32_s")),
        Operator::I32TruncF32U => ExprKind::Convert(Opcode("i32.trunc_f32_u")),
        Operator::I32TruncF64S => ExprKind::Convert(Opcode("i32.trunc_f64_s")),
        Operator::I32TruncF64U => ExprKind::Convert(Opcode("i32.trunc_f64_u")),
        Operator::I64TruncF32S => ExprKind::Convert(Opcode("i64.trunc_f32_s")),
        Operator::I64TruncF32U => ExprKind::Convert(Opcode("i64.trunc_f32_u")),
        Operator::I64TruncF64S => ExprKind::Convert(Opcode("i64.trunc_f64_s")),
        Operator::I64TruncF64U => ExprKind::Convert(Opcode("i64.trunc_f64_u")),
        Operator::F32ConvertI32S => ExprKind::Convert(Opcode("f32.convert_i32_s")),
        Operator::F32ConvertI32U => ExprKind::Convert(Opcode("f32.convert_i32_u")),
        Operator::F32ConvertI64S => ExprKind::Convert(Opcode("f32.convert_i64_s")),
        Operator::F32ConvertI64U => ExprKind::Convert(Opcode("f32.convert_i64_u")),
        Operator::F64ConvertI32S => ExprKind::Convert(Opcode("f64.convert_i32_s")),
        Operator::F64ConvertI32U => ExprKind::Convert(Opcode("f64.convert_i32_u")),
        Operator::F64ConvertI64S => ExprKind::Convert(Opcode("f64.convert_i64_s")),
        Operator::F64ConvertI64U => ExprKind::Convert(Opcode("f64.convert_i64_u")),
        Operator::F32DemoteF64 => ExprKind::Convert(Opcode("f32.demote_f64")),
        Operator::F64PromoteF32 => ExprKind::Convert(Opcode("f64.promote_f32")),
        Operator::I32ReinterpretF32 => ExprKind::Convert(Opcode("i32.reinterpret_f32")),
        Operator::I64ReinterpretF64 => ExprKind::Convert(Opcode("i64.reinterpret_f64")),
        Operator::F32ReinterpretI32 => ExprKind::Convert(Opcode("f32.reinterpret_i32")),
        Operator::F64ReinterpretI64 => ExprKind::Convert(Opcode("f64.reinterpret_i64")),

        // === Memory loads ===
        Operator::I32Load { memarg } => ExprKind::Load {
            opcode: Opcode("i32.load"),
            offset: memarg.offset as u32,
        },
        Operator::I64Load { memarg } => ExprKind::Load {
            opcode: Opcode("i64.load"),
            offset: memarg.offset as u32,
        },
        Operator::F32Load { memarg } => ExprKind::Load {
            opcode: Opcode("f32.load"),
            offset: memarg.offset as u32,
        },
        Operator::F64Load { memarg } => ExprKind::Load {
            opcode: Opcode("f64.load"),
            offset: memarg.offset as u32,
        },
        Operator::I32Load8S { memarg } => ExprKind::Load {
            opcode: Opcode("i32.load8_s"),
            offset: memarg.offset as u32,
        },
        Operator::I32Load8U { memarg } => ExprKind::Load {
            opcode: Opcode("i32.load8_u"),
            offset: memarg.offset as u32,
        },
        Operator::I32Load16S { memarg } => ExprKind::Load {
            opcode: Opcode("i32.load16_s"),
            offset: memarg.offset as u32,
        },
        Operator::I32Load16U { memarg } => ExprKind::Load {
            opcode: Opcode("i32.load16_u"),
            offset: memarg.offset as u32,
        },
        Operator::I64Load8S { memarg } => ExprKind::Load {
            opcode: Opcode("i64.load8_s"),
            offset: memarg.offset as u32,
        },
        Operator::I64Load8U { memarg } => ExprKind::Load {
            opcode: Opcode("i64.load8_u"),
            offset: memarg.offset as u32,
        },
        Operator::I64Load16S { memarg } => ExprKind::Load {
            opcode: Opcode("i64.load16_s"),
            offset: memarg.offset as u32,
        },
        Operator::I64Load16U { memarg } => ExprKind::Load {
            opcode: Opcode("i64.load16_u"),
            offset: memarg.offset as u32,
        },
        Operator::I64Load32S { memarg } => ExprKind::Load {
            opcode: Opcode("i64.load32_s"),
            offset: memarg.offset as u32,
        },
        Operator::I64Load32U { memarg } => ExprKind::Load {
            opcode: Opcode("i64.load32_u"),
            offset: memarg.offset as u32,
        },

        // === Memory stores ===
        Operator::I32Store { memarg } => ExprKind::Store {
            opcode: Opcode("i32.store"),
            offset: memarg.offset as u32,
        },
        Operator::I64Store { memarg } => ExprKind::Store {
            opcode: Opcode("i64.store"),
            offset: memarg.offset as u32,
        },
        Operator::F32Store { memarg } => ExprKind::Store {
            opcode: Opcode("f32.store"),
            offset: memarg.offset as u32,
        },
        Operator::F64Store { memarg } => ExprKind::Store {
            opcode: Opcode("f64.store"),
            offset: memarg.offset as u32,
        },
        Operator::I32Store8 { memarg } => ExprKind::Store {
            opcode: Opcode("i32.store8"),
            offset: memarg.offset as u32,
        },
        Operator::I32Store16 { memarg } => ExprKind::Store {
            opcode: Opcode("i32.store16"),
            offset: memarg.offset as u32,
        },
        Operator::I64Store8 { memarg } => ExprKind::Store {
            opcode: Opcode("i64.store8"),
            offset: memarg.offset as u32,
        },
        Operator::I64Store16 { memarg } => ExprKind::Store {
            opcode: Opcode("i64.store16"),
            offset: memarg.offset as u32,
        },
        Operator::I64Store32 { memarg } => ExprKind::Store {
            opcode: Opcode("i64.store32"),
            offset: memarg.offset as u32,
        },

        other => bail!("unsupported operator: {:?}", other),
    };
    Ok(kind)
}

/// Parse a WebAssembly binary into the structured module the builders consume.
pub fn parse_wasm(wasm_bytes: &[u8]) -> Result<ParsedModule> {
    let parser = Parser::new(0);

    let mut types: Vec<FuncSig> = Vec::new();
    let mut function_types: Vec<u32> = Vec::new();
    let mut import_funcs: Vec<(String, u32)> = Vec::new(); // (field name, type idx)
    let mut defined: Vec<(u32, Vec<WasmType>, Vec<Expr>)> = Vec::new();
    let mut globals: Vec<GlobalInfo> = Vec::new();
    let mut export_names: Vec<(u32, String)> = Vec::new();
    let mut start_function: Option<u32> = None;
    let mut bodies = BodyBuilder::new();

    for payload in parser.parse_all(wasm_bytes) {
        let payload = payload.context("parsing wasm payload")?;

        match payload {
            Payload::TypeSection(reader) => {
                for rec_group in reader {
                    let rec_group = rec_group.context("reading rec group")?;
                    for sub_type in rec_group.types() {
                        match &sub_type.composite_type.inner {
                            wasmparser::CompositeInnerType::Func(func_ty) => {
                                let params = func_ty
                                    .params()
                                    .iter()
                                    .map(|vt| wasm_type(*vt))
                                    .collect::<Result<Vec<_>>>()?;
                                let results = func_ty
                                    .results()
                                    .iter()
                                    .map(|vt| wasm_type(*vt))
                                    .collect::<Result<Vec<_>>>()?;
                                types.push(FuncSig { params, results });
                            }
                            _ => bail!("non-function types not supported"),
                        }
                    }
                }
            }

            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.context("reading import")?;
                    match import.ty {
                        TypeRef::Func(type_idx) => {
                            import_funcs.push((import.name.to_string(), type_idx));
                        }
                        TypeRef::Global(global_ty) => {
                            globals.push(GlobalInfo {
                                val_type: wasm_type(global_ty.content_type)?,
                                mutable: global_ty.mutable,
                            });
                        }
                        // Memory and table imports don't surface in the graph.
                        _ => {}
                    }
                }
            }

            Payload::FunctionSection(reader) => {
                for func_type_idx in reader {
                    let idx = func_type_idx.context("reading function type index")?;
                    function_types.push(idx);
                }
            }

            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global.context("reading global")?;
                    globals.push(GlobalInfo {
                        val_type: wasm_type(global.ty.content_type)?,
                        mutable: global.ty.mutable,
                    });
                }
            }

            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.context("reading export")?;
                    if export.kind == ExternalKind::Func {
                        export_names.push((export.index, export.name.to_string()));
                    }
                }
            }

            Payload::StartSection { func, .. } => {
                start_function = Some(func);
            }

            Payload::CodeSectionEntry(body) => {
                let type_idx = *function_types
                    .get(defined.len())
                    .context("code entry without matching function section entry")?;

                let mut locals = Vec::new();
                let locals_reader = body.get_locals_reader().context("getting locals reader")?;
                for local in locals_reader {
                    let (count, val_type) = local.context("reading local")?;
                    let ty = wasm_type(val_type)?;
                    for _ in 0..count {
                        locals.push(ty);
                    }
                }

                let exprs = bodies
                    .build(&body)
                    .with_context(|| format!("rebuilding body of function {}", defined.len()))?;
                defined.push((type_idx, locals, exprs));
            }

            _ => {}
        }
    }

    // Assemble the unified function index space: imports first, then defined
    // functions named from the export section (first export wins) or by index.
    let mut functions = Vec::with_capacity(import_funcs.len() + defined.len());
    let num_imported_functions = import_funcs.len() as u32;

    for (index, (name, type_idx)) in import_funcs.into_iter().enumerate() {
        functions.push(ParsedFunction {
            name,
            index: index as u32,
            type_idx,
            locals: Vec::new(),
            body: Vec::new(),
            is_import: true,
        });
    }

    for (local_idx, (type_idx, locals, body)) in defined.into_iter().enumerate() {
        let index = num_imported_functions + local_idx as u32;
        let name = export_names
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, n)| n.clone())
            .unwrap_or_else(|| format!("$f{}", index));
        functions.push(ParsedFunction {
            name,
            index,
            type_idx,
            locals,
            body,
            is_import: false,
        });
    }

    for func in &functions {
        if func.type_idx as usize >= types.len() {
            bail!(
                "function {} references unknown type {}",
                func.index,
                func.type_idx
            );
        }
    }
    if let Some(start) = start_function {
        if start as usize >= functions.len() {
            bail!("start section references unknown function {}", start);
        }
    }

    Ok(ParsedModule {
        types,
        functions,
        globals,
        start_function,
        num_imported_functions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(wat: &str) -> ParsedModule {
        let wasm = wat::parse_str(wat).unwrap();
        parse_wasm(&wasm).unwrap()
    }

    #[test]
    fn parse_minimal_module() {
        let module = parse("(module)");
        assert_eq!(module.types.len(), 0);
        assert_eq!(module.functions.len(), 0);
    }

    #[test]
    fn parse_add_function() {
        let module = parse(
            r#"
            (module
                (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add
                )
            )
        "#,
        );
        assert_eq!(module.functions.len(), 1);
        let f = &module.functions[0];
        assert_eq!(f.name, "add");
        assert!(!f.is_import);
        assert_eq!(f.body.len(), 3);
        assert!(matches!(f.body[0].kind, ExprKind::LocalGet { index: 0 }));
        assert!(matches!(
            f.body[2].kind,
            ExprKind::Binary(Opcode("i32.add"))
        ));
    }

    #[test]
    fn unnamed_function_gets_index_name() {
        let module = parse("(module (func))");
        assert_eq!(module.functions[0].name, "$f0");
    }

    #[test]
    fn imports_precede_defined_functions() {
        let module = parse(
            r#"
            (module
                (import "env" "log" (func (param i32)))
                (func (result i32) i32.const 42)
            )
        "#,
        );
        assert_eq!(module.num_imported_functions, 1);
        assert_eq!(module.functions.len(), 2);
        assert!(module.functions[0].is_import);
        assert_eq!(module.functions[0].name, "log");
        assert!(module.functions[0].body.is_empty());
        assert_eq!(module.functions[1].index, 1);
    }

    #[test]
    fn block_bodies_nest() {
        let module = parse(
            r#"
            (module
                (func
                    (block
                        nop
                        (loop
                            nop
                        )
                    )
                )
            )
        "#,
        );
        let body = &module.functions[0].body;
        assert_eq!(body.len(), 1);
        match &body[0].kind {
            ExprKind::Block { label, body, .. } => {
                assert_eq!(label, "$B0");
                assert_eq!(body.len(), 2);
                assert!(matches!(body[0].kind, ExprKind::Nop));
                match &body[1].kind {
                    ExprKind::Loop { label, body, .. } => {
                        assert_eq!(label, "$L0");
                        assert_eq!(body.len(), 1);
                    }
                    other => panic!("expected loop, got {:?}", other),
                }
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn branch_depths_resolve_to_labels() {
        let module = parse(
            r#"
            (module
                (func
                    (block
                        (block
                            br 0
                            br 1
                        )
                    )
                    br 0
                )
            )
        "#,
        );
        let body = &module.functions[0].body;
        let outer = match &body[0].kind {
            ExprKind::Block { body, .. } => body,
            other => panic!("expected block, got {:?}", other),
        };
        let inner = match &outer[0].kind {
            ExprKind::Block { body, .. } => body,
            other => panic!("expected block, got {:?}", other),
        };
        assert!(matches!(&inner[0].kind, ExprKind::Br { label } if label == "$B1"));
        assert!(matches!(&inner[1].kind, ExprKind::Br { label } if label == "$B0"));
        // Branch to the outermost depth leaves the function.
        assert!(matches!(&body[1].kind, ExprKind::Br { label } if label == FUNC_LABEL));
    }

    #[test]
    fn if_else_bodies_split() {
        let module = parse(
            r#"
            (module
                (func (param i32) (result i32)
                    local.get 0
                    if (result i32)
                        i32.const 1
                    else
                        i32.const 2
                    end
                )
            )
        "#,
        );
        let body = &module.functions[0].body;
        match &body[1].kind {
            ExprKind::If {
                label,
                nresults,
                then_body,
                else_body,
            } => {
                assert_eq!(label, "$I0");
                assert_eq!(*nresults, 1);
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body.as_ref().map(Vec::len), Some(1));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn if_without_else_has_no_false_body() {
        let module = parse(
            r#"
            (module
                (func (param i32)
                    local.get 0
                    if
                        nop
                    end
                )
            )
        "#,
        );
        match &module.functions[0].body[1].kind {
            ExprKind::If { else_body, .. } => assert!(else_body.is_none()),
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn br_table_targets_resolve() {
        let module = parse(
            r#"
            (module
                (func (param i32)
                    (block
                        (block
                            local.get 0
                            br_table 0 1 0 1
                        )
                    )
                )
            )
        "#,
        );
        let outer = match &module.functions[0].body[0].kind {
            ExprKind::Block { body, .. } => body,
            other => panic!("expected block, got {:?}", other),
        };
        let inner = match &outer[0].kind {
            ExprKind::Block { body, .. } => body,
            other => panic!("expected block, got {:?}", other),
        };
        match &inner[1].kind {
            ExprKind::BrTable { targets, default } => {
                assert_eq!(targets, &["$B1", "$B0", "$B1"]);
                assert_eq!(default, "$B0");
            }
            other => panic!("expected br_table, got {:?}", other),
        }
    }

    #[test]
    fn start_section_is_recorded() {
        let module = parse(
            r#"
            (module
                (func $main)
                (start $main)
            )
        "#,
        );
        assert_eq!(module.start_function, Some(0));
    }

    #[test]
    fn expr_ids_are_unique_across_functions() {
        let module = parse(
            r#"
            (module
                (func nop nop)
                (func nop)
            )
        "#,
        );
        let mut ids = Vec::new();
        for f in &module.functions {
            for e in &f.body {
                ids.push(e.id);
            }
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn locals_expand_run_lengths() {
        let module = parse(
            r#"
            (module
                (func (local i32 i32) (local f64))
            )
        "#,
        );
        assert_eq!(
            module.functions[0].locals,
            vec![WasmType::I32, WasmType::I32, WasmType::F64]
        );
    }
}
