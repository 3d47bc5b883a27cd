//! Tier 1: register-stack evaluation of bounded simple trees.
//!
//! The tree is compiled post-order into opcodes over the domain primitives;
//! execution walks the columns one lane group at a time, holding
//! intermediates in a bounded stack of SIMD-register-shaped values instead
//! of materializing them to memory. The program is monomorphized per
//! compute domain, so the group loop carries no type dispatch. Leaf casts
//! fold into the loads.
//!
//! Trees that mix compute domains mid-expression (for example an f32
//! comparison feeding an i32 result) are rejected with `NotSupported`; the
//! dispatcher falls back to materializing execution.

use tracing::trace;

use crate::bitmap::PresenceBitmap;
use crate::column::{AnyColumn, Bf16, Column, ComputeScalar, ElementDomain, domain};
use crate::error::{EngineError, Result};
use crate::expr::ast::{ConstValue, Expr};
use crate::types::{BinOp, DataType, UnOp};

use super::Env;

/// Maximum stack depth; the tier precondition (at most eight nodes) keeps
/// real programs well under it
const MAX_STACK: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
enum StorageKind {
    I32,
    F32,
    Bf16,
}

#[derive(Debug, Clone, PartialEq)]
enum StackOp {
    /// Load a lane group from input `input` and convert it into the
    /// machine's compute domain
    Load { input: usize, kind: StorageKind },
    /// Broadcast a constant across the lanes
    SplatInt(i64),
    SplatFloat(f64),
    /// Round the top of an f32 machine through bf16 precision
    QuantizeBf16,
    Binary(BinOp),
    Unary(UnOp),
}

struct Program<'e> {
    ops: Vec<StackOp>,
    inputs: Vec<&'e AnyColumn>,
}

fn machine_is_integral(phys: DataType) -> bool {
    phys == DataType::I32
}

/// Compute-domain bucket of a physical type
fn domain_of(phys: DataType) -> DataType {
    match phys {
        DataType::I32 => DataType::I32,
        _ => DataType::F32,
    }
}

fn not_supported(why: &str) -> EngineError {
    EngineError::NotSupported(format!("stack machine: {}", why))
}

fn compile<'e>(
    expr: &Expr,
    env: &'e Env,
    machine: DataType,
    program: &mut Program<'e>,
) -> Result<()> {
    match expr {
        Expr::ColumnRef { name, .. } => {
            let column = env.get(name).ok_or_else(|| {
                EngineError::Internal(format!("column '{}' vanished from the environment", name))
            })?;
            let kind = match column.data_type() {
                DataType::I32 => StorageKind::I32,
                DataType::F32 => StorageKind::F32,
                DataType::Bf16 => StorageKind::Bf16,
                other => {
                    return Err(EngineError::Internal(format!(
                        "non-physical column type {}",
                        other
                    )));
                }
            };
            let input = program.inputs.len();
            program.inputs.push(column);
            program.ops.push(StackOp::Load { input, kind });
            Ok(())
        }
        Expr::Constant { value } => {
            program.ops.push(match value {
                ConstValue::Int(v) => StackOp::SplatInt(*v),
                ConstValue::Bool(v) => StackOp::SplatInt(*v as i64),
                ConstValue::Float(v) => StackOp::SplatFloat(*v),
            });
            Ok(())
        }
        Expr::Cast { target, child } => {
            if domain_of(target.materialize()) != domain_of(machine) {
                return Err(not_supported("cast crosses compute domains"));
            }
            compile(child, env, machine, program)?;
            if target.materialize() == DataType::Bf16 && domain_of(machine) == DataType::F32 {
                program.ops.push(StackOp::QuantizeBf16);
            }
            Ok(())
        }
        Expr::Unary { op, child, .. } => {
            compile(child, env, machine, program)?;
            program.ops.push(StackOp::Unary(*op));
            Ok(())
        }
        Expr::Binary {
            op, left, right, ..
        } => {
            if op.is_comparison() || op.is_logical() {
                // Operand lanes must already live in the machine domain
                for side in [left, right] {
                    let ty = side
                        .result_type()
                        .ok_or_else(|| EngineError::Internal("untyped operand".to_string()))?;
                    if domain_of(ty.materialize()) != domain_of(machine) {
                        return Err(not_supported("comparison operands cross domains"));
                    }
                }
            }
            if op.is_bitwise() && !machine_is_integral(domain_of(machine)) {
                return Err(not_supported("bitwise op in a float machine"));
            }
            compile(left, env, machine, program)?;
            compile(right, env, machine, program)?;
            program.ops.push(StackOp::Binary(*op));
            Ok(())
        }
        Expr::Ternary { .. } => Err(not_supported("ternary select")),
    }
}

trait MachineScalar: ComputeScalar {
    fn load_lane(kind: StorageKind, col: &AnyColumn, index: usize) -> Self;
    fn from_const_int(v: i64) -> Self;
    fn from_const_float(v: f64) -> Self;
    fn bitwise(op: BinOp, a: Self, b: Self) -> Self;
    fn bitnot(self) -> Self;
    fn quantize_bf16(self) -> Self;
}

impl MachineScalar for i32 {
    #[inline]
    fn load_lane(kind: StorageKind, col: &AnyColumn, index: usize) -> i32 {
        match (kind, col) {
            (StorageKind::I32, AnyColumn::I32(c)) => c.value_unchecked(index),
            (StorageKind::F32, AnyColumn::F32(c)) => c.value_unchecked(index) as i32,
            (StorageKind::Bf16, AnyColumn::Bf16(c)) => c.value_unchecked(index).to_f32() as i32,
            _ => 0,
        }
    }
    #[inline]
    fn from_const_int(v: i64) -> i32 {
        v as i32
    }
    #[inline]
    fn from_const_float(v: f64) -> i32 {
        v as i32
    }
    #[inline]
    fn bitwise(op: BinOp, a: i32, b: i32) -> i32 {
        match op {
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor => a ^ b,
            BinOp::Shl => a.wrapping_shl(b as u32),
            BinOp::Shr => a.wrapping_shr(b as u32),
            _ => a,
        }
    }
    #[inline]
    fn bitnot(self) -> i32 {
        !self
    }
    #[inline]
    fn quantize_bf16(self) -> i32 {
        self
    }
}

impl MachineScalar for f32 {
    #[inline]
    fn load_lane(kind: StorageKind, col: &AnyColumn, index: usize) -> f32 {
        match (kind, col) {
            (StorageKind::I32, AnyColumn::I32(c)) => c.value_unchecked(index) as f32,
            (StorageKind::F32, AnyColumn::F32(c)) => c.value_unchecked(index),
            (StorageKind::Bf16, AnyColumn::Bf16(c)) => c.value_unchecked(index).to_f32(),
            _ => 0.0,
        }
    }
    #[inline]
    fn from_const_int(v: i64) -> f32 {
        v as f32
    }
    #[inline]
    fn from_const_float(v: f64) -> f32 {
        v as f32
    }
    #[inline]
    fn bitwise(_op: BinOp, a: f32, _b: f32) -> f32 {
        a
    }
    #[inline]
    fn bitnot(self) -> f32 {
        self
    }
    #[inline]
    fn quantize_bf16(self) -> f32 {
        Bf16::from_f32(self).to_f32()
    }
}

#[inline]
fn load_group<C: MachineScalar>(
    kind: StorageKind,
    col: &AnyColumn,
    start: usize,
    n: usize,
) -> [C; 8] {
    std::array::from_fn(|lane| {
        let index = start + lane;
        if index < n.min(col.len()) {
            C::load_lane(kind, col, index)
        } else {
            C::ADD_IDENTITY
        }
    })
}

#[inline]
fn apply_binary<C: MachineScalar>(
    op: BinOp,
    a: [C; 8],
    b: [C; 8],
    mask: u8,
    integral: bool,
) -> Result<[C; 8]> {
    if integral && matches!(op, BinOp::Div | BinOp::Mod) {
        for lane in 0..8 {
            if mask & (1 << lane) != 0 && b[lane] == C::ADD_IDENTITY {
                return Err(EngineError::DivisionByZero);
            }
        }
        let safe: [C; 8] = std::array::from_fn(|lane| {
            if b[lane] == C::ADD_IDENTITY {
                C::MUL_IDENTITY
            } else {
                b[lane]
            }
        });
        return Ok(match op {
            BinOp::Div => domain::map2(a, safe, C::div),
            _ => domain::map2(a, safe, C::rem),
        });
    }
    Ok(match op {
        BinOp::Add => domain::map2(a, b, C::add),
        BinOp::Sub => domain::map2(a, b, C::sub),
        BinOp::Mul => domain::map2(a, b, C::mul),
        BinOp::Div => domain::map2(a, b, C::div),
        BinOp::Mod => domain::map2(a, b, C::rem),
        BinOp::Min => domain::map2(a, b, C::min_of),
        BinOp::Max => domain::map2(a, b, C::max_of),
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
            std::array::from_fn(|lane| C::bitwise(op, a[lane], b[lane]))
        }
        BinOp::Eq => std::array::from_fn(|lane| C::from_const_int((a[lane] == b[lane]) as i64)),
        BinOp::Ne => std::array::from_fn(|lane| C::from_const_int((a[lane] != b[lane]) as i64)),
        BinOp::Lt => std::array::from_fn(|lane| C::from_const_int((a[lane] < b[lane]) as i64)),
        BinOp::Le => std::array::from_fn(|lane| C::from_const_int((a[lane] <= b[lane]) as i64)),
        BinOp::Gt => std::array::from_fn(|lane| C::from_const_int((a[lane] > b[lane]) as i64)),
        BinOp::Ge => std::array::from_fn(|lane| C::from_const_int((a[lane] >= b[lane]) as i64)),
        BinOp::LogAnd => std::array::from_fn(|lane| {
            C::from_const_int((a[lane].is_truthy() && b[lane].is_truthy()) as i64)
        }),
        BinOp::LogOr => std::array::from_fn(|lane| {
            C::from_const_int((a[lane].is_truthy() || b[lane].is_truthy()) as i64)
        }),
    })
}

fn run<D>(program: &Program<'_>, machine_integral: bool) -> Result<Column<D>>
where
    D: ElementDomain,
    D::Compute: MachineScalar,
{
    if program.inputs.is_empty() {
        return Err(not_supported("expression references no columns"));
    }
    let n = program
        .inputs
        .iter()
        .map(|c| c.len())
        .min()
        .unwrap_or(0);

    let mut presence = PresenceBitmap::with_len(n, true);
    for input in &program.inputs {
        presence &= input.presence();
    }

    let mut out = Column::<D>::with_len(n)?;
    let mut stack: Vec<[D::Compute; 8]> = Vec::with_capacity(MAX_STACK);

    let mut i = 0;
    while i < n {
        let mask = presence.group8(i);
        stack.clear();
        for op in &program.ops {
            match op {
                StackOp::Load { input, kind } => {
                    if stack.len() == MAX_STACK {
                        return Err(EngineError::Internal("register stack overflow".to_string()));
                    }
                    stack.push(load_group(*kind, program.inputs[*input], i, n));
                }
                StackOp::SplatInt(v) => {
                    stack.push([<D::Compute>::from_const_int(*v); 8]);
                }
                StackOp::SplatFloat(v) => {
                    stack.push([<D::Compute>::from_const_float(*v); 8]);
                }
                StackOp::QuantizeBf16 => {
                    let top = stack
                        .last_mut()
                        .ok_or_else(|| EngineError::Internal("stack underflow".to_string()))?;
                    *top = top.map(|v| v.quantize_bf16());
                }
                StackOp::Unary(op) => {
                    let top = stack
                        .last_mut()
                        .ok_or_else(|| EngineError::Internal("stack underflow".to_string()))?;
                    *top = match op {
                        UnOp::BitNot => top.map(|v| v.bitnot()),
                        UnOp::LogNot => top
                            .map(|v| <D::Compute>::from_const_int(!v.is_truthy() as i64)),
                    };
                }
                StackOp::Binary(op) => {
                    let b = stack
                        .pop()
                        .ok_or_else(|| EngineError::Internal("stack underflow".to_string()))?;
                    let a = stack
                        .pop()
                        .ok_or_else(|| EngineError::Internal("stack underflow".to_string()))?;
                    stack.push(apply_binary(*op, a, b, mask, machine_integral)?);
                }
            }
        }
        let result = stack
            .pop()
            .ok_or_else(|| EngineError::Internal("empty program".to_string()))?;
        unsafe {
            D::store_group(out.as_mut_ptr().add(i), result);
        }
        i += 8;
    }

    *out.presence_mut() = presence;
    Ok(out)
}

/// Compile and run a tree on the register-stack machine.
///
/// `NotSupported` means the shape cannot run here (mixed domains, ternary,
/// no column inputs) and the caller should fall back.
pub fn execute(expr: &Expr, env: &Env) -> Result<AnyColumn> {
    let root_ty = expr
        .result_type()
        .ok_or_else(|| EngineError::Internal("expression not typed".to_string()))?;
    let phys = root_ty.materialize();
    let mut program = Program {
        ops: Vec::new(),
        inputs: Vec::new(),
    };
    compile(expr, env, phys, &mut program)?;
    trace!(ops = program.ops.len(), inputs = program.inputs.len(), "stack machine program");

    match phys {
        DataType::I32 => Ok(AnyColumn::I32(run::<i32>(&program, true)?)),
        DataType::F32 => Ok(AnyColumn::F32(run::<f32>(&program, false)?)),
        DataType::Bf16 => Ok(AnyColumn::Bf16(run::<Bf16>(&program, false)?)),
        other => Err(EngineError::Internal(format!(
            "non-physical materialization {}",
            other
        ))),
    }
}
