//! Tier 2: code generation for arbitrary fusible trees.
//!
//! The tree lowers to a short opcode list (one load per distinct column,
//! one vector op per node), then the emitter produces an outer counted
//! loop stepping eight lanes per iteration:
//!
//! - prologue: round the element count up to a full lane group; the
//!   power-of-two over-allocated buffers absorb the tail lanes
//! - loop body: per-iteration loads with conversions fused in, a
//!   stack-scheduled run of vector ops, narrow, one store
//! - epilogue: return
//!
//! Register allocation is a linear scan over the post-order schedule;
//! constants live in registers hoisted above the loop. Shapes the emitter
//! cannot express (integer division, comparisons, ternary, non-constant
//! shifts) report `NotSupported` so the dispatcher can fall back.

use crate::column::AnyColumn;
use crate::error::{EngineError, Result};
use crate::expr::ast::Expr;
use crate::types::{BinOp, DataType};

use super::codebuf::ExecBuf;
use super::emitter::{Asm, Gpr, Vreg};

/// Kernel signature: `(input_base_ptrs, output_base_ptr, element_count)`
pub type KernelFn = unsafe extern "sysv64" fn(*const *const u8, *mut u8, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    I32,
    F32,
    Bf16,
}

impl Storage {
    fn tag(self) -> &'static str {
        match self {
            Storage::I32 => "i32",
            Storage::F32 => "f32",
            Storage::Bf16 => "bf16",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Domain {
    Int,
    Float,
}

fn domain_of(phys: DataType) -> Domain {
    match phys {
        DataType::I32 => Domain::Int,
        _ => Domain::Float,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum JitOp {
    /// Push the per-iteration value of input slot `slot`
    PushLeaf { slot: usize },
    /// Push hoisted constant `index`
    PushConst { index: usize },
    /// Combine the two top stack values
    Bin { op: BinOp },
    /// Shift the top stack value by an immediate
    ShiftImm { op: BinOp, amount: u8 },
    /// Round the top value through bf16 precision
    QuantizeBf16,
}

/// One distinct column input of a compiled kernel
#[derive(Debug, Clone)]
pub struct LeafBinding {
    pub name: String,
    pub storage: Storage,
}

/// Lowered program plus everything needed to key the cache
#[derive(Debug)]
pub struct Prepared {
    ops: Vec<JitOp>,
    pub leaves: Vec<LeafBinding>,
    consts: Vec<i32>,
    pub out_ty: DataType,
    pub key: String,
}

fn not_supported(why: &str) -> EngineError {
    EngineError::NotSupported(format!("jit: {}", why))
}

fn lower(
    expr: &Expr,
    machine: Domain,
    ops: &mut Vec<JitOp>,
    leaves: &mut Vec<LeafBinding>,
    consts: &mut Vec<i32>,
    column_storage: &dyn Fn(&str) -> Result<Storage>,
) -> Result<()> {
    match expr {
        Expr::ColumnRef { name, .. } => {
            let storage = column_storage(name)?;
            let slot = match leaves.iter().position(|l| l.name == *name) {
                Some(slot) => slot,
                None => {
                    leaves.push(LeafBinding {
                        name: name.clone(),
                        storage,
                    });
                    leaves.len() - 1
                }
            };
            ops.push(JitOp::PushLeaf { slot });
            Ok(())
        }
        Expr::Constant { value } => {
            let bits = match machine {
                Domain::Int => value.as_i64() as i32,
                Domain::Float => (value.as_f64() as f32).to_bits() as i32,
            };
            let index = match consts.iter().position(|&c| c == bits) {
                Some(index) => index,
                None => {
                    consts.push(bits);
                    consts.len() - 1
                }
            };
            ops.push(JitOp::PushConst { index });
            Ok(())
        }
        Expr::Cast { target, child } => {
            if domain_of(target.materialize()) != machine {
                return Err(not_supported("cast crosses compute domains"));
            }
            lower(child, machine, ops, leaves, consts, column_storage)?;
            if target.materialize() == DataType::Bf16 && machine == Domain::Float {
                ops.push(JitOp::QuantizeBf16);
            }
            Ok(())
        }
        Expr::Unary { .. } => Err(not_supported("unary op")),
        Expr::Ternary { .. } => Err(not_supported("ternary select")),
        Expr::Binary {
            op, left, right, ..
        } => {
            if op.is_comparison() || op.is_logical() {
                return Err(not_supported("comparison"));
            }
            match machine {
                Domain::Int => {
                    match op {
                        BinOp::Add
                        | BinOp::Sub
                        | BinOp::Mul
                        | BinOp::Min
                        | BinOp::Max
                        | BinOp::BitAnd
                        | BinOp::BitOr
                        | BinOp::BitXor => {}
                        BinOp::Shl | BinOp::Shr => {
                            // Only constant shift amounts have an
                            // immediate encoding
                            let Expr::Constant { value } = &**right else {
                                return Err(not_supported("non-constant shift amount"));
                            };
                            let amount = value.as_i64();
                            if !(0..=31).contains(&amount) {
                                return Err(not_supported("shift amount out of range"));
                            }
                            lower(left, machine, ops, leaves, consts, column_storage)?;
                            ops.push(JitOp::ShiftImm {
                                op: *op,
                                amount: amount as u8,
                            });
                            return Ok(());
                        }
                        _ => return Err(not_supported("integer division")),
                    }
                }
                Domain::Float => match op {
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Min
                    | BinOp::Max => {}
                    _ => return Err(not_supported("float op without a vector encoding")),
                },
            }
            lower(left, machine, ops, leaves, consts, column_storage)?;
            lower(right, machine, ops, leaves, consts, column_storage)?;
            ops.push(JitOp::Bin { op: *op });
            Ok(())
        }
    }
}

/// Lower a typed tree into a cacheable program
pub fn prepare(expr: &Expr, column_storage: &dyn Fn(&str) -> Result<Storage>) -> Result<Prepared> {
    let root_ty = expr
        .result_type()
        .ok_or_else(|| EngineError::Internal("expression not typed".to_string()))?;
    let out_ty = root_ty.materialize();
    let machine = domain_of(out_ty);

    let mut ops = Vec::new();
    let mut leaves = Vec::new();
    let mut consts = Vec::new();
    lower(expr, machine, &mut ops, &mut leaves, &mut consts, column_storage)?;

    if leaves.is_empty() {
        return Err(not_supported("expression references no columns"));
    }

    // Normalized shape key: opcode stream, leaf storage types, constant
    // bits, output type
    let mut key = String::new();
    key.push_str("out=");
    key.push_str(out_ty.keyword());
    for op in &ops {
        match op {
            JitOp::PushLeaf { slot } => {
                key.push_str(";L");
                key.push_str(&slot.to_string());
                key.push(':');
                key.push_str(leaves[*slot].storage.tag());
            }
            JitOp::PushConst { index } => {
                key.push_str(";C");
                key.push_str(&format!("{:08x}", consts[*index] as u32));
            }
            JitOp::Bin { op } => {
                key.push_str(";B");
                key.push_str(op.symbol());
            }
            JitOp::ShiftImm { op, amount } => {
                key.push_str(";S");
                key.push_str(op.symbol());
                key.push_str(&amount.to_string());
            }
            JitOp::QuantizeBf16 => key.push_str(";Q"),
        }
    }

    Ok(Prepared {
        ops,
        leaves,
        consts,
        out_ty,
        key,
    })
}

/// A compiled, executable kernel; the code pages live as long as the
/// kernel
pub struct JitKernel {
    buf: ExecBuf,
    /// Inputs the kernel expects, in slot order
    pub leaves: Vec<LeafBinding>,
    pub out_ty: DataType,
}

impl JitKernel {
    /// # Safety
    /// `inputs` must hold one valid base pointer per leaf, each with
    /// capacity for `n` rounded up to a full lane group, and `out` must
    /// have the same rounded capacity in the kernel's output type.
    pub unsafe fn call(&self, inputs: &[*const u8], out: *mut u8, n: usize) {
        let f: KernelFn = unsafe { std::mem::transmute(self.buf.as_ptr()) };
        unsafe { f(inputs.as_ptr(), out, n) }
    }
}

const SCRATCH0: Vreg = 14;
const SCRATCH1: Vreg = 15;
/// Highest register index available to constants and leaves
const PERSISTENT_TOP: Vreg = 13;

struct RegPlan {
    /// Constant index -> register
    const_regs: Vec<Vreg>,
    /// Leaf slot -> register
    leaf_regs: Vec<Vreg>,
    /// First stack register
    stack_base: Vreg,
}

fn plan_registers(prepared: &Prepared) -> Result<RegPlan> {
    let persistent = prepared.consts.len() + prepared.leaves.len();
    if persistent > PERSISTENT_TOP as usize + 1 {
        return Err(EngineError::CodegenError(
            "register pressure exceeds the vector file".to_string(),
        ));
    }
    let mut next: i32 = PERSISTENT_TOP as i32;
    let mut const_regs = Vec::new();
    for _ in 0..prepared.consts.len() {
        const_regs.push(next as Vreg);
        next -= 1;
    }
    let mut leaf_regs = Vec::new();
    for _ in 0..prepared.leaves.len() {
        leaf_regs.push(next as Vreg);
        next -= 1;
    }
    let stack_limit = (next + 1) as usize;
    // Simulate stack depth over the schedule
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    for op in &prepared.ops {
        match op {
            JitOp::PushLeaf { .. } | JitOp::PushConst { .. } => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            JitOp::Bin { .. } => {
                if depth < 2 {
                    return Err(EngineError::Internal("jit stack underflow".to_string()));
                }
                depth -= 1;
            }
            JitOp::ShiftImm { .. } | JitOp::QuantizeBf16 => {
                if depth == 0 {
                    return Err(EngineError::Internal("jit stack underflow".to_string()));
                }
            }
        }
    }
    if depth != 1 {
        return Err(EngineError::Internal("jit stack imbalance".to_string()));
    }
    if max_depth > stack_limit {
        return Err(EngineError::CodegenError(
            "register pressure exceeds the vector file".to_string(),
        ));
    }
    Ok(RegPlan {
        const_regs,
        leaf_regs,
        stack_base: 0,
    })
}

/// Emit the bf16 round-to-nearest-even rounding of the f32 bit patterns
/// in `target`, leaving the rounded value shifted down to the low 16 bits
fn emit_bf16_round(asm: &mut Asm, target: Vreg) {
    // lsb of the surviving mantissa
    asm.vpsrld(SCRATCH0, target, 16);
    asm.vpcmpeqd(SCRATCH1, SCRATCH1, SCRATCH1);
    asm.vpsrld(SCRATCH1, SCRATCH1, 31); // lanes of 1
    asm.vpand(SCRATCH0, SCRATCH0, SCRATCH1);
    asm.vpcmpeqd(SCRATCH1, SCRATCH1, SCRATCH1);
    asm.vpsrld(SCRATCH1, SCRATCH1, 17); // lanes of 0x7fff
    asm.vpaddd(SCRATCH0, SCRATCH0, SCRATCH1);
    asm.vpaddd(target, target, SCRATCH0);
    asm.vpsrld(target, target, 16);
}

/// Generate native code for a prepared program
pub fn emit(prepared: &Prepared) -> Result<JitKernel> {
    #[cfg(not(all(unix, target_arch = "x86_64")))]
    {
        let _ = prepared;
        return Err(EngineError::CodegenError(
            "code generation requires an x86-64 unix host".to_string(),
        ));
    }
    #[cfg(all(unix, target_arch = "x86_64"))]
    {
        if !crate::column::simd::avx2_available() {
            return Err(EngineError::CodegenError(
                "host does not support AVX2".to_string(),
            ));
        }
        let plan = plan_registers(prepared)?;
        let machine = domain_of(prepared.out_ty);
        let mut asm = Asm::new();

        // r9 = element count rounded up to a full lane group; the
        // power-of-two output capacity absorbs the extra lanes
        asm.mov_rr(Gpr::R9, Gpr::Rdx);
        asm.add_ri8(Gpr::R9, 7);
        asm.and_ri8(Gpr::R9, -8);

        // Hoist constants above the loop
        for (index, &bits) in prepared.consts.iter().enumerate() {
            let reg = plan.const_regs[index];
            asm.mov_ri32(Gpr::Rax, bits);
            asm.vmovd_from_gpr(reg, Gpr::Rax);
            asm.vbroadcastd(reg, reg);
        }

        asm.xor_rr(Gpr::R8, Gpr::R8);
        let loop_top = asm.pos();
        asm.cmp_rr(Gpr::R8, Gpr::R9);
        let exit_site = asm.jae_forward();

        // One load per distinct column, conversion fused in
        for (slot, leaf) in prepared.leaves.iter().enumerate() {
            let reg = plan.leaf_regs[slot];
            asm.mov_load(Gpr::Rax, Gpr::Rdi, (slot * 8) as i32);
            match (leaf.storage, machine) {
                (Storage::I32, Domain::Int) => {
                    asm.vload256(reg, Gpr::Rax, Gpr::R8, 2);
                }
                (Storage::I32, Domain::Float) => {
                    asm.vload256(reg, Gpr::Rax, Gpr::R8, 2);
                    asm.vcvtdq2ps(reg, reg);
                }
                (Storage::F32, Domain::Float) => {
                    asm.vload256(reg, Gpr::Rax, Gpr::R8, 2);
                }
                (Storage::F32, Domain::Int) => {
                    asm.vload256(reg, Gpr::Rax, Gpr::R8, 2);
                    asm.vcvttps2dq(reg, reg);
                }
                (Storage::Bf16, Domain::Float) => {
                    asm.vload_zx16(reg, Gpr::Rax, Gpr::R8, 1);
                    asm.vpslld(reg, reg, 16);
                }
                (Storage::Bf16, Domain::Int) => {
                    asm.vload_zx16(reg, Gpr::Rax, Gpr::R8, 1);
                    asm.vpslld(reg, reg, 16);
                    asm.vcvttps2dq(reg, reg);
                }
            }
        }

        // Stack-scheduled vector ops
        let mut depth: usize = 0;
        for op in &prepared.ops {
            match op {
                JitOp::PushLeaf { slot } => {
                    asm.vmov(plan.stack_base + depth as Vreg, plan.leaf_regs[*slot]);
                    depth += 1;
                }
                JitOp::PushConst { index } => {
                    asm.vmov(plan.stack_base + depth as Vreg, plan.const_regs[*index]);
                    depth += 1;
                }
                JitOp::Bin { op } => {
                    let b = plan.stack_base + (depth - 1) as Vreg;
                    let a = plan.stack_base + (depth - 2) as Vreg;
                    match (machine, op) {
                        (Domain::Int, BinOp::Add) => asm.vpaddd(a, a, b),
                        (Domain::Int, BinOp::Sub) => asm.vpsubd(a, a, b),
                        (Domain::Int, BinOp::Mul) => asm.vpmulld(a, a, b),
                        (Domain::Int, BinOp::Min) => asm.vpminsd(a, a, b),
                        (Domain::Int, BinOp::Max) => asm.vpmaxsd(a, a, b),
                        (Domain::Int, BinOp::BitAnd) => asm.vpand(a, a, b),
                        (Domain::Int, BinOp::BitOr) => asm.vpor(a, a, b),
                        (Domain::Int, BinOp::BitXor) => asm.vpxor(a, a, b),
                        (Domain::Float, BinOp::Add) => asm.vaddps(a, a, b),
                        (Domain::Float, BinOp::Sub) => asm.vsubps(a, a, b),
                        (Domain::Float, BinOp::Mul) => asm.vmulps(a, a, b),
                        (Domain::Float, BinOp::Div) => asm.vdivps(a, a, b),
                        (Domain::Float, BinOp::Min) => asm.vminps(a, a, b),
                        (Domain::Float, BinOp::Max) => asm.vmaxps(a, a, b),
                        _ => {
                            return Err(EngineError::Internal(
                                "unverifiable op reached emission".to_string(),
                            ));
                        }
                    }
                    depth -= 1;
                }
                JitOp::ShiftImm { op, amount } => {
                    let t = plan.stack_base + (depth - 1) as Vreg;
                    match op {
                        BinOp::Shl => asm.vpslld(t, t, *amount),
                        // Signed shift right is arithmetic
                        _ => asm.vpsrad(t, t, *amount),
                    }
                }
                JitOp::QuantizeBf16 => {
                    let t = plan.stack_base + (depth - 1) as Vreg;
                    emit_bf16_round(&mut asm, t);
                    asm.vpslld(t, t, 16);
                }
            }
        }
        let result = plan.stack_base;

        // Narrow and store
        match prepared.out_ty {
            DataType::I32 | DataType::F32 => {
                asm.vstore256(result, Gpr::Rsi, Gpr::R8, 2);
            }
            DataType::Bf16 => {
                emit_bf16_round(&mut asm, result);
                asm.vpackusdw(result, result, result);
                asm.vpermq(result, result, 0xd8);
                asm.vstore128(result, Gpr::Rsi, Gpr::R8, 1);
            }
            other => {
                return Err(EngineError::Internal(format!(
                    "non-physical output {}",
                    other
                )));
            }
        }

        asm.add_ri8(Gpr::R8, 8);
        asm.jmp_back(loop_top);
        asm.patch_forward(exit_site);
        asm.ret();

        let code = asm.finish();
        let buf = ExecBuf::new(&code)?;
        Ok(JitKernel {
            buf,
            leaves: prepared.leaves.clone(),
            out_ty: prepared.out_ty,
        })
    }
}

/// Base pointer of a column's value buffer for kernel invocation
pub fn column_base_ptr(col: &AnyColumn) -> *const u8 {
    match col {
        AnyColumn::I32(c) => c.as_ptr() as *const u8,
        AnyColumn::F32(c) => c.as_ptr() as *const u8,
        AnyColumn::Bf16(c) => c.as_ptr() as *const u8,
    }
}

/// Storage lookup helper for [`prepare`] backed by an environment
pub fn storage_of(col: &AnyColumn) -> Storage {
    match col {
        AnyColumn::I32(_) => Storage::I32,
        AnyColumn::F32(_) => Storage::F32,
        AnyColumn::Bf16(_) => Storage::Bf16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::infer::infer;
    use crate::expr::parser::parse;
    use std::collections::HashMap;

    fn storage_env() -> HashMap<String, Storage> {
        let mut m = HashMap::new();
        m.insert("a".to_string(), Storage::I32);
        m.insert("b".to_string(), Storage::I32);
        m.insert("f".to_string(), Storage::F32);
        m.insert("h".to_string(), Storage::Bf16);
        m
    }

    fn prepare_str(src: &str) -> Result<Prepared> {
        let mut types = HashMap::new();
        types.insert("a".to_string(), DataType::I32);
        types.insert("b".to_string(), DataType::I32);
        types.insert("f".to_string(), DataType::F32);
        types.insert("h".to_string(), DataType::Bf16);
        let mut e = parse(src, &types).unwrap();
        infer(&mut e).unwrap();
        let storage = storage_env();
        prepare(&e, &|name| {
            storage
                .get(name)
                .copied()
                .ok_or_else(|| EngineError::Internal("missing".to_string()))
        })
    }

    #[test]
    fn test_prepare_dedupes_leaves() {
        let p = prepare_str("a + a + b").unwrap();
        assert_eq!(p.leaves.len(), 2);
        assert_eq!(p.leaves[0].name, "a");
        assert_eq!(p.leaves[1].name, "b");
    }

    #[test]
    fn test_prepare_key_distinguishes_shapes() {
        let k1 = prepare_str("a + b").unwrap().key;
        let k2 = prepare_str("a - b").unwrap().key;
        let k3 = prepare_str("a + b").unwrap().key;
        assert_ne!(k1, k2);
        assert_eq!(k1, k3);
    }

    #[test]
    fn test_prepare_key_includes_constants() {
        let k1 = prepare_str("a + 3").unwrap().key;
        let k2 = prepare_str("a + 4").unwrap().key;
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_unsupported_shapes_report() {
        assert!(matches!(
            prepare_str("a / b").unwrap_err(),
            EngineError::NotSupported(_)
        ));
        assert!(matches!(
            prepare_str("a < b").unwrap_err(),
            EngineError::NotSupported(_)
        ));
        assert!(matches!(
            prepare_str("a << b").unwrap_err(),
            EngineError::NotSupported(_)
        ));
        assert!(matches!(
            prepare_str("1 + 2").unwrap_err(),
            EngineError::NotSupported(_)
        ));
    }

    #[test]
    fn test_constant_shift_lowers_to_immediate() {
        let p = prepare_str("a << 10").unwrap();
        assert!(p
            .ops
            .iter()
            .any(|op| matches!(op, JitOp::ShiftImm { op: BinOp::Shl, amount: 10 })));
    }

    #[cfg(all(unix, target_arch = "x86_64"))]
    mod native {
        use super::*;
        use crate::column::Column;

        fn run_kernel(src: &str, env: &crate::exec::Env, n: usize) -> Option<Vec<f64>> {
            if !crate::column::simd::avx2_available() {
                return None;
            }
            let mut types = HashMap::new();
            for (k, v) in env {
                types.insert(k.clone(), v.data_type());
            }
            let mut e = parse(src, &types).unwrap();
            infer(&mut e).unwrap();
            let prepared = prepare(&e, &|name| {
                Ok(storage_of(env.get(name).unwrap()))
            })
            .unwrap();
            let kernel = emit(&prepared).unwrap();
            let inputs: Vec<*const u8> = kernel
                .leaves
                .iter()
                .map(|l| column_base_ptr(env.get(&l.name).unwrap()))
                .collect();
            let out = match kernel.out_ty {
                DataType::I32 => {
                    let mut c = Column::<i32>::with_len(n).unwrap();
                    unsafe { kernel.call(&inputs, c.as_mut_ptr() as *mut u8, n) };
                    AnyColumn::I32(c)
                }
                DataType::F32 => {
                    let mut c = Column::<f32>::with_len(n).unwrap();
                    unsafe { kernel.call(&inputs, c.as_mut_ptr() as *mut u8, n) };
                    AnyColumn::F32(c)
                }
                _ => {
                    let mut c = Column::<crate::column::Bf16>::with_len(n).unwrap();
                    unsafe { kernel.call(&inputs, c.as_mut_ptr() as *mut u8, n) };
                    AnyColumn::Bf16(c)
                }
            };
            Some((0..n).map(|i| {
                match &out {
                    AnyColumn::I32(c) => c.value_unchecked(i) as f64,
                    AnyColumn::F32(c) => c.value_unchecked(i) as f64,
                    AnyColumn::Bf16(c) => c.value_unchecked(i).to_f32() as f64,
                }
            }).collect())
        }

        #[test]
        fn test_generated_int_kernel() {
            let mut env = crate::exec::Env::new();
            let n = 13;
            env.insert(
                "a".to_string(),
                AnyColumn::I32(Column::from_slice(&(0..n as i32).collect::<Vec<_>>()).unwrap()),
            );
            env.insert(
                "b".to_string(),
                AnyColumn::I32(
                    Column::from_slice(&(0..n as i32).map(|i| i * 10).collect::<Vec<_>>())
                        .unwrap(),
                ),
            );
            let Some(values) = run_kernel("a * 3 + b", &env, n) else {
                return;
            };
            for i in 0..n {
                assert_eq!(values[i], (i * 3 + i * 10) as f64, "lane {}", i);
            }
        }

        #[test]
        fn test_generated_float_kernel_with_conversion() {
            let mut env = crate::exec::Env::new();
            let n = 9;
            env.insert(
                "a".to_string(),
                AnyColumn::I32(Column::from_slice(&(0..n as i32).collect::<Vec<_>>()).unwrap()),
            );
            env.insert(
                "f".to_string(),
                AnyColumn::F32(
                    Column::from_slice(&(0..n).map(|i| i as f32 + 0.5).collect::<Vec<_>>())
                        .unwrap(),
                ),
            );
            let Some(values) = run_kernel("f32(a) + f", &env, n) else {
                return;
            };
            for i in 0..n {
                assert_eq!(values[i], i as f64 + i as f64 + 0.5, "lane {}", i);
            }
        }

        #[test]
        fn test_generated_shift_kernel() {
            let mut env = crate::exec::Env::new();
            let n = 16;
            env.insert(
                "a".to_string(),
                AnyColumn::I32(Column::from_slice(&vec![2i32; n]).unwrap()),
            );
            let Some(values) = run_kernel("a << 10", &env, n) else {
                return;
            };
            assert!(values.iter().all(|&v| v == 2048.0));
        }

        #[test]
        fn test_generated_bf16_kernel() {
            let mut env = crate::exec::Env::new();
            let n = 8;
            let vals: Vec<crate::column::Bf16> =
                (0..n).map(|i| crate::column::Bf16::from_f32(i as f32 + 0.5)).collect();
            env.insert(
                "h".to_string(),
                AnyColumn::Bf16(Column::from_slice(&vals).unwrap()),
            );
            let Some(values) = run_kernel("h + h", &env, n) else {
                return;
            };
            for i in 0..n {
                assert_eq!(values[i], (i as f64 + 0.5) * 2.0, "lane {}", i);
            }
        }
    }
}
