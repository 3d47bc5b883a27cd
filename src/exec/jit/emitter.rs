//! Minimal x86-64 instruction emitter for the elementwise kernel shape.
//!
//! Covers exactly the instructions the code generator needs: 64-bit
//! register moves and arithmetic for the loop skeleton, and VEX-encoded
//! AVX2 vector ops for the lane pipeline. Generated code is position
//! independent; there are no relocations.

/// General purpose registers, numbered per the hardware encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    #[inline]
    fn low3(self) -> u8 {
        self as u8 & 7
    }

    #[inline]
    fn ext(self) -> u8 {
        (self as u8 >> 3) & 1
    }
}

/// A YMM/XMM register index (0..=15)
pub type Vreg = u8;

const MAP_0F: u8 = 1;
const MAP_0F38: u8 = 2;
const MAP_0F3A: u8 = 3;

const PP_NONE: u8 = 0;
const PP_66: u8 = 1;
const PP_F3: u8 = 2;

pub struct Asm {
    code: Vec<u8>,
}

impl Asm {
    pub fn new() -> Asm {
        Asm { code: Vec::new() }
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    pub fn pos(&self) -> usize {
        self.code.len()
    }

    fn byte(&mut self, b: u8) {
        self.code.push(b);
    }

    fn rex(&mut self, w: u8, r: u8, x: u8, b: u8) {
        self.byte(0x40 | (w << 3) | (r << 2) | (x << 1) | b);
    }

    fn modrm(&mut self, md: u8, reg: u8, rm: u8) {
        self.byte((md << 6) | (reg << 3) | rm);
    }

    fn imm32(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    // --- integer instructions -------------------------------------------

    /// mov dst, src (64-bit)
    pub fn mov_rr(&mut self, dst: Gpr, src: Gpr) {
        self.rex(1, src.ext(), 0, dst.ext());
        self.byte(0x89);
        self.modrm(3, src.low3(), dst.low3());
    }

    /// mov dst, imm32 (sign-extended to 64 bits)
    pub fn mov_ri32(&mut self, dst: Gpr, imm: i32) {
        self.rex(1, 0, 0, dst.ext());
        self.byte(0xc7);
        self.modrm(3, 0, dst.low3());
        self.imm32(imm);
    }

    /// mov dst, qword [base + disp]
    pub fn mov_load(&mut self, dst: Gpr, base: Gpr, disp: i32) {
        debug_assert!(base != Gpr::Rsp);
        self.rex(1, dst.ext(), 0, base.ext());
        self.byte(0x8b);
        self.modrm(2, dst.low3(), base.low3());
        self.imm32(disp);
    }

    /// add reg, imm8 (sign-extended)
    pub fn add_ri8(&mut self, reg: Gpr, imm: i8) {
        self.rex(1, 0, 0, reg.ext());
        self.byte(0x83);
        self.modrm(3, 0, reg.low3());
        self.byte(imm as u8);
    }

    /// and reg, imm8 (sign-extended)
    pub fn and_ri8(&mut self, reg: Gpr, imm: i8) {
        self.rex(1, 0, 0, reg.ext());
        self.byte(0x83);
        self.modrm(3, 4, reg.low3());
        self.byte(imm as u8);
    }

    /// xor dst, src (64-bit)
    pub fn xor_rr(&mut self, dst: Gpr, src: Gpr) {
        self.rex(1, src.ext(), 0, dst.ext());
        self.byte(0x31);
        self.modrm(3, src.low3(), dst.low3());
    }

    /// cmp lhs, rhs
    pub fn cmp_rr(&mut self, lhs: Gpr, rhs: Gpr) {
        self.rex(1, rhs.ext(), 0, lhs.ext());
        self.byte(0x39);
        self.modrm(3, rhs.low3(), lhs.low3());
    }

    pub fn ret(&mut self) {
        self.byte(0xc3);
    }

    /// jae with a forward target; returns the patch site
    pub fn jae_forward(&mut self) -> usize {
        self.byte(0x0f);
        self.byte(0x83);
        let site = self.pos();
        self.imm32(0);
        site
    }

    /// Patch a forward branch site to land on the current position
    pub fn patch_forward(&mut self, site: usize) {
        let rel = (self.pos() - (site + 4)) as i32;
        self.code[site..site + 4].copy_from_slice(&rel.to_le_bytes());
    }

    /// jmp to an already-emitted position
    pub fn jmp_back(&mut self, target: usize) {
        self.byte(0xe9);
        let rel = target as i64 - (self.pos() as i64 + 4);
        self.imm32(rel as i32);
    }

    // --- VEX encoding ---------------------------------------------------

    fn vex3(&mut self, r_ext: u8, x_ext: u8, b_ext: u8, map: u8, w: u8, vvvv: u8, l: u8, pp: u8) {
        self.byte(0xc4);
        self.byte(((!r_ext & 1) << 7) | ((!x_ext & 1) << 6) | ((!b_ext & 1) << 5) | map);
        self.byte((w << 7) | (((!vvvv) & 0xf) << 3) | (l << 2) | pp);
    }

    /// Three-operand register form: dst, vvvv, rm
    fn vex_rrr(&mut self, map: u8, pp: u8, w: u8, l: u8, opcode: u8, dst: Vreg, src1: Vreg, src2: Vreg) {
        self.vex3(dst >> 3, 0, src2 >> 3, map, w, src1, l, pp);
        self.byte(opcode);
        self.modrm(3, dst & 7, src2 & 7);
    }

    /// Two-operand register form with unused vvvv: dst, rm
    fn vex_rr(&mut self, map: u8, pp: u8, w: u8, l: u8, opcode: u8, dst: Vreg, src: Vreg) {
        self.vex3(dst >> 3, 0, src >> 3, map, w, 0, l, pp);
        self.byte(opcode);
        self.modrm(3, dst & 7, src & 7);
    }

    /// Memory operand form: reg, [base + index * 2^scale_log]
    fn vex_mem(
        &mut self,
        map: u8,
        pp: u8,
        w: u8,
        l: u8,
        opcode: u8,
        reg: Vreg,
        base: Gpr,
        index: Gpr,
        scale_log: u8,
    ) {
        debug_assert!(base.low3() != 5, "rbp/r13 base needs a displacement");
        debug_assert!(index != Gpr::Rsp);
        self.vex3(reg >> 3, index.ext(), base.ext(), map, w, 0, l, pp);
        self.byte(opcode);
        self.modrm(0, reg & 7, 4);
        self.byte((scale_log << 6) | (index.low3() << 3) | base.low3());
    }

    // --- vector loads and stores ----------------------------------------

    /// vmovdqu ymm, [base + index*2^scale]
    pub fn vload256(&mut self, dst: Vreg, base: Gpr, index: Gpr, scale_log: u8) {
        self.vex_mem(MAP_0F, PP_F3, 0, 1, 0x6f, dst, base, index, scale_log);
    }

    /// vmovdqu [base + index*2^scale], ymm
    pub fn vstore256(&mut self, src: Vreg, base: Gpr, index: Gpr, scale_log: u8) {
        self.vex_mem(MAP_0F, PP_F3, 0, 1, 0x7f, src, base, index, scale_log);
    }

    /// vmovdqu [base + index*2^scale], xmm (16 bytes)
    pub fn vstore128(&mut self, src: Vreg, base: Gpr, index: Gpr, scale_log: u8) {
        self.vex_mem(MAP_0F, PP_F3, 0, 0, 0x7f, src, base, index, scale_log);
    }

    /// vpmovzxwd ymm, [base + index*2^scale] (8 u16 lanes widened to u32)
    pub fn vload_zx16(&mut self, dst: Vreg, base: Gpr, index: Gpr, scale_log: u8) {
        self.vex_mem(MAP_0F38, PP_66, 0, 1, 0x33, dst, base, index, scale_log);
    }

    /// vmovdqu ymm, ymm (register copy)
    pub fn vmov(&mut self, dst: Vreg, src: Vreg) {
        self.vex_rr(MAP_0F, PP_F3, 0, 1, 0x6f, dst, src);
    }

    /// vmovd xmm, r32
    pub fn vmovd_from_gpr(&mut self, dst: Vreg, src: Gpr) {
        self.vex3(dst >> 3, 0, src.ext(), MAP_0F, 0, 0, 0, PP_66);
        self.byte(0x6e);
        self.modrm(3, dst & 7, src.low3());
    }

    /// vpbroadcastd ymm, xmm
    pub fn vbroadcastd(&mut self, dst: Vreg, src: Vreg) {
        self.vex_rr(MAP_0F38, PP_66, 0, 1, 0x58, dst, src);
    }

    // --- integer lane ops -----------------------------------------------

    pub fn vpaddd(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_66, 0, 1, 0xfe, dst, a, b);
    }

    pub fn vpsubd(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_66, 0, 1, 0xfa, dst, a, b);
    }

    pub fn vpmulld(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F38, PP_66, 0, 1, 0x40, dst, a, b);
    }

    pub fn vpand(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_66, 0, 1, 0xdb, dst, a, b);
    }

    pub fn vpor(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_66, 0, 1, 0xeb, dst, a, b);
    }

    pub fn vpxor(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_66, 0, 1, 0xef, dst, a, b);
    }

    pub fn vpminsd(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F38, PP_66, 0, 1, 0x39, dst, a, b);
    }

    pub fn vpmaxsd(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F38, PP_66, 0, 1, 0x3d, dst, a, b);
    }

    /// vpcmpeqd dst, a, a gives all-ones; used to build constants without
    /// a data section
    pub fn vpcmpeqd(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_66, 0, 1, 0x76, dst, a, b);
    }

    /// Shift-by-immediate forms encode the extension in the reg field and
    /// the destination in vvvv
    fn vshift_imm(&mut self, ext: u8, dst: Vreg, src: Vreg, imm: u8) {
        self.vex3(0, 0, src >> 3, MAP_0F, 0, dst, 1, PP_66);
        self.byte(0x72);
        self.modrm(3, ext, src & 7);
        self.byte(imm);
    }

    /// vpslld dst, src, imm
    pub fn vpslld(&mut self, dst: Vreg, src: Vreg, imm: u8) {
        self.vshift_imm(6, dst, src, imm);
    }

    /// vpsrld dst, src, imm (logical)
    pub fn vpsrld(&mut self, dst: Vreg, src: Vreg, imm: u8) {
        self.vshift_imm(2, dst, src, imm);
    }

    /// vpsrad dst, src, imm (arithmetic)
    pub fn vpsrad(&mut self, dst: Vreg, src: Vreg, imm: u8) {
        self.vshift_imm(4, dst, src, imm);
    }

    pub fn vpackusdw(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F38, PP_66, 0, 1, 0x2b, dst, a, b);
    }

    /// vpermq dst, src, imm
    pub fn vpermq(&mut self, dst: Vreg, src: Vreg, imm: u8) {
        self.vex_rr(MAP_0F3A, PP_66, 1, 1, 0x00, dst, src);
        self.byte(imm);
    }

    // --- float lane ops -------------------------------------------------

    pub fn vaddps(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_NONE, 0, 1, 0x58, dst, a, b);
    }

    pub fn vsubps(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_NONE, 0, 1, 0x5c, dst, a, b);
    }

    pub fn vmulps(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_NONE, 0, 1, 0x59, dst, a, b);
    }

    pub fn vdivps(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_NONE, 0, 1, 0x5e, dst, a, b);
    }

    pub fn vminps(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_NONE, 0, 1, 0x5d, dst, a, b);
    }

    pub fn vmaxps(&mut self, dst: Vreg, a: Vreg, b: Vreg) {
        self.vex_rrr(MAP_0F, PP_NONE, 0, 1, 0x5f, dst, a, b);
    }

    /// vcvtdq2ps dst, src (i32 lanes to f32)
    pub fn vcvtdq2ps(&mut self, dst: Vreg, src: Vreg) {
        self.vex_rr(MAP_0F, PP_NONE, 0, 1, 0x5b, dst, src);
    }

    /// vcvttps2dq dst, src (f32 lanes to i32, truncating)
    pub fn vcvttps2dq(&mut self, dst: Vreg, src: Vreg) {
        self.vex_rr(MAP_0F, PP_F3, 0, 1, 0x5b, dst, src);
    }
}
