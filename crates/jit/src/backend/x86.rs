//! x86-64 code emission for the linear program.
//!
//! Every value lives in a 16-byte slot addressed off RBX; each instruction
//! loads its operands into XMM/GPR scratch, operates, and stores the result.
//! RBP holds the routine context. Branches are rel32 with a fixup pass.
//!
//! Scalar and two-lane results keep their unused slot bytes zero; where a
//! packed instruction would dirty them (divps, cmpps, pshufd) the result is
//! masked back to the active lanes, so both engines observe identical slots.
//!
//! The emitter is total over the instruction set the pipeline generates and
//! rejects the rest; a rejected program falls back to the portable engine.

#![allow(clippy::identity_op)]

use super::linear::{LinOp, LinearProgram};
use super::runtime;
use crate::ir::{BinOp, CastOp, CmpOp, Intrinsic};
use crate::ty::{MemOrder, Ty};

#[derive(Debug, Clone, Copy)]
pub struct Unsupported(pub &'static str);

// GPR numbers.
const RAX: u8 = 0;
const RCX: u8 = 1;
const RDX: u8 = 2;
const RBX: u8 = 3;
const RBP: u8 = 5;
const RSI: u8 = 6;
const RDI: u8 = 7;

const XMM0: u8 = 0;
const XMM1: u8 = 1;
const XMM2: u8 = 2;
const XMM3: u8 = 3;

fn slot_off(slot: u16) -> i32 {
    slot as i32 * 16
}

struct Emitter {
    code: Vec<u8>,
    // (position of rel32, linear-op target)
    fixups: Vec<(usize, u32)>,
    op_offsets: Vec<usize>,
}

impl Emitter {
    fn new() -> Emitter {
        Emitter {
            code: Vec::with_capacity(4096),
            fixups: Vec::new(),
            op_offsets: Vec::new(),
        }
    }

    #[inline(always)]
    fn emit(&mut self, byte: u8) {
        self.code.push(byte);
    }

    #[inline(always)]
    fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    #[inline(always)]
    fn emit_i32(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn pos(&self) -> usize {
        self.code.len()
    }

    fn rex(&mut self, w: bool, r: bool, x: bool, b: bool) {
        let byte = 0x40
            | if w { 0x08 } else { 0 }
            | if r { 0x04 } else { 0 }
            | if x { 0x02 } else { 0 }
            | if b { 0x01 } else { 0 };
        self.emit(byte);
    }

    /// ModR/M mod=11 register-register.
    fn modrm_reg(&mut self, reg: u8, rm: u8) {
        self.emit(0xC0 | (reg & 7) << 3 | rm & 7);
    }

    /// ModR/M mod=10 `[base + disp32]`; RSP/R12 need a SIB byte.
    fn modrm_disp32(&mut self, reg: u8, rm: u8, disp: i32) {
        if rm & 7 == 4 {
            self.emit(0x80 | (reg & 7) << 3 | 4);
            self.emit(0x24);
        } else {
            self.emit(0x80 | (reg & 7) << 3 | rm & 7);
        }
        self.emit_i32(disp);
    }

    /// ModR/M mod=00 `[rm]`; only valid for bases other than RSP/RBP.
    fn modrm_mem0(&mut self, reg: u8, rm: u8) {
        debug_assert!(rm & 7 != 4 && rm & 7 != 5);
        self.emit((reg & 7) << 3 | rm & 7);
    }

    // ── GPR ──────────────────────────────────────────────────────────

    fn push_r64(&mut self, reg: u8) {
        if reg >= 8 {
            self.emit(0x41);
        }
        self.emit(0x50 + (reg & 7));
    }

    fn pop_r64(&mut self, reg: u8) {
        if reg >= 8 {
            self.emit(0x41);
        }
        self.emit(0x58 + (reg & 7));
    }

    fn mov_r64_r64(&mut self, dst: u8, src: u8) {
        self.rex(true, src >= 8, false, dst >= 8);
        self.emit(0x89);
        self.modrm_reg(src, dst);
    }

    fn mov_r64_mem(&mut self, dst: u8, base: u8, disp: i32) {
        self.rex(true, dst >= 8, false, base >= 8);
        self.emit(0x8B);
        self.modrm_disp32(dst, base, disp);
    }

    fn mov_r32_mem(&mut self, dst: u8, base: u8, disp: i32) {
        self.emit(0x8B);
        self.modrm_disp32(dst, base, disp);
    }

    fn mov_mem_r32(&mut self, base: u8, disp: i32, src: u8) {
        self.emit(0x89);
        self.modrm_disp32(src, base, disp);
    }

    fn movzx_r32_mem8(&mut self, dst: u8, base: u8, disp: i32) {
        self.emit_bytes(&[0x0F, 0xB6]);
        self.modrm_disp32(dst, base, disp);
    }

    fn movzx_r32_mem16(&mut self, dst: u8, base: u8, disp: i32) {
        self.emit_bytes(&[0x0F, 0xB7]);
        self.modrm_disp32(dst, base, disp);
    }

    fn movsx_r64_mem8(&mut self, dst: u8, base: u8, disp: i32) {
        self.rex(true, dst >= 8, false, base >= 8);
        self.emit_bytes(&[0x0F, 0xBE]);
        self.modrm_disp32(dst, base, disp);
    }

    fn movsx_r64_mem16(&mut self, dst: u8, base: u8, disp: i32) {
        self.rex(true, dst >= 8, false, base >= 8);
        self.emit_bytes(&[0x0F, 0xBF]);
        self.modrm_disp32(dst, base, disp);
    }

    fn movsxd_r64_mem32(&mut self, dst: u8, base: u8, disp: i32) {
        self.rex(true, dst >= 8, false, base >= 8);
        self.emit(0x63);
        self.modrm_disp32(dst, base, disp);
    }

    fn movzx_r32_r8(&mut self, dst: u8, src: u8) {
        self.emit_bytes(&[0x0F, 0xB6]);
        self.modrm_reg(dst, src);
    }

    fn movzx_r32_r16(&mut self, dst: u8, src: u8) {
        self.emit_bytes(&[0x0F, 0xB7]);
        self.modrm_reg(dst, src);
    }

    fn add_r64_r64(&mut self, dst: u8, src: u8) {
        self.rex(true, src >= 8, false, dst >= 8);
        self.emit(0x01);
        self.modrm_reg(src, dst);
    }

    fn imul_r64_r64(&mut self, dst: u8, src: u8) {
        self.rex(true, dst >= 8, false, src >= 8);
        self.emit_bytes(&[0x0F, 0xAF]);
        self.modrm_reg(dst, src);
    }

    fn lea_r64(&mut self, dst: u8, base: u8, disp: i32) {
        self.rex(true, dst >= 8, false, base >= 8);
        self.emit(0x8D);
        self.modrm_disp32(dst, base, disp);
    }

    fn mov_r64_imm64(&mut self, dst: u8, imm: u64) {
        self.rex(true, false, false, dst >= 8);
        self.emit(0xB8 + (dst & 7));
        self.code.extend_from_slice(&imm.to_le_bytes());
    }

    fn xor_r32_r32(&mut self, dst: u8, src: u8) {
        self.emit(0x31);
        self.modrm_reg(src, dst);
    }

    fn test_r32_r32(&mut self, a: u8, b: u8) {
        self.emit(0x85);
        self.modrm_reg(b, a);
    }

    fn cmp_r64_r64(&mut self, a: u8, b: u8) {
        self.rex(true, b >= 8, false, a >= 8);
        self.emit(0x39);
        self.modrm_reg(b, a);
    }

    fn setcc_r8(&mut self, cc: u8, reg: u8) {
        self.emit_bytes(&[0x0F, 0x90 | cc]);
        self.modrm_reg(0, reg);
    }

    fn neg_r32(&mut self, reg: u8) {
        self.emit(0xF7);
        self.modrm_reg(3, reg);
    }

    fn cdq(&mut self) {
        self.emit(0x99);
    }

    fn idiv_r32(&mut self, reg: u8) {
        self.emit(0xF7);
        self.modrm_reg(7, reg);
    }

    fn div_r32(&mut self, reg: u8) {
        self.emit(0xF7);
        self.modrm_reg(6, reg);
    }

    fn call_r64(&mut self, reg: u8) {
        if reg >= 8 {
            self.emit(0x41);
        }
        self.emit(0xFF);
        self.emit(0xD0 + (reg & 7));
    }

    fn sub_rsp_imm8(&mut self, imm: u8) {
        self.emit_bytes(&[0x48, 0x83, 0xEC, imm]);
    }

    fn add_rsp_imm8(&mut self, imm: u8) {
        self.emit_bytes(&[0x48, 0x83, 0xC4, imm]);
    }

    fn ret(&mut self) {
        self.emit(0xC3);
    }

    /// `jcc rel32`; returns the fixup position of the rel32 field.
    fn jcc_rel32(&mut self, cc: u8) -> usize {
        self.emit_bytes(&[0x0F, 0x80 | cc]);
        let pos = self.pos();
        self.emit_i32(0);
        pos
    }

    /// `jmp rel32`; returns the fixup position.
    fn jmp_rel32(&mut self) -> usize {
        self.emit(0xE9);
        let pos = self.pos();
        self.emit_i32(0);
        pos
    }

    /// `jmp rel8` with an immediate displacement (for jumping over inline data).
    fn jmp_rel8(&mut self, disp: i8) {
        self.emit_bytes(&[0xEB, disp as u8]);
    }

    fn patch_rel32(&mut self, pos: usize, target: usize) {
        let rel = target as i64 - (pos as i64 + 4);
        self.code[pos..pos + 4].copy_from_slice(&(rel as i32).to_le_bytes());
    }

    // ── SSE ──────────────────────────────────────────────────────────

    /// Reg-reg SSE op: optional prefix, escape bytes, ModRM.
    fn sse_rr(&mut self, prefix: Option<u8>, opcode: &[u8], dst: u8, src: u8) {
        if let Some(p) = prefix {
            self.emit(p);
        }
        if dst >= 8 || src >= 8 {
            self.rex(false, dst >= 8, false, src >= 8);
        }
        self.emit(0x0F);
        self.emit_bytes(opcode);
        self.modrm_reg(dst, src);
    }

    fn movups_load(&mut self, xmm: u8, base: u8, disp: i32) {
        self.emit_bytes(&[0x0F, 0x10]);
        self.modrm_disp32(xmm, base, disp);
    }

    fn movups_store(&mut self, base: u8, disp: i32, xmm: u8) {
        self.emit_bytes(&[0x0F, 0x11]);
        self.modrm_disp32(xmm, base, disp);
    }

    fn movups_load_ind(&mut self, xmm: u8, base: u8) {
        self.emit_bytes(&[0x0F, 0x10]);
        self.modrm_mem0(xmm, base);
    }

    fn movups_store_ind(&mut self, base: u8, xmm: u8) {
        self.emit_bytes(&[0x0F, 0x11]);
        self.modrm_mem0(xmm, base);
    }

    fn movss_load(&mut self, xmm: u8, base: u8, disp: i32) {
        self.emit_bytes(&[0xF3, 0x0F, 0x10]);
        self.modrm_disp32(xmm, base, disp);
    }

    fn movss_store(&mut self, base: u8, disp: i32, xmm: u8) {
        self.emit_bytes(&[0xF3, 0x0F, 0x11]);
        self.modrm_disp32(xmm, base, disp);
    }

    fn movss_load_ind(&mut self, xmm: u8, base: u8) {
        self.emit_bytes(&[0xF3, 0x0F, 0x10]);
        self.modrm_mem0(xmm, base);
    }

    fn movq_xmm_mem(&mut self, xmm: u8, base: u8, disp: i32) {
        self.emit_bytes(&[0xF3, 0x0F, 0x7E]);
        self.modrm_disp32(xmm, base, disp);
    }

    fn movq_xmm_mem_ind(&mut self, xmm: u8, base: u8) {
        self.emit_bytes(&[0xF3, 0x0F, 0x7E]);
        self.modrm_mem0(xmm, base);
    }

    fn movq_mem_xmm_ind(&mut self, base: u8, xmm: u8) {
        self.emit_bytes(&[0x66, 0x0F, 0xD6]);
        self.modrm_mem0(xmm, base);
    }

    fn movd_xmm_r32(&mut self, xmm: u8, gpr: u8) {
        self.emit_bytes(&[0x66, 0x0F, 0x6E]);
        self.modrm_reg(xmm, gpr);
    }

    fn movq_xmm_r64(&mut self, xmm: u8, gpr: u8) {
        self.emit(0x66);
        self.rex(true, xmm >= 8, false, gpr >= 8);
        self.emit_bytes(&[0x0F, 0x6E]);
        self.modrm_reg(xmm, gpr);
    }

    fn movaps_rr(&mut self, dst: u8, src: u8) {
        self.sse_rr(None, &[0x28], dst, src);
    }

    fn pshufd(&mut self, dst: u8, src: u8, imm: u8) {
        self.sse_rr(Some(0x66), &[0x70], dst, src);
        self.emit(imm);
    }

    fn shufps(&mut self, dst: u8, src: u8, imm: u8) {
        self.sse_rr(None, &[0xC6], dst, src);
        self.emit(imm);
    }

    fn cmpps(&mut self, dst: u8, src: u8, pred: u8) {
        self.sse_rr(None, &[0xC2], dst, src);
        self.emit(pred);
    }

    fn cmpss(&mut self, dst: u8, src: u8, pred: u8) {
        self.emit(0xF3);
        self.sse_rr(None, &[0xC2], dst, src);
        self.emit(pred);
    }

    fn roundps(&mut self, dst: u8, src: u8, mode: u8) {
        self.emit(0x66);
        self.emit_bytes(&[0x0F, 0x3A, 0x08]);
        self.modrm_reg(dst, src);
        self.emit(mode);
    }

    fn movmskps(&mut self, gpr: u8, xmm: u8) {
        self.sse_rr(None, &[0x50], gpr, xmm);
    }

    fn pmovmskb(&mut self, gpr: u8, xmm: u8) {
        self.sse_rr(Some(0x66), &[0xD7], gpr, xmm);
    }

    fn cvtsi2ss_r64(&mut self, xmm: u8, gpr: u8) {
        self.emit(0xF3);
        self.rex(true, xmm >= 8, false, gpr >= 8);
        self.emit_bytes(&[0x0F, 0x2A]);
        self.modrm_reg(xmm, gpr);
    }

    fn cvttss2si_r64(&mut self, gpr: u8, xmm: u8) {
        self.emit(0xF3);
        self.rex(true, gpr >= 8, false, xmm >= 8);
        self.emit_bytes(&[0x0F, 0x2C]);
        self.modrm_reg(gpr, xmm);
    }

    fn mfence(&mut self) {
        self.emit_bytes(&[0x0F, 0xAE, 0xF0]);
    }

    /// Load an inline 16-byte constant into an XMM register: jump over the
    /// data, then a RIP-relative `movups`.
    fn load_const_xmm(&mut self, xmm: u8, bits: [u32; 4]) {
        self.jmp_rel8(16);
        let data_pos = self.pos();
        for w in bits {
            self.code.extend_from_slice(&w.to_le_bytes());
        }
        self.emit_bytes(&[0x0F, 0x10]);
        self.emit(0x05 | (xmm & 7) << 3); // mod=00, rm=101: RIP-relative
        let end = self.pos() + 4;
        self.emit_i32(data_pos as i32 - end as i32);
    }

    fn load_slot(&mut self, xmm: u8, slot: u16) {
        self.movups_load(xmm, RBX, slot_off(slot));
    }

    fn store_slot(&mut self, slot: u16, xmm: u8) {
        self.movups_store(RBX, slot_off(slot), xmm);
    }

    /// Store EAX into lane 0 of a slot, zeroing the rest.
    fn store_scalar_eax(&mut self, slot: u16) {
        self.movd_xmm_r32(XMM0, RAX);
        self.store_slot(slot, XMM0);
    }

    /// Store RAX into the low 8 bytes of a slot, zeroing the rest.
    fn store_scalar_rax(&mut self, slot: u16) {
        self.movq_xmm_r64(XMM0, RAX);
        self.store_slot(slot, XMM0);
    }
}

/// Bit mask with all-ones in the active lanes of `ty`.
fn active_mask(ty: Ty) -> [u32; 4] {
    let mut mask = [0u32; 4];
    let bytes = ty.bytes().min(16);
    for (i, m) in mask.iter_mut().enumerate() {
        let lane_bytes = bytes.saturating_sub(i * 4).min(4);
        if lane_bytes == 4 {
            *m = !0;
        } else if lane_bytes > 0 {
            *m = (1u32 << (lane_bytes * 8)) - 1;
        }
    }
    mask
}

pub fn emit_program(prog: &LinearProgram) -> Result<Vec<u8>, Unsupported> {
    let mut e = Emitter::new();
    let stack_base = prog.stack_base() as i32;

    // Prologue. Entry: RDI = slot/stack buffer, RSI = context.
    e.push_r64(RBP);
    e.push_r64(RBX);
    e.sub_rsp_imm8(8); // 16-byte alignment for helper calls
    e.mov_r64_r64(RBX, RDI);
    e.mov_r64_r64(RBP, RSI);

    for op in &prog.ops {
        e.op_offsets.push(e.pos());
        emit_op(&mut e, op, stack_base)?;
    }

    let fixups = std::mem::take(&mut e.fixups);
    let offsets = std::mem::take(&mut e.op_offsets);
    for (pos, target) in fixups {
        let target = offsets[target as usize];
        e.patch_rel32(pos, target);
    }

    Ok(e.code)
}

fn emit_op(e: &mut Emitter, op: &LinOp, stack_base: i32) -> Result<(), Unsupported> {
    match op {
        LinOp::Arg { dst, index, .. } => {
            e.mov_r64_mem(RAX, RBP, *index as i32 * 8);
            e.store_scalar_rax(*dst);
        }

        LinOp::Const { dst, bits } => {
            e.load_const_xmm(XMM0, *bits);
            e.store_slot(*dst, XMM0);
        }

        LinOp::Bin { op, ty, dst, a, b } => emit_bin(e, *op, *ty, *dst, *a, *b)?,

        LinOp::Neg { ty, dst, a } => {
            if ty.is_float() {
                e.load_slot(XMM0, *a);
                let mut mask = [0u32; 4];
                for (i, m) in mask.iter_mut().enumerate() {
                    if i < ty.lanes() {
                        *m = 0x8000_0000;
                    }
                }
                e.load_const_xmm(XMM1, mask);
                e.sse_rr(None, &[0x57], XMM0, XMM1); // xorps
                e.store_slot(*dst, XMM0);
            } else {
                // 0 - a
                e.sse_rr(Some(0x66), &[0xEF], XMM0, XMM0); // pxor
                e.load_slot(XMM1, *a);
                let opc: &[u8] = match ty.lane_bytes() {
                    1 => &[0xF8], // psubb
                    2 => &[0xF9], // psubw
                    4 => &[0xFA], // psubd
                    8 => &[0xFB], // psubq
                    _ => return Err(Unsupported("neg lane width")),
                };
                e.sse_rr(Some(0x66), opc, XMM0, XMM1);
                e.store_slot(*dst, XMM0);
            }
        }

        LinOp::Not { ty, dst, a } => {
            e.load_slot(XMM0, *a);
            e.load_const_xmm(XMM1, active_mask(*ty));
            e.sse_rr(Some(0x66), &[0xEF], XMM0, XMM1); // pxor
            e.store_slot(*dst, XMM0);
        }

        LinOp::Cmp { op, ty, dst, a, b } => emit_cmp(e, *op, *ty, *dst, *a, *b)?,

        LinOp::Select {
            cond_ty,
            val_ty,
            dst,
            cond,
            on_true,
            on_false,
        } => {
            e.load_slot(XMM2, *cond);
            if !cond_ty.is_vector() && val_ty.is_vector() {
                e.pshufd(XMM2, XMM2, 0x00);
            }
            e.load_slot(XMM0, *on_true);
            e.load_slot(XMM1, *on_false);
            e.movaps_rr(XMM3, XMM2);
            e.sse_rr(None, &[0x54], XMM3, XMM0); // andps: t & m
            e.sse_rr(None, &[0x55], XMM2, XMM1); // andnps: ~m & f
            e.sse_rr(None, &[0x56], XMM2, XMM3); // orps
            e.store_slot(*dst, XMM2);
        }

        LinOp::Cast { op, from, to, dst, a } => emit_cast(e, *op, *from, *to, *dst, *a)?,

        LinOp::Swizzle { ty, dst, a, sel } => {
            if ty.lane_bytes() != 4 {
                return Err(Unsupported("swizzle lane width"));
            }
            e.load_slot(XMM0, *a);
            e.pshufd(XMM0, XMM0, sel_to_imm(*sel));
            if ty.lanes() < 4 {
                e.load_const_xmm(XMM1, active_mask(*ty));
                e.sse_rr(None, &[0x54], XMM0, XMM1); // andps
            }
            e.store_slot(*dst, XMM0);
        }

        LinOp::Shuffle { ty, dst, a, b, sel } => {
            if ty.lane_bytes() != 4 {
                return Err(Unsupported("shuffle lane width"));
            }
            e.load_slot(XMM0, *a);
            e.load_slot(XMM1, *b);
            e.shufps(XMM0, XMM1, sel_to_imm(*sel));
            e.store_slot(*dst, XMM0);
        }

        LinOp::Insert {
            ty,
            dst,
            vec,
            scalar,
            lane,
        } => {
            if ty.lane_bytes() != 4 {
                return Err(Unsupported("insert lane width"));
            }
            e.load_slot(XMM0, *vec);
            e.store_slot(*dst, XMM0);
            e.mov_r32_mem(RAX, RBX, slot_off(*scalar));
            e.mov_mem_r32(RBX, slot_off(*dst) + *lane as i32 * 4, RAX);
        }

        LinOp::Extract {
            vec_ty,
            dst,
            vec,
            lane,
        } => {
            if vec_ty.lane_bytes() != 4 {
                return Err(Unsupported("extract lane width"));
            }
            e.mov_r32_mem(RAX, RBX, slot_off(*vec) + *lane as i32 * 4);
            e.store_scalar_eax(*dst);
        }

        LinOp::StackAddr { dst, offset } => {
            e.lea_r64(RAX, RBX, stack_base + *offset as i32);
            e.store_scalar_rax(*dst);
        }

        LinOp::Load { ty, dst, ptr, order } => {
            e.mov_r64_mem(RAX, RBX, slot_off(*ptr));
            match (ty.bytes(), order) {
                (16, None) => {
                    e.movups_load_ind(XMM0, RAX);
                    e.store_slot(*dst, XMM0);
                }
                (8, None) => {
                    e.movq_xmm_mem_ind(XMM0, RAX);
                    e.store_slot(*dst, XMM0);
                }
                (4, _) => {
                    // Aligned 32-bit loads are atomic on x86; acquire needs
                    // no fence.
                    e.movss_load_ind(XMM0, RAX);
                    e.store_slot(*dst, XMM0);
                }
                (2, None) => {
                    e.emit_bytes(&[0x0F, 0xB7]); // movzx ecx, word [rax]
                    e.modrm_mem0(RCX, RAX);
                    e.movd_xmm_r32(XMM0, RCX);
                    e.store_slot(*dst, XMM0);
                }
                (1, None) => {
                    e.emit_bytes(&[0x0F, 0xB6]); // movzx ecx, byte [rax]
                    e.modrm_mem0(RCX, RAX);
                    e.movd_xmm_r32(XMM0, RCX);
                    e.store_slot(*dst, XMM0);
                }
                _ => return Err(Unsupported("load width")),
            }
        }

        LinOp::Store { ty, ptr, src, order } => {
            e.mov_r64_mem(RAX, RBX, slot_off(*ptr));
            match (ty.bytes(), order) {
                (16, None) => {
                    e.load_slot(XMM0, *src);
                    e.movups_store_ind(RAX, XMM0);
                }
                (8, None) => {
                    e.movq_xmm_mem(XMM0, RBX, slot_off(*src));
                    e.movq_mem_xmm_ind(RAX, XMM0);
                }
                (4, _) => {
                    e.mov_r32_mem(RCX, RBX, slot_off(*src));
                    e.emit(0x89); // mov [rax], ecx
                    e.modrm_mem0(RCX, RAX);
                    if *order == Some(MemOrder::SeqCst) {
                        e.mfence();
                    }
                }
                (2, None) => {
                    e.mov_r32_mem(RCX, RBX, slot_off(*src));
                    e.emit_bytes(&[0x66, 0x89]); // mov [rax], cx
                    e.modrm_mem0(RCX, RAX);
                }
                (1, None) => {
                    e.mov_r32_mem(RCX, RBX, slot_off(*src));
                    e.emit(0x88); // mov [rax], cl
                    e.modrm_mem0(RCX, RAX);
                }
                _ => return Err(Unsupported("store width")),
            }
        }

        LinOp::Gep {
            dst,
            ptr,
            offset,
            offset_ty,
        } => {
            e.mov_r64_mem(RAX, RBX, slot_off(*ptr));
            match offset_ty {
                Ty::Long | Ty::Ptr => e.mov_r64_mem(RCX, RBX, slot_off(*offset)),
                _ => e.movsxd_r64_mem32(RCX, RBX, slot_off(*offset)),
            }
            e.add_r64_r64(RAX, RCX);
            e.store_scalar_rax(*dst);
        }

        LinOp::Intr {
            op,
            ty,
            dst,
            a,
            b,
            c,
        } => emit_intrinsic(e, *op, *ty, *dst, *a, *b, *c)?,

        LinOp::Jump { target } => {
            let pos = e.jmp_rel32();
            e.fixups.push((pos, *target));
        }

        LinOp::Branch {
            cond,
            then_to,
            else_to,
        } => {
            e.mov_r32_mem(RAX, RBX, slot_off(*cond));
            e.test_r32_r32(RAX, RAX);
            let pos = e.jcc_rel32(0x5); // jnz
            e.fixups.push((pos, *then_to));
            let pos = e.jmp_rel32();
            e.fixups.push((pos, *else_to));
        }

        LinOp::Ret { src } => {
            match src {
                Some(slot) => e.mov_r32_mem(RAX, RBX, slot_off(*slot)),
                None => e.xor_r32_r32(RAX, RAX),
            }
            e.add_rsp_imm8(8);
            e.pop_r64(RBX);
            e.pop_r64(RBP);
            e.ret();
        }
    }

    Ok(())
}

/// Convert the packed DSL selector (lane 0 in the high nibble) into a
/// `shufps`/`pshufd` immediate (lane 0 in bits 1:0).
fn sel_to_imm(sel: u16) -> u8 {
    let l0 = (sel >> 6 & 3) as u8;
    let l1 = (sel >> 4 & 3) as u8;
    let l2 = (sel >> 2 & 3) as u8;
    let l3 = (sel & 3) as u8;
    l0 | l1 << 2 | l2 << 4 | l3 << 6
}

fn emit_bin(e: &mut Emitter, op: BinOp, ty: Ty, dst: u16, a: u16, b: u16) -> Result<(), Unsupported> {
    if ty.is_float() {
        let scalar = ty.lanes() == 1;
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                e.load_slot(XMM0, a);
                e.load_slot(XMM1, b);
                let opc = match op {
                    BinOp::Add => 0x58,
                    BinOp::Sub => 0x5C,
                    BinOp::Mul => 0x59,
                    _ => 0x5E,
                };
                if op == BinOp::Div && scalar {
                    e.emit(0xF3); // divss keeps the zero upper lanes clean
                    e.sse_rr(None, &[opc], XMM0, XMM1);
                } else {
                    e.sse_rr(None, &[opc], XMM0, XMM1);
                    if op == BinOp::Div && ty.lanes() < 4 {
                        e.load_const_xmm(XMM1, active_mask(ty));
                        e.sse_rr(None, &[0x54], XMM0, XMM1); // andps
                    }
                }
                e.store_slot(dst, XMM0);
                return Ok(());
            }
            BinOp::Rem => {
                let helper = runtime::bin_op_helper(op).unwrap();
                return emit_helper_lanes(e, ty, dst, a, Some(b), helper as usize);
            }
            BinOp::And | BinOp::Or | BinOp::Xor => {
                e.load_slot(XMM0, a);
                e.load_slot(XMM1, b);
                let opc = match op {
                    BinOp::And => 0x54,
                    BinOp::Or => 0x56,
                    _ => 0x57,
                };
                e.sse_rr(None, &[opc], XMM0, XMM1);
                e.store_slot(dst, XMM0);
                return Ok(());
            }
            _ => return Err(Unsupported("float shift")),
        }
    }

    let lane = ty.lane_bytes();
    let opc: &[u8] = match (op, lane) {
        (BinOp::Add, 1) => &[0xFC],
        (BinOp::Add, 2) => &[0xFD],
        (BinOp::Add, 4) => &[0xFE],
        (BinOp::Add, 8) => &[0xD4],
        (BinOp::Sub, 1) => &[0xF8],
        (BinOp::Sub, 2) => &[0xF9],
        (BinOp::Sub, 4) => &[0xFA],
        (BinOp::Sub, 8) => &[0xFB],
        (BinOp::Mul, 2) => &[0xD5],
        (BinOp::Mul, 4) => &[0x38, 0x40],
        (BinOp::And, _) => &[0xDB],
        (BinOp::Or, _) => &[0xEB],
        (BinOp::Xor, _) => &[0xEF],
        (BinOp::Shl, 2) => &[0xF1],
        (BinOp::Shl, 4) => &[0xF2],
        (BinOp::Shl, 8) => &[0xF3],
        (BinOp::Shr, 2) if ty.is_signed() => &[0xE1],
        (BinOp::Shr, 2) => &[0xD1],
        (BinOp::Shr, 4) if ty.is_signed() => &[0xE2],
        (BinOp::Shr, 4) => &[0xD2],
        (BinOp::Shr, 8) if !ty.is_signed() => &[0xD3],
        (BinOp::Mul, 8) => {
            e.mov_r64_mem(RAX, RBX, slot_off(a));
            e.mov_r64_mem(RCX, RBX, slot_off(b));
            e.imul_r64_r64(RAX, RCX);
            e.store_scalar_rax(dst);
            return Ok(());
        }
        (BinOp::Div | BinOp::Rem, 4) if ty.lanes() == 1 => {
            return emit_scalar_int_div(e, op, ty, dst, a, b);
        }
        _ => return Err(Unsupported("integer op/width")),
    };

    e.load_slot(XMM0, a);
    e.load_slot(XMM1, b);
    e.sse_rr(Some(0x66), opc, XMM0, XMM1);
    e.store_slot(dst, XMM0);
    Ok(())
}

/// Scalar 32-bit integer division with the divide-by-zero-yields-zero rule.
fn emit_scalar_int_div(
    e: &mut Emitter,
    op: BinOp,
    ty: Ty,
    dst: u16,
    a: u16,
    b: u16,
) -> Result<(), Unsupported> {
    e.mov_r32_mem(RCX, RBX, slot_off(b));
    e.test_r32_r32(RCX, RCX);
    let skip = e.jcc_rel32(0x4); // jz → zero result
    e.mov_r32_mem(RAX, RBX, slot_off(a));
    if ty.is_signed() {
        e.cdq();
        e.idiv_r32(RCX);
    } else {
        e.xor_r32_r32(RDX, RDX);
        e.div_r32(RCX);
    }
    if op == BinOp::Rem {
        e.mov_r64_r64(RAX, RDX); // low 32 bits carry the remainder
    }
    let done = e.jmp_rel32();
    let zero_target = e.pos();
    e.xor_r32_r32(RAX, RAX);
    let done_target = e.pos();
    e.patch_rel32(skip, zero_target);
    e.patch_rel32(done, done_target);
    e.store_scalar_eax(dst);
    Ok(())
}

fn emit_cmp(e: &mut Emitter, op: CmpOp, ty: Ty, dst: u16, a: u16, b: u16) -> Result<(), Unsupported> {
    if ty.is_float() {
        if ty.lanes() == 1 {
            // cmpss leaves the upper lanes of the destination untouched,
            // which are the (zero) upper lanes of `a`.
            match op {
                CmpOp::Eq | CmpOp::Lt | CmpOp::Le | CmpOp::Ne => {
                    e.load_slot(XMM0, a);
                    e.load_slot(XMM1, b);
                    e.cmpss(XMM0, XMM1, float_pred(op));
                }
                CmpOp::Gt | CmpOp::Ge => {
                    e.load_slot(XMM0, b);
                    e.load_slot(XMM1, a);
                    e.cmpss(XMM0, XMM1, float_pred(mirror(op)));
                }
            }
            e.store_slot(dst, XMM0);
            return Ok(());
        }

        match op {
            CmpOp::Eq | CmpOp::Lt | CmpOp::Le | CmpOp::Ne => {
                e.load_slot(XMM0, a);
                e.load_slot(XMM1, b);
                e.cmpps(XMM0, XMM1, float_pred(op));
            }
            CmpOp::Gt | CmpOp::Ge => {
                e.load_slot(XMM0, b);
                e.load_slot(XMM1, a);
                e.cmpps(XMM0, XMM1, float_pred(mirror(op)));
            }
        }
        if ty.lanes() < 4 {
            e.load_const_xmm(XMM1, active_mask(ty));
            e.sse_rr(None, &[0x54], XMM0, XMM1);
        }
        e.store_slot(dst, XMM0);
        return Ok(());
    }

    if ty.lane_bytes() == 8 {
        // Scalar 64-bit compare through the flags.
        e.mov_r64_mem(RAX, RBX, slot_off(a));
        e.mov_r64_mem(RCX, RBX, slot_off(b));
        e.cmp_r64_r64(RAX, RCX);
        let cc = match (op, ty.is_signed()) {
            (CmpOp::Eq, _) => 0x4,
            (CmpOp::Ne, _) => 0x5,
            (CmpOp::Lt, true) => 0xC,
            (CmpOp::Le, true) => 0xE,
            (CmpOp::Gt, true) => 0xF,
            (CmpOp::Ge, true) => 0xD,
            (CmpOp::Lt, false) => 0x2,
            (CmpOp::Le, false) => 0x6,
            (CmpOp::Gt, false) => 0x7,
            (CmpOp::Ge, false) => 0x3,
        };
        e.setcc_r8(cc, RAX);
        e.movzx_r32_r8(RAX, RAX);
        e.neg_r32(RAX);
        e.store_scalar_eax(dst);
        return Ok(());
    }

    let lane = ty.lane_bytes();
    let (eq_opc, gt_opc): (u8, u8) = match lane {
        1 => (0x74, 0x64),
        2 => (0x75, 0x65),
        4 => (0x76, 0x66),
        _ => return Err(Unsupported("compare width")),
    };

    let unsigned = !ty.is_signed() && !matches!(op, CmpOp::Eq | CmpOp::Ne);
    let bias = |e: &mut Emitter, xmm: u8| {
        // Bias unsigned operands so the signed compare orders them.
        let sign_bit = match lane {
            1 => 0x8080_8080u32,
            2 => 0x8000_8000,
            _ => 0x8000_0000,
        };
        e.load_const_xmm(XMM3, [sign_bit; 4]);
        e.sse_rr(Some(0x66), &[0xEF], xmm, XMM3); // pxor
    };

    let (first, second, opc, invert) = match op {
        CmpOp::Eq => (a, b, eq_opc, false),
        CmpOp::Ne => (a, b, eq_opc, true),
        CmpOp::Gt => (a, b, gt_opc, false),
        CmpOp::Le => (a, b, gt_opc, true),
        CmpOp::Lt => (b, a, gt_opc, false),
        CmpOp::Ge => (b, a, gt_opc, true),
    };

    e.load_slot(XMM0, first);
    e.load_slot(XMM1, second);
    if unsigned {
        bias(e, XMM0);
        bias(e, XMM1);
    }
    e.sse_rr(Some(0x66), &[opc], XMM0, XMM1);
    if invert {
        e.load_const_xmm(XMM1, [!0u32; 4]);
        e.sse_rr(Some(0x66), &[0xEF], XMM0, XMM1); // pxor
    }
    if ty.lanes() * lane < 16 {
        e.load_const_xmm(XMM1, active_mask(ty));
        e.sse_rr(None, &[0x54], XMM0, XMM1); // andps
    }
    e.store_slot(dst, XMM0);
    Ok(())
}

fn float_pred(op: CmpOp) -> u8 {
    match op {
        CmpOp::Eq => 0,
        CmpOp::Lt => 1,
        CmpOp::Le => 2,
        CmpOp::Ne => 4,
        CmpOp::Gt | CmpOp::Ge => unreachable!("mirrored before emission"),
    }
}

fn mirror(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Gt => CmpOp::Lt,
        CmpOp::Ge => CmpOp::Le,
        other => other,
    }
}

fn emit_cast(
    e: &mut Emitter,
    op: CastOp,
    from: Ty,
    to: Ty,
    dst: u16,
    a: u16,
) -> Result<(), Unsupported> {
    match op {
        CastOp::Bitcast => {
            e.load_slot(XMM0, a);
            e.store_slot(dst, XMM0);
            Ok(())
        }
        CastOp::SiToFp => {
            if from.lane_bytes() != 4 {
                return Err(Unsupported("si2fp width"));
            }
            e.load_slot(XMM0, a);
            e.sse_rr(None, &[0x5B], XMM0, XMM0); // cvtdq2ps
            e.store_slot(dst, XMM0);
            Ok(())
        }
        CastOp::FpToSi => {
            e.load_slot(XMM0, a);
            e.emit(0xF3);
            e.sse_rr(None, &[0x5B], XMM0, XMM0); // cvttps2dq
            e.store_slot(dst, XMM0);
            Ok(())
        }
        CastOp::UiToFp => {
            if from.lane_bytes() != 4 {
                return Err(Unsupported("ui2fp width"));
            }
            // Per lane through a 64-bit signed convert, which is exact for
            // any u32.
            e.sse_rr(Some(0x66), &[0xEF], XMM0, XMM0); // pxor
            e.store_slot(dst, XMM0);
            for i in 0..to.lanes() as i32 {
                e.mov_r32_mem(RAX, RBX, slot_off(a) + i * 4);
                e.cvtsi2ss_r64(XMM0, RAX);
                e.movss_store(RBX, slot_off(dst) + i * 4, XMM0);
            }
            Ok(())
        }
        CastOp::FpToUi => {
            e.sse_rr(Some(0x66), &[0xEF], XMM0, XMM0); // pxor
            e.store_slot(dst, XMM0);
            for i in 0..to.lanes() as i32 {
                e.movss_load(XMM0, RBX, slot_off(a) + i * 4);
                e.cvttss2si_r64(RAX, XMM0);
                e.mov_mem_r32(RBX, slot_off(dst) + i * 4, RAX);
            }
            Ok(())
        }
        CastOp::IntCast => {
            if from.is_vector() || to.is_vector() {
                return Err(Unsupported("vector int cast"));
            }
            // Widen to 64 bits with the source signedness, then truncate to
            // the destination width on store.
            match (from.lane_bytes(), from.is_signed()) {
                (1, false) => e.movzx_r32_mem8(RAX, RBX, slot_off(a)),
                (1, true) => e.movsx_r64_mem8(RAX, RBX, slot_off(a)),
                (2, false) => e.movzx_r32_mem16(RAX, RBX, slot_off(a)),
                (2, true) => e.movsx_r64_mem16(RAX, RBX, slot_off(a)),
                (4, true) => e.movsxd_r64_mem32(RAX, RBX, slot_off(a)),
                (4, false) => e.mov_r32_mem(RAX, RBX, slot_off(a)),
                (8, _) => e.mov_r64_mem(RAX, RBX, slot_off(a)),
                _ => return Err(Unsupported("int cast width")),
            }
            match to.lane_bytes() {
                1 => {
                    e.movzx_r32_r8(RAX, RAX);
                    e.store_scalar_eax(dst);
                }
                2 => {
                    e.movzx_r32_r16(RAX, RAX);
                    e.store_scalar_eax(dst);
                }
                4 => e.store_scalar_eax(dst),
                8 => e.store_scalar_rax(dst),
                _ => return Err(Unsupported("int cast width")),
            }
            Ok(())
        }
    }
}

fn emit_intrinsic(
    e: &mut Emitter,
    op: Intrinsic,
    ty: Ty,
    dst: u16,
    a: u16,
    b: Option<u16>,
    c: Option<u16>,
) -> Result<(), Unsupported> {
    use Intrinsic::*;

    match op {
        Min | Max if ty.is_float() => {
            e.load_slot(XMM0, a);
            e.load_slot(XMM1, b.unwrap());
            e.sse_rr(None, &[if op == Min { 0x5D } else { 0x5F }], XMM0, XMM1);
            e.store_slot(dst, XMM0);
        }
        Min | Max => {
            let opc: &[u8] = match (op, ty.lane_bytes(), ty.is_signed()) {
                (Min, 1, true) => &[0x38, 0x38],
                (Min, 1, false) => &[0xDA],
                (Min, 2, true) => &[0xEA],
                (Min, 2, false) => &[0x38, 0x3A],
                (Min, 4, true) => &[0x38, 0x39],
                (Min, 4, false) => &[0x38, 0x3B],
                (Max, 1, true) => &[0x38, 0x3C],
                (Max, 1, false) => &[0xDE],
                (Max, 2, true) => &[0xEE],
                (Max, 2, false) => &[0x38, 0x3E],
                (Max, 4, true) => &[0x38, 0x3D],
                (Max, 4, false) => &[0x38, 0x3F],
                _ => return Err(Unsupported("min/max width")),
            };
            e.load_slot(XMM0, a);
            e.load_slot(XMM1, b.unwrap());
            e.sse_rr(Some(0x66), opc, XMM0, XMM1);
            e.store_slot(dst, XMM0);
        }
        Abs if ty.is_float() => {
            e.load_slot(XMM0, a);
            e.load_const_xmm(XMM1, [0x7fff_ffff; 4]);
            e.sse_rr(None, &[0x54], XMM0, XMM1); // andps
            e.store_slot(dst, XMM0);
        }
        Abs => {
            let opc: &[u8] = match ty.lane_bytes() {
                1 => &[0x38, 0x1C],
                2 => &[0x38, 0x1D],
                4 => &[0x38, 0x1E],
                _ => return Err(Unsupported("abs width")),
            };
            e.load_slot(XMM0, a);
            e.sse_rr(Some(0x66), opc, XMM0, XMM0);
            e.store_slot(dst, XMM0);
        }
        Floor | Ceil | Trunc | RoundNearest => {
            if !ty.is_float() {
                return Err(Unsupported("round on int"));
            }
            let mode = match op {
                Floor => 0x9,
                Ceil => 0xA,
                Trunc => 0xB,
                _ => 0x8,
            };
            e.load_slot(XMM0, a);
            e.roundps(XMM0, XMM0, mode);
            e.store_slot(dst, XMM0);
        }
        Sqrt => {
            e.load_slot(XMM0, a);
            e.sse_rr(None, &[0x51], XMM0, XMM0); // sqrtps
            e.store_slot(dst, XMM0);
        }
        Rcp | RcpSqrt => {
            // Full-precision reciprocal: 1.0 / x, shared with the portable
            // engine; the approximation instructions drift between engines.
            let mut ones = [0u32; 4];
            for (i, m) in ones.iter_mut().enumerate() {
                if i < ty.lanes() {
                    *m = 1.0f32.to_bits();
                }
            }
            e.load_slot(XMM1, a);
            if op == RcpSqrt {
                e.sse_rr(None, &[0x51], XMM1, XMM1); // sqrtps
            }
            e.load_const_xmm(XMM0, ones);
            if ty.lanes() == 1 {
                e.emit(0xF3);
                e.sse_rr(None, &[0x5E], XMM0, XMM1); // divss
            } else {
                e.sse_rr(None, &[0x5E], XMM0, XMM1); // divps
                if ty.lanes() < 4 {
                    e.load_const_xmm(XMM1, active_mask(ty));
                    e.sse_rr(None, &[0x54], XMM0, XMM1);
                }
            }
            e.store_slot(dst, XMM0);
        }
        MulAdd => {
            if !ty.is_float() {
                return Err(Unsupported("muladd on int"));
            }
            e.load_slot(XMM0, a);
            e.load_slot(XMM1, b.unwrap());
            e.load_slot(XMM2, c.unwrap());
            e.sse_rr(None, &[0x59], XMM0, XMM1); // mulps
            e.sse_rr(None, &[0x58], XMM0, XMM2); // addps
            e.store_slot(dst, XMM0);
        }
        MulHigh => {
            let opc: &[u8] = match (ty.lane_bytes(), ty.is_signed()) {
                (2, true) => &[0xE5],  // pmulhw
                (2, false) => &[0xE4], // pmulhuw
                _ => return Err(Unsupported("mulhigh width")),
            };
            e.load_slot(XMM0, a);
            e.load_slot(XMM1, b.unwrap());
            e.sse_rr(Some(0x66), opc, XMM0, XMM1);
            e.store_slot(dst, XMM0);
        }
        AddSat | SubSat => {
            let opc: &[u8] = match (op, ty.lane_bytes(), ty.is_signed()) {
                (AddSat, 1, true) => &[0xEC],
                (AddSat, 1, false) => &[0xDC],
                (AddSat, 2, true) => &[0xED],
                (AddSat, 2, false) => &[0xDD],
                (SubSat, 1, true) => &[0xE8],
                (SubSat, 1, false) => &[0xD8],
                (SubSat, 2, true) => &[0xE9],
                (SubSat, 2, false) => &[0xD9],
                _ => return Err(Unsupported("saturating width")),
            };
            e.load_slot(XMM0, a);
            e.load_slot(XMM1, b.unwrap());
            e.sse_rr(Some(0x66), opc, XMM0, XMM1);
            e.store_slot(dst, XMM0);
        }
        PackSigned | PackUnsigned => {
            let opc: &[u8] = match (op, ty.lane_bytes()) {
                (PackSigned, 2) => &[0x6B],        // packssdw
                (PackSigned, 1) => &[0x63],        // packsswb
                (PackUnsigned, 2) => &[0x38, 0x2B], // packusdw
                (PackUnsigned, 1) => &[0x67],      // packuswb
                _ => return Err(Unsupported("pack width")),
            };
            e.load_slot(XMM0, a);
            e.load_slot(XMM1, b.unwrap());
            e.sse_rr(Some(0x66), opc, XMM0, XMM1);
            e.store_slot(dst, XMM0);
        }
        SignMask => {
            e.load_slot(XMM0, a);
            if ty.lane_bytes() == 1 {
                e.pmovmskb(RAX, XMM0);
            } else {
                e.movmskps(RAX, XMM0);
            }
            e.store_scalar_eax(dst);
        }
        Sin | Cos | Tan | Asin | Acos | Atan | Exp | Log | Exp2 | Log2 => {
            if !ty.is_float() {
                return Err(Unsupported("transcendental on int"));
            }
            let helper = runtime::unary_helper(op).unwrap();
            emit_helper_lanes(e, ty, dst, a, None, helper as usize)?;
        }
        Atan2 | Pow => {
            if !ty.is_float() {
                return Err(Unsupported("transcendental on int"));
            }
            let helper = runtime::binary_helper(op).unwrap();
            emit_helper_lanes(e, ty, dst, a, b, helper as usize)?;
        }
    }

    Ok(())
}

/// Per-lane call of a C helper for float ops with no SSE encoding.
fn emit_helper_lanes(
    e: &mut Emitter,
    ty: Ty,
    dst: u16,
    a: u16,
    b: Option<u16>,
    helper: usize,
) -> Result<(), Unsupported> {
    if !ty.is_float() {
        return Err(Unsupported("helper on int"));
    }

    e.sse_rr(Some(0x66), &[0xEF], XMM0, XMM0); // pxor
    e.store_slot(dst, XMM0);

    for i in 0..ty.lanes() as i32 {
        e.movss_load(XMM0, RBX, slot_off(a) + i * 4);
        if let Some(b) = b {
            e.movss_load(XMM1, RBX, slot_off(b) + i * 4);
        }
        e.mov_r64_imm64(RAX, helper as u64);
        e.call_r64(RAX);
        e.movss_store(RBX, slot_off(dst) + i * 4, XMM0);
    }

    Ok(())
}
