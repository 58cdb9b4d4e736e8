//! Portable engine: match-dispatch execution of the linear program.
//!
//! Selected when the native emitter is unavailable or rejects a program.
//! Arithmetic defers to `eval` so both engines share one semantics.

use super::eval::{self, Slot};
use super::linear::{LinOp, LinearProgram};
use crate::routine::RoutineContext;
use crate::ty::{MemOrder, Ty};
use std::sync::atomic::{AtomicU32, Ordering};

fn ordering(order: MemOrder) -> Ordering {
    match order {
        MemOrder::Relaxed => Ordering::Relaxed,
        MemOrder::Acquire => Ordering::Acquire,
        MemOrder::Release => Ordering::Release,
        MemOrder::AcqRel => Ordering::AcqRel,
        MemOrder::SeqCst => Ordering::SeqCst,
    }
}

/// Execute the program. Returns the low lane of the returned value, or zero
/// for void routines.
///
/// SAFETY: pointer arguments in `ctx` must be valid for the loads and stores
/// the routine performs; this mirrors the contract of the native engine.
pub unsafe fn execute(prog: &LinearProgram, ctx: &RoutineContext) -> i64 {
    let mut memory: Vec<Slot> = vec![[0; 4]; prog.buffer_bytes().div_ceil(16)];
    let stack_base = memory.as_ptr() as u64 + prog.stack_base() as u64;

    let mut pc = 0usize;
    loop {
        match &prog.ops[pc] {
            LinOp::Arg { dst, index, ty } => {
                let raw = ctx.args[*index as usize];
                let mut slot = [0u32; 4];
                match ty {
                    Ty::Ptr | Ty::Long => {
                        slot[0] = raw as u32;
                        slot[1] = (raw >> 32) as u32;
                    }
                    _ => slot[0] = raw as u32,
                }
                memory[*dst as usize] = slot;
            }
            LinOp::Const { dst, bits } => memory[*dst as usize] = *bits,
            LinOp::Bin { op, ty, dst, a, b } => {
                memory[*dst as usize] =
                    eval::eval_bin(*op, *ty, &memory[*a as usize], &memory[*b as usize]);
            }
            LinOp::Neg { ty, dst, a } => {
                memory[*dst as usize] = eval::eval_neg(*ty, &memory[*a as usize]);
            }
            LinOp::Not { ty, dst, a } => {
                memory[*dst as usize] = eval::eval_not(*ty, &memory[*a as usize]);
            }
            LinOp::Cmp { op, ty, dst, a, b } => {
                memory[*dst as usize] =
                    eval::eval_cmp(*op, *ty, &memory[*a as usize], &memory[*b as usize]);
            }
            LinOp::Select {
                cond_ty,
                dst,
                cond,
                on_true,
                on_false,
                ..
            } => {
                memory[*dst as usize] = eval::eval_select(
                    *cond_ty,
                    &memory[*cond as usize],
                    &memory[*on_true as usize],
                    &memory[*on_false as usize],
                );
            }
            LinOp::Cast { op, from, to, dst, a } => {
                memory[*dst as usize] = eval::eval_cast(*op, *from, *to, &memory[*a as usize]);
            }
            LinOp::Swizzle { ty, dst, a, sel } => {
                memory[*dst as usize] = eval::eval_swizzle(*ty, &memory[*a as usize], *sel);
            }
            LinOp::Shuffle { ty, dst, a, b, sel } => {
                memory[*dst as usize] =
                    eval::eval_shuffle(*ty, &memory[*a as usize], &memory[*b as usize], *sel);
            }
            LinOp::Insert {
                ty,
                dst,
                vec,
                scalar,
                lane,
            } => {
                memory[*dst as usize] =
                    eval::eval_insert(*ty, &memory[*vec as usize], &memory[*scalar as usize], *lane);
            }
            LinOp::Extract {
                vec_ty,
                dst,
                vec,
                lane,
            } => {
                memory[*dst as usize] = eval::eval_extract(*vec_ty, &memory[*vec as usize], *lane);
            }
            LinOp::StackAddr { dst, offset } => {
                let addr = stack_base + *offset as u64;
                memory[*dst as usize] = [addr as u32, (addr >> 32) as u32, 0, 0];
            }
            LinOp::Load { ty, dst, ptr, order } => {
                let addr = slot_ptr(&memory[*ptr as usize]);
                let mut slot = [0u32; 4];
                match order {
                    Some(order) => {
                        let atomic = unsafe { &*(addr as *const AtomicU32) };
                        slot[0] = atomic.load(load_order(*order));
                    }
                    None => unsafe {
                        std::ptr::copy_nonoverlapping(
                            addr as *const u8,
                            slot.as_mut_ptr() as *mut u8,
                            ty.bytes().min(16),
                        );
                    },
                }
                memory[*dst as usize] = slot;
            }
            LinOp::Store { ty, ptr, src, order } => {
                let addr = slot_ptr(&memory[*ptr as usize]);
                let slot = memory[*src as usize];
                match order {
                    Some(order) => {
                        let atomic = unsafe { &*(addr as *const AtomicU32) };
                        atomic.store(slot[0], store_order(*order));
                    }
                    None => unsafe {
                        std::ptr::copy_nonoverlapping(
                            slot.as_ptr() as *const u8,
                            addr as *mut u8,
                            ty.bytes().min(16),
                        );
                    },
                }
            }
            LinOp::Gep {
                dst,
                ptr,
                offset,
                offset_ty,
            } => {
                let base = slot_ptr(&memory[*ptr as usize]) as u64;
                let off = &memory[*offset as usize];
                let delta = match offset_ty {
                    Ty::Long | Ty::Ptr => off[0] as u64 | (off[1] as u64) << 32,
                    _ => off[0] as i32 as i64 as u64,
                };
                let addr = base.wrapping_add(delta);
                memory[*dst as usize] = [addr as u32, (addr >> 32) as u32, 0, 0];
            }
            LinOp::Intr {
                op,
                ty,
                dst,
                a,
                b,
                c,
            } => {
                let bv = b.map(|b| memory[b as usize]);
                let cv = c.map(|c| memory[c as usize]);
                memory[*dst as usize] = eval::eval_intrinsic(
                    *op,
                    *ty,
                    &memory[*a as usize],
                    bv.as_ref(),
                    cv.as_ref(),
                );
            }
            LinOp::Jump { target } => {
                pc = *target as usize;
                continue;
            }
            LinOp::Branch {
                cond,
                then_to,
                else_to,
            } => {
                pc = if memory[*cond as usize][0] != 0 {
                    *then_to as usize
                } else {
                    *else_to as usize
                };
                continue;
            }
            LinOp::Ret { src } => {
                return src.map(|s| memory[s as usize][0] as i64).unwrap_or(0);
            }
        }
        pc += 1;
    }
}

fn slot_ptr(slot: &Slot) -> usize {
    (slot[0] as u64 | (slot[1] as u64) << 32) as usize
}

fn load_order(order: MemOrder) -> Ordering {
    match order {
        MemOrder::Release => Ordering::Relaxed,
        MemOrder::AcqRel => Ordering::Acquire,
        other => ordering(other),
    }
}

fn store_order(order: MemOrder) -> Ordering {
    match order {
        MemOrder::Acquire => Ordering::Relaxed,
        MemOrder::AcqRel => Ordering::Release,
        other => ordering(other),
    }
}
