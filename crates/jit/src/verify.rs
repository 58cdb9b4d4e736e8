//! Structural verifier for built routines. Run by the backend when enabled;
//! failures abort materialization with a diagnostic.

use crate::ir::{BinOp, Function, InstrKind, Terminator, Value};
use crate::ty::Ty;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum VerifyError {
    #[error("block {0} has no terminator")]
    MissingTerminator(u32),
    #[error("value v{0} used before its definition dominates the use")]
    UseBeforeDef(u32),
    #[error("type mismatch at v{0}: {1}")]
    TypeMismatch(u32, &'static str),
}

pub fn verify(func: &Function) -> Result<(), VerifyError> {
    let order = func.rpo();
    let idom = func.dominators();

    // Defining block and intra-block position of every value.
    let mut def_site: FxHashMap<Value, (u32, usize)> = FxHashMap::default();
    for &block in &order {
        if func.blocks[block.index()].term.is_none() {
            return Err(VerifyError::MissingTerminator(block.0));
        }
        for (pos, &v) in func.blocks[block.index()].instrs.iter().enumerate() {
            def_site.insert(v, (block.0, pos));
        }
    }

    for &block in &order {
        for (pos, &v) in func.blocks[block.index()].instrs.iter().enumerate() {
            let instr = func.instr(v);

            for op in instr.operands() {
                let Some(&(def_block, def_pos)) = def_site.get(&op) else {
                    return Err(VerifyError::UseBeforeDef(op.0));
                };
                let ok = if def_block == block.0 {
                    def_pos < pos
                } else {
                    Function::dominates(
                        &idom,
                        func.entry,
                        crate::ir::BlockId(def_block),
                        block,
                    )
                };
                if !ok {
                    return Err(VerifyError::UseBeforeDef(op.0));
                }
            }

            check_types(func, v)?;
        }

        match func.blocks[block.index()].term.as_ref().unwrap() {
            Terminator::Branch { cond, .. } => {
                if func.ty(*cond) != Ty::Bool {
                    return Err(VerifyError::TypeMismatch(cond.0, "branch condition"));
                }
            }
            Terminator::Ret(Some(v)) => {
                if func.ret != Ty::Void && func.ty(*v) != func.ret {
                    return Err(VerifyError::TypeMismatch(v.0, "return type"));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn check_types(func: &Function, v: Value) -> Result<(), VerifyError> {
    let instr = func.instr(v);
    let fail = |why| Err(VerifyError::TypeMismatch(v.0, why));

    match &instr.kind {
        InstrKind::Bin(op, a, b) => {
            let ta = func.ty(*a);
            let tb = func.ty(*b);
            if ta == Ty::Ptr {
                // Pointer displacement by an integer.
                if !matches!(op, BinOp::Add | BinOp::Sub)
                    || !matches!(tb, Ty::Int | Ty::UInt | Ty::Long)
                {
                    return fail("pointer arithmetic");
                }
            } else if matches!(op, BinOp::Shl | BinOp::Shr) {
                if tb.is_vector() || tb.is_float() {
                    return fail("shift count");
                }
            } else if ta != tb {
                return fail("operand types");
            }
        }
        InstrKind::Cmp(_, a, b) => {
            if func.ty(*a) != func.ty(*b) {
                return fail("compare operands");
            }
        }
        InstrKind::Select(_, t, f) => {
            if func.ty(*t) != func.ty(*f) {
                return fail("select arms");
            }
        }
        InstrKind::Load { ptr, .. } | InstrKind::Store { ptr, .. } => {
            if func.ty(*ptr) != Ty::Ptr {
                return fail("memory operand");
            }
        }
        InstrKind::Gep { ptr, offset } => {
            if func.ty(*ptr) != Ty::Ptr {
                return fail("gep base");
            }
            if !matches!(func.ty(*offset), Ty::Int | Ty::UInt | Ty::Long) {
                return fail("gep offset");
            }
        }
        InstrKind::Cast(crate::ir::CastOp::Bitcast, a) => {
            if func.ty(*a).bytes() != instr.ty.bytes() && func.ty(*a) != instr.ty {
                return fail("bitcast size");
            }
        }
        _ => {}
    }

    Ok(())
}
