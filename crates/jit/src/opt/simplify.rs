//! Instruction combining, constant propagation, and reassociation.

use super::replace_uses;
use crate::backend::eval;
use crate::ir::{BinOp, Function, InstrKind, Terminator, Value};
use crate::ty::{Const, Ty};
use rustc_hash::FxHashMap;

fn const_of(func: &Function, v: Value) -> Option<Const> {
    match &func.instr(v).kind {
        InstrKind::Const(c) => Some(*c),
        _ => None,
    }
}

fn is_zero(c: &Const) -> bool {
    c.bits.iter().all(|&b| b == 0)
}

fn all_lanes(c: &Const, v: u32) -> bool {
    (0..c.ty.lanes().max(1)).all(|i| eval::lane_get(&c.bits, c.ty.lane_bytes().max(1), i) as u32 == v)
}

fn float_lanes(c: &Const, v: f32) -> bool {
    c.ty.is_float() && all_lanes(c, v.to_bits())
}

/// Fold an instruction whose operands are all constants.
fn fold(func: &Function, kind: &InstrKind, ty: Ty) -> Option<Const> {
    use InstrKind::*;

    let c = |v: Value| const_of(func, v);
    let bits = match kind {
        Bin(op, a, b) => eval::eval_bin(*op, ty, &c(*a)?.bits, &c(*b)?.bits),
        Neg(a) => eval::eval_neg(ty, &c(*a)?.bits),
        Not(a) => eval::eval_not(ty, &c(*a)?.bits),
        Cmp(op, a, b) => {
            let operand_ty = func.ty(*a);
            eval::eval_cmp(*op, operand_ty, &c(*a)?.bits, &c(*b)?.bits)
        }
        Select(cond, t, f) => {
            eval::eval_select(func.ty(*cond), &c(*cond)?.bits, &c(*t)?.bits, &c(*f)?.bits)
        }
        Cast(op, a) => eval::eval_cast(*op, func.ty(*a), ty, &c(*a)?.bits),
        Swizzle(a, sel) => eval::eval_swizzle(ty, &c(*a)?.bits, *sel),
        Shuffle(a, b, sel) => eval::eval_shuffle(ty, &c(*a)?.bits, &c(*b)?.bits, *sel),
        Insert(vec, scalar, lane) => eval::eval_insert(ty, &c(*vec)?.bits, &c(*scalar)?.bits, *lane),
        Extract(vec, lane) => eval::eval_extract(func.ty(*vec), &c(*vec)?.bits, *lane),
        Intr(op, a, b, c2) => {
            let a = c(*a)?.bits;
            let b = match b {
                Some(b) => Some(c(*b)?.bits),
                None => None,
            };
            let c2 = match c2 {
                Some(v) => Some(c(*v)?.bits),
                None => None,
            };
            eval::eval_intrinsic(*op, ty, &a, b.as_ref(), c2.as_ref())
        }
        _ => return None,
    };

    Some(crate::ty::Const { ty, bits })
}

/// Peephole: constant fold and apply algebraic identities.
pub fn combine(func: &mut Function) {
    let mut map: FxHashMap<Value, Value> = FxHashMap::default();

    for v in 0..func.values.len() {
        let value = Value(v as u32);
        let instr = func.values[v].clone();
        let ty = instr.ty;

        if let Some(folded) = fold(func, &instr.kind, ty) {
            func.values[v].kind = InstrKind::Const(folded);
            continue;
        }

        if let InstrKind::Bin(op, a, b) = instr.kind {
            let ca = const_of(func, a);
            let cb = const_of(func, b);

            let replacement = match op {
                BinOp::Add => {
                    if cb.map_or(false, |c| is_zero(&c) || float_lanes(&c, 0.0)) {
                        Some(a)
                    } else if ca.map_or(false, |c| is_zero(&c) || float_lanes(&c, 0.0)) {
                        Some(b)
                    } else {
                        None
                    }
                }
                BinOp::Sub => {
                    if cb.map_or(false, |c| is_zero(&c) || float_lanes(&c, 0.0)) {
                        Some(a)
                    } else {
                        None
                    }
                }
                BinOp::Mul => {
                    let one = |c: &Const| {
                        if c.ty.is_float() {
                            float_lanes(c, 1.0)
                        } else {
                            all_lanes(c, 1)
                        }
                    };
                    if cb.as_ref().map_or(false, one) {
                        Some(a)
                    } else if ca.as_ref().map_or(false, one) {
                        Some(b)
                    } else if !ty.is_float()
                        && (ca.map_or(false, |c| is_zero(&c)) || cb.map_or(false, |c| is_zero(&c)))
                    {
                        func.values[v].kind = InstrKind::Const(Const::zero(ty));
                        continue;
                    } else {
                        None
                    }
                }
                BinOp::Div => {
                    if cb.map_or(false, |c| float_lanes(&c, 1.0)) {
                        Some(a)
                    } else {
                        None
                    }
                }
                BinOp::Or | BinOp::Xor => {
                    if cb.map_or(false, |c| is_zero(&c)) {
                        Some(a)
                    } else if ca.map_or(false, |c| is_zero(&c)) {
                        Some(b)
                    } else {
                        None
                    }
                }
                BinOp::Shl | BinOp::Shr => {
                    if cb.map_or(false, |c| is_zero(&c)) {
                        Some(a)
                    } else {
                        None
                    }
                }
                BinOp::And => {
                    if ca.map_or(false, |c| is_zero(&c)) || cb.map_or(false, |c| is_zero(&c)) {
                        func.values[v].kind = InstrKind::Const(Const::zero(ty));
                        continue;
                    } else {
                        None
                    }
                }
                BinOp::Rem => None,
            };

            if let Some(r) = replacement {
                map.insert(value, r);
                continue;
            }
        }

        match instr.kind {
            InstrKind::Neg(a) => {
                if let InstrKind::Neg(inner) = func.instr(a).kind {
                    map.insert(value, inner);
                }
            }
            InstrKind::Not(a) => {
                if let InstrKind::Not(inner) = func.instr(a).kind {
                    map.insert(value, inner);
                }
            }
            InstrKind::Select(cond, t, f) => {
                if let Some(c) = const_of(func, cond) {
                    if !c.ty.is_vector() {
                        map.insert(value, if c.bits[0] != 0 { t } else { f });
                    }
                }
            }
            InstrKind::Cast(crate::ir::CastOp::Bitcast, a) => {
                // As<T>(As<U>(x)) collapses when sizes agree all the way.
                if func.ty(a) == ty {
                    map.insert(value, a);
                }
            }
            _ => {}
        }
    }

    replace_uses(func, &map);
}

/// Constant propagation to a fixed point, folding branches on constants so
/// CFG simplification can drop the dead arm.
pub fn sccp(func: &mut Function) {
    for _ in 0..8 {
        let before: usize = func
            .values
            .iter()
            .filter(|i| matches!(i.kind, InstrKind::Const(_)))
            .count();

        combine(func);

        for block in 0..func.blocks.len() {
            if let Some(Terminator::Branch {
                cond,
                then_to,
                else_to,
            }) = func.blocks[block].term.clone()
            {
                if let Some(c) = const_of(func, cond) {
                    let target = if c.bits[0] != 0 { then_to } else { else_to };
                    func.blocks[block].term = Some(Terminator::Jump(target));
                }
            }
        }

        let after: usize = func
            .values
            .iter()
            .filter(|i| matches!(i.kind, InstrKind::Const(_)))
            .count();
        if after == before {
            break;
        }
    }
}

/// Group constants in integer add/mul chains: `(x ⊕ c1) ⊕ c2 → x ⊕ (c1 ⊕ c2)`.
/// Floats are left alone; reassociating them changes results.
pub fn reassociate(func: &mut Function) {
    // The combined constant is written into the right operand's slot, so
    // that operand must have no other users.
    let mut uses = vec![0u32; func.values.len()];
    for instr in &func.values {
        for op in instr.operands() {
            uses[op.index()] += 1;
        }
    }
    for block in &func.blocks {
        if let Some(term) = &block.term {
            if let Terminator::Branch { cond, .. } = term {
                uses[cond.index()] += 1;
            }
            if let Terminator::Ret(Some(v)) = term {
                uses[v.index()] += 1;
            }
        }
    }

    for v in 0..func.values.len() {
        let instr = func.values[v].clone();
        let ty = instr.ty;
        if ty.is_float() {
            continue;
        }

        if let InstrKind::Bin(op, a, b) = instr.kind {
            if !matches!(op, BinOp::Add | BinOp::Mul) {
                continue;
            }
            if uses[b.index()] != 1 {
                continue;
            }
            let Some(cb) = const_of(func, b) else { continue };
            let InstrKind::Bin(inner_op, x, y) = func.instr(a).kind else {
                continue;
            };
            if inner_op != op {
                continue;
            }
            let Some(cy) = const_of(func, y) else { continue };

            let folded = eval::eval_bin(op, ty, &cy.bits, &cb.bits);
            func.values[v].kind = InstrKind::Bin(op, x, b);
            func.values[b.index()].kind = InstrKind::Const(Const { ty, bits: folded });
        }
    }
}
