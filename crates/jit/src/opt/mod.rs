//! Optimization passes over the SSA program.
//!
//! Passes are value-substitution based: a pass computes a replacement map,
//! `replace_uses` rewrites every operand, and dead definitions are swept by
//! the DCE pass (which the backend always appends to a non-empty pipeline).

mod cleanup;
mod memory;
mod simplify;

use crate::ir::{Function, Terminator, Value};
use rustc_hash::FxHashMap;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Pass {
    Sroa,
    InstructionCombining,
    CfgSimplification,
    Licm,
    AggressiveDce,
    Gvn,
    Reassociate,
    DeadStoreElimination,
    Sccp,
    EarlyCse,
}

pub fn default_passes() -> Vec<Pass> {
    vec![Pass::Sroa, Pass::InstructionCombining]
}

pub fn run(func: &mut Function, passes: &[Pass]) {
    for pass in passes {
        match pass {
            Pass::Sroa => memory::sroa(func),
            Pass::InstructionCombining => simplify::combine(func),
            Pass::CfgSimplification => cleanup::simplify_cfg(func),
            Pass::Licm => cleanup::licm(func),
            Pass::AggressiveDce => cleanup::dce(func),
            Pass::Gvn => cleanup::value_numbering(func, true),
            Pass::Reassociate => simplify::reassociate(func),
            Pass::DeadStoreElimination => memory::dead_store_elimination(func),
            Pass::Sccp => simplify::sccp(func),
            Pass::EarlyCse => cleanup::value_numbering(func, false),
        }
    }

    if !passes.is_empty() {
        cleanup::dce(func);
    }
}

/// Rewrite every operand (and terminator use) through the map, following
/// chains so `a → b, b → c` lands on `c`.
pub(crate) fn replace_uses(func: &mut Function, map: &FxHashMap<Value, Value>) {
    if map.is_empty() {
        return;
    }

    let resolve = |mut v: Value| {
        let mut hops = 0;
        while let Some(&next) = map.get(&v) {
            v = next;
            hops += 1;
            if hops > map.len() {
                break;
            }
        }
        v
    };

    for value in 0..func.values.len() {
        let mut instr = func.values[value].clone();
        instr.map_operands(resolve);
        func.values[value] = instr;
    }

    for block in &mut func.blocks {
        match &mut block.term {
            Some(Terminator::Branch { cond, .. }) => *cond = resolve(*cond),
            Some(Terminator::Ret(Some(v))) => *v = resolve(*v),
            _ => {}
        }
    }
}
