//! CFG simplification, dead code elimination, value numbering, and loop
//! invariant hoisting.

use super::replace_uses;
use crate::ir::{BlockId, Function, InstrKind, Terminator, Value};
use rustc_hash::{FxHashMap, FxHashSet};

/// Thread trivial jumps, collapse constant branches, merge straight-line
/// block pairs, and clear unreachable blocks.
pub fn simplify_cfg(func: &mut Function) {
    // Branches with identical arms become jumps.
    for block in &mut func.blocks {
        if let Some(Terminator::Branch {
            then_to, else_to, ..
        }) = block.term
        {
            if then_to == else_to {
                block.term = Some(Terminator::Jump(then_to));
            }
        }
    }

    // Thread jumps through empty forwarding blocks.
    let mut forward: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for (i, block) in func.blocks.iter().enumerate() {
        let id = BlockId(i as u32);
        if block.instrs.is_empty() {
            if let Some(Terminator::Jump(to)) = block.term {
                if to != id {
                    forward.insert(id, to);
                }
            }
        }
    }
    let resolve = |mut b: BlockId| {
        let mut hops = 0;
        while let Some(&next) = forward.get(&b) {
            b = next;
            hops += 1;
            if hops > forward.len() {
                break;
            }
        }
        b
    };
    if func.entry != resolve(func.entry) {
        func.entry = resolve(func.entry);
    }
    for block in &mut func.blocks {
        match &mut block.term {
            Some(Terminator::Jump(to)) => *to = resolve(*to),
            Some(Terminator::Branch {
                then_to, else_to, ..
            }) => {
                *then_to = resolve(*then_to);
                *else_to = resolve(*else_to);
            }
            _ => {}
        }
    }

    // Merge a block into its unique jump successor when that successor has
    // no other predecessors.
    loop {
        let preds = func.predecessors();
        let reachable: FxHashSet<BlockId> = func.rpo().into_iter().collect();

        let mut merged = false;
        for i in 0..func.blocks.len() {
            let id = BlockId(i as u32);
            if !reachable.contains(&id) {
                continue;
            }
            let Some(Terminator::Jump(succ)) = func.blocks[i].term else {
                continue;
            };
            if succ == id || succ == func.entry || preds[succ.index()].len() != 1 {
                continue;
            }

            let succ_block = std::mem::take(&mut func.blocks[succ.index()]);
            func.blocks[i].instrs.extend(succ_block.instrs);
            func.blocks[i].term = succ_block.term;
            merged = true;
            break;
        }

        if !merged {
            break;
        }
    }

    // Clear unreachable blocks so later passes skip their contents.
    let reachable: FxHashSet<BlockId> = func.rpo().into_iter().collect();
    for i in 0..func.blocks.len() {
        if !reachable.contains(&BlockId(i as u32)) {
            func.blocks[i].instrs.clear();
            func.blocks[i].term = None;
        }
    }
}

/// Liveness-driven sweep: roots are terminator operands and side-effecting
/// instructions; everything unreached from them is removed.
pub fn dce(func: &mut Function) {
    let mut live: FxHashSet<Value> = FxHashSet::default();
    let mut work: Vec<Value> = Vec::new();

    for block in func.rpo() {
        let block = &func.blocks[block.index()];
        for &v in &block.instrs {
            if !func.values[v.index()].is_pure() {
                work.push(v);
            }
        }
        match &block.term {
            Some(Terminator::Branch { cond, .. }) => work.push(*cond),
            Some(Terminator::Ret(Some(v))) => work.push(*v),
            _ => {}
        }
    }

    while let Some(v) = work.pop() {
        if live.insert(v) {
            work.extend(func.values[v.index()].operands());
        }
    }

    for block in &mut func.blocks {
        block.instrs.retain(|v| live.contains(v));
    }
}

/// Hash-consing CSE. `global` scopes tables down the dominator tree; the
/// local variant resets per block.
pub fn value_numbering(func: &mut Function, global: bool) {
    let order = func.rpo();
    let idom = if global { func.dominators() } else { Vec::new() };

    let mut map: FxHashMap<Value, Value> = FxHashMap::default();
    let mut tables: FxHashMap<BlockId, FxHashMap<InstrKind, Value>> = FxHashMap::default();

    for &block in &order {
        let mut table = if global {
            idom[block.index()]
                .and_then(|d| tables.get(&d).cloned())
                .unwrap_or_default()
        } else {
            FxHashMap::default()
        };

        for &v in &func.blocks[block.index()].instrs {
            let instr = &func.values[v.index()];
            if !instr.is_pure() || matches!(instr.kind, InstrKind::Load { .. }) {
                continue;
            }

            let mut key = instr.kind.clone();
            // Normalize operands through the running substitution so equal
            // expressions over replaced values still meet.
            let probe_map = &map;
            let mut probe = crate::ir::Instr {
                kind: key,
                ty: instr.ty,
            };
            probe.map_operands(|op| *probe_map.get(&op).unwrap_or(&op));
            key = probe.kind;

            match table.get(&key) {
                Some(&existing) if existing != v => {
                    map.insert(v, existing);
                }
                _ => {
                    table.insert(key, v);
                }
            }
        }

        if global {
            tables.insert(block, table);
        }
    }

    if !map.is_empty() {
        replace_uses(func, &map);
        let dead: FxHashSet<Value> = map.keys().copied().collect();
        for block in &mut func.blocks {
            block.instrs.retain(|v| !dead.contains(v));
        }
    }
}

/// Conservative loop-invariant code motion: for each back edge whose header
/// has a unique out-of-loop predecessor, hoist pure header/body instructions
/// whose operands are all defined outside the loop.
pub fn licm(func: &mut Function) {
    let idom = func.dominators();
    let preds = func.predecessors();
    let order = func.rpo();

    // Defining block of every value.
    let mut def_block: FxHashMap<Value, BlockId> = FxHashMap::default();
    for &block in &order {
        for &v in &func.blocks[block.index()].instrs {
            def_block.insert(v, block);
        }
    }

    for &latch in &order {
        let Some(term) = func.blocks[latch.index()].term.clone() else {
            continue;
        };
        for header in term.successors() {
            if !Function::dominates(&idom, func.entry, header, latch) {
                continue;
            }

            // Loop body: blocks dominated by the header.
            let body: FxHashSet<BlockId> = order
                .iter()
                .copied()
                .filter(|&b| Function::dominates(&idom, func.entry, header, b))
                .collect();

            // Unique preheader jumping into the header from outside.
            let outside: Vec<BlockId> = preds[header.index()]
                .iter()
                .copied()
                .filter(|p| !body.contains(p))
                .collect();
            if outside.len() != 1 {
                continue;
            }
            let preheader = outside[0];
            if !matches!(
                func.blocks[preheader.index()].term,
                Some(Terminator::Jump(_))
            ) {
                continue;
            }

            let mut hoisted: FxHashSet<Value> = FxHashSet::default();
            loop {
                let mut moved_any = false;
                for &block in &order {
                    if !body.contains(&block) {
                        continue;
                    }
                    let candidates: Vec<Value> = func.blocks[block.index()]
                        .instrs
                        .iter()
                        .copied()
                        .filter(|&v| {
                            let instr = &func.values[v.index()];
                            instr.is_pure()
                                && !matches!(instr.kind, InstrKind::Load { .. })
                                && instr.operands().iter().all(|op| {
                                    hoisted.contains(op)
                                        || def_block
                                            .get(op)
                                            .map_or(true, |b| !body.contains(b))
                                })
                        })
                        .collect();

                    if candidates.is_empty() {
                        continue;
                    }

                    let set: FxHashSet<Value> = candidates.iter().copied().collect();
                    func.blocks[block.index()].instrs.retain(|v| !set.contains(v));
                    let pre = &mut func.blocks[preheader.index()].instrs;
                    pre.extend(candidates.iter().copied());
                    hoisted.extend(set);
                    for &v in &candidates {
                        def_block.insert(v, preheader);
                    }
                    moved_any = true;
                }
                if !moved_any {
                    break;
                }
            }
        }
    }
}
