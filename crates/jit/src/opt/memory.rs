//! Stack-slot promotion and dead store removal.

use super::replace_uses;
use crate::ir::{Function, Instr, InstrKind, Value};
use rustc_hash::{FxHashMap, FxHashSet};

/// Allocas whose address is only ever the direct pointer of a plain load or
/// store. Nothing else can alias them.
fn promotable_allocas(func: &Function) -> FxHashSet<Value> {
    let mut allocas = FxHashSet::default();
    for (i, instr) in func.values.iter().enumerate() {
        if matches!(instr.kind, InstrKind::Alloca { .. }) {
            allocas.insert(Value(i as u32));
        }
    }

    for instr in &func.values {
        match &instr.kind {
            InstrKind::Load { order: None, .. } => {}
            InstrKind::Store {
                value, order: None, ..
            } => {
                // Storing a slot's address as data lets it escape.
                allocas.remove(value);
            }
            other => {
                let probe = Instr {
                    kind: other.clone(),
                    ty: instr.ty,
                };
                for op in probe.operands() {
                    allocas.remove(&op);
                }
            }
        }
    }

    allocas
}

/// Block-local store-to-load forwarding over promotable slots. Values that
/// cross block boundaries keep their memory traffic; the builder put it
/// there deliberately.
pub fn sroa(func: &mut Function) {
    let promotable = promotable_allocas(func);
    if promotable.is_empty() {
        return;
    }

    let mut map: FxHashMap<Value, Value> = FxHashMap::default();

    for block in 0..func.blocks.len() {
        let mut last_store: FxHashMap<Value, Value> = FxHashMap::default();

        for &v in &func.blocks[block].instrs {
            match func.instr(v).kind.clone() {
                InstrKind::Store {
                    ptr,
                    value,
                    order: None,
                } if promotable.contains(&ptr) => {
                    last_store.insert(ptr, value);
                }
                InstrKind::Load { ptr, order: None } if promotable.contains(&ptr) => {
                    if let Some(&stored) = last_store.get(&ptr) {
                        map.insert(v, stored);
                    }
                }
                _ => {}
            }
        }
    }

    if map.is_empty() {
        return;
    }

    replace_uses(func, &map);

    let dead: FxHashSet<Value> = map.keys().copied().collect();
    for block in &mut func.blocks {
        block.instrs.retain(|v| !dead.contains(v));
    }
}

/// Remove stores to promotable slots that are overwritten in the same block
/// before any load, and all traffic to slots that are never loaded.
pub fn dead_store_elimination(func: &mut Function) {
    let promotable = promotable_allocas(func);
    if promotable.is_empty() {
        return;
    }

    let mut loaded: FxHashSet<Value> = FxHashSet::default();
    for instr in &func.values {
        if let InstrKind::Load { ptr, .. } = &instr.kind {
            loaded.insert(*ptr);
        }
    }

    let mut dead: FxHashSet<Value> = FxHashSet::default();

    for block in 0..func.blocks.len() {
        // pending[slot] = store not yet observed by a load in this block
        let mut pending: FxHashMap<Value, Value> = FxHashMap::default();

        for &v in &func.blocks[block].instrs {
            match func.instr(v).kind.clone() {
                InstrKind::Store {
                    ptr, order: None, ..
                } if promotable.contains(&ptr) => {
                    if let Some(prev) = pending.insert(ptr, v) {
                        dead.insert(prev);
                    }
                }
                InstrKind::Load { ptr, order: None } => {
                    pending.remove(&ptr);
                }
                _ => {}
            }
        }
    }

    for (i, instr) in func.values.iter().enumerate() {
        if let InstrKind::Store {
            ptr, order: None, ..
        } = &instr.kind
        {
            if promotable.contains(ptr) && !loaded.contains(ptr) {
                dead.insert(Value(i as u32));
            }
        }
    }

    if !dead.is_empty() {
        for block in &mut func.blocks {
            block.instrs.retain(|v| !dead.contains(v));
        }
    }
}
