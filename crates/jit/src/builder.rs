//! Function construction state.
//!
//! The DSL operates on a thread-local builder: `Routine::build` installs one,
//! the typed value handles append instructions through it, and the
//! control-flow helpers open and close basic blocks on it.

use crate::ir::{Block, BlockId, Function, Instr, InstrKind, Terminator, Value};
use crate::ty::{Const, Ty};
use std::cell::RefCell;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarId(pub usize);

#[derive(Clone, Debug)]
enum VarState {
    /// Still a pure SSA name: reads return `pending`, writes replace it.
    Unmaterialized { ty: Ty, pending: Option<Value> },
    /// Backed by a stack slot; reads load, writes store.
    Materialized { ty: Ty, addr: Value },
}

pub struct FunctionBuilder {
    pub func: Function,
    current: BlockId,
    terminated: bool,
    vars: Vec<VarState>,
}

impl FunctionBuilder {
    pub fn new(name: &str, params: &[Ty], ret: Ty) -> FunctionBuilder {
        FunctionBuilder {
            func: Function::new(name, params, ret),
            current: BlockId(0),
            terminated: false,
            vars: Vec::new(),
        }
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn push(&mut self, kind: InstrKind, ty: Ty) -> Value {
        if self.terminated {
            // Code after `return` lands in a fresh unreachable block that the
            // CFG cleanup later drops.
            let dead = self.create_block();
            self.switch_to(dead);
        }

        let value = Value(self.func.values.len() as u32);
        self.func.values.push(Instr { kind, ty });
        self.func.blocks[self.current.index()].instrs.push(value);
        value
    }

    pub fn push_const(&mut self, c: Const) -> Value {
        let ty = c.ty;
        self.push(InstrKind::Const(c), ty)
    }

    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(Block::default());
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
        self.terminated = false;
    }

    pub fn terminate(&mut self, term: Terminator) {
        if !self.terminated {
            self.func.blocks[self.current.index()].term = Some(term);
            self.terminated = true;
        }
    }

    // ── variables ────────────────────────────────────────────────────

    pub fn var_new(&mut self, ty: Ty) -> VarId {
        self.vars.push(VarState::Unmaterialized { ty, pending: None });
        VarId(self.vars.len() - 1)
    }

    pub fn var_get(&mut self, id: VarId) -> Value {
        match self.vars[id.0].clone() {
            VarState::Unmaterialized { ty, pending } => match pending {
                Some(v) => v,
                // A read before any write is undefined; hand back zero.
                None => self.push_const(Const::zero(ty)),
            },
            VarState::Materialized { ty, addr } => {
                self.push(InstrKind::Load { ptr: addr, order: None }, ty)
            }
        }
    }

    pub fn var_set(&mut self, id: VarId, value: Value) {
        match self.vars[id.0] {
            VarState::Unmaterialized { ty, .. } => {
                self.vars[id.0] = VarState::Unmaterialized {
                    ty,
                    pending: Some(value),
                };
            }
            VarState::Materialized { addr, .. } => {
                self.push(
                    InstrKind::Store {
                        ptr: addr,
                        value,
                        order: None,
                    },
                    Ty::Void,
                );
            }
        }
    }

    /// First address-taking forces the slot into existence.
    pub fn var_addr(&mut self, id: VarId) -> Value {
        self.materialize(id);
        match self.vars[id.0] {
            VarState::Materialized { addr, .. } => addr,
            VarState::Unmaterialized { .. } => unreachable!(),
        }
    }

    fn materialize(&mut self, id: VarId) {
        if let VarState::Unmaterialized { ty, pending } = self.vars[id.0].clone() {
            let addr = self.push(
                InstrKind::Alloca {
                    size: ty.bytes().max(1) as u32,
                },
                Ty::Ptr,
            );
            if let Some(pending) = pending {
                self.push(
                    InstrKind::Store {
                        ptr: addr,
                        value: pending,
                        order: None,
                    },
                    Ty::Void,
                );
            }
            self.vars[id.0] = VarState::Materialized { ty, addr };
        }
    }

    /// Force every live variable into memory. Called at control-flow edges so
    /// values defined before a branch are visible on every path after it.
    pub fn materialize_all(&mut self) {
        for id in 0..self.vars.len() {
            if matches!(
                self.vars[id],
                VarState::Unmaterialized {
                    pending: Some(_),
                    ..
                }
            ) {
                self.materialize(VarId(id));
            }
        }
    }

    pub fn finish(mut self) -> Function {
        self.terminate(Terminator::Ret(None));
        self.func
    }
}

thread_local! {
    static CURRENT: RefCell<Option<FunctionBuilder>> = const { RefCell::new(None) };
}

pub fn install(builder: FunctionBuilder) {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        assert!(slot.is_none(), "a routine is already being built on this thread");
        *slot = Some(builder);
    });
}

pub fn take() -> FunctionBuilder {
    CURRENT.with(|slot| {
        slot.borrow_mut()
            .take()
            .expect("no routine is being built on this thread")
    })
}

pub fn with<R>(f: impl FnOnce(&mut FunctionBuilder) -> R) -> R {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let builder = slot
            .as_mut()
            .expect("value handles may only be used inside Routine::build");
        f(builder)
    })
}
