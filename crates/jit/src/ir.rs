//! SSA program representation built by the DSL and consumed by the backend.
//!
//! Values are function-wide; blocks hold an ordered list of the values they
//! define plus a terminator. There are no phi instructions: a value that
//! must survive divergent control flow lives in a stack slot (`Alloca`) that
//! the builder materializes at block boundaries, and the `Sroa` pass promotes
//! straight-line slot traffic back to values.

use crate::ty::{Const, MemOrder, Ty};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Value(pub u32);

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl Value {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum CastOp {
    /// Same-size reinterpretation.
    Bitcast,
    /// Integer widening/narrowing with sign/zero extension chosen by the
    /// source type.
    IntCast,
    /// Float → signed int, truncating.
    FpToSi,
    /// Signed int → float.
    SiToFp,
    /// Float → unsigned int, truncating.
    FpToUi,
    /// Unsigned int → float.
    UiToFp,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Intrinsic {
    AddSat,
    SubSat,
    PackSigned,
    PackUnsigned,
    Min,
    Max,
    Abs,
    Floor,
    Ceil,
    Trunc,
    RoundNearest,
    Sqrt,
    Rcp,
    RcpSqrt,
    MulHigh,
    MulAdd,
    SignMask,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Pow,
    Exp,
    Log,
    Exp2,
    Log2,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum InstrKind {
    /// Routine argument `n`, read from the entry context.
    Arg(u8),
    Const(Const),

    Bin(BinOp, Value, Value),
    Neg(Value),
    Not(Value),
    Cmp(CmpOp, Value, Value),
    Select(Value, Value, Value),
    Cast(CastOp, Value),

    /// One-vector lane permutation; packed selector, lane 0 in the most
    /// significant nibble of the low byte.
    Swizzle(Value, u16),
    /// Two-vector shuffle with the same selector encoding; lanes select from
    /// the 8-lane concatenation (a then b).
    Shuffle(Value, Value, u16),
    Insert(Value, Value, u8),
    Extract(Value, u8),

    /// Stack slot; the value is the slot address.
    Alloca { size: u32 },
    Load { ptr: Value, order: Option<MemOrder> },
    Store { ptr: Value, value: Value, order: Option<MemOrder> },
    /// Byte-granular pointer offset.
    Gep { ptr: Value, offset: Value },

    Intr(Intrinsic, Value, Option<Value>, Option<Value>),
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Instr {
    pub kind: InstrKind,
    pub ty: Ty,
}

impl Instr {
    /// Instruction has no side effects and can be removed if unused.
    pub fn is_pure(&self) -> bool {
        !matches!(
            self.kind,
            InstrKind::Store { .. } | InstrKind::Alloca { .. } | InstrKind::Load { order: Some(_), .. }
        )
    }

    pub fn operands(&self) -> Vec<Value> {
        use InstrKind::*;
        match &self.kind {
            Arg(_) | Const(_) | Alloca { .. } => vec![],
            Neg(a) | Not(a) | Swizzle(a, _) | Extract(a, _) | Cast(_, a) => vec![*a],
            Bin(_, a, b) | Cmp(_, a, b) | Shuffle(a, b, _) | Insert(a, b, _) => vec![*a, *b],
            Select(a, b, c) => vec![*a, *b, *c],
            Load { ptr, .. } => vec![*ptr],
            Store { ptr, value, .. } => vec![*ptr, *value],
            Gep { ptr, offset } => vec![*ptr, *offset],
            Intr(_, a, b, c) => {
                let mut v = vec![*a];
                v.extend(b.iter().copied());
                v.extend(c.iter().copied());
                v
            }
        }
    }

    pub fn map_operands(&mut self, mut f: impl FnMut(Value) -> Value) {
        use InstrKind::*;
        match &mut self.kind {
            Arg(_) | Const(_) | Alloca { .. } => {}
            Neg(a) | Not(a) | Swizzle(a, _) | Extract(a, _) | Cast(_, a) => *a = f(*a),
            Bin(_, a, b) | Cmp(_, a, b) | Shuffle(a, b, _) | Insert(a, b, _) => {
                *a = f(*a);
                *b = f(*b);
            }
            Select(a, b, c) => {
                *a = f(*a);
                *b = f(*b);
                *c = f(*c);
            }
            Load { ptr, .. } => *ptr = f(*ptr),
            Store { ptr, value, .. } => {
                *ptr = f(*ptr);
                *value = f(*value);
            }
            Gep { ptr, offset } => {
                *ptr = f(*ptr);
                *offset = f(*offset);
            }
            Intr(_, a, b, c) => {
                *a = f(*a);
                if let Some(b) = b {
                    *b = f(*b);
                }
                if let Some(c) = c {
                    *c = f(*c);
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond: Value,
        then_to: BlockId,
        else_to: BlockId,
    },
    Ret(Option<Value>),
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(b) => vec![*b],
            Terminator::Branch {
                then_to, else_to, ..
            } => vec![*then_to, *else_to],
            Terminator::Ret(_) => vec![],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub instrs: Vec<Value>,
    pub term: Option<Terminator>,
}

/// One routine under construction or ready for the backend.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub values: Vec<Instr>,
    pub blocks: Vec<Block>,
    pub entry: BlockId,
}

impl Function {
    pub fn new(name: &str, params: &[Ty], ret: Ty) -> Function {
        Function {
            name: name.to_string(),
            params: params.to_vec(),
            ret,
            values: Vec::new(),
            blocks: vec![Block::default()],
            entry: BlockId(0),
        }
    }

    pub fn instr(&self, v: Value) -> &Instr {
        &self.values[v.index()]
    }

    pub fn ty(&self, v: Value) -> Ty {
        self.values[v.index()].ty
    }

    /// Reverse post-order over reachable blocks starting at the entry.
    pub fn rpo(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut post = Vec::new();
        let mut stack = vec![(self.entry, 0usize)];
        visited[self.entry.index()] = true;

        while let Some((block, succ)) = stack.pop() {
            let succs = self.blocks[block.index()]
                .term
                .as_ref()
                .map(|t| t.successors())
                .unwrap_or_default();
            if succ < succs.len() {
                stack.push((block, succ + 1));
                let next = succs[succ];
                if !visited[next.index()] {
                    visited[next.index()] = true;
                    stack.push((next, 0));
                }
            } else {
                post.push(block);
            }
        }

        post.reverse();
        post
    }

    /// Immediate dominators, indexed by block; `None` for the entry and for
    /// unreachable blocks. Cooper–Harvey–Kennedy iteration over the RPO.
    pub fn dominators(&self) -> Vec<Option<BlockId>> {
        let order = self.rpo();
        let mut rpo_index = vec![usize::MAX; self.blocks.len()];
        for (i, b) in order.iter().enumerate() {
            rpo_index[b.index()] = i;
        }

        let preds = self.predecessors();
        let mut idom: Vec<Option<BlockId>> = vec![None; self.blocks.len()];
        idom[self.entry.index()] = Some(self.entry);

        let intersect = |idom: &[Option<BlockId>], a: BlockId, b: BlockId| -> BlockId {
            let mut a = a;
            let mut b = b;
            while a != b {
                while rpo_index[a.index()] > rpo_index[b.index()] {
                    a = idom[a.index()].unwrap();
                }
                while rpo_index[b.index()] > rpo_index[a.index()] {
                    b = idom[b.index()].unwrap();
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in order.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in &preds[block.index()] {
                    if idom[p.index()].is_some() {
                        new_idom = Some(match new_idom {
                            Some(cur) => intersect(&idom, cur, p),
                            None => p,
                        });
                    }
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }

        idom[self.entry.index()] = None;
        idom
    }

    /// True when `a` dominates `b`.
    pub fn dominates(idom: &[Option<BlockId>], entry: BlockId, a: BlockId, b: BlockId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            if cur == entry {
                return false;
            }
            match idom[cur.index()] {
                Some(next) => cur = next,
                None => return false,
            }
        }
    }

    /// Predecessor lists for every block.
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for (i, block) in self.blocks.iter().enumerate() {
            if let Some(term) = &block.term {
                for succ in term.successors() {
                    preds[succ.index()].push(BlockId(i as u32));
                }
            }
        }
        preds
    }
}
