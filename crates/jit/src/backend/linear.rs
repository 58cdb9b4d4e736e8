//! Flattening of the SSA program into the executable form shared by both
//! engines: one 16-byte slot per value, block order resolved to instruction
//! indices, stack slots packed into a trailing arena.

use crate::ir::{BinOp, CastOp, CmpOp, Function, InstrKind, Intrinsic, Terminator, Value};
use crate::ty::{MemOrder, Ty};
use rustc_hash::FxHashMap;

#[derive(Clone, Debug)]
pub enum LinOp {
    Arg {
        dst: u16,
        index: u8,
        ty: Ty,
    },
    Const {
        dst: u16,
        bits: [u32; 4],
    },
    Bin {
        op: BinOp,
        ty: Ty,
        dst: u16,
        a: u16,
        b: u16,
    },
    Neg {
        ty: Ty,
        dst: u16,
        a: u16,
    },
    Not {
        ty: Ty,
        dst: u16,
        a: u16,
    },
    Cmp {
        op: CmpOp,
        ty: Ty,
        dst: u16,
        a: u16,
        b: u16,
    },
    Select {
        cond_ty: Ty,
        val_ty: Ty,
        dst: u16,
        cond: u16,
        on_true: u16,
        on_false: u16,
    },
    Cast {
        op: CastOp,
        from: Ty,
        to: Ty,
        dst: u16,
        a: u16,
    },
    Swizzle {
        ty: Ty,
        dst: u16,
        a: u16,
        sel: u16,
    },
    Shuffle {
        ty: Ty,
        dst: u16,
        a: u16,
        b: u16,
        sel: u16,
    },
    Insert {
        ty: Ty,
        dst: u16,
        vec: u16,
        scalar: u16,
        lane: u8,
    },
    Extract {
        vec_ty: Ty,
        dst: u16,
        vec: u16,
        lane: u8,
    },
    StackAddr {
        dst: u16,
        offset: u32,
    },
    Load {
        ty: Ty,
        dst: u16,
        ptr: u16,
        order: Option<MemOrder>,
    },
    Store {
        ty: Ty,
        ptr: u16,
        src: u16,
        order: Option<MemOrder>,
    },
    Gep {
        dst: u16,
        ptr: u16,
        offset: u16,
        offset_ty: Ty,
    },
    Intr {
        op: Intrinsic,
        ty: Ty,
        dst: u16,
        a: u16,
        b: Option<u16>,
        c: Option<u16>,
    },
    Jump {
        target: u32,
    },
    Branch {
        cond: u16,
        then_to: u32,
        else_to: u32,
    },
    Ret {
        src: Option<u16>,
    },
}

#[derive(Clone, Debug)]
pub struct LinearProgram {
    pub name: String,
    pub ops: Vec<LinOp>,
    pub slot_count: u32,
    pub stack_bytes: u32,
}

impl LinearProgram {
    /// Total runtime buffer size: value slots followed by the stack arena.
    pub fn buffer_bytes(&self) -> usize {
        self.slot_count as usize * 16 + self.stack_bytes as usize
    }

    pub fn stack_base(&self) -> u32 {
        self.slot_count * 16
    }
}

pub fn lower(func: &Function) -> LinearProgram {
    assert!(
        func.values.len() < u16::MAX as usize,
        "routine exceeds the slot addressing range"
    );
    let order = func.rpo();

    let mut slots: FxHashMap<Value, u16> = FxHashMap::default();
    let mut slot_count: u16 = 0;
    let mut slot_of = |v: Value, slots: &mut FxHashMap<Value, u16>, count: &mut u16| -> u16 {
        *slots.entry(v).or_insert_with(|| {
            let s = *count;
            *count += 1;
            s
        })
    };

    // Stack offsets for allocas, 16-byte aligned.
    let mut stack_bytes: u32 = 0;
    let mut alloca_offset: FxHashMap<Value, u32> = FxHashMap::default();
    for &block in &order {
        for &v in &func.blocks[block.index()].instrs {
            if let InstrKind::Alloca { size } = func.instr(v).kind {
                alloca_offset.insert(v, stack_bytes);
                stack_bytes += (size + 15) & !15;
            }
        }
    }

    let mut ops = Vec::new();
    let mut block_start: FxHashMap<u32, u32> = FxHashMap::default();

    for &block in &order {
        block_start.insert(block.0, ops.len() as u32);

        for &v in &func.blocks[block.index()].instrs {
            let instr = func.instr(v);
            let ty = instr.ty;
            let dst = slot_of(v, &mut slots, &mut slot_count);
            let mut s = |val: Value| -> u16 { *slots.get(&val).expect("use before definition") };

            let op = match &instr.kind {
                InstrKind::Arg(i) => LinOp::Arg { dst, index: *i, ty },
                InstrKind::Const(c) => LinOp::Const { dst, bits: c.bits },
                InstrKind::Bin(op, a, b) => LinOp::Bin {
                    op: *op,
                    ty,
                    dst,
                    a: s(*a),
                    b: s(*b),
                },
                InstrKind::Neg(a) => LinOp::Neg { ty, dst, a: s(*a) },
                InstrKind::Not(a) => LinOp::Not { ty, dst, a: s(*a) },
                InstrKind::Cmp(op, a, b) => LinOp::Cmp {
                    op: *op,
                    ty: func.ty(*a),
                    dst,
                    a: s(*a),
                    b: s(*b),
                },
                InstrKind::Select(cond, t, f) => LinOp::Select {
                    cond_ty: func.ty(*cond),
                    val_ty: ty,
                    dst,
                    cond: s(*cond),
                    on_true: s(*t),
                    on_false: s(*f),
                },
                InstrKind::Cast(op, a) => LinOp::Cast {
                    op: *op,
                    from: func.ty(*a),
                    to: ty,
                    dst,
                    a: s(*a),
                },
                InstrKind::Swizzle(a, sel) => LinOp::Swizzle {
                    ty,
                    dst,
                    a: s(*a),
                    sel: *sel,
                },
                InstrKind::Shuffle(a, b, sel) => LinOp::Shuffle {
                    ty,
                    dst,
                    a: s(*a),
                    b: s(*b),
                    sel: *sel,
                },
                InstrKind::Insert(vec, scalar, lane) => LinOp::Insert {
                    ty,
                    dst,
                    vec: s(*vec),
                    scalar: s(*scalar),
                    lane: *lane,
                },
                InstrKind::Extract(vec, lane) => LinOp::Extract {
                    vec_ty: func.ty(*vec),
                    dst,
                    vec: s(*vec),
                    lane: *lane,
                },
                InstrKind::Alloca { .. } => LinOp::StackAddr {
                    dst,
                    offset: alloca_offset[&v],
                },
                InstrKind::Load { ptr, order } => LinOp::Load {
                    ty,
                    dst,
                    ptr: s(*ptr),
                    order: *order,
                },
                InstrKind::Store { ptr, value, order } => LinOp::Store {
                    ty: func.ty(*value),
                    ptr: s(*ptr),
                    src: s(*value),
                    order: *order,
                },
                InstrKind::Gep { ptr, offset } => LinOp::Gep {
                    dst,
                    ptr: s(*ptr),
                    offset: s(*offset),
                    offset_ty: func.ty(*offset),
                },
                InstrKind::Intr(op, a, b, c) => LinOp::Intr {
                    op: *op,
                    ty,
                    dst,
                    a: s(*a),
                    b: b.map(&mut s),
                    c: c.map(&mut s),
                },
            };
            ops.push(op);
        }

        match func.blocks[block.index()].term.as_ref() {
            Some(Terminator::Jump(b)) => ops.push(LinOp::Jump { target: b.0 }),
            Some(Terminator::Branch {
                cond,
                then_to,
                else_to,
            }) => ops.push(LinOp::Branch {
                cond: slots[cond],
                then_to: then_to.0,
                else_to: else_to.0,
            }),
            Some(Terminator::Ret(v)) => ops.push(LinOp::Ret {
                src: v.map(|v| slots[&v]),
            }),
            None => ops.push(LinOp::Ret { src: None }),
        }
    }

    // Patch block ids into instruction indices.
    for op in &mut ops {
        match op {
            LinOp::Jump { target } => *target = block_start[target],
            LinOp::Branch {
                then_to, else_to, ..
            } => {
                *then_to = block_start[then_to];
                *else_to = block_start[else_to];
            }
            _ => {}
        }
    }

    LinearProgram {
        name: func.name.clone(),
        ops,
        slot_count: slot_count as u32,
        stack_bytes,
    }
}
