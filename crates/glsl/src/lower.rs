//! AST → shader IR lowering.
//!
//! Walks the typed AST and emits the linear, register-allocated program.
//! Locals get stable home registers; expression scratch is allocated above
//! the homes and recycled per statement. Matrix arithmetic expands per
//! column, `a*b+c` fuses to `mad`, user functions are inlined (a one-trip
//! loop wrapper gives `return` a structured exit), and restricted loops emit
//! a `Loop` opcode carrying the bounds recovered by the validator.

use crate::ast::*;
use crate::diag::{DiagnosticKind, Diagnostics};
use crate::pp::Location;
use rustc_hash::FxHashMap;
use shale_core::ir::{
    AttributeInfo, Bank, Dst, Instruction, Opcode, Reg, SamplerDims, SamplerInfo, ShaderIr,
    ShaderKind, Src, Swizzle, UniformBaseType, UniformInfo, VaryingInfo, SWIZZLE_XYZW,
};

/// An expression value: a register with a lane view. Matrices and arrays are
/// register ranges starting at `reg`; `rel` adds a loop-index displacement
/// resolved at specialization time.
#[derive(Clone, Copy, Debug)]
struct Val {
    reg: Reg,
    swizzle: Swizzle,
    rel: Option<Reg>,
}

impl Val {
    fn of(reg: Reg) -> Val {
        Val {
            reg,
            swizzle: SWIZZLE_XYZW,
            rel: None,
        }
    }

    fn src(&self) -> Src {
        Src {
            reg: self.reg,
            swizzle: self.swizzle,
            rel: self.rel,
        }
    }
}

fn compose(outer: Swizzle, inner: Swizzle) -> Swizzle {
    let mut lanes = [0u8; 4];
    for (i, lane) in lanes.iter_mut().enumerate() {
        *lane = inner.lane(outer.lane(i)) as u8;
    }
    Swizzle::from_lanes(lanes)
}

/// Splat of lane `i`.
fn splat(i: u8) -> Swizzle {
    Swizzle::splat(i)
}

struct InlineFrame {
    ret_reg: Option<Reg>,
    label: u16,
}

pub struct Lowerer<'a> {
    ast: &'a Ast,
    diags: &'a mut Diagnostics,
    ir: ShaderIr,
    kind: ShaderKind,

    homes: FxHashMap<SymbolId, Reg>,
    next_perm: u32,
    scratch: u32,
    scratch_high: u32,

    const_pool: FxHashMap<[u32; 4], u32>,
    uniform_index: FxHashMap<SymbolId, usize>,
    sampler_index: FxHashMap<SymbolId, usize>,

    next_label: u16,
    loop_labels: Vec<u16>,
    inline_stack: Vec<InlineFrame>,
    call_stack: Vec<usize>,
    line: u32,
}

pub fn lower(
    ast: &Ast,
    kind: ShaderKind,
    version: u32,
    diags: &mut Diagnostics,
) -> Option<ShaderIr> {
    let mut lowerer = Lowerer {
        ast,
        diags,
        ir: ShaderIr {
            kind: Some(kind),
            version: version as u16,
            ..ShaderIr::default()
        },
        kind,
        homes: FxHashMap::default(),
        next_perm: 0,
        scratch: 0,
        scratch_high: 0,
        const_pool: FxHashMap::default(),
        uniform_index: FxHashMap::default(),
        sampler_index: FxHashMap::default(),
        next_label: 0,
        loop_labels: Vec::new(),
        inline_stack: Vec::new(),
        call_stack: Vec::new(),
        line: 0,
    };

    lowerer.collect_interface();

    let Some(main) = ast.main else {
        diags.report(
            DiagnosticKind::SyntaxError,
            Location::default(),
            "missing main",
        );
        return None;
    };

    // File-scope initializers run before main.
    for (symbol, init) in &ast.globals {
        let ty = ast.symbol(*symbol).ty;
        if let Some(init) = init {
            if ty.qualifier == Qualifier::Global || ty.qualifier == Qualifier::Temporary {
                lowerer.stmt_begin();
                let dst = lowerer.home(*symbol);
                let value = lowerer.lower_expr(*init);
                lowerer.mov(ty, Dst::new(dst), value);
            }
        }
    }

    let body = ast.functions[main].body?;
    lowerer.lower_stmt(body);
    lowerer.emit_op(Opcode::Ret);

    lowerer.ir.temp_count = lowerer.next_perm.max(lowerer.scratch_high);

    if lowerer.diags.has_errors() {
        None
    } else {
        Some(lowerer.ir)
    }
}

impl Lowerer<'_> {
    // ── interface collection ─────────────────────────────────────────

    fn collect_interface(&mut self) {
        let mut input_next: u32 = match self.kind {
            ShaderKind::Vertex => 0,
            // 0 = fragment coordinate, 1 = facing flag
            ShaderKind::Fragment => 2,
        };
        let mut output_next: u32 = match self.kind {
            // 0 = position, 1 = point size
            ShaderKind::Vertex => 2,
            // 0..3 = color attachments, 4 = depth
            ShaderKind::Fragment => 0,
        };
        let mut uniform_next: u32 = 0;
        let mut sampler_next: u32 = 0;

        for (symbol, _) in &self.ast.globals {
            let sym = self.ast.symbol(*symbol);
            let ty = sym.ty;
            let regs = ty.total_registers();

            match ty.qualifier {
                Qualifier::Attribute => {
                    self.homes.insert(*symbol, Reg::input(input_next));
                    self.ir.attributes.push(AttributeInfo {
                        name: sym.name.clone(),
                        reg: input_next,
                        components: ty.size,
                    });
                    input_next += regs;
                }
                Qualifier::VaryingIn | Qualifier::VaryingOut => {
                    let bank = if ty.qualifier == Qualifier::VaryingIn {
                        Bank::Input
                    } else {
                        Bank::Output
                    };
                    let reg = match self.kind {
                        ShaderKind::Vertex => {
                            let r = output_next;
                            output_next += regs;
                            r
                        }
                        ShaderKind::Fragment => {
                            let r = input_next;
                            input_next += regs;
                            r
                        }
                    };
                    self.homes.insert(*symbol, Reg::new(bank, reg));
                    self.ir.varyings.push(VaryingInfo {
                        name: sym.name.clone(),
                        reg,
                        components: ty.size,
                        array_len: ty.array.unwrap_or(1),
                        interpolation: ty.interpolation,
                        invariant: ty.invariant || self.ast.invariant_all,
                    });
                }
                Qualifier::Uniform => {
                    if ty.is_sampler() {
                        self.homes.insert(*symbol, Reg::sampler(sampler_next));
                        self.sampler_index.insert(*symbol, self.ir.samplers.len());
                        self.ir.samplers.push(SamplerInfo {
                            name: sym.name.clone(),
                            unit: sampler_next,
                            dims: if ty.basic == BasicType::SamplerCube {
                                SamplerDims::Cube
                            } else {
                                SamplerDims::Dim2D
                            },
                            used: false,
                        });
                        sampler_next += ty.array.unwrap_or(1);
                    } else {
                        self.homes.insert(*symbol, Reg::uniform(uniform_next));
                        self.uniform_index.insert(*symbol, self.ir.uniforms.len());
                        self.ir.uniforms.push(UniformInfo {
                            name: sym.name.clone(),
                            reg: uniform_next,
                            columns: ty.size,
                            rows: ty.rows,
                            array_len: ty.array.unwrap_or(1),
                            base: match ty.basic {
                                BasicType::Int => UniformBaseType::Int,
                                BasicType::UInt => UniformBaseType::UInt,
                                BasicType::Bool => UniformBaseType::Bool,
                                _ => UniformBaseType::Float,
                            },
                            used: false,
                        });
                        uniform_next += regs;
                    }
                }
                Qualifier::FragData => {
                    // User fragment output.
                    self.homes.insert(*symbol, Reg::output(output_next));
                    output_next += regs;
                }
                _ => {
                    // Plain global: a permanent temp.
                    let reg = self.alloc_perm(regs);
                    self.homes.insert(*symbol, Reg::temp(reg));
                }
            }
        }

        // Built-in variables have fixed homes.
        for (i, sym) in self.ast.symbols.iter().enumerate() {
            let id = SymbolId(i as u32);
            let home = match sym.builtin {
                Some(BuiltinVar::Position) => Reg::output(0),
                Some(BuiltinVar::PointSize) => Reg::output(1),
                Some(BuiltinVar::FragCoord) => Reg::input(0),
                Some(BuiltinVar::FrontFacing) => Reg::input(1),
                Some(BuiltinVar::FragColor) => Reg::output(0),
                Some(BuiltinVar::FragData) => Reg::output(0),
                Some(BuiltinVar::FragDepth) => Reg::output(4),
                None => continue,
            };
            self.homes.insert(id, home);
        }
    }

    // ── registers ────────────────────────────────────────────────────

    fn alloc_perm(&mut self, count: u32) -> u32 {
        let r = self.next_perm;
        self.next_perm += count;
        r
    }

    fn stmt_begin(&mut self) {
        self.scratch = self.next_perm;
    }

    fn alloc_scratch(&mut self) -> Reg {
        self.alloc_scratch_n(1)
    }

    fn alloc_scratch_n(&mut self, count: u32) -> Reg {
        let r = self.scratch.max(self.next_perm);
        self.scratch = r + count;
        self.scratch_high = self.scratch_high.max(self.scratch);
        Reg::temp(r)
    }

    fn home(&mut self, symbol: SymbolId) -> Reg {
        if let Some(&reg) = self.homes.get(&symbol) {
            return reg;
        }
        let ty = self.ast.symbol(symbol).ty;
        let reg = Reg::temp(self.alloc_perm(ty.total_registers()));
        self.homes.insert(symbol, reg);
        reg
    }

    fn constant(&mut self, bits: [u32; 4]) -> Reg {
        if let Some(&idx) = self.const_pool.get(&bits) {
            return Reg::constant(idx);
        }
        let idx = self.ir.constants.len() as u32;
        self.ir.constants.push(bits);
        self.const_pool.insert(bits, idx);
        Reg::constant(idx)
    }

    fn const_f32(&mut self, v: f32) -> Reg {
        self.constant([v.to_bits(); 4])
    }

    fn const_val(&mut self, v: &ConstVal) -> Reg {
        let mut bits = [0u32; 4];
        for (i, s) in v.iter().take(4).enumerate() {
            bits[i] = s.bits();
        }
        // Splat single scalars across the lanes.
        if v.len() == 1 {
            bits = [bits[0]; 4];
        }
        self.constant(bits)
    }

    // ── emission ─────────────────────────────────────────────────────

    fn push(&mut self, inst: Instruction) {
        self.ir.instructions.push(inst);
    }

    fn emit_op(&mut self, op: Opcode) {
        let mut i = Instruction::new(op);
        i.line = self.line;
        self.push(i);
    }

    fn emit1(&mut self, op: Opcode, dst: Dst, a: Val) {
        let mut i = Instruction::new(op).with_dst(dst).with_src(0, a.src());
        i.line = self.line;
        self.push(i);
    }

    fn emit2(&mut self, op: Opcode, dst: Dst, a: Val, b: Val) {
        let mut i = Instruction::new(op)
            .with_dst(dst)
            .with_src(0, a.src())
            .with_src(1, b.src());
        i.line = self.line;
        self.push(i);
    }

    fn emit3(&mut self, op: Opcode, dst: Dst, a: Val, b: Val, c: Val) {
        let mut i = Instruction::new(op)
            .with_dst(dst)
            .with_src(0, a.src())
            .with_src(1, b.src())
            .with_src(2, c.src());
        i.line = self.line;
        self.push(i);
    }

    fn mov(&mut self, ty: Type, dst: Dst, value: Val) {
        if ty.is_matrix() || ty.is_array() {
            let regs = ty.total_registers();
            for i in 0..regs {
                let mut d = dst;
                d.reg.index += i;
                let mut v = value;
                v.reg.index += i;
                self.emit1(Opcode::Mov, d, v);
            }
        } else {
            let mut d = dst;
            d.mask &= (1u8 << ty.size) - 1;
            self.emit1(Opcode::Mov, d, value);
        }
    }

    fn label(&mut self) -> u16 {
        self.next_label += 1;
        self.next_label
    }

    // ── statements ───────────────────────────────────────────────────

    fn lower_stmt(&mut self, id: StmtId) {
        self.stmt_begin();
        let stmt = self.ast.stmt(id).clone();
        self.line = stmt.loc.line;

        match stmt.kind {
            StmtKind::Empty => {}
            StmtKind::Expr(e) => {
                self.lower_expr(e);
            }
            StmtKind::Decl(decls) => {
                for (symbol, init) in decls {
                    let home = self.home(symbol);
                    if let Some(init) = init {
                        let ty = self.ast.symbol(symbol).ty;
                        let value = self.lower_expr(init);
                        let converted = self.convert_to(ty.basic, self.ast.expr(init).ty, value, ty);
                        self.mov(ty, Dst::new(home), converted);
                    }
                }
            }
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.lower_stmt(s);
                }
            }
            StmtKind::If(cond, then_s, else_s) => {
                let c = self.lower_expr(cond);
                let label = self.label();
                let mut inst = Instruction::new(Opcode::If).with_src(0, c.src());
                inst.label = label;
                inst.line = self.line;
                self.push(inst);

                self.lower_stmt(then_s);

                if let Some(else_s) = else_s {
                    let mut inst = Instruction::new(Opcode::Else);
                    inst.label = label;
                    self.push(inst);
                    self.lower_stmt(else_s);
                }

                let mut inst = Instruction::new(Opcode::EndIf);
                inst.label = label;
                self.push(inst);
            }
            StmtKind::For { body, .. } => {
                let Some(meta) = stmt.loop_meta else {
                    // The validator rejected this loop; nothing to emit.
                    return;
                };
                let index_home = self.home(meta.index);
                let label = self.label();

                let mut inst = Instruction::new(Opcode::Loop);
                inst.label = label;
                inst.unroll = meta.unroll;
                inst.loop_info = Some(shale_core::ir::LoopInfo {
                    iterations: meta.iterations,
                    index: index_home,
                    init: meta.init.bits(),
                    step: meta.step.bits(),
                    float: matches!(meta.init, Scalar::F(_)),
                });
                inst.line = self.line;
                self.push(inst);

                self.loop_labels.push(label);
                self.lower_stmt(body);
                self.loop_labels.pop();

                let mut inst = Instruction::new(Opcode::EndLoop);
                inst.label = label;
                self.push(inst);
            }
            StmtKind::While(..) | StmtKind::DoWhile(..) => {
                // Rejected by the validator.
            }
            StmtKind::Return(value) => {
                if let Some(frame) = self.inline_stack.last() {
                    let ret_reg = frame.ret_reg;
                    let label = frame.label;
                    if let (Some(ret_reg), Some(value)) = (ret_reg, value) {
                        let ty = self.ast.expr(value).ty;
                        let v = self.lower_expr(value);
                        self.mov(ty, Dst::new(ret_reg), v);
                    }
                    let mut inst = Instruction::new(Opcode::Break);
                    inst.label = label;
                    self.push(inst);
                } else {
                    if let Some(value) = value {
                        self.lower_expr(value);
                    }
                    self.emit_op(Opcode::Ret);
                }
            }
            StmtKind::Break => {
                let mut inst = Instruction::new(Opcode::Break);
                inst.label = self.loop_labels.last().copied().unwrap_or(0);
                self.push(inst);
            }
            StmtKind::Continue => {
                let mut inst = Instruction::new(Opcode::Continue);
                inst.label = self.loop_labels.last().copied().unwrap_or(0);
                self.push(inst);
            }
            StmtKind::Discard => self.emit_op(Opcode::Discard),
        }
    }

    // ── expressions ──────────────────────────────────────────────────

    fn lower_expr(&mut self, id: ExprId) -> Val {
        let expr = self.ast.expr(id).clone();
        self.line = expr.loc.line;

        // Folded constants skip code generation entirely.
        if let Some(c) = &expr.constant {
            if !expr.ty.is_matrix() && !expr.ty.is_array() {
                return Val::of(self.const_val(c));
            }
        }

        match expr.kind {
            ExprKind::Literal(v) => Val::of(self.const_val(&v)),
            ExprKind::Symbol(s) => {
                self.mark_used(s);
                Val::of(self.home(s))
            }
            ExprKind::Swizzle(base, lanes, count) => {
                let v = self.lower_expr(base);
                let mut full = lanes;
                for i in count as usize..4 {
                    full[i] = lanes[count as usize - 1];
                }
                Val {
                    reg: v.reg,
                    swizzle: compose(Swizzle::from_lanes(full), v.swizzle),
                    rel: v.rel,
                }
            }
            ExprKind::Index(base, index) => self.lower_index(base, index),
            ExprKind::Unary(op, operand) => self.lower_unary(op, operand, expr.ty),
            ExprKind::Binary(op, l, r) => self.lower_binary(op, l, r, expr.ty),
            ExprKind::Assign(op, l, r) => self.lower_assign(op, l, r),
            ExprKind::Ternary(c, t, e) => {
                let cv = self.lower_expr(c);
                let tv = self.lower_expr(t);
                let ev = self.lower_expr(e);
                let out = self.alloc_scratch();
                let cond_splat = Val {
                    reg: cv.reg,
                    swizzle: compose(splat(0), cv.swizzle),
                    rel: cv.rel,
                };
                self.emit3(Opcode::Select, Dst::new(out), cond_splat, tv, ev);
                Val::of(out)
            }
            ExprKind::Comma(l, r) => {
                self.lower_expr(l);
                self.lower_expr(r)
            }
            ExprKind::Call(func, args) => self.lower_call(func, &args),
            ExprKind::Builtin(builtin, args) => self.lower_builtin(builtin, &args, expr.ty),
            ExprKind::Constructor(ty, args) => self.lower_constructor(ty, &args),
        }
    }

    fn mark_used(&mut self, symbol: SymbolId) {
        if let Some(&i) = self.uniform_index.get(&symbol) {
            self.ir.uniforms[i].used = true;
        }
        if let Some(&i) = self.sampler_index.get(&symbol) {
            self.ir.samplers[i].used = true;
        }
    }

    fn lower_index(&mut self, base: ExprId, index: ExprId) -> Val {
        let base_ty = self.ast.expr(base).ty;
        let v = self.lower_expr(base);

        // Constant index
        if let Some(c) = self.ast.expr(index).constant.clone() {
            let i = c[0].as_i32().max(0) as u32;
            if base_ty.is_array() || base_ty.is_matrix() {
                let stride = if base_ty.is_array() {
                    base_ty.element().registers()
                } else {
                    1
                };
                let mut reg = v.reg;
                reg.index += i * stride;
                return Val {
                    reg,
                    swizzle: v.swizzle,
                    rel: v.rel,
                };
            }
            // Vector component
            return Val {
                reg: v.reg,
                swizzle: compose(splat(i.min(3) as u8), v.swizzle),
                rel: v.rel,
            };
        }

        // Dynamic (loop) index
        let idx = self.lower_expr(index);
        if base_ty.is_array() || base_ty.is_matrix() {
            // Relative operand: resolved when the loop is expanded.
            return Val {
                reg: v.reg,
                swizzle: v.swizzle,
                rel: Some(idx.reg),
            };
        }

        // Dynamic vector component: a compare/select chain.
        let out = self.alloc_scratch();
        let idx_splat = Val {
            reg: idx.reg,
            swizzle: compose(splat(0), idx.swizzle),
            rel: idx.rel,
        };
        let first = Val {
            reg: v.reg,
            swizzle: compose(splat(0), v.swizzle),
            rel: v.rel,
        };
        self.emit1(Opcode::Mov, Dst::new(out), first);
        for lane in 1..base_ty.size {
            let k = self.constant([lane as u32; 4]);
            let mask = self.alloc_scratch();
            self.emit2(Opcode::CmpEq, Dst::new(mask), idx_splat, Val::of(k));
            let lane_val = Val {
                reg: v.reg,
                swizzle: compose(splat(lane), v.swizzle),
                rel: v.rel,
            };
            self.emit3(
                Opcode::Select,
                Dst::new(out),
                Val::of(mask),
                lane_val,
                Val::of(out),
            );
        }
        Val::of(out)
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: ExprId, ty: Type) -> Val {
        let oty = self.ast.expr(operand).ty;

        match op {
            UnaryOp::Neg => {
                let v = self.lower_expr(operand);
                if ty.is_matrix() {
                    let out = self.alloc_scratch_n(ty.registers());
                    for i in 0..ty.registers() {
                        let mut d = Dst::new(out);
                        d.reg.index += i;
                        let mut s = v;
                        s.reg.index += i;
                        self.emit1(Opcode::Neg, d, s);
                    }
                    return Val::of(out);
                }
                let out = self.alloc_scratch();
                self.emit1(Opcode::Neg, Dst::new(out), v);
                Val::of(out)
            }
            UnaryOp::LogicalNot | UnaryOp::BitNot => {
                let v = self.lower_expr(operand);
                let out = self.alloc_scratch();
                self.emit1(Opcode::Not, Dst::new(out), v);
                Val::of(out)
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let (dst, read) = self.lower_lvalue(operand);
                let one = if oty.basic == BasicType::Float {
                    self.const_f32(1.0)
                } else {
                    self.constant([1; 4])
                };
                let post = matches!(op, UnaryOp::PostInc | UnaryOp::PostDec);
                let result = if post {
                    let saved = self.alloc_scratch();
                    self.mov(oty, Dst::new(saved), read);
                    Val::of(saved)
                } else {
                    read
                };
                let add = matches!(op, UnaryOp::PreInc | UnaryOp::PostInc);
                self.emit2(
                    if add { Opcode::Add } else { Opcode::Sub },
                    dst,
                    read,
                    Val::of(one),
                );
                if post {
                    result
                } else {
                    read
                }
            }
        }
    }

    /// Convert a value to the target basic type when it differs.
    fn convert_to(&mut self, target: BasicType, from: Type, v: Val, _ty: Type) -> Val {
        if from.basic == target || !from.is_numeric() {
            return v;
        }
        let op = match (from.basic, target) {
            (BasicType::Int, BasicType::Float) => Opcode::I2F,
            (BasicType::UInt, BasicType::Float) => Opcode::U2F,
            (BasicType::Float, BasicType::Int) => Opcode::F2I,
            (BasicType::Float, BasicType::UInt) => Opcode::F2U,
            _ => return v,
        };
        let out = self.alloc_scratch();
        self.emit1(op, Dst::new(out), v);
        Val::of(out)
    }

    fn lower_binary(&mut self, op: BinaryOp, l: ExprId, r: ExprId, ty: Type) -> Val {
        use BinaryOp::*;

        let lty = self.ast.expr(l).ty;
        let rty = self.ast.expr(r).ty;

        // Matrix forms of `*` and the component-wise matrix operators.
        if op == Mul && (lty.is_matrix() || rty.is_matrix()) {
            return self.lower_matrix_mul(l, r, ty);
        }
        if lty.is_matrix() && rty.is_matrix() {
            let a = self.lower_expr(l);
            let b = self.lower_expr(r);
            let out = self.alloc_scratch_n(ty.registers());
            let opcode = match op {
                Add => Opcode::Add,
                Sub => Opcode::Sub,
                Div => Opcode::Div,
                _ => Opcode::Add,
            };
            for i in 0..ty.registers() {
                let mut d = Dst::new(out);
                d.reg.index += i;
                let mut x = a;
                x.reg.index += i;
                let mut y = b;
                y.reg.index += i;
                self.emit2(opcode, d, x, y);
            }
            return Val::of(out);
        }

        // Fuse `a*b + c` into mad.
        if op == Add && ty.basic == BasicType::Float && !ty.is_matrix() {
            if let ExprKind::Binary(Mul, ml, mr) = self.ast.expr(l).kind.clone() {
                let mlt = self.ast.expr(ml).ty;
                let mrt = self.ast.expr(mr).ty;
                if !mlt.is_matrix() && !mrt.is_matrix() {
                    let a = self.lower_operand(ml, ty);
                    let b = self.lower_operand(mr, ty);
                    let c = self.lower_operand(r, ty);
                    let out = self.alloc_scratch();
                    self.emit3(Opcode::Mad, Dst::new(out), a, b, c);
                    return Val::of(out);
                }
            }
        }

        let a = self.lower_operand(l, ty);
        let b = self.lower_operand(r, ty);

        let opcode = match op {
            Add => Opcode::Add,
            Sub => Opcode::Sub,
            Mul => Opcode::Mul,
            Div => Opcode::Div,
            Mod => Opcode::Mod,
            Shl => Opcode::Shl,
            Shr => Opcode::Shr,
            BitAnd | LogicalAnd => Opcode::And,
            BitOr | LogicalOr => Opcode::Or,
            BitXor | LogicalXor => Opcode::Xor,
            Eq => Opcode::CmpEq,
            Ne => Opcode::CmpNe,
            Lt => Opcode::CmpLt,
            Le => Opcode::CmpLe,
            Gt => Opcode::CmpGt,
            Ge => Opcode::CmpGe,
        };

        // Aggregate == / != compares per component first and reduces below;
        // "any component differs" is the complement of "all equal".
        let operand_size = lty.size.max(rty.size);
        let opcode = if matches!(op, Eq | Ne) && operand_size > 1 {
            Opcode::CmpEq
        } else {
            opcode
        };

        let out = self.alloc_scratch();
        self.emit2(opcode, Dst::new(out), a, b);
        if matches!(op, Eq | Ne) && operand_size > 1 {
            let reduced = self.alloc_scratch();
            self.emit2(
                Opcode::Mul,
                Dst::masked(reduced, 1),
                Val {
                    reg: out,
                    swizzle: splat(0),
                    rel: None,
                },
                Val {
                    reg: out,
                    swizzle: splat(1),
                    rel: None,
                },
            );
            for c in 2..operand_size {
                self.emit2(
                    Opcode::Mul,
                    Dst::masked(reduced, 1),
                    Val::of(reduced),
                    Val {
                        reg: out,
                        swizzle: splat(c),
                        rel: None,
                    },
                );
            }
            if op == Ne {
                let one = self.const_f32(1.0);
                self.emit2(
                    Opcode::Sub,
                    Dst::masked(reduced, 1),
                    Val::of(one),
                    Val::of(reduced),
                );
            }
            return Val::of(reduced);
        }

        Val::of(out)
    }

    /// Lower an operand of a binary expression: broadcast scalars and insert
    /// int→float conversions so both sides match the result type.
    fn lower_operand(&mut self, e: ExprId, result: Type) -> Val {
        let ty = self.ast.expr(e).ty;
        let mut v = self.lower_expr(e);
        if ty.is_scalar() && result.size > 1 {
            v = Val {
                reg: v.reg,
                swizzle: compose(splat(0), v.swizzle),
                rel: v.rel,
            };
        }
        if result.is_numeric() && ty.basic != result.basic {
            return self.convert_to(result.basic, ty, v, result);
        }
        v
    }

    fn lower_matrix_mul(&mut self, l: ExprId, r: ExprId, ty: Type) -> Val {
        let lty = self.ast.expr(l).ty;
        let rty = self.ast.expr(r).ty;
        let a = self.lower_expr(l);
        let b = self.lower_expr(r);

        // mat * scalar / scalar * mat
        if lty.is_matrix() && rty.is_scalar() || rty.is_matrix() && lty.is_scalar() {
            let (m, s, regs) = if lty.is_matrix() {
                (a, b, lty.registers())
            } else {
                (b, a, rty.registers())
            };
            let s = Val {
                reg: s.reg,
                swizzle: compose(splat(0), s.swizzle),
                rel: s.rel,
            };
            let out = self.alloc_scratch_n(regs);
            for i in 0..regs {
                let mut d = Dst::new(out);
                d.reg.index += i;
                let mut col = m;
                col.reg.index += i;
                self.emit2(Opcode::Mul, d, col, s);
            }
            return Val::of(out);
        }

        // mat * vec: Σ column_i * v[i]
        if lty.is_matrix() && rty.is_vector() {
            let out = self.alloc_scratch();
            let first = Val {
                reg: b.reg,
                swizzle: compose(splat(0), b.swizzle),
                rel: b.rel,
            };
            self.emit2(Opcode::Mul, Dst::new(out), a, first);
            for i in 1..lty.size {
                let mut col = a;
                col.reg.index += i as u32;
                let lane = Val {
                    reg: b.reg,
                    swizzle: compose(splat(i), b.swizzle),
                    rel: b.rel,
                };
                self.emit3(Opcode::Mad, Dst::new(out), col, lane, Val::of(out));
            }
            return Val::of(out);
        }

        // vec * mat: component j = dot(v, column_j)
        if lty.is_vector() && rty.is_matrix() {
            let out = self.alloc_scratch();
            let dot = match lty.size {
                2 => Opcode::Dp2,
                3 => Opcode::Dp3,
                _ => Opcode::Dp4,
            };
            for j in 0..rty.size {
                let mut col = b;
                col.reg.index += j as u32;
                self.emit2(dot, Dst::masked(out, 1 << j), a, col);
            }
            return Val::of(out);
        }

        // mat * mat: result column j = a * b_col_j
        let n = ty.size;
        let out = self.alloc_scratch_n(n as u32);
        for j in 0..n {
            let mut bcol = b;
            bcol.reg.index += j as u32;
            let mut d = Dst::new(out);
            d.reg.index += j as u32;

            let first = Val {
                reg: bcol.reg,
                swizzle: compose(splat(0), bcol.swizzle),
                rel: bcol.rel,
            };
            self.emit2(Opcode::Mul, d, a, first);
            for i in 1..n {
                let mut acol = a;
                acol.reg.index += i as u32;
                let lane = Val {
                    reg: bcol.reg,
                    swizzle: compose(splat(i), bcol.swizzle),
                    rel: bcol.rel,
                };
                self.emit3(Opcode::Mad, d, acol, lane, Val::of(d.reg));
            }
        }
        Val::of(out)
    }

    /// An assignable destination plus a readable view of it.
    fn lower_lvalue(&mut self, e: ExprId) -> (Dst, Val) {
        let expr = self.ast.expr(e).clone();
        match expr.kind {
            ExprKind::Symbol(s) => {
                let reg = self.home(s);
                let mask = if expr.ty.is_matrix() || expr.ty.is_array() {
                    0xf
                } else {
                    (1u8 << expr.ty.size) - 1
                };
                (Dst::masked(reg, mask), Val::of(reg))
            }
            ExprKind::Index(base, index) => {
                let (base_dst, base_val) = self.lower_lvalue(base);
                let base_ty = self.ast.expr(base).ty;

                if let Some(c) = self.ast.expr(index).constant.clone() {
                    let i = c[0].as_i32().max(0) as u32;
                    if base_ty.is_array() || base_ty.is_matrix() {
                        let stride = if base_ty.is_array() {
                            base_ty.element().registers()
                        } else {
                            1
                        };
                        let mut dst = base_dst;
                        dst.reg.index += i * stride;
                        let mut val = base_val;
                        val.reg.index += i * stride;
                        let element = base_ty.indexed_once();
                        dst.mask = if element.is_matrix() {
                            0xf
                        } else {
                            (1u8 << element.size) - 1
                        };
                        return (dst, val);
                    }
                    // Vector lane
                    let mut dst = base_dst;
                    dst.mask = 1 << i.min(3);
                    let val = Val {
                        reg: base_val.reg,
                        swizzle: compose(splat(i.min(3) as u8), base_val.swizzle),
                        rel: base_val.rel,
                    };
                    return (dst, val);
                }

                // Dynamic index over arrays: relative access on both sides.
                let idx = self.lower_expr(index);
                let mut dst = base_dst;
                dst.rel = Some(idx.reg);
                let mut val = base_val;
                val.rel = Some(idx.reg);
                (dst, val)
            }
            ExprKind::Swizzle(base, lanes, count) => {
                let (base_dst, base_val) = self.lower_lvalue(base);

                // Write mask selects the named lanes; the source swizzle
                // routes value lanes into position.
                let mut mask = 0u8;
                for &l in &lanes[..count as usize] {
                    mask |= 1 << l;
                }
                let dst = Dst::masked(base_dst.reg, mask & base_dst.mask);
                let val = Val {
                    reg: base_val.reg,
                    swizzle: base_val.swizzle,
                    rel: base_val.rel,
                };
                (dst, val)
            }
            _ => {
                // The parser already rejected this as not an l-value.
                let out = self.alloc_scratch();
                (Dst::new(out), Val::of(out))
            }
        }
    }

    fn lower_assign(&mut self, op: Option<BinaryOp>, l: ExprId, r: ExprId) -> Val {
        let lty = self.ast.expr(l).ty;
        let rty = self.ast.expr(r).ty;

        if let Some(op) = op {
            let combined = self.lower_binary(op, l, r, lty);
            let (dst, _) = self.lower_lvalue(l);
            self.store_swizzled(l, dst, combined, lty);
            return combined;
        }

        let value = self.lower_expr(r);
        let value = self.convert_to(lty.basic, rty, value, lty);
        let (dst, _) = self.lower_lvalue(l);
        self.store_swizzled(l, dst, value, lty);
        value
    }

    /// Store through a possibly swizzled l-value: reorder the source lanes
    /// so each set mask bit receives the right component.
    fn store_swizzled(&mut self, lvalue: ExprId, dst: Dst, value: Val, ty: Type) {
        if let ExprKind::Swizzle(_, lanes, count) = self.ast.expr(lvalue).kind {
            let mut route = [0u8; 4];
            for (pos, &lane) in lanes[..count as usize].iter().enumerate() {
                route[lane as usize] = pos as u8;
            }
            let v = Val {
                reg: value.reg,
                swizzle: compose(Swizzle::from_lanes(route), value.swizzle),
                rel: value.rel,
            };
            let mut inst = Instruction::new(Opcode::Mov).with_dst(dst).with_src(0, v.src());
            inst.line = self.line;
            self.push(inst);
            return;
        }

        self.mov(ty, dst, value);
    }

    fn lower_call(&mut self, func: usize, args: &[ExprId]) -> Val {
        if self.call_stack.contains(&func) {
            let loc = self.ast.functions[func].loc;
            let name = self.ast.functions[func].name.clone();
            self.diags
                .report(DiagnosticKind::RecursiveFunctionCall, loc, name);
            let out = self.alloc_scratch();
            return Val::of(out);
        }

        let def = self.ast.functions[func].clone();
        let Some(body) = def.body else {
            let loc = def.loc;
            self.diags
                .report(DiagnosticKind::NoMatchingFunction, loc, def.name);
            let out = self.alloc_scratch();
            return Val::of(out);
        };

        // Copy arguments into the parameter homes.
        for (param, &arg) in def.params.iter().zip(args) {
            let pty = self.ast.symbol(param.symbol).ty;
            let home = self.home(param.symbol);
            if param.qualifier != ParamQualifier::Out {
                let v = self.lower_expr(arg);
                let aty = self.ast.expr(arg).ty;
                let v = self.convert_to(pty.basic, aty, v, pty);
                self.mov(pty, Dst::new(home), v);
            }
        }

        let ret_reg = if def.ret.basic != BasicType::Void {
            Some(Reg::temp(self.alloc_perm(def.ret.total_registers())))
        } else {
            None
        };

        // One-trip loop so `return` can break out structurally.
        let label = self.label();
        let mut inst = Instruction::new(Opcode::Loop);
        inst.label = label;
        inst.unroll = true;
        inst.loop_info = Some(shale_core::ir::LoopInfo {
            iterations: 1,
            index: Reg::temp(0),
            init: 0,
            step: 0,
            float: false,
        });
        inst.line = self.line;
        self.push(inst);

        self.inline_stack.push(InlineFrame { ret_reg, label });
        self.call_stack.push(func);
        self.lower_stmt(body);
        self.call_stack.pop();
        self.inline_stack.pop();

        let mut inst = Instruction::new(Opcode::EndLoop);
        inst.label = label;
        self.push(inst);

        // Copy out/inout parameters back.
        for (param, &arg) in def.params.iter().zip(args) {
            if matches!(param.qualifier, ParamQualifier::Out | ParamQualifier::InOut) {
                let pty = self.ast.symbol(param.symbol).ty;
                let home = self.home(param.symbol);
                let (dst, _) = self.lower_lvalue(arg);
                self.store_swizzled(arg, dst, Val::of(home), pty);
            }
        }

        ret_reg.map(Val::of).unwrap_or_else(|| {
            let out = self.alloc_scratch();
            Val::of(out)
        })
    }

    fn lower_builtin(&mut self, builtin: BuiltinFn, args: &[ExprId], ret: Type) -> Val {
        use BuiltinFn::*;

        // Texture sampling: coordinate first, sampler second.
        match builtin {
            Texture2D | Texture | TextureLod => {
                let sampler = self.lower_expr(args[0]);
                let coord = self.lower_expr(args[1]);
                let out = self.alloc_scratch();
                if builtin == TextureLod {
                    let lod = self.lower_expr(args[2]);
                    self.emit3(Opcode::TexSampleLod, Dst::new(out), coord, sampler, lod);
                } else {
                    self.emit2(Opcode::TexSample, Dst::new(out), coord, sampler);
                }
                return Val::of(out);
            }
            _ => {}
        }

        let vals: Vec<Val> = args.iter().map(|a| self.lower_operand(*a, ret)).collect();
        let out = self.alloc_scratch();
        let dst = Dst::masked(out, (1u8 << ret.size) - 1);

        match builtin {
            Radians => {
                let k = self.const_f32(std::f32::consts::PI / 180.0);
                self.emit2(Opcode::Mul, dst, vals[0], Val::of(k));
            }
            Degrees => {
                let k = self.const_f32(180.0 / std::f32::consts::PI);
                self.emit2(Opcode::Mul, dst, vals[0], Val::of(k));
            }
            Sin => self.emit1(Opcode::Sin, dst, vals[0]),
            Cos => self.emit1(Opcode::Cos, dst, vals[0]),
            Tan => self.emit1(Opcode::Tan, dst, vals[0]),
            Asin => self.emit1(Opcode::Asin, dst, vals[0]),
            Acos => self.emit1(Opcode::Acos, dst, vals[0]),
            Atan => self.emit1(Opcode::Atan, dst, vals[0]),
            Atan2 => self.emit2(Opcode::Atan2, dst, vals[0], vals[1]),
            Pow => self.emit2(Opcode::Pow, dst, vals[0], vals[1]),
            Exp => self.emit1(Opcode::Exp, dst, vals[0]),
            Log => self.emit1(Opcode::Log, dst, vals[0]),
            Exp2 => self.emit1(Opcode::Exp2, dst, vals[0]),
            Log2 => self.emit1(Opcode::Log2, dst, vals[0]),
            Sqrt => self.emit1(Opcode::Sqrt, dst, vals[0]),
            InverseSqrt => self.emit1(Opcode::Rsq, dst, vals[0]),
            Abs => self.emit1(Opcode::Abs, dst, vals[0]),
            Sign => self.emit1(Opcode::Sign, dst, vals[0]),
            Floor => self.emit1(Opcode::Floor, dst, vals[0]),
            Ceil => self.emit1(Opcode::Ceil, dst, vals[0]),
            Fract => self.emit1(Opcode::Fract, dst, vals[0]),
            Mod => self.emit2(Opcode::Mod, dst, vals[0], vals[1]),
            Min => self.emit2(Opcode::Min, dst, vals[0], vals[1]),
            Max => self.emit2(Opcode::Max, dst, vals[0], vals[1]),
            Clamp => self.emit3(Opcode::Clamp, dst, vals[0], vals[1], vals[2]),
            Mix => self.emit3(Opcode::Mix, dst, vals[0], vals[1], vals[2]),
            Step => self.emit2(Opcode::Step, dst, vals[0], vals[1]),
            SmoothStep => self.emit3(Opcode::SmoothStep, dst, vals[0], vals[1], vals[2]),
            Length => self.emit1(Opcode::Length, dst, vals[0]),
            Distance => self.emit2(Opcode::Distance, dst, vals[0], vals[1]),
            Dot => {
                let op = match self.ast.expr(args[0]).ty.size {
                    2 => Opcode::Dp2,
                    3 => Opcode::Dp3,
                    _ => Opcode::Dp4,
                };
                self.emit2(op, dst, vals[0], vals[1]);
            }
            Cross => self.emit2(Opcode::Cross, dst, vals[0], vals[1]),
            Normalize => self.emit1(Opcode::Normalize, dst, vals[0]),
            Reflect => self.emit2(Opcode::Reflect, dst, vals[0], vals[1]),
            Texture2D | Texture | TextureLod => unreachable!(),
        }

        Val::of(out)
    }

    fn lower_constructor(&mut self, ty: Type, args: &[ExprId]) -> Val {
        // Matrix constructors
        if ty.is_matrix() {
            let out = self.alloc_scratch_n(ty.registers());

            if args.len() == 1 && self.ast.expr(args[0]).ty.is_scalar() {
                // Diagonal
                let v = self.lower_operand(args[0], Type::float());
                let zero = self.const_f32(0.0);
                for col in 0..ty.size {
                    let mut d = Dst::new(out);
                    d.reg.index += col as u32;
                    d.mask = (1u8 << ty.rows) - 1;
                    self.emit1(Opcode::Mov, d, Val::of(zero));
                    let mut diag = Dst::new(out);
                    diag.reg.index += col as u32;
                    diag.mask = 1 << col;
                    self.emit1(
                        Opcode::Mov,
                        diag,
                        Val {
                            reg: v.reg,
                            swizzle: compose(splat(0), v.swizzle),
                            rel: v.rel,
                        },
                    );
                }
                return Val::of(out);
            }

            if args.len() == 1 && self.ast.expr(args[0]).ty.is_matrix() {
                // Matrix resize: copy the overlapping block, identity
                // elsewhere.
                let src_ty = self.ast.expr(args[0]).ty;
                let v = self.lower_expr(args[0]);
                let one = self.const_f32(1.0);
                let zero = self.const_f32(0.0);
                for col in 0..ty.size {
                    let mut d = Dst::new(out);
                    d.reg.index += col as u32;
                    d.mask = (1u8 << ty.rows) - 1;
                    if col < src_ty.size {
                        let mut s = v;
                        s.reg.index += col as u32;
                        self.emit1(Opcode::Mov, d, s);
                        if ty.rows > src_ty.rows {
                            let mut fill = d;
                            fill.mask = d.mask & !((1u8 << src_ty.rows) - 1);
                            let fill_val = if col < ty.rows { zero } else { zero };
                            self.emit1(Opcode::Mov, fill, Val::of(fill_val));
                        }
                    } else {
                        self.emit1(Opcode::Mov, d, Val::of(zero));
                    }
                    if col >= src_ty.size || ty.rows > src_ty.rows {
                        let mut diag = Dst::new(out);
                        diag.reg.index += col as u32;
                        diag.mask = 1 << col;
                        if col >= src_ty.size || col >= src_ty.rows {
                            self.emit1(Opcode::Mov, diag, Val::of(one));
                        }
                    }
                }
                return Val::of(out);
            }

            // Columns from vectors/scalars, flattened in order.
            let mut lane = 0u8;
            let mut col = 0u8;
            for &arg in args {
                let aty = self.ast.expr(arg).ty;
                let v = self.lower_operand(arg, Type::float());
                for comp in 0..aty.components() as u8 {
                    let mut d = Dst::new(out);
                    d.reg.index += col as u32;
                    d.mask = 1 << lane;
                    self.emit1(
                        Opcode::Mov,
                        d,
                        Val {
                            reg: v.reg,
                            swizzle: compose(splat(comp.min(3)), v.swizzle),
                            rel: v.rel,
                        },
                    );
                    lane += 1;
                    if lane == ty.rows {
                        lane = 0;
                        col += 1;
                        if col == ty.size {
                            return Val::of(out);
                        }
                    }
                }
            }
            return Val::of(out);
        }

        // Scalar/vector constructors
        let out = self.alloc_scratch();

        if args.len() == 1 {
            let aty = self.ast.expr(args[0]).ty;
            let v = self.lower_expr(args[0]);
            let v = self.convert_to(ty.basic, aty, v, ty);
            let v = if aty.is_scalar() {
                Val {
                    reg: v.reg,
                    swizzle: compose(splat(0), v.swizzle),
                    rel: v.rel,
                }
            } else {
                v
            };
            let dst = Dst::masked(out, (1u8 << ty.size) - 1);
            self.emit1(Opcode::Mov, dst, v);
            return Val::of(out);
        }

        let mut lane = 0u8;
        for &arg in args {
            if lane >= ty.size {
                break;
            }
            let aty = self.ast.expr(arg).ty;
            let v = self.lower_expr(arg);
            let v = self.convert_to(ty.basic, aty, v, ty);
            for comp in 0..aty.components().min(4) as u8 {
                if lane >= ty.size {
                    break;
                }
                let d = Dst::masked(out, 1 << lane);
                self.emit1(
                    Opcode::Mov,
                    d,
                    Val {
                        reg: v.reg,
                        swizzle: compose(splat(comp), v.swizzle),
                        rel: v.rel,
                    },
                );
                lane += 1;
            }
        }
        Val::of(out)
    }
}
