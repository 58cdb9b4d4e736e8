//! Validation of the ES shading language limitations: restricted `for`
//! loops, constant index expressions, and loop-index usage rules. Loops that
//! index samplers with an integer loop index are marked for unrolling; the
//! recovered bounds land in each loop's `LoopMeta`.

use crate::ast::*;
use crate::diag::{DiagnosticKind, Diagnostics};
use crate::pp::Location;

struct LoopInfo {
    index: SymbolId,
    meta: LoopMeta,
}

pub struct Validator<'a> {
    ast: &'a mut Ast,
    diags: &'a mut Diagnostics,
    loop_stack: Vec<LoopInfo>,
}

pub fn validate(ast: &mut Ast, diags: &mut Diagnostics) {
    let mut v = Validator {
        ast,
        diags,
        loop_stack: Vec::new(),
    };

    for f in 0..v.ast.functions.len() {
        if let Some(body) = v.ast.functions[f].body {
            v.visit_stmt(body);
        }
    }
}

impl Validator<'_> {
    fn error(&mut self, kind: DiagnosticKind, loc: Location, text: impl Into<String>) {
        self.diags.report(kind, loc, text);
    }

    fn is_loop_index(&self, symbol: SymbolId) -> bool {
        self.loop_stack.iter().any(|l| l.index == symbol)
    }

    fn mark_unroll(&mut self, symbol: SymbolId) {
        for l in &mut self.loop_stack {
            if l.index == symbol {
                l.meta.unroll = true;
            }
        }
    }

    fn visit_stmt(&mut self, id: StmtId) {
        let stmt = self.ast.stmt(id).clone();
        match stmt.kind {
            StmtKind::Empty | StmtKind::Break | StmtKind::Continue | StmtKind::Discard => {}
            StmtKind::Expr(e) => self.visit_expr(e),
            StmtKind::Decl(decls) => {
                for (_, init) in decls {
                    if let Some(e) = init {
                        self.visit_expr(e);
                    }
                }
            }
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.visit_stmt(s);
                }
            }
            StmtKind::If(cond, then_s, else_s) => {
                self.visit_expr(cond);
                self.visit_stmt(then_s);
                if let Some(e) = else_s {
                    self.visit_stmt(e);
                }
            }
            StmtKind::Return(e) => {
                if let Some(e) = e {
                    self.visit_expr(e);
                }
            }
            StmtKind::While(_, _) | StmtKind::DoWhile(_, _) => {
                self.error(DiagnosticKind::UnsupportedLoopType, stmt.loc, "loop");
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                let Some(info) = self.validate_for_header(stmt.loc, init, cond, step) else {
                    return;
                };
                self.loop_stack.push(info);
                self.visit_stmt(body);
                let info = self.loop_stack.pop().unwrap();
                self.ast.stmts[id.0 as usize].loop_meta = Some(info.meta);
            }
        }
    }

    /// The only accepted form: `for (T idx = C; idx ⊙ C'; step)` with
    /// constant `C`, `C'` and `step ∈ {++, --, += C, -= C}`.
    fn validate_for_header(
        &mut self,
        loc: Location,
        init: Option<StmtId>,
        cond: Option<ExprId>,
        step: Option<ExprId>,
    ) -> Option<LoopInfo> {
        // init: a single declaration with a constant initializer
        let (index, init_value) = match init.map(|s| self.ast.stmt(s).kind.clone()) {
            Some(StmtKind::Decl(decls)) if decls.len() == 1 => {
                let (symbol, init_expr) = decls[0];
                let sym_ty = self.ast.symbol(symbol).ty;
                if !sym_ty.is_scalar()
                    || !matches!(
                        sym_ty.basic,
                        BasicType::Int | BasicType::UInt | BasicType::Float
                    )
                {
                    self.error(DiagnosticKind::InvalidLoopHeader, loc, "for");
                    return None;
                }
                let Some(value) = init_expr.and_then(|e| self.ast.expr(e).constant.clone()) else {
                    self.error(DiagnosticKind::InvalidLoopHeader, loc, "for");
                    return None;
                };
                (symbol, value[0])
            }
            _ => {
                self.error(DiagnosticKind::InvalidLoopHeader, loc, "for");
                return None;
            }
        };

        // condition: `idx op constant`
        let (cmp_op, limit) = match cond.map(|e| self.ast.expr(e).kind.clone()) {
            Some(ExprKind::Binary(op, l, r))
                if matches!(
                    op,
                    BinaryOp::Lt
                        | BinaryOp::Le
                        | BinaryOp::Gt
                        | BinaryOp::Ge
                        | BinaryOp::Eq
                        | BinaryOp::Ne
                ) =>
            {
                let is_index = matches!(self.ast.expr(l).kind, ExprKind::Symbol(s) if s == index);
                let limit = self.ast.expr(r).constant.clone();
                match (is_index, limit) {
                    (true, Some(v)) => (op, v[0]),
                    _ => {
                        self.error(DiagnosticKind::InvalidLoopHeader, loc, "for");
                        return None;
                    }
                }
            }
            _ => {
                self.error(DiagnosticKind::InvalidLoopHeader, loc, "for");
                return None;
            }
        };

        // step: ++idx, --idx, idx++, idx--, idx += C, idx -= C
        let step_value: Scalar = match step.map(|e| self.ast.expr(e).kind.clone()) {
            Some(ExprKind::Unary(op, operand))
                if matches!(
                    op,
                    UnaryOp::PreInc | UnaryOp::PostInc | UnaryOp::PreDec | UnaryOp::PostDec
                ) && matches!(self.ast.expr(operand).kind, ExprKind::Symbol(s) if s == index) =>
            {
                let positive = matches!(op, UnaryOp::PreInc | UnaryOp::PostInc);
                match self.ast.symbol(index).ty.basic {
                    BasicType::Float => Scalar::F(if positive { 1.0 } else { -1.0 }),
                    _ => Scalar::I(if positive { 1 } else { -1 }),
                }
            }
            Some(ExprKind::Assign(Some(op), l, r))
                if matches!(op, BinaryOp::Add | BinaryOp::Sub)
                    && matches!(self.ast.expr(l).kind, ExprKind::Symbol(s) if s == index) =>
            {
                let Some(v) = self.ast.expr(r).constant.clone() else {
                    self.error(DiagnosticKind::InvalidLoopHeader, loc, "for");
                    return None;
                };
                let v = v[0];
                match (op, v) {
                    (BinaryOp::Add, s) => s,
                    (BinaryOp::Sub, Scalar::F(f)) => Scalar::F(-f),
                    (BinaryOp::Sub, s) => Scalar::I(-s.as_i32()),
                    _ => unreachable!(),
                }
            }
            _ => {
                self.error(DiagnosticKind::InvalidLoopHeader, loc, "for");
                return None;
            }
        };

        let iterations = loop_iterations(init_value, cmp_op, limit, step_value);
        let Some(iterations) = iterations else {
            self.error(DiagnosticKind::InvalidLoopHeader, loc, "for");
            return None;
        };

        let float_index = self.ast.symbol(index).ty.basic == BasicType::Float;
        Some(LoopInfo {
            index,
            meta: LoopMeta {
                index,
                iterations,
                init: init_value,
                step: step_value,
                // Integer indices are expanded at specialization; float
                // loops run as counted loops.
                unroll: !float_index,
            },
        })
    }

    fn visit_expr(&mut self, id: ExprId) {
        let expr = self.ast.expr(id).clone();
        match expr.kind {
            ExprKind::Symbol(_) | ExprKind::Literal(_) => {}
            ExprKind::Unary(op, operand) => {
                if matches!(
                    op,
                    UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec
                ) {
                    self.check_index_not_modified(operand, expr.loc);
                }
                self.visit_expr(operand);
            }
            ExprKind::Binary(_, l, r) | ExprKind::Comma(l, r) => {
                self.visit_expr(l);
                self.visit_expr(r);
            }
            ExprKind::Assign(_, l, r) => {
                self.check_index_not_modified(l, expr.loc);
                self.visit_expr(l);
                self.visit_expr(r);
            }
            ExprKind::Ternary(c, t, e) => {
                self.visit_expr(c);
                self.visit_expr(t);
                self.visit_expr(e);
            }
            ExprKind::Index(base, index) => {
                self.validate_indexing(base, index, expr.loc);
                self.visit_expr(base);
                self.visit_expr(index);
            }
            ExprKind::Swizzle(base, _, _) => self.visit_expr(base),
            ExprKind::Call(func, args) => {
                self.validate_call(func, &args, expr.loc);
                for a in args {
                    self.visit_expr(a);
                }
            }
            ExprKind::Builtin(_, args) => {
                for a in args {
                    self.visit_expr(a);
                }
            }
            ExprKind::Constructor(_, args) => {
                for a in args {
                    self.visit_expr(a);
                }
            }
        }
    }

    fn check_index_not_modified(&mut self, target: ExprId, loc: Location) {
        if let ExprKind::Symbol(s) = self.ast.expr(target).kind {
            if self.is_loop_index(s) {
                let name = self.ast.symbol(s).name.clone();
                self.error(DiagnosticKind::LoopIndexModified, loc, name);
            }
        }
    }

    /// Subscripts must be constant index expressions; inside a loop the
    /// loop index is also accepted, and an integer index into a sampler
    /// array marks the loop for unrolling.
    fn validate_indexing(&mut self, base: ExprId, index: ExprId, loc: Location) {
        let base_ty = self.ast.expr(base).ty;

        if self.ast.expr(index).constant.is_some() {
            return;
        }

        let index_symbols = self.collect_index_symbols(index);
        let all_allowed = index_symbols.iter().all(|&s| {
            self.ast.symbol(s).ty.qualifier == Qualifier::ConstExpr || self.is_loop_index(s)
        });
        if !all_allowed || index_symbols.is_empty() {
            self.error(DiagnosticKind::NonConstantIndex, loc, "[]");
            return;
        }

        for s in index_symbols {
            if self.is_loop_index(s) {
                let basic = self.ast.symbol(s).ty.basic;
                if base_ty.is_sampler() && matches!(basic, BasicType::Int | BasicType::UInt) {
                    self.mark_unroll(s);
                }
                if matches!(basic, BasicType::Int | BasicType::UInt) {
                    // Integer indices always require expansion on this
                    // target.
                    self.mark_unroll(s);
                }
            }
        }
    }

    fn collect_index_symbols(&self, e: ExprId) -> Vec<SymbolId> {
        let mut out = Vec::new();
        let mut stack = vec![e];
        while let Some(e) = stack.pop() {
            match &self.ast.expr(e).kind {
                ExprKind::Symbol(s) => out.push(*s),
                ExprKind::Unary(_, a) => stack.push(*a),
                ExprKind::Binary(_, a, b) => {
                    stack.push(*a);
                    stack.push(*b);
                }
                ExprKind::Literal(_) => {}
                _ => {
                    // Anything else disqualifies the expression; report via
                    // an impossible symbol list.
                    out.clear();
                    return out;
                }
            }
        }
        out
    }

    /// A loop index may not feed an `out` or `inout` parameter.
    fn validate_call(&mut self, func: usize, args: &[ExprId], loc: Location) {
        let params: Vec<ParamQualifier> = self.ast.functions[func]
            .params
            .iter()
            .map(|p| p.qualifier)
            .collect();
        for (arg, q) in args.iter().zip(params) {
            if matches!(q, ParamQualifier::Out | ParamQualifier::InOut) {
                if let ExprKind::Symbol(s) = self.ast.expr(*arg).kind {
                    if self.is_loop_index(s) {
                        let name = self.ast.symbol(s).name.clone();
                        self.error(DiagnosticKind::LoopIndexAsOutParameter, loc, name);
                    }
                }
            }
        }
    }
}

/// Iteration count of the restricted loop; `None` when the loop cannot
/// terminate or runs an unreasonable number of times.
fn loop_iterations(init: Scalar, op: BinaryOp, limit: Scalar, step: Scalar) -> Option<u32> {
    const MAX_ITERATIONS: i64 = 0x10000;

    let float = matches!(init, Scalar::F(_)) || matches!(step, Scalar::F(_));

    let count = if float {
        let mut i = init.as_f32();
        let limit_v = limit.as_f32();
        let step_v = step.as_f32();
        let mut n: i64 = 0;
        while compare_f(op, i, limit_v) {
            n += 1;
            if n > MAX_ITERATIONS {
                return None;
            }
            i += step_v;
        }
        n
    } else {
        let mut i = init.as_i32() as i64;
        let limit_v = limit.as_i32() as i64;
        let step_v = step.as_i32() as i64;
        let mut n: i64 = 0;
        while compare_i(op, i, limit_v) {
            n += 1;
            if n > MAX_ITERATIONS {
                return None;
            }
            i += step_v;
        }
        n
    };

    Some(count as u32)
}

fn compare_f(op: BinaryOp, a: f32, b: f32) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        _ => false,
    }
}

fn compare_i(op: BinaryOp, a: i64, b: i64) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        _ => false,
    }
}
