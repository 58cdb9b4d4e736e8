//! Recursive-descent parser and semantic analyzer.
//!
//! Consumes the preprocessed token stream and builds the typed AST. Types,
//! constant folding, and symbol resolution happen as nodes are built, so a
//! node's type is always final once pushed. Errors report to the sink and
//! recovery skips to the next `;` or `}`.

use crate::ast::*;
use crate::diag::{DiagnosticKind, Diagnostics};
use crate::pp::{Location, TokKind, Token};
use rustc_hash::FxHashMap;
use shale_core::ir::{Interpolation, ShaderKind};

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    ast: Ast,
    diags: &'a mut Diagnostics,
    version: u32,
    shader: ShaderKind,
    scopes: Vec<FxHashMap<String, SymbolId>>,
    current_ret: Option<Type>,
}

pub fn parse(
    tokens: Vec<Token>,
    version: u32,
    shader: ShaderKind,
    diags: &mut Diagnostics,
) -> Ast {
    let mut parser = Parser {
        tokens,
        pos: 0,
        ast: Ast::default(),
        diags,
        version,
        shader,
        scopes: vec![FxHashMap::default()],
        current_ret: None,
    };
    parser.declare_builtin_variables();
    parser.parse_translation_unit();
    parser.ast
}

const KEYWORDS: &[&str] = &[
    "attribute", "const", "uniform", "varying", "centroid", "flat", "smooth", "invariant", "in",
    "out", "inout", "break", "continue", "do", "for", "while", "if", "else", "true", "false",
    "discard", "return", "precision", "highp", "mediump", "lowp", "struct", "void", "float", "int",
    "uint", "bool", "vec2", "vec3", "vec4", "ivec2", "ivec3", "ivec4", "uvec2", "uvec3", "uvec4",
    "bvec2", "bvec3", "bvec4", "mat2", "mat3", "mat4", "sampler2D", "samplerCube",
];

impl Parser<'_> {
    // ── token plumbing ───────────────────────────────────────────────

    fn peek(&self) -> &Token {
        static EOF: std::sync::OnceLock<Token> = std::sync::OnceLock::new();
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| EOF.get_or_init(Token::eof))
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1)
    }

    fn loc(&self) -> Location {
        self.peek().location
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn at(&self, text: &str) -> bool {
        let t = self.peek();
        (t.kind == TokKind::Punct || t.kind == TokKind::Identifier) && t.text == text
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.at(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str) -> bool {
        if self.eat(text) {
            true
        } else {
            self.syntax_error(&format!("expected '{}'", text));
            false
        }
    }

    fn syntax_error(&mut self, context: &str) {
        let loc = self.loc();
        let text = if self.at_eof() {
            format!("<eof> ({context})")
        } else {
            format!("{} ({context})", self.peek().text)
        };
        self.diags.report(DiagnosticKind::SyntaxError, loc, text);
    }

    fn error(&mut self, kind: DiagnosticKind, loc: Location, text: impl Into<String>) {
        self.diags.report(kind, loc, text);
    }

    /// Skip to the next `;` (consumed) or a `}`/EOF.
    fn recover(&mut self) {
        let mut depth = 0usize;
        while !self.at_eof() {
            let t = self.peek();
            match t.text.as_str() {
                ";" if depth == 0 => {
                    self.advance();
                    return;
                }
                "{" => depth += 1,
                "}" => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.advance();
        }
    }

    // ── scopes and symbols ───────────────────────────────────────────

    fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn declare(&mut self, name: &str, ty: Type, loc: Location) -> SymbolId {
        if self.scopes.last().unwrap().contains_key(name) {
            self.error(DiagnosticKind::Redefinition, loc, name);
        }
        if name.starts_with("gl_") {
            self.error(DiagnosticKind::ReservedIdentifier, loc, name);
        }
        let id = self.ast.push_symbol(Symbol {
            name: name.to_string(),
            ty,
            const_value: None,
            builtin: None,
            loc,
        });
        self.scopes.last_mut().unwrap().insert(name.to_string(), id);
        id
    }

    fn declare_builtin_variables(&mut self) {
        let mut add = |p: &mut Self, name: &str, ty: Type, var: BuiltinVar| {
            let id = p.ast.push_symbol(Symbol {
                name: name.to_string(),
                ty,
                const_value: None,
                builtin: Some(var),
                loc: Location::default(),
            });
            p.scopes.last_mut().unwrap().insert(name.to_string(), id);
        };

        match self.shader {
            ShaderKind::Vertex => {
                let mut pos = Type::vec(4);
                pos.qualifier = Qualifier::Position;
                add(self, "gl_Position", pos, BuiltinVar::Position);

                let mut psize = Type::float();
                psize.qualifier = Qualifier::PointSize;
                add(self, "gl_PointSize", psize, BuiltinVar::PointSize);
            }
            ShaderKind::Fragment => {
                let mut coord = Type::vec(4);
                coord.qualifier = Qualifier::FragCoord;
                add(self, "gl_FragCoord", coord, BuiltinVar::FragCoord);

                let mut facing = Type::bool_();
                facing.qualifier = Qualifier::FrontFacing;
                add(self, "gl_FrontFacing", facing, BuiltinVar::FrontFacing);

                if self.version < 300 {
                    let mut color = Type::vec(4);
                    color.qualifier = Qualifier::FragColor;
                    add(self, "gl_FragColor", color, BuiltinVar::FragColor);

                    let mut data = Type::vec(4);
                    data.qualifier = Qualifier::FragData;
                    data.array = Some(1);
                    add(self, "gl_FragData", data, BuiltinVar::FragData);
                }

                let mut depth = Type::float();
                depth.qualifier = Qualifier::FragDepth;
                add(self, "gl_FragDepth", depth, BuiltinVar::FragDepth);
            }
        }
    }

    // ── types ────────────────────────────────────────────────────────

    fn basic_type_of(name: &str) -> Option<(BasicType, u8, u8)> {
        Some(match name {
            "void" => (BasicType::Void, 1, 1),
            "float" => (BasicType::Float, 1, 1),
            "int" => (BasicType::Int, 1, 1),
            "uint" => (BasicType::UInt, 1, 1),
            "bool" => (BasicType::Bool, 1, 1),
            "vec2" => (BasicType::Float, 2, 1),
            "vec3" => (BasicType::Float, 3, 1),
            "vec4" => (BasicType::Float, 4, 1),
            "ivec2" => (BasicType::Int, 2, 1),
            "ivec3" => (BasicType::Int, 3, 1),
            "ivec4" => (BasicType::Int, 4, 1),
            "uvec2" => (BasicType::UInt, 2, 1),
            "uvec3" => (BasicType::UInt, 3, 1),
            "uvec4" => (BasicType::UInt, 4, 1),
            "bvec2" => (BasicType::Bool, 2, 1),
            "bvec3" => (BasicType::Bool, 3, 1),
            "bvec4" => (BasicType::Bool, 4, 1),
            "mat2" => (BasicType::Float, 2, 2),
            "mat3" => (BasicType::Float, 3, 3),
            "mat4" => (BasicType::Float, 4, 4),
            "sampler2D" => (BasicType::Sampler2D, 1, 1),
            "samplerCube" => (BasicType::SamplerCube, 1, 1),
            _ => return None,
        })
    }

    fn at_type(&self) -> bool {
        self.peek().kind == TokKind::Identifier && Self::basic_type_of(&self.peek().text).is_some()
    }

    fn at_type_prefix(&self) -> bool {
        let t = self.peek();
        t.kind == TokKind::Identifier
            && (Self::basic_type_of(&t.text).is_some()
                || matches!(
                    t.text.as_str(),
                    "const"
                        | "attribute"
                        | "varying"
                        | "uniform"
                        | "in"
                        | "out"
                        | "inout"
                        | "invariant"
                        | "centroid"
                        | "flat"
                        | "smooth"
                        | "highp"
                        | "mediump"
                        | "lowp"
                ))
    }

    /// `[invariant] [interpolation] [qualifier] [precision] type`
    fn parse_fully_specified_type(&mut self) -> Option<Type> {
        let mut invariant = false;
        let mut interpolation = Interpolation::Smooth;
        let mut qualifier: Option<Qualifier> = None;
        let mut precision = Precision::Undefined;

        loop {
            let t = self.peek();
            if t.kind != TokKind::Identifier {
                break;
            }
            match t.text.as_str() {
                "invariant" => {
                    invariant = true;
                    self.advance();
                }
                "flat" => {
                    interpolation = Interpolation::Flat;
                    self.advance();
                }
                "smooth" => {
                    interpolation = Interpolation::Smooth;
                    self.advance();
                }
                "centroid" => {
                    interpolation = Interpolation::Centroid;
                    self.advance();
                }
                "const" => {
                    self.set_qualifier(&mut qualifier, Qualifier::ConstExpr);
                    self.advance();
                }
                "attribute" => {
                    self.require_version_below(300, "attribute");
                    self.set_qualifier(&mut qualifier, Qualifier::Attribute);
                    self.advance();
                }
                "varying" => {
                    self.require_version_below(300, "varying");
                    let q = match self.shader {
                        ShaderKind::Vertex => Qualifier::VaryingOut,
                        ShaderKind::Fragment => Qualifier::VaryingIn,
                    };
                    self.set_qualifier(&mut qualifier, q);
                    self.advance();
                }
                "uniform" => {
                    self.set_qualifier(&mut qualifier, Qualifier::Uniform);
                    self.advance();
                }
                "in" => {
                    self.require_version(300, "in");
                    let q = match self.shader {
                        ShaderKind::Vertex => Qualifier::Attribute,
                        ShaderKind::Fragment => Qualifier::VaryingIn,
                    };
                    self.set_qualifier(&mut qualifier, q);
                    self.advance();
                }
                "out" => {
                    self.require_version(300, "out");
                    let q = match self.shader {
                        ShaderKind::Vertex => Qualifier::VaryingOut,
                        ShaderKind::Fragment => Qualifier::FragData,
                    };
                    self.set_qualifier(&mut qualifier, q);
                    self.advance();
                }
                "highp" => {
                    precision = Precision::High;
                    self.advance();
                }
                "mediump" => {
                    precision = Precision::Medium;
                    self.advance();
                }
                "lowp" => {
                    precision = Precision::Low;
                    self.advance();
                }
                "struct" => {
                    let loc = self.loc();
                    self.error(DiagnosticKind::UnsupportedInThisVersion, loc, "struct");
                    self.recover();
                    return None;
                }
                _ => break,
            }
        }

        let t = self.peek().clone();
        let Some((basic, size, rows)) = Self::basic_type_of(&t.text) else {
            self.syntax_error("type expected");
            return None;
        };
        if basic == BasicType::UInt {
            self.require_version(300, "uint");
        }
        self.advance();

        let mut ty = Type::new(basic);
        ty.size = size;
        ty.rows = rows;
        ty.precision = precision;
        ty.invariant = invariant;
        ty.interpolation = interpolation;
        ty.qualifier = qualifier.unwrap_or(Qualifier::Temporary);
        Some(ty)
    }

    fn set_qualifier(&mut self, slot: &mut Option<Qualifier>, q: Qualifier) {
        if slot.is_some() {
            let loc = self.loc();
            let text = self.peek().text.clone();
            self.error(DiagnosticKind::InvalidQualifier, loc, text);
        }
        *slot = Some(q);
    }

    fn require_version(&mut self, min: u32, what: &str) {
        if self.version < min {
            let loc = self.loc();
            self.error(DiagnosticKind::UnsupportedInThisVersion, loc, what);
        }
    }

    fn require_version_below(&mut self, max: u32, what: &str) {
        if self.version >= max {
            let loc = self.loc();
            self.error(DiagnosticKind::UnsupportedInThisVersion, loc, what);
        }
    }

    fn parse_array_suffix(&mut self) -> Option<u32> {
        if !self.eat("[") {
            return None;
        }
        let loc = self.loc();
        let size_expr = self.parse_assignment();
        self.expect("]");

        let size = size_expr
            .and_then(|e| self.ast.expr(e).constant.clone())
            .and_then(|c| c.first().copied())
            .map(|s| s.as_i32());

        match size {
            Some(n) if n > 0 => Some(n as u32),
            _ => {
                self.error(DiagnosticKind::InvalidArraySize, loc, "[]");
                Some(1)
            }
        }
    }

    // ── translation unit ─────────────────────────────────────────────

    fn parse_translation_unit(&mut self) {
        while !self.at_eof() {
            if self.eat(";") {
                continue;
            }
            if self.at("}") {
                // Keep making progress past unbalanced braces.
                self.syntax_error("unexpected '}'");
                self.advance();
                continue;
            }
            if self.at("precision") {
                self.parse_precision_statement();
                continue;
            }
            self.parse_external_declaration();
        }
    }

    fn parse_precision_statement(&mut self) {
        self.expect("precision");
        let t = self.advance();
        if !matches!(t.text.as_str(), "highp" | "mediump" | "lowp") {
            self.syntax_error("precision qualifier expected");
        }
        let t = self.advance();
        if Self::basic_type_of(&t.text).is_none() {
            self.syntax_error("type expected in precision statement");
        }
        self.expect(";");
    }

    fn parse_external_declaration(&mut self) {
        let Some(ty) = self.parse_fully_specified_type() else {
            self.recover();
            return;
        };

        // `float;` is legal but useless.
        if self.eat(";") {
            return;
        }

        let name_tok = self.peek().clone();
        if name_tok.kind != TokKind::Identifier || KEYWORDS.contains(&name_tok.text.as_str()) {
            self.syntax_error("identifier expected");
            self.recover();
            return;
        }
        self.advance();

        if self.at("(") {
            self.parse_function(ty, &name_tok);
        } else {
            self.parse_global_declarators(ty, name_tok);
        }
    }

    fn parse_global_declarators(&mut self, base: Type, first: Token) {
        let mut name_tok = first;
        loop {
            let mut ty = base;
            if let Some(n) = self.parse_array_suffix() {
                ty.array = Some(n);
            }
            if ty.is_sampler() && ty.qualifier != Qualifier::Uniform {
                self.error(
                    DiagnosticKind::InvalidQualifier,
                    name_tok.location,
                    &name_tok.text,
                );
            }

            let id = self.declare(&name_tok.text, ty, name_tok.location);

            let mut init = None;
            if self.eat("=") {
                // Interface variables cannot carry initializers.
                if matches!(
                    ty.qualifier,
                    Qualifier::Uniform
                        | Qualifier::Attribute
                        | Qualifier::VaryingIn
                        | Qualifier::VaryingOut
                ) {
                    self.error(
                        DiagnosticKind::InvalidQualifier,
                        name_tok.location,
                        &name_tok.text,
                    );
                }
                let loc = self.loc();
                init = self.parse_assignment();
                if let Some(e) = init {
                    let ety = self.ast.expr(e).ty;
                    if !ety.same_shape(&ty) {
                        self.error(DiagnosticKind::TypeMismatch, loc, &name_tok.text);
                    }
                    if ty.qualifier == Qualifier::ConstExpr {
                        match self.ast.expr(e).constant.clone() {
                            Some(v) => self.ast.symbols[id.0 as usize].const_value = Some(v),
                            None => {
                                self.error(
                                    DiagnosticKind::NotConstantExpression,
                                    loc,
                                    &name_tok.text,
                                );
                            }
                        }
                    }
                }
            }
            self.ast.globals.push((id, init));

            if !self.eat(",") {
                break;
            }
            let t = self.peek().clone();
            if t.kind != TokKind::Identifier {
                self.syntax_error("identifier expected");
                break;
            }
            self.advance();
            name_tok = t;
        }
        self.expect(";");
    }

    fn parse_function(&mut self, ret: Type, name_tok: &Token) {
        self.expect("(");
        self.push_scope();

        let mut params = Vec::new();
        if !self.at(")") {
            loop {
                // `void` alone as the parameter list
                if self.at("void") && self.peek2().map(|t| t.text == ")").unwrap_or(false) {
                    self.advance();
                    break;
                }

                let mut qualifier = ParamQualifier::In;
                let mut constant = false;
                loop {
                    if self.eat("const") {
                        constant = true;
                    } else if self.at("in") {
                        self.advance();
                        qualifier = ParamQualifier::In;
                    } else if self.at("out") {
                        self.advance();
                        qualifier = ParamQualifier::Out;
                    } else if self.at("inout") {
                        self.advance();
                        qualifier = ParamQualifier::InOut;
                    } else {
                        break;
                    }
                }

                let Some(mut ty) = self.parse_fully_specified_type() else {
                    self.recover();
                    self.pop_scope();
                    return;
                };
                ty.qualifier = match qualifier {
                    ParamQualifier::In => {
                        if constant {
                            Qualifier::ConstExpr
                        } else {
                            Qualifier::In
                        }
                    }
                    ParamQualifier::Out => Qualifier::Out,
                    ParamQualifier::InOut => Qualifier::InOut,
                };

                let pname = if self.peek().kind == TokKind::Identifier
                    && !KEYWORDS.contains(&self.peek().text.as_str())
                {
                    let t = self.advance();
                    Some(t)
                } else {
                    None
                };
                if let Some(n) = self.parse_array_suffix() {
                    ty.array = Some(n);
                }

                let symbol = match &pname {
                    Some(t) => self.declare(&t.text, ty, t.location),
                    None => self.ast.push_symbol(Symbol {
                        name: String::new(),
                        ty,
                        const_value: None,
                        builtin: None,
                        loc: self.loc(),
                    }),
                };
                params.push(Param { symbol, qualifier });

                if !self.eat(",") {
                    break;
                }
            }
        }
        self.expect(")");

        let index = self.ast.functions.len();
        self.ast.functions.push(FunctionDef {
            name: name_tok.text.clone(),
            ret,
            params,
            body: None,
            loc: name_tok.location,
        });

        if self.eat(";") {
            // Prototype only.
            self.pop_scope();
            return;
        }

        self.current_ret = Some(ret);
        let body = self.parse_compound_statement(false);
        self.current_ret = None;
        self.pop_scope();

        // Merge a definition into an earlier prototype of the same signature.
        let existing = self.ast.functions[..index]
            .iter()
            .position(|f| f.name == name_tok.text && f.body.is_none() && f.params.len() == self.ast.functions[index].params.len());
        let target = existing.unwrap_or(index);
        self.ast.functions[target].body = body;
        if target != index {
            // The body references the definition's parameter symbols, not
            // the prototype's.
            let params = self.ast.functions[index].params.clone();
            self.ast.functions[target].params = params;
            self.ast.functions.truncate(index);
        }

        if name_tok.text == "main" {
            self.ast.main = Some(target);
        }
    }

    // ── statements ───────────────────────────────────────────────────

    fn parse_compound_statement(&mut self, new_scope: bool) -> Option<StmtId> {
        let loc = self.loc();
        if !self.expect("{") {
            return None;
        }
        if new_scope {
            self.push_scope();
        }

        let mut stmts = Vec::new();
        while !self.at("}") && !self.at_eof() {
            if let Some(s) = self.parse_statement() {
                stmts.push(s);
            }
        }
        self.expect("}");

        if new_scope {
            self.pop_scope();
        }
        Some(self.ast.push_stmt(Stmt {
            kind: StmtKind::Block(stmts),
            loc,
            loop_meta: None,
        }))
    }

    fn parse_statement(&mut self) -> Option<StmtId> {
        let loc = self.loc();
        let t = self.peek().clone();

        if t.is_punct("{") {
            return self.parse_compound_statement(true);
        }
        if t.is_punct(";") {
            self.advance();
            return Some(self.ast.push_stmt(Stmt {
                kind: StmtKind::Empty,
                loc,
                loop_meta: None,
            }));
        }

        if t.kind == TokKind::Identifier {
            match t.text.as_str() {
                "if" => return self.parse_if(),
                "for" => return self.parse_for(),
                "while" => return self.parse_while(),
                "do" => return self.parse_do_while(),
                "return" => {
                    self.advance();
                    let value = if self.at(";") {
                        None
                    } else {
                        self.parse_expression()
                    };
                    if let (Some(ret), Some(v)) = (self.current_ret, value) {
                        let vty = self.ast.expr(v).ty;
                        if !vty.same_shape(&ret) {
                            self.error(DiagnosticKind::TypeMismatch, loc, "return");
                        }
                    } else if self.current_ret.map(|r| r.basic != BasicType::Void) == Some(true)
                        && value.is_none()
                    {
                        self.error(DiagnosticKind::TypeMismatch, loc, "return");
                    }
                    self.expect(";");
                    return Some(self.ast.push_stmt(Stmt {
                        kind: StmtKind::Return(value),
                        loc,
                        loop_meta: None,
                    }));
                }
                "break" => {
                    self.advance();
                    self.expect(";");
                    return Some(self.ast.push_stmt(Stmt {
                        kind: StmtKind::Break,
                        loc,
                        loop_meta: None,
                    }));
                }
                "continue" => {
                    self.advance();
                    self.expect(";");
                    return Some(self.ast.push_stmt(Stmt {
                        kind: StmtKind::Continue,
                        loc,
                        loop_meta: None,
                    }));
                }
                "discard" => {
                    if self.shader != ShaderKind::Fragment {
                        self.error(DiagnosticKind::SyntaxError, loc, "discard");
                    }
                    self.advance();
                    self.expect(";");
                    return Some(self.ast.push_stmt(Stmt {
                        kind: StmtKind::Discard,
                        loc,
                        loop_meta: None,
                    }));
                }
                "precision" => {
                    self.parse_precision_statement();
                    return Some(self.ast.push_stmt(Stmt {
                        kind: StmtKind::Empty,
                        loc,
                        loop_meta: None,
                    }));
                }
                _ => {}
            }
        }

        if self.at_type_prefix() {
            return self.parse_declaration_statement();
        }

        let expr = self.parse_expression();
        self.expect(";");
        expr.map(|e| {
            self.ast.push_stmt(Stmt {
                kind: StmtKind::Expr(e),
                loc,
                loop_meta: None,
            })
        })
    }

    fn parse_declaration_statement(&mut self) -> Option<StmtId> {
        let loc = self.loc();
        let base = self.parse_fully_specified_type()?;

        if !matches!(
            base.qualifier,
            Qualifier::Temporary | Qualifier::ConstExpr
        ) {
            self.error(DiagnosticKind::InvalidQualifier, loc, "declaration");
        }

        let mut decls = Vec::new();
        loop {
            let t = self.peek().clone();
            if t.kind != TokKind::Identifier || KEYWORDS.contains(&t.text.as_str()) {
                self.syntax_error("identifier expected");
                self.recover();
                break;
            }
            self.advance();

            let mut ty = base;
            if let Some(n) = self.parse_array_suffix() {
                ty.array = Some(n);
            }
            if ty.is_sampler() {
                self.error(DiagnosticKind::SamplerOperandNotAllowed, t.location, &t.text);
            }

            let id = self.declare(&t.text, ty, t.location);

            let mut init = None;
            if self.eat("=") {
                let iloc = self.loc();
                init = self.parse_assignment();
                if let Some(e) = init {
                    let ety = self.ast.expr(e).ty;
                    if !ety.same_shape(&ty) {
                        self.error(DiagnosticKind::TypeMismatch, iloc, &t.text);
                    }
                    if ty.qualifier == Qualifier::ConstExpr {
                        match self.ast.expr(e).constant.clone() {
                            Some(v) => self.ast.symbols[id.0 as usize].const_value = Some(v),
                            None => {
                                self.error(DiagnosticKind::NotConstantExpression, iloc, &t.text)
                            }
                        }
                    }
                }
            } else if ty.qualifier == Qualifier::ConstExpr {
                self.error(DiagnosticKind::NotConstantExpression, t.location, &t.text);
            }

            decls.push((id, init));
            if !self.eat(",") {
                break;
            }
        }
        self.expect(";");

        Some(self.ast.push_stmt(Stmt {
            kind: StmtKind::Decl(decls),
            loc,
            loop_meta: None,
        }))
    }

    fn parse_condition(&mut self) -> Option<ExprId> {
        let loc = self.loc();
        let cond = self.parse_expression()?;
        let ty = self.ast.expr(cond).ty;
        if !(ty.basic == BasicType::Bool && ty.is_scalar()) {
            self.error(DiagnosticKind::TypeMismatch, loc, "condition");
        }
        Some(cond)
    }

    fn parse_if(&mut self) -> Option<StmtId> {
        let loc = self.loc();
        self.expect("if");
        self.expect("(");
        let cond = self.parse_condition();
        self.expect(")");
        let then_s = self.parse_statement()?;
        let else_s = if self.eat("else") {
            self.parse_statement()
        } else {
            None
        };

        Some(self.ast.push_stmt(Stmt {
            kind: StmtKind::If(cond?, then_s, else_s),
            loc,
            loop_meta: None,
        }))
    }

    fn parse_for(&mut self) -> Option<StmtId> {
        let loc = self.loc();
        self.expect("for");
        self.expect("(");
        self.push_scope();

        let init = if self.at(";") {
            self.advance();
            None
        } else if self.at_type_prefix() {
            self.parse_declaration_statement()
        } else {
            let e = self.parse_expression();
            self.expect(";");
            e.map(|e| {
                self.ast.push_stmt(Stmt {
                    kind: StmtKind::Expr(e),
                    loc,
                    loop_meta: None,
                })
            })
        };

        let cond = if self.at(";") {
            None
        } else {
            self.parse_condition()
        };
        self.expect(";");

        let step = if self.at(")") {
            None
        } else {
            self.parse_expression()
        };
        self.expect(")");

        let body = self.parse_statement()?;
        self.pop_scope();

        Some(self.ast.push_stmt(Stmt {
            kind: StmtKind::For {
                init,
                cond,
                step,
                body,
            },
            loc,
            loop_meta: None,
        }))
    }

    fn parse_while(&mut self) -> Option<StmtId> {
        let loc = self.loc();
        self.expect("while");
        self.expect("(");
        let cond = self.parse_condition();
        self.expect(")");
        let body = self.parse_statement()?;

        Some(self.ast.push_stmt(Stmt {
            kind: StmtKind::While(cond?, body),
            loc,
            loop_meta: None,
        }))
    }

    fn parse_do_while(&mut self) -> Option<StmtId> {
        let loc = self.loc();
        self.expect("do");
        let body = self.parse_statement()?;
        self.expect("while");
        self.expect("(");
        let cond = self.parse_condition();
        self.expect(")");
        self.expect(";");

        Some(self.ast.push_stmt(Stmt {
            kind: StmtKind::DoWhile(body, cond?),
            loc,
            loop_meta: None,
        }))
    }

    // ── expressions ──────────────────────────────────────────────────

    fn parse_expression(&mut self) -> Option<ExprId> {
        let mut lhs = self.parse_assignment()?;
        while self.at(",") {
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_assignment()?;
            let ty = self.ast.expr(rhs).ty;
            lhs = self.ast.push_expr(Expr {
                kind: ExprKind::Comma(lhs, rhs),
                ty,
                loc,
                constant: None,
            });
        }
        Some(lhs)
    }

    fn parse_assignment(&mut self) -> Option<ExprId> {
        let lhs = self.parse_ternary()?;

        let op = match self.peek().text.as_str() {
            "=" => Some(None),
            "+=" => Some(Some(BinaryOp::Add)),
            "-=" => Some(Some(BinaryOp::Sub)),
            "*=" => Some(Some(BinaryOp::Mul)),
            "/=" => Some(Some(BinaryOp::Div)),
            "%=" => Some(Some(BinaryOp::Mod)),
            "<<=" => Some(Some(BinaryOp::Shl)),
            ">>=" => Some(Some(BinaryOp::Shr)),
            "&=" => Some(Some(BinaryOp::BitAnd)),
            "|=" => Some(Some(BinaryOp::BitOr)),
            "^=" => Some(Some(BinaryOp::BitXor)),
            _ => None,
        };
        let Some(op) = op else {
            return Some(lhs);
        };
        if self.peek().kind != TokKind::Punct {
            return Some(lhs);
        }

        let loc = self.loc();
        self.advance();
        let rhs = self.parse_assignment()?;

        self.check_lvalue(lhs, loc);
        let lty = self.ast.expr(lhs).ty;
        let rty = self.ast.expr(rhs).ty;

        let result = if let Some(bin) = op {
            self.binary_result_type(bin, lty, rty, loc)
        } else if lty.same_shape(&rty) {
            Some(lty)
        } else {
            None
        };
        let Some(mut ty) = result else {
            self.error(DiagnosticKind::InvalidOperands, loc, "=");
            return Some(lhs);
        };
        if op.is_none() && lty.is_sampler() {
            self.error(DiagnosticKind::SamplerOperandNotAllowed, loc, "=");
        }
        ty.qualifier = Qualifier::Temporary;

        Some(self.ast.push_expr(Expr {
            kind: ExprKind::Assign(op, lhs, rhs),
            ty,
            loc,
            constant: None,
        }))
    }

    fn parse_ternary(&mut self) -> Option<ExprId> {
        let cond = self.parse_binary(0)?;
        if !self.at("?") {
            return Some(cond);
        }
        let loc = self.loc();
        self.advance();

        let cty = self.ast.expr(cond).ty;
        if !(cty.basic == BasicType::Bool && cty.is_scalar()) {
            self.error(DiagnosticKind::TypeMismatch, loc, "?");
        }

        let then_e = self.parse_expression()?;
        self.expect(":");
        let else_e = self.parse_assignment()?;

        let tty = self.ast.expr(then_e).ty;
        let ety = self.ast.expr(else_e).ty;
        if !tty.same_shape(&ety) {
            self.error(DiagnosticKind::TypeMismatch, loc, ":");
        }

        let constant = match (
            self.ast.expr(cond).constant.clone(),
            self.ast.expr(then_e).constant.clone(),
            self.ast.expr(else_e).constant.clone(),
        ) {
            (Some(c), Some(t), Some(e)) => Some(if c[0].as_bool() { t } else { e }),
            _ => None,
        };

        let mut ty = tty;
        ty.qualifier = Qualifier::Temporary;
        Some(self.ast.push_expr(Expr {
            kind: ExprKind::Ternary(cond, then_e, else_e),
            ty,
            loc,
            constant,
        }))
    }

    fn binop_of(text: &str) -> Option<(u8, BinaryOp)> {
        Some(match text {
            "||" => (0, BinaryOp::LogicalOr),
            "^^" => (1, BinaryOp::LogicalXor),
            "&&" => (2, BinaryOp::LogicalAnd),
            "|" => (3, BinaryOp::BitOr),
            "^" => (4, BinaryOp::BitXor),
            "&" => (5, BinaryOp::BitAnd),
            "==" => (6, BinaryOp::Eq),
            "!=" => (6, BinaryOp::Ne),
            "<" => (7, BinaryOp::Lt),
            ">" => (7, BinaryOp::Gt),
            "<=" => (7, BinaryOp::Le),
            ">=" => (7, BinaryOp::Ge),
            "<<" => (8, BinaryOp::Shl),
            ">>" => (8, BinaryOp::Shr),
            "+" => (9, BinaryOp::Add),
            "-" => (9, BinaryOp::Sub),
            "*" => (10, BinaryOp::Mul),
            "/" => (10, BinaryOp::Div),
            "%" => (10, BinaryOp::Mod),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> Option<ExprId> {
        let mut lhs = self.parse_unary()?;

        loop {
            let t = self.peek();
            if t.kind != TokKind::Punct {
                return Some(lhs);
            }
            let Some((prec, op)) = Self::binop_of(&t.text) else {
                return Some(lhs);
            };
            if prec < min_prec {
                return Some(lhs);
            }
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            lhs = self.make_binary(op, lhs, rhs, loc);
        }
    }

    fn parse_unary(&mut self) -> Option<ExprId> {
        let t = self.peek().clone();
        let loc = t.location;

        let op = match t.text.as_str() {
            "-" => Some(UnaryOp::Neg),
            "!" => Some(UnaryOp::LogicalNot),
            "~" => Some(UnaryOp::BitNot),
            "++" => Some(UnaryOp::PreInc),
            "--" => Some(UnaryOp::PreDec),
            "+" => {
                self.advance();
                return self.parse_unary();
            }
            _ => None,
        };

        if let (Some(op), TokKind::Punct) = (op, t.kind) {
            self.advance();
            let operand = self.parse_unary()?;
            return Some(self.make_unary(op, operand, loc));
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Option<ExprId> {
        let mut expr = self.parse_primary()?;

        loop {
            let loc = self.loc();
            if self.eat("[") {
                let index = self.parse_expression()?;
                self.expect("]");
                expr = self.make_index(expr, index, loc);
            } else if self.at(".") {
                self.advance();
                let field = self.advance();
                expr = self.make_swizzle(expr, &field);
            } else if self.at("++") && self.peek().kind == TokKind::Punct {
                self.advance();
                expr = self.make_unary(UnaryOp::PostInc, expr, loc);
            } else if self.at("--") && self.peek().kind == TokKind::Punct {
                self.advance();
                expr = self.make_unary(UnaryOp::PostDec, expr, loc);
            } else {
                return Some(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Option<ExprId> {
        let t = self.peek().clone();
        let loc = t.location;

        match t.kind {
            TokKind::Punct if t.text == "(" => {
                self.advance();
                let e = self.parse_expression();
                self.expect(")");
                e
            }
            TokKind::IntConst => {
                self.advance();
                let unsigned = t.text.ends_with(['u', 'U']);
                if unsigned {
                    self.require_version(300, "unsigned literal");
                }
                let Some(v) = t.int_value() else {
                    self.error(DiagnosticKind::IntegerOverflow, loc, &t.text);
                    return Some(self.literal(vec![Scalar::I(0)], Type::int(), loc));
                };
                if unsigned {
                    let mut ty = Type::new(BasicType::UInt);
                    ty.qualifier = Qualifier::ConstExpr;
                    Some(self.literal(vec![Scalar::U(v as u32)], ty, loc))
                } else {
                    Some(self.literal(vec![Scalar::I(v)], Type::int(), loc))
                }
            }
            TokKind::FloatConst => {
                self.advance();
                let text = t.text.trim_end_matches(['f', 'F']);
                let Ok(v) = text.parse::<f32>() else {
                    self.error(DiagnosticKind::FloatOverflow, loc, &t.text);
                    return Some(self.literal(vec![Scalar::F(0.0)], Type::float(), loc));
                };
                Some(self.literal(vec![Scalar::F(v)], Type::float(), loc))
            }
            TokKind::Identifier => {
                if t.text == "true" || t.text == "false" {
                    self.advance();
                    return Some(self.literal(
                        vec![Scalar::B(t.text == "true")],
                        Type::bool_(),
                        loc,
                    ));
                }

                // Constructor?
                if let Some((basic, size, rows)) = Self::basic_type_of(&t.text) {
                    self.advance();
                    let mut ty = Type::new(basic);
                    ty.size = size;
                    ty.rows = rows;
                    return self.parse_constructor(ty, loc);
                }

                // Call or variable.
                if self.peek2().map(|n| n.is_punct("(")).unwrap_or(false) {
                    self.advance();
                    return self.parse_call(&t);
                }

                self.advance();
                let Some(id) = self.lookup(&t.text) else {
                    self.error(DiagnosticKind::UndeclaredIdentifier, loc, &t.text);
                    return Some(self.literal(vec![Scalar::F(0.0)], Type::float(), loc));
                };
                let symbol = self.ast.symbol(id);
                let ty = symbol.ty;
                let constant = symbol.const_value.clone();
                Some(self.ast.push_expr(Expr {
                    kind: ExprKind::Symbol(id),
                    ty,
                    loc,
                    constant,
                }))
            }
            _ => {
                self.syntax_error("expression expected");
                self.advance();
                None
            }
        }
    }

    fn literal(&mut self, value: ConstVal, mut ty: Type, loc: Location) -> ExprId {
        ty.qualifier = Qualifier::ConstExpr;
        self.ast.push_expr(Expr {
            kind: ExprKind::Literal(value.clone()),
            ty,
            loc,
            constant: Some(value),
        })
    }

    fn parse_args(&mut self) -> Option<Vec<ExprId>> {
        self.expect("(");
        let mut args = Vec::new();
        if self.eat(")") {
            return Some(args);
        }
        // `f(void)`
        if self.at("void") && self.peek2().map(|t| t.text == ")").unwrap_or(false) {
            self.advance();
            self.advance();
            return Some(args);
        }
        loop {
            args.push(self.parse_assignment()?);
            if !self.eat(",") {
                break;
            }
        }
        self.expect(")");
        Some(args)
    }

    fn parse_constructor(&mut self, ty: Type, loc: Location) -> Option<ExprId> {
        let args = self.parse_args()?;
        Some(self.make_constructor(ty, args, loc))
    }

    fn parse_call(&mut self, name: &Token) -> Option<ExprId> {
        let loc = name.location;
        let args = self.parse_args()?;

        for arg in &args {
            if self.ast.expr(*arg).ty.basic == BasicType::Void {
                self.error(DiagnosticKind::TypeMismatch, loc, &name.text);
            }
        }

        // User functions take precedence over same-named builtins (GLSL
        // forbids redefining builtins, but stay permissive).
        let sig: Vec<Type> = args.iter().map(|a| self.ast.expr(*a).ty).collect();
        if let Some(index) = self.ast.functions.iter().position(|f| {
            f.name == name.text
                && f.params.len() == sig.len()
                && f.params
                    .iter()
                    .zip(&sig)
                    .all(|(p, a)| self.ast.symbol(p.symbol).ty.same_shape(a))
        }) {
            let ty = self.ast.functions[index].ret;
            return Some(self.ast.push_expr(Expr {
                kind: ExprKind::Call(index, args),
                ty,
                loc,
                constant: None,
            }));
        }

        if let Some(e) = self.make_builtin(&name.text, args, loc) {
            return Some(e);
        }

        self.error(DiagnosticKind::NoMatchingFunction, loc, &name.text);
        Some(self.literal(vec![Scalar::F(0.0)], Type::float(), loc))
    }

    // ── node construction with type checking ─────────────────────────

    fn check_lvalue(&mut self, e: ExprId, loc: Location) {
        let expr = self.ast.expr(e);
        let ok = match &expr.kind {
            ExprKind::Symbol(_) => expr.ty.qualifier.is_assignable(),
            ExprKind::Index(base, _) => {
                let base = self.ast.expr(*base);
                base.ty.qualifier.is_assignable()
            }
            ExprKind::Swizzle(base, lanes, count) => {
                let unique = {
                    let mut seen = [false; 4];
                    let mut u = true;
                    for &l in &lanes[..*count as usize] {
                        if seen[l as usize] {
                            u = false;
                        }
                        seen[l as usize] = true;
                    }
                    u
                };
                let base = self.ast.expr(*base);
                unique && base.ty.qualifier.is_assignable()
            }
            _ => false,
        };
        if !ok {
            self.error(DiagnosticKind::NotLValue, loc, "assignment");
        }
    }

    fn make_unary(&mut self, op: UnaryOp, operand: ExprId, loc: Location) -> ExprId {
        let oty = self.ast.expr(operand).ty;
        let mut ty = oty;
        ty.qualifier = Qualifier::Temporary;

        match op {
            UnaryOp::Neg => {
                if !oty.is_numeric() || oty.is_array() {
                    self.error(DiagnosticKind::InvalidOperands, loc, "-");
                }
            }
            UnaryOp::LogicalNot => {
                if !(oty.basic == BasicType::Bool && oty.is_scalar()) {
                    self.error(DiagnosticKind::InvalidOperands, loc, "!");
                }
            }
            UnaryOp::BitNot => {
                self.require_version(300, "~");
                if !matches!(oty.basic, BasicType::Int | BasicType::UInt) {
                    self.error(DiagnosticKind::InvalidOperands, loc, "~");
                }
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                if !oty.is_numeric() || oty.is_array() {
                    self.error(DiagnosticKind::InvalidOperands, loc, "++");
                }
                self.check_lvalue(operand, loc);
            }
        }

        let constant = if matches!(op, UnaryOp::Neg | UnaryOp::LogicalNot | UnaryOp::BitNot) {
            self.ast.expr(operand).constant.clone().map(|v| {
                v.into_iter()
                    .map(|s| match op {
                        UnaryOp::Neg => match s {
                            Scalar::F(v) => Scalar::F(-v),
                            Scalar::I(v) => Scalar::I(v.wrapping_neg()),
                            Scalar::U(v) => Scalar::U(v.wrapping_neg()),
                            Scalar::B(v) => Scalar::B(v),
                        },
                        UnaryOp::LogicalNot => Scalar::B(!s.as_bool()),
                        _ => match s {
                            Scalar::I(v) => Scalar::I(!v),
                            Scalar::U(v) => Scalar::U(!v),
                            other => other,
                        },
                    })
                    .collect()
            })
        } else {
            None
        };

        self.ast.push_expr(Expr {
            kind: ExprKind::Unary(op, operand),
            ty,
            loc,
            constant,
        })
    }

    fn binary_result_type(
        &mut self,
        op: BinaryOp,
        l: Type,
        r: Type,
        loc: Location,
    ) -> Option<Type> {
        use BinaryOp::*;

        if l.is_sampler() || r.is_sampler() {
            self.error(DiagnosticKind::SamplerOperandNotAllowed, loc, "operator");
            return None;
        }
        if l.is_array() || r.is_array() {
            return None;
        }

        let result = match op {
            LogicalAnd | LogicalOr | LogicalXor => {
                if l.basic == BasicType::Bool && l.is_scalar() && r.basic == BasicType::Bool && r.is_scalar()
                {
                    Some(Type::bool_())
                } else {
                    None
                }
            }
            Eq | Ne => {
                if l.same_shape(&r) {
                    Some(Type::bool_())
                } else {
                    None
                }
            }
            Lt | Le | Gt | Ge => {
                if l.basic == r.basic && l.is_scalar() && r.is_scalar() && l.is_numeric() {
                    Some(Type::bool_())
                } else {
                    None
                }
            }
            Mod | Shl | Shr | BitAnd | BitOr | BitXor => {
                self.require_version(300, "integer operator");
                if !matches!(l.basic, BasicType::Int | BasicType::UInt) || l.is_matrix() {
                    None
                } else if matches!(op, Shl | Shr) {
                    // Shift count is scalar or matches the left shape.
                    if r.is_scalar() || r.same_shape(&l) {
                        Some(l)
                    } else {
                        None
                    }
                } else if l.same_shape(&r) {
                    Some(l)
                } else if l.is_vector() && r.is_scalar() && l.basic == r.basic {
                    Some(l)
                } else if l.is_scalar() && r.is_vector() && l.basic == r.basic {
                    Some(r)
                } else {
                    None
                }
            }
            Add | Sub | Div | Mul => {
                if !l.is_numeric() || !r.is_numeric() {
                    return None;
                }
                // Integer operands promote to float when mixed; the lowerer
                // inserts the conversion.
                let (mut l, mut r) = (l, r);
                if l.basic != r.basic {
                    if l.basic == BasicType::Float {
                        r.basic = BasicType::Float;
                    } else if r.basic == BasicType::Float {
                        l.basic = BasicType::Float;
                    } else {
                        return None;
                    }
                }
                if op == Mul {
                    // Linear-algebra multiply shapes.
                    if l.is_matrix() && r.is_matrix() && l.size == r.size {
                        return Some(l);
                    }
                    if l.is_matrix() && r.is_vector() && r.size == l.size {
                        let mut t = Type::vec(l.rows);
                        t.basic = l.basic;
                        return Some(t);
                    }
                    if l.is_vector() && r.is_matrix() && l.size == r.rows {
                        let mut t = Type::vec(r.size);
                        t.basic = l.basic;
                        return Some(t);
                    }
                }
                if l.same_shape(&r) {
                    Some(l)
                } else if l.is_scalar() {
                    Some(r)
                } else if r.is_scalar() {
                    Some(l)
                } else {
                    None
                }
            }
        };

        result.map(|mut t| {
            t.qualifier = Qualifier::Temporary;
            t.precision = if l.precision == Precision::High || r.precision == Precision::High {
                Precision::High
            } else {
                l.precision
            };
            t
        })
    }

    fn make_binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId, loc: Location) -> ExprId {
        let lty = self.ast.expr(lhs).ty;
        let rty = self.ast.expr(rhs).ty;

        let Some(ty) = self.binary_result_type(op, lty, rty, loc) else {
            self.error(DiagnosticKind::InvalidOperands, loc, "operator");
            let mut t = lty;
            t.qualifier = Qualifier::Temporary;
            return self.ast.push_expr(Expr {
                kind: ExprKind::Binary(op, lhs, rhs),
                ty: t,
                loc,
                constant: None,
            });
        };

        let constant = self.fold_binary(op, lhs, rhs, &ty);
        self.ast.push_expr(Expr {
            kind: ExprKind::Binary(op, lhs, rhs),
            ty,
            loc,
            constant,
        })
    }

    fn fold_binary(&self, op: BinaryOp, lhs: ExprId, rhs: ExprId, ty: &Type) -> Option<ConstVal> {
        use BinaryOp::*;

        let l = self.ast.expr(lhs).constant.clone()?;
        let r = self.ast.expr(rhs).constant.clone()?;
        if self.ast.expr(lhs).ty.is_matrix() || self.ast.expr(rhs).ty.is_matrix() {
            return None;
        }

        let n = ty.components().max(1) as usize;
        let get = |v: &ConstVal, i: usize| -> Scalar {
            if v.len() == 1 {
                v[0]
            } else {
                v[i.min(v.len() - 1)]
            }
        };

        match op {
            Eq | Ne => {
                let eq = (0..l.len().max(r.len()))
                    .all(|i| scalar_eq(get(&l, i), get(&r, i)));
                return Some(vec![Scalar::B(if op == Eq { eq } else { !eq })]);
            }
            Lt | Le | Gt | Ge => {
                let (a, b) = (l[0].as_f32(), r[0].as_f32());
                let v = match op {
                    Lt => a < b,
                    Le => a <= b,
                    Gt => a > b,
                    _ => a >= b,
                };
                return Some(vec![Scalar::B(v)]);
            }
            LogicalAnd => return Some(vec![Scalar::B(l[0].as_bool() && r[0].as_bool())]),
            LogicalOr => return Some(vec![Scalar::B(l[0].as_bool() || r[0].as_bool())]),
            LogicalXor => return Some(vec![Scalar::B(l[0].as_bool() != r[0].as_bool())]),
            _ => {}
        }

        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let a = get(&l, i);
            let b = get(&r, i);
            let v = match (a, b) {
                (Scalar::F(x), _) | (_, Scalar::F(x)) => {
                    let x = if matches!(a, Scalar::F(_)) { x } else { a.as_f32() };
                    let y = b.as_f32();
                    Scalar::F(match op {
                        Add => x + y,
                        Sub => x - y,
                        Mul => x * y,
                        Div => x / y,
                        _ => return None,
                    })
                }
                (Scalar::U(x), _) => {
                    let y = b.bits();
                    Scalar::U(match op {
                        Add => x.wrapping_add(y),
                        Sub => x.wrapping_sub(y),
                        Mul => x.wrapping_mul(y),
                        Div => x.checked_div(y).unwrap_or(0),
                        Mod => x.checked_rem(y).unwrap_or(0),
                        Shl => x.checked_shl(y).unwrap_or(0),
                        Shr => x.checked_shr(y).unwrap_or(0),
                        BitAnd => x & y,
                        BitOr => x | y,
                        BitXor => x ^ y,
                        _ => return None,
                    })
                }
                (Scalar::I(x), _) => {
                    let y = b.as_i32();
                    Scalar::I(match op {
                        Add => x.wrapping_add(y),
                        Sub => x.wrapping_sub(y),
                        Mul => x.wrapping_mul(y),
                        Div => x.checked_div(y).unwrap_or(0),
                        Mod => x.checked_rem(y).unwrap_or(0),
                        Shl => x.checked_shl(y as u32).unwrap_or(0),
                        Shr => x.checked_shr(y as u32).unwrap_or(0),
                        BitAnd => x & y,
                        BitOr => x | y,
                        BitXor => x ^ y,
                        _ => return None,
                    })
                }
                _ => return None,
            };
            out.push(v);
        }
        Some(out)
    }

    fn make_index(&mut self, base: ExprId, index: ExprId, loc: Location) -> ExprId {
        let bty = self.ast.expr(base).ty;
        let ity = self.ast.expr(index).ty;

        if !(matches!(ity.basic, BasicType::Int | BasicType::UInt) && ity.is_scalar()) {
            self.error(DiagnosticKind::TypeMismatch, loc, "[]");
        }
        if !(bty.is_array() || bty.is_vector() || bty.is_matrix()) {
            self.error(DiagnosticKind::InvalidOperands, loc, "[]");
        }

        // Constant indices are range-checked here; dynamic ones are the
        // limitation validator's business.
        if let Some(c) = &self.ast.expr(index).constant {
            let i = c[0].as_i32();
            let limit = bty
                .array
                .map(|n| n as i32)
                .unwrap_or_else(|| if bty.is_matrix() { bty.size as i32 } else { bty.size as i32 });
            if i < 0 || i >= limit {
                self.error(DiagnosticKind::IndexOutOfRange, loc, i.to_string());
            }
        }

        let mut ty = bty.indexed_once();
        ty.qualifier = if bty.qualifier.is_assignable() {
            bty.qualifier
        } else {
            bty.qualifier
        };

        let constant = match (&self.ast.expr(base).constant, &self.ast.expr(index).constant) {
            (Some(b), Some(i)) if !bty.is_array() && !bty.is_matrix() => {
                let i = i[0].as_i32() as usize;
                b.get(i).map(|s| vec![*s])
            }
            _ => None,
        };

        self.ast.push_expr(Expr {
            kind: ExprKind::Index(base, index),
            ty,
            loc,
            constant,
        })
    }

    fn make_swizzle(&mut self, base: ExprId, field: &Token) -> ExprId {
        let loc = field.location;
        let bty = self.ast.expr(base).ty;

        if !bty.is_vector() && !bty.is_scalar() || bty.is_array() || bty.is_matrix() {
            self.error(DiagnosticKind::InvalidSwizzle, loc, &field.text);
        }

        let mut lanes = [0u8; 4];
        let count = field.text.len().min(4) as u8;
        let mut valid = field.kind == TokKind::Identifier && !field.text.is_empty() && field.text.len() <= 4;
        for (i, c) in field.text.chars().take(4).enumerate() {
            let lane = match c {
                'x' | 'r' | 's' => 0u8,
                'y' | 'g' | 't' => 1,
                'z' | 'b' | 'p' => 2,
                'w' | 'a' | 'q' => 3,
                _ => {
                    valid = false;
                    0
                }
            };
            if lane >= bty.size {
                valid = false;
            }
            lanes[i] = lane;
        }
        if !valid {
            self.error(DiagnosticKind::InvalidSwizzle, loc, &field.text);
        }

        let mut ty = bty;
        ty.size = count;
        ty.rows = 1;
        if !bty.qualifier.is_assignable() {
            ty.qualifier = bty.qualifier;
        }

        let constant = self.ast.expr(base).constant.clone().map(|v| {
            (0..count as usize)
                .map(|i| v.get(lanes[i] as usize).copied().unwrap_or(Scalar::F(0.0)))
                .collect()
        });

        self.ast.push_expr(Expr {
            kind: ExprKind::Swizzle(base, lanes, count),
            ty,
            loc,
            constant,
        })
    }

    fn make_constructor(&mut self, target: Type, args: Vec<ExprId>, loc: Location) -> ExprId {
        let needed = target.components() as usize;
        let mut supplied = 0usize;
        let mut all_const = true;

        for &a in &args {
            let aty = self.ast.expr(a).ty;
            if aty.is_sampler() || aty.basic == BasicType::Void || aty.is_array() {
                self.error(DiagnosticKind::TypeMismatch, loc, "constructor");
            }
            supplied += aty.components() as usize;
            all_const &= self.ast.expr(a).constant.is_some();
        }

        let valid = if args.len() == 1 && self.ast.expr(args[0]).ty.is_scalar() {
            true // splat or diagonal
        } else if target.is_matrix() && args.len() == 1 && self.ast.expr(args[0]).ty.is_matrix() {
            true
        } else {
            supplied >= needed && !args.is_empty()
        };
        if !valid {
            self.error(DiagnosticKind::TypeMismatch, loc, "constructor");
        }

        let constant = if all_const && !target.is_matrix() {
            let mut flat = Vec::new();
            for &a in &args {
                flat.extend(self.ast.expr(a).constant.clone().unwrap());
            }
            let convert = |s: Scalar| match target.basic {
                BasicType::Float => Scalar::F(s.as_f32()),
                BasicType::Int => Scalar::I(s.as_i32()),
                BasicType::UInt => Scalar::U(s.as_i32() as u32),
                BasicType::Bool => Scalar::B(s.as_bool()),
                _ => s,
            };
            if flat.len() == 1 {
                Some(vec![convert(flat[0]); needed])
            } else if flat.len() >= needed {
                Some(flat.into_iter().take(needed).map(convert).collect())
            } else {
                None
            }
        } else {
            None
        };

        let mut ty = target;
        ty.qualifier = if constant.is_some() {
            Qualifier::ConstExpr
        } else {
            Qualifier::Temporary
        };

        self.ast.push_expr(Expr {
            kind: ExprKind::Constructor(target, args),
            ty,
            loc,
            constant,
        })
    }

    fn make_builtin(&mut self, name: &str, args: Vec<ExprId>, loc: Location) -> Option<ExprId> {
        use BuiltinFn::*;

        let tys: Vec<Type> = args.iter().map(|a| self.ast.expr(*a).ty).collect();
        let float_args = tys.iter().all(|t| t.basic == BasicType::Float && !t.is_matrix() && !t.is_array());
        let vec_size = tys.first().map(|t| t.size).unwrap_or(1);

        // genType: every argument a float scalar/vector of the first's size,
        // with a scalar allowed where noted.
        let gen = |count: usize, scalar_tail: bool| -> bool {
            args.len() == count
                && float_args
                && tys
                    .iter()
                    .enumerate()
                    .all(|(i, t)| t.size == vec_size || (scalar_tail && i > 0 && t.is_scalar()))
        };

        let (builtin, ret): (BuiltinFn, Type) = match name {
            "radians" if gen(1, false) => (Radians, tys[0]),
            "degrees" if gen(1, false) => (Degrees, tys[0]),
            "sin" if gen(1, false) => (Sin, tys[0]),
            "cos" if gen(1, false) => (Cos, tys[0]),
            "tan" if gen(1, false) => (Tan, tys[0]),
            "asin" if gen(1, false) => (Asin, tys[0]),
            "acos" if gen(1, false) => (Acos, tys[0]),
            "atan" if gen(1, false) => (Atan, tys[0]),
            "atan" if gen(2, false) => (Atan2, tys[0]),
            "pow" if gen(2, false) => (Pow, tys[0]),
            "exp" if gen(1, false) => (Exp, tys[0]),
            "log" if gen(1, false) => (Log, tys[0]),
            "exp2" if gen(1, false) => (Exp2, tys[0]),
            "log2" if gen(1, false) => (Log2, tys[0]),
            "sqrt" if gen(1, false) => (Sqrt, tys[0]),
            "inversesqrt" if gen(1, false) => (InverseSqrt, tys[0]),
            "abs" if args.len() == 1 && tys[0].is_numeric() && !tys[0].is_matrix() => (Abs, tys[0]),
            "sign" if args.len() == 1 && tys[0].is_numeric() && !tys[0].is_matrix() => (Sign, tys[0]),
            "floor" if gen(1, false) => (Floor, tys[0]),
            "ceil" if gen(1, false) => (Ceil, tys[0]),
            "fract" if gen(1, false) => (Fract, tys[0]),
            "mod" if gen(2, true) => (Mod, tys[0]),
            "min" if gen(2, true) => (Min, tys[0]),
            "max" if gen(2, true) => (Max, tys[0]),
            "clamp" if gen(3, true) => (Clamp, tys[0]),
            "mix" if gen(3, true) => (Mix, tys[0]),
            "step" if args.len() == 2 && float_args && (tys[0].size == tys[1].size || tys[0].is_scalar()) => {
                (Step, tys[1])
            }
            "smoothstep"
                if args.len() == 3
                    && float_args
                    && (tys[0].size == tys[2].size || (tys[0].is_scalar() && tys[1].is_scalar())) =>
            {
                (SmoothStep, tys[2])
            }
            "length" if gen(1, false) => (Length, Type::float()),
            "distance" if gen(2, false) => (Distance, Type::float()),
            "dot" if gen(2, false) => (Dot, Type::float()),
            "cross" if gen(2, false) && vec_size == 3 => (Cross, tys[0]),
            "normalize" if gen(1, false) => (Normalize, tys[0]),
            "reflect" if gen(2, false) => (Reflect, tys[0]),
            "texture2D"
                if args.len() == 2
                    && tys[0].basic == BasicType::Sampler2D
                    && tys[1].size == 2 =>
            {
                self.require_version_below(300, "texture2D");
                (Texture2D, Type::vec(4))
            }
            "textureCube"
                if args.len() == 2
                    && tys[0].basic == BasicType::SamplerCube
                    && tys[1].size == 3 =>
            {
                self.require_version_below(300, "textureCube");
                (Texture, Type::vec(4))
            }
            "texture"
                if args.len() == 2
                    && tys[0].is_sampler()
                    && tys[1].size == if tys[0].basic == BasicType::Sampler2D { 2 } else { 3 } =>
            {
                self.require_version(300, "texture");
                (Texture, Type::vec(4))
            }
            "textureLod"
                if args.len() == 3
                    && tys[0].is_sampler()
                    && tys[2].is_scalar() =>
            {
                self.require_version(300, "textureLod");
                (TextureLod, Type::vec(4))
            }
            _ => return None,
        };

        let constant = self.fold_builtin(builtin, &args, &ret);
        let mut ty = ret;
        ty.qualifier = Qualifier::Temporary;
        Some(self.ast.push_expr(Expr {
            kind: ExprKind::Builtin(builtin, args),
            ty,
            loc,
            constant,
        }))
    }

    fn fold_builtin(&self, builtin: BuiltinFn, args: &[ExprId], ret: &Type) -> Option<ConstVal> {
        use BuiltinFn::*;

        let consts: Option<Vec<ConstVal>> = args
            .iter()
            .map(|a| self.ast.expr(*a).constant.clone())
            .collect();
        let consts = consts?;

        let n = ret.components() as usize;
        let get = |v: &ConstVal, i: usize| -> f32 {
            if v.len() == 1 {
                v[0].as_f32()
            } else {
                v[i.min(v.len() - 1)].as_f32()
            }
        };

        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let a = get(&consts[0], i);
            let v = match builtin {
                Radians => a.to_radians(),
                Degrees => a.to_degrees(),
                Sin => a.sin(),
                Cos => a.cos(),
                Sqrt => a.sqrt(),
                Abs => a.abs(),
                Sign => {
                    if a > 0.0 {
                        1.0
                    } else if a < 0.0 {
                        -1.0
                    } else {
                        0.0
                    }
                }
                Floor => a.floor(),
                Ceil => a.ceil(),
                Fract => a - a.floor(),
                Min => a.min(get(&consts[1], i)),
                Max => a.max(get(&consts[1], i)),
                Pow => a.powf(get(&consts[1], i)),
                Clamp => a.max(get(&consts[1], i)).min(get(&consts[2], i)),
                _ => return None,
            };
            out.push(Scalar::F(v));
        }
        Some(out)
    }
}

fn scalar_eq(a: Scalar, b: Scalar) -> bool {
    match (a, b) {
        (Scalar::B(x), Scalar::B(y)) => x == y,
        (Scalar::F(x), Scalar::F(y)) => x == y,
        _ => a.as_f32() == b.as_f32(),
    }
}
