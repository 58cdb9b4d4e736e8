//! Macro expansion.
//!
//! The expander layers over any token source. Identifier tokens naming a
//! macro are replaced by their (argument-substituted) replacement lists;
//! expanded tokens are replayed before the underlying stream continues.
//! GLSL has no `#`/`##` operators, so arguments are fully expanded before
//! substitution and expansion is idempotent after one fixed point.
//!
//! The macro table and diagnostics sink are shared with the directive
//! parser, which mutates them between the tokens this expander pulls.

use super::macros::{int_token, MacroKind, MacroSet};
use super::token::{Lexer, Location, TokKind, Token};
use crate::diag::{DiagnosticKind, Diagnostics};
use std::cell::RefCell;
use std::rc::Rc;

struct Context {
    macro_: Rc<super::macros::Macro>,
    tokens: Vec<Token>,
    pos: usize,
}

pub struct MacroExpander<'a> {
    lexer: &'a mut dyn Lexer,
    macros: &'a RefCell<MacroSet>,
    diags: &'a RefCell<Diagnostics>,
    contexts: Vec<Context>,
    pushed_back: Vec<Token>,
    parse_defined: bool,
    max_depth: usize,
}

impl<'a> MacroExpander<'a> {
    pub fn new(
        lexer: &'a mut dyn Lexer,
        macros: &'a RefCell<MacroSet>,
        diags: &'a RefCell<Diagnostics>,
        parse_defined: bool,
    ) -> MacroExpander<'a> {
        MacroExpander {
            lexer,
            macros,
            diags,
            contexts: Vec::new(),
            pushed_back: Vec::new(),
            parse_defined,
            max_depth: 1000,
        }
    }

    fn report(&self, kind: DiagnosticKind, location: Location, text: &str) {
        self.diags.borrow_mut().report(kind, location, text);
    }

    fn next_raw(&mut self) -> Token {
        if let Some(tok) = self.pushed_back.pop() {
            return tok;
        }

        while let Some(ctx) = self.contexts.last_mut() {
            if ctx.pos < ctx.tokens.len() {
                ctx.pos += 1;
                return ctx.tokens[ctx.pos - 1].clone();
            }
            let ctx = self.contexts.pop().unwrap();
            let count = ctx.macro_.expansion_count.get();
            ctx.macro_.expansion_count.set(count.saturating_sub(1));
        }

        self.lexer.lex()
    }

    fn unget(&mut self, tok: Token) {
        self.pushed_back.push(tok);
    }

    fn is_expanding(&self, name: &str) -> bool {
        self.contexts.iter().any(|c| c.macro_.name == name)
    }

    /// `defined X` / `defined(X)`, recognized before expansion when enabled.
    fn try_defined(&mut self, tok: &Token) -> Option<Token> {
        if !self.parse_defined || !tok.is(TokKind::Identifier, "defined") {
            return None;
        }

        let mut next = self.next_raw();
        let paren = next.is_punct("(");
        if paren {
            next = self.next_raw();
        }

        if next.kind != TokKind::Identifier {
            self.report(DiagnosticKind::UnexpectedToken, next.location, &next.text);
            return Some(Token::eof());
        }
        let defined = self.macros.borrow().contains_key(&next.text);

        if paren {
            let close = self.next_raw();
            if !close.is_punct(")") {
                self.report(DiagnosticKind::UnexpectedToken, close.location, &close.text);
                return Some(Token::eof());
            }
        }

        let mut result = int_token(defined as i32);
        result.location = tok.location;
        result.leading_space = tok.leading_space;
        Some(result)
    }

    fn expand(&mut self, tok: &Token) -> bool {
        let Some(macro_) = self.macros.borrow().get(&tok.text).cloned() else {
            return false;
        };
        if self.is_expanding(&macro_.name) {
            return false;
        }
        if self.contexts.len() >= self.max_depth {
            self.report(
                DiagnosticKind::MacroInvocationChainTooDeep,
                tok.location,
                &tok.text,
            );
            return false;
        }

        // __LINE__ / __FILE__ produce the invocation site.
        if macro_.predefined && macro_.replacement.is_empty() {
            let value = match macro_.name.as_str() {
                "__LINE__" => tok.location.line as i32,
                "__FILE__" => tok.location.file as i32,
                _ => return false,
            };
            let mut t = int_token(value);
            t.location = tok.location;
            t.leading_space = tok.leading_space;
            self.unget(t);
            return true;
        }

        let mut tokens = match macro_.kind {
            MacroKind::Object => macro_.replacement.clone(),
            MacroKind::Function => {
                // A name without `(` is not an invocation.
                let next = self.next_raw();
                if !next.is_punct("(") {
                    self.unget(next);
                    return false;
                }
                let Some(args) = self.collect_arguments(&macro_, tok.location) else {
                    return true; // diagnostics already reported; tokens dropped
                };
                substitute(&macro_, &args)
            }
        };

        for t in &mut tokens {
            t.location = tok.location;
        }
        if let Some(first) = tokens.first_mut() {
            first.leading_space = tok.leading_space;
        }

        macro_
            .expansion_count
            .set(macro_.expansion_count.get() + 1);
        self.contexts.push(Context {
            macro_,
            tokens,
            pos: 0,
        });
        true
    }

    fn collect_arguments(
        &mut self,
        macro_: &super::macros::Macro,
        location: Location,
    ) -> Option<Vec<Vec<Token>>> {
        let mut args: Vec<Vec<Token>> = vec![Vec::new()];
        let mut depth = 1usize;

        loop {
            let tok = self.next_raw();
            match tok.kind {
                TokKind::Eof => {
                    self.report(
                        DiagnosticKind::MacroUnterminatedInvocation,
                        location,
                        &macro_.name,
                    );
                    return None;
                }
                TokKind::Newline => {
                    // Allowed inside an invocation outside directives.
                    continue;
                }
                TokKind::Punct if tok.text == "(" => {
                    depth += 1;
                    args.last_mut().unwrap().push(tok);
                }
                TokKind::Punct if tok.text == ")" => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    args.last_mut().unwrap().push(tok);
                }
                TokKind::Punct if tok.text == "," && depth == 1 => {
                    args.push(Vec::new());
                }
                _ => args.last_mut().unwrap().push(tok),
            }
        }

        // `M()` with one empty argument invokes a zero-parameter macro.
        if macro_.parameters.is_empty() && args.len() == 1 && args[0].is_empty() {
            args.clear();
        }

        if args.len() < macro_.parameters.len() {
            self.report(DiagnosticKind::MacroTooFewArgs, location, &macro_.name);
            return None;
        }
        if args.len() > macro_.parameters.len() {
            self.report(DiagnosticKind::MacroTooManyArgs, location, &macro_.name);
            return None;
        }

        // Arguments are macro-expanded before substitution.
        let expanded = args
            .into_iter()
            .map(|arg| {
                let mut source = VecLexer { tokens: arg, pos: 0 };
                let mut sub =
                    MacroExpander::new(&mut source, self.macros, self.diags, self.parse_defined);
                let mut out = Vec::new();
                loop {
                    let t = sub.lex();
                    if t.kind == TokKind::Eof {
                        break;
                    }
                    out.push(t);
                }
                out
            })
            .collect();

        Some(expanded)
    }
}

fn substitute(macro_: &super::macros::Macro, args: &[Vec<Token>]) -> Vec<Token> {
    let mut out = Vec::new();
    for tok in &macro_.replacement {
        let param = (tok.kind == TokKind::Identifier)
            .then(|| macro_.parameters.iter().position(|p| *p == tok.text))
            .flatten();
        match param {
            Some(i) => {
                for (j, t) in args[i].iter().enumerate() {
                    let mut t = t.clone();
                    if j == 0 {
                        t.leading_space = tok.leading_space;
                    }
                    out.push(t);
                }
            }
            None => out.push(tok.clone()),
        }
    }
    out
}

impl Lexer for MacroExpander<'_> {
    fn lex(&mut self) -> Token {
        loop {
            let tok = self.next_raw();

            if let Some(result) = self.try_defined(&tok) {
                return result;
            }

            if tok.kind == TokKind::Identifier && self.expand(&tok) {
                continue;
            }

            return tok;
        }
    }
}

/// Replays a fixed token list; used for macro arguments.
pub struct VecLexer {
    pub tokens: Vec<Token>,
    pub pos: usize,
}

impl Lexer for VecLexer {
    fn lex(&mut self) -> Token {
        match self.tokens.get(self.pos) {
            Some(t) => {
                self.pos += 1;
                t.clone()
            }
            None => Token::eof(),
        }
    }
}
