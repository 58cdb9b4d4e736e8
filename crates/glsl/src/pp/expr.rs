//! Integer expression evaluation for `#if`/`#elif`/`#line`.
//!
//! Precedence-climbing parser over a macro-expanding lexer. Wraps on
//! overflow like 32-bit two's complement; division by zero is diagnosed and
//! yields zero so parsing continues. Diagnostics are queued and drained by
//! the directive parser once the expanding lexer is released.

use super::token::{Lexer, Location, TokKind, Token};
use crate::diag::DiagnosticKind;

pub struct ErrorSettings {
    pub unexpected_identifier: DiagnosticKind,
    pub integer_literals_must_fit: bool,
}

impl Default for ErrorSettings {
    fn default() -> Self {
        ErrorSettings {
            unexpected_identifier: DiagnosticKind::ConditionalUnexpectedToken,
            integer_literals_must_fit: false,
        }
    }
}

pub struct Evaluation {
    pub value: i32,
    pub valid: bool,
    pub trailing: Token,
    pub pending: Vec<(DiagnosticKind, Location, String)>,
}

pub struct ExpressionParser<'a> {
    lexer: &'a mut dyn Lexer,
    token: Token,
    valid: bool,
    settings: ErrorSettings,
    pending: Vec<(DiagnosticKind, Location, String)>,
}

impl<'a> ExpressionParser<'a> {
    pub fn new(lexer: &'a mut dyn Lexer, settings: ErrorSettings) -> ExpressionParser<'a> {
        ExpressionParser {
            lexer,
            token: Token::eof(),
            valid: true,
            settings,
            pending: Vec::new(),
        }
    }

    /// Parse one expression. `preset` supplies an already-lexed first token.
    pub fn parse(mut self, preset: Option<Token>) -> Evaluation {
        self.token = match preset {
            Some(tok) => tok,
            None => self.lexer.lex(),
        };

        let value = self.parse_binary(0);
        Evaluation {
            value,
            valid: self.valid,
            trailing: self.token,
            pending: self.pending,
        }
    }

    fn advance(&mut self) {
        self.token = self.lexer.lex();
    }

    fn error(&mut self, kind: DiagnosticKind) {
        if self.valid {
            self.pending
                .push((kind, self.token.location, self.token.text.clone()));
            self.valid = false;
        }
    }

    fn parse_unary(&mut self) -> i32 {
        match self.token.kind {
            TokKind::Punct => match self.token.text.as_str() {
                "+" => {
                    self.advance();
                    self.parse_unary()
                }
                "-" => {
                    self.advance();
                    self.parse_unary().wrapping_neg()
                }
                "~" => {
                    self.advance();
                    !self.parse_unary()
                }
                "!" => {
                    self.advance();
                    (self.parse_unary() == 0) as i32
                }
                "(" => {
                    self.advance();
                    let v = self.parse_binary(0);
                    if self.token.is_punct(")") {
                        self.advance();
                    } else {
                        self.error(DiagnosticKind::UnexpectedToken);
                    }
                    v
                }
                _ => {
                    self.error(DiagnosticKind::UnexpectedToken);
                    0
                }
            },
            TokKind::IntConst => {
                let v = match self.token.int_value() {
                    Some(v) => {
                        if self.settings.integer_literals_must_fit && v < 0 {
                            self.error(DiagnosticKind::IntegerOverflow);
                        }
                        v
                    }
                    None => {
                        self.error(DiagnosticKind::IntegerOverflow);
                        0
                    }
                };
                self.advance();
                v
            }
            TokKind::Identifier => {
                // An identifier that survived macro expansion is undefined.
                let kind = self.settings.unexpected_identifier;
                self.error(kind);
                self.advance();
                0
            }
            _ => {
                self.error(DiagnosticKind::InvalidExpression);
                0
            }
        }
    }

    fn parse_binary(&mut self, min_prec: u8) -> i32 {
        let mut lhs = self.parse_unary();

        loop {
            let Some((prec, op)) = self.peek_binop() else {
                return lhs;
            };
            if prec < min_prec {
                return lhs;
            }
            self.advance();
            let rhs = self.parse_binary(prec + 1);
            lhs = self.apply(op, lhs, rhs);
        }
    }

    fn peek_binop(&self) -> Option<(u8, &'static str)> {
        if self.token.kind != TokKind::Punct {
            return None;
        }
        Some(match self.token.text.as_str() {
            "||" => (0, "||"),
            "&&" => (1, "&&"),
            "|" => (2, "|"),
            "^" => (3, "^"),
            "&" => (4, "&"),
            "==" => (5, "=="),
            "!=" => (5, "!="),
            "<" => (6, "<"),
            ">" => (6, ">"),
            "<=" => (6, "<="),
            ">=" => (6, ">="),
            "<<" => (7, "<<"),
            ">>" => (7, ">>"),
            "+" => (8, "+"),
            "-" => (8, "-"),
            "*" => (9, "*"),
            "/" => (9, "/"),
            "%" => (9, "%"),
            _ => return None,
        })
    }

    fn apply(&mut self, op: &'static str, lhs: i32, rhs: i32) -> i32 {
        match op {
            "||" => (lhs != 0 || rhs != 0) as i32,
            "&&" => (lhs != 0 && rhs != 0) as i32,
            "|" => lhs | rhs,
            "^" => lhs ^ rhs,
            "&" => lhs & rhs,
            "==" => (lhs == rhs) as i32,
            "!=" => (lhs != rhs) as i32,
            "<" => (lhs < rhs) as i32,
            ">" => (lhs > rhs) as i32,
            "<=" => (lhs <= rhs) as i32,
            ">=" => (lhs >= rhs) as i32,
            "<<" => lhs.wrapping_shl(rhs as u32 & 31),
            ">>" => lhs.wrapping_shr(rhs as u32 & 31),
            "+" => lhs.wrapping_add(rhs),
            "-" => lhs.wrapping_sub(rhs),
            "*" => lhs.wrapping_mul(rhs),
            "/" => {
                if rhs == 0 {
                    self.error(DiagnosticKind::DivisionByZero);
                    0
                } else {
                    lhs.wrapping_div(rhs)
                }
            }
            "%" => {
                if rhs == 0 {
                    self.error(DiagnosticKind::DivisionByZero);
                    0
                } else {
                    lhs.wrapping_rem(rhs)
                }
            }
            _ => 0,
        }
    }
}
