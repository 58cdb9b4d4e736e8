//! Preprocessing tokenizer: a logos lexer over the spliced source, wrapped
//! into the token stream the directive parser consumes. Newlines are
//! significant (they terminate directives) and every token carries its
//! logical line plus a leading-whitespace flag.

use super::input::SplicedSource;
use super::token::{Lexer, Location, TokKind, Token};
use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\x0b\x0c]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
enum RawTok {
    #[token("\n")]
    Newline,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,

    #[regex(r"(0[xX][0-9a-fA-F]+|[0-9]+)[uU]?")]
    IntConst,

    #[regex(r"([0-9]+\.[0-9]*|\.[0-9]+)([eE][+\-]?[0-9]+)?[fF]?")]
    #[regex(r"[0-9]+[eE][+\-]?[0-9]+[fF]?")]
    FloatConst,

    #[token("#")]
    Hash,

    #[token("<<=")]
    #[token(">>=")]
    #[token("<<")]
    #[token(">>")]
    #[token("<=")]
    #[token(">=")]
    #[token("==")]
    #[token("!=")]
    #[token("&&")]
    #[token("||")]
    #[token("^^")]
    #[token("+=")]
    #[token("-=")]
    #[token("*=")]
    #[token("/=")]
    #[token("%=")]
    #[token("&=")]
    #[token("|=")]
    #[token("^=")]
    #[token("++")]
    #[token("--")]
    #[token("(")]
    #[token(")")]
    #[token("[")]
    #[token("]")]
    #[token("{")]
    #[token("}")]
    #[token(".")]
    #[token(",")]
    #[token(":")]
    #[token(";")]
    #[token("!")]
    #[token("-")]
    #[token("~")]
    #[token("+")]
    #[token("*")]
    #[token("/")]
    #[token("%")]
    #[token("<")]
    #[token(">")]
    #[token("|")]
    #[token("^")]
    #[token("&")]
    #[token("?")]
    #[token("=")]
    Punct,
}

/// Pre-lexed token stream with `#line` renumbering applied on the way out.
pub struct Tokenizer {
    tokens: Vec<Token>,
    pos: usize,
    line_bias: i64,
    file_override: Option<u16>,
}

impl Tokenizer {
    pub fn new(source: &SplicedSource) -> Tokenizer {
        let mut tokens = Vec::new();
        let mut lexer = RawTok::lexer(&source.text);
        let mut prev_end = 0usize;
        let mut at_line_start = true;

        while let Some(result) = lexer.next() {
            let span = lexer.span();
            let text = lexer.slice();
            let kind = match result {
                Ok(RawTok::Newline) => TokKind::Newline,
                Ok(RawTok::Identifier) => TokKind::Identifier,
                Ok(RawTok::IntConst) => TokKind::IntConst,
                Ok(RawTok::FloatConst) => TokKind::FloatConst,
                Ok(RawTok::Hash) => TokKind::Hash,
                Ok(RawTok::Punct) => TokKind::Punct,
                Err(()) => TokKind::Invalid,
            };

            tokens.push(Token {
                kind,
                text: text.to_string(),
                location: Location::new(0, source.line_at(span.start)),
                leading_space: span.start > prev_end,
                at_line_start,
            });

            at_line_start = kind == TokKind::Newline;
            prev_end = span.end;
        }

        Tokenizer {
            tokens,
            pos: 0,
            line_bias: 0,
            file_override: None,
        }
    }

    /// Renumber subsequent lines so the next source line reports `line`.
    /// `current` is the (already renumbered) line of the directive.
    pub fn set_line(&mut self, line: u32, current: u32) {
        self.line_bias += line as i64 - (current as i64 + 1);
    }

    pub fn set_file(&mut self, file: u16) {
        self.file_override = Some(file);
    }
}

impl Lexer for Tokenizer {
    fn lex(&mut self) -> Token {
        let Some(tok) = self.tokens.get(self.pos) else {
            return Token::eof();
        };
        self.pos += 1;

        let mut tok = tok.clone();
        tok.location.line = (tok.location.line as i64 + self.line_bias).max(0) as u32;
        if let Some(file) = self.file_override {
            tok.location.file = file;
        }
        tok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pp::input::splice;

    fn lex_all(src: &str) -> Vec<Token> {
        let spliced = splice(&[src]);
        let mut t = Tokenizer::new(&spliced);
        let mut out = Vec::new();
        loop {
            let tok = t.lex();
            if tok.kind == TokKind::Eof {
                break;
            }
            out.push(tok);
        }
        out
    }

    #[test]
    fn comments_are_whitespace() {
        let toks = lex_all("a /* x\ny */ b // c\nd");
        let texts: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["a", "b", "\n", "d"]);
        // The block comment swallowed a newline, so b is on line 2.
        assert_eq!(toks[1].location.line, 2);
        assert_eq!(toks[3].location.line, 3);
    }

    #[test]
    fn leading_space_tracks_gaps() {
        let toks = lex_all("A(x) B (y)");
        assert!(!toks[1].leading_space); // ( after A
        assert!(toks[5].leading_space); // ( after B
    }

    #[test]
    fn line_start_flags() {
        let toks = lex_all("a b\n# define");
        assert!(toks[0].at_line_start);
        assert!(!toks[1].at_line_start);
        assert!(toks[3].at_line_start); // the #
        assert!(!toks[4].at_line_start);
    }

    #[test]
    fn numbers_lex_as_one_token() {
        let toks = lex_all("1.5e-3 0x1F 010 2u .5f");
        let kinds: Vec<TokKind> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            [
                TokKind::FloatConst,
                TokKind::IntConst,
                TokKind::IntConst,
                TokKind::IntConst,
                TokKind::FloatConst,
            ]
        );
    }
}
