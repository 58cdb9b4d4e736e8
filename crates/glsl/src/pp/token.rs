use std::fmt;

/// Source position: translation-unit file index (set by `#line`) and logical
/// line number after continuation splicing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub file: u16,
    pub line: u32,
}

impl Location {
    pub fn new(file: u16, line: u32) -> Location {
        Location { file, line }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokKind {
    Identifier,
    IntConst,
    FloatConst,
    Punct,
    Hash,
    Newline,
    Eof,
    Invalid,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokKind,
    pub text: String,
    pub location: Location,
    pub leading_space: bool,
    /// First token on its physical line; a `#` opens a directive only here.
    pub at_line_start: bool,
}

impl Token {
    pub fn eof() -> Token {
        Token {
            kind: TokKind::Eof,
            text: String::new(),
            location: Location::default(),
            leading_space: false,
            at_line_start: false,
        }
    }

    pub fn is(&self, kind: TokKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }

    pub fn is_punct(&self, text: &str) -> bool {
        self.is(TokKind::Punct, text)
    }

    pub fn is_eod(&self) -> bool {
        matches!(self.kind, TokKind::Newline | TokKind::Eof)
    }

    /// Signed 32-bit value of an integer literal (decimal, octal, or hex);
    /// `None` on overflow.
    pub fn int_value(&self) -> Option<i32> {
        let text = self.text.trim_end_matches(['u', 'U']);
        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16).ok()?
        } else if text.len() > 1 && text.starts_with('0') {
            u32::from_str_radix(&text[1..], 8).ok()?
        } else {
            text.parse::<u32>().ok()?
        };
        Some(parsed as i32)
    }

    /// Token equality for macro redefinition checks: kind, text, and the
    /// leading-space flag, ignoring locations.
    pub fn same_as(&self, other: &Token) -> bool {
        self.kind == other.kind
            && self.text == other.text
            && self.leading_space == other.leading_space
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.leading_space {
            f.write_str(" ")?;
        }
        f.write_str(&self.text)
    }
}

/// Anything that yields preprocessing tokens.
pub trait Lexer {
    fn lex(&mut self) -> Token;
}
