use super::token::Token;
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacroKind {
    Object,
    Function,
}

#[derive(Debug)]
pub struct Macro {
    pub name: String,
    pub kind: MacroKind,
    pub parameters: Vec<String>,
    pub replacement: Vec<Token>,
    pub predefined: bool,
    /// Number of in-flight expansions; a macro cannot be undefined while
    /// this is non-zero, and a name inside its own expansion is not
    /// re-expanded.
    pub expansion_count: Cell<u32>,
}

impl Macro {
    pub fn object(name: &str, replacement: Vec<Token>) -> Macro {
        Macro {
            name: name.to_string(),
            kind: MacroKind::Object,
            parameters: Vec::new(),
            replacement,
            predefined: false,
            expansion_count: Cell::new(0),
        }
    }

    pub fn equals(&self, other: &Macro) -> bool {
        self.kind == other.kind
            && self.parameters == other.parameters
            && self.replacement.len() == other.replacement.len()
            && self
                .replacement
                .iter()
                .zip(&other.replacement)
                .all(|(a, b)| a.same_as(b))
    }
}

pub type MacroSet = FxHashMap<String, Rc<Macro>>;

/// Install the predefined macros. `__LINE__` and `__FILE__` expand from the
/// invocation site; they are registered with empty bodies and special-cased
/// by the expander.
pub fn predefine(macros: &mut MacroSet, version: u32) {
    let mut add = |name: &str, replacement: Vec<Token>| {
        let mut m = Macro::object(name, replacement);
        m.predefined = true;
        macros.insert(name.to_string(), Rc::new(m));
    };

    add("__LINE__", Vec::new());
    add("__FILE__", Vec::new());
    add("GL_ES", vec![int_token(1)]);
    add("__VERSION__", vec![int_token(version as i32)]);
}

pub fn redefine_version(macros: &mut MacroSet, version: u32) {
    let mut m = Macro::object("__VERSION__", vec![int_token(version as i32)]);
    m.predefined = true;
    macros.insert("__VERSION__".to_string(), Rc::new(m));
}

pub fn int_token(value: i32) -> Token {
    Token {
        kind: super::token::TokKind::IntConst,
        text: value.to_string(),
        location: super::token::Location::default(),
        leading_space: false,
        at_line_start: false,
    }
}
