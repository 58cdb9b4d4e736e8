//! GLSL ES preprocessor.
//!
//! The pipeline is splice → tokenize → directive parse → macro expand; the
//! output token stream (newlines dropped) feeds the parser.

mod directive;
mod expand;
mod expr;
mod input;
mod lexer;
mod macros;
mod token;

pub use directive::DirectiveHandler;
pub use macros::{predefine, Macro, MacroKind, MacroSet};
pub use token::{Lexer, Location, TokKind, Token};

use crate::diag::{DiagnosticKind, Diagnostics};
use directive::DirectiveParser;
use expand::MacroExpander;
use lexer::Tokenizer;

/// Run the full preprocessor over concatenated sources. Newline markers are
/// consumed here; the returned tokens are what the parser sees.
pub fn preprocess(
    sources: &[&str],
    diags: &mut Diagnostics,
    handler: &mut dyn DirectiveHandler,
) -> Vec<Token> {
    let spliced = input::splice(sources);
    if spliced.truncated {
        diags.report(
            DiagnosticKind::TokenTooLong,
            Location::new(0, u32::MAX),
            "line counter overflow",
        );
    }

    let tokenizer = Tokenizer::new(&spliced);
    let macros = std::cell::RefCell::new(MacroSet::default());
    predefine(&mut macros.borrow_mut(), 100);

    // The directive parser and the expander share the table and the sink.
    let diag_cell = std::cell::RefCell::new(std::mem::take(diags));

    let mut out = Vec::new();
    {
        let mut directives = DirectiveParser::new(tokenizer, &macros, &diag_cell, handler);
        let mut expander = MacroExpander::new(&mut directives, &macros, &diag_cell, false);
        loop {
            let tok = expander.lex();
            match tok.kind {
                TokKind::Eof => break,
                TokKind::Newline => continue,
                _ => out.push(tok),
            }
        }
    }

    *diags = diag_cell.into_inner();
    out
}

/// A directive handler that records what it sees; the compiler driver uses a
/// richer one, tests and tools use this.
#[derive(Default, Debug)]
pub struct CollectingHandler {
    pub version: Option<u32>,
    pub pragmas: Vec<(String, String, bool)>,
    pub extensions: Vec<(String, String)>,
    pub errors: Vec<String>,
}

impl DirectiveHandler for CollectingHandler {
    fn handle_error(&mut self, _location: Location, message: &str, _diags: &mut Diagnostics) {
        self.errors.push(message.to_string());
    }

    fn handle_pragma(
        &mut self,
        _location: Location,
        name: &str,
        value: &str,
        stdgl: bool,
        _diags: &mut Diagnostics,
    ) {
        self.pragmas
            .push((name.to_string(), value.to_string(), stdgl));
    }

    fn handle_extension(
        &mut self,
        _location: Location,
        name: &str,
        behavior: &str,
        _diags: &mut Diagnostics,
    ) {
        self.extensions
            .push((name.to_string(), behavior.to_string()));
    }

    fn handle_version(&mut self, _location: Location, version: u32, _diags: &mut Diagnostics) {
        self.version = Some(version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pp(src: &str) -> (Vec<Token>, Diagnostics, CollectingHandler) {
        let mut diags = Diagnostics::new();
        let mut handler = CollectingHandler::default();
        let tokens = preprocess(&[src], &mut diags, &mut handler);
        (tokens, diags, handler)
    }

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn object_macros_expand() {
        let (tokens, diags, _) = pp("#define N 4\nfloat x[N];");
        assert!(!diags.has_errors());
        assert_eq!(texts(&tokens), ["float", "x", "[", "4", "]", ";"]);
    }

    #[test]
    fn function_macros_expand_arguments() {
        let (tokens, diags, _) = pp("#define MUL(a, b) ((a) * (b))\nMUL(x, MUL(2, y))");
        assert!(!diags.has_errors());
        assert_eq!(
            texts(&tokens),
            ["(", "(", "x", ")", "*", "(", "(", "(", "2", ")", "*", "(", "y", ")", ")", ")"]
        );
    }

    #[test]
    fn function_macro_without_parens_is_plain() {
        let (tokens, diags, _) = pp("#define F(x) x\nint F = 3;");
        assert!(!diags.has_errors());
        assert_eq!(texts(&tokens), ["int", "F", "=", "3", ";"]);
    }

    #[test]
    fn duplicate_parameter_is_rejected_and_unregistered() {
        let (tokens, diags, _) = pp("#define A(x,x) x\nA(1,2)");
        assert!(diags.contains(DiagnosticKind::MacroDuplicateParameterNames));
        // The macro was not registered, so the invocation stays verbatim.
        assert_eq!(texts(&tokens), ["A", "(", "1", ",", "2", ")"]);
    }

    #[test]
    fn equivalent_redefinition_is_silent() {
        let (_, diags, _) = pp("#define PI 3.14\n#define PI 3.14\n");
        assert!(!diags.has_errors());

        let (_, diags, _) = pp("#define PI 3.14\n#define PI 3.15\n");
        assert!(diags.contains(DiagnosticKind::MacroRedefined));
    }

    #[test]
    fn predefined_macros_are_protected() {
        let (_, diags, _) = pp("#define __LINE__ 7\n");
        assert!(diags.contains(DiagnosticKind::MacroPredefinedRedefined));

        let (_, diags, _) = pp("#undef GL_ES\n");
        assert!(diags.contains(DiagnosticKind::MacroPredefinedUndefined));
    }

    #[test]
    fn gl_names_are_reserved() {
        let (_, diags, _) = pp("#define GL_FOO 1\n");
        assert!(diags.contains(DiagnosticKind::MacroNameReserved));
    }

    #[test]
    fn double_underscore_warns_but_defines() {
        let (tokens, diags, _) = pp("#define a__b 2\na__b");
        assert!(diags.contains(DiagnosticKind::MacroNameWithDoubleUnderscore));
        assert!(!diags.has_errors());
        assert_eq!(texts(&tokens), ["2"]);
    }

    #[test]
    fn conditionals_select_groups() {
        let (tokens, diags, _) = pp("#define A 1\n#if A\nx\n#elif A\ny\n#else\nz\n#endif\n");
        assert!(!diags.has_errors());
        assert_eq!(texts(&tokens), ["x"]);

        let (tokens, _, _) = pp("#if 0\nx\n#elif 1\ny\n#else\nz\n#endif\n");
        assert_eq!(texts(&tokens), ["y"]);

        let (tokens, _, _) = pp("#if 0\nx\n#elif 0\ny\n#else\nz\n#endif\n");
        assert_eq!(texts(&tokens), ["z"]);
    }

    #[test]
    fn elif_after_taken_group_is_not_evaluated() {
        // The second #elif divides by zero; it must not be evaluated since
        // an earlier group was taken.
        let (tokens, diags, _) = pp("#if 1\nx\n#elif 1/0\ny\n#endif\n");
        assert!(!diags.has_errors());
        assert_eq!(texts(&tokens), ["x"]);
    }

    #[test]
    fn defined_is_recognized_before_expansion() {
        let (tokens, diags, _) = pp(
            "#define EMPTY\n#if defined(EMPTY) && defined EMPTY\nyes\n#else\nno\n#endif\n",
        );
        assert!(!diags.has_errors());
        assert_eq!(texts(&tokens), ["yes"]);
    }

    #[test]
    fn undef_removes_macros() {
        let (tokens, diags, _) = pp("#define X 1\n#undef X\n#ifdef X\na\n#else\nb\n#endif\n");
        assert!(!diags.has_errors());
        assert_eq!(texts(&tokens), ["b"]);
    }

    #[test]
    fn version_300_requires_es_on_first_line() {
        let (_, diags, handler) = pp("#version 300 es\nvoid");
        assert!(!diags.has_errors());
        assert_eq!(handler.version, Some(300));

        let (_, diags, _) = pp("#version 300\nvoid");
        assert!(diags.contains(DiagnosticKind::InvalidVersionDirective));

        let (_, diags, _) = pp("\n#version 300 es\nvoid");
        assert!(diags.contains(DiagnosticKind::VersionNotFirstLine));

        let (_, diags, _) = pp("int x;\n#version 100\n");
        assert!(diags.contains(DiagnosticKind::VersionNotFirstStatement));
    }

    #[test]
    fn line_directive_renumbers() {
        let (tokens, diags, _) = pp("#line 10\nx\ny");
        assert!(!diags.has_errors());
        assert_eq!(tokens[0].location.line, 10);
        assert_eq!(tokens[1].location.line, 11);

        let (tokens, _, _) = pp("#line 5 3\nx");
        assert_eq!(tokens[0].location.line, 5);
        assert_eq!(tokens[0].location.file, 3);
    }

    #[test]
    fn error_directive_reaches_handler() {
        let (_, _, handler) = pp("#error bad things\n");
        assert_eq!(handler.errors, ["bad things"]);
    }

    #[test]
    fn pragma_forms() {
        let (_, diags, handler) = pp("#pragma optimize(on)\n#pragma STDGL invariant(all)\n#pragma debug\n");
        assert!(!diags.has_errors());
        assert_eq!(
            handler.pragmas,
            [
                ("optimize".to_string(), "on".to_string(), false),
                ("invariant".to_string(), "all".to_string(), true),
                ("debug".to_string(), String::new(), false),
            ]
        );
    }

    #[test]
    fn extension_directive() {
        let (_, diags, handler) = pp("#extension GL_OES_standard_derivatives : enable\n");
        assert!(!diags.has_errors());
        assert_eq!(
            handler.extensions,
            [("GL_OES_standard_derivatives".to_string(), "enable".to_string())]
        );
    }

    #[test]
    fn line_macro_expands_to_invocation_line() {
        let (tokens, diags, _) = pp("a\n__LINE__\n");
        assert!(!diags.has_errors());
        assert_eq!(texts(&tokens), ["a", "2"]);
    }

    #[test]
    fn macro_recursion_stops() {
        let (tokens, diags, _) = pp("#define SELF SELF\nSELF");
        assert!(!diags.has_errors());
        assert_eq!(texts(&tokens), ["SELF"]);

        let (tokens, _, _) = pp("#define A B\n#define B A\nA");
        assert_eq!(texts(&tokens), ["A"]);
    }

    #[test]
    fn preprocessing_is_idempotent_modulo_locations() {
        let src = "#define SCALE(v) ((v) * 2.0)\n#if 1\nfloat f = SCALE(3.0);\n#endif\n";
        let (first, diags, _) = pp(src);
        assert!(!diags.has_errors());

        // Print the output and run it through again.
        let mut printed = String::new();
        for t in &first {
            printed.push_str(&t.to_string());
            printed.push(' ');
        }
        let (second, diags2, _) = pp(&printed);
        assert!(!diags2.has_errors());

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.text, b.text);
        }
    }

    #[test]
    fn unterminated_conditional_is_reported() {
        let (_, diags, _) = pp("#if 1\nx\n");
        assert!(diags.contains(DiagnosticKind::ConditionalUnterminated));
    }

    #[test]
    fn version_310_is_parsed_but_unsupported_is_callers_call() {
        let (_, diags, handler) = pp("#version 310 es\n");
        // The preprocessor accepts any well-formed version; the compiler
        // driver decides which ones it supports.
        assert!(!diags.has_errors());
        assert_eq!(handler.version, Some(310));
    }
}
