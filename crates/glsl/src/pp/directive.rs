//! Directive parsing layered over the tokenizer.
//!
//! Recognizes `#define`, `#undef`, the conditional family, `#error`,
//! `#pragma`, `#extension`, `#version`, and `#line`. Non-directive tokens
//! pass through (unless a conditional group is being skipped); diagnostics
//! go to the sink and never abort the stream.

use super::expand::MacroExpander;
use super::expr::{ErrorSettings, ExpressionParser};
use super::lexer::Tokenizer;
use super::macros::{self, Macro, MacroKind, MacroSet};
use super::token::{Lexer, Location, TokKind, Token};
use crate::diag::{DiagnosticKind, Diagnostics};
use std::cell::RefCell;
use std::rc::Rc;

/// Callbacks for directives that concern the compiler driver. Handlers may
/// add their own diagnostics through the sink they are handed.
pub trait DirectiveHandler {
    fn handle_error(&mut self, location: Location, message: &str, diags: &mut Diagnostics);
    fn handle_pragma(
        &mut self,
        location: Location,
        name: &str,
        value: &str,
        stdgl: bool,
        diags: &mut Diagnostics,
    );
    fn handle_extension(
        &mut self,
        location: Location,
        name: &str,
        behavior: &str,
        diags: &mut Diagnostics,
    );
    fn handle_version(&mut self, location: Location, version: u32, diags: &mut Diagnostics);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Directive {
    None,
    Define,
    Undef,
    If,
    Ifdef,
    Ifndef,
    Else,
    Elif,
    Endif,
    Error,
    Pragma,
    Extension,
    Version,
    Line,
}

fn directive_of(token: &Token) -> Directive {
    if token.kind != TokKind::Identifier {
        return Directive::None;
    }
    match token.text.as_str() {
        "define" => Directive::Define,
        "undef" => Directive::Undef,
        "if" => Directive::If,
        "ifdef" => Directive::Ifdef,
        "ifndef" => Directive::Ifndef,
        "else" => Directive::Else,
        "elif" => Directive::Elif,
        "endif" => Directive::Endif,
        "error" => Directive::Error,
        "pragma" => Directive::Pragma,
        "extension" => Directive::Extension,
        "version" => Directive::Version,
        "line" => Directive::Line,
        _ => Directive::None,
    }
}

fn is_conditional(d: Directive) -> bool {
    matches!(
        d,
        Directive::If
            | Directive::Ifdef
            | Directive::Ifndef
            | Directive::Else
            | Directive::Elif
            | Directive::Endif
    )
}

struct ConditionalBlock {
    kind: String,
    location: Location,
    /// The whole block lives inside a skipped outer group.
    skip_block: bool,
    /// The current group's condition did not hold.
    skip_group: bool,
    found_else: bool,
    found_valid_group: bool,
}

pub struct DirectiveParser<'a> {
    tokenizer: Tokenizer,
    macros: &'a RefCell<MacroSet>,
    diags: &'a RefCell<Diagnostics>,
    handler: &'a mut dyn DirectiveHandler,
    conditionals: Vec<ConditionalBlock>,
    past_first_statement: bool,
    seen_non_pp_token: bool,
    shader_version: u32,
}

impl<'a> DirectiveParser<'a> {
    pub fn new(
        tokenizer: Tokenizer,
        macros: &'a RefCell<MacroSet>,
        diags: &'a RefCell<Diagnostics>,
        handler: &'a mut dyn DirectiveHandler,
    ) -> DirectiveParser<'a> {
        DirectiveParser {
            tokenizer,
            macros,
            diags,
            handler,
            conditionals: Vec::new(),
            past_first_statement: false,
            seen_non_pp_token: false,
            shader_version: 100,
        }
    }

    fn report(&self, kind: DiagnosticKind, location: Location, text: &str) {
        self.diags.borrow_mut().report(kind, location, text);
    }

    fn skipping(&self) -> bool {
        self.conditionals
            .last()
            .map(|b| b.skip_block || b.skip_group)
            .unwrap_or(false)
    }

    fn skip_to_eod(&mut self, token: &mut Token) {
        while !token.is_eod() {
            *token = self.tokenizer.lex();
        }
    }

    fn parse_directive(&mut self, token: &mut Token) {
        *token = self.tokenizer.lex();
        if token.is_eod() {
            return; // empty directive
        }

        let directive = directive_of(token);

        if self.skipping() && !is_conditional(directive) {
            self.skip_to_eod(token);
            return;
        }

        match directive {
            Directive::None => {
                self.report(
                    DiagnosticKind::InvalidDirectiveName,
                    token.location,
                    &token.text.clone(),
                );
                self.skip_to_eod(token);
            }
            Directive::Define => self.parse_define(token),
            Directive::Undef => self.parse_undef(token),
            Directive::If | Directive::Ifdef | Directive::Ifndef => {
                self.parse_conditional_if(token, directive)
            }
            Directive::Else => self.parse_else(token),
            Directive::Elif => self.parse_elif(token),
            Directive::Endif => self.parse_endif(token),
            Directive::Error => self.parse_error(token),
            Directive::Pragma => self.parse_pragma(token),
            Directive::Extension => self.parse_extension(token),
            Directive::Version => self.parse_version(token),
            Directive::Line => self.parse_line(token),
        }

        self.skip_to_eod(token);
        if token.kind == TokKind::Eof {
            self.report(DiagnosticKind::EofInDirective, token.location, &token.text.clone());
        }
    }

    fn parse_define(&mut self, token: &mut Token) {
        *token = self.tokenizer.lex();
        if token.kind != TokKind::Identifier {
            self.report(DiagnosticKind::UnexpectedToken, token.location, &token.text.clone());
            return;
        }
        if self
            .macros
            .borrow()
            .get(&token.text)
            .map_or(false, |m| m.predefined)
        {
            self.report(
                DiagnosticKind::MacroPredefinedRedefined,
                token.location,
                &token.text.clone(),
            );
            return;
        }
        if token.text.starts_with("GL_") {
            self.report(
                DiagnosticKind::MacroNameReserved,
                token.location,
                &token.text.clone(),
            );
            return;
        }
        if token.text.contains("__") {
            // Double underscores may collide with future predefined names,
            // hence only a warning.
            self.report(
                DiagnosticKind::MacroNameWithDoubleUnderscore,
                token.location,
                &token.text.clone(),
            );
        }

        let name = token.text.clone();
        let name_location = token.location;
        let mut kind = MacroKind::Object;
        let mut parameters = Vec::new();

        *token = self.tokenizer.lex();
        if token.is_punct("(") && !token.leading_space {
            kind = MacroKind::Function;
            loop {
                *token = self.tokenizer.lex();
                if token.kind != TokKind::Identifier {
                    break;
                }
                if parameters.contains(&token.text) {
                    self.report(
                        DiagnosticKind::MacroDuplicateParameterNames,
                        token.location,
                        &token.text.clone(),
                    );
                    return;
                }
                parameters.push(token.text.clone());

                *token = self.tokenizer.lex();
                if !token.is_punct(",") {
                    break;
                }
            }

            if !token.is_punct(")") {
                self.report(DiagnosticKind::UnexpectedToken, token.location, &token.text.clone());
                return;
            }
            *token = self.tokenizer.lex();
        }

        let mut replacement = Vec::new();
        while !token.is_eod() {
            // Locations are irrelevant in a replacement list and clearing
            // them lets token comparison double as macro comparison.
            let mut t = token.clone();
            t.location = Location::default();
            replacement.push(t);
            *token = self.tokenizer.lex();
        }
        if let Some(first) = replacement.first_mut() {
            first.leading_space = false;
        }

        let macro_ = Macro {
            name: name.clone(),
            kind,
            parameters,
            replacement,
            predefined: false,
            expansion_count: std::cell::Cell::new(0),
        };

        if let Some(existing) = self.macros.borrow().get(&name) {
            if !macro_.equals(existing) {
                self.report(DiagnosticKind::MacroRedefined, name_location, &name);
                return;
            }
        }
        self.macros.borrow_mut().insert(name, Rc::new(macro_));
    }

    fn parse_undef(&mut self, token: &mut Token) {
        *token = self.tokenizer.lex();
        if token.kind != TokKind::Identifier {
            self.report(DiagnosticKind::UnexpectedToken, token.location, &token.text.clone());
            return;
        }

        let existing = self.macros.borrow().get(&token.text).cloned();
        if let Some(macro_) = existing {
            if macro_.predefined {
                self.report(
                    DiagnosticKind::MacroPredefinedUndefined,
                    token.location,
                    &token.text.clone(),
                );
                return;
            }
            if macro_.expansion_count.get() > 0 {
                self.report(
                    DiagnosticKind::MacroUndefinedWhileInvoked,
                    token.location,
                    &token.text.clone(),
                );
                return;
            }
            self.macros.borrow_mut().remove(&token.text);
        }

        *token = self.tokenizer.lex();
        if !token.is_eod() {
            self.report(DiagnosticKind::UnexpectedToken, token.location, &token.text.clone());
            self.skip_to_eod(token);
        }
    }

    fn parse_conditional_if(&mut self, token: &mut Token, directive: Directive) {
        let mut block = ConditionalBlock {
            kind: token.text.clone(),
            location: token.location,
            skip_block: false,
            skip_group: false,
            found_else: false,
            found_valid_group: false,
        };

        if self.skipping() {
            // Nested inside a skipped group: the whole block is skipped and
            // its expression is not evaluated.
            self.skip_to_eod(token);
            block.skip_block = true;
        } else {
            let value = match directive {
                Directive::If => self.parse_if_expression(token),
                Directive::Ifdef => self.parse_defined_operand(token),
                Directive::Ifndef => (self.parse_defined_operand(token) == 0) as i32,
                _ => unreachable!(),
            };
            block.skip_group = value == 0;
            block.found_valid_group = value != 0;
        }

        self.conditionals.push(block);
    }

    fn parse_else(&mut self, token: &mut Token) {
        if self.conditionals.is_empty() {
            self.report(
                DiagnosticKind::ConditionalElseWithoutIf,
                token.location,
                &token.text.clone(),
            );
            self.skip_to_eod(token);
            return;
        }

        let (skip_block, found_else) = {
            let block = self.conditionals.last().unwrap();
            (block.skip_block, block.found_else)
        };

        if skip_block {
            self.skip_to_eod(token);
            return;
        }
        if found_else {
            self.report(
                DiagnosticKind::ConditionalElseAfterElse,
                token.location,
                &token.text.clone(),
            );
            self.skip_to_eod(token);
            return;
        }

        let block = self.conditionals.last_mut().unwrap();
        block.found_else = true;
        block.skip_group = block.found_valid_group;
        block.found_valid_group = true;

        *token = self.tokenizer.lex();
        if !token.is_eod() {
            self.report(
                DiagnosticKind::ConditionalUnexpectedToken,
                token.location,
                &token.text.clone(),
            );
            self.skip_to_eod(token);
        }
    }

    fn parse_elif(&mut self, token: &mut Token) {
        if self.conditionals.is_empty() {
            self.report(
                DiagnosticKind::ConditionalElifWithoutIf,
                token.location,
                &token.text.clone(),
            );
            self.skip_to_eod(token);
            return;
        }

        let (skip_block, found_else, found_valid_group) = {
            let block = self.conditionals.last().unwrap();
            (block.skip_block, block.found_else, block.found_valid_group)
        };

        if skip_block {
            self.skip_to_eod(token);
            return;
        }
        if found_else {
            self.report(
                DiagnosticKind::ConditionalElifAfterElse,
                token.location,
                &token.text.clone(),
            );
            self.skip_to_eod(token);
            return;
        }
        if found_valid_group {
            // A previous group was taken; skip without evaluating.
            self.conditionals.last_mut().unwrap().skip_group = true;
            self.skip_to_eod(token);
            return;
        }

        let value = self.parse_if_expression(token);
        let block = self.conditionals.last_mut().unwrap();
        block.skip_group = value == 0;
        block.found_valid_group = value != 0;
    }

    fn parse_endif(&mut self, token: &mut Token) {
        if self.conditionals.pop().is_none() {
            self.report(
                DiagnosticKind::ConditionalEndifWithoutIf,
                token.location,
                &token.text.clone(),
            );
            self.skip_to_eod(token);
            return;
        }

        *token = self.tokenizer.lex();
        if !token.is_eod() {
            self.report(
                DiagnosticKind::ConditionalUnexpectedToken,
                token.location,
                &token.text.clone(),
            );
            self.skip_to_eod(token);
        }
    }

    fn parse_if_expression(&mut self, token: &mut Token) -> i32 {
        let eval = {
            let mut expander =
                MacroExpander::new(&mut self.tokenizer, self.macros, self.diags, true);
            let first = expander.lex();
            if first.is_eod() {
                *token = first;
                let loc = token.location;
                let text = token.text.clone();
                self.report(DiagnosticKind::InvalidExpression, loc, &text);
                return 0;
            }

            let parser = ExpressionParser::new(&mut expander, ErrorSettings::default());
            parser.parse(Some(first))
        };

        for (kind, location, text) in eval.pending {
            self.report(kind, location, &text);
        }
        *token = eval.trailing;

        if !token.is_eod() {
            self.report(
                DiagnosticKind::ConditionalUnexpectedToken,
                token.location,
                &token.text.clone(),
            );
            self.skip_to_eod(token);
        }

        eval.value
    }

    fn parse_defined_operand(&mut self, token: &mut Token) -> i32 {
        *token = self.tokenizer.lex();
        if token.kind != TokKind::Identifier {
            self.report(DiagnosticKind::UnexpectedToken, token.location, &token.text.clone());
            self.skip_to_eod(token);
            return 0;
        }
        let value = self.macros.borrow().contains_key(&token.text) as i32;

        *token = self.tokenizer.lex();
        if !token.is_eod() {
            self.report(
                DiagnosticKind::ConditionalUnexpectedToken,
                token.location,
                &token.text.clone(),
            );
            self.skip_to_eod(token);
        }
        value
    }

    fn parse_error(&mut self, token: &mut Token) {
        let location = token.location;
        let mut message = String::new();
        *token = self.tokenizer.lex();
        while !token.is_eod() {
            message.push_str(&token.to_string());
            *token = self.tokenizer.lex();
        }
        self.handler
            .handle_error(location, message.trim(), &mut self.diags.borrow_mut());
    }

    fn parse_pragma(&mut self, token: &mut Token) {
        *token = self.tokenizer.lex();
        let stdgl = token.text == "STDGL";
        if stdgl {
            *token = self.tokenizer.lex();
        }

        let mut name = String::new();
        let mut value = String::new();
        let mut state = 0usize;
        let mut valid = true;
        let location = token.location;

        while !token.is_eod() {
            match state {
                0 => {
                    name = token.text.clone();
                    valid = valid && token.kind == TokKind::Identifier;
                }
                1 => valid = valid && token.is_punct("("),
                2 => {
                    value = token.text.clone();
                    valid = valid && token.kind == TokKind::Identifier;
                }
                3 => valid = valid && token.is_punct(")"),
                _ => valid = false,
            }
            state += 1;
            *token = self.tokenizer.lex();
        }

        // Empty pragma, name only, or name(value).
        valid = valid && (state == 0 || state == 1 || state == 4);
        if !valid {
            self.report(DiagnosticKind::UnrecognizedPragma, location, &name);
        } else if state > 0 {
            self.handler
                .handle_pragma(location, &name, &value, stdgl, &mut self.diags.borrow_mut());
        }
    }

    fn parse_extension(&mut self, token: &mut Token) {
        let mut name = String::new();
        let mut behavior = String::new();
        let mut state = 0usize;
        let mut valid = true;
        let location = token.location;

        *token = self.tokenizer.lex();
        while !token.is_eod() {
            match state {
                0 => {
                    if token.kind != TokKind::Identifier {
                        self.report(
                            DiagnosticKind::InvalidExtensionName,
                            token.location,
                            &token.text.clone(),
                        );
                        valid = false;
                    } else {
                        name = token.text.clone();
                    }
                }
                1 => {
                    if valid && !token.is_punct(":") {
                        self.report(
                            DiagnosticKind::UnexpectedToken,
                            token.location,
                            &token.text.clone(),
                        );
                        valid = false;
                    }
                }
                2 => {
                    if valid && token.kind != TokKind::Identifier {
                        self.report(
                            DiagnosticKind::InvalidExtensionBehavior,
                            token.location,
                            &token.text.clone(),
                        );
                        valid = false;
                    } else if valid {
                        behavior = token.text.clone();
                    }
                }
                _ => {
                    if valid {
                        self.report(
                            DiagnosticKind::UnexpectedToken,
                            token.location,
                            &token.text.clone(),
                        );
                        valid = false;
                    }
                }
            }
            state += 1;
            *token = self.tokenizer.lex();
        }

        if valid && state != 3 {
            self.report(DiagnosticKind::InvalidExtensionDirective, location, &name);
            valid = false;
        }
        if valid && self.seen_non_pp_token {
            if self.shader_version >= 300 {
                self.report(DiagnosticKind::NonPpTokenBeforeExtension, location, &name);
                valid = false;
            } else {
                self.report(
                    DiagnosticKind::NonPpTokenBeforeExtensionLegacy,
                    location,
                    &name,
                );
            }
        }
        if valid {
            self.handler
                .handle_extension(location, &name, &behavior, &mut self.diags.borrow_mut());
        }
    }

    fn parse_version(&mut self, token: &mut Token) {
        if self.past_first_statement {
            self.report(
                DiagnosticKind::VersionNotFirstStatement,
                token.location,
                &token.text.clone(),
            );
            self.skip_to_eod(token);
            return;
        }

        let mut valid = true;
        let mut version = 0u32;
        // 0: number, 1: profile, 2: end of line
        let mut state = 0usize;

        *token = self.tokenizer.lex();
        while valid && !token.is_eod() {
            match state {
                0 => {
                    if token.kind != TokKind::IntConst {
                        self.report(
                            DiagnosticKind::InvalidVersionNumber,
                            token.location,
                            &token.text.clone(),
                        );
                        valid = false;
                    } else {
                        match token.int_value() {
                            Some(v) if v >= 0 => version = v as u32,
                            _ => {
                                self.report(
                                    DiagnosticKind::IntegerOverflow,
                                    token.location,
                                    &token.text.clone(),
                                );
                                valid = false;
                            }
                        }
                        if valid {
                            state = if version < 300 { 2 } else { 1 };
                        }
                    }
                }
                1 => {
                    if !token.is(TokKind::Identifier, "es") {
                        self.report(
                            DiagnosticKind::InvalidVersionDirective,
                            token.location,
                            &token.text.clone(),
                        );
                        valid = false;
                    }
                    state = 2;
                }
                _ => {
                    self.report(DiagnosticKind::UnexpectedToken, token.location, &token.text.clone());
                    valid = false;
                }
            }
            if valid {
                *token = self.tokenizer.lex();
            }
        }

        if valid && state != 2 {
            self.report(
                DiagnosticKind::InvalidVersionDirective,
                token.location,
                &token.text.clone(),
            );
            valid = false;
        }
        if valid && version >= 300 && token.location.line > 1 {
            self.report(
                DiagnosticKind::VersionNotFirstLine,
                token.location,
                &token.text.clone(),
            );
            valid = false;
        }

        if valid {
            self.handler
                .handle_version(token.location, version, &mut self.diags.borrow_mut());
            self.shader_version = version;
            macros::redefine_version(&mut self.macros.borrow_mut(), version);
        }
    }

    fn parse_line(&mut self, token: &mut Token) {
        struct LineArgs {
            line: i32,
            file: Option<i32>,
            valid: bool,
            trailing: Token,
            directive_line: u32,
        }

        let mut pending = Vec::new();
        let parsed: Option<LineArgs> = {
            let mut expander =
                MacroExpander::new(&mut self.tokenizer, self.macros, self.diags, false);
            let first = expander.lex();
            if first.is_eod() {
                pending.push((
                    DiagnosticKind::InvalidLineDirective,
                    first.location,
                    first.text.clone(),
                ));
                *token = first;
                None
            } else {
                let directive_line = first.location.line;

                let mut settings = ErrorSettings::default();
                settings.integer_literals_must_fit = true;
                settings.unexpected_identifier = DiagnosticKind::InvalidLineNumber;
                let eval = ExpressionParser::new(&mut expander, settings).parse(Some(first));
                pending.extend(eval.pending.iter().cloned());

                let mut valid = eval.valid;
                let mut trailing = eval.trailing.clone();
                let mut file = None;
                if valid && !trailing.is_eod() {
                    let mut settings = ErrorSettings::default();
                    settings.integer_literals_must_fit = true;
                    settings.unexpected_identifier = DiagnosticKind::InvalidFileNumber;
                    let feval = ExpressionParser::new(&mut expander, settings).parse(Some(trailing));
                    pending.extend(feval.pending);
                    valid = valid && feval.valid;
                    trailing = feval.trailing;
                    file = Some(feval.value);
                }

                Some(LineArgs {
                    line: eval.value,
                    file,
                    valid,
                    trailing,
                    directive_line,
                })
            }
        };

        for (kind, location, text) in pending {
            self.report(kind, location, &text);
        }

        let Some(mut args) = parsed else {
            return;
        };

        *token = args.trailing.clone();
        if !token.is_eod() {
            if args.valid {
                self.report(DiagnosticKind::UnexpectedToken, token.location, &token.text.clone());
                args.valid = false;
            }
            self.skip_to_eod(token);
        }

        if args.valid {
            self.tokenizer
                .set_line(args.line.max(0) as u32, args.directive_line);
            if let Some(file) = args.file {
                self.tokenizer.set_file(file.max(0) as u16);
            }
        }
    }
}

impl Lexer for DirectiveParser<'_> {
    fn lex(&mut self) -> Token {
        let mut token;
        loop {
            token = self.tokenizer.lex();

            if token.kind == TokKind::Hash && token.at_line_start {
                self.parse_directive(&mut token);
                self.past_first_statement = true;
            } else if !token.is_eod() {
                self.seen_non_pp_token = true;
            }

            if token.kind == TokKind::Eof {
                if let Some(block) = self.conditionals.last() {
                    let loc = block.location;
                    let kind = block.kind.clone();
                    self.report(DiagnosticKind::ConditionalUnterminated, loc, &kind);
                }
                break;
            }

            if !(self.skipping() || token.kind == TokKind::Newline) {
                break;
            }
        }

        if token.kind != TokKind::Newline {
            self.past_first_statement = true;
        }
        token
    }
}
