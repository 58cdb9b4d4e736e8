//! Diagnostics sink shared by the preprocessor and the compiler proper.
//! Errors never abort a phase; they accumulate here and the caller checks
//! `error_count` when the phase finishes.

use crate::pp::Location;
use std::fmt::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    // Preprocessor
    InternalError,
    OutOfMemory,
    InvalidCharacter,
    InvalidNumber,
    IntegerOverflow,
    FloatOverflow,
    TokenTooLong,
    InvalidExpression,
    DivisionByZero,
    EofInComment,
    UnexpectedToken,
    EofInDirective,
    ConditionalEndifWithoutIf,
    ConditionalElseWithoutIf,
    ConditionalElseAfterElse,
    ConditionalElifWithoutIf,
    ConditionalElifAfterElse,
    ConditionalUnexpectedToken,
    ConditionalUnterminated,
    InvalidDirectiveName,
    MacroNameReserved,
    MacroRedefined,
    MacroPredefinedRedefined,
    MacroPredefinedUndefined,
    MacroUnterminatedInvocation,
    MacroUndefinedWhileInvoked,
    MacroTooFewArgs,
    MacroTooManyArgs,
    MacroDuplicateParameterNames,
    MacroInvocationChainTooDeep,
    InvalidExtensionName,
    InvalidExtensionBehavior,
    InvalidExtensionDirective,
    InvalidVersionNumber,
    InvalidVersionDirective,
    VersionNotFirstStatement,
    VersionNotFirstLine,
    InvalidLineNumber,
    InvalidFileNumber,
    InvalidLineDirective,
    UnsupportedShaderVersion,
    UnrecognizedPragma,
    NonPpTokenBeforeExtension,

    // Warnings
    MacroNameWithDoubleUnderscore,
    UnknownExtension,
    NonPpTokenBeforeExtensionLegacy,

    // Parser and semantic analysis
    SyntaxError,
    UndeclaredIdentifier,
    Redefinition,
    TypeMismatch,
    InvalidOperands,
    NotConstantExpression,
    InvalidArraySize,
    IndexOutOfRange,
    NotLValue,
    SamplerOperandNotAllowed,
    InvalidSwizzle,
    NoMatchingFunction,
    RecursiveFunctionCall,
    MissingReturn,
    InvalidQualifier,
    ReservedIdentifier,
    UnsupportedInThisVersion,

    // Limitation validation
    UnsupportedLoopType,
    InvalidLoopHeader,
    LoopIndexModified,
    LoopIndexAsOutParameter,
    NonConstantIndex,
}

impl DiagnosticKind {
    pub fn severity(self) -> Severity {
        match self {
            DiagnosticKind::MacroNameWithDoubleUnderscore
            | DiagnosticKind::UnknownExtension
            | DiagnosticKind::NonPpTokenBeforeExtensionLegacy => Severity::Warning,
            _ => Severity::Error,
        }
    }

    fn message(self) -> &'static str {
        use DiagnosticKind::*;
        match self {
            InternalError => "internal error",
            OutOfMemory => "out of memory",
            InvalidCharacter => "invalid character",
            InvalidNumber => "invalid number",
            IntegerOverflow => "integer overflow",
            FloatOverflow => "float overflow",
            TokenTooLong => "token too long",
            InvalidExpression => "invalid expression",
            DivisionByZero => "division by zero",
            EofInComment => "unexpected end of file in comment",
            UnexpectedToken => "unexpected token",
            EofInDirective => "unexpected end of file in directive",
            ConditionalEndifWithoutIf => "unexpected #endif found without a matching #if",
            ConditionalElseWithoutIf => "unexpected #else found without a matching #if",
            ConditionalElseAfterElse => "unexpected #else found after another #else",
            ConditionalElifWithoutIf => "unexpected #elif found without a matching #if",
            ConditionalElifAfterElse => "unexpected #elif found after #else",
            ConditionalUnexpectedToken => "unexpected token after conditional expression",
            ConditionalUnterminated => "unexpected end of file found in conditional block",
            InvalidDirectiveName => "invalid directive name",
            MacroNameReserved => "macro name is reserved",
            MacroRedefined => "macro redefined",
            MacroPredefinedRedefined => "predefined macro redefined",
            MacroPredefinedUndefined => "predefined macro undefined",
            MacroUnterminatedInvocation => "unterminated macro invocation",
            MacroUndefinedWhileInvoked => "macro undefined while being invoked",
            MacroTooFewArgs => "not enough macro arguments",
            MacroTooManyArgs => "too many macro arguments",
            MacroDuplicateParameterNames => "duplicate macro parameter name",
            MacroInvocationChainTooDeep => "macro invocation chain too deep",
            InvalidExtensionName => "invalid extension name",
            InvalidExtensionBehavior => "invalid extension behavior",
            InvalidExtensionDirective => "invalid extension directive",
            InvalidVersionNumber => "invalid version number",
            InvalidVersionDirective => "invalid version directive",
            VersionNotFirstStatement => "#version directive must occur before anything else",
            VersionNotFirstLine => "#version directive must occur on the first line of the shader",
            InvalidLineNumber => "invalid line number",
            InvalidFileNumber => "invalid file number",
            InvalidLineDirective => "invalid line directive",
            UnsupportedShaderVersion => "unsupported shader version",
            UnrecognizedPragma => "unrecognized pragma",
            NonPpTokenBeforeExtension => "extension directive must occur before any non-preprocessor tokens",
            MacroNameWithDoubleUnderscore => "macro name with a double underscore is reserved",
            UnknownExtension => "extension is not supported",
            NonPpTokenBeforeExtensionLegacy => {
                "extension directive should occur before any non-preprocessor tokens"
            }
            SyntaxError => "syntax error",
            UndeclaredIdentifier => "undeclared identifier",
            Redefinition => "redefinition",
            TypeMismatch => "type mismatch",
            InvalidOperands => "wrong operand types",
            NotConstantExpression => "constant expression required",
            InvalidArraySize => "array size must be a positive constant",
            IndexOutOfRange => "index out of range",
            NotLValue => "l-value required",
            SamplerOperandNotAllowed => "samplers cannot be used in this context",
            InvalidSwizzle => "invalid swizzle selector",
            NoMatchingFunction => "no matching overloaded function found",
            RecursiveFunctionCall => "recursive function calls are not allowed",
            MissingReturn => "function does not return a value on all paths",
            InvalidQualifier => "qualifier not allowed here",
            ReservedIdentifier => "reserved identifier",
            UnsupportedInThisVersion => "not supported in this shader version",
            UnsupportedLoopType => "this type of loop is not allowed",
            InvalidLoopHeader => "loop header does not match the supported form",
            LoopIndexModified => "loop index cannot be modified in the loop body",
            LoopIndexAsOutParameter => "loop index cannot be used as an out or inout argument",
            NonConstantIndex => "array index must be a constant expression",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub location: Location,
    pub text: String,
}

#[derive(Default, Debug)]
pub struct Diagnostics {
    pub list: Vec<Diagnostic>,
    errors: usize,
    warnings: usize,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn report(&mut self, kind: DiagnosticKind, location: Location, text: impl Into<String>) {
        match kind.severity() {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
        }
        self.list.push(Diagnostic {
            kind,
            location,
            text: text.into(),
        });
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn contains(&self, kind: DiagnosticKind) -> bool {
        self.list.iter().any(|d| d.kind == kind)
    }

    /// The aggregated info log handed back through the shader object.
    pub fn log(&self) -> String {
        let mut out = String::new();
        for d in &self.list {
            let tag = match d.kind.severity() {
                Severity::Error => "ERROR",
                Severity::Warning => "WARNING",
            };
            let _ = writeln!(
                out,
                "{}: {}:{}: '{}' : {}",
                tag,
                d.location.file,
                d.location.line,
                d.text,
                d.kind.message()
            );
        }
        out
    }
}
