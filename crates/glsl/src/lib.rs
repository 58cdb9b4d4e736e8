//! GLSL ES front end: preprocessor, parser/semantic analysis, and lowering
//! to the shader IR consumed by the pipeline specializer.

mod ast;
mod limits;
mod lower;
mod parser;

pub mod diag;
pub mod pp;

pub use ast::Ast;
pub use diag::{Diagnostic, DiagnosticKind, Diagnostics, Severity};

use pp::{DirectiveHandler, Location};
use shale_core::ir::{ShaderIr, ShaderKind};
use tracing::debug;

const KNOWN_EXTENSIONS: &[&str] = &[
    "GL_OES_standard_derivatives",
    "GL_EXT_draw_buffers",
    "GL_OES_EGL_image_external",
    "GL_EXT_shader_texture_lod",
    "all",
];

#[derive(Default)]
struct DriverHandler {
    version: u32,
    invariant_all: bool,
}

impl DirectiveHandler for DriverHandler {
    fn handle_error(&mut self, location: Location, message: &str, diags: &mut Diagnostics) {
        diags.report(DiagnosticKind::SyntaxError, location, message);
    }

    fn handle_pragma(
        &mut self,
        _location: Location,
        name: &str,
        value: &str,
        stdgl: bool,
        _diags: &mut Diagnostics,
    ) {
        if stdgl && name == "invariant" && value == "all" {
            self.invariant_all = true;
        }
    }

    fn handle_extension(
        &mut self,
        location: Location,
        name: &str,
        behavior: &str,
        diags: &mut Diagnostics,
    ) {
        let known = KNOWN_EXTENSIONS.contains(&name);
        match behavior {
            "require" if !known => {
                diags.report(DiagnosticKind::UnknownExtension, location, name);
                // `require` on an unknown extension must fail the compile.
                diags.report(DiagnosticKind::InvalidExtensionDirective, location, name);
            }
            "enable" | "warn" if !known => {
                diags.report(DiagnosticKind::UnknownExtension, location, name);
            }
            "require" | "enable" | "warn" | "disable" => {}
            _ => {
                diags.report(DiagnosticKind::InvalidExtensionBehavior, location, behavior);
            }
        }
    }

    fn handle_version(&mut self, location: Location, version: u32, diags: &mut Diagnostics) {
        if version != 100 && version != 300 {
            diags.report(
                DiagnosticKind::UnsupportedShaderVersion,
                location,
                version.to_string().as_str(),
            );
        }
        self.version = version;
    }
}

/// Outcome of a shader compilation: the program (when it succeeded) plus the
/// aggregated info log.
pub struct CompileResult {
    pub ir: Option<ShaderIr>,
    pub log: String,
    pub diagnostics: Diagnostics,
}

impl CompileResult {
    pub fn success(&self) -> bool {
        self.ir.is_some()
    }
}

/// Compile GLSL ES source into shader IR.
pub fn compile(source: &str, kind: ShaderKind) -> CompileResult {
    compile_sources(&[source], kind)
}

pub fn compile_sources(sources: &[&str], kind: ShaderKind) -> CompileResult {
    let mut diags = Diagnostics::new();

    let mut handler = DriverHandler {
        version: 100,
        invariant_all: false,
    };

    let tokens = pp::preprocess(sources, &mut diags, &mut handler);
    let version = handler.version;
    let invariant_all = handler.invariant_all;

    debug!(?kind, version, tokens = tokens.len(), "compiling shader");

    let mut ast = parser::parse(tokens, version, kind, &mut diags);
    ast.invariant_all = invariant_all;

    limits::validate(&mut ast, &mut diags);

    let ir = if diags.has_errors() {
        None
    } else {
        lower::lower(&ast, kind, version, &mut diags)
    };

    CompileResult {
        ir,
        log: diags.log(),
        diagnostics: diags,
    }
}
