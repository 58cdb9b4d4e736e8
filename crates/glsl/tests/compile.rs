use shale_core::ir::{Bank, Opcode, ShaderKind};
use shale_glsl::{compile, DiagnosticKind};

#[test]
fn minimal_fragment_shader() {
    let result = compile(
        "void main() { gl_FragColor = vec4(0, 0, 0, 1); }",
        ShaderKind::Fragment,
    );
    assert!(result.success(), "log: {}", result.log);

    let ir = result.ir.unwrap();
    // The color lands in output register 0 and the program returns.
    assert!(ir
        .instructions
        .iter()
        .any(|i| i.dst.map_or(false, |d| d.reg.bank == Bank::Output && d.reg.index == 0)));
    assert_eq!(ir.instructions.last().unwrap().op, Opcode::Ret);
}

#[test]
fn minimal_vertex_shader() {
    let result = compile(
        "attribute vec4 position; void main() { gl_Position = position; }",
        ShaderKind::Vertex,
    );
    assert!(result.success(), "log: {}", result.log);

    let ir = result.ir.unwrap();
    assert_eq!(ir.attributes.len(), 1);
    assert_eq!(ir.attributes[0].name, "position");
    assert_eq!(ir.attributes[0].reg, 0);
}

#[test]
fn sampler_loop_is_marked_unroll() {
    let src = r#"
        uniform sampler2D s;
        void main() {
            vec4 c = vec4(0.0);
            for (int i = 0; i < 4; ++i)
                c += texture2D(s, vec2(i * 0.25, 0));
            gl_FragColor = c;
        }
    "#;
    let result = compile(src, ShaderKind::Fragment);
    assert!(result.success(), "log: {}", result.log);

    let ir = result.ir.unwrap();
    let loop_inst = ir
        .instructions
        .iter()
        .find(|i| i.op == Opcode::Loop)
        .expect("loop instruction");
    assert!(loop_inst.unroll);
    let info = loop_inst.loop_info.expect("loop info");
    assert_eq!(info.iterations, 4);
    assert_eq!(info.init, 0);
    assert_eq!(info.step, 1);
    assert!(!info.float);
}

#[test]
fn float_loops_stay_counted() {
    let src = r#"
        void main() {
            float acc = 0.0;
            for (float t = 0.0; t < 1.0; t += 0.25)
                acc += t;
            gl_FragColor = vec4(acc);
        }
    "#;
    let result = compile(src, ShaderKind::Fragment);
    assert!(result.success(), "log: {}", result.log);

    let ir = result.ir.unwrap();
    let loop_inst = ir.instructions.iter().find(|i| i.op == Opcode::Loop).unwrap();
    assert!(!loop_inst.unroll);
    assert_eq!(loop_inst.loop_info.unwrap().iterations, 4);
}

#[test]
fn while_loops_are_rejected() {
    let result = compile(
        "void main() { int i = 0; while (i < 4) { i++; } }",
        ShaderKind::Fragment,
    );
    assert!(!result.success());
    assert!(result
        .diagnostics
        .contains(DiagnosticKind::UnsupportedLoopType));
}

#[test]
fn loop_index_modification_is_rejected() {
    let result = compile(
        "void main() { for (int i = 0; i < 4; ++i) { i = 2; } }",
        ShaderKind::Fragment,
    );
    assert!(!result.success());
    assert!(result.diagnostics.contains(DiagnosticKind::LoopIndexModified));
}

#[test]
fn loop_index_as_out_argument_is_rejected() {
    let src = r#"
        void grab(out int x) { x = 1; }
        void main() {
            for (int i = 0; i < 4; ++i) { grab(i); }
        }
    "#;
    let result = compile(src, ShaderKind::Fragment);
    assert!(!result.success());
    assert!(result
        .diagnostics
        .contains(DiagnosticKind::LoopIndexAsOutParameter));
}

#[test]
fn non_constant_index_outside_loop_is_rejected() {
    let src = r#"
        uniform float data[4];
        uniform int pick;
        void main() { gl_FragColor = vec4(data[pick]); }
    "#;
    let result = compile(src, ShaderKind::Fragment);
    assert!(!result.success());
    assert!(result.diagnostics.contains(DiagnosticKind::NonConstantIndex));
}

#[test]
fn version_310_is_unsupported() {
    let result = compile("#version 310 es\nvoid main() {}", ShaderKind::Fragment);
    assert!(!result.success());
    assert!(result
        .diagnostics
        .contains(DiagnosticKind::UnsupportedShaderVersion));
}

#[test]
fn version_300_uses_in_out() {
    let src = "#version 300 es\nprecision mediump float;\nin vec2 uv;\nout vec4 color;\nvoid main() { color = vec4(uv, 0.0, 1.0); }";
    let result = compile(src, ShaderKind::Fragment);
    assert!(result.success(), "log: {}", result.log);

    let ir = result.ir.unwrap();
    assert_eq!(ir.version, 300);
    assert_eq!(ir.varyings.len(), 1);
    assert_eq!(ir.varyings[0].name, "uv");
}

#[test]
fn attribute_in_300_is_rejected() {
    let src = "#version 300 es\nattribute vec4 p;\nvoid main() { gl_Position = p; }";
    let result = compile(src, ShaderKind::Vertex);
    assert!(!result.success());
}

#[test]
fn invariant_marks_varyings() {
    let src = "attribute vec4 p;\ninvariant varying vec2 uv;\nvarying vec3 n;\n\
               void main() { gl_Position = p; uv = p.xy; n = p.xyz; }";
    let result = compile(src, ShaderKind::Vertex);
    assert!(result.success(), "log: {}", result.log);

    let ir = result.ir.unwrap();
    let by_name = |n: &str| ir.varyings.iter().find(|v| v.name == n).unwrap();
    assert!(by_name("uv").invariant);
    assert!(!by_name("n").invariant);

    // The STDGL pragma covers every varying.
    let src = "#pragma STDGL invariant(all)\nattribute vec4 p;\nvarying vec3 n;\n\
               void main() { gl_Position = p; n = p.xyz; }";
    let result = compile(src, ShaderKind::Vertex);
    assert!(result.success(), "log: {}", result.log);
    assert!(result.ir.unwrap().varyings[0].invariant);
}

#[test]
fn unused_uniforms_are_flagged() {
    let src = r#"
        uniform vec4 used_color;
        uniform vec4 dead_color;
        void main() { gl_FragColor = used_color; }
    "#;
    let result = compile(src, ShaderKind::Fragment);
    assert!(result.success(), "log: {}", result.log);

    let ir = result.ir.unwrap();
    let by_name = |n: &str| ir.uniforms.iter().find(|u| u.name == n).unwrap();
    assert!(by_name("used_color").used);
    assert!(!by_name("dead_color").used);
}

#[test]
fn mad_fusion() {
    let result = compile(
        "uniform float a; uniform float b; uniform float c;\nvoid main() { gl_FragColor = vec4(a * b + c); }",
        ShaderKind::Fragment,
    );
    assert!(result.success(), "log: {}", result.log);
    let ir = result.ir.unwrap();
    assert!(ir.instructions.iter().any(|i| i.op == Opcode::Mad));
}

#[test]
fn matrix_vector_multiply_expands_per_column() {
    let src = r#"
        uniform mat4 transform;
        attribute vec4 position;
        void main() { gl_Position = transform * position; }
    "#;
    let result = compile(src, ShaderKind::Vertex);
    assert!(result.success(), "log: {}", result.log);

    let ir = result.ir.unwrap();
    // One multiply plus three multiply-adds, one per further column.
    let muls = ir.instructions.iter().filter(|i| i.op == Opcode::Mul).count();
    let mads = ir.instructions.iter().filter(|i| i.op == Opcode::Mad).count();
    assert_eq!(muls, 1);
    assert_eq!(mads, 3);
    // The uniform matrix spans four registers.
    assert_eq!(ir.uniforms[0].columns, 4);
    assert_eq!(ir.uniforms[0].rows, 4);
}

#[test]
fn samplers_reject_arithmetic() {
    let result = compile(
        "uniform sampler2D s;\nvoid main() { gl_FragColor = vec4(float(s + s)); }",
        ShaderKind::Fragment,
    );
    assert!(!result.success());
}

#[test]
fn undeclared_identifier_reports() {
    let result = compile("void main() { gl_FragColor = missing; }", ShaderKind::Fragment);
    assert!(!result.success());
    assert!(result
        .diagnostics
        .contains(DiagnosticKind::UndeclaredIdentifier));
}

#[test]
fn functions_inline_with_out_params() {
    let src = r#"
        float doubled(float x) { return x * 2.0; }
        void split(float v, out float lo, out float hi) { lo = v - 1.0; hi = v + 1.0; }
        void main() {
            float a = doubled(3.0);
            float lo; float hi;
            split(a, lo, hi);
            gl_FragColor = vec4(a, lo, hi, 1.0);
        }
    "#;
    let result = compile(src, ShaderKind::Fragment);
    assert!(result.success(), "log: {}", result.log);

    // Calls are inlined: no call opcode exists, so the only structured ops
    // are the one-trip loops wrapping inlined bodies.
    let ir = result.ir.unwrap();
    assert!(ir.instructions.iter().all(|i| i.op != Opcode::TexSample));
    assert!(ir.instructions.iter().filter(|i| i.op == Opcode::Loop).count() >= 2);
}

#[test]
fn recursion_is_rejected() {
    let src = r#"
        float f(float x) { return f(x) + 1.0; }
        void main() { gl_FragColor = vec4(f(1.0)); }
    "#;
    let result = compile(src, ShaderKind::Fragment);
    assert!(!result.success());
    assert!(result
        .diagnostics
        .contains(DiagnosticKind::RecursiveFunctionCall));
}

#[test]
fn swizzle_assignment_masks_lanes() {
    let src = "void main() { vec4 v = vec4(0.0); v.zx = vec2(1.0, 2.0); gl_FragColor = v; }";
    let result = compile(src, ShaderKind::Fragment);
    assert!(result.success(), "log: {}", result.log);

    let ir = result.ir.unwrap();
    // A store with a mask covering exactly lanes x and z exists.
    assert!(ir.instructions.iter().any(|i| {
        i.op == Opcode::Mov && i.dst.map_or(false, |d| d.mask == 0b0101)
    }));
}

#[test]
fn constants_are_pooled() {
    let src = "void main() { gl_FragColor = vec4(0.5) + vec4(0.5); }";
    let result = compile(src, ShaderKind::Fragment);
    assert!(result.success());
    let ir = result.ir.unwrap();
    // Constant folding plus pooling leave a single 0.5/1.0 entry.
    assert!(ir.constants.len() <= 2);
}

#[test]
fn discard_only_in_fragment() {
    assert!(compile("void main() { discard; }", ShaderKind::Fragment).success());
    assert!(!compile("void main() { discard; }", ShaderKind::Vertex).success());
}
