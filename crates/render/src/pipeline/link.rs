//! Program linking: pair a vertex and a fragment shader, match varyings by
//! name, and lay out the packed varying slots both sides agree on.

use crate::data::MAX_VARYINGS;
use shale_core::ir::{Interpolation, ShaderIr, ShaderKind};
use std::fmt::Write;

/// One linked varying slot: where the vertex shader writes it and where the
/// fragment shader expects it.
#[derive(Clone, Debug)]
pub struct VaryingSlot {
    pub name: String,
    /// Vertex-shader output register.
    pub vs_reg: u32,
    /// Fragment-shader input register.
    pub ps_reg: u32,
    /// Packed slot in `TransformedVertex::varyings`.
    pub slot: u32,
    pub registers: u32,
    pub interpolation: Interpolation,
}

#[derive(Debug)]
pub struct LinkedProgram {
    pub vs: ShaderIr,
    pub ps: ShaderIr,
    pub varyings: Vec<VaryingSlot>,
    pub varying_slots: u32,
    pub log: String,
}

pub fn link(vs: ShaderIr, ps: ShaderIr) -> Result<LinkedProgram, String> {
    let mut log = String::new();

    if vs.kind != Some(ShaderKind::Vertex) || ps.kind != Some(ShaderKind::Fragment) {
        return Err("attached shaders have the wrong stages".to_string());
    }
    if vs.version != ps.version {
        return Err("shaders were compiled for different language versions".to_string());
    }

    let mut varyings = Vec::new();
    let mut slot = 0u32;

    for ps_var in &ps.varyings {
        let Some(vs_var) = vs.varyings.iter().find(|v| v.name == ps_var.name) else {
            let _ = writeln!(log, "varying '{}' is not written by the vertex shader", ps_var.name);
            return Err(log);
        };
        if vs_var.components != ps_var.components || vs_var.array_len != ps_var.array_len {
            let _ = writeln!(log, "varying '{}' differs between stages", ps_var.name);
            return Err(log);
        }

        let registers = vs_var.array_len.max(1);
        if slot + registers > MAX_VARYINGS as u32 {
            let _ = writeln!(log, "too many varyings");
            return Err(log);
        }

        varyings.push(VaryingSlot {
            name: ps_var.name.clone(),
            vs_reg: vs_var.reg,
            ps_reg: ps_var.reg,
            slot,
            registers,
            interpolation: ps_var.interpolation,
        });
        slot += registers;
    }

    Ok(LinkedProgram {
        vs,
        ps,
        varyings,
        varying_slots: slot,
        log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shale_core::ir::ShaderKind;
    use shale_glsl::compile;

    fn ir(src: &str, kind: ShaderKind) -> ShaderIr {
        let r = compile(src, kind);
        assert!(r.success(), "{}", r.log);
        r.ir.unwrap()
    }

    #[test]
    fn varyings_link_by_name() {
        let vs = ir(
            "attribute vec4 p; varying vec2 uv; varying vec4 tint;\n\
             void main() { gl_Position = p; uv = p.xy; tint = p; }",
            ShaderKind::Vertex,
        );
        let ps = ir(
            "precision mediump float; varying vec4 tint; varying vec2 uv;\n\
             void main() { gl_FragColor = tint + vec4(uv, 0.0, 0.0); }",
            ShaderKind::Fragment,
        );

        let linked = link(vs, ps).unwrap();
        assert_eq!(linked.varyings.len(), 2);
        // Slots follow the fragment shader's input order.
        assert_eq!(linked.varyings[0].name, "tint");
        assert_eq!(linked.varyings[0].slot, 0);
        assert_eq!(linked.varyings[1].name, "uv");
        assert_eq!(linked.varyings[1].slot, 1);
    }

    #[test]
    fn missing_varying_fails_link() {
        let vs = ir(
            "attribute vec4 p; void main() { gl_Position = p; }",
            ShaderKind::Vertex,
        );
        let ps = ir(
            "precision mediump float; varying vec2 uv; void main() { gl_FragColor = vec4(uv, 0.0, 1.0); }",
            ShaderKind::Fragment,
        );
        assert!(link(vs, ps).is_err());
    }

    #[test]
    fn stage_mismatch_fails() {
        let vs = ir(
            "attribute vec4 p; void main() { gl_Position = p; }",
            ShaderKind::Vertex,
        );
        let vs2 = vs.clone();
        assert!(link(vs, vs2).is_err());
    }
}
