//! Vertex routine builder.
//!
//! The generated routine walks a batch of vertex indices four at a time,
//! fetches attributes according to the bound stream descriptors, runs the
//! vertex shader, and writes clip-space positions, point sizes, and linked
//! varyings into the transformed-vertex array.

use super::link::LinkedProgram;
use super::shadercore::ShaderCore;
use crate::data::{AttribStream, DrawData, TransformedVertex, MAX_ATTRIBUTES};
use shale_core::{AttribType, AttributeDesc, PipelineState};
use shale_jit::dsl::*;
use shale_jit::{build_routine, BackendConfig, BackendError, Routine, Ty};
use std::mem::{offset_of, size_of};

pub fn build_vertex_routine(
    program: &LinkedProgram,
    state: &PipelineState,
    config: &BackendConfig,
) -> Result<Routine, BackendError> {
    let vs = &program.vs;

    let input_count = vs
        .attributes
        .iter()
        .map(|a| a.reg + 1)
        .max()
        .unwrap_or(0)
        .max(1) as usize;
    let output_count = vs
        .varyings
        .iter()
        .map(|v| v.reg + v.array_len.max(1))
        .max()
        .unwrap_or(2)
        .max(2) as usize;

    build_routine(
        "vertex",
        &[Ty::Ptr, Ty::Ptr, Ty::UInt, Ty::Ptr],
        config,
        || {
            let indices = arg_ptr::<UInt>(0);
            let out = arg_ptr::<Byte>(1);
            let count = Int::from(arg_uint(2));
            let data = arg_ptr::<Byte>(3);

            let cursor = Var::<Int>::init(Int::from(0));
            while_loop(
                || cursor.get().lt(count),
                || {
                    let base = cursor.get();
                    let limit = count - Int::from(1);

                    // Gather four indices, clamping the tail.
                    let mut lane_index = [Int::from(0); 4];
                    for (lane, li) in lane_index.iter_mut().enumerate() {
                        let i = min(base + Int::from(lane as i32), limit);
                        let idx = indices.element(i).load();
                        *li = bitcast::<Int, UInt>(idx);
                    }

                    let mut core = ShaderCore::new(
                        vs,
                        data,
                        offset_of!(DrawData, vs_uniforms) as i32,
                        input_count,
                        output_count,
                    );

                    // Attribute fetch, specialized per bound descriptor.
                    for attr in &vs.attributes {
                        let desc = state
                            .attributes
                            .get(attr.reg as usize)
                            .copied()
                            .flatten()
                            .unwrap_or_default();
                        fetch_attribute(&mut core, data, attr.reg, &desc, &lane_index);
                    }

                    core.run();

                    // Transpose the SoA outputs into the vertex records.
                    for lane in 0..4u8 {
                        let i = base + Int::from(lane as i32);
                        if_then(i.le(limit), || {
                            let vertex = out.offset(i * Int::from(size_of::<TransformedVertex>() as i32));

                            let pos = vertex
                                .offset_const(offset_of!(TransformedVertex, position) as i32)
                                .cast::<Float>();
                            for c in 0..4 {
                                pos.offset_const(c as i32 * 4)
                                    .store(core.outputs[0].c[c].get().lane(lane));
                            }

                            vertex
                                .offset_const(offset_of!(TransformedVertex, point_size) as i32)
                                .cast::<Float>()
                                .store(core.outputs[1].c[0].get().lane(lane));

                            let varyings = vertex
                                .offset_const(offset_of!(TransformedVertex, varyings) as i32)
                                .cast::<Float>();
                            for slot in &program.varyings {
                                for r in 0..slot.registers {
                                    let src = (slot.vs_reg + r) as usize;
                                    let dst_base = (slot.slot + r) as i32 * 16;
                                    for c in 0..4 {
                                        varyings
                                            .offset_const(dst_base + c as i32 * 4)
                                            .store(core.outputs[src].c[c].get().lane(lane));
                                    }
                                }
                            }
                        });
                    }

                    cursor.set(base + Int::from(4));
                },
            );
        },
    )
}

/// Load one attribute for all four lanes: convert per the descriptor's type,
/// normalize when requested, and default missing components to (0, 0, 0, 1).
fn fetch_attribute(
    core: &mut ShaderCore,
    data: Pointer<Byte>,
    reg: u32,
    desc: &AttributeDesc,
    lane_index: &[Int; 4],
) {
    let slot = (reg as usize).min(MAX_ATTRIBUTES - 1);
    let stream_off =
        (offset_of!(DrawData, attributes) + slot * size_of::<AttribStream>()) as i32;
    let ptr = data
        .offset_const(stream_off + offset_of!(AttribStream, ptr) as i32)
        .cast::<Byte>();
    let stride = data
        .offset_const(stream_off + offset_of!(AttribStream, stride) as i32)
        .cast::<Int>()
        .load();

    // The stream pointer itself is data in the draw block.
    let base_addr: Pointer<Byte> = Pointer::from_long(read_ptr(ptr));

    for lane in 0..4u8 {
        let offset = lane_index[lane as usize] * stride;
        let vertex_ptr = base_addr + offset;

        for c in 0..4usize {
            let value: Float = if c < desc.count as usize {
                load_component(vertex_ptr, desc, c as i32)
            } else if c == 3 {
                Float::from(1.0)
            } else {
                Float::from(0.0)
            };
            let comp = &core.inputs[reg as usize].c[c];
            comp.set(comp.get().with_lane(lane, value));
        }
    }
}

/// The stream pointer itself is data: load it as a 64-bit value.
fn read_ptr(at: Pointer<Byte>) -> Long {
    at.cast::<Long>().load()
}

fn load_component(base: Pointer<Byte>, desc: &AttributeDesc, c: i32) -> Float {
    let at = base.offset_const(c * desc.ty.size() as i32);
    match desc.ty {
        AttribType::F32 => at.cast::<Float>().load(),
        AttribType::U8 => {
            let raw = at.cast::<Byte>().load();
            let v = Float::from(Int::from(raw));
            if desc.normalized {
                v * Float::from(1.0 / 255.0)
            } else {
                v
            }
        }
        AttribType::I8 => {
            let raw = at.cast::<SByte>().load();
            let v = Float::from(Int::from(raw));
            if desc.normalized {
                max(v * Float::from(1.0 / 127.0), Float::from(-1.0))
            } else {
                v
            }
        }
        AttribType::U16 => {
            let raw = at.cast::<UShort>().load();
            let v = Float::from(Int::from(raw));
            if desc.normalized {
                v * Float::from(1.0 / 65535.0)
            } else {
                v
            }
        }
        AttribType::I16 => {
            let raw = at.cast::<Short>().load();
            let v = Float::from(Int::from(raw));
            if desc.normalized {
                max(v * Float::from(1.0 / 32767.0), Float::from(-1.0))
            } else {
                v
            }
        }
        AttribType::I32 => {
            let raw = at.cast::<Int>().load();
            Float::from(raw)
        }
        AttribType::U32 => {
            let raw = at.cast::<UInt>().load();
            Float::from(raw)
        }
    }
}
