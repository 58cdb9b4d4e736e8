//! Pixel routine builder.
//!
//! The generated routine walks a strip of scanlines in 2×2 quads: coverage
//! from the primitive's outline spans, attribute evaluation from the plane
//! equations (perspective-correct for smooth varyings), shader execution
//! under the coverage mask, then alpha test, stencil, depth, blending, and
//! the masked color writeback. All fixed-function stages are specialized
//! against the bound state, so the emitted code has no state branches.

use super::link::LinkedProgram;
use super::shadercore::ShaderCore;
use crate::data::{DrawData, FramebufferDesc, PlaneEq, Primitive, Span};
use shale_core::ir::Interpolation;
use shale_core::{
    BlendEquation, BlendFactor, CompareFunc, PipelineState, StencilFace, StencilOp, VisualOrder,
};
use shale_jit::dsl::*;
use shale_jit::{build_routine, BackendConfig, BackendError, Routine, Ty};
use std::mem::{offset_of, size_of};

struct Planes {
    a: Float4,
    b: Float4,
    c: Float4,
}

fn load_plane(prim: Pointer<Byte>, offset: i32) -> Planes {
    let at = prim.offset_const(offset).cast::<Float>();
    Planes {
        a: Float4::splat(at.load()),
        b: Float4::splat(at.offset_const(4).load()),
        c: Float4::splat(at.offset_const(8).load()),
    }
}

impl Planes {
    fn eval(&self, x: Float4, y: Float4) -> Float4 {
        mul_add(self.a, x, mul_add(self.b, y, self.c))
    }
}

pub fn build_pixel_routine(
    program: &LinkedProgram,
    state: &PipelineState,
    order: VisualOrder,
    config: &BackendConfig,
) -> Result<Routine, BackendError> {
    let ps = &program.ps;
    let varyings = program.varyings.clone();

    let input_count = varyings
        .iter()
        .map(|v| v.ps_reg + v.registers)
        .max()
        .unwrap_or(2)
        .max(2) as usize;

    build_routine(
        "pixel",
        &[Ty::Ptr, Ty::UInt, Ty::Ptr, Ty::Ptr],
        config,
        || {
            let prim = arg_ptr::<Byte>(0);
            let y_range = arg_uint(1);
            let fb = arg_ptr::<Byte>(2);
            let data = arg_ptr::<Byte>(3);

            let y_begin = Int::from(y_range & UInt::from(0xffffu32));
            let y_end = Int::from(y_range >> Int::from(16));

            let z_plane = load_plane(prim, offset_of!(Primitive, z) as i32);
            let w_plane = load_plane(prim, offset_of!(Primitive, w) as i32);
            let front = prim
                .offset_const(offset_of!(Primitive, front_facing) as i32)
                .cast::<UInt>()
                .load();
            let front_bool = front.ne_(UInt::from(0u32));

            let color_ptr = Pointer::<Byte>::from_long(
                fb.offset_const(offset_of!(FramebufferDesc, color) as i32)
                    .cast::<Long>()
                    .load(),
            );
            let depth_ptr = Pointer::<Byte>::from_long(
                fb.offset_const(offset_of!(FramebufferDesc, depth) as i32)
                    .cast::<Long>()
                    .load(),
            );
            let stencil_ptr = Pointer::<Byte>::from_long(
                fb.offset_const(offset_of!(FramebufferDesc, stencil) as i32)
                    .cast::<Long>()
                    .load(),
            );
            let pitch = fb
                .offset_const(offset_of!(FramebufferDesc, pitch) as i32)
                .cast::<Int>()
                .load();

            let outline = prim
                .offset_const(offset_of!(Primitive, outline) as i32)
                .cast::<UInt>();

            let y = Var::<Int>::init(y_begin);
            while_loop(
                || y.get().lt(y_end),
                || {
                    let row0 = y.get();
                    let row1 = row0 + Int::from(1);

                    let span0 = outline.element(row0).load();
                    let left0 = Int::from(span0 & UInt::from(0xffffu32));
                    let right0 = Int::from(span0 >> Int::from(16));

                    // The second row's span, empty when the strip ends on an
                    // odd boundary.
                    let l1 = Var::<Int>::init(Int::from(i32::MAX));
                    let r1 = Var::<Int>::init(Int::from(0));
                    if_then(row1.lt(y_end), || {
                        let span1 = outline.element(row1).load();
                        l1.set(Int::from(span1 & UInt::from(0xffffu32)));
                        r1.set(Int::from(span1 >> Int::from(16)));
                    });
                    let left1 = l1.get();
                    let right1 = r1.get();

                    let x_begin = min(left0, left1) & Int::from(!1);
                    let x_end = max(right0, right1);

                    let x = Var::<Int>::init(x_begin);
                    while_loop(
                        || x.get().lt(x_end),
                        || {
                            let xs = Int4::splat(x.get()) + Int4::new(0, 1, 0, 1);
                            let lefts = Int4::splat(left0)
                                .with_lane(2, left1)
                                .with_lane(3, left1);
                            let rights = Int4::splat(right0)
                                .with_lane(2, right1)
                                .with_lane(3, right1);

                            let coverage = Var::<Int4>::init(xs.ge(lefts) & xs.lt(rights));

                            if_then(any(coverage.get()), || {
                                let xc = Float4::from(xs) + Float4::from(0.5);
                                let yc = Float4::splat(Float::from(row0))
                                    + Float4::new(0.0, 0.0, 1.0, 1.0)
                                    + Float4::from(0.5);

                                let rhw = w_plane.eval(xc, yc);
                                let w = rcp(rhw);
                                let z = z_plane.eval(xc, yc);
                                let z = min(max(z, Float4::from(0.0)), Float4::from(1.0));

                                let mut core = ShaderCore::new(
                                    ps,
                                    data,
                                    offset_of!(DrawData, ps_uniforms) as i32,
                                    input_count,
                                    5,
                                );

                                // gl_FragCoord and gl_FrontFacing.
                                core.inputs[0].c[0].set(xc);
                                core.inputs[0].c[1].set(yc);
                                core.inputs[0].c[2].set(z);
                                core.inputs[0].c[3].set(w);
                                core.inputs[1].c[0].set(
                                    front_bool
                                        .select(Float4::from(1.0), Float4::from(0.0)),
                                );

                                for slot in &varyings {
                                    for r in 0..slot.registers {
                                        for comp in 0..4usize {
                                            let offset = (offset_of!(Primitive, varyings)
                                                + ((slot.slot + r) as usize * 4 + comp)
                                                    * size_of::<PlaneEq>())
                                                as i32;
                                            let plane = load_plane(prim, offset);
                                            let v = plane.eval(xc, yc);
                                            let v = match slot.interpolation {
                                                Interpolation::Flat => v,
                                                _ => v * w,
                                            };
                                            core.inputs[(slot.ps_reg + r) as usize].c[comp]
                                                .set(v);
                                        }
                                    }
                                }

                                core.set_exec(coverage.get());
                                core.run();

                                coverage.set(coverage.get() & !core.kill_mask.get());

                                // A written gl_FragDepth replaces the
                                // interpolated depth.
                                let writes_depth = ps.instructions.iter().any(|i| {
                                    i.dst.map_or(false, |d| {
                                        d.reg.bank == shale_core::ir::Bank::Output
                                            && d.reg.index == 4
                                    })
                                });
                                let z = if writes_depth {
                                    min(
                                        max(core.outputs[4].c[0].get(), Float4::from(0.0)),
                                        Float4::from(1.0),
                                    )
                                } else {
                                    z
                                };

                                let color = [
                                    core.outputs[0].c[0].get(),
                                    core.outputs[0].c[1].get(),
                                    core.outputs[0].c[2].get(),
                                    core.outputs[0].c[3].get(),
                                ];

                                if let Some((func, reference)) = state.alpha_test {
                                    let mask = float_compare(
                                        func,
                                        color[3],
                                        Float4::from(reference),
                                    );
                                    coverage.set(coverage.get() & mask);
                                }
                                if state.alpha_to_coverage {
                                    // Single-sample: alpha becomes a
                                    // threshold.
                                    let mask =
                                        color[3].ge(Float4::from(0.5));
                                    coverage.set(coverage.get() & mask);
                                }

                                let offsets = (Int4::splat(row0)
                                    + Int4::new(0, 0, 1, 1))
                                    * Int4::splat(pitch)
                                    + xs;

                                // Depth test.
                                let depth_pass = Var::<Int4>::init(Int4::from(-1));
                                if state.depth.test {
                                    let old = gather_f32(depth_ptr, offsets);
                                    depth_pass
                                        .set(float_compare(state.depth.func, z, old));
                                }

                                // Stencil test and writeback.
                                if state.stencil.enabled {
                                    let spass = Var::<Int4>::init(Int4::from(-1));
                                    let this_cov = coverage.get();
                                    let dmask = depth_pass.get();
                                    if_then_else(
                                        front_bool,
                                        || {
                                            let m = stencil_face(
                                                &state.stencil.front,
                                                stencil_ptr,
                                                offsets,
                                                this_cov,
                                                dmask,
                                            );
                                            spass.set(m);
                                        },
                                        || {
                                            let m = stencil_face(
                                                &state.stencil.back,
                                                stencil_ptr,
                                                offsets,
                                                this_cov,
                                                dmask,
                                            );
                                            spass.set(m);
                                        },
                                    );
                                    coverage.set(coverage.get() & spass.get());
                                }

                                coverage.set(coverage.get() & depth_pass.get());

                                // Depth write.
                                if state.depth.test && state.depth.write {
                                    scatter_f32_masked(
                                        depth_ptr,
                                        offsets,
                                        z,
                                        coverage.get(),
                                    );
                                }

                                // Blend and write color.
                                if_then(any(coverage.get()), || {
                                    let byte_offs = offsets << 2;
                                    let dst = gather_rgba8(color_ptr, byte_offs, order);

                                    let final_color = if state.blend.enabled {
                                        blend(state, &color, &dst, data)
                                    } else {
                                        color
                                    };

                                    let mut out = [Float4::from(0.0); 4];
                                    for c in 0..4 {
                                        out[c] = if state.color_write_mask & (1 << c) != 0 {
                                            final_color[c]
                                        } else {
                                            dst[c]
                                        };
                                    }

                                    scatter_rgba8_masked(
                                        color_ptr,
                                        byte_offs,
                                        &out,
                                        &dst,
                                        coverage.get(),
                                        order,
                                    );
                                });
                            });

                            x.set(x.get() + Int::from(2));
                        },
                    );

                    y.set(y.get() + Int::from(2));
                },
            );
        },
    )
}

fn float_compare(func: CompareFunc, a: Float4, b: Float4) -> Int4 {
    match func {
        CompareFunc::Never => Int4::from(0),
        CompareFunc::Always => Int4::from(-1),
        CompareFunc::Less => a.lt(b),
        CompareFunc::LessEqual => a.le(b),
        CompareFunc::Equal => a.eq_(b),
        CompareFunc::NotEqual => a.ne_(b),
        CompareFunc::Greater => a.gt(b),
        CompareFunc::GreaterEqual => a.ge(b),
    }
}

fn int_compare(func: CompareFunc, a: Int4, b: Int4) -> Int4 {
    match func {
        CompareFunc::Never => Int4::from(0),
        CompareFunc::Always => Int4::from(-1),
        CompareFunc::Less => a.lt(b),
        CompareFunc::LessEqual => a.le(b),
        CompareFunc::Equal => a.eq_(b),
        CompareFunc::NotEqual => a.ne_(b),
        CompareFunc::Greater => a.gt(b),
        CompareFunc::GreaterEqual => a.ge(b),
    }
}

/// Four 32-bit float loads addressed per lane (element offsets).
fn gather_f32(base: Pointer<Byte>, offsets: Int4) -> Float4 {
    let out = Var::<Float4>::init(Float4::from(0.0));
    for lane in 0..4u8 {
        let off = offsets.lane(lane) << 2;
        let v = base.offset(off).cast::<Float>().load();
        out.set(out.get().with_lane(lane, v));
    }
    out.get()
}

fn scatter_f32_masked(base: Pointer<Byte>, offsets: Int4, value: Float4, mask: Int4) {
    for lane in 0..4u8 {
        let off = offsets.lane(lane) << 2;
        let at = base.offset(off).cast::<Float>();
        let keep = mask.lane(lane).ne_(Int::from(0));
        let merged = keep.select(value.lane(lane), at.load());
        at.store(merged);
    }
}

/// Gather four packed pixels and unpack to [0,1] SoA floats in RGBA order.
fn gather_rgba8(base: Pointer<Byte>, byte_offs: Int4, order: VisualOrder) -> [Float4; 4] {
    let out = [
        Var::<Float4>::init(Float4::from(0.0)),
        Var::<Float4>::init(Float4::from(0.0)),
        Var::<Float4>::init(Float4::from(0.0)),
        Var::<Float4>::init(Float4::from(0.0)),
    ];
    let scale = Float::from(1.0 / 255.0);

    for lane in 0..4u8 {
        let pixel = base.offset(byte_offs.lane(lane)).cast::<UInt>().load();
        for c in 0..4usize {
            let shift = channel_shift(c, order);
            let v = (pixel >> Int::from(shift)) & UInt::from(0xffu32);
            out[c].set(out[c].get().with_lane(lane, Float::from(v) * scale));
        }
    }

    [out[0].get(), out[1].get(), out[2].get(), out[3].get()]
}

fn scatter_rgba8_masked(
    base: Pointer<Byte>,
    byte_offs: Int4,
    color: &[Float4; 4],
    dst: &[Float4; 4],
    mask: Int4,
    order: VisualOrder,
) {
    // Quantize with rounding, lanes clamped to [0,255].
    let mut quantized = [Int4::from(0); 4];
    for c in 0..4 {
        let v = min(
            max(color[c], Float4::from(0.0)),
            Float4::from(1.0),
        ) * Float4::from(255.0);
        quantized[c] = round_int4(v);
    }
    let mut dst_q = [Int4::from(0); 4];
    for c in 0..4 {
        let v = min(max(dst[c], Float4::from(0.0)), Float4::from(1.0)) * Float4::from(255.0);
        dst_q[c] = round_int4(v);
    }

    for lane in 0..4u8 {
        let keep = mask.lane(lane).ne_(Int::from(0));
        let mut pixel = UInt::from(0u32);
        for c in 0..4usize {
            let shift = channel_shift(c, order);
            let chosen = keep.select(quantized[c].lane(lane), dst_q[c].lane(lane));
            pixel = pixel | (UInt::from(chosen) << Int::from(shift));
        }
        base.offset(byte_offs.lane(lane)).cast::<UInt>().store(pixel);
    }
}

/// Bit position of channel `c` (RGBA order) in the packed pixel.
fn channel_shift(c: usize, order: VisualOrder) -> i32 {
    match order {
        VisualOrder::Rgb => (c as i32) * 8,
        VisualOrder::Bgra => match c {
            0 => 16,
            1 => 8,
            2 => 0,
            _ => 24,
        },
    }
}

/// One stencil face: compare, apply the fail/zfail/zpass operations, write
/// back, and return the pass mask.
fn stencil_face(
    face: &StencilFace,
    stencil_ptr: Pointer<Byte>,
    offsets: Int4,
    coverage: Int4,
    depth_pass: Int4,
) -> Int4 {
    let reference = Int4::from(face.reference as i32);
    let compare_mask = Int4::from(face.compare_mask as i32);
    let write_mask = face.write_mask as i32;

    // Gather current stencil bytes.
    let old = Var::<Int4>::init(Int4::from(0));
    for lane in 0..4u8 {
        let v = stencil_ptr.offset(offsets.lane(lane)).cast::<Byte>().load();
        old.set(old.get().with_lane(lane, Int::from(v)));
    }
    let old = old.get();

    let pass = int_compare(face.func, reference & compare_mask, old & compare_mask);

    let apply = |op: StencilOp| -> Int4 {
        match op {
            StencilOp::Keep => old,
            StencilOp::Zero => Int4::from(0),
            StencilOp::Replace => reference,
            StencilOp::Incr => min(old + Int4::from(1), Int4::from(255)),
            StencilOp::Decr => max(old - Int4::from(1), Int4::from(0)),
            StencilOp::Invert => !old & Int4::from(0xff),
            StencilOp::IncrWrap => (old + Int4::from(1)) & Int4::from(0xff),
            StencilOp::DecrWrap => (old - Int4::from(1)) & Int4::from(0xff),
        }
    };

    let on_fail = apply(face.fail);
    let on_zfail = apply(face.depth_fail);
    let on_zpass = apply(face.pass);

    let updated = pass.select_lanes(
        depth_pass.select_lanes(on_zpass, on_zfail),
        on_fail,
    );
    // Honor the write mask and only touch covered lanes.
    let masked = (updated & Int4::from(write_mask)) | (old & Int4::from(!write_mask & 0xff));
    let result = coverage.select_lanes(masked, old);

    for lane in 0..4u8 {
        let at = stencil_ptr.offset(offsets.lane(lane)).cast::<Byte>();
        at.store(Byte::from(result.lane(lane)));
    }

    pass
}

/// Fixed-function blending, specialized per state.
fn blend(
    state: &PipelineState,
    src: &[Float4; 4],
    dst: &[Float4; 4],
    data: Pointer<Byte>,
) -> [Float4; 4] {
    let constant = {
        let at = data
            .offset_const(offset_of!(DrawData, blend_constant) as i32)
            .cast::<Float>();
        [
            Float4::splat(at.load()),
            Float4::splat(at.offset_const(4).load()),
            Float4::splat(at.offset_const(8).load()),
            Float4::splat(at.offset_const(12).load()),
        ]
    };

    let factor = |f: BlendFactor, channel: usize, alpha: bool| -> Float4 {
        let one = Float4::from(1.0);
        match f {
            BlendFactor::Zero => Float4::from(0.0),
            BlendFactor::One => one,
            BlendFactor::SrcColor => src[channel],
            BlendFactor::OneMinusSrcColor => one - src[channel],
            BlendFactor::DstColor => dst[channel],
            BlendFactor::OneMinusDstColor => one - dst[channel],
            BlendFactor::SrcAlpha => src[3],
            BlendFactor::OneMinusSrcAlpha => one - src[3],
            BlendFactor::DstAlpha => dst[3],
            BlendFactor::OneMinusDstAlpha => one - dst[3],
            BlendFactor::ConstantColor => constant[channel],
            BlendFactor::OneMinusConstantColor => one - constant[channel],
            BlendFactor::ConstantAlpha => constant[3],
            BlendFactor::OneMinusConstantAlpha => one - constant[3],
            BlendFactor::SrcAlphaSaturate => {
                if alpha {
                    one
                } else {
                    min(src[3], one - dst[3])
                }
            }
        }
    };

    let mut out = [Float4::from(0.0); 4];
    for c in 0..4 {
        let alpha = c == 3;
        let (equation, sf, df) = if alpha {
            (
                state.blend.alpha_equation,
                state.blend.src_alpha,
                state.blend.dst_alpha,
            )
        } else {
            (
                state.blend.color_equation,
                state.blend.src_color,
                state.blend.dst_color,
            )
        };

        let s = src[c] * factor(sf, c, alpha);
        let d = dst[c] * factor(df, c, alpha);

        out[c] = match equation {
            BlendEquation::Add => s + d,
            BlendEquation::Subtract => s - d,
            BlendEquation::ReverseSubtract => d - s,
            BlendEquation::Min => min(src[c], dst[c]),
            BlendEquation::Max => max(src[c], dst[c]),
        };
    }

    out
}
