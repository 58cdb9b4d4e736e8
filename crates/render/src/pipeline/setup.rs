//! Setup routine builder.
//!
//! Per triangle: signed area and face culling, plane equations for depth,
//! perspective correction, and every linked varying, scanline bounds, and
//! the outline span table filled by edge intersection per scanline. Returns
//! false when the triangle is rejected.

use super::link::LinkedProgram;
use crate::data::{DrawData, PlaneEq, Primitive, ScreenVertex, Triangle};
use shale_core::ir::Interpolation;
use shale_core::{CullMode, FrontFace, PipelineState};
use shale_jit::dsl::*;
use shale_jit::{build_routine_ret, BackendConfig, BackendError, Routine, Ty};
use std::mem::{offset_of, size_of};

struct VertexRef {
    pos: [Float; 4],
}

fn vertex(tri: Pointer<Byte>, index: usize) -> VertexRef {
    let base = (index * size_of::<ScreenVertex>() + offset_of!(ScreenVertex, position)) as i32;
    let at = tri.offset_const(base).cast::<Float>();
    VertexRef {
        pos: [
            at.load(),
            at.offset_const(4).load(),
            at.offset_const(8).load(),
            at.offset_const(12).load(),
        ],
    }
}

fn varying_load(tri: Pointer<Byte>, index: usize, slot: u32, comp: usize) -> Float {
    let base = (index * size_of::<ScreenVertex>()
        + offset_of!(ScreenVertex, varyings)
        + slot as usize * 16
        + comp * 4) as i32;
    tri.offset_const(base).cast::<Float>().load()
}

fn plane_store(prim: Pointer<Byte>, offset: i32, a: Float, b: Float, c: Float) {
    let at = prim.offset_const(offset).cast::<Float>();
    at.store(a);
    at.offset_const(4).store(b);
    at.offset_const(8).store(c);
}

pub fn build_setup_routine(
    program: &LinkedProgram,
    state: &PipelineState,
    config: &BackendConfig,
) -> Result<Routine, BackendError> {
    let varyings = program.varyings.clone();

    build_routine_ret(
        "setup",
        &[Ty::Ptr, Ty::Ptr, Ty::Ptr],
        Ty::Bool,
        config,
        || {
            let tri = arg_ptr::<Byte>(0);
            let prim = arg_ptr::<Byte>(1);
            let data = arg_ptr::<Byte>(2);

            let v0 = vertex(tri, 0);
            let v1 = vertex(tri, 1);
            let v2 = vertex(tri, 2);

            let (x0, y0) = (v0.pos[0], v0.pos[1]);
            let (x1, y1) = (v1.pos[0], v1.pos[1]);
            let (x2, y2) = (v2.pos[0], v2.pos[1]);

            // Twice the signed area; positive means clockwise in a
            // y-down coordinate system.
            let det = (x1 - x0) * (y2 - y0) - (x2 - x0) * (y1 - y0);

            if_then(det.eq_(Float::from(0.0)), || ret(Bool::from(false)));

            let clockwise = det.gt(Float::from(0.0));
            let front = match state.front_face {
                FrontFace::Ccw => !clockwise,
                FrontFace::Cw => clockwise,
            };

            match state.cull {
                CullMode::None => {}
                CullMode::Back => if_then(!front, || ret(Bool::from(false))),
                CullMode::Front => if_then(front, || ret(Bool::from(false))),
            }

            prim.offset_const(offset_of!(Primitive, area) as i32)
                .cast::<Float>()
                .store(det * Float::from(0.5));
            prim.offset_const(offset_of!(Primitive, front_facing) as i32)
                .cast::<UInt>()
                .store(front.select(UInt::from(1u32), UInt::from(0u32)));

            // Two-sided stencil select masks.
            let cw_mask = clockwise.select(Int::from(-1), Int::from(0));
            let mask_at = prim
                .offset_const(offset_of!(Primitive, clockwise_mask) as i32)
                .cast::<Int>();
            mask_at.store(cw_mask);
            mask_at.offset_const(4).store(cw_mask);
            let ccw_at = prim
                .offset_const(offset_of!(Primitive, counter_clockwise_mask) as i32)
                .cast::<Int>();
            ccw_at.store(!cw_mask);
            ccw_at.offset_const(4).store(!cw_mask);

            let inv_det = rcp(det);
            let plane = |q0: Float, q1: Float, q2: Float| -> (Float, Float, Float) {
                let a = ((q1 - q0) * (y2 - y0) - (q2 - q0) * (y1 - y0)) * inv_det;
                let b = ((q2 - q0) * (x1 - x0) - (q1 - q0) * (x2 - x0)) * inv_det;
                let c = q0 - a * x0 - b * y0;
                (a, b, c)
            };

            // Depth plane, with polygon offset folded into the constant.
            let (za, zb, mut zc) = plane(v0.pos[2], v1.pos[2], v2.pos[2]);
            if state.polygon_offset.is_some() {
                let factor = data
                    .offset_const(offset_of!(DrawData, polygon_offset) as i32)
                    .cast::<Float>()
                    .load();
                let units = data
                    .offset_const((offset_of!(DrawData, polygon_offset) + 4) as i32)
                    .cast::<Float>()
                    .load();
                let slope = max(abs(za), abs(zb));
                zc = zc + factor * slope + units * Float::from(1.0 / (1u32 << 22) as f32);
            }
            plane_store(prim, offset_of!(Primitive, z) as i32, za, zb, zc);

            // 1/w plane for perspective correction.
            let rhw0 = rcp(v0.pos[3]);
            let rhw1 = rcp(v1.pos[3]);
            let rhw2 = rcp(v2.pos[3]);
            let (wa, wb, wc) = plane(rhw0, rhw1, rhw2);
            plane_store(prim, offset_of!(Primitive, w) as i32, wa, wb, wc);

            // Varying planes: smooth varyings interpolate v·(1/w), flat ones
            // take the provoking vertex.
            for slot in &varyings {
                for r in 0..slot.registers {
                    for comp in 0..4usize {
                        let offset = (offset_of!(Primitive, varyings)
                            + ((slot.slot + r) as usize * 4 + comp) * size_of::<PlaneEq>())
                            as i32;
                        match slot.interpolation {
                            Interpolation::Flat => {
                                let value = varying_load(tri, 0, slot.slot + r, comp);
                                plane_store(
                                    prim,
                                    offset,
                                    Float::from(0.0),
                                    Float::from(0.0),
                                    value,
                                );
                            }
                            _ => {
                                let q0 = varying_load(tri, 0, slot.slot + r, comp) * rhw0;
                                let q1 = varying_load(tri, 1, slot.slot + r, comp) * rhw1;
                                let q2 = varying_load(tri, 2, slot.slot + r, comp) * rhw2;
                                let (a, b, c) = plane(q0, q1, q2);
                                plane_store(prim, offset, a, b, c);
                            }
                        }
                    }
                }
            }

            // Scanline bounds at pixel centers, clamped to the scissored
            // target.
            let clip = data.offset_const(offset_of!(DrawData, clip) as i32).cast::<Int>();
            let clip_left = clip.load();
            let clip_top = clip.offset_const(4).load();
            let clip_right = clip.offset_const(8).load();
            let clip_bottom = clip.offset_const(12).load();

            let ymin_f = min(min(y0, y1), y2);
            let ymax_f = max(max(y0, y1), y2);
            let y_min = max(
                Int::from(ceil(ymin_f - Float::from(0.5))),
                clip_top,
            );
            let y_max = min(
                Int::from(floor(ymax_f - Float::from(0.5))) + Int::from(1),
                clip_bottom,
            );

            prim.offset_const(offset_of!(Primitive, y_min) as i32)
                .cast::<Int>()
                .store(y_min);
            prim.offset_const(offset_of!(Primitive, y_max) as i32)
                .cast::<Int>()
                .store(y_max);

            if_then(y_min.ge(y_max), || ret(Bool::from(false)));

            // Fill the outline by intersecting each scanline with the three
            // edges.
            let outline = prim
                .offset_const(offset_of!(Primitive, outline) as i32)
                .cast::<UInt>();
            let edges = [(0usize, 1usize), (1, 2), (2, 0)];
            let px = [x0, x1, x2];
            let py = [y0, y1, y2];

            let y = Var::<Int>::init(y_min);
            while_loop(
                || y.get().lt(y_max),
                || {
                    let yc = Float::from(y.get()) + Float::from(0.5);
                    let xl = Var::<Float>::init(Float::from(f32::MAX));
                    let xr = Var::<Float>::init(Float::from(f32::MIN));

                    for &(a, b) in &edges {
                        let crosses = py[a].le(yc) ^ py[b].le(yc);
                        if_then(crosses, || {
                            let t = (yc - py[a]) / (py[b] - py[a]);
                            let x = px[a] + t * (px[b] - px[a]);
                            xl.set(min(xl.get(), x));
                            xr.set(max(xr.get(), x));
                        });
                    }

                    // Inclusive span at pixel centers.
                    let left = max(
                        Int::from(ceil(xl.get() - Float::from(0.5))),
                        clip_left,
                    );
                    let right = min(
                        Int::from(floor(xr.get() - Float::from(0.5))) + Int::from(1),
                        clip_right,
                    );
                    let right = max(right, left);

                    let packed = UInt::from(left) | (UInt::from(right) << Int::from(16));
                    outline.element(y.get()).store(packed);

                    y.set(y.get() + Int::from(1));
                },
            );

            ret(Bool::from(true));
        },
    )
}
