//! Primitive assembly: turn the transformed-vertex stream into screen-space
//! triangles. Strips and fans expand to triples, points and lines expand to
//! screen-aligned quads so a single triangle path feeds setup.

use super::clip::ClipVertex;
use crate::data::{ScreenVertex, Triangle, TransformedVertex};
use shale_core::{PrimitiveKind, Viewport};

/// Index triples into the transformed array for the triangle topologies.
pub fn triangle_list(kind: PrimitiveKind, count: usize) -> Vec<[usize; 3]> {
    let mut out = Vec::new();
    match kind {
        PrimitiveKind::Triangles => {
            for t in 0..count / 3 {
                out.push([t * 3, t * 3 + 1, t * 3 + 2]);
            }
        }
        PrimitiveKind::TriangleStrip => {
            for i in 2..count {
                if i % 2 == 0 {
                    out.push([i - 2, i - 1, i]);
                } else {
                    out.push([i - 1, i - 2, i]);
                }
            }
        }
        PrimitiveKind::TriangleFan => {
            for i in 2..count {
                out.push([0, i - 1, i]);
            }
        }
        _ => {}
    }
    out
}

/// Index pairs for the line topologies.
pub fn line_list(kind: PrimitiveKind, count: usize) -> Vec<[usize; 2]> {
    let mut out = Vec::new();
    match kind {
        PrimitiveKind::Lines => {
            for l in 0..count / 2 {
                out.push([l * 2, l * 2 + 1]);
            }
        }
        PrimitiveKind::LineStrip => {
            for i in 1..count {
                out.push([i - 1, i]);
            }
        }
        PrimitiveKind::LineLoop => {
            for i in 1..count {
                out.push([i - 1, i]);
            }
            if count > 2 {
                out.push([count - 1, 0]);
            }
        }
        _ => {}
    }
    out
}

/// Perspective divide plus viewport transform. Window y runs top-down, so
/// NDC +y maps toward row zero.
pub fn project(v: &ClipVertex, vp: &Viewport) -> ScreenVertex {
    let w = v.position[3];
    let inv = if w != 0.0 { 1.0 / w } else { 0.0 };
    let ndc = [
        v.position[0] * inv,
        v.position[1] * inv,
        v.position[2] * inv,
    ];

    let x = (ndc[0] * 0.5 + 0.5) * vp.width as f32 + vp.x as f32;
    let y = (0.5 - ndc[1] * 0.5) * vp.height as f32 + vp.y as f32;
    let z = ndc[2] * 0.5 + 0.5;
    let z = vp.near + z * (vp.far - vp.near);

    ScreenVertex {
        position: [x, y, z.clamp(0.0, 1.0), w],
        varyings: v.varyings,
    }
}

/// A point becomes two triangles around its center.
pub fn expand_point(v: &TransformedVertex, vp: &Viewport) -> Option<[Triangle; 2]> {
    if v.position[3] <= 0.0 {
        return None;
    }
    let center = project(&ClipVertex::from(v), vp);
    let half = v.point_size.clamp(1.0, 64.0) * 0.5;

    let corner = |dx: f32, dy: f32| -> ScreenVertex {
        let mut c = center;
        c.position[0] += dx * half;
        c.position[1] += dy * half;
        c
    };

    let tl = corner(-1.0, -1.0);
    let tr = corner(1.0, -1.0);
    let bl = corner(-1.0, 1.0);
    let br = corner(1.0, 1.0);

    Some([
        Triangle {
            v0: tl,
            v1: tr,
            v2: br,
        },
        Triangle {
            v0: tl,
            v1: br,
            v2: bl,
        },
    ])
}

/// A line becomes a one-pixel-wide quad along its direction.
pub fn expand_line(
    a: &TransformedVertex,
    b: &TransformedVertex,
    vp: &Viewport,
) -> Option<[Triangle; 2]> {
    if a.position[3] <= 0.0 || b.position[3] <= 0.0 {
        return None;
    }
    let p0 = project(&ClipVertex::from(a), vp);
    let p1 = project(&ClipVertex::from(b), vp);

    let dx = p1.position[0] - p0.position[0];
    let dy = p1.position[1] - p0.position[1];
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-6 {
        return None;
    }
    // Perpendicular half-width offset.
    let nx = -dy / len * 0.5;
    let ny = dx / len * 0.5;

    let offset = |v: &ScreenVertex, s: f32| -> ScreenVertex {
        let mut out = *v;
        out.position[0] += nx * s;
        out.position[1] += ny * s;
        out
    };

    let a0 = offset(&p0, 1.0);
    let a1 = offset(&p0, -1.0);
    let b0 = offset(&p1, 1.0);
    let b1 = offset(&p1, -1.0);

    Some([
        Triangle {
            v0: a0,
            v1: b0,
            v2: b1,
        },
        Triangle {
            v0: a0,
            v1: b1,
            v2: a1,
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_alternates_winding() {
        let tris = triangle_list(PrimitiveKind::TriangleStrip, 5);
        assert_eq!(tris, vec![[0, 1, 2], [2, 1, 3], [2, 3, 4]]);
    }

    #[test]
    fn fan_pivots_on_first() {
        let tris = triangle_list(PrimitiveKind::TriangleFan, 5);
        assert_eq!(tris, vec![[0, 1, 2], [0, 2, 3], [0, 3, 4]]);
    }

    #[test]
    fn line_loop_closes() {
        let lines = line_list(PrimitiveKind::LineLoop, 3);
        assert_eq!(lines, vec![[0, 1], [1, 2], [2, 0]]);
    }

    #[test]
    fn projection_maps_ndc_corners() {
        let vp = Viewport {
            x: 0,
            y: 0,
            width: 4,
            height: 4,
            near: 0.0,
            far: 1.0,
        };
        let v = ClipVertex {
            position: [-1.0, 1.0, 0.0, 1.0],
            varyings: [[0.0; 4]; crate::data::MAX_VARYINGS],
        };
        let s = project(&v, &vp);
        // NDC (-1, +1) is the top-left window corner.
        assert_eq!(s.position[0], 0.0);
        assert_eq!(s.position[1], 0.0);
        assert_eq!(s.position[2], 0.5);
    }
}
