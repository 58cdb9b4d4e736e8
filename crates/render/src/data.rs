//! `#[repr(C)]` structures shared between the driver and the specialized
//! routines. Field offsets are taken with `offset_of!`, so layout changes
//! are picked up by the routine builders automatically.

use shale_core::Format;

pub const MAX_ATTRIBUTES: usize = 16;
pub const MAX_VARYINGS: usize = 10;
pub const MAX_SAMPLERS: usize = 16;
pub const MAX_UNIFORM_REGS: usize = 256;

/// Vertical resolution the outline table covers; primitives are clipped to
/// the render target, which never exceeds this.
pub const OUTLINE_RESOLUTION: usize = 2048;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TransformedVertex {
    /// Clip-space position straight out of the vertex shader.
    pub position: [f32; 4],
    pub point_size: f32,
    pub _pad: [f32; 3],
    /// Linked varyings, packed in fragment-shader input order.
    pub varyings: [[f32; 4]; MAX_VARYINGS],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ScreenVertex {
    /// x, y in pixels; z in [0,1]; w = clip-space w.
    pub position: [f32; 4],
    pub varyings: [[f32; 4]; MAX_VARYINGS],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Triangle {
    pub v0: ScreenVertex,
    pub v1: ScreenVertex,
    pub v2: ScreenVertex,
}

/// `v = A·x + B·y + C` in screen space.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaneEq {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub _pad: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Span {
    pub left: u16,
    pub right: u16,
}

#[repr(C)]
pub struct Primitive {
    pub y_min: i32,
    /// Exclusive.
    pub y_max: i32,
    pub area: f32,
    pub front_facing: u32,

    pub z: PlaneEq,
    pub w: PlaneEq,
    pub varyings: [[PlaneEq; 4]; MAX_VARYINGS],

    /// Two-sided stencil select masks: all-ones when the respective winding
    /// applies.
    pub clockwise_mask: i64,
    pub counter_clockwise_mask: i64,

    pub outline: [Span; OUTLINE_RESOLUTION],
}

impl Default for Primitive {
    fn default() -> Self {
        Primitive {
            y_min: 0,
            y_max: 0,
            area: 0.0,
            front_facing: 0,
            z: PlaneEq::default(),
            w: PlaneEq::default(),
            varyings: [[PlaneEq::default(); 4]; MAX_VARYINGS],
            clockwise_mask: 0,
            counter_clockwise_mask: 0,
            outline: [Span::default(); OUTLINE_RESOLUTION],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AttribStream {
    pub ptr: *const u8,
    pub stride: u32,
    pub _pad: u32,
}

impl Default for AttribStream {
    fn default() -> Self {
        AttribStream {
            ptr: std::ptr::null(),
            stride: 0,
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct SamplerData {
    /// RGBA8 texels.
    pub data: *const u8,
    pub width: i32,
    pub height: i32,
    /// 0 = nearest, 1 = linear.
    pub filter: u32,
    pub _pad: u32,
}

impl Default for SamplerData {
    fn default() -> Self {
        SamplerData {
            data: std::ptr::null(),
            width: 0,
            height: 0,
            filter: 0,
            _pad: 0,
        }
    }
}

/// Per-draw state block read by the routines.
#[repr(C)]
pub struct DrawData {
    pub vs_uniforms: [[f32; 4]; MAX_UNIFORM_REGS],
    pub ps_uniforms: [[f32; 4]; MAX_UNIFORM_REGS],
    pub attributes: [AttribStream; MAX_ATTRIBUTES],
    pub samplers: [SamplerData; MAX_SAMPLERS],
    pub blend_constant: [f32; 4],
    /// Scissor-clamped pixel bounds: left, top, right, bottom.
    pub clip: [i32; 4],
    pub stencil_front_ref: u32,
    pub stencil_back_ref: u32,
    pub polygon_offset: [f32; 2],
}

impl Default for DrawData {
    fn default() -> Self {
        DrawData {
            vs_uniforms: [[0.0; 4]; MAX_UNIFORM_REGS],
            ps_uniforms: [[0.0; 4]; MAX_UNIFORM_REGS],
            attributes: [AttribStream::default(); MAX_ATTRIBUTES],
            samplers: [SamplerData::default(); MAX_SAMPLERS],
            blend_constant: [0.0; 4],
            clip: [0; 4],
            stencil_front_ref: 0,
            stencil_back_ref: 0,
            polygon_offset: [0.0; 2],
        }
    }
}

/// Raw framebuffer plane pointers. Rows are padded to an even pixel count so
/// quad stores never step outside an allocation.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FramebufferDesc {
    pub color: *mut u8,
    pub depth: *mut f32,
    pub stencil: *mut u8,
    /// In pixels, always even.
    pub pitch: i32,
    pub width: i32,
    pub height: i32,
    pub format: u32,
}

impl FramebufferDesc {
    pub fn format_enum(&self) -> Format {
        match self.format {
            1 => Format::Bgra8,
            _ => Format::Rgba8,
        }
    }
}
