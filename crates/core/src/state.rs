use crate::Rect;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Primitive topology of a draw call.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum PrimitiveKind {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    Incr,
    Decr,
    Invert,
    IncrWrap,
    DecrWrap,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum FrontFace {
    Ccw,
    Cw,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub func: CompareFunc,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test: false,
            write: true,
            func: CompareFunc::Less,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct StencilFace {
    pub func: CompareFunc,
    pub reference: u8,
    pub compare_mask: u8,
    pub write_mask: u8,
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
}

impl Default for StencilFace {
    fn default() -> Self {
        Self {
            func: CompareFunc::Always,
            reference: 0,
            compare_mask: 0xff,
            write_mask: 0xff,
            fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
            pass: StencilOp::Keep,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Default)]
pub struct StencilState {
    pub enabled: bool,
    pub front: StencilFace,
    pub back: StencilFace,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendState {
    pub enabled: bool,
    pub color_equation: BlendEquation,
    pub alpha_equation: BlendEquation,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub constant: [f32; 4],
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enabled: false,
            color_equation: BlendEquation::Add,
            alpha_equation: BlendEquation::Add,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            constant: [0.0; 4],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub near: f32,
    pub far: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            near: 0.0,
            far: 1.0,
        }
    }
}

/// Component type of a vertex attribute stream.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum AttribType {
    F32,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
}

impl AttribType {
    pub fn size(self) -> usize {
        match self {
            AttribType::I8 | AttribType::U8 => 1,
            AttribType::I16 | AttribType::U16 => 2,
            AttribType::F32 | AttribType::I32 | AttribType::U32 => 4,
        }
    }
}

/// Fetch descriptor for one vertex attribute stream.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct AttributeDesc {
    pub ty: AttribType,
    pub count: u8,
    pub normalized: bool,
    pub stride: u32,
    pub offset: u32,
}

impl Default for AttributeDesc {
    fn default() -> Self {
        Self {
            ty: AttribType::F32,
            count: 4,
            normalized: false,
            stride: 16,
            offset: 0,
        }
    }
}

/// The full fixed-function state vector a draw call is specialized against.
/// Routine caches key on `cache_key()`, so every field that changes generated
/// code must feed the hash.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineState {
    pub cull: CullMode,
    pub front_face: FrontFace,
    pub depth: DepthState,
    pub stencil: StencilState,
    pub blend: BlendState,
    pub color_write_mask: u8,
    /// Legacy alpha test: reject fragments whose alpha fails the compare.
    pub alpha_test: Option<(CompareFunc, f32)>,
    pub alpha_to_coverage: bool,
    pub sample_count: u8,
    pub scissor: Option<Rect>,
    pub viewport: Viewport,
    pub polygon_offset: Option<(f32, f32)>,
    pub attributes: Vec<Option<AttributeDesc>>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            cull: CullMode::None,
            front_face: FrontFace::Ccw,
            depth: DepthState::default(),
            stencil: StencilState::default(),
            blend: BlendState::default(),
            color_write_mask: 0xf,
            alpha_test: None,
            alpha_to_coverage: false,
            sample_count: 1,
            scissor: None,
            viewport: Viewport::default(),
            polygon_offset: None,
            attributes: Vec::new(),
        }
    }
}

impl PipelineState {
    /// Hash of every field that influences specialized code. Floats hash by
    /// bit pattern, so -0.0 and 0.0 key differently; that only costs a cache
    /// entry, never correctness.
    pub fn cache_key(&self) -> u64 {
        let mut h = FxHasher::default();
        self.cull.hash(&mut h);
        self.front_face.hash(&mut h);
        self.depth.hash(&mut h);
        self.stencil.hash(&mut h);
        self.blend.enabled.hash(&mut h);
        self.blend.color_equation.hash(&mut h);
        self.blend.alpha_equation.hash(&mut h);
        self.blend.src_color.hash(&mut h);
        self.blend.dst_color.hash(&mut h);
        self.blend.src_alpha.hash(&mut h);
        self.blend.dst_alpha.hash(&mut h);
        for c in self.blend.constant {
            c.to_bits().hash(&mut h);
        }
        self.color_write_mask.hash(&mut h);
        if let Some((func, reference)) = self.alpha_test {
            func.hash(&mut h);
            reference.to_bits().hash(&mut h);
        }
        self.alpha_to_coverage.hash(&mut h);
        self.sample_count.hash(&mut h);
        self.scissor.hash(&mut h);
        self.polygon_offset.is_some().hash(&mut h);
        for attr in &self.attributes {
            attr.hash(&mut h);
        }
        h.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_tracks_state() {
        let a = PipelineState::default();
        let mut b = a.clone();
        assert_eq!(a.cache_key(), b.cache_key());

        b.depth.test = true;
        assert_ne!(a.cache_key(), b.cache_key());

        b = a.clone();
        b.blend.src_color = BlendFactor::SrcAlpha;
        assert_ne!(a.cache_key(), b.cache_key());
    }
}
