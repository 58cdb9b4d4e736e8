//! Software rasterization: pipeline specialization over the shader IR and
//! the draw-call driver.
//!
//! A draw call flows through two paths. The specialization path compiles the
//! bound program and state vector into three routines — vertex, setup, and
//! pixel — through the code generator, caching them per state key. The
//! execution path assembles primitives, clips, runs setup per triangle, and
//! fans scanline bands out across the worker pool, where the pixel routine
//! rasterizes 2×2 quads against the framebuffer.

mod context;

pub mod data;
pub mod pipeline;
pub mod raster;

pub use context::{DrawCall, ProgramHandle, Renderer, TextureFilter, TextureHandle};
pub use raster::Framebuffer;

pub use shale_core::{
    AttribType, AttributeDesc, BlendEquation, BlendFactor, CompareFunc, CullMode, DepthState,
    Format, FrontFace, GlError, PipelineState, PrimitiveKind, Rect, StencilFace, StencilOp,
    StencilState, Viewport, VisualOrder,
};
