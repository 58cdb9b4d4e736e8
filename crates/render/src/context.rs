//! Rendering context: object tables, routine cache, and the draw call
//! orchestration — transform, clip, setup, strip partitioning, and quad
//! dispatch over the worker pool.

use crate::data::{
    DrawData, Primitive, SamplerData, Triangle, TransformedVertex, OUTLINE_RESOLUTION,
};
use crate::pipeline::{link, LinkedProgram, PipelineRoutines, RoutineCache};
use crate::raster::clip::{clip_triangle, ClipVertex};
use crate::raster::{assemble, Framebuffer, WorkerPool};
use bumpalo::Bump;
use shale_core::ir::ShaderKind;
use shale_core::{GlError, PipelineState, PrimitiveKind};
use shale_jit::{BackendConfig, RoutineContext};
use slotmap::{DefaultKey, SlotMap};
use tracing::{debug, warn};

/// Keep a draw call from exhausting memory: primitives beyond this are
/// skipped, which is the defined failure mode for setup allocation.
const MAX_PRIMITIVES: usize = 1 << 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(DefaultKey);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(DefaultKey);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

struct ProgramEntry {
    linked: LinkedProgram,
    vs_uniforms: Vec<[f32; 4]>,
    ps_uniforms: Vec<[f32; 4]>,
    /// Set after a specialization failure; draws become invalid-operation.
    disabled: bool,
    id: u64,
}

struct Texture {
    width: u32,
    height: u32,
    /// RGBA8, row-major, tightly packed.
    data: Vec<u8>,
    filter: TextureFilter,
}

pub struct DrawCall<'a> {
    pub program: ProgramHandle,
    pub framebuffer: &'a mut Framebuffer,
    pub kind: PrimitiveKind,
    pub state: PipelineState,
    /// Attribute stream bytes per attribute location.
    pub attributes: Vec<Option<&'a [u8]>>,
    pub indices: Option<&'a [u32]>,
    pub vertex_count: u32,
    /// Texture bound to each sampler unit.
    pub samplers: Vec<Option<TextureHandle>>,
}

pub struct Renderer {
    programs: SlotMap<DefaultKey, ProgramEntry>,
    textures: SlotMap<DefaultKey, Texture>,
    cache: RoutineCache,
    pool: WorkerPool,
    last_error: Option<GlError>,
    next_program_id: u64,
}

impl Renderer {
    pub fn new() -> Renderer {
        Renderer::with_config(WorkerPool::new(), BackendConfig::default())
    }

    pub fn with_threads(threads: usize) -> Renderer {
        Renderer::with_config(WorkerPool::with_threads(threads), BackendConfig::default())
    }

    pub fn with_config(pool: WorkerPool, config: BackendConfig) -> Renderer {
        Renderer {
            programs: SlotMap::new(),
            textures: SlotMap::new(),
            cache: RoutineCache::new(config),
            pool,
            last_error: None,
            next_program_id: 1,
        }
    }

    fn record_error(&mut self, error: GlError) -> GlError {
        if self.last_error.is_none() {
            self.last_error = Some(error);
        }
        error
    }

    /// First error since the last query, GL-style.
    pub fn take_error(&mut self) -> Option<GlError> {
        self.last_error.take()
    }

    // ── objects ──────────────────────────────────────────────────────

    /// Compile both stages and link; the error value is the combined
    /// compile/link log.
    pub fn create_program(&mut self, vs_source: &str, ps_source: &str) -> Result<ProgramHandle, String> {
        let vs = shale_glsl::compile(vs_source, ShaderKind::Vertex);
        let ps = shale_glsl::compile(ps_source, ShaderKind::Fragment);

        let (Some(vs_ir), Some(ps_ir)) = (vs.ir, ps.ir) else {
            return Err(format!("{}{}", vs.log, ps.log));
        };

        let linked = link(vs_ir, ps_ir)?;

        let vs_regs = uniform_extent(&linked.vs);
        let ps_regs = uniform_extent(&linked.ps);
        let id = self.next_program_id;
        self.next_program_id += 1;

        let key = self.programs.insert(ProgramEntry {
            linked,
            vs_uniforms: vec![[0.0; 4]; vs_regs],
            ps_uniforms: vec![[0.0; 4]; ps_regs],
            disabled: false,
            id,
        });
        Ok(ProgramHandle(key))
    }

    pub fn program_log(&self, program: ProgramHandle) -> Option<&str> {
        self.programs.get(program.0).map(|p| p.linked.log.as_str())
    }

    /// Set a uniform by name in whichever stages declare it. `values` holds
    /// the flattened components (column-major for matrices).
    pub fn set_uniform(&mut self, program: ProgramHandle, name: &str, values: &[f32]) -> bool {
        let Some(entry) = self.programs.get_mut(program.0) else {
            self.record_error(GlError::InvalidValue);
            return false;
        };

        let mut found = false;
        for (ir, storage) in [
            (&entry.linked.vs, &mut entry.vs_uniforms),
            (&entry.linked.ps, &mut entry.ps_uniforms),
        ] {
            if let Some(info) = ir.uniforms.iter().find(|u| u.name == name) {
                found = true;
                let per_reg = if info.rows > 1 {
                    info.rows as usize
                } else {
                    info.columns as usize
                };
                let regs = if info.rows > 1 {
                    info.columns.max(1) as usize * info.array_len.max(1) as usize
                } else {
                    info.array_len.max(1) as usize
                };
                let mut src = values.iter().copied();
                for r in 0..regs {
                    let slot = info.reg as usize + r;
                    if slot >= storage.len() {
                        break;
                    }
                    for c in 0..per_reg.min(4) {
                        if let Some(v) = src.next() {
                            storage[slot][c] = v;
                        }
                    }
                }
            }
        }

        if !found {
            self.record_error(GlError::InvalidOperation);
        }
        found
    }

    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        rgba: &[u8],
        filter: TextureFilter,
    ) -> Result<TextureHandle, GlError> {
        if rgba.len() != (width * height * 4) as usize {
            return Err(self.record_error(GlError::InvalidValue));
        }
        let key = self.textures.insert(Texture {
            width,
            height,
            data: rgba.to_vec(),
            filter,
        });
        Ok(TextureHandle(key))
    }

    pub fn delete_texture(&mut self, texture: TextureHandle) -> bool {
        self.textures.remove(texture.0).is_some()
    }

    pub fn delete_program(&mut self, program: ProgramHandle) -> bool {
        self.programs.remove(program.0).is_some()
    }

    /// Await rasterization quiescence. Draws dispatch synchronously, so
    /// this only exists as the ordering point the API promises.
    pub fn finish(&mut self) {}

    // ── drawing ──────────────────────────────────────────────────────

    pub fn draw(&mut self, call: &mut DrawCall) -> Result<(), GlError> {
        if call.vertex_count == 0 {
            return Ok(());
        }
        if call.state.sample_count != 1 {
            return Err(self.record_error(GlError::InvalidValue));
        }

        let (disabled, unbound_attribute, program_id) = {
            let Some(entry) = self.programs.get(call.program.0) else {
                return Err(self.record_error(GlError::InvalidOperation));
            };
            // Every attribute the program reads must be bound.
            let unbound = entry.linked.vs.attributes.iter().any(|attr| {
                !call
                    .attributes
                    .get(attr.reg as usize)
                    .map(|a| a.is_some())
                    .unwrap_or(false)
            });
            (entry.disabled, unbound, entry.id)
        };
        if disabled || unbound_attribute {
            return Err(self.record_error(GlError::InvalidOperation));
        }

        let order = call.framebuffer.order();

        let routines = {
            let entry = self.programs.get(call.program.0).unwrap();
            match self
                .cache
                .get(program_id, &entry.linked, &call.state, order)
            {
                Ok(r) => r,
                Err(err) => {
                    warn!(?err, "pipeline specialization failed; disabling program");
                    self.programs.get_mut(call.program.0).unwrap().disabled = true;
                    return Err(self.record_error(GlError::OutOfMemory));
                }
            }
        };

        let entry = self.programs.get(call.program.0).unwrap();
        let draw_data = self.build_draw_data(entry, call);
        let data_ptr = &*draw_data as *const DrawData;

        // Index stream: explicit or sequential.
        let indices: Vec<u32> = match call.indices {
            Some(idx) => idx.to_vec(),
            None => (0..call.vertex_count).collect(),
        };

        // Transform.
        let mut transformed = vec![TransformedVertex::default(); indices.len()];
        let vertex_ctx = RoutineContext::new()
            .ptr(0, indices.as_ptr())
            .ptr(1, transformed.as_mut_ptr())
            .uint(2, indices.len() as u32)
            .ptr(3, data_ptr);
        unsafe { routines.vertex.call(&vertex_ctx) };

        // Assemble, clip, and project into screen triangles.
        let triangles = self.assemble_triangles(call, &transformed);

        // Setup.
        let arena = Bump::new();
        let mut primitives: Vec<&Primitive> = Vec::new();
        let mut skipped = 0usize;

        for triangle in &triangles {
            if primitives.len() >= MAX_PRIMITIVES {
                skipped += 1;
                continue;
            }
            let primitive = arena.alloc(Primitive::default());
            let ctx = RoutineContext::new()
                .ptr(0, triangle as *const Triangle)
                .ptr(1, primitive as *mut Primitive)
                .ptr(2, data_ptr);
            let accepted = unsafe { routines.setup.call(&ctx) } != 0;
            if accepted {
                primitives.push(primitive);
            }
        }
        if skipped > 0 {
            warn!(skipped, "primitive setup overflow; primitives skipped");
        }

        if !primitives.is_empty() {
            self.dispatch(&routines, &primitives, call.framebuffer, data_ptr);
        }

        debug!(
            triangles = triangles.len(),
            primitives = primitives.len(),
            "draw complete"
        );
        Ok(())
    }

    fn assemble_triangles(
        &self,
        call: &DrawCall,
        transformed: &[TransformedVertex],
    ) -> Vec<Triangle> {
        let vp = &call.state.viewport;
        let count = transformed.len();
        let mut out = Vec::new();

        match call.kind {
            PrimitiveKind::Triangles | PrimitiveKind::TriangleStrip | PrimitiveKind::TriangleFan => {
                for tri in assemble::triangle_list(call.kind, count) {
                    let polygon = clip_triangle([
                        ClipVertex::from(&transformed[tri[0]]),
                        ClipVertex::from(&transformed[tri[1]]),
                        ClipVertex::from(&transformed[tri[2]]),
                    ]);
                    // Fan-triangulate the clipped polygon.
                    for i in 1..polygon.len().saturating_sub(1) {
                        out.push(Triangle {
                            v0: assemble::project(&polygon[0], vp),
                            v1: assemble::project(&polygon[i], vp),
                            v2: assemble::project(&polygon[i + 1], vp),
                        });
                    }
                }
            }
            PrimitiveKind::Points => {
                for v in transformed {
                    if let Some(pair) = assemble::expand_point(v, vp) {
                        out.extend(pair);
                    }
                }
            }
            PrimitiveKind::Lines | PrimitiveKind::LineStrip | PrimitiveKind::LineLoop => {
                for line in assemble::line_list(call.kind, count) {
                    if let Some(pair) =
                        assemble::expand_line(&transformed[line[0]], &transformed[line[1]], vp)
                    {
                        out.extend(pair);
                    }
                }
            }
        }

        out
    }

    fn dispatch(
        &self,
        routines: &PipelineRoutines,
        primitives: &[&Primitive],
        framebuffer: &mut Framebuffer,
        data: *const DrawData,
    ) {
        let desc = framebuffer.desc();
        let desc_ptr = &desc as *const _;

        // Horizontal bands, even-aligned so quads never straddle two bands.
        // Each band walks every primitive in submission order, which is what
        // keeps overlapping primitives ordered.
        let height = (framebuffer.height() as usize).min(OUTLINE_RESOLUTION);
        let band_rows = ((height / (self.pool.thread_count() * 2).max(1)).max(8) + 1) & !1;
        let bands: Vec<(i32, i32)> = (0..height.div_ceil(band_rows))
            .map(|b| {
                let y0 = b * band_rows;
                (y0 as i32, ((y0 + band_rows).min(height)) as i32)
            })
            .collect();

        struct SharedRefs {
            desc: *const FramebufferDescOpaque,
            data: *const DrawData,
        }
        // Erase the type so the pointer wrapper stays local.
        type FramebufferDescOpaque = crate::data::FramebufferDesc;
        unsafe impl Send for SharedRefs {}
        unsafe impl Sync for SharedRefs {}
        let shared = SharedRefs {
            desc: desc_ptr,
            data,
        };

        let pixel = &routines.pixel;
        self.pool.execute(&bands, |&(band_y0, band_y1), _thread| {
            // Force capture of the whole `shared` value (which has a manual
            // Sync impl) rather than its individual raw-pointer fields,
            // which edition-2021 disjoint closure capture would otherwise
            // capture directly and which are not themselves Sync.
            let shared = &shared;
            for primitive in primitives {
                let y0 = primitive.y_min.max(band_y0);
                let y1 = primitive.y_max.min(band_y1);
                if y0 >= y1 {
                    continue;
                }
                let packed = (y0 as u32 & 0xffff) | ((y1 as u32) << 16);
                let ctx = RoutineContext::new()
                    .ptr(0, *primitive as *const Primitive)
                    .uint(1, packed)
                    .ptr(2, shared.desc)
                    .ptr(3, shared.data);
                unsafe { pixel.call(&ctx) };
            }
        });
    }

    fn build_draw_data(&self, entry: &ProgramEntry, call: &DrawCall) -> Box<DrawData> {
        let mut data = Box::new(DrawData::default());

        for (i, reg) in entry.vs_uniforms.iter().enumerate() {
            if i < data.vs_uniforms.len() {
                data.vs_uniforms[i] = *reg;
            }
        }
        for (i, reg) in entry.ps_uniforms.iter().enumerate() {
            if i < data.ps_uniforms.len() {
                data.ps_uniforms[i] = *reg;
            }
        }

        for (slot, stream) in call.attributes.iter().enumerate() {
            if slot >= data.attributes.len() {
                break;
            }
            if let Some(bytes) = stream {
                let desc = call
                    .state
                    .attributes
                    .get(slot)
                    .copied()
                    .flatten()
                    .unwrap_or_default();
                data.attributes[slot].ptr = unsafe { bytes.as_ptr().add(desc.offset as usize) };
                data.attributes[slot].stride = desc.stride;
            }
        }

        for (unit, bound) in call.samplers.iter().enumerate() {
            if unit >= data.samplers.len() {
                break;
            }
            if let Some(texture) = bound.and_then(|t| self.textures.get(t.0)) {
                data.samplers[unit] = SamplerData {
                    data: texture.data.as_ptr(),
                    width: texture.width as i32,
                    height: texture.height as i32,
                    filter: match texture.filter {
                        TextureFilter::Nearest => 0,
                        TextureFilter::Linear => 1,
                    },
                    _pad: 0,
                };
            }
        }

        data.blend_constant = call.state.blend.constant;

        let fb_w = call.framebuffer.width() as i32;
        let fb_h = call.framebuffer.height() as i32;
        let (mut left, mut top, mut right, mut bottom) = (0, 0, fb_w, fb_h);
        if let Some(scissor) = call.state.scissor {
            left = left.max(scissor.left);
            top = top.max(scissor.top);
            right = right.min(scissor.right);
            bottom = bottom.min(scissor.bottom);
        }
        data.clip = [left, top, right, bottom.min(OUTLINE_RESOLUTION as i32)];

        data.stencil_front_ref = call.state.stencil.front.reference as u32;
        data.stencil_back_ref = call.state.stencil.back.reference as u32;
        if let Some((factor, units)) = call.state.polygon_offset {
            data.polygon_offset = [factor, units];
        }

        data
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Renderer::new()
    }
}

fn uniform_extent(ir: &shale_core::ir::ShaderIr) -> usize {
    ir.uniforms
        .iter()
        .map(|u| (u.reg + u.columns.max(1) as u32 * u.array_len.max(1)) as usize)
        .max()
        .unwrap_or(0)
        .max(1)
}
