use criterion::{criterion_group, criterion_main, Criterion};
use shale_render::*;

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn shaded_triangle(c: &mut Criterion) {
    let mut renderer = Renderer::new();
    let program = renderer
        .create_program(
            "attribute vec2 position;\nvarying vec2 uv;\n\
             void main() { gl_Position = vec4(position, 0.0, 1.0); uv = position * 0.5 + 0.5; }",
            "precision mediump float;\nvarying vec2 uv;\n\
             void main() {\n\
                 float r = 0.3 + 0.7 * uv.x;\n\
                 float g = uv.x * uv.y;\n\
                 gl_FragColor = vec4(r, g, 1.0 - uv.y, 1.0);\n\
             }",
        )
        .unwrap();

    const SIZE: u32 = 256;
    let mut state = PipelineState::default();
    state.viewport = Viewport {
        x: 0,
        y: 0,
        width: SIZE as i32,
        height: SIZE as i32,
        near: 0.0,
        far: 1.0,
    };
    state.attributes = vec![Some(AttributeDesc {
        ty: AttribType::F32,
        count: 2,
        normalized: false,
        stride: 8,
        offset: 0,
    })];

    let vertices = f32_bytes(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);
    let mut fb = Framebuffer::new(SIZE, SIZE, Format::Rgba8);

    c.bench_function("fullscreen_256", |b| {
        b.iter(|| {
            let mut call = DrawCall {
                program,
                framebuffer: &mut fb,
                kind: PrimitiveKind::Triangles,
                state: state.clone(),
                attributes: vec![Some(&vertices)],
                indices: None,
                vertex_count: 3,
                samplers: vec![],
            };
            renderer.draw(&mut call).unwrap();
        })
    });
}

criterion_group!(benches, shaded_triangle);
criterion_main!(benches);
