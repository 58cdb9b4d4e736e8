use shale_render::*;

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn state_with_xy(width: u32, height: u32) -> PipelineState {
    let mut state = PipelineState::default();
    state.viewport = Viewport {
        x: 0,
        y: 0,
        width: width as i32,
        height: height as i32,
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
    state
}

fn flat_program(renderer: &mut Renderer) -> ProgramHandle {
    renderer
        .create_program(
            "attribute vec2 position;\nvoid main() { gl_Position = vec4(position, 0.0, 1.0); }",
            "void main() { gl_FragColor = vec4(0, 0, 0, 1); }",
        )
        .expect("program compiles")
}

#[test]
fn fullscreen_triangle_paints_one_pixel_black() {
    let mut renderer = Renderer::with_threads(1);
    let program = flat_program(&mut renderer);

    let mut fb = Framebuffer::new(1, 1, Format::Rgba8);
    fb.clear_color(1.0, 1.0, 1.0, 0.0);

    let vertices = f32_bytes(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);
    let mut call = DrawCall {
        program,
        framebuffer: &mut fb,
        kind: PrimitiveKind::Triangles,
        state: state_with_xy(1, 1),
        attributes: vec![Some(&vertices)],
        indices: None,
        vertex_count: 3,
        samplers: vec![],
    };
    renderer.draw(&mut call).unwrap();

    assert_eq!(fb.read_pixel(0, 0), 0x000000ff);
}

#[test]
fn small_triangle_covers_exact_pixels() {
    let mut renderer = Renderer::with_threads(1);
    let program = renderer
        .create_program(
            "attribute vec2 position;\nvoid main() { gl_Position = vec4(position, 0.0, 1.0); }",
            "void main() { gl_FragColor = vec4(1, 0, 0, 1); }",
        )
        .unwrap();

    let mut fb = Framebuffer::new(4, 4, Format::Rgba8);
    fb.clear_color(0.0, 0.0, 0.0, 1.0);

    // Screen coordinates (0,0), (2,0), (0,2) expressed in clip space for a
    // 4×4 viewport.
    let to_ndc = |x: f32, y: f32| [x / 2.0 - 1.0, 1.0 - y / 2.0];
    let p0 = to_ndc(0.0, 0.0);
    let p1 = to_ndc(2.0, 0.0);
    let p2 = to_ndc(0.0, 2.0);
    let vertices = f32_bytes(&[p0[0], p0[1], p1[0], p1[1], p2[0], p2[1]]);

    let mut call = DrawCall {
        program,
        framebuffer: &mut fb,
        kind: PrimitiveKind::Triangles,
        state: state_with_xy(4, 4),
        attributes: vec![Some(&vertices)],
        indices: None,
        vertex_count: 3,
        samplers: vec![],
    };
    renderer.draw(&mut call).unwrap();

    let red = 0xff0000ff;
    let mut covered = Vec::new();
    for y in 0..4 {
        for x in 0..4 {
            if fb.read_pixel(x, y) == red {
                covered.push((x, y));
            }
        }
    }
    assert_eq!(covered, vec![(0, 0), (1, 0), (0, 1)]);
}

#[test]
fn coverage_matches_edge_function_reference() {
    let mut renderer = Renderer::with_threads(2);
    let program = renderer
        .create_program(
            "attribute vec2 position;\nvoid main() { gl_Position = vec4(position, 0.0, 1.0); }",
            "void main() { gl_FragColor = vec4(1, 1, 1, 1); }",
        )
        .unwrap();

    const SIZE: u32 = 16;
    // A fixed pseudo-random triangle set; the outline rasterization and a
    // direct pixel-center test must agree on every pixel.
    let triangles: [[f32; 6]; 4] = [
        [1.2, 1.7, 13.4, 2.1, 6.0, 14.8],
        [0.0, 0.0, 15.9, 0.4, 3.2, 15.5],
        [8.1, 1.1, 14.7, 9.9, 1.5, 12.3],
        [2.0, 2.0, 6.0, 2.0, 2.0, 6.0],
    ];

    for tri in triangles {
        let mut fb = Framebuffer::new(SIZE, SIZE, Format::Rgba8);
        fb.clear_color(0.0, 0.0, 0.0, 0.0);

        let to_ndc = |x: f32, y: f32| {
            [
                x / (SIZE as f32 / 2.0) - 1.0,
                1.0 - y / (SIZE as f32 / 2.0),
            ]
        };
        let p: Vec<[f32; 2]> = (0..3).map(|i| to_ndc(tri[i * 2], tri[i * 2 + 1])).collect();
        let vertices = f32_bytes(&[p[0][0], p[0][1], p[1][0], p[1][1], p[2][0], p[2][1]]);

        let mut call = DrawCall {
            program,
            framebuffer: &mut fb,
            kind: PrimitiveKind::Triangles,
            state: state_with_xy(SIZE, SIZE),
            attributes: vec![Some(&vertices)],
            indices: None,
            vertex_count: 3,
            samplers: vec![],
        };
        renderer.draw(&mut call).unwrap();

        // Inclusive pixel-center coverage, matching the outline fill rule.
        let inside = |px: f32, py: f32| {
            let (x0, y0, x1, y1, x2, y2) = (tri[0], tri[1], tri[2], tri[3], tri[4], tri[5]);
            let det = (x1 - x0) * (y2 - y0) - (x2 - x0) * (y1 - y0);
            if det == 0.0 {
                return false;
            }
            // Scanline span between boundary crossings.
            let edges = [(0, 1), (1, 2), (2, 0)];
            let xs: Vec<f32> = edges
                .iter()
                .filter_map(|&(a, b)| {
                    let (ax, ay) = (tri[a * 2], tri[a * 2 + 1]);
                    let (bx, by) = (tri[b * 2], tri[b * 2 + 1]);
                    if (ay <= py) != (by <= py) {
                        Some(ax + (py - ay) / (by - ay) * (bx - ax))
                    } else {
                        None
                    }
                })
                .collect();
            if xs.len() < 2 {
                return false;
            }
            let left = xs.iter().cloned().fold(f32::MAX, f32::min);
            let right = xs.iter().cloned().fold(f32::MIN, f32::max);
            px >= left && px <= right
        };

        let mut rendered = 0;
        let mut expected = 0;
        for y in 0..SIZE {
            for x in 0..SIZE {
                let drawn = fb.read_pixel(x, y) == 0xffffffff;
                let reference = inside(x as f32 + 0.5, y as f32 + 0.5);
                if drawn {
                    rendered += 1;
                }
                if reference {
                    expected += 1;
                }
                assert_eq!(drawn, reference, "pixel ({x},{y}) of {tri:?}");
            }
        }
        assert_eq!(rendered, expected);
    }
}

#[test]
fn varyings_interpolate_across_the_triangle() {
    let mut renderer = Renderer::with_threads(1);
    let program = renderer
        .create_program(
            "attribute vec2 position;\nvarying vec2 uv;\n\
             void main() { gl_Position = vec4(position, 0.0, 1.0); uv = position * 0.5 + 0.5; }",
            "precision mediump float;\nvarying vec2 uv;\n\
             void main() { gl_FragColor = vec4(uv, 0.0, 1.0); }",
        )
        .unwrap();

    const SIZE: u32 = 8;
    let mut fb = Framebuffer::new(SIZE, SIZE, Format::Rgba8);
    fb.clear_color(0.0, 0.0, 0.0, 1.0);

    let vertices = f32_bytes(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);
    let mut call = DrawCall {
        program,
        framebuffer: &mut fb,
        kind: PrimitiveKind::Triangles,
        state: state_with_xy(SIZE, SIZE),
        attributes: vec![Some(&vertices)],
        indices: None,
        vertex_count: 3,
        samplers: vec![],
    };
    renderer.draw(&mut call).unwrap();

    // u grows with x; v shrinks with window y (NDC y points up).
    let left = fb.read_pixel(0, 4) >> 24;
    let right = fb.read_pixel(7, 4) >> 24;
    assert!(right > left + 100, "u: {left} → {right}");

    let top = fb.read_pixel(4, 0) >> 16 & 0xff;
    let bottom = fb.read_pixel(4, 7) >> 16 & 0xff;
    assert!(top > bottom + 100, "v: {bottom} → {top}");
}

#[test]
fn uniforms_feed_the_fragment_stage() {
    let mut renderer = Renderer::with_threads(1);
    let program = renderer
        .create_program(
            "attribute vec2 position;\nvoid main() { gl_Position = vec4(position, 0.0, 1.0); }",
            "precision mediump float;\nuniform vec4 tint;\nvoid main() { gl_FragColor = tint; }",
        )
        .unwrap();
    assert!(renderer.set_uniform(program, "tint", &[0.0, 1.0, 0.0, 1.0]));

    let mut fb = Framebuffer::new(2, 2, Format::Rgba8);
    fb.clear_color(0.0, 0.0, 0.0, 0.0);

    let vertices = f32_bytes(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);
    let mut call = DrawCall {
        program,
        framebuffer: &mut fb,
        kind: PrimitiveKind::Triangles,
        state: state_with_xy(2, 2),
        attributes: vec![Some(&vertices)],
        indices: None,
        vertex_count: 3,
        samplers: vec![],
    };
    renderer.draw(&mut call).unwrap();

    assert_eq!(fb.read_pixel(0, 0), 0x00ff00ff);
    assert_eq!(fb.read_pixel(1, 1), 0x00ff00ff);
}

#[test]
fn texture_sampling_nearest() {
    let mut renderer = Renderer::with_threads(1);
    let program = renderer
        .create_program(
            "attribute vec2 position;\nvarying vec2 uv;\n\
             void main() { gl_Position = vec4(position, 0.0, 1.0); uv = position * 0.5 + 0.5; }",
            "precision mediump float;\nvarying vec2 uv;\nuniform sampler2D image;\n\
             void main() { gl_FragColor = texture2D(image, uv); }",
        )
        .unwrap();

    // 2×2: red, green / blue, white.
    let texels: Vec<u8> = vec![
        255, 0, 0, 255, 0, 255, 0, 255, //
        0, 0, 255, 255, 255, 255, 255, 255,
    ];
    let texture = renderer
        .create_texture(2, 2, &texels, TextureFilter::Nearest)
        .unwrap();

    const SIZE: u32 = 8;
    let mut fb = Framebuffer::new(SIZE, SIZE, Format::Rgba8);
    fb.clear_color(0.0, 0.0, 0.0, 0.0);

    let vertices = f32_bytes(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);
    let mut call = DrawCall {
        program,
        framebuffer: &mut fb,
        kind: PrimitiveKind::Triangles,
        state: state_with_xy(SIZE, SIZE),
        attributes: vec![Some(&vertices)],
        indices: None,
        vertex_count: 3,
        samplers: vec![Some(texture)],
    };
    renderer.draw(&mut call).unwrap();

    // v=0 is the bottom of the window: texel row 0 lands there.
    assert_eq!(fb.read_pixel(1, 6), 0xff0000ff, "bottom-left quadrant");
    assert_eq!(fb.read_pixel(6, 6), 0x00ff00ff, "bottom-right quadrant");
    assert_eq!(fb.read_pixel(1, 1), 0x0000ffff, "top-left quadrant");
    assert_eq!(fb.read_pixel(6, 1), 0xffffffff, "top-right quadrant");
}

#[test]
fn depth_test_keeps_the_nearer_triangle() {
    let mut renderer = Renderer::with_threads(1);
    let program = renderer
        .create_program(
            "attribute vec2 position;\nuniform float layer;\nuniform vec4 color;\n\
             void main() { gl_Position = vec4(position, layer, 1.0); }",
            "precision mediump float;\nuniform vec4 color;\nvoid main() { gl_FragColor = color; }",
        )
        .unwrap();

    let mut fb = Framebuffer::new(4, 4, Format::Rgba8);
    fb.clear_color(0.0, 0.0, 0.0, 1.0);
    fb.clear_depth(1.0);

    let mut state = state_with_xy(4, 4);
    state.depth.test = true;
    state.depth.write = true;
    state.depth.func = CompareFunc::Less;

    let vertices = f32_bytes(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);

    // Far red triangle first.
    renderer.set_uniform(program, "layer", &[0.5]);
    renderer.set_uniform(program, "color", &[1.0, 0.0, 0.0, 1.0]);
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

    // Nearer green triangle wins.
    renderer.set_uniform(program, "layer", &[-0.5]);
    renderer.set_uniform(program, "color", &[0.0, 1.0, 0.0, 1.0]);
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

    // A farther blue triangle loses.
    renderer.set_uniform(program, "layer", &[0.8]);
    renderer.set_uniform(program, "color", &[0.0, 0.0, 1.0, 1.0]);
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

    assert_eq!(fb.read_pixel(1, 1), 0x00ff00ff);
}

#[test]
fn additive_blending_accumulates() {
    let mut renderer = Renderer::with_threads(1);
    let program = renderer
        .create_program(
            "attribute vec2 position;\nvoid main() { gl_Position = vec4(position, 0.0, 1.0); }",
            "precision mediump float;\nvoid main() { gl_FragColor = vec4(0.25, 0.0, 0.0, 1.0); }",
        )
        .unwrap();

    let mut fb = Framebuffer::new(2, 2, Format::Rgba8);
    fb.clear_color(0.0, 0.0, 0.0, 1.0);

    let mut state = state_with_xy(2, 2);
    state.blend.enabled = true;
    state.blend.src_color = BlendFactor::One;
    state.blend.dst_color = BlendFactor::One;
    state.blend.src_alpha = BlendFactor::One;
    state.blend.dst_alpha = BlendFactor::Zero;

    let vertices = f32_bytes(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);
    for _ in 0..2 {
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
    }

    let red = fb.read_pixel(0, 0) >> 24;
    assert!((127..=129).contains(&red), "red accumulated to {red}");
}

#[test]
fn culling_rejects_back_faces() {
    let mut renderer = Renderer::with_threads(1);
    let program = flat_program(&mut renderer);

    let mut fb = Framebuffer::new(2, 2, Format::Rgba8);
    fb.clear_color(1.0, 1.0, 1.0, 1.0);

    let mut state = state_with_xy(2, 2);
    state.cull = CullMode::Back;
    state.front_face = FrontFace::Ccw;

    // This winding is clockwise on screen, i.e. a back face under CCW.
    let vertices = f32_bytes(&[-1.0, -1.0, -1.0, 3.0, 3.0, -1.0]);
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
    assert_eq!(fb.read_pixel(0, 0), 0xffffffff, "back face must be culled");

    // Flip the winding; now it draws.
    let vertices = f32_bytes(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);
    let mut call = DrawCall {
        program,
        framebuffer: &mut fb,
        kind: PrimitiveKind::Triangles,
        state,
        attributes: vec![Some(&vertices)],
        indices: None,
        vertex_count: 3,
        samplers: vec![],
    };
    renderer.draw(&mut call).unwrap();
    assert_eq!(fb.read_pixel(0, 0), 0x000000ff);
}

#[test]
fn discard_leaves_pixels_untouched() {
    let mut renderer = Renderer::with_threads(1);
    let program = renderer
        .create_program(
            "attribute vec2 position;\nvarying vec2 uv;\n\
             void main() { gl_Position = vec4(position, 0.0, 1.0); uv = position; }",
            "precision mediump float;\nvarying vec2 uv;\n\
             void main() { if (uv.x > 0.0) discard; gl_FragColor = vec4(1, 0, 0, 1); }",
        )
        .unwrap();

    const SIZE: u32 = 8;
    let mut fb = Framebuffer::new(SIZE, SIZE, Format::Rgba8);
    fb.clear_color(0.0, 0.0, 0.0, 1.0);

    let vertices = f32_bytes(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);
    let mut call = DrawCall {
        program,
        framebuffer: &mut fb,
        kind: PrimitiveKind::Triangles,
        state: state_with_xy(SIZE, SIZE),
        attributes: vec![Some(&vertices)],
        indices: None,
        vertex_count: 3,
        samplers: vec![],
    };
    renderer.draw(&mut call).unwrap();

    assert_eq!(fb.read_pixel(1, 4), 0xff0000ff, "left half drawn");
    assert_eq!(fb.read_pixel(6, 4), 0x000000ff, "right half discarded");
}

#[test]
fn scissor_clamps_rasterization() {
    let mut renderer = Renderer::with_threads(1);
    let program = flat_program(&mut renderer);

    let mut fb = Framebuffer::new(4, 4, Format::Rgba8);
    fb.clear_color(1.0, 1.0, 1.0, 1.0);

    let mut state = state_with_xy(4, 4);
    state.scissor = Some(Rect::new(1, 1, 3, 3));

    let vertices = f32_bytes(&[-1.0, -1.0, 3.0, -1.0, -1.0, 3.0]);
    let mut call = DrawCall {
        program,
        framebuffer: &mut fb,
        kind: PrimitiveKind::Triangles,
        state,
        attributes: vec![Some(&vertices)],
        indices: None,
        vertex_count: 3,
        samplers: vec![],
    };
    renderer.draw(&mut call).unwrap();

    assert_eq!(fb.read_pixel(0, 0), 0xffffffff);
    assert_eq!(fb.read_pixel(1, 1), 0x000000ff);
    assert_eq!(fb.read_pixel(2, 2), 0x000000ff);
    assert_eq!(fb.read_pixel(3, 3), 0xffffffff);
}

#[test]
fn missing_attribute_is_invalid_operation() {
    let mut renderer = Renderer::with_threads(1);
    let program = flat_program(&mut renderer);

    let mut fb = Framebuffer::new(2, 2, Format::Rgba8);
    let mut call = DrawCall {
        program,
        framebuffer: &mut fb,
        kind: PrimitiveKind::Triangles,
        state: state_with_xy(2, 2),
        attributes: vec![None],
        indices: None,
        vertex_count: 3,
        samplers: vec![],
    };
    assert_eq!(renderer.draw(&mut call), Err(GlError::InvalidOperation));
    assert_eq!(renderer.take_error(), Some(GlError::InvalidOperation));
    assert_eq!(renderer.take_error(), None);
}

#[test]
fn bad_shader_reports_a_log() {
    let mut renderer = Renderer::new();
    let result = renderer.create_program(
        "void main() { gl_Position = missing; }",
        "void main() { gl_FragColor = vec4(1); }",
    );
    let log = result.err().expect("compilation must fail");
    assert!(log.contains("ERROR"), "log: {log}");
}
