//! Render target storage: color, depth, and stencil planes.
//!
//! Rows are padded to an even pixel count and one spare row is kept past the
//! bottom so 2×2 quad accesses never leave the allocation; the masked
//! writeback makes the padding contents irrelevant.

use crate::data::FramebufferDesc;
use shale_core::{Format, VisualOrder};

pub struct Framebuffer {
    width: u32,
    height: u32,
    pitch: u32,
    format: Format,
    order: VisualOrder,
    color: Vec<u32>,
    depth: Vec<f32>,
    stencil: Vec<u8>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32, format: Format) -> Framebuffer {
        let pitch = (width + 1) & !1;
        let pixels = (pitch * (height + 1)) as usize;
        Framebuffer {
            width,
            height,
            pitch,
            format,
            order: VisualOrder::of(format),
            color: vec![0; pixels],
            depth: vec![1.0; pixels],
            stencil: vec![0; pixels],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn order(&self) -> VisualOrder {
        self.order
    }

    pub fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        let packed = self.pack(r, g, b, a);
        self.color.fill(packed);
    }

    pub fn clear_depth(&mut self, depth: f32) {
        self.depth.fill(depth.clamp(0.0, 1.0));
    }

    pub fn clear_stencil(&mut self, value: u8) {
        self.stencil.fill(value);
    }

    fn pack(&self, r: f32, g: f32, b: f32, a: f32) -> u32 {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round_ties_even() as u32;
        match self.order {
            VisualOrder::Rgb => q(r) | q(g) << 8 | q(b) << 16 | q(a) << 24,
            VisualOrder::Bgra => q(b) | q(g) << 8 | q(r) << 16 | q(a) << 24,
        }
    }

    /// Pixel value in canonical `0xRRGGBBAA` form regardless of the stored
    /// component order.
    pub fn read_pixel(&self, x: u32, y: u32) -> u32 {
        assert!(x < self.width && y < self.height);
        let raw = self.color[(y * self.pitch + x) as usize];
        let (r, g, b, a) = match self.order {
            VisualOrder::Rgb => (raw & 0xff, raw >> 8 & 0xff, raw >> 16 & 0xff, raw >> 24),
            VisualOrder::Bgra => (raw >> 16 & 0xff, raw >> 8 & 0xff, raw & 0xff, raw >> 24),
        };
        r << 24 | g << 16 | b << 8 | a
    }

    pub fn read_depth(&self, x: u32, y: u32) -> f32 {
        self.depth[(y * self.pitch + x) as usize]
    }

    pub fn read_stencil(&self, x: u32, y: u32) -> u8 {
        self.stencil[(y * self.pitch + x) as usize]
    }

    pub fn desc(&mut self) -> FramebufferDesc {
        FramebufferDesc {
            color: self.color.as_mut_ptr() as *mut u8,
            depth: self.depth.as_mut_ptr(),
            stencil: self.stencil.as_mut_ptr(),
            pitch: self.pitch as i32,
            width: self.width as i32,
            height: self.height as i32,
            format: match self.order {
                VisualOrder::Rgb => 0,
                VisualOrder::Bgra => 1,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_and_read_back() {
        let mut fb = Framebuffer::new(3, 2, Format::Rgba8);
        fb.clear_color(0.0, 0.0, 0.0, 1.0);
        assert_eq!(fb.read_pixel(0, 0), 0x000000ff);
        fb.clear_color(1.0, 0.5, 0.0, 1.0);
        assert_eq!(fb.read_pixel(2, 1), 0xff8000ff);
    }

    #[test]
    fn bgra_reads_canonical() {
        let mut fb = Framebuffer::new(1, 1, Format::Bgra8);
        fb.clear_color(1.0, 0.0, 0.0, 1.0);
        assert_eq!(fb.read_pixel(0, 0), 0xff0000ff);
    }
}
