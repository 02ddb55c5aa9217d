//! Synthetic scene renderer.
//!
//! Draws a scrolling BGRA gradient with a moving vertical bar into a
//! render target, one step per frame. Stands in for a real 3D scene so
//! the capture pipeline has changing content to stream.

use streamkit_core::capture::{GpuTexture, PixelFormat, SoftwareTexture, TextureDesc};

/// Pixels the bar advances per frame.
const BAR_SPEED: u32 = 4;
const BAR_WIDTH: u32 = 16;

/// Animated test pattern.
#[derive(Debug, Default)]
pub struct TestPattern {
    frame: u64,
}

impl TestPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Draw the next frame into `target`.
    pub fn render(&mut self, target: &SoftwareTexture) {
        let desc = target.desc();
        let frame = self.frame;
        target.with_pixels_mut(|pixels| draw(pixels, desc, frame));
        self.frame += 1;
    }
}

fn draw(pixels: &mut [u8], desc: TextureDesc, frame: u64) {
    let width = desc.width.max(1);
    let bar_x = ((frame * u64::from(BAR_SPEED)) % u64::from(width)) as u32;
    let shift = (frame % 256) as u8;
    let row_bytes = desc.row_bytes();
    let bpp = desc.format.bytes_per_pixel();
    if row_bytes == 0 {
        return;
    }

    for (y, row) in pixels.chunks_exact_mut(row_bytes).enumerate() {
        let g = ((y as u32 * 255) / desc.height.max(1)) as u8;
        for (x, px) in row.chunks_exact_mut(bpp).enumerate() {
            let x = x as u32;
            let in_bar = x >= bar_x && x < bar_x + BAR_WIDTH;
            let r = if in_bar {
                255
            } else {
                ((x * 255) / width) as u8
            };
            let b = shift;
            let (c0, c2) = match desc.format {
                PixelFormat::Bgra8 => (b, r),
                PixelFormat::Rgba8 => (r, b),
            };
            px[0] = c0;
            px[1] = g;
            px[2] = c2;
            px[3] = 255;
        }
    }
}
