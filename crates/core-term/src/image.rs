//! Image loading and compositing onto the framebuffer.
//!
//! PNGs decode to 0xAARRGGBB words. Painting is nearest-neighbor at an
//! integer scale, centered unless a location is given, and clipped to the
//! target on all four edges so an image larger than the screen (or pushed
//! past an edge by its offset) never writes out of bounds.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::osc::GfxSpec;

#[derive(Debug, Clone, Default)]
pub struct Placement {
    pub location: Option<(u32, u32)>,
    pub offset: Option<(i32, i32)>,
    /// 0 derives the scale from the framebuffer.
    pub scale: u32,
}

impl Placement {
    pub fn from_spec(spec: &GfxSpec) -> Self {
        Self {
            location: spec.location,
            offset: spec.offset,
            scale: spec.scale,
        }
    }
}

/// A decoded image plus how to place it.
#[derive(Debug, Clone)]
pub struct Image {
    pub pixels: Vec<u32>,
    pub width: u32,
    pub height: u32,
    pub placement: Placement,
}

impl Image {
    /// Decode `path` into 0xAARRGGBB pixels.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("unable to open image {}", path.display()))?;
        let mut decoder = png::Decoder::new(file);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder
            .read_info()
            .with_context(|| format!("bad png {}", path.display()))?;
        let mut buf = vec![0u8; reader.output_buffer_size()];
        let info = reader
            .next_frame(&mut buf)
            .with_context(|| format!("bad png {}", path.display()))?;
        let data = &buf[..info.buffer_size()];

        let (width, height) = (info.width, info.height);
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count);
        match info.color_type {
            png::ColorType::Rgba => {
                for px in data.chunks_exact(4) {
                    pixels.push(pack(px[3], px[0], px[1], px[2]));
                }
            }
            png::ColorType::Rgb => {
                for px in data.chunks_exact(3) {
                    pixels.push(pack(0xff, px[0], px[1], px[2]));
                }
            }
            png::ColorType::Grayscale => {
                for &v in data {
                    pixels.push(pack(0xff, v, v, v));
                }
            }
            png::ColorType::GrayscaleAlpha => {
                for px in data.chunks_exact(2) {
                    pixels.push(pack(px[1], px[0], px[0], px[0]));
                }
            }
            other => bail!("unsupported png color type {other:?} in {}", path.display()),
        }
        if pixels.len() != count {
            bail!("short pixel data in {}", path.display());
        }

        Ok(Self {
            pixels,
            width,
            height,
            placement: Placement::default(),
        })
    }

    /// Build a solid-color rectangle (the `box:` OSC command).
    pub fn solid(color: u32, width: u32, height: u32) -> Self {
        Self {
            pixels: vec![0xFF00_0000 | color; width as usize * height as usize],
            width,
            height,
            placement: Placement::default(),
        }
    }

    /// Paint into `dst` (a `dst_w` x `dst_h` grid with `pitch` bytes per
    /// row). `auto_scale` is the framebuffer's factor, used when the
    /// placement says 0.
    pub fn blit(&self, dst: &mut [u32], dst_w: u32, dst_h: u32, pitch: u32, auto_scale: u32) {
        let scale = match self.placement.scale {
            0 => auto_scale.max(1),
            s => s,
        } as i64;
        let scaled_w = self.width as i64 * scale;
        let scaled_h = self.height as i64 * scale;

        let (mut start_x, mut start_y) = match self.placement.location {
            Some((x, y)) => {
                if self.placement.offset.is_some() {
                    warn!(target: "term.image", "both location and offset set, using location");
                }
                (i64::from(x), i64::from(y))
            }
            None => {
                let mut x = (i64::from(dst_w) - scaled_w) / 2;
                let mut y = (i64::from(dst_h) - scaled_h) / 2;
                if let Some((ox, oy)) = self.placement.offset {
                    x += i64::from(ox);
                    y += i64::from(oy);
                }
                (x, y)
            }
        };

        // Clip to the destination.
        let mut src_x0 = 0i64;
        let mut src_y0 = 0i64;
        if start_x < 0 {
            src_x0 = -start_x;
            start_x = 0;
        }
        if start_y < 0 {
            src_y0 = -start_y;
            start_y = 0;
        }
        let copy_w = (scaled_w - src_x0).min(i64::from(dst_w) - start_x);
        let copy_h = (scaled_h - src_y0).min(i64::from(dst_h) - start_y);
        if copy_w <= 0 || copy_h <= 0 {
            return;
        }

        let words = pitch as usize / 4;
        for dy in 0..copy_h {
            let sy = ((src_y0 + dy) / scale) as usize;
            let dst_row = (start_y + dy) as usize * words;
            let src_row = sy * self.width as usize;
            for dx in 0..copy_w {
                let sx = ((src_x0 + dx) / scale) as usize;
                dst[dst_row + (start_x + dx) as usize] = self.pixels[src_row + sx];
            }
        }
    }
}

fn pack(a: u8, r: u8, g: u8, b: u8) -> u32 {
    (u32::from(a) << 24) | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn gradient(w: u32, h: u32) -> Image {
        let pixels = (0..w * h).map(|i| 0xFF00_0000 | i).collect();
        Image {
            pixels,
            width: w,
            height: h,
            placement: Placement::default(),
        }
    }

    fn target(w: u32, h: u32) -> (Vec<u32>, u32) {
        (vec![0u32; (w * h) as usize], w * 4)
    }

    #[test]
    fn centered_blit() {
        let img = gradient(2, 2);
        let (mut dst, pitch) = target(6, 6);
        img.blit(&mut dst, 6, 6, pitch, 1);
        assert_eq!(dst[2 * 6 + 2], 0xFF00_0000);
        assert_eq!(dst[2 * 6 + 3], 0xFF00_0001);
        assert_eq!(dst[3 * 6 + 2], 0xFF00_0002);
        assert_eq!(dst[0], 0);
    }

    #[test]
    fn location_beats_offset() {
        let mut img = gradient(1, 1);
        img.placement.location = Some((4, 5));
        img.placement.offset = Some((1, 1));
        let (mut dst, pitch) = target(8, 8);
        img.blit(&mut dst, 8, 8, pitch, 1);
        assert_eq!(dst[5 * 8 + 4], 0xFF00_0000);
        assert!(dst.iter().filter(|&&p| p != 0).count() == 1);
    }

    #[test]
    fn offset_shifts_the_center() {
        let mut img = gradient(2, 2);
        img.placement.offset = Some((-2, 1));
        let (mut dst, pitch) = target(6, 6);
        img.blit(&mut dst, 6, 6, pitch, 1);
        assert_eq!(dst[3 * 6 + 0], 0xFF00_0000);
    }

    #[test]
    fn oversized_image_clips_without_panicking() {
        let img = gradient(10, 10);
        let (mut dst, pitch) = target(4, 4);
        img.blit(&mut dst, 4, 4, pitch, 1);
        // Center crop: starts at (10-4)/2 = 3 into the source.
        assert_eq!(dst[0], 0xFF00_0000 | (3 * 10 + 3));
        assert_eq!(dst[15], 0xFF00_0000 | (6 * 10 + 6));
    }

    #[test]
    fn edge_placement_clips() {
        let mut img = gradient(3, 3);
        img.placement.location = Some((6, 7));
        let (mut dst, pitch) = target(8, 8);
        img.blit(&mut dst, 8, 8, pitch, 1);
        // Only the 2x1 top-left corner of the image fits.
        assert_eq!(dst[7 * 8 + 6], 0xFF00_0000);
        assert_eq!(dst[7 * 8 + 7], 0xFF00_0001);
        assert_eq!(dst.iter().filter(|&&p| p != 0).count(), 2);
    }

    #[test]
    fn nearest_neighbor_scaling() {
        let img = gradient(2, 1);
        let mut scaled = img.clone();
        scaled.placement.scale = 2;
        scaled.placement.location = Some((0, 0));
        let (mut dst, pitch) = target(4, 2);
        scaled.blit(&mut dst, 4, 2, pitch, 1);
        assert_eq!(&dst[0..4], &[0xFF00_0000, 0xFF00_0000, 0xFF00_0001, 0xFF00_0001]);
        assert_eq!(&dst[4..8], &[0xFF00_0000, 0xFF00_0000, 0xFF00_0001, 0xFF00_0001]);
    }

    #[test]
    fn auto_scale_uses_framebuffer_factor() {
        let mut img = gradient(1, 1);
        img.placement.location = Some((0, 0));
        let (mut dst, pitch) = target(4, 4);
        img.blit(&mut dst, 4, 4, pitch, 3);
        assert_eq!(dst.iter().filter(|&&p| p != 0).count(), 9);
    }

    #[test]
    fn load_rejects_non_png_files() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"definitely not a png").unwrap();
        assert!(Image::load(f.path()).is_err());
    }

    #[test]
    fn load_decodes_a_real_png() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        {
            let mut enc = png::Encoder::new(&mut f, 2, 2);
            enc.set_color(png::ColorType::Rgba);
            enc.set_depth(png::BitDepth::Eight);
            let mut writer = enc.write_header().unwrap();
            writer
                .write_image_data(&[
                    255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255, 255, 255, 255, 0,
                ])
                .unwrap();
        }
        let img = Image::load(f.path()).unwrap();
        assert_eq!((img.width, img.height), (2, 2));
        assert_eq!(img.pixels[0], 0xFFFF_0000);
        assert_eq!(img.pixels[1], 0xFF00_FF00);
        assert_eq!(img.pixels[2], 0xFF00_00FF);
        assert_eq!(img.pixels[3], 0x00FF_FFFF);
    }
}
