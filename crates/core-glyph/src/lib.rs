//! core-glyph: fixed-cell bitmap glyph rendering.
//!
//! Draws one character cell at a time into a 32-bit pixel grid (the mapped
//! scanout buffer). Everything here is pure: the caller supplies the buffer,
//! the pitch and the cell coordinates, so the renderer can be exercised in
//! tests against a plain `Vec<u32>`.
//!
//! Invariants:
//! * A cell is `GLYPH_WIDTH * scaling` by `GLYPH_HEIGHT * scaling` pixels.
//! * Unknown codepoints fall back to U+FFFD; if that is missing too the cell
//!   is left untouched.
//! * `scaling` is clamped to 1..=4, matching what the framebuffer derives
//!   from the physical display size.

mod glyphs;

pub use glyphs::{GLYPH_HEIGHT, GLYPH_WIDTH};

const REPLACEMENT_CODEPOINT: u32 = 0xFFFD;

/// Highest supported integer scale factor.
pub const MAX_SCALE: u32 = 4;

fn glyph_bitmap(codepoint: u32) -> Option<&'static [u8; GLYPH_HEIGHT]> {
    glyphs::INDEX
        .binary_search_by_key(&codepoint, |&(cp, _)| cp)
        .ok()
        .map(|at| &glyphs::BITMAPS[glyphs::INDEX[at].1])
}

/// Cell renderer at a fixed integer scale.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    scaling: usize,
}

impl Renderer {
    pub fn new(scaling: u32) -> Self {
        let scaling = scaling.clamp(1, MAX_SCALE) as usize;
        Self { scaling }
    }

    pub fn scaling(&self) -> u32 {
        self.scaling as u32
    }

    /// Pixel size of one character cell: `(width, height)`.
    pub fn cell_size(&self) -> (u32, u32) {
        (
            (GLYPH_WIDTH * self.scaling) as u32,
            (GLYPH_HEIGHT * self.scaling) as u32,
        )
    }

    /// Fill the cell at `(cx, cy)` with `back`. `pitch` is in bytes.
    pub fn fill(&self, pixels: &mut [u32], pitch: usize, cx: usize, cy: usize, back: u32) {
        let words = pitch / 4;
        let x0 = cx * GLYPH_WIDTH * self.scaling;
        let y0 = cy * GLYPH_HEIGHT * self.scaling;
        for row in 0..GLYPH_HEIGHT * self.scaling {
            let base = (y0 + row) * words + x0;
            pixels[base..base + GLYPH_WIDTH * self.scaling].fill(back);
        }
    }

    /// Render `codepoint` into the cell at `(cx, cy)` with `front` on `back`.
    pub fn render(
        &self,
        pixels: &mut [u32],
        pitch: usize,
        cx: usize,
        cy: usize,
        codepoint: u32,
        front: u32,
        back: u32,
    ) {
        let Some(bitmap) = glyph_bitmap(codepoint).or_else(|| glyph_bitmap(REPLACEMENT_CODEPOINT))
        else {
            return;
        };

        let words = pitch / 4;
        let x0 = cx * GLYPH_WIDTH * self.scaling;
        let y0 = cy * GLYPH_HEIGHT * self.scaling;

        for j in 0..GLYPH_HEIGHT {
            for i in 0..GLYPH_WIDTH {
                let lit = bit(bitmap, i as isize, j as isize);
                for sy in 0..self.scaling {
                    for sx in 0..self.scaling {
                        let on = if lit {
                            true
                        } else if self.scaling > 1 {
                            self.smoothed(bitmap, i, j, sx, sy)
                        } else {
                            false
                        };
                        let x = x0 + i * self.scaling + sx;
                        let y = y0 + j * self.scaling + sy;
                        pixels[y * words + x] = if on { front } else { back };
                    }
                }
            }
        }
    }

    /// Side-rule smoothing for scaled glyphs: a background sub-pixel turns
    /// foreground when two adjacent side neighbors are both lit and the
    /// sub-coordinate falls inside the right triangle of leg `scaling - 1`
    /// pointing into that corner. Skipped entirely when all four sides are
    /// lit (the hole is intentional in the source art).
    fn smoothed(&self, bitmap: &[u8; GLYPH_HEIGHT], i: usize, j: usize, sx: usize, sy: usize) -> bool {
        let (i, j) = (i as isize, j as isize);
        let up = bit(bitmap, i, j - 1);
        let down = bit(bitmap, i, j + 1);
        let left = bit(bitmap, i - 1, j);
        let right = bit(bitmap, i + 1, j);

        if up && down && left && right {
            return false;
        }

        let leg = self.scaling - 1;
        let near_l = sx;
        let near_r = leg - sx;
        let near_u = sy;
        let near_d = leg - sy;

        (up && left && near_l + near_u < leg)
            || (up && right && near_r + near_u < leg)
            || (down && left && near_l + near_d < leg)
            || (down && right && near_r + near_d < leg)
    }
}

fn bit(bitmap: &[u8; GLYPH_HEIGHT], i: isize, j: isize) -> bool {
    if i < 0 || j < 0 || i >= GLYPH_WIDTH as isize || j >= GLYPH_HEIGHT as isize {
        return false;
    }
    bitmap[j as usize] & (0x80 >> i) != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FG: u32 = 0x00FF_FFFF;
    const BG: u32 = 0x0000_0000;

    fn canvas(cells_w: usize, cells_h: usize, scaling: u32) -> (Vec<u32>, usize) {
        let r = Renderer::new(scaling);
        let (cw, ch) = r.cell_size();
        let w = cells_w * cw as usize;
        let h = cells_h * ch as usize;
        (vec![0xDEAD_BEEF; w * h], w * 4)
    }

    #[test]
    fn cell_size_scales() {
        assert_eq!(Renderer::new(1).cell_size(), (8, 16));
        assert_eq!(Renderer::new(3).cell_size(), (24, 48));
        // out-of-range factors clamp instead of failing
        assert_eq!(Renderer::new(0).cell_size(), (8, 16));
        assert_eq!(Renderer::new(9).cell_size(), (32, 64));
    }

    #[test]
    fn fill_touches_only_its_cell() {
        let (mut px, pitch) = canvas(2, 1, 1);
        Renderer::new(1).fill(&mut px, pitch, 1, 0, BG);
        let words = pitch / 4;
        for y in 0..16 {
            for x in 0..16 {
                let want = if x >= 8 { BG } else { 0xDEAD_BEEF };
                assert_eq!(px[y * words + x], want, "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn space_renders_all_background() {
        let (mut px, pitch) = canvas(1, 1, 1);
        Renderer::new(1).render(&mut px, pitch, 0, 0, ' ' as u32, FG, BG);
        assert!(px.iter().all(|&p| p == BG));
    }

    #[test]
    fn bar_glyph_renders_its_column() {
        let (mut px, pitch) = canvas(1, 1, 1);
        Renderer::new(1).render(&mut px, pitch, 0, 0, '|' as u32, FG, BG);
        let words = pitch / 4;
        // '|' is a solid column at x = 3 spanning the seed rows (y = 1..=14).
        for y in 1..15 {
            assert_eq!(px[y * words + 3], FG, "row {y}");
        }
        assert_eq!(px[3], BG);
        assert_eq!(px[15 * words + 3], BG);
    }

    #[test]
    fn unknown_codepoint_uses_replacement() {
        let (mut direct, pitch) = canvas(1, 1, 1);
        let (mut fallback, _) = canvas(1, 1, 1);
        Renderer::new(1).render(&mut direct, pitch, 0, 0, 0xFFFD, FG, BG);
        Renderer::new(1).render(&mut fallback, pitch, 0, 0, 0x1F4A9, FG, BG);
        assert_eq!(direct, fallback);
    }

    #[test]
    fn scaled_solid_pixel_is_solid_block() {
        let (mut px, pitch) = canvas(1, 1, 2);
        Renderer::new(2).render(&mut px, pitch, 0, 0, '|' as u32, FG, BG);
        let words = pitch / 4;
        // Source pixel (3, 4) is lit; its 2x2 block must be entirely lit.
        for sy in 0..2 {
            for sx in 0..2 {
                assert_eq!(px[(8 + sy) * words + 6 + sx], FG);
            }
        }
    }

    #[test]
    fn smoothing_fills_inner_corner_only() {
        // '+' has an inner corner at source pixel (2, 6): the pixel is unlit
        // but its down (2, 7) and right (3, 6) neighbors are lit. At scaling
        // 3 the triangle leg is 2, so only the sub-pixel nearest that corner
        // turns on and the opposite corner stays background.
        let (mut px, pitch) = canvas(1, 1, 3);
        Renderer::new(3).render(&mut px, pitch, 0, 0, '+' as u32, FG, BG);
        let words = pitch / 4;
        let (bx, by) = (2 * 3, 6 * 3);
        assert_eq!(px[(by + 2) * words + bx + 2], FG, "sub-pixel (2,2)");
        assert_eq!(px[by * words + bx], BG, "sub-pixel (0,0)");
        assert_eq!(px[by * words + bx + 2], BG, "sub-pixel (2,0)");
    }

    #[test]
    fn no_smoothing_at_scale_one() {
        let (mut px, pitch) = canvas(1, 1, 1);
        Renderer::new(1).render(&mut px, pitch, 0, 0, '+' as u32, FG, BG);
        let words = pitch / 4;
        assert_eq!(px[6 * words + 2], BG);
    }
}
