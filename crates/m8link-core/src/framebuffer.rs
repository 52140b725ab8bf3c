//! Pixel framebuffer projection of the device screen.
//!
//! A 320×240 RGB buffer fed by the same command stream as the text grid.
//! Rectangle fills clip to the screen; glyph stamping goes through the
//! [`crate::font`] atlases; the oscilloscope strip redraws over its previous
//! footprint. `to_bmp` serializes the buffer on demand for `/api/screen/image`
//! and the `/screen` WebSocket channel.

use crate::command::{Color, DisplayCommand};
use crate::font::{self, FontMode, GLYPH_COLS, GLYPH_ROWS};

/// Screen width in pixels.
pub const SCREEN_WIDTH: usize = 320;
/// Screen height in pixels.
pub const SCREEN_HEIGHT: usize = 240;

/// Size of the fixed BMP file header (14-byte file header + 40-byte DIB).
const BMP_HEADER_LEN: usize = 54;

/// The reconstructed 320×240 RGB screen.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    pixels: Vec<Color>,
    background: Color,
    font: FontMode,
    /// Width and cleared height of the last waveform draw.
    wave_footprint: Option<(usize, usize)>,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framebuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pixels: vec![Color::BLACK; SCREEN_WIDTH * SCREEN_HEIGHT],
            background: Color::BLACK,
            font: FontMode::default(),
            wave_footprint: None,
        }
    }

    /// Pixel at (x, y); out-of-range reads return black.
    #[must_use]
    pub fn pixel(&self, x: i32, y: i32) -> Color {
        if x < 0 || y < 0 || x >= SCREEN_WIDTH as i32 || y >= SCREEN_HEIGHT as i32 {
            return Color::BLACK;
        }
        self.pixels[y as usize * SCREEN_WIDTH + x as usize]
    }

    /// The background color adopted from the last full-screen fill.
    #[must_use]
    pub fn background(&self) -> Color {
        self.background
    }

    /// The active font mode.
    #[must_use]
    pub fn font_mode(&self) -> FontMode {
        self.font
    }

    /// Apply one command to the framebuffer.
    pub fn apply(&mut self, cmd: &DisplayCommand) {
        match cmd {
            DisplayCommand::Rectangle { x, y, w, h, color } => {
                self.fill_rect(
                    i32::from(*x),
                    i32::from(*y),
                    i32::from(*w),
                    i32::from(*h),
                    *color,
                );
            }
            DisplayCommand::Text { ch, x, y, fg, bg } => {
                self.draw_char(*ch, i32::from(*x), i32::from(*y), *fg, *bg);
            }
            DisplayCommand::Waveform { color, samples } => self.draw_waveform(*color, samples),
            DisplayCommand::System { font_mode, .. } => {
                self.font = FontMode::from_id(*font_mode);
            }
            DisplayCommand::Joypad { .. } => {}
        }
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        if x < 0 || y < 0 || x >= SCREEN_WIDTH as i32 || y >= SCREEN_HEIGHT as i32 {
            return;
        }
        self.pixels[y as usize * SCREEN_WIDTH + x as usize] = color;
    }

    /// Paint `[x, x+w) × [y, y+h)` clipped to the screen. A fill covering the
    /// whole screen becomes the new background color.
    pub fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Color) {
        if w <= 0 || h <= 0 {
            return;
        }
        if x <= 0 && y <= 0 && x.saturating_add(w) >= SCREEN_WIDTH as i32
            && y.saturating_add(h) >= SCREEN_HEIGHT as i32
        {
            self.background = color;
        }

        let x0 = x.clamp(0, SCREEN_WIDTH as i32) as usize;
        let y0 = y.clamp(0, SCREEN_HEIGHT as i32) as usize;
        let x1 = x.saturating_add(w).clamp(0, SCREEN_WIDTH as i32) as usize;
        let y1 = y.saturating_add(h).clamp(0, SCREEN_HEIGHT as i32) as usize;
        if x0 >= x1 {
            return;
        }

        for row in y0..y1 {
            let base = row * SCREEN_WIDTH;
            self.pixels[base + x0..base + x1].fill(color);
        }
    }

    /// Stamp one glyph through the active font's atlas.
    ///
    /// The background box (`stride_x` × glyph height) is painted in `bg`;
    /// atlas bits are painted in `fg`. Codes outside the atlas stamp nothing.
    pub fn draw_char(&mut self, ch: u8, x: i32, y: i32, fg: Color, bg: Color) {
        let Some(columns) = font::glyph(ch) else {
            return;
        };
        let spec = self.font.spec();
        let scale = i32::from(spec.scale);
        let top = y + spec.offset_y;

        // Background box first, then the lit bits over it.
        self.fill_rect(
            x,
            top,
            i32::from(spec.stride_x),
            GLYPH_ROWS as i32 * scale,
            bg,
        );

        for (col, bits) in columns.iter().enumerate().take(GLYPH_COLS) {
            for row in 0..GLYPH_ROWS {
                if bits >> row & 1 == 1 {
                    self.fill_rect(
                        x + col as i32 * scale,
                        top + spec.baseline + row as i32 * scale,
                        scale,
                        scale,
                        fg,
                    );
                }
            }
        }
    }

    /// Redraw the oscilloscope strip along the top-right edge.
    ///
    /// The previous strip's footprint is cleared to the background color
    /// before the new samples are plotted, one column per sample starting at
    /// `SCREEN_WIDTH − samples.len()`, one row per (clamped) sample value.
    pub fn draw_waveform(&mut self, color: Color, samples: &[u8]) {
        let spec = self.font.spec();
        let max_row = usize::from(spec.waveform_max);

        if let Some((prev_len, prev_height)) = self.wave_footprint.take() {
            self.fill_rect(
                (SCREEN_WIDTH - prev_len) as i32,
                0,
                prev_len as i32,
                prev_height as i32,
                self.background,
            );
        }

        let len = samples.len().min(SCREEN_WIDTH);
        if len == 0 {
            return;
        }
        let x0 = SCREEN_WIDTH - len;
        for (i, &sample) in samples.iter().take(len).enumerate() {
            let row = usize::from(sample).min(max_row);
            self.set_pixel((x0 + i) as i32, row as i32, color);
        }
        self.wave_footprint = Some((len, max_row + 1));
    }

    /// Serialize as a 24-bit BMP: 54-byte header, bottom-up BGR rows padded
    /// to a 4-byte stride.
    #[must_use]
    pub fn to_bmp(&self) -> Vec<u8> {
        let row_bytes = SCREEN_WIDTH * 3;
        let stride = row_bytes.div_ceil(4) * 4;
        let image_size = stride * SCREEN_HEIGHT;
        let file_size = BMP_HEADER_LEN + image_size;

        let mut out = Vec::with_capacity(file_size);

        // File header.
        out.extend_from_slice(b"BM");
        out.extend_from_slice(&(file_size as u32).to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&(BMP_HEADER_LEN as u32).to_le_bytes());

        // BITMAPINFOHEADER.
        out.extend_from_slice(&40u32.to_le_bytes());
        out.extend_from_slice(&(SCREEN_WIDTH as i32).to_le_bytes());
        out.extend_from_slice(&(SCREEN_HEIGHT as i32).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&24u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(image_size as u32).to_le_bytes());
        out.extend_from_slice(&2835i32.to_le_bytes());
        out.extend_from_slice(&2835i32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        // Pixel rows, bottom-up, BGR.
        let padding = stride - row_bytes;
        for row in (0..SCREEN_HEIGHT).rev() {
            let base = row * SCREEN_WIDTH;
            for px in &self.pixels[base..base + SCREEN_WIDTH] {
                out.extend_from_slice(&[px.b, px.g, px.r]);
            }
            out.extend(std::iter::repeat_n(0u8, padding));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_clips_to_screen() {
        let mut fb = Framebuffer::new();
        let red = Color::new(255, 0, 0);
        fb.fill_rect(310, 230, 100, 100, red);

        assert_eq!(fb.pixel(310, 230), red);
        assert_eq!(fb.pixel(319, 239), red);
        assert_eq!(fb.pixel(309, 230), Color::BLACK);
        // Out-of-range reads are black, never a panic.
        assert_eq!(fb.pixel(320, 240), Color::BLACK);
        assert_eq!(fb.pixel(-1, -1), Color::BLACK);
    }

    #[test]
    fn negative_origin_clips() {
        let mut fb = Framebuffer::new();
        let c = Color::new(1, 2, 3);
        fb.fill_rect(-10, -10, 15, 15, c);
        assert_eq!(fb.pixel(0, 0), c);
        assert_eq!(fb.pixel(4, 4), c);
        assert_eq!(fb.pixel(5, 5), Color::BLACK);
    }

    #[test]
    fn entirely_off_screen_fill_is_a_no_op() {
        let mut fb = Framebuffer::new();
        fb.fill_rect(400, 10, 50, 50, Color::WHITE);
        fb.fill_rect(10, 300, 50, 50, Color::WHITE);
        fb.fill_rect(-100, -100, 50, 50, Color::WHITE);
        for y in 0..SCREEN_HEIGHT as i32 {
            for x in 0..SCREEN_WIDTH as i32 {
                assert_eq!(fb.pixel(x, y), Color::BLACK);
            }
        }
    }

    #[test]
    fn only_pixels_inside_clip_change() {
        let mut fb = Framebuffer::new();
        let c = Color::new(7, 7, 7);
        fb.fill_rect(100, 100, 10, 10, c);
        for y in 0..SCREEN_HEIGHT as i32 {
            for x in 0..SCREEN_WIDTH as i32 {
                let inside = (100..110).contains(&x) && (100..110).contains(&y);
                assert_eq!(fb.pixel(x, y) == c, inside, "({x},{y})");
            }
        }
    }

    #[test]
    fn full_screen_fill_adopts_background() {
        let mut fb = Framebuffer::new();
        let navy = Color::new(0, 0, 64);
        fb.fill_rect(0, 0, 320, 240, navy);
        assert_eq!(fb.background(), navy);

        // A partial fill does not.
        fb.fill_rect(0, 0, 100, 240, Color::WHITE);
        assert_eq!(fb.background(), navy);
    }

    #[test]
    fn char_stamp_uses_fg_and_bg() {
        let mut fb = Framebuffer::new();
        let fg = Color::new(255, 255, 255);
        let bg = Color::new(10, 20, 30);
        fb.draw_char(b'!', 100, 100, fg, bg);

        let spec = FontMode::V1Small.spec();
        let top = 100 + spec.offset_y;
        // '!' is column-symmetric: column 2 holds the bar. Bit 0 of 0x5F is set.
        assert_eq!(fb.pixel(102, top), fg);
        // Column 0 of '!' is empty: background shows through.
        assert_eq!(fb.pixel(100, top), bg);
        // Outside the glyph box: untouched.
        assert_eq!(fb.pixel(99, top), Color::BLACK);
    }

    #[test]
    fn unmapped_code_stamps_nothing() {
        let mut fb = Framebuffer::new();
        fb.draw_char(0x05, 50, 50, Color::WHITE, Color::WHITE);
        fb.draw_char(0x7F, 50, 50, Color::WHITE, Color::WHITE);
        for y in 40..70 {
            for x in 40..70 {
                assert_eq!(fb.pixel(x, y), Color::BLACK);
            }
        }
    }

    #[test]
    fn waveform_draws_right_aligned() {
        let mut fb = Framebuffer::new();
        let c = Color::new(0, 255, 255);
        fb.draw_waveform(c, &[0, 5, 10]);

        assert_eq!(fb.pixel(317, 0), c);
        assert_eq!(fb.pixel(318, 5), c);
        assert_eq!(fb.pixel(319, 10), c);
    }

    #[test]
    fn waveform_clamps_to_font_ceiling() {
        let mut fb = Framebuffer::new();
        let c = Color::new(255, 255, 0);
        fb.draw_waveform(c, &[255]);
        let max = usize::from(FontMode::V1Small.spec().waveform_max);
        assert_eq!(fb.pixel(319, max as i32), c);
    }

    #[test]
    fn waveform_overlay_clears_previous_footprint() {
        let mut fb = Framebuffer::new();
        let c1 = Color::new(255, 0, 0);
        let c2 = Color::new(0, 255, 0);

        // W1: 10 samples. W2: 3 samples (narrower band).
        fb.draw_waveform(c1, &[3; 10]);
        fb.draw_waveform(c2, &[3; 3]);

        // Pixels in W1's band but outside W2's must no longer hold C1.
        for x in 310..317 {
            for y in 0..=i32::from(FontMode::V1Small.spec().waveform_max) {
                assert_ne!(fb.pixel(x, y), c1, "stale waveform pixel at ({x},{y})");
            }
        }
        // W2's own samples are present.
        assert_eq!(fb.pixel(317, 3), c2);
    }

    #[test]
    fn waveform_clears_to_current_background() {
        let mut fb = Framebuffer::new();
        let bg = Color::new(0, 0, 40);
        fb.fill_rect(0, 0, 320, 240, bg);
        fb.draw_waveform(Color::WHITE, &[1; 8]);
        fb.draw_waveform(Color::WHITE, &[]);
        assert_eq!(fb.pixel(315, 1), bg);
    }

    #[test]
    fn bmp_layout() {
        let mut fb = Framebuffer::new();
        fb.fill_rect(0, 0, 1, 1, Color::new(10, 20, 30));
        let bmp = fb.to_bmp();

        let stride = (SCREEN_WIDTH * 3).div_ceil(4) * 4;
        assert_eq!(&bmp[0..2], b"BM");
        assert_eq!(bmp.len(), 54 + stride * SCREEN_HEIGHT);
        assert_eq!(
            u32::from_le_bytes(bmp[2..6].try_into().unwrap()) as usize,
            bmp.len()
        );
        assert_eq!(u32::from_le_bytes(bmp[10..14].try_into().unwrap()), 54);
        assert_eq!(
            i32::from_le_bytes(bmp[18..22].try_into().unwrap()) as usize,
            SCREEN_WIDTH
        );
        assert_eq!(
            i32::from_le_bytes(bmp[22..26].try_into().unwrap()) as usize,
            SCREEN_HEIGHT
        );
        assert_eq!(u16::from_le_bytes(bmp[28..30].try_into().unwrap()), 24);

        // (0,0) is the first pixel of the LAST row on disk, stored BGR.
        let last_row = 54 + stride * (SCREEN_HEIGHT - 1);
        assert_eq!(&bmp[last_row..last_row + 3], &[30, 20, 10]);
    }

    #[test]
    fn system_command_switches_font() {
        let mut fb = Framebuffer::new();
        fb.apply(&DisplayCommand::System {
            hardware: 2,
            fw_major: 3,
            fw_minor: 0,
            fw_patch: 0,
            font_mode: 4,
        });
        assert_eq!(fb.font_mode(), FontMode::V2Huge);
    }
}
