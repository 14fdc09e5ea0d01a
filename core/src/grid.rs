//! Grid visual scrambler.
//!
//! Splits a raster frame into an n x m grid of tiles and rearranges them with
//! a seeded permutation. The frame is first truncated to the largest
//! dimensions evenly divisible by the grid; trailing rows/columns are
//! discarded and unrecoverable. The scrambled canvas gains a fixed border
//! margin stamped with plaintext identity/instruction text, and optionally a
//! low-opacity marker over the body. The stamp and marker are for human eyes;
//! reconstruction uses only the key.
//!
//! Video is the same spatial permutation applied independently per frame.

use crate::error::{Result, VeilmarkError};
use crate::key::ScrambleKey;
use crate::permutation::Permutation;
use crate::{BORDER_MARGIN, MARKER_ALPHA, MAX_FRAME_PIXELS};

const BYTES_PER_PIXEL: usize = 4;

/// Border fill for the stamped margin (dark slate).
const BORDER_COLOR: [u8; 4] = [24, 24, 28, 255];
/// Stamp text color (near white).
const STAMP_COLOR: [u8; 4] = [230, 230, 235, 255];

/// Tightly packed RGBA8 raster frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Frame {
    /// Blank (opaque black) frame.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::validate_dims(width, height)?;
        let mut rgba = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        for px in rgba.chunks_exact_mut(BYTES_PER_PIXEL) {
            px[3] = 255;
        }
        Ok(Self { width, height, rgba })
    }

    /// Wrap an existing RGBA8 buffer; length must be exactly `w * h * 4`.
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self> {
        Self::validate_dims(width, height)?;
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if rgba.len() != expected {
            return Err(VeilmarkError::UnsupportedMediaType(format!(
                "RGBA buffer length {} does not match {}x{}",
                rgba.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, rgba })
    }

    fn validate_dims(width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(VeilmarkError::UnsupportedMediaType("empty frame".into()));
        }
        let pixels = width as usize * height as usize;
        if pixels > MAX_FRAME_PIXELS {
            return Err(VeilmarkError::OversizeInput {
                actual: pixels,
                limit: MAX_FRAME_PIXELS,
            });
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn into_rgba(self) -> Vec<u8> {
        self.rgba
    }

    fn row_offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    fn fill(&mut self, color: [u8; 4]) {
        for px in self.rgba.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&color);
        }
    }

    /// Copy a `w x h` rectangle from `src` at (sx, sy) to (dx, dy) in self.
    fn blit(&mut self, src: &Frame, sx: u32, sy: u32, dx: u32, dy: u32, w: u32, h: u32) {
        let row_bytes = w as usize * BYTES_PER_PIXEL;
        for row in 0..h {
            let s = src.row_offset(sx, sy + row);
            let d = self.row_offset(dx, dy + row);
            self.rgba[d..d + row_bytes].copy_from_slice(&src.rgba[s..s + row_bytes]);
        }
    }

    fn blend_pixel(&mut self, x: u32, y: u32, color: [u8; 4], alpha: u8) {
        if x >= self.width || y >= self.height {
            return;
        }
        let o = self.row_offset(x, y);
        let a = alpha as u32;
        for c in 0..3 {
            let dst = self.rgba[o + c] as u32;
            let src = color[c] as u32;
            self.rgba[o + c] = ((src * a + dst * (255 - a)) / 255) as u8;
        }
        self.rgba[o + 3] = 255;
    }
}

/// Discrete grid sizes offered to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridLevel {
    /// 6 x 6 grid.
    Coarse,
    /// 8 x 8 grid.
    Standard,
    /// 10 x 10 grid.
    Fine,
}

impl GridLevel {
    pub fn dims(self) -> (u32, u32) {
        match self {
            GridLevel::Coarse => (6, 6),
            GridLevel::Standard => (8, 8),
            GridLevel::Fine => (10, 10),
        }
    }
}

impl std::str::FromStr for GridLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "coarse" => Ok(GridLevel::Coarse),
            "standard" => Ok(GridLevel::Standard),
            "fine" => Ok(GridLevel::Fine),
            other => Err(format!(
                "unknown grid level '{}' (expected coarse, standard or fine)",
                other
            )),
        }
    }
}

/// Plaintext stamped into the artifact. The marker, when present, is baked
/// into the scrambled body at low opacity and deliberately survives
/// unscrambling; omit it when a byte-exact round trip is required.
#[derive(Debug, Clone, Default)]
pub struct HeaderText {
    pub identity: String,
    pub instructions: String,
    pub marker: Option<String>,
}

fn visual_params(key: &ScrambleKey) -> Result<(u32, u32, Permutation)> {
    match key {
        ScrambleKey::VisualV1(k) => Ok((k.rows, k.cols, k.permutation()?)),
        ScrambleKey::VisualV2(k) => Ok((k.rows, k.cols, k.permutation()?)),
        ScrambleKey::AudioV1(_) => Err(VeilmarkError::UnsupportedMediaType(
            "audio key supplied for a visual transform".into(),
        )),
    }
}

/// Scramble a single frame under a visual key.
///
/// Output canvas is the truncated frame plus the border margin on all sides.
pub fn scramble_frame(frame: &Frame, key: &ScrambleKey, header: &HeaderText) -> Result<Frame> {
    let (rows, cols, perm) = visual_params(key)?;
    let cell_w = frame.width / cols;
    let cell_h = frame.height / rows;
    if cell_w == 0 || cell_h == 0 {
        return Err(VeilmarkError::UnsupportedMediaType(format!(
            "frame {}x{} is smaller than the {}x{} grid",
            frame.width, frame.height, rows, cols
        )));
    }

    let cells = rows as usize * cols as usize;
    if perm.len() != cells {
        return Err(VeilmarkError::PermutationLengthMismatch {
            expected: cells,
            actual: perm.len(),
        });
    }

    let trunc_w = cell_w * cols;
    let trunc_h = cell_h * rows;
    let mut out = Frame::new(trunc_w + 2 * BORDER_MARGIN, trunc_h + 2 * BORDER_MARGIN)?;
    out.fill(BORDER_COLOR);

    for d in 0..cells {
        let s = perm.source_of(d);
        let (sr, sc) = (s as u32 / cols, s as u32 % cols);
        let (dr, dc) = (d as u32 / cols, d as u32 % cols);
        out.blit(
            frame,
            sc * cell_w,
            sr * cell_h,
            BORDER_MARGIN + dc * cell_w,
            BORDER_MARGIN + dr * cell_h,
            cell_w,
            cell_h,
        );
    }

    stamp_margin(&mut out, header);
    if let Some(marker) = &header.marker {
        overlay_marker(&mut out, marker);
    }

    log::debug!(
        "scrambled {}x{} frame into {} cells ({}x{} grid)",
        frame.width,
        frame.height,
        cells,
        rows,
        cols
    );
    Ok(out)
}

/// Invert [`scramble_frame`]. Pixel-exact over the truncated region provided
/// no marker was baked into the body.
pub fn unscramble_frame(artifact: &Frame, key: &ScrambleKey) -> Result<Frame> {
    let (rows, cols, perm) = visual_params(key)?;
    let margin = 2 * BORDER_MARGIN;
    if artifact.width <= margin || artifact.height <= margin {
        return Err(VeilmarkError::UnsupportedMediaType(
            "artifact too small to contain a scrambled body".into(),
        ));
    }
    let trunc_w = artifact.width - margin;
    let trunc_h = artifact.height - margin;
    if trunc_w % cols != 0 || trunc_h % rows != 0 {
        return Err(VeilmarkError::UnsupportedMediaType(format!(
            "artifact body {}x{} does not divide into a {}x{} grid",
            trunc_w, trunc_h, rows, cols
        )));
    }
    let cell_w = trunc_w / cols;
    let cell_h = trunc_h / rows;

    let cells = rows as usize * cols as usize;
    if perm.len() != cells {
        return Err(VeilmarkError::PermutationLengthMismatch {
            expected: cells,
            actual: perm.len(),
        });
    }

    // Scramble placed source cell perm[d] at output cell d, so original cell d
    // sits at artifact cell inv[d].
    let inv = perm.invert();
    let mut out = Frame::new(trunc_w, trunc_h)?;
    for d in 0..cells {
        let s = inv.source_of(d);
        let (sr, sc) = (s as u32 / cols, s as u32 % cols);
        let (dr, dc) = (d as u32 / cols, d as u32 % cols);
        out.blit(
            artifact,
            BORDER_MARGIN + sc * cell_w,
            BORDER_MARGIN + sr * cell_h,
            dc * cell_w,
            dr * cell_h,
            cell_w,
            cell_h,
        );
    }
    Ok(out)
}

/// Scramble every frame of a video with the same spatial permutation.
/// Stateless per-frame map; frames are independent.
pub fn scramble_video(frames: &[Frame], key: &ScrambleKey, header: &HeaderText) -> Result<Vec<Frame>> {
    frames
        .iter()
        .map(|f| scramble_frame(f, key, header))
        .collect()
}

/// Invert [`scramble_video`] frame by frame.
pub fn unscramble_video(frames: &[Frame], key: &ScrambleKey) -> Result<Vec<Frame>> {
    frames.iter().map(|f| unscramble_frame(f, key)).collect()
}

fn stamp_margin(out: &mut Frame, header: &HeaderText) {
    let text_x = BORDER_MARGIN;
    // Identity line centered in the top margin, instructions in the bottom.
    let top_y = (BORDER_MARGIN.saturating_sub(GLYPH_HEIGHT)) / 2;
    draw_text(out, text_x, top_y, 1, STAMP_COLOR, 255, &header.identity);
    let bottom_y = out.height - BORDER_MARGIN + top_y;
    draw_text(out, text_x, bottom_y, 1, STAMP_COLOR, 255, &header.instructions);
}

fn overlay_marker(out: &mut Frame, marker: &str) {
    let scale = 2;
    let text_w = text_width(marker, scale);
    let x = (out.width.saturating_sub(text_w)) / 2;
    let y = (out.height.saturating_sub(GLYPH_HEIGHT * scale)) / 2;
    draw_text(out, x, y, scale, STAMP_COLOR, MARKER_ALPHA, marker);
}

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = 6;

fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_ADVANCE * scale
}

/// Render `text` with the built-in 5x7 face. Unknown characters render blank.
fn draw_text(frame: &mut Frame, x: u32, y: u32, scale: u32, color: [u8; 4], alpha: u8, text: &str) {
    let mut pen_x = x;
    for ch in text.chars() {
        if let Some(rows) = glyph(ch.to_ascii_uppercase()) {
            for (gy, row) in rows.iter().enumerate() {
                for gx in 0..GLYPH_WIDTH {
                    if row & (1 << (GLYPH_WIDTH - 1 - gx)) != 0 {
                        for dy in 0..scale {
                            for dx in 0..scale {
                                frame.blend_pixel(
                                    pen_x + gx * scale + dx,
                                    y + gy as u32 * scale + dy,
                                    color,
                                    alpha,
                                );
                            }
                        }
                    }
                }
            }
        }
        pen_x += GLYPH_ADVANCE * scale;
    }
}

/// 5x7 bitmap rows (bit 4 is the leftmost column) for the stamp character set.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x01, 0x01, 0x01, 0x01, 0x11, 0x11, 0x0E],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        '@' => [0x0E, 0x11, 0x17, 0x15, 0x17, 0x10, 0x0E],
        '#' => [0x0A, 0x1F, 0x0A, 0x0A, 0x0A, 0x1F, 0x0A],
        ' ' => [0x00; 7],
        _ => return None,
    };
    Some(rows)
}
