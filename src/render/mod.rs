//! Payload format detection and panel rendering.
//!
//! The payload carries no header; its byte length against the known panel
//! dimensions is the whole format signal. Conversion always lands in the
//! panel's native packed 4-bit grayscale and runs either over one full-frame
//! buffer or, when that allocation fails, tile by tile over a small
//! row-window buffer. Both paths share one converter, so their output is
//! byte-identical.

use std::fmt;

use log::{debug, info};

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Panel driver surface. Drivers are assumed to handle their own hardware
/// faults; a panel that cannot draw has nothing useful to report upward.
pub trait Panel {
    fn power_on(&mut self);
    fn power_off(&mut self);
    /// Flush the whole panel to white.
    fn clear(&mut self);
    /// Draw a packed-4bpp region, two pixels per byte, row-major.
    fn draw_region(&mut self, x: u32, y: u32, width: u32, height: u32, data: &[u8]);
}

/// Source encodings, inferred from payload size alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Four pixels per byte, two bits each, most significant pixel first.
    Packed2,
    /// Two pixels per byte, high nibble first; the panel's native layout.
    Packed4,
    /// One byte per pixel.
    Gray8,
}

impl PixelFormat {
    pub fn detect(len: usize, width: u32, height: u32) -> Result<Self, FormatError> {
        let pixels = width as usize * height as usize;
        if len == pixels / 4 {
            Ok(Self::Packed2)
        } else if len == pixels / 2 {
            Ok(Self::Packed4)
        } else if len == pixels {
            Ok(Self::Gray8)
        } else {
            Err(FormatError::UnknownSize { len, width, height })
        }
    }

    /// Source bytes covering one row of pixels.
    fn row_bytes(self, width: u32) -> usize {
        match self {
            Self::Packed2 => width as usize / 4,
            Self::Packed4 => width as usize / 2,
            Self::Gray8 => width as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// Payload length matches none of the recognized encodings.
    UnknownSize { len: usize, width: u32, height: u32 },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSize { len, width, height } => write!(
                f,
                "payload of {} bytes matches no encoding for {}x{}",
                len, width, height
            ),
        }
    }
}

impl std::error::Error for FormatError {}

/// How far an 8-bit source actually spreads its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EffectiveDepth {
    Two,
    Four,
    Eight,
}

const DEPTH_PROBE_STRIDE: usize = 17;

/// Sample the payload to see whether an 8-bit carrier is really holding
/// 2-bit or 4-bit content, which must be rescaled up instead of truncated
/// down. Probing the whole payload up front keeps the tiled path's output
/// identical to the full-frame path's.
fn probe_depth(payload: &[u8]) -> EffectiveDepth {
    let mut max = 0u8;
    let mut i = 0;
    while i < payload.len() {
        max = max.max(payload[i]);
        if max > 15 {
            return EffectiveDepth::Eight;
        }
        i += DEPTH_PROBE_STRIDE;
    }
    if max <= 3 {
        EffectiveDepth::Two
    } else {
        EffectiveDepth::Four
    }
}

/// One payload's conversion parameters, fixed before any tile is drawn.
struct Converter {
    format: PixelFormat,
    depth: EffectiveDepth,
    invert: bool,
    low_nibble_first: bool,
}

impl Converter {
    fn new(format: PixelFormat, payload: &[u8], cfg: &AgentConfig) -> Self {
        let depth = match format {
            PixelFormat::Gray8 => probe_depth(payload),
            _ => EffectiveDepth::Eight,
        };
        Self {
            format,
            depth,
            invert: cfg.invert_pixels,
            low_nibble_first: cfg.low_nibble_first,
        }
    }

    /// Source pixel `i` as a 4-bit value, before the output transforms.
    fn source_pixel(&self, src: &[u8], i: usize) -> u8 {
        match self.format {
            PixelFormat::Packed2 => {
                let b = src[i / 4];
                let shift = 6 - 2 * (i % 4) as u8;
                // 0..=3 spread over the full 4-bit range.
                ((b >> shift) & 0x3) * 5
            }
            PixelFormat::Packed4 => {
                let b = src[i / 2];
                if i % 2 == 0 {
                    b >> 4
                } else {
                    b & 0xF
                }
            }
            PixelFormat::Gray8 => match self.depth {
                EffectiveDepth::Two => (src[i] & 0x3) * 5,
                EffectiveDepth::Four => src[i] & 0xF,
                EffectiveDepth::Eight => src[i] >> 4,
            },
        }
    }

    /// Convert whole source rows into packed-4bpp output rows.
    fn convert(&self, src: &[u8], row_pixels: usize, out: &mut [u8]) {
        let pixels = out.len() * 2;
        debug_assert_eq!(pixels % row_pixels, 0);
        for i in 0..pixels {
            let mut v = self.source_pixel(src, i);
            if self.invert {
                v = 15 - v;
            }
            let slot = &mut out[i / 2];
            let first = i % 2 == 0;
            // Native wiring takes the first pixel in the high nibble; some
            // panel variants are strapped the other way.
            if first == self.low_nibble_first {
                *slot = (*slot & 0xF0) | v;
            } else {
                *slot = (*slot & 0x0F) | (v << 4);
            }
        }
    }
}

/// Clear policy: always before the very first draw after power loss, then
/// on the configured cadence (0 = never again).
pub fn should_clear(draw_count: u32, clear_every_n_draws: u32) -> bool {
    draw_count == 0 || (clear_every_n_draws > 0 && draw_count % clear_every_n_draws == 0)
}

pub struct Renderer<'a, P: Panel> {
    panel: &'a mut P,
    cfg: &'a AgentConfig,
}

impl<'a, P: Panel> Renderer<'a, P> {
    pub fn new(panel: &'a mut P, cfg: &'a AgentConfig) -> Self {
        Self { panel, cfg }
    }

    /// Detect the payload's format and draw it, clearing first when the
    /// cadence calls for it.
    pub fn render(&mut self, payload: &[u8], draw_count: u32) -> Result<(), AgentError> {
        let width = self.cfg.panel_width;
        let height = self.cfg.panel_height;
        let format = PixelFormat::detect(payload.len(), width, height)?;
        debug!("render: {} bytes detected as {:?}", payload.len(), format);
        let converter = Converter::new(format, payload, self.cfg);

        self.panel.power_on();
        if should_clear(draw_count, self.cfg.clear_every_n_draws) {
            info!("render: clearing panel (draw {})", draw_count);
            self.panel.clear();
        }
        let result = match self.full_frame_buffer() {
            Some(buf) => self.draw_full(&converter, payload, buf),
            None => self.draw_tiled(&converter, payload),
        };
        self.panel.power_off();
        result
    }

    /// The preferred whole-frame working buffer, if memory allows.
    fn full_frame_buffer(&self) -> Option<Vec<u8>> {
        let bytes = self.cfg.frame_bytes();
        if bytes > self.cfg.max_buffer_bytes {
            return None;
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes).ok()?;
        buf.resize(bytes, 0);
        Some(buf)
    }

    fn draw_full(
        &mut self,
        converter: &Converter,
        payload: &[u8],
        mut buf: Vec<u8>,
    ) -> Result<(), AgentError> {
        let width = self.cfg.panel_width;
        converter.convert(payload, width as usize, &mut buf);
        self.panel
            .draw_region(0, 0, width, self.cfg.panel_height, &buf);
        Ok(())
    }

    /// Memory-constrained fallback: convert and draw a window of rows at a
    /// time. Output must match the full-frame path byte for byte.
    fn draw_tiled(&mut self, converter: &Converter, payload: &[u8]) -> Result<(), AgentError> {
        let width = self.cfg.panel_width;
        let height = self.cfg.panel_height;
        let tile_rows = self.cfg.tile_rows.max(1);
        let out_row_bytes = width as usize / 2;
        let src_row_bytes = converter.format.row_bytes(width);
        let tile_bytes = out_row_bytes * tile_rows as usize;
        info!(
            "render: full-frame buffer unavailable, tiling {} rows per pass",
            tile_rows
        );

        let mut buf = Vec::new();
        buf.try_reserve_exact(tile_bytes)
            .map_err(|_| AgentError::Allocation { bytes: tile_bytes })?;
        buf.resize(tile_bytes, 0);

        let mut row = 0u32;
        while row < height {
            let rows = tile_rows.min(height - row);
            let src_start = row as usize * src_row_bytes;
            let src_end = src_start + rows as usize * src_row_bytes;
            let out = &mut buf[..rows as usize * out_row_bytes];
            converter.convert(&payload[src_start..src_end], width as usize, out);
            self.panel.draw_region(0, row, width, rows, out);
            row += rows;
        }
        Ok(())
    }
}
