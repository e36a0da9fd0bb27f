//! Image transform stage run by the processing worker.
//!
//! A transform reads a filled frame and produces an owned `ProcessedImage`; it
//! must not keep references into the frame, which is recycled right after.

use crate::error::TransformError;
use crate::frame::{BayerPattern, Frame, PixelFormat, ProcessedImage, Size};

pub trait Transform: Send {
    fn process(&mut self, frame: &Frame) -> Result<ProcessedImage, TransformError>;
}

impl<F> Transform for F
where
    F: FnMut(&Frame) -> Result<ProcessedImage, TransformError> + Send,
{
    fn process(&mut self, frame: &Frame) -> Result<ProcessedImage, TransformError> {
        self(frame)
    }
}

/// Converts mono, Bayer and 8-bit colour frames to RGB8, BGR8 or Mono8.
///
/// Deeper mono formats keep their upper 8 bits. Bayer frames are demosaiced per
/// 2x2 cell: each pixel takes red and blue from its cell and the mean of the
/// two greens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelConverter {
    target: PixelFormat,
}

impl PixelConverter {
    pub fn new(target: PixelFormat) -> Result<Self, TransformError> {
        match target {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 | PixelFormat::Mono8 => Ok(Self { target }),
            other => Err(TransformError::UnsupportedConversion {
                from: "any".to_string(),
                to: other.to_string(),
            }),
        }
    }

    pub fn target(&self) -> PixelFormat {
        self.target
    }

    fn unsupported(&self, from: PixelFormat) -> TransformError {
        TransformError::UnsupportedConversion {
            from: from.to_string(),
            to: self.target.to_string(),
        }
    }
}

impl Default for PixelConverter {
    fn default() -> Self {
        Self {
            target: PixelFormat::Rgb8,
        }
    }
}

/// Intermediate 8-bit image.
enum Decoded {
    Mono(Vec<u8>),
    Rgb(Vec<u8>),
}

impl Transform for PixelConverter {
    fn process(&mut self, frame: &Frame) -> Result<ProcessedImage, TransformError> {
        let source = frame.pixel_format();
        let size = frame.size();
        let expected = source.payload_size(size);
        let data = frame.data();
        if data.len() < expected {
            return Err(TransformError::Truncated {
                expected,
                actual: data.len(),
            });
        }
        let data = &data[..expected];

        let decoded = match source {
            PixelFormat::Mono8 => Decoded::Mono(data.to_vec()),
            PixelFormat::Mono10 | PixelFormat::Mono12 | PixelFormat::Mono16 => {
                Decoded::Mono(narrow_mono(data, source.storage_bits_per_channel()))
            }
            PixelFormat::Rgb8 => Decoded::Rgb(data.to_vec()),
            PixelFormat::Bgr8 => Decoded::Rgb(swap_red_blue(data)),
            format => match format.bayer_pattern() {
                Some(pattern) => Decoded::Rgb(demosaic(data, size, pattern)),
                None => return Err(self.unsupported(format)),
            },
        };

        let pixels = match (decoded, self.target) {
            (Decoded::Mono(mono), PixelFormat::Mono8) => mono,
            (Decoded::Mono(mono), _) => mono.iter().flat_map(|&v| [v, v, v]).collect(),
            (Decoded::Rgb(rgb), PixelFormat::Mono8) => luma(&rgb),
            (Decoded::Rgb(rgb), PixelFormat::Bgr8) => swap_red_blue(&rgb),
            (Decoded::Rgb(rgb), _) => rgb,
        };

        Ok(ProcessedImage {
            pixels,
            pixel_format: self.target,
            size,
            source_pixel_format: source,
            source_size: size,
            frame_id: frame.frame_id(),
        })
    }
}

fn narrow_mono(data: &[u8], bits: u32) -> Vec<u8> {
    let shift = bits.saturating_sub(8);
    data.chunks_exact(2)
        .map(|pair| (u16::from_le_bytes([pair[0], pair[1]]) >> shift).min(255) as u8)
        .collect()
}

fn swap_red_blue(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect()
}

fn luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| ((77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32) >> 8) as u8)
        .collect()
}

fn demosaic(data: &[u8], size: Size, pattern: BayerPattern) -> Vec<u8> {
    let width = size.width as usize;
    let height = size.height as usize;
    let at = |x: usize, y: usize| data[y.min(height - 1) * width + x.min(width - 1)];

    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            let (cx, cy) = (x & !1, y & !1);
            let cell = [
                at(cx, cy),
                at(cx + 1, cy),
                at(cx, cy + 1),
                at(cx + 1, cy + 1),
            ];
            // Positions in the cell: 0 top-left, 1 top-right, 2 bottom-left, 3 bottom-right.
            let (r, g1, g2, b) = match pattern {
                BayerPattern::Rg => (cell[0], cell[1], cell[2], cell[3]),
                BayerPattern::Gb => (cell[2], cell[0], cell[3], cell[1]),
                BayerPattern::Gr => (cell[1], cell[0], cell[3], cell[2]),
                BayerPattern::Bg => (cell[3], cell[1], cell[2], cell[0]),
            };
            let g = ((g1 as u16 + g2 as u16) / 2) as u8;
            rgb.extend_from_slice(&[r, g, b]);
        }
    }
    rgb
}
