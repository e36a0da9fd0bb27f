//! Frame leases and processed results.
//!
//! - `Frame`: lease over a filled transport buffer. Holds the buffer memory while
//!   the buffer is in the `Filled` state and gives it back on recycle.
//! - `ProcessedImage`: owned pixel copy produced by a transform. Independent of
//!   any transport buffer.
//!
//! `Frame` is deliberately not `Clone`: recycling consumes the lease, so the same
//! buffer cannot be handed back to the transport twice.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::device::FilledBuffer;
use crate::pool::BufferId;

// ----------------------------------------------------------------------------
// Pixel formats
// ----------------------------------------------------------------------------

/// Pixel formats understood by the core, named by their GenICam symbolic value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Mono10,
    Mono12,
    Mono16,
    BayerRG8,
    BayerGB8,
    BayerGR8,
    BayerBG8,
    #[serde(rename = "RGB8")]
    Rgb8,
    #[serde(rename = "BGR8")]
    Bgr8,
    #[serde(rename = "RGB10p32")]
    Rgb10Packed32,
    #[serde(rename = "BGR10p32")]
    Bgr10Packed32,
}

/// Bayer mosaic origin, read as the colour of the top-left 2x2 cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BayerPattern {
    Rg,
    Gb,
    Gr,
    Bg,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 12] = [
        PixelFormat::Mono8,
        PixelFormat::Mono10,
        PixelFormat::Mono12,
        PixelFormat::Mono16,
        PixelFormat::BayerRG8,
        PixelFormat::BayerGB8,
        PixelFormat::BayerGR8,
        PixelFormat::BayerBG8,
        PixelFormat::Rgb8,
        PixelFormat::Bgr8,
        PixelFormat::Rgb10Packed32,
        PixelFormat::Bgr10Packed32,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono10 => "Mono10",
            PixelFormat::Mono12 => "Mono12",
            PixelFormat::Mono16 => "Mono16",
            PixelFormat::BayerRG8 => "BayerRG8",
            PixelFormat::BayerGB8 => "BayerGB8",
            PixelFormat::BayerGR8 => "BayerGR8",
            PixelFormat::BayerBG8 => "BayerBG8",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Bgr8 => "BGR8",
            PixelFormat::Rgb10Packed32 => "RGB10p32",
            PixelFormat::Bgr10Packed32 => "BGR10p32",
        }
    }

    /// Bytes one pixel occupies in a transport buffer.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerRG8
            | PixelFormat::BayerGB8
            | PixelFormat::BayerGR8
            | PixelFormat::BayerBG8 => 1,
            PixelFormat::Mono10 | PixelFormat::Mono12 | PixelFormat::Mono16 => 2,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgb10Packed32 | PixelFormat::Bgr10Packed32 => 4,
        }
    }

    /// Significant bits stored per channel.
    pub fn storage_bits_per_channel(self) -> u32 {
        match self {
            PixelFormat::Mono10 | PixelFormat::Rgb10Packed32 | PixelFormat::Bgr10Packed32 => 10,
            PixelFormat::Mono12 => 12,
            PixelFormat::Mono16 => 16,
            _ => 8,
        }
    }

    pub fn channel_count(self) -> usize {
        match self {
            PixelFormat::Rgb8
            | PixelFormat::Bgr8
            | PixelFormat::Rgb10Packed32
            | PixelFormat::Bgr10Packed32 => 3,
            _ => 1,
        }
    }

    pub fn is_single_channel(self) -> bool {
        self.channel_count() == 1
    }

    pub fn bayer_pattern(self) -> Option<BayerPattern> {
        match self {
            PixelFormat::BayerRG8 => Some(BayerPattern::Rg),
            PixelFormat::BayerGB8 => Some(BayerPattern::Gb),
            PixelFormat::BayerGR8 => Some(BayerPattern::Gr),
            PixelFormat::BayerBG8 => Some(BayerPattern::Bg),
            _ => None,
        }
    }

    pub fn is_bayer(self) -> bool {
        self.bayer_pattern().is_some()
    }

    /// Packed 10-bit colour formats are not offered for acquisition.
    pub fn is_packed(self) -> bool {
        matches!(self, PixelFormat::Rgb10Packed32 | PixelFormat::Bgr10Packed32)
    }

    /// Payload size for one frame of `size` in this format.
    pub fn payload_size(self, size: Size) -> usize {
        size.pixel_count() * self.bytes_per_pixel()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        PixelFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown pixel format '{}'", trimmed))
    }
}

// ----------------------------------------------------------------------------
// Geometry
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// Frame: lease over a filled buffer
// ----------------------------------------------------------------------------

/// Metadata that travels with every filled buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameMeta {
    pub pixel_format: PixelFormat,
    pub size: Size,
    /// Device frame counter.
    pub frame_id: u64,
    /// Data was not fully received before acquisition ended or an error occurred.
    pub incomplete: bool,
}

/// Lease over a filled transport buffer.
///
/// The lease owns the buffer memory while the buffer is `Filled`. It must be
/// passed back through `AcquisitionEngine::recycle` exactly once.
#[derive(Debug)]
pub struct Frame {
    buffer: BufferId,
    memory: Vec<u8>,
    meta: FrameMeta,
}

impl Frame {
    pub(crate) fn from_filled(filled: FilledBuffer) -> Self {
        Self {
            buffer: filled.id,
            memory: filled.memory,
            meta: filled.meta,
        }
    }

    pub(crate) fn into_parts(self) -> (BufferId, Vec<u8>) {
        (self.buffer, self.memory)
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer
    }

    pub fn meta(&self) -> FrameMeta {
        self.meta
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.meta.pixel_format
    }

    pub fn size(&self) -> Size {
        self.meta.size
    }

    pub fn frame_id(&self) -> u64 {
        self.meta.frame_id
    }

    pub fn is_incomplete(&self) -> bool {
        self.meta.incomplete
    }

    /// Pixel memory. Only valid until the frame is recycled.
    pub fn data(&self) -> &[u8] {
        &self.memory
    }
}

// ----------------------------------------------------------------------------
// ProcessedImage: owned transform output
// ----------------------------------------------------------------------------

/// Owned transform output plus the source description captured before the
/// transform ran.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedImage {
    pub pixels: Vec<u8>,
    pub pixel_format: PixelFormat,
    pub size: Size,
    pub source_pixel_format: PixelFormat,
    pub source_size: Size,
    pub frame_id: u64,
}

impl ProcessedImage {
    /// One-line conversion summary for status displays.
    pub fn describe(&self) -> String {
        format!(
            "Converted: {} [{}] to {} [{}]",
            self.source_pixel_format, self.source_size, self.pixel_format, self.size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_round_trips_through_name() {
        for format in PixelFormat::ALL {
            assert_eq!(format.name().parse::<PixelFormat>().unwrap(), format);
        }
        assert!("YUV422".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn payload_size_follows_format_and_size() {
        let size = Size::new(640, 480);
        assert_eq!(PixelFormat::Mono8.payload_size(size), 307_200);
        assert_eq!(PixelFormat::Mono12.payload_size(size), 614_400);
        assert_eq!(PixelFormat::Rgb8.payload_size(size), 921_600);
    }

    #[test]
    fn processed_image_describes_conversion() {
        let image = ProcessedImage {
            pixels: vec![0; 12],
            pixel_format: PixelFormat::Rgb8,
            size: Size::new(2, 2),
            source_pixel_format: PixelFormat::BayerRG8,
            source_size: Size::new(2, 2),
            frame_id: 7,
        };
        assert_eq!(image.describe(), "Converted: BayerRG8 [2x2] to RGB8 [2x2]");
    }

    #[test]
    fn packed_formats_are_flagged() {
        assert!(PixelFormat::Rgb10Packed32.is_packed());
        assert!(PixelFormat::Bgr10Packed32.is_packed());
        assert!(!PixelFormat::BayerRG8.is_packed());
        assert_eq!(PixelFormat::Rgb10Packed32.channel_count(), 3);
    }
}
