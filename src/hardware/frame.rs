//! Image frames delivered by a frame stream.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Storage type of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    /// One byte per pixel.
    U8,
    /// Two bytes per pixel, little endian.
    U16,
}

impl PixelType {
    /// Pixel type used to store a GenICam pixel format (`Mono8`, `Mono12`, ...).
    ///
    /// Returns `None` for formats the crate does not decode.
    pub fn from_pixel_format(format: &str) -> Option<Self> {
        match format {
            "Mono8" | "BayerRG8" | "BayerGB8" | "BayerGR8" | "BayerBG8" => Some(PixelType::U8),
            "Mono10" | "Mono12" | "Mono14" | "Mono16" | "BayerRG12" | "BayerRG16" => {
                Some(PixelType::U16)
            }
            _ => None,
        }
    }

    /// Bytes occupied by one pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::U16 => 2,
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelType::U8 => f.write_str("uint8"),
            PixelType::U16 => f.write_str("uint16"),
        }
    }
}

/// A single image.
///
/// Pixel data is row-major. 16-bit pixels are stored little endian.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel storage type.
    pub pixel_type: PixelType,
    /// Raw pixel bytes.
    pub data: Bytes,
    /// Device frame counter.
    pub frame_number: u64,
    /// Time the frame was completed.
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Create a frame stamped with the current time.
    pub fn new(width: u32, height: u32, pixel_type: PixelType, data: Bytes, frame_number: u64) -> Self {
        Self {
            width,
            height,
            pixel_type,
            data,
            frame_number,
            timestamp: Utc::now(),
        }
    }

    /// Array shape, `(height, width)`.
    pub fn shape(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    /// Expected payload size for the frame geometry.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_type.bytes_per_pixel()
    }

    /// Pixel value at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * self.pixel_type.bytes_per_pixel();
        match self.pixel_type {
            PixelType::U8 => self.data.get(idx).map(|&v| u16::from(v)),
            PixelType::U16 => {
                let lo = *self.data.get(idx)?;
                let hi = *self.data.get(idx + 1)?;
                Some(u16::from_le_bytes([lo, hi]))
            }
        }
    }

    /// Mean pixel value.
    pub fn mean(&self) -> f64 {
        let count = self.width as usize * self.height as usize;
        if count == 0 {
            return 0.0;
        }
        let sum: u64 = match self.pixel_type {
            PixelType::U8 => self.data.iter().map(|&v| u64::from(v)).sum(),
            PixelType::U16 => self
                .data
                .chunks_exact(2)
                .map(|c| u64::from(u16::from_le_bytes([c[0], c[1]])))
                .sum(),
        };
        sum as f64 / count as f64
    }
}
