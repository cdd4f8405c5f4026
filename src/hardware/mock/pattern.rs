//! Test images produced by the emulated camera.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::hardware::frame::PixelType;

/// Dark level added to every pixel, as a fraction of full scale.
const DARK_LEVEL: f64 = 0.05;

/// Render one frame of the selected test image.
///
/// - `Testimage1`: static diagonal gradient
/// - `Testimage2`: gradient that moves one column per frame
/// - anything else: sensor noise around the dark level
pub fn render(
    selector: &str,
    width: u32,
    height: u32,
    pixel_type: PixelType,
    frame_number: u64,
) -> Bytes {
    let w = width as usize;
    let h = height as usize;
    let full_scale = match pixel_type {
        PixelType::U8 => f64::from(u8::MAX),
        PixelType::U16 => f64::from(u16::MAX),
    };
    let span = (w + h).max(1) as f64;
    let shift = match selector {
        "Testimage2" => frame_number as usize,
        _ => 0,
    };

    let mut rng = StdRng::seed_from_u64(frame_number);
    let mut data = Vec::with_capacity(w * h * pixel_type.bytes_per_pixel());

    for y in 0..h {
        for x in 0..w {
            let level = match selector {
                "Testimage1" | "Testimage2" => ((x + shift) % w.max(1) + y) as f64 / span,
                _ => DARK_LEVEL + rng.gen_range(-0.02..0.02),
            };
            let value = (level.clamp(0.0, 1.0) * full_scale).round();
            match pixel_type {
                PixelType::U8 => data.push(value as u8),
                PixelType::U16 => data.extend_from_slice(&(value as u16).to_le_bytes()),
            }
        }
    }
    Bytes::from(data)
}
