//! Decoding and derived rasters.
//!
//! Every tick decodes the camera frame once at full resolution and derives the
//! smaller artifacts it needs from that buffer: a grayscale motion grid for the
//! heuristic strategy and a normalized planar tensor for the model strategy.

use image::imageops::{self, FilterType};

use crate::error::DecodeError;
use crate::frame::{Channels, PixelBuffer};

/// Width of the downsampled grayscale grid used for frame differencing.
pub const MOTION_GRID_WIDTH: u32 = 320;
/// Height of the downsampled grayscale grid used for frame differencing.
pub const MOTION_GRID_HEIGHT: u32 = 240;

/// Decode an encoded image (JPEG/PNG) into an RGB buffer.
pub fn decode(bytes: &[u8]) -> Result<PixelBuffer, DecodeError> {
    let image = image::load_from_memory(bytes)?;
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(PixelBuffer::new_unchecked(
        width,
        height,
        Channels::Rgb,
        rgb.into_raw(),
    ))
}

/// Resize to exactly `width` x `height` (aspect ratio is not preserved).
pub fn resize(buf: &PixelBuffer, width: u32, height: u32) -> PixelBuffer {
    if buf.width == width && buf.height == height {
        return buf.clone();
    }
    let raw = buf.as_raw().to_vec();
    let resized = match buf.channels {
        Channels::Rgb => image::RgbImage::from_raw(buf.width, buf.height, raw)
            .map(|img| imageops::resize(&img, width, height, FilterType::Triangle).into_raw()),
        Channels::Gray => image::GrayImage::from_raw(buf.width, buf.height, raw)
            .map(|img| imageops::resize(&img, width, height, FilterType::Triangle).into_raw()),
    };
    // PixelBuffer guarantees a matching length, so from_raw cannot reject it.
    let data = resized
        .unwrap_or_else(|| vec![0; width as usize * height as usize * buf.channels.count()]);
    PixelBuffer::new_unchecked(width, height, buf.channels, data)
}

/// Convert to single-channel luma (ITU-R BT.601 weights).
pub fn to_grayscale(buf: &PixelBuffer) -> PixelBuffer {
    match buf.channels {
        Channels::Gray => buf.clone(),
        Channels::Rgb => {
            let data = buf
                .as_raw()
                .chunks_exact(3)
                .map(|px| {
                    let luma =
                        0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                    luma.round().clamp(0.0, 255.0) as u8
                })
                .collect();
            PixelBuffer::new_unchecked(buf.width, buf.height, Channels::Gray, data)
        }
    }
}

/// Small grayscale raster for cheap frame-to-frame comparison.
pub fn motion_grid(buf: &PixelBuffer) -> PixelBuffer {
    resize(&to_grayscale(buf), MOTION_GRID_WIDTH, MOTION_GRID_HEIGHT)
}

/// Rank-4 `[1, 3, size, size]` float tensor, planar RGB, values in `[0, 1]`.
#[derive(Clone, Debug)]
pub struct ModelInput {
    pub size: u32,
    pub data: Vec<f32>,
}

impl ModelInput {
    pub fn shape(&self) -> [usize; 4] {
        [1, 3, self.size as usize, self.size as usize]
    }
}

/// Resize to the model's square input and reorder interleaved RGB into planes.
pub fn to_model_input(buf: &PixelBuffer, size: u32) -> ModelInput {
    let rgb = match buf.channels {
        Channels::Rgb => resize(buf, size, size),
        Channels::Gray => {
            let resized = resize(buf, size, size);
            let data = resized.as_raw().iter().flat_map(|&v| [v, v, v]).collect();
            PixelBuffer::new_unchecked(size, size, Channels::Rgb, data)
        }
    };
    let plane = size as usize * size as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (i, px) in rgb.as_raw().chunks_exact(3).enumerate() {
        data[i] = px[0] as f32 / 255.0;
        data[plane + i] = px[1] as f32 / 255.0;
        data[2 * plane + i] = px[2] as f32 / 255.0;
    }
    ModelInput { size, data }
}
