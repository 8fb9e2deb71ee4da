//! Frame and pixel buffer types.
//!
//! - `Frame`: the encoded image exactly as the camera returned it. Immutable once
//!   captured; owned by the tick that fetched it and dropped at the end of it.
//! - `PixelBuffer`: a decoded, interleaved raster derived from a `Frame`. Several
//!   may exist per tick (full resolution, motion grid, model input).

use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

use image::{ImageDecoder, ImageReader};

use crate::error::DecodeError;

/// Encoded camera frame.
///
/// Deliberately not `Clone`: a frame belongs to the tick that captured it and is
/// superseded by the next one, never shared or mutated.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    /// URL the frame was accepted from.
    pub source_url: String,
    /// Wall-clock capture time, used for published detection timestamps.
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(data: Vec<u8>, source_url: impl Into<String>) -> Self {
        Self {
            data,
            source_url: source_url.into(),
            captured_at: SystemTime::now(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Capture time in milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> u64 {
        epoch_millis(self.captured_at)
    }

    /// Reads the declared dimensions from the image header without decoding pixels.
    pub fn declared_dimensions(&self) -> Result<(u32, u32), DecodeError> {
        Ok(self.header()?.into_dimensions()?)
    }

    /// Channel count the header declares: 1 for grayscale, 3 for RGB, 4 with alpha.
    pub fn declared_channels(&self) -> Result<u8, DecodeError> {
        let decoder = self.header()?.into_decoder()?;
        Ok(decoder.color_type().channel_count())
    }

    fn header(&self) -> Result<ImageReader<Cursor<&[u8]>>, DecodeError> {
        ImageReader::new(Cursor::new(self.data.as_slice()))
            .with_guessed_format()
            .map_err(|e| DecodeError(image::ImageError::IoError(e)))
    }
}

/// Channel layout of a `PixelBuffer`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channels {
    Gray,
    Rgb,
}

impl Channels {
    pub fn count(self) -> usize {
        match self {
            Channels::Gray => 1,
            Channels::Rgb => 3,
        }
    }
}

/// Decoded raster, interleaved row-major (`[r, g, b, r, g, b, ...]` for RGB).
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: Channels,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wraps raw pixels. Returns `None` when the length does not match the shape.
    pub fn from_raw(width: u32, height: u32, channels: Channels, data: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(channels.count())?;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub(crate) fn new_unchecked(
        width: u32,
        height: u32,
        channels: Channels,
        data: Vec<u8>,
    ) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * channels.count()
        );
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    /// Buffer filled with a single RGB colour.
    pub fn solid_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            channels: Channels::Rgb,
            data,
        }
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Intensity at `(x, y)` of a grayscale buffer.
    pub(crate) fn luma_at(&self, x: usize, y: usize) -> u8 {
        debug_assert_eq!(self.channels, Channels::Gray);
        self.data[y * self.width as usize + x]
    }
}

pub(crate) fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
