//! Host-side pixel and tensor types.
//!
//! # Layouts
//!
//! - [`PixelBuffer`]: row-major, interleaved channels, one `u8` per channel.
//!   Byte size is always `width × height × channels`.
//! - [`Tensor`]: planar `CHW` `f32`.  Element count is always
//!   `channels × height × width`; plane `c` starts at `c × height × width`.
//!
//! Channel order is opaque to the engine.  Callers convert between display
//! colour orders (BGR/RGB) themselves.

use crate::error::{EngineError, Result};

/// Channel counts accepted by the engine (RGB and RGBA-like).
pub const SUPPORTED_CHANNELS: [usize; 2] = [3, 4];

// ─── PixelBuffer ─────────────────────────────────────────────────────────────

/// An 8-bit interleaved image owned by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap `data` as a `width × height × channels` image.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Configuration`] for zero dimensions or a channel
    ///   count outside [`SUPPORTED_CHANNELS`].
    /// - [`EngineError::InvalidBufferSize`] if `data.len()` does not match.
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        validate_geometry(width, height, channels)?;
        let expected = width * height * channels;
        if data.len() != expected {
            return Err(EngineError::InvalidBufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Allocate a zero-filled image.
    pub fn zeroed(width: usize, height: usize, channels: usize) -> Result<Self> {
        validate_geometry(width, height, channels)?;
        Ok(Self {
            width,
            height,
            channels,
            data: vec![0; width * height * channels],
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// `(width, height, channels)`.
    #[inline]
    pub fn geometry(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.channels)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Overwrite the pixel data in place, keeping the allocation.
    pub fn copy_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.data.len() {
            return Err(EngineError::InvalidBufferSize {
                expected: self.data.len(),
                actual: bytes.len(),
            });
        }
        self.data.copy_from_slice(bytes);
        Ok(())
    }
}

fn validate_geometry(width: usize, height: usize, channels: usize) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(EngineError::Configuration(format!(
            "image dimensions must be non-zero, got {width}x{height}"
        )));
    }
    if !SUPPORTED_CHANNELS.contains(&channels) {
        return Err(EngineError::Configuration(format!(
            "channel count must be 3 or 4, got {channels}"
        )));
    }
    Ok(())
}

// ─── Tensor ──────────────────────────────────────────────────────────────────

/// A planar `CHW` single-precision tensor (implicit batch of one).
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    /// Wrap planar data.  Fails with [`EngineError::InvalidBufferSize`]
    /// (counted in elements) on a length mismatch.
    pub fn from_vec(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        let expected = channels * height * width;
        if data.len() != expected {
            return Err(EngineError::InvalidBufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// `[C, H, W]`.
    #[inline]
    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    /// Elements per channel plane (`H × W`).
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn plane(&self, c: usize) -> &[f32] {
        let n = self.plane_len();
        &self.data[c * n..(c + 1) * n]
    }

    #[inline]
    pub fn plane_mut(&mut self, c: usize) -> &mut [f32] {
        let n = self.plane_len();
        &mut self.data[c * n..(c + 1) * n]
    }

    #[inline]
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    /// Size of the tensor payload in bytes.
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}
