//! Byte-level fast path for sequences of same-sized images.
//!
//! A [`StreamSession`] keeps one input and one output buffer sized for the
//! last geometry it saw.  Matching frames are copied into the existing input
//! buffer and upscaled into the existing output buffer; a new geometry
//! reallocates both.

use srmd_core::error::Result;
use srmd_core::types::PixelBuffer;
use tracing::debug;

use crate::engine::SrmdEngine;

/// Reusable buffers bound to one engine.
pub struct StreamSession<'e> {
    engine: &'e SrmdEngine,
    input: Option<PixelBuffer>,
    output: Option<PixelBuffer>,
    reallocations: usize,
}

impl<'e> StreamSession<'e> {
    pub(crate) fn new(engine: &'e SrmdEngine) -> Self {
        Self {
            engine,
            input: None,
            output: None,
            reallocations: 0,
        }
    }

    /// Upscale raw interleaved `bytes` of a `width × height × channels`
    /// image; the result borrows the session's output buffer.
    pub fn process_bytes(
        &mut self,
        bytes: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<&[u8]> {
        let scale = self.engine.usable_model()?.scale();
        let geometry = (width, height, channels);
        let out_geometry = (width * scale, height * scale, channels);

        // A rejected frame leaves both buffers in place.
        let input = match &mut self.input {
            Some(buf) if buf.geometry() == geometry => {
                buf.copy_from_bytes(bytes)?;
                buf
            }
            slot => {
                let fresh = PixelBuffer::new(width, height, channels, bytes.to_vec())?;
                self.output = None;
                slot.insert(fresh)
            }
        };

        let output = match self.output.take() {
            Some(buf) if buf.geometry() == out_geometry => buf,
            _ => {
                self.reallocations += 1;
                debug!(width, height, channels, scale, "Stream buffers reallocated");
                PixelBuffer::zeroed(out_geometry.0, out_geometry.1, channels)?
            }
        };
        let output = self.output.insert(output);

        self.engine.process_into(input, output)?;
        Ok(output.as_bytes())
    }

    /// How many times the buffers had to be (re)allocated.
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    /// Input geometry the buffers are currently sized for.
    pub fn geometry(&self) -> Option<(usize, usize, usize)> {
        self.input.as_ref().map(PixelBuffer::geometry)
    }
}
