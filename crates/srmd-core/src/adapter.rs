//! Image buffer adapter: interleaved `u8` pixels ↔ planar `f32` tensors.
//!
//! Both directions are pure and total for well-formed inputs.  Values are
//! carried unchanged (no normalization, no channel reordering); the executor
//! owns any scaling the network needs.

use crate::error::{EngineError, Result};
use crate::types::{PixelBuffer, Tensor};

/// Deinterleave `buf` into a `C×H×W` tensor.  Values stay in `[0, 255]`.
pub fn to_tensor(buf: &PixelBuffer) -> Tensor {
    let (w, h, c) = buf.geometry();
    let mut tensor = Tensor::zeros(c, h, w);
    let plane = w * h;
    let src = buf.as_bytes();
    let dst = tensor.as_mut_slice();
    for (i, px) in src.chunks_exact(c).enumerate() {
        for (ch, &v) in px.iter().enumerate() {
            dst[ch * plane + i] = v as f32;
        }
    }
    tensor
}

/// Interleave `tensor` into a new `width × height × channels` pixel buffer.
///
/// Each value is rounded to the nearest integer and clamped to `[0, 255]`.
///
/// # Errors
///
/// [`EngineError::InvalidBufferSize`] if the tensor shape does not match the
/// requested geometry.
pub fn from_tensor(
    tensor: &Tensor,
    width: usize,
    height: usize,
    channels: usize,
) -> Result<PixelBuffer> {
    let mut out = PixelBuffer::zeroed(width, height, channels)?;
    write_tensor(tensor, &mut out)?;
    Ok(out)
}

/// Interleave `tensor` into an existing buffer of matching geometry.
pub fn write_tensor(tensor: &Tensor, out: &mut PixelBuffer) -> Result<()> {
    let (w, h, c) = out.geometry();
    if tensor.shape() != [c, h, w] {
        return Err(EngineError::InvalidBufferSize {
            expected: c * h * w,
            actual: tensor.as_slice().len(),
        });
    }
    let plane = w * h;
    let src = tensor.as_slice();
    for (i, px) in out.as_bytes_mut().chunks_exact_mut(c).enumerate() {
        for (ch, dst) in px.iter_mut().enumerate() {
            *dst = quantize(src[ch * plane + i]);
        }
    }
    Ok(())
}

/// Round to nearest and clamp to the `u8` range.  NaN maps to 0.
#[inline]
pub fn quantize(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: usize, h: usize, c: usize) -> PixelBuffer {
        let data = (0..w * h * c).map(|i| (i * 37 % 256) as u8).collect();
        PixelBuffer::new(w, h, c, data).unwrap()
    }

    #[test]
    fn round_trip_is_identity() {
        for c in [3, 4] {
            let buf = gradient(7, 5, c);
            let t = to_tensor(&buf);
            let back = from_tensor(&t, 7, 5, c).unwrap();
            assert_eq!(back, buf);
        }
    }

    #[test]
    fn to_tensor_is_planar() {
        let buf = PixelBuffer::new(2, 1, 3, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let t = to_tensor(&buf);
        assert_eq!(t.shape(), [3, 1, 2]);
        assert_eq!(t.as_slice(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn from_tensor_rounds_and_clamps() {
        let t = Tensor::from_vec(3, 1, 1, vec![-4.0, 127.5, 300.0]).unwrap();
        let buf = from_tensor(&t, 1, 1, 3).unwrap();
        assert_eq!(buf.as_bytes(), &[0, 128, 255]);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn from_tensor_rejects_shape_mismatch() {
        let t = Tensor::zeros(3, 2, 2);
        assert!(matches!(
            from_tensor(&t, 2, 2, 4),
            Err(EngineError::InvalidBufferSize { .. })
        ));
    }
}
