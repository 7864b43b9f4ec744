//! Conversions between [`PixelBuffer`] and the `image` / `ndarray` types.

use srmd_core::error::{EngineError, Result};
use srmd_core::types::PixelBuffer;

use crate::engine::SrmdEngine;

#[cfg(feature = "image")]
mod image_impl {
    use image::{DynamicImage, RgbImage, RgbaImage};

    use super::*;

    /// Borrow or convert `img` into 8-bit RGB or RGBA bytes.
    fn to_pixel_buffer(img: &DynamicImage) -> Result<PixelBuffer> {
        let (w, h) = (img.width() as usize, img.height() as usize);
        match img {
            DynamicImage::ImageRgb8(buf) => PixelBuffer::new(w, h, 3, buf.as_raw().clone()),
            DynamicImage::ImageRgba8(buf) => PixelBuffer::new(w, h, 4, buf.as_raw().clone()),
            other if other.color().has_alpha() => {
                PixelBuffer::new(w, h, 4, other.to_rgba8().into_raw())
            }
            other => PixelBuffer::new(w, h, 3, other.to_rgb8().into_raw()),
        }
    }

    fn from_pixel_buffer(buf: PixelBuffer) -> Result<DynamicImage> {
        let (w, h, c) = buf.geometry();
        let (w, h) = (dim(w)?, dim(h)?);
        let bytes = buf.into_bytes();
        let img = match c {
            3 => RgbImage::from_raw(w, h, bytes).map(DynamicImage::ImageRgb8),
            _ => RgbaImage::from_raw(w, h, bytes).map(DynamicImage::ImageRgba8),
        };
        img.ok_or_else(|| EngineError::InvariantViolation(format!("{w}x{h}x{c} image buffer")))
    }

    fn dim(v: usize) -> Result<u32> {
        u32::try_from(v)
            .map_err(|_| EngineError::Configuration(format!("image dimension {v} exceeds u32")))
    }

    impl SrmdEngine {
        /// Upscale a decoded image.  RGB8 and RGBA8 are used as they are;
        /// other colour types go through RGB8, or RGBA8 when they carry
        /// alpha.
        pub fn process_image(&self, img: &DynamicImage) -> Result<DynamicImage> {
            let out = self.process(&to_pixel_buffer(img)?)?;
            from_pixel_buffer(out)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use image::{GrayImage, ImageBuffer, Luma};

        #[test]
        fn gray_converts_to_rgb() {
            let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 2, Luma([9])));
            let buf = to_pixel_buffer(&img).unwrap();
            assert_eq!(buf.geometry(), (3, 2, 3));
            assert!(buf.as_bytes().iter().all(|&v| v == 9));
        }

        #[test]
        fn rgba_roundtrips_without_copying_channels() {
            let raw: Vec<u8> = (0..2 * 2 * 4).collect();
            let img = DynamicImage::ImageRgba8(ImageBuffer::from_raw(2, 2, raw.clone()).unwrap());
            let buf = to_pixel_buffer(&img).unwrap();
            assert_eq!(buf.channels(), 4);
            let back = from_pixel_buffer(buf).unwrap();
            assert_eq!(back.as_bytes(), raw.as_slice());
        }
    }
}

#[cfg(feature = "ndarray")]
mod ndarray_impl {
    use ndarray::{Array3, ArrayView3};

    use super::*;

    impl SrmdEngine {
        /// Upscale an `(H, W, C)` array of 3 or 4 channels.
        pub fn process_array(&self, array: ArrayView3<'_, u8>) -> Result<Array3<u8>> {
            let (h, w, c) = array.dim();
            let bytes = match array.as_slice() {
                Some(slice) => slice.to_vec(),
                None => array.iter().copied().collect(),
            };
            let out = self.process(&PixelBuffer::new(w, h, c, bytes)?)?;
            let (ow, oh, oc) = out.geometry();
            Array3::from_shape_vec((oh, ow, oc), out.into_bytes())
                .map_err(|e| EngineError::InvariantViolation(format!("output array: {e}")))
        }
    }
}
