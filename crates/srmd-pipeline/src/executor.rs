//! Per-tile network execution.
//!
//! A padded tile in `[0, 255]` goes in; the scaled tile in `[0, 255]` comes
//! out (unclamped, the adapter quantizes).  The network sees
//! `RGB/255 ‖ kernel code ‖ noise map` and its output is rescaled by 255.
//! Alpha never reaches the network: it is upscaled bicubically.

use srmd_core::error::{EngineError, Result};
use srmd_core::types::Tensor;
use srmd_model::{Model, NoiseVariant};

const COLOR_CHANNELS: usize = 3;
const PIXEL_MAX: f32 = 255.0;
/// Bicubic sharpness used for the alpha plane.
const CUBIC_A: f32 = -0.75;

// ─── Dihedral transforms ─────────────────────────────────────────────────────

/// One of the 8 symmetries of the square: optional transpose followed by
/// optional horizontal and vertical flips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transform {
    pub transpose: bool,
    pub flip_h: bool,
    pub flip_v: bool,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        transpose: false,
        flip_h: false,
        flip_v: false,
    };

    /// All 8 transforms, identity first.
    pub fn all() -> [Self; 8] {
        std::array::from_fn(|i| Self {
            transpose: i & 4 != 0,
            flip_h: i & 1 != 0,
            flip_v: i & 2 != 0,
        })
    }

    pub fn apply(self, t: &Tensor) -> Tensor {
        let t = if self.transpose { transpose(t) } else { t.clone() };
        flip(t, self.flip_h, self.flip_v)
    }

    /// Undo [`apply`](Self::apply); works on any image size, so it also maps
    /// the scaled network output back.
    pub fn invert(self, t: Tensor) -> Tensor {
        let t = flip(t, self.flip_h, self.flip_v);
        if self.transpose { transpose(&t) } else { t }
    }
}

fn transpose(t: &Tensor) -> Tensor {
    let [c, h, w] = t.shape();
    let mut out = Tensor::zeros(c, w, h);
    for ch in 0..c {
        let src = t.plane(ch);
        let dst = out.plane_mut(ch);
        for y in 0..h {
            for x in 0..w {
                dst[x * h + y] = src[y * w + x];
            }
        }
    }
    out
}

fn flip(mut t: Tensor, horizontal: bool, vertical: bool) -> Tensor {
    let [c, h, w] = t.shape();
    for ch in 0..c {
        let plane = t.plane_mut(ch);
        if horizontal {
            plane.chunks_exact_mut(w).for_each(<[f32]>::reverse);
        }
        if vertical {
            for y in 0..h / 2 {
                let (top, bottom) = plane.split_at_mut((h - 1 - y) * w);
                top[y * w..(y + 1) * w].swap_with_slice(&mut bottom[..w]);
            }
        }
    }
    t
}

// ─── Executor ────────────────────────────────────────────────────────────────

/// Runs one model on padded tiles with fixed parameters.
pub struct TileExecutor<'a> {
    model: &'a Model,
    noise: i32,
    tta: bool,
}

impl<'a> TileExecutor<'a> {
    pub fn new(model: &'a Model, noise: i32, tta: bool) -> Self {
        Self { model, noise, tta }
    }

    pub fn scale(&self) -> usize {
        self.model.scale()
    }

    /// Upscale one padded tile of 3 or 4 channels.
    ///
    /// # Errors
    ///
    /// Backend failures from the network, [`EngineError::InferenceOutOfMemory`]
    /// included, and [`EngineError::InvariantViolation`] when the network
    /// returns an unexpected shape.
    pub fn run(&self, padded: &Tensor) -> Result<Tensor> {
        let [c, h, w] = padded.shape();
        if c != COLOR_CHANNELS && c != COLOR_CHANNELS + 1 {
            return Err(EngineError::InvariantViolation(format!(
                "tile has {c} channels, expected 3 or 4"
            )));
        }
        let s = self.scale();
        let rgb = color_planes(padded);

        let color = if self.tta {
            let mut acc = Tensor::zeros(COLOR_CHANNELS, h * s, w * s);
            let transforms = Transform::all();
            for t in transforms {
                let out = t.invert(self.infer(&t.apply(&rgb))?);
                for (a, v) in acc.as_mut_slice().iter_mut().zip(out.as_slice()) {
                    *a += v;
                }
            }
            let n = transforms.len() as f32;
            acc.as_mut_slice().iter_mut().for_each(|v| *v /= n);
            acc
        } else {
            self.infer(&rgb)?
        };

        if c == COLOR_CHANNELS {
            return Ok(color);
        }
        let alpha = bicubic_upscale(padded.plane(COLOR_CHANNELS), w, h, s);
        let mut data = color.into_vec();
        data.extend_from_slice(&alpha);
        Tensor::from_vec(c, h * s, w * s, data)
    }

    /// Network pass on a 3-plane `[0, 255]` image.
    fn infer(&self, rgb: &Tensor) -> Result<Tensor> {
        let [_, h, w] = rgb.shape();
        let s = self.scale();
        let input = self.condition(rgb);
        let mut out = self.model.network().forward(&input)?;
        let expected = [COLOR_CHANNELS, h * s, w * s];
        if out.shape() != expected {
            return Err(EngineError::InvariantViolation(format!(
                "network produced {:?}, expected {expected:?}",
                out.shape()
            )));
        }
        out.as_mut_slice().iter_mut().for_each(|v| *v *= PIXEL_MAX);
        Ok(out)
    }

    /// `RGB/255`, one constant plane per kernel-code entry and, for the
    /// denoise variant, the noise level map.
    fn condition(&self, rgb: &Tensor) -> Tensor {
        let [_, h, w] = rgb.shape();
        let mut input = Tensor::zeros(self.model.graph().input_channels, h, w);
        for ch in 0..COLOR_CHANNELS {
            for (d, v) in input.plane_mut(ch).iter_mut().zip(rgb.plane(ch)) {
                *d = v / PIXEL_MAX;
            }
        }
        for (i, &code) in self.model.kernel_code().iter().enumerate() {
            input.plane_mut(COLOR_CHANNELS + i).fill(code);
        }
        if self.model.variant() == NoiseVariant::Denoise {
            let plane = COLOR_CHANNELS + self.model.kernel_code().len();
            input.plane_mut(plane).fill(noise_level(self.noise));
        }
        input
    }
}

/// Noise map value fed to the denoise variant.
pub fn noise_level(noise: i32) -> f32 {
    noise.max(0) as f32 * 5.0 / PIXEL_MAX
}

fn color_planes(t: &Tensor) -> Tensor {
    let [c, h, w] = t.shape();
    if c == COLOR_CHANNELS {
        return t.clone();
    }
    let mut rgb = Tensor::zeros(COLOR_CHANNELS, h, w);
    let n = rgb.as_slice().len();
    rgb.as_mut_slice().copy_from_slice(&t.as_slice()[..n]);
    rgb
}

// ─── Bicubic alpha ───────────────────────────────────────────────────────────

fn cubic_weight(d: f32) -> f32 {
    let d = d.abs();
    if d <= 1.0 {
        ((CUBIC_A + 2.0) * d - (CUBIC_A + 3.0)) * d * d + 1.0
    } else if d < 2.0 {
        ((CUBIC_A * d - 5.0 * CUBIC_A) * d + 8.0 * CUBIC_A) * d - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

/// Source taps and weights for each of `len * scale` destination samples,
/// half-pixel centred and clamped to the edge.
fn cubic_taps(len: usize, scale: usize) -> Vec<([usize; 4], [f32; 4])> {
    (0..len * scale)
        .map(|o| {
            let src = (o as f32 + 0.5) / scale as f32 - 0.5;
            let base = src.floor();
            let frac = src - base;
            let mut idx = [0usize; 4];
            let mut wts = [0f32; 4];
            for k in 0..4 {
                let tap = base as isize + k as isize - 1;
                idx[k] = tap.clamp(0, len as isize - 1) as usize;
                wts[k] = cubic_weight(frac - (k as f32 - 1.0));
            }
            (idx, wts)
        })
        .collect()
}

/// Upscale one `w × h` plane by `scale` in both directions.
pub fn bicubic_upscale(plane: &[f32], w: usize, h: usize, scale: usize) -> Vec<f32> {
    let (ow, oh) = (w * scale, h * scale);
    let xs = cubic_taps(w, scale);
    let ys = cubic_taps(h, scale);

    let mut rows = vec![0f32; ow * h];
    for y in 0..h {
        let src = &plane[y * w..(y + 1) * w];
        for (x, (idx, wts)) in xs.iter().enumerate() {
            rows[y * ow + x] = (0..4).map(|k| src[idx[k]] * wts[k]).sum();
        }
    }
    let mut out = vec![0f32; ow * oh];
    for (y, (idx, wts)) in ys.iter().enumerate() {
        let dst = &mut out[y * ow..(y + 1) * ow];
        for (x, d) in dst.iter_mut().enumerate() {
            *d = (0..4).map(|k| rows[idx[k] * ow + x] * wts[k]).sum();
        }
    }
    out
}
