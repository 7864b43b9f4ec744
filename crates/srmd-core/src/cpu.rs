//! CPU fallback device.
//!
//! Runs the network IR with plain `f32` loops.  Convolutions fan out across
//! output channels on the rayon pool; everything else is sequential.  The
//! memory budget is the host's available memory as reported by `sysinfo`.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::backend::{ComputeDevice, DeviceInfo, DeviceKind, LoadedNetwork};
use crate::error::{EngineError, Result};
use crate::graph::{Conv2d, Layer, Network};
use crate::types::Tensor;

/// Minimum output channels before a convolution uses rayon parallelism.
const PAR_CHANNEL_THRESHOLD: usize = 4;

// ─── Device ──────────────────────────────────────────────────────────────────

pub struct CpuDevice {
    info: DeviceInfo,
    lanes: usize,
}

impl CpuDevice {
    /// Describe the host as device `index`, with a single submission lane.
    pub fn new(index: usize) -> Self {
        let sys = sysinfo::System::new_with_specifics(
            sysinfo::RefreshKind::new().with_memory(sysinfo::MemoryRefreshKind::everything()),
        );
        Self {
            info: DeviceInfo {
                index,
                name: format!("CPU ({} threads)", rayon::current_num_threads()),
                kind: DeviceKind::Cpu,
                total_memory: sys.total_memory() as usize,
            },
            lanes: 1,
        }
    }

    /// Allow up to `lanes` tiles to run concurrently.
    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self
    }
}

impl ComputeDevice for CpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn available_memory(&self) -> Result<usize> {
        let sys = sysinfo::System::new_with_specifics(
            sysinfo::RefreshKind::new().with_memory(sysinfo::MemoryRefreshKind::everything()),
        );
        Ok(sys.available_memory() as usize)
    }

    fn queue_count(&self) -> usize {
        self.lanes
    }

    fn load_network(&self, network: Arc<Network>) -> Result<Arc<dyn LoadedNetwork>> {
        let available = self.available_memory()?;
        let need = network.weight_bytes();
        if need > available {
            return Err(EngineError::OutOfMemory {
                need_bytes: need,
                available_bytes: available,
            });
        }
        debug!(network = %network.name, weight_bytes = need, "Network bound to CPU device");
        Ok(Arc::new(CpuNetwork { network }))
    }
}

/// Network executed on the host.  Weights stay in the shared [`Network`].
pub struct CpuNetwork {
    network: Arc<Network>,
}

impl LoadedNetwork for CpuNetwork {
    fn network(&self) -> &Network {
        &self.network
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        if input.channels() != self.network.input_channels {
            return Err(EngineError::Inference(format!(
                "network '{}' expects {} input channels, got {}",
                self.network.name,
                self.network.input_channels,
                input.channels()
            )));
        }
        let mut x = input.clone();
        for layer in &self.network.layers {
            x = match layer {
                Layer::Conv2d(conv) => conv2d(conv, &x)?,
                Layer::ReLU { slope } => {
                    relu_inplace(&mut x, *slope);
                    x
                }
                Layer::PixelShuffle { factor } => pixel_shuffle(&x, *factor)?,
            };
        }
        Ok(x)
    }
}

// ─── Reference operators ─────────────────────────────────────────────────────

/// Direct convolution with zero padding and the fused activation.
pub fn conv2d(conv: &Conv2d, input: &Tensor) -> Result<Tensor> {
    if input.channels() != conv.in_channels {
        return Err(EngineError::Inference(format!(
            "convolution expects {} input channels, got {}",
            conv.in_channels,
            input.channels()
        )));
    }
    let (in_h, in_w) = (input.height(), input.width());
    let (out_h, out_w) = conv.output_hw(in_h, in_w).ok_or_else(|| {
        EngineError::Inference(format!(
            "{in_w}x{in_h} input is smaller than the {}x{} kernel",
            conv.kernel_w, conv.kernel_h
        ))
    })?;

    let mut out = Tensor::zeros(conv.out_channels, out_h, out_w);
    let plane = out_h * out_w;
    let compute = |oc: usize, dst: &mut [f32]| {
        let bias = conv.bias.as_ref().map_or(0.0, |b| b[oc]);
        dst.fill(bias);
        for ic in 0..conv.in_channels {
            let src = input.plane(ic);
            for ky in 0..conv.kernel_h {
                for kx in 0..conv.kernel_w {
                    let w = conv.weight(oc, ic, ky, kx);
                    if w == 0.0 {
                        continue;
                    }
                    accumulate_tap(conv, src, in_h, in_w, ky, kx, w, dst, out_h, out_w);
                }
            }
        }
        for v in dst.iter_mut() {
            *v = conv.activation.apply(*v);
        }
    };

    let data = out.as_mut_slice();
    if conv.out_channels >= PAR_CHANNEL_THRESHOLD {
        data.par_chunks_mut(plane)
            .enumerate()
            .for_each(|(oc, dst)| compute(oc, dst));
    } else {
        for (oc, dst) in data.chunks_mut(plane).enumerate() {
            compute(oc, dst);
        }
    }
    Ok(out)
}

/// Add `w × input[y·s + ky·d − pad, x·s + kx·d − pad]` into every output pixel.
#[allow(clippy::too_many_arguments)]
#[inline]
fn accumulate_tap(
    conv: &Conv2d,
    src: &[f32],
    in_h: usize,
    in_w: usize,
    ky: usize,
    kx: usize,
    w: f32,
    dst: &mut [f32],
    out_h: usize,
    out_w: usize,
) {
    let off_y = (ky * conv.dilation_h) as isize - conv.padding.top as isize;
    let off_x = (kx * conv.dilation_w) as isize - conv.padding.left as isize;
    for oy in 0..out_h {
        let iy = (oy * conv.stride_h) as isize + off_y;
        if iy < 0 || iy >= in_h as isize {
            continue;
        }
        let src_row = &src[iy as usize * in_w..(iy as usize + 1) * in_w];
        let dst_row = &mut dst[oy * out_w..(oy + 1) * out_w];
        for (ox, d) in dst_row.iter_mut().enumerate() {
            let ix = (ox * conv.stride_w) as isize + off_x;
            if ix >= 0 && ix < in_w as isize {
                *d += w * src_row[ix as usize];
            }
        }
    }
}

/// Leaky ReLU in place; `slope == 0` is a plain ReLU.
pub fn relu_inplace(t: &mut Tensor, slope: f32) {
    for v in t.as_mut_slice() {
        if *v < 0.0 {
            *v *= slope;
        }
    }
}

/// Depth-to-space with PyTorch channel order:
/// `out[c, y·r + i, x·r + j] = in[c·r² + i·r + j, y, x]`.
pub fn pixel_shuffle(input: &Tensor, factor: usize) -> Result<Tensor> {
    let r2 = factor * factor;
    if factor == 0 || input.channels() % r2 != 0 {
        return Err(EngineError::Inference(format!(
            "pixel shuffle factor {factor} does not divide {} channels",
            input.channels()
        )));
    }
    let (h, w) = (input.height(), input.width());
    let out_c = input.channels() / r2;
    let (out_h, out_w) = (h * factor, w * factor);
    let mut out = Tensor::zeros(out_c, out_h, out_w);
    let dst = out.as_mut_slice();
    for c in 0..out_c {
        for i in 0..factor {
            for j in 0..factor {
                let src = input.plane(c * r2 + i * factor + j);
                for y in 0..h {
                    let row = &mut dst[(c * out_h + y * factor + i) * out_w..][..out_w];
                    for x in 0..w {
                        row[x * factor + j] = src[y * w + x];
                    }
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Activation, Padding};

    fn conv3x3(in_c: usize, out_c: usize, weights: Vec<f32>, bias: Vec<f32>) -> Conv2d {
        Conv2d {
            in_channels: in_c,
            out_channels: out_c,
            kernel_w: 3,
            kernel_h: 3,
            stride_w: 1,
            stride_h: 1,
            dilation_w: 1,
            dilation_h: 1,
            padding: Padding {
                left: 1,
                right: 1,
                top: 1,
                bottom: 1,
            },
            weights,
            bias: Some(bias),
            activation: Activation::None,
        }
    }

    #[test]
    fn identity_kernel_copies_input() {
        let mut w = vec![0.0; 9];
        w[4] = 1.0;
        let conv = conv3x3(1, 1, w, vec![0.5]);
        let input = Tensor::from_vec(1, 2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let out = conv2d(&conv, &input).unwrap();
        assert_eq!(out.as_slice(), &[1.5, 2.5, 3.5, 4.5, 5.5, 6.5]);
    }

    #[test]
    fn box_kernel_sees_zero_padding() {
        let conv = conv3x3(1, 1, vec![1.0; 9], vec![0.0]);
        let input = Tensor::from_vec(1, 2, 2, vec![1.0; 4]).unwrap();
        let out = conv2d(&conv, &input).unwrap();
        assert_eq!(out.as_slice(), &[4.0; 4]);
    }

    #[test]
    fn parallel_and_sequential_paths_agree() {
        let in_c = 2;
        let out_c = PAR_CHANNEL_THRESHOLD + 1;
        let weights: Vec<f32> = (0..out_c * in_c * 9).map(|i| (i % 7) as f32 - 3.0).collect();
        let bias: Vec<f32> = (0..out_c).map(|i| i as f32).collect();
        let wide = conv3x3(in_c, out_c, weights.clone(), bias.clone());
        let input = Tensor::from_vec(in_c, 3, 4, (0..24).map(|v| v as f32).collect()).unwrap();
        let all = conv2d(&wide, &input).unwrap();

        let oc = 2;
        let single = conv3x3(
            in_c,
            1,
            weights[oc * in_c * 9..(oc + 1) * in_c * 9].to_vec(),
            vec![bias[oc]],
        );
        let one = conv2d(&single, &input).unwrap();
        assert_eq!(all.plane(oc), one.plane(0));
    }

    #[test]
    fn pixel_shuffle_matches_pytorch_order() {
        // 4 channels of 1×1 → 1 channel of 2×2.
        let input = Tensor::from_vec(4, 1, 1, vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let out = pixel_shuffle(&input, 2).unwrap();
        assert_eq!(out.shape(), [1, 2, 2]);
        assert_eq!(out.as_slice(), &[0.0, 1.0, 2.0, 3.0]);
        assert!(pixel_shuffle(&input, 3).is_err());
    }

    #[test]
    fn cpu_network_forward() {
        let net = Arc::new(Network {
            name: "toy".into(),
            input_channels: 1,
            layers: vec![
                Layer::Conv2d(conv3x3(1, 4, vec![0.0; 36], vec![-1.0, 1.0, 2.0, 3.0])),
                Layer::ReLU { slope: 0.0 },
                Layer::PixelShuffle { factor: 2 },
            ],
        });
        let device = CpuDevice::new(0);
        let loaded = device.load_network(net).unwrap();
        let out = loaded.forward(&Tensor::zeros(1, 2, 2)).unwrap();
        assert_eq!(out.shape(), [1, 4, 4]);
        assert_eq!(&out.as_slice()[..4], &[0.0, 1.0, 0.0, 1.0]);
        assert!(loaded.forward(&Tensor::zeros(2, 2, 2)).is_err());
    }
}
