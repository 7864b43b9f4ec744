//! CUDA compute device: NVRTC-compiled network kernels launched via cudarc.
//!
//! # Kernel compilation
//!
//! The CUDA C source below is compiled to PTX once per device when the device
//! is opened.  Function handles are resolved once and reused by every
//! network loaded on that device.
//!
//! # Forward pass
//!
//! ```text
//! host tile ──htod──▶ ping ──conv──▶ pong ──relu──▶ pong ──shuffle──▶ ping ── … ──dtoh──▶ host
//! ```
//!
//! Two scratch buffers sized for the largest activation are allocated per
//! call and ping-ponged between layers.  All layer launches of one call run
//! on a single lane (CUDA stream); concurrent calls spread across lanes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cudarc::driver::{
    CudaDevice, CudaFunction, CudaSlice, CudaStream, DeviceRepr, DriverError, LaunchAsync,
    LaunchConfig,
};
use srmd_core::backend::{ComputeDevice, DeviceInfo, DeviceKind, LoadedNetwork};
use srmd_core::error::{EngineError, Result};
use srmd_core::graph::{Activation, Conv2d, Layer, Network};
use srmd_core::types::Tensor;
use tracing::{debug, info};

// ─── CUDA C kernel source ────────────────────────────────────────────────────

const NETWORK_CUDA_SRC: &str = r#"
struct ConvShape {
    int in_c, in_h, in_w;
    int out_c, out_h, out_w;
    int kernel_h, kernel_w;
    int stride_h, stride_w;
    int dilation_h, dilation_w;
    int pad_top, pad_left;
    int activation, has_bias;
    float act_a, act_b;
};

// One thread per output pixel; blockIdx.z selects the output channel.
extern "C" __global__ void conv2d_direct(
    const float* __restrict__ input,
    const float* __restrict__ weights,
    const float* __restrict__ bias,
    float* __restrict__ output,
    const ConvShape p)
{
    int ox = blockIdx.x * blockDim.x + threadIdx.x;
    int oy = blockIdx.y * blockDim.y + threadIdx.y;
    int oc = blockIdx.z;
    if (ox >= p.out_w || oy >= p.out_h || oc >= p.out_c) return;

    float acc = p.has_bias ? bias[oc] : 0.0f;
    const float* w = weights + (size_t)oc * p.in_c * p.kernel_h * p.kernel_w;
    for (int ic = 0; ic < p.in_c; ++ic) {
        const float* src = input + (size_t)ic * p.in_h * p.in_w;
        for (int ky = 0; ky < p.kernel_h; ++ky) {
            int iy = oy * p.stride_h - p.pad_top + ky * p.dilation_h;
            if (iy < 0 || iy >= p.in_h) { w += p.kernel_w; continue; }
            for (int kx = 0; kx < p.kernel_w; ++kx) {
                int ix = ox * p.stride_w - p.pad_left + kx * p.dilation_w;
                if (ix >= 0 && ix < p.in_w) {
                    acc += w[kx] * src[iy * p.in_w + ix];
                }
            }
            w += p.kernel_w;
        }
    }

    switch (p.activation) {
        case 1: acc = fmaxf(acc, 0.0f); break;
        case 2: acc = acc < 0.0f ? acc * p.act_a : acc; break;
        case 3: acc = fminf(fmaxf(acc, p.act_a), p.act_b); break;
        case 4: acc = 1.0f / (1.0f + expf(-acc)); break;
        default: break;
    }
    output[((size_t)oc * p.out_h + oy) * p.out_w + ox] = acc;
}

extern "C" __global__ void leaky_relu_inplace(float* data, int count, float slope)
{
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i >= count) return;
    float v = data[i];
    data[i] = v < 0.0f ? v * slope : v;
}

// out[c, y*r + i, x*r + j] = in[c*r*r + i*r + j, y, x]
extern "C" __global__ void pixel_shuffle(
    const float* __restrict__ input,
    float* __restrict__ output,
    int out_c, int in_h, int in_w, int r)
{
    int ox = blockIdx.x * blockDim.x + threadIdx.x;
    int oy = blockIdx.y * blockDim.y + threadIdx.y;
    int c = blockIdx.z;
    int out_w = in_w * r;
    int out_h = in_h * r;
    if (ox >= out_w || oy >= out_h || c >= out_c) return;

    int x = ox / r, j = ox % r;
    int y = oy / r, i = oy % r;
    int src_c = c * r * r + i * r + j;
    output[((size_t)c * out_h + oy) * out_w + ox] =
        input[((size_t)src_c * in_h + y) * in_w + x];
}
"#;

const MODULE_NAME: &str = "srmd_network";

const KERNEL_NAMES: &[&str] = &["conv2d_direct", "leaky_relu_inplace", "pixel_shuffle"];

/// CUDA streams per network unless the engine asks for another count.
const DEFAULT_LANES: usize = 2;

/// Launch geometry mirrored by `struct ConvShape` in the kernel source.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct ConvShape {
    in_c: i32,
    in_h: i32,
    in_w: i32,
    out_c: i32,
    out_h: i32,
    out_w: i32,
    kernel_h: i32,
    kernel_w: i32,
    stride_h: i32,
    stride_w: i32,
    dilation_h: i32,
    dilation_w: i32,
    pad_top: i32,
    pad_left: i32,
    activation: i32,
    has_bias: i32,
    act_a: f32,
    act_b: f32,
}

// SAFETY: `ConvShape` is `repr(C)`, `Copy`, and matches the kernel's by-value
// struct layout field for field.
unsafe impl DeviceRepr for ConvShape {}

fn activation_code(activation: Activation) -> (i32, f32, f32) {
    match activation {
        Activation::None => (0, 0.0, 0.0),
        Activation::ReLU => (1, 0.0, 0.0),
        Activation::LeakyReLU(slope) => (2, slope, 0.0),
        Activation::Clip { min, max } => (3, min, max),
        Activation::Sigmoid => (4, 0.0, 0.0),
    }
}

fn is_out_of_memory(err: &DriverError) -> bool {
    err.0 == cudarc::driver::sys::CUresult::CUDA_ERROR_OUT_OF_MEMORY
}

fn driver_err(context: &str, err: DriverError) -> EngineError {
    EngineError::Backend(format!("{context}: {err:?}"))
}

// ─── Enumeration ─────────────────────────────────────────────────────────────

/// Number of CUDA devices visible to the driver; 0 when no driver is loaded.
pub fn device_count() -> usize {
    // The dynamic loader panics when libcuda cannot be found.
    match panic::catch_unwind(CudaDevice::count) {
        Ok(Ok(n)) => usize::try_from(n).unwrap_or(0),
        Ok(Err(err)) => {
            debug!(error = ?err, "cuDeviceGetCount failed; no CUDA devices");
            0
        }
        Err(_) => {
            debug!("CUDA driver library not available; no CUDA devices");
            0
        }
    }
}

// ─── Compiled kernels ────────────────────────────────────────────────────────

struct NetworkKernels {
    conv2d: CudaFunction,
    leaky_relu: CudaFunction,
    pixel_shuffle: CudaFunction,
}

impl NetworkKernels {
    fn compile(device: &Arc<CudaDevice>) -> Result<Self> {
        let ptx = cudarc::nvrtc::compile_ptx_with_opts(
            NETWORK_CUDA_SRC,
            cudarc::nvrtc::CompileOptions {
                ftz: Some(true),
                prec_div: Some(false),
                prec_sqrt: Some(false),
                ..Default::default()
            },
        )
        .map_err(|err| EngineError::Backend(format!("NVRTC compile failed: {err:?}")))?;

        device
            .load_ptx(ptx, MODULE_NAME, KERNEL_NAMES)
            .map_err(|err| driver_err("load_ptx", err))?;

        let get_fn = |name: &str| -> Result<CudaFunction> {
            device.get_func(MODULE_NAME, name).ok_or_else(|| {
                EngineError::Backend(format!(
                    "Kernel function '{name}' not found in module '{MODULE_NAME}'"
                ))
            })
        };

        let kernels = Self {
            conv2d: get_fn("conv2d_direct")?,
            leaky_relu: get_fn("leaky_relu_inplace")?,
            pixel_shuffle: get_fn("pixel_shuffle")?,
        };
        info!(
            "NVRTC: compiled {} kernels from module '{MODULE_NAME}'",
            KERNEL_NAMES.len()
        );
        Ok(kernels)
    }
}

// ─── Device ──────────────────────────────────────────────────────────────────

/// One CUDA GPU exposed as a [`ComputeDevice`].
pub struct CudaComputeDevice {
    info: DeviceInfo,
    device: Arc<CudaDevice>,
    kernels: Arc<NetworkKernels>,
    lanes: usize,
}

impl CudaComputeDevice {
    /// Open CUDA device `ordinal` as engine device `index` and compile the
    /// network kernels for it.
    pub fn new(ordinal: usize, index: usize) -> Result<Self> {
        let unavailable = |reason: String| EngineError::DeviceUnavailable { index, reason };
        let device = panic::catch_unwind(AssertUnwindSafe(|| CudaDevice::new(ordinal)))
            .map_err(|_| unavailable("CUDA driver library not available".into()))?
            .map_err(|err| unavailable(format!("cuDeviceGet({ordinal}) failed: {err:?}")))?;
        let name = device
            .name()
            .unwrap_or_else(|_| format!("CUDA device {ordinal}"));
        device
            .bind_to_thread()
            .map_err(|err| unavailable(format!("context bind failed: {err:?}")))?;
        let (_, total) = cudarc::driver::result::mem_get_info()
            .map_err(|err| unavailable(format!("cuMemGetInfo failed: {err:?}")))?;
        let kernels = NetworkKernels::compile(&device)?;

        Ok(Self {
            info: DeviceInfo {
                index,
                name,
                kind: DeviceKind::Cuda,
                total_memory: total,
            },
            device,
            kernels: Arc::new(kernels),
            lanes: DEFAULT_LANES,
        })
    }

    /// Use `lanes` CUDA streams per loaded network.
    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self
    }

    fn free_memory(&self) -> Result<usize> {
        self.device
            .bind_to_thread()
            .map_err(|err| driver_err("context bind", err))?;
        let (free, _) =
            cudarc::driver::result::mem_get_info().map_err(|err| driver_err("cuMemGetInfo", err))?;
        Ok(free)
    }
}

impl ComputeDevice for CudaComputeDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn available_memory(&self) -> Result<usize> {
        self.free_memory()
    }

    fn queue_count(&self) -> usize {
        self.lanes
    }

    fn load_network(&self, network: Arc<Network>) -> Result<Arc<dyn LoadedNetwork>> {
        let need = network.weight_bytes();
        let available = self.free_memory()?;
        if need > available {
            return Err(EngineError::OutOfMemory {
                need_bytes: need,
                available_bytes: available,
            });
        }

        let upload = |data: &[f32]| -> Result<CudaSlice<f32>> {
            self.device.htod_sync_copy(data).map_err(|err| {
                if is_out_of_memory(&err) {
                    EngineError::OutOfMemory {
                        need_bytes: need,
                        available_bytes: available,
                    }
                } else {
                    driver_err("weight upload", err)
                }
            })
        };

        let mut layers = Vec::with_capacity(network.layers.len());
        for layer in &network.layers {
            layers.push(match layer {
                Layer::Conv2d(conv) => DeviceLayer::Conv {
                    weights: upload(&conv.weights)?,
                    // Kernels always receive a valid bias pointer.
                    bias: upload(conv.bias.as_deref().unwrap_or(&[0.0]))?,
                },
                Layer::ReLU { .. } | Layer::PixelShuffle { .. } => DeviceLayer::Host,
            });
        }

        let lanes = (0..self.lanes)
            .map(|_| {
                self.device
                    .fork_default_stream()
                    .map(Mutex::new)
                    .map_err(|err| driver_err("stream create", err))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            network = %network.name,
            device = self.info.index,
            weight_mb = need / (1024 * 1024),
            lanes = self.lanes,
            "Network uploaded to CUDA device"
        );

        Ok(Arc::new(CudaNetwork {
            network,
            device: Arc::clone(&self.device),
            kernels: Arc::clone(&self.kernels),
            layers,
            lanes,
            next_lane: AtomicUsize::new(0),
        }))
    }
}

// ─── Loaded network ──────────────────────────────────────────────────────────

enum DeviceLayer {
    Conv {
        weights: CudaSlice<f32>,
        bias: CudaSlice<f32>,
    },
    /// Parameter-free layer; everything it needs lives in the host IR.
    Host,
}

struct CudaNetwork {
    network: Arc<Network>,
    device: Arc<CudaDevice>,
    kernels: Arc<NetworkKernels>,
    layers: Vec<DeviceLayer>,
    lanes: Vec<Mutex<CudaStream>>,
    next_lane: AtomicUsize,
}

// SAFETY: device buffers and function handles are only used while holding a
// lane mutex or through cudarc's synchronous copy APIs; the CUDA context is
// bound to the calling thread before any driver call.
unsafe impl Send for CudaNetwork {}
unsafe impl Sync for CudaNetwork {}

/// Activation shape `(c, h, w)` after every layer.
fn layer_shapes(network: &Network, input: [usize; 3]) -> Result<Vec<[usize; 3]>> {
    let mut shapes = Vec::with_capacity(network.layers.len());
    let [mut c, mut h, mut w] = input;
    for layer in &network.layers {
        match layer {
            Layer::Conv2d(conv) => {
                (h, w) = conv.output_hw(h, w).ok_or_else(|| {
                    EngineError::Inference(format!(
                        "{w}x{h} activation is smaller than the {}x{} kernel",
                        conv.kernel_w, conv.kernel_h
                    ))
                })?;
                c = conv.out_channels;
            }
            Layer::ReLU { .. } => {}
            Layer::PixelShuffle { factor } => {
                c /= factor * factor;
                h *= factor;
                w *= factor;
            }
        }
        shapes.push([c, h, w]);
    }
    Ok(shapes)
}

impl CudaNetwork {
    fn alloc(&self, len: usize) -> Result<CudaSlice<f32>> {
        // SAFETY: every element is written by a kernel or a host copy before
        // it is read.
        unsafe { self.device.alloc::<f32>(len.max(1)) }.map_err(|err| {
            if is_out_of_memory(&err) {
                EngineError::InferenceOutOfMemory {
                    requested_bytes: len * std::mem::size_of::<f32>(),
                    current_bytes: 0,
                    limit_bytes: self
                        .device
                        .bind_to_thread()
                        .ok()
                        .and_then(|_| cudarc::driver::result::mem_get_info().ok())
                        .map_or(0, |(free, _)| free),
                }
            } else {
                driver_err("scratch alloc", err)
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn launch_conv(
        &self,
        stream: &CudaStream,
        conv: &Conv2d,
        weights: &CudaSlice<f32>,
        bias: &CudaSlice<f32>,
        src: &CudaSlice<f32>,
        dst: &mut CudaSlice<f32>,
        in_shape: [usize; 3],
        out_shape: [usize; 3],
    ) -> Result<()> {
        let (activation, act_a, act_b) = activation_code(conv.activation);
        let shape = ConvShape {
            in_c: in_shape[0] as i32,
            in_h: in_shape[1] as i32,
            in_w: in_shape[2] as i32,
            out_c: out_shape[0] as i32,
            out_h: out_shape[1] as i32,
            out_w: out_shape[2] as i32,
            kernel_h: conv.kernel_h as i32,
            kernel_w: conv.kernel_w as i32,
            stride_h: conv.stride_h as i32,
            stride_w: conv.stride_w as i32,
            dilation_h: conv.dilation_h as i32,
            dilation_w: conv.dilation_w as i32,
            pad_top: conv.padding.top as i32,
            pad_left: conv.padding.left as i32,
            activation,
            has_bias: i32::from(conv.bias.is_some()),
            act_a,
            act_b,
        };
        let config = launch_config_2d(out_shape[2] as u32, out_shape[1] as u32, out_shape[0] as u32);

        // SAFETY:
        // - `src` holds at least in_c×in_h×in_w elements, `dst` at least
        //   out_c×out_h×out_w; both were sized from `layer_shapes`.
        // - `weights` holds out_c×in_c×kh×kw elements and `bias` at least one
        //   element (out_c when `has_bias`).
        // - Grid covers [0..out_w) × [0..out_h) × [0..out_c); the kernel
        //   bounds-checks every thread.
        unsafe {
            self.kernels
                .conv2d
                .clone()
                .launch_on_stream(stream, config, (src, weights, bias, dst, shape))
        }
        .map_err(|err| EngineError::Inference(format!("conv2d launch failed: {err:?}")))
    }

    fn launch_relu(
        &self,
        stream: &CudaStream,
        data: &mut CudaSlice<f32>,
        count: usize,
        slope: f32,
    ) -> Result<()> {
        let config = launch_config_1d(count);
        // SAFETY: `data` holds at least `count` elements; threads past
        // `count` return immediately.
        unsafe {
            self.kernels
                .leaky_relu
                .clone()
                .launch_on_stream(stream, config, (data, count as i32, slope))
        }
        .map_err(|err| EngineError::Inference(format!("relu launch failed: {err:?}")))
    }

    fn launch_shuffle(
        &self,
        stream: &CudaStream,
        src: &CudaSlice<f32>,
        dst: &mut CudaSlice<f32>,
        in_shape: [usize; 3],
        factor: usize,
    ) -> Result<()> {
        let out_c = in_shape[0] / (factor * factor);
        let config = launch_config_2d(
            (in_shape[2] * factor) as u32,
            (in_shape[1] * factor) as u32,
            out_c as u32,
        );
        // SAFETY: `src` holds in_c×in_h×in_w elements and `dst` the same
        // count rearranged; the kernel bounds-checks every output index.
        unsafe {
            self.kernels.pixel_shuffle.clone().launch_on_stream(
                stream,
                config,
                (
                    src,
                    dst,
                    out_c as i32,
                    in_shape[1] as i32,
                    in_shape[2] as i32,
                    factor as i32,
                ),
            )
        }
        .map_err(|err| EngineError::Inference(format!("pixel shuffle launch failed: {err:?}")))
    }
}

impl LoadedNetwork for CudaNetwork {
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
        self.device
            .bind_to_thread()
            .map_err(|err| driver_err("context bind", err))?;

        let shapes = layer_shapes(&self.network, input.shape())?;
        let in_len = input.as_slice().len();
        let scratch = shapes
            .iter()
            .map(|[c, h, w]| c * h * w)
            .fold(in_len, usize::max);

        let mut src = self.alloc(scratch)?;
        let mut dst = self.alloc(scratch)?;
        self.device
            .htod_sync_copy_into(input.as_slice(), &mut src.slice_mut(0..in_len))
            .map_err(|err| driver_err("tile upload", err))?;

        let lane = self.next_lane.fetch_add(1, Ordering::Relaxed) % self.lanes.len();
        let stream = self.lanes[lane]
            .lock()
            .map_err(|_| EngineError::Inference(format!("CUDA lane {lane} poisoned")))?;

        let mut shape = input.shape();
        for ((layer, device_layer), out_shape) in self
            .network
            .layers
            .iter()
            .zip(&self.layers)
            .zip(shapes.iter().copied())
        {
            match (layer, device_layer) {
                (Layer::Conv2d(conv), DeviceLayer::Conv { weights, bias }) => {
                    self.launch_conv(&stream, conv, weights, bias, &src, &mut dst, shape, out_shape)?;
                    std::mem::swap(&mut src, &mut dst);
                }
                (Layer::ReLU { slope }, _) => {
                    let [c, h, w] = shape;
                    self.launch_relu(&stream, &mut src, c * h * w, *slope)?;
                }
                (Layer::PixelShuffle { factor }, _) => {
                    self.launch_shuffle(&stream, &src, &mut dst, shape, *factor)?;
                    std::mem::swap(&mut src, &mut dst);
                }
                (Layer::Conv2d(_), DeviceLayer::Host) => {
                    return Err(EngineError::InvariantViolation(
                        "convolution without uploaded weights".into(),
                    ));
                }
            }
            shape = out_shape;
        }

        self.device
            .wait_for(&stream)
            .map_err(|err| EngineError::Inference(format!("stream join failed: {err:?}")))?;
        drop(stream);

        let [c, h, w] = shape;
        let data = self
            .device
            .dtoh_sync_copy(&src.slice(0..c * h * w))
            .map_err(|err| EngineError::Inference(format!("tile download failed: {err:?}")))?;
        debug!(lane, out_c = c, out_h = h, out_w = w, "CUDA forward complete");
        Tensor::from_vec(c, h, w, data)
    }
}

// ─── Launch helpers ──────────────────────────────────────────────────────────

/// 2D launch over `width × height` with 16×16 blocks; `depth` maps to grid z.
fn launch_config_2d(width: u32, height: u32, depth: u32) -> LaunchConfig {
    let block = (16u32, 16u32, 1u32);
    LaunchConfig {
        grid_dim: (width.div_ceil(block.0), height.div_ceil(block.1), depth.max(1)),
        block_dim: block,
        shared_mem_bytes: 0,
    }
}

/// 1D launch: 256 threads per block.
fn launch_config_1d(count: usize) -> LaunchConfig {
    let block = 256u32;
    LaunchConfig {
        grid_dim: ((count as u32).div_ceil(block).max(1), 1, 1),
        block_dim: (block, 1, 1),
        shared_mem_bytes: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srmd_core::cpu::CpuDevice;
    use srmd_core::graph::Padding;

    fn toy_network() -> Network {
        let in_c = 2;
        let out_c = 8;
        Network {
            name: "toy".into(),
            input_channels: in_c,
            layers: vec![
                Layer::Conv2d(Conv2d {
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
                    weights: (0..out_c * in_c * 9)
                        .map(|i| ((i * 7) % 13) as f32 / 13.0 - 0.5)
                        .collect(),
                    bias: Some((0..out_c).map(|i| i as f32 * 0.1).collect()),
                    activation: Activation::None,
                }),
                Layer::ReLU { slope: 0.1 },
                Layer::PixelShuffle { factor: 2 },
            ],
        }
    }

    #[test]
    fn launch_configs_cover_extent() {
        let cfg = launch_config_2d(33, 16, 5);
        assert_eq!(cfg.grid_dim, (3, 1, 5));
        assert_eq!(launch_config_1d(257).grid_dim, (2, 1, 1));
        assert_eq!(launch_config_1d(0).grid_dim, (1, 1, 1));
    }

    #[test]
    fn shapes_track_layers() {
        let shapes = layer_shapes(&toy_network(), [2, 5, 7]).unwrap();
        assert_eq!(shapes, vec![[8, 5, 7], [8, 5, 7], [2, 10, 14]]);
    }

    #[test]
    #[ignore = "requires a CUDA device and driver"]
    fn lane_count_is_configurable() {
        let gpu = CudaComputeDevice::new(0, 0).unwrap();
        assert_eq!(gpu.queue_count(), DEFAULT_LANES);
        let gpu = gpu.with_lanes(3);
        assert_eq!(gpu.queue_count(), 3);
        assert_eq!(gpu.with_lanes(0).queue_count(), 1);
    }

    #[test]
    #[ignore = "requires a CUDA device and driver"]
    fn cuda_forward_matches_cpu_reference() {
        assert!(device_count() > 0, "no CUDA device");
        let net = Arc::new(toy_network());
        let input = Tensor::from_vec(2, 9, 11, (0..198).map(|v| (v % 17) as f32 / 17.0).collect())
            .unwrap();

        let gpu = CudaComputeDevice::new(0, 0).unwrap();
        let cpu = CpuDevice::new(1);
        let got = gpu.load_network(Arc::clone(&net)).unwrap().forward(&input).unwrap();
        let want = cpu.load_network(net).unwrap().forward(&input).unwrap();

        assert_eq!(got.shape(), want.shape());
        for (a, b) in got.as_slice().iter().zip(want.as_slice()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }
}
