#![doc = include_str!("../README.md")]

/// NVRTC-compiled network kernels and the CUDA compute device.
#[cfg(feature = "cuda")]
pub mod device;
#[cfg(not(feature = "cuda"))]
#[path = "device_stub.rs"]
pub mod device;

pub use device::{CudaComputeDevice, device_count};
