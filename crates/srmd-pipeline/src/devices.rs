//! Compute device enumeration.
//!
//! CUDA devices (when compiled in and a driver is present) occupy indices
//! `0..n`; the CPU fallback device is always index `n`.

use std::sync::Arc;

use srmd_core::backend::ComputeDevice;
use srmd_core::context::DeviceContext;
use srmd_core::cpu::CpuDevice;
use srmd_core::error::{EngineError, Result};
use srmd_cuda::CudaComputeDevice;
use tracing::debug;

/// Number of enumerated compute devices, CPU fallback included (≥ 1).
pub fn device_count() -> usize {
    srmd_cuda::device_count() + 1
}

/// Index of the CPU fallback device.
pub fn cpu_device_index() -> usize {
    srmd_cuda::device_count()
}

/// Open enumerated device `index` with `lanes` submission lanes (0 keeps
/// the device default: CUDA's stream count, one lane on the CPU).
///
/// # Errors
///
/// [`EngineError::DeviceUnavailable`] for an out-of-range index or a device
/// that fails to initialise.
pub fn open(index: usize, lanes: usize) -> Result<Arc<dyn ComputeDevice>> {
    let cuda = srmd_cuda::device_count();
    if index < cuda {
        let device = CudaComputeDevice::new(index, index)?;
        let device = if lanes > 0 { device.with_lanes(lanes) } else { device };
        return Ok(Arc::new(device));
    }
    if index == cuda {
        let device = CpuDevice::new(index);
        return Ok(Arc::new(device.with_lanes(lanes)));
    }
    Err(EngineError::DeviceUnavailable {
        index,
        reason: format!("only {} device(s) enumerated", cuda + 1),
    })
}

/// Open device `index` and wrap it in a [`DeviceContext`] with the given
/// memory limit (bytes, `None` = unlimited).
pub fn create_context(
    index: usize,
    lanes: usize,
    limit: Option<usize>,
    strict: bool,
) -> Result<DeviceContext> {
    let ctx = DeviceContext::new(open(index, lanes)?);
    if let Some(limit) = limit {
        ctx.set_memory_limit(limit);
    }
    if strict {
        ctx.set_strict_memory_limit(true);
    }
    debug!(index, lanes = ctx.queue_count(), "Device context created");
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use srmd_core::backend::DeviceKind;

    #[test]
    fn cpu_device_is_last() {
        let n = device_count();
        assert!(n >= 1);
        let cpu = open(cpu_device_index(), 0).unwrap();
        assert_eq!(cpu.info().kind, DeviceKind::Cpu);
        assert_eq!(cpu.info().index, n - 1);
    }

    #[test]
    fn out_of_range_is_unavailable() {
        let err = open(device_count(), 0).err().unwrap();
        assert!(matches!(err, EngineError::DeviceUnavailable { .. }));
    }

    #[test]
    fn context_applies_limit() {
        let ctx = create_context(cpu_device_index(), 0, Some(1024), true).unwrap();
        let snap = ctx.snapshot();
        assert_eq!(snap.limit_bytes, 1024);
        assert!(snap.strict);
    }

    #[test]
    fn lane_count_reaches_the_device() {
        let cpu = cpu_device_index();
        assert_eq!(open(cpu, 0).unwrap().queue_count(), 1);
        assert_eq!(open(cpu, 3).unwrap().queue_count(), 3);
        assert_eq!(create_context(cpu, 4, None, false).unwrap().queue_count(), 4);
    }
}
