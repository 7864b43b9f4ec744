#![allow(missing_docs)]
//! Stub CUDA device for builds without the `cuda` feature.

use std::sync::Arc;

use srmd_core::backend::{ComputeDevice, DeviceInfo, LoadedNetwork};
use srmd_core::error::{EngineError, Result};
use srmd_core::graph::Network;

/// Always 0: CUDA support is compiled out.
pub fn device_count() -> usize {
    0
}

pub struct CudaComputeDevice {
    info: DeviceInfo,
}

impl CudaComputeDevice {
    pub fn new(_ordinal: usize, index: usize) -> Result<Self> {
        Err(EngineError::DeviceUnavailable {
            index,
            reason: "built without the `cuda` feature".into(),
        })
    }

    /// Lane counts are ignored; [`new`](Self::new) never succeeds.
    pub fn with_lanes(self, _lanes: usize) -> Self {
        self
    }
}

impl ComputeDevice for CudaComputeDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn available_memory(&self) -> Result<usize> {
        Ok(0)
    }

    fn queue_count(&self) -> usize {
        1
    }

    fn load_network(&self, _network: Arc<Network>) -> Result<Arc<dyn LoadedNetwork>> {
        Err(EngineError::DeviceUnavailable {
            index: self.info.index,
            reason: "built without the `cuda` feature".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_reports_no_devices() {
        assert_eq!(device_count(), 0);
        assert!(matches!(
            CudaComputeDevice::new(0, 3),
            Err(EngineError::DeviceUnavailable { index: 3, .. })
        ));
    }
}
