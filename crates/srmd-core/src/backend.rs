//! Compute backend traits: the contract every execution device satisfies.

use std::sync::Arc;

use crate::error::Result;
use crate::graph::Network;
use crate::types::Tensor;

/// Kind of hardware behind a [`ComputeDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Cuda,
    Cpu,
}

/// Static description of a compute device, captured at enumeration time.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    /// Position in the engine's device enumeration.
    pub index: usize,
    pub name: String,
    pub kind: DeviceKind,
    /// Total device (or host) memory in bytes.
    pub total_memory: usize,
}

/// An execution device able to host networks.
///
/// Implementations own their driver handles; dropping the last `Arc` to a
/// device releases them.
pub trait ComputeDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Memory currently free on the device, in bytes.
    fn available_memory(&self) -> Result<usize>;

    /// Number of independent submission queues tiles may be spread across.
    fn queue_count(&self) -> usize;

    /// Upload `network`'s weights and return a handle that can run it.
    ///
    /// # Errors
    ///
    /// [`crate::error::EngineError::OutOfMemory`] when the weights do not fit.
    fn load_network(&self, network: Arc<Network>) -> Result<Arc<dyn LoadedNetwork>>;
}

/// A network resident on a device.
pub trait LoadedNetwork: Send + Sync {
    fn network(&self) -> &Network;

    /// Run one forward pass on a planar `CHW` input.
    ///
    /// Must be deterministic for identical inputs and safe to call from
    /// several threads at once.
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Bytes of device memory pinned by the uploaded weights.
    fn weight_bytes(&self) -> usize {
        self.network().weight_bytes()
    }
}
