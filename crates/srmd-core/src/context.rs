//! Device context: one compute device plus the memory accounting the tiler
//! and executor budget against.
//!
//! # Accounting
//!
//! Every tile-sized working set goes through [`DeviceContext::reserve`],
//! which returns a [`MemoryReservation`] guard.  Bytes are released when the
//! guard drops, so an early `?` return can never leak accounting.  Counters
//! are atomics and can be read without locking while lanes run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{info, warn};

use crate::backend::{ComputeDevice, DeviceInfo};
use crate::error::{EngineError, Result};

/// Fraction of the device's free memory handed to tile work.
pub const MEMORY_HEADROOM: f64 = 0.8;

const MIB: usize = 1024 * 1024;

// ─── Memory accounting ───────────────────────────────────────────────────────

/// Atomic byte counters.  Lock-free reads.
struct MemoryAccounting {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryAccounting {
    const fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn on_reserve(&self, bytes: usize) {
        let prev = self.current.fetch_add(bytes, Ordering::Relaxed);
        self.peak.fetch_max(prev + bytes, Ordering::Relaxed);
    }

    #[inline]
    fn on_release(&self, bytes: usize) {
        self.current.fetch_sub(bytes, Ordering::Relaxed);
    }

    #[inline]
    fn snapshot(&self) -> (usize, usize) {
        (
            self.current.load(Ordering::Relaxed),
            self.peak.load(Ordering::Relaxed),
        )
    }
}

// ─── Device context ──────────────────────────────────────────────────────────

/// The engine's exclusive handle on its compute device.
pub struct DeviceContext {
    device: Arc<dyn ComputeDevice>,
    accounting: MemoryAccounting,
    /// Byte cap for tile work. 0 = unlimited.
    limit: AtomicUsize,
    /// Fail reservations past `limit` instead of warning.
    strict: AtomicBool,
}

impl DeviceContext {
    pub fn new(device: Arc<dyn ComputeDevice>) -> Self {
        let info = device.info();
        info!(
            index = info.index,
            name = %info.name,
            kind = ?info.kind,
            total_mb = info.total_memory / MIB,
            queues = device.queue_count(),
            "Device context created"
        );
        Self {
            device,
            accounting: MemoryAccounting::new(),
            limit: AtomicUsize::new(0),
            strict: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }

    #[inline]
    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.device.info().index
    }

    /// Independent submission queues available to the executor (≥ 1).
    #[inline]
    pub fn queue_count(&self) -> usize {
        self.device.queue_count().max(1)
    }

    /// Set a byte cap for tile work.  0 = unlimited.
    pub fn set_memory_limit(&self, limit_bytes: usize) {
        self.limit.store(limit_bytes, Ordering::Relaxed);
        info!(limit_mb = limit_bytes / MIB, "Memory limit set");
    }

    /// Enable or disable hard failure when a reservation would pass the limit.
    pub fn set_strict_memory_limit(&self, enabled: bool) {
        self.strict.store(enabled, Ordering::Relaxed);
        info!(enabled, "Strict memory limit enforcement");
    }

    fn limit(&self) -> Option<usize> {
        match self.limit.load(Ordering::Relaxed) {
            0 => None,
            limit => Some(limit),
        }
    }

    /// Usable bytes for tile work: free device memory scaled by
    /// [`MEMORY_HEADROOM`], capped by the configured limit.
    pub fn memory_budget(&self) -> Result<usize> {
        let available = self.device.available_memory()?;
        Ok(apply_budget(available, self.limit()))
    }

    /// Account for `bytes` of tile working memory until the guard drops.
    ///
    /// # Errors
    ///
    /// [`EngineError::InferenceOutOfMemory`] when a strict limit is set and
    /// the reservation would pass it.
    pub fn reserve(&self, bytes: usize) -> Result<MemoryReservation<'_>> {
        let (current, _) = self.accounting.snapshot();
        let would_exceed = check_memory_limit(
            self.strict.load(Ordering::Relaxed),
            self.limit(),
            current,
            bytes,
        )?;
        if would_exceed {
            warn!(
                current_mb = current / MIB,
                requested_bytes = bytes,
                limit_mb = self.limit().unwrap_or(0) / MIB,
                "Memory usage would exceed configured limit; continuing because strict limit is off"
            );
        }
        self.accounting.on_reserve(bytes);
        Ok(MemoryReservation {
            accounting: &self.accounting,
            bytes,
        })
    }

    /// Current and peak reserved bytes plus the configured limit.
    pub fn snapshot(&self) -> MemorySnapshot {
        let (current, peak) = self.accounting.snapshot();
        MemorySnapshot {
            current_bytes: current,
            peak_bytes: peak,
            limit_bytes: self.limit.load(Ordering::Relaxed),
            strict: self.strict.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", self.device.info())
            .field("memory", &self.snapshot())
            .finish()
    }
}

/// RAII guard for bytes accounted against a [`DeviceContext`].
#[must_use = "dropping the reservation releases it immediately"]
pub struct MemoryReservation<'a> {
    accounting: &'a MemoryAccounting,
    bytes: usize,
}

impl MemoryReservation<'_> {
    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemoryReservation<'_> {
    fn drop(&mut self) {
        self.accounting.on_release(self.bytes);
    }
}

/// Point-in-time memory accounting for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub current_bytes: usize,
    pub peak_bytes: usize,
    /// 0 = unlimited.
    pub limit_bytes: usize,
    pub strict: bool,
}

fn apply_budget(available: usize, limit: Option<usize>) -> usize {
    let budget = (available as f64 * MEMORY_HEADROOM) as usize;
    match limit {
        Some(limit) => budget.min(limit),
        None => budget,
    }
}

/// `Ok(true)` means the caller should warn: the limit is passed but not
/// enforced.
fn check_memory_limit(
    strict: bool,
    limit: Option<usize>,
    current: usize,
    requested: usize,
) -> Result<bool> {
    let Some(limit_bytes) = limit.filter(|limit| *limit > 0) else {
        return Ok(false);
    };

    if current.saturating_add(requested) <= limit_bytes {
        return Ok(false);
    }

    if strict {
        return Err(EngineError::InferenceOutOfMemory {
            requested_bytes: requested,
            current_bytes: current,
            limit_bytes,
        });
    }

    Ok(true)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
