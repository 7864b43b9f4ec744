//! Run counters.
//!
//! `EngineMetrics` accumulates across every `process` call of one engine with
//! atomic counters, so tile lanes update it without locking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Completed `process` calls.
    pub images_processed: AtomicU64,
    /// Failed `process` calls.
    pub images_failed: AtomicU64,
    /// Tiles that went through the executor.
    pub tiles_executed: AtomicU64,
    /// Input pixels of completed calls.
    pub input_pixels: AtomicU64,
    /// Cumulative executor wall-clock time in microseconds.
    pub tile_total_us: AtomicU64,
    /// Cumulative `process` wall-clock time in microseconds.
    pub image_total_us: AtomicU64,
}

/// Plain copy of the counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub images_processed: u64,
    pub images_failed: u64,
    pub tiles_executed: u64,
    pub input_pixels: u64,
    pub tile_total_us: u64,
    pub image_total_us: u64,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn record_tile(&self, elapsed_us: u64) {
        self.tiles_executed.fetch_add(1, Ordering::Relaxed);
        self.tile_total_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub(crate) fn record_image(&self, pixels: u64, elapsed_us: u64) {
        self.images_processed.fetch_add(1, Ordering::Relaxed);
        self.input_pixels.fetch_add(pixels, Ordering::Relaxed);
        self.image_total_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.images_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            images_processed: self.images_processed.load(Ordering::Acquire),
            images_failed: self.images_failed.load(Ordering::Acquire),
            tiles_executed: self.tiles_executed.load(Ordering::Acquire),
            input_pixels: self.input_pixels.load(Ordering::Acquire),
            tile_total_us: self.tile_total_us.load(Ordering::Acquire),
            image_total_us: self.image_total_us.load(Ordering::Acquire),
        }
    }

    /// Log average latencies.
    pub fn report(&self) {
        let s = self.snapshot();
        let avg = |total: u64, count: u64| if count > 0 { total / count } else { 0 };
        info!(
            images = s.images_processed,
            failed = s.images_failed,
            tiles = s.tiles_executed,
            tile_avg_us = avg(s.tile_total_us, s.tiles_executed),
            image_avg_us = avg(s.image_total_us, s.images_processed),
            "Engine latencies"
        );
    }
}
