//! `SrmdEngine`, the public entry point.
//!
//! # Lifecycle
//!
//! ```text
//! new(config) ──▶ validate ─▶ DeviceContext ─▶ ModelStore::load ─▶ ready
//! construct(gpu_id, tta) ──▶ validate ─▶ DeviceContext ─▶ (no model)
//! ```
//!
//! `process` borrows the engine immutably, so parameters cannot change while
//! a call is running.  `set_parameters` and `load_model*` need `&mut self`;
//! share an engine across threads through [`AsyncEngine`](crate::AsyncEngine)
//! or a mutex.
//!
//! # Failure state
//!
//! A failed load leaves the previously loaded model in place.  A failed
//! `process` call leaves the engine reusable, typically with a smaller tile
//! size after [`EngineError::is_retryable`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use srmd_core::adapter;
use srmd_core::backend::ComputeDevice;
use srmd_core::context::DeviceContext;
use srmd_core::error::{EngineError, Result};
use srmd_core::types::PixelBuffer;
use srmd_model::{Model, ModelFiles, ModelSource, ModelStore};

use crate::config::{EngineConfig, validate_parameters};
use crate::devices;
use crate::executor::TileExecutor;
use crate::metrics::EngineMetrics;
use crate::stream::StreamSession;
use crate::tiler::{self, Stitcher, TileDescriptor};

const MIB: usize = 1024 * 1024;

pub struct SrmdEngine {
    config: EngineConfig,
    ctx: DeviceContext,
    store: ModelStore,
    model: Option<Arc<Model>>,
    /// Tile lanes; `None` runs tiles on the calling thread.
    pool: Option<rayon::ThreadPool>,
    metrics: Arc<EngineMetrics>,
}

impl SrmdEngine {
    /// Validate `config`, open its device and load the model it names.
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] before any device work, then device
    /// and model load errors.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let ctx = devices::create_context(
            config.device_index()?,
            config.max_parallel_tiles,
            config.memory_limit_bytes(),
            config.strict_memory_limit,
        )?;
        Self::assemble(config, ctx, true)
    }

    /// Engine on `gpu_id` with default parameters and no model loaded.
    pub fn construct(gpu_id: i32, tta_mode: bool) -> Result<Self> {
        let config = EngineConfig::default()
            .with_gpu_id(gpu_id)
            .with_tta(tta_mode);
        config.validate()?;
        let ctx = devices::create_context(config.device_index()?, 0, None, false)?;
        Self::assemble(config, ctx, false)
    }

    /// Like [`new`](Self::new) but on a caller-supplied device; `gpu_id` is
    /// only validated.
    pub fn with_device(config: EngineConfig, device: Arc<dyn ComputeDevice>) -> Result<Self> {
        config.validate()?;
        let ctx = DeviceContext::new(device);
        if let Some(limit) = config.memory_limit_bytes() {
            ctx.set_memory_limit(limit);
        }
        ctx.set_strict_memory_limit(config.strict_memory_limit);
        Self::assemble(config, ctx, true)
    }

    fn assemble(config: EngineConfig, ctx: DeviceContext, load: bool) -> Result<Self> {
        let lanes = match config.max_parallel_tiles {
            0 => ctx.queue_count(),
            n => n.min(ctx.queue_count()),
        };
        let pool = if lanes > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(lanes)
                .thread_name(|i| format!("srmd-lane-{i}"))
                .build()
                .map_err(|e| EngineError::Backend(format!("tile lane pool: {e}")))?;
            Some(pool)
        } else {
            None
        };

        let mut engine = Self {
            config,
            ctx,
            store: ModelStore::new(),
            model: None,
            pool,
            metrics: EngineMetrics::new(),
        };
        if load {
            let source = ModelSource::new(engine.config.model.clone());
            engine.load_model(source)?;
        }
        Ok(engine)
    }

    /// Number of enumerated compute devices, CPU fallback included.
    pub fn gpu_count() -> usize {
        devices::device_count()
    }

    // ─── Parameters and models ───────────────────────────────────────────

    /// Change the run parameters.  A different noise variant or scale needs
    /// a [`load_model`](Self::load_model) before the next `process`.
    pub fn set_parameters(
        &mut self,
        noise: i32,
        scale: usize,
        pre_padding: usize,
        tile_size: usize,
    ) -> Result<()> {
        validate_parameters(noise, scale, pre_padding, tile_size)?;
        self.config.noise = noise;
        self.config.scale = scale;
        self.config.pre_padding = pre_padding;
        self.config.tile_size = tile_size;
        if let Some(model) = &self.model
            && !model.matches(noise, scale)
        {
            debug!(noise, scale, "Parameters no longer match the loaded model");
        }
        Ok(())
    }

    /// Load the model for the current (noise, scale) from a model root.
    pub fn load_model(&mut self, source: impl Into<ModelSource>) -> Result<()> {
        let source = source.into();
        let model = self
            .store
            .load(&self.ctx, self.config.noise, self.config.scale, &source)?;
        self.config.model = source.name().to_path_buf();
        self.model = Some(model);
        Ok(())
    }

    /// Load the model for the current (noise, scale) from explicit files.
    pub fn load_model_files(
        &mut self,
        param: impl Into<PathBuf>,
        bin: impl Into<PathBuf>,
    ) -> Result<()> {
        let files = ModelFiles::new(param, bin);
        let model = self
            .store
            .load_files(&self.ctx, self.config.noise, self.config.scale, &files)?;
        self.model = Some(model);
        Ok(())
    }

    /// The loaded model, if it serves the current parameters.
    ///
    /// # Errors
    ///
    /// [`EngineError::ModelNotLoaded`] when nothing is loaded or the loaded
    /// model was built for another variant or scale.
    pub fn usable_model(&self) -> Result<&Arc<Model>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| EngineError::ModelNotLoaded("no model has been loaded".into()))?;
        let (noise, scale) = (self.config.noise, self.config.scale);
        if !model.matches(noise, scale) {
            return Err(EngineError::ModelNotLoaded(format!(
                "loaded model is {:?} x{}, parameters need noise {noise} at x{scale}; reload the model",
                model.variant(),
                model.scale(),
            )));
        }
        Ok(model)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Concurrent tile lanes available to a run.
    pub fn lanes(&self) -> usize {
        self.pool.as_ref().map_or(1, rayon::ThreadPool::current_num_threads)
    }

    /// Tile edge the next run will use: the configured size, or the largest
    /// one the memory budget allows across every lane.
    pub fn resolved_tile_size(&self) -> Result<usize> {
        if self.config.tile_size != 0 {
            return Ok(self.config.tile_size);
        }
        let model = self.usable_model()?;
        let budget = self.ctx.memory_budget()?;
        let tile = tiler::auto_tile_size(
            budget,
            self.config.scale,
            self.config.pre_padding,
            model.graph().widest_activation(),
            self.config.tta_mode,
            self.lanes(),
        );
        debug!(budget_mb = budget / MIB, tile, "Auto tile size");
        Ok(tile)
    }

    /// Buffers reused across calls for a stream of same-sized images.
    pub fn streaming(&self) -> StreamSession<'_> {
        StreamSession::new(self)
    }

    // ─── Processing ──────────────────────────────────────────────────────

    /// Upscale `input` into a new buffer of `scale×` its dimensions.
    pub fn process(&self, input: &PixelBuffer) -> Result<PixelBuffer> {
        let (w, h, c) = input.geometry();
        let s = self.usable_model()?.scale();
        let mut out = PixelBuffer::zeroed(w * s, h * s, c)?;
        self.process_into(input, &mut out)?;
        Ok(out)
    }

    /// Upscale `input` into `output`, which must already have the scaled
    /// geometry and the same channel count.
    pub fn process_into(&self, input: &PixelBuffer, output: &mut PixelBuffer) -> Result<()> {
        let model = self.usable_model()?;
        let (w, h, c) = input.geometry();
        let s = model.scale();
        if output.geometry() != (w * s, h * s, c) {
            return Err(EngineError::InvalidBufferSize {
                expected: w * s * h * s * c,
                actual: output.as_bytes().len(),
            });
        }

        let started = Instant::now();
        match self.run(model, input, output) {
            Ok(tiles) => {
                let elapsed = started.elapsed();
                self.metrics
                    .record_image((w * h) as u64, elapsed.as_micros() as u64);
                let mem = self.ctx.snapshot();
                info!(
                    width = w,
                    height = h,
                    channels = c,
                    scale = s,
                    tiles,
                    tta = self.config.tta_mode,
                    peak_mb = mem.peak_bytes / MIB,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Image processed"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failure();
                warn!(error = %e, code = e.error_code(), retryable = e.is_retryable(), "Processing failed");
                Err(e)
            }
        }
    }

    /// Plan, execute and stitch; returns the tile count.
    fn run(&self, model: &Model, input: &PixelBuffer, output: &mut PixelBuffer) -> Result<usize> {
        let (w, h, c) = input.geometry();
        let tile_size = self.resolved_tile_size()?;
        let plan = tiler::plan_tiles(w, h, tile_size, self.config.pre_padding, model.scale())?;
        let tensor = adapter::to_tensor(input);
        let executor = TileExecutor::new(model, self.config.noise, self.config.tta_mode);
        let estimate = tiler::tile_memory_estimate(
            tile_size,
            self.config.pre_padding,
            model.scale(),
            model.graph().widest_activation(),
            self.config.tta_mode,
        );
        let stitcher = Mutex::new(Stitcher::new(plan, c));

        let run_tile = |desc: TileDescriptor| -> Result<()> {
            let _reservation = self.ctx.reserve(estimate)?;
            let started = Instant::now();
            let padded = tiler::extract(&tensor, &desc);
            let out = executor.run(&padded)?;
            let elapsed_us = started.elapsed().as_micros() as u64;
            self.metrics.record_tile(elapsed_us);
            debug!(tile = desc.index, col = desc.col, row = desc.row, elapsed_us, "Tile executed");
            stitcher
                .lock()
                .map_err(|_| EngineError::InvariantViolation("stitcher lock poisoned".into()))?
                .commit(&desc, &out)
        };

        match &self.pool {
            Some(pool) if plan.len() > 1 => {
                let tiles: Vec<TileDescriptor> = plan.iter().collect();
                pool.install(|| tiles.into_par_iter().try_for_each(run_tile))?;
            }
            _ => plan.iter().try_for_each(run_tile)?,
        }

        let result = stitcher
            .into_inner()
            .map_err(|_| EngineError::InvariantViolation("stitcher lock poisoned".into()))?
            .finish()?;
        adapter::write_tensor(&result, output)?;
        Ok(plan.len())
    }
}

impl std::fmt::Debug for SrmdEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrmdEngine")
            .field("config", &self.config)
            .field("ctx", &self.ctx)
            .field("model", &self.model)
            .field("lanes", &self.lanes())
            .finish()
    }
}
