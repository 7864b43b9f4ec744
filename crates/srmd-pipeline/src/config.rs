//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use srmd_core::error::{EngineError, Result};
use srmd_model::store::DEFAULT_MODEL_NAME;

use crate::tiler::{MAX_PRE_PADDING, MIN_TILE_SIZE};

/// Supported upscale factors.
pub const SCALES: [usize; 3] = [2, 3, 4];
/// Noise level meaning "no denoising".
pub const NO_DENOISE: i32 = -1;
/// Highest accepted noise level.
pub const MAX_NOISE: i32 = 10;
/// Default overlap border around every tile core.
pub const DEFAULT_PRE_PADDING: usize = 12;

/// Parameters of an [`SrmdEngine`](crate::SrmdEngine).
///
/// Deserializes from any serde format; absent keys take their
/// [`Default`] values:
///
/// ```json
/// { "gpu_id": 0, "noise": -1, "scale": 4, "tile_size": 0, "model": "models-srmd" }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enumerated device index; the CPU device is the last one.
    pub gpu_id: i32,
    pub tta_mode: bool,
    /// `-1` disables denoising, otherwise `0..=10`.
    pub noise: i32,
    pub scale: usize,
    /// Tile edge in input pixels; 0 picks one from the memory budget.
    pub tile_size: usize,
    pub pre_padding: usize,
    /// Model root: an existing directory or a name looked up next to the
    /// executable and under `$SRMD_MODEL_DIR`.
    pub model: PathBuf,
    pub memory_limit_mib: Option<usize>,
    pub strict_memory_limit: bool,
    /// Concurrently running tiles.  When the engine opens the device itself
    /// this also sizes the device's lanes (CUDA streams); 0 keeps the
    /// device default.
    pub max_parallel_tiles: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gpu_id: 0,
            tta_mode: false,
            noise: 3,
            scale: 2,
            tile_size: 0,
            pre_padding: DEFAULT_PRE_PADDING,
            model: PathBuf::from(DEFAULT_MODEL_NAME),
            memory_limit_mib: None,
            strict_memory_limit: false,
            max_parallel_tiles: 0,
        }
    }
}

impl EngineConfig {
    pub fn with_gpu_id(mut self, gpu_id: i32) -> Self {
        self.gpu_id = gpu_id;
        self
    }

    pub fn with_tta(mut self, tta_mode: bool) -> Self {
        self.tta_mode = tta_mode;
        self
    }

    pub fn with_noise(mut self, noise: i32) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_scale(mut self, scale: usize) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_pre_padding(mut self, pre_padding: usize) -> Self {
        self.pre_padding = pre_padding;
        self
    }

    pub fn with_model(mut self, model: impl Into<PathBuf>) -> Self {
        self.model = model.into();
        self
    }

    /// Soft cap on tile working memory; see [`with_strict_memory_limit`](Self::with_strict_memory_limit).
    pub fn with_memory_limit_mib(mut self, mib: usize) -> Self {
        self.memory_limit_mib = Some(mib);
        self
    }

    pub fn with_strict_memory_limit(mut self, strict: bool) -> Self {
        self.strict_memory_limit = strict;
        self
    }

    pub fn with_max_parallel_tiles(mut self, n: usize) -> Self {
        self.max_parallel_tiles = n;
        self
    }

    /// Device index as `usize`, once validated.
    pub fn device_index(&self) -> Result<usize> {
        usize::try_from(self.gpu_id)
            .map_err(|_| EngineError::Configuration(format!("gpu_id must be >= 0, got {}", self.gpu_id)))
    }

    pub fn memory_limit_bytes(&self) -> Option<usize> {
        self.memory_limit_mib.map(|mib| mib.saturating_mul(1024 * 1024))
    }

    /// Check every field without touching a device or the filesystem.
    pub fn validate(&self) -> Result<()> {
        self.device_index()?;
        validate_parameters(self.noise, self.scale, self.pre_padding, self.tile_size)?;
        if self.model.as_os_str().is_empty() {
            return Err(EngineError::Configuration("model path is empty".into()));
        }
        if self.memory_limit_mib == Some(0) {
            return Err(EngineError::Configuration(
                "memory_limit_mib must be > 0 when set".into(),
            ));
        }
        Ok(())
    }
}

/// Range checks shared by [`EngineConfig::validate`] and
/// [`SrmdEngine::set_parameters`](crate::SrmdEngine::set_parameters).
pub fn validate_parameters(
    noise: i32,
    scale: usize,
    pre_padding: usize,
    tile_size: usize,
) -> Result<()> {
    if !(NO_DENOISE..=MAX_NOISE).contains(&noise) {
        return Err(EngineError::Configuration(format!(
            "noise must be in {NO_DENOISE}..={MAX_NOISE}, got {noise}"
        )));
    }
    if !SCALES.contains(&scale) {
        return Err(EngineError::Configuration(format!(
            "scale must be one of {SCALES:?}, got {scale}"
        )));
    }
    if pre_padding > MAX_PRE_PADDING {
        return Err(EngineError::Configuration(format!(
            "pre_padding must be <= {MAX_PRE_PADDING}, got {pre_padding}"
        )));
    }
    if tile_size != 0 && tile_size < MIN_TILE_SIZE {
        return Err(EngineError::Configuration(format!(
            "tile_size must be 0 (auto) or >= {MIN_TILE_SIZE}, got {tile_size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.pre_padding, 12);
        assert_eq!(cfg.model, PathBuf::from("models-srmd"));
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let cases = [
            EngineConfig::default().with_gpu_id(-1),
            EngineConfig::default().with_scale(5),
            EngineConfig::default().with_scale(1),
            EngineConfig::default().with_noise(11),
            EngineConfig::default().with_noise(-2),
            EngineConfig::default().with_tile_size(16),
            EngineConfig::default().with_pre_padding(MAX_PRE_PADDING + 1),
            EngineConfig::default().with_pre_padding(1 << 40),
            EngineConfig::default().with_model(""),
            EngineConfig::default().with_memory_limit_mib(0),
        ];
        for cfg in cases {
            match cfg.validate() {
                Err(EngineError::Configuration(_)) => {}
                other => panic!("{cfg:?} gave {other:?}"),
            }
        }
    }

    #[test]
    fn accepts_boundaries() {
        for noise in [-1, 0, 10] {
            for scale in SCALES {
                for tile in [0, 32, 400] {
                    validate_parameters(noise, scale, 0, tile).unwrap();
                    validate_parameters(noise, scale, MAX_PRE_PADDING, tile).unwrap();
                }
            }
        }
    }

    #[test]
    fn memory_limit_converts_to_bytes() {
        let cfg = EngineConfig::default().with_memory_limit_mib(3);
        assert_eq!(cfg.memory_limit_bytes(), Some(3 * 1024 * 1024));
        assert_eq!(EngineConfig::default().memory_limit_bytes(), None);
    }
}
