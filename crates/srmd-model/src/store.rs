//! Model store: resolves SRMD model files, parses them, uploads the network
//! to the device and caches the result per key.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use srmd_core::backend::LoadedNetwork;
use srmd_core::context::DeviceContext;
use srmd_core::error::{EngineError, Result};
use srmd_core::graph::Network;
use tracing::{debug, info, warn};

use crate::network::{build_network, check_srmd_shape};
use crate::param::read_param;

/// Bundled model directory name.
pub const DEFAULT_MODEL_NAME: &str = "models-srmd";

/// Extra lookup root for model directories.
pub const MODEL_DIR_ENV: &str = "SRMD_MODEL_DIR";

/// Length of the PCA-projected degradation kernel code.
pub const KERNEL_CODE_LEN: usize = 15;

// ─── Noise variant ───────────────────────────────────────────────────────────

/// Which of the two SRMD networks a noise level selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoiseVariant {
    /// `noise == -1`: `srmdnf_x{s}`, 18 input planes.
    NoDenoise,
    /// `noise` in `0..=10`: `srmd_x{s}`, 19 input planes.
    Denoise,
}

impl NoiseVariant {
    pub fn from_noise(noise: i32) -> Self {
        if noise == -1 {
            Self::NoDenoise
        } else {
            Self::Denoise
        }
    }

    /// RGB plus kernel code planes, plus the noise map for denoising.
    pub fn input_channels(self) -> usize {
        match self {
            Self::NoDenoise => 3 + KERNEL_CODE_LEN,
            Self::Denoise => 3 + KERNEL_CODE_LEN + 1,
        }
    }

    pub fn file_stem(self, scale: usize) -> String {
        match self {
            Self::NoDenoise => format!("srmdnf_x{scale}"),
            Self::Denoise => format!("srmd_x{scale}"),
        }
    }
}

// ─── Model source ────────────────────────────────────────────────────────────

/// A model directory, given either as a path or as a bundled name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSource {
    name: PathBuf,
}

impl ModelSource {
    pub fn new(name: impl Into<PathBuf>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &Path {
        &self.name
    }

    /// Candidate directories in lookup order, labelled by origin.
    pub fn candidates(&self) -> Vec<(PathBuf, &'static str)> {
        let mut dirs = Vec::<(PathBuf, &'static str)>::new();
        if self.name.is_dir() {
            dirs.push((self.name.clone(), "path"));
            return dirs;
        }
        if let Ok(exe) = env::current_exe()
            && let Some(dir) = exe.parent()
        {
            dirs.push((dir.join("models").join(&self.name), "exe_dir/models"));
        }
        if let Some(root) = env::var_os(MODEL_DIR_ENV) {
            dirs.push((PathBuf::from(root).join(&self.name), MODEL_DIR_ENV));
        }
        dirs
    }

    /// First candidate that exists as a directory.
    pub fn resolve(&self) -> Result<PathBuf> {
        let candidates = self.candidates();
        for (dir, origin) in &candidates {
            if dir.is_dir() {
                debug!(dir = %dir.display(), origin, "Resolved model directory");
                return Ok(dir.clone());
            }
        }
        Err(EngineError::ModelNotFound {
            path: candidates
                .into_iter()
                .next()
                .map_or_else(|| self.name.clone(), |(dir, _)| dir),
        })
    }
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_NAME)
    }
}

impl From<&str> for ModelSource {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ModelSource {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for ModelSource {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

/// Explicit `.param` / `.bin` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelFiles {
    pub param: PathBuf,
    pub bin: PathBuf,
}

impl ModelFiles {
    pub fn new(param: impl Into<PathBuf>, bin: impl Into<PathBuf>) -> Self {
        Self {
            param: param.into(),
            bin: bin.into(),
        }
    }

    /// `<dir>/srmd[nf]_x{scale}.{param,bin}`.
    pub fn in_dir(dir: &Path, variant: NoiseVariant, scale: usize) -> Self {
        let stem = variant.file_stem(scale);
        Self {
            param: dir.join(format!("{stem}.param")),
            bin: dir.join(format!("{stem}.bin")),
        }
    }

    /// Optional kernel code file next to the param file.
    pub fn kernel_code_path(&self) -> PathBuf {
        self.param.with_extension("kcode")
    }

    fn check_exist(&self) -> Result<()> {
        for path in [&self.param, &self.bin] {
            if !path.is_file() {
                return Err(EngineError::ModelNotFound { path: path.clone() });
            }
        }
        Ok(())
    }

    fn canonical(&self) -> Result<Self> {
        Ok(Self {
            param: self.param.canonicalize()?,
            bin: self.bin.canonicalize()?,
        })
    }
}

// ─── Model ───────────────────────────────────────────────────────────────────

/// Cache key: variant, scale and canonical file paths.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub variant: NoiseVariant,
    pub scale: usize,
    pub files: ModelFiles,
}

/// A parsed SRMD network resident on a device.
pub struct Model {
    key: ModelKey,
    network: Arc<dyn LoadedNetwork>,
    kernel_code: [f32; KERNEL_CODE_LEN],
}

impl Model {
    pub fn key(&self) -> &ModelKey {
        &self.key
    }

    pub fn variant(&self) -> NoiseVariant {
        self.key.variant
    }

    pub fn scale(&self) -> usize {
        self.key.scale
    }

    pub fn network(&self) -> &Arc<dyn LoadedNetwork> {
        &self.network
    }

    pub fn graph(&self) -> &Network {
        self.network.network()
    }

    /// Degradation kernel code fed as constant planes 3..18.
    pub fn kernel_code(&self) -> &[f32; KERNEL_CODE_LEN] {
        &self.kernel_code
    }

    /// Whether this model serves `noise` at `scale`.
    pub fn matches(&self, noise: i32, scale: usize) -> bool {
        self.key.variant == NoiseVariant::from_noise(noise) && self.key.scale == scale
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("key", &self.key)
            .field("layers", &self.graph().layers.len())
            .field("weight_bytes", &self.network.weight_bytes())
            .finish()
    }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Loads and caches models for one device context.
#[derive(Default)]
pub struct ModelStore {
    cache: HashMap<ModelKey, Arc<Model>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the model for `(noise, scale)` from the directory `source`
    /// resolves to.
    pub fn load(
        &mut self,
        ctx: &DeviceContext,
        noise: i32,
        scale: usize,
        source: &ModelSource,
    ) -> Result<Arc<Model>> {
        let dir = source.resolve()?;
        let files = ModelFiles::in_dir(&dir, NoiseVariant::from_noise(noise), scale);
        self.load_files(ctx, noise, scale, &files)
    }

    /// Load the model for `(noise, scale)` from an explicit file pair.
    ///
    /// A cached model for the same key is returned without touching the
    /// device.
    pub fn load_files(
        &mut self,
        ctx: &DeviceContext,
        noise: i32,
        scale: usize,
        files: &ModelFiles,
    ) -> Result<Arc<Model>> {
        files.check_exist()?;
        let variant = NoiseVariant::from_noise(noise);
        let key = ModelKey {
            variant,
            scale,
            files: files.canonical()?,
        };
        if let Some(model) = self.cache.get(&key) {
            debug!(param = %key.files.param.display(), "Model cache hit");
            return Ok(Arc::clone(model));
        }

        let graph = read_param(&key.files.param)?;
        let bin = std::fs::read(&key.files.bin)?;
        let name = key
            .files
            .param
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| variant.file_stem(scale));
        let network = build_network(&name, &graph, &bin, &key.files.param, &key.files.bin)?;
        check_srmd_shape(&network, variant.input_channels(), scale, &key.files.param)?;
        let kernel_code = read_kernel_code(&files.kernel_code_path())?;

        let loaded = ctx.device().load_network(Arc::new(network))?;
        info!(
            model = %name,
            scale,
            denoise = variant == NoiseVariant::Denoise,
            layers = loaded.network().layers.len(),
            weight_bytes = loaded.weight_bytes(),
            device = ctx.index(),
            "Model loaded"
        );

        let model = Arc::new(Model {
            key: key.clone(),
            network: loaded,
            kernel_code,
        });
        self.cache.insert(key, Arc::clone(&model));
        Ok(model)
    }

    /// Number of cached models.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop every cached model not referenced elsewhere.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Read a `.kcode` file: whitespace-separated floats.  A missing file
/// yields the zero code.
pub fn read_kernel_code(path: &Path) -> Result<[f32; KERNEL_CODE_LEN]> {
    let mut code = [0.0f32; KERNEL_CODE_LEN];
    if !path.is_file() {
        warn!(
            path = %path.display(),
            "Kernel code file not found; conditioning on the zero code"
        );
        return Ok(code);
    }
    let text = std::fs::read_to_string(path)?;
    let values: Vec<f32> = text
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|err| EngineError::parse(path, format!("invalid kernel code value: {err}")))?;
    if values.len() != KERNEL_CODE_LEN {
        return Err(EngineError::parse(
            path,
            format!(
                "kernel code must hold {KERNEL_CODE_LEN} values, found {}",
                values.len()
            ),
        ));
    }
    code.copy_from_slice(&values);
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_naming() {
        assert_eq!(NoiseVariant::from_noise(-1), NoiseVariant::NoDenoise);
        assert_eq!(NoiseVariant::from_noise(0), NoiseVariant::Denoise);
        assert_eq!(NoiseVariant::NoDenoise.input_channels(), 18);
        assert_eq!(NoiseVariant::Denoise.input_channels(), 19);
        assert_eq!(NoiseVariant::Denoise.file_stem(4), "srmd_x4");
        let files = ModelFiles::in_dir(Path::new("/m"), NoiseVariant::NoDenoise, 3);
        assert_eq!(files.param, PathBuf::from("/m/srmdnf_x3.param"));
        assert_eq!(files.bin, PathBuf::from("/m/srmdnf_x3.bin"));
        assert_eq!(files.kernel_code_path(), PathBuf::from("/m/srmdnf_x3.kcode"));
    }

    #[test]
    fn existing_directory_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let source = ModelSource::from(dir.path());
        assert_eq!(source.resolve().unwrap(), dir.path());
    }

    #[test]
    fn unknown_name_is_not_found() {
        let source = ModelSource::new("definitely-not-a-model-dir-7f3a");
        assert!(matches!(
            source.resolve(),
            Err(EngineError::ModelNotFound { .. })
        ));
        assert_eq!(ModelSource::default().name(), Path::new(DEFAULT_MODEL_NAME));
    }

    #[test]
    fn kernel_code_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = read_kernel_code(&dir.path().join("none.kcode")).unwrap();
        assert_eq!(missing, [0.0; KERNEL_CODE_LEN]);

        let path = dir.path().join("k.kcode");
        let text: Vec<String> = (0..KERNEL_CODE_LEN).map(|i| format!("{}", i as f32 * 0.1)).collect();
        std::fs::write(&path, text.join(" ")).unwrap();
        let code = read_kernel_code(&path).unwrap();
        assert!((code[3] - 0.3).abs() < 1e-6);

        std::fs::write(&path, "1 2 3").unwrap();
        assert!(read_kernel_code(&path).is_err());
    }
}
