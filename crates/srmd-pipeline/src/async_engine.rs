//! Tokio facade over a shared [`SrmdEngine`].
//!
//! Every call takes the engine lock on a blocking worker thread
//! (`spawn_blocking`), so async callers never stall the runtime on
//! inference or model loads.  Calls are serialized by the lock.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use srmd_core::error::{EngineError, Result};
use srmd_core::types::PixelBuffer;
use srmd_model::ModelSource;
use tokio::task;
use tracing::error;

use crate::engine::SrmdEngine;

/// Cloneable async handle; clones share one engine.
#[derive(Clone, Debug)]
pub struct AsyncEngine {
    inner: Arc<Mutex<SrmdEngine>>,
}

impl AsyncEngine {
    pub fn new(engine: SrmdEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    pub async fn process(&self, input: PixelBuffer) -> Result<PixelBuffer> {
        self.run(move |engine| engine.process(&input)).await
    }

    pub async fn load_model(&self, source: impl Into<ModelSource>) -> Result<()> {
        let source = source.into();
        self.run(move |engine| engine.load_model(source)).await
    }

    pub async fn load_model_files(&self, param: PathBuf, bin: PathBuf) -> Result<()> {
        self.run(move |engine| engine.load_model_files(param, bin)).await
    }

    pub async fn set_parameters(
        &self,
        noise: i32,
        scale: usize,
        pre_padding: usize,
        tile_size: usize,
    ) -> Result<()> {
        self.run(move |engine| engine.set_parameters(noise, scale, pre_padding, tile_size))
            .await
    }

    /// Run `f` with exclusive access to the engine on a blocking thread.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SrmdEngine) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        match task::spawn_blocking(move || f(&mut *lock(&inner)?)).await {
            Ok(result) => result,
            Err(join_err) => {
                error!(%join_err, "Engine task panicked");
                Err(EngineError::InvariantViolation(format!(
                    "engine task panicked: {join_err}"
                )))
            }
        }
    }

    /// Take the engine back once no other handle exists.
    pub fn into_inner(self) -> std::result::Result<SrmdEngine, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(PoisonError::into_inner)),
            Err(inner) => Err(Self { inner }),
        }
    }
}

fn lock(inner: &Mutex<SrmdEngine>) -> Result<MutexGuard<'_, SrmdEngine>> {
    inner
        .lock()
        .map_err(|_| EngineError::InvariantViolation("engine lock poisoned".into()))
}

impl From<SrmdEngine> for AsyncEngine {
    fn from(engine: SrmdEngine) -> Self {
        Self::new(engine)
    }
}
