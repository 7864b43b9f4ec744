//! Typed error hierarchy for the engine.
//!
//! Uses `thiserror` for library-grade errors.  Application code should wrap
//! these in its own error type or `anyhow::Result` at call sites.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`EngineError::error_code`]
//! so callers can branch on failures without string parsing.

use std::path::PathBuf;

/// All errors originating from the SRMD engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // ── Device ───────────────────────────────────────────────────────
    #[error("Compute device {index} unavailable: {reason}")]
    DeviceUnavailable { index: usize, reason: String },

    #[error("Compute backend error: {0}")]
    Backend(String),

    // ── Model ────────────────────────────────────────────────────────
    #[error("Model file not found: {}", path.display())]
    ModelNotFound { path: PathBuf },

    #[error("Model parse error in {}: {reason}", path.display())]
    ModelParse { path: PathBuf, reason: String },

    #[error("Out of device memory uploading model: need {need_bytes} bytes, {available_bytes} available")]
    OutOfMemory {
        need_bytes: usize,
        available_bytes: usize,
    },

    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    // ── Buffers ──────────────────────────────────────────────────────
    #[error("Invalid buffer size: expected {expected} bytes, got {actual}")]
    InvalidBufferSize { expected: usize, actual: usize },

    // ── Inference ────────────────────────────────────────────────────
    #[error("Inference failed: {0}")]
    Inference(String),

    #[error(
        "Device memory exhausted mid-tile: requested {requested_bytes} bytes with {current_bytes} in use (limit {limit_bytes})"
    )]
    InferenceOutOfMemory {
        requested_bytes: usize,
        current_bytes: usize,
        limit_bytes: usize,
    },

    // ── Audit invariants ─────────────────────────────────────────────
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: configuration
    /// - 2xx: device / backend
    /// - 3xx: model
    /// - 4xx: buffers
    /// - 5xx: inference
    /// - 6xx: invariants / I/O
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Configuration(_) => 100,
            Self::DeviceUnavailable { .. } => 200,
            Self::Backend(_) => 201,
            Self::ModelNotFound { .. } => 300,
            Self::ModelParse { .. } => 301,
            Self::OutOfMemory { .. } => 302,
            Self::ModelNotLoaded(_) => 303,
            Self::InvalidBufferSize { .. } => 400,
            Self::Inference(_) => 500,
            Self::InferenceOutOfMemory { .. } => 501,
            Self::InvariantViolation(_) => 600,
            Self::Io(_) => 601,
        }
    }

    /// Whether the failed call may succeed if retried with a smaller tile size.
    ///
    /// Only mid-tile memory exhaustion qualifies. The engine never retries
    /// internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InferenceOutOfMemory { .. })
    }

    /// Shorthand for a [`EngineError::ModelParse`] with a formatted reason.
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ModelParse {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the engine crates.
pub type Result<T> = std::result::Result<T, EngineError>;
