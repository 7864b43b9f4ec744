#![doc = include_str!("../README.md")]

pub mod async_engine;
pub mod config;
#[cfg(any(feature = "image", feature = "ndarray"))]
pub mod convert;
pub mod devices;
pub mod engine;
pub mod executor;
pub mod metrics;
pub mod stream;
pub mod tiler;

pub use async_engine::AsyncEngine;
pub use config::EngineConfig;
pub use engine::SrmdEngine;
pub use srmd_core::error::{EngineError, Result};
pub use srmd_core::types::PixelBuffer;
pub use stream::StreamSession;
