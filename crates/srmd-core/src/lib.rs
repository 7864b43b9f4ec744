#![doc = include_str!("../README.md")]

pub mod adapter;
pub mod backend;
pub mod context;
pub mod cpu;
pub mod error;
pub mod graph;
pub mod types;

pub use error::{EngineError, Result};
pub use types::{PixelBuffer, Tensor};
