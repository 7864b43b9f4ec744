#![doc = include_str!("../README.md")]

pub mod network;
pub mod param;
pub mod store;
pub mod weights;

pub use store::{Model, ModelFiles, ModelKey, ModelSource, ModelStore, NoiseVariant};
