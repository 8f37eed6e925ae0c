// src/utils/mod.rs
//! Common utilities: configuration and error types

pub mod config;
pub mod errors;

pub use config::{ClusterConfig, EngineConfig, PoolConfig};
pub use errors::{EngineError, Result};
