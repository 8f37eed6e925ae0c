// src/observability.rs
//! Tracing and logging initialization
//!
//! Call [`init_tracing`] once at process start. Log verbosity is controlled
//! through `RUST_LOG` (e.g. `RUST_LOG=vigil_engine=debug`).

use crate::utils::errors::{EngineError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Defaults to `info` level when `RUST_LOG` is unset. Returns an error if a
/// global subscriber is already installed.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| EngineError::Runtime(format!("failed to init tracing: {}", e)))
}
