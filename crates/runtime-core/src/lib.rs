//! Runtime Core - Foundation for the model synchronization engine
//!
//! Provides the shared identifiers, error taxonomy, configuration and
//! request payloads used by the tensor store and the model crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::RuntimeConfig;
pub use error::{Error, ErrorKind, Result};
pub use types::*;
