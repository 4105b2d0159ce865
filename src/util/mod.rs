//! Utility modules for gammapipe
//!
//! - Structured logging setup
//! - Small filesystem helpers shared by the provisioner and the combiner

pub mod fs;
pub mod logging;

pub use logging::{init_from_env, init_logging, LoggingConfig};
