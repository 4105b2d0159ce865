//! gammapipe - environment provisioning and sectioned light-curve runs
//!
//! Two halves share this crate:
//!
//! - [`provision`]: installs a conda-style environment manager at a chosen
//!   target, creates the analysis environment from a manifest and writes an
//!   init fragment later sessions source.
//! - [`pipeline`]: loads a pipeline configuration, launches the external
//!   analysis for the base run or one light-curve section as a detached
//!   process in a clean session, and merges finished sections.
//!
//! Section runs never talk to each other. Each writes its own file, and
//! combination only proceeds when every expected file is present.
//!
//! # Example Usage
//!
//! ```no_run
//! use gammapipe::pipeline::{Invoker, Mode, Overrides};
//! use gammapipe::GammapipeConfig;
//! use std::path::Path;
//!
//! let invoker = Invoker::new(GammapipeConfig::default());
//! let outcome = invoker.invoke(
//!     Path::new("crab.yml"),
//!     Mode::LightCurveSection(0),
//!     &Overrides::default(),
//! );
//! ```

pub mod cli;
pub mod config;
pub mod pipeline;
pub mod provision;
pub mod util;

pub use config::{GammapipeConfig, SettingsError};
pub use pipeline::{ConfigError, InvokeError, InvokeOutcome, Invoker, Mode, RunHandle};
pub use provision::{ProvisionError, ProvisionOutcome, Provisioner};
pub use util::{init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
