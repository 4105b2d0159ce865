//! Pipeline invocation: configuration, sessions, launches and combination

pub mod combine;
pub mod config;
pub mod error;
pub mod invoke;
pub mod session;
pub mod status;
pub mod timebins;

pub use combine::{combine_lightcurve, CombineSummary};
pub use config::{AnalysisConfig, Overrides, Pipeline, PipelineConfig};
pub use error::{ConfigError, InvokeError};
pub use invoke::{DetachedLauncher, InvokeOutcome, Invoker, LaunchRequest, Launcher, Mode, RunHandle};
pub use session::{prepare_session, SessionEnv};
pub use status::{pipeline_status, PipelineStatus, SectionState, SectionStatus};
pub use timebins::{Binning, Section};
