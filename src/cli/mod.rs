pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{CliArgs, CombineArgs, Commands, ProvisionArgs, RunAnalysisArgs, StatusArgs};
pub use output::{OutputFormat, OutputFormatter};
