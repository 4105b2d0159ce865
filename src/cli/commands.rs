use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Provisioning and launch helper for Fermi-LAT analysis pipelines
#[derive(Parser, Debug)]
#[command(
    name = "gammapipe",
    about = "Provision an analysis environment and drive sectioned light-curve analyses",
    version,
    author,
    long_about = "gammapipe installs a conda-based analysis environment at a user-chosen \
                  location, launches base and light-curve section analyses as detached \
                  processes inside it, and merges completed sections into one light curve."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Install the environment manager and create the analysis environment",
        long_about = "Downloads the environment-manager installer, installs it at the target \
                      path, keeps its base environment inert, creates the analysis environment \
                      from the manifest and writes a shell fragment that activates it.\n\n\
                      Examples:\n  \
                      gammapipe provision --dry-run\n  \
                      gammapipe provision -p /scratch/alice/conda\n  \
                      gammapipe provision -m environment.yml"
    )]
    Provision(ProvisionArgs),

    #[command(
        about = "Launch a base analysis or one light-curve section",
        long_about = "Validates the pipeline configuration and launches the analysis script \
                      as a detached process. Returns as soon as the process has started.\n\n\
                      Examples:\n  \
                      gammapipe run-analysis crab.yml\n  \
                      gammapipe run-analysis crab.yml --lightcurve --section 2"
    )]
    RunAnalysis(RunAnalysisArgs),

    #[command(
        about = "Merge completed light-curve sections",
        long_about = "Reads every section's result file and writes one combined light curve. \
                      Fails without writing anything when a section is missing.\n\n\
                      Examples:\n  \
                      gammapipe combine-lightcurve crab.yml\n  \
                      gammapipe combine-lightcurve crab.yml --num-sections 8"
    )]
    CombineLightcurve(CombineArgs),

    #[command(
        about = "Show which sections of a pipeline have finished",
        long_about = "Reports the time range of every light-curve section and whether its \
                      result file exists and is readable.\n\n\
                      Examples:\n  \
                      gammapipe status crab.yml\n  \
                      gammapipe status crab.yml --format json"
    )]
    Status(StatusArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ProvisionArgs {
    #[arg(
        short = 'd',
        long,
        help = "Print the install command without touching the filesystem"
    )]
    pub dry_run: bool,

    #[arg(
        short = 'p',
        long,
        value_name = "PATH",
        help = "Install target (defaults to the per-user location)"
    )]
    pub path: Option<PathBuf>,

    #[arg(
        short = 'm',
        long,
        value_name = "FILE",
        help = "Environment manifest (defaults to the shared one)"
    )]
    pub manifest: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct RunAnalysisArgs {
    #[arg(value_name = "CONFIG", help = "Pipeline configuration file")]
    pub config: PathBuf,

    #[arg(short = 'l', long, help = "Run a light-curve section instead of the base analysis")]
    pub lightcurve: bool,

    #[arg(
        short = 's',
        long,
        value_name = "N",
        requires = "lightcurve",
        help = "Section to run (defaults to the configuration's `section`)"
    )]
    pub section: Option<usize>,

    #[arg(short = 'p', long, value_name = "PREFIX", help = "Override the output prefix")]
    pub prefix: Option<String>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct CombineArgs {
    #[arg(value_name = "CONFIG", help = "Pipeline configuration file")]
    pub config: PathBuf,

    #[arg(short = 'p', long, value_name = "PREFIX", help = "Override the output prefix")]
    pub prefix: Option<String>,

    #[arg(
        short = 'n',
        long,
        value_name = "N",
        help = "Override the number of sections"
    )]
    pub num_sections: Option<usize>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct StatusArgs {
    #[arg(value_name = "CONFIG", help = "Pipeline configuration file")]
    pub config: PathBuf,

    #[arg(short = 'p', long, value_name = "PREFIX", help = "Override the output prefix")]
    pub prefix: Option<String>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

impl From<OutputFormatArg> for crate::cli::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => crate::cli::output::OutputFormat::Json,
            OutputFormatArg::Human => crate::cli::output::OutputFormat::Human,
        }
    }
}
