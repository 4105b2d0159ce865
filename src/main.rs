use gammapipe::cli::commands::{CliArgs, Commands};
use gammapipe::cli::handlers::{handle_combine, handle_provision, handle_run_analysis, handle_status};
use gammapipe::util::logging::parse_level;
use gammapipe::util::{init_from_env, init_logging, LoggingConfig};
use gammapipe::{NAME, VERSION};

use clap::error::ErrorKind;
use clap::Parser;
use tracing::{debug, Level};

const EXIT_USAGE: i32 = 1;

#[tokio::main]
async fn main() {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    init_logging_from_args(&args);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Provision(provision_args) => handle_provision(provision_args).await,
        Commands::RunAnalysis(run_args) => handle_run_analysis(run_args),
        Commands::CombineLightcurve(combine_args) => handle_combine(combine_args),
        Commands::Status(status_args) => handle_status(status_args),
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        init_from_env();
        return;
    };

    init_logging(LoggingConfig::with_level_from_env(level));
}
