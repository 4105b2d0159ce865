//! Subcommand handlers
//!
//! Each handler returns the process exit code. Results go to stdout in the
//! requested format; errors are logged and repeated on stderr.

use crate::cli::commands::{CombineArgs, ProvisionArgs, RunAnalysisArgs, StatusArgs};
use crate::cli::output::OutputFormatter;
use crate::config::GammapipeConfig;
use crate::pipeline::{combine_lightcurve, pipeline_status, InvokeError, InvokeOutcome, Invoker, Overrides};
use crate::provision::{ProvisionError, Provisioner};
use std::fmt::Display;
use tracing::{debug, error, info};

const EXIT_OUTPUT: i32 = 11;

fn load_settings() -> Result<GammapipeConfig, i32> {
    let settings = GammapipeConfig::default();
    if let Err(e) = settings.validate() {
        return Err(fail("Configuration error", &e, e.exit_code()));
    }
    debug!("Settings: {}", settings);
    Ok(settings)
}

fn fail(what: &str, err: &dyn Display, code: i32) -> i32 {
    error!("{}: {}", what, err);
    eprintln!("Error: {}", err);
    code
}

fn emit(rendered: anyhow::Result<String>) -> i32 {
    match rendered {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => fail("Output error", &format!("{:#}", e), EXIT_OUTPUT),
    }
}

fn invoke_failed(err: InvokeError) -> i32 {
    let code = err.exit_code();
    fail("Pipeline error", &err, code)
}

fn provision_failed(err: ProvisionError) -> i32 {
    let code = err.exit_code();
    fail("Provisioning failed", &err, code)
}

pub async fn handle_provision(args: &ProvisionArgs) -> i32 {
    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(code) => return code,
    };

    let provisioner = match Provisioner::new(settings) {
        Ok(provisioner) => provisioner,
        Err(e) => return provision_failed(e),
    };

    let outcome = match provisioner
        .provision(args.path.as_deref(), args.manifest.as_deref(), args.dry_run)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return provision_failed(e),
    };

    emit(OutputFormatter::new(args.format.into()).format_provision(&outcome))
}

pub fn handle_run_analysis(args: &RunAnalysisArgs) -> i32 {
    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(code) => return code,
    };

    let overrides = Overrides {
        prefix: args.prefix.clone(),
        num_sections: None,
    };
    let invoker = Invoker::new(settings);

    let result = invoker.load(&args.config, &overrides).and_then(|pipeline| {
        let mode = invoker.resolve_mode(&pipeline, args.lightcurve, args.section)?;
        info!("Starting {} for {}", mode, pipeline.prefix);
        invoker.invoke_pipeline(&pipeline, mode)
    });

    match result {
        Ok(InvokeOutcome::Launched(handle)) => {
            emit(OutputFormatter::new(args.format.into()).format_launch(&handle))
        }
        Ok(InvokeOutcome::Combined(summary)) => {
            emit(OutputFormatter::new(args.format.into()).format_combine(&summary))
        }
        Err(e) => invoke_failed(e),
    }
}

pub fn handle_combine(args: &CombineArgs) -> i32 {
    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(code) => return code,
    };

    let overrides = Overrides {
        prefix: args.prefix.clone(),
        num_sections: args.num_sections,
    };

    let result = Invoker::new(settings)
        .load(&args.config, &overrides)
        .and_then(|pipeline| combine_lightcurve(&pipeline));

    match result {
        Ok(summary) => emit(OutputFormatter::new(args.format.into()).format_combine(&summary)),
        Err(e) => invoke_failed(e),
    }
}

pub fn handle_status(args: &StatusArgs) -> i32 {
    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(code) => return code,
    };

    let overrides = Overrides {
        prefix: args.prefix.clone(),
        num_sections: None,
    };
    let invoker = Invoker::new(settings);

    match invoker
        .load(&args.config, &overrides)
        .and_then(|pipeline| pipeline_status(&pipeline))
    {
        Ok(status) => emit(OutputFormatter::new(args.format.into()).format_status(&status)),
        Err(e) => invoke_failed(e),
    }
}
