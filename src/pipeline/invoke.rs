//! Pipeline invocation
//!
//! Launches are fire-and-forget: the analysis runs in its own process group
//! with output appended to a per-run log, and the invoker returns as soon as
//! the process exists. Whether a run finished is visible only through its
//! expected output file.
//!
//! Every run is told the absolute path of the analysis YAML gammapipe
//! validated (`GAMMAPIPE_ANALYSIS_CONFIG`), and section runs also receive
//! their bin edges through `GAMMAPIPE_SECTION_*` variables, so the analysis
//! fits exactly the bins that `status` reports.

use super::combine::{combine_lightcurve, CombineSummary};
use super::config::{absolute_path, Overrides, Pipeline};
use super::error::{ConfigError, InvokeError};
use super::session::{prepare_session, SessionEnv};
use crate::config::GammapipeConfig;
use crate::provision::EnvironmentManifest;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info};

/// Absolute path of the analysis YAML the run must read
pub const ANALYSIS_CONFIG_VARIABLE: &str = "GAMMAPIPE_ANALYSIS_CONFIG";
/// Index of the section a run analyses
pub const SECTION_INDEX_VARIABLE: &str = "GAMMAPIPE_SECTION";
/// Start of the section's first bin (MET)
pub const SECTION_TSTART_VARIABLE: &str = "GAMMAPIPE_SECTION_TSTART";
/// End of the section's last bin (MET)
pub const SECTION_TSTOP_VARIABLE: &str = "GAMMAPIPE_SECTION_TSTOP";
/// Comma-separated edges of the section's bins
pub const SECTION_EDGES_VARIABLE: &str = "GAMMAPIPE_SECTION_EDGES";

/// What one invocation does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "section", rename_all = "snake_case")]
pub enum Mode {
    Base,
    LightCurveSection(usize),
    CombineLightCurve,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Base => write!(f, "base analysis"),
            Mode::LightCurveSection(i) => write!(f, "light-curve section {}", i),
            Mode::CombineLightCurve => write!(f, "light-curve combination"),
        }
    }
}

/// A launched run. Not a future: poll `expected_output` to learn when it is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunHandle {
    pub mode: Mode,
    pub pid: u32,
    pub log_path: PathBuf,
    /// Present for section runs, whose output name is known in advance
    pub expected_output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvokeOutcome {
    Launched(RunHandle),
    Combined(CombineSummary),
}

/// Everything needed to start one detached analysis process
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub log_path: PathBuf,
    pub session: SessionEnv,
    /// Run-specific variables, applied on top of the session
    pub env: BTreeMap<String, String>,
}

impl LaunchRequest {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub trait Launcher: Send + Sync {
    /// Starts the process without waiting for it and returns its pid.
    fn launch(&self, request: &LaunchRequest) -> Result<u32, InvokeError>;
}

/// Starts analyses as detached child processes
#[derive(Debug, Default, Clone)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<u32, InvokeError> {
        request.session.raise_open_file_limit()?;

        if let Some(dir) = request.log_path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| InvokeError::io(format!("Creating {}", dir.display()), e))?;
        }
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.log_path)
            .map_err(|e| InvokeError::io(format!("Opening {}", request.log_path.display()), e))?;
        writeln!(
            log,
            "==> {} launching: {}",
            chrono::Local::now().to_rfc3339(),
            request.command_line()
        )
        .map_err(|e| InvokeError::io(format!("Writing {}", request.log_path.display()), e))?;
        let log_err = log
            .try_clone()
            .map_err(|e| InvokeError::io("Duplicating log handle", e))?;

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        request.session.apply(&mut command);
        command.envs(&request.env);

        // A fresh process group keeps the run alive when the launching
        // terminal hangs up.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|e| InvokeError::ExternalTool {
            program: request.program.clone(),
            reason: e.to_string(),
        })?;
        Ok(child.id())
    }
}

pub struct Invoker {
    settings: GammapipeConfig,
    launcher: Arc<dyn Launcher>,
    session: Option<SessionEnv>,
}

impl Invoker {
    pub fn new(settings: GammapipeConfig) -> Self {
        Self::with_launcher(settings, Arc::new(DetachedLauncher))
    }

    pub fn with_launcher(settings: GammapipeConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            settings,
            launcher,
            session: None,
        }
    }

    /// Uses `session` instead of deriving one from settings and `PATH`.
    pub fn with_session(mut self, session: SessionEnv) -> Self {
        self.session = Some(session);
        self
    }

    /// Loads and validates the pipeline configuration.
    pub fn load(&self, config_path: &Path, overrides: &Overrides) -> Result<Pipeline, InvokeError> {
        let workdir = self.settings.workdir()?;
        Ok(Pipeline::load(config_path, overrides, &workdir)?)
    }

    /// Applies the clean-slate policy for the provisioned environment.
    pub fn prepare_session(&self) -> Result<SessionEnv, InvokeError> {
        let session = match self.session {
            Some(ref session) => session.clone(),
            None => self.derive_session()?,
        };
        Ok(match self.settings.python_user_base {
            Some(ref base) => session.with_python_user_base(base),
            None => session,
        })
    }

    fn derive_session(&self) -> Result<SessionEnv, InvokeError> {
        let env_name = match self.settings.env_name {
            Some(ref name) => name.clone(),
            None => EnvironmentManifest::load(&self.settings.default_manifest())
                .and_then(|manifest| manifest.env_name(None))
                .map_err(|e| {
                    ConfigError::Invalid(format!(
                        "cannot determine the environment name ({}); set GAMMAPIPE_ENV_NAME",
                        e
                    ))
                })?,
        };

        Ok(prepare_session(
            &self.settings.conda_root(),
            &env_name,
            &self.settings.workdir()?,
            self.settings.min_open_files,
            std::env::var("PATH").ok().as_deref(),
        ))
    }

    /// Picks the mode for `run-analysis`: a light-curve run without an
    /// explicit section uses the configuration's `section`.
    pub fn resolve_mode(
        &self,
        pipeline: &Pipeline,
        lightcurve: bool,
        section: Option<usize>,
    ) -> Result<Mode, InvokeError> {
        if !lightcurve {
            return Ok(Mode::Base);
        }
        let section = section
            .or(pipeline.default_section)
            .ok_or_else(|| ConfigError::Missing("section".to_string()))?;
        Ok(Mode::LightCurveSection(section))
    }

    pub fn invoke(
        &self,
        config_path: &Path,
        mode: Mode,
        overrides: &Overrides,
    ) -> Result<InvokeOutcome, InvokeError> {
        let pipeline = self.load(config_path, overrides)?;
        self.invoke_pipeline(&pipeline, mode)
    }

    pub fn invoke_pipeline(&self, pipeline: &Pipeline, mode: Mode) -> Result<InvokeOutcome, InvokeError> {
        match mode {
            Mode::CombineLightCurve => {
                Ok(InvokeOutcome::Combined(combine_lightcurve(pipeline)?))
            }
            Mode::Base | Mode::LightCurveSection(_) => {
                Ok(InvokeOutcome::Launched(self.launch(pipeline, mode)?))
            }
        }
    }

    /// Absolute path of the analysis script, which must exist.
    pub fn analysis_script(&self) -> Result<PathBuf, InvokeError> {
        let script = absolute_path(&self.settings.analysis_script())?;
        if !script.is_file() {
            return Err(ConfigError::ScriptNotFound(script).into());
        }
        Ok(script)
    }

    fn launch(&self, pipeline: &Pipeline, mode: Mode) -> Result<RunHandle, InvokeError> {
        let mut args = vec![
            pipeline.config_path.to_string_lossy().into_owned(),
            "--prefix".to_string(),
            pipeline.prefix.clone(),
        ];
        let mut env = BTreeMap::new();
        env.insert(
            ANALYSIS_CONFIG_VARIABLE.to_string(),
            pipeline.analysis_config_path.to_string_lossy().into_owned(),
        );

        let (log_name, expected_output) = match mode {
            Mode::LightCurveSection(index) => {
                let section = pipeline.section(index)?;
                debug!(
                    section = index,
                    bins = section.bins(),
                    tstart = section.tstart(),
                    tstop = section.tstop(),
                    "section validated"
                );
                args.extend([
                    "--lightcurve".to_string(),
                    "--section".to_string(),
                    index.to_string(),
                ]);
                env.insert(SECTION_INDEX_VARIABLE.to_string(), index.to_string());
                env.insert(SECTION_TSTART_VARIABLE.to_string(), section.tstart().to_string());
                env.insert(SECTION_TSTOP_VARIABLE.to_string(), section.tstop().to_string());
                env.insert(
                    SECTION_EDGES_VARIABLE.to_string(),
                    section
                        .edges
                        .iter()
                        .map(f64::to_string)
                        .collect::<Vec<_>>()
                        .join(","),
                );
                (
                    format!("{}_lightcurve_{}.log", pipeline.prefix, index),
                    Some(pipeline.stage_output_path(index)),
                )
            }
            _ => (format!("{}_base.log", pipeline.prefix), None),
        };

        args.insert(0, self.analysis_script()?.to_string_lossy().into_owned());

        let session = self.prepare_session()?;
        let request = LaunchRequest {
            program: session.python(),
            args,
            log_path: pipeline.log_dir().join(log_name),
            session,
            env,
        };

        let pid = self.launcher.launch(&request)?;
        info!(
            pid,
            target = pipeline.target().unwrap_or("unknown"),
            log = %request.log_path.display(),
            "launched {}",
            mode
        );

        Ok(RunHandle {
            mode,
            pid,
            log_path: request.log_path,
            expected_output,
        })
    }
}
