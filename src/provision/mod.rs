//! Environment provisioning
//!
//! Installs the environment manager non-interactively at an install target,
//! keeps its base environment inert, creates the named analysis environment
//! from a manifest and publishes an [`InitFragment`] that later sessions
//! source instead of re-running initialization.
//!
//! Every check that can fail without touching the disk (manifest, target
//! state) runs before the first mutation. Provisioning the same target from
//! two processes at once is not supported; callers serialize.
//!
//! ```no_run
//! use gammapipe::provision::{ProvisionOutcome, Provisioner};
//! use gammapipe::GammapipeConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provisioner = Provisioner::new(GammapipeConfig::default())?;
//! if let ProvisionOutcome::DryRun { command, .. } = provisioner.provision(None, None, true).await? {
//!     println!("{}", command);
//! }
//! # Ok(())
//! # }
//! ```

pub mod download;
pub mod error;
pub mod fragment;
pub mod manifest;
pub mod plan;
pub mod runner;

pub use download::{Downloader, HttpDownloader};
pub use error::{ManifestError, ProvisionError};
pub use fragment::InitFragment;
pub use manifest::{EnvironmentManifest, PackageSpec};
pub use plan::InstallPlan;
pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};

use crate::config::GammapipeConfig;
use crate::util::fs::write_atomic;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STDERR_TAIL_LINES: usize = 20;

/// Result of a successful `provision` call
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// Nothing was touched; `command` is what a real run would execute
    DryRun { target: PathBuf, command: String },

    Provisioned {
        target: PathBuf,
        env_name: String,
        fragment_path: PathBuf,
        fragment: InitFragment,
    },
}

/// True when `target` already holds something provisioning must not overwrite.
pub fn is_initialized(target: &Path) -> bool {
    match std::fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => std::fs::read_dir(target)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(true),
        Ok(_) => true,
        Err(_) => false,
    }
}

pub struct Provisioner {
    settings: GammapipeConfig,
    downloader: Arc<dyn Downloader>,
    runner: Arc<dyn CommandRunner>,
}

impl Provisioner {
    /// Provisioner backed by HTTP downloads and real child processes.
    pub fn new(settings: GammapipeConfig) -> Result<Self, ProvisionError> {
        let downloader =
            HttpDownloader::new(Duration::from_secs(settings.download_timeout_secs))?;
        Ok(Self::with_backends(
            settings,
            Arc::new(downloader),
            Arc::new(SystemRunner),
        ))
    }

    pub fn with_backends(
        settings: GammapipeConfig,
        downloader: Arc<dyn Downloader>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            settings,
            downloader,
            runner,
        }
    }

    /// Builds the install plan after validating the manifest (read-only).
    pub fn plan(
        &self,
        target: Option<&Path>,
        manifest: Option<&Path>,
    ) -> Result<InstallPlan, ProvisionError> {
        let target = target
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.settings.default_target());
        let manifest_path = manifest
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.settings.default_manifest());

        let manifest = EnvironmentManifest::load(&manifest_path)?;
        let env_name = manifest.env_name(self.settings.env_name.as_deref())?;
        debug!(
            manifest = %manifest_path.display(),
            packages = manifest.package_count(),
            env = %env_name,
            "manifest validated"
        );

        Ok(InstallPlan::new(
            &self.settings.installer_url,
            &self.settings.installer_file_name(),
            &target,
            &manifest_path,
            &env_name,
            &self.settings.fragment_path(&target),
        )
        .with_checksum(self.settings.installer_sha256.as_deref()))
    }

    /// Provisions `target` from `manifest`, or only describes it when `dry_run`.
    pub async fn provision(
        &self,
        target: Option<&Path>,
        manifest: Option<&Path>,
        dry_run: bool,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let plan = self.plan(target, manifest)?;
        let initialized = is_initialized(&plan.target);

        if dry_run {
            if initialized {
                warn!(
                    "{} is already initialized; a real run would refuse it",
                    plan.target.display()
                );
            }
            return Ok(ProvisionOutcome::DryRun {
                target: plan.target.clone(),
                command: plan.render(),
            });
        }

        if initialized {
            return Err(ProvisionError::TargetExists(plan.target.clone()));
        }

        self.download_installer(&plan).await?;

        let result = self.install(&plan).await;
        // The installer is only needed for the install step itself.
        if let Err(e) = tokio::fs::remove_file(&plan.installer_path).await {
            debug!("could not remove {}: {}", plan.installer_path.display(), e);
        }
        let fragment = result?;

        Ok(ProvisionOutcome::Provisioned {
            target: plan.target.clone(),
            env_name: plan.env_name.clone(),
            fragment_path: plan.fragment_path.clone(),
            fragment,
        })
    }

    async fn download_installer(&self, plan: &InstallPlan) -> Result<(), ProvisionError> {
        if let Some(staging) = plan.partial_path.parent() {
            tokio::fs::create_dir_all(staging).await.map_err(|e| {
                ProvisionError::io(format!("Creating {}", staging.display()), e)
            })?;
        }

        let result = self.fetch_verified(plan).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&plan.partial_path).await;
            return result;
        }

        tokio::fs::rename(&plan.partial_path, &plan.installer_path)
            .await
            .map_err(|e| {
                ProvisionError::io(format!("Moving installer to {}", plan.installer_path.display()), e)
            })
    }

    async fn fetch_verified(&self, plan: &InstallPlan) -> Result<(), ProvisionError> {
        let bytes = self
            .downloader
            .fetch(&plan.installer_url, &plan.partial_path)
            .await?;
        info!("Downloaded installer ({} bytes)", bytes);

        if let Some(ref expected) = plan.installer_sha256 {
            let actual = download::sha256_file(&plan.partial_path)
                .await
                .map_err(|e| ProvisionError::io("Hashing installer", e))?;
            if &actual != expected {
                return Err(ProvisionError::Network {
                    url: plan.installer_url.clone(),
                    reason: format!("checksum mismatch: expected {}, got {}", expected, actual),
                });
            }
            debug!("installer checksum verified");
        }
        Ok(())
    }

    async fn run_step(&self, step: &CommandSpec) -> Result<CommandOutput, ProvisionError> {
        info!("Running {}", step);
        self.runner
            .run(step)
            .await
            .map_err(|e| ProvisionError::io(format!("Starting {}", step.program.display()), e))
    }

    async fn install(&self, plan: &InstallPlan) -> Result<InitFragment, ProvisionError> {
        let installer = |output: CommandOutput| ProvisionError::Installer {
            status: output.status_text(),
            stderr: output.stderr_tail(STDERR_TAIL_LINES),
        };

        let output = self.run_step(&plan.install_step()).await?;
        if !output.success() {
            return Err(installer(output));
        }

        let output = self.run_step(&plan.configure_step()).await?;
        if !output.success() {
            return Err(installer(output));
        }

        let output = self.run_step(&plan.create_env_step()).await?;
        if !output.success() {
            return Err(ProvisionError::EnvironmentCreation {
                name: plan.env_name.clone(),
                prefix: plan.env_prefix(),
                status: output.status_text(),
                stderr: output.stderr_tail(STDERR_TAIL_LINES),
            });
        }

        let output = self.run_step(&plan.hook_step()).await?;
        if !output.success() {
            return Err(installer(output));
        }

        let fragment = InitFragment::from_hook_output(&plan.target, &output.stdout);
        write_atomic(&plan.fragment_path, fragment.render().as_bytes()).map_err(|e| {
            ProvisionError::io(format!("Writing {}", plan.fragment_path.display()), e)
        })?;
        info!(
            "Environment '{}' ready; sessions can source {}",
            plan.env_name,
            plan.fragment_path.display()
        );

        Ok(fragment)
    }
}
