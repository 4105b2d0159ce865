//! Configuration management for gammapipe
//!
//! Settings come from environment variables with sensible defaults. They
//! describe where things live on the cluster (install root, working
//! directory, analysis entry script) and how provisioning behaves. The
//! per-analysis settings live in the pipeline YAML instead, see
//! [`crate::pipeline::config`].
//!
//! # Environment Variables
//!
//! - `GAMMAPIPE_INSTALL_ROOT`: base install root; defaults the install target
//!   to `<root>/<user>/conda` and locates the shared init fragment, the
//!   manifest and the analysis script under `<root>/share/`
//! - `GAMMAPIPE_WORKDIR`: analysis working directory - default: current dir
//! - `GAMMAPIPE_ENV_NAME`: environment name - default: the manifest's `name`
//! - `GAMMAPIPE_INSTALLER_URL`: installer download URL - default: Miniconda3 latest
//! - `GAMMAPIPE_INSTALLER_SHA256`: expected installer digest - default: unchecked
//! - `GAMMAPIPE_DOWNLOAD_TIMEOUT`: download timeout in seconds - default: "600"
//! - `GAMMAPIPE_ANALYSIS_SCRIPT`: external analysis entry script
//! - `GAMMAPIPE_MIN_OPEN_FILES`: minimum soft open-file limit - default: "4096"
//! - `GAMMAPIPE_CONDA_ROOT`: provisioned install used by sessions; exported by
//!   the init fragment - default: the per-user install target
//! - `GAMMAPIPE_PYTHONUSERBASE`: user-local package base handed to launched
//!   analyses as `PYTHONUSERBASE` - default: unset
//! - `GAMMAPIPE_LOG_LEVEL`: logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use gammapipe::GammapipeConfig;
//!
//! let config = GammapipeConfig::default();
//! config.validate().expect("invalid settings");
//! println!("installing into {}", config.default_target().display());
//! ```

use std::env;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_INSTALLER_URL: &str =
    "https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-x86_64.sh";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MIN_OPEN_FILES: u64 = 4096;
const MIN_OPEN_FILES_FLOOR: u64 = 256;

const SHARE_DIR: &str = "share";
const MANIFEST_FILE: &str = "environment.yml";
const FRAGMENT_FILE: &str = "conda_init.sh";
const ANALYSIS_SCRIPT_FILE: &str = "run_analysis.py";

/// Settings errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    #[error("Cannot determine working directory: {0}")]
    WorkingDirectory(#[from] io::Error),
}

impl SettingsError {
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Process-wide settings for gammapipe
#[derive(Debug, Clone)]
pub struct GammapipeConfig {
    /// Shared base install root, if the cluster provides one
    pub install_root: Option<PathBuf>,

    /// Analysis working directory; `None` means the current directory
    pub workdir: Option<PathBuf>,

    /// Environment name override
    pub env_name: Option<String>,

    pub installer_url: String,

    /// Lowercase hex SHA-256 the downloaded installer must match
    pub installer_sha256: Option<String>,

    pub download_timeout_secs: u64,

    /// Explicit analysis entry script
    pub analysis_script: Option<PathBuf>,

    /// Minimum soft open-file limit for launched analyses
    pub min_open_files: u64,

    /// Install a sourced init fragment pointed us at
    pub conda_root: Option<PathBuf>,

    /// `PYTHONUSERBASE` for launched analyses
    pub python_user_base: Option<PathBuf>,

    pub log_level: String,

    /// Login name used for per-user install targets
    pub user: String,

    pub home: Option<PathBuf>,
}

impl Default for GammapipeConfig {
    /// Loads settings from the process environment.
    fn default() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }
}

impl GammapipeConfig {
    /// Builds settings from an arbitrary variable lookup.
    ///
    /// Unparseable numeric values fall back to their defaults; `validate`
    /// catches values that parse but are out of range.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let install_root = non_empty("GAMMAPIPE_INSTALL_ROOT").map(PathBuf::from);
        let workdir = non_empty("GAMMAPIPE_WORKDIR").map(PathBuf::from);
        let env_name = non_empty("GAMMAPIPE_ENV_NAME");

        let installer_url = non_empty("GAMMAPIPE_INSTALLER_URL")
            .unwrap_or_else(|| DEFAULT_INSTALLER_URL.to_string());

        let installer_sha256 = non_empty("GAMMAPIPE_INSTALLER_SHA256").map(|v| v.to_lowercase());

        let download_timeout_secs = non_empty("GAMMAPIPE_DOWNLOAD_TIMEOUT")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS);

        let analysis_script = non_empty("GAMMAPIPE_ANALYSIS_SCRIPT").map(PathBuf::from);

        let min_open_files = non_empty("GAMMAPIPE_MIN_OPEN_FILES")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MIN_OPEN_FILES);

        let conda_root = non_empty("GAMMAPIPE_CONDA_ROOT").map(PathBuf::from);
        let python_user_base = non_empty("GAMMAPIPE_PYTHONUSERBASE").map(PathBuf::from);

        let log_level = non_empty("GAMMAPIPE_LOG_LEVEL")
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        let user = non_empty("USER")
            .or_else(|| non_empty("LOGNAME"))
            .unwrap_or_else(|| "user".to_string());

        let home = non_empty("HOME").map(PathBuf::from).or_else(dirs::home_dir);

        Self {
            install_root,
            workdir,
            env_name,
            installer_url,
            installer_sha256,
            download_timeout_secs,
            analysis_script,
            min_open_files,
            conda_root,
            python_user_base,
            log_level,
            user,
            home,
        }
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.download_timeout_secs == 0 {
            return Err(SettingsError::ValidationFailed(
                "Download timeout must be at least 1 second".to_string(),
            ));
        }

        if self.min_open_files < MIN_OPEN_FILES_FLOOR {
            return Err(SettingsError::ValidationFailed(format!(
                "Minimum open-file limit must be at least {}",
                MIN_OPEN_FILES_FLOOR
            )));
        }

        if !(self.installer_url.starts_with("https://") || self.installer_url.starts_with("http://"))
        {
            return Err(SettingsError::ParseError {
                field: "GAMMAPIPE_INSTALLER_URL".to_string(),
                error: format!("'{}' is not an http(s) URL", self.installer_url),
            });
        }

        if let Some(ref digest) = self.installer_sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(SettingsError::ParseError {
                    field: "GAMMAPIPE_INSTALLER_SHA256".to_string(),
                    error: "expected 64 hex characters".to_string(),
                });
            }
        }

        if self.user.contains('/') || self.user == "." || self.user == ".." {
            return Err(SettingsError::ValidationFailed(format!(
                "User name '{}' cannot be used as a path component",
                self.user
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(SettingsError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    fn share_dir(&self) -> Option<PathBuf> {
        self.install_root.as_ref().map(|root| root.join(SHARE_DIR))
    }

    /// Per-user install target used when `provision -p` is not given.
    pub fn default_target(&self) -> PathBuf {
        match self.install_root {
            Some(ref root) => root.join(&self.user).join("conda"),
            None => self
                .home
                .clone()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".gammapipe")
                .join("conda"),
        }
    }

    /// Install the invoker activates environments from.
    pub fn conda_root(&self) -> PathBuf {
        self.conda_root
            .clone()
            .unwrap_or_else(|| self.default_target())
    }

    /// Environment manifest used when `provision -m` is not given.
    pub fn default_manifest(&self) -> PathBuf {
        self.share_dir()
            .map(|share| share.join(MANIFEST_FILE))
            .unwrap_or_else(|| PathBuf::from(MANIFEST_FILE))
    }

    /// Where the init fragment for `target` is published.
    ///
    /// With a shared install root each user gets `share/<user>/`, so one
    /// user's provisioning never repoints another user's sessions. Without
    /// one the fragment lives inside the install.
    pub fn fragment_path(&self, target: &std::path::Path) -> PathBuf {
        self.share_dir()
            .map(|share| share.join(&self.user).join(FRAGMENT_FILE))
            .unwrap_or_else(|| target.join("etc").join("gammapipe").join(FRAGMENT_FILE))
    }

    /// Entry script of the external analysis program.
    pub fn analysis_script(&self) -> PathBuf {
        if let Some(ref script) = self.analysis_script {
            return script.clone();
        }
        self.share_dir()
            .map(|share| share.join(ANALYSIS_SCRIPT_FILE))
            .unwrap_or_else(|| PathBuf::from(ANALYSIS_SCRIPT_FILE))
    }

    /// Resolved analysis working directory.
    pub fn workdir(&self) -> Result<PathBuf, SettingsError> {
        match self.workdir {
            Some(ref dir) if dir.is_absolute() => Ok(dir.clone()),
            Some(ref dir) => Ok(env::current_dir()?.join(dir)),
            None => Ok(env::current_dir()?),
        }
    }

    /// File name of the installer, taken from the last URL path segment.
    pub fn installer_file_name(&self) -> String {
        self.installer_url
            .split(['?', '#'])
            .next()
            .and_then(|url| url.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("installer.sh")
            .to_string()
    }
}

impl fmt::Display for GammapipeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Gammapipe Configuration:")?;
        match self.install_root {
            Some(ref root) => writeln!(f, "  Install Root: {}", root.display())?,
            None => writeln!(f, "  Install Root: (per-user)")?,
        }
        writeln!(f, "  Default Target: {}", self.default_target().display())?;
        writeln!(f, "  Installer: {}", self.installer_url)?;
        writeln!(f, "  Analysis Script: {}", self.analysis_script().display())?;
        writeln!(f, "  Min Open Files: {}", self.min_open_files)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> GammapipeConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GammapipeConfig::from_lookup(|key| map.get(key).cloned())
    }

    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    fn test_defaults_without_install_root() {
        let config = from_pairs(&[("USER", "alice"), ("HOME", "/home/alice")]);

        assert!(config.install_root.is_none());
        assert_eq!(config.installer_url, DEFAULT_INSTALLER_URL);
        assert_eq!(config.download_timeout_secs, DEFAULT_DOWNLOAD_TIMEOUT_SECS);
        assert_eq!(config.min_open_files, DEFAULT_MIN_OPEN_FILES);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(
            config.default_target(),
            PathBuf::from("/home/alice/.gammapipe/conda")
        );
        assert_eq!(config.default_manifest(), PathBuf::from("environment.yml"));
        assert_eq!(config.analysis_script(), PathBuf::from("run_analysis.py"));
    }

    #[test]
    fn test_install_root_drives_shared_paths() {
        let config = from_pairs(&[("USER", "bob"), ("GAMMAPIPE_INSTALL_ROOT", "/cluster/gamma")]);

        assert_eq!(
            config.default_target(),
            PathBuf::from("/cluster/gamma/bob/conda")
        );
        assert_eq!(
            config.default_manifest(),
            PathBuf::from("/cluster/gamma/share/environment.yml")
        );
        assert_eq!(
            config.fragment_path(&config.default_target()),
            PathBuf::from("/cluster/gamma/share/bob/conda_init.sh")
        );
        assert_eq!(
            config.analysis_script(),
            PathBuf::from("/cluster/gamma/share/run_analysis.py")
        );
    }

    #[test]
    fn test_conda_root_prefers_fragment_export() {
        let config = from_pairs(&[("USER", "dan"), ("GAMMAPIPE_INSTALL_ROOT", "/c")]);
        assert_eq!(config.conda_root(), PathBuf::from("/c/dan/conda"));

        let config = from_pairs(&[("GAMMAPIPE_CONDA_ROOT", "/opt/shared/conda")]);
        assert_eq!(config.conda_root(), PathBuf::from("/opt/shared/conda"));
    }

    #[test]
    fn test_fragment_inside_target_without_root() {
        let config = from_pairs(&[("USER", "carol")]);
        let target = PathBuf::from("/opt/conda");
        assert_eq!(
            config.fragment_path(&target),
            PathBuf::from("/opt/conda/etc/gammapipe/conda_init.sh")
        );
    }

    #[test]
    fn test_unparseable_numbers_fall_back() {
        let config = from_pairs(&[
            ("GAMMAPIPE_DOWNLOAD_TIMEOUT", "soon"),
            ("GAMMAPIPE_MIN_OPEN_FILES", "lots"),
        ]);
        assert_eq!(config.download_timeout_secs, DEFAULT_DOWNLOAD_TIMEOUT_SECS);
        assert_eq!(config.min_open_files, DEFAULT_MIN_OPEN_FILES);
    }

    #[test]
    fn test_validation_valid() {
        let config = from_pairs(&[]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let mut config = from_pairs(&[]);
        config.download_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_low_fd_minimum() {
        let config = from_pairs(&[("GAMMAPIPE_MIN_OPEN_FILES", "64")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_digest() {
        let config = from_pairs(&[("GAMMAPIPE_INSTALLER_SHA256", "abc123")]);
        assert!(matches!(
            config.validate(),
            Err(SettingsError::ParseError { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_non_http_url() {
        let config = from_pairs(&[("GAMMAPIPE_INSTALLER_URL", "ftp://mirror/conda.sh")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_path_like_user() {
        let config = from_pairs(&[("USER", "../bob")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_python_user_base_is_optional() {
        assert!(from_pairs(&[]).python_user_base.is_none());
        let config = from_pairs(&[("GAMMAPIPE_PYTHONUSERBASE", "/cluster/alice/.local")]);
        assert_eq!(
            config.python_user_base,
            Some(PathBuf::from("/cluster/alice/.local"))
        );
    }

    #[test]
    fn test_fragments_are_per_user_under_install_root() {
        let alice = from_pairs(&[("USER", "alice"), ("GAMMAPIPE_INSTALL_ROOT", "/c")]);
        let bob = from_pairs(&[("USER", "bob"), ("GAMMAPIPE_INSTALL_ROOT", "/c")]);
        assert_ne!(
            alice.fragment_path(&alice.default_target()),
            bob.fragment_path(&bob.default_target())
        );
    }

    #[test]
    fn test_installer_file_name() {
        let config = from_pairs(&[(
            "GAMMAPIPE_INSTALLER_URL",
            "https://mirror.example.org/conda/Miniforge3-Linux-x86_64.sh?token=1",
        )]);
        assert_eq!(config.installer_file_name(), "Miniforge3-Linux-x86_64.sh");
    }

    #[test]
    #[serial]
    fn test_default_reads_process_environment() {
        let _guards = vec![
            EnvGuard::set("GAMMAPIPE_WORKDIR", "/scratch/analysis"),
            EnvGuard::set("GAMMAPIPE_LOG_LEVEL", "DEBUG"),
        ];

        let config = GammapipeConfig::default();

        assert_eq!(config.workdir().unwrap(), PathBuf::from("/scratch/analysis"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_config_display() {
        let display = format!("{}", from_pairs(&[]));
        assert!(display.contains("Gammapipe Configuration:"));
        assert!(display.contains("Default Target:"));
    }
}
