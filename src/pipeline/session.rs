//! Clean-slate session for launched analyses
//!
//! Login shells on the cluster often carry module-system state, stray
//! `PYTHONPATH` entries or another conda activation. A [`SessionEnv`]
//! captures exactly what a launched analysis sees instead: stale variables
//! removed, the provisioned environment activated through its variables and
//! `PATH`, a working directory and a minimum open-file limit. Nothing here
//! touches the current process environment except
//! [`SessionEnv::raise_open_file_limit`].

use super::error::InvokeError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Variables that would shadow or confuse the provisioned environment.
///
/// Clearing `PYTHONNOUSERSITE` re-enables user-local package resolution.
pub const CLEARED_VARIABLES: &[&str] = &[
    "PYTHONPATH",
    "PYTHONHOME",
    "PYTHONNOUSERSITE",
    "PYTHONSTARTUP",
    "CONDA_PREFIX",
    "CONDA_DEFAULT_ENV",
    "CONDA_SHLVL",
    "CONDA_EXE",
    "CONDA_PYTHON_EXE",
    "CONDA_PROMPT_MODIFIER",
    "_CE_CONDA",
    "_CE_M",
    "LOADEDMODULES",
    "_LMFILES_",
    "LD_LIBRARY_PATH",
];

const FOREIGN_INSTALL_MARKERS: &[&str] = &[
    "conda",
    "anaconda",
    "miniconda",
    "miniforge",
    "mambaforge",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEnv {
    pub conda_root: PathBuf,
    pub env_name: String,
    /// Removed from the child's environment
    pub unset: Vec<String>,
    /// Added to the child's environment, `PATH` included
    pub set: BTreeMap<String, String>,
    pub workdir: PathBuf,
    pub min_open_files: u64,
}

/// Builds the session for `env_name` inside the install at `conda_root`.
///
/// `inherited_path` is the caller's `PATH`; entries belonging to other
/// conda-style installs are dropped.
pub fn prepare_session(
    conda_root: &Path,
    env_name: &str,
    workdir: &Path,
    min_open_files: u64,
    inherited_path: Option<&str>,
) -> SessionEnv {
    let env_prefix = env_prefix(conda_root, env_name);

    let mut path_entries: Vec<String> = vec![
        env_prefix.join("bin").to_string_lossy().into_owned(),
        conda_root.join("condabin").to_string_lossy().into_owned(),
    ];
    for entry in inherited_path.unwrap_or_default().split(':') {
        if entry.is_empty() || path_entries.iter().any(|e| e == entry) {
            continue;
        }
        if is_foreign_install(Path::new(entry), conda_root) {
            debug!(entry, "dropping PATH entry from another install");
            continue;
        }
        path_entries.push(entry.to_string());
    }

    let mut set = BTreeMap::new();
    set.insert("PATH".to_string(), path_entries.join(":"));
    set.insert(
        "CONDA_PREFIX".to_string(),
        env_prefix.to_string_lossy().into_owned(),
    );
    set.insert("CONDA_DEFAULT_ENV".to_string(), env_name.to_string());
    set.insert("CONDA_SHLVL".to_string(), "1".to_string());
    set.insert(
        "CONDA_EXE".to_string(),
        conda_root.join("bin").join("conda").to_string_lossy().into_owned(),
    );
    set.insert(
        "CONDA_PYTHON_EXE".to_string(),
        conda_root.join("bin").join("python").to_string_lossy().into_owned(),
    );

    SessionEnv {
        conda_root: conda_root.to_path_buf(),
        env_name: env_name.to_string(),
        unset: CLEARED_VARIABLES
            .iter()
            .filter(|v| !set.contains_key(**v))
            .map(|v| v.to_string())
            .collect(),
        set,
        workdir: workdir.to_path_buf(),
        min_open_files,
    }
}

fn env_prefix(conda_root: &Path, env_name: &str) -> PathBuf {
    conda_root.join("envs").join(env_name)
}

fn is_foreign_install(entry: &Path, conda_root: &Path) -> bool {
    if entry.starts_with(conda_root) {
        return true;
    }
    entry.components().any(|component| {
        let name = component.as_os_str().to_string_lossy().to_lowercase();
        FOREIGN_INSTALL_MARKERS
            .iter()
            .any(|marker| name == *marker || name.starts_with(&format!("{}3", marker)))
    })
}

impl SessionEnv {
    /// Points user-local package resolution at `base`.
    pub fn with_python_user_base(mut self, base: &Path) -> Self {
        self.set.insert(
            "PYTHONUSERBASE".to_string(),
            base.to_string_lossy().into_owned(),
        );
        self.unset.retain(|v| v != "PYTHONUSERBASE");
        self
    }

    pub fn env_prefix(&self) -> PathBuf {
        env_prefix(&self.conda_root, &self.env_name)
    }

    /// Interpreter of the activated environment.
    pub fn python(&self) -> PathBuf {
        self.env_prefix().join("bin").join("python")
    }

    /// Applies the session to a child command.
    pub fn apply(&self, command: &mut Command) {
        for key in &self.unset {
            command.env_remove(key);
        }
        command.envs(&self.set);
        command.current_dir(&self.workdir);
    }

    /// Raises this process's soft open-file limit so launched children inherit it.
    ///
    /// Fails before launch when the hard limit does not allow the minimum.
    pub fn raise_open_file_limit(&self) -> Result<u64, InvokeError> {
        let current = rlimit::increase_nofile_limit(self.min_open_files)
            .map_err(|e| InvokeError::io("Raising the open-file limit", e))?;
        if current < self.min_open_files {
            return Err(InvokeError::ResourceLimit {
                wanted: self.min_open_files,
                got: current,
            });
        }
        debug!(limit = current, "open-file limit ready");
        Ok(current)
    }
}
