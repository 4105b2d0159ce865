//! Environment manifest (conda `environment.yml` layout)
//!
//! ```yaml
//! name: fermi
//! channels: [conda-forge, fermi]
//! dependencies:
//!   - python=3.7
//!   - fermitools
//!   - fermipy>=0.19,<1
//!   - pip:
//!       - pyyaml==5.1
//! ```

use super::error::ManifestError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// One `{package name, version constraint}` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSpec {
    /// Optional `channel::` prefix
    pub channel: Option<String>,
    pub name: String,
    pub constraint: Option<String>,
}

fn spec_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?P<channel>[A-Za-z0-9_.\-]+)::)?(?P<name>[A-Za-z0-9_][A-Za-z0-9_.\-]*)(?:\s*(?P<constraint>[=<>!~0-9*].*))?$",
        )
        .expect("valid regex")
    })
}

impl FromStr for PackageSpec {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let caps = spec_regex()
            .captures(trimmed)
            .ok_or_else(|| ManifestError::InvalidPackage(s.to_string()))?;

        Ok(Self {
            channel: caps.name("channel").map(|m| m.as_str().to_string()),
            name: caps["name"].to_string(),
            constraint: caps
                .name("constraint")
                .map(|m| m.as_str().trim().to_string())
                .filter(|c| !c.is_empty()),
        })
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref channel) = self.channel {
            write!(f, "{}::", channel)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(ref constraint) = self.constraint {
            write!(f, "{}", constraint)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Spec(String),
    Pip { pip: Vec<String> },
}

/// Parsed environment manifest
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentManifest {
    /// File the manifest was read from; handed verbatim to the environment manager
    pub path: PathBuf,
    pub name: Option<String>,
    pub channels: Vec<String>,
    pub packages: Vec<PackageSpec>,
    pub pip_packages: Vec<PackageSpec>,
}

impl EnvironmentManifest {
    /// Reads and validates the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.is_file() {
            return Err(ManifestError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    /// Parses manifest text; `path` is recorded for later use and error messages.
    pub fn parse(path: &Path, content: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest =
            serde_yaml::from_str(content).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut packages = Vec::new();
        let mut pip_packages = Vec::new();
        for dependency in raw.dependencies {
            match dependency {
                RawDependency::Spec(spec) => packages.push(spec.parse()?),
                RawDependency::Pip { pip } => {
                    for spec in pip {
                        pip_packages.push(spec.parse()?);
                    }
                }
            }
        }

        if packages.is_empty() && pip_packages.is_empty() {
            return Err(ManifestError::Invalid(format!(
                "{} lists no dependencies",
                path.display()
            )));
        }

        let name = raw.name.map(|n| n.trim().to_string());
        if let Some(ref n) = name {
            if n.is_empty() || n.contains(['/', ' ']) {
                return Err(ManifestError::Invalid(format!(
                    "environment name '{}' is not usable",
                    n
                )));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            name,
            channels: raw.channels,
            packages,
            pip_packages,
        })
    }

    /// Environment name, preferring an explicit override.
    pub fn env_name(&self, override_name: Option<&str>) -> Result<String, ManifestError> {
        override_name
            .map(str::to_string)
            .or_else(|| self.name.clone())
            .ok_or_else(|| {
                ManifestError::Invalid(format!(
                    "{} has no 'name' and GAMMAPIPE_ENV_NAME is not set",
                    self.path.display()
                ))
            })
    }

    pub fn package_count(&self) -> usize {
        self.packages.len() + self.pip_packages.len()
    }
}
