//! Pipeline and analysis configuration
//!
//! The pipeline YAML names the analysis (`prefix`), its light-curve
//! sectioning and the toolkit's own analysis YAML. Only the handful of
//! analysis keys needed to validate sections and locate outputs are read;
//! everything else is the external toolkit's business.
//!
//! ```yaml
//! # crab.yml
//! prefix: crab
//! num_sections: 4
//! analysis_config: crab_config.yml
//! ```

use super::error::ConfigError;
use super::timebins::{split_sections, time_edges, Binning, Section};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Raw pipeline YAML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub prefix: Option<String>,

    pub num_sections: Option<usize>,

    /// Section used by `--lightcurve` without `--section`
    pub section: Option<usize>,

    #[serde(alias = "fermipy_config")]
    pub analysis_config: Option<PathBuf>,

    /// Model-editing keys (`delete_source`, `free_sources`, ...), preserved for
    /// the external tool, which reads the file itself
    #[serde(flatten)]
    pub passthrough: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Selection {
    pub tmin: Option<f64>,
    pub tmax: Option<f64>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LightcurveSettings {
    pub time_bins: Option<Vec<f64>>,
    pub nbins: Option<usize>,
    pub binsz: Option<f64>,
}

impl LightcurveSettings {
    pub fn binning(&self) -> Option<Binning> {
        if let Some(ref edges) = self.time_bins {
            Some(Binning::Edges(edges.clone()))
        } else if let Some(nbins) = self.nbins {
            Some(Binning::Count(nbins))
        } else {
            self.binsz.map(Binning::Width)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileIo {
    pub outdir: Option<PathBuf>,
}

/// The subset of the toolkit's analysis YAML that gammapipe reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub selection: Selection,
    #[serde(default)]
    pub lightcurve: Option<LightcurveSettings>,
    #[serde(default)]
    pub fileio: FileIo,
}

/// Command-line overrides of pipeline settings
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub prefix: Option<String>,
    pub num_sections: Option<usize>,
}

/// Anchors a relative path at the current directory.
///
/// Launched analyses run from the work directory, so every path handed to
/// them must not depend on where gammapipe was started.
pub fn absolute_path(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    // An empty document is an empty mapping, not an error.
    if content.trim().is_empty() {
        return serde_yaml::from_str("{}").map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        });
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// A loaded, validated pipeline with every path resolved
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Absolute, whatever the caller passed
    pub config_path: PathBuf,
    pub prefix: String,
    pub num_sections: Option<usize>,
    pub default_section: Option<usize>,
    pub analysis_config_path: PathBuf,
    pub analysis: AnalysisConfig,
    pub workdir: PathBuf,
    /// Absolute output directory shared by every run of this pipeline
    pub outdir: PathBuf,
}

impl Pipeline {
    /// Loads `config_path` and its analysis YAML.
    ///
    /// The analysis YAML defaults to `<prefix>_config.yml`; relative paths are
    /// taken from the pipeline file's directory. The output directory
    /// defaults to `<prefix>` under `workdir`.
    pub fn load(config_path: &Path, overrides: &Overrides, workdir: &Path) -> Result<Self, ConfigError> {
        let config_path = absolute_path(config_path)?;
        let workdir = absolute_path(workdir)?;
        let raw: PipelineConfig = read_yaml(&config_path)?;

        let prefix = overrides
            .prefix
            .clone()
            .or(raw.prefix)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::Missing("prefix".to_string()))?;
        if prefix.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "prefix '{}' must not contain '/'",
                prefix
            )));
        }

        let num_sections = overrides.num_sections.or(raw.num_sections);
        if num_sections == Some(0) {
            return Err(ConfigError::Invalid("num_sections must be at least 1".to_string()));
        }

        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("/"));
        let analysis_config_path = match raw.analysis_config {
            Some(path) if path.is_absolute() => path,
            Some(path) => config_dir.join(path),
            None => config_dir.join(format!("{}_config.yml", prefix)),
        };
        let analysis: AnalysisConfig = read_yaml(&analysis_config_path)?;

        let outdir = workdir.join(
            analysis
                .fileio
                .outdir
                .clone()
                .unwrap_or_else(|| PathBuf::from(&prefix)),
        );

        Ok(Self {
            config_path,
            prefix,
            num_sections,
            default_section: raw.section,
            analysis_config_path,
            analysis,
            workdir,
            outdir,
        })
    }

    pub fn target(&self) -> Option<&str> {
        self.analysis.selection.target.as_deref()
    }

    /// Number of sections, required for every light-curve operation.
    pub fn require_sections(&self) -> Result<usize, ConfigError> {
        self.num_sections
            .ok_or_else(|| ConfigError::Missing("num_sections".to_string()))
    }

    pub fn time_edges(&self) -> Result<Vec<f64>, ConfigError> {
        let binning = self
            .analysis
            .lightcurve
            .as_ref()
            .and_then(LightcurveSettings::binning)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{} specifies none of lightcurve.time_bins, nbins or binsz",
                    self.analysis_config_path.display()
                ))
            })?;
        time_edges(
            self.analysis.selection.tmin,
            self.analysis.selection.tmax,
            &binning,
        )
    }

    pub fn sections(&self) -> Result<Vec<Section>, ConfigError> {
        let num_sections = self.require_sections()?;
        split_sections(&self.time_edges()?, num_sections)
    }

    /// Checks that `section` exists and returns it.
    pub fn section(&self, section: usize) -> Result<Section, ConfigError> {
        let num_sections = self.require_sections()?;
        if section >= num_sections {
            return Err(ConfigError::SectionOutOfRange {
                section,
                num_sections,
            });
        }
        let mut sections = self.sections()?;
        Ok(sections.swap_remove(section))
    }

    /// Result file written by the analysis of one light-curve section.
    pub fn stage_output_path(&self, section: usize) -> PathBuf {
        self.outdir
            .join(format!("{}_lightcurve_{}.json", self.prefix, section))
    }

    pub fn combined_output_path(&self) -> PathBuf {
        self.outdir
            .join(format!("{}_lightcurve_combined.json", self.prefix))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.workdir.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn crab(dir: &Path) -> PathBuf {
        write(
            dir,
            "crab_config.yml",
            "selection:\n  target: Crab\n  tmin: 600000000\n  tmax: 600086400\nlightcurve:\n  nbins: 4\n",
        );
        write(dir, "crab.yml", "prefix: crab\nnum_sections: 4\ndelete_sources:\n  - minmax_ts: [null, 4]\n")
    }

    #[test]
    fn test_load_defaults() {
        let dir = TempDir::new().unwrap();
        let config = crab(dir.path());

        let pipeline = Pipeline::load(&config, &Overrides::default(), Path::new("/scratch")).unwrap();

        assert_eq!(pipeline.prefix, "crab");
        assert_eq!(pipeline.num_sections, Some(4));
        assert_eq!(pipeline.target(), Some("Crab"));
        assert_eq!(pipeline.analysis_config_path, dir.path().join("crab_config.yml"));
        assert_eq!(pipeline.outdir, PathBuf::from("/scratch/crab"));
        assert_eq!(
            pipeline.stage_output_path(2),
            PathBuf::from("/scratch/crab/crab_lightcurve_2.json")
        );
        assert_eq!(
            pipeline.combined_output_path(),
            PathBuf::from("/scratch/crab/crab_lightcurve_combined.json")
        );
    }

    #[test]
    fn test_relative_config_path_is_made_absolute() {
        let cwd = std::env::current_dir().unwrap();
        let dir = TempDir::new_in(&cwd).unwrap();
        crab(dir.path());
        let relative = dir.path().strip_prefix(&cwd).unwrap().join("crab.yml");
        assert!(relative.is_relative());

        let pipeline = Pipeline::load(&relative, &Overrides::default(), Path::new("scratch")).unwrap();

        assert_eq!(pipeline.config_path, dir.path().join("crab.yml"));
        assert_eq!(pipeline.analysis_config_path, dir.path().join("crab_config.yml"));
        assert_eq!(pipeline.outdir, cwd.join("scratch").join("crab"));
    }

    #[test]
    fn test_passthrough_keys_kept() {
        let dir = TempDir::new().unwrap();
        let config = crab(dir.path());
        let raw: PipelineConfig = read_yaml(&config).unwrap();
        assert!(raw.passthrough.contains_key("delete_sources"));
    }

    #[test]
    fn test_fermipy_config_alias_and_outdir() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "analysis.yml",
            "fileio:\n  outdir: results/vela\nselection:\n  tmin: 0\n  tmax: 10\nlightcurve:\n  binsz: 5\n",
        );
        let config = write(dir.path(), "vela.yml", "prefix: vela\nfermipy_config: analysis.yml\n");

        let pipeline = Pipeline::load(&config, &Overrides::default(), Path::new("/w")).unwrap();

        assert_eq!(pipeline.outdir, PathBuf::from("/w/results/vela"));
        assert_eq!(pipeline.time_edges().unwrap(), vec![0.0, 5.0]);
    }

    #[test]
    fn test_prefix_override() {
        let dir = TempDir::new().unwrap();
        crab(dir.path());
        write(dir.path(), "crab2_config.yml", "selection: {}\n");
        let overrides = Overrides {
            prefix: Some("crab2".to_string()),
            num_sections: Some(2),
        };

        let pipeline = Pipeline::load(&dir.path().join("crab.yml"), &overrides, Path::new("/w")).unwrap();

        assert_eq!(pipeline.prefix, "crab2");
        assert_eq!(pipeline.num_sections, Some(2));
    }

    #[test]
    fn test_missing_prefix() {
        let dir = TempDir::new().unwrap();
        let config = write(dir.path(), "p.yml", "num_sections: 2\n");
        let err = Pipeline::load(&config, &Overrides::default(), Path::new("/w")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref key) if key == "prefix"));
    }

    #[test]
    fn test_missing_analysis_config() {
        let dir = TempDir::new().unwrap();
        let config = write(dir.path(), "p.yml", "prefix: nope\n");
        let err = Pipeline::load(&config, &Overrides::default(), Path::new("/w")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_section_out_of_range() {
        let dir = TempDir::new().unwrap();
        let config = crab(dir.path());
        let pipeline = Pipeline::load(&config, &Overrides::default(), Path::new("/w")).unwrap();

        assert_eq!(pipeline.section(3).unwrap().bins(), 1);
        assert!(matches!(
            pipeline.section(4),
            Err(ConfigError::SectionOutOfRange {
                section: 4,
                num_sections: 4
            })
        ));
    }

    #[test]
    fn test_stage_outputs_are_disjoint() {
        let dir = TempDir::new().unwrap();
        let config = crab(dir.path());
        let pipeline = Pipeline::load(&config, &Overrides::default(), Path::new("/w")).unwrap();

        let paths: std::collections::HashSet<PathBuf> =
            (0..4).map(|i| pipeline.stage_output_path(i)).collect();
        assert_eq!(paths.len(), 4);
        assert!(!paths.contains(&pipeline.combined_output_path()));
    }
}
