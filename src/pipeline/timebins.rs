//! Light-curve time binning and sectioning
//!
//! Edges are computed from the analysis YAML the way the toolkit reads it.
//! Sections are gammapipe's own split of those bins: every section gets at
//! least one bin, and each section run is told its edges through the
//! `GAMMAPIPE_SECTION_*` variables rather than recomputing them.

use super::error::ConfigError;
use serde::Serialize;

/// Most time bins a light curve may have.
///
/// Each bin becomes a likelihood fit in the analysis; far beyond this a
/// configuration is a typo (a `binsz` in the wrong unit, say).
pub const MAX_TIME_BINS: usize = 100_000;

/// Source of the light-curve binning, in the toolkit's order of precedence
#[derive(Debug, Clone, PartialEq)]
pub enum Binning {
    /// Explicit edges
    Edges(Vec<f64>),
    /// Number of equal-width bins between `tmin` and `tmax`
    Count(usize),
    /// Bin width; the last partial bin is dropped
    Width(f64),
}

/// Computes bin edges (MET) for `[tmin, tmax)`.
pub fn time_edges(tmin: Option<f64>, tmax: Option<f64>, binning: &Binning) -> Result<Vec<f64>, ConfigError> {
    let edges = match *binning {
        Binning::Edges(ref edges) => {
            check_bin_count(edges.len().saturating_sub(1), "lightcurve.time_bins")?;
            edges.clone()
        }
        Binning::Count(nbins) => {
            let (tmin, tmax) = time_range(tmin, tmax)?;
            if nbins == 0 {
                return Err(ConfigError::Invalid("lightcurve.nbins must be at least 1".to_string()));
            }
            check_bin_count(nbins, "lightcurve.nbins")?;
            let width = (tmax - tmin) / nbins as f64;
            (0..=nbins)
                .map(|k| if k == nbins { tmax } else { tmin + width * k as f64 })
                .collect()
        }
        Binning::Width(binsz) => {
            let (tmin, tmax) = time_range(tmin, tmax)?;
            if !(binsz > 0.0) || !binsz.is_finite() {
                return Err(ConfigError::Invalid("lightcurve.binsz must be positive".to_string()));
            }
            let count = ((tmax - tmin) / binsz).ceil();
            if !count.is_finite() || count > MAX_TIME_BINS as f64 {
                return Err(ConfigError::Invalid(format!(
                    "lightcurve.binsz {} gives more than {} time bins",
                    binsz, MAX_TIME_BINS
                )));
            }
            let count = count as usize;
            (0..count).map(|k| tmin + binsz * k as f64).collect()
        }
    };

    if edges.len() < 2 {
        return Err(ConfigError::Invalid(format!(
            "light curve needs at least one time bin, got {} edge(s)",
            edges.len()
        )));
    }
    if edges.windows(2).any(|w| !(w[0] < w[1])) {
        return Err(ConfigError::Invalid(
            "light-curve time edges must be strictly increasing".to_string(),
        ));
    }
    Ok(edges)
}

fn check_bin_count(bins: usize, key: &str) -> Result<(), ConfigError> {
    if bins > MAX_TIME_BINS {
        return Err(ConfigError::Invalid(format!(
            "{} gives {} time bins, more than the maximum of {}",
            key, bins, MAX_TIME_BINS
        )));
    }
    Ok(())
}

fn time_range(tmin: Option<f64>, tmax: Option<f64>) -> Result<(f64, f64), ConfigError> {
    let tmin = tmin.ok_or_else(|| ConfigError::Missing("selection.tmin".to_string()))?;
    let tmax = tmax.ok_or_else(|| ConfigError::Missing("selection.tmax".to_string()))?;
    if !tmin.is_finite() || !tmax.is_finite() || !(tmin < tmax) {
        return Err(ConfigError::Invalid(format!(
            "selection.tmin ({}) must be before selection.tmax ({})",
            tmin, tmax
        )));
    }
    Ok((tmin, tmax))
}

/// One contiguous run of bins handled by a single analysis process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub index: usize,
    /// Edges of this section's bins; always `bins + 1` values
    pub edges: Vec<f64>,
}

impl Section {
    pub fn bins(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn tstart(&self) -> f64 {
        self.edges[0]
    }

    pub fn tstop(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }
}

/// Splits the bins between `edges` into `num_sections` contiguous sections.
///
/// Bins are dealt out as evenly as possible, earlier sections taking the
/// remainder: 10 bins in 3 sections are `[4, 3, 3]`. Adjacent sections
/// share their boundary edge, so every bin belongs to exactly one section
/// and none is lost at a split. Asking for more sections than bins is an
/// error rather than a run with nothing to fit.
pub fn split_sections(edges: &[f64], num_sections: usize) -> Result<Vec<Section>, ConfigError> {
    let bins = edges.len().saturating_sub(1);
    if num_sections == 0 {
        return Err(ConfigError::Invalid("num_sections must be at least 1".to_string()));
    }
    if num_sections > bins {
        return Err(ConfigError::Invalid(format!(
            "num_sections ({}) exceeds the number of time bins ({})",
            num_sections, bins
        )));
    }

    let base = bins / num_sections;
    let extra = bins % num_sections;

    let mut sections = Vec::with_capacity(num_sections);
    let mut start = 0;
    for index in 0..num_sections {
        let count = base + usize::from(index < extra);
        sections.push(Section {
            index,
            edges: edges[start..=start + count].to_vec(),
        });
        start += count;
    }
    Ok(sections)
}
