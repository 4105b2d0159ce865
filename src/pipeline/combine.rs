//! Light-curve combination
//!
//! Merges the per-section result files of one pipeline into a single
//! aggregate. File presence is the only synchronization with the section
//! runs: combination reads each expected file once, refuses to write
//! anything unless every section is present and well-formed, and never
//! locks.
//!
//! Section files are JSON objects. `name`, `file`, `ts_var` and `config`
//! hold one value per section; every other key is a per-bin column whose
//! length matches `tmin`.

use super::config::Pipeline;
use super::error::InvokeError;
use crate::util::fs::write_atomic;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Keys carrying one value per section rather than one per bin
pub const SCALAR_KEYS: &[&str] = &["name", "file", "ts_var", "config"];

/// One section's result file, parsed
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub section: usize,
    pub columns: BTreeMap<String, Vec<Value>>,
    pub scalars: BTreeMap<String, Value>,
}

impl StageOutput {
    pub fn bins(&self) -> usize {
        self.columns.get("tmin").map(Vec::len).unwrap_or(0)
    }

    fn first_and_last(&self, key: &str) -> Option<(f64, f64)> {
        let column = self.columns.get(key)?;
        Some((column.first()?.as_f64()?, column.last()?.as_f64()?))
    }
}

/// Why a section cannot be combined yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageProblem {
    Missing,
    Malformed(String),
}

/// Reads and checks one section's result file.
pub fn read_stage_output(path: &Path, section: usize) -> Result<StageOutput, StageProblem> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StageProblem::Missing),
        Err(e) => return Err(StageProblem::Malformed(e.to_string())),
    };

    let value: Value =
        serde_json::from_str(&content).map_err(|e| StageProblem::Malformed(e.to_string()))?;
    let object = match value {
        Value::Object(object) => object,
        _ => return Err(StageProblem::Malformed("not a JSON object".to_string())),
    };

    let mut columns = BTreeMap::new();
    let mut scalars = BTreeMap::new();
    for (key, value) in object {
        if SCALAR_KEYS.contains(&key.as_str()) {
            scalars.insert(key, value);
        } else if let Value::Array(items) = value {
            columns.insert(key, items);
        } else {
            return Err(StageProblem::Malformed(format!(
                "'{}' should be a per-bin array",
                key
            )));
        }
    }

    let bins = columns
        .get("tmin")
        .map(Vec::len)
        .ok_or_else(|| StageProblem::Malformed("no 'tmin' column".to_string()))?;
    if let Some((key, column)) = columns.iter().find(|(_, column)| column.len() != bins) {
        return Err(StageProblem::Malformed(format!(
            "'{}' has {} entries but 'tmin' has {}",
            key,
            column.len(),
            bins
        )));
    }

    Ok(StageOutput {
        section,
        columns,
        scalars,
    })
}

/// What a successful combination produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombineSummary {
    pub output_path: PathBuf,
    /// Bins contributed by each section, in section order
    pub section_bins: Vec<usize>,
    pub total_bins: usize,
}

/// Merges complete section outputs into one JSON object.
///
/// Columns are concatenated in section order; a column missing from some
/// section is padded with nulls so rows stay aligned. Scalar keys become
/// per-section lists.
pub fn merge_sections(sections: &[StageOutput]) -> Map<String, Value> {
    let column_keys: BTreeSet<&String> = sections.iter().flat_map(|s| s.columns.keys()).collect();
    let scalar_keys: BTreeSet<&String> = sections.iter().flat_map(|s| s.scalars.keys()).collect();

    let mut merged = BTreeMap::new();
    for key in column_keys {
        let mut values = Vec::new();
        for section in sections {
            match section.columns.get(key) {
                Some(column) => values.extend(column.iter().cloned()),
                None => values.extend(std::iter::repeat(Value::Null).take(section.bins())),
            }
        }
        merged.insert(key.clone(), Value::Array(values));
    }
    for key in scalar_keys {
        let values = sections
            .iter()
            .map(|s| s.scalars.get(key).cloned().unwrap_or(Value::Null))
            .collect();
        merged.insert(key.clone(), Value::Array(values));
    }

    merged.into_iter().collect()
}

fn check_ordering(sections: &[StageOutput]) {
    for pair in sections.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if let (Some((_, prev_last)), Some((next_first, _))) =
            (prev.first_and_last("tmin"), next.first_and_last("tmin"))
        {
            if next_first < prev_last {
                warn!(
                    "section {} starts at {} before section {}'s last bin at {}",
                    next.section, next_first, prev.section, prev_last
                );
            }
        }
        if let (Some((_, prev_stop)), Some((next_start, _))) =
            (prev.first_and_last("tmax"), next.first_and_last("tmin"))
        {
            if next_start > prev_stop {
                warn!(
                    "gap between sections {} and {}: {} to {}",
                    prev.section, next.section, prev_stop, next_start
                );
            }
        }
    }
}

/// Combines every section of `pipeline` into its aggregate result file.
pub fn combine_lightcurve(pipeline: &Pipeline) -> Result<CombineSummary, InvokeError> {
    let num_sections = pipeline.require_sections()?;
    info!("Combining {} light-curve section(s) for {}", num_sections, pipeline.prefix);

    let mut sections = Vec::with_capacity(num_sections);
    let mut missing = Vec::new();
    for index in 0..num_sections {
        let path = pipeline.stage_output_path(index);
        match read_stage_output(&path, index) {
            Ok(output) => {
                info!("Section {}: {} bins", index, output.bins());
                sections.push(output);
            }
            Err(StageProblem::Missing) => {
                warn!("Section {}: no file at {}", index, path.display());
                missing.push(index);
            }
            Err(StageProblem::Malformed(reason)) => {
                warn!("Section {}: unusable {}: {}", index, path.display(), reason);
                missing.push(index);
            }
        }
    }

    if !missing.is_empty() {
        return Err(InvokeError::IncompleteStage { missing });
    }

    check_ordering(&sections);

    let merged = merge_sections(&sections);
    let mut rendered = serde_json::to_string_pretty(&Value::Object(merged))
        .map_err(|e| InvokeError::io("Serializing combined light curve", e.into()))?;
    rendered.push('\n');

    let output_path = pipeline.combined_output_path();
    write_atomic(&output_path, rendered.as_bytes())
        .map_err(|e| InvokeError::io(format!("Writing {}", output_path.display()), e))?;

    let section_bins: Vec<usize> = sections.iter().map(StageOutput::bins).collect();
    let total_bins = section_bins.iter().sum();
    info!("Combined results saved to: {}", output_path.display());

    Ok(CombineSummary {
        output_path,
        section_bins,
        total_bins,
    })
}
