//! Filesystem view of a pipeline's progress
//!
//! A section whose analysis crashed looks exactly like one that has not run
//! yet: both are `Pending` until a well-formed output appears.

use super::combine::{read_stage_output, StageProblem};
use super::config::Pipeline;
use super::error::InvokeError;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionState {
    Complete,
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionStatus {
    pub index: usize,
    pub tstart: f64,
    pub tstop: f64,
    /// Bins the configuration assigns to this section
    pub bins: usize,
    pub output: PathBuf,
    pub state: SectionState,
    /// Why an existing output is not usable yet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub prefix: String,
    pub target: Option<String>,
    pub outdir: PathBuf,
    pub sections: Vec<SectionStatus>,
    pub combined_output: PathBuf,
    pub combined: bool,
}

impl PipelineStatus {
    pub fn complete_sections(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.state == SectionState::Complete)
            .count()
    }

    /// True when `combine-lightcurve` would succeed.
    pub fn ready_to_combine(&self) -> bool {
        !self.sections.is_empty() && self.complete_sections() == self.sections.len()
    }
}

/// Inspects every section's expected output for `pipeline`.
pub fn pipeline_status(pipeline: &Pipeline) -> Result<PipelineStatus, InvokeError> {
    let sections = pipeline
        .sections()?
        .into_iter()
        .map(|section| {
            let output = pipeline.stage_output_path(section.index);
            let (state, note) = match read_stage_output(&output, section.index) {
                Ok(_) => (SectionState::Complete, None),
                Err(StageProblem::Missing) => (SectionState::Pending, None),
                Err(StageProblem::Malformed(reason)) => (SectionState::Pending, Some(reason)),
            };
            SectionStatus {
                index: section.index,
                tstart: section.tstart(),
                tstop: section.tstop(),
                bins: section.bins(),
                output,
                state,
                note,
            }
        })
        .collect();

    let combined_output = pipeline.combined_output_path();
    Ok(PipelineStatus {
        prefix: pipeline.prefix.clone(),
        target: pipeline.target().map(str::to_string),
        outdir: pipeline.outdir.clone(),
        sections,
        combined: combined_output.is_file(),
        combined_output,
    })
}
