//! Output formatting for command results
//!
//! Every result type serializes to JSON for scripts; the human format is
//! what a person at a login node wants to read. Dry-run output in human
//! format is the bare install command so it can be piped to a shell.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write;

use crate::pipeline::{CombineSummary, PipelineStatus, RunHandle, SectionState};
use crate::provision::ProvisionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_provision(&self, outcome: &ProvisionOutcome) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(outcome, "provision outcome"),
            OutputFormat::Human => Ok(format_provision_human(outcome)),
        }
    }

    pub fn format_launch(&self, handle: &RunHandle) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(handle, "run handle"),
            OutputFormat::Human => Ok(format_launch_human(handle)),
        }
    }

    pub fn format_combine(&self, summary: &CombineSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(summary, "combine summary"),
            OutputFormat::Human => Ok(format_combine_human(summary)),
        }
    }

    pub fn format_status(&self, status: &PipelineStatus) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(status, "pipeline status"),
            OutputFormat::Human => Ok(format_status_human(status)),
        }
    }
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string_pretty(value).with_context(|| format!("Failed to serialize {} to JSON", what))
}

fn format_provision_human(outcome: &ProvisionOutcome) -> String {
    match outcome {
        ProvisionOutcome::DryRun { command, .. } => command.clone(),
        ProvisionOutcome::Provisioned {
            target,
            env_name,
            fragment_path,
            ..
        } => {
            let mut out = String::new();
            let _ = writeln!(out, "Provisioned {}", target.display());
            let _ = writeln!(out, "  Environment: {}", env_name);
            let _ = writeln!(out, "  Init fragment: {}", fragment_path.display());
            let _ = write!(
                out,
                "\nActivate with:\n  source {}\n  conda activate {}",
                fragment_path.display(),
                env_name
            );
            out
        }
    }
}

fn format_launch_human(handle: &RunHandle) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Launched {} (pid {})", handle.mode, handle.pid);
    let _ = write!(out, "  Log: {}", handle.log_path.display());
    if let Some(ref expected) = handle.expected_output {
        let _ = write!(out, "\n  Output: {}", expected.display());
    }
    out
}

fn format_combine_human(summary: &CombineSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Combined {} section(s), {} bins",
        summary.section_bins.len(),
        summary.total_bins
    );
    for (index, bins) in summary.section_bins.iter().enumerate() {
        let _ = writeln!(out, "  section {}: {} bins", index, bins);
    }
    let _ = write!(out, "  Output: {}", summary.output_path.display());
    out
}

fn format_status_human(status: &PipelineStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}{}",
        status.prefix,
        status
            .target
            .as_deref()
            .map(|t| format!(" ({})", t))
            .unwrap_or_default()
    );
    let _ = writeln!(out, "  Output directory: {}", status.outdir.display());
    for section in &status.sections {
        let state = match section.state {
            SectionState::Complete => "complete",
            SectionState::Pending => "pending",
        };
        let _ = write!(
            out,
            "  [{}] section {}: {} to {} ({} bins)",
            state, section.index, section.tstart, section.tstop, section.bins
        );
        if let Some(ref note) = section.note {
            let _ = write!(out, " - {}", note);
        }
        out.push('\n');
    }
    let _ = write!(
        out,
        "  {}/{} sections complete",
        status.complete_sections(),
        status.sections.len()
    );
    if status.combined {
        let _ = write!(out, "; combined: {}", status.combined_output.display());
    } else if status.ready_to_combine() {
        out.push_str("; ready to combine");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Mode, SectionStatus};
    use std::path::PathBuf;

    fn status(states: &[SectionState]) -> PipelineStatus {
        PipelineStatus {
            prefix: "crab".to_string(),
            target: Some("Crab".to_string()),
            outdir: PathBuf::from("/work/crab"),
            sections: states
                .iter()
                .enumerate()
                .map(|(index, state)| SectionStatus {
                    index,
                    tstart: index as f64 * 10.0,
                    tstop: (index + 1) as f64 * 10.0,
                    bins: 1,
                    output: PathBuf::from(format!("/work/crab/crab_lightcurve_{}.json", index)),
                    state: *state,
                    note: None,
                })
                .collect(),
            combined_output: PathBuf::from("/work/crab/crab_lightcurve_combined.json"),
            combined: false,
        }
    }

    #[test]
    fn test_dry_run_human_is_bare_command() {
        let outcome = ProvisionOutcome::DryRun {
            target: PathBuf::from("/t"),
            command: "curl -fsSL -o x y && bash x -b -p /t".to_string(),
        };
        let formatter = OutputFormatter::new(OutputFormat::Human);
        assert_eq!(
            formatter.format_provision(&outcome).unwrap(),
            "curl -fsSL -o x y && bash x -b -p /t"
        );
    }

    #[test]
    fn test_dry_run_json_is_tagged() {
        let outcome = ProvisionOutcome::DryRun {
            target: PathBuf::from("/t"),
            command: "true".to_string(),
        };
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let value: serde_json::Value =
            serde_json::from_str(&formatter.format_provision(&outcome).unwrap()).unwrap();
        assert_eq!(value["outcome"], "dry_run");
        assert_eq!(value["target"], "/t");
    }

    #[test]
    fn test_launch_human_mentions_pid_and_log() {
        let handle = RunHandle {
            mode: Mode::LightCurveSection(2),
            pid: 4242,
            log_path: PathBuf::from("/work/logs/crab_lightcurve_2.log"),
            expected_output: Some(PathBuf::from("/work/crab/crab_lightcurve_2.json")),
        };
        let text = OutputFormatter::new(OutputFormat::Human)
            .format_launch(&handle)
            .unwrap();
        assert!(text.contains("pid 4242"));
        assert!(text.contains("crab_lightcurve_2.log"));
        assert!(text.contains("crab_lightcurve_2.json"));
    }

    #[test]
    fn test_status_human_summary() {
        let text = OutputFormatter::new(OutputFormat::Human)
            .format_status(&status(&[SectionState::Complete, SectionState::Pending]))
            .unwrap();
        assert!(text.starts_with("crab (Crab)"));
        assert!(text.contains("[complete] section 0"));
        assert!(text.contains("[pending] section 1"));
        assert!(text.contains("1/2 sections complete"));
        assert!(!text.contains("ready to combine"));
    }

    #[test]
    fn test_status_ready_to_combine() {
        let text = OutputFormatter::new(OutputFormat::Human)
            .format_status(&status(&[SectionState::Complete, SectionState::Complete]))
            .unwrap();
        assert!(text.contains("ready to combine"));
    }

    #[test]
    fn test_status_json_uses_snake_case_states() {
        let text = OutputFormatter::new(OutputFormat::Json)
            .format_status(&status(&[SectionState::Pending]))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["sections"][0]["state"], "pending");
    }
}
