//! Init fragment: the replayable shell state of an initialized install
//!
//! Later sessions source this file instead of running the environment
//! manager's initialization again, so users sharing one install never edit
//! each other's profiles.

use super::runner::shell_quote;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Variable pointing later sessions at the install
pub const ROOT_VARIABLE: &str = "GAMMAPIPE_CONDA_ROOT";

/// Shell line pointing later sessions at the install in `target`.
pub fn root_export_line(target: &Path) -> String {
    format!(
        "export {}={}",
        ROOT_VARIABLE,
        shell_quote(&target.to_string_lossy())
    )
}

/// Ordered shell lines, one applied change per line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitFragment {
    target: PathBuf,
    lines: Vec<String>,
}

impl InitFragment {
    /// Builds the fragment from the environment manager's shell hook output.
    ///
    /// Blank lines and comment lines are dropped and each line is trimmed;
    /// the final line exports [`ROOT_VARIABLE`].
    pub fn from_hook_output(target: &Path, hook_output: &str) -> Self {
        let mut lines: Vec<String> = hook_output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();

        lines.push(root_export_line(target));

        Self {
            target: target.to_path_buf(),
            lines,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// File contents: every line newline-terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}
