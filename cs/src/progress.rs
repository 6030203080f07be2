//! The progress memo: `<root>/progress.md`, free-form markdown, append-only.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use tracing::debug;

use crate::error::{ContextError, Result};

const FILE_NAME: &str = "progress.md";

/// Best-effort read of the progress memo. Returns an empty string if it doesn't exist
/// or can't be read — context construction never aborts on this.
pub fn read(root: &Path) -> String {
    let path = root.join(FILE_NAME);
    std::fs::read_to_string(&path).unwrap_or_default()
}

/// Appends a dated markdown block summarizing a healing pass. Used directly by the
/// `update_progress_with_guidance` spell.
pub fn append_guidance(root: &Path, scenario: &str, error_patterns: &[String], spells_attempted: &[String]) -> Result<()> {
    let path = root.join(FILE_NAME);
    debug!(?path, scenario, "progress::append_guidance: called");

    let mut block = format!("\n## {} — {}\n\n", Utc::now().format("%Y-%m-%d %H:%M UTC"), scenario);
    if !error_patterns.is_empty() {
        block.push_str(&format!("- error patterns: {}\n", error_patterns.join(", ")));
    }
    if !spells_attempted.is_empty() {
        block.push_str(&format!("- spells attempted: {}\n", spells_attempted.join(", ")));
    }

    append_raw(&path, &block)
}

/// Appends an arbitrary markdown block, used by `run_tasks_doctor_like_checks` to
/// write its audit report.
pub fn append_report(root: &Path, title: &str, body: &str) -> Result<()> {
    let path = root.join(FILE_NAME);
    let block = format!("\n## {} — {}\n\n{}\n", Utc::now().format("%Y-%m-%d %H:%M UTC"), title, body);
    append_raw(&path, &block)
}

fn append_raw(path: &Path, block: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ContextError::ProgressWrite {
            path: path.display().to_string(),
            source,
        })?;
    file.write_all(block.as_bytes()).map_err(|source| ContextError::ProgressWrite {
        path: path.display().to_string(),
        source,
    })
}
