//! `pipesync diff`: unified diff of what `sync` would write.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use similar::TextDiff;

use pipesync_core::config::{MissingTaskMode, DEFAULT_CONFIG_FILE};
use pipesync_engine::ReconcileOptions;

use crate::commands::reconcile_mappings;
use crate::session::Session;
use crate::writer::{normalize_line_endings, read_existing_or_empty};

/// Arguments for `pipesync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Path to the sync configuration.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Only diff the mapping with this name.
    #[arg(long)]
    pub mapping: Option<String>,

    /// Missing-task handling to preview; defaults to the configured mode.
    #[arg(long)]
    pub mode: Option<MissingTaskMode>,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let session = Session::open(&self.config, self.mapping.as_deref())?;
        let mut options = ReconcileOptions::from_config(&session.config);
        if let Some(mode) = self.mode {
            options.mode = mode;
        }

        let mut failed = 0;
        let mut printed = 0;
        for run in reconcile_mappings(&session, &options) {
            let name = run.mapping.display_name();
            let report = match run.result {
                Ok(report) => report,
                Err(err) => {
                    eprintln!("'{name}' failed: {err:#}");
                    failed += 1;
                    continue;
                }
            };
            if !report.changed() {
                continue;
            }

            let merged = report
                .document
                .to_yaml_string()
                .with_context(|| format!("failed to serialize '{name}'"))?;
            let existing = read_existing_or_empty(&run.mapping.local)?;
            let unified = unified_diff(&run.mapping.local.display().to_string(), &existing, &merged);
            print!("{unified}");
            if !unified.ends_with('\n') {
                println!();
            }
            printed += 1;
        }

        if printed == 0 && failed == 0 {
            println!("No differences.");
        }
        if failed > 0 {
            bail!("{failed} mapping(s) failed");
        }
        Ok(())
    }
}

pub fn unified_diff(path: &str, existing: &str, merged: &str) -> String {
    let merged = normalize_line_endings(merged);
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    TextDiff::from_lines(existing, merged.as_str())
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unified_diff_has_headers_and_hunks() {
        let out = unified_diff(
            ".tekton/build.yaml",
            "spec:\n  a: 1\n",
            "spec:\n  a: 1\n  b: 2\n",
        );
        assert!(out.contains("--- a/.tekton/build.yaml"));
        assert!(out.contains("+++ b/.tekton/build.yaml"));
        assert!(out.contains("@@"));
        assert!(out.contains("+  b: 2"));
    }
}
