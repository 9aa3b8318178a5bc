//! `pipesync sync`: reconcile configured pipelines and write the results.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use pipesync_core::config::{MissingTaskMode, DEFAULT_CONFIG_FILE};
use pipesync_engine::{ReconcileOptions, ReconcileReport};

use crate::commands::{reconcile_mappings, MappingRun};
use crate::github::{self, ActionEnv, MappingSummary};
use crate::session::Session;
use crate::writer::{atomic_write, WriteResult};

/// Arguments for `pipesync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Path to the sync configuration.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Only reconcile the mapping with this name.
    #[arg(long)]
    pub mapping: Option<String>,

    /// Show what would change without writing any files.
    #[arg(long)]
    pub dry_run: bool,

    /// Resolve missing tasks and splice them in.
    #[arg(long)]
    pub auto_patch: bool,

    /// Refresh every task bundle reference to its latest pin.
    #[arg(long)]
    pub update_refs: bool,

    /// Missing-task handling: skip, auto-patch, refresh-bundles, both.
    #[arg(long, conflicts_with_all = ["auto_patch", "update_refs"])]
    pub mode: Option<MissingTaskMode>,

    /// Append GitHub step outputs to this file.
    #[arg(long)]
    pub github_output: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let session = Session::open(&self.config, self.mapping.as_deref())?;
        let action = ActionEnv::from_env();
        let mode = self.resolve_mode(session.config.mode, action.as_ref());
        let options = ReconcileOptions {
            mode,
            ..ReconcileOptions::from_config(&session.config)
        };
        tracing::info!(
            "syncing {} mapping(s) in {mode} mode",
            session.config.mappings.len()
        );

        let synced: Vec<SyncedMapping> = reconcile_mappings(&session, &options)
            .into_iter()
            .map(|run| write_mapping(run, self.dry_run))
            .collect();

        if self.json {
            print_json(&synced, mode, self.dry_run)?;
        } else {
            for s in &synced {
                print_mapping(s, self.dry_run);
            }
        }

        let output = self
            .github_output
            .clone()
            .or_else(|| action.and_then(|a| a.output));
        if let Some(path) = output {
            github::append_outputs(&path, &summaries(&synced))?;
        }

        let failed = synced.iter().filter(|s| s.outcome.is_err()).count();
        if failed > 0 {
            bail!("{failed} of {} mapping(s) failed", synced.len());
        }
        Ok(())
    }

    /// Explicit `--mode`, then the two flags, then the Actions env, then config.
    fn resolve_mode(&self, configured: MissingTaskMode, action: Option<&ActionEnv>) -> MissingTaskMode {
        if let Some(mode) = self.mode {
            return mode;
        }
        if self.auto_patch || self.update_refs {
            return MissingTaskMode::from_flags(self.auto_patch, self.update_refs);
        }
        action.map_or(configured, |a| a.mode)
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

struct SyncedMapping {
    name: String,
    local: PathBuf,
    outcome: Result<(ReconcileReport, WriteResult)>,
}

fn write_mapping(run: MappingRun, dry_run: bool) -> SyncedMapping {
    let name = run.mapping.display_name();
    let local = run.local_path().to_path_buf();
    let outcome = run.result.and_then(|report| {
        let write = if report.changed() {
            let yaml = report
                .document
                .to_yaml_string()
                .with_context(|| format!("failed to serialize '{name}'"))?;
            atomic_write(&local, &yaml, dry_run)?
        } else {
            WriteResult::Unchanged {
                path: local.clone(),
            }
        };
        Ok((report, write))
    });
    SyncedMapping {
        name,
        local,
        outcome,
    }
}

fn summaries(synced: &[SyncedMapping]) -> Vec<MappingSummary> {
    synced
        .iter()
        .filter_map(|s| {
            let (report, _) = s.outcome.as_ref().ok()?;
            Some(summarize(&s.local, report))
        })
        .collect()
}

/// `updated` follows the merged document, so records lost to conflicts
/// never count.
fn summarize(local: &Path, report: &ReconcileReport) -> MappingSummary {
    MappingSummary {
        local_path: local.display().to_string(),
        updated: report.changed(),
        missing: report.missing.len(),
        patched: report.patched.len(),
    }
}

// ---------------------------------------------------------------------------
// Human output
// ---------------------------------------------------------------------------

fn print_mapping(s: &SyncedMapping, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let (report, write) = match &s.outcome {
        Ok(pair) => pair,
        Err(err) => {
            println!("{prefix}{} '{}' failed: {err:#}", "✗".red().bold(), s.name);
            return;
        }
    };

    let status = match write {
        WriteResult::Written { .. } => "written".green(),
        WriteResult::WouldWrite { .. } => "would write".yellow(),
        WriteResult::Unchanged { .. } => "unchanged".bright_black(),
    };
    println!(
        "{prefix}{} '{}' {} ({status})",
        "✓".green().bold(),
        s.name,
        write.path().display()
    );

    for change in report.applied_changes() {
        println!("  {}  {change}", "~".cyan());
    }
    for change in report.preserved_changes() {
        println!("  {}  {change}", "=".bright_black());
    }
    for name in &report.patched {
        println!("  {}  task '{name}' patched in", "+".green());
    }
    for unresolved in &report.unresolved {
        println!("  {}  task {unresolved}", "?".yellow());
    }
    let unattempted: Vec<&String> = report
        .missing
        .iter()
        .filter(|m| !report.patched.contains(m) && !report.unresolved.iter().any(|u| &u.name == *m))
        .collect();
    if !unattempted.is_empty() {
        println!(
            "  {}  missing upstream tasks (auto-patch disabled): {}",
            "?".yellow(),
            unattempted.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        );
    }
    for name in &report.extra {
        println!("  {}  local-only task '{name}' kept", "·".bright_black());
    }
    for r in &report.refreshed {
        println!("  {}  '{}' {} -> {}", "↻".blue(), r.task, r.from.bundle, r.to.bundle);
    }
    for failure in &report.refresh_failures {
        println!("  {}  refresh {failure}", "!".red());
    }
    for conflict in &report.conflicts {
        println!("  {}  conflict: {conflict}", "!".red());
    }
    if !report.changed() && report.changes.is_empty() && report.missing.is_empty() {
        println!("  {}  up to date", "·".bright_black());
    }
}

// ---------------------------------------------------------------------------
// JSON output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SyncReportJson {
    generated_at: String,
    mode: String,
    dry_run: bool,
    mappings: Vec<MappingJson>,
}

#[derive(Serialize)]
struct MappingJson {
    name: String,
    local: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    changes: Vec<ChangeJson>,
    missing: Vec<String>,
    patched: Vec<String>,
    unresolved: Vec<ReasonJson>,
    extra: Vec<String>,
    refreshed: Vec<RefreshJson>,
    refresh_failures: Vec<ReasonJson>,
    conflicts: Vec<String>,
}

#[derive(Serialize)]
struct ChangeJson {
    path: String,
    kind: String,
    before: Option<String>,
    after: Option<String>,
    applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    preserved_by: Option<String>,
}

#[derive(Serialize)]
struct ReasonJson {
    name: String,
    reason: String,
}

#[derive(Serialize)]
struct RefreshJson {
    task: String,
    from: String,
    to: String,
}

fn mapping_json(s: &SyncedMapping) -> MappingJson {
    let mut json = MappingJson {
        name: s.name.clone(),
        local: s.local.display().to_string(),
        status: "failed",
        error: None,
        changes: Vec::new(),
        missing: Vec::new(),
        patched: Vec::new(),
        unresolved: Vec::new(),
        extra: Vec::new(),
        refreshed: Vec::new(),
        refresh_failures: Vec::new(),
        conflicts: Vec::new(),
    };
    let (report, write) = match &s.outcome {
        Ok(pair) => pair,
        Err(err) => {
            json.error = Some(format!("{err:#}"));
            return json;
        }
    };

    json.status = match write {
        WriteResult::Written { .. } => "written",
        WriteResult::WouldWrite { .. } => "would_write",
        WriteResult::Unchanged { .. } => "unchanged",
    };
    json.changes = report
        .changes
        .iter()
        .map(|c| ChangeJson {
            path: c.path.to_string(),
            kind: c.kind.to_string(),
            before: c.before.as_ref().map(ToString::to_string),
            after: c.after.as_ref().map(ToString::to_string),
            applied: c.is_applied(),
            preserved_by: c.preserved.as_ref().map(ToString::to_string),
        })
        .collect();
    json.missing = report.missing.clone();
    json.patched = report.patched.clone();
    json.unresolved = report
        .unresolved
        .iter()
        .map(|u| ReasonJson {
            name: u.name.clone(),
            reason: u.reason.clone(),
        })
        .collect();
    json.extra = report.extra.clone();
    json.refreshed = report
        .refreshed
        .iter()
        .map(|r| RefreshJson {
            task: r.task.clone(),
            from: r.from.bundle.clone(),
            to: r.to.bundle.clone(),
        })
        .collect();
    json.refresh_failures = report
        .refresh_failures
        .iter()
        .map(|u| ReasonJson {
            name: u.name.clone(),
            reason: u.reason.clone(),
        })
        .collect();
    json.conflicts = report.conflicts.iter().map(ToString::to_string).collect();
    json
}

fn print_json(synced: &[SyncedMapping], mode: MissingTaskMode, dry_run: bool) -> Result<()> {
    let payload = SyncReportJson {
        generated_at: Utc::now().to_rfc3339(),
        mode: mode.to_string(),
        dry_run,
        mappings: synced.iter().map(mapping_json).collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize sync JSON")?
    );
    Ok(())
}
