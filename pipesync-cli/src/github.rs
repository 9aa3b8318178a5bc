//! GitHub Actions integration: env-driven mode and step outputs.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use pipesync_core::config::MissingTaskMode;

/// Settings read from the Actions environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEnv {
    pub mode: MissingTaskMode,
    pub output: Option<PathBuf>,
}

impl ActionEnv {
    /// `None` unless `GITHUB_ACTION_MODE=true`.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let flag = |key: &str| get(key).is_some_and(|v| v == "true");
        if !flag("GITHUB_ACTION_MODE") {
            return None;
        }
        Some(Self {
            mode: MissingTaskMode::from_flags(flag("AUTO_PATCH"), flag("UPDATE_REFS")),
            output: get("GITHUB_OUTPUT").map(PathBuf::from),
        })
    }
}

/// Per-mapping facts the step outputs are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingSummary {
    pub local_path: String,
    pub updated: bool,
    pub missing: usize,
    pub patched: usize,
}

pub fn render_outputs(summaries: &[MappingSummary]) -> String {
    let updated = summaries.iter().any(|s| s.updated);
    let missing_found = summaries.iter().any(|s| s.missing > 0);
    let patched = summaries.iter().any(|s| s.patched > 0);

    let mut lines = Vec::new();
    for s in summaries {
        if s.updated {
            lines.push(format!("- Updated {} from upstream", s.local_path));
        }
        if s.patched > 0 {
            lines.push(format!("- Patched {} missing tasks in {}", s.patched, s.local_path));
        } else if s.missing > 0 {
            lines.push(format!(
                "- Found {} missing tasks in {} (auto-patch disabled)",
                s.missing, s.local_path
            ));
        }
    }
    let changes = if lines.is_empty() {
        "No changes made".to_string()
    } else {
        lines.join("\n")
    };

    let mut out = String::new();
    let _ = writeln!(out, "updated={updated}");
    let _ = writeln!(out, "pipelines_processed={}", summaries.len());
    let _ = writeln!(out, "missing_tasks_found={missing_found}");
    let _ = writeln!(out, "missing_tasks_patched={patched}");
    let _ = writeln!(out, "changes_summary<<EOF\n{changes}\nEOF");
    out
}

/// Append outputs to the `$GITHUB_OUTPUT` file.
pub fn append_outputs(path: &Path, summaries: &[MappingSummary]) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(render_outputs(summaries).as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::debug!("wrote step outputs to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> Option<ActionEnv> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ActionEnv::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn action_mode_requires_flag() {
        assert!(env(&[("AUTO_PATCH", "true")]).is_none());
        let e = env(&[
            ("GITHUB_ACTION_MODE", "true"),
            ("AUTO_PATCH", "true"),
            ("GITHUB_OUTPUT", "/tmp/out"),
        ])
        .unwrap();
        assert_eq!(e.mode, MissingTaskMode::AutoPatch);
        assert_eq!(e.output, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn outputs_summarise_every_mapping() {
        let out = render_outputs(&[
            MappingSummary {
                local_path: ".tekton/push.yaml".into(),
                updated: true,
                missing: 2,
                patched: 2,
            },
            MappingSummary {
                local_path: ".tekton/pr.yaml".into(),
                updated: false,
                missing: 1,
                patched: 0,
            },
        ]);
        assert!(out.contains("updated=true\n"));
        assert!(out.contains("pipelines_processed=2\n"));
        assert!(out.contains("missing_tasks_found=true\n"));
        assert!(out.contains("missing_tasks_patched=true\n"));
        assert!(out.contains("- Updated .tekton/push.yaml from upstream\n"));
        assert!(out.contains("- Patched 2 missing tasks in .tekton/push.yaml\n"));
        assert!(out.contains("- Found 1 missing tasks in .tekton/pr.yaml (auto-patch disabled)\nEOF\n"));
    }

    #[test]
    fn quiet_run_says_no_changes() {
        let out = render_outputs(&[MappingSummary {
            local_path: "p.yaml".into(),
            updated: false,
            missing: 0,
            patched: 0,
        }]);
        assert!(out.contains("updated=false\n"));
        assert!(out.ends_with("changes_summary<<EOF\nNo changes made\nEOF\n"));
    }
}
