//! End-to-end reconciliation of one mapping, and of many in parallel.
//!
//! Steps per mapping, in order: task reconciliation, policy, diff, patching
//! of missing tasks, merge, and the optional bundle refresh pass. Only a
//! parse fault aborts; everything else lands in the [`ReconcileReport`].

use std::fmt;
use std::thread;

use pipesync_core::{
    config::{MissingTaskMode, PolicyConfig, SyncConfig},
    document::{Document, Node},
    path::Path,
    task::{task_specs, TaskList, TaskRef},
};

use crate::capability::{BundleRefresher, PatchCapability, RetryPolicy};
use crate::diff::{self, ChangeKind, DiffRecord};
use crate::error::ReconcileError;
use crate::merge::{self, MergeOutcome, StructuralConflict};
use crate::policy::{PreservationPolicy, PreservationReason};
use crate::tasks::{self, Insertion, TaskReconciliation};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Engine settings for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub policy: PolicyConfig,
    pub mode: MissingTaskMode,
    pub retry: RetryPolicy,
}

impl ReconcileOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            policy: config.preserve.clone(),
            mode: config.mode,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// Capabilities available to the engine. Either may be absent.
#[derive(Clone, Copy, Default)]
pub struct Capabilities<'a> {
    pub patch: Option<&'a dyn PatchCapability>,
    pub refresh: Option<&'a dyn BundleRefresher>,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Human-facing view of one diff record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSummary {
    pub path: Path,
    pub kind: ChangeKind,
    pub before: Option<Node>,
    pub after: Option<Node>,
    pub preserved: Option<PreservationReason>,
}

impl ChangeSummary {
    pub fn is_applied(&self) -> bool {
        self.preserved.is_none()
    }
}

impl From<&DiffRecord> for ChangeSummary {
    fn from(record: &DiffRecord) -> Self {
        Self {
            path: record.path.clone(),
            kind: record.kind,
            before: record.old.clone(),
            after: record.new.clone(),
            preserved: record.skip.clone(),
        }
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |n: &Option<Node>| n.as_ref().map_or("<absent>".to_string(), Node::to_string);
        write!(f, "{}: {} -> {}", self.path, show(&self.before), show(&self.after))?;
        if let Some(reason) = &self.preserved {
            write!(f, " (preserved, not applied: {reason})")?;
        }
        Ok(())
    }
}

/// A task or reference the capabilities could not provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub name: String,
    pub reason: String,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedRef {
    pub task: String,
    pub from: TaskRef,
    pub to: TaskRef,
}

/// Everything that happened while reconciling one mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub document: Document,
    pub changes: Vec<ChangeSummary>,
    pub conflicts: Vec<StructuralConflict>,
    /// Every upstream task absent locally, patched or not.
    pub missing: Vec<String>,
    pub patched: Vec<String>,
    pub unresolved: Vec<Unresolved>,
    pub extra: Vec<String>,
    pub refreshed: Vec<RefreshedRef>,
    pub refresh_failures: Vec<Unresolved>,
    changed: bool,
}

impl ReconcileReport {
    /// True when the merged document differs from the local input.
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn applied_changes(&self) -> impl Iterator<Item = &ChangeSummary> {
        self.changes.iter().filter(|c| c.is_applied())
    }

    pub fn preserved_changes(&self) -> impl Iterator<Item = &ChangeSummary> {
        self.changes.iter().filter(|c| !c.is_applied())
    }
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

/// Reconcile `local` against `upstream`.
pub fn reconcile(
    local: &Document,
    upstream: &Document,
    options: &ReconcileOptions,
    caps: Capabilities<'_>,
) -> Result<ReconcileReport, ReconcileError> {
    let tasks = tasks::reconcile(local, upstream)?;
    let policy = PreservationPolicy::for_documents(&options.policy, local, upstream)?;
    let records = diff::diff(local, upstream, &policy);

    let (insertions, mut unresolved) = if options.mode.patches() {
        patch_missing(&tasks, &options.retry, caps.patch)
    } else {
        (Vec::new(), Vec::new())
    };

    let MergeOutcome {
        mut document,
        conflicts,
    } = merge::apply(local, &records, &insertions);

    let patched: Vec<String> = insertions
        .iter()
        .filter(|i| document.get(&i.list.path().named(&i.name)).is_some())
        .map(|i| i.name.clone())
        .collect();
    for insertion in insertions.iter().filter(|i| !patched.contains(&i.name)) {
        unresolved.push(Unresolved {
            name: insertion.name.clone(),
            reason: "resolved but could not be inserted".to_string(),
        });
    }

    let (refreshed, refresh_failures) = if options.mode.refreshes() {
        match caps.refresh {
            Some(refresher) => refresh_refs(&mut document, &options.retry, refresher),
            None => {
                tracing::warn!("bundle refresh requested but no refresher configured");
                (Vec::new(), Vec::new())
            }
        }
    } else {
        (Vec::new(), Vec::new())
    };

    let changes: Vec<ChangeSummary> = records.iter().map(ChangeSummary::from).collect();
    let changed = document != *local;
    tracing::info!(
        "{} change(s) applied, {} preserved, {} task(s) patched, {} reference(s) refreshed",
        changes.iter().filter(|c| c.is_applied()).count(),
        changes.iter().filter(|c| !c.is_applied()).count(),
        patched.len(),
        refreshed.len(),
    );

    Ok(ReconcileReport {
        document,
        changes,
        conflicts,
        missing: tasks.missing.iter().map(|m| m.name().to_string()).collect(),
        patched,
        unresolved,
        extra: tasks.extra,
        refreshed,
        refresh_failures,
        changed,
    })
}

fn patch_missing(
    tasks: &TaskReconciliation,
    retry: &RetryPolicy,
    patch: Option<&dyn PatchCapability>,
) -> (Vec<Insertion>, Vec<Unresolved>) {
    let mut insertions = Vec::new();
    let mut unresolved = Vec::new();

    for missing in &tasks.missing {
        let name = missing.name();
        let Some(patch) = patch else {
            unresolved.push(Unresolved {
                name: name.to_string(),
                reason: "no patch capability configured".to_string(),
            });
            continue;
        };
        match retry.call(&format!("resolve {name}"), |timeout| patch.resolve(name, timeout)) {
            Ok(Some(task_ref)) => {
                tracing::info!("resolved missing task '{name}' to {task_ref}");
                insertions.push(missing.patched(&task_ref));
            }
            Ok(None) => unresolved.push(Unresolved {
                name: name.to_string(),
                reason: "unknown to the patch capability".to_string(),
            }),
            Err(err) => unresolved.push(Unresolved {
                name: name.to_string(),
                reason: err.to_string(),
            }),
        }
    }
    (insertions, unresolved)
}

fn refresh_refs(
    document: &mut Document,
    retry: &RetryPolicy,
    refresher: &dyn BundleRefresher,
) -> (Vec<RefreshedRef>, Vec<Unresolved>) {
    let mut updates = Vec::new();
    let mut failures = Vec::new();

    for list in TaskList::ALL {
        // Faults were caught by the task reconciler; an unreadable list here has no refs to refresh.
        let Ok(specs) = task_specs(document, list) else {
            continue;
        };
        for spec in specs {
            let Some(node) = &spec.task_ref else { continue };
            let current = match TaskRef::from_node(node) {
                Ok(r) => r,
                Err(err) => {
                    tracing::debug!("skipping taskRef of '{}': {err}", spec.name);
                    continue;
                }
            };
            let label = format!("refresh {}", spec.name);
            match retry.call(&label, |timeout| refresher.refresh(&current, timeout)) {
                Ok(Some(latest)) if latest != current => {
                    updates.push((list, spec.name.clone(), current, latest));
                }
                Ok(_) => {}
                Err(err) => failures.push(Unresolved {
                    name: spec.name.clone(),
                    reason: err.to_string(),
                }),
            }
        }
    }

    let mut root = document.root().clone();
    let mut refreshed = Vec::new();
    for (list, task, from, to) in updates {
        let path = list.path().named(&task).key("taskRef");
        if let Some(slot) = root.at_mut(path.segments()) {
            rewrite_task_ref(slot, &to);
            tracing::info!("refreshed '{task}': {} -> {}", from.bundle, to.bundle);
            refreshed.push(RefreshedRef { task, from, to });
        }
    }
    *document = Document::new(root);
    (refreshed, failures)
}

/// Legacy `{name, bundle}` references keep their shape; others are rewritten
/// in resolver form.
fn rewrite_task_ref(slot: &mut Node, task_ref: &TaskRef) {
    if let Some(mapping) = slot.as_mapping_mut() {
        if mapping.contains_key("bundle") && !mapping.contains_key("resolver") {
            mapping.insert("name", Node::from(task_ref.name.as_str()));
            mapping.insert("bundle", Node::from(task_ref.bundle.as_str()));
            return;
        }
    }
    *slot = task_ref.to_node();
}

// ---------------------------------------------------------------------------
// Many mappings
// ---------------------------------------------------------------------------

/// One local/upstream pair to reconcile.
#[derive(Debug, Clone)]
pub struct MappingInput {
    pub name: String,
    pub local: Document,
    pub upstream: Document,
}

#[derive(Debug)]
pub struct MappingOutcome {
    pub name: String,
    pub result: Result<ReconcileReport, ReconcileError>,
}

/// Reconcile every mapping on its own scoped thread. Outcomes come back in
/// input order; one failing mapping never affects another.
pub fn run_all(
    inputs: &[MappingInput],
    options: &ReconcileOptions,
    caps: Capabilities<'_>,
) -> Vec<MappingOutcome> {
    thread::scope(|scope| {
        let handles: Vec<_> = inputs
            .iter()
            .map(|input| {
                let handle = scope.spawn(move || {
                    tracing::debug!("reconciling mapping '{}'", input.name);
                    reconcile(&input.local, &input.upstream, options, caps)
                });
                (input.name.clone(), handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(name, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    tracing::error!("worker for mapping '{name}' panicked");
                    Err(ReconcileError::Panicked {
                        mapping: name.clone(),
                    })
                });
                if let Err(err) = &result {
                    tracing::warn!("mapping '{name}' failed: {err}");
                }
                MappingOutcome { name, result }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CannedCapability;

    fn doc(yaml: &str) -> Document {
        Document::from_yaml_str(yaml).expect("parse")
    }

    #[test]
    fn summary_renders_before_and_after() {
        let summary = ChangeSummary {
            path: "spec.params[name=hermetic].default".parse().unwrap(),
            kind: ChangeKind::Update,
            before: Some(Node::from("false")),
            after: Some(Node::from("true")),
            preserved: Some(PreservationReason::Param("hermetic".into())),
        };
        assert_eq!(
            summary.to_string(),
            r#"spec.params[name=hermetic].default: "false" -> "true" (preserved, not applied: preserved parameter 'hermetic')"#
        );
    }

    #[test]
    fn skip_mode_reports_without_patching() {
        let local = doc("spec:\n  tasks:\n    - name: a\n");
        let upstream = doc("spec:\n  tasks:\n    - name: a\n    - name: b\n");
        let canned = CannedCapability::new().with("b", TaskRef::new("b", "q/b@sha256:1"));
        let caps = Capabilities {
            patch: Some(&canned),
            refresh: None,
        };
        let report = reconcile(&local, &upstream, &ReconcileOptions::default(), caps).unwrap();
        assert_eq!(report.missing, vec!["b"]);
        assert!(report.patched.is_empty());
        assert!(!report.changed());
    }

    #[test]
    fn patch_mode_without_capability_leaves_tasks_unresolved() {
        let local = doc("spec:\n  tasks:\n    - name: a\n");
        let upstream = doc("spec:\n  tasks:\n    - name: a\n    - name: b\n");
        let options = ReconcileOptions {
            mode: MissingTaskMode::AutoPatch,
            ..ReconcileOptions::default()
        };
        let report = reconcile(&local, &upstream, &options, Capabilities::default()).unwrap();
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].reason, "no patch capability configured");
        assert_eq!(report.document, local);
    }

    #[test]
    fn legacy_refs_keep_their_shape() {
        let mut node = doc("name: git-clone\nbundle: q/old\n").into_root();
        rewrite_task_ref(&mut node, &TaskRef::new("git-clone", "q/new"));
        assert_eq!(node.get("bundle"), Some(&Node::from("q/new")));
        assert!(node.get("resolver").is_none());
    }

    #[test]
    fn parse_fault_in_one_mapping_spares_the_rest() {
        let good = MappingInput {
            name: "good".into(),
            local: doc("spec:\n  tasks:\n    - name: a\n"),
            upstream: doc("spec:\n  tasks:\n    - name: a\n"),
        };
        let bad = MappingInput {
            name: "bad".into(),
            local: doc("spec:\n  tasks:\n    - name: a\n    - name: a\n"),
            upstream: doc("spec:\n  tasks: []\n"),
        };
        let outcomes = run_all(&[bad, good], &ReconcileOptions::default(), Capabilities::default());
        assert_eq!(outcomes[0].name, "bad");
        assert!(matches!(outcomes[0].result, Err(ReconcileError::ParseFault(_))));
        assert!(outcomes[1].result.is_ok());
    }
}
