//! Task reconciler: which upstream tasks are missing locally, which local
//! tasks upstream does not know.
//!
//! A renamed task shows up as one extra (old name) and one missing (new name).

use std::collections::HashSet;

use pipesync_core::{
    document::Document,
    task::{task_table, TaskList, TaskRef, TaskSpec},
};

use crate::error::ReconcileError;

/// An upstream task with no local counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTask {
    pub list: TaskList,
    pub spec: TaskSpec,
    /// Upstream tasks preceding this one in its list, nearest first.
    pub predecessors: Vec<String>,
}

impl MissingTask {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Turn into a merge insertion carrying the resolved reference.
    pub fn patched(&self, task_ref: &TaskRef) -> Insertion {
        Insertion {
            list: self.list,
            name: self.spec.name.clone(),
            task: self.spec.with_task_ref(task_ref),
            predecessors: self.predecessors.clone(),
        }
    }
}

/// A task to splice into the merged document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub list: TaskList,
    pub name: String,
    pub task: pipesync_core::Node,
    pub predecessors: Vec<String>,
}

/// Missing and extra tasks for one local/upstream pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReconciliation {
    /// Upstream order.
    pub missing: Vec<MissingTask>,
    /// Local order.
    pub extra: Vec<String>,
}

impl TaskReconciliation {
    pub fn missing_names(&self) -> Vec<&str> {
        self.missing.iter().map(MissingTask::name).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Compare task names of both documents.
///
/// Fails with a parse fault if either document has duplicate or nameless
/// tasks; nothing is computed for that document in that case.
pub fn reconcile(local: &Document, upstream: &Document) -> Result<TaskReconciliation, ReconcileError> {
    let local_tasks = task_table(local)?;
    let upstream_tasks = task_table(upstream)?;

    let local_names: HashSet<&str> = local_tasks.iter().map(|(_, t)| t.name.as_str()).collect();
    let upstream_names: HashSet<&str> =
        upstream_tasks.iter().map(|(_, t)| t.name.as_str()).collect();

    let mut missing = Vec::new();
    for list in TaskList::ALL {
        let in_list: Vec<&TaskSpec> = upstream_tasks
            .iter()
            .filter(|(l, _)| *l == list)
            .map(|(_, t)| t)
            .collect();
        for (i, spec) in in_list.iter().enumerate() {
            if local_names.contains(spec.name.as_str()) {
                continue;
            }
            missing.push(MissingTask {
                list,
                spec: (*spec).clone(),
                predecessors: in_list[..i].iter().rev().map(|t| t.name.clone()).collect(),
            });
        }
    }

    let extra: Vec<String> = local_tasks
        .iter()
        .filter(|(_, t)| !upstream_names.contains(t.name.as_str()))
        .map(|(_, t)| t.name.clone())
        .collect();

    if !missing.is_empty() {
        tracing::info!(
            "missing tasks: {}",
            missing.iter().map(MissingTask::name).collect::<Vec<_>>().join(", ")
        );
    }
    if !extra.is_empty() {
        tracing::info!("extra tasks: {}", extra.join(", "));
    }

    Ok(TaskReconciliation { missing, extra })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(tasks: &[&str], finally: &[&str]) -> Document {
        let list = |names: &[&str]| {
            names
                .iter()
                .map(|n| format!("    - name: {n}\n"))
                .collect::<String>()
        };
        Document::from_yaml_str(&format!(
            "spec:\n  tasks:\n{}  finally:\n{}",
            list(tasks),
            list(finally)
        ))
        .expect("parse")
    }

    #[test]
    fn missing_and_extra_are_set_differences() {
        let local = pipeline(&["clone", "custom-lint", "build"], &[]);
        let upstream = pipeline(&["clone", "build", "scan"], &["notify"]);
        let result = reconcile(&local, &upstream).unwrap();
        assert_eq!(result.missing_names(), vec!["scan", "notify"]);
        assert_eq!(result.extra, vec!["custom-lint"]);
        assert_eq!(result.missing[0].predecessors, vec!["build", "clone"]);
        assert_eq!(result.missing[1].list, TaskList::Finally);
        assert!(result.missing[1].predecessors.is_empty());
    }

    #[test]
    fn identical_task_sets_are_clean() {
        let doc = pipeline(&["a", "b"], &["c"]);
        assert!(reconcile(&doc, &doc).unwrap().is_clean());
    }

    #[test]
    fn rename_is_extra_plus_missing() {
        let local = pipeline(&["clone", "sast"], &[]);
        let upstream = pipeline(&["clone", "sast-snyk"], &[]);
        let result = reconcile(&local, &upstream).unwrap();
        assert_eq!(result.missing_names(), vec!["sast-snyk"]);
        assert_eq!(result.extra, vec!["sast"]);
    }

    #[test]
    fn duplicate_upstream_names_fault() {
        let local = pipeline(&["a"], &[]);
        let upstream = pipeline(&["a", "a"], &[]);
        assert!(matches!(
            reconcile(&local, &upstream),
            Err(ReconcileError::ParseFault(_))
        ));
    }
}
