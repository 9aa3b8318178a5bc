//! Structural differ.
//!
//! Walks local and upstream in parallel and records, in upstream pre-order,
//! what upstream adds or changes. Local-only content never produces a record.
//! Records on preserved paths are still emitted, tagged with the reason, so
//! reports can show what was held back.

use std::collections::HashSet;
use std::fmt;

use pipesync_core::{
    document::{Document, Node},
    path::{Path, Segment},
    task::TaskList,
};

use crate::policy::{PreservationPolicy, PreservationReason};

const TASK_REF_KEY: &str = "taskRef";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Remove,
    Update,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Add => write!(f, "add"),
            ChangeKind::Remove => write!(f, "remove"),
            ChangeKind::Update => write!(f, "update"),
        }
    }
}

/// One structural change between local and upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    pub path: Path,
    pub kind: ChangeKind,
    pub old: Option<Node>,
    pub new: Option<Node>,
    /// Set when the path is preserved; the merge engine never applies it.
    pub skip: Option<PreservationReason>,
}

impl DiffRecord {
    pub fn is_applicable(&self) -> bool {
        self.skip.is_none()
    }
}

/// Compute the ordered change list from `local` to `upstream`.
pub fn diff(local: &Document, upstream: &Document, policy: &PreservationPolicy) -> Vec<DiffRecord> {
    let mut differ = Differ {
        policy,
        records: Vec::new(),
    };
    differ.walk(&Path::root(), local.root(), upstream.root());
    differ.records
}

struct Differ<'a> {
    policy: &'a PreservationPolicy,
    records: Vec<DiffRecord>,
}

impl Differ<'_> {
    fn walk(&mut self, path: &Path, local: &Node, upstream: &Node) {
        match (local, upstream) {
            (Node::Mapping(l), Node::Mapping(u)) => {
                for (key, u_child) in u.iter() {
                    // taskRef is only ever compared for presence, by the task reconciler.
                    if key == TASK_REF_KEY {
                        continue;
                    }
                    let child = path.key(key);
                    match l.get(key) {
                        Some(l_child) => self.walk(&child, l_child, u_child),
                        // A whole missing task list is only missing tasks.
                        None if TaskList::at(&child).is_some() => {}
                        None => self.record(child, ChangeKind::Add, None, Some(u_child)),
                    }
                }
            }
            (Node::Sequence(l), Node::Sequence(u)) => self.walk_sequence(path, l, u),
            _ => {
                if local != upstream {
                    self.record(path.clone(), ChangeKind::Update, Some(local), Some(upstream));
                }
            }
        }
    }

    fn walk_sequence(&mut self, path: &Path, local: &[Node], upstream: &[Node]) {
        let task_list = TaskList::at(path).is_some();
        let keyed = task_list || (is_keyed(local) && is_keyed(upstream));

        if !keyed {
            if local != upstream {
                self.record(
                    path.clone(),
                    ChangeKind::Update,
                    Some(&Node::Sequence(local.to_vec())),
                    Some(&Node::Sequence(upstream.to_vec())),
                );
            }
            return;
        }

        for u_item in upstream {
            let Some(name) = u_item.discriminator("name") else {
                continue;
            };
            let child = path.named(name);
            match local.iter().find(|l| l.discriminator("name") == Some(name)) {
                Some(l_item) => self.walk(&child, l_item, u_item),
                // Missing tasks are spliced in by the task reconciler, not here.
                None if task_list => {}
                None => self.record(child, ChangeKind::Add, None, Some(u_item)),
            }
        }
    }

    fn record(&mut self, path: Path, kind: ChangeKind, old: Option<&Node>, new: Option<&Node>) {
        let verdict = self.policy.verdict(&path);
        let skip = if verdict.preserved {
            verdict.rule.map(|r| r.reason())
        } else {
            match (old, new) {
                (Some(old), Some(new)) => self.held_back(path.len(), &path, old, new),
                _ => None,
            }
        };
        match &skip {
            Some(reason) => tracing::debug!("{kind} {path} held back ({reason})"),
            None => tracing::debug!("{kind} {path}"),
        }
        self.records.push(DiffRecord {
            path,
            kind,
            old: old.cloned(),
            new: new.cloned(),
            skip,
        });
    }

    /// A whole-node replacement must not overwrite anything preserved below
    /// it. Returns the reason of the first local descendant that is preserved
    /// (or a `taskRef`) and would change. `depth` is the length of the
    /// replaced node's path.
    fn held_back(
        &self,
        depth: usize,
        path: &Path,
        local: &Node,
        upstream: &Node,
    ) -> Option<PreservationReason> {
        let children: Vec<(Segment, &Node)> = match local {
            Node::Mapping(m) => m.iter().map(|(k, v)| (Segment::key(k), v)).collect(),
            Node::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| match item.discriminator("name") {
                    Some(name) => (Segment::named(name), item),
                    None => (Segment::Index(i), item),
                })
                .collect(),
            Node::Scalar(_) => return None,
        };

        for (segment, child) in children {
            let is_task_ref = segment.as_key() == Some(TASK_REF_KEY);
            let child_path = path.child(segment);
            if upstream.at(&child_path.segments()[depth..]) == Some(child) {
                continue;
            }
            if is_task_ref {
                return Some(PreservationReason::Path(TASK_REF_KEY.to_string()));
            }
            let verdict = self.policy.verdict(&child_path);
            if verdict.preserved {
                if let Some(rule) = verdict.rule {
                    return Some(rule.reason());
                }
            }
            if let Some(reason) = self.held_back(depth, &child_path, child, upstream) {
                return Some(reason);
            }
        }
        None
    }
}

/// Every element is a mapping with a string `name`, and names are unique.
fn is_keyed(items: &[Node]) -> bool {
    let mut seen = HashSet::new();
    items
        .iter()
        .all(|item| item.discriminator("name").is_some_and(|n| seen.insert(n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipesync_core::config::PolicyConfig;

    fn doc(yaml: &str) -> Document {
        Document::from_yaml_str(yaml).expect("parse")
    }

    fn run(local: &str, upstream: &str) -> Vec<DiffRecord> {
        let (local, upstream) = (doc(local), doc(upstream));
        let policy =
            PreservationPolicy::for_documents(&PolicyConfig::default(), &local, &upstream).unwrap();
        diff(&local, &upstream, &policy)
    }

    fn paths(records: &[DiffRecord]) -> Vec<String> {
        records.iter().map(|r| r.path.to_string()).collect()
    }

    #[test]
    fn identical_documents_have_no_records() {
        let yaml = "spec:\n  params:\n    - name: a\n      default: x\n";
        assert!(run(yaml, yaml).is_empty());
    }

    #[test]
    fn new_keys_are_added_and_local_only_keys_ignored() {
        let records = run(
            "spec:\n  mine: 1\n",
            "spec:\n  workspaces:\n    - name: source\n",
        );
        assert_eq!(paths(&records), vec!["spec.workspaces"]);
        assert_eq!(records[0].kind, ChangeKind::Add);
        assert!(records[0].is_applicable());
    }

    #[test]
    fn params_match_by_name_not_position() {
        let records = run(
            "spec:\n  params:\n    - name: b\n      default: \"2\"\n    - name: a\n      default: \"1\"\n",
            "spec:\n  params:\n    - name: a\n      default: \"1\"\n    - name: b\n      default: \"3\"\n    - name: c\n",
        );
        assert_eq!(
            paths(&records),
            vec!["spec.params[name=b].default", "spec.params[name=c]"]
        );
        assert_eq!(records[0].kind, ChangeKind::Update);
        assert_eq!(records[1].kind, ChangeKind::Add);
    }

    #[test]
    fn preserved_param_value_is_reported_but_skipped() {
        let records = run(
            "spec:\n  params:\n    - name: hermetic\n      default: \"false\"\n      description: old\n",
            "spec:\n  params:\n    - name: hermetic\n      default: \"true\"\n      description: new\n",
        );
        assert_eq!(
            paths(&records),
            vec!["spec.params[name=hermetic].default", "spec.params[name=hermetic].description"]
        );
        assert_eq!(
            records[0].skip,
            Some(PreservationReason::Param("hermetic".to_string()))
        );
        assert!(records[1].is_applicable());
    }

    #[test]
    fn task_ref_never_diffed() {
        let records = run(
            "spec:\n  tasks:\n    - name: a\n      taskRef: {name: old, bundle: b1}\n",
            "spec:\n  tasks:\n    - name: a\n      taskRef: {name: new, bundle: b2}\n      timeout: 1h\n",
        );
        assert_eq!(paths(&records), vec!["spec.tasks[name=a].timeout"]);
    }

    #[test]
    fn missing_tasks_are_left_to_the_reconciler() {
        let records = run(
            "spec:\n  tasks:\n    - name: clone\n",
            "spec:\n  tasks:\n    - name: clone\n    - name: scan\n",
        );
        assert!(records.is_empty());

        let records = run(
            "spec:\n  tasks: []\n",
            "spec:\n  tasks: []\n  finally:\n    - name: notify\n",
        );
        assert!(records.is_empty());
    }

    #[test]
    fn unkeyed_sequences_compare_whole() {
        let records = run(
            "spec:\n  tasks:\n    - name: b\n      runAfter: [a]\n",
            "spec:\n  tasks:\n    - name: b\n      runAfter: [a, prefetch]\n",
        );
        assert_eq!(paths(&records), vec!["spec.tasks[name=b].runAfter"]);
        assert_eq!(records[0].old.as_ref().unwrap().to_string(), r#"["a"]"#);
    }

    #[test]
    fn whole_sequence_update_over_preserved_value_is_held_back() {
        let records = run(
            "spec:\n  params:\n    - name: hermetic\n      default: \"false\"\n",
            "spec:\n  params:\n    - name: hermetic\n      default: \"true\"\n    - description: unnamed\n",
        );
        assert_eq!(paths(&records), vec!["spec.params"]);
        assert_eq!(
            records[0].skip,
            Some(PreservationReason::Param("hermetic".to_string()))
        );
    }

    #[test]
    fn whole_sequence_update_keeps_applying_when_preserved_values_agree() {
        let records = run(
            "spec:\n  params:\n    - name: hermetic\n      default: \"false\"\n",
            "spec:\n  params:\n    - name: hermetic\n      default: \"false\"\n    - description: unnamed\n",
        );
        assert_eq!(paths(&records), vec!["spec.params"]);
        assert!(records[0].is_applicable());
    }

    #[test]
    fn type_change_over_task_ref_is_held_back() {
        let records = run(
            "spec:\n  pipelineRef:\n    - name: a\n      taskRef: {name: t, bundle: b1}\n",
            "spec:\n  pipelineRef: none\n",
        );
        assert_eq!(
            records[0].skip,
            Some(PreservationReason::Path("taskRef".to_string()))
        );
    }

    #[test]
    fn type_change_is_whole_update() {
        let records = run("spec:\n  x: \"1\"\n", "spec:\n  x: 1\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ChangeKind::Update);
    }

    #[test]
    fn records_follow_upstream_preorder() {
        let records = run(
            "a: 0\nb:\n  c: 0\n",
            "b:\n  c: 1\n  d: 1\na: 1\n",
        );
        assert_eq!(paths(&records), vec!["b.c", "b.d", "a"]);
    }
}
