//! Merge engine.
//!
//! Applies diff records and task insertions to a copy of the local document.
//! Records that no longer fit the tree become [`StructuralConflict`]s; they
//! are skipped and reported, never fatal.

use std::fmt;

use pipesync_core::{
    document::{Document, Mapping, Node, Scalar},
    path::{Path, Segment},
};

use crate::diff::{ChangeKind, DiffRecord};
use crate::tasks::Insertion;

/// A change that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralConflict {
    pub path: Path,
    pub kind: ChangeKind,
    pub reason: String,
}

impl fmt::Display for StructuralConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.path, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub document: Document,
    pub conflicts: Vec<StructuralConflict>,
}

/// Produce the merged document. `local` is left untouched.
pub fn apply(local: &Document, records: &[DiffRecord], insertions: &[Insertion]) -> MergeOutcome {
    let mut root = local.root().clone();
    let mut conflicts = Vec::new();

    for record in records.iter().filter(|r| r.is_applicable()) {
        let result = match record.kind {
            ChangeKind::Update => update(&mut root, record),
            ChangeKind::Add => add(&mut root, record),
            ChangeKind::Remove => remove(&mut root, &record.path),
        };
        match result {
            Ok(()) => tracing::debug!("applied {} {}", record.kind, record.path),
            Err(reason) => {
                let conflict = StructuralConflict {
                    path: record.path.clone(),
                    kind: record.kind,
                    reason,
                };
                tracing::warn!("conflict: {conflict}");
                conflicts.push(conflict);
            }
        }
    }

    for insertion in insertions {
        if let Err(reason) = insert_task(&mut root, insertion) {
            let conflict = StructuralConflict {
                path: insertion.list.path().named(&insertion.name),
                kind: ChangeKind::Add,
                reason,
            };
            tracing::warn!("conflict: {conflict}");
            conflicts.push(conflict);
        }
    }

    MergeOutcome {
        document: Document::new(root),
        conflicts,
    }
}

// ---------------------------------------------------------------------------
// Record application
// ---------------------------------------------------------------------------

fn update(root: &mut Node, record: &DiffRecord) -> Result<(), String> {
    let new = record.new.clone().ok_or("update without a new value")?;
    let slot = root
        .at_mut(record.path.segments())
        .ok_or("path no longer resolves")?;
    *slot = new;
    Ok(())
}

fn add(root: &mut Node, record: &DiffRecord) -> Result<(), String> {
    let new = record.new.clone().ok_or("add without a new value")?;
    let (parent_path, last) = record.path.split_last().ok_or("cannot add the root")?;
    let parent = root
        .at_mut(parent_path.segments())
        .ok_or("parent path no longer resolves")?;

    match (parent, last) {
        (Node::Mapping(mapping), Segment::Key(key)) => match mapping.get(key) {
            Some(existing) if *existing == new => Ok(()),
            Some(_) => Err("target already exists with a different value".to_string()),
            None => {
                mapping.insert(key.clone(), new);
                Ok(())
            }
        },
        (Node::Sequence(items), Segment::Keyed { field, value }) => {
            match items.iter().find(|i| i.discriminator(field) == Some(value.as_str())) {
                Some(existing) if *existing == new => Ok(()),
                Some(_) => Err("element already exists with a different value".to_string()),
                None => {
                    items.push(new);
                    Ok(())
                }
            }
        }
        (parent, _) => Err(format!("parent is a {}", parent.kind())),
    }
}

fn remove(root: &mut Node, path: &Path) -> Result<(), String> {
    let (parent_path, last) = path.split_last().ok_or("cannot remove the root")?;
    let parent = root
        .at_mut(parent_path.segments())
        .ok_or("parent path no longer resolves")?;

    let removed = match (parent, last) {
        (Node::Mapping(mapping), Segment::Key(key)) => mapping.remove(key).is_some(),
        (Node::Sequence(items), Segment::Keyed { field, value }) => {
            let before = items.len();
            items.retain(|i| i.discriminator(field) != Some(value.as_str()));
            items.len() != before
        }
        (Node::Sequence(items), Segment::Index(index)) if *index < items.len() => {
            items.remove(*index);
            true
        }
        _ => false,
    };
    if removed {
        Ok(())
    } else {
        Err("nothing to remove".to_string())
    }
}

// ---------------------------------------------------------------------------
// Task insertion
// ---------------------------------------------------------------------------

fn insert_task(root: &mut Node, insertion: &Insertion) -> Result<(), String> {
    if task_exists(root, &insertion.name) {
        tracing::debug!("task '{}' already present, not inserting", insertion.name);
        return Ok(());
    }

    let root = root.as_mapping_mut().ok_or("document root is not a mapping")?;
    let spec = entry_or(root, "spec", || Node::Mapping(Mapping::new()))?;
    let spec = spec.as_mapping_mut().ok_or("spec is not a mapping")?;
    let list = entry_or(spec, insertion.list.key(), || Node::Sequence(Vec::new()))?;
    if matches!(list, Node::Scalar(Scalar::Null)) {
        *list = Node::Sequence(Vec::new());
    }
    let items = list
        .as_sequence_mut()
        .ok_or_else(|| format!("{} is not a sequence", insertion.list))?;

    let index = insertion_index(items, &insertion.predecessors);
    items.insert(index, insertion.task.clone());
    tracing::info!(
        "inserted task '{}' into {} at position {index}",
        insertion.name,
        insertion.list
    );
    Ok(())
}

/// After the nearest predecessor already in `items`, else at the end.
pub fn insertion_index(items: &[Node], predecessors: &[String]) -> usize {
    predecessors
        .iter()
        .find_map(|p| {
            items
                .iter()
                .position(|i| i.discriminator("name") == Some(p.as_str()))
        })
        .map_or(items.len(), |pos| pos + 1)
}

fn task_exists(root: &Node, name: &str) -> bool {
    ["tasks", "finally"].iter().any(|list| {
        root.get("spec")
            .and_then(|s| s.get(list))
            .and_then(Node::as_sequence)
            .is_some_and(|items| items.iter().any(|i| i.discriminator("name") == Some(name)))
    })
}

fn entry_or<'a>(
    mapping: &'a mut Mapping,
    key: &str,
    default: impl FnOnce() -> Node,
) -> Result<&'a mut Node, String> {
    if !mapping.contains_key(key) {
        mapping.insert(key, default());
    }
    mapping.get_mut(key).ok_or_else(|| format!("cannot create '{key}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipesync_core::task::TaskList;

    fn doc(yaml: &str) -> Document {
        Document::from_yaml_str(yaml).expect("parse")
    }

    fn record(path: &str, kind: ChangeKind, new: Option<Node>) -> DiffRecord {
        DiffRecord {
            path: path.parse().unwrap(),
            kind,
            old: None,
            new,
            skip: None,
        }
    }

    fn names(doc: &Document, list: &str) -> Vec<String> {
        doc.get(&list.parse().unwrap())
            .and_then(Node::as_sequence)
            .unwrap_or_default()
            .iter()
            .filter_map(|t| t.discriminator("name").map(str::to_string))
            .collect()
    }

    fn insertion(name: &str, predecessors: &[&str]) -> Insertion {
        Insertion {
            list: TaskList::Tasks,
            name: name.to_string(),
            task: Node::Mapping([("name", Node::from(name))].into_iter().collect()),
            predecessors: predecessors.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn update_and_add_apply_in_place() {
        let local = doc("spec:\n  description: old\n  params:\n    - name: a\n");
        let outcome = apply(
            &local,
            &[
                record("spec.description", ChangeKind::Update, Some(Node::from("new"))),
                record("spec.displayName", ChangeKind::Add, Some(Node::from("x"))),
                record(
                    "spec.params[name=b]",
                    ChangeKind::Add,
                    Some(Node::Mapping([("name", Node::from("b"))].into_iter().collect())),
                ),
            ],
            &[],
        );
        assert!(outcome.conflicts.is_empty());
        let merged = outcome.document;
        assert_eq!(merged.get(&"spec.description".parse().unwrap()), Some(&Node::from("new")));
        assert_eq!(merged.get(&"spec.displayName".parse().unwrap()), Some(&Node::from("x")));
        assert_eq!(names(&merged, "spec.params"), vec!["a", "b"]);
        assert_ne!(merged, local);
    }

    #[test]
    fn skipped_records_are_never_applied() {
        let local = doc("spec:\n  description: old\n");
        let mut r = record("spec.description", ChangeKind::Update, Some(Node::from("new")));
        r.skip = Some(crate::policy::PreservationReason::Path("spec.description".into()));
        let outcome = apply(&local, &[r], &[]);
        assert_eq!(outcome.document, local);
    }

    #[test]
    fn unresolvable_paths_become_conflicts() {
        let local = doc("spec:\n  x: 1\n");
        let outcome = apply(
            &local,
            &[
                record("spec.nope.deep", ChangeKind::Update, Some(Node::from("v"))),
                record("spec.x", ChangeKind::Add, Some(Node::from("other"))),
                record("spec.x.y", ChangeKind::Add, Some(Node::from("v"))),
            ],
            &[],
        );
        assert_eq!(outcome.conflicts.len(), 3);
        assert_eq!(outcome.document, local);
    }

    #[test]
    fn remove_deletes_keyed_element() {
        let local = doc("spec:\n  params:\n    - name: a\n    - name: b\n");
        let outcome = apply(&local, &[record("spec.params[name=a]", ChangeKind::Remove, None)], &[]);
        assert_eq!(names(&outcome.document, "spec.params"), vec!["b"]);
    }

    #[test]
    fn insertion_follows_nearest_present_predecessor() {
        let local = doc("spec:\n  tasks:\n    - name: clone\n    - name: custom\n    - name: build\n");
        let outcome = apply(
            &local,
            &[],
            &[insertion("prefetch", &["clone"]), insertion("scan", &["sbom", "build", "clone"])],
        );
        assert_eq!(
            names(&outcome.document, "spec.tasks"),
            vec!["clone", "prefetch", "custom", "build", "scan"]
        );
    }

    #[test]
    fn insertion_chains_on_earlier_insertions() {
        let local = doc("spec:\n  tasks:\n    - name: clone\n    - name: push\n");
        let outcome = apply(
            &local,
            &[],
            &[insertion("a", &["clone"]), insertion("b", &["a", "clone"])],
        );
        assert_eq!(names(&outcome.document, "spec.tasks"), vec!["clone", "a", "b", "push"]);
    }

    #[test]
    fn insertion_without_predecessor_appends_and_creates_list() {
        let local = doc("spec:\n  params: []\n");
        let mut notify = insertion("notify", &[]);
        notify.list = TaskList::Finally;
        let outcome = apply(&local, &[], &[notify]);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(names(&outcome.document, "spec.finally"), vec!["notify"]);
    }

    #[test]
    fn existing_task_is_not_inserted_twice() {
        let local = doc("spec:\n  tasks:\n    - name: scan\n      timeout: 1h\n");
        let outcome = apply(&local, &[], &[insertion("scan", &[])]);
        assert_eq!(outcome.document, local);
    }
}
