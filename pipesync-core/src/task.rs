//! Task views over `spec.tasks[]` / `spec.finally[]` and task references.

use std::collections::HashSet;
use std::fmt;

use crate::document::{Document, Mapping, Node};
use crate::error::DocumentError;
use crate::path::Path;

// ---------------------------------------------------------------------------
// Task lists
// ---------------------------------------------------------------------------

/// The two ordered task lists of a Tekton pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskList {
    Tasks,
    Finally,
}

impl TaskList {
    pub const ALL: [TaskList; 2] = [TaskList::Tasks, TaskList::Finally];

    pub fn key(self) -> &'static str {
        match self {
            TaskList::Tasks => "tasks",
            TaskList::Finally => "finally",
        }
    }

    /// `spec.tasks` / `spec.finally`.
    pub fn path(self) -> Path {
        Path::root().key("spec").key(self.key())
    }

    /// Which list, if any, `path` names exactly.
    pub fn at(path: &Path) -> Option<TaskList> {
        TaskList::ALL.into_iter().find(|list| &list.path() == path)
    }
}

impl fmt::Display for TaskList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spec.{}", self.key())
    }
}

// ---------------------------------------------------------------------------
// TaskSpec
// ---------------------------------------------------------------------------

/// Logical view of one pipeline task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    /// Opaque `taskRef` subtree, if present.
    pub task_ref: Option<Node>,
    /// `params` as ordered name/value pairs.
    pub params: Vec<(String, Node)>,
    pub run_after: Vec<String>,
    /// The full task element as it appears in the document.
    pub raw: Node,
}

impl TaskSpec {
    pub fn from_node(node: &Node, list: TaskList, index: usize) -> Result<Self, DocumentError> {
        let unnamed = || DocumentError::UnnamedTask {
            list: list.to_string(),
            index,
        };
        let mapping = node.as_mapping().ok_or_else(unnamed)?;
        let name = mapping
            .get("name")
            .and_then(Node::as_str)
            .ok_or_else(unnamed)?
            .to_string();

        let params = mapping
            .get("params")
            .and_then(Node::as_sequence)
            .unwrap_or_default()
            .iter()
            .filter_map(|p| {
                let name = p.discriminator("name")?;
                Some((name.to_string(), p.get("value").cloned().unwrap_or_else(Node::null)))
            })
            .collect();

        let run_after = mapping
            .get("runAfter")
            .and_then(Node::as_sequence)
            .unwrap_or_default()
            .iter()
            .filter_map(|n| n.as_str().map(str::to_string))
            .collect();

        Ok(Self {
            name,
            task_ref: mapping.get("taskRef").cloned(),
            params,
            run_after,
            raw: node.clone(),
        })
    }

    /// The raw element with `taskRef` replaced by `task_ref`.
    pub fn with_task_ref(&self, task_ref: &TaskRef) -> Node {
        let mut raw = self.raw.clone();
        if let Some(mapping) = raw.as_mapping_mut() {
            mapping.insert("taskRef", task_ref.to_node());
        }
        raw
    }
}

/// Read one task list. An absent list is empty.
pub fn task_specs(doc: &Document, list: TaskList) -> Result<Vec<TaskSpec>, DocumentError> {
    let Some(node) = doc.get(&list.path()) else {
        return Ok(Vec::new());
    };
    let items = match node {
        Node::Sequence(items) => items.as_slice(),
        Node::Scalar(crate::document::Scalar::Null) => return Ok(Vec::new()),
        other => {
            return Err(DocumentError::MalformedTaskList {
                path: list.to_string(),
                reason: format!("expected a sequence, found a {}", other.kind()),
            })
        }
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| TaskSpec::from_node(item, list, i))
        .collect()
}

/// Every task of both lists, checking that names are unique across them.
pub fn task_table(doc: &Document) -> Result<Vec<(TaskList, TaskSpec)>, DocumentError> {
    let mut seen = HashSet::new();
    let mut table = Vec::new();
    for list in TaskList::ALL {
        for spec in task_specs(doc, list)? {
            if !seen.insert(spec.name.clone()) {
                return Err(DocumentError::DuplicateTask { name: spec.name });
            }
            table.push((list, spec));
        }
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// TaskRef
// ---------------------------------------------------------------------------

/// A pinned pointer to a task implementation in an OCI bundle.
///
/// Written in Tekton bundles-resolver form:
///
/// ```yaml
/// taskRef:
///   resolver: bundles
///   params:
///     - name: name
///       value: git-clone
///     - name: bundle
///       value: quay.io/konflux-ci/tekton-catalog/task-git-clone:0.1@sha256:…
///     - name: kind
///       value: task
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    pub name: String,
    pub bundle: String,
}

impl TaskRef {
    pub fn new(name: impl Into<String>, bundle: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bundle: bundle.into(),
        }
    }

    /// The `sha256:…` pin, if the bundle reference carries one.
    pub fn digest(&self) -> Option<&str> {
        self.bundle.split_once('@').map(|(_, digest)| digest)
    }

    /// Accepts the bundles-resolver form and the legacy `{name, bundle}` form.
    pub fn from_node(node: &Node) -> Result<Self, DocumentError> {
        let invalid = |reason: &str| DocumentError::InvalidTaskRef {
            reason: reason.to_string(),
        };
        let mapping = node.as_mapping().ok_or_else(|| invalid("not a mapping"))?;

        if let Some(resolver) = mapping.get("resolver") {
            if resolver.as_str() != Some("bundles") {
                return Err(invalid("resolver is not 'bundles'"));
            }
            let params = mapping
                .get("params")
                .and_then(Node::as_sequence)
                .ok_or_else(|| invalid("bundles resolver without params"))?;
            let param = |wanted: &str| {
                params
                    .iter()
                    .find(|p| p.discriminator("name") == Some(wanted))
                    .and_then(|p| p.get("value"))
                    .and_then(Node::as_str)
            };
            let name = param("name").ok_or_else(|| invalid("missing 'name' param"))?;
            let bundle = param("bundle").ok_or_else(|| invalid("missing 'bundle' param"))?;
            return Ok(Self::new(name, bundle));
        }

        let name = mapping
            .get("name")
            .and_then(Node::as_str)
            .ok_or_else(|| invalid("missing name"))?;
        let bundle = mapping
            .get("bundle")
            .and_then(Node::as_str)
            .ok_or_else(|| invalid("missing bundle"))?;
        Ok(Self::new(name, bundle))
    }

    pub fn to_node(&self) -> Node {
        let param = |name: &str, value: &str| -> Node {
            Node::Mapping(
                [("name", Node::from(name)), ("value", Node::from(value))]
                    .into_iter()
                    .collect(),
            )
        };
        let mut mapping = Mapping::new();
        mapping.insert("resolver", Node::from("bundles"));
        mapping.insert(
            "params",
            Node::Sequence(vec![
                param("name", &self.name),
                param("bundle", &self.bundle),
                param("kind", "task"),
            ]),
        );
        Node::Mapping(mapping)
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> Document {
        Document::from_yaml_str(yaml).expect("parse")
    }

    #[test]
    fn reads_task_fields() {
        let d = doc(r#"
spec:
  tasks:
    - name: build
      runAfter: [clone, prefetch]
      params:
        - name: IMAGE
          value: quay.io/x
      taskRef:
        name: buildah
        bundle: quay.io/b@sha256:1
"#);
        let tasks = task_specs(&d, TaskList::Tasks).unwrap();
        assert_eq!(tasks.len(), 1);
        let t = &tasks[0];
        assert_eq!(t.name, "build");
        assert_eq!(t.run_after, vec!["clone", "prefetch"]);
        assert_eq!(t.params, vec![("IMAGE".to_string(), Node::from("quay.io/x"))]);
        let r = TaskRef::from_node(t.task_ref.as_ref().unwrap()).unwrap();
        assert_eq!(r.digest(), Some("sha256:1"));
    }

    #[test]
    fn duplicate_names_across_lists_fault() {
        let d = doc(r#"
spec:
  tasks:
    - name: a
  finally:
    - name: a
"#);
        let err = task_table(&d).unwrap_err();
        assert!(matches!(err, DocumentError::DuplicateTask { name } if name == "a"));
    }

    #[test]
    fn unnamed_task_faults() {
        let d = doc("spec:\n  tasks:\n    - runAfter: [x]\n");
        assert!(matches!(
            task_table(&d).unwrap_err(),
            DocumentError::UnnamedTask { index: 0, .. }
        ));
    }

    #[test]
    fn non_sequence_task_list_faults() {
        let d = doc("spec:\n  tasks: oops\n");
        assert!(matches!(
            task_specs(&d, TaskList::Tasks).unwrap_err(),
            DocumentError::MalformedTaskList { .. }
        ));
    }

    #[test]
    fn resolver_form_survives_node_conversion() {
        let r = TaskRef::new("sast-snyk-check", "quay.io/t/sast:0.3@sha256:abc");
        let back = TaskRef::from_node(&r.to_node()).unwrap();
        assert_eq!(back, r);
        assert_eq!(TaskList::at(&"spec.finally".parse().unwrap()), Some(TaskList::Finally));
    }

    #[test]
    fn git_resolver_is_not_a_bundle_ref() {
        let d = doc("resolver: git\nparams: []\n");
        assert!(TaskRef::from_node(d.root()).is_err());
    }
}
