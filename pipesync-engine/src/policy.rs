//! Preservation policy: which paths are locally authoritative.
//!
//! Three pattern kinds:
//!
//! | Kind           | Example                          | Matches                                   |
//! |----------------|----------------------------------|-------------------------------------------|
//! | subtree        | `taskRef`, `spec.workspaces`     | the node and every descendant, any depth  |
//! | param value    | parameter `hermetic`             | `params[name=hermetic].value` / `.default`|
//! | param element  | local-only parameter `my-flag`   | `params[name=my-flag]` and below          |
//!
//! When rules of opposite intent match the same path, the most specific rule
//! wins: keyed patterns beat subtree patterns, then the longer pattern wins,
//! and a remaining tie keeps the local value.

use std::collections::BTreeSet;
use std::fmt;

use pipesync_core::{
    config::PolicyConfig,
    document::{Document, Node},
    error::DocumentError,
    path::{Path, Segment},
};

const PARAMS_KEY: &str = "params";
const TASK_REF_KEY: &str = "taskRef";
const VALUE_KEYS: [&str; 2] = ["value", "default"];

/// Whether a rule keeps the local value or lets upstream through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Preserve,
    Sync,
}

/// What a rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Contiguous run of segments anywhere in the path, plus descendants.
    Subtree(Vec<Segment>),
    /// The `value` / `default` position of a named parameter.
    ParamValue(String),
    /// A whole named parameter element.
    ParamElement(String),
}

impl Pattern {
    pub fn matches(&self, path: &Path) -> bool {
        let segments = path.segments();
        match self {
            Pattern::Subtree(pattern) => {
                !pattern.is_empty() && segments.windows(pattern.len()).any(|w| w == pattern.as_slice())
            }
            Pattern::ParamValue(param) => segments.windows(3).any(|w| {
                is_param_element(&w[..2], param)
                    && matches!(&w[2], Segment::Key(k) if VALUE_KEYS.contains(&k.as_str()))
            }),
            Pattern::ParamElement(param) => {
                segments.windows(2).any(|w| is_param_element(w, param))
            }
        }
    }

    /// Ordering key for conflict resolution: (keyed, length).
    fn specificity(&self) -> (bool, usize) {
        match self {
            Pattern::Subtree(segments) => (
                segments.iter().any(|s| matches!(s, Segment::Keyed { .. })),
                segments.len(),
            ),
            Pattern::ParamValue(_) => (true, 3),
            Pattern::ParamElement(_) => (true, 2),
        }
    }
}

fn is_param_element(window: &[Segment], param: &str) -> bool {
    matches!(&window[0], Segment::Key(k) if k == PARAMS_KEY)
        && matches!(&window[1], Segment::Keyed { field, value } if field == "name" && value == param)
}

/// Why a path is preserved; carried into skipped diff records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreservationReason {
    Path(String),
    Param(String),
    LocalOnlyParam(String),
}

impl fmt::Display for PreservationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreservationReason::Path(p) => write!(f, "preserved path '{p}'"),
            PreservationReason::Param(p) => write!(f, "preserved parameter '{p}'"),
            PreservationReason::LocalOnlyParam(p) => write!(f, "local-only parameter '{p}'"),
        }
    }
}

/// One entry of the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservationRule {
    pub pattern: Pattern,
    pub intent: Intent,
    pub label: String,
}

impl PreservationRule {
    pub fn reason(&self) -> PreservationReason {
        match &self.pattern {
            Pattern::Subtree(_) => PreservationReason::Path(self.label.clone()),
            Pattern::ParamValue(p) => PreservationReason::Param(p.clone()),
            Pattern::ParamElement(p) => PreservationReason::LocalOnlyParam(p.clone()),
        }
    }
}

/// Result of classifying a path.
#[derive(Debug, Clone, Copy)]
pub struct Verdict<'a> {
    pub preserved: bool,
    pub rule: Option<&'a PreservationRule>,
}

/// Classifies paths as locally authoritative or syncable.
#[derive(Debug, Clone, Default)]
pub struct PreservationPolicy {
    rules: Vec<PreservationRule>,
}

impl PreservationPolicy {
    /// Static rules from configuration only.
    pub fn new(config: &PolicyConfig) -> Result<Self, DocumentError> {
        let mut rules = Vec::new();
        for pattern in &config.paths {
            rules.push(subtree_rule(pattern, Intent::Preserve)?);
        }
        for param in &config.params {
            rules.push(PreservationRule {
                pattern: Pattern::ParamValue(param.clone()),
                intent: Intent::Preserve,
                label: param.clone(),
            });
        }
        for pattern in &config.sync {
            rules.push(subtree_rule(pattern, Intent::Sync)?);
        }
        Ok(Self { rules })
    }

    /// Static rules plus the dynamic local-only parameter rule for this pair.
    pub fn for_documents(
        config: &PolicyConfig,
        local: &Document,
        upstream: &Document,
    ) -> Result<Self, DocumentError> {
        let mut policy = Self::new(config)?;
        let upstream_params = param_names(upstream.root());
        for name in param_names(local.root()).difference(&upstream_params) {
            tracing::debug!("preserving local-only parameter '{name}'");
            policy.rules.push(PreservationRule {
                pattern: Pattern::ParamElement(name.clone()),
                intent: Intent::Preserve,
                label: name.clone(),
            });
        }
        Ok(policy)
    }

    pub fn rules(&self) -> &[PreservationRule] {
        &self.rules
    }

    pub fn is_preserved(&self, path: &Path) -> bool {
        self.verdict(path).preserved
    }

    pub fn verdict(&self, path: &Path) -> Verdict<'_> {
        let mut matched: Vec<&PreservationRule> =
            self.rules.iter().filter(|r| r.pattern.matches(path)).collect();
        if matched.is_empty() {
            return Verdict {
                preserved: false,
                rule: None,
            };
        }

        matched.sort_by_key(|r| {
            std::cmp::Reverse((r.pattern.specificity(), r.intent == Intent::Preserve))
        });
        let winner = matched[0];
        if matched.iter().any(|r| r.intent != winner.intent) {
            tracing::warn!(
                "ambiguous preservation at {path}: {} rule '{}' overrides {} conflicting rule(s)",
                if winner.intent == Intent::Preserve { "preserve" } else { "sync" },
                winner.label,
                matched.iter().filter(|r| r.intent != winner.intent).count(),
            );
        }
        Verdict {
            preserved: winner.intent == Intent::Preserve,
            rule: Some(winner),
        }
    }
}

fn subtree_rule(pattern: &str, intent: Intent) -> Result<PreservationRule, DocumentError> {
    let path: Path = pattern.parse()?;
    Ok(PreservationRule {
        pattern: Pattern::Subtree(path.segments().to_vec()),
        intent,
        label: pattern.to_string(),
    })
}

/// Names of every element of every `params` list outside `taskRef` subtrees.
fn param_names(node: &Node) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_param_names(node, &mut names);
    names
}

fn collect_param_names(node: &Node, names: &mut BTreeSet<String>) {
    match node {
        Node::Mapping(m) => {
            for (key, child) in m.iter() {
                if key == TASK_REF_KEY {
                    continue;
                }
                if key == PARAMS_KEY {
                    if let Some(items) = child.as_sequence() {
                        names.extend(
                            items
                                .iter()
                                .filter_map(|p| p.discriminator("name"))
                                .map(str::to_string),
                        );
                    }
                }
                collect_param_names(child, names);
            }
        }
        Node::Sequence(items) => items.iter().for_each(|i| collect_param_names(i, names)),
        Node::Scalar(_) => {}
    }
}
