//! `pipesync.yaml`: caller-supplied sync configuration.
//!
//! ```yaml
//! mappings:
//!   - upstream: https://raw.githubusercontent.com/konflux-ci/build-definitions/main/pipelines/fbc-builder/fbc-builder.yaml
//!     local: .tekton/fbc-build-pipeline.yaml
//! preserve:
//!   params: [hermetic, build-source-image, build-args, build-platforms]
//!   paths: [taskRef]
//! mode: auto-patch
//! catalog: .tekton/trusted-tasks.yaml
//! ```
//!
//! Every section is optional except `mappings`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Parameters whose local value always wins.
pub const DEFAULT_PRESERVED_PARAMS: &[&str] =
    &["hermetic", "build-source-image", "build-args", "build-platforms"];

/// Subtrees that are never diffed field by field.
pub const DEFAULT_PRESERVED_PATHS: &[&str] = &["taskRef"];

/// Default config filename looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pipesync.yaml";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One upstream → local pipeline pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Display name; defaults to the local file stem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `http(s)://` URL or filesystem path of the reference pipeline.
    pub upstream: String,
    /// Path of the locally maintained pipeline.
    pub local: PathBuf,
}

impl MappingConfig {
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.local
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.local.display().to_string())
    }
}

/// Preservation rules fed to the engine's policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Parameter names whose `value` / `default` is locally authoritative.
    #[serde(default = "default_params")]
    pub params: Vec<String>,
    /// Subtree patterns that are locally authoritative.
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,
    /// Patterns that must sync even beneath a preserved subtree.
    #[serde(default)]
    pub sync: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            params: default_params(),
            paths: default_paths(),
            sync: Vec::new(),
        }
    }
}

fn default_params() -> Vec<String> {
    DEFAULT_PRESERVED_PARAMS.iter().map(|s| s.to_string()).collect()
}

fn default_paths() -> Vec<String> {
    DEFAULT_PRESERVED_PATHS.iter().map(|s| s.to_string()).collect()
}

/// What to do about tasks present upstream but missing locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingTaskMode {
    /// Report only.
    #[default]
    Skip,
    /// Resolve missing tasks through the patch capability and splice them in.
    AutoPatch,
    /// Refresh every existing task reference.
    RefreshBundles,
    /// Both of the above.
    Both,
}

impl MissingTaskMode {
    pub fn patches(self) -> bool {
        matches!(self, MissingTaskMode::AutoPatch | MissingTaskMode::Both)
    }

    pub fn refreshes(self) -> bool {
        matches!(self, MissingTaskMode::RefreshBundles | MissingTaskMode::Both)
    }

    /// Combine the two opt-in switches.
    pub fn from_flags(auto_patch: bool, update_refs: bool) -> Self {
        match (auto_patch, update_refs) {
            (false, false) => MissingTaskMode::Skip,
            (true, false) => MissingTaskMode::AutoPatch,
            (false, true) => MissingTaskMode::RefreshBundles,
            (true, true) => MissingTaskMode::Both,
        }
    }
}

impl fmt::Display for MissingTaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingTaskMode::Skip => write!(f, "skip"),
            MissingTaskMode::AutoPatch => write!(f, "auto-patch"),
            MissingTaskMode::RefreshBundles => write!(f, "refresh-bundles"),
            MissingTaskMode::Both => write!(f, "both"),
        }
    }
}

impl FromStr for MissingTaskMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(MissingTaskMode::Skip),
            "auto-patch" | "patch" => Ok(MissingTaskMode::AutoPatch),
            "refresh-bundles" | "update-refs" => Ok(MissingTaskMode::RefreshBundles),
            "both" => Ok(MissingTaskMode::Both),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

/// Bounded retry for capability calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            timeout_secs: default_timeout_secs(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_backoff_ms() -> u64 {
    500
}

/// External patcher tool invocation.
///
/// The command is a resolver wrapper, not a pipeline editor: pipesync does
/// the splicing itself. Each call runs `command` with one of the argument
/// templates, `{task}` and `{bundle}` substituted, and expects:
///
/// - exit 0 with `<bundle>` or `<name> <bundle>` on the first stdout line
/// - exit 3 or empty stdout when the task is unknown / already current
/// - any other exit code for a failure, with the reason on stderr
///
/// Both templates are required. Tools such as konflux-pipeline-patcher, which
/// only offer `list-tasks` / `patch` / `bump-task-refs`, need such a wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatcherConfig {
    pub command: String,
    pub resolve_args: Vec<String>,
    pub refresh_args: Vec<String>,
}

/// Root of `pipesync.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub mappings: Vec<MappingConfig>,
    #[serde(default)]
    pub preserve: PolicyConfig,
    #[serde(default)]
    pub mode: MissingTaskMode,
    #[serde(default)]
    pub retry: RetryConfig,
    /// YAML map of task name → bundle reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patcher: Option<PatcherConfig>,
}

impl SyncConfig {
    /// Restrict to the mapping whose display name is `name`.
    pub fn select(&self, name: &str) -> Option<MappingConfig> {
        self.mappings
            .iter()
            .find(|m| m.display_name() == name)
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Parse config text. `origin` only labels errors.
pub fn parse(text: &str, origin: &Path) -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
        path: origin.to_path_buf(),
        source: e,
    })?;
    if config.mappings.is_empty() {
        return Err(ConfigError::Invalid("no mappings configured".to_string()));
    }
    Ok(config)
}

/// Load `path`. Relative `local` and `catalog` paths resolve against the
/// config file's directory.
pub fn load_at(path: &Path) -> Result<SyncConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut config = parse(&text, path)?;

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    for mapping in &mut config.mappings {
        if mapping.local.is_relative() {
            mapping.local = base.join(&mapping.local);
        }
    }
    if let Some(catalog) = config.catalog.as_mut() {
        if catalog.is_relative() {
            *catalog = base.join(&*catalog);
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_builtin_rules() {
        let config = parse(
            "mappings:\n  - upstream: up.yaml\n    local: .tekton/build.yaml\n",
            Path::new("inline"),
        )
        .expect("parse");
        assert_eq!(config.preserve, PolicyConfig::default());
        assert_eq!(config.mode, MissingTaskMode::Skip);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.mappings[0].display_name(), "build");
    }

    #[test]
    fn empty_mappings_rejected() {
        let err = parse("mappings: []\n", Path::new("inline")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipesync.yaml");
        std::fs::write(
            &path,
            "mappings:\n  - upstream: u.yaml\n    local: .tekton/p.yaml\ncatalog: tasks.yaml\n",
        )
        .unwrap();
        let config = load_at(&path).expect("load");
        assert_eq!(config.mappings[0].local, dir.path().join(".tekton/p.yaml"));
        assert_eq!(config.catalog, Some(dir.path().join("tasks.yaml")));
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load_at(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[rstest]
    #[case("skip", MissingTaskMode::Skip)]
    #[case("auto-patch", MissingTaskMode::AutoPatch)]
    #[case("update-refs", MissingTaskMode::RefreshBundles)]
    #[case("BOTH", MissingTaskMode::Both)]
    fn mode_parsing(#[case] input: &str, #[case] expected: MissingTaskMode) {
        assert_eq!(input.parse::<MissingTaskMode>().unwrap(), expected);
    }

    #[test]
    fn mode_from_flags() {
        assert_eq!(MissingTaskMode::from_flags(true, true), MissingTaskMode::Both);
        assert!(MissingTaskMode::from_flags(true, false).patches());
        assert!(!MissingTaskMode::from_flags(true, false).refreshes());
        assert!("sometimes".parse::<MissingTaskMode>().is_err());
    }
}
