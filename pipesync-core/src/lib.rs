//! pipesync core library: pipeline document model, task views, config.
//!
//! - [`document`]: [`Document`] / [`Node`] tree built from parsed YAML
//! - [`path`]: structural [`Path`]s with keyed sequence addressing
//! - [`task`]: [`TaskSpec`] and [`TaskRef`] views over the task lists
//! - [`config`]: `pipesync.yaml` loading
//! - [`error`]: [`DocumentError`], [`ConfigError`]

pub mod config;
pub mod document;
pub mod error;
pub mod path;
pub mod task;

pub use config::{MappingConfig, MissingTaskMode, PolicyConfig, RetryConfig, SyncConfig};
pub use document::{Document, Mapping, Node, Scalar};
pub use error::{ConfigError, DocumentError};
pub use path::{Path, Segment};
pub use task::{task_specs, task_table, TaskList, TaskRef, TaskSpec};
