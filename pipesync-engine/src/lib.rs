//! # pipesync-engine
//!
//! Reconciles a locally maintained pipeline document against its upstream
//! reference.
//!
//! Call [`reconcile`] for a single local/upstream pair, or [`run_all`] to
//! process several mappings in parallel. External lookups (resolving missing
//! tasks, refreshing bundle pins) are injected through [`Capabilities`].

pub mod capability;
pub mod diff;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod policy;
pub mod tasks;

pub use capability::{BundleRefresher, CannedCapability, PatchCapability, RetryPolicy};
pub use diff::{diff, ChangeKind, DiffRecord};
pub use error::{CapabilityError, ReconcileError};
pub use merge::{apply, MergeOutcome, StructuralConflict};
pub use pipeline::{
    reconcile, run_all, Capabilities, ChangeSummary, MappingInput, MappingOutcome,
    ReconcileOptions, ReconcileReport, RefreshedRef, Unresolved,
};
pub use policy::{PreservationPolicy, PreservationReason};
pub use tasks::{Insertion, MissingTask, TaskReconciliation};
