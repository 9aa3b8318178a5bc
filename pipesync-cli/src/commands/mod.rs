pub mod diff;
pub mod sync;
pub mod tasks;

use std::path::Path;

use anyhow::{anyhow, Result};

use pipesync_core::config::MappingConfig;
use pipesync_engine::{run_all, ReconcileOptions, ReconcileReport};

use crate::session::Session;

/// Reconciliation result for one configured mapping.
pub struct MappingRun {
    pub mapping: MappingConfig,
    pub result: Result<ReconcileReport>,
}

impl MappingRun {
    pub fn local_path(&self) -> &Path {
        &self.mapping.local
    }
}

/// Load and reconcile every mapping of `session`, in config order.
pub fn reconcile_mappings(session: &Session, options: &ReconcileOptions) -> Vec<MappingRun> {
    let loaded = session.load();
    let inputs: Vec<_> = loaded
        .iter()
        .filter_map(|l| l.input.as_ref().ok().cloned())
        .collect();
    let mut outcomes = run_all(&inputs, options, session.capabilities()).into_iter();

    loaded
        .into_iter()
        .map(|l| {
            let result = match l.input {
                Ok(_) => match outcomes.next() {
                    Some(outcome) => outcome.result.map_err(anyhow::Error::from),
                    None => Err(anyhow!("no reconciliation outcome")),
                },
                Err(err) => Err(err),
            };
            MappingRun {
                mapping: l.mapping,
                result,
            }
        })
        .collect()
}
