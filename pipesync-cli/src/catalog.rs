//! Trusted task catalog: a YAML map from pipeline task name to bundle.
//!
//! ```yaml
//! scan: quay.io/konflux-ci/tekton-catalog/task-sast-snyk-check:0.3@sha256:…
//! clone-repository:
//!   name: git-clone
//!   bundle: quay.io/konflux-ci/tekton-catalog/task-git-clone:0.1@sha256:…
//! ```
//!
//! The short form uses the pipeline task name as the task reference name.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use pipesync_core::task::TaskRef;
use pipesync_engine::CannedCapability;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogEntry {
    Bundle(String),
    Full { name: String, bundle: String },
}

pub fn parse(text: &str) -> Result<CannedCapability> {
    let entries: BTreeMap<String, CatalogEntry> =
        serde_yaml::from_str(text).context("catalog must map task names to bundles")?;
    Ok(entries
        .into_iter()
        .fold(CannedCapability::new(), |catalog, (task, entry)| {
            let task_ref = match entry {
                CatalogEntry::Bundle(bundle) => TaskRef::new(task.clone(), bundle),
                CatalogEntry::Full { name, bundle } => TaskRef::new(name, bundle),
            };
            catalog.with(task, task_ref)
        }))
}

pub fn load(path: &Path) -> Result<CannedCapability> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    let catalog =
        parse(&text).with_context(|| format!("failed to parse catalog {}", path.display()))?;
    tracing::debug!("loaded {} catalog entries from {}", catalog.len(), path.display());
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipesync_engine::PatchCapability;
    use std::time::Duration;

    #[test]
    fn both_entry_forms_resolve() {
        let catalog = parse(
            "scan: q/sast@sha256:1\nclone-repository:\n  name: git-clone\n  bundle: q/clone@sha256:2\n",
        )
        .unwrap();
        let t = Duration::from_secs(1);
        let scan = catalog.resolve("scan", t).unwrap().unwrap();
        assert_eq!(scan, TaskRef::new("scan", "q/sast@sha256:1"));
        let clone = catalog.resolve("clone-repository", t).unwrap().unwrap();
        assert_eq!(clone.name, "git-clone");
        assert_eq!(catalog.resolve("other", t), Ok(None));
    }

    #[test]
    fn non_mapping_catalog_is_rejected() {
        assert!(parse("- a\n- b\n").is_err());
    }
}
