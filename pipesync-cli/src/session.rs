//! Everything a command needs before reconciling: config, capabilities,
//! and the loaded document pairs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use pipesync_core::config::{self, MappingConfig, SyncConfig};
use pipesync_engine::{
    BundleRefresher, CannedCapability, Capabilities, MappingInput, PatchCapability,
};

use crate::{catalog, command_capability::CommandCapability, source};

/// One configured mapping and its documents, or why they could not be loaded.
#[derive(Debug)]
pub struct LoadedMapping {
    pub mapping: MappingConfig,
    pub input: Result<MappingInput>,
}

pub struct Session {
    pub config: SyncConfig,
    base: PathBuf,
    catalog: Option<CannedCapability>,
    command: Option<CommandCapability>,
}

impl Session {
    /// Load `config_path`, optionally narrowed to the mapping named `only`.
    pub fn open(config_path: &Path, only: Option<&str>) -> Result<Self> {
        let mut config = config::load_at(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;

        if let Some(name) = only {
            let Some(mapping) = config.select(name) else {
                let known: Vec<String> = config.mappings.iter().map(|m| m.display_name()).collect();
                bail!("no mapping named '{name}' (known: {})", known.join(", "));
            };
            config.mappings = vec![mapping];
        }

        let catalog = match &config.catalog {
            Some(path) => Some(catalog::load(path)?),
            None => None,
        };
        let command = config.patcher.clone().map(CommandCapability::new);
        let base = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(Self {
            config,
            base,
            catalog,
            command,
        })
    }

    /// The patcher command wins over the catalog when both are configured.
    pub fn capabilities(&self) -> Capabilities<'_> {
        let patch: Option<&dyn PatchCapability> = match (&self.command, &self.catalog) {
            (Some(command), _) => Some(command as &dyn PatchCapability),
            (None, Some(catalog)) => Some(catalog as &dyn PatchCapability),
            (None, None) => None,
        };
        let refresh: Option<&dyn BundleRefresher> = match (&self.command, &self.catalog) {
            (Some(command), _) => Some(command as &dyn BundleRefresher),
            (None, Some(catalog)) => Some(catalog as &dyn BundleRefresher),
            (None, None) => None,
        };
        Capabilities { patch, refresh }
    }

    pub fn load(&self) -> Vec<LoadedMapping> {
        self.config
            .mappings
            .iter()
            .map(|mapping| LoadedMapping {
                mapping: mapping.clone(),
                input: self.load_one(mapping),
            })
            .collect()
    }

    fn load_one(&self, mapping: &MappingConfig) -> Result<MappingInput> {
        let local = source::load_local(&mapping.local)?;
        let upstream = source::load_upstream(&mapping.upstream, &self.base)?;
        Ok(MappingInput {
            name: mapping.display_name(),
            local,
            upstream,
        })
    }
}
