// src/services/flow_store.rs
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::parser::{FlowDocument, FlowParser};

/// Source of saved flows. The engine only ever needs to load one by id.
pub trait FlowStore: Send + Sync {
    /// `Ok(None)` when no flow has that id.
    fn load(&self, id: &str) -> Result<Option<FlowDocument>>;
}

/// Flows stored as `<root>/<id>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryFlowStore {
    root: PathBuf,
}

impl DirectoryFlowStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(anyhow!("Invalid flow id '{}'", id));
        }
        Ok(self.root.join(format!("{}.json", id)))
    }
}

impl FlowStore for DirectoryFlowStore {
    fn load(&self, id: &str) -> Result<Option<FlowDocument>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            debug!("Flow '{}' not found at {:?}", id, path);
            return Ok(None);
        }
        let mut doc = FlowParser::from_path(&path)?;
        if doc.id.is_none() {
            doc.id = Some(id.to_string());
        }
        Ok(Some(doc))
    }
}
