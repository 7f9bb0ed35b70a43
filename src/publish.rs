use crate::classify::{ClassifiedUnit, Classification};
use crate::error::{Result, SyncError};
use crate::path::normalize_vfs;
use serde::Serialize;
use std::collections::HashSet;

/// VFS paths to hand to the publish trigger, serialised as a JSON array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PublishList {
    paths: Vec<String>,
}

impl PublishList {
    /// Collect the VFS paths of both unit kinds, dropping duplicates
    pub fn from_units<'a>(units: impl IntoIterator<Item = &'a ClassifiedUnit>) -> Self {
        let mut seen = HashSet::new();
        let paths = units
            .into_iter()
            .map(|unit| unit.vfs_path().to_string())
            .filter(|path| seen.insert(normalize_vfs(path)))
            .collect();
        Self { paths }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SyncError::Protocol(format!("Failed to serialise publish list: {}", e)))
    }
}

impl From<&Classification> for PublishList {
    fn from(classification: &Classification) -> Self {
        Self::from_units(&classification.units)
    }
}
