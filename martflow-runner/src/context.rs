//! Run-scoped context threaded through every step.
//!
//! Values one step publishes for a later one live here instead of in any
//! global. The context can be saved to and loaded from a JSON file so that
//! steps invoked as separate processes can still hand values along.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("cannot access context file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("context file {path} is not valid JSON: {reason}")]
    Json { path: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Category published by `pick-random-category`.
    #[serde(default)]
    pub category: Option<String>,

    /// BLAKE3 of the source file as loaded into the raw store.
    #[serde(default)]
    pub source_hash: Option<String>,

    #[serde(default)]
    pub source_rows: Option<usize>,
}

impl RunContext {
    pub fn with_category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }

    /// Load a saved context. A missing file yields an empty context.
    pub fn load(path: &Path) -> Result<Self, ContextError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| ContextError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ContextError::Json {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Save atomically (write `.tmp`, then rename).
    pub fn save(&self, path: &Path) -> Result<(), ContextError> {
        let io_err = |e: std::io::Error| ContextError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| ContextError::Json {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, json).map_err(io_err)?;
        fs::rename(&tmp_path, path).map_err(io_err)
    }
}
