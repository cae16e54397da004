//! Export configuration
//!
//! Layered the usual way: defaults, then an optional TOML file, then
//! `LMPACK_*` environment variables. Command-line flags override all three.

use serde::{Deserialize, Serialize};
use std::path::Path;

use lmpack_format::DEFAULT_GROUP_SIZE;
use lmpack_model::TensorNaming;

use crate::error::{ExportError, Result};
use crate::export::ExportOptions;

/// Export configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Container format version (1 = float32, 2 = Q8_0)
    pub version: i32,
    /// Preferred Q8_0 group size
    pub group_size: usize,
    /// Checkpoint tensor naming ("meta" or "hf")
    pub naming: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            version: 1,
            group_size: DEFAULT_GROUP_SIZE,
            naming: "meta".to_string(),
        }
    }
}

impl ExportConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Overlay `LMPACK_*` environment variables
    pub fn with_env(mut self) -> Self {
        if let Ok(version) = std::env::var("LMPACK_VERSION") {
            if let Ok(v) = version.parse() {
                self.version = v;
            }
        }
        if let Ok(group_size) = std::env::var("LMPACK_GROUP_SIZE") {
            if let Ok(g) = group_size.parse() {
                self.group_size = g;
            }
        }
        if let Ok(naming) = std::env::var("LMPACK_NAMING") {
            self.naming = naming;
        }
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ExportError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ExportError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parsed tensor naming scheme
    pub fn naming(&self) -> Result<TensorNaming> {
        Ok(self.naming.parse()?)
    }

    /// Options for the orchestrator
    pub fn options(&self) -> ExportOptions {
        ExportOptions {
            version: self.version,
            group_size: self.group_size,
        }
    }
}
