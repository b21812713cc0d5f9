//! `.runnable.yml` metadata found beside a runnable on disk.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::ConfigError;
use crate::fqfn::Fqfn;

/// File name of the metadata file looked up next to a runnable.
pub const RUNNABLE_FILE: &str = ".runnable.yml";

/// Metadata describing a function bundled as part of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunnableFile {
    pub name: String,
    pub namespace: String,
    pub lang: String,
    pub version: String,
    /// Fully-qualified name assigned by the application build.
    pub fqfn: String,
}

impl RunnableFile {
    /// Path of the metadata file for `runnable`.
    pub fn path_for(runnable: &str) -> PathBuf {
        Path::new(runnable)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(RUNNABLE_FILE)
    }

    /// Load the metadata beside `runnable`. A missing file is not an error.
    pub fn find(runnable: &str) -> Result<Option<Self>, ConfigError> {
        let path = Self::path_for(runnable);
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::RunnableRead {
            path: path.display().to_string(),
            source,
        })?;
        let file = serde_yaml::from_str(&raw).map_err(|source| ConfigError::RunnableParse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(file))
    }

    /// Rewrite the FQFN with a deployment identifier and version.
    pub fn override_fqfn(&mut self, identifier: &str, version: &str) {
        self.fqfn =
            Fqfn::from_parts(identifier, self.namespace.as_str(), self.name.as_str(), version)
                .to_string();
    }
}
