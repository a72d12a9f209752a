//! Uploader configuration.
//!
//! Read from `<config dir>/chunkload/config.json`:
//! - Linux: `$XDG_CONFIG_HOME` or `~/.config`
//! - Windows: `%APPDATA%`

use std::path::{Path, PathBuf};

use chunkload_resume_store::StoreLimits;
use chunkload_transfer::UploadPolicy;
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// On-disk configuration. Every field is optional in the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkloadConfig {
    /// Chunking, retry and resume-store tuning.
    pub policy: UploadPolicy,

    /// Override for the resume store file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_store_path: Option<PathBuf>,
}

impl ChunkloadConfig {
    /// Loads from the default location.
    pub fn load() -> Result<Self, UploadError> {
        Self::load_from(&config_path())
    }

    /// Loads from `path`. A missing file yields defaults; an unparsable one
    /// is logged and also yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, UploadError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<ChunkloadConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Writes the configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), UploadError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Resume store location, defaulting to `<config dir>/chunkload/resume.json`.
    pub fn resume_store_path(&self) -> PathBuf {
        self.resume_store_path
            .clone()
            .unwrap_or_else(|| config_base_dir().join("chunkload").join("resume.json"))
    }

    /// Resume store eviction limits derived from the policy.
    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            capacity_bytes: self.policy.store_capacity_bytes,
            retention: self.policy.store_retention(),
        }
    }
}

/// Default config file path.
pub fn config_path() -> PathBuf {
    config_base_dir().join("chunkload").join("config.json")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
            && !xdg.is_empty()
        {
            return PathBuf::from(xdg);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}
