//! Metadata store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::codec::{EMPTY_CONFIGURATION_LENGTH, MAX_META_RECORD_LENGTH};
use crate::error::{MetaResult, MetaStoreError};
use crate::store::FRAME_HEADER_LENGTH;

/// Smallest meta slot the store accepts. Fits a frame holding a vote of
/// the longest encodable member id, so a vote can always be stored.
pub const MIN_META_SLOT_SIZE: u32 = (FRAME_HEADER_LENGTH + MAX_META_RECORD_LENGTH) as u32;

/// Smallest configuration slot the store accepts. Fits a frame holding a
/// configuration without members.
pub const MIN_CONFIGURATION_SLOT_SIZE: u32 =
    (FRAME_HEADER_LENGTH + EMPTY_CONFIGURATION_LENGTH) as u32;

/// Location and layout of a metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaStoreConfig {
    /// Directory that holds the metadata file. Created on open.
    pub directory: PathBuf,
    /// File stem; the store writes `<name>.meta`.
    pub name: String,
    /// Bytes reserved for each of the two meta record slots.
    pub meta_slot_size: u32,
    /// Bytes reserved for each of the two configuration slots.
    pub configuration_slot_size: u32,
}

impl MetaStoreConfig {
    /// Default layout in `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Sets the file stem.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Sets the configuration slot size.
    pub fn with_configuration_slot_size(mut self, size: u32) -> Self {
        self.configuration_slot_size = size;
        self
    }

    /// Parses and validates a JSON config. Missing fields take defaults.
    pub fn from_json(json: &str) -> MetaResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MetaStoreError::InvalidConfig {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the metadata file.
    pub fn file_path(&self) -> PathBuf {
        self.directory.join(format!("{}.meta", self.name))
    }

    /// Checks the config before any file is touched.
    pub fn validate(&self) -> MetaResult<()> {
        if self.name.is_empty() {
            return Err(MetaStoreError::InvalidConfig {
                reason: "store name cannot be empty".to_string(),
            });
        }

        if self.name.contains(std::path::MAIN_SEPARATOR) || self.name.contains('/') {
            return Err(MetaStoreError::InvalidConfig {
                reason: format!("store name '{}' must not contain a path separator", self.name),
            });
        }

        if self.directory == Path::new("") {
            return Err(MetaStoreError::InvalidConfig {
                reason: "store directory cannot be empty".to_string(),
            });
        }

        for (label, size, min) in [
            ("meta_slot_size", self.meta_slot_size, MIN_META_SLOT_SIZE),
            (
                "configuration_slot_size",
                self.configuration_slot_size,
                MIN_CONFIGURATION_SLOT_SIZE,
            ),
        ] {
            if size < min {
                return Err(MetaStoreError::InvalidConfig {
                    reason: format!("{label} {size} is below the minimum of {min}"),
                });
            }
        }

        Ok(())
    }
}

impl Default for MetaStoreConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            name: "raft".to_string(),
            meta_slot_size: 2048,
            configuration_slot_size: 64 * 1024,
        }
    }
}
