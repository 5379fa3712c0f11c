//! Runtime configuration from the environment.
//!
//! Environment variables (a `.env` file is honoured by the binary):
//! - `GRIDIRON_DB_URL`, falling back to `DB_URL` (default: `sqlite://gridiron_dw.sqlite`,
//!   meant for local development only)
//! - `GRIDIRON_RAW_DIR` (default: `raw`)
//! - `GRIDIRON_TRANSFORMED_DIR` (default: `transformed`)

use std::path::PathBuf;

use crate::error::EtlError;
use crate::snapshot::SnapshotStore;
use crate::warehouse::WarehouseLocation;

pub const DEFAULT_DB_URL: &str = "sqlite://gridiron_dw.sqlite";
pub const DEFAULT_RAW_DIR: &str = "raw";
pub const DEFAULT_TRANSFORMED_DIR: &str = "transformed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlConfig {
    pub db_url: String,
    pub raw_dir: PathBuf,
    pub transformed_dir: PathBuf,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            db_url: DEFAULT_DB_URL.to_string(),
            raw_dir: PathBuf::from(DEFAULT_RAW_DIR),
            transformed_dir: PathBuf::from(DEFAULT_TRANSFORMED_DIR),
        }
    }
}

impl EtlConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            db_url: get("GRIDIRON_DB_URL")
                .or_else(|| get("DB_URL"))
                .unwrap_or(defaults.db_url),
            raw_dir: get("GRIDIRON_RAW_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.raw_dir),
            transformed_dir: get("GRIDIRON_TRANSFORMED_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.transformed_dir),
        }
    }

    pub fn snapshot_store(&self) -> SnapshotStore {
        SnapshotStore::new(self.raw_dir.clone(), self.transformed_dir.clone())
    }

    pub fn warehouse_location(&self) -> Result<WarehouseLocation, EtlError> {
        WarehouseLocation::parse(&self.db_url).map_err(|err| EtlError::Config(format!("{err:#}")))
    }
}
