use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{MaterializeMode, MetadataField};
use crate::error::TransferError;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub merge: Option<bool>,
    #[serde(default)]
    pub figure: Option<bool>,
    #[serde(default)]
    pub metadata: Option<Vec<String>>,
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub mode: MaterializeMode,
    pub figure: bool,
    pub metadata: Vec<MetadataField>,
    /// Root the server-relative payload paths are resolved against.
    pub folder: Utf8PathBuf,
    pub checksum: Option<String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            mode: MaterializeMode::Create,
            figure: false,
            metadata: default_metadata(),
            folder: Utf8PathBuf::from("."),
            checksum: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `omero-transfer.json` when present. Without either,
    /// the defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TransferError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("omero-transfer.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TransferError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| TransferError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TransferError> {
        let metadata = match config.metadata {
            Some(names) => names
                .iter()
                .map(|name| name.parse())
                .collect::<Result<Vec<MetadataField>, TransferError>>()?,
            None => default_metadata(),
        };
        let mode = if config.merge.unwrap_or(false) {
            MaterializeMode::Merge
        } else {
            MaterializeMode::Create
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            mode,
            figure: config.figure.unwrap_or(false),
            metadata,
            folder: config
                .folder
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from(".")),
            checksum: None,
        })
    }
}

pub fn default_metadata() -> Vec<MetadataField> {
    MetadataField::ALL.to_vec()
}
