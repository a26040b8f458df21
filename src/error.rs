use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TransferError {
    #[error("invalid symbolic id: {0}")]
    InvalidSymbolicId(String),

    #[error("invalid transfer metadata field: {0}")]
    InvalidMetadataField(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to parse descriptor: {0}")]
    DescriptorParse(String),

    #[error("{kind} reference {id} does not resolve to a materialized object")]
    MissingReference { kind: String, id: String },

    #[error("unsupported shape kind in ROI {roi}")]
    UnsupportedShape { roi: String },

    #[error("unsupported annotation kind: {0}")]
    UnsupportedAnnotation(String),

    #[error("plate {0} does not have an XML annotation with a server file path")]
    AmbiguousPlateOrigin(String),

    #[error("file annotation {0} does not reference a server file path")]
    MissingServerPath(String),

    #[error("{id} already maps to {existing}, refusing to remap to {attempted}")]
    IdentityConflict {
        id: String,
        existing: i64,
        attempted: i64,
    },

    #[error("no well at row {row}, column {column} of plate {plate}")]
    MissingWell { plate: i64, row: u32, column: u32 },

    #[error("XML annotation value: {0}")]
    Xml(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("remote store request failed: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
