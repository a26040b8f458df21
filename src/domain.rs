use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// Namespace of administrative annotations written by the transfer packer.
pub const TRANSFER_NS: &str = "openmicroscopy.org/cli/transfer";
pub const FIGURE_NS: &str = "omero.web.figure.json";
pub const PATHVIEWER_SETTINGS_NS: &str = "openmicroscopy.org/cli/transfer/pathviewer-channel-settings";
pub const RENDERING_DEF_NS: &str = "openmicroscopy.org/cli/transfer/renderingdef";
pub const PATHVIEWER_CHANNEL_NS: &str = "glencoesoftware.com/pathviewer/channel/settings";

/// Identifier meaningful only inside one descriptor, e.g. `Image:12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolicId(String);

impl SymbolicId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the last `:`, empty when the id has no prefix.
    pub fn prefix(&self) -> &str {
        self.0.rsplit_once(':').map(|(prefix, _)| prefix).unwrap_or("")
    }

    pub fn numeric_suffix(&self) -> Option<i64> {
        self.0.rsplit(':').next()?.parse().ok()
    }

    /// Same prefix, index replaced by `0`.
    pub fn zeroed(&self) -> Self {
        match self.0.rsplit_once(':') {
            Some((prefix, _)) => Self(format!("{prefix}:0")),
            None => Self("0".to_string()),
        }
    }
}

impl fmt::Display for SymbolicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SymbolicId {
    type Err = TransferError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(TransferError::InvalidSymbolicId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Numeric identifier of an object inside the target store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TargetId(i64);

impl TargetId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&SymbolicId> for TargetId {
    type Error = TransferError;

    fn try_from(value: &SymbolicId) -> Result<Self, Self::Error> {
        value
            .numeric_suffix()
            .map(TargetId)
            .ok_or_else(|| TransferError::InvalidSymbolicId(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Project,
    Dataset,
    Screen,
    Plate,
    Well,
    Image,
    Roi,
    Annotation,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Project => "Project",
            ObjectKind::Dataset => "Dataset",
            ObjectKind::Screen => "Screen",
            ObjectKind::Plate => "Plate",
            ObjectKind::Well => "Well",
            ObjectKind::Image => "Image",
            ObjectKind::Roi => "ROI",
            ObjectKind::Annotation => "Annotation",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationKind {
    Tag,
    Map,
    Comment,
    Timestamp,
    Long,
    File,
    Xml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterializeMode {
    /// Always create new containers.
    #[default]
    Create,
    /// Reuse owned containers with the same name.
    Merge,
}

/// Transfer-metadata fields that may be surfaced as key/value pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    #[value(name = "md5")]
    Md5,
    #[value(name = "img_id")]
    ImgId,
    #[value(name = "plate_id")]
    PlateId,
    #[value(name = "timestamp")]
    Timestamp,
    #[value(name = "software")]
    Software,
    #[value(name = "version")]
    Version,
    #[value(name = "hostname")]
    Hostname,
    #[value(name = "orig_user")]
    OrigUser,
    #[value(name = "orig_group")]
    OrigGroup,
    #[value(name = "db_id")]
    DbId,
}

impl MetadataField {
    pub const ALL: [MetadataField; 10] = [
        MetadataField::Md5,
        MetadataField::ImgId,
        MetadataField::PlateId,
        MetadataField::Timestamp,
        MetadataField::Software,
        MetadataField::Version,
        MetadataField::Hostname,
        MetadataField::OrigUser,
        MetadataField::OrigGroup,
        MetadataField::DbId,
    ];

    /// Element name carrying this field inside a transfer-metadata payload.
    pub fn element_name(self) -> &'static str {
        match self {
            MetadataField::Md5 => "md5",
            MetadataField::ImgId => "origin_image_id",
            MetadataField::PlateId => "origin_plate_id",
            MetadataField::Timestamp => "packing_timestamp",
            MetadataField::Software => "software",
            MetadataField::Version => "version",
            MetadataField::Hostname => "origin_hostname",
            MetadataField::OrigUser => "original_user",
            MetadataField::OrigGroup => "original_group",
            MetadataField::DbId => "database_id",
        }
    }

    pub fn from_element_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.element_name() == name)
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetadataField::Md5 => "md5",
            MetadataField::ImgId => "img_id",
            MetadataField::PlateId => "plate_id",
            MetadataField::Timestamp => "timestamp",
            MetadataField::Software => "software",
            MetadataField::Version => "version",
            MetadataField::Hostname => "hostname",
            MetadataField::OrigUser => "orig_user",
            MetadataField::OrigGroup => "orig_group",
            MetadataField::DbId => "db_id",
        };
        write!(f, "{name}")
    }
}

impl FromStr for MetadataField {
    type Err = TransferError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|field| field.to_string() == normalized)
            .ok_or_else(|| TransferError::InvalidMetadataField(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn symbolic_id_suffix_and_zeroing() {
        let id: SymbolicId = "Annotation:42".parse().unwrap();
        assert_eq!(id.prefix(), "Annotation");
        assert_eq!(id.numeric_suffix(), Some(42));
        assert_eq!(id.zeroed().as_str(), "Annotation:0");
        assert_eq!(id.zeroed().zeroed(), id.zeroed());
    }

    #[test]
    fn symbolic_id_rejects_blank() {
        let err = "  ".parse::<SymbolicId>().unwrap_err();
        assert_matches!(err, TransferError::InvalidSymbolicId(_));
    }

    #[test]
    fn target_id_from_symbolic() {
        let id: SymbolicId = "ROI:501".parse().unwrap();
        assert_eq!(TargetId::try_from(&id).unwrap(), TargetId::new(501));

        let bad: SymbolicId = "ROI:abc".parse().unwrap();
        assert_matches!(
            TargetId::try_from(&bad),
            Err(TransferError::InvalidSymbolicId(_))
        );
    }

    #[test]
    fn metadata_field_names() {
        let field: MetadataField = "IMG_ID".parse().unwrap();
        assert_eq!(field, MetadataField::ImgId);
        assert_eq!(field.element_name(), "origin_image_id");
        assert_eq!(
            MetadataField::from_element_name("database_id"),
            Some(MetadataField::DbId)
        );
        assert_matches!(
            "checksum".parse::<MetadataField>(),
            Err(TransferError::InvalidMetadataField(_))
        );
    }
}
