//! Capabilities the reconciliation needs from the target repository.
//!
//! The connection behind an implementation is long-lived and owned by the
//! caller; nothing here retries.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::annotation::TargetAnnotation;
use crate::descriptor::Ome;
use crate::domain::{AnnotationKind, ObjectKind, TargetId};
use crate::error::TransferError;
use crate::geometry::TargetShape;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedObject {
    pub id: TargetId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSummary {
    pub id: TargetId,
    pub kind: AnnotationKind,
    pub namespace: Option<String>,
}

/// Well to create on `plate`, one sample per image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWell {
    pub plate: TargetId,
    pub row: u32,
    pub column: u32,
    pub images: Vec<TargetId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRoi {
    pub image: TargetId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub shapes: Vec<TargetShape>,
    pub annotation_ids: Vec<TargetId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderingModel {
    Rgb,
    Greyscale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRendering {
    pub start: f64,
    pub end: f64,
    pub color: String,
    pub label: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderingSettings {
    pub channels: Vec<ChannelRendering>,
    /// `None` leaves the image's model unchanged.
    pub model: Option<RenderingModel>,
    pub default_z: u32,
    pub default_t: u32,
}

pub trait RemoteStore: Send + Sync {
    /// Creates a Project, Dataset, Screen or Plate owned by the caller.
    fn create_container(
        &self,
        kind: ObjectKind,
        name: &str,
        description: Option<&str>,
    ) -> Result<TargetId, TransferError>;

    /// Containers of `kind` owned by the caller, optionally only those without
    /// a parent.
    fn list_owned(&self, kind: ObjectKind, orphaned_only: bool)
    -> Result<Vec<NamedObject>, TransferError>;

    fn list_children(&self, kind: ObjectKind, parent: TargetId)
    -> Result<Vec<NamedObject>, TransferError>;

    fn link_children(
        &self,
        kind: ObjectKind,
        parent: TargetId,
        children: &[TargetId],
    ) -> Result<(), TransferError>;

    /// Plates with an image whose used file's client path matches a LIKE
    /// `pattern` (`%` is the wildcard).
    fn find_plates_by_client_path(&self, pattern: &str) -> Result<Vec<TargetId>, TransferError>;

    fn annotations_of(
        &self,
        kind: ObjectKind,
        id: TargetId,
    ) -> Result<Vec<AnnotationSummary>, TransferError>;

    fn create_annotation(&self, annotation: &TargetAnnotation) -> Result<TargetId, TransferError>;

    fn link_annotation(
        &self,
        kind: ObjectKind,
        id: TargetId,
        annotation: TargetId,
    ) -> Result<(), TransferError>;

    fn image_exists(&self, id: TargetId) -> Result<bool, TransferError>;

    /// Fails when the position is already occupied.
    fn save_well(&self, well: &NewWell) -> Result<TargetId, TransferError>;

    fn find_well(
        &self,
        plate: TargetId,
        row: u32,
        column: u32,
    ) -> Result<Option<TargetId>, TransferError>;

    /// Uploads a local file, returning the stored file's id.
    fn upload_file(&self, path: &Utf8Path) -> Result<TargetId, TransferError>;

    /// Saves all ROIs in one call; ids come back in input order.
    fn save_rois(&self, rois: &[NewRoi]) -> Result<Vec<TargetId>, TransferError>;

    /// Metadata the store holds for an image, as a descriptor whose ids carry
    /// target ids as their numeric suffix.
    fn describe_image(&self, id: TargetId) -> Result<Ome, TransferError>;

    fn rename(&self, kind: ObjectKind, id: TargetId, name: &str) -> Result<(), TransferError>;

    fn channel_count(&self, image: TargetId) -> Result<usize, TransferError>;

    fn apply_rendering(
        &self,
        image: TargetId,
        settings: &RenderingSettings,
    ) -> Result<(), TransferError>;

    fn link_channel_annotation(
        &self,
        image: TargetId,
        channel: usize,
        annotation: TargetId,
    ) -> Result<(), TransferError>;
}
