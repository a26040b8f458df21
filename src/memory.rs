//! In-process implementation of [`RemoteStore`].
//!
//! Backs dry runs of the CLI against a JSON snapshot and the tests. Links are
//! recorded as requested, duplicates included. `describe_image` reports the
//! ROIs and annotations saved on an image as well as what the import attached.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::annotation::{TargetAnnotation, TargetAnnotationValue};
use crate::descriptor::{Annotation, AnnotationBody, MapPair, Ome, Reference, Roi};
use crate::domain::{ObjectKind, SymbolicId, TargetId};
use crate::error::TransferError;
use crate::fs_util;
use crate::geometry;
use crate::xml;
use crate::store::{
    AnnotationSummary, NamedObject, NewRoi, NewWell, RemoteStore, RenderingSettings,
};

const DEFAULT_OWNER: &str = "root";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: TargetId,
    pub kind: ObjectKind,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: TargetId,
    pub name: String,
    #[serde(default)]
    pub client_paths: Vec<String>,
    pub channels: usize,
    /// Metadata the pixel import attached, as `describe_image` reports it.
    #[serde(default)]
    pub metadata: Ome,
    #[serde(default)]
    pub rendering: Option<RenderingSettings>,
    #[serde(default)]
    pub channel_annotations: Vec<(usize, TargetId)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildLink {
    pub kind: ObjectKind,
    pub parent: TargetId,
    pub child: TargetId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationLink {
    pub kind: ObjectKind,
    pub object: TargetId,
    pub annotation: TargetId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellRecord {
    pub id: TargetId,
    pub plate: TargetId,
    pub row: u32,
    pub column: u32,
    pub images: Vec<TargetId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub id: TargetId,
    pub annotation: TargetAnnotation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: TargetId,
    pub path: Utf8PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiRecord {
    pub id: TargetId,
    pub roi: NewRoi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub owner: String,
    pub next_id: i64,
    #[serde(default)]
    pub containers: Vec<ContainerRecord>,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
    #[serde(default)]
    pub links: Vec<ChildLink>,
    #[serde(default)]
    pub wells: Vec<WellRecord>,
    #[serde(default)]
    pub annotations: Vec<AnnotationRecord>,
    #[serde(default)]
    pub annotation_links: Vec<AnnotationLink>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub rois: Vec<RoiRecord>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            owner: DEFAULT_OWNER.to_string(),
            next_id: 1,
            containers: Vec::new(),
            images: Vec::new(),
            links: Vec::new(),
            wells: Vec::new(),
            annotations: Vec::new(),
            annotation_links: Vec::new(),
            files: Vec::new(),
            rois: Vec::new(),
        }
    }
}

impl StoreState {
    fn allocate(&mut self) -> TargetId {
        let id = TargetId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn container(&self, kind: ObjectKind, id: TargetId) -> Option<&ContainerRecord> {
        self.containers
            .iter()
            .find(|record| record.kind == kind && record.id == id)
    }

    fn image(&self, id: TargetId) -> Result<&ImageRecord, TransferError> {
        self.images
            .iter()
            .find(|image| image.id == id)
            .ok_or_else(|| TransferError::Store(format!("Image {id} not found")))
    }

    fn image_mut(&mut self, id: TargetId) -> Result<&mut ImageRecord, TransferError> {
        self.images
            .iter_mut()
            .find(|image| image.id == id)
            .ok_or_else(|| TransferError::Store(format!("Image {id} not found")))
    }

    fn object_exists(&self, kind: ObjectKind, id: TargetId) -> bool {
        match kind {
            ObjectKind::Image => self.images.iter().any(|image| image.id == id),
            ObjectKind::Well => self.wells.iter().any(|well| well.id == id),
            ObjectKind::Roi => self.rois.iter().any(|roi| roi.id == id),
            ObjectKind::Annotation => self.annotations.iter().any(|ann| ann.id == id),
            _ => self.container(kind, id).is_some(),
        }
    }

    fn has_parent(&self, kind: ObjectKind, id: TargetId) -> bool {
        let Some(parent_kind) = parent_kind(kind) else {
            return false;
        };
        self.links
            .iter()
            .any(|link| link.kind == parent_kind && link.child == id)
    }

    fn roi_descriptor(&self, record: &RoiRecord) -> Result<Roi, TransferError> {
        let shapes = record
            .roi
            .shapes
            .iter()
            .enumerate()
            .map(|(index, shape)| {
                Ok(geometry::shape_from_target(
                    symbolic("Shape", index)?,
                    shape,
                ))
            })
            .collect::<Result<Vec<_>, TransferError>>()?;
        let annotation_refs = record
            .roi
            .annotation_ids
            .iter()
            .map(|id| Ok(Reference::new(symbolic("Annotation", id)?)))
            .collect::<Result<Vec<_>, TransferError>>()?;
        Ok(Roi {
            id: symbolic("ROI", record.id)?,
            name: record.roi.name.clone(),
            description: record.roi.description.clone(),
            shapes,
            annotation_refs,
        })
    }

    fn annotation_descriptor(&self, record: &AnnotationRecord) -> Result<Annotation, TransferError> {
        let body = match &record.annotation.value {
            TargetAnnotationValue::Tag(value) => AnnotationBody::Tag {
                value: value.clone(),
            },
            TargetAnnotationValue::Map(pairs) => AnnotationBody::Map {
                pairs: pairs
                    .iter()
                    .map(|(key, value)| MapPair {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            },
            TargetAnnotationValue::Comment(value) => AnnotationBody::Comment {
                value: value.clone(),
            },
            TargetAnnotationValue::Timestamp(value) => AnnotationBody::Timestamp { value: *value },
            TargetAnnotationValue::Long(value) => AnnotationBody::Long { value: *value },
            TargetAnnotationValue::File(file) => {
                let record = self
                    .files
                    .iter()
                    .find(|record| record.id == *file)
                    .ok_or_else(|| TransferError::Store(format!("file {file} not found")))?;
                AnnotationBody::File {
                    file_name: record.path.file_name().map(str::to_string),
                    size: Some(record.size),
                }
            }
            TargetAnnotationValue::Xml(content) => AnnotationBody::Xml {
                value: xml::value_element(content),
            },
        };
        Ok(Annotation {
            id: symbolic("Annotation", record.id)?,
            namespace: record.annotation.namespace.clone(),
            description: record.annotation.description.clone(),
            annotation_refs: Vec::new(),
            body,
        })
    }

    fn plates_of_image(&self, image: TargetId) -> impl Iterator<Item = TargetId> + '_ {
        self.wells
            .iter()
            .filter(move |well| well.images.contains(&image))
            .map(|well| well.plate)
    }
}

fn symbolic(prefix: &str, id: impl std::fmt::Display) -> Result<SymbolicId, TransferError> {
    format!("{prefix}:{id}").parse()
}

fn parent_kind(kind: ObjectKind) -> Option<ObjectKind> {
    match kind {
        ObjectKind::Dataset => Some(ObjectKind::Project),
        ObjectKind::Plate => Some(ObjectKind::Screen),
        ObjectKind::Image => Some(ObjectKind::Dataset),
        _ => None,
    }
}

fn child_kind(kind: ObjectKind) -> Result<ObjectKind, TransferError> {
    match kind {
        ObjectKind::Project => Ok(ObjectKind::Dataset),
        ObjectKind::Screen => Ok(ObjectKind::Plate),
        ObjectKind::Dataset => Ok(ObjectKind::Image),
        other => Err(TransferError::Store(format!("{other} has no children"))),
    }
}

/// Compiles a SQL `LIKE` pattern: `%` matches any run, `_` one character.
pub fn like_matcher(pattern: &str) -> Result<Regex, TransferError> {
    let mut expr = String::from("^");
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '%' | '_' => {
                expr.push_str(&regex::escape(&literal));
                literal.clear();
                expr.push_str(if ch == '%' { ".*" } else { "." });
            }
            other => literal.push(other),
        }
    }
    expr.push_str(&regex::escape(&literal));
    expr.push('$');
    Regex::new(&expr).map_err(|err| TransferError::Store(format!("bad pattern {pattern}: {err}")))
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let content = fs::read_to_string(path)
            .map_err(|err| TransferError::Filesystem(format!("read {}: {err}", path.display())))?;
        let state: StoreState = serde_json::from_str(&content)
            .map_err(|err| TransferError::Serialization(err.to_string()))?;
        Ok(Self::from_state(state))
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), TransferError> {
        let state = self.snapshot()?;
        let json = serde_json::to_vec_pretty(&state)
            .map_err(|err| TransferError::Serialization(err.to_string()))?;
        fs_util::write_atomic(path, &json)
    }

    pub fn snapshot(&self) -> Result<StoreState, TransferError> {
        Ok(self.lock()?.clone())
    }

    /// Registers an image as the pixel import would leave it.
    pub fn add_image(
        &self,
        name: &str,
        client_paths: &[&str],
        channels: usize,
    ) -> Result<TargetId, TransferError> {
        let mut state = self.lock()?;
        let id = state.allocate();
        state.images.push(ImageRecord {
            id,
            name: name.to_string(),
            client_paths: client_paths.iter().map(|path| path.to_string()).collect(),
            channels,
            metadata: Ome::default(),
            rendering: None,
            channel_annotations: Vec::new(),
        });
        Ok(id)
    }

    pub fn set_image_metadata(&self, image: TargetId, metadata: Ome) -> Result<(), TransferError> {
        let mut state = self.lock()?;
        state.image_mut(image)?.metadata = metadata;
        Ok(())
    }

    /// Adds a container owned by `owner`, which need not be the caller.
    pub fn add_container(
        &self,
        kind: ObjectKind,
        name: &str,
        owner: &str,
    ) -> Result<TargetId, TransferError> {
        let mut state = self.lock()?;
        let id = state.allocate();
        state.containers.push(ContainerRecord {
            id,
            kind,
            name: name.to_string(),
            description: None,
            owner: owner.to_string(),
        });
        Ok(id)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, TransferError> {
        self.state
            .lock()
            .map_err(|_| TransferError::Store("store state lock poisoned".to_string()))
    }
}

impl RemoteStore for MemoryStore {
    fn create_container(
        &self,
        kind: ObjectKind,
        name: &str,
        description: Option<&str>,
    ) -> Result<TargetId, TransferError> {
        if !matches!(
            kind,
            ObjectKind::Project | ObjectKind::Dataset | ObjectKind::Screen | ObjectKind::Plate
        ) {
            return Err(TransferError::Store(format!("{kind} is not a container")));
        }
        let mut state = self.lock()?;
        let id = state.allocate();
        let owner = state.owner.clone();
        state.containers.push(ContainerRecord {
            id,
            kind,
            name: name.to_string(),
            description: description.map(str::to_string),
            owner,
        });
        Ok(id)
    }

    fn list_owned(
        &self,
        kind: ObjectKind,
        orphaned_only: bool,
    ) -> Result<Vec<NamedObject>, TransferError> {
        let state = self.lock()?;
        Ok(state
            .containers
            .iter()
            .filter(|record| record.kind == kind && record.owner == state.owner)
            .filter(|record| !orphaned_only || !state.has_parent(kind, record.id))
            .map(|record| NamedObject {
                id: record.id,
                name: record.name.clone(),
            })
            .collect())
    }

    fn list_children(
        &self,
        kind: ObjectKind,
        parent: TargetId,
    ) -> Result<Vec<NamedObject>, TransferError> {
        let child = child_kind(kind)?;
        let state = self.lock()?;
        if state.container(kind, parent).is_none() {
            return Err(TransferError::Store(format!("{kind} {parent} not found")));
        }
        let mut children = Vec::new();
        for link in state
            .links
            .iter()
            .filter(|link| link.kind == kind && link.parent == parent)
        {
            let name = match child {
                ObjectKind::Image => state.image(link.child)?.name.clone(),
                _ => match state.container(child, link.child) {
                    Some(record) => record.name.clone(),
                    None => continue,
                },
            };
            children.push(NamedObject {
                id: link.child,
                name,
            });
        }
        Ok(children)
    }

    fn link_children(
        &self,
        kind: ObjectKind,
        parent: TargetId,
        children: &[TargetId],
    ) -> Result<(), TransferError> {
        let child = child_kind(kind)?;
        let mut state = self.lock()?;
        if state.container(kind, parent).is_none() {
            return Err(TransferError::Store(format!("{kind} {parent} not found")));
        }
        for id in children {
            if !state.object_exists(child, *id) {
                return Err(TransferError::Store(format!("{child} {id} not found")));
            }
            state.links.push(ChildLink {
                kind,
                parent,
                child: *id,
            });
        }
        Ok(())
    }

    fn find_plates_by_client_path(&self, pattern: &str) -> Result<Vec<TargetId>, TransferError> {
        let matcher = like_matcher(pattern)?;
        let state = self.lock()?;
        let mut plates: Vec<TargetId> = state
            .images
            .iter()
            .filter(|image| image.client_paths.iter().any(|path| matcher.is_match(path)))
            .flat_map(|image| state.plates_of_image(image.id))
            .collect();
        plates.sort();
        plates.dedup();
        Ok(plates)
    }

    fn annotations_of(
        &self,
        kind: ObjectKind,
        id: TargetId,
    ) -> Result<Vec<AnnotationSummary>, TransferError> {
        let state = self.lock()?;
        Ok(state
            .annotation_links
            .iter()
            .filter(|link| link.kind == kind && link.object == id)
            .filter_map(|link| {
                state
                    .annotations
                    .iter()
                    .find(|record| record.id == link.annotation)
            })
            .map(|record| AnnotationSummary {
                id: record.id,
                kind: record.annotation.kind(),
                namespace: record.annotation.namespace.clone(),
            })
            .collect())
    }

    fn create_annotation(&self, annotation: &TargetAnnotation) -> Result<TargetId, TransferError> {
        let mut state = self.lock()?;
        let id = state.allocate();
        state.annotations.push(AnnotationRecord {
            id,
            annotation: annotation.clone(),
        });
        Ok(id)
    }

    fn link_annotation(
        &self,
        kind: ObjectKind,
        id: TargetId,
        annotation: TargetId,
    ) -> Result<(), TransferError> {
        let mut state = self.lock()?;
        if !state.object_exists(kind, id) {
            return Err(TransferError::Store(format!("{kind} {id} not found")));
        }
        if !state.object_exists(ObjectKind::Annotation, annotation) {
            return Err(TransferError::Store(format!("Annotation {annotation} not found")));
        }
        state.annotation_links.push(AnnotationLink {
            kind,
            object: id,
            annotation,
        });
        Ok(())
    }

    fn image_exists(&self, id: TargetId) -> Result<bool, TransferError> {
        Ok(self.lock()?.object_exists(ObjectKind::Image, id))
    }

    fn save_well(&self, well: &NewWell) -> Result<TargetId, TransferError> {
        let mut state = self.lock()?;
        if state.container(ObjectKind::Plate, well.plate).is_none() {
            return Err(TransferError::Store(format!("Plate {} not found", well.plate)));
        }
        let occupied = state.wells.iter().any(|existing| {
            existing.plate == well.plate && existing.row == well.row && existing.column == well.column
        });
        if occupied {
            return Err(TransferError::Store(format!(
                "well at row {}, column {} of plate {} already exists",
                well.row, well.column, well.plate
            )));
        }
        for image in &well.images {
            state.image(*image)?;
        }
        let id = state.allocate();
        state.wells.push(WellRecord {
            id,
            plate: well.plate,
            row: well.row,
            column: well.column,
            images: well.images.clone(),
        });
        Ok(id)
    }

    fn find_well(
        &self,
        plate: TargetId,
        row: u32,
        column: u32,
    ) -> Result<Option<TargetId>, TransferError> {
        let state = self.lock()?;
        Ok(state
            .wells
            .iter()
            .find(|well| well.plate == plate && well.row == row && well.column == column)
            .map(|well| well.id))
    }

    fn upload_file(&self, path: &Utf8Path) -> Result<TargetId, TransferError> {
        let size = fs::metadata(path.as_std_path())
            .map_err(|err| TransferError::Filesystem(format!("stat {path}: {err}")))?
            .len();
        let mut state = self.lock()?;
        let id = state.allocate();
        state.files.push(FileRecord {
            id,
            path: path.to_path_buf(),
            size,
        });
        Ok(id)
    }

    fn save_rois(&self, rois: &[NewRoi]) -> Result<Vec<TargetId>, TransferError> {
        let mut state = self.lock()?;
        for roi in rois {
            state.image(roi.image)?;
        }
        let mut ids = Vec::with_capacity(rois.len());
        for roi in rois {
            let id = state.allocate();
            state.rois.push(RoiRecord {
                id,
                roi: roi.clone(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    fn describe_image(&self, id: TargetId) -> Result<Ome, TransferError> {
        let state = self.lock()?;
        let mut ome = state.image(id)?.metadata.clone();
        let mut annotation_ids: Vec<TargetId> = state
            .annotation_links
            .iter()
            .filter(|link| link.kind == ObjectKind::Image && link.object == id)
            .map(|link| link.annotation)
            .collect();
        for record in state.rois.iter().filter(|record| record.roi.image == id) {
            ome.rois.push(state.roi_descriptor(record)?);
            annotation_ids.extend(&record.roi.annotation_ids);
            for shape in &record.roi.shapes {
                annotation_ids.extend(&shape.annotation_ids);
            }
        }
        annotation_ids.sort();
        annotation_ids.dedup();
        for annotation in annotation_ids {
            if let Some(record) = state.annotations.iter().find(|record| record.id == annotation) {
                ome.structured_annotations
                    .push(state.annotation_descriptor(record)?);
            }
        }
        Ok(ome)
    }

    fn rename(&self, kind: ObjectKind, id: TargetId, name: &str) -> Result<(), TransferError> {
        let mut state = self.lock()?;
        if kind == ObjectKind::Image {
            state.image_mut(id)?.name = name.to_string();
            return Ok(());
        }
        let record = state
            .containers
            .iter_mut()
            .find(|record| record.kind == kind && record.id == id)
            .ok_or_else(|| TransferError::Store(format!("{kind} {id} not found")))?;
        record.name = name.to_string();
        Ok(())
    }

    fn channel_count(&self, image: TargetId) -> Result<usize, TransferError> {
        Ok(self.lock()?.image(image)?.channels)
    }

    fn apply_rendering(
        &self,
        image: TargetId,
        settings: &RenderingSettings,
    ) -> Result<(), TransferError> {
        let mut state = self.lock()?;
        let record = state.image_mut(image)?;
        if settings.channels.len() != record.channels {
            return Err(TransferError::Store(format!(
                "image {image} has {} channels, settings have {}",
                record.channels,
                settings.channels.len()
            )));
        }
        let model = match (&record.rendering, settings.model) {
            (_, Some(model)) => Some(model),
            (Some(previous), None) => previous.model,
            (None, None) => None,
        };
        record.rendering = Some(RenderingSettings {
            model,
            ..settings.clone()
        });
        Ok(())
    }

    fn link_channel_annotation(
        &self,
        image: TargetId,
        channel: usize,
        annotation: TargetId,
    ) -> Result<(), TransferError> {
        let mut state = self.lock()?;
        if !state.object_exists(ObjectKind::Annotation, annotation) {
            return Err(TransferError::Store(format!("Annotation {annotation} not found")));
        }
        let record = state.image_mut(image)?;
        if channel >= record.channels {
            return Err(TransferError::Store(format!(
                "image {image} has no channel {channel}"
            )));
        }
        record.channel_annotations.push((channel, annotation));
        Ok(())
    }
}
