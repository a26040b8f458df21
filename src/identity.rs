//! Run-scoped identity bookkeeping and detection of objects the pixel import
//! already created.
//!
//! Detection compares canonical serializations: a node with its identifiers
//! zeroed and its annotation references dropped. This is a structural
//! heuristic. Two distinct but identical annotations collapse onto one target
//! object, which only suppresses a duplicate create. Objects an earlier run
//! materialized are found the same way, as the store describes them back.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::annotation::project_metadata;
use crate::config::ResolvedConfig;
use crate::descriptor::{Annotation, AnnotationBody, MapPair, Ome, Roi};
use crate::domain::{SymbolicId, TRANSFER_NS, TargetId};
use crate::error::TransferError;
use crate::geometry::normalize_unit;
use crate::store::RemoteStore;
use crate::xml;

/// Descriptor image id to the id the pixel import assigned.
pub type ImageMap = BTreeMap<SymbolicId, TargetId>;

/// Symbolic id to target id, write-once per key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IdentityMap {
    entries: BTreeMap<SymbolicId, TargetId>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SymbolicId) -> Option<TargetId> {
        self.entries.get(id).copied()
    }

    pub fn contains(&self, id: &SymbolicId) -> bool {
        self.entries.contains_key(id)
    }

    /// Records `id -> target`. Re-recording the same pair is a no-op; a
    /// different target for a known id is an `IdentityConflict`.
    pub fn insert(&mut self, id: SymbolicId, target: TargetId) -> Result<(), TransferError> {
        match self.entries.get(&id) {
            Some(existing) if *existing == target => Ok(()),
            Some(existing) => Err(TransferError::IdentityConflict {
                id: id.to_string(),
                existing: existing.get(),
                attempted: target.get(),
            }),
            None => {
                self.entries.insert(id, target);
                Ok(())
            }
        }
    }

    pub fn extend<I>(&mut self, entries: I) -> Result<(), TransferError>
    where
        I: IntoIterator<Item = (SymbolicId, TargetId)>,
    {
        for (id, target) in entries {
            self.insert(id, target)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SymbolicId, &TargetId)> {
        self.entries.iter()
    }
}

/// Zeroes ids, drops references and normalizes shape units and empty text
/// the way the store keeps them.
pub fn strip_roi(roi: &mut Roi) {
    roi.id = roi.id.zeroed();
    roi.annotation_refs.clear();
    for shape in &mut roi.shapes {
        shape.id = shape.id.zeroed();
        shape.annotation_refs.clear();
        shape.text = shape.text.take().filter(|text| !text.is_empty());
        for quantity in [&mut shape.font_size, &mut shape.stroke_width]
            .into_iter()
            .flatten()
        {
            quantity.unit = normalize_unit(&quantity.unit);
        }
    }
}

pub fn strip_annotation(annotation: &mut Annotation) {
    annotation.id = annotation.id.zeroed();
    annotation.annotation_refs.clear();
}

pub fn canonical_roi(roi: &Roi) -> Result<String, TransferError> {
    let mut roi = roi.clone();
    strip_roi(&mut roi);
    serde_json::to_string(&roi).map_err(|err| TransferError::Serialization(err.to_string()))
}

pub fn canonical_annotation(annotation: &Annotation) -> Result<String, TransferError> {
    let mut annotation = annotation.clone();
    strip_annotation(&mut annotation);
    if let AnnotationBody::Xml { value } = &mut annotation.body {
        if let Ok(content) = xml::value_content(value) {
            *value = xml::value_element(&content);
        }
    }
    serde_json::to_string(&annotation)
        .map_err(|err| TransferError::Serialization(err.to_string()))
}

/// The form `annotation` takes once materialized. Transfer metadata is stored
/// as its key/value projection; everything else is stored as is.
fn stored_form(annotation: &Annotation, config: &ResolvedConfig) -> Result<Annotation, TransferError> {
    let AnnotationBody::Xml { value } = &annotation.body else {
        return Ok(annotation.clone());
    };
    if !annotation.has_namespace(TRANSFER_NS) {
        return Ok(annotation.clone());
    }
    let Some(facts) = xml::transfer_metadata(value)? else {
        return Ok(annotation.clone());
    };
    let pairs = project_metadata(
        &facts,
        &config.metadata,
        config.checksum.as_deref().unwrap_or_default(),
    );
    Ok(Annotation {
        id: annotation.id.clone(),
        namespace: Some(TRANSFER_NS.to_string()),
        description: None,
        annotation_refs: Vec::new(),
        body: AnnotationBody::Map {
            pairs: pairs
                .into_iter()
                .map(|(key, value)| MapPair { key, value })
                .collect(),
        },
    })
}

/// ROIs and annotations of `descriptor` that already exist on the imported
/// images, keyed by their descriptor ids.
pub fn find_existing_objects<S: RemoteStore>(
    store: &S,
    descriptor: &Ome,
    image_map: &ImageMap,
    config: &ResolvedConfig,
) -> Result<IdentityMap, TransferError> {
    let mut imported: BTreeMap<String, TargetId> = BTreeMap::new();
    for image_id in image_map.values() {
        let synthetic = store.describe_image(*image_id)?;
        for roi in &synthetic.rois {
            imported.insert(canonical_roi(roi)?, TargetId::try_from(&roi.id)?);
        }
        for annotation in &synthetic.structured_annotations {
            imported.insert(
                canonical_annotation(annotation)?,
                TargetId::try_from(&annotation.id)?,
            );
        }
    }

    let mut found = IdentityMap::new();
    if imported.is_empty() {
        return Ok(found);
    }
    for roi in &descriptor.rois {
        if let Some(target) = imported.get(&canonical_roi(roi)?) {
            tracing::debug!(roi = %roi.id, target = %target, "ROI already imported");
            found.insert(roi.id.clone(), *target)?;
        }
    }
    for annotation in &descriptor.structured_annotations {
        let stored = stored_form(annotation, config)?;
        if let Some(target) = imported.get(&canonical_annotation(&stored)?) {
            tracing::debug!(annotation = %annotation.id, target = %target, "annotation already imported");
            found.insert(annotation.id.clone(), *target)?;
        }
    }
    Ok(found)
}
