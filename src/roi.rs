use std::collections::{BTreeMap, BTreeSet};

use crate::descriptor::{Ome, Reference};
use crate::domain::{ObjectKind, SymbolicId, TargetId};
use crate::error::TransferError;
use crate::geometry::translate_shape;
use crate::identity::{IdentityMap, ImageMap};
use crate::link::resolve_annotation;
use crate::store::{NewRoi, RemoteStore};

/// Translates the unresolved ROIs of every imported image and saves them in
/// one batch. Returns the new ids keyed by descriptor ROI id.
pub fn create_rois<S: RemoteStore>(
    store: &S,
    ome: &Ome,
    identity: &IdentityMap,
    image_map: &ImageMap,
    consumed: &BTreeSet<SymbolicId>,
) -> Result<BTreeMap<SymbolicId, TargetId>, TransferError> {
    let mut pending: Vec<SymbolicId> = Vec::new();
    let mut batch: Vec<NewRoi> = Vec::new();

    for image in &ome.images {
        let Some(target_image) = image_map.get(&image.id) else {
            if !image.roi_refs.is_empty() {
                tracing::warn!(image = %image.id, "image not imported, skipping its ROIs");
            }
            continue;
        };
        for reference in &image.roi_refs {
            if identity.contains(&reference.id) || pending.contains(&reference.id) {
                continue;
            }
            let roi = ome
                .roi(&reference.id)
                .ok_or_else(|| TransferError::MissingReference {
                    kind: ObjectKind::Roi.to_string(),
                    id: reference.id.to_string(),
                })?;

            let mut shapes = Vec::with_capacity(roi.shapes.len());
            for shape in &roi.shapes {
                let mut target = translate_shape(shape, &roi.id)?;
                target.annotation_ids = annotation_ids(identity, consumed, &shape.annotation_refs)?;
                shapes.push(target);
            }
            batch.push(NewRoi {
                image: *target_image,
                name: roi.name.clone().filter(|name| !name.is_empty()),
                description: roi.description.clone().filter(|text| !text.is_empty()),
                shapes,
                annotation_ids: annotation_ids(identity, consumed, &roi.annotation_refs)?,
            });
            pending.push(roi.id.clone());
        }
    }

    if batch.is_empty() {
        return Ok(BTreeMap::new());
    }
    let ids = store.save_rois(&batch)?;
    if ids.len() != pending.len() {
        return Err(TransferError::Store(format!(
            "saved {} ROIs, store returned {} ids",
            pending.len(),
            ids.len()
        )));
    }
    Ok(pending.into_iter().zip(ids).collect())
}

fn annotation_ids(
    identity: &IdentityMap,
    consumed: &BTreeSet<SymbolicId>,
    refs: &[Reference],
) -> Result<Vec<TargetId>, TransferError> {
    let mut ids = Vec::with_capacity(refs.len());
    for reference in refs {
        if let Some(id) = resolve_annotation(identity, consumed, &reference.id)? {
            ids.push(id);
        }
    }
    Ok(ids)
}
