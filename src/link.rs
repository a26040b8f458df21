//! Restores structural and annotation links between materialized objects.
//!
//! Every link is checked against what the store already holds, so running
//! the linker again adds nothing.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::descriptor::{Ome, Reference};
use crate::domain::{ObjectKind, SymbolicId, TargetId};
use crate::error::TransferError;
use crate::identity::{IdentityMap, ImageMap};
use crate::store::RemoteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub plates: usize,
    pub datasets: usize,
    pub images: usize,
    pub annotations: usize,
}

/// Target id of an annotation reference. `None` for annotations that were
/// deliberately not materialized; anything else unresolved is an error.
pub fn resolve_annotation(
    identity: &IdentityMap,
    consumed: &BTreeSet<SymbolicId>,
    id: &SymbolicId,
) -> Result<Option<TargetId>, TransferError> {
    if let Some(target) = identity.get(id) {
        return Ok(Some(target));
    }
    if consumed.contains(id) {
        return Ok(None);
    }
    Err(TransferError::MissingReference {
        kind: ObjectKind::Annotation.to_string(),
        id: id.to_string(),
    })
}

pub struct GraphLinker<'a, S: RemoteStore> {
    store: &'a S,
    identity: &'a IdentityMap,
    image_map: &'a ImageMap,
    consumed: &'a BTreeSet<SymbolicId>,
}

impl<'a, S: RemoteStore> GraphLinker<'a, S> {
    pub fn new(
        store: &'a S,
        identity: &'a IdentityMap,
        image_map: &'a ImageMap,
        consumed: &'a BTreeSet<SymbolicId>,
    ) -> Self {
        Self {
            store,
            identity,
            image_map,
            consumed,
        }
    }

    pub fn link_all(&self, ome: &Ome) -> Result<LinkStats, TransferError> {
        Ok(LinkStats {
            plates: self.link_plates(ome)?,
            datasets: self.link_datasets(ome)?,
            images: self.link_images(ome)?,
            annotations: self.link_annotations(ome)?,
        })
    }

    /// Screen to Plate.
    pub fn link_plates(&self, ome: &Ome) -> Result<usize, TransferError> {
        let mut linked = 0;
        for screen in &ome.screens {
            let parent = self.require(ObjectKind::Screen, &screen.id)?;
            let children = screen
                .plate_refs
                .iter()
                .map(|reference| self.require(ObjectKind::Plate, &reference.id))
                .collect::<Result<Vec<_>, _>>()?;
            linked += self.link_missing_children(ObjectKind::Screen, parent, children)?;
        }
        Ok(linked)
    }

    /// Project to Dataset.
    pub fn link_datasets(&self, ome: &Ome) -> Result<usize, TransferError> {
        let mut linked = 0;
        for project in &ome.projects {
            let parent = self.require(ObjectKind::Project, &project.id)?;
            let children = project
                .dataset_refs
                .iter()
                .map(|reference| self.require(ObjectKind::Dataset, &reference.id))
                .collect::<Result<Vec<_>, _>>()?;
            linked += self.link_missing_children(ObjectKind::Project, parent, children)?;
        }
        Ok(linked)
    }

    /// Dataset to Image; images outside the image map are skipped.
    pub fn link_images(&self, ome: &Ome) -> Result<usize, TransferError> {
        let mut linked = 0;
        for dataset in &ome.datasets {
            let parent = self.require(ObjectKind::Dataset, &dataset.id)?;
            let children = dataset
                .image_refs
                .iter()
                .filter_map(|reference| self.image_map.get(&reference.id).copied())
                .collect();
            linked += self.link_missing_children(ObjectKind::Dataset, parent, children)?;
        }
        Ok(linked)
    }

    pub fn link_annotations(&self, ome: &Ome) -> Result<usize, TransferError> {
        let mut linked = 0;
        for project in &ome.projects {
            let id = self.require(ObjectKind::Project, &project.id)?;
            linked += self.link_refs(ObjectKind::Project, id, &project.annotation_refs)?;
        }
        for dataset in &ome.datasets {
            let id = self.require(ObjectKind::Dataset, &dataset.id)?;
            linked += self.link_refs(ObjectKind::Dataset, id, &dataset.annotation_refs)?;
        }
        for image in &ome.images {
            let Some(id) = self.image_map.get(&image.id) else {
                continue;
            };
            linked += self.link_refs(ObjectKind::Image, *id, &image.annotation_refs)?;
        }
        for screen in &ome.screens {
            let id = self.require(ObjectKind::Screen, &screen.id)?;
            linked += self.link_refs(ObjectKind::Screen, id, &screen.annotation_refs)?;
        }
        for plate in &ome.plates {
            let plate_id = self.require(ObjectKind::Plate, &plate.id)?;
            linked += self.link_refs(ObjectKind::Plate, plate_id, &plate.annotation_refs)?;
            for well in plate.wells.iter().filter(|well| !well.annotation_refs.is_empty()) {
                let well_id = self
                    .store
                    .find_well(plate_id, well.row, well.column)?
                    .ok_or(TransferError::MissingWell {
                        plate: plate_id.get(),
                        row: well.row,
                        column: well.column,
                    })?;
                linked += self.link_refs(ObjectKind::Well, well_id, &well.annotation_refs)?;
            }
        }
        Ok(linked)
    }

    fn require(&self, kind: ObjectKind, id: &SymbolicId) -> Result<TargetId, TransferError> {
        self.identity
            .get(id)
            .ok_or_else(|| TransferError::MissingReference {
                kind: kind.to_string(),
                id: id.to_string(),
            })
    }

    fn link_missing_children(
        &self,
        kind: ObjectKind,
        parent: TargetId,
        children: Vec<TargetId>,
    ) -> Result<usize, TransferError> {
        let mut present: BTreeSet<TargetId> = self
            .store
            .list_children(kind, parent)?
            .into_iter()
            .map(|child| child.id)
            .collect();
        let missing: Vec<TargetId> = children
            .into_iter()
            .filter(|child| present.insert(*child))
            .collect();
        if !missing.is_empty() {
            self.store.link_children(kind, parent, &missing)?;
        }
        Ok(missing.len())
    }

    fn link_refs(
        &self,
        kind: ObjectKind,
        object: TargetId,
        refs: &[Reference],
    ) -> Result<usize, TransferError> {
        if refs.is_empty() {
            return Ok(0);
        }
        let mut present: BTreeSet<TargetId> = self
            .store
            .annotations_of(kind, object)?
            .into_iter()
            .map(|summary| summary.id)
            .collect();
        let mut linked = 0;
        for reference in refs {
            let Some(annotation) = resolve_annotation(self.identity, self.consumed, &reference.id)?
            else {
                continue;
            };
            if present.insert(annotation) {
                self.store.link_annotation(kind, object, annotation)?;
                linked += 1;
            }
        }
        Ok(linked)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn consumed_annotations_resolve_to_nothing() {
        let mut identity = IdentityMap::new();
        let resolved: SymbolicId = "Annotation:1".parse().unwrap();
        let consumed_id: SymbolicId = "Annotation:2".parse().unwrap();
        let unknown: SymbolicId = "Annotation:3".parse().unwrap();
        identity.insert(resolved.clone(), TargetId::new(8)).unwrap();
        let consumed = BTreeSet::from([consumed_id.clone()]);

        assert_eq!(
            resolve_annotation(&identity, &consumed, &resolved).unwrap(),
            Some(TargetId::new(8))
        );
        assert_eq!(resolve_annotation(&identity, &consumed, &consumed_id).unwrap(), None);
        assert_matches!(
            resolve_annotation(&identity, &consumed, &unknown),
            Err(TransferError::MissingReference { id, .. }) if id == "Annotation:3"
        );
    }
}
