//! Creation or reuse of containers, and reconstruction of plates the pixel
//! import produced as loose images.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::descriptor::{Dataset, Ome, Plate, Project, Screen};
use crate::domain::{AnnotationKind, MaterializeMode, ObjectKind, SymbolicId, TRANSFER_NS, TargetId};
use crate::error::TransferError;
use crate::identity::{IdentityMap, ImageMap};
use crate::provenance;
use crate::store::{NewWell, RemoteStore};

/// Suffix the packer appends to paths of mocked imports.
const MOCK_FOLDER: &str = "mock_folder";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerStats {
    pub created: usize,
    pub reused: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Materialized {
    pub ids: BTreeMap<SymbolicId, TargetId>,
    pub stats: ContainerStats,
}

impl Materialized {
    fn record(&mut self, id: SymbolicId, target: TargetId, reused: bool) {
        if reused {
            self.stats.reused += 1;
        } else {
            self.stats.created += 1;
        }
        self.ids.insert(id, target);
    }
}

/// Projects, Datasets and Screens under one [`MaterializeMode`].
///
/// In merge mode name matching is owner-scoped, case-sensitive and takes the
/// first match the store lists.
pub struct Materializer<'a, S: RemoteStore> {
    store: &'a S,
    mode: MaterializeMode,
    known: &'a IdentityMap,
}

impl<'a, S: RemoteStore> Materializer<'a, S> {
    /// Nodes already in `known` are left alone.
    pub fn new(store: &'a S, mode: MaterializeMode, known: &'a IdentityMap) -> Self {
        Self { store, mode, known }
    }

    pub fn create_or_set_projects(&self, projects: &[Project]) -> Result<Materialized, TransferError> {
        let mut out = Materialized::default();
        for project in projects {
            if self.known.contains(&project.id) {
                continue;
            }
            let existing = match self.mode {
                MaterializeMode::Merge => self.find_owned(ObjectKind::Project, &project.name)?,
                MaterializeMode::Create => None,
            };
            let target = match existing {
                Some(id) => id,
                None => self.store.create_container(
                    ObjectKind::Project,
                    &project.name,
                    project.description.as_deref(),
                )?,
            };
            out.record(project.id.clone(), target, existing.is_some());
        }
        Ok(out)
    }

    pub fn create_or_set_screens(&self, screens: &[Screen]) -> Result<Materialized, TransferError> {
        let mut out = Materialized::default();
        for screen in screens {
            if self.known.contains(&screen.id) {
                continue;
            }
            let existing = match self.mode {
                MaterializeMode::Merge => self.find_owned(ObjectKind::Screen, &screen.name)?,
                MaterializeMode::Create => None,
            };
            let target = match existing {
                Some(id) => id,
                None => self.store.create_container(
                    ObjectKind::Screen,
                    &screen.name,
                    screen.description.as_deref(),
                )?,
            };
            out.record(screen.id.clone(), target, existing.is_some());
        }
        Ok(out)
    }

    /// `projects` decides whether a dataset is searched among orphans or
    /// among the children of its project.
    pub fn create_or_set_datasets(
        &self,
        datasets: &[Dataset],
        projects: &[Project],
    ) -> Result<Materialized, TransferError> {
        let mut out = Materialized::default();
        for dataset in datasets {
            if self.known.contains(&dataset.id) {
                continue;
            }
            let existing = match self.mode {
                MaterializeMode::Merge => self.find_dataset(dataset, projects)?,
                MaterializeMode::Create => None,
            };
            let target = match existing {
                Some(id) => id,
                None => self.store.create_container(
                    ObjectKind::Dataset,
                    &dataset.name,
                    dataset.description.as_deref(),
                )?,
            };
            out.record(dataset.id.clone(), target, existing.is_some());
        }
        Ok(out)
    }

    fn find_owned(&self, kind: ObjectKind, name: &str) -> Result<Option<TargetId>, TransferError> {
        let found = self
            .store
            .list_owned(kind, false)?
            .into_iter()
            .find(|object| object.name == name)
            .map(|object| object.id);
        if let Some(id) = found {
            tracing::debug!(%kind, name, %id, "reusing existing container");
        }
        Ok(found)
    }

    fn find_dataset(
        &self,
        dataset: &Dataset,
        projects: &[Project],
    ) -> Result<Option<TargetId>, TransferError> {
        let parents: Vec<&Project> = projects
            .iter()
            .filter(|project| project.dataset_refs.iter().any(|r| r.id == dataset.id))
            .collect();

        if parents.is_empty() {
            let found = self
                .store
                .list_owned(ObjectKind::Dataset, true)?
                .into_iter()
                .find(|object| object.name == dataset.name)
                .map(|object| object.id);
            return Ok(found);
        }

        let owned_projects = self.store.list_owned(ObjectKind::Project, false)?;
        for parent in parents {
            for project in owned_projects.iter().filter(|p| p.name == parent.name) {
                let children = self.store.list_children(ObjectKind::Project, project.id)?;
                if let Some(child) = children.into_iter().find(|c| c.name == dataset.name) {
                    tracing::debug!(
                        dataset = %dataset.id,
                        id = %child.id,
                        project = %project.name,
                        "reusing dataset"
                    );
                    return Ok(Some(child.id));
                }
            }
        }
        Ok(None)
    }
}

/// A well of a reconstructed plate the store refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedWell {
    pub plate: SymbolicId,
    pub row: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PlateReconstruction {
    pub plate_map: BTreeMap<SymbolicId, TargetId>,
    /// Working copy with the plates' server path facts excised.
    pub descriptor: Ome,
    pub consumed: BTreeSet<SymbolicId>,
    pub stats: ContainerStats,
    pub failed_wells: Vec<FailedWell>,
}

/// Maps every descriptor plate to a target plate, reusing a plate imported
/// from the same files or building one from the imported images.
pub fn create_plate_map<S: RemoteStore>(
    store: &S,
    ome: &Ome,
    image_map: &ImageMap,
) -> Result<PlateReconstruction, TransferError> {
    let mut out = PlateReconstruction {
        descriptor: ome.clone(),
        ..PlateReconstruction::default()
    };

    for (index, plate) in ome.plates.iter().enumerate() {
        let server_path = provenance::server_path(&plate.annotation_refs, &ome.structured_annotations)?
            .ok_or_else(|| TransferError::AmbiguousPlateOrigin(plate.id.to_string()))?;

        for reference in &plate.annotation_refs {
            let Some(annotation) = ome.annotation(&reference.id) else {
                continue;
            };
            if provenance::is_server_path_fact(annotation)? {
                out.consumed.insert(annotation.id.clone());
            }
        }

        let candidates = store.find_plates_by_client_path(&client_path_pattern(&server_path))?;
        let mut reusable = None;
        for candidate in candidates {
            if !is_reconciled(store, candidate)? {
                reusable = Some(candidate);
                break;
            }
        }

        let target = match reusable {
            Some(id) => {
                tracing::debug!(plate = %plate.id, %id, "plate was imported as a plate");
                out.stats.reused += 1;
                id
            }
            None => {
                let (id, failed) = create_plate_from_images(store, plate, image_map)?;
                out.stats.created += 1;
                out.failed_wells.extend(failed);
                id
            }
        };
        out.plate_map.insert(plate.id.clone(), target);

        let consumed = &out.consumed;
        out.descriptor.plates[index]
            .annotation_refs
            .retain(|reference| !consumed.contains(&reference.id));
    }

    let consumed = &out.consumed;
    out.descriptor
        .structured_annotations
        .retain(|annotation| !consumed.contains(&annotation.id));
    Ok(out)
}

/// `LIKE` pattern matching any client path containing `server_path`.
pub fn client_path_pattern(server_path: &str) -> String {
    let trimmed = server_path.trim_matches('/');
    let trimmed = trimmed.strip_suffix(MOCK_FOLDER).unwrap_or(trimmed);
    format!("%{trimmed}%")
}

/// Whether an earlier run already tagged the plate with transfer metadata.
fn is_reconciled<S: RemoteStore>(store: &S, plate: TargetId) -> Result<bool, TransferError> {
    Ok(store
        .annotations_of(ObjectKind::Plate, plate)?
        .iter()
        .any(|summary| {
            summary.kind == AnnotationKind::Map && summary.namespace.as_deref() == Some(TRANSFER_NS)
        }))
}

/// Creates a plate named after the descriptor's and one well per descriptor
/// well, holding the mapped images. Unmapped images are left out.
pub fn create_plate_from_images<S: RemoteStore>(
    store: &S,
    plate: &Plate,
    image_map: &ImageMap,
) -> Result<(TargetId, Vec<FailedWell>), TransferError> {
    let plate_id = store.create_container(ObjectKind::Plate, &plate.name, None)?;
    let mut failed = Vec::new();
    for well in &plate.wells {
        let mut images = Vec::new();
        for sample in &well.well_samples {
            let Some(reference) = &sample.image_ref else {
                continue;
            };
            match image_map.get(&reference.id) {
                Some(image) => images.push(*image),
                None => tracing::warn!(image = %reference.id, well = %well.id, "image not imported, leaving it out of the well"),
            }
        }
        if !add_images_to_plate(store, &images, plate_id, well.row, well.column) {
            failed.push(FailedWell {
                plate: plate.id.clone(),
                row: well.row,
                column: well.column,
            });
        }
    }
    Ok((plate_id, failed))
}

/// Adds a well at (`row`, `column`) with one sample per image. Returns
/// `false` when the store refuses, e.g. because the position is taken.
pub fn add_images_to_plate<S: RemoteStore>(
    store: &S,
    images: &[TargetId],
    plate: TargetId,
    row: u32,
    column: u32,
) -> bool {
    for image in images {
        match store.image_exists(*image) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(%image, %plate, row, column, "image missing, well not added");
                return false;
            }
            Err(err) => {
                tracing::warn!(%image, %plate, row, column, error = %err, "image lookup failed, well not added");
                return false;
            }
        }
    }
    let well = NewWell {
        plate,
        row,
        column,
        images: images.to_vec(),
    };
    match store.save_well(&well) {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(%plate, row, column, error = %err, "failed to add well");
            false
        }
    }
}
