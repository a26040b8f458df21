use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::annotation::{AnnotationStats, AnnotationTranslator};
use crate::config::ResolvedConfig;
use crate::descriptor::Ome;
use crate::domain::SymbolicId;
use crate::error::TransferError;
use crate::identity::{IdentityMap, ImageMap, find_existing_objects};
use crate::link::{GraphLinker, LinkStats};
use crate::materialize::{ContainerStats, FailedWell, Materializer, create_plate_map};
use crate::roi::create_rois;
use crate::settings::{SettingsReport, apply_image_settings, rename_images, rename_plates};
use crate::store::RemoteStore;

#[derive(Debug, Clone, Serialize)]
pub struct PopulateResult {
    pub identity: IdentityMap,
    pub resolved_existing: usize,
    pub projects: ContainerStats,
    pub datasets: ContainerStats,
    pub screens: ContainerStats,
    pub plates: ContainerStats,
    pub annotations: AnnotationStats,
    pub rois: usize,
    pub links: LinkStats,
    pub renamed_images: usize,
    pub renamed_plates: usize,
    pub failed_wells: Vec<FailedWell>,
    pub settings: SettingsReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResult {
    pub identity: IdentityMap,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<S: RemoteStore> {
    store: S,
    config: ResolvedConfig,
}

impl<S: RemoteStore> App<S> {
    pub fn new(store: S, config: ResolvedConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Identity Resolver alone: objects the pixel import already created.
    pub fn resolve_existing(
        &self,
        descriptor: &Ome,
        image_map: &ImageMap,
        sink: &dyn ProgressSink,
    ) -> Result<ResolveResult, TransferError> {
        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; describing {} imported images", image_map.len()),
            elapsed: None,
        });
        let identity = find_existing_objects(&self.store, descriptor, image_map, &self.config)?;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} objects already imported", identity.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(ResolveResult { identity })
    }

    /// Materializes and links `descriptor` against the store. Phases run in
    /// dependency order; a phase error aborts the run without rollback.
    pub fn populate(
        &self,
        descriptor: &Ome,
        image_map: &ImageMap,
        sink: &dyn ProgressSink,
    ) -> Result<PopulateResult, TransferError> {
        let start = Instant::now();
        let ResolveResult { mut identity } = self.resolve_existing(descriptor, image_map, sink)?;
        let resolved_existing = identity.len();

        sink.event(ProgressEvent {
            message: format!("phase=Plates; reconciling {} plates", descriptor.plates.len()),
            elapsed: Some(start.elapsed()),
        });
        let plates = create_plate_map(&self.store, descriptor, image_map)?;
        let mut working = plates.descriptor;
        let mut consumed: BTreeSet<SymbolicId> = plates.consumed;

        sink.event(ProgressEvent {
            message: "phase=Settings; applying image settings".to_string(),
            elapsed: Some(start.elapsed()),
        });
        let settings = apply_image_settings(&self.store, &mut working, image_map, &mut consumed)?;
        let renamed_images = rename_images(&self.store, &working.images, image_map)?;
        let renamed_plates = rename_plates(&self.store, &working.plates, &plates.plate_map)?;

        sink.event(ProgressEvent {
            message: format!("phase=Containers; mode={:?}", self.config.mode),
            elapsed: Some(start.elapsed()),
        });
        let materializer = Materializer::new(&self.store, self.config.mode, &identity);
        let projects = materializer.create_or_set_projects(&working.projects)?;
        let datasets = materializer.create_or_set_datasets(&working.datasets, &working.projects)?;
        let screens = materializer.create_or_set_screens(&working.screens)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Annotations; {} annotations",
                working.structured_annotations.len()
            ),
            elapsed: Some(start.elapsed()),
        });
        let translator = AnnotationTranslator::new(
            &self.store,
            &self.config,
            image_map,
            &working.structured_annotations,
        );
        let annotations = translator.create_annotations(&mut identity, &mut consumed)?;

        identity.extend(plates.plate_map)?;
        identity.extend(projects.ids)?;
        identity.extend(datasets.ids)?;
        identity.extend(screens.ids)?;

        sink.event(ProgressEvent {
            message: "phase=Rois; saving ROI batch".to_string(),
            elapsed: Some(start.elapsed()),
        });
        let rois = create_rois(&self.store, &working, &identity, image_map, &consumed)?;
        let roi_count = rois.len();
        identity.extend(rois)?;

        sink.event(ProgressEvent {
            message: "phase=Link; restoring links".to_string(),
            elapsed: Some(start.elapsed()),
        });
        let links = GraphLinker::new(&self.store, &identity, image_map, &consumed).link_all(&working)?;

        sink.event(ProgressEvent {
            message: format!("phase=Done; {} objects mapped", identity.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(PopulateResult {
            identity,
            resolved_existing,
            projects: projects.stats,
            datasets: datasets.stats,
            screens: screens.stats,
            plates: plates.stats,
            annotations,
            rois: roi_count,
            links,
            renamed_images,
            renamed_plates,
            failed_wells: plates.failed_wells,
            settings,
        })
    }
}
