//! Display settings carried as annotations, and renaming of imported objects.
//!
//! Settings annotations are popped from the working descriptor so that no
//! later phase materializes or links them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::annotation::{TargetAnnotation, TargetAnnotationValue};
use crate::descriptor::{Annotation, AnnotationBody, Image, Ome, Plate};
use crate::domain::{
    ObjectKind, PATHVIEWER_CHANNEL_NS, PATHVIEWER_SETTINGS_NS, RENDERING_DEF_NS, SymbolicId,
    TargetId,
};
use crate::error::TransferError;
use crate::identity::ImageMap;
use crate::store::{ChannelRendering, RemoteStore, RenderingModel, RenderingSettings};

#[derive(Debug, Clone, Deserialize)]
struct RenderingDefPayload {
    c: Vec<ChannelPayload>,
    model: String,
    z: u32,
    t: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelPayload {
    start: f64,
    end: f64,
    color: String,
    label: String,
    active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSettings {
    pub image: SymbolicId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettingsReport {
    pub channel_settings: usize,
    pub rendering_defs: usize,
    pub skipped: Vec<SkippedSettings>,
}

impl SettingsReport {
    fn skip(&mut self, image: &SymbolicId, reason: String) {
        tracing::warn!(%image, "{reason}");
        self.skipped.push(SkippedSettings {
            image: image.clone(),
            reason,
        });
    }
}

/// Removes the first annotation of `image` in `namespace` from the image's
/// references and from the collection.
pub fn pop_annotation(ome: &mut Ome, image: usize, namespace: &str) -> Option<Annotation> {
    let position = ome.images.get(image)?.annotation_refs.iter().position(|reference| {
        ome.annotation(&reference.id)
            .is_some_and(|annotation| annotation.has_namespace(namespace))
    })?;
    let reference = ome.images[image].annotation_refs.remove(position);
    let index = ome
        .structured_annotations
        .iter()
        .position(|annotation| annotation.id == reference.id)?;
    Some(ome.structured_annotations.remove(index))
}

/// Applies channel settings and rendering definitions of every image. A
/// payload that does not fit the imported image is reported and skipped.
pub fn apply_image_settings<S: RemoteStore>(
    store: &S,
    ome: &mut Ome,
    image_map: &ImageMap,
    consumed: &mut BTreeSet<SymbolicId>,
) -> Result<SettingsReport, TransferError> {
    let mut report = SettingsReport::default();
    for index in 0..ome.images.len() {
        let channel_settings = pop_annotation(ome, index, PATHVIEWER_SETTINGS_NS);
        let rendering_def = pop_annotation(ome, index, RENDERING_DEF_NS);
        for popped in channel_settings.iter().chain(rendering_def.iter()) {
            consumed.insert(popped.id.clone());
        }
        if channel_settings.is_none() && rendering_def.is_none() {
            continue;
        }

        let symbolic = ome.images[index].id.clone();
        let Some(image) = image_map.get(&symbolic).copied() else {
            report.skip(&symbolic, "image not imported, settings not applied".to_string());
            continue;
        };
        if let Some(annotation) = channel_settings {
            if apply_channel_settings(store, image, &symbolic, &annotation, &mut report)? {
                report.channel_settings += 1;
            }
        }
        if let Some(annotation) = rendering_def {
            if apply_rendering_def(store, image, &symbolic, &annotation, &mut report)? {
                report.rendering_defs += 1;
            }
        }
    }
    Ok(report)
}

fn text_value(annotation: &Annotation) -> Option<&str> {
    match &annotation.body {
        AnnotationBody::Comment { value } | AnnotationBody::Tag { value } => Some(value),
        _ => None,
    }
}

fn apply_channel_settings<S: RemoteStore>(
    store: &S,
    image: TargetId,
    symbolic: &SymbolicId,
    annotation: &Annotation,
    report: &mut SettingsReport,
) -> Result<bool, TransferError> {
    let Some(value) = text_value(annotation) else {
        report.skip(symbolic, format!("channel settings {} carry no text", annotation.id));
        return Ok(false);
    };
    if store.channel_count(image)? == 0 {
        report.skip(symbolic, format!("image {image} has no channels"));
        return Ok(false);
    }
    let comment = store.create_annotation(&TargetAnnotation {
        value: TargetAnnotationValue::Comment(value.to_string()),
        description: None,
        namespace: Some(PATHVIEWER_CHANNEL_NS.to_string()),
    })?;
    store.link_channel_annotation(image, 0, comment)?;
    Ok(true)
}

fn apply_rendering_def<S: RemoteStore>(
    store: &S,
    image: TargetId,
    symbolic: &SymbolicId,
    annotation: &Annotation,
    report: &mut SettingsReport,
) -> Result<bool, TransferError> {
    let Some(value) = text_value(annotation) else {
        report.skip(symbolic, format!("rendering definition {} carries no text", annotation.id));
        return Ok(false);
    };
    let payload: RenderingDefPayload = match serde_json::from_str(value) {
        Ok(payload) => payload,
        Err(err) => {
            report.skip(symbolic, format!("unreadable rendering definition {}: {err}", annotation.id));
            return Ok(false);
        }
    };
    let channels = store.channel_count(image)?;
    if payload.c.len() != channels {
        report.skip(
            symbolic,
            format!(
                "wrong number of channels in rendering definition {} ({} for image {image} with {channels})",
                annotation.id,
                payload.c.len()
            ),
        );
        return Ok(false);
    }
    let model = match payload.model.as_str() {
        "rgb" => Some(RenderingModel::Rgb),
        "greyscale" => Some(RenderingModel::Greyscale),
        other => {
            tracing::warn!(image = %symbolic, model = other, "unrecognized rendering model, keeping current one");
            None
        }
    };
    let settings = RenderingSettings {
        channels: payload
            .c
            .into_iter()
            .map(|channel| ChannelRendering {
                start: channel.start,
                end: channel.end,
                color: channel.color,
                label: channel.label,
                active: channel.active,
            })
            .collect(),
        model,
        default_z: payload.z,
        default_t: payload.t,
    };
    store.apply_rendering(image, &settings)?;
    Ok(true)
}

/// Gives imported images their descriptor names.
pub fn rename_images<S: RemoteStore>(
    store: &S,
    images: &[Image],
    image_map: &ImageMap,
) -> Result<usize, TransferError> {
    let mut renamed = 0;
    for image in images {
        match image_map.get(&image.id) {
            Some(id) => {
                store.rename(ObjectKind::Image, *id, &image.name)?;
                renamed += 1;
            }
            None => tracing::warn!(image = %image.id, "image not imported, not renamed"),
        }
    }
    Ok(renamed)
}

pub fn rename_plates<S: RemoteStore>(
    store: &S,
    plates: &[Plate],
    plate_map: &BTreeMap<SymbolicId, TargetId>,
) -> Result<usize, TransferError> {
    let mut renamed = 0;
    for plate in plates {
        match plate_map.get(&plate.id) {
            Some(id) => {
                store.rename(ObjectKind::Plate, *id, &plate.name)?;
                renamed += 1;
            }
            None => tracing::warn!(plate = %plate.id, "plate not mapped, not renamed"),
        }
    }
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Reference;
    use crate::memory::MemoryStore;

    fn comment(id: &str, namespace: &str, value: &str) -> Annotation {
        Annotation {
            id: id.parse().unwrap(),
            namespace: Some(namespace.to_string()),
            description: None,
            annotation_refs: Vec::new(),
            body: AnnotationBody::Comment {
                value: value.to_string(),
            },
        }
    }

    fn image_with(refs: &[&str]) -> Ome {
        Ome {
            images: vec![Image {
                id: "Image:1".parse().unwrap(),
                name: "a.tif".to_string(),
                roi_refs: Vec::new(),
                annotation_refs: refs
                    .iter()
                    .map(|id| Reference::new(id.parse().unwrap()))
                    .collect(),
            }],
            ..Ome::default()
        }
    }

    const RDEF: &str = r#"{"c": [
        {"start": 0, "end": 255, "color": "FF0000", "label": "DAPI", "active": true},
        {"start": 10, "end": 200, "color": "00FF00", "label": "GFP", "active": false}
    ], "model": "rgb", "z": 3, "t": 0}"#;

    #[test]
    fn pop_removes_reference_and_annotation() {
        let mut ome = image_with(&["Annotation:1", "Annotation:2"]);
        ome.structured_annotations = vec![
            comment("Annotation:1", "other", "x"),
            comment("Annotation:2", RENDERING_DEF_NS, RDEF),
        ];
        let popped = pop_annotation(&mut ome, 0, RENDERING_DEF_NS).unwrap();
        assert_eq!(popped.id.as_str(), "Annotation:2");
        assert_eq!(ome.images[0].annotation_refs.len(), 1);
        assert_eq!(ome.structured_annotations.len(), 1);
        assert!(pop_annotation(&mut ome, 0, RENDERING_DEF_NS).is_none());
    }

    #[test]
    fn applies_settings_and_records_consumed() {
        let store = MemoryStore::new();
        let image = store.add_image("raw", &[], 2).unwrap();
        let image_map = ImageMap::from([("Image:1".parse().unwrap(), image)]);
        let mut ome = image_with(&["Annotation:1", "Annotation:2"]);
        ome.structured_annotations = vec![
            comment("Annotation:1", PATHVIEWER_SETTINGS_NS, "{\"channels\":[]}"),
            comment("Annotation:2", RENDERING_DEF_NS, RDEF),
        ];
        let mut consumed = BTreeSet::new();

        let report = apply_image_settings(&store, &mut ome, &image_map, &mut consumed).unwrap();
        assert_eq!(report.channel_settings, 1);
        assert_eq!(report.rendering_defs, 1);
        assert_eq!(consumed.len(), 2);
        assert!(ome.structured_annotations.is_empty());

        let state = store.snapshot().unwrap();
        let rendering = state.images[0].rendering.as_ref().unwrap();
        assert_eq!(rendering.model, Some(RenderingModel::Rgb));
        assert_eq!(rendering.default_z, 3);
        assert_eq!(rendering.channels[1].label, "GFP");
        assert_eq!(state.images[0].channel_annotations.len(), 1);
        assert_eq!(
            state.annotations[0].annotation.namespace.as_deref(),
            Some(PATHVIEWER_CHANNEL_NS)
        );
    }

    #[test]
    fn channel_mismatch_is_skipped() {
        let store = MemoryStore::new();
        let image = store.add_image("raw", &[], 3).unwrap();
        let image_map = ImageMap::from([("Image:1".parse().unwrap(), image)]);
        let mut ome = image_with(&["Annotation:2"]);
        ome.structured_annotations = vec![comment("Annotation:2", RENDERING_DEF_NS, RDEF)];

        let report =
            apply_image_settings(&store, &mut ome, &image_map, &mut BTreeSet::new()).unwrap();
        assert_eq!(report.rendering_defs, 0);
        assert_eq!(report.skipped.len(), 1);
        assert!(store.snapshot().unwrap().images[0].rendering.is_none());
    }

    #[test]
    fn renames_mapped_images_only() {
        let store = MemoryStore::new();
        let image = store.add_image("raw", &[], 1).unwrap();
        let image_map = ImageMap::from([("Image:1".parse().unwrap(), image)]);
        let mut ome = image_with(&[]);
        ome.images.push(Image {
            id: "Image:2".parse().unwrap(),
            name: "b.tif".to_string(),
            roi_refs: Vec::new(),
            annotation_refs: Vec::new(),
        });
        assert_eq!(rename_images(&store, &ome.images, &image_map).unwrap(), 1);
        assert_eq!(store.snapshot().unwrap().images[0].name, "a.tif");
    }
}
