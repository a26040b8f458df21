use assert_matches::assert_matches;

use omero_transfer_core::annotation::{TargetAnnotation, TargetAnnotationValue};
use omero_transfer_core::descriptor::{
    Annotation, AnnotationBody, Ome, Plate, Reference, Well, WellSample,
};
use omero_transfer_core::domain::{ObjectKind, SymbolicId, TRANSFER_NS};
use omero_transfer_core::error::TransferError;
use omero_transfer_core::identity::ImageMap;
use omero_transfer_core::materialize::create_plate_map;
use omero_transfer_core::memory::MemoryStore;
use omero_transfer_core::store::{NewWell, RemoteStore};

fn path_fact(id: &str, path: &str) -> Annotation {
    Annotation {
        id: id.parse().unwrap(),
        namespace: Some(TRANSFER_NS.to_string()),
        description: None,
        annotation_refs: Vec::new(),
        body: AnnotationBody::Xml {
            value: format!(
                "<Value><CLITransferServerPath><Path>{path}</Path></CLITransferServerPath></Value>"
            ),
        },
    }
}

fn plate_descriptor(annotation_refs: Vec<Reference>) -> Ome {
    Ome {
        plates: vec![Plate {
            id: "Plate:1".parse().unwrap(),
            name: "screen plate".to_string(),
            wells: vec![Well {
                id: "Well:1".parse().unwrap(),
                row: 1,
                column: 2,
                well_samples: vec![
                    WellSample {
                        id: "WellSample:1".parse().unwrap(),
                        image_ref: Some(Reference::new("Image:1".parse().unwrap())),
                    },
                    WellSample {
                        id: "WellSample:2".parse().unwrap(),
                        image_ref: Some(Reference::new("Image:2".parse().unwrap())),
                    },
                ],
                annotation_refs: Vec::new(),
            }],
            annotation_refs,
        }],
        structured_annotations: vec![path_fact("Annotation:10", "/data/run1/plate1/")],
        ..Ome::default()
    }
}

fn refs(ids: &[&str]) -> Vec<Reference> {
    ids.iter()
        .map(|id| Reference::new(id.parse().unwrap()))
        .collect()
}

#[test]
fn plate_imported_as_images_is_rebuilt() {
    let store = MemoryStore::new();
    let first = store.add_image("A1-1", &["/other/a.tif"], 1).unwrap();
    let second = store.add_image("A1-2", &["/other/b.tif"], 1).unwrap();
    let image_map = ImageMap::from([
        ("Image:1".parse().unwrap(), first),
        ("Image:2".parse().unwrap(), second),
    ]);
    let ome = plate_descriptor(refs(&["Annotation:10"]));

    let result = create_plate_map(&store, &ome, &image_map).unwrap();
    assert_eq!(result.stats.created, 1);
    assert!(result.failed_wells.is_empty());

    let plate = result.plate_map[&"Plate:1".parse::<SymbolicId>().unwrap()];
    let state = store.snapshot().unwrap();
    assert_eq!(state.wells.len(), 1);
    assert_eq!(state.wells[0].plate, plate);
    assert_eq!((state.wells[0].row, state.wells[0].column), (1, 2));
    assert_eq!(state.wells[0].images, vec![first, second]);

    assert!(result.consumed.contains(&"Annotation:10".parse::<SymbolicId>().unwrap()));
    assert!(result.descriptor.structured_annotations.is_empty());
    assert!(result.descriptor.plates[0].annotation_refs.is_empty());
    assert_eq!(ome.structured_annotations.len(), 1);
}

#[test]
fn plate_imported_as_plate_is_reused() {
    let store = MemoryStore::new();
    let image = store
        .add_image("A1", &["/import/data/run1/plate1/A1.tif"], 1)
        .unwrap();
    let existing = store
        .create_container(ObjectKind::Plate, "imported", None)
        .unwrap();
    store
        .save_well(&NewWell {
            plate: existing,
            row: 1,
            column: 2,
            images: vec![image],
        })
        .unwrap();
    let image_map = ImageMap::from([("Image:1".parse().unwrap(), image)]);

    let result = create_plate_map(&store, &plate_descriptor(refs(&["Annotation:10"])), &image_map)
        .unwrap();
    assert_eq!(result.stats.reused, 1);
    assert_eq!(result.plate_map[&"Plate:1".parse::<SymbolicId>().unwrap()], existing);
    assert_eq!(store.snapshot().unwrap().wells.len(), 1);
}

#[test]
fn reconciled_plate_is_not_reused() {
    let store = MemoryStore::new();
    let image = store
        .add_image("A1", &["/import/data/run1/plate1/A1.tif"], 1)
        .unwrap();
    let existing = store
        .create_container(ObjectKind::Plate, "imported", None)
        .unwrap();
    store
        .save_well(&NewWell {
            plate: existing,
            row: 0,
            column: 0,
            images: vec![image],
        })
        .unwrap();
    let tag = store
        .create_annotation(&TargetAnnotation {
            value: TargetAnnotationValue::Map(vec![("md5".to_string(), "x".to_string())]),
            description: None,
            namespace: Some(TRANSFER_NS.to_string()),
        })
        .unwrap();
    store
        .link_annotation(ObjectKind::Plate, existing, tag)
        .unwrap();
    let image_map = ImageMap::from([("Image:1".parse().unwrap(), image)]);

    let result = create_plate_map(&store, &plate_descriptor(refs(&["Annotation:10"])), &image_map)
        .unwrap();
    assert_eq!(result.stats.created, 1);
    assert_ne!(result.plate_map[&"Plate:1".parse::<SymbolicId>().unwrap()], existing);
    // Image:2 is not mapped, so the rebuilt well only holds Image:1.
    let state = store.snapshot().unwrap();
    assert_eq!(state.wells.len(), 2);
    assert_eq!(state.wells[1].images, vec![image]);
}

#[test]
fn plate_without_path_fact_is_ambiguous() {
    let store = MemoryStore::new();
    let result = create_plate_map(&store, &plate_descriptor(Vec::new()), &ImageMap::new());
    assert_matches!(result, Err(TransferError::AmbiguousPlateOrigin(id)) if id == "Plate:1");
}
