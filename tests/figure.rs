use std::collections::BTreeSet;
use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use omero_transfer_core::annotation::{AnnotationTranslator, TargetAnnotationValue};
use omero_transfer_core::config::ResolvedConfig;
use omero_transfer_core::descriptor::{Annotation, AnnotationBody, Reference};
use omero_transfer_core::domain::{FIGURE_NS, SymbolicId, TRANSFER_NS, TargetId};
use omero_transfer_core::error::TransferError;
use omero_transfer_core::identity::{IdentityMap, ImageMap};
use omero_transfer_core::memory::MemoryStore;

const FIGURE: &str = r#"{"panels": [{"imageId": 5, "x": 0}, {"imageId": 7, "x": 10}]}"#;

fn annotations(path_ref: Option<&str>) -> Vec<Annotation> {
    vec![
        Annotation {
            id: "Annotation:20".parse().unwrap(),
            namespace: Some(FIGURE_NS.to_string()),
            description: Some("figure".to_string()),
            annotation_refs: path_ref
                .map(|id| vec![Reference::new(id.parse().unwrap())])
                .unwrap_or_default(),
            body: AnnotationBody::File {
                file_name: Some("fig.json".to_string()),
                size: None,
            },
        },
        Annotation {
            id: "Annotation:21".parse().unwrap(),
            namespace: Some(TRANSFER_NS.to_string()),
            description: None,
            annotation_refs: Vec::new(),
            body: AnnotationBody::Xml {
                value: "<Value><CLITransferServerPath><Path>figures/fig.json</Path></CLITransferServerPath></Value>".to_string(),
            },
        },
    ]
}

fn setup(figure: bool) -> (tempfile::TempDir, ResolvedConfig, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let folder = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    fs::create_dir_all(folder.join("figures")).unwrap();
    let figure_path = folder.join("figures/fig.json");
    fs::write(&figure_path, FIGURE).unwrap();
    let config = ResolvedConfig {
        figure,
        folder,
        ..ResolvedConfig::default()
    };
    (temp, config, figure_path)
}

#[test]
fn figure_is_rewritten_and_uploaded() {
    let (_temp, config, figure_path) = setup(true);
    let store = MemoryStore::new();
    let image_map = ImageMap::from([("Image:5".parse().unwrap(), TargetId::new(105))]);
    let annotations = annotations(Some("Annotation:21"));
    let mut identity = IdentityMap::new();
    let mut consumed = BTreeSet::new();

    let stats = AnnotationTranslator::new(&store, &config, &image_map, &annotations)
        .create_annotations(&mut identity, &mut consumed)
        .unwrap();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.skipped, 1);
    assert!(consumed.contains(&"Annotation:21".parse::<SymbolicId>().unwrap()));

    let rewritten = fs::read_to_string(&figure_path).unwrap();
    assert_eq!(
        rewritten,
        r#"{"panels": [{"imageId": 105, "x": 0}, {"imageId": -1, "x": 10}]}"#
    );

    let state = store.snapshot().unwrap();
    assert_eq!(state.files.len(), 1);
    assert_eq!(state.files[0].path, figure_path);
    let file_id = state.files[0].id;
    assert_eq!(
        state.annotations[0].annotation.value,
        TargetAnnotationValue::File(file_id)
    );
    assert_eq!(
        identity.get(&"Annotation:20".parse().unwrap()),
        Some(state.annotations[0].id)
    );
}

#[test]
fn figure_is_skipped_unless_requested() {
    let (_temp, config, figure_path) = setup(false);
    let store = MemoryStore::new();
    let annotations = annotations(Some("Annotation:21"));
    let mut identity = IdentityMap::new();
    let mut consumed = BTreeSet::new();

    let stats = AnnotationTranslator::new(&store, &config, &ImageMap::new(), &annotations)
        .create_annotations(&mut identity, &mut consumed)
        .unwrap();
    assert_eq!(stats.created, 0);
    assert_eq!(consumed.len(), 2);
    assert!(identity.is_empty());
    assert_eq!(fs::read_to_string(&figure_path).unwrap(), FIGURE);
    assert!(store.snapshot().unwrap().files.is_empty());
}

#[test]
fn file_without_path_fact_fails() {
    let (_temp, config, _) = setup(true);
    let store = MemoryStore::new();
    let annotations = annotations(None);
    let result = AnnotationTranslator::new(&store, &config, &ImageMap::new(), &annotations)
        .create_annotations(&mut IdentityMap::new(), &mut BTreeSet::new());
    assert_matches!(result, Err(TransferError::MissingServerPath(id)) if id == "Annotation:20");
}

#[test]
fn second_run_leaves_rewritten_figure_intact() {
    let (_temp, config, figure_path) = setup(true);
    let store = MemoryStore::new();
    let image_map = ImageMap::from([("Image:5".parse().unwrap(), TargetId::new(105))]);
    let annotations = annotations(Some("Annotation:21"));

    for _ in 0..2 {
        AnnotationTranslator::new(&store, &config, &image_map, &annotations)
            .create_annotations(&mut IdentityMap::new(), &mut BTreeSet::new())
            .unwrap();
    }
    assert_eq!(
        fs::read_to_string(&figure_path).unwrap(),
        r#"{"panels": [{"imageId": 105, "x": 0}, {"imageId": -1, "x": 10}]}"#
    );
    assert_eq!(store.snapshot().unwrap().files.len(), 2);
}
