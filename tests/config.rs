use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use omero_transfer_core::config::{Config, ConfigLoader};
use omero_transfer_core::domain::{MaterializeMode, MetadataField};
use omero_transfer_core::error::TransferError;

#[test]
fn load_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("omero-transfer.json");
    fs::write(
        &path,
        r#"{"schema_version": 1, "merge": true, "figure": true, "metadata": ["md5", "img_id", "db_id"], "folder": "/packages/run1"}"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.mode, MaterializeMode::Merge);
    assert!(resolved.figure);
    assert_eq!(
        resolved.metadata,
        vec![MetadataField::Md5, MetadataField::ImgId, MetadataField::DbId]
    );
    assert_eq!(resolved.folder, Utf8PathBuf::from("/packages/run1"));
    assert_eq!(resolved.checksum, None);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, TransferError::ConfigRead(_));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("omero-transfer.json");
    fs::write(&path, "{\"merge\": ").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, TransferError::ConfigParse(_));
}

#[test]
fn metadata_names_are_case_insensitive() {
    let config = Config {
        metadata: Some(vec!["MD5".to_string(), " hostname ".to_string()]),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(
        resolved.metadata,
        vec![MetadataField::Md5, MetadataField::Hostname]
    );
}
