use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TransferError;

/// Local copy of a payload recorded under `server_path` in the package.
pub fn resolve_payload_path(folder: &Utf8Path, server_path: &str) -> Utf8PathBuf {
    folder.join(server_path)
}

/// Replaces the content of `path` through a sibling temp file.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), TransferError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| TransferError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("omero-transfer")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| TransferError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| TransferError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| TransferError::Filesystem(err.to_string()))?;
    Ok(())
}
