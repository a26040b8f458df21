use crate::descriptor::{Annotation, AnnotationBody, Reference};
use crate::error::TransferError;
use crate::xml;

/// Server-side file path recorded among the annotations referenced by `refs`.
///
/// Annotations are scanned in collection order; the first XML annotation
/// carrying a server path fact wins.
pub fn server_path(
    refs: &[Reference],
    annotations: &[Annotation],
) -> Result<Option<String>, TransferError> {
    for annotation in annotations {
        if !refs.iter().any(|reference| reference.id == annotation.id) {
            continue;
        }
        let AnnotationBody::Xml { value } = &annotation.body else {
            continue;
        };
        if let Some(path) = xml::server_path(value)? {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// True for an XML annotation holding a server path fact.
pub fn is_server_path_fact(annotation: &Annotation) -> Result<bool, TransferError> {
    match &annotation.body {
        AnnotationBody::Xml { value } => Ok(xml::server_path(value)?.is_some()),
        _ => Ok(false),
    }
}
