use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::OnceLock;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::config::ResolvedConfig;
use crate::descriptor::{Annotation, AnnotationBody};
use crate::domain::{
    AnnotationKind, FIGURE_NS, MetadataField, SymbolicId, TRANSFER_NS, TargetId,
};
use crate::error::TransferError;
use crate::fs_util;
use crate::identity::{IdentityMap, ImageMap};
use crate::provenance;
use crate::store::RemoteStore;
use crate::xml;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TargetAnnotationValue {
    Tag(String),
    Map(Vec<(String, String)>),
    Comment(String),
    Timestamp(DateTime<Utc>),
    Long(i64),
    File(TargetId),
    Xml(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAnnotation {
    pub value: TargetAnnotationValue,
    pub description: Option<String>,
    pub namespace: Option<String>,
}

impl TargetAnnotation {
    pub fn kind(&self) -> AnnotationKind {
        match self.value {
            TargetAnnotationValue::Tag(_) => AnnotationKind::Tag,
            TargetAnnotationValue::Map(_) => AnnotationKind::Map,
            TargetAnnotationValue::Comment(_) => AnnotationKind::Comment,
            TargetAnnotationValue::Timestamp(_) => AnnotationKind::Timestamp,
            TargetAnnotationValue::Long(_) => AnnotationKind::Long,
            TargetAnnotationValue::File(_) => AnnotationKind::File,
            TargetAnnotationValue::Xml(_) => AnnotationKind::Xml,
        }
    }
}

/// What happened to one descriptor annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Created(TargetId),
    /// Already present in the identity map.
    Resolved,
    /// Deliberately not materialized; references to it are dropped.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationStats {
    pub created: usize,
    pub resolved: usize,
    pub skipped: usize,
}

pub struct AnnotationTranslator<'a, S: RemoteStore> {
    store: &'a S,
    config: &'a ResolvedConfig,
    image_map: &'a ImageMap,
    annotations: &'a [Annotation],
}

impl<'a, S: RemoteStore> AnnotationTranslator<'a, S> {
    /// `annotations` is the full collection, used to look up the path facts
    /// file annotations reference.
    pub fn new(
        store: &'a S,
        config: &'a ResolvedConfig,
        image_map: &'a ImageMap,
        annotations: &'a [Annotation],
    ) -> Self {
        Self {
            store,
            config,
            image_map,
            annotations,
        }
    }

    /// Materializes every annotation of the collection not yet in `identity`.
    pub fn create_annotations(
        &self,
        identity: &mut IdentityMap,
        consumed: &mut BTreeSet<SymbolicId>,
    ) -> Result<AnnotationStats, TransferError> {
        let mut stats = AnnotationStats::default();
        for annotation in self.annotations {
            match self.translate(annotation, identity)? {
                Translation::Created(id) => {
                    identity.insert(annotation.id.clone(), id)?;
                    stats.created += 1;
                }
                Translation::Resolved => stats.resolved += 1,
                Translation::Skipped => {
                    consumed.insert(annotation.id.clone());
                    stats.skipped += 1;
                }
            }
        }
        Ok(stats)
    }

    pub fn translate(
        &self,
        annotation: &Annotation,
        identity: &IdentityMap,
    ) -> Result<Translation, TransferError> {
        if identity.contains(&annotation.id) {
            return Ok(Translation::Resolved);
        }
        let Some(target) = self.target_for(annotation)? else {
            return Ok(Translation::Skipped);
        };
        let id = self.store.create_annotation(&target)?;
        Ok(Translation::Created(id))
    }

    fn target_for(&self, annotation: &Annotation) -> Result<Option<TargetAnnotation>, TransferError> {
        let value = match &annotation.body {
            AnnotationBody::Tag { value } => TargetAnnotationValue::Tag(value.clone()),
            AnnotationBody::Map { pairs } => TargetAnnotationValue::Map(
                pairs
                    .iter()
                    .map(|pair| (pair.key.clone(), pair.value.clone()))
                    .collect(),
            ),
            AnnotationBody::Comment { value } => TargetAnnotationValue::Comment(value.clone()),
            AnnotationBody::Timestamp { value } => TargetAnnotationValue::Timestamp(*value),
            AnnotationBody::Long { value } => TargetAnnotationValue::Long(*value),
            AnnotationBody::File { .. } => match self.upload_file(annotation)? {
                Some(file) => TargetAnnotationValue::File(file),
                None => return Ok(None),
            },
            AnnotationBody::Xml { value } => {
                if annotation.has_namespace(TRANSFER_NS) {
                    return self.transfer_metadata(value);
                }
                TargetAnnotationValue::Xml(xml::value_content(value)?)
            }
            AnnotationBody::Unsupported => {
                return Err(TransferError::UnsupportedAnnotation(annotation.id.to_string()));
            }
        };
        Ok(Some(TargetAnnotation {
            value,
            description: annotation.description.clone(),
            namespace: annotation.namespace.clone(),
        }))
    }

    /// Transfer-namespace XML: metadata becomes a key/value annotation, a
    /// server path fact produces nothing.
    fn transfer_metadata(&self, raw: &str) -> Result<Option<TargetAnnotation>, TransferError> {
        let Some(facts) = xml::transfer_metadata(raw)? else {
            return Ok(None);
        };
        let pairs = project_metadata(
            &facts,
            &self.config.metadata,
            self.config.checksum.as_deref().unwrap_or_default(),
        );
        Ok(Some(TargetAnnotation {
            value: TargetAnnotationValue::Map(pairs),
            description: None,
            namespace: Some(TRANSFER_NS.to_string()),
        }))
    }

    fn upload_file(&self, annotation: &Annotation) -> Result<Option<TargetId>, TransferError> {
        let is_figure = annotation.has_namespace(FIGURE_NS);
        if is_figure && !self.config.figure {
            tracing::debug!(annotation = %annotation.id, "figure import not requested, skipping");
            return Ok(None);
        }
        let server_path = provenance::server_path(&annotation.annotation_refs, self.annotations)?
            .ok_or_else(|| TransferError::MissingServerPath(annotation.id.to_string()))?;
        let local_path = fs_util::resolve_payload_path(&self.config.folder, &server_path);
        if is_figure {
            update_figure_refs(&local_path, self.image_map)?;
        }
        Ok(Some(self.store.upload_file(&local_path)?))
    }
}

/// Projects transfer-metadata facts onto the allow-list, in payload order.
///
/// An empty allow-list yields the single `empty_metadata` sentinel pair.
pub fn project_metadata(
    facts: &[(String, String)],
    allowed: &[MetadataField],
    checksum: &str,
) -> Vec<(String, String)> {
    if allowed.is_empty() {
        return vec![("empty_metadata".to_string(), "True".to_string())];
    }
    facts
        .iter()
        .filter_map(|(name, value)| {
            let field = MetadataField::from_element_name(name)?;
            if !allowed.contains(&field) {
                return None;
            }
            let value = match field {
                MetadataField::Md5 => checksum.to_string(),
                _ => value.clone(),
            };
            Some((name.clone(), value))
        })
        .collect()
}

fn image_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""imageId": (-?[0-9]+),"#).expect("valid imageId pattern"))
}

/// Rewrites figure image references to target ids; ids the image map does
/// not know become `-1`.
///
/// Ids that already name a target image and the `-1` sentinel are kept, so
/// a file rewritten by an earlier run comes out unchanged.
pub fn rewrite_figure_refs(content: &str, image_map: &ImageMap) -> String {
    let targets: BTreeSet<i64> = image_map.values().map(|target| target.get()).collect();
    let sources: BTreeMap<i64, i64> = image_map
        .iter()
        .filter_map(|(id, target)| Some((id.numeric_suffix()?, target.get())))
        .collect();
    image_id_pattern()
        .replace_all(content, |caps: &Captures<'_>| {
            let target = match caps[1].parse::<i64>() {
                Ok(id) if id == -1 || targets.contains(&id) => id,
                Ok(id) => sources.get(&id).copied().unwrap_or(-1),
                Err(_) => -1,
            };
            format!("\"imageId\": {target},")
        })
        .into_owned()
}

pub fn update_figure_refs(path: &Utf8Path, image_map: &ImageMap) -> Result<(), TransferError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| TransferError::Filesystem(format!("read {path}: {err}")))?;
    let rewritten = rewrite_figure_refs(&content, image_map);
    fs_util::write_atomic(path, rewritten.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_map() -> ImageMap {
        let mut map = ImageMap::new();
        map.insert("Image:5".parse().unwrap(), TargetId::new(105));
        map.insert("Image:6".parse().unwrap(), TargetId::new(106));
        map
    }

    #[test]
    fn rewrites_known_and_unknown_image_ids() {
        let content = r#"{"panels": [{"imageId": 5, "x": 1}, {"imageId": 9, "x": 2}, {"imageId": 6, "y": 0}]}"#;
        let rewritten = rewrite_figure_refs(content, &image_map());
        assert_eq!(
            rewritten,
            r#"{"panels": [{"imageId": 105, "x": 1}, {"imageId": -1, "x": 2}, {"imageId": 106, "y": 0}]}"#
        );
    }

    #[test]
    fn rewrite_does_not_chain_substitutions() {
        let mut map = ImageMap::new();
        map.insert("Image:1".parse().unwrap(), TargetId::new(20));
        map.insert("Image:20".parse().unwrap(), TargetId::new(30));
        let rewritten = rewrite_figure_refs(r#""imageId": 1, "imageId": 4,"#, &map);
        assert_eq!(rewritten, r#""imageId": 20, "imageId": -1,"#);
    }

    #[test]
    fn rewriting_twice_changes_nothing() {
        let content = r#"{"panels": [{"imageId": 5, "x": 1}, {"imageId": 9, "x": 2}]}"#;
        let once = rewrite_figure_refs(content, &image_map());
        assert_eq!(once, r#"{"panels": [{"imageId": 105, "x": 1}, {"imageId": -1, "x": 2}]}"#);
        assert_eq!(rewrite_figure_refs(&once, &image_map()), once);
    }

    #[test]
    fn target_ids_win_over_colliding_source_ids() {
        let mut map = ImageMap::new();
        map.insert("Image:1".parse().unwrap(), TargetId::new(2));
        map.insert("Image:2".parse().unwrap(), TargetId::new(3));
        let once = rewrite_figure_refs(r#""imageId": 1,"#, &map);
        assert_eq!(once, r#""imageId": 2,"#);
        assert_eq!(rewrite_figure_refs(&once, &map), once);
    }

    #[test]
    fn metadata_projection_follows_allow_list() {
        let facts = vec![
            ("md5".to_string(), "from-payload".to_string()),
            ("origin_image_id".to_string(), "12".to_string()),
            ("origin_hostname".to_string(), "omero.example.org".to_string()),
            ("unknown".to_string(), "x".to_string()),
        ];
        let pairs = project_metadata(
            &facts,
            &[MetadataField::Md5, MetadataField::Hostname],
            "abc123",
        );
        assert_eq!(
            pairs,
            vec![
                ("md5".to_string(), "abc123".to_string()),
                ("origin_hostname".to_string(), "omero.example.org".to_string()),
            ]
        );
    }

    #[test]
    fn empty_allow_list_yields_sentinel() {
        let pairs = project_metadata(&[], &[], "");
        assert_eq!(
            pairs,
            vec![("empty_metadata".to_string(), "True".to_string())]
        );
    }
}
