//! Typed descriptor graph: the metadata side of a transfer package.
//!
//! Nodes reference each other through [`Reference`]s holding symbolic ids;
//! structured annotations live in one flat collection on [`Ome`] and are only
//! ever referenced. `Clone` is the deep copy used before any rewrite.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::SymbolicId;
use crate::error::TransferError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ome {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<Project>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasets: Vec<Dataset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screens: Vec<Screen>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plates: Vec<Plate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rois: Vec<Roi>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structured_annotations: Vec<Annotation>,
}

impl Ome {
    pub fn from_json_str(content: &str) -> Result<Self, TransferError> {
        serde_json::from_str(content).map_err(|err| TransferError::DescriptorParse(err.to_string()))
    }

    pub fn from_json_path(path: &Path) -> Result<Self, TransferError> {
        let content = fs::read_to_string(path)
            .map_err(|err| TransferError::Filesystem(format!("read {}: {err}", path.display())))?;
        Self::from_json_str(&content)
    }

    pub fn annotation(&self, id: &SymbolicId) -> Option<&Annotation> {
        self.structured_annotations.iter().find(|ann| &ann.id == id)
    }

    pub fn roi(&self, id: &SymbolicId) -> Option<&Roi> {
        self.rois.iter().find(|roi| &roi.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: SymbolicId,
}

impl Reference {
    pub fn new(id: SymbolicId) -> Self {
        Self { id }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: SymbolicId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dataset_refs: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_refs: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: SymbolicId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_refs: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_refs: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub id: SymbolicId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plate_refs: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_refs: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    pub id: SymbolicId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wells: Vec<Well>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_refs: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Well {
    pub id: SymbolicId,
    pub row: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub well_samples: Vec<WellSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_refs: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellSample {
    pub id: SymbolicId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: SymbolicId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roi_refs: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_refs: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub id: SymbolicId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shapes: Vec<Shape>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_refs: Vec<Reference>,
}

/// A value with a physical unit, e.g. a font size in points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a00: f64,
    pub a10: f64,
    pub a01: f64,
    pub a11: f64,
    pub a02: f64,
    pub a12: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub id: SymbolicId,
    pub geometry: ShapeGeometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_dash_array: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub the_c: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub the_t: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub the_z: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<AffineTransform>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_refs: Vec<Reference>,
}

impl Shape {
    /// Shape with the given geometry and no style attributes.
    pub fn plain(id: SymbolicId, geometry: ShapeGeometry) -> Self {
        Self {
            id,
            geometry,
            text: None,
            fill_color: None,
            fill_rule: None,
            font_size: None,
            font_style: None,
            locked: None,
            stroke_color: None,
            stroke_dash_array: None,
            stroke_width: None,
            the_c: None,
            the_t: None,
            the_z: None,
            transform: None,
            annotation_refs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ShapeGeometry {
    Point {
        x: f64,
        y: f64,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        marker_start: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        marker_end: Option<String>,
    },
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Ellipse {
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
    },
    Polygon {
        points: String,
    },
    Polyline {
        points: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        marker_start: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        marker_end: Option<String>,
    },
    Label {
        x: f64,
        y: f64,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: SymbolicId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_refs: Vec<Reference>,
    pub body: AnnotationBody,
}

impl Annotation {
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespace.as_deref() == Some(namespace)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnnotationBody {
    Tag {
        value: String,
    },
    Map {
        #[serde(default)]
        pairs: Vec<MapPair>,
    },
    Comment {
        value: String,
    },
    Timestamp {
        value: DateTime<Utc>,
    },
    Long {
        value: i64,
    },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
    /// `value` is the serialized `<Value>` element as it appears in OME-XML.
    Xml {
        value: String,
    },
    #[serde(other)]
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_descriptor_json() {
        let json = r#"{
            "images": [{"id": "Image:1", "name": "a.tif", "annotation_refs": [{"id": "Annotation:1"}]}],
            "structured_annotations": [
                {"id": "Annotation:1", "namespace": "ns", "body": {"type": "Tag", "value": "t"}},
                {"id": "Annotation:2", "body": {"type": "Boolean", "value": true}}
            ],
            "rois": [{"id": "ROI:1", "shapes": [
                {"id": "Shape:1", "geometry": {"type": "Point", "x": 1.0, "y": 2.0}},
                {"id": "Shape:2", "geometry": {"type": "Mask"}}
            ]}]
        }"#;
        let ome = Ome::from_json_str(json).unwrap();
        assert_eq!(ome.images[0].annotation_refs.len(), 1);
        assert!(ome.structured_annotations[0].has_namespace("ns"));
        assert_eq!(ome.structured_annotations[1].body, AnnotationBody::Unsupported);
        assert_eq!(ome.rois[0].shapes[1].geometry, ShapeGeometry::Unsupported);
    }

    #[test]
    fn empty_fields_are_omitted() {
        let shape = Shape::plain(
            "Shape:1".parse().unwrap(),
            ShapeGeometry::Point { x: 1.0, y: 2.0 },
        );
        let json = serde_json::to_string(&shape).unwrap();
        assert_eq!(
            json,
            r#"{"id":"Shape:1","geometry":{"type":"Point","x":1.0,"y":2.0}}"#
        );
    }
}
