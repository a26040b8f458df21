use serde::{Deserialize, Serialize};

use crate::descriptor::{AffineTransform, Quantity, Shape, ShapeGeometry};
use crate::domain::{SymbolicId, TargetId};
use crate::error::TransferError;

/// Length as the target store models it: a value and a normalized unit name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Length {
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TargetGeometry {
    Point {
        x: f64,
        y: f64,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        marker_start: Option<String>,
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
        marker_start: Option<String>,
        marker_end: Option<String>,
    },
    Label {
        x: f64,
        y: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetShape {
    pub geometry: TargetGeometry,
    pub text_value: Option<String>,
    /// Packed RGBA, as in the descriptor.
    pub fill_color: Option<i32>,
    pub fill_rule: Option<String>,
    pub font_size: Option<Length>,
    pub font_style: Option<String>,
    pub locked: Option<bool>,
    pub stroke_color: Option<i32>,
    pub stroke_dash_array: Option<String>,
    pub stroke_width: Option<Length>,
    pub the_c: Option<u32>,
    pub the_t: Option<u32>,
    pub the_z: Option<u32>,
    pub transform: Option<AffineTransform>,
    #[serde(default)]
    pub annotation_ids: Vec<TargetId>,
}

/// Translates one descriptor shape. `roi` only labels the error.
pub fn translate_shape(shape: &Shape, roi: &SymbolicId) -> Result<TargetShape, TransferError> {
    let geometry = match &shape.geometry {
        ShapeGeometry::Point { x, y } => TargetGeometry::Point { x: *x, y: *y },
        ShapeGeometry::Line {
            x1,
            y1,
            x2,
            y2,
            marker_start,
            marker_end,
        } => TargetGeometry::Line {
            x1: *x1,
            y1: *y1,
            x2: *x2,
            y2: *y2,
            marker_start: marker_start.clone(),
            marker_end: marker_end.clone(),
        },
        ShapeGeometry::Rectangle {
            x,
            y,
            width,
            height,
        } => TargetGeometry::Rectangle {
            x: *x,
            y: *y,
            width: *width,
            height: *height,
        },
        ShapeGeometry::Ellipse {
            x,
            y,
            radius_x,
            radius_y,
        } => TargetGeometry::Ellipse {
            x: *x,
            y: *y,
            radius_x: *radius_x,
            radius_y: *radius_y,
        },
        ShapeGeometry::Polygon { points } => TargetGeometry::Polygon {
            points: points.clone(),
        },
        ShapeGeometry::Polyline {
            points,
            marker_start,
            marker_end,
        } => TargetGeometry::Polyline {
            points: points.clone(),
            marker_start: marker_start.clone(),
            marker_end: marker_end.clone(),
        },
        ShapeGeometry::Label { x, y } => TargetGeometry::Label { x: *x, y: *y },
        ShapeGeometry::Unsupported => {
            return Err(TransferError::UnsupportedShape {
                roi: roi.to_string(),
            });
        }
    };

    Ok(TargetShape {
        geometry,
        text_value: shape.text.clone().filter(|text| !text.is_empty()),
        fill_color: shape.fill_color,
        fill_rule: shape.fill_rule.clone(),
        font_size: shape.font_size.as_ref().map(quantity_to_length),
        font_style: shape.font_style.clone(),
        locked: shape.locked,
        stroke_color: shape.stroke_color,
        stroke_dash_array: shape.stroke_dash_array.clone(),
        stroke_width: shape.stroke_width.as_ref().map(quantity_to_length),
        the_c: shape.the_c,
        the_t: shape.the_t,
        the_z: shape.the_z,
        transform: shape.transform,
        annotation_ids: Vec::new(),
    })
}

/// `micro_meter` becomes `MICROMETER`.
pub fn normalize_unit(unit: &str) -> String {
    unit.to_uppercase().replace('_', "")
}

pub fn quantity_to_length(quantity: &Quantity) -> Length {
    Length {
        value: quantity.value,
        unit: normalize_unit(&quantity.unit),
    }
}

/// Descriptor view of a stored shape, as the store describes it back.
pub fn shape_from_target(id: SymbolicId, shape: &TargetShape) -> Shape {
    let geometry = match &shape.geometry {
        TargetGeometry::Point { x, y } => ShapeGeometry::Point { x: *x, y: *y },
        TargetGeometry::Line {
            x1,
            y1,
            x2,
            y2,
            marker_start,
            marker_end,
        } => ShapeGeometry::Line {
            x1: *x1,
            y1: *y1,
            x2: *x2,
            y2: *y2,
            marker_start: marker_start.clone(),
            marker_end: marker_end.clone(),
        },
        TargetGeometry::Rectangle {
            x,
            y,
            width,
            height,
        } => ShapeGeometry::Rectangle {
            x: *x,
            y: *y,
            width: *width,
            height: *height,
        },
        TargetGeometry::Ellipse {
            x,
            y,
            radius_x,
            radius_y,
        } => ShapeGeometry::Ellipse {
            x: *x,
            y: *y,
            radius_x: *radius_x,
            radius_y: *radius_y,
        },
        TargetGeometry::Polygon { points } => ShapeGeometry::Polygon {
            points: points.clone(),
        },
        TargetGeometry::Polyline {
            points,
            marker_start,
            marker_end,
        } => ShapeGeometry::Polyline {
            points: points.clone(),
            marker_start: marker_start.clone(),
            marker_end: marker_end.clone(),
        },
        TargetGeometry::Label { x, y } => ShapeGeometry::Label { x: *x, y: *y },
    };
    let quantity = |length: &Length| Quantity {
        value: length.value,
        unit: length.unit.clone(),
    };

    Shape {
        id,
        geometry,
        text: shape.text_value.clone(),
        fill_color: shape.fill_color,
        fill_rule: shape.fill_rule.clone(),
        font_size: shape.font_size.as_ref().map(quantity),
        font_style: shape.font_style.clone(),
        locked: shape.locked,
        stroke_color: shape.stroke_color,
        stroke_dash_array: shape.stroke_dash_array.clone(),
        stroke_width: shape.stroke_width.as_ref().map(quantity),
        the_c: shape.the_c,
        the_t: shape.the_t,
        the_z: shape.the_z,
        transform: shape.transform,
        annotation_refs: Vec::new(),
    }
}
