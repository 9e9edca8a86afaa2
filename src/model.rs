//! Entity data model.
//!
//! Five entity kinds live in the local store: [`Project`], [`Image`],
//! [`LabelClass`], [`Label`] and [`Example`]. Identities are UUID strings,
//! immutable once assigned. Timestamps serialize as ISO-8601 text and are
//! monotonically non-decreasing per entity (`updated_at >= created_at`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::Polygon;

/// Entity kind names used in integrity errors and sync intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Project,
    Image,
    LabelClass,
    Label,
    Example,
}

impl EntityKind {
    /// The name used in user-facing messages ("The image id {id} doesn't exist.").
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Image => "image",
            EntityKind::LabelClass => "labelClass",
            EntityKind::Label => "label",
            EntityKind::Example => "example",
        }
    }
}

/// Generate a fresh entity id.
pub fn new_entity_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// An annotation project. Owns images and label classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier.
    pub id: String,
    /// Display name of the project.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An image belonging to a project.
///
/// `width`/`height` are probed at creation and immutable afterwards; they
/// define the coordinate bounds for every label on this image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Unique identifier.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Durable content location.
    pub url: String,
    /// Original remote location, when the image was ingested from one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    /// Logical path of the image within the project.
    pub path: String,
    /// Display name.
    pub name: String,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// Content mimetype (e.g. "image/png").
    pub mimetype: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A label class within a project (e.g. "car", "pedestrian").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelClass {
    /// Unique identifier.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Display name of the class.
    pub name: String,
    /// Display color as a hex string (e.g. "#ff0000").
    pub color: String,
    /// Optional keyboard shortcut for the labeling tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The shape kind of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LabelType {
    /// A single point marker.
    Point,
    /// An axis-aligned box.
    Box,
    /// A free-form polygon.
    #[default]
    Polygon,
}

/// A geometric label on an image.
///
/// The geometry is always fully contained within the owning image's
/// [0,width]x[0,height] rectangle, and the bbox fields are the axis-aligned
/// bounds of the (possibly clipped) geometry. Neither is independently
/// settable; both are derived by the repository on create/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// Unique identifier.
    pub id: String,
    /// Owning image.
    pub image_id: String,
    /// Class of this label, when assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_class_id: Option<String>,
    /// Shape kind tag.
    #[serde(rename = "type")]
    pub label_type: LabelType,
    /// Clipped polygon in image pixel coordinates.
    pub geometry: Polygon,
    /// Derived bounding box minimum X.
    pub x: f64,
    /// Derived bounding box minimum Y.
    pub y: f64,
    /// Derived bounding box width.
    pub width: f64,
    /// Derived bounding box height.
    pub height: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal entity used only to exercise generic repository behavior
/// (pagination, counting). No domain semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Unique identifier.
    pub id: String,
    /// Arbitrary name.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
