//! labelstore - offline-first annotation repository.
//!
//! Geometric image labels (polygons, boxes, points) organized into projects,
//! label classes and images, stored in a local constraint-free table set.
//! The repository enforces referential integrity and geometric validity in
//! application code, and the history engine makes every mutating action
//! reversible while staying consistent with an asynchronous remote
//! synchronization layer.
//!
//! Write path: caller -> [`history::HistoryEngine`] (optional) ->
//! [`repository::Repository`] -> integrity guard -> geometry clipper ->
//! local store, plus a fire-and-forget [`sync::SyncIntent`]. Reads go
//! straight to the repository.

pub mod effects;
pub mod error;
pub mod export;
pub mod geometry;
pub mod history;
pub mod integrity;
pub mod model;
pub mod repository;
pub mod store;
pub mod sync;
pub mod upload;

pub use error::{Error, Result};
pub use geometry::{BoundedGeometry, BoundingBox, Point, Polygon, clip_to_bounds};
pub use history::{Effect, HistoryEngine};
pub use model::{EntityKind, Example, Image, Label, LabelClass, LabelType, Project};
pub use repository::{
    ExampleCreate, ImageCreate, ImageFilter, ImageSource, ImageUpdate, LabelClassCreate,
    LabelClassFilter, LabelClassUpdate, LabelCreate, LabelFilter, LabelUpdate, ProjectCreate,
    Repository,
};
pub use sync::{NullSync, RecordingSync, RemoteSync, SyncAck, SyncIntent, SyncOp};
pub use upload::{MemoryUploadService, UploadService, UploadUnsupported};
