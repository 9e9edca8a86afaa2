//! Entity repository.
//!
//! Owns the local store and exposes CRUD plus paginated list/count per
//! entity kind. Every mutation validates its foreign keys through the
//! integrity guard and (for labels) runs the geometry clipper before
//! anything is written, so no dangling reference or out-of-bounds geometry
//! is ever persisted. Each read-validate-write sequence runs inside a single
//! store-lock scope, so no partially-written entity is observable by a
//! concurrent read.
//!
//! Successful image/label mutations are announced to the remote-sync
//! collaborator without blocking; local durability never waits on the
//! remote.

use std::io::Cursor;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::geometry::{Polygon, clip_to_bounds};
use crate::integrity;
use crate::model::{
    EntityKind, Example, Image, Label, LabelClass, LabelType, Project, new_entity_id,
};
use crate::store::{LocalStore, paginate};
use crate::sync::{NullSync, RemoteSync, SyncAck, SyncIntent, SyncOp};
use crate::upload::{UploadService, UploadUnsupported, storage_key};

// ============================================================================
// Input types
// ============================================================================

/// Input for project creation.
#[derive(Debug, Clone, Default)]
pub struct ProjectCreate {
    /// Caller-supplied id; generated when absent.
    pub id: Option<String>,
    pub name: String,
}

/// Where the image content comes from. Exactly one source per creation;
/// invalid combinations are unrepresentable.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Raw file content supplied by the caller; uploaded via the transfer
    /// service.
    File { bytes: Vec<u8> },
    /// Remote location to fetch from, then re-upload for durability.
    ExternalUrl(String),
    /// Already-durable direct url, stored as-is.
    Url(String),
}

/// Input for image creation.
#[derive(Debug, Clone)]
pub struct ImageCreate {
    /// Caller-supplied id; generated when absent.
    pub id: Option<String>,
    pub project_id: String,
    pub source: ImageSource,
    /// Display name; derived from the url when absent.
    pub name: Option<String>,
    /// Logical path; defaults to the external url or final url.
    pub path: Option<String>,
    /// Pixel width; probed from the content when absent.
    pub width: Option<u32>,
    /// Pixel height; probed from the content when absent.
    pub height: Option<u32>,
    /// Mimetype; probed from the content when absent.
    pub mimetype: Option<String>,
}

/// Partial update for an image. Dimensions and content are immutable;
/// only display/path metadata can change.
#[derive(Debug, Clone, Default)]
pub struct ImageUpdate {
    pub name: Option<String>,
    pub path: Option<String>,
}

/// Input for label class creation.
#[derive(Debug, Clone)]
pub struct LabelClassCreate {
    /// Caller-supplied id; generated when absent.
    pub id: Option<String>,
    pub project_id: String,
    pub name: String,
    /// Display color as a hex string.
    pub color: String,
    pub shortcut: Option<String>,
}

/// Partial update for a label class. `shortcut: Some(None)` clears the
/// shortcut.
#[derive(Debug, Clone, Default)]
pub struct LabelClassUpdate {
    pub name: Option<String>,
    pub color: Option<String>,
    pub shortcut: Option<Option<String>>,
}

/// Input for label creation.
#[derive(Debug, Clone)]
pub struct LabelCreate {
    /// Caller-supplied id; generated when absent. The command-history
    /// engine supplies the cached id on redo.
    pub id: Option<String>,
    pub image_id: String,
    pub label_class_id: Option<String>,
    /// Polygon in image pixel coordinates; clipped before persistence.
    pub geometry: Polygon,
    /// Shape tag; defaults to [`LabelType::Polygon`].
    pub label_type: Option<LabelType>,
}

/// Partial update for a label. `None` fields are left untouched;
/// `label_class_id: Some(None)` clears the class.
#[derive(Debug, Clone, Default)]
pub struct LabelUpdate {
    /// New geometry; re-clipped against the owning image when present.
    pub geometry: Option<Polygon>,
    /// New class assignment; validated when present and non-null.
    pub label_class_id: Option<Option<String>>,
    pub label_type: Option<LabelType>,
}

/// Input for example creation.
#[derive(Debug, Clone, Default)]
pub struct ExampleCreate {
    /// Caller-supplied id; generated when absent.
    pub id: Option<String>,
    pub name: String,
}

/// Equality filter for image queries.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub project_id: Option<String>,
}

/// Equality filter for label class queries.
#[derive(Debug, Clone, Default)]
pub struct LabelClassFilter {
    pub project_id: Option<String>,
}

/// Equality filter for label queries. `project_id` matches labels whose
/// owning image belongs to the project.
#[derive(Debug, Clone, Default)]
pub struct LabelFilter {
    pub image_id: Option<String>,
    pub project_id: Option<String>,
}

// ============================================================================
// Repository
// ============================================================================

/// The annotation repository.
///
/// Cheap to share: wrap in an [`Arc`] and clone the handle. All methods are
/// async and report errors synchronously to the caller that triggered them.
pub struct Repository {
    store: Mutex<LocalStore>,
    upload: Arc<dyn UploadService>,
    sync: Arc<dyn RemoteSync>,
}

impl Default for Repository {
    /// Purely local repository: no upload support, sync intents dropped.
    fn default() -> Self {
        Self::new(Arc::new(UploadUnsupported), Arc::new(NullSync))
    }
}

impl Repository {
    pub fn new(upload: Arc<dyn UploadService>, sync: Arc<dyn RemoteSync>) -> Self {
        Self {
            store: Mutex::new(LocalStore::new()),
            upload,
            sync,
        }
    }

    /// Announce a successful mutation to the remote-sync layer.
    /// Non-blocking; the collaborator owns delivery and retries.
    fn publish(&self, kind: EntityKind, op: SyncOp, id: &str) {
        let entity_id = id.to_string();
        let kind_name = kind.as_str();
        self.sync.publish(
            SyncIntent::new(kind, op, id),
            Box::new(move |ack| {
                if let SyncAck::Rejected { reason } = ack {
                    log::warn!("Remote rejected {kind_name} {entity_id}: {reason}");
                }
            }),
        );
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub async fn create_project(&self, data: ProjectCreate) -> Result<Project> {
        let mut store = self.store.lock().await;
        let id = data.id.unwrap_or_else(new_entity_id);
        if store.projects.contains(&id) {
            return Err(Error::invalid_input(format!(
                "A project with id {id} already exists"
            )));
        }

        let now = Utc::now();
        let project = Project {
            id: id.clone(),
            name: data.name,
            created_at: now,
            updated_at: now,
        };
        store.projects.insert(id.clone(), project.clone());
        log::debug!("Created project {id}");
        Ok(project)
    }

    pub async fn project(&self, id: &str) -> Result<Project> {
        let store = self.store.lock().await;
        integrity::require_project(&store, id).cloned()
    }

    pub async fn update_project(&self, id: &str, name: String) -> Result<Project> {
        let mut store = self.store.lock().await;
        let mut project = integrity::require_project(&store, id)?.clone();
        project.name = name;
        project.updated_at = Utc::now().max(project.created_at);
        store.projects.insert(id.to_string(), project.clone());
        Ok(project)
    }

    /// Remove a project and return it. Owned images and label classes are
    /// left in place; cascade is a caller responsibility.
    pub async fn delete_project(&self, id: &str) -> Result<Project> {
        let mut store = self.store.lock().await;
        let project = store
            .projects
            .remove(id)
            .ok_or_else(|| Error::not_found(EntityKind::Project.as_str(), id))?;
        log::debug!("Deleted project {id}");
        Ok(project)
    }

    pub async fn list_projects(&self, skip: Option<usize>, first: Option<usize>) -> Vec<Project> {
        let store = self.store.lock().await;
        paginate(store.projects.iter(), skip, first)
    }

    pub async fn count_projects(&self) -> usize {
        self.store.lock().await.projects.len()
    }

    // ========================================================================
    // Images
    // ========================================================================

    /// Create an image from one of the three content sources.
    ///
    /// File and external-url sources go through the upload collaborator to
    /// obtain a durable url. Dimensions and mimetype are probed from the
    /// content when not supplied; a url-only creation without supplied
    /// dimensions fetches the content for probing.
    pub async fn create_image(&self, data: ImageCreate) -> Result<Image> {
        // Validate the project reference before any upload work.
        {
            let store = self.store.lock().await;
            integrity::require_project(&store, &data.project_id)?;
            if let Some(id) = &data.id {
                if store.images.contains(id) {
                    return Err(Error::invalid_input(format!(
                        "An image with id {id} already exists"
                    )));
                }
            }
        }

        let id = data.id.unwrap_or_else(new_entity_id);

        let (url, external_url, bytes) = match data.source {
            ImageSource::Url(url) => (url, None, None),
            ImageSource::ExternalUrl(external) => {
                let bytes = self.upload.fetch(&external).await?;
                let mimetype = data
                    .mimetype
                    .clone()
                    .map(Ok)
                    .unwrap_or_else(|| probe_bytes(&bytes).map(|probed| probed.mimetype))?;
                let key = storage_key(&data.project_id, &id, &mimetype);
                let url = self.upload.upload(&key, bytes.clone()).await?;
                (url, Some(external), Some(bytes))
            }
            ImageSource::File { bytes } => {
                let mimetype = data
                    .mimetype
                    .clone()
                    .map(Ok)
                    .unwrap_or_else(|| probe_bytes(&bytes).map(|probed| probed.mimetype))?;
                let key = storage_key(&data.project_id, &id, &mimetype);
                let url = self.upload.upload(&key, bytes.clone()).await?;
                (url, None, Some(bytes))
            }
        };

        // Probe whatever the caller didn't supply.
        let (width, height, mimetype) = match (data.width, data.height, data.mimetype) {
            (Some(w), Some(h), Some(m)) => (w, h, m),
            (width, height, mimetype) => {
                let bytes = match bytes {
                    Some(bytes) => bytes,
                    None => self.upload.fetch(&url).await?,
                };
                let probed = probe_bytes(&bytes)?;
                (
                    width.unwrap_or(probed.width),
                    height.unwrap_or(probed.height),
                    mimetype.unwrap_or(probed.mimetype),
                )
            }
        };

        let name = data
            .name
            .or_else(|| external_url.as_deref().map(name_from_url))
            .unwrap_or_else(|| name_from_url(&url));
        let path = data
            .path
            .or_else(|| external_url.clone())
            .unwrap_or_else(|| url.clone());

        let now = Utc::now();
        let image = Image {
            id: id.clone(),
            project_id: data.project_id,
            url,
            external_url,
            path,
            name,
            width,
            height,
            mimetype,
            created_at: now,
            updated_at: now,
        };

        {
            // The lock was released across the upload/probe awaits, so a
            // concurrent create may have won the id in the meantime.
            // Re-check before inserting; a plain insert would replace the
            // winner's row in place.
            let mut store = self.store.lock().await;
            integrity::require_project(&store, &image.project_id)?;
            if store.images.contains(&id) {
                return Err(Error::invalid_input(format!(
                    "An image with id {id} already exists"
                )));
            }
            store.images.insert(id.clone(), image.clone());
        }
        log::debug!("Created image {id} ({width}x{height})");
        self.publish(EntityKind::Image, SyncOp::Create, &id);
        Ok(image)
    }

    pub async fn image(&self, id: &str) -> Result<Image> {
        let store = self.store.lock().await;
        integrity::require_image(&store, id).cloned()
    }

    /// Apply a partial metadata update. Content, dimensions and mimetype
    /// are immutable after creation.
    pub async fn update_image(&self, id: &str, patch: ImageUpdate) -> Result<Image> {
        let image = {
            let mut store = self.store.lock().await;
            let mut image = integrity::require_image(&store, id)?.clone();
            if let Some(name) = patch.name {
                image.name = name;
            }
            if let Some(path) = patch.path {
                image.path = path;
            }
            image.updated_at = Utc::now().max(image.created_at);
            store.images.insert(id.to_string(), image.clone());
            image
        };
        self.publish(EntityKind::Image, SyncOp::Update, id);
        Ok(image)
    }

    /// Remove an image and return it. Labels on the image are left in
    /// place; cascade is a caller responsibility.
    pub async fn delete_image(&self, id: &str) -> Result<Image> {
        let image = {
            let mut store = self.store.lock().await;
            store
                .images
                .remove(id)
                .ok_or_else(|| Error::not_found(EntityKind::Image.as_str(), id))?
        };
        log::debug!("Deleted image {id}");
        self.publish(EntityKind::Image, SyncOp::Delete, id);
        Ok(image)
    }

    pub async fn list_images(
        &self,
        filter: ImageFilter,
        skip: Option<usize>,
        first: Option<usize>,
    ) -> Vec<Image> {
        let store = self.store.lock().await;
        let rows = store
            .images
            .iter()
            .filter(|image| match &filter.project_id {
                Some(project_id) => image.project_id == *project_id,
                None => true,
            });
        paginate(rows, skip, first)
    }

    pub async fn count_images(&self, filter: ImageFilter) -> usize {
        let store = self.store.lock().await;
        store
            .images
            .iter()
            .filter(|image| match &filter.project_id {
                Some(project_id) => image.project_id == *project_id,
                None => true,
            })
            .count()
    }

    // ========================================================================
    // Label classes
    // ========================================================================

    pub async fn create_label_class(&self, data: LabelClassCreate) -> Result<LabelClass> {
        let mut store = self.store.lock().await;
        integrity::require_project(&store, &data.project_id)?;

        let id = data.id.unwrap_or_else(new_entity_id);
        if store.label_classes.contains(&id) {
            return Err(Error::invalid_input(format!(
                "A label class with id {id} already exists"
            )));
        }

        let now = Utc::now();
        let label_class = LabelClass {
            id: id.clone(),
            project_id: data.project_id,
            name: data.name,
            color: data.color,
            shortcut: data.shortcut,
            created_at: now,
            updated_at: now,
        };
        store.label_classes.insert(id.clone(), label_class.clone());
        log::debug!("Created label class {id}");
        Ok(label_class)
    }

    pub async fn label_class(&self, id: &str) -> Result<LabelClass> {
        let store = self.store.lock().await;
        integrity::require_label_class(&store, id).cloned()
    }

    /// Apply a partial update. `shortcut: Some(None)` clears the shortcut.
    pub async fn update_label_class(
        &self,
        id: &str,
        patch: LabelClassUpdate,
    ) -> Result<LabelClass> {
        let mut store = self.store.lock().await;
        let mut label_class = integrity::require_label_class(&store, id)?.clone();
        if let Some(name) = patch.name {
            label_class.name = name;
        }
        if let Some(color) = patch.color {
            label_class.color = color;
        }
        if let Some(shortcut) = patch.shortcut {
            label_class.shortcut = shortcut;
        }
        label_class.updated_at = Utc::now().max(label_class.created_at);
        store.label_classes.insert(id.to_string(), label_class.clone());
        Ok(label_class)
    }

    /// Remove a label class and return it. Labels referencing it keep their
    /// now-dangling `label_class_id`; cascade is a caller responsibility.
    pub async fn delete_label_class(&self, id: &str) -> Result<LabelClass> {
        let mut store = self.store.lock().await;
        store
            .label_classes
            .remove(id)
            .ok_or_else(|| Error::not_found(EntityKind::LabelClass.as_str(), id))
    }

    pub async fn list_label_classes(
        &self,
        filter: LabelClassFilter,
        skip: Option<usize>,
        first: Option<usize>,
    ) -> Vec<LabelClass> {
        let store = self.store.lock().await;
        let rows = store
            .label_classes
            .iter()
            .filter(|class| match &filter.project_id {
                Some(project_id) => class.project_id == *project_id,
                None => true,
            });
        paginate(rows, skip, first)
    }

    pub async fn count_label_classes(&self, filter: LabelClassFilter) -> usize {
        let store = self.store.lock().await;
        store
            .label_classes
            .iter()
            .filter(|class| match &filter.project_id {
                Some(project_id) => class.project_id == *project_id,
                None => true,
            })
            .count()
    }

    // ========================================================================
    // Labels
    // ========================================================================

    /// Create a label. The image reference (and class reference when
    /// present) must resolve, and the geometry is clipped to the image
    /// bounds; the stored bbox is derived from the clipped geometry.
    pub async fn create_label(&self, data: LabelCreate) -> Result<Label> {
        let label = {
            let mut store = self.store.lock().await;

            // The store has no constraint checks, so resolve both foreign
            // keys before writing anything.
            let image = integrity::require_image(&store, &data.image_id)?.clone();
            if let Some(class_id) = &data.label_class_id {
                integrity::require_label_class(&store, class_id)?;
            }

            let bounded = clip_to_bounds(image.width, image.height, &data.geometry)?;

            let id = data.id.unwrap_or_else(new_entity_id);
            if store.labels.contains(&id) {
                return Err(Error::invalid_input(format!(
                    "A label with id {id} already exists"
                )));
            }

            let now = Utc::now();
            let label = Label {
                id: id.clone(),
                image_id: data.image_id,
                label_class_id: data.label_class_id,
                label_type: data.label_type.unwrap_or_default(),
                geometry: bounded.geometry,
                x: bounded.x,
                y: bounded.y,
                width: bounded.width,
                height: bounded.height,
                created_at: now,
                updated_at: now,
            };
            store.labels.insert(id, label.clone());
            label
        };

        log::debug!("Created label {} on image {}", label.id, label.image_id);
        self.publish(EntityKind::Label, SyncOp::Create, &label.id);
        Ok(label)
    }

    pub async fn label(&self, id: &str) -> Result<Label> {
        let store = self.store.lock().await;
        integrity::require_label(&store, id).cloned()
    }

    /// Apply a partial update. A new geometry re-resolves the owning image
    /// and re-clips; a new class reference is re-validated. Returns the
    /// fully resolved post-update label.
    pub async fn update_label(&self, id: &str, patch: LabelUpdate) -> Result<Label> {
        let label = {
            let mut store = self.store.lock().await;
            let mut label = integrity::require_label(&store, id)?.clone();

            if let Some(Some(class_id)) = &patch.label_class_id {
                integrity::require_label_class(&store, class_id)?;
            }

            if let Some(geometry) = &patch.geometry {
                let image = integrity::require_image(&store, &label.image_id)?.clone();
                let bounded = clip_to_bounds(image.width, image.height, geometry)?;
                label.geometry = bounded.geometry;
                label.x = bounded.x;
                label.y = bounded.y;
                label.width = bounded.width;
                label.height = bounded.height;
            }

            if let Some(class_id) = patch.label_class_id {
                label.label_class_id = class_id;
            }
            if let Some(label_type) = patch.label_type {
                label.label_type = label_type;
            }
            label.updated_at = Utc::now().max(label.created_at);

            store.labels.insert(id.to_string(), label.clone());
            label
        };

        log::debug!("Updated label {id}");
        self.publish(EntityKind::Label, SyncOp::Update, id);
        Ok(label)
    }

    /// Remove a label and return the deleted record.
    pub async fn delete_label(&self, id: &str) -> Result<Label> {
        let label = {
            let mut store = self.store.lock().await;
            store
                .labels
                .remove(id)
                .ok_or_else(|| Error::not_found(EntityKind::Label.as_str(), id))?
        };
        log::debug!("Deleted label {id}");
        self.publish(EntityKind::Label, SyncOp::Delete, id);
        Ok(label)
    }

    pub async fn list_labels(
        &self,
        filter: LabelFilter,
        skip: Option<usize>,
        first: Option<usize>,
    ) -> Vec<Label> {
        let store = self.store.lock().await;
        let rows = store
            .labels
            .iter()
            .filter(|label| label_matches(&store, label, &filter));
        paginate(rows, skip, first)
    }

    pub async fn count_labels(&self, filter: LabelFilter) -> usize {
        let store = self.store.lock().await;
        store
            .labels
            .iter()
            .filter(|label| label_matches(&store, label, &filter))
            .count()
    }

    // ========================================================================
    // Examples
    // ========================================================================

    pub async fn create_example(&self, data: ExampleCreate) -> Result<Example> {
        let mut store = self.store.lock().await;
        let id = data.id.unwrap_or_else(new_entity_id);
        if store.examples.contains(&id) {
            return Err(Error::invalid_input(format!(
                "An example with id {id} already exists"
            )));
        }

        let now = Utc::now();
        let example = Example {
            id: id.clone(),
            name: data.name,
            created_at: now,
            updated_at: now,
        };
        store.examples.insert(id, example.clone());
        Ok(example)
    }

    pub async fn example(&self, id: &str) -> Result<Example> {
        let store = self.store.lock().await;
        store
            .examples
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Example.as_str(), id))
    }

    pub async fn update_example(&self, id: &str, name: String) -> Result<Example> {
        let mut store = self.store.lock().await;
        let mut example = store
            .examples
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Example.as_str(), id))?;
        example.name = name;
        example.updated_at = Utc::now().max(example.created_at);
        store.examples.insert(id.to_string(), example.clone());
        Ok(example)
    }

    /// Remove an example and return it.
    pub async fn delete_example(&self, id: &str) -> Result<Example> {
        let mut store = self.store.lock().await;
        store
            .examples
            .remove(id)
            .ok_or_else(|| Error::not_found(EntityKind::Example.as_str(), id))
    }

    pub async fn list_examples(&self, skip: Option<usize>, first: Option<usize>) -> Vec<Example> {
        let store = self.store.lock().await;
        paginate(store.examples.iter(), skip, first)
    }

    pub async fn count_examples(&self) -> usize {
        self.store.lock().await.examples.len()
    }
}

/// Filter predicate for labels. A `project_id` filter matches through the
/// owning image.
fn label_matches(store: &LocalStore, label: &Label, filter: &LabelFilter) -> bool {
    if let Some(image_id) = &filter.image_id {
        if label.image_id != *image_id {
            return false;
        }
    }
    if let Some(project_id) = &filter.project_id {
        match store.images.get(&label.image_id) {
            Some(image) => {
                if image.project_id != *project_id {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

/// Dimensions and mimetype probed from image content.
struct ProbedImage {
    width: u32,
    height: u32,
    mimetype: String,
}

/// Probe image bytes for dimensions and mimetype without a full decode.
fn probe_bytes(bytes: &[u8]) -> Result<ProbedImage> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    let mimetype = reader
        .format()
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let (width, height) = reader.into_dimensions()?;
    Ok(ProbedImage {
        width,
        height,
        mimetype,
    })
}

/// Derive a display name from the trailing url segment, query string
/// stripped.
fn name_from_url(url: &str) -> String {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(without_query)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::RecordingSync;
    use crate::upload::MemoryUploadService;

    fn test_png() -> Vec<u8> {
        // 1x1 transparent PNG.
        let mut bytes = Vec::new();
        let img = image::RgbaImage::new(1, 1);
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("png encode failed");
        bytes
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
        Polygon::from_coords(&[(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    async fn repo_with_image(width: u32, height: u32) -> (Arc<Repository>, String, String) {
        let repo = Arc::new(Repository::default());
        let project = repo
            .create_project(ProjectCreate {
                id: None,
                name: "test project".into(),
            })
            .await
            .unwrap();
        let image = repo
            .create_image(ImageCreate {
                id: None,
                project_id: project.id.clone(),
                source: ImageSource::Url("mem://test/image.png".into()),
                name: None,
                path: None,
                width: Some(width),
                height: Some(height),
                mimetype: Some("image/png".into()),
            })
            .await
            .unwrap();
        (repo, project.id, image.id)
    }

    #[tokio::test]
    async fn test_create_image_requires_project() {
        let repo = Repository::default();
        let err = repo
            .create_image(ImageCreate {
                id: None,
                project_id: "missing".into(),
                source: ImageSource::Url("http://x/y.png".into()),
                name: None,
                path: None,
                width: Some(1),
                height: Some(1),
                mimetype: Some("image/png".into()),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found("project"));
    }

    #[tokio::test]
    async fn test_create_image_from_url_derives_name() {
        let (repo, project_id, _) = repo_with_image(10, 10).await;
        let image = repo
            .create_image(ImageCreate {
                id: None,
                project_id,
                source: ImageSource::Url("http://host/photos/street.png?token=abc".into()),
                name: None,
                path: None,
                width: Some(640),
                height: Some(480),
                mimetype: Some("image/png".into()),
            })
            .await
            .unwrap();
        assert_eq!(image.name, "street.png");
        assert_eq!(image.path, "http://host/photos/street.png?token=abc");
    }

    #[tokio::test]
    async fn test_create_image_from_file_uploads_and_probes() {
        let upload = Arc::new(MemoryUploadService::new());
        let sync = Arc::new(RecordingSync::new());
        let repo = Repository::new(upload.clone(), sync.clone());

        let project = repo
            .create_project(ProjectCreate {
                id: Some("p1".into()),
                name: "p".into(),
            })
            .await
            .unwrap();

        let image = repo
            .create_image(ImageCreate {
                id: Some("i1".into()),
                project_id: project.id,
                source: ImageSource::File { bytes: test_png() },
                name: Some("tiny".into()),
                path: None,
                width: None,
                height: None,
                mimetype: None,
            })
            .await
            .unwrap();

        assert_eq!(image.url, "mem://p1/i1.png");
        assert_eq!(image.width, 1);
        assert_eq!(image.height, 1);
        assert_eq!(image.mimetype, "image/png");
        assert_eq!(upload.len(), 1);

        let intents = sync.intents();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, EntityKind::Image);
        assert_eq!(intents[0].op, SyncOp::Create);
    }

    #[tokio::test]
    async fn test_create_image_from_external_url() {
        let upload = Arc::new(MemoryUploadService::new());
        upload
            .upload("remote/cat.png", test_png())
            .await
            .unwrap();
        let repo = Repository::new(upload.clone(), Arc::new(NullSync));

        let project = repo
            .create_project(ProjectCreate {
                id: Some("p1".into()),
                name: "p".into(),
            })
            .await
            .unwrap();
        let image = repo
            .create_image(ImageCreate {
                id: Some("i1".into()),
                project_id: project.id,
                source: ImageSource::ExternalUrl("mem://remote/cat.png".into()),
                name: None,
                path: None,
                width: None,
                height: None,
                mimetype: None,
            })
            .await
            .unwrap();

        // Re-uploaded under the project key, original kept as external_url.
        assert_eq!(image.url, "mem://p1/i1.png");
        assert_eq!(image.external_url.as_deref(), Some("mem://remote/cat.png"));
        assert_eq!(image.name, "cat.png");
        assert_eq!(image.path, "mem://remote/cat.png");
    }

    /// Upload service that parks every upload on a semaphore until the
    /// test releases it, holding the caller mid-creation.
    struct GatedUploadService {
        gate: tokio::sync::Semaphore,
    }

    #[async_trait::async_trait]
    impl UploadService for GatedUploadService {
        async fn upload(&self, key: &str, _bytes: Vec<u8>) -> crate::error::Result<String> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| Error::upload("gate closed"))?;
            Ok(format!("mem://{key}"))
        }

        async fn fetch(&self, _url: &str) -> crate::error::Result<Vec<u8>> {
            Err(Error::UploadUnsupported)
        }
    }

    #[tokio::test]
    async fn test_concurrent_create_image_same_id_fails_loser() {
        let upload = Arc::new(GatedUploadService {
            gate: tokio::sync::Semaphore::new(0),
        });
        let repo = Arc::new(Repository::new(upload.clone(), Arc::new(NullSync)));
        repo.create_project(ProjectCreate {
            id: Some("p1".into()),
            name: "p".into(),
        })
        .await
        .unwrap();

        // Parks inside `upload` with the store lock released.
        let parked = {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.create_image(ImageCreate {
                    id: Some("dup".into()),
                    project_id: "p1".into(),
                    source: ImageSource::File { bytes: test_png() },
                    name: Some("from-file".into()),
                    path: None,
                    width: Some(1),
                    height: Some(1),
                    mimetype: Some("image/png".into()),
                })
                .await
            })
        };
        tokio::task::yield_now().await;

        // A url-only creation needs no upload and takes the id first.
        let winner = repo
            .create_image(ImageCreate {
                id: Some("dup".into()),
                project_id: "p1".into(),
                source: ImageSource::Url("mem://x.png".into()),
                name: Some("from-url".into()),
                path: None,
                width: Some(10),
                height: Some(10),
                mimetype: Some("image/png".into()),
            })
            .await
            .unwrap();
        assert_eq!(winner.name, "from-url");

        upload.gate.add_permits(1);
        let err = parked.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));

        // The winner's row survives untouched.
        assert_eq!(repo.image("dup").await.unwrap().name, "from-url");
        assert_eq!(repo.count_images(ImageFilter::default()).await, 1);
    }

    #[tokio::test]
    async fn test_file_ingestion_without_upload_service_fails() {
        let repo = Repository::default();
        let project = repo
            .create_project(ProjectCreate {
                id: None,
                name: "p".into(),
            })
            .await
            .unwrap();
        let err = repo
            .create_image(ImageCreate {
                id: None,
                project_id: project.id,
                source: ImageSource::File { bytes: test_png() },
                name: None,
                path: None,
                width: None,
                height: None,
                mimetype: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UploadUnsupported));
    }

    #[tokio::test]
    async fn test_create_label_with_missing_image_writes_nothing() {
        let repo = Repository::default();
        let image_id = "0024fbc1-387b-444f-8ad0-d7a3e316726a";
        let err = repo
            .create_label(LabelCreate {
                id: None,
                image_id: image_id.into(),
                label_class_id: None,
                geometry: square(0.0, 0.0, 5.0, 5.0),
                label_type: None,
            })
            .await
            .unwrap_err();

        assert!(err.is_not_found("image"));
        assert_eq!(
            err.to_string(),
            format!("The image id {image_id} doesn't exist.")
        );
        assert_eq!(repo.count_labels(LabelFilter::default()).await, 0);
    }

    #[tokio::test]
    async fn test_create_label_with_missing_class_writes_nothing() {
        let (repo, _, image_id) = repo_with_image(10, 10).await;
        let err = repo
            .create_label(LabelCreate {
                id: None,
                image_id,
                label_class_id: Some("missing-class".into()),
                geometry: square(0.0, 0.0, 5.0, 5.0),
                label_type: None,
            })
            .await
            .unwrap_err();

        assert!(err.is_not_found("labelClass"));
        assert_eq!(repo.count_labels(LabelFilter::default()).await, 0);
    }

    #[tokio::test]
    async fn test_create_label_clips_to_image_bounds() {
        let (repo, _, image_id) = repo_with_image(10, 10).await;
        let label = repo
            .create_label(LabelCreate {
                id: None,
                image_id,
                label_class_id: None,
                geometry: square(-5.0, -5.0, 15.0, 15.0),
                label_type: None,
            })
            .await
            .unwrap();

        assert_eq!(label.geometry, square(0.0, 0.0, 10.0, 10.0));
        assert_eq!(
            (label.x, label.y, label.width, label.height),
            (0.0, 0.0, 10.0, 10.0)
        );
        assert_eq!(label.label_type, LabelType::Polygon);
    }

    #[tokio::test]
    async fn test_create_label_out_of_bounds_writes_nothing() {
        let (repo, _, image_id) = repo_with_image(10, 10).await;
        let err = repo
            .create_label(LabelCreate {
                id: None,
                image_id,
                label_class_id: None,
                geometry: square(50.0, 50.0, 60.0, 60.0),
                label_type: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::OutOfBounds));
        assert_eq!(repo.count_labels(LabelFilter::default()).await, 0);
    }

    #[tokio::test]
    async fn test_update_label_invalid_class_leaves_geometry_untouched() {
        let (repo, _, image_id) = repo_with_image(10, 10).await;
        let label = repo
            .create_label(LabelCreate {
                id: None,
                image_id,
                label_class_id: None,
                geometry: square(1.0, 1.0, 4.0, 4.0),
                label_type: None,
            })
            .await
            .unwrap();

        let err = repo
            .update_label(
                &label.id,
                LabelUpdate {
                    geometry: None,
                    label_class_id: Some(Some("no-such-class".into())),
                    label_type: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found("labelClass"));

        let unchanged = repo.label(&label.id).await.unwrap();
        assert_eq!(unchanged.geometry, label.geometry);
        assert_eq!(unchanged.x, label.x);
        assert_eq!(unchanged.width, label.width);
        assert_eq!(unchanged.label_class_id, None);
    }

    #[tokio::test]
    async fn test_update_label_reclips_new_geometry() {
        let (repo, _, image_id) = repo_with_image(10, 10).await;
        let label = repo
            .create_label(LabelCreate {
                id: None,
                image_id,
                label_class_id: None,
                geometry: square(1.0, 1.0, 4.0, 4.0),
                label_type: None,
            })
            .await
            .unwrap();

        let updated = repo
            .update_label(
                &label.id,
                LabelUpdate {
                    geometry: Some(square(5.0, 5.0, 20.0, 20.0)),
                    label_class_id: None,
                    label_type: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.geometry, square(5.0, 5.0, 10.0, 10.0));
        assert_eq!(
            (updated.x, updated.y, updated.width, updated.height),
            (5.0, 5.0, 5.0, 5.0)
        );
        assert!(updated.updated_at >= updated.created_at);
    }

    #[tokio::test]
    async fn test_update_label_can_clear_class() {
        let (repo, project_id, image_id) = repo_with_image(10, 10).await;
        let class = repo
            .create_label_class(LabelClassCreate {
                id: None,
                project_id,
                name: "car".into(),
                color: "#ff0000".into(),
                shortcut: None,
            })
            .await
            .unwrap();
        let label = repo
            .create_label(LabelCreate {
                id: None,
                image_id,
                label_class_id: Some(class.id.clone()),
                geometry: square(1.0, 1.0, 4.0, 4.0),
                label_type: None,
            })
            .await
            .unwrap();
        assert_eq!(label.label_class_id.as_deref(), Some(class.id.as_str()));

        let cleared = repo
            .update_label(
                &label.id,
                LabelUpdate {
                    geometry: None,
                    label_class_id: Some(None),
                    label_type: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.label_class_id, None);
    }

    #[tokio::test]
    async fn test_update_image_metadata_only() {
        let (repo, _, image_id) = repo_with_image(10, 10).await;
        let before = repo.image(&image_id).await.unwrap();

        let updated = repo
            .update_image(
                &image_id,
                ImageUpdate {
                    name: Some("renamed.png".into()),
                    path: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "renamed.png");
        assert_eq!(updated.path, before.path);
        assert_eq!((updated.width, updated.height), (before.width, before.height));
        assert!(updated.updated_at >= updated.created_at);
    }

    #[tokio::test]
    async fn test_update_label_class_can_clear_shortcut() {
        let (repo, project_id, _) = repo_with_image(10, 10).await;
        let class = repo
            .create_label_class(LabelClassCreate {
                id: None,
                project_id,
                name: "car".into(),
                color: "#ff0000".into(),
                shortcut: Some("c".into()),
            })
            .await
            .unwrap();

        let updated = repo
            .update_label_class(
                &class.id,
                LabelClassUpdate {
                    name: None,
                    color: Some("#00ff00".into()),
                    shortcut: Some(None),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "car");
        assert_eq!(updated.color, "#00ff00");
        assert_eq!(updated.shortcut, None);
    }

    #[tokio::test]
    async fn test_update_example_renames() {
        let repo = Repository::default();
        let example = repo
            .create_example(ExampleCreate {
                id: None,
                name: "before".into(),
            })
            .await
            .unwrap();

        let updated = repo
            .update_example(&example.id, "after".into())
            .await
            .unwrap();
        assert_eq!(updated.name, "after");
        assert!(updated.updated_at >= updated.created_at);

        let err = repo
            .update_example("missing", "x".into())
            .await
            .unwrap_err();
        assert!(err.is_not_found("example"));
    }

    #[tokio::test]
    async fn test_delete_example() {
        let repo = Repository::default();
        let example = repo
            .create_example(ExampleCreate {
                id: None,
                name: "e".into(),
            })
            .await
            .unwrap();

        let deleted = repo.delete_example(&example.id).await.unwrap();
        assert_eq!(deleted, example);
        assert!(repo
            .delete_example(&example.id)
            .await
            .unwrap_err()
            .is_not_found("example"));
    }

    #[tokio::test]
    async fn test_delete_label_returns_record() {
        let (repo, _, image_id) = repo_with_image(10, 10).await;
        let label = repo
            .create_label(LabelCreate {
                id: None,
                image_id,
                label_class_id: None,
                geometry: square(1.0, 1.0, 4.0, 4.0),
                label_type: None,
            })
            .await
            .unwrap();

        let deleted = repo.delete_label(&label.id).await.unwrap();
        assert_eq!(deleted, label);
        assert!(repo.label(&label.id).await.unwrap_err().is_not_found("label"));

        let err = repo.delete_label(&label.id).await.unwrap_err();
        assert!(err.is_not_found("label"));
    }

    #[tokio::test]
    async fn test_example_pagination_is_insertion_ordered() {
        let repo = Repository::default();
        for n in 1..=4 {
            repo.create_example(ExampleCreate {
                id: Some(format!("e{n}")),
                name: format!("example {n}"),
            })
            .await
            .unwrap();
        }

        let page = repo.list_examples(Some(1), Some(2)).await;
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "e2");
        assert_eq!(page[1].id, "e3");
        assert_eq!(repo.count_examples().await, 4);

        let empty_repo = Repository::default();
        assert!(empty_repo.list_examples(None, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_label_filters() {
        let (repo, project_id, image_id) = repo_with_image(10, 10).await;

        // A second project with its own image and label.
        let other_project = repo
            .create_project(ProjectCreate {
                id: None,
                name: "other".into(),
            })
            .await
            .unwrap();
        let other_image = repo
            .create_image(ImageCreate {
                id: None,
                project_id: other_project.id.clone(),
                source: ImageSource::Url("mem://other.png".into()),
                name: None,
                path: None,
                width: Some(10),
                height: Some(10),
                mimetype: Some("image/png".into()),
            })
            .await
            .unwrap();

        for image in [&image_id, &image_id, &other_image.id] {
            repo.create_label(LabelCreate {
                id: None,
                image_id: image.clone(),
                label_class_id: None,
                geometry: square(1.0, 1.0, 4.0, 4.0),
                label_type: None,
            })
            .await
            .unwrap();
        }

        assert_eq!(repo.count_labels(LabelFilter::default()).await, 3);
        assert_eq!(
            repo.count_labels(LabelFilter {
                image_id: Some(image_id.clone()),
                project_id: None,
            })
            .await,
            2
        );
        assert_eq!(
            repo.count_labels(LabelFilter {
                image_id: None,
                project_id: Some(project_id),
            })
            .await,
            2
        );
        assert_eq!(
            repo.count_labels(LabelFilter {
                image_id: None,
                project_id: Some(other_project.id),
            })
            .await,
            1
        );
    }

    #[tokio::test]
    async fn test_sync_intents_for_label_lifecycle() {
        let sync = Arc::new(RecordingSync::new());
        let repo = Repository::new(Arc::new(UploadUnsupported), sync.clone());

        let project = repo
            .create_project(ProjectCreate {
                id: None,
                name: "p".into(),
            })
            .await
            .unwrap();
        let image = repo
            .create_image(ImageCreate {
                id: None,
                project_id: project.id,
                source: ImageSource::Url("mem://x.png".into()),
                name: None,
                path: None,
                width: Some(10),
                height: Some(10),
                mimetype: Some("image/png".into()),
            })
            .await
            .unwrap();
        let label = repo
            .create_label(LabelCreate {
                id: None,
                image_id: image.id,
                label_class_id: None,
                geometry: square(0.0, 0.0, 5.0, 5.0),
                label_type: None,
            })
            .await
            .unwrap();
        repo.update_label(&label.id, LabelUpdate::default())
            .await
            .unwrap();
        repo.delete_label(&label.id).await.unwrap();

        let ops: Vec<(EntityKind, SyncOp)> = sync
            .intents()
            .into_iter()
            .map(|intent| (intent.kind, intent.op))
            .collect();
        assert_eq!(
            ops,
            vec![
                (EntityKind::Image, SyncOp::Create),
                (EntityKind::Label, SyncOp::Create),
                (EntityKind::Label, SyncOp::Update),
                (EntityKind::Label, SyncOp::Delete),
            ]
        );

        // Acknowledging is the collaborator's side; it must not disturb
        // local state.
        sync.acknowledge_all(SyncAck::Confirmed);
        assert_eq!(sync.pending(), 0);
    }

    #[test]
    fn test_name_from_url() {
        assert_eq!(name_from_url("http://h/a/b.png"), "b.png");
        assert_eq!(name_from_url("http://h/a/b.png?sig=1&x=2"), "b.png");
        assert_eq!(name_from_url("plain"), "plain");
    }
}
