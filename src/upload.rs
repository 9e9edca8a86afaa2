//! Upload/transfer collaborator.
//!
//! When an image is created from file content or an external url, the
//! repository hands the bytes to an [`UploadService`] and stores the durable
//! download url it returns. The transport itself (HTTP, S3, browser cache)
//! belongs to the implementation, not to this crate.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Storage key for an image's content: `{project_id}/{image_id}.{ext}`.
pub fn storage_key(project_id: &str, image_id: &str, mimetype: &str) -> String {
    format!(
        "{}/{}.{}",
        project_id,
        image_id,
        extension_for_mimetype(mimetype)
    )
}

/// File extension for the mimetypes the store ingests.
pub fn extension_for_mimetype(mimetype: &str) -> &str {
    match mimetype {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

/// Transfer service that turns binary content into a durable download url.
#[async_trait]
pub trait UploadService: Send + Sync {
    /// Store `bytes` under `key` and return the durable download url.
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String>;

    /// Fetch the bytes behind a url. Used for external-url ingestion and for
    /// probing dimensions of url-only images.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// The no-upload service: every file/external-url ingestion fails with
/// [`Error::UploadUnsupported`]. Images can still be created from a direct
/// url with caller-supplied dimensions.
#[derive(Debug, Default)]
pub struct UploadUnsupported;

#[async_trait]
impl UploadService for UploadUnsupported {
    async fn upload(&self, _key: &str, _bytes: Vec<u8>) -> Result<String> {
        Err(Error::UploadUnsupported)
    }

    async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
        Err(Error::UploadUnsupported)
    }
}

/// In-memory transfer service. Uploaded content is addressable under
/// `mem://{key}` urls. Useful for tests and fully-offline sessions.
#[derive(Debug, Default)]
pub struct MemoryUploadService {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryUploadService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob lock poisoned").len()
    }

    /// Whether nothing has been uploaded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UploadService for MemoryUploadService {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        let url = format!("mem://{key}");
        self.blobs
            .lock()
            .expect("blob lock poisoned")
            .insert(key.to_string(), bytes);
        log::debug!("Stored {url}");
        Ok(url)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let key = url
            .strip_prefix("mem://")
            .ok_or_else(|| Error::upload(format!("Not a memory url: {url}")))?;
        self.blobs
            .lock()
            .expect("blob lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| Error::upload(format!("No content stored at {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key() {
        assert_eq!(
            storage_key("proj-1", "img-2", "image/png"),
            "proj-1/img-2.png"
        );
        assert_eq!(
            storage_key("proj-1", "img-2", "application/octet-stream"),
            "proj-1/img-2.bin"
        );
    }

    #[tokio::test]
    async fn test_memory_upload_roundtrip() {
        let service = MemoryUploadService::new();
        let url = service.upload("p/i.png", vec![1, 2, 3]).await.unwrap();
        assert_eq!(url, "mem://p/i.png");
        assert_eq!(service.fetch(&url).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unsupported_upload_fails() {
        let service = UploadUnsupported;
        let err = service.upload("k", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::UploadUnsupported));
    }
}
