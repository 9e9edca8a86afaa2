//! Error types for repository and history operations.

use thiserror::Error;

/// Errors that can occur during store, repository and history operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A referenced entity does not exist.
    #[error("The {kind} id {id} doesn't exist.")]
    NotFound {
        /// Entity kind that was looked up (e.g. "image", "labelClass")
        kind: &'static str,
        /// The id that failed to resolve
        id: String,
    },

    /// Label geometry does not intersect its image bounds.
    #[error("Label out of image bounds")]
    OutOfBounds,

    /// Malformed or ambiguous creation arguments.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of the invalid input
        message: String,
    },

    /// The active upload service cannot accept file or external-url ingestion.
    #[error("This store does not support file upload. Create images by providing a direct `url` instead.")]
    UploadUnsupported,

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image content could not be decoded while probing dimensions/mimetype
    #[error("Image probe error: {0}")]
    Probe(#[from] image::ImageError),

    /// Error reported by the upload collaborator
    #[error("Upload error: {message}")]
    Upload {
        /// Description from the transfer service
        message: String,
    },
}

impl Error {
    /// Create a not-found error for an entity kind and id.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an invalid input error with a message.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an upload error with a message.
    pub fn upload(message: impl Into<String>) -> Self {
        Self::Upload {
            message: message.into(),
        }
    }

    /// Whether this error is a not-found for the given entity kind.
    pub fn is_not_found(&self, expected_kind: &str) -> bool {
        matches!(self, Self::NotFound { kind, .. } if *kind == expected_kind)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
