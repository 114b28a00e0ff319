//! Document handling on top of the storage layer.

pub mod api;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod validation;

use thiserror::Error;

use crate::storage::StorageError;

pub use api::{DocumentApi, DocumentApiConfig, HttpDocumentApi, InMemoryDocumentApi};
pub use pipeline::{
    Compressor, Encryptor, GzipCompressor, ProcessingOutcome, ProcessingPipeline, ServerSideEncryption,
    SignatureScanner, VirusScanner,
};
pub use queue::{FailedUpload, QueueConfig, QueueReport, UploadQueue};
pub use service::DocumentService;
pub use validation::{detect_file_type, validate_file, verify_file_type, FileType, ValidationConfig};

/// Errors surfaced by the document façade
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("File type mismatch: declared {declared}, detected {detected}")]
    TypeMismatch { declared: String, detected: String },

    #[error("Unknown file type (signature {signature})")]
    UnknownFileType { signature: String },

    #[error("Document not found: {id}")]
    NotFound { id: String },

    #[error("Document API error: {message}")]
    Api { message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Processing step {step} failed: {message}")]
    Processing { step: &'static str, message: String },
}

impl DocumentError {
    /// Whether the same upload may succeed when tried again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DocumentError::Api { .. } | DocumentError::Storage(_) | DocumentError::Processing { .. }
        )
    }
}
