use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::model::FileInfo;
use crate::retry::RetryPolicy;

/// Storage backend types supported by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StorageType {
    /// Backblaze B2 object storage
    #[default]
    B2,
    /// In-memory stand-in with synthetic URLs, no network
    Mock,
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "b2" | "backblaze" | "remote" => Ok(StorageType::B2),
            "mock" | "demo" | "offline" => Ok(StorageType::Mock),
            _ => Err(format!("Unknown storage type: {}", s)),
        }
    }
}

/// Upload progress callback: `(bytes_sent, total_bytes)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Identifier assigned by the store to this file version
    pub file_id: String,
    /// Public or authorized-download URL for the stored object
    pub url: String,
}

/// Object information as reported by the store
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFileInfo {
    pub file_id: String,
    pub path: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
    pub info: FileInfo,
}

/// One upload, borrowed from the caller
pub struct UploadRequest<'a> {
    pub path: &'a str,
    pub data: &'a [u8],
    pub content_type: &'a str,
    pub metadata: &'a FileInfo,
    pub server_side_encryption: bool,
    pub on_progress: Option<ProgressCallback>,
}

impl<'a> UploadRequest<'a> {
    pub fn new(path: &'a str, data: &'a [u8], content_type: &'a str, metadata: &'a FileInfo) -> Self {
        Self {
            path,
            data,
            content_type,
            metadata,
            server_side_encryption: false,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_server_side_encryption(mut self, enabled: bool) -> Self {
        self.server_side_encryption = enabled;
        self
    }
}

/// Object-store abstraction used by the document service.
///
/// Implementations are selected once at construction; callers never branch
/// on the backend type.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Upload a blob under `request.path`
    async fn upload_file(&self, request: UploadRequest<'_>) -> Result<UploadReceipt, StorageError>;

    /// Download a blob; `Ok(None)` when the path does not exist
    async fn download_file(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Delete a blob. Deleting a missing path succeeds.
    async fn delete_file(&self, path: &str) -> Result<bool, StorageError>;

    /// List at most `max_count` paths starting with `prefix`
    async fn list_files(&self, prefix: &str, max_count: u32) -> Result<Vec<String>, StorageError>;

    /// Object information for `path`, `Ok(None)` when it does not exist
    async fn file_info(&self, path: &str) -> Result<Option<RemoteFileInfo>, StorageError>;

    /// Time-limited download token covering every path under `prefix`
    async fn download_authorization(&self, prefix: &str, valid_for: Duration) -> Result<String, StorageError>;

    /// Get the backend type
    fn backend_type(&self) -> StorageType;

    /// Get backend-specific configuration info
    fn get_info(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Serve synthetic data and never touch the network
    pub use_mock: bool,
    pub key_id: String,
    pub application_key: String,
    /// Human readable name of the application key, informational only
    pub key_name: String,
    pub bucket_id: String,
    pub bucket_name: String,
    /// Base URL of the authorize-account endpoint
    pub api_base_url: String,
    /// Directory of the local persistent store; in-memory when unset
    pub local_store_dir: Option<String>,
    /// Path prefix under which documents are stored
    pub document_prefix: String,
    /// Retry policy for acquiring an authorization session
    pub auth_retry: RetryPolicy,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            use_mock: false,
            key_id: String::new(),
            application_key: String::new(),
            key_name: String::new(),
            bucket_id: String::new(),
            bucket_name: String::new(),
            api_base_url: "https://api.backblazeb2.com".to_string(),
            local_store_dir: None,
            document_prefix: "documents".to_string(),
            auth_retry: RetryPolicy::default(),
            request_timeout_secs: 60,
        }
    }
}

impl StorageConfig {
    pub fn mock(bucket_name: &str) -> Self {
        Self {
            use_mock: true,
            bucket_name: bucket_name.to_string(),
            ..Default::default()
        }
    }

    pub fn storage_type(&self) -> StorageType {
        if self.use_mock {
            StorageType::Mock
        } else {
            StorageType::B2
        }
    }
}

/// Operation-specific failure codes reported with [`StorageError::OperationFailed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorCode {
    Upload,
    UploadUrl,
    Download,
    Delete,
    List,
    DownloadAuthorization,
    FileInfo,
}

impl StorageErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageErrorCode::Upload => "B2_UPLOAD_ERROR",
            StorageErrorCode::UploadUrl => "B2_UPLOAD_URL_ERROR",
            StorageErrorCode::Download => "B2_DOWNLOAD_ERROR",
            StorageErrorCode::Delete => "B2_DELETE_ERROR",
            StorageErrorCode::List => "B2_LIST_ERROR",
            StorageErrorCode::DownloadAuthorization => "B2_DOWNLOAD_AUTH_ERROR",
            StorageErrorCode::FileInfo => "B2_FILE_INFO_ERROR",
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors specific to storage operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Authentication failed: {message}")]
    AuthenticationError { message: String },

    /// The store rejected the session token; re-authorize and retry
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("File not found: {path}")]
    NotFound { path: String },

    /// Non-success HTTP status without a more specific meaning
    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("{code}: {message}")]
    OperationFailed { code: StorageErrorCode, message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Local store error: {message}")]
    LocalStoreError { message: String },
}

impl StorageError {
    pub fn operation(code: StorageErrorCode, message: impl Into<String>) -> Self {
        StorageError::OperationFailed { code, message: message.into() }
    }

    /// Tag a lower-level failure with an operation code. Network, auth and
    /// not-found errors keep their own variant.
    pub fn with_code(self, code: StorageErrorCode) -> Self {
        match self {
            StorageError::OperationFailed { message, .. }
            | StorageError::SerializationError { message } => {
                StorageError::OperationFailed { code, message }
            }
            StorageError::HttpError { status, message } => StorageError::OperationFailed {
                code,
                message: format!("HTTP {}: {}", status, message),
            },
            other => other,
        }
    }

    pub fn code(&self) -> Option<StorageErrorCode> {
        match self {
            StorageError::OperationFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, StorageError::Unauthorized { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError { message: e.to_string() }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StorageError::SerializationError { message: e.to_string() }
        } else {
            StorageError::NetworkError { message: e.to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_type_parses_aliases() {
        assert_eq!("b2".parse::<StorageType>(), Ok(StorageType::B2));
        assert_eq!("Mock".parse::<StorageType>(), Ok(StorageType::Mock));
        assert!("ftp".parse::<StorageType>().is_err());
    }

    #[test]
    fn error_codes_render_in_messages() {
        let err = StorageError::operation(StorageErrorCode::Upload, "status 500");
        assert_eq!(err.to_string(), "B2_UPLOAD_ERROR: status 500");
        assert_eq!(err.code(), Some(StorageErrorCode::Upload));
    }

    #[test]
    fn with_code_keeps_transport_variants() {
        let network = StorageError::NetworkError { message: "reset".into() };
        assert!(matches!(network.with_code(StorageErrorCode::Delete), StorageError::NetworkError { .. }));

        let generic = StorageError::operation(StorageErrorCode::List, "bad");
        assert_eq!(generic.with_code(StorageErrorCode::Delete).code(), Some(StorageErrorCode::Delete));

        let http = StorageError::HttpError { status: 503, message: "busy".into() };
        let tagged = http.with_code(StorageErrorCode::Upload);
        assert_eq!(tagged.to_string(), "B2_UPLOAD_ERROR: HTTP 503: busy");
    }
}
