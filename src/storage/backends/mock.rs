use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::model::FileInfo;
use crate::storage::backend::{
    RemoteFileInfo, StorageBackend, StorageError, StorageType, UploadReceipt, UploadRequest,
};

pub const MOCK_DOWNLOAD_HOST: &str = "https://mock.backblazeb2.com";

#[derive(Debug, Clone)]
struct MockObject {
    file_id: String,
    data: Vec<u8>,
    content_type: String,
    info: FileInfo,
    uploaded_at: DateTime<Utc>,
}

/// Offline backend serving synthetic data from memory
///
/// Used for demos and tests. It never authorizes and never opens a
/// connection.
pub struct MockBackend {
    bucket_name: String,
    objects: Mutex<BTreeMap<String, MockObject>>,
    next_id: AtomicU64,
}

impl MockBackend {
    pub fn new(bucket_name: impl Into<String>) -> Self {
        let bucket_name = bucket_name.into();
        Self {
            bucket_name: if bucket_name.is_empty() { "mock-bucket".to_string() } else { bucket_name },
            objects: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, MockObject>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Synthetic public URL for `path`
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/file/{}/{}", MOCK_DOWNLOAD_HOST, self.bucket_name, path)
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    async fn upload_file(&self, request: UploadRequest<'_>) -> Result<UploadReceipt, StorageError> {
        let total = request.data.len() as u64;
        if let Some(callback) = &request.on_progress {
            callback(total, total);
        }
        let file_id = format!("mock_{:08}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.objects().insert(
            request.path.to_string(),
            MockObject {
                file_id: file_id.clone(),
                data: request.data.to_vec(),
                content_type: request.content_type.to_string(),
                info: request.metadata.clone(),
                uploaded_at: Utc::now(),
            },
        );
        debug!(path = request.path, bytes = total, "mock upload");
        Ok(UploadReceipt {
            file_id,
            url: self.url_for(request.path),
        })
    }

    async fn download_file(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.objects().get(path).map(|object| object.data.clone()))
    }

    async fn delete_file(&self, path: &str) -> Result<bool, StorageError> {
        self.objects().remove(path);
        Ok(true)
    }

    async fn list_files(&self, prefix: &str, max_count: u32) -> Result<Vec<String>, StorageError> {
        Ok(self
            .objects()
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .take(max_count as usize)
            .map(|(path, _)| path.clone())
            .collect())
    }

    async fn file_info(&self, path: &str) -> Result<Option<RemoteFileInfo>, StorageError> {
        Ok(self.objects().get(path).map(|object| RemoteFileInfo {
            file_id: object.file_id.clone(),
            path: path.to_string(),
            size: object.data.len() as u64,
            content_type: object.content_type.clone(),
            uploaded_at: object.uploaded_at,
            info: object.info.clone(),
        }))
    }

    async fn download_authorization(&self, prefix: &str, valid_for: Duration) -> Result<String, StorageError> {
        Ok(format!("mock_download_{}_{}", prefix.replace('/', "_"), valid_for.as_secs()))
    }

    fn backend_type(&self) -> StorageType {
        StorageType::Mock
    }

    fn get_info(&self) -> HashMap<String, String> {
        let mut info = HashMap::new();
        info.insert("backend_type".to_string(), "Mock".to_string());
        info.insert("bucket_name".to_string(), self.bucket_name.clone());
        info.insert("objects".to_string(), self.len().to_string());
        info
    }
}
