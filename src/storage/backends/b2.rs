use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::storage::auth::{AuthSession, AuthorizationManager};
use crate::storage::b2_api::{B2Api, FileVersion, UploadBody};
use crate::storage::backend::{
    RemoteFileInfo, StorageBackend, StorageConfig, StorageError, StorageErrorCode, StorageType,
    UploadReceipt, UploadRequest,
};

/// Backblaze B2 storage backend
///
/// Every operation runs with a session from the [`AuthorizationManager`]. A
/// `401` from the store invalidates the session and the operation is retried
/// once with a fresh one.
pub struct B2Backend {
    api: Arc<dyn B2Api>,
    auth: Arc<AuthorizationManager>,
    bucket_id: String,
    bucket_name: String,
}

impl B2Backend {
    pub fn new(api: Arc<dyn B2Api>, auth: Arc<AuthorizationManager>, config: &StorageConfig) -> Result<Self, StorageError> {
        if config.bucket_id.is_empty() {
            return Err(StorageError::ConfigurationError {
                message: "B2 bucket id cannot be empty".to_string(),
            });
        }
        if config.bucket_name.is_empty() {
            return Err(StorageError::ConfigurationError {
                message: "B2 bucket name cannot be empty".to_string(),
            });
        }
        Ok(Self {
            api,
            auth,
            bucket_id: config.bucket_id.clone(),
            bucket_name: config.bucket_name.clone(),
        })
    }

    pub fn authorization(&self) -> &Arc<AuthorizationManager> {
        &self.auth
    }

    /// Run `op` with a session, re-authorizing once on `401`
    async fn with_session<T, F, Fut>(&self, op: F) -> Result<T, StorageError>
    where
        F: Fn(AuthSession) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, StorageError>> + Send,
        T: Send,
    {
        let session = self.auth.session().await?;
        let token = session.token.clone();
        match op(session).await {
            Err(e) if e.is_unauthorized() => {
                warn!(error = %e, "storage session rejected, re-authorizing");
                self.auth.invalidate(&token).await;
                let session = self.auth.session().await?;
                op(session).await
            }
            other => other,
        }
    }

    /// The file version stored under exactly `path`
    async fn resolve(&self, path: &str, code: StorageErrorCode) -> Result<Option<FileVersion>, StorageError> {
        let files = self
            .with_session(|session| async move {
                self.api
                    .list_file_names(&session.context(), &self.bucket_id, path, 1)
                    .await
            })
            .await
            .map_err(|e| e.with_code(code))?;
        Ok(files.into_iter().find(|file| file.file_name == path))
    }

    fn download_url(&self, session: &AuthSession, path: &str) -> String {
        format!(
            "{}/file/{}/{}",
            session.download_url.trim_end_matches('/'),
            self.bucket_name,
            crate::storage::b2_api::encode_file_name(path)
        )
    }
}

#[async_trait]
impl StorageBackend for B2Backend {
    async fn upload_file(&self, request: UploadRequest<'_>) -> Result<UploadReceipt, StorageError> {
        let request = &request;
        let (version, url) = self
            .with_session(|session| async move {
                let target = self
                    .api
                    .get_upload_url(&session.context(), &self.bucket_id)
                    .await
                    .map_err(|e| e.with_code(StorageErrorCode::UploadUrl))?;
                let body = UploadBody {
                    file_name: request.path,
                    data: request.data,
                    content_type: request.content_type,
                    info: request.metadata,
                    server_side_encryption: request.server_side_encryption,
                    on_progress: request.on_progress.clone(),
                };
                let version = self
                    .api
                    .upload_file(&target, body)
                    .await
                    .map_err(|e| e.with_code(StorageErrorCode::Upload))?;
                Ok((version, self.download_url(&session, request.path)))
            })
            .await?;

        info!(path = request.path, file_id = %version.file_id, bytes = request.data.len(), "file uploaded to B2");
        Ok(UploadReceipt { file_id: version.file_id, url })
    }

    async fn download_file(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self
            .with_session(|session| async move {
                self.api
                    .download_file_by_name(&session.context(), &self.bucket_name, path)
                    .await
            })
            .await
            .map_err(|e| e.with_code(StorageErrorCode::Download))?;
        debug!(path, found = data.is_some(), "B2 download");
        Ok(data)
    }

    async fn delete_file(&self, path: &str) -> Result<bool, StorageError> {
        let Some(version) = self.resolve(path, StorageErrorCode::Delete).await? else {
            debug!(path, "nothing to delete in B2");
            return Ok(true);
        };
        let file_id = version.file_id.as_str();
        self.with_session(|session| async move {
            self.api
                .delete_file_version(&session.context(), path, file_id)
                .await
        })
        .await
        .or_else(|e| match e {
            // deleted concurrently
            StorageError::NotFound { .. } => Ok(()),
            other => Err(other.with_code(StorageErrorCode::Delete)),
        })?;
        info!(path, file_id, "file deleted from B2");
        Ok(true)
    }

    async fn list_files(&self, prefix: &str, max_count: u32) -> Result<Vec<String>, StorageError> {
        let files = self
            .with_session(|session| async move {
                self.api
                    .list_file_names(&session.context(), &self.bucket_id, prefix, max_count)
                    .await
            })
            .await
            .map_err(|e| e.with_code(StorageErrorCode::List))?;
        Ok(files
            .into_iter()
            .map(|file| file.file_name)
            .filter(|name| name.starts_with(prefix))
            .take(max_count as usize)
            .collect())
    }

    async fn file_info(&self, path: &str) -> Result<Option<RemoteFileInfo>, StorageError> {
        let Some(listed) = self.resolve(path, StorageErrorCode::FileInfo).await? else {
            return Ok(None);
        };
        let file_id = listed.file_id.as_str();
        let version = self
            .with_session(|session| async move {
                self.api.get_file_info(&session.context(), file_id).await
            })
            .await;
        let version = match version {
            Ok(version) => version,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.with_code(StorageErrorCode::FileInfo)),
        };
        Ok(Some(RemoteFileInfo {
            file_id: version.file_id,
            path: version.file_name,
            size: version.content_length,
            content_type: version.content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            uploaded_at: Utc
                .timestamp_millis_opt(version.upload_timestamp)
                .single()
                .unwrap_or_else(Utc::now),
            info: version.file_info,
        }))
    }

    async fn download_authorization(&self, prefix: &str, valid_for: Duration) -> Result<String, StorageError> {
        self.with_session(|session| async move {
            self.api
                .get_download_authorization(&session.context(), &self.bucket_id, prefix, valid_for)
                .await
        })
        .await
        .map_err(|e| e.with_code(StorageErrorCode::DownloadAuthorization))
    }

    fn backend_type(&self) -> StorageType {
        StorageType::B2
    }

    fn get_info(&self) -> HashMap<String, String> {
        let mut info = HashMap::new();
        info.insert("backend_type".to_string(), "B2".to_string());
        info.insert("bucket_id".to_string(), self.bucket_id.clone());
        info.insert("bucket_name".to_string(), self.bucket_name.clone());
        info.insert("session_cached".to_string(), self.auth.current_session().is_some().to_string());
        info
    }
}
