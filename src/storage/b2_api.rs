//! Wire client for the B2 native API (`/b2api/v2`).
//!
//! [`B2Api`] is the seam between the storage backend and the network:
//! [`HttpB2Api`] talks to the real service, tests substitute fakes that count
//! calls.

use async_trait::async_trait;
use futures::stream;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::model::FileInfo;
use crate::storage::backend::{ProgressCallback, StorageConfig, StorageError};

const API_VERSION: &str = "b2api/v2";
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Response of `b2_authorize_account`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAuthorization {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,
    #[serde(default)]
    pub recommended_part_size: Option<u64>,
    #[serde(default)]
    pub allowed: Option<AllowedScope>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedScope {
    pub bucket_id: Option<String>,
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub name_prefix: Option<String>,
}

/// Scoped upload target from `b2_get_upload_url`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub bucket_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

/// A file version as returned by listing, upload and file-info calls
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub content_length: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub upload_timestamp: i64,
    #[serde(default)]
    pub file_info: FileInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFileNamesResponse {
    files: Vec<FileVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadAuthorizationResponse {
    authorization_token: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// One upload as sent to a scoped upload URL
pub struct UploadBody<'a> {
    pub file_name: &'a str,
    pub data: &'a [u8],
    pub content_type: &'a str,
    pub info: &'a FileInfo,
    pub server_side_encryption: bool,
    pub on_progress: Option<ProgressCallback>,
}

/// Authorized context for calls made after `b2_authorize_account`
#[derive(Debug, Clone)]
pub struct ApiContext<'a> {
    pub api_url: &'a str,
    pub download_url: &'a str,
    pub token: &'a str,
}

/// Operations consumed from the object store
#[async_trait]
pub trait B2Api: Send + Sync {
    async fn authorize_account(&self) -> Result<AccountAuthorization, StorageError>;

    async fn get_upload_url(&self, ctx: &ApiContext<'_>, bucket_id: &str) -> Result<UploadTarget, StorageError>;

    async fn upload_file(&self, target: &UploadTarget, body: UploadBody<'_>) -> Result<FileVersion, StorageError>;

    async fn list_file_names(
        &self,
        ctx: &ApiContext<'_>,
        bucket_id: &str,
        prefix: &str,
        max_file_count: u32,
    ) -> Result<Vec<FileVersion>, StorageError>;

    async fn delete_file_version(&self, ctx: &ApiContext<'_>, file_name: &str, file_id: &str) -> Result<(), StorageError>;

    /// `Ok(None)` on 404
    async fn download_file_by_name(
        &self,
        ctx: &ApiContext<'_>,
        bucket_name: &str,
        file_name: &str,
    ) -> Result<Option<Vec<u8>>, StorageError>;

    async fn get_download_authorization(
        &self,
        ctx: &ApiContext<'_>,
        bucket_id: &str,
        file_name_prefix: &str,
        valid_duration: Duration,
    ) -> Result<String, StorageError>;

    async fn get_file_info(&self, ctx: &ApiContext<'_>, file_id: &str) -> Result<FileVersion, StorageError>;
}

/// `reqwest` implementation of [`B2Api`]
pub struct HttpB2Api {
    client: Client,
    api_base_url: String,
    key_id: String,
    application_key: String,
}

impl HttpB2Api {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        if config.key_id.is_empty() || config.application_key.is_empty() {
            return Err(StorageError::ConfigurationError {
                message: "B2 key id and application key are required".to_string(),
            });
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| StorageError::ConfigurationError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            application_key: config.application_key.clone(),
        })
    }

    fn endpoint(api_url: &str, operation: &str) -> String {
        format!("{}/{}/{}", api_url.trim_end_matches('/'), API_VERSION, operation)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        ctx: &ApiContext<'_>,
        operation: &str,
        body: &B,
    ) -> Result<Response, StorageError> {
        let response = self
            .client
            .post(Self::endpoint(ctx.api_url, operation))
            .header(header::AUTHORIZATION, ctx.token)
            .json(body)
            .send()
            .await?;
        check_status(response, operation).await
    }
}

/// Turn a non-success response into a [`StorageError`]
async fn check_status(response: Response, operation: &str) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|e| format!("{} ({})", e.message, e.code))
        .unwrap_or(body);
    let message = format!("{}: {}", operation, detail);
    Err(match status {
        StatusCode::UNAUTHORIZED => StorageError::Unauthorized { message },
        StatusCode::NOT_FOUND => StorageError::NotFound { path: operation.to_string() },
        _ => StorageError::HttpError { status: status.as_u16(), message },
    })
}

/// Percent-encode a file name as B2 expects, keeping `/` separators
pub fn encode_file_name(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl B2Api for HttpB2Api {
    async fn authorize_account(&self) -> Result<AccountAuthorization, StorageError> {
        let url = format!("{}/{}/b2_authorize_account", self.api_base_url, API_VERSION);
        let response = self
            .client
            .get(url)
            .basic_auth(&self.key_id, Some(&self.application_key))
            .send()
            .await?;
        let response = match check_status(response, "b2_authorize_account").await {
            Ok(response) => response,
            Err(StorageError::Unauthorized { message }) => {
                return Err(StorageError::AuthenticationError { message })
            }
            Err(e) => return Err(e),
        };
        Ok(response.json().await?)
    }

    async fn get_upload_url(&self, ctx: &ApiContext<'_>, bucket_id: &str) -> Result<UploadTarget, StorageError> {
        let response = self
            .post_json(ctx, "b2_get_upload_url", &serde_json::json!({ "bucketId": bucket_id }))
            .await?;
        Ok(response.json().await?)
    }

    async fn upload_file(&self, target: &UploadTarget, body: UploadBody<'_>) -> Result<FileVersion, StorageError> {
        let total = body.data.len() as u64;
        let chunks: Vec<Vec<u8>> = body.data.chunks(UPLOAD_CHUNK_SIZE).map(<[u8]>::to_vec).collect();
        let progress = body.on_progress.clone();
        let mut sent = 0u64;
        let payload = stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            if let Some(callback) = &progress {
                callback(sent, total);
            }
            Ok::<_, std::io::Error>(chunk)
        }));

        let mut request = self
            .client
            .post(&target.upload_url)
            .header(header::AUTHORIZATION, &target.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(body.file_name))
            .header(header::CONTENT_TYPE, body.content_type)
            .header(header::CONTENT_LENGTH, total)
            .header("X-Bz-Content-Sha1", "do_not_verify");
        for (key, value) in body.info {
            request = request.header(format!("X-Bz-Info-{}", key), urlencoding::encode(value).into_owned());
        }
        if body.server_side_encryption {
            request = request.header("X-Bz-Server-Side-Encryption", "AES256");
        }

        let response = request
            .body(reqwest::Body::wrap_stream(payload))
            .send()
            .await?;
        let response = check_status(response, "b2_upload_file").await?;
        let version: FileVersion = response.json().await?;
        debug!(file_name = body.file_name, file_id = %version.file_id, bytes = total, "uploaded");
        Ok(version)
    }

    async fn list_file_names(
        &self,
        ctx: &ApiContext<'_>,
        bucket_id: &str,
        prefix: &str,
        max_file_count: u32,
    ) -> Result<Vec<FileVersion>, StorageError> {
        let body = serde_json::json!({
            "bucketId": bucket_id,
            "prefix": prefix,
            "startFileName": prefix,
            "maxFileCount": max_file_count,
        });
        let response = self.post_json(ctx, "b2_list_file_names", &body).await?;
        let listing: ListFileNamesResponse = response.json().await?;
        Ok(listing.files)
    }

    async fn delete_file_version(&self, ctx: &ApiContext<'_>, file_name: &str, file_id: &str) -> Result<(), StorageError> {
        let body = serde_json::json!({ "fileName": file_name, "fileId": file_id });
        self.post_json(ctx, "b2_delete_file_version", &body).await?;
        Ok(())
    }

    async fn download_file_by_name(
        &self,
        ctx: &ApiContext<'_>,
        bucket_name: &str,
        file_name: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let url = format!(
            "{}/file/{}/{}",
            ctx.download_url.trim_end_matches('/'),
            bucket_name,
            encode_file_name(file_name)
        );
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, ctx.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, "b2_download_file_by_name").await?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn get_download_authorization(
        &self,
        ctx: &ApiContext<'_>,
        bucket_id: &str,
        file_name_prefix: &str,
        valid_duration: Duration,
    ) -> Result<String, StorageError> {
        let body = serde_json::json!({
            "bucketId": bucket_id,
            "fileNamePrefix": file_name_prefix,
            "validDurationInSeconds": valid_duration.as_secs().max(1),
        });
        let response = self.post_json(ctx, "b2_get_download_authorization", &body).await?;
        let auth: DownloadAuthorizationResponse = response.json().await?;
        Ok(auth.authorization_token)
    }

    async fn get_file_info(&self, ctx: &ApiContext<'_>, file_id: &str) -> Result<FileVersion, StorageError> {
        let response = self
            .post_json(ctx, "b2_get_file_info", &serde_json::json!({ "fileId": file_id }))
            .await?;
        Ok(response.json().await?)
    }
}
