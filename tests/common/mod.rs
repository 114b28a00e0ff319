#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docvault::documents::{DocumentService, InMemoryDocumentApi};
use docvault::model::FileInfo;
use docvault::retry::RetryPolicy;
use docvault::storage::b2_api::{AccountAuthorization, ApiContext, B2Api, FileVersion, UploadBody, UploadTarget};
use docvault::storage::{LocalCacheStore, LocalStore, StorageBackend, StorageConfig, StorageError, StorageFactory};

pub const BUCKET_ID: &str = "bucket-id-1";
pub const BUCKET_NAME: &str = "hr-documents";

/// In-memory stand-in for the B2 service that counts every request
#[derive(Default)]
pub struct FakeB2Api {
    pub authorize_calls: AtomicU32,
    pub requests: AtomicU32,
    offline: AtomicBool,
    reject_next: AtomicBool,
    auth_latency: Mutex<Duration>,
    files: Mutex<BTreeMap<String, (FileVersion, Vec<u8>)>>,
    next_id: AtomicU64,
}

impl FakeB2Api {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The next authorized request answers 401
    pub fn reject_next_request(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    pub fn set_auth_latency(&self, latency: Duration) {
        *self.auth_latency.lock().unwrap() = latency;
    }

    pub fn authorize_calls(&self) -> u32 {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn stored_names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    fn check(&self, ctx_token: &str) -> Result<(), StorageError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::NetworkError { message: "connection refused".into() });
        }
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Unauthorized { message: format!("expired token {}", ctx_token) });
        }
        Ok(())
    }
}

#[async_trait]
impl B2Api for FakeB2Api {
    async fn authorize_account(&self) -> Result<AccountAuthorization, StorageError> {
        let call = self.authorize_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = *self.auth_latency.lock().unwrap();
        tokio::time::sleep(latency).await;
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::NetworkError { message: "connection refused".into() });
        }
        Ok(AccountAuthorization {
            account_id: "account-1".into(),
            authorization_token: format!("token-{}", call),
            api_url: "https://api.fake.example".into(),
            download_url: "https://f000.fake.example".into(),
            recommended_part_size: Some(100_000_000),
            allowed: None,
        })
    }

    async fn get_upload_url(&self, ctx: &ApiContext<'_>, bucket_id: &str) -> Result<UploadTarget, StorageError> {
        self.check(ctx.token)?;
        Ok(UploadTarget {
            bucket_id: bucket_id.to_string(),
            upload_url: "https://pod.fake.example/upload".into(),
            authorization_token: format!("upload-{}", ctx.token),
        })
    }

    async fn upload_file(&self, _target: &UploadTarget, body: UploadBody<'_>) -> Result<FileVersion, StorageError> {
        self.check("upload")?;
        let total = body.data.len() as u64;
        if let Some(callback) = &body.on_progress {
            callback(total / 2, total);
            callback(total, total);
        }
        let version = FileVersion {
            file_id: format!("fake_{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            file_name: body.file_name.to_string(),
            content_length: total,
            content_type: Some(body.content_type.to_string()),
            upload_timestamp: chrono::Utc::now().timestamp_millis(),
            file_info: body.info.clone(),
        };
        self.files
            .lock()
            .unwrap()
            .insert(body.file_name.to_string(), (version.clone(), body.data.to_vec()));
        Ok(version)
    }

    async fn list_file_names(
        &self,
        ctx: &ApiContext<'_>,
        _bucket_id: &str,
        prefix: &str,
        max_file_count: u32,
    ) -> Result<Vec<FileVersion>, StorageError> {
        self.check(ctx.token)?;
        Ok(self
            .files
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .take(max_file_count as usize)
            .map(|(_, (version, _))| version.clone())
            .collect())
    }

    async fn delete_file_version(&self, ctx: &ApiContext<'_>, file_name: &str, file_id: &str) -> Result<(), StorageError> {
        self.check(ctx.token)?;
        let mut files = self.files.lock().unwrap();
        match files.get(file_name) {
            Some((version, _)) if version.file_id == file_id => {
                files.remove(file_name);
                Ok(())
            }
            _ => Err(StorageError::NotFound { path: file_name.to_string() }),
        }
    }

    async fn download_file_by_name(
        &self,
        ctx: &ApiContext<'_>,
        _bucket_name: &str,
        file_name: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.check(ctx.token)?;
        Ok(self.files.lock().unwrap().get(file_name).map(|(_, data)| data.clone()))
    }

    async fn get_download_authorization(
        &self,
        ctx: &ApiContext<'_>,
        _bucket_id: &str,
        file_name_prefix: &str,
        valid_duration: Duration,
    ) -> Result<String, StorageError> {
        self.check(ctx.token)?;
        Ok(format!("download-{}-{}", file_name_prefix, valid_duration.as_secs()))
    }

    async fn get_file_info(&self, ctx: &ApiContext<'_>, file_id: &str) -> Result<FileVersion, StorageError> {
        self.check(ctx.token)?;
        self.files
            .lock()
            .unwrap()
            .values()
            .find(|(version, _)| version.file_id == file_id)
            .map(|(version, _)| version.clone())
            .ok_or_else(|| StorageError::NotFound { path: file_id.to_string() })
    }
}

pub fn b2_config() -> StorageConfig {
    StorageConfig {
        key_id: "key-id".into(),
        application_key: "application-key".into(),
        key_name: "hr-app".into(),
        bucket_id: BUCKET_ID.into(),
        bucket_name: BUCKET_NAME.into(),
        auth_retry: RetryPolicy::linear(3, Duration::from_secs(1)),
        ..Default::default()
    }
}

pub fn b2_backend(api: Arc<FakeB2Api>, store: Arc<LocalStore>) -> Arc<dyn StorageBackend> {
    StorageFactory::create_b2(&b2_config(), store, api).unwrap()
}

pub struct Harness {
    pub service: DocumentService,
    pub api: Arc<InMemoryDocumentApi>,
}

pub fn service_with(backend: Arc<dyn StorageBackend>, store: Arc<LocalStore>) -> Harness {
    let api = Arc::new(InMemoryDocumentApi::new());
    let mirror = Arc::new(LocalCacheStore::new(store));
    let service = DocumentService::new(backend, mirror, api.clone());
    Harness { service, api }
}

pub fn pdf_bytes(len: usize) -> Vec<u8> {
    let mut data = b"%PDF-1.4\n".to_vec();
    data.resize(len.max(data.len()), b'x');
    data
}

pub fn file_info(pairs: &[(&str, &str)]) -> FileInfo {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
