use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::MetadataCache;
use crate::config::AppConfig;
use crate::documents::api::{DocumentApi, HttpDocumentApi, InMemoryDocumentApi};
use crate::documents::pipeline::ProcessingPipeline;
use crate::documents::validation::{self, FileType, ValidationConfig};
use crate::documents::DocumentError;
use crate::model::{
    AccessAction, AccessLogEntry, Document, DocumentMetadata, DocumentScope, DocumentStatus, FileInfo,
    FileUpload, MetadataUpdate, Payload, UploadOptions,
};
use crate::storage::{LocalCacheStore, ProgressCallback, StorageBackend, StorageFactory, UploadRequest};
use crate::utils::generate_storage_path;

/// URL scheme of documents kept only in the local mirror
pub const LOCAL_URL_SCHEME: &str = "local://";

const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Entry point for document operations.
///
/// Blobs go to the local mirror first and then to the storage backend;
/// the document record goes to the metadata API. Reads are served from
/// [`MetadataCache`] while fresh.
pub struct DocumentService {
    backend: Arc<dyn StorageBackend>,
    mirror: Arc<LocalCacheStore>,
    api: Arc<dyn DocumentApi>,
    cache: Arc<MetadataCache>,
    pipeline: ProcessingPipeline,
    validation: ValidationConfig,
    prefix: String,
}

impl DocumentService {
    pub fn new(backend: Arc<dyn StorageBackend>, mirror: Arc<LocalCacheStore>, api: Arc<dyn DocumentApi>) -> Self {
        Self {
            backend,
            mirror,
            api,
            cache: Arc::new(MetadataCache::default()),
            pipeline: ProcessingPipeline::default(),
            validation: ValidationConfig::default(),
            prefix: "documents".to_string(),
        }
    }

    /// Wire up every collaborator from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self, DocumentError> {
        let store = StorageFactory::open_local_store(&config.storage)?;
        let backend = StorageFactory::create_backend(&config.storage, store.clone())?;
        let mirror = Arc::new(LocalCacheStore::new(store));
        let api: Arc<dyn DocumentApi> = match &config.api.base_url {
            Some(base_url) => {
                let timeout = Duration::from_secs(config.api.timeout_secs.unwrap_or(DEFAULT_API_TIMEOUT_SECS));
                Arc::new(HttpDocumentApi::new(base_url, timeout)?)
            }
            None => Arc::new(InMemoryDocumentApi::new()),
        };

        Ok(Self::new(backend, mirror, api)
            .with_cache(Arc::new(MetadataCache::from_config(&config.cache)))
            .with_validation(config.validation.clone())
            .with_prefix(&config.storage.document_prefix))
    }

    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_pipeline(mut self, pipeline: ProcessingPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_matches('/').to_string();
        self
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn mirror(&self) -> &Arc<LocalCacheStore> {
        &self.mirror
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn validate_file(&self, file: &FileUpload) -> Result<(), DocumentError> {
        validation::validate_file(file, &self.validation)
    }

    pub fn detect_file_type(&self, data: &[u8]) -> Result<FileType, DocumentError> {
        validation::detect_file_type(data)
    }

    pub async fn upload_document(
        &self,
        file: FileUpload,
        employee_id: &str,
        options: &UploadOptions,
    ) -> Result<Document, DocumentError> {
        self.upload_document_with_progress(file, employee_id, options, None).await
    }

    /// Validate, process and store `file`, then register it with the metadata API
    pub async fn upload_document_with_progress(
        &self,
        file: FileUpload,
        employee_id: &str,
        options: &UploadOptions,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Document, DocumentError> {
        self.validate_file(&file)?;
        let file_type = validation::verify_file_type(&file)?;
        let outcome = self.pipeline.run(&file.data, options).await?;

        let path = generate_storage_path(&format!("{}/{}", self.prefix, employee_id), &file.name);
        let content_type = file_type.mime_type();
        self.mirror.save(&path, Payload::Binary(file.data.clone()), content_type);

        let mut info = FileInfo::new();
        info.insert("original-name".to_string(), file.name.clone());
        info.insert("employee-id".to_string(), employee_id.to_string());
        if let Some(document_type) = &options.document_type {
            info.insert("document-type".to_string(), document_type.clone());
        }

        let mut request = UploadRequest::new(&path, &file.data, content_type, &info)
            .with_server_side_encryption(outcome.encrypted);
        if let Some(callback) = on_progress {
            request = request.with_progress(callback);
        }
        let url = match self.backend.upload_file(request).await {
            Ok(receipt) => receipt.url,
            Err(e) => {
                warn!(path = %path, error = %e, "remote upload failed, keeping local copy only");
                format!("{}{}", LOCAL_URL_SCHEME, path)
            }
        };

        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            name: file.name.clone(),
            mime_type: content_type.to_string(),
            size: file.size(),
            upload_date: now,
            path,
            url,
            version: 1,
            is_encrypted: outcome.encrypted,
            employee_id: employee_id.to_string(),
            metadata: DocumentMetadata {
                expiry_date: options.expiry_date,
                status: DocumentStatus::derive(options.expiry_date, now.date_naive()),
                tags: options.tags.clone(),
                virus_scan_status: outcome.scan_status,
                compression_ratio: outcome.compression_ratio,
                document_type: options.document_type.clone(),
            },
        };

        let created = match self.api.create_document(&document).await {
            Ok(created) => created,
            Err(e) => {
                self.discard_blob(&document).await;
                return Err(e);
            }
        };
        self.cache.documents.set(created.id.clone(), created.clone());
        self.invalidate_lists(&created.employee_id);

        let user_id = options.user_id.as_deref().unwrap_or(employee_id);
        self.record_access(&created.id, user_id, AccessAction::Upload).await;

        info!(
            document_id = %created.id,
            path = %created.path,
            employee_id,
            bytes = created.size,
            "document uploaded"
        );
        Ok(created)
    }

    /// Documents in `scope`; empty when the metadata API is unavailable
    pub async fn get_documents_by_scope(&self, scope: &DocumentScope) -> Vec<Document> {
        let key = scope.cache_key();
        if let Some(documents) = self.cache.lists.get(&key) {
            debug!(scope = %key, "document list served from cache");
            return with_current_status(documents);
        }

        match self.api.list_documents(scope).await {
            Ok(documents) => {
                self.cache.lists.set(key, documents.clone());
                with_current_status(documents)
            }
            Err(e) => {
                warn!(scope = %key, error = %e, "failed to list documents");
                Vec::new()
            }
        }
    }

    pub async fn get_document_by_id(&self, id: &str) -> Option<Document> {
        if let Some(document) = self.cache.documents.get(&id.to_string()) {
            debug!(document_id = id, "document served from cache");
            return Some(refresh_status(document));
        }

        match self.api.get_document(id).await {
            Ok(Some(document)) => {
                self.cache.documents.set(id.to_string(), document.clone());
                Some(refresh_status(document))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(document_id = id, error = %e, "failed to fetch document");
                None
            }
        }
    }

    pub async fn update_metadata(
        &self,
        id: &str,
        update: &MetadataUpdate,
        user_id: &str,
    ) -> Result<Document, DocumentError> {
        let updated = refresh_status(self.api.update_metadata(id, update).await?);
        self.cache.documents.set(id.to_string(), updated.clone());
        self.invalidate_lists(&updated.employee_id);
        self.record_access(id, user_id, AccessAction::MetadataSave).await;
        info!(document_id = id, version = updated.version, "document metadata updated");
        Ok(updated)
    }

    /// Remove a document from the backend, the local mirror, the caches and the metadata API
    pub async fn delete_document(&self, id: &str, user_id: &str) -> Result<(), DocumentError> {
        let document = self
            .get_document_by_id(id)
            .await
            .ok_or_else(|| DocumentError::NotFound { id: id.to_string() })?;

        self.mirror.delete(&document.path);
        if !document.url.starts_with(LOCAL_URL_SCHEME) {
            if let Err(e) = self.backend.delete_file(&document.path).await {
                warn!(document_id = id, path = %document.path, error = %e, "remote delete failed");
                self.cache.forget_document(id);
                return Err(e.into());
            }
        }
        self.api.delete_document(id).await?;

        self.cache.forget_document(id);
        self.invalidate_lists(&document.employee_id);
        self.record_access(id, user_id, AccessAction::Delete).await;

        info!(document_id = id, path = %document.path, "document deleted");
        Ok(())
    }

    /// Content of a document, from the local mirror when present
    pub async fn download_document(&self, id: &str, user_id: &str) -> Result<Vec<u8>, DocumentError> {
        let document = self
            .get_document_by_id(id)
            .await
            .ok_or_else(|| DocumentError::NotFound { id: id.to_string() })?;

        let data = match self.mirror.get_bytes(&document.path) {
            Some(data) => data,
            None => {
                let data = self
                    .backend
                    .download_file(&document.path)
                    .await?
                    .ok_or_else(|| DocumentError::NotFound { id: id.to_string() })?;
                self.mirror.save(&document.path, Payload::Binary(data.clone()), &document.mime_type);
                data
            }
        };

        self.record_access(id, user_id, AccessAction::Download).await;
        Ok(data)
    }

    /// Access history of a document; records the view itself
    pub async fn get_access_log(&self, document_id: &str, user_id: &str) -> Vec<AccessLogEntry> {
        let key = document_id.to_string();
        let entries = match self.cache.access_logs.get(&key) {
            Some(entries) => entries,
            None => match self.api.get_access_log(document_id).await {
                Ok(entries) => {
                    self.cache.access_logs.set(key, entries.clone());
                    entries
                }
                Err(e) => {
                    warn!(document_id, error = %e, "failed to fetch access log");
                    Vec::new()
                }
            },
        };
        self.record_access(document_id, user_id, AccessAction::AccessLogView).await;
        entries
    }

    async fn record_access(&self, document_id: &str, user_id: &str, action: AccessAction) {
        let entry = AccessLogEntry::now(document_id, user_id, action);
        if let Err(e) = self.api.log_access(&entry).await {
            warn!(document_id, %action, error = %e, "failed to record access");
            return;
        }
        // viewing the log does not change what a cached copy would show
        if action != AccessAction::AccessLogView {
            self.cache.access_logs.invalidate(&document_id.to_string());
        }
    }

    /// Remove the blob of a document that never got a metadata record
    async fn discard_blob(&self, document: &Document) {
        self.mirror.delete(&document.path);
        if document.url.starts_with(LOCAL_URL_SCHEME) {
            return;
        }
        if let Err(e) = self.backend.delete_file(&document.path).await {
            warn!(path = %document.path, error = %e, "failed to remove orphaned blob");
        }
    }

    fn invalidate_lists(&self, employee_id: &str) {
        self.cache.lists.invalidate(&DocumentScope::Employee(employee_id.to_string()).cache_key());
        self.cache.lists.invalidate(&DocumentScope::All.cache_key());
    }
}

fn refresh_status(mut document: Document) -> Document {
    document.metadata.status = document.status();
    document
}

fn with_current_status(documents: Vec<Document>) -> Vec<Document> {
    documents.into_iter().map(refresh_status).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::validation::MIME_PDF;
    use crate::model::ScanStatus;
    use crate::storage::{LocalStore, MockBackend};

    fn service() -> (DocumentService, Arc<InMemoryDocumentApi>) {
        let api = Arc::new(InMemoryDocumentApi::new());
        let mirror = Arc::new(LocalCacheStore::new(Arc::new(LocalStore::in_memory())));
        let service = DocumentService::new(Arc::new(MockBackend::new("hr-docs")), mirror, api.clone());
        (service, api)
    }

    fn pdf(len: usize) -> Vec<u8> {
        let mut data = b"%PDF-1.4\n".to_vec();
        data.resize(len, b' ');
        data
    }

    #[tokio::test]
    async fn upload_fills_processing_metadata() {
        let (service, api) = service();
        let options = UploadOptions { compress: true, encrypt: true, virus_scan: true, ..Default::default() };
        let document = service
            .upload_document(FileUpload::new("passport.pdf", MIME_PDF, pdf(50)), "emp-1", &options)
            .await
            .unwrap();

        assert_eq!(document.mime_type, MIME_PDF);
        assert_eq!(document.size, 50);
        assert!(document.is_encrypted);
        assert!(document.metadata.compression_ratio.is_some());
        assert_eq!(document.metadata.virus_scan_status, Some(ScanStatus::Clean));
        assert_ne!(document.path, "passport.pdf");
        assert!(document.path.starts_with("documents/emp-1/"));
        assert!(document.path.ends_with(".pdf"));
        assert!(document.url.contains("hr-docs"));
        assert_eq!(api.call_count("create_document"), 1);
        assert_eq!(api.get_access_log(&document.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_upload_never_reaches_storage() {
        let (service, api) = service();
        let service = service.with_validation(ValidationConfig { max_file_size: 16, ..Default::default() });
        let result = service
            .upload_document(FileUpload::new("big.pdf", MIME_PDF, pdf(17)), "emp-1", &UploadOptions::default())
            .await;
        assert!(matches!(result, Err(DocumentError::Validation { .. })));
        assert_eq!(api.call_count("create_document"), 0);
        assert!(service.mirror().is_empty());
    }

    #[tokio::test]
    async fn download_prefers_local_mirror() {
        let (service, _) = service();
        let data = pdf(64);
        let document = service
            .upload_document(FileUpload::new("contract.pdf", MIME_PDF, data.clone()), "emp-2", &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(service.download_document(&document.id, "hr").await.unwrap(), data);

        // mirror gone, backend still has it
        service.mirror().delete(&document.path);
        assert_eq!(service.download_document(&document.id, "hr").await.unwrap(), data);
        assert!(service.mirror().get(&document.path).is_some());
    }

    #[tokio::test]
    async fn update_metadata_rederives_status() {
        let (service, _) = service();
        let document = service
            .upload_document(FileUpload::new("visa.pdf", MIME_PDF, pdf(20)), "emp-3", &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(document.metadata.status, DocumentStatus::Valid);

        let yesterday = Utc::now().date_naive().pred_opt().unwrap();
        let update = MetadataUpdate { expiry_date: Some(yesterday), ..Default::default() };
        let updated = service.update_metadata(&document.id, &update, "hr").await.unwrap();
        assert_eq!(updated.metadata.status, DocumentStatus::Expired);
        assert_eq!(
            service.get_document_by_id(&document.id).await.unwrap().metadata.status,
            DocumentStatus::Expired
        );
    }

    #[tokio::test]
    async fn missing_documents_are_not_found() {
        let (service, _) = service();
        assert!(service.get_document_by_id("nope").await.is_none());
        assert!(matches!(service.delete_document("nope", "hr").await, Err(DocumentError::NotFound { .. })));
        assert!(matches!(service.download_document("nope", "hr").await, Err(DocumentError::NotFound { .. })));
    }
}
