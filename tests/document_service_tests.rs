mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;

use common::{b2_backend, pdf_bytes, service_with, FakeB2Api, Harness};
use docvault::documents::api::DocumentApi;
use docvault::documents::validation::{MIME_PDF, MIME_PNG};
use docvault::documents::{DocumentError, DocumentService, FileType};
use docvault::model::{
    AccessAction, Document, DocumentMetadata, DocumentScope, DocumentStatus, FileUpload, MetadataUpdate, ScanStatus,
    UploadOptions,
};
use docvault::storage::{LocalCacheStore, LocalStore, MockBackend, StorageConfig, StorageFactory};
use docvault::AppConfig;

fn mock_harness() -> Harness {
    service_with(Arc::new(MockBackend::new("hr-docs")), Arc::new(LocalStore::in_memory()))
}

fn record(id: &str, employee_id: &str) -> Document {
    Document {
        id: id.into(),
        name: format!("{}.pdf", id),
        mime_type: MIME_PDF.into(),
        size: 10,
        upload_date: Utc::now(),
        path: format!("documents/{}/{}.pdf", employee_id, id),
        url: String::new(),
        version: 1,
        is_encrypted: false,
        employee_id: employee_id.into(),
        metadata: DocumentMetadata::default(),
    }
}

#[tokio::test(start_paused = true)]
async fn oversized_file_is_rejected_before_any_request() {
    let api = FakeB2Api::new();
    let Harness { service, api: docs } = service_with(
        b2_backend(api.clone(), Arc::new(LocalStore::in_memory())),
        Arc::new(LocalStore::in_memory()),
    );

    let file = FileUpload::new("scan.pdf", MIME_PDF, pdf_bytes(10 * 1024 * 1024 + 1));
    assert!(matches!(service.validate_file(&file), Err(DocumentError::Validation { .. })));
    let result = service.upload_document(file, "e1", &UploadOptions::default()).await;
    assert!(matches!(result, Err(DocumentError::Validation { .. })));

    assert_eq!(api.authorize_calls(), 0);
    assert_eq!(api.requests(), 0);
    assert_eq!(docs.call_count("create_document"), 0);
}

#[tokio::test]
async fn declared_type_must_match_signature() {
    let Harness { service, .. } = mock_harness();
    assert_eq!(service.detect_file_type(&pdf_bytes(16)).unwrap(), FileType::Pdf);

    let file = FileUpload::new("photo.png", MIME_PNG, pdf_bytes(16));
    match service.upload_document(file, "e1", &UploadOptions::default()).await {
        Err(DocumentError::TypeMismatch { declared, detected }) => {
            assert_eq!(declared, MIME_PNG);
            assert_eq!(detected, MIME_PDF);
        }
        other => panic!("expected type mismatch, got {:?}", other.map(|d| d.id)),
    }
    assert!(service.mirror().is_empty());
}

#[tokio::test]
async fn passport_upload_with_every_option() {
    let Harness { service, api } = mock_harness();
    let options = UploadOptions {
        compress: true,
        encrypt: true,
        virus_scan: true,
        tags: vec!["passport".into()],
        document_type: Some("passport".into()),
        user_id: Some("hr-admin".into()),
        ..Default::default()
    };

    let document = service
        .upload_document(FileUpload::new("passport.pdf", MIME_PDF, pdf_bytes(50)), "emp-7", &options)
        .await
        .unwrap();

    assert_eq!(document.mime_type, "application/pdf");
    assert!(matches!(
        document.metadata.virus_scan_status,
        Some(ScanStatus::Clean) | Some(ScanStatus::Infected)
    ));
    assert_ne!(document.path, "passport.pdf");
    assert!(document.is_encrypted);
    assert_eq!(document.metadata.tags, vec!["passport".to_string()]);

    let log = api.get_access_log(&document.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, AccessAction::Upload);
    assert_eq!(log[0].user_id, "hr-admin");
}

#[tokio::test]
async fn uploaded_document_downloads_unchanged() {
    let Harness { service, .. } = mock_harness();
    let data = pdf_bytes(4096);
    let options = UploadOptions { compress: true, encrypt: true, ..Default::default() };
    let document = service
        .upload_document(FileUpload::new("contract.pdf", MIME_PDF, data.clone()), "emp-1", &options)
        .await
        .unwrap();

    assert_eq!(service.download_document(&document.id, "emp-1").await.unwrap(), data);
    assert_eq!(service.backend().download_file(&document.path).await.unwrap(), Some(data));
}

#[tokio::test(start_paused = true)]
async fn unreachable_store_falls_back_to_local_mirror() {
    let api = FakeB2Api::new();
    api.set_offline(true);
    let Harness { service, .. } = service_with(
        b2_backend(api.clone(), Arc::new(LocalStore::in_memory())),
        Arc::new(LocalStore::in_memory()),
    );

    let data = pdf_bytes(128);
    let document = service
        .upload_document(FileUpload::new("visa.pdf", MIME_PDF, data.clone()), "emp-2", &UploadOptions::default())
        .await
        .unwrap();

    assert!(document.url.starts_with("local://"));
    assert_eq!(api.authorize_calls(), 3);
    assert_eq!(service.mirror().get_bytes(&document.path), Some(data.clone()));
    assert_eq!(service.download_document(&document.id, "emp-2").await.unwrap(), data);

    // a mirror-only document can still be deleted while offline
    service.delete_document(&document.id, "emp-2").await.unwrap();
    assert!(service.mirror().get(&document.path).is_none());
}

#[tokio::test]
async fn delete_removes_every_copy() {
    let Harness { service, api } = mock_harness();
    let document = service
        .upload_document(FileUpload::new("permit.pdf", MIME_PDF, pdf_bytes(64)), "emp-3", &UploadOptions::default())
        .await
        .unwrap();
    assert!(service.backend().list_files("documents/emp-3/", 10).await.unwrap().contains(&document.path));

    service.delete_document(&document.id, "hr-admin").await.unwrap();

    assert!(service.mirror().get(&document.path).is_none());
    assert!(service.backend().list_files("documents/emp-3/", 10).await.unwrap().is_empty());
    assert!(service.get_document_by_id(&document.id).await.is_none());
    assert!(service.get_documents_by_scope(&DocumentScope::Employee("emp-3".into())).await.is_empty());

    let log = api.get_access_log(&document.id).await.unwrap();
    assert_eq!(log.last().map(|e| e.action), Some(AccessAction::Delete));
}

#[tokio::test(start_paused = true)]
async fn failed_remote_delete_still_clears_local_mirror() {
    let api = FakeB2Api::new();
    let Harness { service, .. } = service_with(
        b2_backend(api.clone(), Arc::new(LocalStore::in_memory())),
        Arc::new(LocalStore::in_memory()),
    );
    let document = service
        .upload_document(FileUpload::new("lease.pdf", MIME_PDF, pdf_bytes(96)), "emp-4", &UploadOptions::default())
        .await
        .unwrap();
    assert!(!document.url.starts_with("local://"));

    api.set_offline(true);
    let err = service.delete_document(&document.id, "hr-admin").await.unwrap_err();
    assert!(matches!(err, DocumentError::Storage(_)));
    assert!(service.mirror().get(&document.path).is_none());
    // the record survives so the delete can be retried
    assert!(service.get_document_by_id(&document.id).await.is_some());

    api.set_offline(false);
    service.delete_document(&document.id, "hr-admin").await.unwrap();
    assert!(service.get_document_by_id(&document.id).await.is_none());
    assert!(!api.stored_names().contains(&document.path));
}

#[tokio::test(start_paused = true)]
async fn cached_document_is_fetched_once_per_ttl() {
    let Harness { service, api } = mock_harness();
    api.create_document(&record("doc-1", "emp-1")).await.unwrap();

    assert!(service.get_document_by_id("doc-1").await.is_some());
    assert!(service.get_document_by_id("doc-1").await.is_some());
    assert_eq!(api.call_count("get_document"), 1);

    tokio::time::advance(Duration::from_secs(299)).await;
    assert!(service.get_document_by_id("doc-1").await.is_some());
    assert_eq!(api.call_count("get_document"), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(service.get_document_by_id("doc-1").await.is_some());
    assert!(service.get_document_by_id("doc-1").await.is_some());
    assert_eq!(api.call_count("get_document"), 2);
}

#[tokio::test]
async fn every_mutation_invalidates_document_lists() {
    let Harness { service, api } = mock_harness();
    let all = DocumentScope::All;
    let mine = DocumentScope::Employee("emp-4".into());

    assert!(service.get_documents_by_scope(&all).await.is_empty());
    assert!(service.get_documents_by_scope(&mine).await.is_empty());
    service.get_documents_by_scope(&all).await;
    assert_eq!(api.call_count("list_documents"), 2);

    let document = service
        .upload_document(FileUpload::new("id.pdf", MIME_PDF, pdf_bytes(32)), "emp-4", &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(service.get_documents_by_scope(&all).await.len(), 1);
    assert_eq!(service.get_documents_by_scope(&mine).await.len(), 1);
    assert_eq!(api.call_count("list_documents"), 4);

    let update = MetadataUpdate { tags: Some(vec!["renewed".into()]), ..Default::default() };
    service.update_metadata(&document.id, &update, "hr-admin").await.unwrap();
    let listed = service.get_documents_by_scope(&mine).await;
    assert_eq!(listed[0].metadata.tags, vec!["renewed".to_string()]);
    assert_eq!(api.call_count("list_documents"), 5);

    service.delete_document(&document.id, "hr-admin").await.unwrap();
    assert!(service.get_documents_by_scope(&all).await.is_empty());
    assert_eq!(api.call_count("list_documents"), 6);
}

#[tokio::test]
async fn status_is_derived_on_read() {
    let Harness { service, api } = mock_harness();
    let today = Utc::now().date_naive();

    let mut expiring = record("soon", "emp-5");
    expiring.metadata.expiry_date = Some(today + ChronoDuration::days(10));
    let mut expired = record("past", "emp-5");
    expired.metadata.expiry_date = Some(today - ChronoDuration::days(1));
    // the stored status is stale; reads must not trust it
    expired.metadata.status = DocumentStatus::Valid;
    api.create_document(&expiring).await.unwrap();
    api.create_document(&expired).await.unwrap();
    api.create_document(&record("open", "emp-5")).await.unwrap();

    let documents = service.get_documents_by_scope(&DocumentScope::Employee("emp-5".into())).await;
    let status = |id: &str| documents.iter().find(|d| d.id == id).map(|d| d.metadata.status);
    assert_eq!(status("soon"), Some(DocumentStatus::Expiring));
    assert_eq!(status("past"), Some(DocumentStatus::Expired));
    assert_eq!(status("open"), Some(DocumentStatus::Valid));
}

#[tokio::test]
async fn access_log_is_cached_and_records_views() {
    let Harness { service, api } = mock_harness();
    let document = service
        .upload_document(FileUpload::new("cv.pdf", MIME_PDF, pdf_bytes(32)), "emp-6", &UploadOptions::default())
        .await
        .unwrap();

    let first = service.get_access_log(&document.id, "auditor").await;
    assert_eq!(first.len(), 1);
    let second = service.get_access_log(&document.id, "auditor").await;
    assert_eq!(second, first);
    assert_eq!(api.call_count("get_access_log"), 1);

    service.download_document(&document.id, "emp-6").await.unwrap();
    let after_download = service.get_access_log(&document.id, "auditor").await;
    assert_eq!(api.call_count("get_access_log"), 2);
    let actions: Vec<_> = after_download.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AccessAction::Upload, AccessAction::AccessLogView, AccessAction::AccessLogView, AccessAction::Download]
    );
}

#[tokio::test]
async fn mirror_survives_restart() {
    let dir = TempDir::new().unwrap();
    let data = pdf_bytes(256);
    let path = {
        let store = Arc::new(LocalStore::open(dir.path()).unwrap());
        let Harness { service, .. } = service_with(Arc::new(MockBackend::new("hr-docs")), store);
        service
            .upload_document(FileUpload::new("offer.pdf", MIME_PDF, data.clone()), "emp-8", &UploadOptions::default())
            .await
            .unwrap()
            .path
    };

    let reopened = LocalCacheStore::new(Arc::new(LocalStore::open(dir.path()).unwrap()));
    assert_eq!(reopened.get_bytes(&path), Some(data));
    assert_eq!(reopened.list("documents/emp-8/"), vec![path]);
}

#[tokio::test]
async fn service_from_mock_config() {
    let dir = TempDir::new().unwrap();
    let config = AppConfig {
        storage: StorageConfig {
            local_store_dir: Some(dir.path().to_string_lossy().to_string()),
            document_prefix: "hr".into(),
            ..StorageConfig::mock("configured")
        },
        ..Default::default()
    };
    config.validate().unwrap();

    let service = DocumentService::from_config(&config).unwrap();
    let document = service
        .upload_document(FileUpload::new("a.pdf", MIME_PDF, pdf_bytes(20)), "emp-9", &UploadOptions::default())
        .await
        .unwrap();
    assert!(document.path.starts_with("hr/emp-9/"));
    assert!(document.url.contains("configured"));
    assert!(StorageFactory::open_local_store(&config.storage).unwrap().is_persistent());
}
