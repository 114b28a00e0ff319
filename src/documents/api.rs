//! Client side of the document metadata REST API.
//!
//! The database-backed record of a document lives behind this API; the
//! storage core only consumes it. [`InMemoryDocumentApi`] stands in for it
//! in mock mode and tests.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::documents::DocumentError;
use crate::model::{AccessLogEntry, Document, DocumentScope, MetadataUpdate};

#[async_trait]
pub trait DocumentApi: Send + Sync {
    async fn create_document(&self, document: &Document) -> Result<Document, DocumentError>;

    async fn list_documents(&self, scope: &DocumentScope) -> Result<Vec<Document>, DocumentError>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>, DocumentError>;

    async fn update_metadata(&self, id: &str, update: &MetadataUpdate) -> Result<Document, DocumentError>;

    async fn delete_document(&self, id: &str) -> Result<(), DocumentError>;

    async fn log_access(&self, entry: &AccessLogEntry) -> Result<(), DocumentError>;

    async fn get_access_log(&self, document_id: &str) -> Result<Vec<AccessLogEntry>, DocumentError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentApiConfig {
    /// Base URL of the metadata API; the in-memory API is used when unset
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Default)]
struct InMemoryState {
    documents: BTreeMap<String, Document>,
    access_log: HashMap<String, Vec<AccessLogEntry>>,
    calls: HashMap<&'static str, u64>,
}

/// Process-local metadata API
#[derive(Default)]
pub struct InMemoryDocumentApi {
    state: Mutex<InMemoryState>,
}

impl InMemoryDocumentApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, operation: &'static str) -> MutexGuard<'_, InMemoryState> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *state.calls.entry(operation).or_insert(0) += 1;
        state
    }

    /// How often `operation` (e.g. `"list_documents"`) was called
    pub fn call_count(&self, operation: &str) -> u64 {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.calls.get(operation).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DocumentApi for InMemoryDocumentApi {
    async fn create_document(&self, document: &Document) -> Result<Document, DocumentError> {
        let mut state = self.state("create_document");
        state.documents.insert(document.id.clone(), document.clone());
        Ok(document.clone())
    }

    async fn list_documents(&self, scope: &DocumentScope) -> Result<Vec<Document>, DocumentError> {
        let state = self.state("list_documents");
        Ok(state.documents.values().filter(|d| scope.matches(d)).cloned().collect())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, DocumentError> {
        let state = self.state("get_document");
        Ok(state.documents.get(id).cloned())
    }

    async fn update_metadata(&self, id: &str, update: &MetadataUpdate) -> Result<Document, DocumentError> {
        let mut state = self.state("update_metadata");
        let document = state
            .documents
            .get_mut(id)
            .ok_or_else(|| DocumentError::NotFound { id: id.to_string() })?;
        update.apply_to(document);
        document.version += 1;
        Ok(document.clone())
    }

    async fn delete_document(&self, id: &str) -> Result<(), DocumentError> {
        let mut state = self.state("delete_document");
        state.documents.remove(id);
        Ok(())
    }

    async fn log_access(&self, entry: &AccessLogEntry) -> Result<(), DocumentError> {
        let mut state = self.state("log_access");
        state
            .access_log
            .entry(entry.document_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn get_access_log(&self, document_id: &str) -> Result<Vec<AccessLogEntry>, DocumentError> {
        let state = self.state("get_access_log");
        Ok(state.access_log.get(document_id).cloned().unwrap_or_default())
    }
}

/// JSON-over-HTTP metadata API
pub struct HttpDocumentApi {
    client: Client,
    base_url: String,
}

impl HttpDocumentApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DocumentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DocumentError::Api { message: format!("Failed to create HTTP client: {}", e) })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn document_url(&self, id: &str, suffix: &str) -> String {
        self.url(&format!("documents/{}{}", urlencoding::encode(id), suffix))
    }
}

fn api_error(operation: &str, e: impl std::fmt::Display) -> DocumentError {
    DocumentError::Api { message: format!("{}: {}", operation, e) }
}

async fn expect_success(response: reqwest::Response, operation: &str) -> Result<reqwest::Response, DocumentError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(api_error(operation, format!("{} {}", status, body)))
    }
}

#[async_trait]
impl DocumentApi for HttpDocumentApi {
    async fn create_document(&self, document: &Document) -> Result<Document, DocumentError> {
        let response = self
            .client
            .post(self.url("documents"))
            .json(document)
            .send()
            .await
            .map_err(|e| api_error("create_document", e))?;
        let response = expect_success(response, "create_document").await?;
        response.json().await.map_err(|e| api_error("create_document", e))
    }

    async fn list_documents(&self, scope: &DocumentScope) -> Result<Vec<Document>, DocumentError> {
        let mut request = self.client.get(self.url("documents"));
        if let DocumentScope::Employee(employee_id) = scope {
            request = request.query(&[("employeeId", employee_id)]);
        }
        let response = request.send().await.map_err(|e| api_error("list_documents", e))?;
        let response = expect_success(response, "list_documents").await?;
        response.json().await.map_err(|e| api_error("list_documents", e))
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, DocumentError> {
        let response = self
            .client
            .get(self.document_url(id, ""))
            .send()
            .await
            .map_err(|e| api_error("get_document", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_success(response, "get_document").await?;
        response.json().await.map(Some).map_err(|e| api_error("get_document", e))
    }

    async fn update_metadata(&self, id: &str, update: &MetadataUpdate) -> Result<Document, DocumentError> {
        let response = self
            .client
            .patch(self.document_url(id, "/metadata"))
            .json(update)
            .send()
            .await
            .map_err(|e| api_error("update_metadata", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DocumentError::NotFound { id: id.to_string() });
        }
        let response = expect_success(response, "update_metadata").await?;
        response.json().await.map_err(|e| api_error("update_metadata", e))
    }

    async fn delete_document(&self, id: &str) -> Result<(), DocumentError> {
        let response = self
            .client
            .delete(self.document_url(id, ""))
            .send()
            .await
            .map_err(|e| api_error("delete_document", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(response, "delete_document").await?;
        Ok(())
    }

    async fn log_access(&self, entry: &AccessLogEntry) -> Result<(), DocumentError> {
        let response = self
            .client
            .post(self.document_url(&entry.document_id, "/access-log"))
            .json(entry)
            .send()
            .await
            .map_err(|e| api_error("log_access", e))?;
        expect_success(response, "log_access").await?;
        Ok(())
    }

    async fn get_access_log(&self, document_id: &str) -> Result<Vec<AccessLogEntry>, DocumentError> {
        let response = self
            .client
            .get(self.document_url(document_id, "/access-log"))
            .send()
            .await
            .map_err(|e| api_error("get_access_log", e))?;
        let response = expect_success(response, "get_access_log").await?;
        response.json().await.map_err(|e| api_error("get_access_log", e))
    }
}
