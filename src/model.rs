use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::utils::{decode_base64, encode_base64};

/// Days before expiry at which a document is reported as expiring.
pub const EXPIRING_WINDOW_DAYS: i64 = 30;

/// A stored HR/visa document record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    pub upload_date: DateTime<Utc>,
    /// Key in the object store and in the local mirror.
    pub path: String,
    pub url: String,
    pub version: u32,
    pub is_encrypted: bool,
    pub employee_id: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Status derived from the expiry date relative to `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> DocumentStatus {
        DocumentStatus::derive(self.metadata.expiry_date, now.date_naive())
    }

    pub fn status(&self) -> DocumentStatus {
        self.status_at(Utc::now())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub expiry_date: Option<NaiveDate>,
    /// Status as last written by the metadata API. Use [`Document::status`]
    /// for the current value.
    pub status: DocumentStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub virus_scan_status: Option<ScanStatus>,
    pub compression_ratio: Option<f64>,
    pub document_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Valid,
    Expiring,
    Expired,
}

impl DocumentStatus {
    pub fn derive(expiry_date: Option<NaiveDate>, today: NaiveDate) -> Self {
        match expiry_date {
            None => DocumentStatus::Valid,
            Some(expiry) if expiry < today => DocumentStatus::Expired,
            Some(expiry) if expiry <= today + Duration::days(EXPIRING_WINDOW_DAYS) => {
                DocumentStatus::Expiring
            }
            Some(_) => DocumentStatus::Valid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Clean,
    Infected,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Clean => write!(f, "clean"),
            ScanStatus::Infected => write!(f, "infected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessAction {
    Download,
    Delete,
    Upload,
    MetadataSave,
    AccessLogView,
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessAction::Download => "download",
            AccessAction::Delete => "delete",
            AccessAction::Upload => "upload",
            AccessAction::MetadataSave => "metadata-save",
            AccessAction::AccessLogView => "access-log-view",
        };
        f.write_str(s)
    }
}

/// One append-only access record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    pub document_id: String,
    pub user_id: String,
    pub action: AccessAction,
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<String>,
}

impl AccessLogEntry {
    pub fn now(document_id: &str, user_id: &str, action: AccessAction) -> Self {
        Self {
            document_id: document_id.to_string(),
            user_id: user_id.to_string(),
            action,
            timestamp: Utc::now(),
            ip_address: None,
        }
    }
}

/// File content as handed over at the call boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.into_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
enum PayloadRepr {
    Text(String),
    Binary(String),
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self {
            Payload::Text(text) => PayloadRepr::Text(text.clone()),
            Payload::Binary(bytes) => PayloadRepr::Binary(encode_base64(bytes)),
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match PayloadRepr::deserialize(deserializer)? {
            PayloadRepr::Text(text) => Ok(Payload::Text(text)),
            PayloadRepr::Binary(encoded) => decode_base64(&encoded)
                .map(Payload::Binary)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Local mirror record, keyed by the remote path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub content: Payload,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A file handed to the service for upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub compress: bool,
    pub encrypt: bool,
    pub virus_scan: bool,
    pub tags: Vec<String>,
    pub expiry_date: Option<NaiveDate>,
    pub document_type: Option<String>,
    /// Acting user recorded in the access log.
    pub user_id: Option<String>,
}

/// Partial metadata update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdate {
    pub name: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub tags: Option<Vec<String>>,
    pub document_type: Option<String>,
}

impl MetadataUpdate {
    pub fn apply_to(&self, document: &mut Document) {
        if let Some(name) = &self.name {
            document.name = name.clone();
        }
        if let Some(expiry) = self.expiry_date {
            document.metadata.expiry_date = Some(expiry);
        }
        if let Some(tags) = &self.tags {
            document.metadata.tags = tags.clone();
        }
        if let Some(document_type) = &self.document_type {
            document.metadata.document_type = Some(document_type.clone());
        }
        document.metadata.status = DocumentStatus::derive(
            document.metadata.expiry_date,
            Utc::now().date_naive(),
        );
    }
}

/// Which set of documents a list query covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentScope {
    All,
    Employee(String),
}

impl DocumentScope {
    pub fn cache_key(&self) -> String {
        match self {
            DocumentScope::All => "all".to_string(),
            DocumentScope::Employee(id) => format!("employee:{}", id),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            DocumentScope::All => true,
            DocumentScope::Employee(id) => &document.employee_id == id,
        }
    }
}

/// Free-form metadata attached to an upload, sent as object-store file info.
pub type FileInfo = HashMap<String, String>;
