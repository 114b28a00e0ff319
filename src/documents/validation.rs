//! Upload limits and content sniffing by file signature.

use serde::{Deserialize, Serialize};

use crate::documents::DocumentError;
use crate::model::FileUpload;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Formats recognised by their leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    Pdf,
    Jpeg,
    Png,
    Doc,
    Docx,
}

/// Signature table, checked in order against the first bytes of a file
const SIGNATURES: &[(&[u8], FileType)] = &[
    (&[0x25, 0x50, 0x44, 0x46], FileType::Pdf),
    (&[0xFF, 0xD8, 0xFF], FileType::Jpeg),
    (&[0x89, 0x50, 0x4E, 0x47], FileType::Png),
    (&[0xD0, 0xCF, 0x11, 0xE0], FileType::Doc),
    (&[0x50, 0x4B, 0x03, 0x04], FileType::Docx),
];

impl FileType {
    pub const ALL: [FileType; 5] = [FileType::Pdf, FileType::Jpeg, FileType::Png, FileType::Doc, FileType::Docx];

    pub fn mime_type(&self) -> &'static str {
        match self {
            FileType::Pdf => MIME_PDF,
            FileType::Jpeg => MIME_JPEG,
            FileType::Png => MIME_PNG,
            FileType::Doc => MIME_DOC,
            FileType::Docx => MIME_DOCX,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Jpeg => "jpg",
            FileType::Png => "png",
            FileType::Doc => "doc",
            FileType::Docx => "docx",
        }
    }

    pub fn signature(&self) -> &'static [u8] {
        SIGNATURES
            .iter()
            .find(|(_, file_type)| file_type == self)
            .map(|(signature, _)| *signature)
            .unwrap_or(&[])
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.mime_type() == mime)
    }
}

/// Size and type limits for uploads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_file_size: u64,
    pub allowed_mime_types: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_mime_types: FileType::ALL.iter().map(|t| t.mime_type().to_string()).collect(),
        }
    }
}

impl ValidationConfig {
    pub fn allows(&self, mime: &str) -> bool {
        self.allowed_mime_types.iter().any(|allowed| allowed.eq_ignore_ascii_case(mime.trim()))
    }
}

/// Reject files that are empty, too large, or of a type outside the allow-list
pub fn validate_file(file: &FileUpload, config: &ValidationConfig) -> Result<(), DocumentError> {
    if file.data.is_empty() {
        return Err(DocumentError::Validation {
            message: format!("{} is empty", file.name),
        });
    }
    if file.size() > config.max_file_size {
        return Err(DocumentError::Validation {
            message: format!(
                "{} is {} bytes, larger than the {} byte limit",
                file.name,
                file.size(),
                config.max_file_size
            ),
        });
    }
    if !config.allows(&file.content_type) {
        return Err(DocumentError::Validation {
            message: format!("file type {} is not allowed", file.content_type),
        });
    }
    Ok(())
}

/// Identify a file by its first four bytes
pub fn detect_file_type(data: &[u8]) -> Result<FileType, DocumentError> {
    let header = &data[..data.len().min(4)];
    SIGNATURES
        .iter()
        .find(|(signature, _)| header.starts_with(signature))
        .map(|(_, file_type)| *file_type)
        .ok_or_else(|| DocumentError::UnknownFileType {
            signature: header.iter().map(|b| format!("{:02X}", b)).collect(),
        })
}

/// Detect the real type and make sure it agrees with the declared one
pub fn verify_file_type(file: &FileUpload) -> Result<FileType, DocumentError> {
    let detected = detect_file_type(&file.data)?;
    if !detected.mime_type().eq_ignore_ascii_case(file.content_type.trim()) {
        return Err(DocumentError::TypeMismatch {
            declared: file.content_type.clone(),
            detected: detected.mime_type().to_string(),
        });
    }
    Ok(detected)
}
