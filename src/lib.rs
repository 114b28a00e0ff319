//! # docvault - Document storage core for HR and visa records
//!
//! docvault moves document blobs and their metadata between a B2-compatible
//! object store and a local persistent mirror. It tolerates an unreliable
//! network and a time-limited authorization session, and it is safe to use
//! from many tasks at once.
//!
//! ## Features
//!
//! - **Session management**: single-flight authorization with retry and a 23 hour session
//! - **Dual-path storage**: every blob is mirrored locally; reads prefer the mirror
//! - **Metadata caching**: five minute TTL caches for documents, lists and access logs
//! - **Upload pipeline**: validation, signature sniffing, compression, encryption and scanning
//! - **Batch uploads**: an in-memory queue with bounded batches and front-of-queue retry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docvault::config::AppConfig;
//! use docvault::documents::DocumentService;
//! use docvault::model::{FileUpload, UploadOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load_with_env_overrides("docvault.json")?;
//!     config.validate()?;
//!     docvault::logging::init_logging(config.logging.clone())?;
//!
//!     let service = DocumentService::from_config(&config)?;
//!     let file = FileUpload::new("passport.pdf", "application/pdf", std::fs::read("passport.pdf")?);
//!     let document = service.upload_document(file, "emp-42", &UploadOptions::default()).await?;
//!     println!("stored at {}", document.url);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`storage`] - Object-store backends, authorization and the local mirror
//! - [`cache`] - TTL caches for document metadata
//! - [`documents`] - Validation, processing, the document service and the upload queue
//! - [`config`] - Configuration loading and environment overrides
//! - [`logging`] - Tracing subscriber setup
//! - [`retry`] - Retry combinator used by the storage layer

pub mod cache;
pub mod config;
pub mod documents;
pub mod logging;
pub mod model;
pub mod retry;
pub mod storage;
pub mod utils;

pub use config::AppConfig;
pub use documents::{DocumentError, DocumentService, UploadQueue};
pub use storage::{StorageBackend, StorageError, StorageFactory};
