//! Processing steps run on a validated upload.
//!
//! Compression, encryption and scanning run concurrently over the same
//! validated bytes. Each contributes metadata to the stored document; the
//! bytes written to storage are the validated original. The steps sit behind
//! traits so a deployment can plug in a real scanner or key service.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::documents::DocumentError;
use crate::model::{ScanStatus, UploadOptions};

/// EICAR anti-virus test signature
const EICAR_SIGNATURE: &[u8] = b"EICAR-STANDARD-ANTIVIRUS-TEST-FILE";

#[async_trait]
pub trait Compressor: Send + Sync {
    /// Ratio of compressed to original size
    async fn compression_ratio(&self, data: &[u8]) -> Result<f64, DocumentError>;
}

#[async_trait]
pub trait Encryptor: Send + Sync {
    /// Whether the stored object will be encrypted at rest
    async fn encrypt(&self, data: &[u8]) -> Result<bool, DocumentError>;
}

#[async_trait]
pub trait VirusScanner: Send + Sync {
    async fn scan(&self, data: &[u8]) -> Result<ScanStatus, DocumentError>;
}

/// Measures how well a payload compresses with gzip
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCompressor;

#[async_trait]
impl Compressor for GzipCompressor {
    async fn compression_ratio(&self, data: &[u8]) -> Result<f64, DocumentError> {
        if data.is_empty() {
            return Ok(1.0);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| DocumentError::Processing { step: "compress", message: e.to_string() })?;
        let compressed = encoder
            .finish()
            .map_err(|e| DocumentError::Processing { step: "compress", message: e.to_string() })?;
        Ok(compressed.len() as f64 / data.len() as f64)
    }
}

/// Requests server-side encryption from the object store
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerSideEncryption;

#[async_trait]
impl Encryptor for ServerSideEncryption {
    async fn encrypt(&self, _data: &[u8]) -> Result<bool, DocumentError> {
        Ok(true)
    }
}

/// Flags payloads containing the EICAR test signature
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureScanner;

#[async_trait]
impl VirusScanner for SignatureScanner {
    async fn scan(&self, data: &[u8]) -> Result<ScanStatus, DocumentError> {
        let infected = data
            .windows(EICAR_SIGNATURE.len())
            .any(|window| window == EICAR_SIGNATURE);
        Ok(if infected { ScanStatus::Infected } else { ScanStatus::Clean })
    }
}

/// Merged output of the processing steps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingOutcome {
    pub compression_ratio: Option<f64>,
    pub encrypted: bool,
    pub scan_status: Option<ScanStatus>,
}

#[derive(Clone)]
pub struct ProcessingPipeline {
    compressor: Arc<dyn Compressor>,
    encryptor: Arc<dyn Encryptor>,
    scanner: Arc<dyn VirusScanner>,
}

impl Default for ProcessingPipeline {
    fn default() -> Self {
        Self::new(Arc::new(GzipCompressor), Arc::new(ServerSideEncryption), Arc::new(SignatureScanner))
    }
}

impl ProcessingPipeline {
    pub fn new(compressor: Arc<dyn Compressor>, encryptor: Arc<dyn Encryptor>, scanner: Arc<dyn VirusScanner>) -> Self {
        Self { compressor, encryptor, scanner }
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn VirusScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Run the steps selected in `options` concurrently
    pub async fn run(&self, data: &[u8], options: &UploadOptions) -> Result<ProcessingOutcome, DocumentError> {
        let compress = async {
            if options.compress {
                self.compressor.compression_ratio(data).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let encrypt = async {
            if options.encrypt {
                self.encryptor.encrypt(data).await
            } else {
                Ok(false)
            }
        };
        let scan = async {
            if options.virus_scan {
                self.scanner.scan(data).await.map(Some)
            } else {
                Ok(None)
            }
        };

        let (compression_ratio, encrypted, scan_status) = tokio::try_join!(compress, encrypt, scan)?;
        if scan_status == Some(ScanStatus::Infected) {
            warn!(bytes = data.len(), "virus scan flagged upload");
        }
        debug!(?compression_ratio, encrypted, ?scan_status, "processing finished");
        Ok(ProcessingOutcome {
            compression_ratio,
            encrypted,
            scan_status,
        })
    }
}
