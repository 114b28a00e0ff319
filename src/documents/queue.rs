use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::documents::service::DocumentService;
use crate::documents::DocumentError;
use crate::model::{Document, FileUpload, UploadOptions};

/// Upload queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Uploads started together in one pass
    pub batch_size: usize,
    /// Pause before retrying a batch that had failures
    #[serde(with = "crate::retry::duration_millis", rename = "retry_delay_ms")]
    pub retry_delay: Duration,
    /// Tries per file before it is dropped
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            retry_delay: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedUpload {
    file: FileUpload,
    employee_id: String,
    options: UploadOptions,
    attempts: u32,
}

/// A file the queue gave up on
#[derive(Debug, Clone)]
pub struct FailedUpload {
    pub name: String,
    pub employee_id: String,
    pub attempts: u32,
    pub error: String,
}

/// Outcome of one [`UploadQueue::process`] run
#[derive(Debug, Clone, Default)]
pub struct QueueReport {
    pub uploaded: Vec<Document>,
    pub failed: Vec<FailedUpload>,
}

/// Clears the processing flag when a pass ends, however it ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// In-memory batch uploader.
///
/// Files wait here until [`process`](UploadQueue::process) drains them in
/// batches through [`DocumentService::upload_document`]. Failed items go
/// back to the front of the queue in their original order. Only one pass
/// runs at a time. The queue is not persisted.
pub struct UploadQueue {
    service: Arc<DocumentService>,
    config: QueueConfig,
    pending: Mutex<VecDeque<QueuedUpload>>,
    processing: AtomicBool,
}

impl UploadQueue {
    pub fn new(service: Arc<DocumentService>, config: QueueConfig) -> Self {
        Self {
            service,
            config,
            pending: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<QueuedUpload>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a file; returns the queue length
    pub fn enqueue(&self, file: FileUpload, employee_id: &str, options: UploadOptions) -> usize {
        let mut pending = self.pending();
        pending.push_back(QueuedUpload {
            file,
            employee_id: employee_id.to_string(),
            options,
            attempts: 0,
        });
        debug!(queued = pending.len(), "upload enqueued");
        pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Drain the queue. Returns `None` when another pass is already running.
    pub async fn process(&self) -> Option<QueueReport> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("upload queue already processing");
            return None;
        }
        let _guard = PassGuard(&self.processing);

        let mut report = QueueReport::default();
        loop {
            let batch: Vec<QueuedUpload> = {
                let mut pending = self.pending();
                let take = self.config.batch_size.max(1).min(pending.len());
                pending.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for item in &batch {
                let service = self.service.clone();
                let file = item.file.clone();
                let employee_id = item.employee_id.clone();
                let options = item.options.clone();
                handles.push(tokio::spawn(async move {
                    service.upload_document(file, &employee_id, &options).await
                }));
            }

            let mut retry = Vec::new();
            for (mut item, handle) in batch.into_iter().zip(handles) {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(DocumentError::Processing {
                        step: "upload",
                        message: e.to_string(),
                    }),
                };
                match result {
                    Ok(document) => report.uploaded.push(document),
                    Err(e) => {
                        item.attempts += 1;
                        if e.is_retryable() && item.attempts < self.config.max_attempts {
                            debug!(name = %item.file.name, attempt = item.attempts, error = %e, "queued upload failed, will retry");
                            retry.push(item);
                        } else {
                            warn!(name = %item.file.name, attempts = item.attempts, error = %e, "dropping queued upload");
                            report.failed.push(FailedUpload {
                                name: item.file.name,
                                employee_id: item.employee_id,
                                attempts: item.attempts,
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }

            if !retry.is_empty() {
                {
                    let mut pending = self.pending();
                    for item in retry.into_iter().rev() {
                        pending.push_front(item);
                    }
                }
                sleep(self.config.retry_delay).await;
            }
        }

        info!(
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
            "upload queue drained"
        );
        Some(report)
    }
}
