//! Local persistent key/value store and the blob mirror built on it.
//!
//! [`LocalStore`] plays the role browser local storage plays for a web
//! client: string values under string keys, one JSON document per key,
//! surviving restarts. Writes go to a temporary file and are renamed into
//! place. Concurrent writers to one key race last-write-wins.
//!
//! [`LocalCacheStore`] mirrors object-store blobs under the same paths used
//! remotely. Its operations never fail from the caller's point of view:
//! store errors are logged and swallowed so offline use keeps working.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::model::{Payload, StoredFile};
use crate::storage::backend::StorageError;

/// Key holding the blob mirror
pub const FILES_KEY: &str = "b2_files";
/// Key holding the cached authorization session
pub const AUTH_KEY: &str = "b2_auth";

/// Durable string key/value store
pub struct LocalStore {
    root: Option<PathBuf>,
    entries: Mutex<HashMap<String, String>>,
}

impl LocalStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = dir.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StorageError::LocalStoreError {
            message: format!("Failed to create local store directory {}: {}", root.display(), e),
        })?;
        if !root.is_dir() {
            return Err(StorageError::ConfigurationError {
                message: format!("Local store path is not a directory: {}", root.display()),
            });
        }
        Ok(Self {
            root: Some(root),
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// A store that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            root: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.root.is_some()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key_path(root: &Path, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        root.join(format!("{}.json", safe))
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if let Some(value) = self.entries().get(key) {
            return Ok(Some(value.clone()));
        }
        let Some(root) = &self.root else {
            return Ok(None);
        };
        let path = Self::key_path(root, key);
        match fs::read_to_string(&path) {
            Ok(value) => {
                self.entries().insert(key.to_string(), value.clone());
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::LocalStoreError {
                message: format!("Failed to read {}: {}", path.display(), e),
            }),
        }
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(root) = &self.root {
            let path = Self::key_path(root, key);
            let temp_path = path.with_extension("tmp");
            fs::write(&temp_path, value)
                .and_then(|_| fs::rename(&temp_path, &path))
                .map_err(|e| StorageError::LocalStoreError {
                    message: format!("Failed to write {}: {}", path.display(), e),
                })?;
        }
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        if let Some(root) = &self.root {
            let path = Self::key_path(root, key);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::LocalStoreError {
                        message: format!("Failed to remove {}: {}", path.display(), e),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get_item(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.set_item(key, &raw)
    }
}

/// Blob mirror keyed by remote path
pub struct LocalCacheStore {
    store: Arc<LocalStore>,
    files: Mutex<BTreeMap<String, StoredFile>>,
}

impl LocalCacheStore {
    pub fn new(store: Arc<LocalStore>) -> Self {
        let files = match store.get_json::<BTreeMap<String, StoredFile>>(FILES_KEY) {
            Ok(Some(files)) => files,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(error = %e, "local mirror unreadable, starting empty");
                BTreeMap::new()
            }
        };
        debug!(entries = files.len(), persistent = store.is_persistent(), "local mirror opened");
        Self {
            store,
            files: Mutex::new(files),
        }
    }

    fn files(&self) -> MutexGuard<'_, BTreeMap<String, StoredFile>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, files: &BTreeMap<String, StoredFile>) {
        if let Err(e) = self.store.set_json(FILES_KEY, files) {
            warn!(error = %e, "failed to persist local mirror");
        }
    }

    pub fn get(&self, path: &str) -> Option<StoredFile> {
        self.files().get(path).cloned()
    }

    /// Content of `path` as bytes
    pub fn get_bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.get(path).map(|file| file.content.into_bytes())
    }

    pub fn save(&self, path: &str, content: Payload, content_type: &str) {
        let mut files = self.files();
        files.insert(
            path.to_string(),
            StoredFile {
                content,
                content_type: content_type.to_string(),
                uploaded_at: Utc::now(),
            },
        );
        self.persist(&files);
        debug!(path, "saved to local mirror");
    }

    /// Remove `path`; returns whether an entry existed
    pub fn delete(&self, path: &str) -> bool {
        let mut files = self.files();
        let existed = files.remove(path).is_some();
        if existed {
            self.persist(&files);
        }
        existed
    }

    /// Paths starting with `prefix`, in lexical order
    pub fn list(&self, prefix: &str) -> Vec<String> {
        self.files()
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
