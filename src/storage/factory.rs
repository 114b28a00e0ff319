use std::sync::Arc;
use tracing::info;

use crate::storage::auth::AuthorizationManager;
use crate::storage::b2_api::{B2Api, HttpB2Api};
use crate::storage::backend::{StorageBackend, StorageConfig, StorageError, StorageType};
use crate::storage::backends::{B2Backend, MockBackend};
use crate::storage::local::LocalStore;

/// Storage backend factory for creating storage instances
pub struct StorageFactory;

impl StorageFactory {
    /// Create a storage backend from configuration
    pub fn create_backend(config: &StorageConfig, store: Arc<LocalStore>) -> Result<Arc<dyn StorageBackend>, StorageError> {
        match config.storage_type() {
            StorageType::Mock => Ok(Self::create_mock(config)),
            StorageType::B2 => {
                let api: Arc<dyn B2Api> = Arc::new(HttpB2Api::new(config)?);
                Self::create_b2(config, store, api)
            }
        }
    }

    /// B2 backend over an explicit wire client
    pub fn create_b2(config: &StorageConfig, store: Arc<LocalStore>, api: Arc<dyn B2Api>) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let auth = Arc::new(AuthorizationManager::new(api.clone(), store, config.auth_retry.clone()));
        let backend = B2Backend::new(api, auth, config)?;
        info!(bucket = %config.bucket_name, key_name = %config.key_name, "using B2 storage backend");
        Ok(Arc::new(backend))
    }

    pub fn create_mock(config: &StorageConfig) -> Arc<dyn StorageBackend> {
        info!(bucket = %config.bucket_name, "using mock storage backend");
        Arc::new(MockBackend::new(config.bucket_name.clone()))
    }

    /// Open the local store named by the configuration
    pub fn open_local_store(config: &StorageConfig) -> Result<Arc<LocalStore>, StorageError> {
        let store = match &config.local_store_dir {
            Some(dir) => LocalStore::open(dir)?,
            None => LocalStore::in_memory(),
        };
        Ok(Arc::new(store))
    }
}
