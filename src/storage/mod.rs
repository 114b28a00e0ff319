pub mod auth;
pub mod b2_api;
pub mod backend;
pub mod backends;
pub mod factory;
pub mod local;

pub use auth::{AuthSession, AuthorizationManager};
pub use b2_api::{B2Api, HttpB2Api};
pub use backend::{
    ProgressCallback, RemoteFileInfo, StorageBackend, StorageConfig, StorageError, StorageErrorCode,
    StorageType, UploadReceipt, UploadRequest,
};
pub use backends::{B2Backend, MockBackend};
pub use factory::StorageFactory;
pub use local::{LocalCacheStore, LocalStore};
