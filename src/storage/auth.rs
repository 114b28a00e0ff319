//! Authorization session lifecycle for the object store.
//!
//! A session is acquired once and shared by every caller until it expires.
//! Acquisition is single-flight: the session slot is guarded by an async mutex
//! held for the whole acquisition, so callers arriving while a request is in
//! flight wait for it and then find the fresh session instead of issuing their
//! own request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::retry::{retry, RetryPolicy};
use crate::storage::b2_api::{AccountAuthorization, ApiContext, B2Api};
use crate::storage::backend::StorageError;
use crate::storage::local::{LocalStore, AUTH_KEY};

/// Sessions are treated as expired this long after acquisition. The store
/// issues 24h tokens.
pub const SESSION_LIFETIME_HOURS: i64 = 23;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub api_url: String,
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub allowed_bucket_id: Option<String>,
    #[serde(default)]
    pub allowed_bucket_name: Option<String>,
    #[serde(default)]
    pub recommended_part_size: Option<u64>,
}

impl AuthSession {
    pub fn from_authorization(auth: AccountAuthorization, acquired_at: DateTime<Utc>) -> Self {
        let (allowed_bucket_id, allowed_bucket_name) = auth
            .allowed
            .map(|scope| (scope.bucket_id, scope.bucket_name))
            .unwrap_or((None, None));
        Self {
            token: auth.authorization_token,
            api_url: auth.api_url,
            download_url: auth.download_url,
            expires_at: acquired_at + Duration::hours(SESSION_LIFETIME_HOURS),
            account_id: auth.account_id,
            allowed_bucket_id,
            allowed_bucket_name,
            recommended_part_size: auth.recommended_part_size,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn context(&self) -> ApiContext<'_> {
        ApiContext {
            api_url: &self.api_url,
            download_url: &self.download_url,
            token: &self.token,
        }
    }
}

/// Acquires, caches and refreshes the storage session
pub struct AuthorizationManager {
    api: Arc<dyn B2Api>,
    store: Arc<LocalStore>,
    retry_policy: RetryPolicy,
    session: Mutex<Option<AuthSession>>,
    acquisitions: AtomicU64,
}

impl AuthorizationManager {
    /// Build a manager, reusing a persisted session if it has not expired
    pub fn new(api: Arc<dyn B2Api>, store: Arc<LocalStore>, retry_policy: RetryPolicy) -> Self {
        let persisted = match store.get_json::<AuthSession>(AUTH_KEY) {
            Ok(Some(session)) if session.is_valid() => {
                info!(expires_at = %session.expires_at, "reusing persisted storage session");
                Some(session)
            }
            Ok(Some(_)) => {
                debug!("persisted storage session expired");
                if let Err(e) = store.remove_item(AUTH_KEY) {
                    warn!(error = %e, "failed to drop expired session");
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "persisted storage session unreadable");
                None
            }
        };

        Self {
            api,
            store,
            retry_policy,
            session: Mutex::new(persisted),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Ensure a valid session exists. Returns `false` once retries are
    /// exhausted.
    pub async fn authorize(&self) -> bool {
        self.session().await.is_ok()
    }

    /// The current session, acquiring a new one if needed
    pub async fn session(&self) -> Result<AuthSession, StorageError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref().filter(|s| s.is_valid()) {
            return Ok(session.clone());
        }

        let attempts = self.retry_policy.max_attempts.max(1);
        let result = retry(&self.retry_policy, "b2_authorize_account", |attempt| {
            debug!(attempt, "requesting storage authorization");
            self.api.authorize_account()
        })
        .await;

        match result {
            Ok(auth) => {
                let session = AuthSession::from_authorization(auth, Utc::now());
                if let Err(e) = self.store.set_json(AUTH_KEY, &session) {
                    warn!(error = %e, "failed to persist storage session");
                }
                self.acquisitions.fetch_add(1, Ordering::Relaxed);
                info!(expires_at = %session.expires_at, api_url = %session.api_url, "storage session acquired");
                *slot = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                error!(attempts, error = %e, "storage authorization failed");
                Err(StorageError::AuthenticationError {
                    message: format!("authorization failed after {} attempts: {}", attempts, e),
                })
            }
        }
    }

    /// Drop the session whose token was rejected. A session acquired since by
    /// another caller is kept.
    pub async fn invalidate(&self, rejected_token: &str) {
        let mut slot = self.session.lock().await;
        if slot.as_ref().map(|s| s.token.as_str()) == Some(rejected_token) {
            *slot = None;
            if let Err(e) = self.store.remove_item(AUTH_KEY) {
                warn!(error = %e, "failed to drop rejected session");
            }
            info!("storage session invalidated");
        }
    }

    /// The cached session without waiting for an acquisition in flight
    pub fn current_session(&self) -> Option<AuthSession> {
        self.session.try_lock().ok().and_then(|slot| slot.clone())
    }

    /// Number of sessions acquired over the network by this manager
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}
