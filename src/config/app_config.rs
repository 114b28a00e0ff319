use serde::{Serialize, Deserialize};
use std::path::Path;
use anyhow::Result;

use crate::cache::CacheConfig;
use crate::documents::{DocumentApiConfig, QueueConfig, ValidationConfig};
use crate::logging::LoggingConfig;
use crate::storage::backend::StorageConfig;

/// Main application configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub validation: ValidationConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub api: DocumentApiConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `DOCVAULT_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Storage overrides
        if let Ok(use_mock) = std::env::var("DOCVAULT_USE_MOCK") {
            self.storage.use_mock = matches!(use_mock.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(key_id) = std::env::var("DOCVAULT_KEY_ID") {
            self.storage.key_id = key_id;
        }
        if let Ok(application_key) = std::env::var("DOCVAULT_APPLICATION_KEY") {
            self.storage.application_key = application_key;
        }
        if let Ok(bucket_id) = std::env::var("DOCVAULT_BUCKET_ID") {
            self.storage.bucket_id = bucket_id;
        }
        if let Ok(bucket_name) = std::env::var("DOCVAULT_BUCKET_NAME") {
            self.storage.bucket_name = bucket_name;
        }

        // Validation overrides
        if let Ok(max_file_size) = std::env::var("DOCVAULT_MAX_FILE_SIZE") {
            match max_file_size.trim().parse::<u64>() {
                Ok(size) => self.validation.max_file_size = size,
                Err(_) => tracing::warn!(value = %max_file_size, "ignoring invalid DOCVAULT_MAX_FILE_SIZE"),
            }
        }

        // Logging overrides
        if let Ok(log_level) = std::env::var("DOCVAULT_LOG_LEVEL") {
            self.logging.level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.storage.use_mock {
            let required = [
                ("key_id", &self.storage.key_id),
                ("application_key", &self.storage.application_key),
                ("bucket_id", &self.storage.bucket_id),
                ("bucket_name", &self.storage.bucket_name),
            ];
            for (name, value) in required {
                if value.trim().is_empty() {
                    return Err(anyhow::anyhow!("storage.{} is required unless use_mock is set", name));
                }
            }
        }

        if self.storage.auth_retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("storage.auth_retry.max_attempts must be at least 1"));
        }

        if self.validation.max_file_size == 0 {
            return Err(anyhow::anyhow!("validation.max_file_size must be greater than zero"));
        }

        if self.cache.ttl_seconds == 0 {
            return Err(anyhow::anyhow!("cache.ttl_seconds must be greater than zero"));
        }

        if self.queue.batch_size == 0 {
            return Err(anyhow::anyhow!("queue.batch_size must be greater than zero"));
        }

        self.logging.parsed_level()?;

        Ok(())
    }

    /// Generate default configuration file
    pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let default_config = Self::default();
        default_config.save_to_file(path)?;
        Ok(())
    }
}
