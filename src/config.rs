use crate::cloud_storage::{CloudStorageError, LocalObjectStore, ObjectStore, S3Config, S3ObjectStore};
use crate::db::Database;
use crate::saga::SagaOptions;
use crate::uploads::UploadBuckets;
use crate::watermark::{WatermarkParameters, DEFAULT_AMPLITUDE, DEFAULT_FREQUENCY_HZ};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_DATABASE_PATH: &str = "beatvault.db";
const DEFAULT_LOCAL_STORAGE_PATH: &str = "./storage";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("Storage configuration error: {0}")]
    Storage(#[from] CloudStorageError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Where uploaded objects are written
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// Files under `path/{bucket}/{key}` (dev mode)
    Local {
        path: PathBuf,
        public_base_url: Option<String>,
    },
    S3(S3Config),
}

/// Application configuration
///
/// Read from `BEATVAULT_*` environment variables, optionally seeded from a
/// `.env` file in dev mode.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub storage: StorageBackend,
    pub buckets: UploadBuckets,
    pub watermark: WatermarkParameters,
    /// Deadline for each saga step; none means wait indefinitely
    pub step_timeout: Option<Duration>,
    /// Uploader identity for the developer tool
    pub user_id: Option<String>,
}

impl Config {
    /// Load `.env` if present, then read the environment
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        } else {
            debug!("Config: no .env file found, using process environment");
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_path =
            get("BEATVAULT_DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());
        let public_base_url = get("BEATVAULT_PUBLIC_BASE_URL");

        let storage = match get("BEATVAULT_STORAGE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("local") => StorageBackend::Local {
                path: PathBuf::from(
                    get("BEATVAULT_LOCAL_STORAGE_PATH")
                        .unwrap_or_else(|| DEFAULT_LOCAL_STORAGE_PATH.to_string()),
                ),
                public_base_url,
            },
            Some("s3") => {
                let s3 = S3Config {
                    region: get("BEATVAULT_S3_REGION")
                        .ok_or(ConfigError::Missing("BEATVAULT_S3_REGION"))?,
                    access_key_id: get("BEATVAULT_S3_ACCESS_KEY_ID")
                        .ok_or(ConfigError::Missing("BEATVAULT_S3_ACCESS_KEY_ID"))?,
                    secret_access_key: get("BEATVAULT_S3_SECRET_ACCESS_KEY")
                        .ok_or(ConfigError::Missing("BEATVAULT_S3_SECRET_ACCESS_KEY"))?,
                    endpoint_url: get("BEATVAULT_S3_ENDPOINT_URL"),
                    public_base_url,
                };
                s3.validate()?;
                StorageBackend::S3(s3)
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "BEATVAULT_STORAGE",
                    message: format!("expected `local` or `s3`, got `{}`", other),
                })
            }
        };

        let defaults = UploadBuckets::default();
        let buckets = UploadBuckets {
            tracks: get("BEATVAULT_BUCKET_TRACKS").unwrap_or(defaults.tracks),
            covers: get("BEATVAULT_BUCKET_COVERS").unwrap_or(defaults.covers),
            tutorial_videos: get("BEATVAULT_BUCKET_TUTORIAL_VIDEOS")
                .unwrap_or(defaults.tutorial_videos),
            tutorial_thumbnails: get("BEATVAULT_BUCKET_TUTORIAL_THUMBNAILS")
                .unwrap_or(defaults.tutorial_thumbnails),
        };

        let frequency = parse_or(
            "BEATVAULT_WATERMARK_FREQUENCY_HZ",
            get("BEATVAULT_WATERMARK_FREQUENCY_HZ"),
            DEFAULT_FREQUENCY_HZ,
        )?;
        let amplitude = parse_or(
            "BEATVAULT_WATERMARK_AMPLITUDE",
            get("BEATVAULT_WATERMARK_AMPLITUDE"),
            DEFAULT_AMPLITUDE,
        )?;
        let watermark =
            WatermarkParameters::new(frequency, amplitude).map_err(|e| ConfigError::Invalid {
                key: "BEATVAULT_WATERMARK_*",
                message: e.to_string(),
            })?;

        let step_timeout = match get("BEATVAULT_STEP_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = parse_or("BEATVAULT_STEP_TIMEOUT_SECS", Some(raw), 0)?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        key: "BEATVAULT_STEP_TIMEOUT_SECS",
                        message: "must be at least 1".to_string(),
                    });
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Config {
            database_path,
            storage,
            buckets,
            watermark,
            step_timeout,
            user_id: get("BEATVAULT_USER_ID"),
        })
    }

    /// Saga options implied by this config (step deadline only)
    pub fn saga_options(&self) -> SagaOptions {
        SagaOptions {
            step_timeout: self.step_timeout,
            ..SagaOptions::default()
        }
    }

    pub async fn open_object_store(&self) -> Result<Arc<dyn ObjectStore>, ConfigError> {
        match &self.storage {
            StorageBackend::Local {
                path,
                public_base_url,
            } => {
                info!("Config: local object storage at {}", path.display());
                Ok(Arc::new(LocalObjectStore::new(
                    path.clone(),
                    public_base_url.clone(),
                )))
            }
            StorageBackend::S3(s3) => {
                info!("Config: S3 object storage in {}", s3.region);
                Ok(Arc::new(S3ObjectStore::new(s3.clone()).await?))
            }
        }
    }

    pub async fn open_database(&self) -> Result<Database, ConfigError> {
        info!("Config: database at {}", self.database_path);
        Ok(Database::new(&self.database_path).await?)
    }
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: format!("`{}`: {}", raw, e),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_path, "beatvault.db");
        assert!(matches!(
            config.storage,
            StorageBackend::Local { ref path, public_base_url: None } if path == &PathBuf::from("./storage")
        ));
        assert_eq!(config.buckets, UploadBuckets::default());
        assert_eq!(config.watermark, WatermarkParameters::default());
        assert!(config.step_timeout.is_none());
        assert!(config.user_id.is_none());
    }

    #[test]
    fn test_s3_requires_credentials() {
        let err = config(&[("BEATVAULT_STORAGE", "s3"), ("BEATVAULT_S3_REGION", "us-east-1")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BEATVAULT_S3_ACCESS_KEY_ID")));

        let config = config(&[
            ("BEATVAULT_STORAGE", "S3"),
            ("BEATVAULT_S3_REGION", "us-east-1"),
            ("BEATVAULT_S3_ACCESS_KEY_ID", "key"),
            ("BEATVAULT_S3_SECRET_ACCESS_KEY", "secret"),
            ("BEATVAULT_S3_ENDPOINT_URL", "http://localhost:9000"),
        ])
        .unwrap();
        match config.storage {
            StorageBackend::S3(s3) => {
                assert_eq!(s3.endpoint_url.as_deref(), Some("http://localhost:9000"));
            }
            other => panic!("expected S3 backend, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(matches!(
            config(&[("BEATVAULT_STORAGE", "ftp")]),
            Err(ConfigError::Invalid { key: "BEATVAULT_STORAGE", .. })
        ));
    }

    #[test]
    fn test_watermark_and_timeout_overrides() {
        let config = config(&[
            ("BEATVAULT_WATERMARK_FREQUENCY_HZ", "18.5"),
            ("BEATVAULT_WATERMARK_AMPLITUDE", "0.05"),
            ("BEATVAULT_STEP_TIMEOUT_SECS", "30"),
            ("BEATVAULT_BUCKET_TRACKS", "beats"),
        ])
        .unwrap();
        assert_eq!(config.watermark.frequency_hz(), 18.5);
        assert_eq!(config.watermark.amplitude(), 0.05);
        assert_eq!(config.saga_options().step_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.buckets.tracks, "beats");
        assert_eq!(config.buckets.covers, "covers");
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        assert!(config(&[("BEATVAULT_WATERMARK_AMPLITUDE", "1.5")]).is_err());
        assert!(config(&[("BEATVAULT_WATERMARK_FREQUENCY_HZ", "fast")]).is_err());
        assert!(config(&[("BEATVAULT_STEP_TIMEOUT_SECS", "0")]).is_err());
    }
}
