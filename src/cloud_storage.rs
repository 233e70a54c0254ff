use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CloudStorageError {
    #[error("S3 SDK error: {0}")]
    SdkError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// S3 configuration for object storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>, // For MinIO/S3-compatible services
    /// Prefix for public object URLs (CDN or public bucket host)
    pub public_base_url: Option<String>,
}

impl S3Config {
    pub fn validate(&self) -> Result<(), CloudStorageError> {
        if self.region.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Region cannot be empty".to_string(),
            ));
        }
        if self.access_key_id.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Access key ID cannot be empty".to_string(),
            ));
        }
        if self.secret_access_key.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Secret access key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        if let Some(base) = &self.public_base_url {
            return format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key);
        }
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.region, key),
        }
    }
}

/// Binary object storage (allows mocking for tests)
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `bucket/key` and return its public URL
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, CloudStorageError>;

    /// Remove `bucket/key`. Removing a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), CloudStorageError>;
}

/// Reject keys that could escape the bucket or are not plain relative paths
pub fn validate_key(key: &str) -> Result<(), CloudStorageError> {
    if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
        return Err(CloudStorageError::InvalidKey(key.to_string()));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            return Err(CloudStorageError::InvalidKey(key.to_string()));
        }
    }
    Ok(())
}

fn validate_bucket(bucket: &str) -> Result<(), CloudStorageError> {
    let valid = !bucket.is_empty()
        && bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && bucket != "."
        && bucket != "..";
    if valid {
        Ok(())
    } else {
        Err(CloudStorageError::Config(format!(
            "Invalid bucket name: {:?}",
            bucket
        )))
    }
}

/// Production S3 object storage implementation
pub struct S3ObjectStore {
    client: Client,
    config: S3Config,
}

impl S3ObjectStore {
    pub async fn new(config: S3Config) -> Result<Self, CloudStorageError> {
        config.validate()?;

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None, // session_token
            None, // expiration
            "beatvault-s3-config",
        );

        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint.clone());
        }

        let aws_config = aws_config_builder.load().await;
        let client = Client::new(&aws_config);

        Ok(S3ObjectStore { client, config })
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, CloudStorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;

        debug!(bucket, key, bytes = data.len(), "S3 put");

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(data.to_vec().into())
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| CloudStorageError::SdkError(format!("Put object failed: {}", e)))?;

        let url = self.config.public_url(bucket, key);
        info!(bucket, key, "Uploaded object to {}", url);
        Ok(url)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), CloudStorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| CloudStorageError::SdkError(format!("Delete object failed: {}", e)))?;

        info!(bucket, key, "Deleted object");
        Ok(())
    }
}

/// Filesystem object storage for dev mode: `root/bucket/key`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        LocalObjectStore {
            root: root.into(),
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk location of an object
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, CloudStorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;

        let path = self.root.join(bucket).join(key);
        // validate_key already refuses these; keep the path honest regardless
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(CloudStorageError::InvalidKey(key.to_string()));
        }
        Ok(path)
    }

    fn public_url(&self, bucket: &str, key: &str, path: &Path) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key),
            None => format!("file://{}", path.display()),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<String, CloudStorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;

        debug!(bucket, key, bytes = data.len(), "Stored object at {}", path.display());
        Ok(self.public_url(bucket, key, &path))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), CloudStorageError> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(bucket, key, "Removed object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
