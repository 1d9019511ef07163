mod archive;
mod http;
mod local;
mod s3;

pub use archive::{pack_dir, unpack_into};
pub use http::HttpArchiveStore;
pub use local::LocalArchiveStore;
pub use s3::S3ArchiveStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub const ARCHIVE_EXTENSION: &str = ".tgz";
pub const DEFAULT_BUCKET: &str = "rhetor";
pub const DEFAULT_REGION: &str = "us-east-1";
/// Suffix that turns a course into its starter archive name.
pub const STARTER_NAME: &str = "starter";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object {key} not found")]
    NotFound { key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Object storage holding workspace archives. The bucket is fixed when the
/// store is built.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Stores `body` under `key` and returns where it ended up.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<String, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    Local {
        path: PathBuf,
        #[serde(default = "default_bucket")]
        bucket: String,
    },
    Http {
        endpoint: String,
        #[serde(default = "default_bucket")]
        bucket: String,
        #[serde(default)]
        token: Option<String>,
    },
    /// Amazon S3, or any endpoint speaking its signed protocol. Credentials
    /// come from the usual AWS chain, narrowed to `profile` when set.
    S3 {
        #[serde(default = "default_bucket")]
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        profile: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        path_style: bool,
    },
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

pub fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Local {
            path: PathBuf::from("/var/lib/rhetor/store"),
            bucket: default_bucket(),
        }
    }
}

impl StoreConfig {
    pub fn bucket(&self) -> &str {
        match self {
            StoreConfig::Local { bucket, .. }
            | StoreConfig::Http { bucket, .. }
            | StoreConfig::S3 { bucket, .. } => bucket,
        }
    }
}

pub async fn build_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn ArchiveStore>> {
    Ok(match config {
        StoreConfig::Local { path, bucket } => Arc::new(LocalArchiveStore::new(path, bucket)),
        StoreConfig::Http {
            endpoint,
            bucket,
            token,
        } => Arc::new(HttpArchiveStore::new(endpoint, bucket, token.clone())?),
        StoreConfig::S3 { .. } => Arc::new(S3ArchiveStore::from_config(config).await?),
    })
}

/// Object key of a workspace archive.
pub fn archive_key(name: &str) -> String {
    format!("{name}{ARCHIVE_EXTENSION}")
}

/// Object key of a course's starter archive.
pub fn starter_key(course: &str) -> String {
    archive_key(&format!("{course}-{STARTER_NAME}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_archive_extension() {
        assert_eq!(archive_key("M220P-s1"), "M220P-s1.tgz");
        assert_eq!(starter_key("M220P"), "M220P-starter.tgz");
    }

    #[test]
    fn store_config_parses_tagged_backends() {
        let http: StoreConfig =
            serde_yaml::from_str("backend: http\nendpoint: http://minio:9000\n").unwrap();
        assert_eq!(
            http,
            StoreConfig::Http {
                endpoint: "http://minio:9000".to_string(),
                bucket: "rhetor".to_string(),
                token: None,
            }
        );

        let s3: StoreConfig =
            serde_yaml::from_str("backend: s3\nprofile: rhetor\n").unwrap();
        assert_eq!(
            s3,
            StoreConfig::S3 {
                bucket: "rhetor".to_string(),
                region: "us-east-1".to_string(),
                profile: Some("rhetor".to_string()),
                endpoint: None,
                path_style: false,
            }
        );

        let local: StoreConfig =
            serde_yaml::from_str("backend: local\npath: /srv/store\nbucket: archives\n").unwrap();
        assert_eq!(local.bucket(), "archives");
    }
}
