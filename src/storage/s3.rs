use anyhow::bail;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::{ArchiveStore, StoreConfig, StoreError};

/// Bucket on Amazon S3 (or a signed S3 endpoint such as MinIO).
#[derive(Debug, Clone)]
pub struct S3ArchiveStore {
    client: Client,
    bucket: String,
}

impl S3ArchiveStore {
    /// Resolves credentials through the AWS default chain. A configured
    /// profile pins the chain to that entry of the shared config files.
    pub async fn from_config(config: &StoreConfig) -> anyhow::Result<Self> {
        let StoreConfig::S3 {
            bucket,
            region,
            profile,
            endpoint,
            path_style,
        } = config
        else {
            bail!("store backend is not s3");
        };

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(*path_style)
            .build();

        info!(
            bucket = %bucket,
            region = %region,
            profile = profile.as_deref().unwrap_or("default"),
            "Using S3 archive store"
        );
        Ok(Self::from_client(Client::from_conf(s3_config), bucket))
    }

    pub fn from_client(client: Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        debug!("Fetching object from: {}", self.location(key));

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let e = e.into_service_error();
                if e.is_no_such_key() {
                    return Err(StoreError::NotFound {
                        key: key.to_string(),
                    });
                }
                return Err(StoreError::Backend(format!(
                    "GET {} failed: {}",
                    self.location(key),
                    DisplayErrorContext(&e)
                )));
            }
        };

        let body = output.body.collect().await.map_err(|e| {
            StoreError::Backend(format!("reading {} failed: {e}", self.location(key)))
        })?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<String, StoreError> {
        let location = self.location(key);
        debug!("Uploading {} bytes to: {}", body.len(), location);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                StoreError::Backend(format!("PUT {location} failed: {}", DisplayErrorContext(&e)))
            })?;

        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::Credentials;
    use axum::extract::{Path, State};
    use axum::http::{header, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Bucket {
        objects: Arc<HashMap<String, Vec<u8>>>,
        uploads: Arc<Mutex<Vec<String>>>,
    }

    const NO_SUCH_KEY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>"#;

    async fn fetch(
        State(bucket): State<Bucket>,
        Path((_bucket, key)): Path<(String, String)>,
    ) -> Response {
        match bucket.objects.get(&key) {
            Some(body) => body.clone().into_response(),
            None => (
                StatusCode::NOT_FOUND,
                [(header::CONTENT_TYPE, "application/xml")],
                NO_SUCH_KEY,
            )
                .into_response(),
        }
    }

    // Uploads may arrive aws-chunked, so only the target is recorded.
    async fn store(
        State(bucket): State<Bucket>,
        Path((name, key)): Path<(String, String)>,
    ) -> impl IntoResponse {
        bucket.uploads.lock().unwrap().push(format!("{name}/{key}"));
        (StatusCode::OK, [(header::ETAG, "\"etag\"")])
    }

    async fn spawn_s3(objects: HashMap<String, Vec<u8>>) -> (S3ArchiveStore, Bucket) {
        let bucket = Bucket {
            objects: Arc::new(objects),
            uploads: Arc::default(),
        };
        let app = Router::new()
            .route("/{bucket}/{key}", get(fetch).put(store))
            .with_state(bucket.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .endpoint_url(format!("http://{addr}"))
            .force_path_style(true)
            .build();
        let store = S3ArchiveStore::from_client(Client::from_conf(config), "rhetor");
        (store, bucket)
    }

    #[tokio::test]
    async fn no_such_key_maps_to_not_found() {
        let (store, _) = spawn_s3(HashMap::new()).await;

        let err = store.get("M220P-s1.tgz").await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }

    #[tokio::test]
    async fn existing_object_is_returned() {
        let objects = HashMap::from([("M220P-starter.tgz".to_string(), b"archive".to_vec())]);
        let (store, _) = spawn_s3(objects).await;

        assert_eq!(store.get("M220P-starter.tgz").await.unwrap(), b"archive");
    }

    #[tokio::test]
    async fn upload_targets_bucket_and_key() {
        let (store, bucket) = spawn_s3(HashMap::new()).await;

        let location = store.put("M220P-s1.tgz", b"archive".to_vec()).await.unwrap();

        assert_eq!(location, "s3://rhetor/M220P-s1.tgz");
        assert_eq!(*bucket.uploads.lock().unwrap(), vec!["rhetor/M220P-s1.tgz"]);
    }

    #[tokio::test]
    async fn non_s3_config_is_refused() {
        let local = StoreConfig::default();
        assert!(S3ArchiveStore::from_config(&local).await.is_err());
    }
}
