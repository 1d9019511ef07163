use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::{ArchiveStore, StoreError};

/// Plain object server speaking path-style `GET`/`PUT {endpoint}/{bucket}/{key}`
/// with an optional bearer token. Requests are not SigV4-signed; use the `s3`
/// backend for AWS.
#[derive(Debug, Clone)]
pub struct HttpArchiveStore {
    client: Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl HttpArchiveStore {
    pub fn new(endpoint: &str, bucket: &str, token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            token,
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ArchiveStore for HttpArchiveStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.object_url(key);
        debug!("Fetching object from: {}", url);

        let response = self.authorize(self.client.get(&url)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            status => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(StoreError::Backend(format!(
                    "GET {url} failed ({status}): {error_text}"
                )))
            }
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<String, StoreError> {
        let url = self.object_url(key);
        debug!("Uploading {} bytes to: {}", body.len(), url);

        let response = self
            .authorize(self.client.put(&url))
            .header(reqwest::header::CONTENT_TYPE, "application/gzip")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(url)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(StoreError::Backend(format!(
                "PUT {url} failed ({status}): {error_text}"
            )))
        }
    }
}
