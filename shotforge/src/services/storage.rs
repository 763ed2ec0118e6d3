//! Object storage for uploaded product photos and generated images.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use tracing::debug;

use crate::utils::http_client::truncate_body;
use crate::{Error, Result};

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Store `body` under `key` and return the key.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<String>;

    /// Idempotent: deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Bucket exposed over plain HTTP (`GET`/`PUT`/`DELETE {base}/{key}`).
pub struct HttpObjectStorage {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn status_error(op: &str, key: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::remote(
        "storage",
        format!("{} {} returned HTTP {}: {}", op, key, status, truncate_body(&body)),
    )
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let response = self
            .authorize(self.client.get(self.object_url(key)))
            .send()
            .await
            .map_err(|e| Error::remote("storage", e))?;

        match response.status() {
            s if s.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| Error::remote("storage", e))?;
                debug!(key, size = body.len(), "Fetched object");
                Ok(body)
            }
            StatusCode::NOT_FOUND => Err(Error::permanent(format!("object {} does not exist", key))),
            _ => Err(status_error("GET", key, response).await),
        }
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<String> {
        let size = body.len();
        let response = self
            .authorize(self.client.put(self.object_url(key)))
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::remote("storage", e))?;

        if !response.status().is_success() {
            return Err(status_error("PUT", key, response).await);
        }
        debug!(key, size, "Stored object");
        Ok(key.to_string())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .authorize(self.client.delete(self.object_url(key)))
            .send()
            .await
            .map_err(|e| Error::remote("storage", e))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(key, "Object already gone");
                Ok(())
            }
            _ => Err(status_error("DELETE", key, response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_joins_cleanly() {
        crate::utils::http_client::install_rustls_provider();
        let storage = HttpObjectStorage::new(
            Client::new(),
            "https://bucket.example.com/assets/",
            Some(String::new()),
        );
        assert_eq!(
            storage.object_url("/uploads/u1/mug.png"),
            "https://bucket.example.com/assets/uploads/u1/mug.png"
        );
        assert!(storage.token.is_none());
    }
}
