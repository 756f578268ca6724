//! Client for storage daemons ("sharks") — plain HTTP byte sinks, not an
//! object-storage API. The picker selects which sharks a given object's
//! bytes land on; this module only knows how to talk to one shark at a
//! time over its raw PUT/GET/DELETE surface.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use crate::error::{AppError, AppResult};
use crate::model::SharkRef;

#[derive(Debug, Clone)]
pub struct SharkPutResult {
    pub content_md5: String,
    pub size: u64,
}

#[async_trait]
pub trait Shark: Send + Sync + 'static {
    async fn put_object(
        &self,
        shark: &SharkRef,
        object_id: &str,
        bytes: Bytes,
        content_type: Option<&str>,
    ) -> AppResult<SharkPutResult>;

    async fn get_object(&self, shark: &SharkRef, object_id: &str) -> AppResult<Bytes>;

    async fn delete_object(&self, shark: &SharkRef, object_id: &str) -> AppResult<()>;
}

pub struct HttpShark {
    client: Client,
}

impl HttpShark {
    pub fn new(request_timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(AppError::internal)?;
        Ok(Self { client })
    }

    fn object_url(shark: &SharkRef, object_id: &str) -> String {
        format!("https://{}/{}", shark.manta_storage_id, object_id)
    }
}

#[async_trait]
impl Shark for HttpShark {
    async fn put_object(
        &self,
        shark: &SharkRef,
        object_id: &str,
        bytes: Bytes,
        content_type: Option<&str>,
    ) -> AppResult<SharkPutResult> {
        let content_md5 = base64_md5(&bytes);
        let size = bytes.len() as u64;

        let mut request = self
            .client
            .put(Self::object_url(shark, object_id))
            .header("content-length", size)
            .header("content-md5", &content_md5)
            .body(bytes);

        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }

        let response = request
            .send()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        if !response.status().is_success() {
            return Err(AppError::ServiceUnavailable);
        }

        Ok(SharkPutResult { content_md5, size })
    }

    async fn get_object(&self, shark: &SharkRef, object_id: &str) -> AppResult<Bytes> {
        let response = self
            .client
            .get(Self::object_url(shark, object_id))
            .send()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::ResourceNotFound);
        }
        if !response.status().is_success() {
            return Err(AppError::ServiceUnavailable);
        }

        response.bytes().await.map_err(|_| AppError::ServiceUnavailable)
    }

    async fn delete_object(&self, shark: &SharkRef, object_id: &str) -> AppResult<()> {
        let response = self
            .client
            .delete(Self::object_url(shark, object_id))
            .send()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::ServiceUnavailable);
        }
        Ok(())
    }
}

fn base64_md5(bytes: &Bytes) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use md5::{Digest, Md5};
    let digest = Md5::digest(bytes);
    STANDARD.encode(digest)
}
