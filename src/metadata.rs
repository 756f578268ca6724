//! Client for the sharded KV metadata service. Retries idempotent reads on
//! transport failure, never retries writes, and caches read responses for
//! a short TTL keyed by object path.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::sleep;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::model::{ObjectMetadata, StorageNodePage};
use crate::mpu::UploadRecord;
use uuid::Uuid;

const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(150),
    Duration::from_millis(450),
];

#[async_trait]
pub trait MetadataClient: Send + Sync + 'static {
    async fn get_object(&self, path: &str) -> AppResult<ObjectMetadata>;
    async fn put_object(&self, path: &str, metadata: ObjectMetadata) -> AppResult<()>;
    async fn delete_object(&self, path: &str) -> AppResult<()>;

    async fn get_upload(&self, id: Uuid) -> AppResult<UploadRecord>;
    async fn put_upload(&self, record: &UploadRecord) -> AppResult<()>;

    /// One page of storage nodes at or under `max_percent_used`, reported
    /// at or after `min_timestamp` (unix seconds), ordered by ascending
    /// `_id`. Pass the previous page's `next_id` as `cursor` to continue.
    async fn find_storage_nodes(
        &self,
        max_percent_used: u32,
        min_timestamp: i64,
        cursor: Option<&str>,
    ) -> AppResult<StorageNodePage>;
}

struct CacheEntry {
    value: ObjectMetadata,
    inserted_at: Instant,
}

struct ReadCache {
    capacity: usize,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    order: RwLock<Vec<String>>,
}

impl ReadCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    fn get(&self, path: &str) -> Option<ObjectMetadata> {
        let entries = self.entries.read().unwrap();
        entries.get(path).and_then(|entry| {
            if entry.inserted_at.elapsed() < self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn insert(&self, path: String, value: ObjectMetadata) {
        let mut entries = self.entries.write().unwrap();
        let mut order = self.order.write().unwrap();
        if !entries.contains_key(&path) {
            order.push(path.clone());
        }
        entries.insert(
            path.clone(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        while entries.len() > self.capacity {
            if order.is_empty() {
                break;
            }
            let oldest = order.remove(0);
            entries.remove(&oldest);
        }
    }

    fn invalidate(&self, path: &str) {
        self.entries.write().unwrap().remove(path);
        self.order.write().unwrap().retain(|p| p != path);
    }
}

pub struct ShardedKvClient {
    client: Client,
    base_url: String,
    cache: ReadCache,
}

impl ShardedKvClient {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(AppError::internal)?;
        Ok(Self {
            client,
            base_url: config.metadata_base_url.clone(),
            cache: ReadCache::new(
                config.metadata_cache_capacity,
                Duration::from_secs(config.metadata_cache_ttl_secs),
            ),
        })
    }

    async fn with_retry<F, Fut, T>(&self, op: F) -> AppResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, TransportOutcome>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(TransportOutcome::Permanent(err)) => return Err(err),
                Err(TransportOutcome::Transient) => {
                    if attempt >= RETRY_BACKOFFS.len() {
                        return Err(AppError::ServiceUnavailable);
                    }
                    sleep(RETRY_BACKOFFS[attempt]).await;
                    attempt += 1;
                }
            }
        }
    }
}

enum TransportOutcome {
    /// Connection-level failure: worth retrying.
    Transient,
    /// A well-formed response the client should not retry (4xx, parse
    /// success, etc.).
    Permanent(AppError),
}

#[async_trait]
impl MetadataClient for ShardedKvClient {
    async fn get_object(&self, path: &str) -> AppResult<ObjectMetadata> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached);
        }

        let metadata = self
            .with_retry(|| async {
                let response = self
                    .client
                    .get(format!("{}/objects{path}", self.base_url))
                    .send()
                    .await
                    .map_err(|_| TransportOutcome::Transient)?;

                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(TransportOutcome::Permanent(AppError::ResourceNotFound));
                }
                if !response.status().is_success() {
                    return Err(TransportOutcome::Permanent(AppError::ServiceUnavailable));
                }
                response
                    .json::<ObjectMetadata>()
                    .await
                    .map_err(|err| TransportOutcome::Permanent(AppError::internal(err)))
            })
            .await?;

        self.cache.insert(path.to_string(), metadata.clone());
        Ok(metadata)
    }

    async fn put_object(&self, path: &str, metadata: ObjectMetadata) -> AppResult<()> {
        let response = self
            .client
            .put(format!("{}/objects{path}", self.base_url))
            .json(&metadata)
            .send()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        if !response.status().is_success() {
            return Err(AppError::ServiceUnavailable);
        }

        self.cache.invalidate(path);
        Ok(())
    }

    async fn delete_object(&self, path: &str) -> AppResult<()> {
        let response = self
            .client
            .delete(format!("{}/objects{path}", self.base_url))
            .send()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::ServiceUnavailable);
        }

        self.cache.invalidate(path);
        Ok(())
    }

    async fn get_upload(&self, id: Uuid) -> AppResult<UploadRecord> {
        let response = self
            .client
            .get(format!("{}/uploads/{id}", self.base_url))
            .send()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::ResourceNotFound);
        }
        if !response.status().is_success() {
            return Err(AppError::ServiceUnavailable);
        }

        response
            .json::<UploadRecord>()
            .await
            .map_err(AppError::internal)
    }

    async fn put_upload(&self, record: &UploadRecord) -> AppResult<()> {
        let response = self
            .client
            .put(format!("{}/uploads/{}", self.base_url, record.id))
            .json(record)
            .send()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        if !response.status().is_success() {
            return Err(AppError::ServiceUnavailable);
        }
        Ok(())
    }

    async fn find_storage_nodes(
        &self,
        max_percent_used: u32,
        min_timestamp: i64,
        cursor: Option<&str>,
    ) -> AppResult<StorageNodePage> {
        self.with_retry(|| async {
            let mut request = self
                .client
                .get(format!("{}/storage-nodes", self.base_url))
                .query(&[
                    ("percentUsed", max_percent_used.to_string()),
                    ("timestamp", min_timestamp.to_string()),
                ]);
            if let Some(cursor) = cursor {
                request = request.query(&[("_id", cursor)]);
            }

            let response = request.send().await.map_err(|_| TransportOutcome::Transient)?;
            if !response.status().is_success() {
                return Err(TransportOutcome::Permanent(AppError::ServiceUnavailable));
            }
            response
                .json::<StorageNodePage>()
                .await
                .map_err(|err| TransportOutcome::Permanent(AppError::internal(err)))
        })
        .await
    }
}
