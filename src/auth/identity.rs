//! Identity resolver: resolves account/user logins and key fingerprints
//! against the external identity service ("mahi"), with a short TTL cache
//! since every authenticated request needs a lookup.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::model::{Account, Role, User};

#[async_trait::async_trait]
pub trait IdentityClient: Send + Sync + 'static {
    async fn lookup_account(&self, login: &str) -> AppResult<Account>;
    async fn lookup_user(&self, account_uuid: uuid::Uuid, login: &str) -> AppResult<User>;
    async fn lookup_roles(&self, role_uuids: &[uuid::Uuid]) -> AppResult<HashMap<uuid::Uuid, Role>>;
}

struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
}

struct Cache<T: Clone> {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> Cache<T> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().unwrap();
        entries.get(key).and_then(|entry| {
            if entry.inserted_at.elapsed() < self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn insert(&self, key: String, value: T) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[derive(Debug, Deserialize)]
struct MahiAccountResponse {
    account: Account,
}

#[derive(Debug, Deserialize)]
struct MahiUserResponse {
    user: User,
}

#[derive(Debug, Deserialize)]
struct MahiRolesResponse {
    roles: Vec<Role>,
}

pub struct MahiClient {
    client: Client,
    base_url: String,
    account_cache: Cache<Account>,
    user_cache: Cache<User>,
}

impl MahiClient {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(AppError::internal)?;
        Ok(Self {
            client,
            base_url: config.mahi_base_url.clone(),
            account_cache: Cache::new(Duration::from_secs(config.mahi_cache_ttl_secs)),
            user_cache: Cache::new(Duration::from_secs(config.mahi_cache_ttl_secs)),
        })
    }
}

#[async_trait::async_trait]
impl IdentityClient for MahiClient {
    async fn lookup_account(&self, login: &str) -> AppResult<Account> {
        if let Some(cached) = self.account_cache.get(login) {
            return Ok(cached);
        }

        let response = self
            .client
            .get(format!("{}/accounts/{login}", self.base_url))
            .send()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::AccountDoesNotExist);
        }
        if !response.status().is_success() {
            return Err(AppError::ServiceUnavailable);
        }

        let parsed: MahiAccountResponse = response.json().await.map_err(AppError::internal)?;
        self.account_cache.insert(login.to_string(), parsed.account.clone());
        Ok(parsed.account)
    }

    async fn lookup_user(&self, account_uuid: uuid::Uuid, login: &str) -> AppResult<User> {
        let cache_key = format!("{account_uuid}/{login}");
        if let Some(cached) = self.user_cache.get(&cache_key) {
            return Ok(cached);
        }

        let response = self
            .client
            .get(format!("{}/accounts/{account_uuid}/users/{login}", self.base_url))
            .send()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::UserDoesNotExist);
        }
        if !response.status().is_success() {
            return Err(AppError::ServiceUnavailable);
        }

        let parsed: MahiUserResponse = response.json().await.map_err(AppError::internal)?;
        self.user_cache.insert(cache_key, parsed.user.clone());
        Ok(parsed.user)
    }

    async fn lookup_roles(&self, role_uuids: &[uuid::Uuid]) -> AppResult<HashMap<uuid::Uuid, Role>> {
        if role_uuids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids = role_uuids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .client
            .get(format!("{}/roles", self.base_url))
            .query(&[("uuids", ids)])
            .send()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        if !response.status().is_success() {
            return Err(AppError::ServiceUnavailable);
        }

        let parsed: MahiRolesResponse = response.json().await.map_err(AppError::internal)?;
        Ok(parsed.roles.into_iter().map(|role| (role.uuid, role)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_returns_none_after_ttl_elapses() {
        let cache: Cache<u32> = Cache::new(Duration::from_millis(1));
        cache.insert("k".to_string(), 7);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn cache_hits_within_ttl() {
        let cache: Cache<u32> = Cache::new(Duration::from_secs(60));
        cache.insert("k".to_string(), 7);
        assert_eq!(cache.get("k"), Some(7));
    }
}
