//! Account storage backends for the charging engine
//!
//! Implements the `AccountStore` trait from ocs-core twice:
//!
//! - [`MemoryAccountStore`] keeps accounts in process, for tests and
//!   single-node deployments
//! - [`RedisAccountStore`] keeps JSON documents in Redis, shared by every
//!   engine instance
//!
//! # Example
//!
//! ```no_run
//! use ocs_cache::RedisAccountStore;
//! use ocs_core::traits::AccountStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = RedisAccountStore::new("redis://127.0.0.1:6379").await?;
//!     let account = store.get_account("cgrates.org", "1001").await?;
//!     println!("{:?}", account);
//!     Ok(())
//! }
//! ```

pub mod keys;
pub mod memory;

pub use memory::MemoryAccountStore;

use async_trait::async_trait;
use ocs_core::error::AppError;
use ocs_core::models::Account;
use ocs_core::traits::AccountStore;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use tracing::{debug, error, warn};

/// Redis account store with connection pooling
///
/// Accounts are stored as JSON under `account:{tenant}:{id}` and indexed
/// per tenant. Multi-account writes go through one `MULTI`/`EXEC`
/// pipeline.
#[derive(Clone)]
pub struct RedisAccountStore {
    manager: ConnectionManager,
}

impl RedisAccountStore {
    /// Create a new Redis store
    ///
    /// # Errors
    ///
    /// Returns `AppError::CacheConnection` if the connection fails
    pub async fn new(url: &str) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::CacheConnection(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::CacheConnection(format!("Connection failed: {}", e))
        })?;

        debug!("Redis connection established successfully");
        Ok(Self { manager })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn flush_db(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::CacheConnection(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Cache(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Cache(err.to_string())
            }
        }
    }

    fn decode(key: &str, json: &str) -> Result<Account, AppError> {
        serde_json::from_str(json).map_err(|e| {
            error!("Failed to deserialize account {}: {}", key, e);
            AppError::Serialization(format!("Deserialization failed: {}", e))
        })
    }
}

#[async_trait]
impl AccountStore for RedisAccountStore {
    async fn get_account(&self, tenant: &str, id: &str) -> Result<Option<Account>, AppError> {
        let key = keys::account_key(tenant, id);
        debug!("GET {}", key);
        let mut conn = self.manager.clone();

        let result: Option<String> = conn.get(&key).await.map_err(Self::map_redis_error)?;
        result.map(|json| Self::decode(&key, &json)).transpose()
    }

    async fn set_accounts(&self, accounts: &[Account]) -> Result<(), AppError> {
        if accounts.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for account in accounts {
            let json = serde_json::to_string(account).map_err(|e| {
                error!("Failed to serialize account {}: {}", account.tenant_id(), e);
                AppError::Serialization(format!("Serialization failed: {}", e))
            })?;
            pipe.set(keys::account_key(&account.tenant, &account.id), json)
                .ignore()
                .sadd(keys::account_index_key(&account.tenant), &account.id)
                .ignore();
        }
        debug!("MULTI SET {} account(s)", accounts.len());

        let mut conn = self.manager.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    async fn remove_account(&self, tenant: &str, id: &str) -> Result<bool, AppError> {
        let key = keys::account_key(tenant, id);
        debug!("DEL {}", key);
        let mut conn = self.manager.clone();

        let (deleted, _): (i32, i32) = redis::pipe()
            .atomic()
            .del(&key)
            .srem(keys::account_index_key(tenant), id)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(deleted > 0)
    }

    async fn list_accounts(&self, tenant: &str) -> Result<Vec<Account>, AppError> {
        let mut conn = self.manager.clone();
        let mut ids: Vec<String> = conn
            .smembers(keys::account_index_key(tenant))
            .await
            .map_err(Self::map_redis_error)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        ids.sort();

        let account_keys: Vec<String> = ids.iter().map(|id| keys::account_key(tenant, id)).collect();
        let docs: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&account_keys)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        let mut accounts = Vec::with_capacity(docs.len());
        for (key, doc) in account_keys.iter().zip(docs) {
            match doc {
                Some(json) => accounts.push(Self::decode(key, &json)?),
                None => warn!("Account index references missing key {}", key),
            }
        }
        Ok(accounts)
    }
}
