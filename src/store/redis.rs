use super::{decode_pair, encode_pair, prefixed_key, TokenStore, DEFAULT_KEY_PREFIX, DEFAULT_OP_TIMEOUT_MS};
use crate::{token::CacheKey, Error, Result, TokenPair};
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, RedisResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Redis-backed token store.
///
/// The connection is established on first use and shared afterwards; a
/// failed connection attempt is retried by the next operation.
///
/// # Examples
///
/// ```
/// use service_client::RedisTokenStore;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), service_client::Error> {
/// let store = RedisTokenStore::new("redis://127.0.0.1:6379/2")?
///     .with_key_prefix("orders-prod")
///     .with_op_timeout(Duration::from_millis(250));
/// # Ok(())
/// # }
/// ```
pub struct RedisTokenStore {
    client: ::redis::Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
    op_timeout: Duration,
}

impl RedisTokenStore {
    /// Creates a store for the given `redis://` URL without connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not a valid Redis connection URL.
    pub fn new(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)
            .map_err(|e| Error::ConfigurationError(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
        })
    }

    /// Sets the prefix prepended to every key.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Bounds each operation, including the initial connect.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    async fn connection(&self) -> RedisResult<ConnectionManager> {
        self.connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .cloned()
    }

    /// Runs `op` against a live connection, failing open on error or timeout.
    async fn run<T, F, Fut>(&self, name: &'static str, key: &str, op: F) -> Option<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let attempt = async {
            let conn = self.connection().await?;
            op(conn).await
        };

        match tokio::time::timeout(self.op_timeout, attempt).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!(op = name, key = %key, error = %e, "Redis token cache unavailable");
                None
            }
            Err(_) => {
                tracing::warn!(
                    op = name,
                    key = %key,
                    timeout_ms = self.op_timeout.as_millis(),
                    "Redis token cache timed out"
                );
                None
            }
        }
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn get(&self, key: &CacheKey) -> Option<TokenPair> {
        let key = prefixed_key(&self.key_prefix, key);
        let raw: Option<String> = self
            .run("get", &key, |mut conn| {
                let key = key.clone();
                async move { conn.get::<_, Option<String>>(key).await }
            })
            .await
            .flatten();

        raw.and_then(|raw| decode_pair(&key, &raw))
    }

    async fn set(&self, key: &CacheKey, pair: &TokenPair, ttl: Duration) {
        let Some(value) = encode_pair(pair) else {
            return;
        };
        let key = prefixed_key(&self.key_prefix, key);
        let seconds = ttl.as_secs().max(1);

        self.run("set", &key, |mut conn| {
            let key = key.clone();
            async move { conn.set_ex::<_, _, ()>(key, value, seconds).await }
        })
        .await;
    }

    async fn invalidate(&self, key: &CacheKey) {
        let key = prefixed_key(&self.key_prefix, key);

        self.run("invalidate", &key, |mut conn| {
            let key = key.clone();
            async move { conn.del::<_, ()>(key).await }
        })
        .await;
    }
}
