use super::{decode_pair, encode_pair, prefixed_key, TokenStore, DEFAULT_KEY_PREFIX, DEFAULT_OP_TIMEOUT_MS};
use crate::{token::CacheKey, Error, Result, TokenPair};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use memcache::MemcacheError;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

/// Memcached treats expirations above 30 days as absolute Unix timestamps.
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// Longest key the memcached protocol accepts.
const MAX_KEY_LEN: usize = 250;

/// How long after a failed connect no new connect is attempted.
const CONNECT_COOL_DOWN: Duration = Duration::from_secs(5);

/// Smallest timeout handed to the pool; zero is rejected by r2d2.
const MIN_TIMEOUT_SECS: f64 = 0.001;

#[derive(Default)]
struct ConnectState {
    client: Option<Arc<memcache::Client>>,
    retry_after: Option<Instant>,
}

/// Memcached-backed token store.
///
/// The `memcache` client is blocking, so every operation runs on the
/// blocking thread pool and is bounded by the operation timeout. The pool's
/// connect and socket timeouts are capped at the same bound, so no blocking
/// task outlives its operation for long. Only one connect runs at a time,
/// and after a failed one the store answers as an empty cache for a few
/// seconds instead of reconnecting.
pub struct MemcachedTokenStore {
    url: Url,
    state: Mutex<ConnectState>,
    key_prefix: String,
    op_timeout: Duration,
}

impl MemcachedTokenStore {
    /// Creates a store for the given `memcache://` URL without connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or uses another scheme.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if !url.scheme().starts_with("memcache") {
            return Err(Error::ConfigurationError(format!(
                "Memcached URL must use the memcache scheme, got {}",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            state: Mutex::new(ConnectState::default()),
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

    /// The configured URL with `connect_timeout` and `timeout` capped at the
    /// operation timeout.
    fn connect_url(&self) -> Url {
        let limit = self.op_timeout.as_secs_f64();

        let mut pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(name, _)| name != "connect_timeout" && name != "timeout")
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        for name in ["connect_timeout", "timeout"] {
            let configured = self
                .url
                .query_pairs()
                .find(|(key, _)| key == name)
                .and_then(|(_, value)| value.parse::<f64>().ok());
            let seconds = configured.map_or(limit, |c| c.min(limit)).max(MIN_TIMEOUT_SECS);
            pairs.push((name.to_string(), seconds.to_string()));
        }

        let mut url = self.url.clone();
        url.query_pairs_mut().clear().extend_pairs(&pairs);
        url
    }

    fn key(&self, key: &CacheKey) -> String {
        memcached_key(&self.key_prefix, key)
    }

    async fn client(&self) -> std::result::Result<Arc<memcache::Client>, String> {
        let mut state = self.state.lock().await;

        if let Some(client) = &state.client {
            return Ok(Arc::clone(client));
        }

        if state.retry_after.is_some_and(|at| Instant::now() < at) {
            return Err("reconnect suppressed after a failed connect".to_string());
        }

        // Set before connecting so a connect abandoned by the op timeout still cools down.
        state.retry_after = Some(Instant::now() + CONNECT_COOL_DOWN);

        let url = self.connect_url();
        let client = tokio::task::spawn_blocking(move || memcache::Client::connect(url.as_str()))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;

        let client = Arc::new(client);
        state.client = Some(Arc::clone(&client));
        state.retry_after = None;
        tracing::debug!(url = %self.url, "Connected to Memcached token cache");
        Ok(client)
    }

    /// Runs `op` on the blocking pool, failing open on error or timeout.
    async fn run<T, F>(&self, name: &'static str, key: &str, op: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> std::result::Result<T, MemcacheError> + Send + 'static,
    {
        let attempt = async {
            let client = self.client().await?;
            tokio::task::spawn_blocking(move || op(&client))
                .await
                .map_err(|e| e.to_string())?
                .map_err(|e| e.to_string())
        };

        match tokio::time::timeout(self.op_timeout, attempt).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!(op = name, key = %key, error = %e, "Memcached token cache unavailable");
                None
            }
            Err(_) => {
                tracing::warn!(
                    op = name,
                    key = %key,
                    timeout_ms = self.op_timeout.as_millis(),
                    "Memcached token cache timed out"
                );
                None
            }
        }
    }
}

/// Prefixed key, replaced by a digest when memcached would refuse it.
fn memcached_key(prefix: &str, key: &CacheKey) -> String {
    let key = prefixed_key(prefix, key);
    let acceptable = key.len() <= MAX_KEY_LEN
        && !key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control());

    if acceptable {
        key
    } else {
        format!("sha256:{}", URL_SAFE_NO_PAD.encode(Sha256::digest(key.as_bytes())))
    }
}

#[async_trait]
impl TokenStore for MemcachedTokenStore {
    async fn get(&self, key: &CacheKey) -> Option<TokenPair> {
        let key = self.key(key);
        let lookup = key.clone();
        let raw = self
            .run("get", &key, move |client| client.get::<String>(&lookup))
            .await
            .flatten();

        raw.and_then(|raw| decode_pair(&key, &raw))
    }

    async fn set(&self, key: &CacheKey, pair: &TokenPair, ttl: Duration) {
        let Some(value) = encode_pair(pair) else {
            return;
        };
        let key = self.key(key);
        let target = key.clone();
        let expiration = ttl.as_secs().clamp(1, MAX_RELATIVE_EXPIRATION) as u32;

        self.run("set", &key, move |client| {
            client.set(&target, value.as_str(), expiration)
        })
        .await;
    }

    async fn invalidate(&self, key: &CacheKey) {
        let key = self.key(key);
        let target = key.clone();

        self.run("invalidate", &key, move |client| client.delete(&target))
            .await;
    }
}
