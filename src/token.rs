//! Identity and token types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The credentials this process logs in with.
///
/// The password is never printed by the `Debug` implementation.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    service_name: String,
    login: String,
    password: String,
}

impl Identity {
    /// Creates an identity.
    pub fn new(
        service_name: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            login: login.into(),
            password: password.into(),
        }
    }

    /// The name of the service this process runs as.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The login presented to the authentication service.
    pub fn login(&self) -> &str {
        &self.login
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// The cache slot holding this identity's tokens.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.service_name, &self.login)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("service_name", &self.service_name)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An access/refresh token pair as issued by the authentication service.
///
/// Expiries have whole-second precision and travel as Unix seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Short-lived credential attached to requests.
    pub access_token: String,
    /// Longer-lived credential used to obtain a new pair.
    pub refresh_token: String,
    /// When the access token stops being accepted.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub access_expiry: DateTime<Utc>,
    /// When the refresh token stops being accepted.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub refresh_expiry: DateTime<Utc>,
}

impl TokenPair {
    /// Clamps the access expiry so it never exceeds the refresh expiry.
    pub(crate) fn normalized(mut self) -> Self {
        if self.access_expiry > self.refresh_expiry {
            tracing::warn!(
                access_expiry = %self.access_expiry,
                refresh_expiry = %self.refresh_expiry,
                "Access token outlives its refresh token; clamping access expiry"
            );
            self.access_expiry = self.refresh_expiry;
        }
        self
    }

    /// Returns `true` if the access token is still usable at `now`.
    ///
    /// `leeway` treats the token as expired that much early, absorbing clock
    /// skew and in-flight time.
    pub fn access_valid_at(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        now.checked_add_signed(leeway_delta(leeway))
            .is_some_and(|deadline| deadline < self.access_expiry)
    }

    /// Returns `true` if the refresh token is still usable at `now`.
    pub fn refresh_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_expiry
    }

    /// The remaining refresh validity at `now`, used as the cache TTL.
    ///
    /// Returns `None` once the refresh token has expired.
    pub fn refresh_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.refresh_expiry - now)
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &mask_token(&self.access_token))
            .field("refresh_token", &mask_token(&self.refresh_token))
            .field("access_expiry", &self.access_expiry)
            .field("refresh_expiry", &self.refresh_expiry)
            .finish()
    }
}

fn leeway_delta(leeway: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(leeway).unwrap_or(chrono::TimeDelta::MAX)
}

/// Deterministic cache slot for a (service, login) identity.
///
/// Both components are form-encoded, so the rendered key never contains
/// whitespace or the `:` separator and is safe for every backend.
///
/// # Examples
///
/// ```
/// use service_client::CacheKey;
///
/// let key = CacheKey::new("orders", "svc orders");
/// assert_eq!(key.as_str(), "tokens:orders:svc+orders");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a service name and login.
    pub fn new(service_name: &str, login: &str) -> Self {
        Self(format!("tokens:{}:{}", encode(service_name), encode(login)))
    }

    /// The rendered key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn encode(component: &str) -> String {
    url::form_urlencoded::byte_serialize(component.as_bytes()).collect()
}

/// Masks every character of a token except the last four.
///
/// # Examples
///
/// ```
/// use service_client::mask_token;
///
/// assert_eq!(mask_token("abcdefgh"), "****efgh");
/// assert_eq!(mask_token("abc"), "abc");
/// ```
pub fn mask_token(token: &str) -> String {
    const VISIBLE: usize = 4;

    let len = token.chars().count();
    if len <= VISIBLE {
        return token.to_string();
    }

    let visible: String = token.chars().skip(len - VISIBLE).collect();
    format!("{}{}", "*".repeat(len - VISIBLE), visible)
}
