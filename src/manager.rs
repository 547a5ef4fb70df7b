//! Token acquisition and renewal.
//!
//! [`TokenManager`] answers "what access token should this identity present
//! right now?" using the [`TokenStore`] as cache-of-record:
//!
//! 1. cached pair with a live access token: returned as-is, no network call;
//! 2. cached pair with an expired access token but live refresh token: one
//!    refresh call;
//! 3. nothing cached, or the refresh token expired too: one login call.
//!
//! A refresh answered with any non-success status falls through to a login;
//! a refresh that gets no answer at all is reported as is.
//! Concurrent callers for the same identity are not coalesced; at worst each
//! performs its own refresh or login and the last write wins.

use crate::{
    registry::ExternalService,
    route::{RouteDescriptor, RouteParams},
    store::TokenStore,
    token::{CacheKey, Identity, TokenPair},
    transport::{RawResponse, Transport},
    Error, Result,
};
use chrono::Utc;
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// The login and refresh endpoints on the authentication service.
///
/// Both are called with a JSON body and must answer with a token pair:
/// `{"accessToken", "refreshToken", "accessExpiry", "refreshExpiry"}`,
/// expiries in Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRoutes {
    /// Receives `{"service", "login", "password"}`.
    pub login: RouteDescriptor,
    /// Receives `{"refreshToken"}`.
    pub refresh: RouteDescriptor,
}

impl Default for AuthRoutes {
    fn default() -> Self {
        Self {
            login: RouteDescriptor::post("/api/v1/service/jwt/create"),
            refresh: RouteDescriptor::post("/api/v1/service/jwt/update"),
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    service: &'a str,
    login: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Obtains, caches and renews access tokens.
pub struct TokenManager {
    transport: Transport,
    store: Arc<dyn TokenStore>,
    auth_service: ExternalService,
    routes: AuthRoutes,
    leeway: Duration,
}

impl TokenManager {
    pub(crate) fn new(
        transport: Transport,
        store: Arc<dyn TokenStore>,
        auth_service: ExternalService,
        routes: AuthRoutes,
        leeway: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            auth_service,
            routes,
            leeway,
        }
    }

    /// Returns an access token for `identity`, renewing it if needed.
    ///
    /// # Errors
    ///
    /// - [`Error::Connectivity`] if the authentication service is unreachable
    /// - [`Error::Credentials`] if it rejects the identity's login
    /// - [`Error::Request`] or [`Error::DeserializationFailed`] for any other
    ///   unusable answer
    pub async fn get_valid_token(&self, identity: &Identity) -> Result<String> {
        let key = identity.cache_key();
        let now = Utc::now();

        if let Some(pair) = self.store.get(&key).await {
            if pair.access_valid_at(now, self.leeway) {
                tracing::debug!(key = %key, "Using cached access token");
                return Ok(pair.access_token);
            }

            if pair.refresh_valid_at(now) {
                match self.refresh(&pair).await {
                    Ok(renewed) => {
                        tracing::info!(key = %key, "Tokens renewed with refresh token");
                        return Ok(self.remember(&key, renewed).await);
                    }
                    Err(e @ (Error::Credentials { .. } | Error::Request { .. })) => {
                        tracing::warn!(
                            key = %key,
                            error = %e,
                            "Refresh failed; falling back to login"
                        );
                        self.store.invalidate(&key).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let pair = self.login(identity).await?;
        tracing::info!(key = %key, "Tokens obtained by login");
        Ok(self.remember(&key, pair).await)
    }

    /// Drops the cached pair so the next lookup performs a full login.
    pub async fn invalidate(&self, identity: &Identity) {
        let key = identity.cache_key();
        tracing::debug!(key = %key, "Invalidating cached tokens");
        self.store.invalidate(&key).await;
    }

    async fn login(&self, identity: &Identity) -> Result<TokenPair> {
        let body = LoginRequest {
            service: identity.service_name(),
            login: identity.login(),
            password: identity.password(),
        };
        self.exchange("login", &self.routes.login, &body).await
    }

    async fn refresh(&self, pair: &TokenPair) -> Result<TokenPair> {
        let body = RefreshRequest {
            refresh_token: &pair.refresh_token,
        };
        self.exchange("refresh", &self.routes.refresh, &body).await
    }

    /// Calls a token endpoint without a bearer credential.
    async fn exchange<B: Serialize>(
        &self,
        kind: &'static str,
        route: &RouteDescriptor,
        body: &B,
    ) -> Result<TokenPair> {
        let url = self.auth_service.url_for(&route.bind(&RouteParams::new())?)?;
        let body = serde_json::to_value(body).map_err(|e| Error::SerializationFailed(e.to_string()))?;

        let raw = self
            .transport
            .send(route.method(), url, &HeaderMap::new(), Some(&body), None)
            .await
            .map_err(|e| {
                tracing::warn!(kind = kind, error = %e, "Authentication service unreachable");
                e
            })?;

        check_token_response(kind, raw)
    }

    /// Caches `pair` for its remaining refresh validity and returns the access token.
    async fn remember(&self, key: &CacheKey, pair: TokenPair) -> String {
        match pair.refresh_ttl(Utc::now()) {
            Some(ttl) => self.store.set(key, &pair, ttl).await,
            None => tracing::warn!(key = %key, "Issued refresh token is already expired; not caching"),
        }
        pair.access_token
    }
}

fn check_token_response(kind: &'static str, raw: RawResponse) -> Result<TokenPair> {
    match raw.status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            tracing::error!(kind = kind, status = raw.status.as_u16(), "Credentials rejected");
            Err(Error::Credentials {
                status: raw.status,
                raw_response: raw.body,
            })
        }
        status if !status.is_success() => {
            tracing::warn!(kind = kind, status = status.as_u16(), "Token request failed");
            Err(Error::Request {
                status,
                raw_response: raw.body,
                headers: raw.headers,
            })
        }
        _ => raw.deserialize::<TokenPair>().map(TokenPair::normalized),
    }
}
