//! Request dispatch with the single token-renewal retry.

use crate::{
    manager::TokenManager,
    registry::ExternalService,
    route::{RouteDescriptor, RouteParams},
    token::Identity,
    transport::Transport,
    Error, Response, Result,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Per-call settings.
///
/// # Examples
///
/// ```
/// use service_client::RequestOptions;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), service_client::Error> {
/// let options = RequestOptions::new()
///     .deadline(Duration::from_secs(2))
///     .header("x-request-id", "abc-123")?;
///
/// let health_check = RequestOptions::new().without_auth();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RequestOptions {
    require_auth: bool,
    deadline: Option<Duration>,
    headers: HeaderMap,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            require_auth: true,
            deadline: None,
            headers: HeaderMap::new(),
        }
    }
}

impl RequestOptions {
    /// Authenticated call with the client's default deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends the call without a bearer token and without the renewal retry.
    pub fn without_auth(mut self) -> Self {
        self.require_auth = false;
        self
    }

    /// Bounds the whole call, including token acquisition and the retry.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Adds a header for this call only.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Whether a bearer token will be attached.
    pub fn requires_auth(&self) -> bool {
        self.require_auth
    }
}

/// Executes route calls on behalf of one identity.
///
/// An authenticated call is attempted at most twice: if the first attempt is
/// rejected with 401 the cached tokens are dropped, a fresh token is
/// obtained, and the call is repeated once. Transport failures are never
/// retried here.
pub struct RequestDispatcher {
    transport: Transport,
    tokens: Arc<TokenManager>,
    identity: Identity,
    default_deadline: Option<Duration>,
}

impl RequestDispatcher {
    pub(crate) fn new(
        transport: Transport,
        tokens: Arc<TokenManager>,
        identity: Identity,
        default_deadline: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            tokens,
            identity,
            default_deadline,
        }
    }

    /// Calls `route` on `service`.
    ///
    /// Params are validated before anything touches the network.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `params` lacks a required name
    /// - [`Error::Connectivity`] if no response was received
    /// - [`Error::Credentials`] if the identity cannot log in
    /// - [`Error::Request`] for a non-success status (including a second 401)
    /// - [`Error::Timeout`] if the deadline elapsed
    pub async fn execute<Req, Res>(
        &self,
        service: &ExternalService,
        route: &RouteDescriptor,
        params: &RouteParams,
        body: Option<&Req>,
        options: &RequestOptions,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let bound = route.bind(params)?;
        let url = service.url_for(&bound)?;
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;

        let call = self.dispatch(route.method(), url, body.as_ref(), options);

        match options.deadline.or(self.default_deadline) {
            Some(deadline) => tokio::time::timeout(deadline, call).await.map_err(|_| {
                tracing::warn!(
                    service = service.name(),
                    route = route.path_template(),
                    deadline_ms = deadline.as_millis(),
                    "Deadline elapsed"
                );
                Error::Timeout
            })?,
            None => call.await,
        }
    }

    async fn dispatch<Res>(
        &self,
        method: &Method,
        url: Url,
        body: Option<&serde_json::Value>,
        options: &RequestOptions,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let token = if options.require_auth {
                Some(self.tokens.get_valid_token(&self.identity).await?)
            } else {
                None
            };

            let raw = self
                .transport
                .send(method, url.clone(), &options.headers, body, token.as_deref())
                .await
                .map_err(|e| {
                    tracing::warn!(
                        error = %e,
                        attempt = attempt,
                        method = %method,
                        url = %url,
                        "Request failed"
                    );
                    e
                })?;

            if raw.is_auth_rejection() && options.require_auth && attempt == 1 {
                tracing::warn!(
                    method = %method,
                    url = %url,
                    "Access token rejected; renewing and retrying once"
                );
                self.tokens.invalidate(&self.identity).await;
                continue;
            }

            return raw.into_response(start_time.elapsed(), attempt);
        }
    }
}
