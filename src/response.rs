//! Typed result of a successful service call.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A successful response together with the details of the exchange.
///
/// `attempts` is `1` for the common case and `2` when the first attempt was
/// rejected with 401 and the call succeeded after renewing the token.
///
/// # Examples
///
/// ```no_run
/// use service_client::{RouteParams, ServiceClient};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Order {
///     id: String,
/// }
///
/// # async fn example(client: ServiceClient) -> Result<(), service_client::Error> {
/// let params = RouteParams::new().with("orderId", "42");
/// let order = client.get::<Order>("orders", "get_order", &params).await?;
///
/// println!("order {} in {:?}", order.id, order.latency);
/// if order.was_retried() {
///     println!("token was renewed mid-call");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized body.
    pub data: T,

    /// The body exactly as received.
    pub raw_body: String,

    /// The HTTP status code.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time from the start of the call to the final response, including any
    /// token acquisition and the retry.
    pub latency: Duration,

    /// Number of HTTP attempts made against the target service.
    pub attempts: usize,
}

impl<T> Response<T> {
    pub(crate) fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
        }
    }

    /// Maps the body to another type, keeping the exchange details.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns `true` if the call needed the token-renewal retry.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Consumes the response, returning only the body.
    pub fn into_data(self) -> T {
        self.data
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
