//! Error types for authenticated service calls.
//!
//! Every failure surfaces as one variant of [`Error`]. The four kinds a caller
//! usually branches on are [`Error::Validation`], [`Error::Connectivity`],
//! [`Error::Credentials`] and [`Error::Request`]; the rest describe misuse or
//! malformed payloads. Token cache failures never appear here: the cache fails
//! open to a fresh login.

use http::{HeaderMap, StatusCode};

/// The error type for service calls.
///
/// # Examples
///
/// ```no_run
/// use service_client::{Error, RouteParams, ServiceClient};
///
/// # async fn example(client: ServiceClient) -> Result<(), Error> {
/// let params = RouteParams::new().with("orderId", "42");
/// match client.get::<serde_json::Value>("orders", "get_order", &params).await {
///     Ok(response) => println!("order: {:?}", response.data),
///     Err(Error::Validation { missing, .. }) => eprintln!("missing params: {:?}", missing),
///     Err(Error::Credentials { status, .. }) => eprintln!("our identity was rejected ({status})"),
///     Err(Error::Request { status, raw_response, .. }) => {
///         eprintln!("orders answered {status}: {raw_response}")
///     }
///     Err(e) if e.is_connectivity() => eprintln!("orders unreachable: {e}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The supplied parameters do not satisfy the route's required set.
    ///
    /// Raised before any network activity, including token acquisition.
    #[error("Missing required params {missing:?} for route {route}")]
    Validation {
        /// The path template of the route being called
        route: String,
        /// Names of the required params that were not supplied, sorted
        missing: Vec<String>,
    },

    /// No response was received (connection refused, DNS failure, transport
    /// timeout, broken body stream).
    ///
    /// This layer never retries these; retry policy belongs to the transport.
    #[error("Connectivity error: {0}")]
    Connectivity(#[from] reqwest::Error),

    /// The caller-supplied deadline elapsed before the call completed.
    ///
    /// The deadline covers token acquisition, the first attempt and the
    /// single permitted retry.
    #[error("Deadline elapsed before the request completed")]
    Timeout,

    /// The authentication service rejected our login or refresh.
    ///
    /// The identity itself is invalid; retrying with the same credentials
    /// will not help.
    #[error("Credentials rejected by the authentication service (status {status}): {raw_response}")]
    Credentials {
        /// The rejection status (401 or 403)
        status: StatusCode,
        /// The raw response body
        raw_response: String,
    },

    /// The remote service answered with a non-success status.
    ///
    /// For authenticated calls a 401 only lands here after the token was
    /// renewed and the retry was rejected again.
    #[error("Request failed with status {status}: {raw_response}")]
    Request {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// A success response body did not match the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The service or route name is not registered with the client.
    #[error("Unknown route {route} on service {service}")]
    UnknownRoute {
        /// The requested service name
        service: String,
        /// The requested route name
        route: String,
    },

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided or produced.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` if no response was received from the remote side.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Connectivity(_))
    }

    /// Returns `true` if the remote side rejected the presented credential.
    ///
    /// # Examples
    ///
    /// ```
    /// use service_client::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::Request {
    ///     status: StatusCode::UNAUTHORIZED,
    ///     raw_response: "token expired".to_string(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(err.is_auth_rejection());
    ///
    /// let err = Error::Request {
    ///     status: StatusCode::NOT_FOUND,
    ///     raw_response: String::new(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(!err.is_auth_rejection());
    /// ```
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            Error::Credentials { .. } => true,
            Error::Request { status, .. } => *status == StatusCode::UNAUTHORIZED,
            _ => false,
        }
    }

    /// Returns the HTTP status code if this error carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Request { status, .. } => Some(*status),
            Error::Credentials { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error carries one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Request { raw_response, .. } => Some(raw_response),
            Error::Credentials { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

/// A specialized `Result` type for service calls.
pub type Result<T> = std::result::Result<T, Error>;
