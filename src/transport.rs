//! Single-attempt HTTP execution.
//!
//! [`Transport`] issues exactly one request per call and never retries;
//! deciding whether to try again is the dispatcher's job.

use crate::{token::mask_token, Error, Response, Result};
use http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Shared reqwest client plus the settings applied to every attempt.
#[derive(Clone)]
pub(crate) struct Transport {
    http_client: reqwest::Client,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
}

/// A response whose status has not been interpreted yet.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: String,
}

impl Transport {
    pub(crate) fn new(default_headers: HeaderMap, timeout: Option<Duration>) -> Result<Self> {
        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            http_client,
            default_headers,
            timeout,
        })
    }

    /// Sends one request, attaching `bearer` as an `Authorization` header when given.
    ///
    /// Any status is returned as a [`RawResponse`]; only the absence of a
    /// response is an error.
    pub(crate) async fn send(
        &self,
        method: &Method,
        url: Url,
        headers: &HeaderMap,
        body: Option<&serde_json::Value>,
        bearer: Option<&str>,
    ) -> Result<RawResponse> {
        let masked = bearer.map(mask_token);
        tracing::debug!(
            method = %method,
            url = %url,
            token = masked.as_deref().unwrap_or("none"),
            "Executing HTTP request"
        );

        let mut request = self.http_client.request(method.clone(), url);

        for (name, value) in &self.default_headers {
            request = request.header(name, value);
        }

        for (name, value) in headers {
            request = request.header(name, value);
        }

        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, bearer_header(token)?);
        }

        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn bearer_header(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::try_from(format!("Bearer {}", token)).map_err(|_| {
        Error::ConfigurationError("Access token is not a valid header value".to_string())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

impl RawResponse {
    pub(crate) fn is_auth_rejection(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Parses a body into `T`, keeping the raw text on failure.
    pub(crate) fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            tracing::error!(
                error = %e,
                raw_response = %self.body,
                "Failed to deserialize response"
            );

            Error::DeserializationFailed {
                raw_response: self.body.clone(),
                serde_error: e.to_string(),
                status: self.status,
            }
        })
    }

    /// Turns the response into a typed [`Response`], or a [`Error::Request`]
    /// for any non-2xx status.
    pub(crate) fn into_response<T: DeserializeOwned>(
        self,
        latency: Duration,
        attempts: usize,
    ) -> Result<Response<T>> {
        tracing::info!(
            status = self.status.as_u16(),
            latency_ms = latency.as_millis(),
            attempts = attempts,
            "Received HTTP response"
        );

        if !self.status.is_success() {
            if self.status.is_client_error() {
                tracing::error!(
                    status = self.status.as_u16(),
                    response = %self.body,
                    "Client error (4xx)"
                );
            } else if self.status.is_server_error() {
                tracing::warn!(
                    status = self.status.as_u16(),
                    response = %self.body,
                    "Server error (5xx)"
                );
            }

            return Err(Error::Request {
                status: self.status,
                raw_response: self.body,
                headers: self.headers,
            });
        }

        let data = self.deserialize()?;
        Ok(Response::new(
            data,
            self.body,
            self.status,
            self.headers,
            latency,
            attempts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn only_401_is_an_auth_rejection() {
        assert!(raw(401, "").is_auth_rejection());
        assert!(!raw(403, "").is_auth_rejection());
        assert!(!raw(200, "").is_auth_rejection());
    }

    #[test]
    fn non_success_becomes_request_error() {
        let result = raw(503, "down").into_response::<serde_json::Value>(Duration::ZERO, 1);
        match result {
            Err(Error::Request {
                status,
                raw_response,
                ..
            }) => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(raw_response, "down");
            }
            other => panic!("expected request error, got {:?}", other),
        }
    }

    #[test]
    fn success_is_deserialized_with_metadata() {
        let response = raw(200, r#"{"id": 7}"#)
            .into_response::<serde_json::Value>(Duration::from_millis(5), 2)
            .unwrap();

        assert_eq!(response.data["id"], 7);
        assert_eq!(response.attempts, 2);
        assert!(response.was_retried());
    }

    #[test]
    fn bearer_header_is_sensitive() {
        let value = bearer_header("abc").unwrap();
        assert_eq!(value.to_str().unwrap(), "Bearer abc");
        assert!(value.is_sensitive());
        assert!(bearer_header("bad\ntoken").is_err());
    }
}
