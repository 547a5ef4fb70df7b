//! Declarative client configuration.
//!
//! A deployment usually describes its identity and dependencies in a file
//! rather than in code. [`ServiceClientConfig`] is that file's shape:
//!
//! ```yaml
//! identity:
//!   service: books
//!   login: books-svc
//!   password: s3cret
//! services:
//!   authentication:
//!     base_url: http://auth.internal/authentication
//!   orders:
//!     base_url: http://orders.internal/orders
//!     routes:
//!       get_order:
//!         method: GET
//!         path: /v1/orders/{orderId}
//!       create_order:
//!         method: POST
//!         path: /v1/orders
//!         required: [orderId]
//! token_store:
//!   backend: redis
//!   url: redis://127.0.0.1:6379/3
//! deadline_ms: 5000
//! ```

use crate::{
    client::{ServiceClient, ServiceClientBuilder, DEFAULT_AUTH_SERVICE},
    manager::AuthRoutes,
    registry::ExternalService,
    route::RouteDescriptor,
    store::TokenStoreConfig,
    Error, Result,
};
use http::Method;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Credentials the client logs in with.
#[derive(Clone, Deserialize)]
pub struct IdentityConfig {
    /// This process's own service name
    pub service: String,
    /// Login registered with the authentication service
    pub login: String,
    /// Password for `login`
    pub password: String,
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("service", &self.service)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One route on an external service.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// HTTP method, e.g. `GET`
    pub method: String,
    /// Path template relative to the service's base URL
    pub path: String,
    /// Required names beyond the template placeholders
    #[serde(default)]
    pub required: Vec<String>,
}

impl RouteConfig {
    fn to_descriptor(&self) -> Result<RouteDescriptor> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::ConfigurationError(format!("Invalid HTTP method: {}", self.method)))?;

        Ok(self
            .required
            .iter()
            .fold(RouteDescriptor::new(method, self.path.clone()), |route, name| {
                route.require(name.clone())
            }))
    }
}

/// One external service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Base URL every route path is appended to
    pub base_url: String,
    /// Named routes
    #[serde(default)]
    pub routes: BTreeMap<String, RouteConfig>,
}

/// Overrides for the authentication service's token endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthRoutesConfig {
    /// Login route
    pub login: Option<RouteConfig>,
    /// Refresh route
    pub refresh: Option<RouteConfig>,
}

/// Top-level configuration for a [`ServiceClient`].
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceClientConfig {
    /// Who this process is
    pub identity: IdentityConfig,

    /// Name of the entry in `services` that issues tokens
    #[serde(default = "default_auth_service")]
    pub auth_service: String,

    /// Token endpoint overrides
    #[serde(default)]
    pub auth_routes: Option<AuthRoutesConfig>,

    /// External services by name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    /// Token cache backend
    #[serde(default)]
    pub token_store: TokenStoreConfig,

    /// Per-attempt HTTP timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Default deadline for a whole call
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    /// Seconds before expiry at which an access token is renewed
    #[serde(default)]
    pub expiry_leeway_secs: u64,

    /// Headers sent with every request
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
}

fn default_auth_service() -> String {
    DEFAULT_AUTH_SERVICE.to_string()
}

impl ServiceClientConfig {
    /// Parses a YAML document. JSON is accepted too, being valid YAML.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        serde_yaml::from_str(source)
            .map_err(|e| Error::ConfigurationError(format!("Invalid client configuration: {}", e)))
    }

    /// Reads and parses a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigurationError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "Loaded client configuration");
        Self::from_yaml_str(&source)
    }

    /// Converts the configuration into a builder, for further programmatic tweaks.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL, method or header is invalid.
    pub fn into_builder(self) -> Result<ServiceClientBuilder> {
        let mut builder = ServiceClient::builder()
            .identity(
                self.identity.service,
                self.identity.login,
                self.identity.password,
            )
            .auth_service(self.auth_service)
            .token_store_config(self.token_store)
            .expiry_leeway(Duration::from_secs(self.expiry_leeway_secs));

        if let Some(overrides) = self.auth_routes {
            let mut routes = AuthRoutes::default();
            if let Some(login) = overrides.login {
                routes.login = login.to_descriptor()?;
            }
            if let Some(refresh) = overrides.refresh {
                routes.refresh = refresh.to_descriptor()?;
            }
            builder = builder.auth_routes(routes);
        }

        for (name, service) in self.services {
            let mut external = ExternalService::new(name, &service.base_url)?;
            for (route_name, route) in &service.routes {
                external = external.route(route_name.clone(), route.to_descriptor()?);
            }
            builder = builder.external_service(external);
        }

        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }

        if let Some(ms) = self.deadline_ms {
            builder = builder.deadline(Duration::from_millis(ms));
        }

        for (name, value) in &self.default_headers {
            builder = builder.default_header(name, value)?;
        }

        Ok(builder)
    }

    /// Builds the client directly.
    pub fn build(self) -> Result<ServiceClient> {
        self.into_builder()?.build()
    }
}
