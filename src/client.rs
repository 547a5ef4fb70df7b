//! The client an application builds once per process.
//!
//! [`ServiceClient`] owns the identity, the registry of external services and
//! the token machinery. Use [`ServiceClientBuilder`] to configure it, or load
//! a [`ServiceClientConfig`](crate::ServiceClientConfig).

use crate::{
    dispatcher::{RequestDispatcher, RequestOptions},
    manager::{AuthRoutes, TokenManager},
    registry::{ExternalService, ServiceRegistry},
    route::{RouteDescriptor, RouteParams},
    store::{TokenStore, TokenStoreConfig},
    token::Identity,
    transport::Transport,
    Error, Response, Result,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default name of the service that issues tokens.
pub const DEFAULT_AUTH_SERVICE: &str = "authentication";

/// Authenticated client for a set of external services.
///
/// Cheap to clone; clones share the token cache and connection pool.
///
/// # Examples
///
/// ```no_run
/// use service_client::{ExternalService, RouteDescriptor, RouteParams, ServiceClient};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize)]
/// struct NewOrder {
///     sku: String,
/// }
///
/// #[derive(Deserialize)]
/// struct Order {
///     id: String,
/// }
///
/// # async fn example() -> Result<(), service_client::Error> {
/// let client = ServiceClient::builder()
///     .identity("books", "books-svc", "s3cret")
///     .external_service(ExternalService::new("authentication", "http://auth.internal/authentication")?)
///     .external_service(
///         ExternalService::new("orders", "http://orders.internal/orders")?
///             .route("create_order", RouteDescriptor::post("/v1/orders").require("orderId")),
///     )
///     .build()?;
///
/// let params = RouteParams::new().with("orderId", "42");
/// let body = NewOrder { sku: "B-1".to_string() };
/// let order = client
///     .post::<_, Order>("orders", "create_order", &params, &body)
///     .await?;
/// println!("created {}", order.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    identity: Identity,
    registry: ServiceRegistry,
    tokens: Arc<TokenManager>,
    dispatcher: RequestDispatcher,
}

impl ServiceClient {
    /// Creates a new builder.
    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder::new()
    }

    /// The identity this client authenticates as.
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// The registered external services.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    /// The token manager backing this client.
    pub fn token_manager(&self) -> &TokenManager {
        &self.inner.tokens
    }

    /// The dispatcher, for calls against ad-hoc routes.
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.inner.dispatcher
    }

    /// Calls a named route with whatever method it declares.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownRoute`] if the names are not registered, otherwise as
    /// [`RequestDispatcher::execute`].
    pub async fn call<Req, Res>(
        &self,
        service: &str,
        route: &str,
        params: &RouteParams,
        body: Option<&Req>,
        options: &RequestOptions,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let (service, descriptor) = self.resolve(service, route)?;
        self.inner
            .dispatcher
            .execute(service, descriptor, params, body, options)
            .await
    }

    /// Calls a named `GET` route.
    pub async fn get<Res>(&self, service: &str, route: &str, params: &RouteParams) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.get_with(service, route, params, &RequestOptions::default())
            .await
    }

    /// Calls a named `GET` route with per-call options.
    pub async fn get_with<Res>(
        &self,
        service: &str,
        route: &str,
        params: &RouteParams,
        options: &RequestOptions,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.ensure_method(service, route, &Method::GET)?;
        self.call::<(), Res>(service, route, params, None, options)
            .await
    }

    /// Calls a named `POST` route with a JSON body.
    pub async fn post<Req, Res>(
        &self,
        service: &str,
        route: &str,
        params: &RouteParams,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.post_with(service, route, params, body, &RequestOptions::default())
            .await
    }

    /// Calls a named `POST` route with a JSON body and per-call options.
    pub async fn post_with<Req, Res>(
        &self,
        service: &str,
        route: &str,
        params: &RouteParams,
        body: &Req,
        options: &RequestOptions,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.ensure_method(service, route, &Method::POST)?;
        self.call(service, route, params, Some(body), options).await
    }

    /// Returns a valid access token for this client's identity.
    pub async fn access_token(&self) -> Result<String> {
        self.inner.tokens.get_valid_token(&self.inner.identity).await
    }

    /// Drops cached tokens; the next authenticated call logs in again.
    pub async fn invalidate_tokens(&self) {
        self.inner.tokens.invalidate(&self.inner.identity).await;
    }

    fn resolve(&self, service: &str, route: &str) -> Result<(&ExternalService, &RouteDescriptor)> {
        if service == self.inner.identity.service_name() {
            return Err(Error::ConfigurationError(format!(
                "Service {} cannot call itself",
                service
            )));
        }
        self.inner.registry.resolve(service, route)
    }

    fn ensure_method(&self, service: &str, route: &str, expected: &Method) -> Result<()> {
        let (_, descriptor) = self.resolve(service, route)?;
        if descriptor.method() == expected {
            Ok(())
        } else {
            Err(Error::ConfigurationError(format!(
                "Route {} on {} is a {} route, not {}",
                route,
                service,
                descriptor.method(),
                expected
            )))
        }
    }
}

enum StoreChoice {
    Config(TokenStoreConfig),
    Instance(Arc<dyn TokenStore>),
}

/// Builder for [`ServiceClient`].
///
/// Only the identity and the authentication service are mandatory.
pub struct ServiceClientBuilder {
    identity: Option<Identity>,
    services: Vec<ExternalService>,
    auth_service: String,
    auth_routes: AuthRoutes,
    store: StoreChoice,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    deadline: Option<Duration>,
    expiry_leeway: Duration,
}

impl ServiceClientBuilder {
    /// Creates a builder with an in-memory token store and no timeouts.
    pub fn new() -> Self {
        Self {
            identity: None,
            services: Vec::new(),
            auth_service: DEFAULT_AUTH_SERVICE.to_string(),
            auth_routes: AuthRoutes::default(),
            store: StoreChoice::Config(TokenStoreConfig::Memory),
            default_headers: HeaderMap::new(),
            timeout: None,
            deadline: None,
            expiry_leeway: Duration::ZERO,
        }
    }

    /// Sets the identity this process logs in with.
    pub fn identity(
        mut self,
        service_name: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.identity = Some(Identity::new(service_name, login, password));
        self
    }

    /// Registers an external service. A later service with the same name wins.
    pub fn external_service(mut self, service: ExternalService) -> Self {
        self.services.push(service);
        self
    }

    /// Registers several external services.
    pub fn external_services(mut self, services: impl IntoIterator<Item = ExternalService>) -> Self {
        self.services.extend(services);
        self
    }

    /// Names the registered service that issues tokens.
    pub fn auth_service(mut self, name: impl Into<String>) -> Self {
        self.auth_service = name.into();
        self
    }

    /// Overrides the login and refresh routes on the authentication service.
    pub fn auth_routes(mut self, routes: AuthRoutes) -> Self {
        self.auth_routes = routes;
        self
    }

    /// Selects a token store backend by configuration.
    pub fn token_store_config(mut self, config: TokenStoreConfig) -> Self {
        self.store = StoreChoice::Config(config);
        self
    }

    /// Uses an already-built token store, e.g. one shared between clients.
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = StoreChoice::Instance(store);
        self
    }

    /// Adds a header sent with every request, token calls included.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the timeout for each individual HTTP attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the default deadline for a whole call, retry included.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Treats access tokens as expired this much before their expiry.
    pub fn expiry_leeway(mut self, leeway: Duration) -> Self {
        self.expiry_leeway = leeway;
        self
    }

    /// Builds the client.
    ///
    /// No network I/O happens here; the first authenticated call logs in.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is missing, the client's own service
    /// is listed as external, the authentication service is not registered,
    /// or the token store configuration is invalid.
    pub fn build(self) -> Result<ServiceClient> {
        let identity = self
            .identity
            .ok_or_else(|| Error::ConfigurationError("Identity is required".to_string()))?;

        let registry: ServiceRegistry = self.services.into_iter().collect();

        if registry.contains(identity.service_name()) {
            return Err(Error::ConfigurationError(format!(
                "Service {} cannot be one of its own external services",
                identity.service_name()
            )));
        }

        let auth_service = registry.service(&self.auth_service).cloned().ok_or_else(|| {
            Error::ConfigurationError(format!(
                "Authentication service {} is not registered",
                self.auth_service
            ))
        })?;

        let store = match self.store {
            StoreChoice::Config(config) => config.build()?,
            StoreChoice::Instance(store) => store,
        };

        let transport = Transport::new(self.default_headers, self.timeout)?;
        let tokens = Arc::new(TokenManager::new(
            transport.clone(),
            store,
            auth_service,
            self.auth_routes,
            self.expiry_leeway,
        ));
        let dispatcher =
            RequestDispatcher::new(transport, Arc::clone(&tokens), identity.clone(), self.deadline);

        tracing::info!(
            service = identity.service_name(),
            login = identity.login(),
            external_services = ?registry.names().collect::<Vec<_>>(),
            "Service client initialized"
        );

        Ok(ServiceClient {
            inner: Arc::new(ClientInner {
                identity,
                registry,
                tokens,
                dispatcher,
            }),
        })
    }
}

impl Default for ServiceClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
