//! The set of external services a client may call.

use crate::{
    route::{BoundRoute, RouteDescriptor},
    Error, Result,
};
use std::collections::HashMap;
use url::Url;

/// One reachable external service: a base URL and its named routes.
///
/// # Examples
///
/// ```
/// use service_client::{ExternalService, RouteDescriptor};
///
/// # fn example() -> Result<(), service_client::Error> {
/// let orders = ExternalService::new("orders", "http://orders.internal:8080/orders")?
///     .route("create_order", RouteDescriptor::post("/v1/orders").require("orderId"))
///     .route("get_order", RouteDescriptor::get("/v1/orders/{orderId}"));
///
/// assert_eq!(orders.name(), "orders");
/// assert!(orders.route_named("get_order").is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ExternalService {
    name: String,
    base_url: Url,
    routes: HashMap<String, RouteDescriptor>,
}

impl ExternalService {
    /// Creates a service with no routes.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` does not parse or cannot carry a path.
    pub fn new(name: impl Into<String>, base_url: impl AsRef<str>) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        if base_url.cannot_be_a_base() {
            return Err(Error::ConfigurationError(format!(
                "Base URL {} cannot carry a path",
                base_url
            )));
        }

        Ok(Self {
            name: name.into(),
            base_url,
            routes: HashMap::new(),
        })
    }

    /// Registers a named route, replacing any route with the same name.
    pub fn route(mut self, name: impl Into<String>, descriptor: RouteDescriptor) -> Self {
        self.routes.insert(name.into(), descriptor);
        self
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The base URL every route path is appended to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Looks up a route by name.
    pub fn route_named(&self, name: &str) -> Option<&RouteDescriptor> {
        self.routes.get(name)
    }

    /// Appends a bound route to the base URL, keeping any base path.
    pub(crate) fn url_for(&self, bound: &BoundRoute) -> Result<Url> {
        let mut url = self.base_url.clone();

        url.path_segments_mut()
            .map_err(|_| {
                Error::ConfigurationError(format!("Base URL {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(&bound.segments);

        if !bound.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&bound.query);
        }

        Ok(url)
    }
}

/// Read-only mapping from service name to [`ExternalService`].
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ExternalService>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service, replacing any service with the same name.
    pub fn insert(&mut self, service: ExternalService) {
        self.services.insert(service.name.clone(), service);
    }

    /// Looks up a service by name.
    pub fn service(&self, name: &str) -> Option<&ExternalService> {
        self.services.get(name)
    }

    /// Returns `true` if a service with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Resolves a (service, route) pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRoute`] if either name is unregistered.
    pub fn resolve(&self, service: &str, route: &str) -> Result<(&ExternalService, &RouteDescriptor)> {
        self.services
            .get(service)
            .and_then(|svc| svc.route_named(route).map(|descriptor| (svc, descriptor)))
            .ok_or_else(|| Error::UnknownRoute {
                service: service.to_string(),
                route: route.to_string(),
            })
    }

    /// Iterates over the registered service names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

impl FromIterator<ExternalService> for ServiceRegistry {
    fn from_iter<I: IntoIterator<Item = ExternalService>>(iter: I) -> Self {
        let mut registry = ServiceRegistry::new();
        for service in iter {
            registry.insert(service);
        }
        registry
    }
}
