//! # service-client - Authenticated calls between microservices
//!
//! `service-client` lets one service call named routes on its sibling
//! services over HTTP, presenting a JWT access token it obtains from a
//! shared authentication service. Tokens are cached (in process, Redis or
//! Memcached), renewed with the refresh token when the access token expires,
//! and re-obtained by login when both are gone.
//!
//! ## Quick Start
//!
//! ```no_run
//! use service_client::{ExternalService, RouteDescriptor, RouteParams, ServiceClient};
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Order {
//!     id: String,
//!     total: u64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), service_client::Error> {
//!     let client = ServiceClient::builder()
//!         .identity("books", "books-svc", "s3cret")
//!         .external_service(ExternalService::new(
//!             "authentication",
//!             "http://auth.internal/authentication",
//!         )?)
//!         .external_service(
//!             ExternalService::new("orders", "http://orders.internal/orders")?
//!                 .route("get_order", RouteDescriptor::get("/v1/orders/{orderId}")),
//!         )
//!         .deadline(Duration::from_secs(5))
//!         .build()?;
//!
//!     let params = RouteParams::new().with("orderId", "42");
//!     let order = client.get::<Order>("orders", "get_order", &params).await?;
//!     println!("Order {} totals {}", order.data.id, order.data.total);
//!     println!("Request took {:?}", order.latency);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Named routes** - Routes are declared once with their required params and validated before any I/O
//! - **Token lifecycle** - Cached access token, refresh on expiry, login as the last resort
//! - **One renewal retry** - A 401 from the target drops the cached tokens and retries exactly once
//! - **Pluggable token cache** - In-memory, Redis or Memcached behind the [`TokenStore`] trait
//! - **Deadlines** - Bound a whole call, including token acquisition and the retry
//! - **Rich errors** - Validation, connectivity, credential and request failures are distinct
//! - **Structured logging** - `tracing` events with tokens masked
//!
//! ## Error Handling
//!
//! ```no_run
//! use service_client::{Error, RouteParams, ServiceClient};
//!
//! # async fn example(client: ServiceClient) -> Result<(), Error> {
//! let params = RouteParams::new();
//! match client.get::<serde_json::Value>("orders", "get_order", &params).await {
//!     Ok(response) => println!("Success: {:?}", response.data),
//!     Err(Error::Validation { missing, .. }) => eprintln!("Missing: {:?}", missing),
//!     Err(Error::Request { status, raw_response, .. }) => {
//!         eprintln!("HTTP error {}: {}", status, raw_response);
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration files
//!
//! ```no_run
//! use service_client::ServiceClientConfig;
//!
//! # fn example() -> Result<(), service_client::Error> {
//! let client = ServiceClientConfig::from_path("service-client.yaml")?.build()?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod dispatcher;
mod error;
mod manager;
mod registry;
mod response;
mod route;
pub mod store;
mod token;
mod transport;

pub use client::{ServiceClient, ServiceClientBuilder, DEFAULT_AUTH_SERVICE};
pub use config::{AuthRoutesConfig, IdentityConfig, RouteConfig, ServiceClientConfig, ServiceConfig};
pub use dispatcher::{RequestDispatcher, RequestOptions};
pub use error::{Error, Result};
pub use manager::{AuthRoutes, TokenManager};
pub use registry::{ExternalService, ServiceRegistry};
pub use response::Response;
pub use route::{RouteDescriptor, RouteParams};
pub use store::{MemcachedTokenStore, MemoryTokenStore, RedisTokenStore, TokenStore, TokenStoreConfig};
pub use token::{mask_token, CacheKey, Identity, TokenPair};
