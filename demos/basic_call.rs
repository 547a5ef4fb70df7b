//! Basic example demonstrating authenticated GET and POST calls.
//!
//! This example shows how to:
//! - Register the authentication service and a target service
//! - Declare named routes with their required params
//! - Make GET and POST calls and read the response metadata
//! - Branch on the error kinds
//!
//! Point it at running services with `AUTH_URL` and `ORDERS_URL`, then run
//! `cargo run --example basic_call`.

use serde::{Deserialize, Serialize};
use service_client::{Error, ExternalService, RouteDescriptor, RouteParams, ServiceClient};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Order {
    id: String,
    total: u64,
}

#[derive(Debug, Serialize)]
struct NewOrder {
    sku: String,
    quantity: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("service_client=debug,basic_call=info")
        .init();

    let auth_url = std::env::var("AUTH_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8000/authentication".to_string());
    let orders_url =
        std::env::var("ORDERS_URL").unwrap_or_else(|_| "http://127.0.0.1:8001/orders".to_string());

    let client = ServiceClient::builder()
        .identity("books", "books-svc", "s3cret")
        .external_service(ExternalService::new("authentication", &auth_url)?)
        .external_service(
            ExternalService::new("orders", &orders_url)?
                .route("get_order", RouteDescriptor::get("/v1/orders/{orderId}"))
                .route("create_order", RouteDescriptor::post("/v1/orders")),
        )
        .timeout(Duration::from_secs(5))
        .deadline(Duration::from_secs(10))
        .build()?;

    println!("=== GET ===");
    let params = RouteParams::new().with("orderId", 42);
    match client.get::<Order>("orders", "get_order", &params).await {
        Ok(order) => {
            println!("Order: {:?}", order.data);
            println!("Latency: {:?}", order.latency);
            println!("Token renewed mid-call: {}", order.was_retried());
        }
        Err(Error::Credentials { status, .. }) => {
            eprintln!("Authentication service rejected our login ({})", status);
        }
        Err(e) if e.is_connectivity() => eprintln!("Service unreachable: {}", e),
        Err(e) => eprintln!("Call failed: {}", e),
    }

    println!("\n=== POST ===");
    let new_order = NewOrder {
        sku: "B-1".to_string(),
        quantity: 2,
    };
    let created = client
        .post::<_, Order>("orders", "create_order", &RouteParams::new(), &new_order)
        .await?;
    println!("Created: {:?} (status {})", created.data, created.status);

    Ok(())
}
