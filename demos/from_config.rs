//! Builds a client from a YAML file and prints a fresh access token.
//!
//! Run with: `cargo run --example from_config -- service-client.yaml`

use service_client::{mask_token, Error, ServiceClientConfig};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("service_client=debug,from_config=info")
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "service-client.yaml".to_string());

    let config = ServiceClientConfig::from_path(&path)?;
    println!("Loaded {:?}", config);

    let client = config.build()?;
    println!(
        "External services: {:?}",
        client.registry().names().collect::<Vec<_>>()
    );

    let token = client.access_token().await?;
    println!("Access token: {}", mask_token(&token));

    Ok(())
}
