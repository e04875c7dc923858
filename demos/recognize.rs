//! Recognizes the plate and make of a vehicle in a local image.
//!
//! Reads the endpoint and API key from `CARMEN_CLOUD_ENDPOINT` and
//! `CARMEN_CLOUD_API_KEY`, then prints the raw result.
//!
//! Run with: `cargo run --example recognize -- car.jpg eur`

use carmen_cloud::{Error, InputImage, RetryContext, Selector, VehicleClientBuilder, VehicleRequest};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("carmen_cloud=debug,recognize=info")
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "car.jpg".to_string());
    let region = args.next().unwrap_or_else(|| "eur".to_string());

    let bytes = std::fs::read(&path)
        .map_err(|e| Error::InvalidRequest(format!("Cannot read {}: {}", path, e)))?;

    let client = VehicleClientBuilder::from_env()?
        .disable_call_statistics(true)
        .build()?;

    let locations = client.locations_async().await?;
    println!("{} locations available", locations.len());

    let request = VehicleRequest::new()
        .services([Selector::Anpr, Selector::Mmr])
        .region(region)
        .image(InputImage::jpeg(bytes, path.clone()));

    let context = RetryContext::new().with("file", path);
    let response = client.send_async_with_context(&request, &context).await?;

    println!("Request id: {:?}", response.request_id);
    println!("Attempts: {}", response.attempts);
    println!("Latency: {:?}", response.latency);
    println!("{}", response.raw_body);

    Ok(())
}
