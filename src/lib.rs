//! # carmen-cloud - clients for the Carmen Cloud recognition APIs
//!
//! Typed, retry-aware clients for the vehicle, ANPR and transport code
//! recognition services, built on top of `reqwest`. Every service takes a
//! multipart upload (image bytes plus metadata) and answers with JSON.
//!
//! ## Quick Start
//!
//! ```no_run
//! use carmen_cloud::{InputImage, Selector, VehicleClient, VehicleRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), carmen_cloud::Error> {
//!     let client = VehicleClient::builder()
//!         .endpoint("https://api.carmencloud.com/vehicle")
//!         .api_key(std::env::var("CARMEN_CLOUD_API_KEY").unwrap_or_default())
//!         .build()?;
//!
//!     let request = VehicleRequest::new()
//!         .services([Selector::Anpr, Selector::Mmr])
//!         .region("eur")
//!         .image(InputImage::jpeg(std::fs::read("car.jpg").unwrap(), "car.jpg"));
//!
//!     let result = client.search_async(&request).await?;
//!     println!("request {:?}: {:?}", result.request_id, result.data);
//!     Ok(())
//! }
//! ```
//!
//! ## Calling conventions
//!
//! Each client offers `search_async` (the primitive) and a blocking `search`,
//! both with a `_with_context` variant taking a [`RetryContext`] that is
//! threaded through every retry attempt of the call.
//!
//! ## Error Handling
//!
//! ```no_run
//! use carmen_cloud::{Error, TransportClient, TransportRequest};
//!
//! # fn example(client: &TransportClient, request: &TransportRequest) {
//! match client.search(request) {
//!     Ok(result) => println!("{:?}", result.data),
//!     Err(Error::Api { status, .. }) if status.as_u16() == 401 => eprintln!("bad API key"),
//!     Err(e) => eprintln!("failed ({}): {}", e.status_code(), e),
//! }
//! # }
//! ```
//!
//! ## Retries
//!
//! By default a call makes up to 3 attempts, 1 second apart, retrying
//! connectivity failures, timeouts, 429 and 5xx responses. Other failures are
//! returned immediately. Exhausting the budget returns the last error as is.
//!
//! ```no_run
//! use carmen_cloud::{AnprClient, RetryPolicy, RetryStrategy};
//! use carmen_cloud::retry::RetryOn5xx;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), carmen_cloud::Error> {
//! let client = AnprClient::builder()
//!     .endpoint("https://api.carmencloud.com/anpr")
//!     .api_key("my-api-key")
//!     .retry_policy(
//!         RetryPolicy::new(RetryStrategy::ExponentialBackoff {
//!             initial_delay: Duration::from_millis(250),
//!             max_delay: Duration::from_secs(4),
//!             max_retries: 5,
//!             jitter: true,
//!         })
//!         .with_predicate(RetryOn5xx),
//!     )
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod metadata;
pub mod multipart;
mod request;
mod response;
mod result;
pub mod retry;
mod service;
mod transport;

pub use client::{
    AnprClient, AnprClientBuilder, Client, ClientBuilder, TransportClient,
    TransportClientBuilder, VehicleClient, VehicleClientBuilder, API_KEY_ENV, ENDPOINT_ENV,
    RESPONSE_TIMEOUT_ENV,
};
pub use error::{Error, Result, LOCAL_FAILURE_STATUS};
pub use multipart::{normalize_subpath, MultipartForm, RecognitionRequest};
pub use request::{AnprRequest, InputImage, Selector, TransportRequest, VehicleRequest};
pub use response::{request_id_from_headers, Correlated, Response, REQUEST_ID_HEADER};
pub use result::{AnprResult, Location, Locations, TransportResult, VehicleResult};
pub use retry::{RetryContext, RetryDecision, RetryPolicy, RetryPredicate, RetryStrategy};
pub use service::{AnprApi, FeatureFlag, Service, TransportApi, VehicleApi};
