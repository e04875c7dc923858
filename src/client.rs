//! Recognition clients with retry logic and typed errors.
//!
//! [`Client`] is generic over the [`Service`] it talks to; the aliases
//! [`VehicleClient`], [`AnprClient`] and [`TransportClient`] name the three
//! concrete clients. Use [`ClientBuilder`] to configure and create them.

use crate::{
    metadata::RequestMetadata,
    multipart::{normalize_subpath, RecognitionRequest},
    retry::{RetryContext, RetryDecision, RetryPolicy},
    service::{AnprApi, FeatureFlag, Service, TransportApi, VehicleApi},
    transport::HttpTransport,
    Error, Locations, Response, Result,
};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use url::Url;

/// Environment variable read by [`ClientBuilder::from_env`] for the endpoint.
pub const ENDPOINT_ENV: &str = "CARMEN_CLOUD_ENDPOINT";
/// Environment variable read by [`ClientBuilder::from_env`] for the API key.
pub const API_KEY_ENV: &str = "CARMEN_CLOUD_API_KEY";
/// Environment variable read by [`ClientBuilder::from_env`] for the response timeout.
pub const RESPONSE_TIMEOUT_ENV: &str = "CARMEN_CLOUD_RESPONSE_TIMEOUT_MS";

const API_KEY_HEADER: &str = "x-api-key";
const LOCATIONS_PATH: &str = "countries";

/// Client for the vehicle recognition API.
pub type VehicleClient = Client<VehicleApi>;
/// Client for the plate-only ANPR API.
pub type AnprClient = Client<AnprApi>;
/// Client for the transport code recognition API.
pub type TransportClient = Client<TransportApi>;

/// Builder for a [`VehicleClient`].
pub type VehicleClientBuilder = ClientBuilder<VehicleApi>;
/// Builder for an [`AnprClient`].
pub type AnprClientBuilder = ClientBuilder<AnprApi>;
/// Builder for a [`TransportClient`].
pub type TransportClientBuilder = ClientBuilder<TransportApi>;

/// A client for one recognition service.
///
/// The client is cheap to clone and safe to share between tasks and threads;
/// clones share one connection pool and one immutable configuration.
///
/// Every call exists in four forms: asynchronous or blocking, each with or
/// without a [`RetryContext`]. The asynchronous form is the primitive. The
/// blocking form drives it on a private runtime.
///
/// # Examples
///
/// ```no_run
/// use carmen_cloud::{InputImage, Selector, VehicleClient, VehicleRequest};
///
/// # async fn example() -> Result<(), carmen_cloud::Error> {
/// let client = VehicleClient::builder()
///     .endpoint("https://api.carmencloud.com/vehicle")
///     .api_key("my-api-key")
///     .disable_call_statistics(true)
///     .build()?;
///
/// let request = VehicleRequest::new()
///     .services([Selector::Anpr, Selector::Mmr])
///     .region("eur")
///     .image(InputImage::jpeg(std::fs::read("car.jpg").unwrap(), "car.jpg"));
///
/// let result = client.search_async(&request).await?;
/// println!("{:?} ({:?})", result.data, result.request_id);
/// # Ok(())
/// # }
/// ```
pub struct Client<S> {
    inner: Arc<ClientInner>,
    _service: PhantomData<fn() -> S>,
}

struct ClientInner {
    transport: HttpTransport,
    retry_policy: RetryPolicy,
}

impl<S> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _service: PhantomData,
        }
    }
}

impl<S: Service> fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("service", &S::NAME)
            .field("endpoint", &self.inner.transport.endpoint().as_str())
            .field("retry_policy", &self.inner.retry_policy)
            .finish_non_exhaustive()
    }
}

impl<S: Service> Client<S> {
    /// Creates a new builder for this service.
    pub fn builder() -> ClientBuilder<S> {
        ClientBuilder::new()
    }

    /// The configured base endpoint.
    pub fn endpoint(&self) -> &Url {
        self.inner.transport.endpoint()
    }

    /// Headers sent with every request: API key, `Accept` and feature flags.
    pub fn default_headers(&self) -> &HeaderMap {
        self.inner.transport.default_headers()
    }

    /// The per-attempt timeout, if one was configured.
    pub fn response_timeout(&self) -> Option<Duration> {
        self.inner.transport.timeout()
    }

    /// The retry policy applied to every call.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry_policy
    }

    /// Sends a recognition request, returning the result with its metadata.
    pub async fn send_async(&self, request: &S::Request) -> Result<Response<S::Result>> {
        self.send(request, None).await
    }

    /// Like [`send_async`](Self::send_async), threading `context` through
    /// every attempt.
    pub async fn send_async_with_context(
        &self,
        request: &S::Request,
        context: &RetryContext,
    ) -> Result<Response<S::Result>> {
        self.send(request, Some(context)).await
    }

    /// Sends a recognition request.
    pub async fn search_async(&self, request: &S::Request) -> Result<S::Result> {
        Ok(self.send(request, None).await?.data)
    }

    /// Sends a recognition request, threading `context` through every attempt.
    pub async fn search_async_with_context(
        &self,
        request: &S::Request,
        context: &RetryContext,
    ) -> Result<S::Result> {
        Ok(self.send(request, Some(context)).await?.data)
    }

    /// Blocking form of [`search_async`](Self::search_async).
    ///
    /// Safe to call from any thread, including `spawn_blocking` closures.
    /// Calling it from an async task works too, but stalls that task's worker
    /// thread for the whole call.
    ///
    /// # Errors
    ///
    /// Besides every error the asynchronous call can return, fails with
    /// [`Error::Execution`] if the blocking runtime or its helper thread
    /// cannot be started, or if driving the call panics.
    pub fn search(&self, request: &S::Request) -> Result<S::Result> {
        block_on(self.search_async(request))?
    }

    /// Blocking form of [`search_async_with_context`](Self::search_async_with_context).
    pub fn search_with_context(
        &self,
        request: &S::Request,
        context: &RetryContext,
    ) -> Result<S::Result> {
        block_on(self.search_async_with_context(request, context))?
    }

    async fn send(
        &self,
        request: &S::Request,
        context: Option<&RetryContext>,
    ) -> Result<Response<S::Result>> {
        let form = request.to_form()?;
        let metadata =
            RequestMetadata::new(Method::POST, normalize_subpath(request.subpath())).with_form(form);

        let response = self.call::<S::Result>(metadata, context).await?;
        Ok(response.decorate())
    }

    /// Runs one logical call: attempts, classification and retries.
    ///
    /// Retries sleep on this future, so dropping it stops the retry loop.
    async fn call<T>(
        &self,
        metadata: RequestMetadata,
        context: Option<&RetryContext>,
    ) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let start_time = Instant::now();
        let context_label = context.map(ToString::to_string).unwrap_or_default();
        let mut attempt = 0;

        loop {
            attempt += 1;

            tracing::debug!(
                service = S::NAME,
                attempt = attempt,
                context = %context_label,
                "Dispatching request"
            );

            let result = match self.inner.transport.execute(&metadata, attempt).await {
                Ok(response) => {
                    let latency = start_time.elapsed();
                    self.inner
                        .transport
                        .parse_response(response, latency, attempt)
                        .await
                }
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            tracing::warn!(
                error = %error,
                attempt = attempt,
                service = S::NAME,
                method = %metadata.method,
                path = %metadata.subpath,
                context = %context_label,
                "Request failed"
            );

            match self.inner.retry_policy.decide(attempt, &error, context) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::info!(
                        delay_ms = delay.as_millis(),
                        attempt = attempt,
                        context = %context_label,
                        "Retrying request after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }
}

impl Client<VehicleApi> {
    /// Lists the locations the vehicle API supports.
    pub async fn locations_async(&self) -> Result<Locations> {
        Ok(self.fetch_locations(None).await?.data)
    }

    /// Like [`locations_async`](Self::locations_async), threading `context`
    /// through every attempt.
    pub async fn locations_async_with_context(&self, context: &RetryContext) -> Result<Locations> {
        Ok(self.fetch_locations(Some(context)).await?.data)
    }

    /// Blocking form of [`locations_async`](Self::locations_async).
    pub fn locations(&self) -> Result<Locations> {
        block_on(self.locations_async())?
    }

    /// Blocking form of [`locations_async_with_context`](Self::locations_async_with_context).
    pub fn locations_with_context(&self, context: &RetryContext) -> Result<Locations> {
        block_on(self.locations_async_with_context(context))?
    }

    async fn fetch_locations(&self, context: Option<&RetryContext>) -> Result<Response<Locations>> {
        let metadata = RequestMetadata::new(Method::GET, normalize_subpath(Some(LOCATIONS_PATH)));
        self.call(metadata, context).await
    }
}

static BLOCKING_RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

/// Returns the shared blocking runtime, starting it on first use.
///
/// The runtime lives for the whole process so pooled connections opened by
/// one blocking call stay usable by the next.
fn blocking_runtime() -> Result<&'static tokio::runtime::Runtime> {
    if let Some(runtime) = BLOCKING_RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::execution("Failed to start blocking runtime", e))?;
    // A concurrent caller may have won the race; its runtime is kept.
    let _ = BLOCKING_RUNTIME.set(runtime);
    BLOCKING_RUNTIME
        .get()
        .ok_or_else(|| Error::execution("Failed to start blocking runtime", "runtime missing"))
}

/// Drives `future` to completion on the shared blocking runtime.
///
/// A thread that already carries a runtime context (an async task, or a
/// `spawn_blocking` closure) cannot enter another runtime, so there the call
/// is driven from a scoped helper thread while the caller waits.
fn block_on<F>(future: F) -> Result<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    let runtime = blocking_runtime()?;

    if tokio::runtime::Handle::try_current().is_err() {
        return Ok(runtime.block_on(future));
    }

    tracing::debug!("Blocking call inside a runtime context, using a helper thread");

    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("carmen-cloud-blocking".to_string())
            .spawn_scoped(scope, || runtime.block_on(future))
            .map_err(|e| Error::execution("Failed to spawn blocking helper thread", e))?;

        handle
            .join()
            .map_err(|panic| Error::execution("Blocking call panicked", panic_message(panic)))
    })
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// Service-specific feature flags are only available on the builder of the
/// service that understands them.
///
/// # Examples
///
/// ```no_run
/// use carmen_cloud::{RetryPolicy, RetryStrategy, TransportClient};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), carmen_cloud::Error> {
/// let client = TransportClient::builder()
///     .endpoint("https://api.carmencloud.com/transport")
///     .api_key("my-api-key")
///     .response_timeout(Duration::from_secs(30))
///     .retry_policy(RetryPolicy::new(RetryStrategy::ExponentialBackoff {
///         initial_delay: Duration::from_millis(200),
///         max_delay: Duration::from_secs(5),
///         max_retries: 4,
///         jitter: true,
///     }))
///     .disable_checksum_check(true)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder<S> {
    endpoint: Option<String>,
    api_key: Option<String>,
    response_timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    flags: BTreeMap<FeatureFlag, bool>,
    _service: PhantomData<fn() -> S>,
}

impl<S: Service> ClientBuilder<S> {
    /// Creates a builder with no endpoint, no API key, the default retry
    /// policy and every flag off.
    pub fn new() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            response_timeout: None,
            retry_policy: RetryPolicy::default(),
            flags: BTreeMap::new(),
            _service: PhantomData,
        }
    }

    /// Creates a builder seeded from the environment.
    ///
    /// Reads [`ENDPOINT_ENV`], [`API_KEY_ENV`] and [`RESPONSE_TIMEOUT_ENV`]
    /// (milliseconds). Unset variables leave the field unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout variable is not a number.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::new();

        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            builder = builder.endpoint(endpoint);
        }
        if let Ok(api_key) = std::env::var(API_KEY_ENV) {
            builder = builder.api_key(api_key);
        }
        if let Ok(timeout) = std::env::var(RESPONSE_TIMEOUT_ENV) {
            let millis = timeout.trim().parse::<u64>().map_err(|e| {
                Error::ConfigurationError(format!("Invalid {}: {}", RESPONSE_TIMEOUT_ENV, e))
            })?;
            builder = builder.response_timeout_ms(millis);
        }

        Ok(builder)
    }

    /// The default retry policy: 3 attempts, 1 second apart, retrying
    /// connectivity failures, 429 and 5xx.
    pub fn default_retry() -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Sets the base URL; the request subpath is appended to it.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the API key sent as `X-Api-Key`.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets how long a single attempt may take.
    ///
    /// The timeout covers the whole exchange, from connecting and uploading
    /// the image to reading the response body, not just the wait for the
    /// first response byte. Size it for the largest image you send.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Sets the response timeout in milliseconds.
    pub fn response_timeout_ms(self, millis: u64) -> Self {
        self.response_timeout(Duration::from_millis(millis))
    }

    /// Sets the retry policy. Use [`RetryPolicy::none`] to disable retries.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn flag(mut self, flag: FeatureFlag, enabled: bool) -> Self {
        self.flags.insert(flag, enabled);
        self
    }

    /// Returns the current value of a feature flag.
    pub fn feature_flag(&self, flag: FeatureFlag) -> bool {
        self.flags.get(&flag).copied().unwrap_or(false)
    }

    /// Builds the configured client.
    ///
    /// The builder is left untouched, so it can build further clients.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the endpoint or API key is
    /// missing or malformed.
    pub fn build(&self) -> Result<Client<S>> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::ConfigurationError("Endpoint is required".to_string()))?;
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::ConfigurationError(format!("Invalid endpoint: {}", e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::ConfigurationError(format!(
                "Endpoint is not a base URL: {}",
                endpoint
            )));
        }

        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::ConfigurationError("API key is required".to_string()))?;

        let default_headers = self.default_headers(api_key)?;

        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        tracing::debug!(
            service = S::NAME,
            endpoint = %endpoint,
            "Built recognition client"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport: HttpTransport::new(
                    http_client,
                    endpoint,
                    default_headers,
                    self.response_timeout,
                ),
                retry_policy: self.retry_policy.clone(),
            }),
            _service: PhantomData,
        })
    }

    fn default_headers(&self, api_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let mut api_key = HeaderValue::try_from(api_key)
            .map_err(|e| Error::ConfigurationError(format!("Invalid API key: {}", e)))?;
        api_key.set_sensitive(true);
        headers.insert(HeaderName::from_static(API_KEY_HEADER), api_key);
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );

        for flag in S::FEATURE_FLAGS {
            let name = HeaderName::from_bytes(flag.header_name().as_bytes()).map_err(|e| {
                Error::ConfigurationError(format!("Invalid flag header {}: {}", flag, e))
            })?;
            let value = if self.feature_flag(*flag) { "true" } else { "false" };
            headers.insert(name, HeaderValue::from_static(value));
        }

        Ok(headers)
    }
}

impl<S: Service> Default for ClientBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for ClientBuilder<S> {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            response_timeout: self.response_timeout,
            retry_policy: self.retry_policy.clone(),
            flags: self.flags.clone(),
            _service: PhantomData,
        }
    }
}

impl<S: Service> fmt::Debug for ClientBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("service", &S::NAME)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("response_timeout", &self.response_timeout)
            .field("retry_policy", &self.retry_policy)
            .field("flags", &self.flags)
            .finish()
    }
}

impl ClientBuilder<VehicleApi> {
    /// Sends `X-Disable-Call-Statistics`.
    pub fn disable_call_statistics(self, disable: bool) -> Self {
        self.flag(FeatureFlag::DisableCallStatistics, disable)
    }

    /// Sends `X-Disable-Image-Resizing`.
    pub fn disable_image_resizing(self, disable: bool) -> Self {
        self.flag(FeatureFlag::DisableImageResizing, disable)
    }

    /// Sends `X-Enable-Wide-Range-Analysis`.
    pub fn enable_wide_range_analysis(self, enable: bool) -> Self {
        self.flag(FeatureFlag::EnableWideRangeAnalysis, enable)
    }
}

impl ClientBuilder<TransportApi> {
    /// Sends `X-Disable-Image-Resizing`.
    pub fn disable_image_resizing(self, disable: bool) -> Self {
        self.flag(FeatureFlag::DisableImageResizing, disable)
    }

    /// Sends `X-Enable-Wide-Range-Analysis`.
    pub fn enable_wide_range_analysis(self, enable: bool) -> Self {
        self.flag(FeatureFlag::EnableWideRangeAnalysis, enable)
    }

    /// Skips check digit validation of recognized codes.
    pub fn disable_checksum_check(self, disable: bool) -> Self {
        self.flag(FeatureFlag::DisableChecksumCheck, disable)
    }

    /// Returns full US accreditation codes.
    pub fn enable_full_us_accr_code(self, enable: bool) -> Self {
        self.flag(FeatureFlag::EnableFullUsAccrCode, enable)
    }

    /// Omits ISO codes from the result.
    pub fn disable_iso_code(self, disable: bool) -> Self {
        self.flag(FeatureFlag::DisableIsoCode, disable)
    }
}
