//! Successful responses and correlation-id propagation.
//!
//! The [`Response`] type wraps the decoded result along with metadata about
//! the HTTP exchange. Results that implement [`Correlated`] also receive the
//! server's correlation id from the `x-amzn-requestid` header.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// Response header carrying the server-assigned correlation id.
pub const REQUEST_ID_HEADER: &str = "x-amzn-requestid";

/// A result that can carry the server's correlation id.
pub trait Correlated {
    /// Stores the correlation id; `None` leaves the result uncorrelated.
    fn set_request_id(&mut self, request_id: Option<String>);

    /// Returns the stored correlation id.
    fn request_id(&self) -> Option<&str>;
}

/// Reads the correlation id from response headers.
///
/// A missing or non-UTF-8 header yields `None`.
pub fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)?
        .to_str()
        .ok()
        .map(str::to_owned)
}

/// A wrapper around a successful HTTP response.
///
/// # Examples
///
/// ```no_run
/// use carmen_cloud::{VehicleClient, VehicleRequest};
///
/// # async fn example(client: VehicleClient, request: VehicleRequest) -> carmen_cloud::Result<()> {
/// let response = client.send_async(&request).await?;
///
/// println!("Request id: {:?}", response.request_id);
/// println!("Request took {:?} over {} attempts", response.latency, response.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The raw response body as a string.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The server correlation id, if the response carried one.
    pub request_id: Option<String>,

    /// The total latency of the call, including all retry attempts.
    pub latency: Duration,

    /// The number of attempts made to complete this call.
    pub attempts: usize,
}

impl<T> Response<T> {
    /// Creates a new `Response`, reading the correlation id from `headers`.
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: usize,
    ) -> Self {
        let request_id = request_id_from_headers(&headers);
        Self {
            data,
            raw_body,
            status,
            headers,
            request_id,
            latency,
            attempts,
        }
    }

    /// Maps the response data to a different type, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            request_id: self.request_id,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns `true` if the call required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T: Correlated> Response<T> {
    /// Copies the correlation id into the decoded result.
    pub fn decorate(mut self) -> Self {
        if let Some(request_id) = &self.request_id {
            self.data.set_request_id(Some(request_id.clone()));
        }
        self
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
