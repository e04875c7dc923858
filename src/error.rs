//! Error types for recognition API calls.
//!
//! Every failed call ends in exactly one [`Error`]. Each variant can report a
//! numeric status through [`Error::status_code`]: the HTTP status for errors
//! that came back from the server, and the sentinel `500` for failures that
//! happened locally or before any response was received.

use http::{HeaderMap, StatusCode};

/// Status reported for failures that never produced an HTTP response.
pub const LOCAL_FAILURE_STATUS: u16 = 500;

/// The error type for recognition API calls.
///
/// # Examples
///
/// ```no_run
/// use carmen_cloud::{Error, VehicleClient, VehicleRequest};
///
/// # fn example(client: &VehicleClient, request: &VehicleRequest) {
/// match client.search(request) {
///     Ok(result) => println!("request id: {:?}", result.request_id),
///     Err(Error::Api { status, raw_response, .. }) => {
///         eprintln!("API error {}: {}", status, raw_response);
///     }
///     Err(e) => eprintln!("call failed with status {}: {}", e.status_code(), e),
/// }
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No response was obtained (connection refused, DNS or TLS failure, ...).
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The configured response timeout elapsed before a response arrived.
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a 4xx or 5xx status.
    ///
    /// The body is kept verbatim; the recognition APIs usually send a JSON
    /// object with a `message` field here.
    #[error("API error {status}: {raw_response}")]
    Api {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// A 2xx body could not be decoded into the expected result type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The request failed local validation and was never sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The client was configured incorrectly.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The blocking wrapper could not drive the asynchronous call.
    ///
    /// The original cause is available through [`std::error::Error::source`].
    #[error("Execution failed: {message}")]
    Execution {
        /// What went wrong
        message: String,
        /// The underlying cause
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The endpoint and routing subpath did not form a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(err)
        }
    }
}

impl Error {
    /// Classifies a non-success HTTP exchange.
    ///
    /// # Examples
    ///
    /// ```
    /// use carmen_cloud::Error;
    /// use http::{HeaderMap, StatusCode};
    ///
    /// let err = Error::from_status(
    ///     StatusCode::TOO_MANY_REQUESTS,
    ///     r#"{"message":"slow down"}"#.to_string(),
    ///     HeaderMap::new(),
    /// );
    /// assert_eq!(err.status_code(), 429);
    /// assert!(err.is_retryable());
    /// ```
    pub fn from_status(status: StatusCode, raw_response: String, headers: HeaderMap) -> Self {
        if status.is_client_error() {
            tracing::error!(
                status = status.as_u16(),
                response = %raw_response,
                "Client error (4xx)"
            );
        } else if status.is_server_error() {
            tracing::warn!(
                status = status.as_u16(),
                response = %raw_response,
                "Server error (5xx)"
            );
        }

        Error::Api {
            status,
            raw_response,
            headers,
        }
    }

    /// Wraps a local failure of the blocking wrapper, keeping the cause.
    pub(crate) fn execution<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Execution {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Returns `true` if another attempt could plausibly succeed.
    ///
    /// Connectivity failures, timeouts, 429 and every 5xx status qualify.
    /// Everything else, including all other 4xx statuses and decode
    /// failures, is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Timeout => true,
            Error::Api { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Error::DeserializationFailed { .. } => false,
            Error::InvalidRequest(_) => false,
            Error::ConfigurationError(_) => false,
            Error::Execution { .. } => false,
            Error::InvalidUrl(_) => false,
        }
    }

    /// Returns the numeric status carried by this error.
    ///
    /// Server responses report their own status. Requests rejected by local
    /// validation report `400`; everything else that never reached the
    /// server reports [`LOCAL_FAILURE_STATUS`].
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Api { status, .. } => status.as_u16(),
            Error::DeserializationFailed { status, .. } => status.as_u16(),
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST.as_u16(),
            _ => LOCAL_FAILURE_STATUS,
        }
    }

    /// Returns the HTTP status code if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if a response was received.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Api { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns the `message` field of a JSON error body, if there is one.
    ///
    /// ```
    /// use carmen_cloud::Error;
    /// use http::{HeaderMap, StatusCode};
    ///
    /// let err = Error::from_status(
    ///     StatusCode::FORBIDDEN,
    ///     r#"{"message":"Forbidden"}"#.to_string(),
    ///     HeaderMap::new(),
    /// );
    /// assert_eq!(err.server_message().as_deref(), Some("Forbidden"));
    /// ```
    pub fn server_message(&self) -> Option<String> {
        let body: serde_json::Value = serde_json::from_str(self.raw_response()?).ok()?;
        body.get("message")?.as_str().map(str::to_owned)
    }
}

/// A specialized `Result` type for recognition API calls.
pub type Result<T> = std::result::Result<T, Error>;
