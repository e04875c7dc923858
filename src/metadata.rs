//! Per-request dispatch metadata.

use crate::multipart::MultipartForm;
use http::Method;

/// Everything needed to dispatch one logical request.
///
/// The metadata is reused verbatim for every retry attempt.
#[derive(Debug, Clone)]
pub(crate) struct RequestMetadata {
    /// The HTTP method (POST for recognition, GET for lookups).
    pub method: Method,

    /// The normalized subpath appended to the endpoint.
    pub subpath: String,

    /// The multipart body, if any.
    pub form: Option<MultipartForm>,
}

impl RequestMetadata {
    /// Creates metadata for the given method and normalized subpath.
    pub fn new(method: Method, subpath: impl Into<String>) -> Self {
        Self {
            method,
            subpath: subpath.into(),
            form: None,
        }
    }

    /// Attaches a multipart body.
    pub fn with_form(mut self, form: MultipartForm) -> Self {
        self.form = Some(form);
        self
    }
}
