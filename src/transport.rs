//! One HTTP exchange: dispatch, status classification and decoding.

use crate::{metadata::RequestMetadata, Error, Response, Result};
use http::HeaderMap;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// A pooled HTTP client bound to one endpoint and its default headers.
pub(crate) struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: Url,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
}

impl HttpTransport {
    pub(crate) fn new(
        http_client: reqwest::Client,
        endpoint: Url,
        default_headers: HeaderMap,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            http_client,
            endpoint,
            default_headers,
            timeout,
        }
    }

    pub(crate) fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub(crate) fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Appends a normalized subpath to the endpoint.
    pub(crate) fn url_for(&self, subpath: &str) -> Result<Url> {
        if subpath.is_empty() {
            return Ok(self.endpoint.clone());
        }

        let base = self.endpoint.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}{}", base, subpath))?)
    }

    /// Executes a single attempt.
    pub(crate) async fn execute(
        &self,
        metadata: &RequestMetadata,
        attempt: usize,
    ) -> Result<reqwest::Response> {
        let url = self.url_for(&metadata.subpath)?;

        tracing::debug!(
            method = %metadata.method,
            url = %url,
            attempt = attempt,
            "Executing HTTP request"
        );

        let mut request = self.http_client.request(metadata.method.clone(), url);

        for (name, value) in &self.default_headers {
            request = request.header(name, value);
        }

        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        // Forms are consumed on send, so every attempt builds its own.
        if let Some(form) = &metadata.form {
            request = request.multipart(form.to_reqwest()?);
        }

        let response = request.send().await?;

        Ok(response)
    }

    /// Classifies the response status and decodes a successful body.
    pub(crate) async fn parse_response<T>(
        &self,
        response: reqwest::Response,
        latency: Duration,
        attempts: usize,
    ) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let headers = response.headers().clone();

        tracing::info!(
            status = status.as_u16(),
            latency_ms = latency.as_millis(),
            attempts = attempts,
            "Received HTTP response"
        );

        if status.is_client_error() || status.is_server_error() {
            let raw_response = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(
                        status = status.as_u16(),
                        error = %e,
                        "Failed to read error response body"
                    );
                    String::new()
                }
            };
            return Err(Error::from_status(status, raw_response, headers));
        }

        let raw_body = response.text().await?;

        match serde_json::from_str::<T>(&raw_body) {
            Ok(data) => Ok(Response::new(
                data, raw_body, status, headers, latency, attempts,
            )),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %raw_body,
                    "Failed to deserialize response"
                );

                Err(Error::DeserializationFailed {
                    raw_response: raw_body,
                    serde_error: e.to_string(),
                    status,
                })
            }
        }
    }
}
