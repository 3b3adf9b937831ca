//! reqwest-backed transport

use crate::error::TransportError;
use crate::transport::{Method, RestRequest, RestResponse, RestTransport};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;

/// HTTPS transport for one venue base URL
pub struct HttpTransport {
    http: reqwest::Client,
    /// REST base URL (e.g. `https://fapi.binance.com`)
    base_url: String,
}

impl HttpTransport {
    /// Build a client with a request timeout
    ///
    /// The engine enforces its own per-call deadline on top of this one.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RestTransport for HttpTransport {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path_and_query());
        debug!("{} {}", request.method.as_str(), url);

        let mut builder = match request.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Delete => self.http.delete(&url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(RestResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else if err.is_decode() {
        TransportError::Deserialization(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}
