//! Transport abstraction layer
//!
//! Adapters build [`RestRequest`]s and hand them to a [`RestTransport`].
//! Production uses [`http::HttpTransport`]; tests use
//! [`scripted::ScriptedTransport`] to replay canned venue responses.

pub mod http;
pub mod scripted;

use crate::error::TransportError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// A signed request, relative to the transport's base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    /// Already URL-encoded query string, without the leading `?`
    pub query: String,
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: Option<String>,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: String::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Path plus `?query` when a query is present
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response: status code and body text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    pub status: u16,
    pub body: String,
}

impl RestResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body).map_err(|e| TransportError::Deserialization(e.to_string()))
    }
}

/// Sends signed REST requests to one venue
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Ensure the transport trait is object-safe
    fn _assert_transport_object_safe(_: &dyn RestTransport) {}

    #[test]
    fn test_path_and_query() {
        let req = RestRequest::get("/fapi/v1/order").with_query("symbol=BTCUSDT");
        assert_eq!(req.path_and_query(), "/fapi/v1/order?symbol=BTCUSDT");
        assert_eq!(RestRequest::post("/x").path_and_query(), "/x");
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let req = RestRequest::get("/").with_header("X-MBX-APIKEY", "k");
        assert_eq!(req.header("x-mbx-apikey"), Some("k"));
        assert_eq!(req.header("missing"), None);
    }
}
