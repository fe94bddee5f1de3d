use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::error::{Result, RotaError};
use crate::models::ProxyEndpoint;

/// One logical outgoing request
///
/// Headers and body are forwarded through the selected endpoint untouched.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Overrides the client-wide request timeout for this request only
    pub timeout: Option<Duration>,
}

impl DispatchRequest {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(RotaError::InvalidRequest(format!(
                    "Unsupported URL scheme: {}",
                    other
                )))
            }
        }

        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        })
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RotaError::InvalidRequest(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RotaError::InvalidRequest(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set the content type
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| RotaError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options accepted by the bare `request(url, options)` callable
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Defaults to GET
    pub method: Option<Method>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn into_request(self, url: &str) -> Result<DispatchRequest> {
        let mut request = DispatchRequest::new(self.method.unwrap_or(Method::GET), url)?;
        for (name, value) in &self.headers {
            request = request.header(name, value)?;
        }
        request.body = self.body;
        request.timeout = self.timeout;
        Ok(request)
    }
}

/// Response returned by a dispatch
///
/// Any HTTP status, including 4xx and 5xx, is a successful dispatch.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Endpoint that served the response
    pub endpoint: ProxyEndpoint,
    /// Total attempts the dispatch took, including this one
    pub attempts: u32,
}

impl DispatchResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, endpoint: ProxyEndpoint) -> Self {
        Self {
            status,
            headers,
            body,
            endpoint,
            attempts: 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| RotaError::InvalidRequest(format!("Failed to decode body: {}", e)))
    }
}
