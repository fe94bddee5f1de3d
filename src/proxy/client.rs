//! Client surfaces over the dispatcher
//!
//! Two ways to issue requests through the rotating pool:
//! - [`RotatingClient`]: request-builder style with a base URL, default headers
//!   and a default timeout
//! - [`request_fn`]: a bare `(url, options)` callable
//!
//! Both go through [`RequestDispatcher::dispatch`], so usage and health
//! statistics aggregate across them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, RotaError};
use crate::models::{DispatchRequest, DispatchResponse, PoolStats, RequestOptions};
use crate::proxy::dispatcher::RequestDispatcher;

/// Request-builder style client routed through the rotating pool
#[derive(Clone)]
pub struct RotatingClient {
    dispatcher: Arc<RequestDispatcher>,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
}

impl RotatingClient {
    pub fn new(dispatcher: Arc<RequestDispatcher>) -> Self {
        Self {
            dispatcher,
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: None,
        }
    }

    /// Resolve relative request paths against `base_url`
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        let mut url = Url::parse(base_url)?;
        // Keep the last path segment when joining relative paths
        if !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }
        self.base_url = Some(url);
        Ok(self)
    }

    /// Header sent with every request unless the request sets it itself
    pub fn with_default_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RotaError::InvalidRequest(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RotaError::InvalidRequest(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Timeout applied to requests that do not set their own
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    pub fn stats(&self) -> PoolStats {
        self.dispatcher.stats()
    }

    pub fn get(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder<'_> {
        let request = self.resolve(path).and_then(|url| {
            let mut request = DispatchRequest::new(method, url.as_str())?;
            request.headers = self.default_headers.clone();
            request.timeout = self.timeout;
            Ok(request)
        });

        RequestBuilder {
            client: self,
            request,
        }
    }

    /// POST a GraphQL document as `{"query", "variables"}` JSON
    pub async fn graphql(
        &self,
        path: &str,
        query: &str,
        variables: Option<Value>,
    ) -> Result<DispatchResponse> {
        let mut body = json!({ "query": query });
        if let Some(variables) = variables {
            body["variables"] = variables;
        }
        self.post(path).json(&body).send().await
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        match &self.base_url {
            Some(base) => Ok(base.join(path.trim_start_matches('/'))?),
            None => Ok(Url::parse(path)?),
        }
    }
}

/// One request under construction; errors surface on `send`
pub struct RequestBuilder<'a> {
    client: &'a RotatingClient,
    request: Result<DispatchRequest>,
}

impl<'a> RequestBuilder<'a> {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request = self.request.and_then(|r| r.header(name, value));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request = self.request.map(|r| r.body(body));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.request = self.request.and_then(|r| r.json(value));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request = self.request.map(|r| r.timeout(timeout));
        self
    }

    /// Consume the builder without sending
    pub fn build(self) -> Result<DispatchRequest> {
        self.request
    }

    pub async fn send(self) -> Result<DispatchResponse> {
        let request = self.request?;
        self.client.dispatcher.dispatch(request).await
    }

    pub async fn send_with_cancel(self, cancel: &CancellationToken) -> Result<DispatchResponse> {
        let request = self.request?;
        self.client
            .dispatcher
            .dispatch_with_cancel(request, cancel)
            .await
    }
}

/// Bare request callable sharing `dispatcher`'s pool
pub type RequestFn =
    Arc<dyn Fn(&str, RequestOptions) -> BoxFuture<'static, Result<DispatchResponse>> + Send + Sync>;

/// Build a bare `(url, options)` callable over `dispatcher`
pub fn request_fn(dispatcher: Arc<RequestDispatcher>) -> RequestFn {
    Arc::new(move |url: &str, options: RequestOptions| {
        let request = options.into_request(url);
        let dispatcher = dispatcher.clone();
        async move { dispatcher.dispatch(request?).await }.boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RotationConfig;
    use crate::proxy::transport::mock::ScriptedTransport;

    fn create_client(transport: Arc<ScriptedTransport>) -> RotatingClient {
        let config = RotationConfig::new("127.0.0.1", 9000, 9003)
            .with_max_retries(1)
            .with_retry_delay_ms(0);
        let dispatcher = Arc::new(RequestDispatcher::new(config, transport).unwrap());
        RotatingClient::new(dispatcher)
    }

    #[tokio::test]
    async fn test_base_url_and_default_headers() {
        let transport = Arc::new(ScriptedTransport::succeeding());
        let client = create_client(transport.clone())
            .with_base_url("https://shop.example/admin/api/2024-01")
            .unwrap()
            .with_default_header("X-Shopify-Access-Token", "default")
            .unwrap()
            .with_default_header("Accept", "application/json")
            .unwrap()
            .with_timeout(Duration::from_secs(5));

        client
            .get("/shop.json")
            .header("X-Shopify-Access-Token", "override")
            .send()
            .await
            .unwrap();

        let calls = transport.calls();
        let (_, sent) = &calls[0];
        assert_eq!(
            sent.url.as_str(),
            "https://shop.example/admin/api/2024-01/shop.json"
        );
        assert_eq!(sent.headers["x-shopify-access-token"], "override");
        assert_eq!(sent.headers["accept"], "application/json");
        assert_eq!(sent.timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_absolute_url_without_base() {
        let transport = Arc::new(ScriptedTransport::succeeding());
        let client = create_client(transport.clone());

        let response = client
            .put("http://ip-api.example/json")
            .body("x")
            .timeout(Duration::from_secs(1))
            .send()
            .await
            .unwrap();
        assert!(response.is_success());

        let calls = transport.calls();
        let (_, sent) = &calls[0];
        assert_eq!(sent.method, Method::PUT);
        assert_eq!(sent.timeout, Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_invalid_request_not_dispatched() {
        let transport = Arc::new(ScriptedTransport::succeeding());
        let client = create_client(transport.clone());

        let err = client.get("relative/path").send().await.unwrap_err();
        assert!(matches!(err, RotaError::InvalidRequest(_)));

        let err = client
            .get("http://example.com")
            .header("bad header", "x")
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, RotaError::InvalidRequest(_)));

        assert!(transport.calls().is_empty());
        assert_eq!(client.stats().used, 0);
    }

    #[tokio::test]
    async fn test_graphql_body() {
        let transport = Arc::new(ScriptedTransport::succeeding());
        let client = create_client(transport.clone())
            .with_base_url("https://shop.example/api/2024-01/")
            .unwrap();

        client
            .graphql(
                "graphql.json",
                "query($n: Int!) { products(first: $n) { edges { node { id } } } }",
                Some(json!({ "n": 5 })),
            )
            .await
            .unwrap();

        let calls = transport.calls();
        let (_, sent) = &calls[0];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.url.as_str(), "https://shop.example/api/2024-01/graphql.json");
        let body: Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["variables"]["n"], 5);
        assert!(body["query"].as_str().unwrap().starts_with("query"));
    }

    #[tokio::test]
    async fn test_request_fn_shares_pool_with_client() {
        let transport = Arc::new(ScriptedTransport::succeeding());
        let client = create_client(transport.clone());
        let request = request_fn(client.dispatcher().clone());

        client.get("http://example.com/a").send().await.unwrap();
        let response = request(
            "http://example.com/b",
            RequestOptions::default().method(Method::POST).body("payload"),
        )
        .await
        .unwrap();

        // The bare callable continues the same rotation
        assert_eq!(response.endpoint.port, 9001);
        assert_eq!(transport.ports(), vec![9000, 9001]);
        assert_eq!(client.stats().used, 2);

        let calls = transport.calls();
        let (_, sent) = &calls[1];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.body, Some(Bytes::from("payload")));
    }

    #[tokio::test]
    async fn test_request_fn_invalid_url() {
        let transport = Arc::new(ScriptedTransport::succeeding());
        let client = create_client(transport.clone());
        let request = request_fn(client.dispatcher().clone());

        let err = request("::nope::", RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RotaError::InvalidRequest(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_client_failure_propagates_retry_exhausted() {
        let transport = Arc::new(ScriptedTransport::failing_all());
        let client = create_client(transport.clone());

        let err = client.get("http://example.com").send().await.unwrap_err();
        assert!(matches!(err, RotaError::RetryExhausted { attempts: 2, .. }));
        assert_eq!(err.tried_endpoints().len(), 2);
    }
}
