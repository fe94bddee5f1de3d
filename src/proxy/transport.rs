//! HTTP transport through upstream proxy endpoints
//!
//! The proxy protocol itself (HTTP forwarding, CONNECT, SOCKS4/5 handshakes)
//! is delegated to the HTTP client; this module only routes a request through
//! one endpoint and turns the outcome into a response or a transport error.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::config::{ClientConfig, RotationConfig};
use crate::error::{Result, RotaError};
use crate::models::{DispatchRequest, DispatchResponse, ProxyCredentials, ProxyEndpoint, ProxyProtocol};

/// Everything needed to route one request through one endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRoute {
    pub endpoint: ProxyEndpoint,
    pub protocol: ProxyProtocol,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyRoute {
    pub fn new(
        endpoint: ProxyEndpoint,
        protocol: ProxyProtocol,
        credentials: Option<ProxyCredentials>,
    ) -> Self {
        Self {
            endpoint,
            protocol,
            credentials,
        }
    }

    /// Route to `endpoint` using the pool-wide protocol and credentials
    pub fn from_config(endpoint: ProxyEndpoint, config: &RotationConfig) -> Self {
        Self::new(endpoint, config.protocol, config.credentials.clone())
    }

    /// Proxy URL without credentials, e.g. `socks5h://127.0.0.1:10000`
    pub fn proxy_url(&self) -> String {
        format!("{}://{}", self.protocol.url_scheme(), self.endpoint.authority())
    }
}

/// The underlying HTTP call a dispatch performs on each attempt
///
/// Implementations return `Ok` for any HTTP status. Only failures to reach the
/// target through the endpoint (refused, reset, timed out, DNS) are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, route: &ProxyRoute, request: &DispatchRequest)
        -> Result<DispatchResponse>;
}

/// reqwest-backed transport with one pooled client per endpoint
pub struct ReqwestTransport {
    clients: DashMap<ProxyEndpoint, reqwest::Client>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            clients: DashMap::new(),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Get or build the client bound to `route`'s endpoint
    fn client_for(&self, route: &ProxyRoute) -> Result<reqwest::Client> {
        if let Some(client) = self.clients.get(&route.endpoint) {
            return Ok(client.clone());
        }

        let mut proxy = reqwest::Proxy::all(route.proxy_url()).map_err(|e| {
            RotaError::InvalidConfig(format!("Invalid proxy {}: {}", route.proxy_url(), e))
        })?;
        if let Some(credentials) = &route.credentials {
            proxy = proxy.basic_auth(&credentials.username, &credentials.password);
        }

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| RotaError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;

        debug!("Built HTTP client for proxy {}", route.proxy_url());
        self.clients.insert(route.endpoint.clone(), client.clone());
        Ok(client)
    }

    /// Number of endpoints with a cached client
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, route, request), fields(port = route.endpoint.port, method = %request.method, url = %request.url))]
    async fn execute(
        &self,
        route: &ProxyRoute,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse> {
        let client = self.client_for(route)?;

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!(status = status.as_u16(), "Received response through {}", route.endpoint);
        Ok(DispatchResponse::new(
            status,
            headers,
            body,
            route.endpoint.clone(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory transport for dispatcher tests

    use std::collections::HashSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue, StatusCode};
    use parking_lot::Mutex;

    use super::{HttpTransport, ProxyRoute};
    use crate::error::{Result, RotaError};
    use crate::models::{DispatchRequest, DispatchResponse};

    pub(crate) struct ScriptedTransport {
        failing_ports: HashSet<u16>,
        fail_all: bool,
        status: StatusCode,
        delay: Option<Duration>,
        calls: Mutex<Vec<(ProxyRoute, DispatchRequest)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn succeeding() -> Self {
            Self {
                failing_ports: HashSet::new(),
                fail_all: false,
                status: StatusCode::OK,
                delay: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing_on(ports: &[u16]) -> Self {
            Self {
                failing_ports: ports.iter().copied().collect(),
                ..Self::succeeding()
            }
        }

        pub(crate) fn failing_all() -> Self {
            Self {
                fail_all: true,
                ..Self::succeeding()
            }
        }

        pub(crate) fn with_status(mut self, status: StatusCode) -> Self {
            self.status = status;
            self
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Ports routed through, in call order
        pub(crate) fn ports(&self) -> Vec<u16> {
            self.calls.lock().iter().map(|(r, _)| r.endpoint.port).collect()
        }

        pub(crate) fn calls(&self) -> Vec<(ProxyRoute, DispatchRequest)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(
            &self,
            route: &ProxyRoute,
            request: &DispatchRequest,
        ) -> Result<DispatchResponse> {
            self.calls.lock().push((route.clone(), request.clone()));

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if self.fail_all || self.failing_ports.contains(&route.endpoint.port) {
                return Err(RotaError::ProxyConnectionFailed(format!(
                    "connection refused by {}",
                    route.endpoint
                )));
            }

            let mut headers = HeaderMap::new();
            headers.insert(
                "x-served-by",
                HeaderValue::from_str(&route.endpoint.port.to_string()).unwrap(),
            );
            Ok(DispatchResponse::new(
                self.status,
                headers,
                Bytes::from(format!("ok from {}", route.endpoint.port)),
                route.endpoint.clone(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(protocol: ProxyProtocol, port: u16) -> ProxyRoute {
        ProxyRoute::new(ProxyEndpoint::new("127.0.0.1", port), protocol, None)
    }

    #[test]
    fn test_proxy_url() {
        assert_eq!(
            route(ProxyProtocol::Http, 10000).proxy_url(),
            "http://127.0.0.1:10000"
        );
        assert_eq!(
            route(ProxyProtocol::Socks5, 10001).proxy_url(),
            "socks5h://127.0.0.1:10001"
        );

        let with_creds = ProxyRoute::new(
            ProxyEndpoint::new("proxy.internal", 8080),
            ProxyProtocol::Https,
            Some(ProxyCredentials::new("user", "secret")),
        );
        // Credentials are applied separately and never embedded in the URL
        assert_eq!(with_creds.proxy_url(), "https://proxy.internal:8080");
    }

    #[test]
    fn test_client_cached_per_endpoint() {
        let transport = ReqwestTransport::new(&ClientConfig::default());

        transport.client_for(&route(ProxyProtocol::Http, 10000)).unwrap();
        transport.client_for(&route(ProxyProtocol::Http, 10000)).unwrap();
        assert_eq!(transport.cached_clients(), 1);

        transport.client_for(&route(ProxyProtocol::Socks5, 10001)).unwrap();
        assert_eq!(transport.cached_clients(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_failure() {
        let config = ClientConfig {
            connect_timeout: 1,
            request_timeout: 2,
            ..ClientConfig::default()
        };
        let transport = ReqwestTransport::new(&config);
        let request = DispatchRequest::get("http://example.com/").unwrap();

        // Nothing listens on port 1
        let err = transport
            .execute(&route(ProxyProtocol::Http, 1), &request)
            .await
            .unwrap_err();
        assert!(err.is_transport_failure(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_request_timeout_overrides_client_timeout() {
        // A proxy that accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = ClientConfig {
            request_timeout: 30,
            ..ClientConfig::default()
        };
        let transport = ReqwestTransport::new(&config);
        let request = DispatchRequest::get("http://example.com/")
            .unwrap()
            .timeout(Duration::from_millis(100));

        let start = std::time::Instant::now();
        let err = transport
            .execute(&route(ProxyProtocol::Http, port), &request)
            .await
            .unwrap_err();

        assert!(matches!(err, RotaError::Timeout), "unexpected error: {}", err);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_credentials_sent_to_proxy() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&head).to_string()
        });

        let transport = ReqwestTransport::new(&ClientConfig::default());
        let route = ProxyRoute::new(
            ProxyEndpoint::new("127.0.0.1", port),
            ProxyProtocol::Http,
            Some(ProxyCredentials::new("user", "secret")),
        );
        let request = DispatchRequest::get("http://example.com/status").unwrap();

        let response = transport.execute(&route, &request).await.unwrap();
        assert_eq!(response.status.as_u16(), 204);
        assert_eq!(response.endpoint.port, port);

        let head = received.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get http://example.com/status"), "{}", head);
        // base64("user:secret")
        assert!(
            head.contains("proxy-authorization: basic dxnlcjpzzwnyzxq="),
            "{}",
            head
        );
    }
}
