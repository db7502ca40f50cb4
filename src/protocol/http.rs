//! HTTP-backed proxy transport.
//!
//! The embedded HTTP server and client are external capabilities behind the
//! minimal [`HttpBinder`]/[`HttpClient`] contracts; this module owns the
//! per-address server map, the per-path skeleton registry and fault
//! classification. Invocations travel as JSON request bodies, outcomes as
//! JSON response bodies; business faults ride in-band in a 200 response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, warn};

use super::proxy::{ProxyTransport, TransportFailure, UnexportCleanup};
use super::{RpcService, ServiceError};
use crate::error::{Result, RpcError, RpcErrorKind};
use crate::invocation::{GENERIC_KEY, Invocation, RemoteFault, RpcOutcome};
use crate::url::Url;

/// Headers carrying invocation attachments across the wire.
pub const ATTACHMENT_HEADER_PREFIX: &str = "x-rpc-";
/// Fault kind under which a server-side RPC failure is carried back.
pub const RPC_FAULT_KIND: &str = "rpc";

const DEFAULT_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }
}

#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn handle(&self, request: HttpRequest) -> HttpResponse;
}

/// A bound server. Closing is idempotent on the implementation's side.
#[async_trait]
pub trait HttpServer: Send + Sync {
    fn url(&self) -> &Url;
    async fn close(&self);
}

/// External server capability: bind an address, dispatch requests to the
/// handler, close on teardown.
#[async_trait]
pub trait HttpBinder: Send + Sync {
    async fn bind(&self, url: &Url, handler: Arc<dyn HttpHandler>) -> Result<Arc<dyn HttpServer>>;
}

#[derive(Debug, thiserror::Error)]
pub enum HttpTransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
}

/// External client capability.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn post(
        &self,
        endpoint: &str,
        headers: HashMap<String, String>,
        body: Vec<u8>,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, HttpTransportError>;
}

type SkeletonMap = Arc<DashMap<String, Arc<dyn RpcService>>>;

pub struct HttpRpcTransport {
    binder: Arc<dyn HttpBinder>,
    client: Arc<dyn HttpClient>,
    /// One server per `ip:port`; the first export binds, later exports on
    /// the same address reuse it.
    servers: DashMap<String, Arc<dyn HttpServer>>,
    /// Dispatch registry: absolute path -> skeleton.
    skeletons: SkeletonMap,
}

impl HttpRpcTransport {
    pub fn new(binder: Arc<dyn HttpBinder>, client: Arc<dyn HttpClient>) -> Self {
        Self {
            binder,
            client,
            servers: DashMap::new(),
            skeletons: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl ProxyTransport for HttpRpcTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn default_port(&self) -> u16 {
        80
    }

    async fn do_export(&self, service: Arc<dyn RpcService>, url: &Url) -> Result<UnexportCleanup> {
        let addr = url.bind_address();
        if !self.servers.contains_key(&addr) {
            let handler = Arc::new(SkeletonHandler {
                skeletons: Arc::clone(&self.skeletons),
            });
            let server = self.binder.bind(url, handler).await?;
            self.servers.insert(addr, server);
        }

        let path = url.absolute_path();
        let generic_path = format!("{path}/{GENERIC_KEY}");
        self.skeletons.insert(path.clone(), Arc::clone(&service));
        self.skeletons.insert(generic_path.clone(), service);

        let skeletons = Arc::clone(&self.skeletons);
        Ok(Box::new(move || {
            skeletons.remove(&path);
            skeletons.remove(&generic_path);
            Ok(())
        }))
    }

    async fn do_refer(&self, url: &Url) -> Result<Arc<dyn RpcService>> {
        let mut path = url.absolute_path();
        if url.bool_parameter(GENERIC_KEY, false) {
            path = format!("{path}/{GENERIC_KEY}");
        }
        let endpoint = format!("http://{}:{}{}", url.host(), url.port(), path);
        Ok(Arc::new(HttpStub {
            client: Arc::clone(&self.client),
            endpoint,
            timeout: url.duration_ms_parameter("timeout", DEFAULT_TIMEOUT_MS),
        }))
    }

    fn expected_faults(&self) -> &[&str] {
        &[RPC_FAULT_KIND]
    }

    fn classify(&self, failure: TransportFailure<'_>) -> RpcErrorKind {
        match failure {
            // A server-side rpc failure surfacing in-band reads as a remote
            // transport problem to this caller.
            TransportFailure::Fault(_) => RpcErrorKind::Network,
            // Stub errors are classified at the origin; leave them alone.
            TransportFailure::Error(_) => RpcErrorKind::Unknown,
        }
    }

    async fn teardown(&self) {
        let addrs: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        for addr in addrs {
            if let Some((_, server)) = self.servers.remove(&addr) {
                info!(%addr, "closing http rpc server");
                server.close().await;
            }
        }
    }
}

/// Server-side dispatcher: resolves the skeleton by request path and
/// executes the call.
struct SkeletonHandler {
    skeletons: SkeletonMap,
}

#[async_trait]
impl HttpHandler for SkeletonHandler {
    async fn handle(&self, request: HttpRequest) -> HttpResponse {
        if !request.method.eq_ignore_ascii_case("POST") {
            return HttpResponse::new(500, b"only POST is supported".to_vec());
        }
        let Some(service) = self.skeletons.get(&request.path).map(|s| Arc::clone(&s)) else {
            return HttpResponse::new(500, format!("no service at {}", request.path).into_bytes());
        };

        let mut invocation: Invocation = match serde_json::from_slice(&request.body) {
            Ok(invocation) => invocation,
            Err(err) => {
                warn!(path = %request.path, error = %err, "undecodable invocation body");
                return HttpResponse::new(500, err.to_string().into_bytes());
            }
        };
        for (name, value) in &request.headers {
            if let Some(key) = name.to_ascii_lowercase().strip_prefix(ATTACHMENT_HEADER_PREFIX) {
                invocation.set_attachment(key, value.clone());
            }
        }

        let outcome = match service.call(invocation).await {
            Ok(value) => RpcOutcome::from_value(value),
            Err(ServiceError::Fault(fault)) => RpcOutcome::from_fault(fault),
            Err(ServiceError::Rpc(err)) => {
                RpcOutcome::from_fault(RemoteFault::new(RPC_FAULT_KIND, err.to_string()))
            }
        };
        match serde_json::to_vec(&outcome) {
            Ok(body) => HttpResponse::new(200, body),
            Err(err) => HttpResponse::new(500, err.to_string().into_bytes()),
        }
    }
}

/// Client stub: one POST per call, attachments as prefixed headers.
struct HttpStub {
    client: Arc<dyn HttpClient>,
    endpoint: String,
    timeout: Duration,
}

#[async_trait]
impl RpcService for HttpStub {
    async fn call(&self, invocation: Invocation) -> std::result::Result<Value, ServiceError> {
        let body = serde_json::to_vec(&invocation)
            .map_err(|e| RpcError::with_source(RpcErrorKind::Serialization, "cannot encode invocation", e))?;
        let headers = invocation
            .attachments()
            .iter()
            .map(|(k, v)| (format!("{ATTACHMENT_HEADER_PREFIX}{k}"), v.clone()))
            .collect();

        let response = self
            .client
            .post(&self.endpoint, headers, body, self.timeout)
            .await
            .map_err(|err| match err {
                HttpTransportError::Timeout(_) => {
                    RpcError::with_source(RpcErrorKind::Timeout, self.endpoint.clone(), err)
                }
                HttpTransportError::Connect(_) => {
                    RpcError::with_source(RpcErrorKind::Network, self.endpoint.clone(), err)
                }
            })?;

        if response.status != 200 {
            return Err(RpcError::network(format!(
                "http status {} from {}",
                response.status, self.endpoint
            ))
            .into());
        }

        let outcome: RpcOutcome = serde_json::from_slice(&response.body)
            .map_err(|e| RpcError::with_source(RpcErrorKind::Serialization, "cannot decode outcome", e))?;
        match outcome.fault() {
            Some(fault) => Err(ServiceError::Fault(fault.clone())),
            None => Ok(outcome.value().cloned().unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Invoker, Protocol, ProxyProtocol, ServiceProxyFactory};
    use serde_json::json;

    /// In-memory binder/client pair: `bind` registers the handler under the
    /// bound address and `post` routes straight to it.
    #[derive(Default)]
    struct LoopbackHttp {
        handlers: DashMap<String, Arc<dyn HttpHandler>>,
    }

    struct LoopbackServer {
        url: Url,
    }

    #[async_trait]
    impl HttpServer for LoopbackServer {
        fn url(&self) -> &Url {
            &self.url
        }

        async fn close(&self) {}
    }

    #[async_trait]
    impl HttpBinder for LoopbackHttp {
        async fn bind(
            &self,
            url: &Url,
            handler: Arc<dyn HttpHandler>,
        ) -> Result<Arc<dyn HttpServer>> {
            self.handlers.insert(url.bind_address(), handler);
            Ok(Arc::new(LoopbackServer { url: url.clone() }))
        }
    }

    #[async_trait]
    impl HttpClient for LoopbackHttp {
        async fn post(
            &self,
            endpoint: &str,
            headers: HashMap<String, String>,
            body: Vec<u8>,
            _timeout: Duration,
        ) -> std::result::Result<HttpResponse, HttpTransportError> {
            let rest = endpoint
                .strip_prefix("http://")
                .ok_or_else(|| HttpTransportError::Connect(endpoint.to_string()))?;
            let (addr, path) = rest.split_once('/').unwrap_or((rest, ""));
            let handler = self
                .handlers
                .get(addr)
                .map(|h| Arc::clone(&h))
                .ok_or_else(|| HttpTransportError::Connect(format!("no server at {addr}")))?;
            Ok(handler
                .handle(HttpRequest {
                    method: "POST".to_string(),
                    path: format!("/{path}"),
                    headers,
                    body,
                })
                .await)
        }
    }

    struct UpperService;

    #[async_trait]
    impl RpcService for UpperService {
        async fn call(&self, invocation: Invocation) -> std::result::Result<Value, ServiceError> {
            match invocation.args() {
                [Value::String(s)] => Ok(json!(s.to_uppercase())),
                _ => Err(RemoteFault::new("service", "bad arguments").into()),
            }
        }
    }

    struct UpperInvoker {
        url: Url,
    }

    #[async_trait]
    impl Invoker for UpperInvoker {
        fn url(&self) -> &Url {
            &self.url
        }

        async fn invoke(&self, invocation: Invocation) -> Result<RpcOutcome> {
            match UpperService.call(invocation).await {
                Ok(value) => Ok(RpcOutcome::from_value(value)),
                Err(ServiceError::Fault(fault)) => Ok(RpcOutcome::from_fault(fault)),
                Err(ServiceError::Rpc(err)) => Err(err),
            }
        }

        fn destroy(&self) {}
    }

    fn service_url() -> Url {
        Url::new("http", "127.0.0.1", 8080).with_path("demo.Upper")
    }

    #[tokio::test]
    async fn export_then_refer_round_trip() {
        let loopback = Arc::new(LoopbackHttp::default());
        let transport = HttpRpcTransport::new(
            Arc::clone(&loopback) as Arc<dyn HttpBinder>,
            Arc::clone(&loopback) as Arc<dyn HttpClient>,
        );
        let protocol = ProxyProtocol::new(transport, Arc::new(ServiceProxyFactory));

        protocol
            .export(Arc::new(UpperInvoker { url: service_url() }))
            .await
            .unwrap();
        let invoker = protocol.refer(service_url()).await.unwrap();

        let outcome = invoker
            .invoke(Invocation::new("upper", vec![json!("hi")]))
            .await
            .unwrap();
        assert_eq!(outcome.value(), Some(&json!("HI")));
    }

    #[tokio::test]
    async fn non_post_is_rejected() {
        let skeletons: SkeletonMap = Arc::new(DashMap::new());
        let handler = SkeletonHandler {
            skeletons: Arc::clone(&skeletons),
        };
        let response = handler
            .handle(HttpRequest {
                method: "GET".to_string(),
                path: "/demo.Upper".to_string(),
                headers: HashMap::new(),
                body: Vec::new(),
            })
            .await;
        assert_eq!(response.status, 500);
    }

    #[tokio::test]
    async fn connect_failure_is_a_network_fault() {
        let loopback = Arc::new(LoopbackHttp::default());
        let transport = HttpRpcTransport::new(
            Arc::clone(&loopback) as Arc<dyn HttpBinder>,
            Arc::clone(&loopback) as Arc<dyn HttpClient>,
        );
        let protocol = ProxyProtocol::new(transport, Arc::new(ServiceProxyFactory));

        // Nothing exported, nothing bound: the stub cannot connect.
        let invoker = protocol.refer(service_url()).await.unwrap();
        let err = invoker
            .invoke(Invocation::new("upper", vec![json!("hi")]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Network);
    }
}
