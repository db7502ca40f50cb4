//! Protocol layer contracts.
//!
//! A [`Protocol`] turns a local [`Invoker`] into a network-reachable
//! [`Exporter`] and a remote [`Url`] into a callable [`Invoker`]. The
//! [`RpcService`]/[`ProxyFactory`] pair bridges between invokers and the
//! plain callable surface that transports and service implementations see.

pub mod http;
pub mod injvm;

mod proxy;

pub use injvm::{InjvmProtocol, find_exporter, should_use_injvm};
pub use proxy::{ProxyProtocol, ProxyTransport, TransportFailure, UnexportCleanup};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, RpcError};
use crate::invocation::{Invocation, RemoteFault, RpcOutcome};
use crate::url::Url;

/// Callable capability over a local implementation or a remote handle.
#[async_trait]
pub trait Invoker: Send + Sync {
    fn url(&self) -> &Url;

    fn is_available(&self) -> bool {
        true
    }

    async fn invoke(&self, invocation: Invocation) -> Result<RpcOutcome>;

    /// Release held resources. Idempotent.
    fn destroy(&self);
}

/// Lifecycle handle for one published service endpoint.
pub trait Exporter: Send + Sync {
    fn invoker(&self) -> Arc<dyn Invoker>;

    /// Remove the endpoint. Idempotent; the cleanup callback runs exactly
    /// once, and its failure is logged, never propagated.
    fn unexport(&self);
}

#[async_trait]
pub trait Protocol: Send + Sync {
    fn name(&self) -> &str;

    fn default_port(&self) -> u16;

    /// Publish `invoker`. Idempotent per service key: the first exporter
    /// wins and later exports return it unchanged.
    async fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>>;

    /// Build a callable proxy for the remote endpoint described by `url`.
    async fn refer(&self, url: Url) -> Result<Arc<dyn Invoker>>;

    /// Unexport everything and destroy referred invokers.
    async fn destroy(&self);
}

/// Failure channel of a plain service call: a business fault travels in-band
/// through the result, a transport failure does not.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Fault(RemoteFault),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl From<RemoteFault> for ServiceError {
    fn from(fault: RemoteFault) -> Self {
        ServiceError::Fault(fault)
    }
}

/// The plain callable surface: what a service implementation provides and
/// what a transport client stub looks like.
#[async_trait]
pub trait RpcService: Send + Sync {
    async fn call(&self, invocation: Invocation) -> std::result::Result<Value, ServiceError>;
}

/// Bridges [`RpcService`] and [`Invoker`] in both directions. Injected into
/// protocol adapters; replaceable by embedders.
pub trait ProxyFactory: Send + Sync {
    /// A callable view over an invoker.
    fn proxy(&self, invoker: Arc<dyn Invoker>) -> Arc<dyn RpcService>;

    /// An invoker over a callable.
    fn invoker(&self, service: Arc<dyn RpcService>, url: Url) -> Arc<dyn Invoker>;
}

/// Default [`ProxyFactory`].
#[derive(Debug, Default)]
pub struct ServiceProxyFactory;

impl ProxyFactory for ServiceProxyFactory {
    fn proxy(&self, invoker: Arc<dyn Invoker>) -> Arc<dyn RpcService> {
        Arc::new(InvokerService { invoker })
    }

    fn invoker(&self, service: Arc<dyn RpcService>, url: Url) -> Arc<dyn Invoker> {
        Arc::new(ServiceInvoker {
            service,
            url,
            destroyed: AtomicBool::new(false),
        })
    }
}

struct InvokerService {
    invoker: Arc<dyn Invoker>,
}

#[async_trait]
impl RpcService for InvokerService {
    async fn call(&self, invocation: Invocation) -> std::result::Result<Value, ServiceError> {
        let outcome = self.invoker.invoke(invocation).await?;
        match outcome.fault() {
            Some(fault) => Err(ServiceError::Fault(fault.clone())),
            None => Ok(outcome.value().cloned().unwrap_or(Value::Null)),
        }
    }
}

struct ServiceInvoker {
    service: Arc<dyn RpcService>,
    url: Url,
    destroyed: AtomicBool,
}

#[async_trait]
impl Invoker for ServiceInvoker {
    fn url(&self) -> &Url {
        &self.url
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
    }

    async fn invoke(&self, invocation: Invocation) -> Result<RpcOutcome> {
        match self.service.call(invocation).await {
            Ok(value) => Ok(RpcOutcome::from_value(value)),
            // Business faults stay in-band; only transport failures escape.
            Err(ServiceError::Fault(fault)) => Ok(RpcOutcome::from_fault(fault)),
            Err(ServiceError::Rpc(err)) => Err(err),
        }
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

/// Per-adapter registries shared by every protocol implementation:
/// exporters by service key, referred invokers for bulk destroy. Safe for
/// concurrent export/unexport from request-handling threads.
#[derive(Default)]
pub struct ProtocolState {
    exporters: DashMap<String, Arc<dyn Exporter>>,
    referred: Mutex<Vec<Arc<dyn Invoker>>>,
}

impl ProtocolState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exporter(&self, service_key: &str) -> Option<Arc<dyn Exporter>> {
        self.exporters.get(service_key).map(|e| Arc::clone(&e))
    }

    pub fn insert_exporter(&self, service_key: String, exporter: Arc<dyn Exporter>) {
        self.exporters.insert(service_key, exporter);
    }

    pub fn remove_exporter(&self, service_key: &str) {
        self.exporters.remove(service_key);
    }

    pub fn track_referred(&self, invoker: Arc<dyn Invoker>) {
        self.referred.lock().push(invoker);
    }

    /// Unexport every endpoint and destroy every referred invoker.
    pub fn destroy_all(&self, protocol: &str) {
        let keys: Vec<String> = self.exporters.iter().map(|e| e.key().clone()).collect();
        let exported = keys.len();
        for key in keys {
            if let Some((_, exporter)) = self.exporters.remove(&key) {
                exporter.unexport();
            }
        }
        let referred = std::mem::take(&mut *self.referred.lock());
        let referred_count = referred.len();
        for invoker in referred {
            invoker.destroy();
        }
        debug!(protocol, exported, referred = referred_count, "protocol state destroyed");
    }
}
