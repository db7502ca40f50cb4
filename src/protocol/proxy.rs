//! Proxy-protocol template.
//!
//! Shared export/refer machinery for protocols that publish a plain callable
//! behind some transport (HTTP and friends). A transport plugs in with
//! [`ProxyTransport::do_export`]/[`ProxyTransport::do_refer`] plus a fault
//! classification function; the template owns the exporter registry,
//! idempotent export, one-shot unexport cleanup and fault translation on the
//! refer side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Exporter, Invoker, Protocol, ProtocolState, ProxyFactory, RpcService};
use crate::error::{Result, RpcError, RpcErrorKind};
use crate::invocation::{Invocation, RemoteFault, RpcOutcome};
use crate::url::Url;

/// One-shot cleanup returned by [`ProxyTransport::do_export`]; runs on
/// unexport. A failed cleanup is logged and swallowed.
pub type UnexportCleanup = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// What the refer-side wrapper hands to [`ProxyTransport::classify`].
#[derive(Debug)]
pub enum TransportFailure<'a> {
    /// A business fault carried in-band that matched the transport's
    /// expected fault kinds.
    Fault(&'a RemoteFault),
    /// A failure raised below the service surface (connect, encode, ...).
    Error(&'a RpcError),
}

#[async_trait]
pub trait ProxyTransport: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn default_port(&self) -> u16;

    /// Publish `service` under `url`; returns the unexport cleanup.
    async fn do_export(&self, service: Arc<dyn RpcService>, url: &Url) -> Result<UnexportCleanup>;

    /// Build the client stub for the endpoint described by `url`.
    async fn do_refer(&self, url: &Url) -> Result<Arc<dyn RpcService>>;

    /// Fault kinds that, when carried in a result, are rethrown as
    /// structured RPC faults instead of being returned to the caller.
    fn expected_faults(&self) -> &[&str] {
        &[]
    }

    /// Map a failure to an error kind. `Unknown` when no rule matches.
    fn classify(&self, _failure: TransportFailure<'_>) -> RpcErrorKind {
        RpcErrorKind::Unknown
    }

    async fn teardown(&self) {}
}

pub struct ProxyProtocol<T> {
    transport: Arc<T>,
    proxy_factory: Arc<dyn ProxyFactory>,
    state: Arc<ProtocolState>,
}

impl<T: ProxyTransport> ProxyProtocol<T> {
    pub fn new(transport: T, proxy_factory: Arc<dyn ProxyFactory>) -> Self {
        Self {
            transport: Arc::new(transport),
            proxy_factory,
            state: Arc::new(ProtocolState::new()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: ProxyTransport> Protocol for ProxyProtocol<T> {
    fn name(&self) -> &str {
        self.transport.name()
    }

    fn default_port(&self) -> u16 {
        self.transport.default_port()
    }

    async fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>> {
        let url = invoker.url().clone();
        let service_key = url.service_key();

        // First exporter wins; a second export of the same key returns it
        // unchanged.
        if let Some(existing) = self.state.exporter(&service_key) {
            return Ok(existing);
        }

        let service = self.proxy_factory.proxy(Arc::clone(&invoker));
        let cleanup = self.transport.do_export(service, &url).await?;
        debug!(protocol = self.name(), %service_key, "exported service");

        let exporter: Arc<dyn Exporter> = Arc::new(ProxyExporter {
            invoker,
            service_key: service_key.clone(),
            state: Arc::clone(&self.state),
            cleanup: Mutex::new(Some(cleanup)),
        });
        self.state.insert_exporter(service_key, Arc::clone(&exporter));
        Ok(exporter)
    }

    async fn refer(&self, url: Url) -> Result<Arc<dyn Invoker>> {
        let stub = self.transport.do_refer(&url).await?;
        let target = self.proxy_factory.invoker(stub, url.clone());

        let invoker: Arc<dyn Invoker> = Arc::new(ReferInvoker {
            transport: Arc::clone(&self.transport),
            target,
            url,
            destroyed: AtomicBool::new(false),
        });
        self.state.track_referred(Arc::clone(&invoker));
        Ok(invoker)
    }

    async fn destroy(&self) {
        self.state.destroy_all(self.name());
        self.transport.teardown().await;
    }
}

struct ProxyExporter {
    invoker: Arc<dyn Invoker>,
    service_key: String,
    state: Arc<ProtocolState>,
    cleanup: Mutex<Option<UnexportCleanup>>,
}

impl Exporter for ProxyExporter {
    fn invoker(&self) -> Arc<dyn Invoker> {
        Arc::clone(&self.invoker)
    }

    fn unexport(&self) {
        // Taking the cleanup makes repeated unexports no-ops.
        let Some(cleanup) = self.cleanup.lock().take() else {
            return;
        };
        self.state.remove_exporter(&self.service_key);
        if let Err(err) = cleanup() {
            warn!(service_key = %self.service_key, error = %err, "unexport cleanup failed");
        }
    }
}

/// Refer-side wrapper translating carried faults and classifying failures.
struct ReferInvoker<T> {
    transport: Arc<T>,
    target: Arc<dyn Invoker>,
    url: Url,
    destroyed: AtomicBool,
}

impl<T: ProxyTransport> ReferInvoker<T> {
    fn remote_fault_error(&self, invocation: &Invocation, fault: &RemoteFault) -> RpcError {
        let kind = self.transport.classify(TransportFailure::Fault(fault));
        RpcError::new(
            kind,
            format!(
                "failed to invoke remote service {}, method {}: {fault}",
                self.url.interface(),
                invocation.method()
            ),
        )
    }
}

#[async_trait]
impl<T: ProxyTransport> Invoker for ReferInvoker<T> {
    fn url(&self) -> &Url {
        &self.url
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire) && self.target.is_available()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<RpcOutcome> {
        match self.target.invoke(invocation.clone()).await {
            Ok(outcome) => {
                if let Some(fault) = outcome.fault() {
                    if self.transport.expected_faults().contains(&fault.kind.as_str()) {
                        return Err(self.remote_fault_error(&invocation, fault));
                    }
                }
                Ok(outcome)
            }
            Err(err) => {
                // Classification is sticky: only an unknown kind is upgraded.
                let kind = self.transport.classify(TransportFailure::Error(&err));
                Err(err.upgraded(kind))
            }
        }
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.target.destroy();
        }
    }
}
