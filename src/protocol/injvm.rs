//! In-process protocol.
//!
//! Bypasses the network when caller and callee share a process. Exporters
//! live in a process-wide map owned by the runtime; refer-side invokers look
//! the map up at call time, so a reference observes exports and unexports
//! that happen after it was created.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Exporter, Invoker, Protocol};
use crate::error::{Result, RpcError};
use crate::invocation::{GENERIC_KEY, Invocation, RpcOutcome};
use crate::url::Url;

pub const INJVM_PROTOCOL: &str = "injvm";
/// Legacy flag equivalent to `scope=local`.
const LOCAL_FLAG_KEY: &str = "injvm";

/// Process-wide exporter registry shared between the protocol instance and
/// the refer-decision helper.
pub type LocalExporterMap = Arc<DashMap<String, Arc<dyn Exporter>>>;

/// Look up an exporter for `url`: exact service-key match first, then a
/// structural scan when the key carries a wildcard. An exporter whose
/// invoker is flagged generic is treated as absent, since generic calls never
/// short-circuit in-process.
pub fn find_exporter(map: &LocalExporterMap, url: &Url) -> Option<Arc<dyn Exporter>> {
    let found = if !url.has_wildcard_key() {
        map.get(&url.service_key()).map(|e| Arc::clone(&e))
    } else {
        map.iter()
            .find(|entry| url.service_key_matches(entry.value().invoker().url()))
            .map(|entry| Arc::clone(entry.value()))
    };

    found.filter(|exporter| !exporter.invoker().url().bool_parameter(GENERIC_KEY, false))
}

/// Whether a reference described by `url` should stay in-process.
///
/// The order is significant: an explicit injvm protocol goes through the
/// normal flow, an explicit scope overrides the generic-call exclusion, and
/// only then does the existence of a local exporter decide.
pub fn should_use_injvm(map: &LocalExporterMap, url: &Url) -> bool {
    let scope = url.parameter("scope").unwrap_or("");
    if url.protocol() == INJVM_PROTOCOL {
        false
    } else if scope == "local" || url.bool_parameter(LOCAL_FLAG_KEY, false) {
        true
    } else if scope == "remote" {
        false
    } else if url.bool_parameter(GENERIC_KEY, false) {
        false
    } else {
        find_exporter(map, url).is_some()
    }
}

pub struct InjvmProtocol {
    exporters: LocalExporterMap,
}

impl InjvmProtocol {
    pub fn new(exporters: LocalExporterMap) -> Self {
        Self { exporters }
    }

    pub fn exporters(&self) -> &LocalExporterMap {
        &self.exporters
    }
}

#[async_trait]
impl Protocol for InjvmProtocol {
    fn name(&self) -> &str {
        INJVM_PROTOCOL
    }

    fn default_port(&self) -> u16 {
        0
    }

    async fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>> {
        let service_key = invoker.url().service_key();
        let exporter: Arc<dyn Exporter> = Arc::new(InjvmExporter {
            invoker,
            service_key: service_key.clone(),
            exporters: Arc::clone(&self.exporters),
            unexported: AtomicBool::new(false),
        });
        self.exporters.insert(service_key, Arc::clone(&exporter));
        Ok(exporter)
    }

    async fn refer(&self, url: Url) -> Result<Arc<dyn Invoker>> {
        Ok(Arc::new(InjvmInvoker {
            url,
            exporters: Arc::clone(&self.exporters),
            destroyed: AtomicBool::new(false),
        }))
    }

    async fn destroy(&self) {
        let keys: Vec<String> = self.exporters.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, exporter)) = self.exporters.remove(&key) {
                exporter.unexport();
            }
        }
    }
}

struct InjvmExporter {
    invoker: Arc<dyn Invoker>,
    service_key: String,
    exporters: LocalExporterMap,
    unexported: AtomicBool,
}

impl Exporter for InjvmExporter {
    fn invoker(&self) -> Arc<dyn Invoker> {
        Arc::clone(&self.invoker)
    }

    fn unexport(&self) {
        if !self.unexported.swap(true, Ordering::AcqRel) {
            self.exporters.remove(&self.service_key);
        }
    }
}

struct InjvmInvoker {
    url: Url,
    exporters: LocalExporterMap,
    destroyed: AtomicBool,
}

#[async_trait]
impl Invoker for InjvmInvoker {
    fn url(&self) -> &Url {
        &self.url
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire) && find_exporter(&self.exporters, &self.url).is_some()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<RpcOutcome> {
        // Resolved per call, not at refer time.
        let exporter = find_exporter(&self.exporters, &self.url).ok_or_else(|| {
            RpcError::network(format!(
                "service {} not exported in-process",
                self.url.service_key()
            ))
        })?;
        exporter.invoker().invoke(invocation).await
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}
