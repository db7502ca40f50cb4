//! Process-scoped runtime context.
//!
//! [`RpcRuntime`] replaces what would otherwise be implicit globals: the
//! shared in-process exporter map, the extension registries the core
//! consults, the serializable-type side registry and the diagnostics dump
//! gate. Construct one per process at startup, thread it into
//! constructors/factories, and call [`RpcRuntime::shutdown`] once on the
//! way down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::cluster::merger::{ListMerger, MapMerger, Merger, SetMerger};
use crate::cluster::router::RouterFactory;
use crate::executor::{FixedThreadPool, ThreadPool};
use crate::extension::ExtensionRegistry;
use crate::filter::cache::{CacheFactory, LruCacheFactory};
use crate::protocol::{InjvmProtocol, Protocol};
use crate::serialize::SerializableTypeRegistry;
use crate::telnet::TelnetCommand;

/// Binary merge step used by `.name` merge strategies: folds the next value
/// into the accumulator.
pub type MergeFunction =
    dyn Fn(serde_json::Value, serde_json::Value) -> crate::error::Result<serde_json::Value>
        + Send
        + Sync;

/// Default rate-limit window between diagnostic dumps.
pub const DEFAULT_DUMP_WINDOW: Duration = Duration::from_secs(10 * 60);

pub struct RpcRuntime {
    injvm_exporters: crate::protocol::injvm::LocalExporterMap,
    mergers: Arc<ExtensionRegistry<dyn Merger>>,
    merge_functions: Arc<ExtensionRegistry<MergeFunction>>,
    telnet_commands: Arc<ExtensionRegistry<dyn TelnetCommand>>,
    router_factories: Arc<ExtensionRegistry<dyn RouterFactory>>,
    cache_factories: Arc<ExtensionRegistry<dyn CacheFactory>>,
    thread_pools: Arc<ExtensionRegistry<dyn ThreadPool>>,
    serializable_types: SerializableTypeRegistry,
    dump_gate: Arc<DumpGate>,
}

impl RpcRuntime {
    pub fn new() -> Arc<Self> {
        Self::with_dump_window(DEFAULT_DUMP_WINDOW)
    }

    /// Window override exists for embedders and tests; production code uses
    /// [`RpcRuntime::new`].
    pub fn with_dump_window(window: Duration) -> Arc<Self> {
        let mergers: ExtensionRegistry<dyn Merger> = ExtensionRegistry::new("merger");
        mergers.register("list", || Arc::new(ListMerger));
        mergers.register("set", || Arc::new(SetMerger));
        mergers.register("map", || Arc::new(MapMerger));

        let cache_factories: ExtensionRegistry<dyn CacheFactory> =
            ExtensionRegistry::new("cache-factory");
        cache_factories.register("lru", || Arc::new(LruCacheFactory::default()));
        cache_factories.set_default("lru");

        let thread_pools: ExtensionRegistry<dyn ThreadPool> = ExtensionRegistry::new("threadpool");
        thread_pools.register("fixed", || Arc::new(FixedThreadPool::default()));
        thread_pools.set_default("fixed");

        Arc::new(Self {
            injvm_exporters: Arc::new(DashMap::new()),
            mergers: Arc::new(mergers),
            merge_functions: Arc::new(ExtensionRegistry::new("merge-function")),
            telnet_commands: Arc::new(ExtensionRegistry::new("telnet-command")),
            router_factories: Arc::new(ExtensionRegistry::new("router-factory")),
            cache_factories: Arc::new(cache_factories),
            thread_pools: Arc::new(thread_pools),
            serializable_types: SerializableTypeRegistry::new(),
            dump_gate: Arc::new(DumpGate::new(window)),
        })
    }

    /// The process-wide in-process protocol instance.
    pub fn injvm_protocol(&self) -> InjvmProtocol {
        InjvmProtocol::new(Arc::clone(&self.injvm_exporters))
    }

    pub fn injvm_exporters(&self) -> &crate::protocol::injvm::LocalExporterMap {
        &self.injvm_exporters
    }

    pub fn mergers(&self) -> &Arc<ExtensionRegistry<dyn Merger>> {
        &self.mergers
    }

    pub fn merge_functions(&self) -> &Arc<ExtensionRegistry<MergeFunction>> {
        &self.merge_functions
    }

    pub fn telnet_commands(&self) -> &Arc<ExtensionRegistry<dyn TelnetCommand>> {
        &self.telnet_commands
    }

    pub fn router_factories(&self) -> &Arc<ExtensionRegistry<dyn RouterFactory>> {
        &self.router_factories
    }

    pub fn cache_factories(&self) -> &Arc<ExtensionRegistry<dyn CacheFactory>> {
        &self.cache_factories
    }

    pub fn thread_pools(&self) -> &Arc<ExtensionRegistry<dyn ThreadPool>> {
        &self.thread_pools
    }

    pub fn serializable_types(&self) -> &SerializableTypeRegistry {
        &self.serializable_types
    }

    pub fn dump_gate(&self) -> &Arc<DumpGate> {
        &self.dump_gate
    }

    /// Tear down process-wide state: unexport every in-process service.
    /// Protocol adapters are destroyed by whoever constructed them.
    pub async fn shutdown(&self) {
        self.injvm_protocol().destroy().await;
    }
}

/// Mutual-exclusion gate for the full-process diagnostic dump: at most one
/// dump per window, at most one in flight.
pub struct DumpGate {
    window: Duration,
    last: Mutex<Option<Instant>>,
    permit: Arc<Semaphore>,
}

impl DumpGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Claim the right to dump. `None` when a dump ran within the window or
    /// one is already in flight; the caller skips silently.
    pub fn try_acquire(self: &Arc<Self>) -> Option<DumpTicket> {
        {
            let last = self.last.lock();
            if let Some(at) = *last {
                if at.elapsed() < self.window {
                    return None;
                }
            }
        }
        match Arc::clone(&self.permit).try_acquire_owned() {
            Ok(permit) => Some(DumpTicket {
                gate: Arc::clone(self),
                _permit: permit,
            }),
            Err(TryAcquireError::NoPermits | TryAcquireError::Closed) => None,
        }
    }
}

/// Held for the duration of a dump; dropping it stamps the window and frees
/// the permit. Owned, so it can travel into the detached dump task.
pub struct DumpTicket {
    gate: Arc<DumpGate>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for DumpTicket {
    fn drop(&mut self) {
        *self.gate.last.lock() = Some(Instant::now());
    }
}
