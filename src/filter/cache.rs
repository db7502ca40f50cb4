//! Result caching filter.
//!
//! Active for methods whose `cache` parameter names a cache kind. The cache
//! key is the rendered ordered argument list, used as-is; one cache instance
//! exists per service url and method. Faults and null results are never
//! cached.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::Filter;
use crate::error::Result;
use crate::extension::ExtensionRegistry;
use crate::invocation::{Invocation, RpcOutcome};
use crate::protocol::Invoker;
use crate::url::Url;

const CACHE_KEY: &str = "cache";
const CACHE_SIZE_KEY: &str = "cache.size";
const DEFAULT_CACHE_SIZE: usize = 1000;

pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: String, value: Value);
}

/// Yields the cache instance for one (url, method) pair.
pub trait CacheFactory: Send + Sync {
    fn cache(&self, url: &Url, invocation: &Invocation) -> Arc<dyn Cache>;
}

/// The cache lookup key: every argument rendered to its JSON string form,
/// joined by commas. Must stay stable: externally observed cache behavior
/// depends on it.
pub fn argument_key(invocation: &Invocation) -> String {
    invocation
        .args()
        .iter()
        .map(|arg| arg.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub struct CacheFilter {
    factories: Arc<ExtensionRegistry<dyn CacheFactory>>,
}

impl CacheFilter {
    pub fn new(factories: Arc<ExtensionRegistry<dyn CacheFactory>>) -> Self {
        Self { factories }
    }
}

#[async_trait]
impl Filter for CacheFilter {
    async fn invoke(&self, next: &dyn Invoker, invocation: Invocation) -> Result<RpcOutcome> {
        let mode = next
            .url()
            .method_parameter(invocation.method(), CACHE_KEY)
            .unwrap_or("")
            .to_string();
        if mode.is_empty() || mode == "false" {
            return next.invoke(invocation).await;
        }

        let factory = if mode == "true" {
            self.factories.default()?
        } else {
            self.factories.get(&mode)?
        };
        let cache = factory.cache(next.url(), &invocation);

        let key = argument_key(&invocation);
        if let Some(value) = cache.get(&key) {
            debug!(method = invocation.method(), "cache hit");
            return Ok(RpcOutcome::from_value(value));
        }

        let outcome = next.invoke(invocation).await?;
        if !outcome.has_fault() {
            if let Some(value) = outcome.value() {
                if !value.is_null() {
                    cache.put(key, value.clone());
                }
            }
        }
        Ok(outcome)
    }
}

/// Bounded least-recently-used cache keyed per service url and method.
#[derive(Default)]
pub struct LruCacheFactory {
    caches: DashMap<String, Arc<dyn Cache>>,
}

impl CacheFactory for LruCacheFactory {
    fn cache(&self, url: &Url, invocation: &Invocation) -> Arc<dyn Cache> {
        let key = format!("{}.{}", url.service_key(), invocation.method());
        if let Some(cache) = self.caches.get(&key) {
            return Arc::clone(&cache);
        }
        let capacity = url.u64_parameter(CACHE_SIZE_KEY, DEFAULT_CACHE_SIZE as u64) as usize;
        let cache: Arc<dyn Cache> = Arc::new(LruCache::new(capacity.max(1)));
        self.caches.entry(key).or_insert(cache).value().clone()
    }
}

struct LruCache {
    capacity: usize,
    state: Mutex<LruState>,
}

struct LruState {
    entries: HashMap<String, Value>,
    order: VecDeque<String>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }
}

impl Cache for LruCache {
    fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock();
        let value = state.entries.get(key).cloned()?;
        // Refresh recency.
        if let Some(pos) = state.order.iter().position(|k| k == key) {
            let key = state.order.remove(pos).expect("position in bounds");
            state.order.push_back(key);
        }
        Some(value)
    }

    fn put(&self, key: String, value: Value) {
        let mut state = self.state.lock();
        if state.entries.insert(key.clone(), value).is_none() {
            state.order.push_back(key);
        } else if let Some(pos) = state.order.iter().position(|k| *k == key) {
            let key = state.order.remove(pos).expect("position in bounds");
            state.order.push_back(key);
        }
        while state.entries.len() > self.capacity {
            let Some(evicted) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::RemoteFault;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Backend {
        url: Url,
        calls: AtomicUsize,
    }

    impl Backend {
        fn new(params: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                url: Url::new("larch", "127.0.0.1", 20880)
                    .with_path("demo.Lookup")
                    .with_parameters(params.iter().map(|(k, v)| (*k, *v))),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Invoker for Backend {
        fn url(&self) -> &Url {
            &self.url
        }

        async fn invoke(&self, invocation: Invocation) -> Result<RpcOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match invocation.method() {
                "fault" => Ok(RpcOutcome::from_fault(RemoteFault::new("service", "no"))),
                "nothing" => Ok(RpcOutcome::from_value(Value::Null)),
                _ => Ok(RpcOutcome::from_value(json!(invocation.args().to_vec()))),
            }
        }

        fn destroy(&self) {}
    }

    fn filter() -> CacheFilter {
        let factories: Arc<ExtensionRegistry<dyn CacheFactory>> =
            Arc::new(ExtensionRegistry::new("cache-factory"));
        factories.register("lru", || Arc::new(LruCacheFactory::default()));
        factories.set_default("lru");
        CacheFilter::new(factories)
    }

    #[tokio::test]
    async fn second_identical_call_hits_the_cache() {
        let backend = Backend::new(&[("find.cache", "lru")]);
        let filter = filter();

        let call = || Invocation::new("find", vec![json!("x"), json!(1)]);
        let first = filter.invoke(backend.as_ref(), call()).await.unwrap();
        let second = filter.invoke(backend.as_ref(), call()).await.unwrap();

        assert_eq!(first.value(), second.value());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        // Different arguments miss.
        filter
            .invoke(backend.as_ref(), Invocation::new("find", vec![json!("y")]))
            .await
            .unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn faults_and_nulls_are_never_cached() {
        let backend = Backend::new(&[("cache", "lru")]);
        let filter = filter();

        for _ in 0..2 {
            let outcome = filter
                .invoke(backend.as_ref(), Invocation::new("fault", vec![]))
                .await
                .unwrap();
            assert!(outcome.has_fault());
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

        for _ in 0..2 {
            filter
                .invoke(backend.as_ref(), Invocation::new("nothing", vec![]))
                .await
                .unwrap();
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unconfigured_method_bypasses_caching() {
        let backend = Backend::new(&[]);
        let filter = filter();
        for _ in 0..2 {
            filter
                .invoke(backend.as_ref(), Invocation::new("find", vec![json!(1)]))
                .await
                .unwrap();
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = LruCache::new(2);
        cache.put("a".into(), json!(1));
        cache.put("b".into(), json!(2));
        cache.get("a");
        cache.put("c".into(), json!(3));
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.get("c"), Some(json!(3)));
    }
}
