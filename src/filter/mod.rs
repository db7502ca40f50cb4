//! Invocation filters.
//!
//! Filters wrap an invoker without touching the call path itself: each one
//! may short-circuit (serve from cache), delegate, or post-process the
//! outcome. A chain composes them in declared order around a terminal
//! invoker.

pub mod cache;

pub use cache::CacheFilter;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::invocation::{Invocation, RpcOutcome};
use crate::protocol::Invoker;
use crate::url::Url;

#[async_trait]
pub trait Filter: Send + Sync {
    async fn invoke(&self, next: &dyn Invoker, invocation: Invocation) -> Result<RpcOutcome>;
}

/// Composes filters around a terminal invoker. The first filter added is
/// the outermost: it runs first on the way in and last on the way out.
#[derive(Default)]
pub struct FilterChainBuilder {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn build(self, terminal: Arc<dyn Invoker>) -> Arc<dyn Invoker> {
        let mut current = terminal;
        for filter in self.filters.into_iter().rev() {
            current = Arc::new(FilteredInvoker {
                filter,
                next: current,
            });
        }
        current
    }
}

struct FilteredInvoker {
    filter: Arc<dyn Filter>,
    next: Arc<dyn Invoker>,
}

#[async_trait]
impl Invoker for FilteredInvoker {
    fn url(&self) -> &Url {
        self.next.url()
    }

    fn is_available(&self) -> bool {
        self.next.is_available()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<RpcOutcome> {
        self.filter.invoke(self.next.as_ref(), invocation).await
    }

    fn destroy(&self) {
        self.next.destroy();
    }
}
