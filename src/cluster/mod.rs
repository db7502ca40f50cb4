//! Clustering: directories of candidate invokers, fan-out with merge, and
//! routing.

pub mod merger;
pub mod router;

mod mergeable;

pub use mergeable::MergeableClusterInvoker;
pub use merger::Merger;
pub use router::{FileRouterFactory, Router, RouterFactory};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;

use crate::error::Result;
use crate::invocation::Invocation;
use crate::protocol::Invoker;
use crate::url::Url;

/// Live list of candidate invokers for one logical service.
///
/// The list may change between calls (a topology watcher replacing members);
/// a single `list` call returns one consistent snapshot, nothing more is
/// guaranteed.
pub trait Directory: Send + Sync {
    fn url(&self) -> &Url;

    fn list(&self, invocation: &Invocation) -> Result<Vec<Arc<dyn Invoker>>>;

    fn is_available(&self) -> bool;

    fn destroy(&self);
}

/// Directory over an explicitly managed membership list.
pub struct StaticDirectory {
    url: Url,
    invokers: ArcSwap<Vec<Arc<dyn Invoker>>>,
    destroyed: AtomicBool,
}

impl StaticDirectory {
    pub fn new(url: Url, invokers: Vec<Arc<dyn Invoker>>) -> Self {
        Self {
            url,
            invokers: ArcSwap::from_pointee(invokers),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Swap in a new membership list; in-flight `list` snapshots are
    /// unaffected.
    pub fn replace(&self, invokers: Vec<Arc<dyn Invoker>>) {
        self.invokers.store(Arc::new(invokers));
    }
}

impl Directory for StaticDirectory {
    fn url(&self) -> &Url {
        &self.url
    }

    fn list(&self, _invocation: &Invocation) -> Result<Vec<Arc<dyn Invoker>>> {
        Ok(self.invokers.load().as_ref().clone())
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
            && self.invokers.load().iter().any(|i| i.is_available())
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            for invoker in self.invokers.load().iter() {
                invoker.destroy();
            }
            self.invokers.store(Arc::new(Vec::new()));
        }
    }
}
