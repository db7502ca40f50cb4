//! Invocation routing.
//!
//! Routers narrow a directory's candidate list per invocation. Factories
//! are registered by name in the runtime's router-factory registry; the
//! file factory adapts a rule file on disk into whichever factory the
//! `router` parameter names.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, RpcError};
use crate::extension::ExtensionRegistry;
use crate::invocation::Invocation;
use crate::protocol::Invoker;
use crate::url::Url;

pub trait Router: Send + Sync {
    /// Filter `invokers` for one invocation. Listing order is preserved for
    /// the candidates that survive.
    fn route(
        &self,
        invokers: Vec<Arc<dyn Invoker>>,
        url: &Url,
        invocation: &Invocation,
    ) -> Result<Vec<Arc<dyn Invoker>>>;
}

pub trait RouterFactory: Send + Sync {
    fn router(&self, url: &Url) -> Result<Arc<dyn Router>>;
}

const ROUTER_KEY: &str = "router";
const RULE_KEY: &str = "rule";
const TYPE_KEY: &str = "type";
const RUNTIME_KEY: &str = "runtime";
const DEFAULT_DELEGATE: &str = "script";

/// Loads a routing rule from the file named by the url path and delegates
/// to the factory named by the `router` parameter.
///
/// `file:///etc/larch/route.cond?router=condition` becomes
/// `condition:///etc/larch/route.cond?type=cond&rule=<file content>`.
pub struct FileRouterFactory {
    factories: Arc<ExtensionRegistry<dyn RouterFactory>>,
}

impl FileRouterFactory {
    pub fn new(factories: Arc<ExtensionRegistry<dyn RouterFactory>>) -> Self {
        Self { factories }
    }
}

impl RouterFactory for FileRouterFactory {
    fn router(&self, url: &Url) -> Result<Arc<dyn Router>> {
        let delegate = url.parameter_or(ROUTER_KEY, DEFAULT_DELEGATE).to_string();
        let path = url.absolute_path();
        // File suffix doubles as the rule type (cond, js, ...).
        let rule_type = path.rsplit_once('.').map(|(_, suffix)| suffix).unwrap_or("");

        // An unreadable rule file is a fatal configuration fault.
        let rule = std::fs::read_to_string(&path).map_err(|e| {
            RpcError::with_source(
                crate::error::RpcErrorKind::Config,
                format!("cannot read router rule file {path}"),
                e,
            )
        })?;
        debug!(%path, %delegate, "loaded router rule file");

        let rule_url = url
            .clone()
            .with_protocol(delegate.clone())
            .with_parameter(TYPE_KEY, rule_type)
            .with_parameter(
                RUNTIME_KEY,
                url.bool_parameter(RUNTIME_KEY, false).to_string(),
            )
            .with_parameter_encoded(RULE_KEY, &rule);

        self.factories.get(&delegate)?.router(&rule_url)
    }
}
