//! Plain configuration carriers.
//!
//! These structs mirror what an embedder's declarative configuration layer
//! produces; the runtime consumes them only by flattening them into url
//! parameters. No validation happens here.

use crate::url::Url;

/// Options for one protocol endpoint.
#[derive(Debug, Clone)]
pub struct ProtocolOptions {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Thread pool kind resolved via the `threadpool` registry.
    pub threadpool: Option<String>,
    pub threads: Option<u64>,
    pub queues: Option<u64>,
    /// Payload byte limit enforced by the codec.
    pub payload: Option<u64>,
    /// Telnet prompt text; stored percent-encoded on the url.
    pub prompt: Option<String>,
    pub dump_directory: Option<String>,
}

impl ProtocolOptions {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            threadpool: None,
            threads: None,
            queues: None,
            payload: None,
            prompt: None,
            dump_directory: None,
        }
    }

    pub fn to_url(&self) -> Url {
        let mut url = Url::new(self.name.clone(), self.host.clone(), self.port);
        if let Some(threadpool) = &self.threadpool {
            url = url.with_parameter("threadpool", threadpool.clone());
        }
        if let Some(threads) = self.threads {
            url = url.with_parameter("threads", threads.to_string());
        }
        if let Some(queues) = self.queues {
            url = url.with_parameter("queues", queues.to_string());
        }
        if let Some(payload) = self.payload {
            url = url.with_parameter("payload", payload.to_string());
        }
        if let Some(prompt) = &self.prompt {
            url = url.with_parameter_encoded("prompt", prompt);
        }
        if let Some(dir) = &self.dump_directory {
            url = url.with_parameter("dump.directory", dir.clone());
        }
        url
    }
}

/// Options for one exported or referred service.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub interface: String,
    pub group: Option<String>,
    pub version: Option<String>,
    pub generic: bool,
    /// `local`, `remote`, or unset for the existence-based default.
    pub scope: Option<String>,
}

impl ServiceOptions {
    pub fn apply_to(&self, url: Url) -> Url {
        let mut url = url
            .with_path(self.interface.clone())
            .with_parameter("interface", self.interface.clone());
        if let Some(group) = &self.group {
            url = url.with_parameter("group", group.clone());
        }
        if let Some(version) = &self.version {
            url = url.with_parameter("version", version.clone());
        }
        if self.generic {
            url = url.with_parameter("generic", "true");
        }
        if let Some(scope) = &self.scope {
            url = url.with_parameter("scope", scope.clone());
        }
        url
    }
}

/// Per-method overrides, written as `<method>.<key>` parameters.
#[derive(Debug, Clone, Default)]
pub struct MethodOptions {
    pub name: String,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub merger: Option<String>,
    pub cache: Option<String>,
}

impl MethodOptions {
    pub fn apply_to(&self, url: Url) -> Url {
        let mut url = url;
        if let Some(timeout) = self.timeout_ms {
            url = url.with_parameter(format!("{}.timeout", self.name), timeout.to_string());
        }
        if let Some(retries) = self.retries {
            url = url.with_parameter(format!("{}.retries", self.name), retries.to_string());
        }
        if let Some(merger) = &self.merger {
            url = url.with_parameter(format!("{}.merger", self.name), merger.clone());
        }
        if let Some(cache) = &self.cache {
            url = url.with_parameter(format!("{}.cache", self.name), cache.clone());
        }
        url
    }
}

/// Connection options for an external registry, consumed by discovery
/// integrations outside this crate.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: Option<u64>,
}
