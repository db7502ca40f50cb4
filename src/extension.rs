//! Name-keyed plugin registry.
//!
//! A process holds one [`ExtensionRegistry`] per capability interface
//! (mergers, telnet commands, router factories, caches, thread pools).
//! Construction is lazy and happens at most once per name; lookups are
//! read-mostly afterwards. Registration is expected at startup but is safe
//! at any time.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, RpcError};
use crate::url::Url;

type Factory<T> = Box<dyn Fn() -> Arc<T> + Send + Sync>;

pub struct ExtensionRegistry<T: ?Sized + Send + Sync> {
    capability: &'static str,
    default_name: RwLock<Option<String>>,
    factories: RwLock<HashMap<String, Factory<T>>>,
    instances: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> ExtensionRegistry<T> {
    /// `capability` names the interface in error messages ("merger",
    /// "router-factory", ...).
    pub fn new(capability: &'static str) -> Self {
        Self {
            capability,
            default_name: RwLock::new(None),
            factories: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        self.factories.write().insert(name.into(), Box::new(factory));
    }

    /// Register an already constructed implementation.
    pub fn register_instance(&self, name: impl Into<String>, instance: Arc<T>) {
        let name = name.into();
        self.factories
            .write()
            .insert(name.clone(), Box::new(move || Arc::clone(&instance)));
        // A fresh registration under the same name replaces any cached
        // instance built from the previous factory.
        self.instances.write().remove(&name);
    }

    pub fn set_default(&self, name: impl Into<String>) {
        *self.default_name.write() = Some(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve `name`, constructing the implementation on first use.
    pub fn get(&self, name: &str) -> Result<Arc<T>> {
        if let Some(instance) = self.instances.read().get(name) {
            return Ok(Arc::clone(instance));
        }
        // Double-checked under the write lock so each name is constructed
        // at most once.
        let mut instances = self.instances.write();
        if let Some(instance) = instances.get(name) {
            return Ok(Arc::clone(instance));
        }
        let factories = self.factories.read();
        let factory = factories.get(name).ok_or_else(|| {
            RpcError::unsupported(format!("no {} extension named {name:?}", self.capability))
        })?;
        let instance = factory();
        instances.insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    /// Resolve the configured default implementation.
    pub fn default(&self) -> Result<Arc<T>> {
        let name = self.default_name.read().clone().ok_or_else(|| {
            RpcError::unsupported(format!("no default {} extension configured", self.capability))
        })?;
        self.get(&name)
    }

    /// Adaptive resolution: the implementation name is read from the url
    /// parameter `param_key` at call time, falling back to the default.
    pub fn adaptive(&self, url: &Url, param_key: &str) -> Result<Arc<T>> {
        match url.parameter(param_key).filter(|v| !v.is_empty()) {
            Some(name) => self.get(name),
            None => self.default(),
        }
    }
}
