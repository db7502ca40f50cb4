//! Side registry of serializable type names.
//!
//! Codecs that pre-register payload types for optimized encoding consult
//! this registry; the runtime itself never interprets the entries. Intended
//! to be populated at startup, but safe to call at any time.

use parking_lot::RwLock;

#[derive(Default)]
pub struct SerializableTypeRegistry {
    // Registration order is preserved; duplicates are ignored.
    types: RwLock<Vec<String>>,
}

impl SerializableTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, type_name: impl Into<String>) {
        let type_name = type_name.into();
        let mut types = self.types.write();
        if !types.contains(&type_name) {
            types.push(type_name);
        }
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.types.read().iter().any(|t| t == type_name)
    }

    pub fn registered(&self) -> Vec<String> {
        self.types.read().clone()
    }
}
