//! Runtime key/value store mapping `(resource, path)` to a value. Safe for
//! concurrent readers and single-writer-per-key writers, which is the only
//! pattern the Flow Manager ever produces: a node's response lands under
//! its own node name, so concurrent siblings never race on the same key.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::property::Value;

#[derive(Debug, Default)]
struct ResourceSlot {
    values: RwLock<HashMap<String, Value>>,
    repeated: RwLock<HashMap<String, Vec<Value>>>,
}

/// The shared data store threaded through a single flow invocation.
#[derive(Debug, Default)]
pub struct ReferenceStore {
    resources: RwLock<HashMap<String, Arc<ResourceSlot>>>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        ReferenceStore::default()
    }

    fn slot(&self, resource: &str) -> Arc<ResourceSlot> {
        if let Some(slot) = self.resources.read().unwrap().get(resource) {
            return slot.clone();
        }

        let mut resources = self.resources.write().unwrap();
        resources
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(ResourceSlot::default()))
            .clone()
    }

    /// `Load(resource, path) -> Value | absent`
    pub fn load(&self, resource: &str, path: &str) -> Option<Value> {
        let resources = self.resources.read().unwrap();
        let slot = resources.get(resource)?;
        let value = slot.values.read().unwrap().get(path).cloned();
        value
    }

    /// `Store(resource, path, Value)`
    pub fn store(&self, resource: &str, path: &str, value: Value) {
        let slot = self.slot(resource);
        slot.values
            .write()
            .unwrap()
            .insert(path.to_string(), value);
    }

    /// `StoreRepeated(resource, path, []Value)`, overwriting any prior
    /// group at that path with stable iteration order.
    pub fn store_repeated(&self, resource: &str, path: &str, values: Vec<Value>) {
        let slot = self.slot(resource);
        slot.repeated
            .write()
            .unwrap()
            .insert(path.to_string(), values);
    }

    /// Atomically appends one value to the repeated group at `(resource,
    /// path)`, creating it if absent.
    pub fn append_repeated(&self, resource: &str, path: &str, value: Value) {
        let slot = self.slot(resource);
        slot.repeated
            .write()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push(value);
    }

    pub fn load_repeated(&self, resource: &str, path: &str) -> Option<Vec<Value>> {
        let resources = self.resources.read().unwrap();
        let slot = resources.get(resource)?;
        let value = slot.repeated.read().unwrap().get(path).cloned();
        value
    }

    /// Derives a scoped view bound to a fixed resource name.
    pub fn new_prefix<'a>(self: &'a Arc<Self>, resource: impl Into<String>) -> PrefixedStore<'a> {
        PrefixedStore {
            store: self,
            resource: resource.into(),
        }
    }
}

/// A view over the store scoped to one resource name, handed to callers so
/// they never have to restate their own node name.
pub struct PrefixedStore<'a> {
    store: &'a ReferenceStore,
    resource: String,
}

impl<'a> PrefixedStore<'a> {
    pub fn load(&self, path: &str) -> Option<Value> {
        self.store.load(&self.resource, path)
    }

    pub fn store(&self, path: &str, value: Value) {
        self.store.store(&self.resource, path, value)
    }

    pub fn store_repeated(&self, path: &str, values: Vec<Value>) {
        self.store.store_repeated(&self.resource, path, values)
    }

    pub fn append_repeated(&self, path: &str, value: Value) {
        self.store.append_repeated(&self.resource, path, value)
    }
}
