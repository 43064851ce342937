//! Type-descriptor registry.
//!
//! The broker never inspects concrete payload types through reflection —
//! every publishable/consumable type registers a stable string id plus a
//! serializer/deserializer pair up front. Subscriptions and outbox/inbox
//! records reference types by this id, never by owning a handle back into
//! application code.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{ConduitError, Result};

/// Serializes a boxed payload to bytes.
pub type SerializeFn = Arc<dyn Fn(&dyn Any) -> Result<Vec<u8>> + Send + Sync>;
/// Deserializes bytes back into a boxed payload.
pub type DeserializeFn = Arc<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send + Sync>> + Send + Sync>;

#[derive(Clone)]
pub struct TypeDescriptor {
    pub type_id: String,
    pub serialize: SerializeFn,
    pub deserialize: DeserializeFn,
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_id", &self.type_id)
            .finish()
    }
}

/// Holds one descriptor per registered message type. Cheap to clone — backed
/// by an `Arc<DashMap<..>>` so it can be shared across subscriptions without
/// an owning reference back to the registry's creator.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    descriptors: Arc<DashMap<String, TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: TypeDescriptor) {
        self.descriptors.insert(descriptor.type_id.clone(), descriptor);
    }

    /// Convenience registration for serde-compatible types using JSON.
    pub fn register_json<T>(&self, type_id: impl Into<String>)
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        let type_id = type_id.into();
        let serialize: SerializeFn = Arc::new(|value: &dyn Any| {
            let typed = value
                .downcast_ref::<T>()
                .ok_or_else(|| ConduitError::TransportError("type mismatch on serialize".into()))?;
            serde_json::to_vec(typed)
                .map_err(|e| ConduitError::TransportError(format!("serialize failed: {e}")))
        });
        let deserialize: DeserializeFn = Arc::new(|bytes: &[u8]| {
            let typed: T = serde_json::from_slice(bytes)
                .map_err(|e| ConduitError::TransportError(format!("deserialize failed: {e}")))?;
            Ok(Box::new(typed))
        });
        self.register(TypeDescriptor {
            type_id,
            serialize,
            deserialize,
        });
    }

    pub fn get(&self, type_id: &str) -> Option<TypeDescriptor> {
        self.descriptors.get(type_id).map(|r| r.value().clone())
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.descriptors.contains_key(type_id)
    }

    pub fn type_ids(&self) -> Vec<String> {
        self.descriptors.iter().map(|r| r.key().clone()).collect()
    }
}

/// Snapshot view used by diagnostics endpoints — a plain map, not a live
/// reference into the registry.
pub fn snapshot(registry: &TypeRegistry) -> HashMap<String, String> {
    registry
        .type_ids()
        .into_iter()
        .map(|id| (id.clone(), id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn register_and_roundtrip_json() {
        let registry = TypeRegistry::new();
        registry.register_json::<Sample>("sample.v1");

        let descriptor = registry.get("sample.v1").expect("descriptor present");
        let original = Sample { value: 42 };
        let bytes = (descriptor.serialize)(&original).expect("serialize");
        let decoded = (descriptor.deserialize)(&bytes).expect("deserialize");
        let decoded: &Sample = decoded.downcast_ref().expect("downcast");
        assert_eq!(decoded, &original);
    }

    #[test]
    fn unknown_type_id_is_absent() {
        let registry = TypeRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(!registry.contains("missing"));
    }
}
