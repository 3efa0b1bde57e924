//! Message descriptor registry and per-worker reflection caches.
//!
//! The registry is an explicitly-owned object shared by every component that
//! needs reflection metadata; there is no process-global descriptor pool.
//! Workers coordinate with concurrent registrations through a generation
//! counter: every mutation bumps it, and caches re-resolve lazily when their
//! recorded generation falls behind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};

use crate::error::{Error, Result};

/// Shared, versioned pool of protobuf message descriptors.
#[derive(Debug, Default)]
pub struct Registry {
    pool: RwLock<DescriptorPool>,
    generation: AtomicU64,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a registry seeded with an existing descriptor pool.
    pub fn with_pool(pool: DescriptorPool) -> Arc<Self> {
        Arc::new(Self {
            pool: RwLock::new(pool),
            generation: AtomicU64::new(0),
        })
    }

    /// Current registry generation. Bumped on every registration change.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Merges a serialized `FileDescriptorSet` into the pool.
    ///
    /// Invalidates every cache by bumping the generation, whether or not the
    /// set added anything new.
    pub fn decode_file_descriptor_set(&self, bytes: &[u8]) -> Result<()> {
        {
            let mut pool = self.pool.write().expect("descriptor pool lock poisoned");
            pool.decode_file_descriptor_set(bytes)?;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Looks up the descriptor for a fully qualified message type name.
    pub fn message_by_name(&self, name: &str) -> Result<MessageDescriptor> {
        let pool = self.pool.read().expect("descriptor pool lock poisoned");
        pool.get_message_by_name(name)
            .ok_or_else(|| Error::UnknownMessageType(name.to_string()))
    }
}

/// Per-worker memoization of the descriptor and decoded-message lookups.
///
/// Both memos hold a single entry (the most recently used), which is the
/// common shape for view queries: the extraction function runs once per
/// column per row against the same type and the same serialized bytes.
/// Not shared across threads; each worker owns one.
#[derive(Debug, Default)]
pub struct PrototypeCache {
    generation: u64,
    type_name: String,
    descriptor: Option<MessageDescriptor>,
    message_bytes: Vec<u8>,
    message: Option<DynamicMessage>,
}

impl PrototypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn revalidate(&mut self, registry: &Registry, type_name: &str) {
        let generation = registry.generation();
        if generation != self.generation || self.type_name != type_name {
            self.generation = generation;
            self.type_name.clear();
            self.type_name.push_str(type_name);
            self.descriptor = None;
            self.message_bytes.clear();
            self.message = None;
        }
    }

    /// Returns the (possibly memoized) descriptor for `type_name`.
    pub fn descriptor(
        &mut self,
        registry: &Registry,
        type_name: &str,
    ) -> Result<MessageDescriptor> {
        self.revalidate(registry, type_name);
        if let Some(descriptor) = &self.descriptor {
            return Ok(descriptor.clone());
        }

        let descriptor = registry.message_by_name(type_name)?;
        self.descriptor = Some(descriptor.clone());
        Ok(descriptor)
    }

    /// Decodes `bytes` as `type_name`, reusing the previous decode when the
    /// same bytes are seen again under the same generation.
    pub fn decode(
        &mut self,
        registry: &Registry,
        type_name: &str,
        bytes: &[u8],
    ) -> Result<&DynamicMessage> {
        let descriptor = self.descriptor(registry, type_name)?;

        if self.message.is_none() || self.message_bytes != bytes {
            let message =
                DynamicMessage::decode(descriptor, bytes).map_err(|source| Error::Decode {
                    message_type: type_name.to_string(),
                    source,
                })?;
            self.message_bytes.clear();
            self.message_bytes.extend_from_slice(bytes);
            self.message = Some(message);
        }

        Ok(self.message.as_ref().expect("decoded message just stored"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_is_an_error() {
        let registry = Registry::new();
        let err = registry.message_by_name("no.such.Type").unwrap_err();
        assert!(matches!(err, Error::UnknownMessageType(name) if name == "no.such.Type"));
    }

    #[test]
    fn test_generation_bumps_on_registration() {
        let registry = Registry::new();
        assert_eq!(registry.generation(), 0);

        // An empty descriptor set is still a registration event.
        registry
            .decode_file_descriptor_set(&[])
            .expect("empty set should register");
        assert_eq!(registry.generation(), 1);
    }

    #[test]
    fn test_cache_miss_after_generation_bump() {
        let registry = Registry::new();
        let mut cache = PrototypeCache::new();

        assert!(cache.descriptor(&registry, "no.such.Type").is_err());

        registry.decode_file_descriptor_set(&[]).expect("register");
        // The stale entry must not be trusted across the bump.
        assert!(cache.descriptor(&registry, "no.such.Type").is_err());
        assert_eq!(cache.generation, registry.generation());
    }
}
