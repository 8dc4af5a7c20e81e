use async_trait::async_trait;
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};

use super::{SerializationError, SerializationResult};

/// Length of every key the serializer asks for.
pub const KEY_LEN: usize = 32;

/// Resolves opaque key identifiers to key material. Implementations may sit
/// in front of a remote vault, so lookups are async.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn key(&self, key_id: &str) -> SerializationResult<Vec<u8>>;
}

/// Keys held in process memory.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: DashMap<String, Vec<u8>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key_id: impl Into<String>, material: Vec<u8>) {
        self.keys.insert(key_id.into(), material);
    }

    /// Creates a random key under `key_id`, replacing any existing one.
    pub fn generate(&self, key_id: impl Into<String>) -> SerializationResult<()> {
        let mut material = vec![0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut material)
            .map_err(|_| SerializationError::Crypto("random source unavailable".to_string()))?;
        self.insert(key_id, material);
        Ok(())
    }

    pub fn remove(&self, key_id: &str) -> bool {
        self.keys.remove(key_id).is_some()
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn key(&self, key_id: &str) -> SerializationResult<Vec<u8>> {
        self.keys
            .get(key_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SerializationError::KeyNotFound(key_id.to_string()))
    }
}
