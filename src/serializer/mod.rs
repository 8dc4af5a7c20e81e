//! # Secure tree serialization
//!
//! Persists [`TreeNode`](crate::value::TreeNode) documents into a JSON
//! container that can be compressed, encrypted, checksummed and signed.
//! Key material never travels with the container; only key identifiers do,
//! and they are resolved through a [`KeyStore`].
//!
//! Any failure to prove that a container is intact (bad signature, bad
//! checksum, failed AEAD authentication, unreadable envelope) surfaces as
//! [`SerializationError::SerializationIntegrityFailure`].

mod key_store;
mod secure;

use thiserror::Error;

pub use key_store::{KEY_LEN, KeyStore, MemoryKeyStore};
pub use secure::{
    ContainerInfo, ContainerMetadata, SecureContainer, SecureLoadOptions, SecureSaveOptions,
    SecureSerializer,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SerializationError {
    #[error("Integrity check failed: {0}")]
    SerializationIntegrityFailure(String),
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Crypto error: {0}")]
    Crypto(String),
}

pub type SerializationResult<T> = Result<T, SerializationError>;
