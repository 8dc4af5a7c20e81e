use std::{
    io::{Read, Write},
    sync::Arc,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use ring::{
    aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey},
    digest::{SHA256, digest},
    hmac,
    rand::{SecureRandom, SystemRandom},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{KeyStore, SerializationError, SerializationResult};
use crate::{
    config::SerializerConfig,
    value::{TreeNode, TreeSnapshot},
};

const AUDIT_TARGET: &str = "chariot::audit";

#[derive(Debug, Clone, Default)]
pub struct SecureSaveOptions {
    pub encryption_key_id: Option<String>,
    pub signing_key_id: Option<String>,
    /// Recorded in the container for loaders that rotate keys.
    pub verification_key_id: Option<String>,
    pub checksum: bool,
    pub watermark: String,
    /// Falls back to the configured level.
    pub compression_level: Option<u32>,
    pub audit_trail: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SecureLoadOptions {
    /// Falls back to the key id recorded at save time.
    pub decryption_key_id: Option<String>,
    /// Falls back to the container's verification, then signing key id.
    pub verification_key_id: Option<String>,
    pub require_signature: bool,
    pub audit_trail: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ContainerMetadata {
    pub node_kind: String,
    pub node_name: String,
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_id: Option<String>,
    pub compression_level: u32,
}

/// The persisted form. Binary fields are base64 except the checksum, which
/// is hex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SecureContainer {
    pub version: String,
    /// RFC 3339.
    pub timestamp: String,
    pub watermark: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_key_id: Option<String>,
    pub metadata: ContainerMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// What `validate_only` reports about a verified container.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub version: String,
    pub timestamp: String,
    pub watermark: String,
    pub signed: bool,
    pub checksummed: bool,
    pub metadata: ContainerMetadata,
}

fn integrity(message: impl Into<String>) -> SerializationError {
    SerializationError::SerializationIntegrityFailure(message.into())
}

impl SecureContainer {
    /// Everything except the signature itself.
    fn signed_bytes(&self) -> SerializationResult<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        serde_json::to_vec(&unsigned).map_err(|e| SerializationError::Encoding(e.to_string()))
    }

    fn info(&self) -> ContainerInfo {
        ContainerInfo {
            version: self.version.clone(),
            timestamp: self.timestamp.clone(),
            watermark: self.watermark.clone(),
            signed: self.signature.is_some(),
            checksummed: self.checksum.is_some(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Tree persistence pipeline:
///
/// ```text
/// snapshot (JSON) → gzip → AES-256-GCM → SHA-256 checksum → HMAC-SHA256 signature
/// ```
///
/// Loading runs the same steps backwards and verifies before it decrypts.
pub struct SecureSerializer {
    keys: Arc<dyn KeyStore>,
    config: SerializerConfig,
    rng: SystemRandom,
}

impl SecureSerializer {
    pub fn new(keys: Arc<dyn KeyStore>, config: SerializerConfig) -> Self {
        Self {
            keys,
            config,
            rng: SystemRandom::new(),
        }
    }

    #[instrument(level = "debug", skip_all, fields(node = %node.name()))]
    pub async fn encode(
        &self,
        node: &TreeNode,
        options: &SecureSaveOptions,
    ) -> SerializationResult<Vec<u8>> {
        let snapshot = node.snapshot();
        let plain = serde_json::to_vec(&snapshot)
            .map_err(|e| SerializationError::Encoding(e.to_string()))?;

        let level = options
            .compression_level
            .unwrap_or(self.config.compression_level)
            .min(9);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
        encoder
            .write_all(&plain)
            .map_err(|e| SerializationError::Compression(e.to_string()))?;
        let mut payload = encoder
            .finish()
            .map_err(|e| SerializationError::Compression(e.to_string()))?;
        debug!(original = plain.len(), compressed = payload.len(), "payload compressed");

        let mut nonce = None;
        if let Some(key_id) = &options.encryption_key_id {
            let key = self.aead_key(key_id).await?;
            let mut nonce_bytes = [0u8; NONCE_LEN];
            self.rng
                .fill(&mut nonce_bytes)
                .map_err(|_| SerializationError::Crypto("random source unavailable".to_string()))?;
            key.seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(options.watermark.as_bytes()),
                &mut payload,
            )
            .map_err(|_| SerializationError::Crypto(format!("encryption with key {} failed", key_id)))?;
            nonce = Some(STANDARD.encode(nonce_bytes));
        }

        let checksum = options
            .checksum
            .then(|| hex::encode(digest(&SHA256, &payload)));

        let mut container = SecureContainer {
            version: self.config.format_version.clone(),
            timestamp: Utc::now().to_rfc3339(),
            watermark: options.watermark.clone(),
            checksum,
            nonce,
            payload: STANDARD.encode(&payload),
            signing_key_id: options.signing_key_id.clone(),
            verification_key_id: options.verification_key_id.clone(),
            metadata: ContainerMetadata {
                node_kind: node.kind().to_string(),
                node_name: node.name(),
                encrypted: options.encryption_key_id.is_some(),
                encryption_key_id: options.encryption_key_id.clone(),
                compression_level: level,
            },
            signature: None,
        };

        if let Some(key_id) = &options.signing_key_id {
            let key = hmac::Key::new(hmac::HMAC_SHA256, &self.keys.key(key_id).await?);
            let tag = hmac::sign(&key, &container.signed_bytes()?);
            container.signature = Some(STANDARD.encode(tag.as_ref()));
        }

        let bytes = serde_json::to_vec(&container)
            .map_err(|e| SerializationError::Encoding(e.to_string()))?;
        if options.audit_trail {
            info!(
                target: AUDIT_TARGET,
                action = "save",
                node = %container.metadata.node_name,
                watermark = %container.watermark,
                encrypted = container.metadata.encrypted,
                signed = container.signature.is_some(),
                checksum = container.checksum.is_some(),
                bytes = bytes.len(),
                "tree saved"
            );
        }
        Ok(bytes)
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn decode(
        &self,
        bytes: &[u8],
        options: &SecureLoadOptions,
    ) -> SerializationResult<TreeNode> {
        let container = self.verified(bytes, options).await?;
        let mut payload = STANDARD
            .decode(&container.payload)
            .map_err(|e| integrity(format!("payload is not base64: {}", e)))?;

        if container.metadata.encrypted {
            let (key_id, from_container) = match (&options.decryption_key_id, &container.metadata.encryption_key_id) {
                (Some(id), _) => (id.clone(), false),
                (None, Some(id)) => (id.clone(), true),
                (None, None) => {
                    return Err(SerializationError::KeyNotFound(
                        "no decryption key id".to_string(),
                    ));
                }
            };
            let key = self
                .aead_key(&key_id)
                .await
                .map_err(|e| if from_container { integrity(e.to_string()) } else { e })?;
            let nonce_bytes = container
                .nonce
                .as_deref()
                .map(|nonce| STANDARD.decode(nonce))
                .transpose()
                .map_err(|e| integrity(format!("nonce is not base64: {}", e)))?
                .ok_or_else(|| integrity("encrypted payload without nonce"))?;
            let nonce = Nonce::try_assume_unique_for_key(&nonce_bytes)
                .map_err(|_| integrity("nonce has the wrong length"))?;
            let plain_len = key
                .open_in_place(nonce, Aad::from(container.watermark.as_bytes()), &mut payload)
                .map_err(|_| integrity("payload failed authentication"))?
                .len();
            payload.truncate(plain_len);
        }

        let mut plain = Vec::new();
        GzDecoder::new(payload.as_slice())
            .read_to_end(&mut plain)
            .map_err(|e| integrity(format!("payload does not decompress: {}", e)))?;
        let snapshot: TreeSnapshot = serde_json::from_slice(&plain)
            .map_err(|e| integrity(format!("payload is not a tree: {}", e)))?;

        if options.audit_trail {
            info!(
                target: AUDIT_TARGET,
                action = "load",
                node = %container.metadata.node_name,
                watermark = %container.watermark,
                signed = container.signature.is_some(),
                "tree loaded"
            );
        }
        Ok(TreeNode::from_snapshot(&snapshot))
    }

    /// Checks signature and checksum without decrypting anything.
    pub async fn validate_only(
        &self,
        bytes: &[u8],
        options: &SecureLoadOptions,
    ) -> SerializationResult<ContainerInfo> {
        let container = self.verified(bytes, options).await?;
        if options.audit_trail {
            info!(
                target: AUDIT_TARGET,
                action = "validate",
                node = %container.metadata.node_name,
                "container validated"
            );
        }
        Ok(container.info())
    }

    /// Parses the container and verifies its signature, then its checksum.
    async fn verified(
        &self,
        bytes: &[u8],
        options: &SecureLoadOptions,
    ) -> SerializationResult<SecureContainer> {
        let container: SecureContainer = serde_json::from_slice(bytes)
            .map_err(|e| integrity(format!("unreadable container: {}", e)))?;

        if options.require_signature || container.signature.is_some() {
            let signature = container
                .signature
                .as_deref()
                .ok_or_else(|| integrity("signature required but missing"))?;
            let signature = STANDARD
                .decode(signature)
                .map_err(|e| integrity(format!("signature is not base64: {}", e)))?;

            let material = match &options.verification_key_id {
                Some(key_id) => self.keys.key(key_id).await?,
                None => {
                    let key_id = container
                        .verification_key_id
                        .as_ref()
                        .or(container.signing_key_id.as_ref())
                        .ok_or_else(|| integrity("no key id to verify the signature with"))?;
                    self.keys
                        .key(key_id)
                        .await
                        .map_err(|e| integrity(e.to_string()))?
                }
            };
            let key = hmac::Key::new(hmac::HMAC_SHA256, &material);
            hmac::verify(&key, &container.signed_bytes()?, &signature)
                .map_err(|_| integrity("signature mismatch"))?;
        } else {
            warn!(
                watermark = %container.watermark,
                node = %container.metadata.node_name,
                "accepting unsigned container"
            );
        }

        if let Some(expected) = &container.checksum {
            let payload = STANDARD
                .decode(&container.payload)
                .map_err(|e| integrity(format!("payload is not base64: {}", e)))?;
            if hex::encode(digest(&SHA256, &payload)) != *expected {
                return Err(integrity("checksum mismatch"));
            }
        }
        Ok(container)
    }

    async fn aead_key(&self, key_id: &str) -> SerializationResult<LessSafeKey> {
        let material = self.keys.key(key_id).await?;
        let unbound = UnboundKey::new(&AES_256_GCM, &material).map_err(|_| {
            SerializationError::Crypto(format!(
                "key {} is {} bytes, AES-256 needs 32",
                key_id,
                material.len()
            ))
        })?;
        Ok(LessSafeKey::new(unbound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::MemoryKeyStore;
    use crate::value::{Value, formats};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample_tree() -> TreeNode {
        let root = TreeNode::new("agent");
        root.set_attribute("role", Value::str("planner"));
        root.set_attribute("version", Value::Number(3.0));
        let child = TreeNode::new("memory");
        child.set_text(Some("remember the milk".to_string()));
        root.add_child(&child).unwrap();
        root
    }

    fn serializer() -> SecureSerializer {
        let keys = MemoryKeyStore::new();
        keys.generate("vault-aes").unwrap();
        keys.generate("signer").unwrap();
        SecureSerializer::new(Arc::new(keys), SerializerConfig::default())
    }

    fn full_options() -> SecureSaveOptions {
        SecureSaveOptions {
            encryption_key_id: Some("vault-aes".into()),
            signing_key_id: Some("signer".into()),
            checksum: true,
            watermark: "acme-internal".into(),
            audit_trail: true,
            ..Default::default()
        }
    }

    fn encode_blocking(serializer: &SecureSerializer, tree: &TreeNode) -> Vec<u8> {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(serializer.encode(tree, &full_options()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_with_everything_enabled() {
        let serializer = serializer();
        let tree = sample_tree();
        let bytes = serializer.encode(&tree, &full_options()).await.unwrap();

        let load = SecureLoadOptions {
            require_signature: true,
            audit_trail: true,
            ..Default::default()
        };
        let loaded = serializer.decode(&bytes, &load).await.unwrap();
        assert!(loaded.structurally_equal(&tree));
        assert_eq!(loaded.snapshot(), tree.snapshot());
    }

    #[tokio::test]
    async fn test_round_trip_plain() {
        let serializer = serializer();
        let tree = formats::parse_json(r#"{"a": [1, 2], "b": {"c": "d"}}"#).unwrap();
        let bytes = serializer
            .encode(&tree, &SecureSaveOptions::default())
            .await
            .unwrap();
        let loaded = serializer
            .decode(&bytes, &SecureLoadOptions::default())
            .await
            .unwrap();
        assert_eq!(formats::tree_to_json(&loaded), formats::tree_to_json(&tree));
    }

    #[tokio::test]
    async fn test_payload_tampering_is_detected() {
        let serializer = serializer();
        let bytes = serializer.encode(&sample_tree(), &full_options()).await.unwrap();
        let mut container: SecureContainer = serde_json::from_slice(&bytes).unwrap();
        let mut payload = STANDARD.decode(&container.payload).unwrap();
        payload[0] ^= 0x01;
        container.payload = STANDARD.encode(&payload);
        let tampered = serde_json::to_vec(&container).unwrap();

        let result = serializer.decode(&tampered, &SecureLoadOptions::default()).await;
        assert!(matches!(
            result,
            Err(SerializationError::SerializationIntegrityFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_checksum_alone_detects_corruption() {
        let serializer = serializer();
        let options = SecureSaveOptions {
            checksum: true,
            ..Default::default()
        };
        let bytes = serializer.encode(&sample_tree(), &options).await.unwrap();
        let mut container: SecureContainer = serde_json::from_slice(&bytes).unwrap();
        let mut payload = STANDARD.decode(&container.payload).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0xff;
        container.payload = STANDARD.encode(&payload);
        let corrupted = serde_json::to_vec(&container).unwrap();

        assert_eq!(
            serializer
                .validate_only(&corrupted, &SecureLoadOptions::default())
                .await,
            Err(SerializationError::SerializationIntegrityFailure(
                "checksum mismatch".into()
            ))
        );
    }

    #[tokio::test]
    async fn test_validate_only_does_not_need_decryption_key() {
        let serializer = serializer();
        let bytes = serializer.encode(&sample_tree(), &full_options()).await.unwrap();
        let info = serializer
            .validate_only(&bytes, &SecureLoadOptions::default())
            .await
            .unwrap();
        assert!(info.signed);
        assert!(info.checksummed);
        assert_eq!(info.watermark, "acme-internal");
        assert_eq!(info.metadata.node_name, "agent");
        assert_eq!(info.metadata.compression_level, 6);
    }

    #[tokio::test]
    async fn test_missing_signature_when_required() {
        let serializer = serializer();
        let bytes = serializer
            .encode(&sample_tree(), &SecureSaveOptions::default())
            .await
            .unwrap();
        let load = SecureLoadOptions {
            require_signature: true,
            ..Default::default()
        };
        assert!(matches!(
            serializer.decode(&bytes, &load).await,
            Err(SerializationError::SerializationIntegrityFailure(_))
        ));
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unsigned_container_is_accepted_with_a_warning() {
        let serializer = serializer();
        let bytes = serializer
            .encode(&sample_tree(), &SecureSaveOptions::default())
            .await
            .unwrap();

        let captured = CapturedLog::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        serializer
            .decode(&bytes, &SecureLoadOptions::default())
            .await
            .unwrap();
        let output = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(output.contains("WARN"), "{}", output);
        assert!(output.contains("accepting unsigned container"), "{}", output);
    }

    #[tokio::test]
    async fn test_unknown_key_id() {
        let serializer = serializer();
        let options = SecureSaveOptions {
            encryption_key_id: Some("nope".into()),
            ..Default::default()
        };
        assert_eq!(
            serializer.encode(&sample_tree(), &options).await,
            Err(SerializationError::KeyNotFound("nope".into()))
        );
    }

    #[tokio::test]
    async fn test_wrong_verification_key() {
        let serializer = serializer();
        let bytes = serializer.encode(&sample_tree(), &full_options()).await.unwrap();
        let load = SecureLoadOptions {
            verification_key_id: Some("vault-aes".into()),
            ..Default::default()
        };
        let err = serializer.decode(&bytes, &load).await.unwrap_err();
        assert_eq!(
            err,
            SerializationError::SerializationIntegrityFailure("signature mismatch".into())
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_any_flipped_byte_fails_integrity(position in any::<prop::sample::Index>(), mask in 1u8..=255) {
            let serializer = serializer();
            let mut bytes = encode_blocking(&serializer, &sample_tree());
            let index = position.index(bytes.len());
            bytes[index] ^= mask;

            let result = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap()
                .block_on(serializer.decode(&bytes, &SecureLoadOptions::default()));
            prop_assert!(
                matches!(result, Err(SerializationError::SerializationIntegrityFailure(_))),
                "flip at {} gave {:?}",
                index,
                result.map(|tree| tree.name())
            );
        }
    }
}
