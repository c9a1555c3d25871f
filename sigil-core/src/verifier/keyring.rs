//! Offline Ed25519 verifier backed by a local signer registry
//!
//! Resolves key references without any network dependency. Two forms are
//! accepted: a self-certifying `ed25519:<hex public key>` reference, and
//! any reference listed in a registry file that maps it to a public key
//! plus optional alias and service endpoints.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::ServiceEndpoint;
use crate::verifier::{SignatureVerifier, Verification};

/// Key-reference prefix for self-certifying Ed25519 references.
pub const ED25519_KEY_PREFIX: &str = "ed25519:";

/// One registered signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerProfile {
    /// Hex-encoded 32-byte Ed25519 verifying key
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<ServiceEndpoint>,
}

/// Registry file contents: key reference to signer profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerRegistry {
    #[serde(default)]
    pub signers: HashMap<String, SignerProfile>,
}

impl SignerRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read signer registry: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse signer registry: {}", path.display()))
    }
}

/// Offline verifier over a (possibly empty) signer registry.
#[derive(Debug, Clone, Default)]
pub struct KeyringVerifier {
    registry: SignerRegistry,
}

impl KeyringVerifier {
    pub fn new(registry: SignerRegistry) -> Self {
        KeyringVerifier { registry }
    }

    /// Resolve a key reference to a verifying key plus registry metadata.
    fn resolve(&self, key_ref: &str) -> Result<(VerifyingKey, Option<&SignerProfile>)> {
        if let Some(profile) = self.registry.signers.get(key_ref) {
            return Ok((parse_verifying_key(&profile.public_key)?, Some(profile)));
        }

        if let Some(hex_key) = key_ref.strip_prefix(ED25519_KEY_PREFIX) {
            return Ok((parse_verifying_key(hex_key)?, None));
        }

        Err(anyhow!(
            "Unknown signer key reference: {key_ref} (not in registry, not self-certifying)"
        ))
    }
}

fn parse_verifying_key(hex_key: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(hex_key).context("Public key is not valid hex")?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("Public key must be 32 bytes, got {}", bytes.len()))?;
    VerifyingKey::from_bytes(&bytes).context("Invalid Ed25519 public key")
}

fn parse_signature(raw_signature: &str) -> Result<Signature> {
    let hex_sig = raw_signature.strip_prefix("0x").unwrap_or(raw_signature);
    let bytes = hex::decode(hex_sig).context("Signature is not valid hex")?;
    Signature::from_slice(&bytes).context("Invalid Ed25519 signature bytes")
}

#[async_trait]
impl SignatureVerifier for KeyringVerifier {
    async fn verify(
        &self,
        key_ref: &str,
        message: &str,
        raw_signature: &str,
    ) -> Result<Verification> {
        let (verifying_key, profile) = self.resolve(key_ref)?;
        let signature = parse_signature(raw_signature)?;

        let authentic = verifying_key.verify(message.as_bytes(), &signature).is_ok();
        debug!(
            "Keyring verification for {}: authentic={}",
            key_ref, authentic
        );

        Ok(Verification {
            authentic,
            signer: key_ref.to_string(),
            alias: profile.and_then(|p| p.alias.clone()),
            endpoints: profile.map(|p| p.endpoints.clone()).unwrap_or_default(),
            timestamp: None,
        })
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}
