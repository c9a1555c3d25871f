//! Signing key files for the offline workflow
//!
//! A key file is a small JSON document holding an Ed25519 secret key and
//! the self-certifying key reference derived from its public half. It is
//! what `sigil keygen` writes and `sigil sign` reads.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// On-disk key file contents.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFile {
    /// Self-certifying reference, "ed25519:" followed by the hex public key
    pub key_ref: String,
    /// Hex-encoded 32-byte Ed25519 secret key
    pub secret_key: String,
}

impl KeyFile {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        KeyFile {
            key_ref: format!(
                "ed25519:{}",
                hex::encode(signing_key.verifying_key().to_bytes())
            ),
            secret_key: hex::encode(signing_key.to_bytes()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse key file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write key file: {}", path.display()))?;

        // Key material should not be world-readable
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    fn signing_key(&self) -> Result<SigningKey> {
        let bytes = hex::decode(&self.secret_key).context("Secret key is not valid hex")?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("Secret key must be exactly 32 bytes"))?;
        Ok(SigningKey::from_bytes(&bytes))
    }

    /// Sign a message, returning the raw signature in "0x" hex form.
    pub fn sign(&self, message: &str) -> Result<String> {
        let key = self.signing_key()?;
        Ok(format!("0x{}", hex::encode(key.sign(message.as_bytes()).to_bytes())))
    }
}
