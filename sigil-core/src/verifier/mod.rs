//! Signature verifier boundary - abstraction over identity resolution
//!
//! The engine never does the cryptographic/identity resolution itself; it
//! hands a key reference, the claimed hash and the raw signature to an
//! implementation of this trait. Implementations may be network-bound
//! (chain-backed identity resolvers) or fully offline like the bundled
//! [`KeyringVerifier`].

pub mod keyring;

use anyhow::Result;
use async_trait::async_trait;

use crate::document::{ServiceEndpoint, TimestampProof};

pub use keyring::KeyringVerifier;

/// Outcome of one verification call.
#[derive(Debug, Clone)]
pub struct Verification {
    /// Whether the signature checks out against the resolved key
    pub authentic: bool,
    /// Resolved signer identity
    pub signer: String,
    /// Human-readable alias, if the signer has one
    pub alias: Option<String>,
    /// Service endpoints advertised by the signer
    pub endpoints: Vec<ServiceEndpoint>,
    /// Timestamp proof, when the resolver can anchor the signature in time
    pub timestamp: Option<TimestampProof>,
}

impl Verification {
    /// A flat "signature does not check out" result.
    pub fn not_authentic(signer: impl Into<String>) -> Self {
        Verification {
            authentic: false,
            signer: signer.into(),
            alias: None,
            endpoints: Vec::new(),
            timestamp: None,
        }
    }
}

/// Trait for signature verification backends.
///
/// The call may be slow and may fail transiently. The reconciler treats a
/// failure the same as "not authentic" when settling the bundle status,
/// but keeps the distinct cause for diagnostics.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Verify `raw_signature` over `message` for the signer behind `key_ref`.
    async fn verify(
        &self,
        key_ref: &str,
        message: &str,
        raw_signature: &str,
    ) -> Result<Verification>;

    /// Backend identifier for logging
    fn name(&self) -> &'static str;
}
