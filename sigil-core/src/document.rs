//! Signed-document container and verification result types
//!
//! The carrier file holds a small JSON document: the content hashes of
//! every covered file plus the signature envelope. Wire names are
//! camelCase for compatibility with carrier files produced by earlier
//! implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SigilError;

/// Filename extension that marks a file as the signature carrier.
///
/// Detection by extension is a deliberate, simple convention, not a
/// security boundary; authentication happens at the verifier step.
pub const CARRIER_EXTENSION: &str = ".sigil";

/// True iff `name` follows the signature-carrier naming convention.
pub fn is_carrier_name(name: &str) -> bool {
    name.ends_with(CARRIER_EXTENSION)
}

/// On-chain anchor left by an external timestamping flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remark {
    pub tx_hash: String,
    pub block_hash: String,
}

/// The JSON payload inside a signature carrier file.
///
/// `hashes` lists the content hashes of every other file in the bundle in
/// the order they were added; order carries no meaning because aggregation
/// sorts before hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedDocument {
    pub hashes: Vec<String>,
    pub jws: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<Remark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Vec<serde_json::Value>>,
}

impl SignedDocument {
    /// Parse a carrier file's bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigilError> {
        serde_json::from_slice(bytes).map_err(|source| SigilError::MalformedDocument { source })
    }

    /// Serialize for writing into a carrier file.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("signed document serialization is infallible")
    }
}

/// Service endpoint advertised by the signer's identity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub id: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Proof that the signature was anchored at a known point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampProof {
    pub tx_hash: String,
    pub time: DateTime<Utc>,
}

/// Everything known about a successfully verified signature.
///
/// Produced only when the bundle reaches `Verified`; discarded on reset or
/// on any mutation that invalidates the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedSignatureContents {
    /// Signer identifier resolved by the verifier
    pub signer: String,
    /// Human-readable alias, when the signer registered one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<ServiceEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimestampProof>,
    /// Credentials carried opaquely from the signed document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Vec<serde_json::Value>>,
}
