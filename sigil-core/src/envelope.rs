//! Signature envelope codec
//!
//! The envelope is a compact JWS-style token: three base64 segments joined
//! by `.`, carrying the signer's key reference, the aggregate-hash claim
//! and the raw signature. This string is the portable artifact and must
//! stay byte-for-byte stable across implementations.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SigilError;

/// Encode without padding; decode either form. Previously produced
/// envelopes stripped `=` by hand, so decoding must stay indifferent.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Value of the `typ` header field.
pub const ENVELOPE_TYPE: &str = "JWS";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
    kid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claim {
    hash: String,
}

/// The parsed contents of a signature envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEnvelope {
    /// Signer key reference from the `kid` header field
    pub key_ref: String,
    /// Signature algorithm declared in the header
    pub algorithm: String,
    /// Aggregate hash the signer committed to
    pub claimed_hash: String,
    /// Raw signer output, exactly as produced by the signer
    pub raw_signature: String,
}

/// Build the three-segment envelope string.
///
/// Header and claim are JSON, base64-encoded with padding stripped. The
/// signature segment is the raw signature string base64-encoded directly,
/// not JSON-wrapped.
pub fn encode(key_ref: &str, algorithm: &str, aggregate_hash: &str, raw_signature: &str) -> String {
    let header = Header {
        alg: algorithm.to_string(),
        typ: ENVELOPE_TYPE.to_string(),
        kid: key_ref.to_string(),
    };
    let claim = Claim {
        hash: aggregate_hash.to_string(),
    };

    // Struct serialization to JSON is infallible here
    let header_json = serde_json::to_vec(&header).expect("header serialization is infallible");
    let claim_json = serde_json::to_vec(&claim).expect("claim serialization is infallible");

    let header_b64 = BASE64.encode(header_json);
    let claim_b64 = BASE64.encode(claim_json);
    let signature_b64 = BASE64.encode(raw_signature.as_bytes());

    format!("{header_b64}.{claim_b64}.{signature_b64}")
}

/// Parse an envelope back into its parts.
///
/// Fails with [`SigilError::MalformedEnvelope`] unless the input splits
/// into exactly three decodable segments with parsable JSON header/claim.
pub fn decode(envelope: &str) -> Result<DecodedEnvelope, SigilError> {
    let segments: Vec<&str> = envelope.split('.').collect();
    let [header_b64, claim_b64, signature_b64] = segments.as_slice() else {
        return Err(SigilError::MalformedEnvelope {
            reason: format!("expected 3 segments, found {}", segments.len()),
        });
    };

    let header: Header = decode_json_segment(header_b64, "header")?;
    let claim: Claim = decode_json_segment(claim_b64, "claim")?;

    let signature_bytes =
        BASE64
            .decode(signature_b64)
            .map_err(|e| SigilError::MalformedEnvelope {
                reason: format!("signature segment is not valid base64: {e}"),
            })?;
    let raw_signature =
        String::from_utf8(signature_bytes).map_err(|_| SigilError::MalformedEnvelope {
            reason: "signature segment is not valid UTF-8".to_string(),
        })?;

    Ok(DecodedEnvelope {
        key_ref: header.kid,
        algorithm: header.alg,
        claimed_hash: claim.hash,
        raw_signature,
    })
}

fn decode_json_segment<T: DeserializeOwned>(segment: &str, label: &str) -> Result<T, SigilError> {
    let bytes = BASE64
        .decode(segment)
        .map_err(|e| SigilError::MalformedEnvelope {
            reason: format!("{label} segment is not valid base64: {e}"),
        })?;

    serde_json::from_slice(&bytes).map_err(|e| SigilError::MalformedEnvelope {
        reason: format!("{label} segment is not valid JSON: {e}"),
    })
}
