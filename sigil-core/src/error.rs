//! Engine error types - one variant per failure class a bundle can surface

use thiserror::Error;

/// Failures raised by the hashing, envelope, archive and reconciliation
/// layers. None of these are fatal: every one of them degrades to a
/// `BundleStatus` the caller can observe and remediate.
#[derive(Error, Debug)]
pub enum SigilError {
    /// Hashing or aggregation was given nothing to digest
    #[error("No content given to hash")]
    EmptyInput,

    /// The three-segment signature envelope could not be parsed
    #[error("Malformed signature envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// The carrier file's JSON payload could not be parsed
    #[error("Signature document is not valid JSON")]
    MalformedDocument {
        #[source]
        source: serde_json::Error,
    },

    /// The container could not be read as a zip archive
    #[error("Failed to read archive: {reason}")]
    Archive { reason: String },

    /// A second signature carrier was offered to a bundle that already has one
    #[error("A signature file is already present in this bundle: {existing}\n\nRemove it before adding another signature, or start over.")]
    CarrierConflict { existing: String },

    /// The live file set no longer matches what the signature claims
    #[error("Aggregate hash mismatch\nClaimed: {claimed}\nActual:  {actual}\n\nOne or more files differ from the set that was signed.")]
    IntegrityMismatch { claimed: String, actual: String },

    /// The signer could not be authenticated
    #[error("Signature could not be authenticated: {reason}")]
    AuthenticationFailure { reason: String },
}

impl SigilError {
    /// Log integrity-critical failures on the dedicated target
    pub fn log_if_integrity_critical(&self) {
        match self {
            SigilError::IntegrityMismatch { .. } | SigilError::CarrierConflict { .. } => {
                tracing::warn!(target: "integrity", "INTEGRITY VIOLATION: {}", self);
            }
            _ => {}
        }
    }
}
