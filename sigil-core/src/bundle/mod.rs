//! Bundle reconciliation - the verification state machine
//!
//! A bundle is the current working set of files under consideration for
//! signing or verification. Files arrive one at a time or packaged in a
//! zip archive; the reconciler tracks per-file verification status,
//! detects the signature carrier, enforces the one-carrier invariant and
//! classifies overall bundle health.

pub mod reconciler;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use reconciler::BundleReconciler;

/// Overall health of the bundle.
///
/// Starts at `NotChecked` for an empty bundle; every transition is driven
/// by the reconciler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleStatus {
    /// No signature carrier present, nothing to check against
    #[default]
    NotChecked,
    /// Integrity matched; signer authentication is in flight
    Validating,
    /// Integrity matched and the signer authenticated
    Verified,
    /// Signer did not authenticate, or the verifier was unreachable
    Invalid,
    /// The live file set does not hash to what the signature claims
    Corrupted,
    /// More than one signature carrier was offered
    MultipleSignatureCarriers,
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BundleStatus::NotChecked => "Not Checked",
            BundleStatus::Validating => "Validating",
            BundleStatus::Verified => "Verified",
            BundleStatus::Invalid => "Invalid",
            BundleStatus::Corrupted => "Corrupted",
            BundleStatus::MultipleSignatureCarriers => "Multiple Signatures",
        };
        write!(f, "{label}")
    }
}

/// Externally visible view of one file in the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub name: String,
    pub content_hash: String,
    pub is_signature_carrier: bool,
    /// `None` until a carrier claim exists to check membership against
    pub verified: Option<bool>,
}

/// Result of feeding an archive through the reconciler.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Entries added to the bundle, in processing order
    pub added: Vec<String>,
    /// Entries skipped, with the per-file reason
    pub skipped: Vec<(String, String)>,
    /// Bundle status after the whole archive was processed
    pub status: BundleStatus,
}
