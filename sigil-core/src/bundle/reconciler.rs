//! The reconciler proper: transition rules over the live file set
//!
//! One reconciler instance is constructed per session and owns the bundle
//! outright; nothing outside mutates file bytes once captured. Transitions
//! are serialized through a single async lock, held across the verifier
//! call, so anything started while a check is in flight queues behind it
//! instead of interleaving. Clearing the bundle bumps an epoch counter so
//! a verifier result arriving for a cleared bundle is discarded rather
//! than resurrecting it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::archive;
use crate::bundle::{BundleStatus, FileSummary, IngestReport};
use crate::document::{is_carrier_name, SignedDocument, VerifiedSignatureContents};
use crate::envelope;
use crate::error::SigilError;
use crate::hasher;
use crate::verifier::SignatureVerifier;

/// One file under consideration. Bytes are immutable once captured and
/// the content hash is computed exactly once.
#[derive(Debug, Clone)]
struct FileEntry {
    name: String,
    bytes: Vec<u8>,
    hash: String,
    is_carrier: bool,
    verified: Option<bool>,
}

/// Parsed state of the resident signature carrier.
#[derive(Debug, Clone)]
struct CarrierState {
    name: String,
    /// Claimed per-file hashes, normalized to the prefixed form
    claimed: Vec<String>,
}

#[derive(Default)]
struct BundleState {
    files: Vec<FileEntry>,
    carrier: Option<CarrierState>,
    status: BundleStatus,
    contents: Option<VerifiedSignatureContents>,
    /// Underlying cause of the last Invalid/Corrupted classification
    last_failure: Option<String>,
}

impl BundleState {
    /// Recompute every file's membership flag against the carrier claim.
    fn recompute_flags(&mut self) {
        let claimed = self.carrier.as_ref().map(|c| c.claimed.clone());
        for file in &mut self.files {
            file.verified = if file.is_carrier {
                Some(true)
            } else {
                claimed.as_ref().map(|set| set.contains(&file.hash))
            };
        }
    }

    fn live_hashes(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| !f.is_carrier)
            .map(|f| f.hash.clone())
            .collect()
    }
}

/// The bundle state machine. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct BundleReconciler {
    verifier: Arc<dyn SignatureVerifier>,
    state: Arc<Mutex<BundleState>>,
    epoch: Arc<AtomicU64>,
}

impl BundleReconciler {
    /// Create a fresh, empty bundle bound to a verifier backend.
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        BundleReconciler {
            verifier,
            state: Arc::new(Mutex::new(BundleState::default())),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Add one file. Carrier candidates are recognized by filename and go
    /// through the full integrity + authentication path; everything else
    /// is hashed and folded into the live set.
    pub async fn add_file(&self, name: &str, bytes: Vec<u8>) -> Result<BundleStatus, SigilError> {
        if is_carrier_name(name) {
            let mut state = self.state.lock().await;
            self.apply_carrier(&mut state, name.to_string(), bytes)
                .await
        } else {
            // Hashing happens outside the state lock so concurrent drops
            // can digest in parallel; the transition itself is serialized.
            let hash = hasher::hash_bytes(&bytes);
            let mut state = self.state.lock().await;
            Self::apply_regular(&mut state, name.to_string(), bytes, hash);
            Ok(state.status)
        }
    }

    /// Remove one file by name. Removing the carrier resets the bundle to
    /// `NotChecked` and unsets every membership flag; removing a regular
    /// file leaves a settled status untouched.
    pub async fn remove_file(&self, name: &str) -> BundleStatus {
        let mut state = self.state.lock().await;

        let Some(index) = state.files.iter().position(|f| f.name == name) else {
            debug!("remove_file: no file named {} in bundle", name);
            return state.status;
        };

        let entry = state.files.remove(index);
        if entry.is_carrier {
            info!("Signature carrier {} removed; bundle reset", entry.name);
            state.carrier = None;
            state.contents = None;
            state.last_failure = None;
            state.status = BundleStatus::NotChecked;
            for file in &mut state.files {
                file.verified = None;
            }
        } else {
            debug!("Removed file {} from bundle", entry.name);
            // Policy: an already-settled Verified/Invalid/Corrupted result
            // is not re-triggered by removing a reconciled file. Only
            // carrier removal or clear() resets it.
            state.recompute_flags();
        }

        state.status
    }

    /// Feed every entry of a zip archive into the bundle, carrier last.
    ///
    /// The archive is pre-screened by name: more than one carrier inside
    /// it, or one inside plus one already resident, rejects the archive
    /// before any payload is extracted.
    pub async fn ingest_archive(&self, archive_bytes: &[u8]) -> Result<IngestReport, SigilError> {
        let names = archive::list_names(archive_bytes)?;
        let mut candidates = names.iter().filter(|n| is_carrier_name(n));
        let first_candidate = candidates.next().cloned();
        let has_second_candidate = candidates.next().is_some();

        let mut state = self.state.lock().await;

        let resident = state.carrier.as_ref().map(|c| c.name.clone());
        if has_second_candidate || (first_candidate.is_some() && resident.is_some()) {
            state.status = BundleStatus::MultipleSignatureCarriers;
            state.contents = None;
            let existing = resident
                .or(first_candidate)
                .unwrap_or_default();
            let err = SigilError::CarrierConflict { existing };
            err.log_if_integrity_critical();
            return Err(err);
        }

        let extracted = archive::extract(archive_bytes)?;
        let mut report = IngestReport::default();

        for (name, reason) in extracted.unreadable {
            warn!("Archive entry {} skipped: {}", name, reason);
            report.skipped.push((name, reason));
        }

        // Regular files first, in archive order, so the full hash set is
        // available when the carrier's claim is compared.
        let (carriers, regular): (Vec<_>, Vec<_>) = extracted
            .entries
            .into_iter()
            .partition(|(name, _)| is_carrier_name(name));

        for (name, bytes) in regular {
            let hash = hasher::hash_bytes(&bytes);
            Self::apply_regular(&mut state, name.clone(), bytes, hash);
            report.added.push(name);
        }

        for (name, bytes) in carriers {
            match self.apply_carrier(&mut state, name.clone(), bytes).await {
                Ok(_) => report.added.push(name),
                Err(e) => {
                    warn!("Archive entry {} skipped: {}", name, e);
                    report.skipped.push((name, e.to_string()));
                }
            }
        }

        report.status = state.status;
        Ok(report)
    }

    /// Reset the bundle to empty. An in-flight verification result is
    /// discarded on arrival; it cannot resurrect a cleared bundle.
    pub async fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        *state = BundleState::default();
        info!("Bundle cleared");
    }

    pub async fn status(&self) -> BundleStatus {
        self.state.lock().await.status
    }

    /// Snapshot of every file's name, hash and verification flags.
    pub async fn files(&self) -> Vec<FileSummary> {
        self.state
            .lock()
            .await
            .files
            .iter()
            .map(|f| FileSummary {
                name: f.name.clone(),
                content_hash: f.hash.clone(),
                is_signature_carrier: f.is_carrier,
                verified: f.verified,
            })
            .collect()
    }

    /// Signer details, populated only while the bundle is `Verified`.
    pub async fn verified_contents(&self) -> Option<VerifiedSignatureContents> {
        self.state.lock().await.contents.clone()
    }

    /// Underlying cause of the last Invalid/Corrupted classification.
    pub async fn last_failure(&self) -> Option<String> {
        self.state.lock().await.last_failure.clone()
    }

    /// Raw bytes of a file, e.g. for re-exporting a bundle.
    pub async fn file_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .files
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.bytes.clone())
    }

    fn apply_regular(state: &mut BundleState, name: String, bytes: Vec<u8>, hash: String) {
        debug!("Adding file {} ({})", name, hash);
        state.files.push(FileEntry {
            name,
            bytes,
            hash,
            is_carrier: false,
            verified: None,
        });
        state.recompute_flags();
    }

    /// Carrier ingestion: integrity comparison against the live hash set,
    /// then signer authentication. Runs with the state lock held, including
    /// across the verifier call.
    async fn apply_carrier(
        &self,
        state: &mut BundleState,
        name: String,
        bytes: Vec<u8>,
    ) -> Result<BundleStatus, SigilError> {
        if let Some(existing) = &state.carrier {
            state.status = BundleStatus::MultipleSignatureCarriers;
            // Signer details are only observable while Verified
            state.contents = None;
            let err = SigilError::CarrierConflict {
                existing: existing.name.clone(),
            };
            err.log_if_integrity_critical();
            return Err(err);
        }

        // A malformed carrier aborts only this transition; hashes of files
        // already in the bundle stay intact.
        let document = SignedDocument::from_bytes(&bytes)?;
        let decoded = envelope::decode(&document.jws)?;

        let claimed: Vec<String> = document.hashes.iter().map(|h| hasher::normalize(h)).collect();
        let claimed_aggregate = hasher::normalize(&decoded.claimed_hash);
        let credentials = document.credentials.clone();

        let hash = hasher::hash_bytes(&bytes);
        state.files.push(FileEntry {
            name: name.clone(),
            bytes,
            hash,
            is_carrier: true,
            verified: Some(true),
        });
        state.carrier = Some(CarrierState { name, claimed });
        state.recompute_flags();

        let live = state.live_hashes();
        let live_aggregate = hasher::aggregate(&live).unwrap_or_default();

        if live_aggregate != claimed_aggregate {
            let err = SigilError::IntegrityMismatch {
                claimed: claimed_aggregate,
                actual: if live_aggregate.is_empty() {
                    "<empty bundle>".to_string()
                } else {
                    live_aggregate
                },
            };
            err.log_if_integrity_critical();
            state.last_failure = Some(err.to_string());
            state.status = BundleStatus::Corrupted;
            return Ok(BundleStatus::Corrupted);
        }

        state.status = BundleStatus::Validating;
        info!(
            "Bundle integrity matched; authenticating signer via {}",
            self.verifier.name()
        );

        let epoch = self.epoch.load(Ordering::SeqCst);
        let outcome = self
            .verifier
            .verify(&decoded.key_ref, &claimed_aggregate, &decoded.raw_signature)
            .await;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding verifier result: bundle was cleared mid-flight");
            return Ok(state.status);
        }

        match outcome {
            Ok(v) if v.authentic => {
                info!("Bundle verified; signer {}", v.signer);
                state.contents = Some(VerifiedSignatureContents {
                    signer: v.signer,
                    alias: v.alias,
                    endpoints: v.endpoints,
                    timestamp: v.timestamp,
                    credentials,
                });
                state.status = BundleStatus::Verified;
            }
            Ok(v) => {
                warn!("Signer {} did not authenticate the signature", v.signer);
                state.last_failure = Some(
                    SigilError::AuthenticationFailure {
                        reason: format!("signer {} rejected the signature", v.signer),
                    }
                    .to_string(),
                );
                state.status = BundleStatus::Invalid;
            }
            Err(e) => {
                warn!("Verifier failed or unreachable: {:#}", e);
                state.last_failure = Some(
                    SigilError::AuthenticationFailure {
                        reason: format!("verifier failed: {e:#}"),
                    }
                    .to_string(),
                );
                state.status = BundleStatus::Invalid;
            }
        }

        Ok(state.status)
    }
}
