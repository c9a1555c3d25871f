//! Integration tests for the bundle reconciliation state machine

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use pretty_assertions::assert_eq;

use sigil_core::bundle::{BundleReconciler, BundleStatus};
use sigil_core::document::{ServiceEndpoint, SignedDocument};
use sigil_core::verifier::{KeyringVerifier, SignatureVerifier, Verification};
use sigil_core::{archive, envelope, hasher};

/// Verifier stub with a scriptable outcome and optional latency.
struct StubVerifier {
    authentic: bool,
    fail: bool,
    delay: Option<Duration>,
}

impl StubVerifier {
    fn authentic() -> Self {
        StubVerifier {
            authentic: true,
            fail: false,
            delay: None,
        }
    }

    fn rejecting() -> Self {
        StubVerifier {
            authentic: false,
            fail: false,
            delay: None,
        }
    }

    fn unreachable() -> Self {
        StubVerifier {
            authentic: false,
            fail: true,
            delay: None,
        }
    }

    fn slow(delay: Duration) -> Self {
        StubVerifier {
            authentic: true,
            fail: false,
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl SignatureVerifier for StubVerifier {
    async fn verify(&self, key_ref: &str, _message: &str, _raw: &str) -> Result<Verification> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(anyhow!("identity service unreachable"));
        }
        Ok(Verification {
            authentic: self.authentic,
            signer: key_ref.to_string(),
            alias: Some("stub-signer".to_string()),
            endpoints: vec![ServiceEndpoint {
                id: "stub".to_string(),
                types: vec!["test".to_string()],
                urls: vec!["https://stub.example".to_string()],
            }],
            timestamp: None,
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Build a carrier document covering `contents`, signed by nobody in
/// particular (the stub does not check the signature bytes).
fn carrier_for(contents: &[&[u8]]) -> Vec<u8> {
    let hashes: Vec<String> = contents.iter().map(|b| hasher::hash_bytes(b)).collect();
    let aggregate = hasher::aggregate(&hashes).unwrap();
    let jws = envelope::encode("stub:signer", "Ed25519", &aggregate, "0xsig");
    SignedDocument {
        hashes,
        jws,
        remark: None,
        credentials: None,
    }
    .to_bytes()
}

#[tokio::test]
async fn test_full_bundle_reaches_verified() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));

    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();
    reconciler.add_file("b.txt", b"B".to_vec()).await.unwrap();

    let status = reconciler
        .add_file("signature.sigil", carrier_for(&[b"A", b"B"]))
        .await
        .unwrap();

    assert_eq!(status, BundleStatus::Verified);

    let contents = reconciler.verified_contents().await.unwrap();
    assert_eq!(contents.signer, "stub:signer");
    assert_eq!(contents.alias.as_deref(), Some("stub-signer"));
    assert_eq!(contents.endpoints.len(), 1);

    for file in reconciler.files().await {
        assert_eq!(file.verified, Some(true), "{} not verified", file.name);
    }
}

#[tokio::test]
async fn test_reverse_hash_order_still_matches() {
    // The carrier stores hashes in reverse of addition order; the claim
    // still matches because aggregation sorts internally.
    let h_a = hasher::hash_bytes(b"A");
    let h_b = hasher::hash_bytes(b"B");
    let aggregate = hasher::aggregate(&[h_a.clone(), h_b.clone()]).unwrap();
    let doc = SignedDocument {
        hashes: vec![h_b, h_a], // reversed
        jws: envelope::encode("stub:signer", "Ed25519", &aggregate, "0xsig"),
        remark: None,
        credentials: None,
    };

    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();
    reconciler.add_file("b.txt", b"B".to_vec()).await.unwrap();

    let status = reconciler
        .add_file("signature.sigil", doc.to_bytes())
        .await
        .unwrap();
    assert_eq!(status, BundleStatus::Verified);
}

#[tokio::test]
async fn test_unprefixed_legacy_hashes_still_match() {
    let h_a = hasher::hash_bytes(b"A");
    let h_b = hasher::hash_bytes(b"B");
    let aggregate = hasher::aggregate(&[h_a.clone(), h_b.clone()]).unwrap();
    let strip = |h: &str| h.trim_start_matches('f').to_string();
    let doc = SignedDocument {
        hashes: vec![strip(&h_a), strip(&h_b)],
        jws: envelope::encode("stub:signer", "Ed25519", &strip(&aggregate), "0xsig"),
        remark: None,
        credentials: None,
    };

    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();
    reconciler.add_file("b.txt", b"B".to_vec()).await.unwrap();

    let status = reconciler
        .add_file("signature.sigil", doc.to_bytes())
        .await
        .unwrap();
    assert_eq!(status, BundleStatus::Verified);
}

#[tokio::test]
async fn test_tampered_file_corrupts_bundle() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));

    // Carrier was built over "A"/"B" but one byte of b.txt changed
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();
    reconciler.add_file("b.txt", b"X".to_vec()).await.unwrap();

    let status = reconciler
        .add_file("signature.sigil", carrier_for(&[b"A", b"B"]))
        .await
        .unwrap();

    assert_eq!(status, BundleStatus::Corrupted);
    assert!(reconciler.verified_contents().await.is_none());
    assert!(reconciler
        .last_failure()
        .await
        .unwrap()
        .contains("Aggregate hash mismatch"));

    // The tampered file fails membership; the untouched one passes
    let files = reconciler.files().await;
    let b = files.iter().find(|f| f.name == "b.txt").unwrap();
    assert_eq!(b.verified, Some(false));
    let a = files.iter().find(|f| f.name == "a.txt").unwrap();
    assert_eq!(a.verified, Some(true));
}

#[tokio::test]
async fn test_carrier_without_files_is_corrupted() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    let status = reconciler
        .add_file("signature.sigil", carrier_for(&[b"A"]))
        .await
        .unwrap();
    assert_eq!(status, BundleStatus::Corrupted);
}

#[tokio::test]
async fn test_rejecting_verifier_yields_invalid() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::rejecting()));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();

    let status = reconciler
        .add_file("signature.sigil", carrier_for(&[b"A"]))
        .await
        .unwrap();

    assert_eq!(status, BundleStatus::Invalid);
    assert!(reconciler
        .last_failure()
        .await
        .unwrap()
        .contains("rejected the signature"));
}

#[tokio::test]
async fn test_unreachable_verifier_yields_invalid_with_cause() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::unreachable()));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();

    let status = reconciler
        .add_file("signature.sigil", carrier_for(&[b"A"]))
        .await
        .unwrap();

    assert_eq!(status, BundleStatus::Invalid);
    assert!(reconciler
        .last_failure()
        .await
        .unwrap()
        .contains("identity service unreachable"));
}

#[tokio::test]
async fn test_second_carrier_is_rejected_in_either_order() {
    for (first, second) in [("one.sigil", "two.sigil"), ("two.sigil", "one.sigil")] {
        let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
        reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();
        reconciler
            .add_file(first, carrier_for(&[b"A"]))
            .await
            .unwrap();

        let before = reconciler.files().await;
        let err = reconciler
            .add_file(second, carrier_for(&[b"A"]))
            .await
            .unwrap_err();

        assert!(matches!(err, sigil_core::SigilError::CarrierConflict { .. }));
        assert_eq!(
            reconciler.status().await,
            BundleStatus::MultipleSignatureCarriers
        );
        // No hash state beyond the first carrier was touched
        let after = reconciler.files().await;
        assert_eq!(before.len(), after.len());
        assert!(after.iter().all(|f| f.name != second));
    }
}

#[tokio::test]
async fn test_conflict_withdraws_verified_signer_details() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();
    reconciler
        .add_file("one.sigil", carrier_for(&[b"A"]))
        .await
        .unwrap();
    assert!(reconciler.verified_contents().await.is_some());

    reconciler
        .add_file("two.sigil", carrier_for(&[b"A"]))
        .await
        .unwrap_err();

    // Signer details are only observable while the status is Verified
    assert_eq!(
        reconciler.status().await,
        BundleStatus::MultipleSignatureCarriers
    );
    assert!(reconciler.verified_contents().await.is_none());
}

#[tokio::test]
async fn test_archive_with_two_carriers_is_rejected_before_extraction() {
    let zip = archive::write_bundle(&[
        ("a.txt".to_string(), b"A".to_vec()),
        ("one.sigil".to_string(), carrier_for(&[b"A"])),
        ("two.sigil".to_string(), carrier_for(&[b"A"])),
    ])
    .unwrap();

    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    let err = reconciler.ingest_archive(&zip).await.unwrap_err();

    assert!(matches!(err, sigil_core::SigilError::CarrierConflict { .. }));
    assert_eq!(
        reconciler.status().await,
        BundleStatus::MultipleSignatureCarriers
    );
    assert!(reconciler.files().await.is_empty());
}

#[tokio::test]
async fn test_archive_carrier_conflicts_with_resident_carrier() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();
    reconciler
        .add_file("resident.sigil", carrier_for(&[b"A"]))
        .await
        .unwrap();

    let zip = archive::write_bundle(&[
        ("b.txt".to_string(), b"B".to_vec()),
        ("incoming.sigil".to_string(), carrier_for(&[b"B"])),
    ])
    .unwrap();

    let err = reconciler.ingest_archive(&zip).await.unwrap_err();
    assert!(matches!(err, sigil_core::SigilError::CarrierConflict { .. }));
    assert_eq!(
        reconciler.status().await,
        BundleStatus::MultipleSignatureCarriers
    );
}

#[tokio::test]
async fn test_archive_carrier_is_processed_last() {
    // Carrier sits first in the archive; the claim still sees both files.
    let zip = archive::write_bundle(&[
        ("signature.sigil".to_string(), carrier_for(&[b"A", b"B"])),
        ("a.txt".to_string(), b"A".to_vec()),
        ("b.txt".to_string(), b"B".to_vec()),
    ])
    .unwrap();

    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    let report = reconciler.ingest_archive(&zip).await.unwrap();

    assert_eq!(report.status, BundleStatus::Verified);
    assert_eq!(report.added.len(), 3);
    assert!(report.skipped.is_empty());
    // Carrier was deferred to the end of processing
    assert_eq!(report.added.last().unwrap(), "signature.sigil");
}

/// Flip one CRC byte in both the local and central headers of `name`,
/// so reading that entry's payload fails while the container and its
/// name listing stay valid.
fn corrupt_entry_crc(bytes: &mut [u8], name: &str) {
    // (signature, crc offset, name-length offset, name offset)
    let layouts: [(&[u8], usize, usize, usize); 2] = [
        (b"PK\x03\x04", 14, 26, 30), // local file header
        (b"PK\x01\x02", 16, 28, 46), // central directory header
    ];

    for (signature, crc_at, name_len_at, name_at) in layouts {
        for start in 0..bytes.len().saturating_sub(name_at) {
            if &bytes[start..start + 4] != signature {
                continue;
            }
            let name_len = u16::from_le_bytes([
                bytes[start + name_len_at],
                bytes[start + name_len_at + 1],
            ]) as usize;
            if bytes[start + name_at..].starts_with(name.as_bytes()) && name_len == name.len() {
                bytes[start + crc_at] ^= 0xFF;
            }
        }
    }
}

#[tokio::test]
async fn test_unreadable_archive_entry_skips_only_that_entry() {
    let mut zip = archive::write_bundle(&[
        ("a.txt".to_string(), b"A".to_vec()),
        ("b.txt".to_string(), b"B".to_vec()),
    ])
    .unwrap();
    corrupt_entry_crc(&mut zip, "a.txt");

    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    let report = reconciler.ingest_archive(&zip).await.unwrap();

    // The intact entry survives; the unreadable one is reported per file
    assert_eq!(report.added, vec!["b.txt"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "a.txt");
    assert_eq!(report.status, BundleStatus::NotChecked);

    let files = reconciler.files().await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "b.txt");
}

#[tokio::test]
async fn test_malformed_carrier_in_archive_skips_only_that_entry() {
    let zip = archive::write_bundle(&[
        ("a.txt".to_string(), b"A".to_vec()),
        ("broken.sigil".to_string(), b"not json".to_vec()),
    ])
    .unwrap();

    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    let report = reconciler.ingest_archive(&zip).await.unwrap();

    assert_eq!(report.added, vec!["a.txt"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "broken.sigil");
    assert_eq!(report.status, BundleStatus::NotChecked);
}

#[tokio::test]
async fn test_removing_carrier_resets_bundle() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();
    reconciler
        .add_file("signature.sigil", carrier_for(&[b"A"]))
        .await
        .unwrap();
    assert_eq!(reconciler.status().await, BundleStatus::Verified);

    let status = reconciler.remove_file("signature.sigil").await;

    assert_eq!(status, BundleStatus::NotChecked);
    assert!(reconciler.verified_contents().await.is_none());
    assert!(reconciler
        .files()
        .await
        .iter()
        .all(|f| f.verified.is_none()));
}

#[tokio::test]
async fn test_removing_regular_file_keeps_settled_status() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();
    reconciler.add_file("b.txt", b"B".to_vec()).await.unwrap();
    reconciler
        .add_file("signature.sigil", carrier_for(&[b"A", b"B"]))
        .await
        .unwrap();
    assert_eq!(reconciler.status().await, BundleStatus::Verified);

    let status = reconciler.remove_file("b.txt").await;
    assert_eq!(status, BundleStatus::Verified);
    assert!(reconciler.verified_contents().await.is_some());
}

#[tokio::test]
async fn test_conflict_clears_when_carrier_removed() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::authentic()));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();
    reconciler
        .add_file("one.sigil", carrier_for(&[b"A"]))
        .await
        .unwrap();
    reconciler
        .add_file("two.sigil", carrier_for(&[b"A"]))
        .await
        .unwrap_err();
    assert_eq!(
        reconciler.status().await,
        BundleStatus::MultipleSignatureCarriers
    );

    let status = reconciler.remove_file("one.sigil").await;
    assert_eq!(status, BundleStatus::NotChecked);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clear_during_validation_discards_result() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::slow(
        Duration::from_millis(200),
    )));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();

    let carrier = carrier_for(&[b"A"]);
    let in_flight = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.add_file("signature.sigil", carrier).await })
    };

    // Let the verification get in flight, then start over
    tokio::time::sleep(Duration::from_millis(50)).await;
    reconciler.clear().await;
    in_flight.await.unwrap().unwrap();

    // The slow verifier's Verified result must not resurrect the bundle
    assert_eq!(reconciler.status().await, BundleStatus::NotChecked);
    assert!(reconciler.verified_contents().await.is_none());
    assert!(reconciler.files().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transitions_queue_behind_in_flight_validation() {
    let reconciler = BundleReconciler::new(Arc::new(StubVerifier::slow(
        Duration::from_millis(100),
    )));
    reconciler.add_file("a.txt", b"A".to_vec()).await.unwrap();

    let carrier = carrier_for(&[b"A"]);
    let in_flight = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.add_file("signature.sigil", carrier).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    // Queued behind the in-flight check; applied only after it settles
    let status = reconciler.add_file("late.txt", b"L".to_vec()).await.unwrap();

    assert_eq!(in_flight.await.unwrap().unwrap(), BundleStatus::Verified);
    assert_eq!(status, BundleStatus::Verified);
    let files = reconciler.files().await;
    let late = files.iter().find(|f| f.name == "late.txt").unwrap();
    // Not part of the signed set
    assert_eq!(late.verified, Some(false));
}

#[tokio::test]
async fn test_end_to_end_with_real_ed25519_signatures() {
    let signing_key = SigningKey::from_bytes(&[42u8; 32]);
    let key_ref = format!(
        "ed25519:{}",
        hex::encode(signing_key.verifying_key().to_bytes())
    );

    let hashes = vec![hasher::hash_bytes(b"report"), hasher::hash_bytes(b"data")];
    let aggregate = hasher::aggregate(&hashes).unwrap();
    let raw_signature = format!(
        "0x{}",
        hex::encode(signing_key.sign(aggregate.as_bytes()).to_bytes())
    );
    let doc = SignedDocument {
        hashes,
        jws: envelope::encode(&key_ref, "Ed25519", &aggregate, &raw_signature),
        remark: None,
        credentials: None,
    };

    let reconciler = BundleReconciler::new(Arc::new(KeyringVerifier::default()));
    reconciler
        .add_file("report.pdf", b"report".to_vec())
        .await
        .unwrap();
    reconciler
        .add_file("data.csv", b"data".to_vec())
        .await
        .unwrap();
    let status = reconciler
        .add_file("signature.sigil", doc.to_bytes())
        .await
        .unwrap();

    assert_eq!(status, BundleStatus::Verified);
    assert_eq!(reconciler.verified_contents().await.unwrap().signer, key_ref);
}
