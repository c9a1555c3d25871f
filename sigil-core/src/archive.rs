//! Zip container handling for file bundles
//!
//! Bundles travel as ordinary zip archives. Extraction works entirely
//! in memory and skips the entries no one signed: directory markers and
//! the `__MACOSX/` resource forks some zip producers add.

use std::io::{Cursor, Read, Write};

use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::SigilError;

/// Reserved metadata path prefix written by macOS archivers.
const MACOS_METADATA_PREFIX: &str = "__MACOSX/";

fn is_excluded(name: &str, is_dir: bool) -> bool {
    is_dir || name.starts_with(MACOS_METADATA_PREFIX)
}

/// Result of unpacking one archive.
///
/// An unreadable entry (truncated payload, CRC mismatch) lands in
/// `unreadable` with its failure reason; it never fails the entries
/// around it.
#[derive(Debug, Default)]
pub struct ExtractedArchive {
    /// Readable entries in archive directory order
    pub entries: Vec<(String, Vec<u8>)>,
    /// Entries whose payload could not be read, with the reason
    pub unreadable: Vec<(String, String)>,
}

/// Unpack an archive into named byte blobs, in archive directory order.
///
/// Only an invalid container is an error; per-entry read failures are
/// reported in [`ExtractedArchive::unreadable`].
pub fn extract(archive_bytes: &[u8]) -> Result<ExtractedArchive, SigilError> {
    let mut archive =
        ZipArchive::new(Cursor::new(archive_bytes)).map_err(|e| SigilError::Archive {
            reason: format!("not a valid zip container: {e}"),
        })?;

    let mut extracted = ExtractedArchive::default();
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Unreadable archive entry at index {}: {}", index, e);
                extracted
                    .unreadable
                    .push((format!("entry #{index}"), e.to_string()));
                continue;
            }
        };

        let name = entry.name().to_string();
        if is_excluded(&name, entry.is_dir()) {
            debug!("Skipping archive entry: {}", name);
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        match entry.read_to_end(&mut bytes) {
            Ok(_) => extracted.entries.push((name, bytes)),
            Err(e) => {
                warn!("Failed to read archive entry {}: {}", name, e);
                extracted.unreadable.push((name, e.to_string()));
            }
        }
    }

    debug!(
        "Extracted {} entries from archive ({} unreadable)",
        extracted.entries.len(),
        extracted.unreadable.len()
    );
    Ok(extracted)
}

/// List entry names without reading payloads.
///
/// Used to pre-screen an archive for signature carriers before committing
/// to a full extraction. Applies the same exclusions as [`extract`].
pub fn list_names(archive_bytes: &[u8]) -> Result<Vec<String>, SigilError> {
    let mut archive =
        ZipArchive::new(Cursor::new(archive_bytes)).map_err(|e| SigilError::Archive {
            reason: format!("not a valid zip container: {e}"),
        })?;

    let mut names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| SigilError::Archive {
                reason: format!("unreadable entry at index {index}: {e}"),
            })?;

        let name = entry.name().to_string();
        if !is_excluded(&name, entry.is_dir()) {
            names.push(name);
        }
    }

    Ok(names)
}

/// Pack named byte blobs into a zip archive.
///
/// This is the export side: the covered files plus the signature carrier,
/// bundled for distribution.
pub fn write_bundle(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, SigilError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    for (name, bytes) in entries {
        writer
            .start_file(name.as_str(), options)
            .and_then(|()| writer.write_all(bytes).map_err(Into::into))
            .map_err(|e| SigilError::Archive {
                reason: format!("failed to write entry {name}: {e}"),
            })?;
    }

    let cursor = writer.finish().map_err(|e| SigilError::Archive {
        reason: format!("failed to finalize archive: {e}"),
    })?;

    Ok(cursor.into_inner())
}
