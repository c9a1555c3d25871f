//! Sigil - identity-bound file signing and bundle verification
//!
//! Main entry point for the offline signing and verification workflow

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sigil_core::document::SignedDocument;
use sigil_core::verifier::keyring::SignerRegistry;
use sigil_core::verifier::KeyringVerifier;
use sigil_core::{archive, envelope, hasher, BundleReconciler, BundleStatus};

mod keyfile;

use keyfile::KeyFile;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "sigil",
    about = "Sign file sets and verify signature bundles offline",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,
}

#[derive(Parser, Debug)]
enum Command {
    /// Print the content hash of one or more files
    Hash {
        /// Files to hash
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },

    /// Generate a new Ed25519 signing key file
    Keygen {
        /// Where to write the key file
        #[clap(short, long, default_value = "signer-key.json")]
        out: PathBuf,
    },

    /// Sign a set of files, producing a signature carrier
    Sign {
        /// Files to cover with the signature
        #[clap(required = true)]
        files: Vec<PathBuf>,

        /// Signing key file (see `sigil keygen`)
        #[clap(long)]
        key: PathBuf,

        /// Where to write the signature carrier
        #[clap(short, long, default_value = "signature.sigil")]
        output: PathBuf,

        /// Also write a zip bundle holding the files plus the carrier
        #[clap(long)]
        bundle: Option<PathBuf>,
    },

    /// Verify files and signature carriers as one bundle
    Verify {
        /// Files and/or zip archives to reconcile
        #[clap(required = true)]
        paths: Vec<PathBuf>,

        /// Signer registry for resolving non-self-certifying key references
        #[clap(long)]
        registry: Option<PathBuf>,

        /// Exit non-zero unless the bundle verifies
        #[clap(long)]
        strict: bool,
    },

    /// Show the contents of a signature carrier without verifying
    Inspect {
        /// Signature carrier file
        carrier: PathBuf,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}

fn initialize_tracing(log_level: &LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    // Logs go to stderr; stdout carries command output only
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level);

    match cli.command {
        Command::Hash { files } => hash_command(files),
        Command::Keygen { out } => keygen_command(out),
        Command::Sign {
            files,
            key,
            output,
            bundle,
        } => sign_command(files, key, output, bundle),
        Command::Verify {
            paths,
            registry,
            strict,
        } => verify_command(paths, registry, strict).await,
        Command::Inspect { carrier, json } => inspect_command(carrier, json),
    }
}

fn read_named(path: &Path) -> Result<(String, Vec<u8>)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))?
        .to_string();
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok((name, bytes))
}

fn hash_command(files: Vec<PathBuf>) -> Result<()> {
    let mut hashes = Vec::new();

    for path in &files {
        let (name, bytes) = read_named(path)?;
        let hash = hasher::hash_bytes(&bytes);
        println!("{hash}  {name}");
        hashes.push(hash);
    }

    if hashes.len() > 1 {
        let aggregate = hasher::aggregate(&hashes)?;
        println!("{aggregate}  (aggregate)");
    }

    Ok(())
}

fn keygen_command(out: PathBuf) -> Result<()> {
    if out.exists() {
        anyhow::bail!(
            "Refusing to overwrite existing key file: {}",
            out.display()
        );
    }

    let key = KeyFile::generate();
    key.save(&out)?;

    println!("✅ Wrote signing key to {}", out.display());
    println!("   Key reference: {}", key.key_ref);
    Ok(())
}

fn sign_command(
    files: Vec<PathBuf>,
    key: PathBuf,
    output: PathBuf,
    bundle: Option<PathBuf>,
) -> Result<()> {
    let key = KeyFile::load(&key)?;

    let mut entries = Vec::new();
    let mut hashes = Vec::new();
    for path in &files {
        let (name, bytes) = read_named(path)?;
        hashes.push(hasher::hash_bytes(&bytes));
        entries.push((name, bytes));
    }

    let aggregate = hasher::aggregate(&hashes)?;
    debug!("Signing aggregate {aggregate} over {} files", files.len());

    let raw_signature = key.sign(&aggregate)?;
    let jws = envelope::encode(&key.key_ref, "Ed25519", &aggregate, &raw_signature);
    let document = SignedDocument {
        hashes,
        jws,
        remark: None,
        credentials: None,
    };

    let carrier_bytes = document.to_bytes();
    fs::write(&output, &carrier_bytes)
        .with_context(|| format!("Failed to write carrier: {}", output.display()))?;
    println!("✅ Signed {} files as {}", files.len(), key.key_ref);
    println!("   Carrier: {}", output.display());

    if let Some(bundle_path) = bundle {
        let carrier_name = output
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("signature.sigil")
            .to_string();
        entries.push((carrier_name, carrier_bytes));

        let zip_bytes = archive::write_bundle(&entries)?;
        fs::write(&bundle_path, zip_bytes)
            .with_context(|| format!("Failed to write bundle: {}", bundle_path.display()))?;
        println!("   Bundle:  {}", bundle_path.display());
    }

    Ok(())
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

async fn verify_command(
    paths: Vec<PathBuf>,
    registry: Option<PathBuf>,
    strict: bool,
) -> Result<()> {
    let registry = match registry {
        Some(path) => SignerRegistry::load(&path)?,
        None => SignerRegistry::default(),
    };
    let reconciler = BundleReconciler::new(Arc::new(KeyringVerifier::new(registry)));

    for path in &paths {
        if is_zip(path) {
            info!("Ingesting archive {}", path.display());
            let bytes = fs::read(path)
                .with_context(|| format!("Failed to read archive: {}", path.display()))?;
            let report = reconciler
                .ingest_archive(&bytes)
                .await
                .with_context(|| format!("Archive rejected: {}", path.display()))?;
            for (name, reason) in &report.skipped {
                eprintln!("⚠ Skipped {name}: {reason}");
            }
        } else {
            let (name, bytes) = read_named(path)?;
            reconciler
                .add_file(&name, bytes)
                .await
                .with_context(|| format!("File rejected: {}", path.display()))?;
        }
    }

    let status = reconciler.status().await;

    for file in reconciler.files().await {
        let marker = match file.verified {
            Some(true) => "✅",
            Some(false) => "❌",
            None => "·",
        };
        println!("{marker} {}  {}", file.content_hash, file.name);
    }

    println!("\nBundle status: {status}");

    match status {
        BundleStatus::Verified => {
            if let Some(contents) = reconciler.verified_contents().await {
                println!("Signed by: {}", contents.signer);
                if let Some(alias) = &contents.alias {
                    println!("Alias:     {alias}");
                }
                for endpoint in &contents.endpoints {
                    println!("Endpoint:  {} ({})", endpoint.urls.join(", "), endpoint.id);
                }
                if let Some(timestamp) = &contents.timestamp {
                    println!("Signed at: {}", timestamp.time);
                }
            }
        }
        _ => {
            if let Some(cause) = reconciler.last_failure().await {
                eprintln!("\n{cause}");
            }
            if strict {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn inspect_command(carrier: PathBuf, json: bool) -> Result<()> {
    let bytes = fs::read(&carrier)
        .with_context(|| format!("Failed to read carrier: {}", carrier.display()))?;
    let document = SignedDocument::from_bytes(&bytes)?;
    let decoded = envelope::decode(&document.jws)?;

    if json {
        let output = serde_json::json!({
            "keyRef": decoded.key_ref,
            "algorithm": decoded.algorithm,
            "claimedHash": hasher::normalize(&decoded.claimed_hash),
            "fileHashes": document.hashes,
            "remark": document.remark,
            "credentials": document.credentials,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Carrier: {}", carrier.display());
        println!("  Key reference:  {}", decoded.key_ref);
        println!("  Algorithm:      {}", decoded.algorithm);
        println!(
            "  Claimed hash:   {}",
            hasher::normalize(&decoded.claimed_hash)
        );
        println!("  Covered files:  {}", document.hashes.len());
        for hash in &document.hashes {
            println!("    {}", hasher::normalize(hash));
        }
        if let Some(remark) = &document.remark {
            println!("  Remark tx:      {}", remark.tx_hash);
            println!("  Remark block:   {}", remark.block_hash);
        }
        if document.credentials.is_some() {
            println!("  Credentials:    attached");
        }
    }

    Ok(())
}
