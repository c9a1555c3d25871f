//! Sigil engine library exports

pub mod archive;
pub mod bundle;
pub mod document;
pub mod envelope;
pub mod error;
pub mod hasher;
pub mod verifier;

pub use bundle::{BundleReconciler, BundleStatus};
pub use error::SigilError;
