//! pkisupply-lib: cryptographic backend abstraction and certificate trust engine.
//!
//! Unifies an in-process software engine and a PKCS#11 hardware-token engine
//! behind one API for key generation, certificate loading, key/certificate
//! binding checks, and certificate chain verification against a single,
//! explicitly designated trust anchor.

pub mod backend;
mod binding;
pub mod config;
mod display;
mod fields;
mod fingerprint;
mod handle;
mod keygen;
mod loader;
mod oid;
mod parser;
mod util;
pub mod verify;

pub use backend::{BackendContext, EngineLoader, TokenEngine, TokenKey, TokenKeySpec};
pub use binding::{check_key_handle, check_private_key, KeyValidationResult};
pub use config::BackendConfig;
pub use display::{display_text, report_to_json};
pub use fields::{DateTime, DigestAlgorithm, DistinguishedName, PublicKeyInfo};
pub use fingerprint::compute_fingerprint;
pub use handle::{KeyHandle, TokenKeyRef, X509Handle};
pub use keygen::{
    generate_key, generate_key_with, Backend, KeyGenerationInfo, KeyType, TokenSlot,
};
pub use loader::{load_certificates, load_certificates_from_file, EncodingFormat};
pub use verify::{
    verify_chain, verify_chain_with_options, CertificateValidationResult, ChainCertInfo,
    OcspEntry, OcspInfo, OcspStatus, RevocationData, TrustStore, VerificationReport,
    VerifyOptions,
};

/// Errors returned by pkisupply-lib.
///
/// Expected validation outcomes (untrusted chain, key mismatch) are returned
/// as [`CertificateValidationResult`] / [`KeyValidationResult`] values; this
/// type is reserved for inputs that cannot be processed at all.
#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid PEM format: {0}")]
    PemError(String),

    #[error("Invalid DER format: {0}")]
    DerError(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Hardware backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Certificate chain validation failed: {0}")]
    ChainValidationFailure(CertificateValidationResult),

    #[error("Private key does not bind to certificate: {0}")]
    KeyBindingFailure(KeyValidationResult),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
