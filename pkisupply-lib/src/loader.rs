//! Certificate loading from PEM bundles and concatenated DER.

use crate::handle::X509Handle;
use crate::parser;
use crate::util;
use crate::PkiError;
use std::path::Path;
use tracing::{debug, warn};
use x509_parser::pem::Pem;

/// PEM labels that carry an X.509 certificate.
const CERTIFICATE_LABELS: &[&str] = &["CERTIFICATE", "TRUSTED CERTIFICATE", "X509 CERTIFICATE"];

/// Encoding of a certificate buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingFormat {
    Pem,
    Der,
}

impl EncodingFormat {
    /// PEM if the buffer starts with a `-----BEGIN` line, DER otherwise.
    pub fn detect(input: &[u8]) -> Self {
        if util::is_pem(input) {
            EncodingFormat::Pem
        } else {
            EncodingFormat::Der
        }
    }
}

/// Parse every certificate in `input`, in order.
///
/// All or nothing: a malformed PEM block or an undecodable certificate
/// fails the whole call. Non-certificate PEM blocks (keys, CRLs) are
/// skipped. An input with no certificates yields an empty vector.
pub fn load_certificates(
    input: &[u8],
    format: EncodingFormat,
) -> Result<Vec<X509Handle>, PkiError> {
    let certs = match format {
        EncodingFormat::Pem => load_pem(input),
        EncodingFormat::Der => load_der(input),
    }
    .inspect_err(|e| warn!(?format, error = %e, "rejected certificate input"))?;
    debug!(?format, count = certs.len(), "loaded certificates");
    Ok(certs)
}

/// Read `path` and parse it with [`load_certificates`].
pub fn load_certificates_from_file(
    path: impl AsRef<Path>,
    format: EncodingFormat,
) -> Result<Vec<X509Handle>, PkiError> {
    let input = std::fs::read(path.as_ref())?;
    load_certificates(&input, format)
}

fn load_pem(input: &[u8]) -> Result<Vec<X509Handle>, PkiError> {
    let mut certs = Vec::new();
    for (index, pem_result) in Pem::iter_from_buffer(input).enumerate() {
        let pem = pem_result
            .map_err(|e| PkiError::PemError(format!("block {}: {}", index, e)))?;
        if !CERTIFICATE_LABELS.contains(&pem.label.as_str()) {
            debug!(label = %pem.label, "skipping non-certificate PEM block");
            continue;
        }
        let cert = parser::parse_der_exact(&pem.contents).map_err(|e| {
            PkiError::ParseError(format!("certificate in PEM block {}: {}", index, e))
        })?;
        certs.push(cert);
    }
    Ok(certs)
}

fn load_der(input: &[u8]) -> Result<Vec<X509Handle>, PkiError> {
    let mut certs = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        let (cert, consumed) = parser::parse_der_prefix(rest).map_err(|e| {
            PkiError::DerError(format!(
                "certificate at offset {}: {}",
                input.len() - rest.len(),
                e
            ))
        })?;
        certs.push(cert);
        rest = rest.get(consumed..).unwrap_or_default();
    }
    Ok(certs)
}
