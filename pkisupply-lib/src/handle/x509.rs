use crate::fields::{DateTime, DigestAlgorithm, DistinguishedName, PublicKeyInfo};
use crate::PkiError;
use x509_parser::prelude::*;

/// One parsed X.509 certificate.
///
/// The DER bytes are owned; frequently used fields are extracted once at
/// construction. Handles are immutable and safe to share across threads for
/// read-only use.
#[derive(Clone, PartialEq, Eq)]
pub struct X509Handle {
    pub(crate) der: Vec<u8>,
    pub(crate) subject: DistinguishedName,
    pub(crate) issuer: DistinguishedName,
    pub(crate) subject_raw: Vec<u8>,
    pub(crate) issuer_raw: Vec<u8>,
    pub(crate) serial: String,
    pub(crate) raw_serial: Vec<u8>,
    pub(crate) not_before: DateTime,
    pub(crate) not_after: DateTime,
    pub(crate) public_key: PublicKeyInfo,
}

impl std::fmt::Debug for X509Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X509Handle")
            .field("subject", &self.subject.to_oneline())
            .field("serial", &self.serial)
            .finish()
    }
}

impl X509Handle {
    /// Parse exactly one DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, PkiError> {
        crate::parser::parse_der_exact(der)
    }

    /// Subject distinguished name.
    pub fn subject(&self) -> &DistinguishedName {
        &self.subject
    }

    /// Issuer distinguished name.
    pub fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }

    /// Serial number as colon-separated hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_before(&self) -> &DateTime {
        &self.not_before
    }

    pub fn not_after(&self) -> &DateTime {
        &self.not_after
    }

    /// Embedded subject public key.
    pub fn public_key(&self) -> &PublicKeyInfo {
        &self.public_key
    }

    /// Serialized DER form.
    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    /// Serialized PEM form (`CERTIFICATE` block).
    pub fn to_pem(&self) -> String {
        crate::util::pem_encode("CERTIFICATE", &self.der)
    }

    pub fn fingerprint(&self, algorithm: DigestAlgorithm) -> String {
        crate::fingerprint::compute_fingerprint(&self.der, algorithm)
    }

    /// Subject and issuer names are byte-identical.
    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// Whether this certificate's issuer name is `issuer`'s subject name,
    /// either byte for byte or after normalization.
    pub(crate) fn names_as_issuer(&self, issuer: &X509Handle) -> bool {
        self.issuer_raw == issuer.subject_raw || self.issuer.matches(&issuer.subject)
    }

    /// Whether `timestamp` lies inside the validity window (inclusive).
    pub fn is_valid_at(&self, timestamp: i64) -> bool {
        self.not_before.timestamp <= timestamp && timestamp <= self.not_after.timestamp
    }

    /// Re-parse the owned DER into x509-parser's borrowed view.
    pub(crate) fn parsed(&self) -> Result<X509Certificate<'_>, PkiError> {
        X509Certificate::from_der(&self.der)
            .map(|(_, cert)| cert)
            .map_err(|e| PkiError::DerError(format!("{}", e)))
    }
}
