//! CRL-based certificate revocation checking.
//!
//! CRLs are consumed pre-fetched; nothing here touches the network.

use crate::PkiError;
use x509_parser::prelude::*;
use x509_parser::revocation_list::CertificateRevocationList;

/// Pre-fetched certificate revocation lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationData {
    crls: Vec<Vec<u8>>,
}

impl RevocationData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap DER-encoded CRLs. They are validated lazily: a CRL that does
    /// not parse, is out of date or is not signed by the issuer is ignored.
    pub fn from_der(crls: Vec<Vec<u8>>) -> Self {
        RevocationData { crls }
    }

    /// Collect every `X509 CRL` block of a PEM bundle.
    pub fn from_pem(input: &[u8]) -> Result<Self, PkiError> {
        Ok(RevocationData {
            crls: parse_pem_crl(input)?,
        })
    }

    pub fn add_der(&mut self, der: Vec<u8>) {
        self.crls.push(der);
    }

    pub fn len(&self) -> usize {
        self.crls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crls.is_empty()
    }

    pub(crate) fn crls(&self) -> &[Vec<u8>] {
        &self.crls
    }
}

/// Parse a PEM-encoded CRL file into DER-encoded CRL data.
pub fn parse_pem_crl(input: &[u8]) -> Result<Vec<Vec<u8>>, PkiError> {
    let mut crls = Vec::new();
    for pem_result in Pem::iter_from_buffer(input) {
        match pem_result {
            Ok(pem) => {
                if pem.label == "X509 CRL" {
                    crls.push(pem.contents);
                }
            }
            Err(e) => {
                return Err(PkiError::PemError(format!(
                    "failed to parse CRL PEM: {}",
                    e
                )));
            }
        }
    }
    if crls.is_empty() {
        return Err(PkiError::PemError("no CRLs found in PEM input".into()));
    }
    Ok(crls)
}

/// Format a CRL revocation reason code as an RFC 5280-style string.
pub(crate) fn format_crl_reason(rc: &x509_parser::x509::ReasonCode) -> &'static str {
    match rc.0 {
        0 => "unspecified",
        1 => "keyCompromise",
        2 => "cACompromise",
        3 => "affiliationChanged",
        4 => "superseded",
        5 => "cessationOfOperation",
        6 => "certificateHold",
        // 7 is unused per RFC 5280
        8 => "removeFromCRL",
        9 => "privilegeWithdrawn",
        10 => "aACompromise",
        _ => "unspecified",
    }
}

/// Check whether `cert` is listed by one of `crl_ders`.
///
/// Only CRLs that name the certificate's issuer, are current at `now_ts`
/// and carry a valid signature from `issuer_cert` are consulted.
///
/// Returns `Some(reason)` if revoked, `None` if not revoked.
pub(crate) fn check_crl_revocation(
    cert: &X509Certificate,
    crl_ders: &[Vec<u8>],
    issuer_cert: &X509Certificate,
    now_ts: i64,
) -> Option<String> {
    let serial = cert.raw_serial();

    for crl_der in crl_ders {
        let (_, crl) = match CertificateRevocationList::from_der(crl_der) {
            Ok(c) => c,
            Err(_) => continue,
        };

        if crl.issuer() != cert.issuer() {
            continue;
        }

        // RFC 5280 Section 6.3.3: Check CRL validity dates
        if now_ts < crl.last_update().timestamp() {
            continue;
        }
        if let Some(next_update) = crl.next_update() {
            if now_ts > next_update.timestamp() {
                continue;
            }
        }

        if crl.verify_signature(issuer_cert.public_key()).is_err() {
            continue;
        }

        for revoked in crl.iter_revoked_certificates() {
            if revoked.raw_serial() == serial {
                let reason = revoked
                    .reason_code()
                    .map(|rc| format_crl_reason(&rc.1))
                    .unwrap_or("unspecified");
                return Some(reason.to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pem_without_crls_is_an_error() {
        assert!(matches!(
            RevocationData::from_pem(b""),
            Err(PkiError::PemError(_))
        ));
    }

    #[test]
    fn reason_codes() {
        use x509_parser::x509::ReasonCode;
        assert_eq!(format_crl_reason(&ReasonCode(1)), "keyCompromise");
        assert_eq!(format_crl_reason(&ReasonCode(7)), "unspecified");
    }

    #[test]
    fn der_crls_are_kept_in_order() {
        let mut data = RevocationData::from_der(vec![vec![1], vec![2]]);
        data.add_der(vec![3]);
        assert_eq!(data.len(), 3);
        assert_eq!(data.crls().last(), Some(&vec![3]));
    }
}
