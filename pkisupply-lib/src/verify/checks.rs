//! Individual verification check functions.
//!
//! Each check inspects one aspect of a candidate path (leaf first) and
//! returns the classification of the first offending certificate, or
//! `None` when the aspect is sound. `parsed` and `path` have the same
//! length and order.

use super::crl::check_crl_revocation;
use super::helpers::is_known_extension;
use super::{CertificateValidationResult, OcspStatus, VerifyOptions};
use crate::handle::X509Handle;
use tracing::debug;
use x509_parser::error::X509Error;
use x509_parser::prelude::*;

/// Outcome of checking one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignatureStatus {
    Valid,
    Invalid,
    Unsupported,
}

/// Whether `child` carries a valid signature under `issuer`'s key.
pub(crate) fn signature_status(child: &X509Handle, issuer: &X509Handle) -> SignatureStatus {
    let (Ok(child), Ok(issuer)) = (child.parsed(), issuer.parsed()) else {
        return SignatureStatus::Invalid;
    };
    signature_status_parsed(&child, &issuer)
}

fn signature_status_parsed(child: &X509Certificate, issuer: &X509Certificate) -> SignatureStatus {
    match child.verify_signature(Some(issuer.public_key())) {
        Ok(()) => SignatureStatus::Valid,
        Err(X509Error::SignatureUnsupportedAlgorithm) => SignatureStatus::Unsupported,
        Err(_) => SignatureStatus::Invalid,
    }
}

fn subject_of(path: &[&X509Handle], i: usize) -> String {
    path.get(i)
        .map(|c| c.subject().to_oneline())
        .unwrap_or_default()
}

/// Check BasicConstraints for CA certificates (all except leaf at depth 0).
pub(crate) fn check_chain_basic_constraints(
    parsed: &[X509Certificate],
    path: &[&X509Handle],
) -> Option<CertificateValidationResult> {
    for (i, x509) in parsed.iter().enumerate().skip(1) {
        let bc = x509.basic_constraints().ok().flatten().map(|bc| bc.value);
        match bc {
            Some(constraints) => {
                if !constraints.ca {
                    debug!(
                        "certificate at depth {} ({}) is not a CA but is used as issuer",
                        i,
                        subject_of(path, i)
                    );
                    return Some(CertificateValidationResult::BrokenChain);
                }
                if let Some(pathlen) = constraints.path_len_constraint {
                    // RFC 5280 Section 6.1.4(h): self-issued intermediates
                    // do not count toward pathLenConstraint.
                    let intermediates_below = path
                        .iter()
                        .skip(1)
                        .take(i.saturating_sub(1))
                        .filter(|c| !c.is_self_issued())
                        .count() as u32;
                    if intermediates_below > pathlen {
                        debug!(
                            "certificate at depth {} ({}) path length constraint violated \
                             (pathlen={}, intermediates below={})",
                            i,
                            subject_of(path, i),
                            pathlen,
                            intermediates_below
                        );
                        return Some(CertificateValidationResult::BrokenChain);
                    }
                }
            }
            None => {
                if x509.version().0 >= 2 {
                    debug!(
                        "certificate at depth {} ({}) has no basicConstraints but is used as issuer",
                        i,
                        subject_of(path, i)
                    );
                    return Some(CertificateValidationResult::BrokenChain);
                }
            }
        }
    }
    None
}

/// RFC 5280 Section 4.2.1.3: CA certificates must have keyCertSign.
pub(crate) fn check_chain_key_cert_sign(
    parsed: &[X509Certificate],
    path: &[&X509Handle],
) -> Option<CertificateValidationResult> {
    for (i, x509) in parsed.iter().enumerate().skip(1) {
        if let Ok(Some(ku)) = x509.key_usage() {
            if !ku.value.key_cert_sign() {
                debug!(
                    "certificate at depth {} ({}) is a CA but Key Usage does not \
                     include keyCertSign",
                    i,
                    subject_of(path, i)
                );
                return Some(CertificateValidationResult::BrokenChain);
            }
        }
    }
    None
}

/// RFC 5280 Section 4.2: Reject certificates with unknown critical extensions.
pub(crate) fn check_chain_critical_extensions(
    parsed: &[X509Certificate],
    path: &[&X509Handle],
) -> Option<CertificateValidationResult> {
    for (i, x509) in parsed.iter().enumerate() {
        for ext in x509.extensions() {
            if ext.critical && !is_known_extension(ext.oid.to_id_string().as_str()) {
                debug!(
                    "certificate at depth {} ({}) has unrecognized critical extension {}",
                    i,
                    subject_of(path, i),
                    ext.oid
                );
                return Some(CertificateValidationResult::Unsupported);
            }
        }
    }
    None
}

/// Check validity dates; the first certificate outside its window decides.
pub(crate) fn check_chain_time_validity(
    path: &[&X509Handle],
    now_ts: i64,
) -> Option<CertificateValidationResult> {
    for (i, cert) in path.iter().enumerate() {
        if now_ts < cert.not_before().timestamp {
            debug!(
                "certificate at depth {} ({}) is not yet valid",
                i,
                cert.subject()
            );
            return Some(CertificateValidationResult::NotYetValid);
        }
        if now_ts > cert.not_after().timestamp {
            debug!("certificate at depth {} ({}) has expired", i, cert.subject());
            return Some(CertificateValidationResult::Expired);
        }
    }
    None
}

/// CRL and OCSP revocation checks for every certificate on the path.
///
/// A certificate's CRL issuer is the next certificate on the path, or the
/// certificate itself when it is self-issued. A non-self-issued top of the
/// path has no known issuer and is only checked against OCSP.
pub(crate) fn check_chain_revocation(
    parsed: &[X509Certificate],
    path: &[&X509Handle],
    options: &VerifyOptions,
    now_ts: i64,
) -> Option<CertificateValidationResult> {
    for (i, (x509, cert)) in parsed.iter().zip(path.iter()).enumerate() {
        if let Some(crls) = options.revocation.as_ref().filter(|r| !r.is_empty()) {
            let issuer = match parsed.get(i + 1) {
                Some(next) => Some(next),
                None if cert.is_self_issued() => Some(x509),
                None => None,
            };
            if let Some(issuer) = issuer {
                if let Some(reason) = check_crl_revocation(x509, crls.crls(), issuer, now_ts) {
                    debug!(
                        "certificate at depth {} ({}) has been revoked (reason: {})",
                        i,
                        cert.subject(),
                        reason
                    );
                    return Some(CertificateValidationResult::Revoked);
                }
            }
        }

        if let Some(ocsp) = &options.ocsp {
            if ocsp.status_of(cert, now_ts) == Some(OcspStatus::Revoked) {
                debug!(
                    "certificate at depth {} ({}) is revoked per OCSP",
                    i,
                    cert.subject()
                );
                return Some(CertificateValidationResult::Revoked);
            }
        }
    }
    None
}

/// Verify signatures along the path (each cert signed by the next).
pub(crate) fn check_chain_signatures(
    parsed: &[X509Certificate],
    path: &[&X509Handle],
) -> Option<CertificateValidationResult> {
    for (i, (child, parent)) in parsed.iter().zip(parsed.iter().skip(1)).enumerate() {
        let status = signature_status_parsed(child, parent);
        if status != SignatureStatus::Valid {
            debug!(
                "signature verification failed ({} -> {}): {:?}",
                subject_of(path, i),
                subject_of(path, i + 1),
                status
            );
            return Some(match status {
                SignatureStatus::Unsupported => CertificateValidationResult::Unsupported,
                _ => CertificateValidationResult::InvalidSignature,
            });
        }
    }
    None
}
