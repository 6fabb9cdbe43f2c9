//! Certificate chain verification against a single trust anchor.
//!
//! Builds every path from a leaf through caller-supplied candidates,
//! classifies each path, and reports the best one. Only the anchor named
//! by the caller is trusted; no system store is consulted, so the outcome
//! depends on the inputs and the verification time alone.

mod chain;
mod checks;
mod crl;
mod helpers;
mod ocsp;
mod trust_store;

use crate::handle::X509Handle;
use crate::PkiError;
use serde::Serialize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use x509_parser::prelude::*;

use chain::{build_paths, ChainPath};
pub(crate) use chain::MAX_CHAIN_DEPTH;

use checks::{
    check_chain_basic_constraints, check_chain_critical_extensions, check_chain_key_cert_sign,
    check_chain_revocation, check_chain_signatures, check_chain_time_validity,
};

pub use crl::{parse_pem_crl, RevocationData};
pub use ocsp::{OcspEntry, OcspInfo, OcspStatus};
pub use trust_store::TrustStore;

use helpers::short_name;

/// Classification of a chain verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CertificateValidationResult {
    Valid,
    Expired,
    NotYetValid,
    UntrustedRoot,
    BrokenChain,
    Revoked,
    InvalidSignature,
    Unsupported,
}

impl CertificateValidationResult {
    pub fn is_valid(self) -> bool {
        self == CertificateValidationResult::Valid
    }

    /// `Ok(())` for `Valid`, otherwise [`PkiError::ChainValidationFailure`].
    pub fn into_result(self) -> Result<(), PkiError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(PkiError::ChainValidationFailure(self))
        }
    }
}

impl std::fmt::Display for CertificateValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CertificateValidationResult::Valid => "valid",
            CertificateValidationResult::Expired => "certificate has expired",
            CertificateValidationResult::NotYetValid => "certificate is not yet valid",
            CertificateValidationResult::UntrustedRoot => "path does not end at the trust anchor",
            CertificateValidationResult::BrokenChain => "no usable issuer path",
            CertificateValidationResult::Revoked => "certificate has been revoked",
            CertificateValidationResult::InvalidSignature => "signature verification failed",
            CertificateValidationResult::Unsupported => "unsupported algorithm or extension",
        };
        f.write_str(s)
    }
}

/// Information about a certificate in the evaluated path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainCertInfo {
    /// Position in the path (0 = leaf).
    pub depth: usize,
    /// Subject distinguished name.
    pub subject: String,
    /// Issuer distinguished name.
    pub issuer: String,
    /// Short human-readable name derived from CN, O, or OU.
    pub short_name: String,
    /// Serial number as colon-separated hex.
    pub serial: String,
    /// This certificate is the trust anchor.
    pub trust_anchor: bool,
}

/// Options controlling verification behavior.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Accept a path that ends at an anchor which is not self-issued
    /// (an intermediate designated as anchor). Matches OpenSSL's
    /// `-partial_chain` flag.
    pub allow_partial_chain: bool,
    /// Pre-fetched CRLs.
    pub revocation: Option<RevocationData>,
    /// Pre-fetched OCSP statuses.
    pub ocsp: Option<OcspInfo>,
    /// Verify at a specific Unix timestamp instead of the current time.
    pub at_time: Option<i64>,
    /// Maximum number of issuers above the leaf. Defaults to 32.
    pub max_depth: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            allow_partial_chain: false,
            revocation: None,
            ocsp: None,
            at_time: None,
            max_depth: MAX_CHAIN_DEPTH,
        }
    }
}

/// Outcome of [`verify_chain_with_options`].
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub result: CertificateValidationResult,
    /// The evaluated path, leaf first.
    pub path: Vec<ChainCertInfo>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.result.is_valid()
    }
}

impl std::fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Format: [short_name], [serial], [OK/FAIL], [optional reason]
        if let Some(leaf) = self.path.first() {
            write!(f, "{}, {}, ", leaf.short_name, leaf.serial)?;
        }
        if self.result.is_valid() {
            write!(f, "OK")
        } else {
            write!(f, "FAIL, {}", self.result)
        }
    }
}

/// Verify `leaf` against the single anchor stored at `trust_anchor_path`.
///
/// `candidates` are untrusted intermediates in preference order. An
/// unreadable or unparsable anchor file yields `UntrustedRoot` unless
/// `allow_partial_chain` is set, in which case only paths ending at a
/// supplied candidate can verify.
pub fn verify_chain(
    leaf: &X509Handle,
    candidates: &[&X509Handle],
    revocation: Option<&RevocationData>,
    allow_partial_chain: bool,
    ocsp: Option<&OcspInfo>,
    trust_anchor_path: impl AsRef<Path>,
) -> CertificateValidationResult {
    let path = trust_anchor_path.as_ref();
    let trust_store = match TrustStore::from_anchor_file(path) {
        Ok(store) => store,
        Err(e) if allow_partial_chain => {
            warn!(
                anchor = %path.display(),
                error = %e,
                "cannot load trust anchor, only partial chains can verify"
            );
            TrustStore::empty()
        }
        Err(e) => {
            warn!(anchor = %path.display(), error = %e, "cannot load trust anchor");
            return CertificateValidationResult::UntrustedRoot;
        }
    };
    let options = VerifyOptions {
        allow_partial_chain,
        revocation: revocation.cloned(),
        ocsp: ocsp.cloned(),
        ..VerifyOptions::default()
    };
    verify_chain_with_options(leaf, candidates, &trust_store, &options).result
}

/// Verify `leaf` against `trust_store` with configurable options.
///
/// Anchored paths are evaluated before open ones; the first `Valid` path
/// wins, otherwise the first path's classification is reported.
pub fn verify_chain_with_options(
    leaf: &X509Handle,
    candidates: &[&X509Handle],
    trust_store: &TrustStore,
    options: &VerifyOptions,
) -> VerificationReport {
    let now_ts = options.at_time.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    });

    let paths = build_paths(leaf, candidates, trust_store, options.max_depth);

    let mut first: Option<(CertificateValidationResult, &ChainPath)> = None;
    for path in &paths {
        let result = classify(path, options, now_ts);
        debug!(
            length = path.certs.len(),
            anchored = path.anchored,
            %result,
            "classified path"
        );
        if result.is_valid() {
            return report(result, path);
        }
        first.get_or_insert((result, path));
    }

    match first {
        Some((result, path)) => report(result, path),
        None => VerificationReport {
            result: CertificateValidationResult::BrokenChain,
            path: Vec::new(),
        },
    }
}

fn classify(path: &ChainPath, options: &VerifyOptions, now_ts: i64) -> CertificateValidationResult {
    let certs = path.certs.as_slice();
    let parsed = match certs
        .iter()
        .map(|c| c.parsed())
        .collect::<Result<Vec<X509Certificate>, _>>()
    {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "failed to re-parse certificate on path");
            return CertificateValidationResult::BrokenChain;
        }
    };

    if path.depth_exceeded {
        debug!(max_depth = options.max_depth, "certificate chain exceeds maximum depth");
        return CertificateValidationResult::BrokenChain;
    }
    if !path.anchored && certs.len() == 1 && !leaf_is_self_issued(certs) {
        debug!("no issuer for the leaf among the inputs");
        return CertificateValidationResult::BrokenChain;
    }

    let structural = check_chain_basic_constraints(&parsed, certs)
        .or_else(|| check_chain_key_cert_sign(&parsed, certs))
        .or_else(|| check_chain_critical_extensions(&parsed, certs));
    if let Some(result) = structural {
        return result;
    }

    if !path.anchored {
        // A partial chain ends at a supplied issuer instead of the anchor.
        if !options.allow_partial_chain || certs.len() < 2 {
            return CertificateValidationResult::UntrustedRoot;
        }
        debug!(top = ?path.top().map(|c| c.subject().to_oneline()), "evaluating partial chain");
        return check_chain_time_validity(certs, now_ts)
            .or_else(|| check_chain_revocation(&parsed, certs, options, now_ts))
            .or_else(|| check_chain_signatures(&parsed, certs))
            .unwrap_or(CertificateValidationResult::Valid);
    }
    let anchor_self_issued = path.top().is_some_and(X509Handle::is_self_issued);
    if !anchor_self_issued && !options.allow_partial_chain {
        debug!("trust anchor is not self-issued and partial chains are not allowed");
        return CertificateValidationResult::UntrustedRoot;
    }

    check_chain_time_validity(certs, now_ts)
        .or_else(|| check_chain_revocation(&parsed, certs, options, now_ts))
        .or_else(|| check_chain_signatures(&parsed, certs))
        .unwrap_or(CertificateValidationResult::Valid)
}

fn leaf_is_self_issued(certs: &[&X509Handle]) -> bool {
    certs.first().is_some_and(|c| c.is_self_issued())
}

fn report(result: CertificateValidationResult, path: &ChainPath) -> VerificationReport {
    let anchored = path.anchored;
    let last = path.certs.len().saturating_sub(1);
    let infos = path
        .certs
        .iter()
        .enumerate()
        .map(|(depth, cert)| ChainCertInfo {
            depth,
            subject: cert.subject().to_oneline(),
            issuer: cert.issuer().to_oneline(),
            short_name: short_name(cert.subject()),
            serial: cert.serial().to_string(),
            trust_anchor: anchored && depth == last,
        })
        .collect();
    VerificationReport {
        result,
        path: infos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{
        BasicConstraints, Certificate, CertificateParams, CustomExtension, DnType, IsCa,
        KeyPair, KeyUsagePurpose,
    };
    use std::io::Write;

    struct Issued {
        handle: X509Handle,
        cert: Certificate,
        key: KeyPair,
    }

    fn params(cn: &str, ca: bool) -> CertificateParams {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        if ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        params
    }

    fn self_signed(params: CertificateParams) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Issued {
            handle: X509Handle::from_der(cert.der()).unwrap(),
            cert,
            key,
        }
    }

    fn signed(params: CertificateParams, parent: &Issued) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &parent.cert, &parent.key).unwrap();
        Issued {
            handle: X509Handle::from_der(cert.der()).unwrap(),
            cert,
            key,
        }
    }

    fn pki() -> (Issued, Issued, Issued) {
        let root = self_signed(params("V2G Root CA", true));
        let sub = signed(params("CPO Sub-CA", true), &root);
        let leaf = signed(params("EVSE Leaf", false), &sub);
        (root, sub, leaf)
    }

    #[test]
    fn full_chain_is_valid() {
        let (root, sub, leaf) = pki();
        let store = TrustStore::with_anchor(root.handle.clone());
        let report =
            verify_chain_with_options(&leaf.handle, &[&sub.handle], &store, &Default::default());
        assert_eq!(report.result, CertificateValidationResult::Valid);
        assert_eq!(report.path.len(), 3);
        assert!(report.path.last().unwrap().trust_anchor);
        assert_eq!(report.path.first().unwrap().short_name, "EVSE Leaf");
        assert!(report.to_string().ends_with("OK"));
    }

    #[test]
    fn missing_intermediate_is_broken_chain() {
        let (root, _sub, leaf) = pki();
        let store = TrustStore::with_anchor(root.handle.clone());
        let report = verify_chain_with_options(&leaf.handle, &[], &store, &Default::default());
        assert_eq!(report.result, CertificateValidationResult::BrokenChain);
        assert!(report.result.into_result().is_err());
    }

    #[test]
    fn foreign_root_is_untrusted_without_partial_chain() {
        let (_root, sub, leaf) = pki();
        let other = self_signed(params("Other Root", true));
        let store = TrustStore::with_anchor(other.handle.clone());
        let report =
            verify_chain_with_options(&leaf.handle, &[&sub.handle], &store, &Default::default());
        assert_eq!(report.result, CertificateValidationResult::UntrustedRoot);
    }

    #[test]
    fn partial_chain_ends_at_supplied_intermediate() {
        let (_root, sub, leaf) = pki();
        let other = self_signed(params("Other Root", true));
        let options = VerifyOptions {
            allow_partial_chain: true,
            ..Default::default()
        };
        for store in [TrustStore::with_anchor(other.handle.clone()), TrustStore::empty()] {
            let report = verify_chain_with_options(&leaf.handle, &[&sub.handle], &store, &options);
            assert_eq!(report.result, CertificateValidationResult::Valid);
            assert_eq!(report.path.len(), 2);
            assert!(report.path.iter().all(|c| !c.trust_anchor));
        }
    }

    #[test]
    fn partial_chain_still_checks_links() {
        let (_root, sub, leaf) = pki();
        let options = VerifyOptions {
            allow_partial_chain: true,
            ..Default::default()
        };
        let store = TrustStore::empty();

        // Same name as the real issuer, different key.
        let forged_sub = self_signed(params("CPO Sub-CA", true));
        let report =
            verify_chain_with_options(&leaf.handle, &[&forged_sub.handle], &store, &options);
        assert_eq!(report.result, CertificateValidationResult::InvalidSignature);

        // The leaf alone is never a partial chain.
        let alone = verify_chain_with_options(&leaf.handle, &[], &store, &options);
        assert_eq!(alone.result, CertificateValidationResult::BrokenChain);

        let expired = VerifyOptions {
            at_time: Some(leaf.handle.not_after().timestamp + 1),
            ..options
        };
        let report = verify_chain_with_options(&leaf.handle, &[&sub.handle], &store, &expired);
        assert_eq!(report.result, CertificateValidationResult::Expired);
    }

    #[test]
    fn intermediate_anchor_requires_partial_chain() {
        let (_root, sub, leaf) = pki();
        let store = TrustStore::with_anchor(sub.handle.clone());

        let strict = verify_chain_with_options(&leaf.handle, &[], &store, &Default::default());
        assert_eq!(strict.result, CertificateValidationResult::UntrustedRoot);

        let options = VerifyOptions {
            allow_partial_chain: true,
            ..Default::default()
        };
        let partial = verify_chain_with_options(&leaf.handle, &[], &store, &options);
        assert_eq!(partial.result, CertificateValidationResult::Valid);
    }

    #[test]
    fn end_entity_issuer_is_broken_chain() {
        let root = self_signed(params("V2G Root CA", true));
        let not_ca = signed(params("Not A CA", false), &root);
        let leaf = signed(params("EVSE Leaf", false), &not_ca);
        let store = TrustStore::with_anchor(root.handle.clone());
        let report =
            verify_chain_with_options(&leaf.handle, &[&not_ca.handle], &store, &Default::default());
        assert_eq!(report.result, CertificateValidationResult::BrokenChain);
    }

    #[test]
    fn issuer_without_key_cert_sign_is_broken_chain() {
        let root = self_signed(params("V2G Root CA", true));
        let mut sub_params = params("CPO Sub-CA", true);
        sub_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        let sub = signed(sub_params, &root);
        let leaf = signed(params("EVSE Leaf", false), &sub);
        let store = TrustStore::with_anchor(root.handle.clone());
        let report =
            verify_chain_with_options(&leaf.handle, &[&sub.handle], &store, &Default::default());
        assert_eq!(report.result, CertificateValidationResult::BrokenChain);
    }

    #[test]
    fn unknown_critical_extension_is_unsupported() {
        let (root, sub, _leaf) = pki();
        let mut leaf_params = params("EVSE Leaf", false);
        let mut ext = CustomExtension::from_oid_content(&[1, 3, 6, 1, 4, 1, 99999, 1], vec![5, 0]);
        ext.set_criticality(true);
        leaf_params.custom_extensions = vec![ext];
        let leaf = signed(leaf_params, &sub);
        let store = TrustStore::with_anchor(root.handle.clone());
        let report =
            verify_chain_with_options(&leaf.handle, &[&sub.handle], &store, &Default::default());
        assert_eq!(report.result, CertificateValidationResult::Unsupported);
    }

    #[test]
    fn validity_window_is_checked_at_verification_time() {
        let (root, sub, leaf) = pki();
        let store = TrustStore::with_anchor(root.handle.clone());
        let after = VerifyOptions {
            at_time: Some(leaf.handle.not_after().timestamp + 1),
            ..Default::default()
        };
        let before = VerifyOptions {
            at_time: Some(leaf.handle.not_before().timestamp - 1),
            ..Default::default()
        };
        assert_eq!(
            verify_chain_with_options(&leaf.handle, &[&sub.handle], &store, &after).result,
            CertificateValidationResult::Expired
        );
        assert_eq!(
            verify_chain_with_options(&leaf.handle, &[&sub.handle], &store, &before).result,
            CertificateValidationResult::NotYetValid
        );
    }

    #[test]
    fn ocsp_revocation_is_reported() {
        let (root, sub, leaf) = pki();
        let store = TrustStore::with_anchor(root.handle.clone());
        let options = VerifyOptions {
            ocsp: Some(
                std::iter::once(OcspEntry::for_certificate(
                    &sub.handle,
                    OcspStatus::Revoked,
                    None,
                ))
                .collect(),
            ),
            ..Default::default()
        };
        let report = verify_chain_with_options(&leaf.handle, &[&sub.handle], &store, &options);
        assert_eq!(report.result, CertificateValidationResult::Revoked);
    }

    #[test]
    fn anchored_path_is_preferred_over_open_one() {
        let (root, sub, leaf) = pki();
        // Same subject as the real sub-CA, different key, no path to the root.
        let decoy = self_signed(params("CPO Sub-CA", true));
        let store = TrustStore::with_anchor(root.handle.clone());
        let report = verify_chain_with_options(
            &leaf.handle,
            &[&decoy.handle, &sub.handle],
            &store,
            &Default::default(),
        );
        assert_eq!(report.result, CertificateValidationResult::Valid);
    }

    #[test]
    fn leaf_equal_to_anchor_is_valid() {
        let root = self_signed(params("V2G Root CA", true));
        let store = TrustStore::with_anchor(root.handle.clone());
        let report = verify_chain_with_options(&root.handle, &[], &store, &Default::default());
        assert_eq!(report.result, CertificateValidationResult::Valid);
        assert_eq!(report.path.len(), 1);
    }

    #[test]
    fn unreadable_anchor_file_is_untrusted() {
        let (_root, sub, leaf) = pki();
        let result = verify_chain(
            &leaf.handle,
            &[&sub.handle],
            None,
            false,
            None,
            "/nonexistent/root_cert.pem",
        );
        assert_eq!(result, CertificateValidationResult::UntrustedRoot);

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        garbage.write_all(b"not a certificate").unwrap();
        let result = verify_chain(&leaf.handle, &[&sub.handle], None, false, None, garbage.path());
        assert_eq!(result, CertificateValidationResult::UntrustedRoot);
    }

    #[test]
    fn anchor_file_round_trip() {
        let (root, sub, leaf) = pki();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(root.handle.to_pem().as_bytes()).unwrap();
        let result = verify_chain(&leaf.handle, &[&sub.handle], None, true, None, file.path());
        assert_eq!(result, CertificateValidationResult::Valid);
    }
}
