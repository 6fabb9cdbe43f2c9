#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! End-to-end chain verification against freshly generated PKIs.

mod common;

use common::*;
use pkisupply_lib::*;
use rcgen::BasicConstraints;

fn verify(
    pki_leaf: &X509Handle,
    candidates: &[&X509Handle],
    anchor: &Issued,
    options: &VerifyOptions,
) -> CertificateValidationResult {
    let store = TrustStore::with_anchor(anchor.handle.clone());
    verify_chain_with_options(pki_leaf, candidates, &store, options).result
}

// ---------------------------------------------------------------------------
// verify_chain (anchor file)
// ---------------------------------------------------------------------------

#[test]
fn correct_chain_with_partial_chain_is_valid() {
    let pki = Pki::new();
    let anchor = pki.root.to_temp_file();
    let result = verify_chain(
        &pki.leaf.handle,
        &[&pki.sub.handle],
        None,
        true,
        None,
        anchor.path(),
    );
    assert_eq!(result, CertificateValidationResult::Valid);
}

#[test]
fn correct_chain_without_partial_chain_is_valid() {
    let pki = Pki::new();
    let anchor = pki.root.to_temp_file();
    let result = verify_chain(
        &pki.leaf.handle,
        &[&pki.sub.handle],
        None,
        false,
        None,
        anchor.path(),
    );
    assert_eq!(result, CertificateValidationResult::Valid);
}

#[test]
fn unrelated_intermediate_is_never_valid() {
    let pki = Pki::new();
    let stranger = self_signed(ca_params("Somebody Else CA"));
    let anchor = pki.root.to_temp_file();
    for partial in [false, true] {
        let result = verify_chain(
            &pki.leaf.handle,
            &[&stranger.handle],
            None,
            partial,
            None,
            anchor.path(),
        );
        assert_eq!(result, CertificateValidationResult::BrokenChain);
    }
}

#[test]
fn mismatched_anchor_is_never_valid() {
    let pki = Pki::new();
    let other = Pki::new();
    let anchor = other.root.to_temp_file();
    let result = verify_chain(
        &pki.leaf.handle,
        &[&pki.sub.handle],
        None,
        false,
        None,
        anchor.path(),
    );
    assert_eq!(result, CertificateValidationResult::UntrustedRoot);
}

#[test]
fn partial_chain_accepts_supplied_intermediate() {
    let pki = Pki::new();
    let other = Pki::new();
    let anchor = other.root.to_temp_file();
    for anchor_path in [anchor.path(), std::path::Path::new("root_cert.pem.missing")] {
        let result = verify_chain(
            &pki.leaf.handle,
            &[&pki.sub.handle],
            None,
            true,
            None,
            anchor_path,
        );
        assert_eq!(result, CertificateValidationResult::Valid);
    }
}

#[test]
fn partial_chain_still_honours_revocation() {
    let pki = Pki::new();
    let crls = RevocationData::from_der(vec![pki.sub.crl(&[LEAF_SERIAL])]);
    let result = verify_chain(
        &pki.leaf.handle,
        &[&pki.sub.handle],
        Some(&crls),
        true,
        None,
        "root_cert.pem.missing",
    );
    assert_eq!(result, CertificateValidationResult::Revoked);
}

#[test]
fn unreachable_anchor_is_deterministic() {
    let pki = Pki::new();
    let results: Vec<_> = (0..3)
        .map(|_| {
            verify_chain(
                &pki.leaf.handle,
                &[&pki.sub.handle],
                None,
                false,
                None,
                "root_cert.pem.missing",
            )
        })
        .collect();
    assert!(results
        .iter()
        .all(|r| *r == CertificateValidationResult::UntrustedRoot));
}

#[test]
fn crl_revocation_through_anchor_file() {
    let pki = Pki::new();
    let anchor = pki.root.to_temp_file();
    let crls = RevocationData::from_der(vec![pki.sub.crl(&[LEAF_SERIAL])]);
    let result = verify_chain(
        &pki.leaf.handle,
        &[&pki.sub.handle],
        Some(&crls),
        false,
        None,
        anchor.path(),
    );
    assert_eq!(result, CertificateValidationResult::Revoked);
}

// ---------------------------------------------------------------------------
// Path building
// ---------------------------------------------------------------------------

#[test]
fn candidates_may_arrive_in_any_order() {
    let pki = Pki::new();
    let noise = self_signed(ca_params("Noise CA"));
    let result = verify(
        &pki.leaf.handle,
        &[&noise.handle, &pki.root.handle, &pki.sub.handle],
        &pki.root,
        &VerifyOptions::default(),
    );
    assert_eq!(result, CertificateValidationResult::Valid);
}

#[test]
fn report_describes_the_winning_path() {
    let pki = Pki::new();
    let store = TrustStore::with_anchor(pki.root.handle.clone());
    let report = verify_chain_with_options(
        &pki.leaf.handle,
        &[&pki.sub.handle],
        &store,
        &VerifyOptions::default(),
    );
    let names: Vec<_> = report.path.iter().map(|c| c.short_name.as_str()).collect();
    assert_eq!(names, ["EVSE 0042", "CPO Sub-CA", "V2G Root CA"]);
    assert_eq!(
        report.path.iter().filter(|c| c.trust_anchor).count(),
        1
    );
    let json = report_to_json(&report).unwrap();
    assert!(json.contains("\"Valid\""));
}

#[test]
fn depth_limit_breaks_long_chains() {
    let root = self_signed(ca_params("Root"));
    let a = signed(ca_params("Sub A"), &root);
    let b = signed(ca_params("Sub B"), &a);
    let leaf = signed(end_entity_params("Leaf"), &b);

    let shallow = VerifyOptions {
        max_depth: 2,
        ..Default::default()
    };
    assert_eq!(
        verify(&leaf.handle, &[&a.handle, &b.handle], &root, &shallow),
        CertificateValidationResult::BrokenChain
    );
    let deep = VerifyOptions {
        max_depth: 3,
        ..Default::default()
    };
    assert_eq!(
        verify(&leaf.handle, &[&a.handle, &b.handle], &root, &deep),
        CertificateValidationResult::Valid
    );
}

#[test]
fn path_length_constraint_is_enforced() {
    let root = self_signed(ca_params("Root"));
    let mut constrained = ca_params("Constrained Sub");
    constrained.is_ca = rcgen::IsCa::Ca(BasicConstraints::Constrained(0));
    let constrained = signed(constrained, &root);
    let below = signed(ca_params("Issuing Sub"), &constrained);
    let leaf = signed(end_entity_params("Leaf"), &below);

    assert_eq!(
        verify(
            &leaf.handle,
            &[&below.handle, &constrained.handle],
            &root,
            &VerifyOptions::default()
        ),
        CertificateValidationResult::BrokenChain
    );
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[test]
fn forged_leaf_signature_is_invalid() {
    let pki = Pki::new();
    // Same issuer name as the real sub-CA, but another key.
    let twin = self_signed(ca_params("CPO Sub-CA"));
    let forged = signed(end_entity_params("EVSE 0042"), &twin);
    assert_eq!(
        verify(
            &forged.handle,
            &[&pki.sub.handle],
            &pki.root,
            &VerifyOptions::default()
        ),
        CertificateValidationResult::InvalidSignature
    );
}

#[test]
fn expiry_is_judged_at_verification_time() {
    let pki = Pki::new();
    let later = VerifyOptions {
        at_time: Some(pki.leaf.handle.not_after().timestamp + 60),
        ..Default::default()
    };
    assert_eq!(
        verify(&pki.leaf.handle, &[&pki.sub.handle], &pki.root, &later),
        CertificateValidationResult::Expired
    );
}

#[test]
fn crl_from_another_key_is_ignored() {
    let pki = Pki::new();
    let twin = self_signed(ca_params("CPO Sub-CA"));
    let options = VerifyOptions {
        revocation: Some(RevocationData::from_der(vec![twin.crl(&[LEAF_SERIAL])])),
        ..Default::default()
    };
    assert_eq!(
        verify(&pki.leaf.handle, &[&pki.sub.handle], &pki.root, &options),
        CertificateValidationResult::Valid
    );
}

#[test]
fn revoked_intermediate_revokes_the_path() {
    let pki = Pki::new();
    let options = VerifyOptions {
        revocation: Some(RevocationData::from_der(vec![pki.root.crl(&[SUB_SERIAL])])),
        ..Default::default()
    };
    assert_eq!(
        verify(&pki.leaf.handle, &[&pki.sub.handle], &pki.root, &options),
        CertificateValidationResult::Revoked
    );
}

#[test]
fn ocsp_good_keeps_path_valid_and_revoked_fails_it() {
    let pki = Pki::new();
    let good = VerifyOptions {
        ocsp: Some(
            [OcspEntry::for_certificate(&pki.leaf.handle, OcspStatus::Good, None)]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    };
    assert_eq!(
        verify(&pki.leaf.handle, &[&pki.sub.handle], &pki.root, &good),
        CertificateValidationResult::Valid
    );

    let revoked = VerifyOptions {
        ocsp: Some(
            [OcspEntry::for_certificate(&pki.leaf.handle, OcspStatus::Revoked, None)]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    };
    assert_eq!(
        verify(&pki.leaf.handle, &[&pki.sub.handle], &pki.root, &revoked),
        CertificateValidationResult::Revoked
    );
}

#[test]
fn loaded_bundle_verifies_like_handles() {
    let pki = Pki::new();
    let bundle = format!("{}{}", pki.leaf.pem(), pki.sub.pem());
    let certs = load_certificates(bundle.as_bytes(), EncodingFormat::Pem).unwrap();
    let (leaf, rest) = certs.split_first().unwrap();
    let candidates: Vec<&X509Handle> = rest.iter().collect();
    assert_eq!(
        verify(leaf, &candidates, &pki.root, &VerifyOptions::default()),
        CertificateValidationResult::Valid
    );
}
