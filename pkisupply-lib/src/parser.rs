//! Field extraction from DER-encoded certificates and public keys.

use crate::fields::{DateTime, DistinguishedName, PublicKeyInfo, BINARY_VALUE};
use crate::handle::X509Handle;
use crate::oid;
use crate::util;
use crate::PkiError;
use x509_parser::prelude::*;

/// Parse one DER certificate from the front of `input`.
///
/// Returns the handle and the number of bytes consumed so that callers can
/// walk a buffer of concatenated certificates.
pub(crate) fn parse_der_prefix(input: &[u8]) -> Result<(X509Handle, usize), PkiError> {
    if input.is_empty() {
        return Err(PkiError::DerError("empty input".into()));
    }
    let (remaining, x509) =
        X509Certificate::from_der(input).map_err(|e| PkiError::DerError(format!("{}", e)))?;

    // Keep only the certificate's own bytes, never trailing data.
    let cert_len = input.len() - remaining.len();
    let cert_der = input.get(..cert_len).unwrap_or(input);
    let handle = build_handle(&x509, cert_der)?;
    Ok((handle, cert_len))
}

/// Parse exactly one DER certificate; trailing bytes are an error.
pub(crate) fn parse_der_exact(input: &[u8]) -> Result<X509Handle, PkiError> {
    let (handle, consumed) = parse_der_prefix(input)?;
    if consumed != input.len() {
        return Err(PkiError::DerError(format!(
            "{} trailing bytes after certificate",
            input.len() - consumed
        )));
    }
    Ok(handle)
}

fn build_handle(x509: &X509Certificate, raw_der: &[u8]) -> Result<X509Handle, PkiError> {
    let tbs = &x509.tbs_certificate;

    let raw_version = tbs.version.0;
    if raw_version > 2 {
        return Err(PkiError::ParseError(format!(
            "unsupported X.509 version {} (expected v1, v2, or v3)",
            raw_version + 1
        )));
    }

    Ok(X509Handle {
        der: raw_der.to_vec(),
        subject: build_dn(&tbs.subject),
        issuer: build_dn(&tbs.issuer),
        subject_raw: tbs.subject.as_raw().to_vec(),
        issuer_raw: tbs.issuer.as_raw().to_vec(),
        serial: format_serial(tbs.raw_serial()),
        raw_serial: tbs.raw_serial().to_vec(),
        not_before: DateTime::from_timestamp(tbs.validity.not_before.timestamp()),
        not_after: DateTime::from_timestamp(tbs.validity.not_after.timestamp()),
        public_key: build_public_key_info(&tbs.subject_pki),
    })
}

/// Format a serial number as a colon-separated uppercase hex string,
/// stripping leading zero bytes but keeping at least one byte.
fn format_serial(raw: &[u8]) -> String {
    let stripped = match raw.iter().position(|&b| b != 0) {
        Some(pos) => raw.get(pos..).unwrap_or(raw),
        None => raw.get(raw.len().saturating_sub(1)..).unwrap_or(raw),
    };
    util::hex_colon_upper(stripped)
}

pub(crate) fn build_dn(name: &X509Name) -> DistinguishedName {
    let mut components = Vec::new();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            let key = util::oid_short_name(&attr.attr_type().to_id_string());
            let value = attr.as_str().unwrap_or(BINARY_VALUE).to_string();
            components.push((key, value));
        }
    }
    DistinguishedName { components }
}

/// Describe a DER-encoded SubjectPublicKeyInfo.
pub(crate) fn public_key_info_from_spki_der(spki_der: &[u8]) -> Result<PublicKeyInfo, PkiError> {
    let (_, spki) = SubjectPublicKeyInfo::from_der(spki_der)
        .map_err(|e| PkiError::DerError(format!("invalid SubjectPublicKeyInfo: {}", e)))?;
    Ok(build_public_key_info(&spki))
}

fn build_public_key_info(spki: &SubjectPublicKeyInfo) -> PublicKeyInfo {
    let oid_str = spki.algorithm.algorithm.to_id_string();

    let (algorithm, key_size, curve) = match oid_str.as_str() {
        oid::RSA_ENCRYPTION => (
            "RSA".to_string(),
            rsa_modulus_bits(&spki.subject_public_key.data),
            None,
        ),
        oid::EC_PUBLIC_KEY => {
            let curve_name = extract_ec_curve(&spki.algorithm);
            let key_size = match curve_name.as_str() {
                "P-256" => Some(256),
                "P-384" => Some(384),
                "P-521" => Some(521),
                _ => None,
            };
            ("EC".to_string(), key_size, Some(curve_name))
        }
        oid::ED25519 => ("Ed25519".to_string(), Some(256), None),
        oid::ED448 => ("Ed448".to_string(), Some(448), None),
        _ => (oid_str, None, None),
    };

    PublicKeyInfo {
        algorithm,
        key_size,
        curve,
        spki_der: spki.raw.to_vec(),
    }
}

/// Modulus size of an RSAPublicKey, or `None` if the DER cannot be parsed.
fn rsa_modulus_bits(data: &[u8]) -> Option<u32> {
    let (_, parsed) = x509_parser::der_parser::parse_der(data).ok()?;
    let seq = parsed.as_sequence().ok()?;
    let bigint = seq.first().and_then(|m| m.as_bigint().ok())?;
    let bytes = bigint.to_bytes_be().1;
    // Skip leading zero byte used for DER positive integer encoding
    let significant = match bytes.split_first() {
        Some((&0, rest)) if !rest.is_empty() => rest,
        _ => &bytes,
    };
    Some((significant.len() as u32) * 8)
}

fn extract_ec_curve(algo: &AlgorithmIdentifier) -> String {
    if let Some(params) = &algo.parameters {
        if let Ok(oid) = params.as_oid() {
            return match oid.to_id_string().as_str() {
                oid::CURVE_P256 => "P-256".into(),
                oid::CURVE_P384 => "P-384".into(),
                oid::CURVE_P521 => "P-521".into(),
                other => other.to_string(),
            };
        }
    }
    "unknown".into()
}

/// Algorithm-aware identity of a public key: algorithm OID, curve OID for
/// EC keys, and the raw subjectPublicKey bits.
///
/// RSA parameters are ignored (absent vs. NULL encodings are equivalent).
pub(crate) fn spki_identity(spki_der: &[u8]) -> Option<(String, Option<String>, Vec<u8>)> {
    let (_, spki) = SubjectPublicKeyInfo::from_der(spki_der).ok()?;
    let alg = spki.algorithm.algorithm.to_id_string();
    let params = if alg == oid::EC_PUBLIC_KEY {
        spki.algorithm
            .parameters
            .as_ref()
            .and_then(|p| p.as_oid().ok())
            .map(|o| o.to_id_string())
    } else {
        None
    };
    Some((alg, params, spki.subject_public_key.data.to_vec()))
}
