//! Test PKI built on the fly with rcgen.
//!
//! Every test gets fresh keys, so nothing here depends on checked-in
//! fixtures or on the clock beyond rcgen's default validity window.

#![allow(dead_code)]

use pkisupply_lib::X509Handle;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateRevocationListParams, DnType,
    IsCa, KeyIdMethod, KeyPair, RevocationReason, RevokedCertParams, SerialNumber,
};
use std::io::Write;
use time::{Duration, OffsetDateTime};

/// A certificate together with the key that signs on its behalf.
pub struct Issued {
    pub handle: X509Handle,
    pub cert: Certificate,
    pub key: KeyPair,
}

impl Issued {
    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    /// Write the certificate as PEM into a temporary file.
    pub fn to_temp_file(&self) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(self.pem().as_bytes()).unwrap();
        file
    }

    /// DER CRL signed by this certificate's key listing `serials`.
    pub fn crl(&self, serials: &[u64]) -> Vec<u8> {
        let now = OffsetDateTime::now_utc();
        let params = CertificateRevocationListParams {
            this_update: now - Duration::hours(1),
            next_update: now + Duration::days(1),
            crl_number: serial_number(1),
            issuing_distribution_point: None,
            revoked_certs: serials
                .iter()
                .map(|serial| RevokedCertParams {
                    serial_number: serial_number(*serial),
                    revocation_time: now - Duration::hours(1),
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        params
            .signed_by(&self.cert, &self.key)
            .unwrap()
            .der()
            .to_vec()
    }
}

pub fn ca_params(cn: &str) -> CertificateParams {
    let mut params = end_entity_params(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

pub fn end_entity_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    params
}

/// Minimal positive DER integer content for `value`.
pub fn serial_number(value: u64) -> SerialNumber {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut content = bytes[start..].to_vec();
    if content[0] & 0x80 != 0 {
        content.insert(0, 0);
    }
    SerialNumber::from_slice(&content)
}

pub fn with_serial(mut params: CertificateParams, serial: u64) -> CertificateParams {
    params.serial_number = Some(serial_number(serial));
    params
}

pub fn self_signed(params: CertificateParams) -> Issued {
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Issued {
        handle: X509Handle::from_der(cert.der()).unwrap(),
        cert,
        key,
    }
}

pub fn signed(params: CertificateParams, parent: &Issued) -> Issued {
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &parent.cert, &parent.key).unwrap();
    Issued {
        handle: X509Handle::from_der(cert.der()).unwrap(),
        cert,
        key,
    }
}

/// Root, sub-CA and leaf, the shape of a charging-point PKI.
pub struct Pki {
    pub root: Issued,
    pub sub: Issued,
    pub leaf: Issued,
}

pub const LEAF_SERIAL: u64 = 0x4242;
pub const SUB_SERIAL: u64 = 0x0101;

impl Pki {
    pub fn new() -> Self {
        let root = self_signed(ca_params("V2G Root CA"));
        let sub = signed(with_serial(ca_params("CPO Sub-CA"), SUB_SERIAL), &root);
        let leaf = signed(
            with_serial(end_entity_params("EVSE 0042"), LEAF_SERIAL),
            &sub,
        );
        Pki { root, sub, leaf }
    }
}
