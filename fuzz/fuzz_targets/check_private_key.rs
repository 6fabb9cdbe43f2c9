#![no_main]

use libfuzzer_sys::fuzz_target;
use pkisupply_lib::{check_private_key, X509Handle};
use std::sync::OnceLock;

// A fixed P-256 certificate; only the key bytes vary.
const CERT_PEM: &[u8] = include_bytes!("../corpus_cert.pem");

fn cert() -> Option<&'static X509Handle> {
    static CERT: OnceLock<Option<X509Handle>> = OnceLock::new();
    CERT.get_or_init(|| {
        pkisupply_lib::load_certificates(CERT_PEM, pkisupply_lib::EncodingFormat::Pem)
            .ok()
            .and_then(|certs| certs.into_iter().next())
    })
    .as_ref()
}

fuzz_target!(|data: &[u8]| {
    // Key parsing must never panic, regardless of input.
    if let Some(cert) = cert() {
        let _ = check_private_key(cert, data, None);
        let _ = check_private_key(cert, data, Some("fuzz"));
    }
});
