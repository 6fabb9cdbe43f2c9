#![no_main]

use libfuzzer_sys::fuzz_target;
use pkisupply_lib::{load_certificates, DigestAlgorithm, EncodingFormat};

fuzz_target!(|data: &[u8]| {
    // Loading must never panic, regardless of input or forced format.
    for format in [EncodingFormat::Pem, EncodingFormat::Der, EncodingFormat::detect(data)] {
        if let Ok(certs) = load_certificates(data, format) {
            // If loading succeeds, exercise the extracted fields
            for cert in &certs {
                let _ = cert.subject().to_oneline();
                let _ = cert.issuer().to_oneline();
                let _ = cert.is_self_issued();
                let _ = cert.fingerprint(DigestAlgorithm::Sha256);
                let _ = cert.public_key().to_pem();
                let _ = cert.to_pem();
                let _ = pkisupply_lib::display_text(cert);
            }
        }
    }
});
