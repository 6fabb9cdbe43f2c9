//! Certificate fingerprint (digest) computation.

use crate::fields::DigestAlgorithm;
use sha2::Digest;

/// Compute the fingerprint of DER-encoded certificate bytes.
///
/// Returns a colon-separated uppercase hex string (e.g., "AB:CD:EF:...").
pub fn compute_fingerprint(der_bytes: &[u8], algorithm: DigestAlgorithm) -> String {
    let hash_bytes: Vec<u8> = match algorithm {
        DigestAlgorithm::Sha256 => sha2::Sha256::digest(der_bytes).to_vec(),
        DigestAlgorithm::Sha384 => sha2::Sha384::digest(der_bytes).to_vec(),
        DigestAlgorithm::Sha512 => sha2::Sha512::digest(der_bytes).to_vec(),
    };

    crate::util::hex_colon_upper(&hash_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        let fp = compute_fingerprint(b"", DigestAlgorithm::Sha256);
        assert!(fp.starts_with("E3:B0:C4:42"));
        assert_eq!(fp.split(':').count(), 32);
    }

    #[test]
    fn digest_lengths() {
        assert_eq!(compute_fingerprint(b"x", DigestAlgorithm::Sha384).split(':').count(), 48);
        assert_eq!(compute_fingerprint(b"x", DigestAlgorithm::Sha512).split(':').count(), 64);
    }
}
