//! Human-readable and JSON formatting of certificates and verification reports.

use crate::fields::DigestAlgorithm;
use crate::handle::X509Handle;
use crate::verify::VerificationReport;
use crate::PkiError;

/// Format the fields of a loaded certificate as human-readable text.
pub fn display_text(cert: &X509Handle) -> String {
    let mut out = String::new();

    out.push_str("Certificate:\n");
    out.push_str(&format!("  Serial: {}\n", cert.serial()));
    out.push_str(&format!("  Issuer: {}\n", cert.issuer()));
    out.push_str("  Validity:\n");
    out.push_str(&format!("    Not Before: {}\n", cert.not_before()));
    out.push_str(&format!("    Not After:  {}\n", cert.not_after()));
    out.push_str(&format!("  Subject: {}\n", cert.subject()));

    let key = cert.public_key();
    out.push_str("  Public Key:\n");
    out.push_str(&format!("    Algorithm: {}", key.algorithm));
    if let Some(bits) = key.key_size {
        out.push_str(&format!(" ({} bit)", bits));
    }
    if let Some(curve) = &key.curve {
        out.push_str(&format!(" [{}]", curve));
    }
    out.push('\n');

    out.push_str(&format!(
        "  Fingerprint (SHA-256): {}\n",
        cert.fingerprint(DigestAlgorithm::Sha256)
    ));

    out
}

/// Serialize a verification report to a pretty-printed JSON string.
pub fn report_to_json(report: &VerificationReport) -> Result<String, PkiError> {
    serde_json::to_string_pretty(report).map_err(PkiError::Json)
}
