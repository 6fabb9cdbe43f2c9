//! Small helper functions for certificate verification.

use crate::fields::DistinguishedName;
use crate::oid;

/// Short human-readable identifier for a certificate subject.
///
/// Tries in order: CN, O, OU. Returns "Unknown" if none are present.
pub(crate) fn short_name(subject: &DistinguishedName) -> String {
    ["CN", "O", "OU"]
        .iter()
        .find_map(|attr| subject.get(attr))
        .unwrap_or("Unknown")
        .to_string()
}

/// Check if an extension OID is one we recognize.
///
/// RFC 5280 Section 4.2 requires that implementations reject certificates
/// containing unrecognized critical extensions. Name constraints are not
/// enforced here, so a critical one is treated as unrecognized.
pub(crate) fn is_known_extension(oid: &str) -> bool {
    matches!(
        oid,
        // RFC 5280 standard extensions
        oid::EXT_SUBJECT_KEY_ID
        | oid::EXT_KEY_USAGE
        | oid::EXT_SUBJECT_ALT_NAME
        | oid::EXT_ISSUER_ALT_NAME
        | oid::EXT_BASIC_CONSTRAINTS
        | oid::EXT_CRL_DISTRIBUTION_POINTS
        | oid::EXT_CERTIFICATE_POLICIES
        | oid::EXT_POLICY_MAPPINGS
        | oid::EXT_AUTHORITY_KEY_ID
        | oid::EXT_POLICY_CONSTRAINTS
        | oid::EXT_EXTENDED_KEY_USAGE
        | oid::EXT_FRESHEST_CRL
        | oid::EXT_INHIBIT_ANY_POLICY
        // Common extensions in practice
        | oid::EXT_AUTHORITY_INFO_ACCESS
        | oid::EXT_SUBJECT_INFO_ACCESS
        | oid::EXT_TLS_FEATURE
        | oid::EXT_SCT_LIST
    )
}
