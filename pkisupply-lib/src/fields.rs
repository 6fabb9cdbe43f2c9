//! Certificate field types shared by handles, reports and display.

use serde::Serialize;

/// Digest algorithm for fingerprint computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

/// Placeholder for attribute values that are not strings.
pub(crate) const BINARY_VALUE: &str = "<binary>";

/// Distinguished name with ordered components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistinguishedName {
    /// Ordered list of (attribute_type, value) pairs.
    /// Attribute types use short names where known (e.g., "CN", "O", "C").
    pub components: Vec<(String, String)>,
}

impl DistinguishedName {
    /// Format as a comma-separated one-line string matching OpenSSL's default format.
    /// Example: "C = US, O = Org, CN = example.com"
    ///
    /// Values containing commas, equals signs, or backslashes are escaped
    /// to prevent ambiguous output.
    pub fn to_oneline(&self) -> String {
        let mut result = String::new();
        for (i, (k, v)) in self.components.iter().enumerate() {
            if i > 0 {
                result.push_str(", ");
            }
            result.push_str(k);
            result.push_str(" = ");
            for ch in v.chars() {
                match ch {
                    '\\' => result.push_str("\\\\"),
                    ',' => result.push_str("\\,"),
                    '=' => result.push_str("\\="),
                    _ => result.push(ch),
                }
            }
        }
        result
    }

    /// Name equality after RFC 5280 section 7.1 style normalization:
    /// attribute types must agree in order, values compare case-folded
    /// with whitespace compressed, and the string encoding is ignored.
    /// Non-string values never match.
    pub fn matches(&self, other: &DistinguishedName) -> bool {
        self.components.len() == other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|((ka, va), (kb, vb))| {
                    ka == kb
                        && va != BINARY_VALUE
                        && vb != BINARY_VALUE
                        && fold_value(va) == fold_value(vb)
                })
    }

    /// First value of the given short-name attribute (e.g. "CN").
    pub fn get(&self, short_name: &str) -> Option<&str> {
        self.components
            .iter()
            .find(|(k, _)| k == short_name)
            .map(|(_, v)| v.as_str())
    }
}

fn fold_value(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl std::fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_oneline())
    }
}

/// Public key information extracted from a SubjectPublicKeyInfo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicKeyInfo {
    /// Algorithm name: "RSA", "EC", "Ed25519", etc.
    pub algorithm: String,
    /// Key size in bits (e.g., 2048 for RSA, 256 for P-256).
    pub key_size: Option<u32>,
    /// Named curve for EC keys (e.g., "P-256", "P-384").
    pub curve: Option<String>,
    /// DER-encoded SubjectPublicKeyInfo, exactly as embedded in the source.
    #[serde(skip)]
    pub spki_der: Vec<u8>,
}

impl PublicKeyInfo {
    /// PEM-encoded SubjectPublicKeyInfo.
    pub fn to_pem(&self) -> String {
        crate::util::pem_encode("PUBLIC KEY", &self.spki_der)
    }
}

/// Date-time representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateTime {
    /// ISO 8601 formatted string.
    pub iso8601: String,
    /// Unix timestamp.
    pub timestamp: i64,
}

impl DateTime {
    /// Build from a Unix timestamp, formatting as `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn from_timestamp(ts: i64) -> Self {
        let iso = match ::time::OffsetDateTime::from_unix_timestamp(ts) {
            Ok(dt) => format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
                dt.year(),
                u8::from(dt.month()),
                dt.day(),
                dt.hour(),
                dt.minute(),
                dt.second()
            ),
            Err(_) => format!("{}", ts),
        };
        DateTime {
            iso8601: iso,
            timestamp: ts,
        }
    }

    /// Format in OpenSSL's default date style: `Feb  3 23:57:06 2026 GMT`.
    pub fn to_openssl(&self) -> String {
        match ::time::OffsetDateTime::from_unix_timestamp(self.timestamp) {
            Ok(dt) => {
                let month = match u8::from(dt.month()) {
                    1 => "Jan",
                    2 => "Feb",
                    3 => "Mar",
                    4 => "Apr",
                    5 => "May",
                    6 => "Jun",
                    7 => "Jul",
                    8 => "Aug",
                    9 => "Sep",
                    10 => "Oct",
                    11 => "Nov",
                    12 => "Dec",
                    _ => "???",
                };
                format!(
                    "{} {:2} {:02}:{:02}:{:02} {} GMT",
                    month,
                    dt.day(),
                    dt.hour(),
                    dt.minute(),
                    dt.second(),
                    dt.year()
                )
            }
            Err(_) => self.iso8601.clone(),
        }
    }
}

impl std::fmt::Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_openssl())
    }
}
