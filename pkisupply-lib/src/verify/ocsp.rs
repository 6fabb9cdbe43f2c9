//! Pre-fetched OCSP statuses.
//!
//! Responses are fetched and validated by the caller; this module only
//! looks statuses up by issuer name and serial number.

use crate::handle::X509Handle;
use serde::Serialize;

/// Certificate status reported by an OCSP responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OcspStatus {
    Good,
    Revoked,
    Unknown,
}

/// One status, keyed by the certificate's raw issuer name and serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspEntry {
    /// DER-encoded issuer Name of the certificate.
    pub issuer: Vec<u8>,
    /// Serial number content bytes.
    pub serial: Vec<u8>,
    pub status: OcspStatus,
    /// Unix time after which the status is stale and ignored.
    pub next_update: Option<i64>,
}

impl OcspEntry {
    /// Entry addressing `cert`.
    pub fn for_certificate(cert: &X509Handle, status: OcspStatus, next_update: Option<i64>) -> Self {
        OcspEntry {
            issuer: cert.issuer_raw.clone(),
            serial: cert.raw_serial.clone(),
            status,
            next_update,
        }
    }

    fn is_current(&self, now_ts: i64) -> bool {
        self.next_update.map_or(true, |next| now_ts <= next)
    }
}

/// A set of OCSP statuses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcspInfo {
    entries: Vec<OcspEntry>,
}

impl OcspInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: OcspEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current status of `cert`, if a non-stale entry exists.
    ///
    /// `Revoked` wins over any other status recorded for the same
    /// certificate.
    pub fn status_of(&self, cert: &X509Handle, now_ts: i64) -> Option<OcspStatus> {
        let mut found = None;
        for entry in self.entries.iter().filter(|e| {
            e.issuer == cert.issuer_raw && e.serial == cert.raw_serial && e.is_current(now_ts)
        }) {
            if entry.status == OcspStatus::Revoked {
                return Some(OcspStatus::Revoked);
            }
            found.get_or_insert(entry.status);
        }
        found
    }
}

impl FromIterator<OcspEntry> for OcspInfo {
    fn from_iter<I: IntoIterator<Item = OcspEntry>>(iter: I) -> Self {
        OcspInfo {
            entries: iter.into_iter().collect(),
        }
    }
}
