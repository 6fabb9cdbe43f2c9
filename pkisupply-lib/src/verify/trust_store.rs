//! The single-anchor trust store.
//!
//! Verification trusts at most one certificate, named by the caller. No
//! system store is consulted, so results depend only on the inputs. An
//! empty store can only produce partial chains.

use crate::handle::X509Handle;
use crate::loader::{load_certificates, EncodingFormat};
use crate::PkiError;
use std::path::Path;
use tracing::debug;

/// A trust store holding at most one trust anchor.
#[derive(Clone, Default)]
pub struct TrustStore {
    anchor: Option<X509Handle>,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("anchor", &self.anchor.as_ref().map(|a| a.subject().to_oneline()))
            .finish()
    }
}

impl TrustStore {
    pub fn with_anchor(anchor: X509Handle) -> Self {
        TrustStore {
            anchor: Some(anchor),
        }
    }

    /// A store that trusts nothing.
    pub fn empty() -> Self {
        TrustStore::default()
    }

    /// Load the anchor from a PEM or DER file.
    ///
    /// The first certificate in the file is the anchor; any further
    /// certificates are ignored.
    pub fn from_anchor_file(path: &Path) -> Result<Self, PkiError> {
        let data = std::fs::read(path).map_err(|e| {
            PkiError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let certs = load_certificates(&data, EncodingFormat::detect(&data))?;
        let count = certs.len();
        let anchor = certs.into_iter().next().ok_or_else(|| {
            PkiError::ParseError(format!("{}: no certificate found", path.display()))
        })?;
        if count > 1 {
            debug!(
                path = %path.display(),
                ignored = count - 1,
                "anchor file holds more than one certificate"
            );
        }
        Ok(TrustStore::with_anchor(anchor))
    }

    pub fn anchor(&self) -> Option<&X509Handle> {
        self.anchor.as_ref()
    }

    /// Whether `cert` is byte-identical to the anchor.
    pub fn contains(&self, cert: &X509Handle) -> bool {
        self.anchor
            .as_ref()
            .is_some_and(|a| a.to_der() == cert.to_der())
    }
}
