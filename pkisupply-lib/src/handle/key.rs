use crate::fields::PublicKeyInfo;
use crate::keygen::{Backend, KeyType};
use crate::PkiError;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

/// Reference to a private key that lives on a hardware token.
///
/// The token owns the secret; duplicating or dropping a reference never
/// touches key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenKeyRef {
    /// Name of the engine that created the key (e.g. "pkcs11").
    pub engine: String,
    /// PKCS#11 URI addressing the private key object.
    pub uri: String,
}

impl std::fmt::Display for TokenKeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.engine, self.uri)
    }
}

pub(crate) enum KeyMaterial {
    /// PKCS#8 DER, wiped when the handle is released.
    Software(Zeroizing<Vec<u8>>),
    Token(TokenKeyRef),
}

/// Exclusive owner of one private key.
///
/// Software keys are held as PKCS#8 bytes that are zeroized exactly once:
/// on [`KeyHandle::release`], or on drop for handles that are never
/// released explicitly (including early returns and unwinding).
pub struct KeyHandle {
    key_type: KeyType,
    material: KeyMaterial,
    public_key_der: Vec<u8>,
    released: bool,
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("KeyHandle");
        s.field("key_type", &self.key_type);
        match &self.material {
            KeyMaterial::Software(_) => s.field("material", &"<software, redacted>"),
            KeyMaterial::Token(r) => s.field("material", r),
        };
        s.finish()
    }
}

impl KeyHandle {
    pub(crate) fn new(key_type: KeyType, material: KeyMaterial, public_key_der: Vec<u8>) -> Self {
        KeyHandle {
            key_type,
            material,
            public_key_der,
            released: false,
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Backend that owns the key material.
    pub fn backend(&self) -> Backend {
        match self.material {
            KeyMaterial::Software(_) => Backend::Software,
            KeyMaterial::Token(_) => Backend::HardwareToken,
        }
    }

    /// DER-encoded SubjectPublicKeyInfo of the public component.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// PEM-encoded SubjectPublicKeyInfo of the public component.
    pub fn public_key_pem(&self) -> String {
        crate::util::pem_encode("PUBLIC KEY", &self.public_key_der)
    }

    /// Parsed description of the public component.
    pub fn public_key(&self) -> Result<PublicKeyInfo, PkiError> {
        crate::parser::public_key_info_from_spki_der(&self.public_key_der)
    }

    /// Token reference, for hardware keys.
    pub fn token_ref(&self) -> Option<&TokenKeyRef> {
        match &self.material {
            KeyMaterial::Token(r) => Some(r),
            KeyMaterial::Software(_) => None,
        }
    }

    /// Run `f` with the PKCS#8 DER of a software key.
    ///
    /// The bytes are only reachable inside the closure. Hardware keys fail
    /// with [`PkiError::InvalidRequest`]: their secret never leaves the token.
    pub fn with_private_key<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, PkiError> {
        match &self.material {
            KeyMaterial::Software(bytes) => Ok(f(bytes)),
            KeyMaterial::Token(r) => Err(PkiError::InvalidRequest(format!(
                "private key {} is held by the token and cannot be exported",
                r
            ))),
        }
    }

    /// Duplicate a hardware key reference.
    ///
    /// Software handles are exclusive owners of their bytes and cannot be
    /// duplicated.
    pub fn try_duplicate(&self) -> Result<KeyHandle, PkiError> {
        match &self.material {
            KeyMaterial::Token(r) => Ok(KeyHandle::new(
                self.key_type,
                KeyMaterial::Token(r.clone()),
                self.public_key_der.clone(),
            )),
            KeyMaterial::Software(_) => Err(PkiError::InvalidRequest(
                "software key handles cannot be duplicated".into(),
            )),
        }
    }

    /// Release the handle, wiping software key bytes.
    pub fn release(mut self) {
        self.wipe();
    }

    fn wipe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match &mut self.material {
            KeyMaterial::Software(bytes) => {
                bytes.zeroize();
                debug!(key_type = ?self.key_type, "software key material wiped");
            }
            KeyMaterial::Token(r) => {
                debug!(key = %r, "token key reference released");
            }
        }
    }
}

impl Drop for KeyHandle {
    fn drop(&mut self) {
        self.wipe();
    }
}
