//! Key generation across the software and hardware-token backends.
//!
//! Every [`KeyType`] maps to exactly one routine per backend. Dispatch is
//! keyed on the request's [`Backend`] selector, never on the handle.

use crate::backend::{BackendContext, TokenKeySpec};
use crate::handle::{KeyHandle, KeyMaterial, TokenKeyRef};
use crate::PkiError;
use pkcs8::der::pem::LineEnding;
use pkcs8::{EncodePrivateKey, EncodePublicKey};
use rand::rngs::OsRng;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Supported key algorithms and sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// NIST P-256.
    EcPrime256v1,
    /// NIST P-384.
    EcSecp384r1,
    /// RSA-2048, the size TPM 2.0 devices guarantee.
    RsaTpm20,
    Rsa3072,
    /// Software only.
    Rsa7680,
}

impl KeyType {
    pub const ALL: [KeyType; 5] = [
        KeyType::EcPrime256v1,
        KeyType::EcSecp384r1,
        KeyType::RsaTpm20,
        KeyType::Rsa3072,
        KeyType::Rsa7680,
    ];

    /// OpenSSL-style name, as accepted by [`str::parse`].
    pub fn name(&self) -> &'static str {
        match self {
            KeyType::EcPrime256v1 => "prime256v1",
            KeyType::EcSecp384r1 => "secp384r1",
            KeyType::RsaTpm20 => "rsa2048",
            KeyType::Rsa3072 => "rsa3072",
            KeyType::Rsa7680 => "rsa7680",
        }
    }

    fn rsa_bits(&self) -> Option<usize> {
        match self {
            KeyType::RsaTpm20 => Some(2048),
            KeyType::Rsa3072 => Some(3072),
            KeyType::Rsa7680 => Some(7680),
            KeyType::EcPrime256v1 | KeyType::EcSecp384r1 => None,
        }
    }

    /// Hardware routine for this key type, if the token path implements one.
    fn token_spec(&self) -> Option<TokenKeySpec> {
        match self {
            KeyType::EcPrime256v1 => Some(TokenKeySpec::EcP256),
            KeyType::EcSecp384r1 => Some(TokenKeySpec::EcP384),
            KeyType::RsaTpm20 => Some(TokenKeySpec::Rsa { bits: 2048 }),
            KeyType::Rsa3072 => Some(TokenKeySpec::Rsa { bits: 3072 }),
            KeyType::Rsa7680 => None,
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for KeyType {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prime256v1" | "p-256" | "p256" | "secp256r1" => Ok(KeyType::EcPrime256v1),
            "secp384r1" | "p-384" | "p384" => Ok(KeyType::EcSecp384r1),
            "rsa2048" | "rsa-2048" | "rsa_tpm20" => Ok(KeyType::RsaTpm20),
            "rsa3072" | "rsa-3072" => Ok(KeyType::Rsa3072),
            "rsa7680" | "rsa-7680" => Ok(KeyType::Rsa7680),
            other => Err(PkiError::UnsupportedAlgorithm(format!(
                "unknown key type '{}'",
                other
            ))),
        }
    }
}

/// Backend selector carried by a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Software,
    HardwareToken,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Software => f.write_str("software"),
            Backend::HardwareToken => f.write_str("hardware-token"),
        }
    }
}

pub const DEFAULT_TOKEN_LABEL: &str = "pkisupply";

/// Token slot and object label addressed by a hardware request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSlot {
    /// PKCS#11 slot ID. `None` selects the first slot with a token present.
    pub slot_id: Option<u64>,
    /// `CKA_LABEL` given to both halves of the generated key pair.
    pub label: String,
}

impl Default for TokenSlot {
    fn default() -> Self {
        TokenSlot {
            slot_id: None,
            label: DEFAULT_TOKEN_LABEL.to_string(),
        }
    }
}

impl TokenSlot {
    pub fn new(label: impl Into<String>) -> Self {
        TokenSlot {
            slot_id: None,
            label: label.into(),
        }
    }

    pub fn with_slot_id(mut self, slot_id: u64) -> Self {
        self.slot_id = Some(slot_id);
        self
    }

    /// RFC 7512 URI addressing the private key object.
    pub fn to_uri(&self) -> String {
        let mut uri = String::from("pkcs11:");
        if let Some(id) = self.slot_id {
            uri.push_str(&format!("slot-id={};", id));
        }
        uri.push_str("object=");
        uri.push_str(&percent_encode(&self.label));
        uri.push_str(";type=private");
        uri
    }

    /// Parse the path component of a PKCS#11 URI.
    ///
    /// Only `slot-id` and `object` are interpreted; other attributes are
    /// ignored. A query component is rejected.
    pub fn parse_uri(uri: &str) -> Result<Self, PkiError> {
        let path = uri
            .strip_prefix("pkcs11:")
            .ok_or_else(|| PkiError::InvalidRequest(format!("not a PKCS#11 URI: {}", uri)))?;
        if path.contains('?') {
            return Err(PkiError::InvalidRequest(
                "PKCS#11 URI query attributes are not supported".into(),
            ));
        }

        let mut slot = TokenSlot {
            slot_id: None,
            label: String::new(),
        };
        for attr in path.split(';').filter(|a| !a.is_empty()) {
            let (key, value) = attr.split_once('=').ok_or_else(|| {
                PkiError::InvalidRequest(format!("malformed PKCS#11 URI attribute '{}'", attr))
            })?;
            match key {
                "slot-id" => {
                    slot.slot_id = Some(value.parse().map_err(|_| {
                        PkiError::InvalidRequest(format!("invalid slot-id '{}'", value))
                    })?)
                }
                "object" => slot.label = percent_decode(value)?,
                _ => {}
            }
        }
        if slot.label.is_empty() {
            return Err(PkiError::InvalidRequest(
                "PKCS#11 URI has no object label".into(),
            ));
        }
        Ok(slot)
    }
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn percent_decode(s: &str) -> Result<String, PkiError> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while let Some(&b) = bytes.get(i) {
        if b == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| PkiError::InvalidRequest(format!("bad escape in '{}'", s)))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(b);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| PkiError::InvalidRequest(format!("label is not UTF-8: '{}'", s)))
}

/// A key generation request. Consumed by one [`generate_key`] call.
#[derive(Clone)]
pub struct KeyGenerationInfo {
    pub key_type: KeyType,
    pub backend: Backend,
    /// Where to write the public key (SPKI PEM).
    pub public_key_file: Option<PathBuf>,
    /// Where to write the private key (PKCS#8 PEM). Software only.
    pub private_key_file: Option<PathBuf>,
    /// Token slot for hardware requests. Defaults to [`TokenSlot::default`].
    pub token_slot: Option<TokenSlot>,
    /// Encrypts the private key file when set.
    pub passphrase: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for KeyGenerationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGenerationInfo")
            .field("key_type", &self.key_type)
            .field("backend", &self.backend)
            .field("public_key_file", &self.public_key_file)
            .field("private_key_file", &self.private_key_file)
            .field("token_slot", &self.token_slot)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl KeyGenerationInfo {
    pub fn software(key_type: KeyType) -> Self {
        KeyGenerationInfo {
            key_type,
            backend: Backend::Software,
            public_key_file: None,
            private_key_file: None,
            token_slot: None,
            passphrase: None,
        }
    }

    pub fn hardware(key_type: KeyType, slot: TokenSlot) -> Self {
        KeyGenerationInfo {
            key_type,
            backend: Backend::HardwareToken,
            public_key_file: None,
            private_key_file: None,
            token_slot: Some(slot),
            passphrase: None,
        }
    }

    pub fn with_public_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.public_key_file = Some(path.into());
        self
    }

    pub fn with_private_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_file = Some(path.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    /// Check that the backend selector agrees with the other fields.
    pub fn validate(&self) -> Result<(), PkiError> {
        match self.backend {
            Backend::Software => {
                if self.token_slot.is_some() {
                    return Err(PkiError::InvalidRequest(
                        "software request carries a token slot".into(),
                    ));
                }
            }
            Backend::HardwareToken => {
                if self.private_key_file.is_some() {
                    return Err(PkiError::InvalidRequest(
                        "hardware keys cannot be written to a private key file".into(),
                    ));
                }
                if self.passphrase.is_some() {
                    return Err(PkiError::InvalidRequest(
                        "hardware request carries a passphrase".into(),
                    ));
                }
            }
        }
        if self.passphrase.is_some() && self.private_key_file.is_none() {
            return Err(PkiError::InvalidRequest(
                "passphrase given without a private key file".into(),
            ));
        }
        Ok(())
    }
}

/// Generate a key using the process-wide [`BackendContext`].
pub fn generate_key(info: KeyGenerationInfo) -> Result<KeyHandle, PkiError> {
    generate_key_with(BackendContext::global(), info)
}

/// Generate a key, consulting `ctx` for hardware requests.
///
/// Either returns a fully populated handle with every requested output
/// file written, or fails leaving no file behind and no key material in
/// memory.
pub fn generate_key_with(
    ctx: &BackendContext,
    info: KeyGenerationInfo,
) -> Result<KeyHandle, PkiError> {
    info.validate()?;

    let handle = match info.backend {
        Backend::Software => {
            let handle = generate_software(info.key_type)?;
            write_outputs(&handle, &info)?;
            handle
        }
        Backend::HardwareToken => generate_on_token(ctx, &info)?,
    };

    info!(key_type = %info.key_type, backend = %info.backend, "generated key");
    Ok(handle)
}

/// Generate on the token. A failure after the pair exists removes it
/// again, so the token is left as it was found.
fn generate_on_token(
    ctx: &BackendContext,
    info: &KeyGenerationInfo,
) -> Result<KeyHandle, PkiError> {
    let spec = info.key_type.token_spec().ok_or_else(|| {
        PkiError::UnsupportedAlgorithm(format!(
            "{} has no hardware-token implementation",
            info.key_type
        ))
    })?;
    if !ctx.supports_hardware_backend() {
        return Err(PkiError::BackendUnavailable(
            "hardware-token backend is not available".into(),
        ));
    }
    let engine = ctx.engine()?;
    let slot = info.token_slot.clone().unwrap_or_default();
    let key = engine.generate_key_pair(spec, &slot)?;

    let finish = || -> Result<KeyHandle, PkiError> {
        crate::parser::public_key_info_from_spki_der(&key.public_key_der)?;
        let handle = KeyHandle::new(
            info.key_type,
            KeyMaterial::Token(TokenKeyRef {
                engine: engine.name().to_string(),
                uri: key.uri.clone(),
            }),
            key.public_key_der.clone(),
        );
        write_outputs(&handle, info)?;
        Ok(handle)
    };

    finish().inspect_err(|e| {
        warn!(uri = %key.uri, error = %e, "removing token key after failed generation");
        if let Err(destroy_err) = engine.destroy_key(&key) {
            warn!(uri = %key.uri, error = %destroy_err, "cannot remove token key");
        }
    })
}

fn generate_software(key_type: KeyType) -> Result<KeyHandle, PkiError> {
    let encode_err = |e: pkcs8::Error| PkiError::ParseError(format!("cannot encode key: {}", e));
    let spki_err = |e: pkcs8::spki::Error| PkiError::ParseError(format!("cannot encode key: {}", e));

    let (pkcs8_doc, spki_doc) = match key_type {
        KeyType::EcPrime256v1 => {
            let secret = p256::SecretKey::random(&mut OsRng);
            (
                secret.to_pkcs8_der().map_err(encode_err)?,
                secret.public_key().to_public_key_der().map_err(spki_err)?,
            )
        }
        KeyType::EcSecp384r1 => {
            let secret = p384::SecretKey::random(&mut OsRng);
            (
                secret.to_pkcs8_der().map_err(encode_err)?,
                secret.public_key().to_public_key_der().map_err(spki_err)?,
            )
        }
        KeyType::RsaTpm20 | KeyType::Rsa3072 | KeyType::Rsa7680 => {
            let bits = key_type.rsa_bits().unwrap_or(2048);
            let secret = rsa::RsaPrivateKey::new(&mut OsRng, bits)
                .map_err(|e| PkiError::UnsupportedAlgorithm(format!("RSA-{}: {}", bits, e)))?;
            (
                secret.to_pkcs8_der().map_err(encode_err)?,
                rsa::RsaPublicKey::from(&secret)
                    .to_public_key_der()
                    .map_err(spki_err)?,
            )
        }
    };

    Ok(KeyHandle::new(
        key_type,
        KeyMaterial::Software(Zeroizing::new(pkcs8_doc.as_bytes().to_vec())),
        spki_doc.as_bytes().to_vec(),
    ))
}

/// Files written so far by one generation call; removed on drop unless
/// committed.
struct WrittenFiles {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl WrittenFiles {
    fn write(&mut self, path: &Path, contents: &[u8], private: bool) -> Result<(), PkiError> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            if private {
                options.mode(0o600);
            }
        }
        #[cfg(not(unix))]
        let _ = private;

        let mut file = options.open(path)?;
        self.paths.push(path.to_path_buf());
        file.write_all(contents)?;
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for WrittenFiles {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "cannot remove partial output");
            }
        }
    }
}

fn write_outputs(handle: &KeyHandle, info: &KeyGenerationInfo) -> Result<(), PkiError> {
    let mut written = WrittenFiles {
        paths: Vec::new(),
        committed: false,
    };

    if let Some(path) = &info.public_key_file {
        written.write(path, handle.public_key_pem().as_bytes(), false)?;
    }
    if let Some(path) = &info.private_key_file {
        let pem = handle.with_private_key(|der| private_key_pem(der, info.passphrase.as_deref()))??;
        written.write(path, pem.as_bytes(), true)?;
    }

    written.committed = true;
    Ok(())
}

/// PKCS#8 PEM, PBES2-encrypted when a passphrase is given.
fn private_key_pem(der: &[u8], passphrase: Option<&String>) -> Result<Zeroizing<String>, PkiError> {
    let pem_err = |e: pkcs8::der::Error| PkiError::PemError(e.to_string());
    match passphrase {
        None => pkcs8::SecretDocument::try_from(der)
            .and_then(|doc| doc.to_pem("PRIVATE KEY", LineEnding::LF))
            .map_err(pem_err),
        Some(pass) => {
            let info = pkcs8::PrivateKeyInfo::try_from(der)
                .map_err(|e| PkiError::PemError(e.to_string()))?;
            let encrypted = info
                .encrypt(OsRng, pass.as_bytes())
                .map_err(|e| PkiError::PemError(e.to_string()))?;
            encrypted
                .to_pem("ENCRYPTED PRIVATE KEY", LineEnding::LF)
                .map_err(pem_err)
        }
    }
}
