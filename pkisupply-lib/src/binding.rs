//! Key/certificate binding checks.
//!
//! A private key binds to a certificate when the public key derived from
//! it has the same algorithm, curve and public key bits as the
//! certificate's SubjectPublicKeyInfo. The key is parsed independently of
//! any tracked [`KeyHandle`], so external key files can be checked too.

use crate::handle::{KeyHandle, X509Handle};
use crate::oid;
use crate::parser;
use crate::util;
use crate::PkiError;
use pkcs8::EncodePublicKey;
use serde::Serialize;
use tracing::debug;
use x509_parser::pem::Pem;
use zeroize::Zeroizing;

/// Outcome of a binding check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KeyValidationResult {
    /// The key's public component equals the certificate's public key.
    Valid,
    /// The key is encrypted and the passphrase is missing or wrong, or the
    /// key fails its internal consistency checks.
    Invalid,
    /// The key is well-formed but belongs to a different public key.
    KeyMismatch,
    /// The key parses but its algorithm or curve is not supported.
    UnsupportedKeyType,
    /// The input is not a recognizable private key container.
    ParseFailure,
}

impl std::fmt::Display for KeyValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KeyValidationResult::Valid => "valid",
            KeyValidationResult::Invalid => "invalid key",
            KeyValidationResult::KeyMismatch => "key does not match certificate",
            KeyValidationResult::UnsupportedKeyType => "unsupported key type",
            KeyValidationResult::ParseFailure => "cannot parse private key",
        };
        f.write_str(s)
    }
}

impl KeyValidationResult {
    pub fn is_valid(&self) -> bool {
        *self == KeyValidationResult::Valid
    }

    /// `Ok(())` for [`Valid`](Self::Valid), [`PkiError::KeyBindingFailure`]
    /// otherwise.
    pub fn into_result(self) -> Result<(), PkiError> {
        match self {
            KeyValidationResult::Valid => Ok(()),
            other => Err(PkiError::KeyBindingFailure(other)),
        }
    }
}

/// Private key container formats accepted by [`check_private_key`].
enum KeyContainer {
    Pkcs8(Zeroizing<Vec<u8>>),
    EncryptedPkcs8(Zeroizing<Vec<u8>>),
    Sec1(Zeroizing<Vec<u8>>),
    Pkcs1(Zeroizing<Vec<u8>>),
}

/// Check whether `key_bytes` (PEM or DER) is the private key of `cert`.
///
/// `passphrase` decrypts an `ENCRYPTED PRIVATE KEY`; it is ignored for
/// unencrypted keys.
pub fn check_private_key(
    cert: &X509Handle,
    key_bytes: &[u8],
    passphrase: Option<&str>,
) -> KeyValidationResult {
    let result = derive_public_key(key_bytes, passphrase)
        .and_then(|spki| compare(&cert.public_key().spki_der, &spki));
    let result = match result {
        Ok(()) => KeyValidationResult::Valid,
        Err(r) => r,
    };
    debug!(subject = %cert.subject(), %result, "checked private key");
    result
}

/// Check a tracked key against `cert`. Works for both backends since only
/// the public component is compared.
pub fn check_key_handle(cert: &X509Handle, key: &KeyHandle) -> KeyValidationResult {
    match compare(&cert.public_key().spki_der, key.public_key_der()) {
        Ok(()) => KeyValidationResult::Valid,
        Err(r) => r,
    }
}

fn compare(cert_spki: &[u8], key_spki: &[u8]) -> Result<(), KeyValidationResult> {
    let cert_id = parser::spki_identity(cert_spki).ok_or(KeyValidationResult::ParseFailure)?;
    let key_id = parser::spki_identity(key_spki).ok_or(KeyValidationResult::ParseFailure)?;
    if cert_id == key_id {
        Ok(())
    } else {
        Err(KeyValidationResult::KeyMismatch)
    }
}

fn derive_public_key(
    key_bytes: &[u8],
    passphrase: Option<&str>,
) -> Result<Vec<u8>, KeyValidationResult> {
    let container = if util::is_pem(key_bytes) {
        container_from_pem(key_bytes)?
    } else {
        container_from_der(key_bytes)?
    };

    match container {
        KeyContainer::Pkcs8(der) => pkcs8_public_key(&der),
        KeyContainer::EncryptedPkcs8(der) => {
            let pass = passphrase.ok_or(KeyValidationResult::Invalid)?;
            let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(der.as_slice())
                .map_err(|_| KeyValidationResult::ParseFailure)?;
            let decrypted = encrypted
                .decrypt(pass.as_bytes())
                .map_err(|_| KeyValidationResult::Invalid)?;
            pkcs8_public_key(decrypted.as_bytes())
        }
        KeyContainer::Sec1(der) => sec1_public_key(&der),
        KeyContainer::Pkcs1(der) => rsa_public_key_from_pkcs1(&der),
    }
}

fn container_from_pem(input: &[u8]) -> Result<KeyContainer, KeyValidationResult> {
    for pem in Pem::iter_from_buffer(input) {
        let pem = pem.map_err(|_| KeyValidationResult::ParseFailure)?;
        let contents = Zeroizing::new(pem.contents);
        let container = match pem.label.as_str() {
            "PRIVATE KEY" => KeyContainer::Pkcs8(contents),
            "ENCRYPTED PRIVATE KEY" => KeyContainer::EncryptedPkcs8(contents),
            "EC PRIVATE KEY" => KeyContainer::Sec1(contents),
            "RSA PRIVATE KEY" => KeyContainer::Pkcs1(contents),
            // EC PARAMETERS, certificates and the like may precede the key.
            _ => continue,
        };
        return Ok(container);
    }
    Err(KeyValidationResult::ParseFailure)
}

fn container_from_der(der: &[u8]) -> Result<KeyContainer, KeyValidationResult> {
    if pkcs8::PrivateKeyInfo::try_from(der).is_ok() {
        Ok(KeyContainer::Pkcs8(Zeroizing::new(der.to_vec())))
    } else if pkcs8::EncryptedPrivateKeyInfo::try_from(der).is_ok() {
        Ok(KeyContainer::EncryptedPkcs8(Zeroizing::new(der.to_vec())))
    } else if sec1::EcPrivateKey::try_from(der).is_ok() {
        Ok(KeyContainer::Sec1(Zeroizing::new(der.to_vec())))
    } else if rsa::pkcs1::RsaPrivateKey::try_from(der).is_ok() {
        Ok(KeyContainer::Pkcs1(Zeroizing::new(der.to_vec())))
    } else {
        Err(KeyValidationResult::ParseFailure)
    }
}

fn pkcs8_public_key(der: &[u8]) -> Result<Vec<u8>, KeyValidationResult> {
    use pkcs8::DecodePrivateKey;

    let info = pkcs8::PrivateKeyInfo::try_from(der).map_err(|_| KeyValidationResult::ParseFailure)?;
    let algorithm = info.algorithm.oid.to_string();

    let spki = match algorithm.as_str() {
        oid::EC_PUBLIC_KEY => {
            let curve = info
                .algorithm
                .parameters_oid()
                .map_err(|_| KeyValidationResult::ParseFailure)?
                .to_string();
            match curve.as_str() {
                oid::CURVE_P256 => p256::SecretKey::from_pkcs8_der(der)
                    .map_err(|_| KeyValidationResult::Invalid)?
                    .public_key()
                    .to_public_key_der(),
                oid::CURVE_P384 => p384::SecretKey::from_pkcs8_der(der)
                    .map_err(|_| KeyValidationResult::Invalid)?
                    .public_key()
                    .to_public_key_der(),
                _ => return Err(KeyValidationResult::UnsupportedKeyType),
            }
        }
        oid::RSA_ENCRYPTION => {
            let key = rsa::RsaPrivateKey::from_pkcs8_der(der)
                .map_err(|_| KeyValidationResult::Invalid)?;
            return rsa_public_key(&key);
        }
        _ => return Err(KeyValidationResult::UnsupportedKeyType),
    };
    spki.map(|doc| doc.as_bytes().to_vec())
        .map_err(|_| KeyValidationResult::ParseFailure)
}

fn sec1_public_key(der: &[u8]) -> Result<Vec<u8>, KeyValidationResult> {
    let ec = sec1::EcPrivateKey::try_from(der).map_err(|_| KeyValidationResult::ParseFailure)?;
    // The parameters field is optional; without it the scalar length
    // identifies the curve.
    let curve = match ec.parameters.and_then(|p| p.named_curve()) {
        Some(named) => named.to_string(),
        None => match ec.private_key.len() {
            32 => oid::CURVE_P256.to_string(),
            48 => oid::CURVE_P384.to_string(),
            _ => return Err(KeyValidationResult::UnsupportedKeyType),
        },
    };

    let spki = match curve.as_str() {
        oid::CURVE_P256 => p256::SecretKey::from_sec1_der(der)
            .map_err(|_| KeyValidationResult::Invalid)?
            .public_key()
            .to_public_key_der(),
        oid::CURVE_P384 => p384::SecretKey::from_sec1_der(der)
            .map_err(|_| KeyValidationResult::Invalid)?
            .public_key()
            .to_public_key_der(),
        _ => return Err(KeyValidationResult::UnsupportedKeyType),
    };
    spki.map(|doc| doc.as_bytes().to_vec())
        .map_err(|_| KeyValidationResult::ParseFailure)
}

fn rsa_public_key_from_pkcs1(der: &[u8]) -> Result<Vec<u8>, KeyValidationResult> {
    use rsa::pkcs1::DecodeRsaPrivateKey;

    rsa::pkcs1::RsaPrivateKey::try_from(der).map_err(|_| KeyValidationResult::ParseFailure)?;
    let key = rsa::RsaPrivateKey::from_pkcs1_der(der).map_err(|_| KeyValidationResult::Invalid)?;
    rsa_public_key(&key)
}

fn rsa_public_key(key: &rsa::RsaPrivateKey) -> Result<Vec<u8>, KeyValidationResult> {
    key.validate().map_err(|_| KeyValidationResult::Invalid)?;
    rsa::RsaPublicKey::from(key)
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|_| KeyValidationResult::ParseFailure)
}
