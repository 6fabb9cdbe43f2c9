//! PKCS#11 adapter for the hardware-token backend.

use super::{EngineLoader, TokenEngine, TokenKey, TokenKeySpec};
use crate::config::{BackendConfig, ENV_MODULE};
use crate::keygen::TokenSlot;
use crate::oid;
use crate::PkiError;
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, info, warn};

const RSA_PUBLIC_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];
const KEY_ID_LEN: usize = 16;

fn token_err(context: &str, e: cryptoki::error::Error) -> PkiError {
    PkiError::Token(format!("{}: {}", context, e))
}

/// Loads the PKCS#11 module named by [`BackendConfig::module_path`].
#[derive(Debug, Clone)]
pub struct Pkcs11Loader {
    config: BackendConfig,
}

impl Pkcs11Loader {
    pub fn new(config: BackendConfig) -> Self {
        Pkcs11Loader { config }
    }
}

impl EngineLoader for Pkcs11Loader {
    fn load(&self) -> Result<Arc<dyn TokenEngine>, PkiError> {
        let Some(path) = &self.config.module_path else {
            return Err(PkiError::BackendUnavailable(format!(
                "{} is not set",
                ENV_MODULE
            )));
        };
        if !path.exists() {
            return Err(PkiError::BackendUnavailable(format!(
                "PKCS#11 module {} does not exist",
                path.display()
            )));
        }

        debug!(module = %path.display(), "loading PKCS#11 module");
        let ctx = Pkcs11::new(path).map_err(|e| {
            PkiError::BackendUnavailable(format!("{}: {}", path.display(), e))
        })?;
        ctx.initialize(CInitializeArgs::OsThreads)
            .map_err(|e| PkiError::BackendUnavailable(format!("C_Initialize: {}", e)))?;

        Ok(Arc::new(Pkcs11Engine {
            name: self.config.engine_name().to_string(),
            ctx,
            pin: self.config.pin.clone(),
        }))
    }
}

/// A PKCS#11 module, initialized and ready for sessions.
///
/// Dropping the last reference finalizes and unloads the module.
pub struct Pkcs11Engine {
    name: String,
    ctx: Pkcs11,
    pin: Option<String>,
}

impl Pkcs11Engine {
    fn select_slot(&self, wanted: Option<u64>) -> Result<Slot, PkiError> {
        let slots = self
            .ctx
            .get_slots_with_token()
            .map_err(|e| token_err("C_GetSlotList", e))?;
        match wanted {
            Some(id) => slots
                .into_iter()
                .find(|s| s.id() == id)
                .ok_or_else(|| PkiError::Token(format!("no token present in slot {}", id))),
            None => slots
                .into_iter()
                .next()
                .ok_or_else(|| PkiError::Token("no slot with a token present".into())),
        }
    }

    fn open_session(&self, slot: Slot) -> Result<Session, PkiError> {
        let session = self
            .ctx
            .open_rw_session(slot)
            .map_err(|e| token_err("C_OpenSession", e))?;
        if let Some(pin) = &self.pin {
            session
                .login(UserType::User, Some(&AuthPin::new(pin.clone())))
                .map_err(|e| token_err("C_Login", e))?;
        }
        Ok(session)
    }
}

impl TokenEngine for Pkcs11Engine {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_key_pair(
        &self,
        spec: TokenKeySpec,
        slot: &TokenSlot,
    ) -> Result<TokenKey, PkiError> {
        let pk_slot = self.select_slot(slot.slot_id)?;
        let session = self.open_session(pk_slot)?;

        let mut id = vec![0u8; KEY_ID_LEN];
        rand::rngs::OsRng.fill_bytes(&mut id);
        let label = slot.label.as_bytes().to_vec();

        let (mechanism, mut public_template) = match spec {
            TokenKeySpec::EcP256 => (
                Mechanism::EccKeyPairGen,
                vec![Attribute::EcParams(oid::CURVE_P256_DER.to_vec())],
            ),
            TokenKeySpec::EcP384 => (
                Mechanism::EccKeyPairGen,
                vec![Attribute::EcParams(oid::CURVE_P384_DER.to_vec())],
            ),
            TokenKeySpec::Rsa { bits } => (
                Mechanism::RsaPkcsKeyPairGen,
                vec![
                    Attribute::ModulusBits(u64::from(bits).into()),
                    Attribute::PublicExponent(RSA_PUBLIC_EXPONENT.to_vec()),
                ],
            ),
        };
        public_template.extend([
            Attribute::Token(true),
            Attribute::Verify(true),
            Attribute::Label(label.clone()),
            Attribute::Id(id.clone()),
        ]);
        let private_template = vec![
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Extractable(false),
            Attribute::Sign(true),
            Attribute::Label(label),
            Attribute::Id(id.clone()),
        ];

        let (public_handle, private_handle) = session
            .generate_key_pair(&mechanism, &public_template, &private_template)
            .map_err(|e| token_err("C_GenerateKeyPair", e))?;

        let public_key_der = match read_public_key(&session, spec, public_handle) {
            Ok(der) => der,
            Err(e) => {
                destroy_objects(&session, &[public_handle, private_handle]);
                return Err(e);
            }
        };

        let addressed = TokenSlot {
            slot_id: Some(pk_slot.id()),
            label: slot.label.clone(),
        };
        let uri = format!("{};id={}", addressed.to_uri(), percent_encode(&id));
        info!(engine = %self.name, %uri, "generated key pair on token");
        Ok(TokenKey {
            uri,
            object_id: id,
            public_key_der,
        })
    }

    fn destroy_key(&self, key: &TokenKey) -> Result<(), PkiError> {
        let addressed = TokenSlot::parse_uri(&key.uri)?;
        let session = self.open_session(self.select_slot(addressed.slot_id)?)?;
        let objects = session
            .find_objects(&[
                Attribute::Label(addressed.label.into_bytes()),
                Attribute::Id(key.object_id.clone()),
            ])
            .map_err(|e| token_err("C_FindObjects", e))?;
        for object in objects {
            session
                .destroy_object(object)
                .map_err(|e| token_err("C_DestroyObject", e))?;
        }
        info!(engine = %self.name, uri = %key.uri, "destroyed key pair on token");
        Ok(())
    }
}

/// Read the public half back as a DER SubjectPublicKeyInfo.
fn read_public_key(
    session: &Session,
    spec: TokenKeySpec,
    public_handle: ObjectHandle,
) -> Result<Vec<u8>, PkiError> {
    match spec {
        TokenKeySpec::EcP256 | TokenKeySpec::EcP384 => {
            let attrs = session
                .get_attributes(public_handle, &[AttributeType::EcPoint])
                .map_err(|e| token_err("C_GetAttributeValue", e))?;
            let point = attrs
                .into_iter()
                .find_map(|a| match a {
                    Attribute::EcPoint(p) => Some(p),
                    _ => None,
                })
                .ok_or_else(|| PkiError::Token("token returned no CKA_EC_POINT".into()))?;
            ec_spki_from_point(spec, &point)
        }
        TokenKeySpec::Rsa { .. } => {
            let attrs = session
                .get_attributes(
                    public_handle,
                    &[AttributeType::Modulus, AttributeType::PublicExponent],
                )
                .map_err(|e| token_err("C_GetAttributeValue", e))?;
            let mut modulus = None;
            let mut exponent = None;
            for attr in attrs {
                match attr {
                    Attribute::Modulus(n) => modulus = Some(n),
                    Attribute::PublicExponent(e) => exponent = Some(e),
                    _ => {}
                }
            }
            match (modulus, exponent) {
                (Some(n), Some(e)) => rsa_spki_from_parts(&n, &e),
                _ => Err(PkiError::Token(
                    "token returned no RSA public components".into(),
                )),
            }
        }
    }
}

/// Best-effort removal of objects created by a failed generation.
fn destroy_objects(session: &Session, objects: &[ObjectHandle]) {
    for &object in objects {
        if let Err(e) = session.destroy_object(object) {
            warn!(error = %e, "cannot remove key object after failed generation");
        }
    }
}

/// `CKA_EC_POINT` is a DER OCTET STRING around the SEC1 point, though some
/// tokens return the bare point.
fn ec_spki_from_point(spec: TokenKeySpec, raw: &[u8]) -> Result<Vec<u8>, PkiError> {
    use p256::pkcs8::EncodePublicKey;

    let bare_len = match spec {
        TokenKeySpec::EcP384 => 97,
        _ => 65,
    };
    let point: Vec<u8> = if raw.len() == bare_len && raw.first() == Some(&0x04) {
        raw.to_vec()
    } else {
        let (_, obj) = x509_parser::der_parser::parse_der(raw)
            .map_err(|e| PkiError::Token(format!("malformed CKA_EC_POINT: {}", e)))?;
        obj.as_slice()
            .map_err(|e| PkiError::Token(format!("malformed CKA_EC_POINT: {}", e)))?
            .to_vec()
    };

    let doc = match spec {
        TokenKeySpec::EcP384 => p384::PublicKey::from_sec1_bytes(&point)
            .map_err(|e| PkiError::Token(format!("invalid P-384 point: {}", e)))?
            .to_public_key_der(),
        _ => p256::PublicKey::from_sec1_bytes(&point)
            .map_err(|e| PkiError::Token(format!("invalid P-256 point: {}", e)))?
            .to_public_key_der(),
    }
    .map_err(|e| PkiError::Token(format!("cannot encode public key: {}", e)))?;
    Ok(doc.as_bytes().to_vec())
}

fn rsa_spki_from_parts(modulus: &[u8], exponent: &[u8]) -> Result<Vec<u8>, PkiError> {
    use rsa::pkcs8::EncodePublicKey;

    let key = rsa::RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(modulus),
        rsa::BigUint::from_bytes_be(exponent),
    )
    .map_err(|e| PkiError::Token(format!("invalid RSA public key: {}", e)))?;
    let doc = key
        .to_public_key_der()
        .map_err(|e| PkiError::Token(format!("cannot encode public key: {}", e)))?;
    Ok(doc.as_bytes().to_vec())
}

/// RFC 7512 percent-encoding of a binary attribute.
fn percent_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("%{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::pkcs8::EncodePublicKey;

    #[test]
    fn ec_point_accepts_wrapped_and_bare_forms() {
        let public = p256::SecretKey::random(&mut rand::rngs::OsRng).public_key();
        let expected = public.to_public_key_der().unwrap();
        let bare = public.to_sec1_bytes().to_vec();

        let mut wrapped = vec![0x04, bare.len() as u8];
        wrapped.extend_from_slice(&bare);

        let from_bare = ec_spki_from_point(TokenKeySpec::EcP256, &bare).unwrap();
        let from_wrapped = ec_spki_from_point(TokenKeySpec::EcP256, &wrapped).unwrap();
        assert_eq!(from_bare, expected.as_bytes());
        assert_eq!(from_wrapped, expected.as_bytes());
    }

    #[test]
    fn rsa_parts_round_trip_to_spki() {
        use rsa::traits::PublicKeyParts;

        let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let public = rsa::RsaPublicKey::from(&key);
        let spki = rsa_spki_from_parts(&public.n().to_bytes_be(), &public.e().to_bytes_be())
            .unwrap();
        let info = crate::parser::public_key_info_from_spki_der(&spki).unwrap();
        assert_eq!(info.algorithm, "RSA");
        assert_eq!(info.key_size, Some(1024));
    }

    #[test]
    fn missing_module_is_unavailable() {
        let loader = Pkcs11Loader::new(BackendConfig {
            module_path: Some("/nonexistent/libpkcs11.so".into()),
            ..BackendConfig::default()
        });
        assert!(matches!(
            loader.load(),
            Err(PkiError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn percent_encodes_ids() {
        assert_eq!(percent_encode(&[0x0a, 0xff]), "%0a%ff");
    }
}
