//! Backend capability provider.
//!
//! [`BackendContext`] detects and caches whether the hardware-token engine
//! can be loaded, and owns the loaded engine until [`BackendContext::reset`].
//! The cache is tri-state (unprobed, unavailable, loaded) and probing is
//! single-flight: the first caller loads the engine while concurrent
//! callers block on the same lock and observe its outcome.
//!
//! Two seams keep the hardware path testable without a device:
//! [`EngineLoader`] produces an engine, [`TokenEngine`] generates key pairs
//! on it. [`Pkcs11Loader`] / [`Pkcs11Engine`] are the production adapters.

mod pkcs11;

pub use pkcs11::{Pkcs11Engine, Pkcs11Loader};

use crate::config::BackendConfig;
use crate::keygen::TokenSlot;
use crate::PkiError;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info};

/// Key pair parameters handed to a token engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKeySpec {
    EcP256,
    EcP384,
    Rsa { bits: u32 },
}

/// A key pair freshly generated on a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenKey {
    /// PKCS#11 URI of the private key object.
    pub uri: String,
    /// `CKA_ID` shared by both halves of the pair.
    pub object_id: Vec<u8>,
    /// DER-encoded SubjectPublicKeyInfo of the public half.
    pub public_key_der: Vec<u8>,
}

/// A loaded hardware-token engine.
///
/// Calls may block on device I/O; no timeout is applied here.
pub trait TokenEngine: Send + Sync {
    /// Engine name recorded in key references.
    fn name(&self) -> &str;

    /// Generate a key pair on the token. The private key never leaves it.
    fn generate_key_pair(&self, spec: TokenKeySpec, slot: &TokenSlot)
        -> Result<TokenKey, PkiError>;

    /// Remove both halves of a pair returned by
    /// [`generate_key_pair`](Self::generate_key_pair).
    fn destroy_key(&self, key: &TokenKey) -> Result<(), PkiError>;
}

/// Loads a hardware-token engine.
///
/// A loader that cannot find or initialize its module returns
/// [`PkiError::BackendUnavailable`]; the capability probe maps any error to
/// "unsupported".
pub trait EngineLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn TokenEngine>, PkiError>;
}

enum ProbeState {
    Unprobed,
    Unavailable,
    Loaded(Arc<dyn TokenEngine>),
}

/// Explicit owner of the hardware capability cache and loaded engine.
pub struct BackendContext {
    loader: Box<dyn EngineLoader>,
    state: Mutex<ProbeState>,
}

impl std::fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.lock() {
            ProbeState::Unprobed => "unprobed".to_string(),
            ProbeState::Unavailable => "unavailable".to_string(),
            ProbeState::Loaded(engine) => format!("loaded ({})", engine.name()),
        };
        f.debug_struct("BackendContext")
            .field("state", &state)
            .finish()
    }
}

static GLOBAL: OnceLock<BackendContext> = OnceLock::new();

impl BackendContext {
    /// Create a context without probing.
    pub fn new(loader: impl EngineLoader + 'static) -> Self {
        BackendContext {
            loader: Box::new(loader),
            state: Mutex::new(ProbeState::Unprobed),
        }
    }

    /// Create a context and load the engine immediately.
    ///
    /// The cache reflects the outcome of this load, so
    /// [`supports_hardware_backend`](Self::supports_hardware_backend) is
    /// truthful right after construction.
    pub fn initialized(loader: impl EngineLoader + 'static) -> Self {
        let ctx = Self::new(loader);
        ctx.activate();
        ctx
    }

    /// Context backed by the environment-configured PKCS#11 module.
    pub fn from_env() -> Self {
        Self::new(Pkcs11Loader::new(BackendConfig::from_env()))
    }

    /// Process-wide context, configured from the environment on first use.
    pub fn global() -> &'static BackendContext {
        GLOBAL.get_or_init(BackendContext::from_env)
    }

    /// Whether the hardware-token backend is usable.
    ///
    /// Returns the cached outcome if a probe already ran; otherwise probes
    /// once and caches the result until [`reset`](Self::reset).
    pub fn supports_hardware_backend(&self) -> bool {
        let mut state = self.lock();
        if let ProbeState::Unprobed = *state {
            *state = self.load_into_state();
        }
        matches!(*state, ProbeState::Loaded(_))
    }

    /// Load the engine now, replacing whatever the cache held.
    ///
    /// An engine that is already loaded is kept. Returns the new
    /// capability.
    pub fn activate(&self) -> bool {
        let mut state = self.lock();
        if !matches!(*state, ProbeState::Loaded(_)) {
            *state = self.load_into_state();
        }
        matches!(*state, ProbeState::Loaded(_))
    }

    /// Clear the cache and unload the engine. Idempotent.
    pub fn reset(&self) {
        let previous = std::mem::replace(&mut *self.lock(), ProbeState::Unprobed);
        if let ProbeState::Loaded(engine) = previous {
            info!(engine = engine.name(), "hardware engine unloaded");
        }
    }

    /// The loaded engine, probing first if needed.
    pub(crate) fn engine(&self) -> Result<Arc<dyn TokenEngine>, PkiError> {
        let mut state = self.lock();
        if let ProbeState::Unprobed = *state {
            *state = self.load_into_state();
        }
        match &*state {
            ProbeState::Loaded(engine) => Ok(Arc::clone(engine)),
            _ => Err(PkiError::BackendUnavailable(
                "hardware token engine is not loaded".into(),
            )),
        }
    }

    fn load_into_state(&self) -> ProbeState {
        match self.loader.load() {
            Ok(engine) => {
                info!(engine = engine.name(), "hardware engine loaded");
                ProbeState::Loaded(engine)
            }
            Err(e) => {
                debug!(error = %e, "hardware engine unavailable");
                ProbeState::Unavailable
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Probe the process-wide context. See [`BackendContext::supports_hardware_backend`].
pub fn supports_hardware_backend() -> bool {
    BackendContext::global().supports_hardware_backend()
}

/// Reset the process-wide context. See [`BackendContext::reset`].
pub fn reset() {
    BackendContext::global().reset()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Software-backed stand-ins for a token and its loader.

    use super::*;
    use p256::pkcs8::EncodePublicKey;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Software stand-in for a token. Records the URIs of destroyed keys.
    pub(crate) struct FakeEngine {
        destroyed: Arc<Mutex<Vec<String>>>,
    }

    impl TokenEngine for FakeEngine {
        fn name(&self) -> &str {
            "fake-token"
        }

        fn generate_key_pair(
            &self,
            spec: TokenKeySpec,
            slot: &TokenSlot,
        ) -> Result<TokenKey, PkiError> {
            let public_key_der = match spec {
                TokenKeySpec::EcP256 => p256::SecretKey::random(&mut rand::rngs::OsRng)
                    .public_key()
                    .to_public_key_der(),
                TokenKeySpec::EcP384 => p384::SecretKey::random(&mut rand::rngs::OsRng)
                    .public_key()
                    .to_public_key_der(),
                TokenKeySpec::Rsa { bits } => {
                    let private = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, bits as usize)
                        .map_err(|e| PkiError::Token(e.to_string()))?;
                    rsa::RsaPublicKey::from(&private).to_public_key_der()
                }
            }
            .map_err(|e| PkiError::Token(e.to_string()))?;
            Ok(TokenKey {
                uri: slot.to_uri(),
                object_id: vec![0x01],
                public_key_der: public_key_der.as_bytes().to_vec(),
            })
        }

        fn destroy_key(&self, key: &TokenKey) -> Result<(), PkiError> {
            self.destroyed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(key.uri.clone());
            Ok(())
        }
    }

    /// Loader whose availability can be toggled, counting load attempts.
    #[derive(Default)]
    pub(crate) struct FakeLoader {
        pub(crate) available: Arc<AtomicBool>,
        pub(crate) loads: Arc<AtomicUsize>,
        pub(crate) destroyed: Arc<Mutex<Vec<String>>>,
    }

    impl FakeLoader {
        pub(crate) fn available() -> Self {
            let loader = FakeLoader::default();
            loader.available.store(true, Ordering::SeqCst);
            loader
        }
    }

    impl EngineLoader for FakeLoader {
        fn load(&self) -> Result<Arc<dyn TokenEngine>, PkiError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            // Widen the race window for the single-flight test.
            std::thread::sleep(std::time::Duration::from_millis(5));
            if self.available.load(Ordering::SeqCst) {
                Ok(Arc::new(FakeEngine {
                    destroyed: Arc::clone(&self.destroyed),
                }))
            } else {
                Err(PkiError::BackendUnavailable("fake module absent".into()))
            }
        }
    }
}
