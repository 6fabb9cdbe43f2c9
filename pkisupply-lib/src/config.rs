//! Environment-level configuration of the hardware-token backend.
//!
//! The PKCS#11 module location must be resolvable before any hardware-path
//! call. It is read from the environment, the same way OpenSSL resolves its
//! configuration file from `OPENSSL_CONF`:
//!
//! 1. `PKISUPPLY_PKCS11_MODULE`: path to the PKCS#11 shared object
//! 2. `PKISUPPLY_PKCS11_PIN`: user PIN for token login (optional)
//! 3. `PKISUPPLY_ENGINE_NAME`: engine name recorded in key references
//!    (default `pkcs11`)

use std::path::PathBuf;

pub const ENV_MODULE: &str = "PKISUPPLY_PKCS11_MODULE";
pub const ENV_PIN: &str = "PKISUPPLY_PKCS11_PIN";
pub const ENV_ENGINE_NAME: &str = "PKISUPPLY_ENGINE_NAME";

pub const DEFAULT_ENGINE_NAME: &str = "pkcs11";

/// Hardware backend settings.
#[derive(Clone, Default)]
pub struct BackendConfig {
    /// PKCS#11 module path. `None` means the hardware backend is unavailable.
    pub module_path: Option<PathBuf>,
    /// User PIN used to log into the token.
    pub pin: Option<String>,
    /// Engine name recorded in [`crate::TokenKeyRef`]s.
    pub engine_name: Option<String>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("module_path", &self.module_path)
            .field("pin", &self.pin.as_ref().map(|_| "<redacted>"))
            .field("engine_name", &self.engine_name)
            .finish()
    }
}

impl BackendConfig {
    /// Resolve the configuration from the process environment.
    ///
    /// Empty values are treated as unset.
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        BackendConfig {
            module_path: non_empty(ENV_MODULE).map(PathBuf::from),
            pin: non_empty(ENV_PIN),
            engine_name: non_empty(ENV_ENGINE_NAME),
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine_name.as_deref().unwrap_or(DEFAULT_ENGINE_NAME)
    }
}
