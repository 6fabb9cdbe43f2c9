//! Ownership-safe wrappers for key and certificate material.
//!
//! [`KeyHandle`] owns exactly one private key, either as in-memory bytes
//! (software backend, wiped on release) or as a reference to an object on a
//! hardware token. [`X509Handle`] owns one parsed certificate.

mod key;
mod x509;

pub use key::{KeyHandle, TokenKeyRef};
pub(crate) use key::KeyMaterial;
pub use x509::X509Handle;
