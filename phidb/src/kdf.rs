//! Per-field subkey derivation using HKDF (HMAC-based Key Derivation
//! Function).
//!
//! Every classified field works with subkeys derived from the collection's
//! DEK, with the [`FieldContext`](crate::context::FieldContext) as the `info`
//! parameter. Derivation is deterministic, so the deterministic subkey for a
//! field is identical across all records (the equality-search invariant)
//! while no two fields ever share a working key.

use crate::context::FieldContext;
use crate::error::Error;
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;

/// AEAD subkey size in bytes (256 bits).
pub const AEAD_KEY_SIZE: usize = 32;

/// AES-256-SIV subkey size in bytes (512 bits).
pub const SIV_KEY_SIZE: usize = 64;

fn expand(dek: &SecretVec<u8>, info: &str, len: usize) -> Result<SecretVec<u8>, Error> {
    let hkdf = Hkdf::<Sha256>::new(None, dek.expose_secret());
    let mut okm = vec![0u8; len];
    hkdf.expand(info.as_bytes(), &mut okm).map_err(|_| Error::KeyDerivation)?;
    Ok(SecretVec::new(okm))
}

/// Derives the 32-byte AEAD subkey for randomized encryption of a field.
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if HKDF expansion fails.
pub fn derive_aead_key(
    dek: &SecretVec<u8>,
    context: &FieldContext,
) -> Result<SecretVec<u8>, Error> {
    expand(dek, &format!("{context}|aead"), AEAD_KEY_SIZE)
}

/// Derives the 64-byte AES-256-SIV subkey for deterministic encryption of a
/// field.
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if HKDF expansion fails.
pub fn derive_siv_key(dek: &SecretVec<u8>, context: &FieldContext) -> Result<SecretVec<u8>, Error> {
    expand(dek, &format!("{context}|siv"), SIV_KEY_SIZE)
}
