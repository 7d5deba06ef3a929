//! Key vault client abstraction.
//!
//! The key vault is the only component that touches raw key material. A
//! backend stores one data encryption key (DEK) per alt-name; lookups are
//! idempotent — the same alt-name must always return the same key, or every
//! previously stored ciphertext becomes undecryptable.

use crate::error::KeyVaultError;
use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use secrecy::{ExposeSecret, SecretVec};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::warn;

/// Standard DEK size in bytes (256 bits).
pub const DEK_SIZE: usize = 32;

/// A resolved data encryption key, referenced by its alt-name.
pub struct KeyHandle {
    alt_name: String,
    material: SecretVec<u8>,
}

impl KeyHandle {
    /// Creates a handle from an alt-name and raw key material.
    #[must_use]
    pub fn new(alt_name: impl Into<String>, material: SecretVec<u8>) -> Self {
        Self { alt_name: alt_name.into(), material }
    }

    /// Returns the key's alt-name.
    #[must_use]
    pub fn alt_name(&self) -> &str {
        &self.alt_name
    }

    /// Returns the raw key material.
    #[must_use]
    pub fn material(&self) -> &SecretVec<u8> {
        &self.material
    }
}

/// Provides data-key lookup and creation.
///
/// Implementations must be thread-safe (`Send + Sync`) and must guarantee
/// idempotent lookup: once a key exists under an alt-name, every later call
/// returns that same key. Concurrent first-time creations for one alt-name
/// must converge on a single surviving key (create-exclusive semantics in
/// the backing store).
pub trait KeyVault: Send + Sync {
    /// Returns the data key stored under `alt_name`, creating and persisting
    /// a fresh one on first use.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::Unavailable`] if the backing store cannot be
    /// reached, [`KeyVaultError::Corrupt`] if a key exists under the alt-name
    /// but is unreadable or malformed.
    fn get_or_create_data_key(&self, alt_name: &str) -> Result<KeyHandle, KeyVaultError>;
}

/// Generates fresh random data-key material.
#[must_use]
pub fn generate_data_key() -> SecretVec<u8> {
    let mut dek = vec![0u8; DEK_SIZE];
    OsRng.fill_bytes(&mut dek);
    SecretVec::new(dek)
}

/// In-memory key vault for tests and embedded use.
///
/// Keys live for the process lifetime. First-time creation is serialized
/// behind the store mutex, so concurrent callers converge on one key.
pub struct MemoryKeyVault {
    keys: Mutex<HashMap<String, SecretVec<u8>>>,
}

impl MemoryKeyVault {
    /// Creates an empty in-memory vault.
    #[must_use]
    pub fn new() -> Self {
        Self { keys: Mutex::new(HashMap::new()) }
    }
}

impl Default for MemoryKeyVault {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyVault for MemoryKeyVault {
    fn get_or_create_data_key(&self, alt_name: &str) -> Result<KeyHandle, KeyVaultError> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| KeyVaultError::Unavailable("key store poisoned".to_string()))?;

        let material = match keys.get(alt_name) {
            Some(existing) => {
                if existing.expose_secret().len() != DEK_SIZE {
                    return Err(KeyVaultError::Corrupt(format!(
                        "{alt_name}: stored key has invalid length"
                    )));
                }
                SecretVec::new(existing.expose_secret().clone())
            }
            None => {
                let fresh = generate_data_key();
                keys.insert(alt_name.to_string(), SecretVec::new(fresh.expose_secret().clone()));
                // Privileged operation: key creation is always logged.
                warn!(alt_name, "created new data encryption key");
                fresh
            }
        };

        Ok(KeyHandle::new(alt_name, material))
    }
}

/// Read-mostly DEK cache in front of another vault.
///
/// Resolved keys are held in process memory behind a `RwLock`, so the hot
/// path (every field encrypt/decrypt) takes a read lock only. The write lock
/// is taken once per alt-name, on first resolution.
pub struct CachedKeyVault<V: KeyVault> {
    inner: Arc<V>,
    cache: RwLock<HashMap<String, Arc<SecretVec<u8>>>>,
}

impl<V: KeyVault> CachedKeyVault<V> {
    /// Wraps a vault with an in-process key cache.
    #[must_use]
    pub fn new(inner: V) -> Self {
        Self { inner: Arc::new(inner), cache: RwLock::new(HashMap::new()) }
    }

    /// Number of alt-names currently cached.
    #[must_use]
    pub fn cached_keys(&self) -> usize {
        self.cache.read().map_or(0, |cache| cache.len())
    }
}

impl<V: KeyVault> KeyVault for CachedKeyVault<V> {
    fn get_or_create_data_key(&self, alt_name: &str) -> Result<KeyHandle, KeyVaultError> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| KeyVaultError::Unavailable("key cache poisoned".to_string()))?;
            if let Some(material) = cache.get(alt_name) {
                return Ok(KeyHandle::new(
                    alt_name,
                    SecretVec::new(material.expose_secret().clone()),
                ));
            }
        }

        let handle = self.inner.get_or_create_data_key(alt_name)?;

        let mut cache = self
            .cache
            .write()
            .map_err(|_| KeyVaultError::Unavailable("key cache poisoned".to_string()))?;
        // Another thread may have resolved the same alt-name while we held no
        // lock; the backend's idempotence guarantees both copies are equal.
        cache
            .entry(alt_name.to_string())
            .or_insert_with(|| Arc::new(SecretVec::new(handle.material().expose_secret().clone())));

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_vault_idempotent_lookup() {
        let vault = MemoryKeyVault::new();

        let first = vault.get_or_create_data_key("primary-phi-key").expect("first lookup");
        let second = vault.get_or_create_data_key("primary-phi-key").expect("second lookup");

        // Violating this silently breaks decryption of all stored data.
        assert_eq!(
            first.material().expose_secret(),
            second.material().expose_secret(),
            "same alt-name must return the same key"
        );
    }

    #[test]
    fn test_memory_vault_distinct_alt_names() {
        let vault = MemoryKeyVault::new();

        let a = vault.get_or_create_data_key("primary-phi-key").unwrap();
        let b = vault.get_or_create_data_key("knowledge-key").unwrap();

        assert_ne!(a.material().expose_secret(), b.material().expose_secret());
    }

    #[test]
    fn test_generated_key_size() {
        let dek = generate_data_key();
        assert_eq!(dek.expose_secret().len(), DEK_SIZE);
    }

    #[test]
    fn test_cached_vault_returns_backend_key() {
        let vault = CachedKeyVault::new(MemoryKeyVault::new());

        let first = vault.get_or_create_data_key("primary-phi-key").unwrap();
        assert_eq!(vault.cached_keys(), 1);

        let second = vault.get_or_create_data_key("primary-phi-key").unwrap();
        assert_eq!(first.material().expose_secret(), second.material().expose_secret());
        assert_eq!(vault.cached_keys(), 1);
    }

    #[test]
    fn test_cached_vault_concurrent_first_use_converges() {
        let vault = Arc::new(CachedKeyVault::new(MemoryKeyVault::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let vault = Arc::clone(&vault);
                std::thread::spawn(move || {
                    vault
                        .get_or_create_data_key("primary-phi-key")
                        .expect("lookup")
                        .material()
                        .expose_secret()
                        .clone()
                })
            })
            .collect();

        let keys: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().expect("join")).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]), "all callers must see one surviving key");
    }

    #[test]
    fn test_corrupt_key_detected() {
        let vault = MemoryKeyVault::new();
        vault
            .keys
            .lock()
            .unwrap()
            .insert("primary-phi-key".to_string(), SecretVec::new(vec![0u8; 5]));

        let result = vault.get_or_create_data_key("primary-phi-key");
        assert!(matches!(result, Err(KeyVaultError::Corrupt(_))));
    }
}
