//! File-based key vault for `PhiDB`.
//!
//! This backend stores keys in the filesystem and is suitable for
//! development, testing, and single-node deployments.
//!
//! Layout:
//! ```text
//! keys/
//! ├── master.key               (32 bytes, 0600 permissions)
//! └── dek/
//!     ├── primary-phi-key.key  (wrapped DEK: [nonce][ciphertext], 0600)
//!     └── knowledge-key.key
//! ```
//!
//! DEKs are wrapped at rest with ChaCha20-Poly1305 under the master key,
//! with the alt-name as AAD so a wrapped key cannot be renamed into another
//! slot. First-time creation uses `create_new`, so two concurrent callers
//! racing on one alt-name converge on the single file that won the create.

#![warn(clippy::pedantic, clippy::nursery)]

use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce,
};
use phidb::error::KeyVaultError;
use phidb::key_vault::{generate_data_key, KeyHandle, KeyVault, DEK_SIZE};
use secrecy::{ExposeSecret, SecretVec};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

const MASTER_KEY_FILE: &str = "master.key";
const DEK_DIR: &str = "dek";
const NONCE_SIZE: usize = 12;

/// File-based key vault.
pub struct FileKeyVault {
    key_dir: PathBuf,
}

impl FileKeyVault {
    /// Opens an initialized key directory.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::Unavailable`] if the directory or its master
    /// key is missing.
    pub fn new(key_dir: impl Into<PathBuf>) -> Result<Self, KeyVaultError> {
        let key_dir = key_dir.into();
        if !key_dir.join(MASTER_KEY_FILE).is_file() {
            return Err(KeyVaultError::Unavailable(format!(
                "key directory not initialized: {}",
                key_dir.display()
            )));
        }
        Ok(Self { key_dir })
    }

    /// Initializes a key directory with a fresh master key.
    ///
    /// Idempotent: an already-initialized directory is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::Io`] if directory creation or key writing
    /// fails.
    pub fn init(key_dir: impl Into<PathBuf>) -> Result<Self, KeyVaultError> {
        let key_dir = key_dir.into();
        fs::create_dir_all(key_dir.join(DEK_DIR))?;

        let master_path = key_dir.join(MASTER_KEY_FILE);
        let master = generate_data_key();
        match write_new(&master_path, master.expose_secret()) {
            Ok(()) => {
                warn!(path = %master_path.display(), "created master key");
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err.into()),
        }

        Self::new(key_dir)
    }

    /// Lists the alt-names with a stored data key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyVaultError::Io`] if the key directory cannot be read.
    pub fn list_alt_names(&self) -> Result<Vec<String>, KeyVaultError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.key_dir.join(DEK_DIR))? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "key") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn master_key(&self) -> Result<SecretVec<u8>, KeyVaultError> {
        let path = self.key_dir.join(MASTER_KEY_FILE);
        let bytes = fs::read(&path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => {
                KeyVaultError::Unavailable(format!("master key missing: {}", path.display()))
            }
            _ => KeyVaultError::Io(err),
        })?;
        if bytes.len() != DEK_SIZE {
            return Err(KeyVaultError::Corrupt("master key has invalid length".to_string()));
        }
        Ok(SecretVec::new(bytes))
    }

    fn dek_path(&self, alt_name: &str) -> Result<PathBuf, KeyVaultError> {
        // Alt-names become file names; keep them to a safe charset.
        let valid = !alt_name.is_empty()
            && alt_name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if !valid {
            return Err(KeyVaultError::CreationFailed(format!("invalid alt-name: {alt_name}")));
        }
        Ok(self.key_dir.join(DEK_DIR).join(format!("{alt_name}.key")))
    }

    fn wrap_dek(
        master: &SecretVec<u8>,
        alt_name: &str,
        dek: &SecretVec<u8>,
    ) -> Result<Vec<u8>, KeyVaultError> {
        let cipher = ChaCha20Poly1305::new_from_slice(master.expose_secret())
            .map_err(|e| KeyVaultError::CreationFailed(format!("invalid master key: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                &Nonce::from(nonce_bytes),
                Payload { msg: dek.expose_secret(), aad: alt_name.as_bytes() },
            )
            .map_err(|e| KeyVaultError::CreationFailed(format!("DEK wrap failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unwrap_dek(
        master: &SecretVec<u8>,
        alt_name: &str,
        wrapped: &[u8],
    ) -> Result<SecretVec<u8>, KeyVaultError> {
        if wrapped.len() <= NONCE_SIZE {
            return Err(KeyVaultError::Corrupt(format!("{alt_name}: wrapped DEK truncated")));
        }

        let cipher = ChaCha20Poly1305::new_from_slice(master.expose_secret())
            .map_err(|_| KeyVaultError::Corrupt("invalid master key".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&wrapped[..NONCE_SIZE]);

        let dek = cipher
            .decrypt(
                &Nonce::from(nonce_bytes),
                Payload { msg: &wrapped[NONCE_SIZE..], aad: alt_name.as_bytes() },
            )
            .map_err(|_| {
                KeyVaultError::Corrupt(format!("{alt_name}: wrapped DEK failed authentication"))
            })?;

        if dek.len() != DEK_SIZE {
            return Err(KeyVaultError::Corrupt(format!("{alt_name}: DEK has invalid length")));
        }
        Ok(SecretVec::new(dek))
    }
}

impl KeyVault for FileKeyVault {
    fn get_or_create_data_key(&self, alt_name: &str) -> Result<KeyHandle, KeyVaultError> {
        let master = self.master_key()?;
        let path = self.dek_path(alt_name)?;

        loop {
            match fs::read(&path) {
                Ok(wrapped) => {
                    let dek = Self::unwrap_dek(&master, alt_name, &wrapped)?;
                    return Ok(KeyHandle::new(alt_name, dek));
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    let dek = generate_data_key();
                    let wrapped = Self::wrap_dek(&master, alt_name, &dek)?;
                    match write_new(&path, &wrapped) {
                        Ok(()) => {
                            // Privileged operation: key creation is always
                            // logged.
                            warn!(alt_name, "created new data encryption key");
                            return Ok(KeyHandle::new(alt_name, dek));
                        }
                        // Lost the create race; the winner's key is the one
                        // that survives. Re-read it.
                        Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Writes a file exclusively (failing if it already exists) with 0600
/// permissions on Unix.
fn write_new(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_init_and_reopen() {
        let dir = TempDir::new().expect("temp dir");
        FileKeyVault::init(dir.path()).expect("init failed");

        // Re-init is idempotent; reopening sees the same master key.
        FileKeyVault::init(dir.path()).expect("re-init failed");
        FileKeyVault::new(dir.path()).expect("open failed");
    }

    #[test]
    fn test_uninitialized_directory_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let result = FileKeyVault::new(dir.path());
        assert!(matches!(result, Err(KeyVaultError::Unavailable(_))));
    }

    #[test]
    fn test_idempotent_lookup_across_instances() {
        let dir = TempDir::new().expect("temp dir");
        let vault1 = FileKeyVault::init(dir.path()).unwrap();
        let first = vault1.get_or_create_data_key("primary-phi-key").unwrap();

        // A separate instance over the same directory must return the same
        // key, or previously stored ciphertext is lost.
        let vault2 = FileKeyVault::new(dir.path()).unwrap();
        let second = vault2.get_or_create_data_key("primary-phi-key").unwrap();

        assert_eq!(
            first.material().expose_secret(),
            second.material().expose_secret()
        );
    }

    #[test]
    fn test_concurrent_creation_converges() {
        let dir = TempDir::new().expect("temp dir");
        FileKeyVault::init(dir.path()).unwrap();
        let path = dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let vault = FileKeyVault::new(path).expect("open failed");
                    vault
                        .get_or_create_data_key("primary-phi-key")
                        .expect("lookup failed")
                        .material()
                        .expose_secret()
                        .clone()
                })
            })
            .collect();

        let keys: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().expect("join")).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]), "racers must converge on one key");
    }

    #[test]
    fn test_distinct_alt_names_distinct_keys() {
        let dir = TempDir::new().expect("temp dir");
        let vault = FileKeyVault::init(dir.path()).unwrap();

        let a = vault.get_or_create_data_key("primary-phi-key").unwrap();
        let b = vault.get_or_create_data_key("knowledge-key").unwrap();
        assert_ne!(a.material().expose_secret(), b.material().expose_secret());

        assert_eq!(
            vault.list_alt_names().unwrap(),
            vec!["knowledge-key".to_string(), "primary-phi-key".to_string()]
        );
    }

    #[test]
    fn test_corrupt_dek_file_detected() {
        let dir = TempDir::new().expect("temp dir");
        let vault = FileKeyVault::init(dir.path()).unwrap();
        vault.get_or_create_data_key("primary-phi-key").unwrap();

        let dek_path = dir.path().join(DEK_DIR).join("primary-phi-key.key");
        fs::write(&dek_path, b"garbage").unwrap();

        let result = vault.get_or_create_data_key("primary-phi-key");
        assert!(matches!(result, Err(KeyVaultError::Corrupt(_))));
    }

    #[test]
    fn test_tampered_wrapped_dek_detected() {
        let dir = TempDir::new().expect("temp dir");
        let vault = FileKeyVault::init(dir.path()).unwrap();
        vault.get_or_create_data_key("primary-phi-key").unwrap();

        let dek_path = dir.path().join(DEK_DIR).join("primary-phi-key.key");
        let mut wrapped = fs::read(&dek_path).unwrap();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0xFF;
        fs::write(&dek_path, &wrapped).unwrap();

        let result = vault.get_or_create_data_key("primary-phi-key");
        assert!(matches!(result, Err(KeyVaultError::Corrupt(_))));
    }

    #[test]
    fn test_invalid_alt_name_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let vault = FileKeyVault::init(dir.path()).unwrap();

        for bad in ["", "../escape", "a/b", "name with spaces"] {
            let result = vault.get_or_create_data_key(bad);
            assert!(matches!(result, Err(KeyVaultError::CreationFailed(_))), "accepted: {bad}");
        }
    }

    #[test]
    fn test_works_behind_shared_handle() {
        let dir = TempDir::new().expect("temp dir");
        let vault = Arc::new(FileKeyVault::init(dir.path()).unwrap());

        let a = vault.get_or_create_data_key("primary-phi-key").unwrap();
        let b = Arc::clone(&vault).get_or_create_data_key("primary-phi-key").unwrap();
        assert_eq!(a.material().expose_secret(), b.material().expose_secret());
    }
}
