//! Field encryption engine.
//!
//! The engine resolves a field's declared [`EncryptionClass`], fetches the
//! collection's data key through the [`KeyVault`], and applies the matching
//! treatment:
//!
//! - `Deterministic` — AES-256-SIV with the field context as AAD; repeated
//!   plaintexts produce byte-identical ciphertext, so stored values support
//!   equality search.
//! - `Range` — a keyed order code (see [`crate::range`]) followed by a
//!   randomized AEAD blob of the true plaintext.
//! - `Random` — fresh random nonce per call, ChaCha20-Poly1305 or
//!   AES-256-GCM per [`CipherMode`].
//!
//! Decryption is defensive: a stored class tag that disagrees with the
//! schema is a [`Error::SchemaMismatch`], and malformed or tampered
//! ciphertext is a [`Error::DecryptionFailure`] — never a silent `null`.

use crate::context::FieldContext;
use crate::error::Error;
use crate::kdf::{derive_aead_key, derive_siv_key};
use crate::key_vault::KeyVault;
use crate::range::{ordinal, RangeParams};
use crate::schema::{EncryptionClass, EntitySchema, FieldSpec};
use crate::sealed::SealedValue;
use aes_gcm::Aes256Gcm;
use aes_siv::Aes256SivAead;
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce,
};
use secrecy::{ExposeSecret, SecretVec};
use serde_json::Value;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Nonce size for the randomized AEAD ciphers (96 bits).
const NONCE_SIZE: usize = 12;

/// AEAD cipher used for `Random` and `Range` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// ChaCha20-Poly1305 AEAD cipher (default).
    ChaCha20Poly1305,
    /// AES-256-GCM AEAD cipher.
    Aes256Gcm,
}

impl Default for CipherMode {
    fn default() -> Self {
        Self::ChaCha20Poly1305
    }
}

/// Encrypts and decrypts classified field values for one entity schema.
///
/// # Example
///
/// ```
/// use phidb::engine::{CipherMode, FieldEncryptionEngine};
/// use phidb::key_vault::MemoryKeyVault;
/// use phidb::schema::patient_schema;
/// use serde_json::json;
///
/// # fn main() -> Result<(), phidb::error::Error> {
/// let engine =
///     FieldEncryptionEngine::new(MemoryKeyVault::new(), patient_schema(), CipherMode::default());
///
/// let sealed = engine.encrypt_field("last_name", &json!("Smith"))?;
/// let plaintext = engine.decrypt_field("last_name", &sealed)?;
///
/// assert_eq!(plaintext, json!("Smith"));
/// # Ok(())
/// # }
/// ```
pub struct FieldEncryptionEngine<V: KeyVault> {
    vault: Arc<V>,
    schema: Arc<EntitySchema>,
    cipher_mode: CipherMode,
}

impl<V: KeyVault> FieldEncryptionEngine<V> {
    /// Creates an engine for one entity schema.
    ///
    /// # Arguments
    ///
    /// * `vault` - Key vault resolving the schema's data key alt-name
    /// * `schema` - The entity schema declaring field classifications
    /// * `cipher_mode` - AEAD cipher for randomized payloads
    pub fn new(vault: V, schema: EntitySchema, cipher_mode: CipherMode) -> Self {
        Self { vault: Arc::new(vault), schema: Arc::new(schema), cipher_mode }
    }

    /// Returns the schema this engine encrypts for.
    #[must_use]
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    fn field_spec(&self, field: &str) -> Result<&FieldSpec, Error> {
        self.schema.field(field).ok_or_else(|| Error::InvalidValue {
            field: field.to_string(),
            detail: "not a classified field of this schema".to_string(),
        })
    }

    fn context_for(&self, spec: &FieldSpec) -> FieldContext {
        FieldContext::new(self.schema.collection(), &spec.name, spec.class)
    }

    fn data_key(&self) -> Result<SecretVec<u8>, Error> {
        let handle = self.vault.get_or_create_data_key(self.schema.key_alt_name())?;
        Ok(SecretVec::new(handle.material().expose_secret().clone()))
    }

    /// Encrypts a field value under its declared class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] for an unclassified field or a
    /// non-range-encodable value on a range field, key vault errors from
    /// the lookup, and [`Error::EncryptionFailed`] if the cipher rejects
    /// the input.
    pub fn encrypt_field(&self, field: &str, value: &Value) -> Result<SealedValue, Error> {
        let spec = self.field_spec(field)?;
        let context = self.context_for(spec);
        let dek = self.data_key()?;

        let plaintext = Zeroizing::new(
            serde_json::to_vec(value)
                .map_err(|e| Error::EncryptionFailed(format!("value serialization: {e}")))?,
        );
        let aad = Zeroizing::new(context.to_string().into_bytes());

        match spec.class {
            EncryptionClass::Deterministic => {
                let data = self.seal_deterministic(&dek, &context, &plaintext, &aad)?;
                Ok(SealedValue::new(spec.class, self.schema.key_alt_name(), Vec::new(), None, data))
            }
            EncryptionClass::Random => {
                let (nonce, data) = self.seal_randomized(&dek, &context, &plaintext, &aad)?;
                Ok(SealedValue::new(spec.class, self.schema.key_alt_name(), nonce, None, data))
            }
            EncryptionClass::Range => {
                let ord = ordinal(field, value)?;
                let code = RangeParams::derive(&dek, &context)?.code(ord);
                let (nonce, data) = self.seal_randomized(&dek, &context, &plaintext, &aad)?;
                Ok(SealedValue::new(
                    spec.class,
                    self.schema.key_alt_name(),
                    nonce,
                    Some(code),
                    data,
                ))
            }
        }
    }

    /// Decrypts a sealed field value back to its plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the blob's class tag disagrees
    /// with the field's configured class, and [`Error::DecryptionFailure`]
    /// for malformed, truncated, or tampered ciphertext.
    pub fn decrypt_field(&self, field: &str, sealed: &SealedValue) -> Result<Value, Error> {
        let spec = self.field_spec(field)?;
        if sealed.class() != spec.class {
            return Err(Error::SchemaMismatch {
                field: field.to_string(),
                stored: sealed.class().to_string(),
                configured: spec.class.to_string(),
            });
        }

        let context = self.context_for(spec);
        let dek = self.data_key()?;
        let aad = Zeroizing::new(context.to_string().into_bytes());

        let plaintext = match spec.class {
            EncryptionClass::Deterministic => {
                self.open_deterministic(&dek, &context, field, sealed.data(), &aad)?
            }
            EncryptionClass::Random | EncryptionClass::Range => {
                self.open_randomized(&dek, &context, field, sealed.nonce(), sealed.data(), &aad)?
            }
        };

        serde_json::from_slice(&plaintext).map_err(|_| Error::DecryptionFailure {
            field: field.to_string(),
            detail: "decrypted payload is not a valid value".to_string(),
        })
    }

    /// Computes the order code a plaintext would seal to, for building
    /// interval queries against stored range-classified values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if the field is not range-classified
    /// or the value is not range-encodable.
    pub fn range_code(&self, field: &str, value: &Value) -> Result<u128, Error> {
        let spec = self.field_spec(field)?;
        if spec.class != EncryptionClass::Range {
            return Err(Error::InvalidValue {
                field: field.to_string(),
                detail: format!("range query on a {} field", spec.class),
            });
        }

        let context = self.context_for(spec);
        let dek = self.data_key()?;
        let ord = ordinal(field, value)?;
        Ok(RangeParams::derive(&dek, &context)?.code(ord))
    }

    fn seal_deterministic(
        &self,
        dek: &SecretVec<u8>,
        context: &FieldContext,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let key = derive_siv_key(dek, context)?;
        let cipher = Aes256SivAead::new_from_slice(key.expose_secret())
            .map_err(|e| Error::EncryptionFailed(format!("invalid SIV subkey: {e}")))?;

        // AES-SIV is deterministic under a zero nonce; the synthetic IV
        // covers plaintext and AAD.
        cipher
            .encrypt(&Default::default(), Payload { msg: plaintext, aad })
            .map_err(|e| Error::EncryptionFailed(format!("AES-SIV encryption failed: {e}")))
    }

    fn open_deterministic(
        &self,
        dek: &SecretVec<u8>,
        context: &FieldContext,
        field: &str,
        data: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let key = derive_siv_key(dek, context)?;
        let cipher = Aes256SivAead::new_from_slice(key.expose_secret())
            .map_err(|e| Error::DecryptionFailure {
                field: field.to_string(),
                detail: format!("invalid SIV subkey: {e}"),
            })?;

        cipher.decrypt(&Default::default(), Payload { msg: data, aad }).map_err(|_| {
            Error::DecryptionFailure {
                field: field.to_string(),
                detail: "authentication failed: ciphertext corrupted or tampered".to_string(),
            }
        })
    }

    fn seal_randomized(
        &self,
        dek: &SecretVec<u8>,
        context: &FieldContext,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let key = derive_aead_key(dek, context)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let payload = Payload { msg: plaintext, aad };
        let data = match self.cipher_mode {
            CipherMode::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(key.expose_secret())
                    .map_err(|e| Error::EncryptionFailed(format!("invalid AEAD subkey: {e}")))?;
                cipher.encrypt(&Nonce::from(nonce_bytes), payload).map_err(|e| {
                    Error::EncryptionFailed(format!("ChaCha20-Poly1305 encryption failed: {e}"))
                })?
            }
            CipherMode::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(key.expose_secret())
                    .map_err(|e| Error::EncryptionFailed(format!("invalid AEAD subkey: {e}")))?;
                cipher.encrypt(aes_gcm::Nonce::from_slice(&nonce_bytes), payload).map_err(
                    |e| Error::EncryptionFailed(format!("AES-256-GCM encryption failed: {e}")),
                )?
            }
        };

        Ok((nonce_bytes.to_vec(), data))
    }

    fn open_randomized(
        &self,
        dek: &SecretVec<u8>,
        context: &FieldContext,
        field: &str,
        nonce: &[u8],
        data: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let key = derive_aead_key(dek, context)?;

        let nonce_bytes: [u8; NONCE_SIZE] =
            nonce.try_into().map_err(|_| Error::DecryptionFailure {
                field: field.to_string(),
                detail: "invalid nonce size".to_string(),
            })?;

        let auth_failed = || Error::DecryptionFailure {
            field: field.to_string(),
            detail: "authentication failed: ciphertext corrupted or tampered".to_string(),
        };

        let payload = Payload { msg: data, aad };
        match self.cipher_mode {
            CipherMode::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(key.expose_secret())
                    .map_err(|_| auth_failed())?;
                cipher.decrypt(&Nonce::from(nonce_bytes), payload).map_err(|_| auth_failed())
            }
            CipherMode::Aes256Gcm => {
                let cipher =
                    Aes256Gcm::new_from_slice(key.expose_secret()).map_err(|_| auth_failed())?;
                cipher
                    .decrypt(aes_gcm::Nonce::from_slice(&nonce_bytes), payload)
                    .map_err(|_| auth_failed())
            }
        }
    }
}

impl<V: KeyVault> Clone for FieldEncryptionEngine<V> {
    fn clone(&self) -> Self {
        Self {
            vault: Arc::clone(&self.vault),
            schema: Arc::clone(&self.schema),
            cipher_mode: self.cipher_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_vault::MemoryKeyVault;
    use crate::schema::patient_schema;
    use serde_json::json;

    fn engine() -> FieldEncryptionEngine<MemoryKeyVault> {
        FieldEncryptionEngine::new(MemoryKeyVault::new(), patient_schema(), CipherMode::default())
    }

    #[test]
    fn test_round_trip_all_classes() {
        let engine = engine();

        for (field, value) in [
            ("last_name", json!("Smith")),
            ("birth_date", json!("1985-03-14")),
            ("diagnoses", json!(["Hypertension", "Type 2 diabetes"])),
        ] {
            let sealed = engine.encrypt_field(field, &value).expect("encryption failed");
            let decrypted = engine.decrypt_field(field, &sealed).expect("decryption failed");
            assert_eq!(decrypted, value, "round trip failed for {field}");
        }
    }

    #[test]
    fn test_round_trip_empty_string() {
        let engine = engine();
        let sealed = engine.encrypt_field("notes", &json!("")).unwrap();
        assert_eq!(engine.decrypt_field("notes", &sealed).unwrap(), json!(""));
    }

    #[test]
    fn test_round_trip_empty_list() {
        let engine = engine();
        let sealed = engine.encrypt_field("medications", &json!([])).unwrap();
        assert_eq!(engine.decrypt_field("medications", &sealed).unwrap(), json!([]));
    }

    #[test]
    fn test_deterministic_fields_are_deterministic() {
        let engine = engine();

        let sealed1 = engine.encrypt_field("last_name", &json!("Smith")).unwrap();
        let sealed2 = engine.encrypt_field("last_name", &json!("Smith")).unwrap();
        assert_eq!(
            sealed1.to_bytes().unwrap(),
            sealed2.to_bytes().unwrap(),
            "equality search requires byte-identical ciphertext"
        );

        let sealed3 = engine.encrypt_field("last_name", &json!("Jones")).unwrap();
        assert_ne!(sealed1.to_bytes().unwrap(), sealed3.to_bytes().unwrap());
    }

    #[test]
    fn test_random_fields_are_randomized() {
        let engine = engine();

        let sealed1 = engine.encrypt_field("national_id", &json!("123-45-6789")).unwrap();
        let sealed2 = engine.encrypt_field("national_id", &json!("123-45-6789")).unwrap();
        assert_ne!(sealed1.to_bytes().unwrap(), sealed2.to_bytes().unwrap());

        // Both still decrypt to the same plaintext.
        assert_eq!(engine.decrypt_field("national_id", &sealed1).unwrap(), json!("123-45-6789"));
        assert_eq!(engine.decrypt_field("national_id", &sealed2).unwrap(), json!("123-45-6789"));
    }

    #[test]
    fn test_range_order_codes_compare_like_plaintexts() {
        let engine = engine();

        let older = engine.encrypt_field("birth_date", &json!("1950-01-01")).unwrap();
        let younger = engine.encrypt_field("birth_date", &json!("1990-12-31")).unwrap();

        assert!(older.order_code().unwrap() < younger.order_code().unwrap());

        // Query-side code matches the stored code.
        let query_code = engine.range_code("birth_date", &json!("1950-01-01")).unwrap();
        assert_eq!(query_code, older.order_code().unwrap());
    }

    #[test]
    fn test_range_code_rejects_non_range_field() {
        let engine = engine();
        let result = engine.range_code("last_name", &json!("Smith"));
        assert!(matches!(result, Err(Error::InvalidValue { .. })));
    }

    #[test]
    fn test_aes_gcm_mode_round_trip() {
        let engine = FieldEncryptionEngine::new(
            MemoryKeyVault::new(),
            patient_schema(),
            CipherMode::Aes256Gcm,
        );

        let sealed = engine.encrypt_field("notes", &json!("post-op check normal")).unwrap();
        assert_eq!(engine.decrypt_field("notes", &sealed).unwrap(), json!("post-op check normal"));
    }

    #[test]
    fn test_schema_mismatch_detected() {
        let engine = engine();

        // A migration bug: the blob says random, the schema says
        // deterministic.
        let sealed = engine.encrypt_field("national_id", &json!("123-45-6789")).unwrap();
        let mislabeled = SealedValue::new(
            EncryptionClass::Random,
            sealed.key_alt_name(),
            sealed.nonce().to_vec(),
            None,
            sealed.data().to_vec(),
        );

        let result = engine.decrypt_field("last_name", &mislabeled);
        assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn test_tampered_ciphertext_is_decryption_failure() {
        let engine = engine();
        let sealed = engine.encrypt_field("diagnoses", &json!(["Hypertension"])).unwrap();

        let mut data = sealed.data().to_vec();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        let tampered = SealedValue::new(
            sealed.class(),
            sealed.key_alt_name(),
            sealed.nonce().to_vec(),
            None,
            data,
        );

        let result = engine.decrypt_field("diagnoses", &tampered);
        assert!(matches!(result, Err(Error::DecryptionFailure { .. })));
    }

    #[test]
    fn test_ciphertext_bound_to_field() {
        // Moving a blob between two deterministic fields must fail
        // authentication: the field context is the AAD.
        let engine = engine();
        let sealed = engine.encrypt_field("email", &json!("a@example.com")).unwrap();

        let result = engine.decrypt_field("phone", &sealed);
        assert!(matches!(result, Err(Error::DecryptionFailure { .. })));
    }

    #[test]
    fn test_unclassified_field_rejected() {
        let engine = engine();
        let result = engine.encrypt_field("created_at", &json!("2024-01-01T00:00:00Z"));
        assert!(matches!(result, Err(Error::InvalidValue { .. })));
    }

    #[test]
    fn test_range_field_rejects_unencodable_value() {
        let engine = engine();
        let result = engine.encrypt_field("birth_date", &json!({"year": 1985}));
        assert!(matches!(result, Err(Error::InvalidValue { .. })));
    }

    #[test]
    fn test_engine_clone_shares_keys() {
        let engine1 = engine();
        let engine2 = engine1.clone();

        let sealed = engine1.encrypt_field("last_name", &json!("Smith")).unwrap();
        assert_eq!(engine2.decrypt_field("last_name", &sealed).unwrap(), json!("Smith"));
    }
}
