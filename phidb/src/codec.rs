//! Record codec: plaintext documents to and from their encrypted storage
//! shape.
//!
//! The stored document mirrors the plaintext document; each classified
//! attribute is replaced by an embeddable object
//! `{"alg": <class>, "blob": <base64 sealed bytes>}` while unclassified
//! attributes and the record identifier pass through unchanged. Both
//! directions are pure functions of (document, key state) — decrypted
//! plaintext is never cached across calls.

use crate::error::Error;
use crate::engine::FieldEncryptionEngine;
use crate::key_vault::KeyVault;
use crate::schema::EntitySchema;
use crate::sealed::SealedValue;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value};

/// Document key carrying the encryption class of an encrypted field.
pub const ALG_KEY: &str = "alg";

/// Document key carrying the base64 sealed bytes of an encrypted field.
pub const BLOB_KEY: &str = "blob";

/// A JSON document as stored in (or destined for) the document database.
pub type Document = Map<String, Value>;

/// Converts entities between plaintext and encrypted storage documents.
pub struct RecordCodec<V: KeyVault> {
    engine: FieldEncryptionEngine<V>,
}

impl<V: KeyVault> RecordCodec<V> {
    /// Creates a codec around a field encryption engine.
    pub fn new(engine: FieldEncryptionEngine<V>) -> Self {
        Self { engine }
    }

    /// Returns the schema the codec encodes for.
    #[must_use]
    pub fn schema(&self) -> &EntitySchema {
        self.engine.schema()
    }

    /// Returns the underlying field encryption engine.
    #[must_use]
    pub fn engine(&self) -> &FieldEncryptionEngine<V> {
        &self.engine
    }

    /// Encrypts every declared classified attribute of a plaintext document.
    ///
    /// Attributes absent from the input stay absent in the output;
    /// unclassified attributes pass through unchanged.
    ///
    /// # Errors
    ///
    /// Propagates engine errors (`InvalidValue`, key vault failures,
    /// `EncryptionFailed`).
    pub fn to_storage(&self, entity: &Document) -> Result<Document, Error> {
        let mut stored = Document::new();

        for (name, value) in entity {
            if self.schema().is_classified(name) {
                let sealed = self.engine.encrypt_field(name, value)?;
                stored.insert(name.clone(), encode_blob(&sealed)?);
            } else {
                stored.insert(name.clone(), value.clone());
            }
        }

        Ok(stored)
    }

    /// Decrypts a stored document back into its plaintext entity form.
    ///
    /// A classified field absent from the stored document (legacy data
    /// predating a schema change) decodes to the field's declared
    /// absent-default rather than failing the whole record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecryptionFailure`] for a classified field whose
    /// stored value is not a well-formed encrypted blob, and propagates
    /// engine errors (`SchemaMismatch`, `DecryptionFailure`, key vault
    /// failures).
    pub fn from_storage(&self, stored: &Document) -> Result<Document, Error> {
        let mut entity = Document::new();

        for (name, value) in stored {
            if self.schema().is_classified(name) {
                let sealed = decode_blob(name, value)?;
                entity.insert(name.clone(), self.engine.decrypt_field(name, &sealed)?);
            } else {
                entity.insert(name.clone(), value.clone());
            }
        }

        for spec in self.schema().classified_fields() {
            if !entity.contains_key(&spec.name) {
                entity.insert(spec.name.clone(), spec.absent_default.clone());
            }
        }

        Ok(entity)
    }
}

impl<V: KeyVault> Clone for RecordCodec<V> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone() }
    }
}

fn encode_blob(sealed: &SealedValue) -> Result<Value, Error> {
    let mut obj = Map::new();
    obj.insert(ALG_KEY.to_string(), Value::String(sealed.class().to_string()));
    obj.insert(BLOB_KEY.to_string(), Value::String(BASE64.encode(sealed.to_bytes()?)));
    Ok(Value::Object(obj))
}

fn decode_blob(field: &str, value: &Value) -> Result<SealedValue, Error> {
    let malformed = |detail: &str| Error::DecryptionFailure {
        field: field.to_string(),
        detail: detail.to_string(),
    };

    let obj = value.as_object().ok_or_else(|| malformed("stored value is not an encrypted blob"))?;
    let encoded = obj
        .get(BLOB_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("encrypted blob is missing its payload"))?;
    let bytes = BASE64.decode(encoded).map_err(|_| malformed("encrypted blob is not base64"))?;

    // A truncated or malformed envelope is a data-integrity failure on this
    // record's field; only a future format version keeps its own kind.
    SealedValue::from_bytes(&bytes).map_err(|err| match err {
        Error::UnsupportedVersion { .. } => err,
        Error::InvalidSealed(detail) => {
            Error::DecryptionFailure { field: field.to_string(), detail }
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CipherMode;
    use crate::key_vault::MemoryKeyVault;
    use crate::schema::patient_schema;
    use serde_json::json;

    fn codec() -> RecordCodec<MemoryKeyVault> {
        RecordCodec::new(FieldEncryptionEngine::new(
            MemoryKeyVault::new(),
            patient_schema(),
            CipherMode::default(),
        ))
    }

    fn sample_patient() -> Document {
        json!({
            "id": "pat_0001",
            "created_at": "2024-06-02T09:30:00Z",
            "first_name": "Jane",
            "last_name": "Smith",
            "email": "jane.smith@example.com",
            "phone": "+1-555-0117",
            "birth_date": "1985-03-14",
            "national_id": "123-45-6789",
            "diagnoses": ["Hypertension"],
            "medications": ["Lisinopril 10mg"],
            "notes": "Follow-up in six months."
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_document_round_trip() {
        let codec = codec();
        let entity = sample_patient();

        let stored = codec.to_storage(&entity).expect("to_storage failed");
        let restored = codec.from_storage(&stored).expect("from_storage failed");

        assert_eq!(restored, entity);
    }

    #[test]
    fn test_no_plaintext_in_storage() {
        let codec = codec();
        let stored = codec.to_storage(&sample_patient()).unwrap();

        // Every classified field is an {"alg", "blob"} object; the record id
        // and creation timestamp stay plain.
        for field in ["last_name", "birth_date", "national_id", "diagnoses", "notes"] {
            let value = stored.get(field).unwrap();
            let obj = value.as_object().expect("classified field must be an encrypted blob");
            assert!(obj.contains_key(ALG_KEY));
            assert!(obj.contains_key(BLOB_KEY));
        }
        assert_eq!(stored.get("id").unwrap(), &json!("pat_0001"));
        assert_eq!(stored.get("created_at").unwrap(), &json!("2024-06-02T09:30:00Z"));

        let rendered = serde_json::to_string(&stored).unwrap();
        assert!(!rendered.contains("Smith"));
        assert!(!rendered.contains("Hypertension"));
        assert!(!rendered.contains("123-45-6789"));
    }

    #[test]
    fn test_deterministic_fields_equal_across_records() {
        let codec = codec();

        let mut a = sample_patient();
        a.insert("id".to_string(), json!("pat_0002"));
        let b = sample_patient();

        let stored_a = codec.to_storage(&a).unwrap();
        let stored_b = codec.to_storage(&b).unwrap();

        // Same surname, same stored blob: equality search works across
        // records.
        assert_eq!(stored_a.get("last_name"), stored_b.get("last_name"));
        // Randomized fields do not repeat.
        assert_ne!(stored_a.get("national_id"), stored_b.get("national_id"));
    }

    #[test]
    fn test_absent_classified_field_decodes_to_default() {
        let codec = codec();

        // Legacy record written before the medications field existed.
        let mut entity = sample_patient();
        entity.remove("medications");
        entity.remove("notes");

        let stored = codec.to_storage(&entity).unwrap();
        let restored = codec.from_storage(&stored).unwrap();

        assert_eq!(restored.get("medications").unwrap(), &json!([]));
        assert_eq!(restored.get("notes").unwrap(), &Value::Null);
    }

    #[test]
    fn test_malformed_stored_blob_is_decryption_failure() {
        let codec = codec();
        let mut stored = codec.to_storage(&sample_patient()).unwrap();

        stored.insert("notes".to_string(), json!("not-an-encrypted-blob"));
        let result = codec.from_storage(&stored);
        assert!(matches!(result, Err(Error::DecryptionFailure { .. })));

        let mut stored = codec.to_storage(&sample_patient()).unwrap();
        stored.insert("notes".to_string(), json!({"alg": "random", "blob": "!!!not base64!!!"}));
        let result = codec.from_storage(&stored);
        assert!(matches!(result, Err(Error::DecryptionFailure { .. })));
    }

    #[test]
    fn test_truncated_stored_blob_is_decryption_failure() {
        use base64::engine::general_purpose::STANDARD;

        let codec = codec();
        let stored = codec.to_storage(&sample_patient()).unwrap();

        let encoded = stored["notes"][BLOB_KEY].as_str().unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        let truncated = STANDARD.encode(&bytes[..4]);

        let mut broken = stored;
        broken.insert("notes".to_string(), json!({ALG_KEY: "random", BLOB_KEY: truncated}));
        let result = codec.from_storage(&broken);
        assert!(matches!(result, Err(Error::DecryptionFailure { .. })));
    }

    #[test]
    fn test_unclassified_fields_pass_through() {
        let codec = codec();
        let mut entity = sample_patient();
        entity.insert("clinic_site".to_string(), json!("north-campus"));

        let stored = codec.to_storage(&entity).unwrap();
        assert_eq!(stored.get("clinic_site").unwrap(), &json!("north-campus"));

        let restored = codec.from_storage(&stored).unwrap();
        assert_eq!(restored.get("clinic_site").unwrap(), &json!("north-campus"));
    }
}
