//! Entity schemas: which fields are sensitive and how each one is encrypted.
//!
//! A field's [`EncryptionClass`] is fixed at schema-design time. Changing a
//! class requires re-encrypting every stored value for that field (a
//! migration); it is never a runtime switch, and the engine rejects stored
//! blobs whose class tag disagrees with the schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Cryptographic treatment of a classified field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionClass {
    /// Same plaintext always yields the same ciphertext; supports equality
    /// search. For fields routinely looked up exactly (surname, email, phone).
    Deterministic,
    /// Ciphertext carries an order-comparable code; supports interval
    /// queries. For fields queried by range (date of birth).
    Range,
    /// Freshly randomized per encryption; no query capability. For maximally
    /// sensitive fields (national identifiers, diagnoses, notes).
    Random,
}

impl EncryptionClass {
    /// Returns the stable wire tag for this class.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Deterministic => 1,
            Self::Range => 2,
            Self::Random => 3,
        }
    }

    /// Parses a wire tag back into a class.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Deterministic),
            2 => Some(Self::Range),
            3 => Some(Self::Random),
            _ => None,
        }
    }

    /// Returns the lowercase name used in stored documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Range => "range",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for EncryptionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity types the core stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A patient record aggregate.
    Patient,
    /// A clinical knowledge-base entry.
    MedicalKnowledge,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patient => f.write_str("patient"),
            Self::MedicalKnowledge => f.write_str("medical_knowledge"),
        }
    }
}

/// Declaration of a single classified field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Attribute name as it appears in the document.
    pub name: String,
    /// Cryptographic treatment, fixed for the schema's lifetime.
    pub class: EncryptionClass,
    /// Value decoded when the field is absent from a stored document
    /// (legacy data predating a schema change).
    pub absent_default: Value,
}

impl FieldSpec {
    /// Creates a field spec with a `null` absent-default.
    #[must_use]
    pub fn new(name: impl Into<String>, class: EncryptionClass) -> Self {
        Self { name: name.into(), class, absent_default: Value::Null }
    }

    /// Sets the value decoded when the field is missing from storage.
    #[must_use]
    pub fn with_absent_default(mut self, default: Value) -> Self {
        self.absent_default = default;
        self
    }
}

/// Per-entity-type schema: collection name, data key alt-name, and the set
/// of classified fields. Attributes not listed here are unclassified and
/// pass through the codec unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    kind: EntityKind,
    collection: String,
    key_alt_name: String,
    fields: HashMap<String, FieldSpec>,
}

impl EntitySchema {
    /// Creates an empty schema for an entity kind.
    ///
    /// # Arguments
    ///
    /// * `kind` - The entity type this schema describes
    /// * `collection` - Storage collection name
    /// * `key_alt_name` - Alt-name of the data key used for every classified
    ///   field in this collection (one DEK per collection, so deterministic
    ///   equality search works across all records)
    #[must_use]
    pub fn new(
        kind: EntityKind,
        collection: impl Into<String>,
        key_alt_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            collection: collection.into(),
            key_alt_name: key_alt_name.into(),
            fields: HashMap::new(),
        }
    }

    /// Declares a classified field.
    #[must_use]
    pub fn classify(mut self, spec: FieldSpec) -> Self {
        self.fields.insert(spec.name.clone(), spec);
        self
    }

    /// Returns the entity kind.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Returns the storage collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the alt-name of the collection's data key.
    #[must_use]
    pub fn key_alt_name(&self) -> &str {
        &self.key_alt_name
    }

    /// Looks up the spec for a classified field, if declared.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Returns whether a field is classified.
    #[must_use]
    pub fn is_classified(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterates over all classified field specs.
    pub fn classified_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }
}

/// Built-in schema for patient records.
///
/// Exact-lookup demographics are deterministic, the birth date is
/// range-queryable, and clinical content plus the national identifier are
/// randomized. `id` and `created_at` stay unclassified.
#[must_use]
pub fn patient_schema() -> EntitySchema {
    EntitySchema::new(EntityKind::Patient, "patients", "primary-phi-key")
        .classify(FieldSpec::new("last_name", EncryptionClass::Deterministic))
        .classify(FieldSpec::new("email", EncryptionClass::Deterministic))
        .classify(FieldSpec::new("phone", EncryptionClass::Deterministic))
        .classify(FieldSpec::new("birth_date", EncryptionClass::Range))
        .classify(FieldSpec::new("first_name", EncryptionClass::Random))
        .classify(FieldSpec::new("national_id", EncryptionClass::Random))
        .classify(
            FieldSpec::new("diagnoses", EncryptionClass::Random)
                .with_absent_default(Value::Array(Vec::new())),
        )
        .classify(
            FieldSpec::new("medications", EncryptionClass::Random)
                .with_absent_default(Value::Array(Vec::new())),
        )
        .classify(FieldSpec::new("notes", EncryptionClass::Random))
}

/// Built-in schema for clinical knowledge-base entries.
#[must_use]
pub fn medical_knowledge_schema() -> EntitySchema {
    EntitySchema::new(EntityKind::MedicalKnowledge, "medical_knowledge", "knowledge-key")
        .classify(FieldSpec::new("term", EncryptionClass::Deterministic))
        .classify(FieldSpec::new("definition", EncryptionClass::Random))
        .classify(FieldSpec::new("source_notes", EncryptionClass::Random))
}
