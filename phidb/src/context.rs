//! Field context for key derivation and domain separation.

use crate::schema::EncryptionClass;
use std::fmt;

/// Context binding a ciphertext to its collection, field, and encryption
/// class.
///
/// The context ensures that:
/// - Different fields of the same record never share a working key
/// - A ciphertext moved between fields or collections fails authentication
/// - Re-encryption migrations are supported via versioning
///
/// # Example
///
/// ```
/// use phidb::context::FieldContext;
/// use phidb::schema::EncryptionClass;
///
/// let ctx = FieldContext::new("patients", "last_name", EncryptionClass::Deterministic)
///     .with_version(1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldContext {
    collection: String,
    field: String,
    class: EncryptionClass,
    version: u32,
}

impl FieldContext {
    /// Creates a new field context.
    ///
    /// # Arguments
    ///
    /// * `collection` - Storage collection name
    /// * `field` - Attribute name within the collection
    /// * `class` - The field's configured encryption class
    #[must_use]
    pub fn new(
        collection: impl Into<String>,
        field: impl Into<String>,
        class: EncryptionClass,
    ) -> Self {
        Self { collection: collection.into(), field: field.into(), class, version: 1 }
    }

    /// Sets the version for re-encryption migration support.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the encryption class.
    #[must_use]
    pub const fn class(&self) -> EncryptionClass {
        self.class
    }

    /// Returns the version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for FieldContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}|v{}", self.collection, self.field, self.class, self.version)
    }
}
