//! Error types for `PhiDB` operations.

use std::fmt;

/// Main error type for `PhiDB` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed for a single record's field (data-integrity failure,
    /// not absence — callers must surface it, never treat it as "no data")
    #[error("decryption failure on field '{field}': {detail}")]
    DecryptionFailure {
        /// The classified field whose ciphertext could not be decrypted
        field: String,
        /// What went wrong (no key material, no plaintext)
        detail: String,
    },

    /// Stored algorithm class does not match the field's configured class
    /// (indicates a misconfigured or incomplete migration)
    #[error("schema mismatch on field '{field}': stored {stored}, configured {configured}")]
    SchemaMismatch {
        /// The field whose ciphertext carries the unexpected class tag
        field: String,
        /// Class tag found in the stored blob
        stored: String,
        /// Class currently configured in the entity schema
        configured: String,
    },

    /// Key vault operation failed
    #[error("key vault error: {0}")]
    KeyVault(#[from] KeyVaultError),

    /// Sealed-value envelope parsing failed
    #[error("invalid sealed value: {0}")]
    InvalidSealed(String),

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// Unsupported sealed-value format version
    #[error("unsupported version: {version} (supported: {supported})")]
    UnsupportedVersion {
        /// The version found in the ciphertext
        version: u8,
        /// Supported versions
        supported: String,
    },

    /// Plaintext cannot be encoded for the field's encryption class
    /// (e.g. a non-date, non-integer value on a range-classified field)
    #[error("invalid value for field '{field}': {detail}")]
    InvalidValue {
        /// The field the value was destined for
        field: String,
        /// Why the value is not encodable
        detail: String,
    },

    /// The policy evaluator denied the operation (expected outcome, not a
    /// system fault)
    #[error("policy denied: {0}")]
    PolicyDeny(String),

    /// A target-scoped action was requested without a target entity
    #[error("missing subject: the requested action requires a target entity")]
    MissingSubject,

    /// The audit trail could not be written; the audited operation must not
    /// proceed (fail-closed)
    #[error("audit write failure: {0}")]
    AuditWriteFailure(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors specific to key vault operations.
#[derive(Debug)]
pub enum KeyVaultError {
    /// The backing key store cannot be reached (retryable)
    Unavailable(String),

    /// A key exists under the alt-name but is unreadable or malformed
    /// (fatal — implies key material loss, never retried silently)
    Corrupt(String),

    /// Data key creation failed
    CreationFailed(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for KeyVaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "key vault unavailable: {msg}"),
            Self::Corrupt(msg) => write!(f, "key corrupt: {msg}"),
            Self::CreationFailed(msg) => write!(f, "data key creation failed: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KeyVaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeyVaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
