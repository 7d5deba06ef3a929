//! # `PhiDB`
//!
//! Field-level encrypted health-record core: queryable encryption over
//! document-shaped entities, role-based access control, and an immutable
//! audit trail.
//!
//! ## Features
//!
//! - Three per-field encryption classes: deterministic (equality search,
//!   AES-256-SIV), range (order-comparable codes), random (AEAD,
//!   ChaCha20-Poly1305 or AES-256-GCM)
//! - Pluggable key vault with idempotent alt-name lookup and a read-mostly
//!   DEK cache
//! - Record codec between plaintext entities and encrypted storage
//!   documents
//! - Declarative per-entity rule tables with explicit-deny-wins semantics
//! - Role projection with visible/masked/omitted field shaping
//! - Fail-closed, append-only audit trail with a compliance query surface
//!
//! ## Example
//!
//! ```rust,ignore
//! use phidb::prelude::*;
//!
//! let vault = MemoryKeyVault::new();
//! let engine = FieldEncryptionEngine::new(vault, patient_schema(), CipherMode::default());
//! let codec = RecordCodec::new(engine);
//!
//! let stored = codec.to_storage(&patient_doc)?;
//! let entity = codec.from_storage(&stored)?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod codec;
pub mod context;
pub mod engine;
pub mod error;
pub mod kdf;
pub mod key_vault;
pub mod policy;
pub mod projection;
pub mod range;
pub mod schema;
pub mod sealed;
pub mod service;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::audit::{AuditEntry, AuditQuery, AuditStore, AuditWriter, MemoryAuditStore};
    pub use crate::codec::{Document, RecordCodec};
    pub use crate::context::FieldContext;
    pub use crate::engine::{CipherMode, FieldEncryptionEngine};
    pub use crate::error::{Error, KeyVaultError};
    pub use crate::key_vault::{CachedKeyVault, KeyVault, MemoryKeyVault};
    pub use crate::policy::{
        Action, Decision, Principal, PolicyEvaluator, Role, RuleTable, Subject,
    };
    pub use crate::projection::{project, ProjectedView, Visibility, VisibilityTable};
    pub use crate::schema::{
        medical_knowledge_schema, patient_schema, EncryptionClass, EntityKind, EntitySchema,
    };
    pub use crate::service::RecordService;
}
