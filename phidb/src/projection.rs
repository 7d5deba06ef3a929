//! Role projection: the role-filtered view of a decrypted entity.
//!
//! Projection is deliberately decoupled from decryption — a caller holding
//! a fully decrypted entity in memory still goes through the visibility
//! table before anything leaves the core. Default-deny: an attribute with
//! no table row for any held role is omitted, meaning the key is absent
//! from the output entirely (`null` would itself leak that the field
//! exists and is empty).

use crate::codec::Document;
use crate::policy::Role;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// What a role may see of one attribute.
///
/// Ordered from least to most permissive, so a role set's effective
/// visibility is the maximum across held roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    /// Key absent from the output entirely.
    Omitted,
    /// Key present, value redacted.
    Masked,
    /// Key present, decrypted value included.
    Visible,
}

/// Per-(role, attribute) visibility rules — the single source of truth for
/// what each role combination can see.
#[derive(Debug, Clone, Default)]
pub struct VisibilityTable {
    rules: HashMap<(Role, String), Visibility>,
}

impl VisibilityTable {
    /// Creates an empty (deny-everything) table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the visibility of one attribute for one role.
    #[must_use]
    pub fn set(mut self, role: Role, field: impl Into<String>, visibility: Visibility) -> Self {
        self.rules.insert((role, field.into()), visibility);
        self
    }

    /// Visibility of an attribute for a single role; unlisted is omitted.
    #[must_use]
    pub fn visibility(&self, role: Role, field: &str) -> Visibility {
        self.rules.get(&(role, field.to_string())).copied().unwrap_or(Visibility::Omitted)
    }

    /// Effective visibility for a role set: the most permissive of the held
    /// roles (capabilities are additive).
    #[must_use]
    pub fn effective(&self, roles: &BTreeSet<Role>, field: &str) -> Visibility {
        roles
            .iter()
            .map(|role| self.visibility(*role, field))
            .max()
            .unwrap_or(Visibility::Omitted)
    }

    fn visible_for(self, role: Role, fields: &[&str]) -> Self {
        fields.iter().fold(self, |table, field| table.set(role, *field, Visibility::Visible))
    }

    /// The standard visibility table for patient records.
    #[must_use]
    pub fn standard_patient() -> Self {
        const ALL: &[&str] = &[
            "id",
            "created_at",
            "first_name",
            "last_name",
            "email",
            "phone",
            "birth_date",
            "national_id",
            "diagnoses",
            "medications",
            "notes",
        ];
        const DEMOGRAPHICS: &[&str] =
            &["id", "created_at", "first_name", "last_name", "email", "phone", "birth_date"];

        Self::new()
            .visible_for(Role::Clinician, ALL)
            .visible_for(Role::PatientSelf, ALL)
            // Administrators manage records without reading clinical content;
            // the identifier is masked, clinical fields have no row at all.
            .visible_for(Role::Administrator, DEMOGRAPHICS)
            .set(Role::Administrator, "national_id", Visibility::Masked)
            .visible_for(
                Role::CareSupport,
                &["id", "created_at", "first_name", "last_name", "phone", "medications"],
            )
            .visible_for(
                Role::FrontDesk,
                &["id", "created_at", "first_name", "last_name", "email", "phone"],
            )
            .set(Role::FrontDesk, "birth_date", Visibility::Masked)
            .set(Role::FrontDesk, "national_id", Visibility::Masked)
    }

    /// The standard visibility table for knowledge-base entries.
    #[must_use]
    pub fn standard_medical_knowledge() -> Self {
        const ALL: &[&str] = &["id", "category", "created_at", "term", "definition", "source_notes"];

        Self::new()
            .visible_for(Role::Administrator, ALL)
            .visible_for(Role::Clinician, ALL)
            .visible_for(Role::CareSupport, ALL)
    }
}

/// A role-filtered view: attribute name to value, with a stable shape for
/// a given (entity, role set) pair.
pub type ProjectedView = BTreeMap<String, Value>;

/// Projects a decrypted entity through the visibility table.
///
/// Omitted attributes are absent from the result's keys; masked attributes
/// are present with a redacted value that never equals the true plaintext.
#[must_use]
pub fn project(entity: &Document, roles: &BTreeSet<Role>, table: &VisibilityTable) -> ProjectedView {
    let mut view = ProjectedView::new();

    for (name, value) in entity {
        match table.effective(roles, name) {
            Visibility::Visible => {
                view.insert(name.clone(), value.clone());
            }
            Visibility::Masked => {
                view.insert(name.clone(), mask_value(value));
            }
            Visibility::Omitted => {}
        }
    }

    view
}

/// Redacts a value while keeping a recognizable shape.
///
/// - ISO dates keep the year: `"1985-**-**"`
/// - other strings keep their separators and last four alphanumerics:
///   `"***-**-6789"`
/// - everything else collapses to `"***"`
///
/// The masking patterns live here, in one place, for compliance review.
#[must_use]
pub fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) if is_iso_date(s) => Value::String(format!("{}-**-**", &s[..4])),
        Value::String(s) if s.is_empty() => Value::String("***".to_string()),
        Value::String(s) => {
            let alnum_total = s.chars().filter(char::is_ascii_alphanumeric).count();
            // A masked value must never equal the plaintext: short strings
            // redact entirely instead of keeping their last four.
            let keep_from = if alnum_total > 4 { alnum_total - 4 } else { alnum_total };
            let mut seen = 0usize;
            let masked: String = s
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        seen += 1;
                        if seen > keep_from {
                            c
                        } else {
                            '*'
                        }
                    } else {
                        c
                    }
                })
                .collect();
            Value::String(masked)
        }
        _ => Value::String("***".to_string()),
    }
}

fn is_iso_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && s.chars().enumerate().all(|(i, c)| matches!(i, 4 | 7) || c.is_ascii_digit())
}
