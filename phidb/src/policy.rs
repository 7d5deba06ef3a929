//! Role-based policy evaluation.
//!
//! The evaluator decides Grant / Deny / Abstain for a (role set, action,
//! target) triple against a declarative per-entity-type rule table. Held
//! roles are additive — capabilities are the union of all roles — except
//! that one role's explicit deny always overrides another role's allow for
//! the same action. That override is how a role with broad system rights
//! (Administrator) is deliberately excluded from clinical content.
//!
//! Every invocation appends exactly one audit entry, for grants and denies
//! alike, before the decision is returned; a failed append fails the
//! evaluation itself (fail-closed).

use crate::audit::{AuditDecision, AuditEntry, AuditWriter};
use crate::error::Error;
use crate::schema::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

/// The closed set of caller roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Elevated system privileges; intentionally excluded from raw clinical
    /// content via explicit deny rules.
    Administrator,
    /// Treating clinician with full clinical access.
    Clinician,
    /// Care-support staff.
    CareSupport,
    /// Front-desk staff handling demographics and scheduling.
    FrontDesk,
    /// A patient accessing their own linked record.
    PatientSelf,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Administrator => f.write_str("administrator"),
            Self::Clinician => f.write_str("clinician"),
            Self::CareSupport => f.write_str("care-support"),
            Self::FrontDesk => f.write_str("front-desk"),
            Self::PatientSelf => f.write_str("patient-self"),
        }
    }
}

/// Enumerated verbs a caller can request per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Read a record (non-sensitive projection).
    View,
    /// Read the sensitive subset of a record.
    ViewSensitiveSubset,
    /// Create a new record.
    Create,
    /// Edit non-sensitive attributes.
    Edit,
    /// Edit sensitive attributes.
    EditSensitiveSubset,
    /// Delete a record.
    Delete,
    /// Search across records.
    Search,
    /// Bulk import.
    Import,
    /// Aggregate statistics only.
    ViewAggregateStats,
    /// Read the caller's own linked record.
    ViewOwnRecordOnly,
}

impl Action {
    /// Whether the action is scoped to a specific record and therefore
    /// requires a target subject.
    #[must_use]
    pub const fn requires_subject(self) -> bool {
        matches!(
            self,
            Self::Edit | Self::EditSensitiveSubset | Self::Delete | Self::ViewOwnRecordOnly
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::View => "view",
            Self::ViewSensitiveSubset => "view-sensitive-subset",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::EditSensitiveSubset => "edit-sensitive-subset",
            Self::Delete => "delete",
            Self::Search => "search",
            Self::Import => "import",
            Self::ViewAggregateStats => "view-aggregate-stats",
            Self::ViewOwnRecordOnly => "view-own-record-only",
        };
        f.write_str(name)
    }
}

/// Effect of a single rule-table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleEffect {
    /// The role may perform the action.
    Allow,
    /// The role is explicitly barred from the action, overriding any other
    /// held role's allow.
    Deny,
}

/// Declarative rule table: `(entity type, role, action) -> effect`.
///
/// Absence of a row means the role neither grants nor denies the action —
/// evaluation over a role set with no matching rows yields `Abstain`.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: HashMap<(EntityKind, Role, Action), RuleEffect>,
}

impl RuleTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an allow row.
    #[must_use]
    pub fn allow(mut self, kind: EntityKind, role: Role, action: Action) -> Self {
        self.rules.insert((kind, role, action), RuleEffect::Allow);
        self
    }

    /// Adds an explicit deny row.
    #[must_use]
    pub fn deny(mut self, kind: EntityKind, role: Role, action: Action) -> Self {
        self.rules.insert((kind, role, action), RuleEffect::Deny);
        self
    }

    /// Looks up the effect for one (entity type, role, action) row.
    #[must_use]
    pub fn effect(&self, kind: EntityKind, role: Role, action: Action) -> Option<RuleEffect> {
        self.rules.get(&(kind, role, action)).copied()
    }

    /// The standard business rule table.
    ///
    /// Administrator holds broad system rights but carries explicit denies
    /// on the sensitive patient subset — encoded as deny rows, not as
    /// omissions, so the override survives any other held role's allow.
    #[must_use]
    pub fn standard() -> Self {
        use Action::{
            Create, Delete, Edit, EditSensitiveSubset, Import, Search, View,
            ViewAggregateStats, ViewOwnRecordOnly, ViewSensitiveSubset,
        };
        use EntityKind::{MedicalKnowledge, Patient};
        use Role::{Administrator, CareSupport, Clinician, FrontDesk, PatientSelf};

        Self::new()
            // Patient records.
            .allow(Patient, Administrator, View)
            .allow(Patient, Administrator, Create)
            .allow(Patient, Administrator, Edit)
            .allow(Patient, Administrator, Delete)
            .allow(Patient, Administrator, Search)
            .allow(Patient, Administrator, Import)
            .allow(Patient, Administrator, ViewAggregateStats)
            .deny(Patient, Administrator, ViewSensitiveSubset)
            .deny(Patient, Administrator, EditSensitiveSubset)
            .allow(Patient, Clinician, View)
            .allow(Patient, Clinician, ViewSensitiveSubset)
            .allow(Patient, Clinician, Create)
            .allow(Patient, Clinician, Edit)
            .allow(Patient, Clinician, EditSensitiveSubset)
            .allow(Patient, Clinician, Search)
            .allow(Patient, CareSupport, View)
            .allow(Patient, CareSupport, Search)
            .allow(Patient, FrontDesk, View)
            .allow(Patient, FrontDesk, Create)
            .allow(Patient, FrontDesk, Edit)
            .allow(Patient, FrontDesk, Search)
            .allow(Patient, PatientSelf, ViewOwnRecordOnly)
            // Knowledge base.
            .allow(MedicalKnowledge, Administrator, View)
            .allow(MedicalKnowledge, Administrator, Create)
            .allow(MedicalKnowledge, Administrator, Edit)
            .allow(MedicalKnowledge, Administrator, Delete)
            .allow(MedicalKnowledge, Administrator, Import)
            .allow(MedicalKnowledge, Administrator, Search)
            .allow(MedicalKnowledge, Clinician, View)
            .allow(MedicalKnowledge, Clinician, Search)
            .allow(MedicalKnowledge, Clinician, Create)
            .allow(MedicalKnowledge, CareSupport, View)
            .allow(MedicalKnowledge, CareSupport, Search)
    }
}

/// A caller with resolved, validated roles.
///
/// Role sets arrive already resolved by the (excluded) authentication
/// layer; the core never infers roles from identity fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable caller identity, recorded in every audit entry.
    pub id: String,
    /// The roles the caller holds.
    pub roles: BTreeSet<Role>,
    /// The patient record linked to this caller, if any (used by
    /// [`Action::ViewOwnRecordOnly`]).
    pub linked_patient: Option<String>,
}

impl Principal {
    /// Creates a principal with a role set.
    #[must_use]
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self { id: id.into(), roles: roles.into_iter().collect(), linked_patient: None }
    }

    /// Links the caller to their own patient record.
    #[must_use]
    pub fn with_linked_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.linked_patient = Some(patient_id.into());
        self
    }
}

/// The target record of a record-scoped action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// Record identifier.
    pub id: String,
    /// Identity of the record's owner, when ownership applies.
    pub owner: Option<String>,
}

impl Subject {
    /// Creates a subject for a record id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), owner: None }
    }

    /// Sets the record's owner identity.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Extracts the policy subject from a document, when it carries an `id`.
///
/// For owner-scoped records (a patient record is owned by its patient) the
/// record id doubles as the owner identity.
#[must_use]
pub fn subject_of(doc: &crate::codec::Document) -> Option<Subject> {
    let id = doc.get("id")?.as_str()?;
    Some(Subject::new(id).with_owner(id))
}

/// Why an evaluation denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Empty role set; rule lookup was skipped entirely.
    Unauthenticated,
    /// A held role carries an explicit deny row for the action.
    ExplicitRule(Role),
    /// The action requires a target subject and none was supplied.
    MissingSubject,
    /// Own-record access on a record the caller is not linked to.
    NotOwnRecord,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("unauthenticated caller"),
            Self::ExplicitRule(role) => write!(f, "explicit deny for role {role}"),
            Self::MissingSubject => f.write_str("missing subject"),
            Self::NotOwnRecord => f.write_str("not the caller's own record"),
        }
    }
}

/// Outcome of one policy evaluation.
///
/// Callers must treat `Abstain` exactly like `Deny`; the variants stay
/// separate because an abstain usually means a missing rule-table entry —
/// safe in production, worth surfacing in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The operation may proceed.
    Grant,
    /// The operation is denied for the given reason.
    Deny(DenyReason),
    /// No applicable rule; behaviorally a deny.
    Abstain,
}

impl Decision {
    /// Whether the operation may proceed.
    #[must_use]
    pub const fn is_grant(&self) -> bool {
        matches!(self, Self::Grant)
    }
}

/// Evaluates (role set, action, target) triples against a rule table,
/// auditing every decision.
pub struct PolicyEvaluator {
    table: RuleTable,
    audit: AuditWriter,
}

impl PolicyEvaluator {
    /// Creates an evaluator.
    ///
    /// # Arguments
    ///
    /// * `table` - The declarative rule table (injected, not built inline)
    /// * `audit` - Audit write path; every evaluation appends one entry
    pub fn new(table: RuleTable, audit: AuditWriter) -> Self {
        Self { table, audit }
    }

    /// Decides whether `principal` may perform `action` on `kind`.
    ///
    /// `subject` is required for record-scoped actions (see
    /// [`Action::requires_subject`]); its absence is a deny with a
    /// [`DenyReason::MissingSubject`] detail, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuditWriteFailure`] if the audit entry cannot be
    /// persisted — the decision is then unusable and the caller must fail
    /// its operation.
    pub fn evaluate(
        &self,
        principal: &Principal,
        action: Action,
        kind: EntityKind,
        subject: Option<&Subject>,
    ) -> Result<Decision, Error> {
        let decision = self.decide(principal, action, kind, subject);

        if !decision.is_grant() {
            debug!(actor = %principal.id, %action, entity = %kind, "policy denied");
        }

        let (audit_decision, details) = match &decision {
            Decision::Grant => (AuditDecision::Grant, "granted".to_string()),
            Decision::Deny(reason) => (AuditDecision::Deny, format!("denied: {reason}")),
            Decision::Abstain => {
                (AuditDecision::Deny, "abstain: no applicable rule".to_string())
            }
        };
        self.audit.append(AuditEntry::now(
            &principal.id,
            action,
            kind,
            subject.map(|s| s.id.clone()),
            audit_decision,
            details,
        ))?;

        Ok(decision)
    }

    fn decide(
        &self,
        principal: &Principal,
        action: Action,
        kind: EntityKind,
        subject: Option<&Subject>,
    ) -> Decision {
        // Unauthenticated callers are denied outright; the rule table is
        // never consulted.
        if principal.roles.is_empty() {
            return Decision::Deny(DenyReason::Unauthenticated);
        }

        if action.requires_subject() && subject.is_none() {
            return Decision::Deny(DenyReason::MissingSubject);
        }

        let mut granted = false;
        for role in &principal.roles {
            match self.table.effect(kind, *role, action) {
                Some(RuleEffect::Deny) => return Decision::Deny(DenyReason::ExplicitRule(*role)),
                Some(RuleEffect::Allow) => granted = true,
                None => {}
            }
        }

        if !granted {
            return Decision::Abstain;
        }

        if action == Action::ViewOwnRecordOnly {
            let owns = match (subject.and_then(|s| s.owner.as_deref()), &principal.linked_patient)
            {
                (Some(owner), Some(linked)) => owner == linked.as_str(),
                _ => false,
            };
            if !owns {
                return Decision::Deny(DenyReason::NotOwnRecord);
            }
        }

        Decision::Grant
    }
}
