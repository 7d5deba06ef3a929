//! Record service: the enforcement path every read and write goes through.
//!
//! Order is fixed: the policy evaluator is consulted first (which also
//! writes the audit entry), then the codec converts between storage and
//! domain representations, then projection shapes the payload. Collaborators
//! are injected at construction; nothing here builds a vault, store, or
//! table inline.

use crate::codec::{Document, RecordCodec};
use crate::error::Error;
use crate::key_vault::KeyVault;
use crate::policy::{subject_of, Action, Decision, DenyReason, Principal, PolicyEvaluator};
use crate::projection::{project, ProjectedView, VisibilityTable};
use std::sync::Arc;

/// Read/write facade for one entity collection.
pub struct RecordService<V: KeyVault> {
    evaluator: Arc<PolicyEvaluator>,
    codec: RecordCodec<V>,
    visibility: Arc<VisibilityTable>,
}

impl<V: KeyVault> RecordService<V> {
    /// Creates a service from injected collaborators.
    pub fn new(
        evaluator: Arc<PolicyEvaluator>,
        codec: RecordCodec<V>,
        visibility: VisibilityTable,
    ) -> Self {
        Self { evaluator, codec, visibility: Arc::new(visibility) }
    }

    /// Reads a stored record on behalf of a caller.
    ///
    /// Evaluates policy (auditing the decision), decrypts the document, and
    /// returns the role-filtered projection.
    ///
    /// # Errors
    ///
    /// [`Error::PolicyDeny`] when the evaluation denies or abstains,
    /// [`Error::MissingSubject`] when a record-scoped action lacks a
    /// subject, plus codec and key vault errors on the granted path.
    pub fn fetch(
        &self,
        principal: &Principal,
        action: Action,
        stored: &Document,
    ) -> Result<ProjectedView, Error> {
        let subject = subject_of(stored);
        let decision = self.evaluator.evaluate(
            principal,
            action,
            self.codec.schema().kind(),
            subject.as_ref(),
        )?;
        ensure_granted(decision)?;

        let entity = self.codec.from_storage(stored)?;
        Ok(project(&entity, &principal.roles, &self.visibility))
    }

    /// Writes a plaintext entity on behalf of a caller, returning the
    /// encrypted storage document.
    ///
    /// # Errors
    ///
    /// Same surface as [`Self::fetch`], plus encryption errors.
    pub fn store(
        &self,
        principal: &Principal,
        action: Action,
        entity: &Document,
    ) -> Result<Document, Error> {
        let subject = subject_of(entity);
        let decision = self.evaluator.evaluate(
            principal,
            action,
            self.codec.schema().kind(),
            subject.as_ref(),
        )?;
        ensure_granted(decision)?;

        self.codec.to_storage(entity)
    }
}

impl<V: KeyVault> Clone for RecordService<V> {
    fn clone(&self) -> Self {
        Self {
            evaluator: Arc::clone(&self.evaluator),
            codec: self.codec.clone(),
            visibility: Arc::clone(&self.visibility),
        }
    }
}

fn ensure_granted(decision: Decision) -> Result<(), Error> {
    match decision {
        Decision::Grant => Ok(()),
        Decision::Deny(DenyReason::MissingSubject) => Err(Error::MissingSubject),
        Decision::Deny(reason) => Err(Error::PolicyDeny(reason.to_string())),
        // Behaviorally identical to a deny for every caller.
        Decision::Abstain => Err(Error::PolicyDeny("no applicable rule".to_string())),
    }
}
