//! Immutable audit trail for policy decisions and data operations.
//!
//! Every policy evaluation and every audited data mutation appends exactly
//! one [`AuditEntry`]. The store surface is append-and-read only — there is
//! no update or delete. Appends are fail-closed: if the store stays
//! unreachable after bounded retries, the triggering operation must fail
//! rather than proceed unaudited.

use crate::policy::Action;
use crate::schema::EntityKind;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::error;

/// Maximum number of entries returned by a single query.
pub const MAX_PAGE_SIZE: usize = 500;

/// Outcome recorded for an audited decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditDecision {
    /// The operation was permitted.
    Grant,
    /// The operation was denied.
    Deny,
}

/// A single immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Seconds since the UNIX epoch.
    pub timestamp: u64,
    /// Identity of the caller the decision was made for.
    pub actor: String,
    /// The requested action.
    pub action: Action,
    /// Entity type the action targeted.
    pub entity_kind: EntityKind,
    /// Specific record id, when the action was record-scoped.
    pub entity_id: Option<String>,
    /// Grant or deny.
    pub decision: AuditDecision,
    /// Free-form detail (deny reason, operation note). Never plaintext PHI.
    pub details: String,
}

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn now(
        actor: impl Into<String>,
        action: Action,
        entity_kind: EntityKind,
        entity_id: Option<String>,
        decision: AuditDecision,
        details: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: epoch_secs(),
            actor: actor.into(),
            action,
            entity_kind,
            entity_id,
            decision,
            details: details.into(),
        }
    }
}

/// Seconds since the UNIX epoch.
#[must_use]
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

/// Filters for the compliance read path.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Only entries at or after this epoch-seconds timestamp.
    pub since: Option<u64>,
    /// Only entries for this action.
    pub action: Option<Action>,
    /// Only entries for this entity type.
    pub entity_kind: Option<EntityKind>,
    /// Page size; clamped to [`MAX_PAGE_SIZE`]. `None` means the cap.
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Creates an unfiltered query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to entries at or after `since` (epoch seconds).
    #[must_use]
    pub const fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Restricts to one action.
    #[must_use]
    pub const fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Restricts to one entity type.
    #[must_use]
    pub const fn entity_kind(mut self, kind: EntityKind) -> Self {
        self.entity_kind = Some(kind);
        self
    }

    /// Sets the page size (still clamped to [`MAX_PAGE_SIZE`]).
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        self.since.map_or(true, |s| entry.timestamp >= s)
            && self.action.map_or(true, |a| entry.action == a)
            && self.entity_kind.map_or(true, |k| entry.entity_kind == k)
    }
}

/// Error from the backing audit store.
#[derive(Debug, thiserror::Error)]
#[error("audit store error: {0}")]
pub struct AuditStoreError(pub String);

/// Append-and-read surface of an audit store.
///
/// The store's own atomic-insert guarantee is sufficient for concurrent
/// writers; no client-side ordering beyond audit-then-respond per request.
pub trait AuditStore: Send + Sync {
    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns [`AuditStoreError`] if the store is unreachable.
    fn append(&self, entry: AuditEntry) -> Result<(), AuditStoreError>;

    /// Returns matching entries, newest first, capped at the query limit
    /// and [`MAX_PAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`AuditStoreError`] if the store is unreachable.
    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditStoreError>;

    /// Counts entries at or after `since` (all entries when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`AuditStoreError`] if the store is unreachable.
    fn count(&self, since: Option<u64>) -> Result<usize, AuditStoreError>;
}

/// Entries appended in the last 24 hours, for dashboard metrics.
///
/// # Errors
///
/// Propagates store errors.
pub fn count_last_24h(store: &dyn AuditStore) -> Result<usize, AuditStoreError> {
    store.count(Some(epoch_secs().saturating_sub(24 * 60 * 60)))
}

/// In-memory append-only audit store.
pub struct MemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, entry: AuditEntry) -> Result<(), AuditStoreError> {
        let mut entries =
            self.entries.lock().map_err(|_| AuditStoreError("store poisoned".to_string()))?;
        entries.push(entry);
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditStoreError> {
        let entries =
            self.entries.lock().map_err(|_| AuditStoreError("store poisoned".to_string()))?;

        let mut matched: Vec<AuditEntry> =
            entries.iter().filter(|e| query.matches(e)).cloned().collect();
        // Newest first; later inserts win ties.
        matched.reverse();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let limit = query.limit.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE);
        matched.truncate(limit);
        Ok(matched)
    }

    fn count(&self, since: Option<u64>) -> Result<usize, AuditStoreError> {
        let entries =
            self.entries.lock().map_err(|_| AuditStoreError("store poisoned".to_string()))?;
        Ok(entries.iter().filter(|e| since.map_or(true, |s| e.timestamp >= s)).count())
    }
}

/// Write path with bounded retry and fail-closed semantics.
pub struct AuditWriter {
    store: Arc<dyn AuditStore>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl AuditWriter {
    /// Default number of append attempts.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Default first-retry backoff.
    pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(25);

    /// Creates a writer with default retry settings.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_backoff: Self::DEFAULT_BASE_BACKOFF,
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, base_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_backoff = base_backoff;
        self
    }

    /// Returns the underlying store, for the compliance read path.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Appends an entry, retrying transient failures with doubling backoff.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::AuditWriteFailure`] once every attempt
    /// is exhausted; the caller must fail its own operation (fail-closed).
    pub fn append(&self, entry: AuditEntry) -> Result<(), crate::error::Error> {
        let mut backoff = self.base_backoff;
        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            match self.store.append(entry.clone()) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last_err = Some(err);
                    if attempt < self.max_attempts {
                        std::thread::sleep(backoff);
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        let err = last_err.map_or_else(String::new, |e| e.to_string());
        error!(attempts = self.max_attempts, %err, "audit append failed; failing closed");
        Err(crate::error::Error::AuditWriteFailure(err))
    }
}
