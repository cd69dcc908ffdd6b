//! Lease entity and lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::LeaseError;
use crate::pool::AccountRef;

/// Unique identifier for a lease.
pub type LeaseId = String;

/// Maximum number of history entries retained per lease.
///
/// The history is append-only and never pruned; this bound exists to
/// reject pathological records before they exhaust memory. A lease that
/// legitimately reaches it has long since been terminal.
pub const MAX_HISTORY_ENTRIES: usize = 1_000;

/// Returns the current wall-clock time in milliseconds since the Unix
/// epoch.
#[must_use]
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// The lifecycle status of a lease.
///
/// # Terminal Statuses
///
/// `Denied`, `Expired`, and `Terminated` are absorbing: no transition is
/// accepted from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[non_exhaustive]
pub enum LeaseStatus {
    /// Requested but not yet reviewed; no account is bound.
    #[default]
    PendingApproval,

    /// Approved and bound to an account.
    Active,

    /// Suspended (usually for exceeding its budget) but still holding its
    /// account.
    Frozen,

    /// Reached its deadline; account released (terminal).
    Expired,

    /// Ended by an operator or the requester; account released (terminal).
    Terminated,

    /// Rejected at review; never held an account (terminal).
    Denied,
}

impl LeaseStatus {
    /// Returns `true` if this is a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Terminated | Self::Denied)
    }

    /// Returns `true` if a lease in this status holds an account.
    ///
    /// These are exactly the statuses counted by the at-most-one-lease-
    /// per-account invariant.
    #[must_use]
    pub const fn holds_account(&self) -> bool {
        matches!(self, Self::Active | Self::Frozen)
    }

    /// Returns the status as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Active => "ACTIVE",
            Self::Frozen => "FROZEN",
            Self::Expired => "EXPIRED",
            Self::Terminated => "TERMINATED",
            Self::Denied => "DENIED",
        }
    }

    /// Parses a status from its string identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Validation`] if the string is not a
    /// recognized status.
    pub fn parse(s: &str) -> Result<Self, LeaseError> {
        match s.to_uppercase().as_str() {
            "PENDING_APPROVAL" => Ok(Self::PendingApproval),
            "ACTIVE" => Ok(Self::Active),
            "FROZEN" => Ok(Self::Frozen),
            "EXPIRED" => Ok(Self::Expired),
            "TERMINATED" => Ok(Self::Terminated),
            "DENIED" => Ok(Self::Denied),
            _ => Err(LeaseError::validation(
                "status",
                format!("unrecognized status: {s}"),
            )),
        }
    }

    /// Returns the statuses reachable from this one.
    ///
    /// This table is the single source of truth for the lifecycle; every
    /// engine operation validates against it before touching any store.
    #[must_use]
    pub const fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::PendingApproval => &[Self::Active, Self::Denied, Self::Terminated],
            Self::Active => &[Self::Frozen, Self::Expired, Self::Terminated],
            Self::Frozen => &[Self::Active, Self::Expired, Self::Terminated],
            // Terminal statuses are absorbing.
            Self::Expired | Self::Terminated | Self::Denied => &[],
        }
    }

    /// Returns `true` if transitioning to `target` is permitted from this
    /// status.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The kind of an accepted lifecycle operation, as recorded in the audit
/// history and in published events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum LeaseTransition {
    /// Lease created in `PendingApproval`.
    Requested,
    /// `PendingApproval` → `Active`.
    Approved,
    /// `PendingApproval` → `Denied`.
    Denied,
    /// `Active` → `Frozen`.
    Frozen,
    /// `Frozen` → `Active`.
    Unfrozen,
    /// `Active`/`Frozen` → `Expired`.
    Expired,
    /// `PendingApproval`/`Active`/`Frozen` → `Terminated`.
    Terminated,
}

impl LeaseTransition {
    /// Returns the transition as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
            Self::Frozen => "FROZEN",
            Self::Unfrozen => "UNFROZEN",
            Self::Expired => "EXPIRED",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for LeaseTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in a lease's append-only audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The accepted transition.
    pub transition: LeaseTransition,
    /// The principal that requested it (`"system"` for monitor-driven
    /// transitions).
    pub actor: String,
    /// When the transition was accepted (milliseconds since epoch).
    pub timestamp_ms: u64,
    /// Optional operator-supplied reason (deny, freeze, terminate).
    pub reason: Option<String>,
}

/// A budget- and time-boxed assignment of a sandbox account to a
/// requester.
///
/// The struct is mutated only through the crate-internal transition and
/// usage-recording methods; external code observes it through accessors.
/// `version` increases on every accepted mutation and `history` only ever
/// grows, which together make the record auditable and safe to write
/// through a compare-and-swap store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Unique identifier, immutable.
    id: LeaseId,

    /// Owning principal, immutable.
    requester_id: String,

    /// Template the lease was created under, immutable.
    template_id: String,

    /// Bound account; `None` until approval allocates one and after a
    /// terminal transition releases it.
    resource_ref: Option<AccountRef>,

    /// Current lifecycle status.
    status: LeaseStatus,

    /// Budget ceiling in integer cents.
    budget_threshold: u64,

    /// Spend reported by the external usage feed, in integer cents.
    /// Written only by the monitor, never by the engine.
    budget_consumed: u64,

    /// Requested lifetime, fixed at request time.
    duration_ms: u64,

    /// Deadline, set on activation (`approve` time + `duration_ms`).
    expires_at_ms: Option<u64>,

    /// Creation timestamp (milliseconds since epoch).
    created_at_ms: u64,

    /// Last-mutation timestamp (milliseconds since epoch).
    updated_at_ms: u64,

    /// Optimistic-concurrency counter; starts at 1.
    version: u64,

    /// Append-only audit trail.
    history: Vec<HistoryEntry>,
}

impl Lease {
    /// Creates a new lease in `PendingApproval` at version 1, with a
    /// single `Requested` history entry.
    #[must_use]
    pub(crate) fn new(
        id: impl Into<LeaseId>,
        requester_id: impl Into<String>,
        template_id: impl Into<String>,
        budget_threshold: u64,
        duration_ms: u64,
        now_ms: u64,
    ) -> Self {
        let requester_id = requester_id.into();
        Self {
            id: id.into(),
            requester_id: requester_id.clone(),
            template_id: template_id.into(),
            resource_ref: None,
            status: LeaseStatus::PendingApproval,
            budget_threshold,
            budget_consumed: 0,
            duration_ms,
            expires_at_ms: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            version: 1,
            history: vec![HistoryEntry {
                transition: LeaseTransition::Requested,
                actor: requester_id,
                timestamp_ms: now_ms,
                reason: None,
            }],
        }
    }

    /// Returns the lease ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the owning principal.
    #[must_use]
    pub fn requester_id(&self) -> &str {
        &self.requester_id
    }

    /// Returns the template the lease was created under.
    #[must_use]
    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    /// Returns the bound account, if any.
    #[must_use]
    pub fn resource_ref(&self) -> Option<&str> {
        self.resource_ref.as_deref()
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> LeaseStatus {
        self.status
    }

    /// Returns the budget ceiling in integer cents.
    #[must_use]
    pub const fn budget_threshold(&self) -> u64 {
        self.budget_threshold
    }

    /// Returns the spend reported by the usage feed, in integer cents.
    #[must_use]
    pub const fn budget_consumed(&self) -> u64 {
        self.budget_consumed
    }

    /// Returns the requested lifetime in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Returns the deadline, if the lease has been activated.
    #[must_use]
    pub const fn expires_at_ms(&self) -> Option<u64> {
        self.expires_at_ms
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Returns the last-mutation timestamp.
    #[must_use]
    pub const fn updated_at_ms(&self) -> u64 {
        self.updated_at_ms
    }

    /// Returns the optimistic-concurrency version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the audit history for iteration.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Returns `true` if the lease is in a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns `true` if reported spend exceeds the budget ceiling.
    #[must_use]
    pub const fn is_budget_exceeded(&self) -> bool {
        self.budget_consumed > self.budget_threshold
    }

    /// Returns `true` if the lease has a deadline at or before `now_ms`.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|deadline| deadline <= now_ms)
    }

    /// Validates and applies a lifecycle transition.
    ///
    /// On success the status changes, the version increments, and one
    /// history entry is appended. On failure the lease is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::InvalidTransition`] if the transition table
    /// does not permit `target` from the current status, or
    /// [`LeaseError::Validation`] if the history bound is reached.
    pub(crate) fn transition(
        &mut self,
        target: LeaseStatus,
        transition: LeaseTransition,
        actor: impl Into<String>,
        reason: Option<String>,
        now_ms: u64,
    ) -> Result<LeaseStatus, LeaseError> {
        if !self.status.can_transition_to(target) {
            return Err(LeaseError::invalid_transition(
                &self.id,
                self.status,
                transition,
            ));
        }
        if self.history.len() >= MAX_HISTORY_ENTRIES {
            return Err(LeaseError::validation(
                "history",
                format!("history limit of {MAX_HISTORY_ENTRIES} entries reached"),
            ));
        }
        let previous = self.status;
        self.status = target;
        self.version = self.version.saturating_add(1);
        self.updated_at_ms = now_ms;
        self.history.push(HistoryEntry {
            transition,
            actor: actor.into(),
            timestamp_ms: now_ms,
            reason,
        });
        Ok(previous)
    }

    /// Records spend reported by the external usage feed.
    ///
    /// Bumps the version (it is a mutation) but appends no history entry:
    /// usage ingestion is not a lifecycle transition.
    pub(crate) fn record_usage(&mut self, consumed: u64, now_ms: u64) {
        self.budget_consumed = consumed;
        self.version = self.version.saturating_add(1);
        self.updated_at_ms = now_ms;
    }

    /// Binds the lease to an account.
    pub(crate) fn bind_account(&mut self, account: impl Into<AccountRef>) {
        self.resource_ref = Some(account.into());
    }

    /// Clears the account binding after a terminal transition releases it.
    pub(crate) fn clear_account(&mut self) {
        self.resource_ref = None;
    }

    /// Sets the deadline on activation.
    pub(crate) fn set_expires_at(&mut self, deadline_ms: u64) {
        self.expires_at_ms = Some(deadline_ms);
    }
}
