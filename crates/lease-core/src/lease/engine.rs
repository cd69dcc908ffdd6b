//! The lease lifecycle engine.
//!
//! One method per transition, each taking `(lease_id, expected_version,
//! actor, ...)` and returning the updated [`Lease`] or a typed
//! [`LeaseError`]. Every operation validates against the transition table
//! before any store mutation, writes through the store's
//! compare-and-swap, and publishes one best-effort [`TransitionEvent`].
//!
//! # Combined Lease+Account Updates
//!
//! `approve`, `expire`, and `terminate` touch both the account pool and
//! the lease record. The pool action runs FIRST, then the
//! compare-and-swap; if the swap loses, the engine compensates by
//! reversing the pool action (releasing a fresh allocation, or
//! re-assigning a just-released account) before surfacing the error, so
//! the pool never drifts from committed lease state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::LeaseError;
use super::state::{now_ms, Lease, LeaseId, LeaseStatus, LeaseTransition};
use super::template::{LeaseParameters, TemplateRegistry};
use crate::events::{EventPublisher, TransitionEvent};
use crate::pool::{AccountPool, PoolError};
use crate::store::LeaseStore;

/// Actor recorded for monitor-driven transitions.
pub const SYSTEM_ACTOR: &str = "system";

/// Tagged request variant for each mutating engine operation.
///
/// The out-of-scope API layer deserializes inbound requests into one of
/// these and hands it to [`LeaseEngine::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LeaseCommand {
    /// Create a new lease in `PendingApproval`.
    Request {
        /// The requesting principal.
        requester_id: String,
        /// The template to create the lease under.
        template_ref: String,
        /// Requested budget and duration.
        params: LeaseParameters,
    },
    /// Approve a pending lease, allocating an account.
    Approve {
        /// The lease to approve.
        lease_id: LeaseId,
        /// The version the caller last read.
        expected_version: u64,
        /// The reviewing principal.
        approver: String,
    },
    /// Deny a pending lease.
    Deny {
        /// The lease to deny.
        lease_id: LeaseId,
        /// The version the caller last read.
        expected_version: u64,
        /// The reviewing principal.
        approver: String,
        /// Why the lease was denied.
        reason: String,
    },
    /// Freeze an active lease.
    Freeze {
        /// The lease to freeze.
        lease_id: LeaseId,
        /// The version the caller last read.
        expected_version: u64,
        /// The acting principal.
        actor: String,
        /// Why the lease was frozen.
        reason: String,
    },
    /// Unfreeze a frozen lease.
    Unfreeze {
        /// The lease to unfreeze.
        lease_id: LeaseId,
        /// The version the caller last read.
        expected_version: u64,
        /// The acting principal.
        actor: String,
    },
    /// Expire an active or frozen lease, releasing its account.
    Expire {
        /// The lease to expire.
        lease_id: LeaseId,
        /// The version the caller last read.
        expected_version: u64,
        /// The acting principal (normally [`SYSTEM_ACTOR`]).
        actor: String,
    },
    /// Terminate a lease, releasing its account if one is bound.
    Terminate {
        /// The lease to terminate.
        lease_id: LeaseId,
        /// The version the caller last read.
        expected_version: u64,
        /// The acting principal.
        actor: String,
        /// Why the lease was terminated.
        reason: String,
    },
}

/// The lease lifecycle state machine.
///
/// Holds its collaborators behind `Arc<dyn _>` so tests can inject
/// in-memory fakes; the engine itself keeps no mutable state and is safe
/// to share across threads.
pub struct LeaseEngine {
    store: Arc<dyn LeaseStore>,
    pool: Arc<dyn AccountPool>,
    publisher: Arc<dyn EventPublisher>,
    templates: TemplateRegistry,
}

impl LeaseEngine {
    /// Creates a new engine over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn LeaseStore>,
        pool: Arc<dyn AccountPool>,
        publisher: Arc<dyn EventPublisher>,
        templates: TemplateRegistry,
    ) -> Self {
        Self {
            store,
            pool,
            publisher,
            templates,
        }
    }

    // =========================================================================
    // Mutating Operations
    // =========================================================================

    /// Creates a new lease in `PendingApproval`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Validation`] if the template is unknown or
    /// the parameters violate its ceilings, or a store error if the
    /// record cannot be written.
    pub fn request_lease(
        &self,
        requester_id: &str,
        template_ref: &str,
        params: LeaseParameters,
    ) -> Result<Lease, LeaseError> {
        if requester_id.trim().is_empty() {
            return Err(LeaseError::validation("requester_id", "must not be empty"));
        }
        let template = self.templates.get(template_ref).ok_or_else(|| {
            LeaseError::validation("template_ref", format!("unknown template: {template_ref}"))
        })?;
        template.validate(&params)?;

        let now = now_ms();
        let lease = Lease::new(
            Uuid::new_v4().to_string(),
            requester_id,
            &template.id,
            params.budget,
            params.duration_ms,
            now,
        );
        self.store.insert(lease.clone())?;
        self.emit(&lease, None, LeaseTransition::Requested, requester_id, now, None);
        Ok(lease)
    }

    /// Approves a pending lease, atomically allocating an account.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::NoCapacity`] if no account is available (the
    /// lease is left unchanged), [`LeaseError::ConcurrentModification`]
    /// if `expected_version` is stale, or
    /// [`LeaseError::InvalidTransition`] if the lease is not pending.
    pub fn approve(
        &self,
        lease_id: &str,
        expected_version: u64,
        approver: &str,
    ) -> Result<Lease, LeaseError> {
        let current = self.read_at_version(lease_id, expected_version)?;
        // `Active` is also reachable from `Frozen` (unfreeze); approval is
        // only valid from `PendingApproval`.
        if current.status() != LeaseStatus::PendingApproval {
            return Err(LeaseError::invalid_transition(
                lease_id,
                current.status(),
                LeaseTransition::Approved,
            ));
        }

        let account = self.pool.allocate()?;
        // A freshly allocated account must have no active holder; anything
        // else means the pool and store have drifted apart.
        if !self.store.list_active_for_account(&account).is_empty() {
            self.compensate_release(lease_id, &account);
            return Err(LeaseError::store_unavailable(format!(
                "account {account} already held by an active lease"
            )));
        }

        let now = now_ms();
        let mut updated = current;
        updated.transition(
            LeaseStatus::Active,
            LeaseTransition::Approved,
            approver,
            None,
            now,
        )?;
        updated.bind_account(account.clone());
        updated.set_expires_at(now.saturating_add(updated.duration_ms()));

        match self
            .store
            .compare_and_swap(lease_id, expected_version, updated.clone())
        {
            Ok(()) => {
                self.emit(
                    &updated,
                    Some(LeaseStatus::PendingApproval),
                    LeaseTransition::Approved,
                    approver,
                    now,
                    None,
                );
                Ok(updated)
            },
            Err(err) => {
                self.compensate_release(lease_id, &account);
                Err(err.into())
            },
        }
    }

    /// Denies a pending lease.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::InvalidTransition`] if the lease is not
    /// pending, or [`LeaseError::ConcurrentModification`] on a stale
    /// version.
    pub fn deny(
        &self,
        lease_id: &str,
        expected_version: u64,
        approver: &str,
        reason: &str,
    ) -> Result<Lease, LeaseError> {
        self.apply_simple(
            lease_id,
            expected_version,
            LeaseStatus::PendingApproval,
            LeaseStatus::Denied,
            LeaseTransition::Denied,
            approver,
            Some(reason.to_string()),
        )
    }

    /// Freezes an active lease. The account stays assigned.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::InvalidTransition`] unless the lease is
    /// `Active`, or [`LeaseError::ConcurrentModification`] on a stale
    /// version.
    pub fn freeze(
        &self,
        lease_id: &str,
        expected_version: u64,
        actor: &str,
        reason: &str,
    ) -> Result<Lease, LeaseError> {
        self.apply_simple(
            lease_id,
            expected_version,
            LeaseStatus::Active,
            LeaseStatus::Frozen,
            LeaseTransition::Frozen,
            actor,
            Some(reason.to_string()),
        )
    }

    /// Unfreezes a frozen lease back to `Active`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::InvalidTransition`] unless the lease is
    /// `Frozen`, or [`LeaseError::ConcurrentModification`] on a stale
    /// version.
    pub fn unfreeze(
        &self,
        lease_id: &str,
        expected_version: u64,
        actor: &str,
    ) -> Result<Lease, LeaseError> {
        self.apply_simple(
            lease_id,
            expected_version,
            LeaseStatus::Frozen,
            LeaseStatus::Active,
            LeaseTransition::Unfrozen,
            actor,
            None,
        )
    }

    /// Expires an active or frozen lease, releasing its account.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::InvalidTransition`] from any other status,
    /// or [`LeaseError::ConcurrentModification`] on a stale version.
    pub fn expire(
        &self,
        lease_id: &str,
        expected_version: u64,
        actor: &str,
    ) -> Result<Lease, LeaseError> {
        self.apply_releasing(
            lease_id,
            expected_version,
            LeaseStatus::Expired,
            LeaseTransition::Expired,
            actor,
            None,
        )
    }

    /// Terminates a lease, releasing its account if one is bound.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::InvalidTransition`] if the lease is already
    /// terminal, or [`LeaseError::ConcurrentModification`] on a stale
    /// version.
    pub fn terminate(
        &self,
        lease_id: &str,
        expected_version: u64,
        actor: &str,
        reason: &str,
    ) -> Result<Lease, LeaseError> {
        self.apply_releasing(
            lease_id,
            expected_version,
            LeaseStatus::Terminated,
            LeaseTransition::Terminated,
            actor,
            Some(reason.to_string()),
        )
    }

    /// Runs one tagged command through the matching operation.
    ///
    /// # Errors
    ///
    /// Propagates the underlying operation's error unchanged.
    pub fn dispatch(&self, command: LeaseCommand) -> Result<Lease, LeaseError> {
        match command {
            LeaseCommand::Request {
                requester_id,
                template_ref,
                params,
            } => self.request_lease(&requester_id, &template_ref, params),
            LeaseCommand::Approve {
                lease_id,
                expected_version,
                approver,
            } => self.approve(&lease_id, expected_version, &approver),
            LeaseCommand::Deny {
                lease_id,
                expected_version,
                approver,
                reason,
            } => self.deny(&lease_id, expected_version, &approver, &reason),
            LeaseCommand::Freeze {
                lease_id,
                expected_version,
                actor,
                reason,
            } => self.freeze(&lease_id, expected_version, &actor, &reason),
            LeaseCommand::Unfreeze {
                lease_id,
                expected_version,
                actor,
            } => self.unfreeze(&lease_id, expected_version, &actor),
            LeaseCommand::Expire {
                lease_id,
                expected_version,
                actor,
            } => self.expire(&lease_id, expected_version, &actor),
            LeaseCommand::Terminate {
                lease_id,
                expected_version,
                actor,
                reason,
            } => self.terminate(&lease_id, expected_version, &actor, &reason),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns the lease with the given ID.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::NotFound`] if no record exists.
    pub fn get_lease(&self, lease_id: &str) -> Result<Lease, LeaseError> {
        self.store.get(lease_id).map_err(Into::into)
    }

    /// Returns every lease record, terminal ones included.
    #[must_use]
    pub fn list_leases(&self) -> Vec<Lease> {
        self.store.list_all()
    }

    /// Returns all leases with the given status.
    #[must_use]
    pub fn list_by_status(&self, status: LeaseStatus) -> Vec<Lease> {
        self.store.list_by_status(status)
    }

    /// Returns all leases owned by the given requester.
    #[must_use]
    pub fn list_for_requester(&self, requester_id: &str) -> Vec<Lease> {
        self.store
            .list_all()
            .into_iter()
            .filter(|lease| lease.requester_id() == requester_id)
            .collect()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Reads the lease and rejects stale callers before anything else is
    /// touched.
    fn read_at_version(
        &self,
        lease_id: &str,
        expected_version: u64,
    ) -> Result<Lease, LeaseError> {
        let current = self.store.get(lease_id)?;
        if current.version() != expected_version {
            return Err(LeaseError::concurrent_modification(
                lease_id,
                expected_version,
                current.version(),
            ));
        }
        Ok(current)
    }

    /// Applies a transition that does not touch the account pool.
    ///
    /// `required_from` pins the exact source status: the transition table
    /// alone is not enough when the target is reachable from more than one
    /// status (e.g. `Active` via approve or unfreeze).
    #[allow(clippy::too_many_arguments)]
    fn apply_simple(
        &self,
        lease_id: &str,
        expected_version: u64,
        required_from: LeaseStatus,
        target: LeaseStatus,
        transition: LeaseTransition,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Lease, LeaseError> {
        let current = self.read_at_version(lease_id, expected_version)?;
        if current.status() != required_from {
            return Err(LeaseError::invalid_transition(
                lease_id,
                current.status(),
                transition,
            ));
        }
        let now = now_ms();
        let mut updated = current;
        let previous = updated.transition(target, transition, actor, reason.clone(), now)?;
        self.store
            .compare_and_swap(lease_id, expected_version, updated.clone())?;
        self.emit(&updated, Some(previous), transition, actor, now, reason);
        Ok(updated)
    }

    /// Applies a terminal transition that releases the bound account, if
    /// any. Pool release runs before the swap; a lost swap re-assigns the
    /// account.
    fn apply_releasing(
        &self,
        lease_id: &str,
        expected_version: u64,
        target: LeaseStatus,
        transition: LeaseTransition,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Lease, LeaseError> {
        let current = self.read_at_version(lease_id, expected_version)?;
        if !current.status().can_transition_to(target) {
            return Err(LeaseError::invalid_transition(
                lease_id,
                current.status(),
                transition,
            ));
        }

        let held = current.resource_ref().map(String::from);
        if let Some(ref account) = held {
            match self.pool.release(account) {
                Ok(()) => {},
                // A concurrent terminal transition already released the
                // account; the compare-and-swap below adjudicates the race.
                Err(PoolError::NotAssigned { .. }) => {},
                Err(err) => return Err(err.into()),
            }
        }

        let now = now_ms();
        let mut updated = current;
        let previous = updated.transition(target, transition, actor, reason.clone(), now)?;
        updated.clear_account();

        match self
            .store
            .compare_and_swap(lease_id, expected_version, updated.clone())
        {
            Ok(()) => {
                self.emit(&updated, Some(previous), transition, actor, now, reason);
                Ok(updated)
            },
            Err(err) => {
                if let Some(ref account) = held {
                    self.restore_binding(lease_id, account);
                }
                Err(err.into())
            },
        }
    }

    /// Puts a released account back after a lost compare-and-swap, but
    /// only if the committed record still holds it — if the competing
    /// writer was itself a terminal transition, its release is the
    /// correct final state.
    fn restore_binding(&self, lease_id: &str, account: &str) {
        let still_held = self.store.get(lease_id).is_ok_and(|current| {
            current.status().holds_account() && current.resource_ref() == Some(account)
        });
        if !still_held {
            return;
        }
        if let Err(reassign_err) = self.pool.reassign(account) {
            warn!(
                lease_id,
                account_ref = %account,
                error = %reassign_err,
                "compensating re-assignment failed; pool may need operator attention"
            );
        }
    }

    /// Undoes a fresh allocation after a failed approve.
    fn compensate_release(&self, lease_id: &str, account: &str) {
        if let Err(release_err) = self.pool.release(account) {
            warn!(
                lease_id,
                account_ref = %account,
                error = %release_err,
                "compensating release failed; pool may need operator attention"
            );
        }
    }

    /// Logs the accepted transition and publishes the event, best-effort.
    fn emit(
        &self,
        lease: &Lease,
        from: Option<LeaseStatus>,
        transition: LeaseTransition,
        actor: &str,
        timestamp_ms: u64,
        reason: Option<String>,
    ) {
        info!(
            lease_id = %lease.id(),
            from = from.map_or("NONE", |status| status.as_str()),
            to = lease.status().as_str(),
            transition = transition.as_str(),
            actor,
            "lease transition accepted"
        );
        let event = TransitionEvent {
            lease_id: lease.id().to_string(),
            from,
            to: lease.status(),
            transition,
            actor: actor.to_string(),
            timestamp_ms,
            reason,
        };
        if let Err(err) = self.publisher.publish(&event) {
            // Events are best-effort; the committed lease state is
            // authoritative.
            warn!(
                lease_id = %event.lease_id,
                error = %err,
                "event publication failed"
            );
        }
    }
}

impl fmt::Debug for LeaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseEngine")
            .field("templates", &self.templates)
            .finish_non_exhaustive()
    }
}
