//! Lease record store: the compare-and-swap boundary.
//!
//! The engine never mutates a lease in place; every write goes through
//! [`LeaseStore::compare_and_swap`], which is the sole concurrency-safety
//! boundary. The in-memory implementation additionally guards the audit
//! invariants: a swapped-in record must advance the version by exactly
//! one and may only grow its history.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::lease::{Lease, LeaseId, LeaseStatus};
use crate::pool::AccountRef;

/// Maximum number of lease records held by the in-memory store.
pub const MAX_LEASES: usize = 100_000;

/// Errors from lease record store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// No record exists for the lease ID.
    #[error("lease not found: {lease_id}")]
    NotFound {
        /// The unknown lease ID.
        lease_id: LeaseId,
    },

    /// A record already exists for the lease ID.
    #[error("lease already exists: {lease_id}")]
    AlreadyExists {
        /// The duplicate lease ID.
        lease_id: LeaseId,
    },

    /// The record changed since the caller read it.
    #[error("version conflict on lease {lease_id}: expected {expected}, found {found}")]
    VersionConflict {
        /// The lease ID.
        lease_id: LeaseId,
        /// The version the caller expected.
        expected: u64,
        /// The version actually stored.
        found: u64,
    },

    /// The swapped-in record would rewrite the audit trail.
    #[error("audit violation on lease {lease_id}: {reason}")]
    AuditViolation {
        /// The lease ID.
        lease_id: LeaseId,
        /// What was violated.
        reason: String,
    },

    /// The store is full.
    #[error("lease store capacity of {max} exceeded")]
    CapacityExceeded {
        /// The store capacity.
        max: usize,
    },

    /// Infrastructure fault.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Description of the fault.
        reason: String,
    },
}

/// Durable keyed storage for lease records with atomic conditional
/// updates.
pub trait LeaseStore: Send + Sync {
    /// Inserts a brand-new lease record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the ID is taken, or
    /// [`StoreError::CapacityExceeded`] if the store is full.
    fn insert(&self, lease: Lease) -> Result<(), StoreError>;

    /// Returns the record for the given lease ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no record exists.
    fn get(&self, lease_id: &str) -> Result<Lease, StoreError>;

    /// Atomically replaces the record if its stored version equals
    /// `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionConflict`] if another writer won, or
    /// [`StoreError::AuditViolation`] if the replacement does not advance
    /// the version by exactly one or shrinks the history.
    fn compare_and_swap(
        &self,
        lease_id: &str,
        expected_version: u64,
        updated: Lease,
    ) -> Result<(), StoreError>;

    /// Returns the leases holding the given account (status `Active` or
    /// `Frozen` only).
    fn list_active_for_account(&self, account_ref: &AccountRef) -> Vec<Lease>;

    /// Returns all leases with the given status.
    fn list_by_status(&self, status: LeaseStatus) -> Vec<Lease>;

    /// Returns every lease record.
    fn list_all(&self) -> Vec<Lease>;
}

/// Bounded in-memory [`LeaseStore`] under a single lock.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: RwLock<HashMap<LeaseId, Lease>>,
}

impl InMemoryLeaseStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leases.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leases.read().expect("lock poisoned").is_empty()
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn insert(&self, lease: Lease) -> Result<(), StoreError> {
        let mut leases = self.leases.write().expect("lock poisoned");
        if leases.contains_key(lease.id()) {
            return Err(StoreError::AlreadyExists {
                lease_id: lease.id().to_string(),
            });
        }
        if leases.len() >= MAX_LEASES {
            return Err(StoreError::CapacityExceeded { max: MAX_LEASES });
        }
        leases.insert(lease.id().to_string(), lease);
        Ok(())
    }

    fn get(&self, lease_id: &str) -> Result<Lease, StoreError> {
        let leases = self.leases.read().expect("lock poisoned");
        leases
            .get(lease_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                lease_id: lease_id.to_string(),
            })
    }

    fn compare_and_swap(
        &self,
        lease_id: &str,
        expected_version: u64,
        updated: Lease,
    ) -> Result<(), StoreError> {
        let mut leases = self.leases.write().expect("lock poisoned");
        let current = leases
            .get(lease_id)
            .ok_or_else(|| StoreError::NotFound {
                lease_id: lease_id.to_string(),
            })?;

        if current.version() != expected_version {
            return Err(StoreError::VersionConflict {
                lease_id: lease_id.to_string(),
                expected: expected_version,
                found: current.version(),
            });
        }
        if updated.id() != lease_id {
            return Err(StoreError::AuditViolation {
                lease_id: lease_id.to_string(),
                reason: format!("replacement carries id {}", updated.id()),
            });
        }
        if updated.version() != expected_version.saturating_add(1) {
            return Err(StoreError::AuditViolation {
                lease_id: lease_id.to_string(),
                reason: format!(
                    "version must advance by exactly one (got {} after {expected_version})",
                    updated.version()
                ),
            });
        }
        if updated.history().len() < current.history().len() {
            return Err(StoreError::AuditViolation {
                lease_id: lease_id.to_string(),
                reason: "history may only grow".to_string(),
            });
        }

        leases.insert(lease_id.to_string(), updated);
        Ok(())
    }

    fn list_active_for_account(&self, account_ref: &AccountRef) -> Vec<Lease> {
        let leases = self.leases.read().expect("lock poisoned");
        leases
            .values()
            .filter(|lease| {
                lease.status().holds_account() && lease.resource_ref() == Some(account_ref.as_str())
            })
            .cloned()
            .collect()
    }

    fn list_by_status(&self, status: LeaseStatus) -> Vec<Lease> {
        let leases = self.leases.read().expect("lock poisoned");
        leases
            .values()
            .filter(|lease| lease.status() == status)
            .cloned()
            .collect()
    }

    fn list_all(&self) -> Vec<Lease> {
        let leases = self.leases.read().expect("lock poisoned");
        leases.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::events::NullPublisher;
    use crate::lease::{
        LeaseEngine, LeaseParameters, LeaseTemplate, LeaseStatus, TemplateRegistry,
    };
    use crate::pool::InMemoryAccountPool;

    /// Builds a pending lease through the engine so the record is shaped
    /// exactly as production writes it.
    fn pending_lease(store: &Arc<InMemoryLeaseStore>) -> Lease {
        let templates = TemplateRegistry::new();
        templates
            .register(LeaseTemplate::new("tmpl-1", "Basic", 50_000, 604_800_000))
            .unwrap();
        let engine = LeaseEngine::new(
            Arc::clone(store) as Arc<dyn LeaseStore>,
            Arc::new(InMemoryAccountPool::with_accounts(["acct-001"])),
            Arc::new(NullPublisher),
            templates,
        );
        engine
            .request_lease("user-1", "tmpl-1", LeaseParameters::new(100, 1_000))
            .unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let lease = pending_lease(&store);

        let found = store.get(lease.id()).unwrap();
        assert_eq!(found, lease);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let store = InMemoryLeaseStore::new();
        let err = store.get("lease-404").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let lease = pending_lease(&store);

        let err = store.insert(lease).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn test_cas_version_conflict() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let lease = pending_lease(&store);

        let err = store
            .compare_and_swap(lease.id(), lease.version() + 5, lease.clone())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict { expected: 6, found: 1, .. }
        ));
    }

    #[test]
    fn test_cas_rejects_non_incrementing_version() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let lease = pending_lease(&store);

        // Same version as stored: not a valid replacement.
        let err = store
            .compare_and_swap(lease.id(), lease.version(), lease.clone())
            .unwrap_err();
        assert!(matches!(err, StoreError::AuditViolation { .. }));
    }

    #[test]
    fn test_list_by_status() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let lease = pending_lease(&store);

        let pending = store.list_by_status(LeaseStatus::PendingApproval);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id(), lease.id());
        assert!(store.list_by_status(LeaseStatus::Active).is_empty());
    }

    #[test]
    fn test_list_active_for_account_ignores_pending() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let _lease = pending_lease(&store);

        assert!(store
            .list_active_for_account(&"acct-001".to_string())
            .is_empty());
    }
}
