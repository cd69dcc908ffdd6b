//! Lease lifecycle error taxonomy.

use thiserror::Error;

use super::state::{LeaseStatus, LeaseTransition};
use crate::pool::PoolError;
use crate::store::StoreError;

/// Errors surfaced by lease lifecycle operations.
///
/// Every variant leaves the lease and the account pool exactly as they
/// were, except that the documented compensation step may have run to
/// restore the pool before the error surfaces.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LeaseError {
    /// Malformed or out-of-policy input; no state change.
    #[error("validation failed for {field}: {reason}")]
    Validation {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The transition is not permitted from the current status; no state
    /// change.
    #[error("transition {attempted} not permitted from status {from} for lease {lease_id}")]
    InvalidTransition {
        /// The lease ID.
        lease_id: String,
        /// The status the lease was in.
        from: LeaseStatus,
        /// The transition that was attempted.
        attempted: LeaseTransition,
    },

    /// No account is available in the pool; no state change.
    #[error("no sandbox account available for allocation")]
    NoCapacity,

    /// The caller's expected version is stale; no state change, re-read
    /// and retry.
    #[error(
        "concurrent modification of lease {lease_id}: expected version \
         {expected_version}, found {found_version}"
    )]
    ConcurrentModification {
        /// The lease ID.
        lease_id: String,
        /// The version the caller expected.
        expected_version: u64,
        /// The version actually found.
        found_version: u64,
    },

    /// The lease does not exist.
    #[error("lease not found: {lease_id}")]
    NotFound {
        /// The unknown lease ID.
        lease_id: String,
    },

    /// Infrastructure fault; no partial mutation is guaranteed to have
    /// occurred — re-query before retrying.
    #[error("lease store unavailable: {reason}")]
    StoreUnavailable {
        /// Description of the fault.
        reason: String,
    },
}

impl LeaseError {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new invalid-transition error.
    #[must_use]
    pub fn invalid_transition(
        lease_id: impl Into<String>,
        from: LeaseStatus,
        attempted: LeaseTransition,
    ) -> Self {
        Self::InvalidTransition {
            lease_id: lease_id.into(),
            from,
            attempted,
        }
    }

    /// Creates a new concurrent-modification error.
    #[must_use]
    pub fn concurrent_modification(
        lease_id: impl Into<String>,
        expected_version: u64,
        found_version: u64,
    ) -> Self {
        Self::ConcurrentModification {
            lease_id: lease_id.into(),
            expected_version,
            found_version,
        }
    }

    /// Creates a new not-found error.
    #[must_use]
    pub fn not_found(lease_id: impl Into<String>) -> Self {
        Self::NotFound {
            lease_id: lease_id.into(),
        }
    }

    /// Creates a new store-unavailable error.
    #[must_use]
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the caller should re-read and retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// Returns `true` if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

impl From<StoreError> for LeaseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { lease_id } => Self::NotFound { lease_id },
            StoreError::VersionConflict {
                lease_id,
                expected,
                found,
            } => Self::ConcurrentModification {
                lease_id,
                expected_version: expected,
                found_version: found,
            },
            StoreError::AlreadyExists { lease_id } => Self::StoreUnavailable {
                reason: format!("duplicate lease id {lease_id}"),
            },
            StoreError::AuditViolation { lease_id, reason } => Self::StoreUnavailable {
                reason: format!("audit violation on lease {lease_id}: {reason}"),
            },
            StoreError::CapacityExceeded { max } => Self::StoreUnavailable {
                reason: format!("store capacity of {max} leases exceeded"),
            },
            StoreError::Unavailable { reason } => Self::StoreUnavailable { reason },
        }
    }
}

impl From<PoolError> for LeaseError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NoCapacity => Self::NoCapacity,
            PoolError::UnknownAccount { account_ref } => Self::StoreUnavailable {
                reason: format!("account pool has no record of {account_ref}"),
            },
            PoolError::CapacityExceeded { max } => Self::StoreUnavailable {
                reason: format!("account pool capacity of {max} exceeded"),
            },
            other => Self::StoreUnavailable {
                reason: format!("unexpected account pool state: {other}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = LeaseError::validation("budget", "must be greater than zero");
        assert!(err.to_string().contains("budget"));
        assert!(err.is_validation());

        let err = LeaseError::invalid_transition(
            "lease-1",
            LeaseStatus::Expired,
            LeaseTransition::Frozen,
        );
        assert!(err.to_string().contains("EXPIRED"));
        assert!(err.to_string().contains("FROZEN"));
        assert!(err.to_string().contains("lease-1"));

        let err = LeaseError::concurrent_modification("lease-2", 3, 5);
        assert!(err.to_string().contains('3'));
        assert!(err.to_string().contains('5'));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_store_error_lowering() {
        let err: LeaseError = StoreError::VersionConflict {
            lease_id: "lease-1".to_string(),
            expected: 2,
            found: 4,
        }
        .into();
        assert_eq!(err, LeaseError::concurrent_modification("lease-1", 2, 4));

        let err: LeaseError = StoreError::NotFound {
            lease_id: "lease-9".to_string(),
        }
        .into();
        assert_eq!(err, LeaseError::not_found("lease-9"));

        let err: LeaseError = StoreError::Unavailable {
            reason: "disk offline".to_string(),
        }
        .into();
        assert!(matches!(err, LeaseError::StoreUnavailable { .. }));
    }

    #[test]
    fn test_pool_error_lowering() {
        let err: LeaseError = PoolError::NoCapacity.into();
        assert_eq!(err, LeaseError::NoCapacity);

        let err: LeaseError = PoolError::UnknownAccount {
            account_ref: "acct-x".to_string(),
        }
        .into();
        assert!(matches!(err, LeaseError::StoreUnavailable { .. }));
    }
}
