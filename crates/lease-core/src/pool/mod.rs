//! Account pool manager for sandbox resources.
//!
//! The pool owns every account record. A lease holds only a non-owning
//! [`AccountRef`] to at most one account, and the engine keeps the pool
//! in sync with committed lease state: `allocate` on approval, `release`
//! on expiry or termination, and `reassign` when a lost compare-and-swap
//! forces the engine to undo a release it had already applied.
//!
//! # Allocation Policy
//!
//! `allocate` picks the lowest account ID among `Available` accounts (the
//! pool map is a `BTreeMap`, so iteration order is the ID order). The
//! pick and the flip to `Assigned` happen under one write lock, so a
//! single `allocate` can never hand out two accounts and an account can
//! never be double-assigned.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Non-owning reference to a pooled sandbox account.
pub type AccountRef = String;

/// Maximum number of accounts tracked by the in-memory pool.
pub const MAX_ACCOUNTS: usize = 10_000;

/// The pool-side status of a sandbox account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[non_exhaustive]
pub enum AccountStatus {
    /// Eligible for allocation.
    #[default]
    Available,

    /// Bound to exactly one non-terminal lease.
    Assigned,

    /// Withdrawn from circulation by an operator; never allocated.
    Quarantined,
}

impl AccountStatus {
    /// Returns the status as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Assigned => "ASSIGNED",
            Self::Quarantined => "QUARANTINED",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A poolable sandbox account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountRef,
    /// Current pool-side status.
    pub status: AccountStatus,
    /// Why the account was quarantined, if it was.
    pub quarantine_reason: Option<String>,
}

impl Account {
    /// Creates a new available account.
    #[must_use]
    pub fn new(id: impl Into<AccountRef>) -> Self {
        Self {
            id: id.into(),
            status: AccountStatus::Available,
            quarantine_reason: None,
        }
    }
}

/// Errors from account pool operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    /// No account is `Available`.
    #[error("no account available in the pool")]
    NoCapacity,

    /// The account is not tracked by the pool.
    #[error("unknown account: {account_ref}")]
    UnknownAccount {
        /// The unknown account reference.
        account_ref: AccountRef,
    },

    /// The account is not `Assigned`, so it cannot be released.
    #[error("account {account_ref} is not assigned")]
    NotAssigned {
        /// The account reference.
        account_ref: AccountRef,
    },

    /// The account is not `Available`, so it cannot be re-assigned.
    #[error("account {account_ref} is not available")]
    NotAvailable {
        /// The account reference.
        account_ref: AccountRef,
    },

    /// The account is quarantined and out of circulation.
    #[error("account {account_ref} is quarantined")]
    Quarantined {
        /// The account reference.
        account_ref: AccountRef,
    },

    /// The pool is full.
    #[error("account pool capacity of {max} exceeded")]
    CapacityExceeded {
        /// The pool capacity.
        max: usize,
    },
}

/// Tracks available vs. allocated sandbox accounts.
///
/// All methods are atomic with respect to each other; callers never hold
/// external locks.
pub trait AccountPool: Send + Sync {
    /// Allocates one `Available` account, flipping it to `Assigned`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoCapacity`] if no account is `Available`.
    fn allocate(&self) -> Result<AccountRef, PoolError>;

    /// Releases an `Assigned` account back to `Available`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownAccount`] or [`PoolError::NotAssigned`]
    /// if the account cannot be released.
    fn release(&self, account_ref: &str) -> Result<(), PoolError>;

    /// Re-assigns a specific `Available` account.
    ///
    /// This is the compensation path: when a combined lease+account update
    /// loses its compare-and-swap after the pool action was already
    /// applied, the engine calls this to put the account back where the
    /// committed lease state says it is. Quarantined accounts are
    /// refused.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownAccount`], [`PoolError::Quarantined`],
    /// or [`PoolError::NotAvailable`] if the account cannot be
    /// re-assigned.
    fn reassign(&self, account_ref: &str) -> Result<(), PoolError>;

    /// Withdraws an account from circulation.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownAccount`] if the account is not
    /// tracked.
    fn mark_quarantined(&self, account_ref: &str, reason: &str) -> Result<(), PoolError>;

    /// Returns a snapshot of the account record, if tracked.
    fn account(&self, account_ref: &str) -> Option<Account>;

    /// Returns the number of `Available` accounts.
    fn available_count(&self) -> usize;
}

/// In-memory [`AccountPool`] backed by a `BTreeMap` for deterministic
/// lowest-id-first allocation.
#[derive(Debug, Default)]
pub struct InMemoryAccountPool {
    accounts: RwLock<BTreeMap<AccountRef, Account>>,
}

impl InMemoryAccountPool {
    /// Creates a new empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool seeded with the given account IDs, all `Available`.
    #[must_use]
    pub fn with_accounts<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AccountRef>,
    {
        let pool = Self::new();
        for id in ids {
            // Seeding is infallible below the capacity bound; ignore the
            // duplicate case the same way a duplicate insert would be a
            // no-op.
            let _ = pool.add_account(id.into());
        }
        pool
    }

    /// Adds a new `Available` account to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::CapacityExceeded`] at [`MAX_ACCOUNTS`]
    /// entries.
    pub fn add_account(&self, id: impl Into<AccountRef>) -> Result<(), PoolError> {
        let mut accounts = self.accounts.write().expect("lock poisoned");
        if accounts.len() >= MAX_ACCOUNTS {
            return Err(PoolError::CapacityExceeded { max: MAX_ACCOUNTS });
        }
        let account = Account::new(id);
        accounts.entry(account.id.clone()).or_insert(account);
        Ok(())
    }

    /// Returns the total number of tracked accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no accounts are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.read().expect("lock poisoned").is_empty()
    }
}

impl AccountPool for InMemoryAccountPool {
    fn allocate(&self) -> Result<AccountRef, PoolError> {
        let mut accounts = self.accounts.write().expect("lock poisoned");
        let candidate = accounts
            .values_mut()
            .find(|account| account.status == AccountStatus::Available)
            .ok_or(PoolError::NoCapacity)?;
        candidate.status = AccountStatus::Assigned;
        Ok(candidate.id.clone())
    }

    fn release(&self, account_ref: &str) -> Result<(), PoolError> {
        let mut accounts = self.accounts.write().expect("lock poisoned");
        let account = accounts
            .get_mut(account_ref)
            .ok_or_else(|| PoolError::UnknownAccount {
                account_ref: account_ref.to_string(),
            })?;
        if account.status != AccountStatus::Assigned {
            return Err(PoolError::NotAssigned {
                account_ref: account_ref.to_string(),
            });
        }
        account.status = AccountStatus::Available;
        Ok(())
    }

    fn reassign(&self, account_ref: &str) -> Result<(), PoolError> {
        let mut accounts = self.accounts.write().expect("lock poisoned");
        let account = accounts
            .get_mut(account_ref)
            .ok_or_else(|| PoolError::UnknownAccount {
                account_ref: account_ref.to_string(),
            })?;
        match account.status {
            AccountStatus::Available => {
                account.status = AccountStatus::Assigned;
                Ok(())
            },
            AccountStatus::Quarantined => Err(PoolError::Quarantined {
                account_ref: account_ref.to_string(),
            }),
            AccountStatus::Assigned => Err(PoolError::NotAvailable {
                account_ref: account_ref.to_string(),
            }),
        }
    }

    fn mark_quarantined(&self, account_ref: &str, reason: &str) -> Result<(), PoolError> {
        let mut accounts = self.accounts.write().expect("lock poisoned");
        let account = accounts
            .get_mut(account_ref)
            .ok_or_else(|| PoolError::UnknownAccount {
                account_ref: account_ref.to_string(),
            })?;
        account.status = AccountStatus::Quarantined;
        account.quarantine_reason = Some(reason.to_string());
        Ok(())
    }

    fn account(&self, account_ref: &str) -> Option<Account> {
        let accounts = self.accounts.read().expect("lock poisoned");
        accounts.get(account_ref).cloned()
    }

    fn available_count(&self) -> usize {
        let accounts = self.accounts.read().expect("lock poisoned");
        accounts
            .values()
            .filter(|account| account.status == AccountStatus::Available)
            .count()
    }
}
