//! # lease-core
//!
//! Lifecycle engine for budget- and time-boxed sandbox account leases.
//!
//! A *lease* binds a requester to a temporary sandbox account for
//! exploration or testing. Leases are created in a pending state, reviewed
//! (approved or denied), and then live under two ceilings — a budget
//! threshold fed by external usage monitoring and an expiration deadline —
//! until they reach a terminal state. The engine enforces the transition
//! table under concurrent access and keeps the account pool consistent
//! with committed lease state even when individual steps fail partway.
//!
//! # Architecture
//!
//! ```text
//! API callers / BudgetExpirationMonitor
//!        |
//!        v
//!   LeaseEngine ----> LeaseStore (compare-and-swap records)
//!        |       \--> AccountPool (allocate / release accounts)
//!        v
//!   EventPublisher (best-effort transition notifications)
//! ```
//!
//! # Key Concepts
//!
//! - **Lease**: A versioned record with an append-only audit history,
//!   mutated only through validated transitions.
//! - **Account**: A poolable sandbox resource; at most one non-terminal
//!   lease references an account at any time.
//! - **Template**: A policy object bounding the budget and duration a
//!   lease may request.
//! - **Optimistic concurrency**: Every mutation goes through
//!   [`store::LeaseStore::compare_and_swap`]; stale writers lose and must
//!   re-read.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use lease_core::events::NullPublisher;
//! use lease_core::lease::{
//!     LeaseEngine, LeaseParameters, LeaseStatus, LeaseTemplate, TemplateRegistry,
//! };
//! use lease_core::pool::InMemoryAccountPool;
//! use lease_core::store::InMemoryLeaseStore;
//!
//! let templates = TemplateRegistry::new();
//! templates
//!     .register(LeaseTemplate::new(
//!         "tmpl-basic",
//!         "Basic sandbox",
//!         50_000,
//!         7 * 24 * 60 * 60 * 1000,
//!     ))
//!     .unwrap();
//!
//! let engine = LeaseEngine::new(
//!     Arc::new(InMemoryLeaseStore::new()),
//!     Arc::new(InMemoryAccountPool::with_accounts(["acct-001"])),
//!     Arc::new(NullPublisher),
//!     templates,
//! );
//!
//! let lease = engine
//!     .request_lease("user-1", "tmpl-basic", LeaseParameters::new(10_000, 86_400_000))
//!     .unwrap();
//! assert_eq!(lease.status(), LeaseStatus::PendingApproval);
//!
//! let lease = engine.approve(lease.id(), lease.version(), "admin").unwrap();
//! assert_eq!(lease.status(), LeaseStatus::Active);
//! assert!(lease.resource_ref().is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod events;
pub mod lease;
pub mod monitor;
pub mod pool;
pub mod store;

pub use events::{EventPublisher, NullPublisher, RecordingPublisher, TransitionEvent};
pub use lease::{
    Lease, LeaseCommand, LeaseEngine, LeaseError, LeaseParameters, LeaseStatus, LeaseTemplate,
    LeaseTransition, TemplateRegistry,
};
pub use monitor::{BudgetExpirationMonitor, MonitorConfig, ScanOutcome, UsageSample};
pub use pool::{Account, AccountPool, AccountStatus, InMemoryAccountPool, PoolError};
pub use store::{InMemoryLeaseStore, LeaseStore, StoreError};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::events::{EventPublisher, NullPublisher, TransitionEvent};
    pub use crate::lease::{
        Lease, LeaseCommand, LeaseEngine, LeaseError, LeaseParameters, LeaseStatus, LeaseTemplate,
        TemplateRegistry,
    };
    pub use crate::monitor::{BudgetExpirationMonitor, MonitorConfig, UsageSample};
    pub use crate::pool::{AccountPool, InMemoryAccountPool};
    pub use crate::store::{InMemoryLeaseStore, LeaseStore};
}
