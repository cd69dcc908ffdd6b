//! Property-based tests for lifecycle invariants.
//!
//! These verify, over arbitrary operation sequences, that the version
//! counter and audit history only ever move forward, that terminal
//! statuses absorb everything, and that the pool never drifts from
//! committed lease state.

use std::sync::Arc;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use super::engine::LeaseEngine;
use super::state::{Lease, LeaseStatus, LeaseTransition};
use super::template::{LeaseParameters, LeaseTemplate, TemplateRegistry};
use crate::events::NullPublisher;
use crate::pool::{AccountPool, AccountStatus, InMemoryAccountPool};
use crate::store::{InMemoryLeaseStore, LeaseStore};

/// Every `(target, transition)` pair an operation could attempt,
/// permitted or not.
const ATTEMPTS: &[(LeaseStatus, LeaseTransition)] = &[
    (LeaseStatus::Active, LeaseTransition::Approved),
    (LeaseStatus::Denied, LeaseTransition::Denied),
    (LeaseStatus::Frozen, LeaseTransition::Frozen),
    (LeaseStatus::Active, LeaseTransition::Unfrozen),
    (LeaseStatus::Expired, LeaseTransition::Expired),
    (LeaseStatus::Terminated, LeaseTransition::Terminated),
];

/// One step applied directly to a lease record.
#[derive(Debug, Clone, Copy)]
enum EntityOp {
    /// Attempt the indexed `(target, transition)` pair.
    Transition(usize),
    /// Record a usage sample.
    Usage(u64),
}

fn entity_op() -> impl Strategy<Value = EntityOp> {
    prop_oneof![
        (0..ATTEMPTS.len()).prop_map(EntityOp::Transition),
        (0u64..1_000_000).prop_map(EntityOp::Usage),
    ]
}

proptest! {
    /// Version and history only move forward, and exactly together:
    /// accepted transitions advance both, rejected ones advance neither,
    /// usage samples advance only the version.
    #[test]
    fn prop_version_and_history_monotonic(ops in prop::collection::vec(entity_op(), 1..40)) {
        let mut lease = Lease::new("lease-p", "user-1", "tmpl-1", 1_000, 10_000, 0);
        let mut clock = 0u64;

        for op in ops {
            clock += 1;
            let version_before = lease.version();
            let history_before = lease.history().len();
            let status_before = lease.status();

            match op {
                EntityOp::Transition(idx) => {
                    let (target, transition) = ATTEMPTS[idx];
                    let accepted = lease
                        .transition(target, transition, "actor", None, clock)
                        .is_ok();

                    if accepted {
                        prop_assert_eq!(lease.version(), version_before + 1);
                        prop_assert_eq!(lease.history().len(), history_before + 1);
                        prop_assert_eq!(lease.status(), target);
                        prop_assert!(status_before.can_transition_to(target));
                    } else {
                        prop_assert_eq!(lease.version(), version_before);
                        prop_assert_eq!(lease.history().len(), history_before);
                        prop_assert_eq!(lease.status(), status_before);
                        prop_assert!(!status_before.can_transition_to(target));
                    }
                },
                EntityOp::Usage(consumed) => {
                    lease.record_usage(consumed, clock);
                    prop_assert_eq!(lease.version(), version_before + 1);
                    prop_assert_eq!(lease.history().len(), history_before);
                    prop_assert_eq!(lease.status(), status_before);
                },
            }

            // History never outruns the version: both start at 1.
            prop_assert!(lease.version() >= lease.history().len() as u64);
        }
    }

    /// Once terminal, always terminal — no attempt sequence escapes.
    #[test]
    fn prop_terminal_statuses_absorb(
        setup in prop::collection::vec(0..ATTEMPTS.len(), 0..10),
        attempts in prop::collection::vec(0..ATTEMPTS.len(), 1..20),
    ) {
        let mut lease = Lease::new("lease-p", "user-1", "tmpl-1", 1_000, 10_000, 0);
        let mut clock = 0u64;

        for idx in setup {
            clock += 1;
            let (target, transition) = ATTEMPTS[idx];
            let _ = lease.transition(target, transition, "actor", None, clock);
        }

        if lease.is_terminal() {
            let frozen_state = lease.clone();
            for idx in attempts {
                clock += 1;
                let (target, transition) = ATTEMPTS[idx];
                prop_assert!(lease
                    .transition(target, transition, "actor", None, clock)
                    .is_err());
            }
            prop_assert_eq!(lease, frozen_state);
        }
    }
}

/// One step applied through the engine.
#[derive(Debug, Clone, Copy)]
enum EngineOp {
    Approve,
    Deny,
    Freeze,
    Unfreeze,
    Expire,
    Terminate,
}

fn engine_op() -> impl Strategy<Value = EngineOp> {
    prop_oneof![
        Just(EngineOp::Approve),
        Just(EngineOp::Deny),
        Just(EngineOp::Freeze),
        Just(EngineOp::Unfreeze),
        Just(EngineOp::Expire),
        Just(EngineOp::Terminate),
    ]
}

/// Asserts invariant 1: an account is `Assigned` iff exactly one lease
/// with status `Active`/`Frozen` references it.
fn assert_pool_consistent(
    pool: &InMemoryAccountPool,
    store: &InMemoryLeaseStore,
    accounts: &[&str],
) -> Result<(), TestCaseError> {
    for account in accounts {
        let holders = store.list_active_for_account(&(*account).to_string()).len();
        let status = pool.account(account).expect("seeded account").status;
        match status {
            AccountStatus::Assigned => prop_assert_eq!(holders, 1),
            AccountStatus::Available | AccountStatus::Quarantined => {
                prop_assert_eq!(holders, 0);
            },
        }
    }
    Ok(())
}

proptest! {
    /// Arbitrary engine operation sequences never break the 1:1
    /// lease-account binding.
    #[test]
    fn prop_pool_never_drifts_from_lease_state(ops in prop::collection::vec(engine_op(), 1..30)) {
        const ACCOUNTS: &[&str] = &["acct-001", "acct-002"];

        let store = Arc::new(InMemoryLeaseStore::new());
        let pool = Arc::new(InMemoryAccountPool::with_accounts(ACCOUNTS.iter().copied()));
        let templates = TemplateRegistry::new();
        templates
            .register(LeaseTemplate::new("tmpl-1", "Basic", 1_000_000, u64::MAX))
            .expect("fresh registry");
        let engine = LeaseEngine::new(
            Arc::clone(&store) as Arc<dyn LeaseStore>,
            Arc::clone(&pool) as Arc<dyn AccountPool>,
            Arc::new(NullPublisher),
            templates,
        );

        let lease = engine
            .request_lease("user-1", "tmpl-1", LeaseParameters::new(100, 1_000_000))
            .expect("request is valid");

        for op in ops {
            let current = engine.get_lease(lease.id()).expect("lease exists");
            let version = current.version();
            let result = match op {
                EngineOp::Approve => engine.approve(lease.id(), version, "admin"),
                EngineOp::Deny => engine.deny(lease.id(), version, "admin", "r"),
                EngineOp::Freeze => engine.freeze(lease.id(), version, "admin", "r"),
                EngineOp::Unfreeze => engine.unfreeze(lease.id(), version, "admin"),
                EngineOp::Expire => engine.expire(lease.id(), version, "system"),
                EngineOp::Terminate => engine.terminate(lease.id(), version, "admin", "r"),
            };

            // Rejected operations leave the record untouched.
            if result.is_err() {
                prop_assert_eq!(engine.get_lease(lease.id()).expect("lease exists"), current);
            }

            assert_pool_consistent(&pool, &store, ACCOUNTS)?;
        }
    }
}
