//! Lease entity, lifecycle state machine, and the transition engine.
//!
//! This module is the heart of the crate. A [`Lease`] moves through a fixed
//! transition table, always by way of the [`LeaseEngine`]:
//!
//! ```text
//! request_lease --> PendingApproval
//!                   |--approve----> Active
//!                   |--deny-------> Denied
//!                   '--terminate--> Terminated
//! Active  --freeze----> Frozen      Active|Frozen --expire----> Expired
//! Frozen  --unfreeze--> Active      Active|Frozen --terminate-> Terminated
//! ```
//!
//! # Key Concepts
//!
//! - **Transition table**: [`LeaseStatus::valid_transitions`] is the single
//!   source of truth; anything not listed fails with
//!   [`LeaseError::InvalidTransition`].
//! - **Version**: incremented on every accepted mutation; stale writers are
//!   rejected through the store's compare-and-swap.
//! - **History**: append-only audit trail of `(transition, actor,
//!   timestamp, reason)` entries, exposed for iteration only.
//! - **Templates**: [`LeaseTemplate`] bounds the budget and duration a
//!   request may ask for.

mod engine;
mod error;
mod state;
mod template;

#[cfg(test)]
mod proptest_lifecycle;

pub use engine::{LeaseCommand, LeaseEngine, SYSTEM_ACTOR};
pub use error::LeaseError;
pub(crate) use state::now_ms;
pub use state::{HistoryEntry, Lease, LeaseId, LeaseStatus, LeaseTransition};
pub use template::{LeaseParameters, LeaseTemplate, TemplateError, TemplateRegistry};
