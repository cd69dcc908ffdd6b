//! Transition event model and the publisher boundary.
//!
//! The engine emits one [`TransitionEvent`] per accepted lifecycle
//! operation. Publication is fire-and-forget: the committed lease state
//! is authoritative, and a publish failure is logged and swallowed.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lease::{LeaseId, LeaseStatus, LeaseTransition};

/// Notification of one accepted lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// The lease that changed.
    pub lease_id: LeaseId,
    /// Status before the operation; `None` for lease creation.
    pub from: Option<LeaseStatus>,
    /// Status after the operation.
    pub to: LeaseStatus,
    /// The kind of operation.
    pub transition: LeaseTransition,
    /// The principal that drove the operation.
    pub actor: String,
    /// When the operation was accepted (milliseconds since epoch).
    pub timestamp_ms: u64,
    /// Optional operator-supplied reason.
    pub reason: Option<String>,
}

/// Errors from event publication.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PublishError {
    /// The downstream channel rejected or could not accept the event.
    #[error("event channel unavailable: {reason}")]
    Unavailable {
        /// Description of the fault.
        reason: String,
    },
}

/// Receives lifecycle transition notifications.
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Unavailable`] if the event could not be
    /// handed off. The engine treats this as non-fatal.
    fn publish(&self, event: &TransitionEvent) -> Result<(), PublishError>;
}

/// Publisher that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn publish(&self, _event: &TransitionEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Publisher that records every event in memory, for tests and local
/// inspection.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<TransitionEvent>>,
}

impl RecordingPublisher {
    /// Creates a new empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().expect("lock poisoned").clone()
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().expect("lock poisoned").len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().expect("lock poisoned").is_empty()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: &TransitionEvent) -> Result<(), PublishError> {
        self.events.lock().expect("lock poisoned").push(event.clone());
        Ok(())
    }
}
