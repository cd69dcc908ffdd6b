//! Lease templates and the template registry.
//!
//! A template is the policy object a lease is created under: it fixes the
//! ceilings a request may ask for. Templates are immutable once
//! registered; a lease keeps only the template ID, not a copy.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::LeaseError;

/// Maximum number of templates tracked by a registry.
pub const MAX_TEMPLATES: usize = 1_000;

/// Requested budget and duration for a new lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseParameters {
    /// Budget ceiling in integer cents.
    pub budget: u64,
    /// Lease lifetime in milliseconds.
    pub duration_ms: u64,
}

impl LeaseParameters {
    /// Creates a new parameter set.
    #[must_use]
    pub const fn new(budget: u64, duration_ms: u64) -> Self {
        Self {
            budget,
            duration_ms,
        }
    }
}

/// Policy object bounding the budget and duration of leases created under
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseTemplate {
    /// Unique template identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Largest budget a request may ask for, in integer cents.
    pub max_budget: u64,
    /// Longest lifetime a request may ask for, in milliseconds.
    pub max_duration_ms: u64,
}

impl LeaseTemplate {
    /// Creates a new template.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        max_budget: u64,
        max_duration_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            max_budget,
            max_duration_ms,
        }
    }

    /// Validates requested parameters against this template's ceilings.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Validation`] if either value is zero or
    /// exceeds the template ceiling.
    pub fn validate(&self, params: &LeaseParameters) -> Result<(), LeaseError> {
        if params.budget == 0 {
            return Err(LeaseError::validation(
                "budget",
                "must be greater than zero",
            ));
        }
        if params.budget > self.max_budget {
            return Err(LeaseError::validation(
                "budget",
                format!(
                    "requested {} exceeds template {} ceiling of {}",
                    params.budget, self.id, self.max_budget
                ),
            ));
        }
        if params.duration_ms == 0 {
            return Err(LeaseError::validation(
                "duration_ms",
                "must be greater than zero",
            ));
        }
        if params.duration_ms > self.max_duration_ms {
            return Err(LeaseError::validation(
                "duration_ms",
                format!(
                    "requested {} exceeds template {} ceiling of {}",
                    params.duration_ms, self.id, self.max_duration_ms
                ),
            ));
        }
        Ok(())
    }
}

/// Errors from template registration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateError {
    /// A template with this ID is already registered.
    #[error("template already registered: {id}")]
    Duplicate {
        /// The duplicate template ID.
        id: String,
    },

    /// The registry is full.
    #[error("template registry capacity of {max} exceeded")]
    CapacityExceeded {
        /// The registry capacity.
        max: usize,
    },
}

/// Bounded in-memory registry of lease templates.
///
/// Registered templates are immutable; there is deliberately no update or
/// remove surface, because active leases reference templates by ID.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<String, LeaseTemplate>>,
}

impl TemplateRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Duplicate`] if the ID is taken, or
    /// [`TemplateError::CapacityExceeded`] at [`MAX_TEMPLATES`] entries.
    pub fn register(&self, template: LeaseTemplate) -> Result<(), TemplateError> {
        let mut templates = self.templates.write().expect("lock poisoned");
        if templates.contains_key(&template.id) {
            return Err(TemplateError::Duplicate {
                id: template.id.clone(),
            });
        }
        if templates.len() >= MAX_TEMPLATES {
            return Err(TemplateError::CapacityExceeded { max: MAX_TEMPLATES });
        }
        templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Returns the template with the given ID, if registered.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<LeaseTemplate> {
        let templates = self.templates.read().expect("lock poisoned");
        templates.get(id).cloned()
    }

    /// Returns `true` if a template with the given ID is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        let templates = self.templates.read().expect("lock poisoned");
        templates.contains_key(id)
    }

    /// Returns the number of registered templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no templates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.read().expect("lock poisoned").is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> LeaseTemplate {
        LeaseTemplate::new("tmpl-basic", "Basic sandbox", 50_000, 604_800_000)
    }

    #[test]
    fn test_validate_accepts_within_ceilings() {
        let params = LeaseParameters::new(10_000, 86_400_000);
        assert!(template().validate(&params).is_ok());
    }

    #[test]
    fn test_validate_accepts_at_ceiling() {
        let params = LeaseParameters::new(50_000, 604_800_000);
        assert!(template().validate(&params).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let err = template()
            .validate(&LeaseParameters::new(0, 86_400_000))
            .unwrap_err();
        assert!(matches!(err, LeaseError::Validation { ref field, .. } if field == "budget"));
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let err = template()
            .validate(&LeaseParameters::new(100, 0))
            .unwrap_err();
        assert!(matches!(err, LeaseError::Validation { ref field, .. } if field == "duration_ms"));
    }

    #[test]
    fn test_validate_rejects_budget_over_ceiling() {
        let err = template()
            .validate(&LeaseParameters::new(50_001, 86_400_000))
            .unwrap_err();
        assert!(err.to_string().contains("ceiling"));
    }

    #[test]
    fn test_validate_rejects_duration_over_ceiling() {
        let err = template()
            .validate(&LeaseParameters::new(100, 604_800_001))
            .unwrap_err();
        assert!(err.to_string().contains("ceiling"));
    }

    #[test]
    fn test_registry_register_and_get() {
        let registry = TemplateRegistry::new();
        assert!(registry.is_empty());

        registry.register(template()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("tmpl-basic"));

        let found = registry.get("tmpl-basic").unwrap();
        assert_eq!(found.max_budget, 50_000);
    }

    #[test]
    fn test_registry_rejects_duplicate() {
        let registry = TemplateRegistry::new();
        registry.register(template()).unwrap();

        let err = registry.register(template()).unwrap_err();
        assert!(matches!(err, TemplateError::Duplicate { ref id } if id == "tmpl-basic"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_get_unknown() {
        let registry = TemplateRegistry::new();
        assert!(registry.get("tmpl-missing").is_none());
        assert!(!registry.contains("tmpl-missing"));
    }
}
