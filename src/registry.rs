//! Registry for named rate-limit policies.
//!
//! Policies are registered once at startup and resolved by name at request
//! time. Registration is never concurrent with traffic, so resolution only
//! takes the shared side of the lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::policy::Policy;

/// Errors from policy registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The requested policy name was not found.
    #[error("rate limit policy '{name}' is not registered")]
    UnknownPolicy {
        /// Name that could not be located.
        name: String,
    },
    /// A policy with this name already exists. Policies are immutable once
    /// registered, so a second registration is a configuration mistake.
    #[error("rate limit policy '{name}' is already registered")]
    DuplicatePolicy {
        /// Name that was registered twice.
        name: String,
    },
}

/// Trait for policy registries (injectable so hosts can source policies from
/// their own configuration layer).
pub trait PolicyRegistry: Send + Sync + std::fmt::Debug {
    /// Register a policy by its name. Duplicate names are rejected.
    fn register(&self, policy: Policy) -> Result<(), RegistryError>;
    /// Resolve a policy by name.
    fn resolve(&self, name: &str) -> Result<Policy, RegistryError>;
    /// Snapshot registered policies sorted by name.
    fn snapshot(&self) -> Vec<Policy>;
}

/// In-memory implementation backed by an RwLock.
#[derive(Default, Clone, Debug)]
pub struct InMemoryPolicyRegistry {
    inner: Arc<RwLock<HashMap<String, Policy>>>,
}

impl InMemoryPolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyRegistry for InMemoryPolicyRegistry {
    fn register(&self, policy: Policy) -> Result<(), RegistryError> {
        let mut map = self.inner.write().expect("policy registry poisoned");
        if map.contains_key(policy.name()) {
            return Err(RegistryError::DuplicatePolicy { name: policy.name().to_string() });
        }
        debug!(
            target: "turnstile::registry",
            name = policy.name(),
            capacity = policy.capacity(),
            refill = policy.refill_amount(),
            period_ms = policy.refill_period().as_millis() as u64,
            "policy registered"
        );
        map.insert(policy.name().to_string(), policy);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<Policy, RegistryError> {
        let guard = self.inner.read().expect("policy registry poisoned");
        guard.get(name).cloned().ok_or_else(|| RegistryError::UnknownPolicy { name: name.to_string() })
    }

    fn snapshot(&self) -> Vec<Policy> {
        let guard = self.inner.read().expect("policy registry poisoned");
        let mut entries: Vec<Policy> = guard.values().cloned().collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy(name: &str) -> Policy {
        Policy::new(name, 2, 1, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn register_then_resolve() {
        let registry = InMemoryPolicyRegistry::new();
        registry.register(policy("auth")).unwrap();
        let resolved = registry.resolve("auth").unwrap();
        assert_eq!(resolved.name(), "auth");
        assert_eq!(resolved.capacity(), 2);
    }

    #[test]
    fn unknown_policy_errors() {
        let registry = InMemoryPolicyRegistry::new();
        let err = registry.resolve("nope").unwrap_err();
        assert_eq!(err, RegistryError::UnknownPolicy { name: "nope".into() });
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = InMemoryPolicyRegistry::new();
        registry.register(policy("auth")).unwrap();
        let err = registry.register(policy("auth")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicatePolicy { name: "auth".into() });
    }

    #[test]
    fn snapshot_is_sorted_by_name() {
        let registry = InMemoryPolicyRegistry::new();
        registry.register(policy("user")).unwrap();
        registry.register(policy("admin")).unwrap();
        registry.register(policy("auth")).unwrap();
        let names: Vec<String> = registry.snapshot().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["admin", "auth", "user"]);
    }
}
