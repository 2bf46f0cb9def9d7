//! Named rate-limit policies.
//!
//! A [`Policy`] fixes the token bucket parameters for a class of endpoints:
//! capacity, refill amount, and refill period. Policies are validated at
//! construction and immutable afterwards; there is no queueing knob because
//! admission is always an immediate accept/reject.

use std::sync::Arc;
use std::time::Duration;

/// How the partition key resolver treats unauthenticated requests under this
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// Partition anonymous traffic by client address.
    Standard,
    /// Login/register-style endpoints: partition anonymous body-bearing
    /// requests by the credential carried in the payload, so one caller
    /// cannot burn the limit for a whole NAT.
    Credential,
}

/// Immutable bucket parameters for a named class of endpoints.
#[derive(Debug, Clone)]
pub struct Policy {
    name: Arc<str>,
    capacity: u32,
    refill_amount: u32,
    refill_period: Duration,
    kind: PolicyKind,
}

impl Policy {
    /// Create a policy, validating the parameters.
    ///
    /// `capacity` and `refill_amount` must be non-zero; `refill_period` must
    /// be at least one millisecond.
    pub fn new(
        name: impl Into<String>,
        capacity: u32,
        refill_amount: u32,
        refill_period: Duration,
    ) -> Result<Self, PolicyError> {
        let name = name.into();
        if name.is_empty() {
            return Err(PolicyError::EmptyName);
        }
        if capacity == 0 {
            return Err(PolicyError::ZeroCapacity { name });
        }
        if refill_amount == 0 {
            return Err(PolicyError::ZeroRefillAmount { name });
        }
        if refill_period < Duration::from_millis(1) {
            return Err(PolicyError::ZeroRefillPeriod { name });
        }
        Ok(Self {
            name: name.into(),
            capacity,
            refill_amount,
            refill_period,
            kind: PolicyKind::Standard,
        })
    }

    /// Mark this policy as governing credential-bearing endpoints.
    #[must_use]
    pub fn credential(mut self) -> Self {
        self.kind = PolicyKind::Credential;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_amount(&self) -> u32 {
        self.refill_amount
    }

    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    /// Refill period in clock milliseconds. Validation guarantees this is
    /// non-zero, so it is safe as a divisor.
    pub(crate) fn refill_period_millis(&self) -> u64 {
        u64::try_from(self.refill_period.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

/// Configuration errors raised when constructing a [`Policy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("policy name must not be empty")]
    EmptyName,
    #[error("policy '{name}': capacity must be greater than zero")]
    ZeroCapacity { name: String },
    #[error("policy '{name}': refill amount must be greater than zero")]
    ZeroRefillAmount { name: String },
    #[error("policy '{name}': refill period must be at least one millisecond")]
    ZeroRefillPeriod { name: String },
}
