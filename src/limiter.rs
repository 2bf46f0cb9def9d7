//! Partitioned admission decisions.
//!
//! [`PartitionedLimiter`] ties the three stateful pieces together: the policy
//! registry (what the limits are), the bucket store (who has spent what), and
//! the clock (when). Each call consumes at most one token and returns a
//! [`Decision`]; nothing here blocks on I/O.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::clock::{Clock, MonotonicClock};
use crate::identity::PartitionKey;
use crate::policy::Policy;
use crate::registry::{PolicyRegistry, RegistryError};
use crate::store::{BucketStore, InMemoryBucketStore};

/// The decision returned for one consumption attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The request may proceed.
    Allowed {
        /// Whole tokens remaining after this acquisition. Useful for
        /// `X-RateLimit-Remaining`-style diagnostics.
        remaining: u32,
    },
    /// The request is rejected.
    Denied {
        /// Time until the next refill lands for this bucket. Useful for
        /// `Retry-After` headers.
        retry_after: Duration,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Errors from the admission core. The middleware absorbs these (failing
/// open); they are exposed for hosts that drive the limiter directly.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("bucket store failure: {0}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
}

/// Per-identity token bucket limiter over a shared bucket store.
#[derive(Debug)]
pub struct PartitionedLimiter<S = InMemoryBucketStore> {
    registry: Arc<dyn PolicyRegistry>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for PartitionedLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S> PartitionedLimiter<S>
where
    S: BucketStore,
{
    /// Create a limiter over `store` using the monotonic system clock.
    pub fn new(registry: Arc<dyn PolicyRegistry>, store: S) -> Self {
        Self::with_clock(registry, store, Arc::new(MonotonicClock::default()))
    }

    /// Create a limiter with an explicit clock (tests inject a manual one).
    pub fn with_clock(registry: Arc<dyn PolicyRegistry>, store: S, clock: Arc<dyn Clock>) -> Self {
        Self { registry, store: Arc::new(store), clock }
    }

    pub fn registry(&self) -> &Arc<dyn PolicyRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolve `policy_name` and attempt to consume one token from the
    /// partition's bucket.
    pub async fn check(
        &self,
        policy_name: &str,
        partition: &PartitionKey,
    ) -> Result<Decision, AdmissionError> {
        let policy = self.registry.resolve(policy_name)?;
        self.check_policy(&policy, partition).await
    }

    /// Attempt to consume one token for an already-resolved policy.
    pub async fn check_policy(
        &self,
        policy: &Policy,
        partition: &PartitionKey,
    ) -> Result<Decision, AdmissionError> {
        let now = self.clock.now_millis();
        let decision =
            self.store.try_consume(policy, partition, now).await.map_err(AdmissionError::Store)?;
        trace!(
            target: "turnstile::limiter",
            policy = policy.name(),
            partition = %partition,
            allowed = decision.is_allowed(),
            "admission decision"
        );
        Ok(decision)
    }
}
