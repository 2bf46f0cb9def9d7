//! Convenience re-exports for the common setup path.

pub use crate::clock::{Clock, ManualClock, MonotonicClock};
pub use crate::identity::{PartitionKey, PeerAddr, Principal};
pub use crate::limiter::{AdmissionError, Decision, PartitionedLimiter};
pub use crate::middleware::{AdmissionBody, AdmissionLayer, AdmissionService, RouteBindings};
pub use crate::policy::{Policy, PolicyError, PolicyKind};
pub use crate::registry::{InMemoryPolicyRegistry, PolicyRegistry, RegistryError};
pub use crate::rejection::RateLimitRejection;
pub use crate::resolver::{KeyResolver, RequestFacts};
pub use crate::store::{BucketStore, InMemoryBucketStore};
