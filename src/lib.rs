#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Turnstile
//!
//! Per-identity admission control for HTTP services: partitioned token
//! buckets behind a tower middleware.
//!
//! ## Features
//!
//! - **Partition key resolution** from request identity: authenticated
//!   principal, credential sniffed from the body of login-style requests,
//!   or client address — with graceful degradation between them
//! - **Token buckets** with whole-period refill and retry-after computation
//! - **Named policies** registered once at startup, resolved per route
//! - **Tower middleware** that rejects with a structured 429 and replays
//!   sniffed request bodies to the downstream handler untouched
//! - **Per-bucket isolation**: concurrent requests serialize per bucket,
//!   never across buckets
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use turnstile::{
//!     AdmissionLayer, InMemoryBucketStore, InMemoryPolicyRegistry, PartitionedLimiter,
//!     Policy, PolicyRegistry, RouteBindings,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = InMemoryPolicyRegistry::new();
//!     registry.register(Policy::new("auth", 2, 1, Duration::from_secs(60))?.credential())?;
//!     registry.register(Policy::new("user", 2, 1, Duration::from_secs(60))?)?;
//!
//!     let limiter = PartitionedLimiter::new(Arc::new(registry), InMemoryBucketStore::new());
//!     let routes = RouteBindings::new()
//!         .bind("/api/auth", "auth")
//!         .bind("/api", "user");
//!
//!     // Layer it onto any tower service over http::Request / http::Response.
//!     let admission = AdmissionLayer::new(limiter, routes)?;
//!     let _ = admission;
//!     Ok(())
//! }
//! ```

pub mod bucket;
pub mod clock;
pub mod identity;
pub mod limiter;
pub mod middleware;
pub mod policy;
pub mod prelude;
pub mod presets;
pub mod registry;
pub mod rejection;
pub mod resolver;
pub mod store;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use identity::{PartitionKey, PeerAddr, Principal};
pub use limiter::{AdmissionError, Decision, PartitionedLimiter};
pub use middleware::{AdmissionBody, AdmissionLayer, AdmissionService, RouteBindings};
pub use policy::{Policy, PolicyError, PolicyKind};
pub use registry::{InMemoryPolicyRegistry, PolicyRegistry, RegistryError};
pub use rejection::RateLimitRejection;
pub use resolver::{KeyResolver, RequestFacts};
pub use store::{BucketStore, InMemoryBucketStore};
