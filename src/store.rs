//! Bucket storage.
//!
//! The store owns all mutable limiter state, keyed by (policy name,
//! partition key). The trait is async so a distributed backend (e.g. Redis)
//! can sit behind the same seam; the in-memory implementation never
//! suspends.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::bucket::Bucket;
use crate::identity::PartitionKey;
use crate::limiter::Decision;
use crate::policy::Policy;

/// Storage key: buckets are fully independent per (policy, partition) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    policy: String,
    partition: String,
}

impl BucketKey {
    pub fn new(policy: &Policy, partition: &PartitionKey) -> Self {
        Self { policy: policy.name().to_string(), partition: partition.as_str().to_string() }
    }
}

/// Abstract storage for bucket state.
///
/// Implementations must apply the refill-and-consume step atomically per
/// bucket: concurrent calls for the same key may not lose updates or
/// double-spend tokens.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Look up (or lazily create, starting full) the bucket for
    /// (`policy`, `partition`) and attempt to consume one token at
    /// `now_millis`.
    async fn try_consume(
        &self,
        policy: &Policy,
        partition: &PartitionKey,
        now_millis: u64,
    ) -> Result<Decision, Box<dyn std::error::Error + Send + Sync>>;
}

/// In-memory store backed by a sharded concurrent map.
///
/// `DashMap` gives per-entry exclusive access during the read-modify-write,
/// so same-bucket attempts serialize while distinct buckets proceed in
/// parallel. No global lock.
#[derive(Debug, Default)]
pub struct InMemoryBucketStore {
    buckets: DashMap<BucketKey, Bucket>,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop buckets that have not seen a consumption attempt for `max_idle`.
    ///
    /// Purely an operational lever for long-running processes with
    /// high-cardinality keys; an evicted key is recreated full on its next
    /// request, so `max_idle` should comfortably exceed the time a bucket
    /// takes to refill on its own. Returns the number of buckets dropped.
    pub fn evict_idle(&self, max_idle: Duration, now_millis: u64) -> usize {
        let max_idle = u64::try_from(max_idle.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_millis.saturating_sub(max_idle);
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.last_access_millis() >= cutoff);
        before.saturating_sub(self.buckets.len())
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn try_consume(
        &self,
        policy: &Policy,
        partition: &PartitionKey,
        now_millis: u64,
    ) -> Result<Decision, Box<dyn std::error::Error + Send + Sync>> {
        let key = BucketKey::new(policy, partition);
        // The entry guard holds the shard lock for the duration of the
        // arithmetic; try_consume is synchronous, so the guard never lives
        // across an await point.
        let mut entry = self.buckets.entry(key).or_insert_with(|| Bucket::full(policy, now_millis));
        Ok(entry.value_mut().try_consume(policy, now_millis))
    }
}
