//! Request identity types and client address resolution.
//!
//! The hosting framework supplies identity through request extensions: its
//! authentication layer inserts a [`Principal`] for authenticated callers and
//! its connection acceptor inserts a [`PeerAddr`]. Everything else is read
//! from standard headers.

use std::fmt;
use std::net::SocketAddr;

use http::header::HeaderMap;

/// Literal used when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown-ip";

/// Identity-derived string that scopes rate-limit state to one caller.
///
/// Never persisted; the only invariant is that the same logical caller maps
/// to the same key for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated caller, as established by the host's authentication layer.
///
/// Insert a clone into the request's extensions before the admission
/// middleware runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    /// Human-facing name; preferred for partitioning when present.
    pub display_name: Option<String>,
    /// Stable subject identifier (e.g. the token's `sub` claim).
    pub subject_id: Option<String>,
}

impl Principal {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self { display_name: Some(display_name.into()), subject_id: None }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }
}

/// Transport-level peer address, inserted into request extensions by the
/// host's connection acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// Resolve the client address for partitioning.
///
/// Preference order: first hop of `x-forwarded-for`, then `x-real-ip`, then
/// the transport peer, else [`UNKNOWN_IP`]. Undecodable header values are
/// skipped rather than treated as an error.
pub fn client_address(headers: &HeaderMap, peer: Option<&PeerAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first_hop) = forwarded.split(',').next() {
            let first_hop = first_hop.trim();
            if !first_hop.is_empty() {
                return first_hop.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    match peer {
        Some(PeerAddr(addr)) => addr.ip().to_string(),
        None => UNKNOWN_IP.to_string(),
    }
}
