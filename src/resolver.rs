//! Partition key resolution.
//!
//! Derives a stable string identifying "who" is making a request. The chain
//! is an explicit ordered attempt list; every fallible step absorbs its
//! failure and falls through to the next, so resolution always produces a
//! key and never propagates an error into the request pipeline.
//!
//! Priority order:
//! 1. authenticated principal → `user:<name-or-subject>`
//! 2. credential policy + body-bearing method + extractable credential →
//!    `auth-user:<credential>`
//! 3. credential policy, extraction failed → `auth-ip:<address>`
//! 4. anything else → `anon:<address>`
//!
//! The credential itself is pulled from the buffered payload, structured
//! parse first, permissive pattern match second — the body bytes are owned
//! by the middleware's replay buffer, so reading them here cannot disturb
//! the downstream handler.

use std::sync::OnceLock;

use http::{HeaderMap, Method};
use regex::Regex;
use tracing::{debug, warn};

use crate::identity::{client_address, PartitionKey, PeerAddr, Principal};
use crate::policy::PolicyKind;

/// Everything the resolver may look at for one request.
///
/// `body` is `Some` only when the middleware buffered the payload for
/// credential sniffing; for all other requests the body is never read.
#[derive(Debug)]
pub struct RequestFacts<'a> {
    pub principal: Option<&'a Principal>,
    pub policy_kind: PolicyKind,
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub peer: Option<PeerAddr>,
    pub body: Option<&'a [u8]>,
}

/// Deterministic partition key resolver.
#[derive(Debug, Clone, Default)]
pub struct KeyResolver {
    _priv: (),
}

impl KeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the partition key for a request. Infallible: internal
    /// failures degrade to the address-scoped fallback key.
    pub fn resolve(&self, facts: &RequestFacts<'_>) -> PartitionKey {
        match self.classify(facts) {
            Some(key) => key,
            None => {
                let address = client_address(facts.headers, facts.peer.as_ref());
                warn!(
                    target: "turnstile::resolver",
                    path = facts.path,
                    "partition key resolution failed, using fallback key"
                );
                PartitionKey::new(format!("fallback:{address}"))
            }
        }
    }

    fn classify(&self, facts: &RequestFacts<'_>) -> Option<PartitionKey> {
        if let Some(principal) = facts.principal {
            let who = principal
                .display_name
                .as_deref()
                .or_else(|| principal.subject_id.as_deref())
                .unwrap_or("unknown");
            let key = PartitionKey::new(format!("user:{who}"));
            debug!(target: "turnstile::resolver", key = %key, path = facts.path, "authenticated caller");
            return Some(key);
        }

        if facts.policy_kind == PolicyKind::Credential && is_body_bearing(facts.method) {
            if let Some(credential) = extract_credential(facts.body) {
                let key = PartitionKey::new(format!("auth-user:{credential}"));
                debug!(target: "turnstile::resolver", key = %key, path = facts.path, "credential extracted from body");
                return Some(key);
            }
            let address = client_address(facts.headers, facts.peer.as_ref());
            let key = PartitionKey::new(format!("auth-ip:{address}"));
            debug!(target: "turnstile::resolver", key = %key, path = facts.path, "credential extraction failed");
            return Some(key);
        }

        let address = client_address(facts.headers, facts.peer.as_ref());
        Some(PartitionKey::new(format!("anon:{address}")))
    }
}

pub(crate) fn is_body_bearing(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Ordered attempt list for pulling a credential identifier out of a raw
/// payload: structured JSON lookup first, then a permissive pattern match
/// over the text.
fn extract_credential(body: Option<&[u8]>) -> Option<String> {
    let raw = body?;
    if raw.is_empty() {
        return None;
    }
    extract_json_credential(raw).or_else(|| extract_pattern_credential(raw))
}

fn extract_json_credential(raw: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(raw).ok()?;
    let object = value.as_object()?;
    for field in ["userName", "email"] {
        if let Some(credential) = object.get(field).and_then(|v| v.as_str()) {
            if !credential.is_empty() {
                return Some(credential.to_string());
            }
        }
    }
    None
}

fn extract_pattern_credential(raw: &[u8]) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r#"(?i)"(?:userName|email)"\s*:\s*"([^"]+)""#).ok())
        .as_ref()?;
    let text = String::from_utf8_lossy(raw);
    pattern.captures(&text).map(|captures| captures[1].to_string())
}
