//! The 429 rejection response.
//!
//! A denial carries a diagnostic payload scoped to the rejected caller only:
//! their partition key, the endpoint, and when they may retry. Nothing about
//! any other caller's bucket is exposed.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{Response, StatusCode};
use serde::Serialize;

use crate::identity::PartitionKey;
use crate::policy::Policy;

/// JSON body returned with a `429 Too Many Requests`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRejection {
    pub error: String,
    pub message: String,
    /// Seconds until the next token lands.
    pub retry_after: f64,
    pub partition_key: String,
    pub endpoint: String,
    /// Unix epoch milliseconds at rejection time.
    pub timestamp: u64,
    pub max_requests_allowed: u32,
}

impl RateLimitRejection {
    pub fn new(
        policy: &Policy,
        partition: &PartitionKey,
        endpoint: &str,
        retry_after: Duration,
    ) -> Self {
        Self {
            error: "Rate limit exceeded".to_string(),
            message: format!(
                "Maximum {} requests allowed per user. User: {}",
                policy.capacity(),
                partition
            ),
            retry_after: retry_after.as_secs_f64(),
            partition_key: partition.as_str().to_string(),
            endpoint: endpoint.to_string(),
            timestamp: unix_millis(),
            max_requests_allowed: policy.capacity(),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Build the full 429 response: status, `Retry-After` header (seconds,
/// rounded up so the client never retries early), JSON content type, and
/// the serialized [`RateLimitRejection`] body.
pub fn too_many_requests<RB>(
    policy: &Policy,
    partition: &PartitionKey,
    endpoint: &str,
    retry_after: Duration,
) -> Response<RB>
where
    RB: From<Bytes>,
{
    let payload = RateLimitRejection::new(policy, partition, endpoint, retry_after);
    let body = serde_json::to_vec(&payload)
        .unwrap_or_else(|_| br#"{"error":"Rate limit exceeded"}"#.to_vec());

    let mut response = Response::new(RB::from(Bytes::from(body)));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(retry_after_seconds(retry_after)));
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn retry_after_seconds(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn policy() -> Policy {
        Policy::new("auth", 2, 1, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn payload_carries_all_diagnostic_fields() {
        let rejection = RateLimitRejection::new(
            &policy(),
            &PartitionKey::new("auth-user:bob"),
            "/api/auth/login",
            Duration::from_secs(60),
        );
        let value = serde_json::to_value(&rejection).unwrap();

        assert_eq!(value["error"], "Rate limit exceeded");
        assert_eq!(value["message"], "Maximum 2 requests allowed per user. User: auth-user:bob");
        assert_eq!(value["retryAfter"], 60.0);
        assert_eq!(value["partitionKey"], "auth-user:bob");
        assert_eq!(value["endpoint"], "/api/auth/login");
        assert_eq!(value["maxRequestsAllowed"], 2);
        assert!(value["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn response_sets_status_and_headers() {
        let response: Response<Full<Bytes>> = too_many_requests(
            &policy(),
            &PartitionKey::new("anon:10.0.0.1"),
            "/api/customers",
            Duration::from_millis(59_500),
        );
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        // 59.5s rounds up so the client waits long enough.
        assert_eq!(response.headers()[RETRY_AFTER], "60");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn whole_second_retry_after_is_not_rounded_up() {
        let response: Response<Full<Bytes>> = too_many_requests(
            &policy(),
            &PartitionKey::new("anon:10.0.0.1"),
            "/api/customers",
            Duration::from_secs(30),
        );
        assert_eq!(response.headers()[RETRY_AFTER], "30");
    }
}
