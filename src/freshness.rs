//! Staleness predicates applied to cached local-origin responses.

use std::time::{Duration, SystemTime};

use crate::config::FreshnessKind;
use crate::request::ResponseHead;

/// Decides whether a cached payload may be served without re-fetching it.
pub trait FreshnessPolicy: Send + Sync {
    fn is_fresh(&self, key: &str, payload: &[u8]) -> bool;
}

impl FreshnessKind {
    pub fn build(&self) -> Box<dyn FreshnessPolicy> {
        match self {
            FreshnessKind::CacheControl => Box::new(CacheControlPolicy),
            FreshnessKind::AlwaysFresh => Box::new(AlwaysFresh),
            FreshnessKind::Parity => Box::new(ParityPolicy),
        }
    }
}

/// Every cached payload is served until it is evicted.
pub struct AlwaysFresh;

impl FreshnessPolicy for AlwaysFresh {
    fn is_fresh(&self, _key: &str, _payload: &[u8]) -> bool {
        true
    }
}

/// Legacy placeholder rule: payloads of odd byte length are stale.
pub struct ParityPolicy;

impl FreshnessPolicy for ParityPolicy {
    fn is_fresh(&self, _key: &str, payload: &[u8]) -> bool {
        payload.len() % 2 == 0
    }
}

/// Honours the validators carried by the cached response itself.
///
/// Stale when the response says `no-store`, `no-cache`, `Pragma: no-cache`,
/// when `max-age` has elapsed since its `Date`, or when `Expires` is in the
/// past. Responses without validators, or whose head cannot be parsed, are
/// treated as fresh.
pub struct CacheControlPolicy;

impl CacheControlPolicy {
    fn is_fresh_at(&self, payload: &[u8], now: SystemTime) -> bool {
        let head = match ResponseHead::parse(payload) {
            Some(head) => head,
            None => return true,
        };

        if let Some(pragma) = head.header("pragma") {
            if pragma.to_ascii_lowercase().contains("no-cache") {
                return false;
            }
        }

        let date = head.header("date").and_then(|d| httpdate::parse_http_date(d).ok());

        if let Some(cache_control) = head.header("cache-control") {
            for directive in cache_control.split(',').map(|d| d.trim().to_ascii_lowercase()) {
                if directive == "no-store" || directive == "no-cache" {
                    return false;
                }
                if let Some(value) = directive.strip_prefix("max-age=") {
                    let max_age = match value.trim_matches('"').parse::<u64>() {
                        Ok(secs) => Duration::from_secs(secs),
                        Err(_) => return false,
                    };
                    if max_age.is_zero() {
                        return false;
                    }
                    // max-age takes precedence over Expires
                    return match date {
                        Some(date) => now.duration_since(date).unwrap_or_default() < max_age,
                        None => true,
                    };
                }
            }
        }

        if let Some(expires) = head.header("expires") {
            return match httpdate::parse_http_date(expires) {
                Ok(expires) => expires > now,
                Err(_) => false,
            };
        }

        true
    }
}

impl FreshnessPolicy for CacheControlPolicy {
    fn is_fresh(&self, _key: &str, payload: &[u8]) -> bool {
        self.is_fresh_at(payload, SystemTime::now())
    }
}
