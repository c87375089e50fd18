//! Tunables for the outgoing message delivery core.
//!
//! A plain struct with a `Default` impl, the way `apps/server/src/config.rs`
//! builds its `Config` — this is a library crate, so env-var loading stays
//! the embedding application's job (the same division of labor
//! `openconv-crypto` already follows: it takes a connection, never opens
//! one itself).

use std::time::Duration;

/// Constructor parameters for `NegativeCache`, `SessionEstablisher`, and
/// `SendExecutor`, collected in one place so an embedding app configures
/// the pipeline once rather than threading individual durations through
/// three constructors.
#[derive(Debug, Clone)]
pub struct SendConfig {
    /// Upper bound on `MessageSend::remaining_attempts` for a freshly
    /// constructed send. spec.md §5: "callers set `remainingAttempts` to
    /// bound total work."
    pub max_attempts: u32,
    /// `NegativeCache` missing-device TTL. spec.md §3: 1 minute.
    pub missing_device_ttl: Duration,
    /// `NegativeCache` stale-identity TTL. spec.md §3: 5 minutes.
    pub stale_identity_ttl: Duration,
    /// Per-request timeout for the `RequestMaker` collaborator.
    pub request_timeout: Duration,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            missing_device_ttl: Duration::from_secs(60),
            stale_identity_ttl: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl SendConfig {
    pub fn negative_cache(&self) -> crate::negative_cache::NegativeCache {
        crate::negative_cache::NegativeCache::new(self.missing_device_ttl, self.stale_identity_ttl)
    }
}
