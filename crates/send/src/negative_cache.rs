//! In-memory TTL caches that suppress prekey fetches known to be futile.
//!
//! Single-owner, mutex-guarded map per DESIGN NOTES §9 ("replace the locked
//! mutable map with a single-owner actor or a mutex-guarded structure").
//! All reads and writes go through `tokio::sync::Mutex`, which is the
//! async-aware analogue of the source's dedicated serial queue. TTL checks
//! are monotonic-clock based (`std::time::Instant`), never wall-clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::address::Address;
use crate::recipient::{AccountId, Recipient};

/// `(Address, deviceId) -> recorded_at`. TTL = 1 minute.
type MissingDeviceKey = (Address, u32);

/// Cached verdict for a stale/untrusted remote identity key.
#[derive(Debug, Clone)]
pub struct StaleIdentityEntry {
    pub current_identity_key: Vec<u8>,
    pub new_identity_key: Vec<u8>,
    pub recorded_at: Instant,
}

struct Inner {
    missing_devices: HashMap<MissingDeviceKey, Instant>,
    stale_identities: HashMap<Address, StaleIdentityEntry>,
}

/// A function that re-evaluates trust for a given identity key, mirroring
/// `IdentityKeyStore::is_trusted_identity`'s "untrusted for outgoing
/// direction" check without requiring a live store handle on every cache
/// read (tests substitute a closure; production wires it to the identity
/// store).
pub trait TrustCheck: Send + Sync {
    /// Returns `true` when `new_identity_key` is still untrusted for
    /// sending to `address`.
    fn is_untrusted_for_outgoing(&self, address: &Address, new_identity_key: &[u8]) -> bool;

    /// Returns the identity key currently persisted for `address`, if any.
    fn current_identity_key(&self, address: &Address) -> Option<Vec<u8>>;
}

/// Single-writer, single-reader negative-result cache. Cloneable handle
/// around an `Arc<Mutex<_>>` so `SessionEstablisher` and `PrekeyClient` can
/// share one instance without threading a `&mut` reference through the
/// whole pipeline.
#[derive(Clone)]
pub struct NegativeCache {
    inner: std::sync::Arc<Mutex<Inner>>,
    missing_device_ttl: Duration,
    stale_identity_ttl: Duration,
}

impl NegativeCache {
    pub fn new(missing_device_ttl: Duration, stale_identity_ttl: Duration) -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(Inner {
                missing_devices: HashMap::new(),
                stale_identities: HashMap::new(),
            })),
            missing_device_ttl,
            stale_identity_ttl,
        }
    }

    /// Records a missing-device 404, but only for the primary device id —
    /// linked devices are self-healing via server device-list updates, so
    /// caching them would just delay the next legitimate attempt.
    pub async fn record_missing_device(&self, address: Address, device_id: u32) {
        if !Recipient::is_primary_device(device_id) {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner
            .missing_devices
            .insert((address, device_id), Instant::now());
        tracing::debug!(device_id, "recorded missing-device cache entry");
    }

    /// `true` when a prekey fetch for `(address, device_id)` is permitted —
    /// i.e. absent from the cache, or the entry has aged past the TTL.
    pub async fn is_device_not_missing(&self, address: &Address, device_id: u32) -> bool {
        let inner = self.inner.lock().await;
        match inner.missing_devices.get(&(address.clone(), device_id)) {
            Some(recorded_at) => recorded_at.elapsed() >= self.missing_device_ttl,
            None => true,
        }
    }

    pub async fn record_stale_identity(
        &self,
        address: Address,
        current_identity_key: Vec<u8>,
        new_identity_key: Vec<u8>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.stale_identities.insert(
            address,
            StaleIdentityEntry {
                current_identity_key,
                new_identity_key,
                recorded_at: Instant::now(),
            },
        );
    }

    /// `true` (block the fetch) iff: an entry exists, it's within TTL, the
    /// persisted current key hasn't rotated since it was recorded, and the
    /// new key is *still* untrusted for outgoing direction. Any of those
    /// failing means the verdict may have changed, so we permit a retry.
    pub async fn is_identity_likely_untrusted(
        &self,
        _account_id: AccountId,
        address: &Address,
        trust: &dyn TrustCheck,
    ) -> bool {
        let entry = {
            let inner = self.inner.lock().await;
            inner.stale_identities.get(address).cloned()
        };
        let Some(entry) = entry else {
            return false;
        };
        if entry.recorded_at.elapsed() >= self.stale_identity_ttl {
            return false;
        }
        match trust.current_identity_key(address) {
            Some(current) if current == entry.current_identity_key => {}
            _ => return false,
        }
        trust.is_untrusted_for_outgoing(address, &entry.new_identity_key)
    }
}

impl Clone for StaleIdentityEntry {
    fn clone(&self) -> Self {
        Self {
            current_identity_key: self.current_identity_key.clone(),
            new_identity_key: self.new_identity_key.clone(),
            recorded_at: self.recorded_at,
        }
    }
}

impl Default for NegativeCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(5 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct AlwaysUntrusted(Vec<u8>);
    impl TrustCheck for AlwaysUntrusted {
        fn is_untrusted_for_outgoing(&self, _address: &Address, _new_identity_key: &[u8]) -> bool {
            true
        }
        fn current_identity_key(&self, _address: &Address) -> Option<Vec<u8>> {
            Some(self.0.clone())
        }
    }

    struct AlwaysTrusted(Vec<u8>);
    impl TrustCheck for AlwaysTrusted {
        fn is_untrusted_for_outgoing(&self, _address: &Address, _new_identity_key: &[u8]) -> bool {
            false
        }
        fn current_identity_key(&self, _address: &Address) -> Option<Vec<u8>> {
            Some(self.0.clone())
        }
    }

    fn addr() -> Address {
        Address::from_uuid(Uuid::now_v7())
    }

    #[tokio::test]
    async fn record_missing_device_with_non_primary_is_a_no_op() {
        let cache = NegativeCache::default();
        let a = addr();
        cache.record_missing_device(a.clone(), 2).await;
        assert!(cache.is_device_not_missing(&a, 2).await);
    }

    #[tokio::test]
    async fn record_missing_device_with_primary_blocks_until_ttl() {
        let cache = NegativeCache::new(Duration::from_millis(20), Duration::from_secs(300));
        let a = addr();
        cache.record_missing_device(a.clone(), 1).await;
        assert!(!cache.is_device_not_missing(&a, 1).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.is_device_not_missing(&a, 1).await);
    }

    #[tokio::test]
    async fn is_device_not_missing_true_when_absent() {
        let cache = NegativeCache::default();
        assert!(cache.is_device_not_missing(&addr(), 1).await);
    }

    #[tokio::test]
    async fn stale_identity_blocks_within_ttl_when_current_key_unchanged_and_still_untrusted() {
        let cache = NegativeCache::default();
        let a = addr();
        let current = vec![1u8; 32];
        let new_key = vec![2u8; 32];
        cache
            .record_stale_identity(a.clone(), current.clone(), new_key)
            .await;
        let trust = AlwaysUntrusted(current);
        assert!(
            cache
                .is_identity_likely_untrusted(Uuid::now_v7(), &a, &trust)
                .await
        );
    }

    #[tokio::test]
    async fn stale_identity_permits_retry_once_new_key_is_trusted() {
        let cache = NegativeCache::default();
        let a = addr();
        let current = vec![1u8; 32];
        cache
            .record_stale_identity(a.clone(), current.clone(), vec![2u8; 32])
            .await;
        let trust = AlwaysTrusted(current);
        assert!(
            !cache
                .is_identity_likely_untrusted(Uuid::now_v7(), &a, &trust)
                .await
        );
    }

    #[tokio::test]
    async fn stale_identity_permits_retry_once_current_key_rotates() {
        let cache = NegativeCache::default();
        let a = addr();
        cache
            .record_stale_identity(a.clone(), vec![1u8; 32], vec![2u8; 32])
            .await;
        let trust = AlwaysUntrusted(vec![9u8; 32]);
        assert!(
            !cache
                .is_identity_likely_untrusted(Uuid::now_v7(), &a, &trust)
                .await
        );
    }

    #[tokio::test]
    async fn stale_identity_permits_retry_after_ttl_expiry() {
        let cache = NegativeCache::new(Duration::from_secs(60), Duration::from_millis(20));
        let a = addr();
        let current = vec![1u8; 32];
        cache
            .record_stale_identity(a.clone(), current.clone(), vec![2u8; 32])
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let trust = AlwaysUntrusted(current);
        assert!(
            !cache
                .is_identity_likely_untrusted(Uuid::now_v7(), &a, &trust)
                .await
        );
    }

    #[tokio::test]
    async fn stale_identity_permits_retry_when_no_entry_exists() {
        let cache = NegativeCache::default();
        let trust = AlwaysUntrusted(vec![1u8; 32]);
        assert!(
            !cache
                .is_identity_likely_untrusted(Uuid::now_v7(), &addr(), &trust)
                .await
        );
    }
}
