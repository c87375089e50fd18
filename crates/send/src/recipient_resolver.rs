//! Recipient enumeration and directory reconciliation: `PrepareSend`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::address::Address;
use crate::collaborators::{CertificateExpirationPolicy, Dependencies, SenderCertificates};
use crate::error::SendError;
use crate::outgoing_message::OutgoingMessage;
use crate::recipient::Recipient;
use crate::storage::SendStore;
use crate::thread::Thread;

/// Result of `RecipientResolver::prepare_send`: the thread the message
/// resolved against, the fully-reconciled recipient list, and the sender
/// certificates to present for sealed-sender auth.
pub struct SendInfo {
    pub thread: Thread,
    pub recipients: Vec<Recipient>,
    pub sender_certificates: SenderCertificates,
}

/// Internal result of `reconcile_directory` — see its doc comment.
struct DirectoryResolution {
    resolved: HashSet<Address>,
    replaced: HashSet<Address>,
}

/// How long an Address that failed contact discovery is treated as
/// undiscoverable before another discovery attempt is allowed. Not part of
/// `NegativeCache` proper (it caches directory misses, not prekey/identity
/// results) but built the same way: a monotonic-clock, mutex-guarded map.
const UNDISCOVERABLE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

struct UndiscoverableCache {
    inner: Mutex<HashMap<Address, Instant>>,
}

impl UndiscoverableCache {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    async fn record(&self, addresses: impl IntoIterator<Item = Address>) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        for address in addresses {
            inner.insert(address, now);
        }
    }

    /// `true` iff every one of `addresses` has a live (within-TTL) entry.
    async fn all_present(&self, addresses: &HashSet<Address>) -> bool {
        if addresses.is_empty() {
            return false;
        }
        let inner = self.inner.lock().await;
        addresses.iter().all(|address| {
            inner
                .get(address)
                .is_some_and(|recorded_at| recorded_at.elapsed() < UNDISCOVERABLE_TTL)
        })
    }
}

/// Turns an `OutgoingMessage` plus its `Thread` into a resolved, directory-
/// reconciled recipient list, per spec.md §4.1.
pub struct RecipientResolver {
    store: Arc<SendStore>,
    dependencies: Arc<Dependencies>,
    local_address: Address,
    undiscoverable: UndiscoverableCache,
}

impl RecipientResolver {
    pub fn new(store: Arc<SendStore>, dependencies: Arc<Dependencies>, local_address: Address) -> Self {
        Self {
            store,
            dependencies,
            local_address,
            undiscoverable: UndiscoverableCache::new(),
        }
    }

    pub async fn prepare_send(
        &self,
        message: &mut OutgoingMessage,
        thread: Option<Thread>,
    ) -> Result<SendInfo, SendError> {
        // Step 1: sender certificate acquisition, permissive expiration.
        let sender_certificates = self
            .dependencies
            .sender_certificates
            .ensure(CertificateExpirationPolicy::Permissive)
            .await?;

        // Step 2: thread resolve.
        let thread = thread.ok_or(SendError::ThreadMissing)?;

        // Step 3: recipient enumeration.
        let candidates = self.enumerate_candidates(message, &thread)?;

        // Step 4: directory reconciliation.
        let DirectoryResolution { resolved, replaced } = self.reconcile_directory(candidates).await?;

        // Step 5: skip marking. An original address that was replaced by a
        // discovered one is still being delivered to, just under a
        // different `Address` value — it must not be marked skipped.
        for dropped in message.dropped_from(&resolved) {
            if replaced.contains(&dropped) {
                continue;
            }
            message.mark_skipped(dropped);
        }

        // Load or create a Recipient record for each resolved Address.
        let mut recipients = Vec::with_capacity(resolved.len());
        for address in resolved {
            recipients.push(self.load_or_create_recipient(address).await?);
        }

        Ok(SendInfo {
            thread,
            recipients,
            sender_certificates,
        })
    }

    fn enumerate_candidates(
        &self,
        message: &OutgoingMessage,
        thread: &Thread,
    ) -> Result<HashSet<Address>, SendError> {
        if message.is_sync_message {
            return Ok(HashSet::from([self.local_address.clone()]));
        }

        let mut candidates = match thread {
            Thread::Group(group) => {
                let mut set: HashSet<Address> = message
                    .sending_recipient_addresses
                    .iter()
                    .filter(|addr| group.full_members.contains(addr))
                    .cloned()
                    .collect();
                if message.requires_pending_member_delivery {
                    set.extend(group.invited_members.iter().cloned());
                }
                set
            }
            Thread::Contact { peer } => {
                if peer.is_local(&self.local_address) {
                    HashSet::from([self.local_address.clone()])
                } else if self.dependencies.blocking.is_blocked(peer) {
                    return Err(SendError::BlockedContactRecipient {
                        address: peer.to_string(),
                    });
                } else {
                    HashSet::from([peer.clone()])
                }
            }
        };

        candidates.remove(&self.local_address);
        for blocked in self.dependencies.blocking.blocked_addresses() {
            candidates.remove(&blocked);
        }
        Ok(candidates)
    }

    /// Result of directory reconciliation: the resolved recipient set, plus
    /// the original invalid (phone-only) addresses that were *replaced* by
    /// a discovered `(uuid, phone)` address. `replaced` must not be treated
    /// as dropped by the caller's skip-marking step — the person behind
    /// that phone number is still being delivered to, just under a
    /// different `Address` value (uuid-present addresses never compare
    /// equal to phone-only ones, see `address.rs`).
    async fn reconcile_directory(&self, candidates: HashSet<Address>) -> Result<DirectoryResolution, SendError> {
        let invalids: HashSet<Address> = candidates.iter().filter(|a| a.is_invalid()).cloned().collect();
        if invalids.is_empty() {
            return Ok(DirectoryResolution {
                resolved: candidates,
                replaced: HashSet::new(),
            });
        }

        if self.undiscoverable.all_present(&invalids).await {
            tracing::debug!(count = invalids.len(), "dropping recently-undiscoverable addresses");
            return Ok(DirectoryResolution {
                resolved: candidates.difference(&invalids).cloned().collect(),
                replaced: HashSet::new(),
            });
        }

        let phone_numbers: Vec<String> = invalids
            .iter()
            .filter_map(|a| a.phone_number.clone())
            .collect();

        let discovery = self
            .dependencies
            .contact_discovery
            .perform(&phone_numbers)
            .await
            .map_err(|e| SendError::Collaborator {
                message: e.message,
                retry_suggested: e.retry_suggested,
            })?;

        let discovered_by_phone: HashMap<String, Address> = discovery
            .discovered
            .into_iter()
            .filter_map(|addr| addr.phone_number.clone().map(|phone| (phone, addr)))
            .collect();

        let mut resolved: HashSet<Address> = candidates.difference(&invalids).cloned().collect();
        let mut replaced = HashSet::new();
        let mut still_undiscoverable = Vec::new();
        for invalid in invalids {
            match invalid.phone_number.as_deref().and_then(|phone| discovered_by_phone.get(phone)) {
                Some(found) => {
                    resolved.insert(found.clone());
                    replaced.insert(invalid);
                }
                None => still_undiscoverable.push(invalid),
            }
        }
        self.undiscoverable.record(still_undiscoverable).await;

        Ok(DirectoryResolution { resolved, replaced })
    }

    async fn load_or_create_recipient(&self, address: Address) -> Result<Recipient, SendError> {
        if let Some(account_id) = address.uuid {
            if let Some(existing) = self
                .store
                .read(move |conn| SendStore::get_recipient_sync(conn, account_id))
                .await?
            {
                return Ok(existing);
            }

            // Newly-discovered account with no prior recipient row: assume
            // the primary device only. `SessionEstablisher`/`SendExecutor`
            // reconcile the device set further via the server's own
            // missing/extra-device signals (spec.md §4.5
            // `handleMismatchedDevices`).
            let mut recipient = Recipient::new(account_id, address);
            recipient.add_devices([Recipient::PRIMARY_DEVICE_ID]);
            self.store
                .write({
                    let recipient = recipient.clone();
                    move |txn| SendStore::save_recipient(txn, &recipient)
                })
                .await?;
            Ok(recipient)
        } else {
            Err(SendError::Internal(format!(
                "unresolved address after directory reconciliation: {address}"
            )))
        }
    }
}
