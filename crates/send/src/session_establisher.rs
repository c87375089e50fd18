//! Given a batch of pending sends, computes which `(account, device)`
//! pairs lack a session and drives prekey fetch + session build for each
//! (spec.md §4.2).

use std::sync::Arc;

use crate::error::SendError;
use crate::message_send::MessageSend;
use crate::prekey_client::{PrekeyClient, RequestMaker};
use crate::recipient::AccountId;
use crate::storage::SendStore;

/// Drives `EnsureSessions` for a batch of `MessageSend`s.
///
/// Per DESIGN NOTES §9, the source's serial `completionQueue` becomes an
/// ownership invariant here: each `MessageSend` is only ever touched by the
/// task driving its own retry loop, so different sends in `sends` can be
/// fanned out with `futures::future::join_all` safely. Within one send,
/// device fetches run sequentially — they share the send's sticky
/// `has_websocket_send_failed`/`has_ud_auth_failed` flags, so true
/// concurrent mutation would need its own lock and would not observe the
/// spec's failover ordering ("on UD-auth rejection it sets
/// send.hasUDAuthFailed; on websocket failure it sets
/// send.hasWebsocketSendFailed so subsequent retries stay on REST") any
/// better than sequential processing does. Session writes themselves are
/// each their own write transaction, so they remain idempotent regardless.
pub struct SessionEstablisher<R: RequestMaker> {
    prekey_client: Arc<PrekeyClient<R>>,
    store: Arc<SendStore>,
    /// Explicit per SPEC_FULL.md §9.5 ("Local-device exclusion
    /// explicitness") rather than inferred from some ambient account
    /// manager singleton.
    local_device_id: u32,
}

impl<R: RequestMaker> SessionEstablisher<R> {
    pub fn new(prekey_client: Arc<PrekeyClient<R>>, store: Arc<SendStore>, local_device_id: u32) -> Self {
        Self {
            prekey_client,
            store,
            local_device_id,
        }
    }

    /// `EnsureSessions(sends, ignoreErrors)` (spec.md §4.2). On success,
    /// every device in every send's `device_ids` is guaranteed to have a
    /// session. `ignore_errors` only ever swallows `MissingDevice` — any
    /// other failure always propagates, per spec.md §4.2's closing note.
    pub async fn ensure_sessions(
        &self,
        sends: &mut [MessageSend],
        ignore_errors: bool,
    ) -> Result<(), SendError> {
        let futures = sends
            .iter_mut()
            .map(|send| self.ensure_sessions_for_send(send, ignore_errors));
        let results = futures::future::join_all(futures).await;
        results.into_iter().collect::<Result<Vec<()>, _>>()?;
        Ok(())
    }

    async fn ensure_sessions_for_send(
        &self,
        send: &mut MessageSend,
        ignore_errors: bool,
    ) -> Result<(), SendError> {
        let account_id = send.recipient.account_id;
        let candidates: Vec<u32> = send
            .device_ids
            .iter()
            .copied()
            .filter(|&device_id| !(send.is_local_address && device_id == self.local_device_id))
            .collect();

        let pending = self
            .store
            .read(move |conn| SendStore::devices_without_session(conn, account_id, &candidates))
            .await?;

        for device_id in pending {
            match self.ensure_session_for_device(send, device_id).await {
                Ok(()) => {}
                Err(err @ SendError::MissingDevice { .. }) => {
                    tracing::debug!(account_id = %account_id, device_id, ignore_errors, "pruning missing device from send");
                    self.prune_missing_device(send, device_id).await?;
                    if !ignore_errors {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn ensure_session_for_device(
        &self,
        send: &mut MessageSend,
        device_id: u32,
    ) -> Result<(), SendError> {
        let address = send.recipient.address.clone();
        let account_id = send.recipient.account_id;

        let bundle = {
            let store = Arc::clone(&self.store);
            let trust = store
                .read(move |conn| {
                    Ok(StoreTrustCheckOwned {
                        current: SendStore::current_identity_key(conn, account_id)?,
                    })
                })
                .await?;
            self.prekey_client
                .fetch(send, &address, account_id, device_id, &trust)
                .await?
        };

        self.create_session(account_id, &address, device_id, bundle)
            .await
    }

    /// `CreateSession(bundle, accountId, address, deviceId)` (spec.md
    /// §4.2 step 3).
    async fn create_session(
        &self,
        account_id: AccountId,
        address: &crate::address::Address,
        device_id: u32,
        bundle: crate::prekey_client::PreKeyBundle,
    ) -> Result<(), SendError> {
        let already_exists = self
            .store
            .read(move |conn| SendStore::session_exists(conn, account_id, device_id))
            .await?;
        if already_exists {
            return Ok(());
        }

        let new_identity_key = bundle.remote_identity_key.clone();
        let bundle_json = bundle.into_crypto_bundle_json(account_id)?;

        // `create_outgoing_session_for_device` opens and commits its own
        // transaction internally, so this goes through
        // `with_own_transaction` rather than `write` (spec.md §4.2 step 3
        // still runs as "one write transaction" — it's just owned by the
        // crypto crate instead of nested inside ours).
        let store = Arc::clone(&self.store);
        let conn_result = store
            .with_own_transaction(move |conn| {
                openconv_crypto::session::create_outgoing_session_for_device(
                    conn,
                    &bundle_json,
                    device_id,
                )
                .map(|_| ())
                .map_err(SendError::from)
            })
            .await;

        match conn_result {
            Ok(()) => {
                let still_exists = self
                    .store
                    .read(move |conn| SendStore::session_exists(conn, account_id, device_id))
                    .await?;
                if !still_exists {
                    return Err(SendError::Internal(format!(
                        "session missing for ({account_id}, {device_id}) immediately after create_session succeeded"
                    )));
                }
                Ok(())
            }
            Err(SendError::Crypto(openconv_crypto::error::CryptoError::UntrustedIdentity {
                ..
            })) => {
                tracing::warn!(%address, account_id = %account_id, device_id, "untrusted identity on session create, recording stale identity");
                // Do NOT persist `new_identity_key` here: the crypto store
                // has no separate verification-state column, so writing it
                // to `crypto_trusted_identities` would make
                // `is_trusted_identity` treat it as trusted on the very
                // next attempt (TOFU), silently accepting a rotation the
                // user never re-verified. The store keeps its existing
                // current key; only the negative cache records the
                // untrusted candidate.
                let current = self
                    .store
                    .read(move |conn| SendStore::current_identity_key(conn, account_id))
                    .await?;

                self.negative_cache_record_stale(address, current, new_identity_key)
                    .await;

                Err(SendError::UntrustedIdentity {
                    address: address.to_string(),
                })
            }
            Err(other) => Err(other),
        }
    }

    async fn negative_cache_record_stale(
        &self,
        address: &crate::address::Address,
        current: Option<Vec<u8>>,
        new_identity_key: Vec<u8>,
    ) {
        if let Some(current) = current {
            self.prekey_client
                .negative_cache()
                .record_stale_identity(address.clone(), current, new_identity_key)
                .await;
        }
    }

    /// Removes a device reported missing by the server: drop it from the
    /// recipient's device set and from the send's own `device_ids` so a
    /// retry within `PerformSend` doesn't re-target it.
    async fn prune_missing_device(&self, send: &mut MessageSend, device_id: u32) -> Result<(), SendError> {
        let account_id = send.recipient.account_id;
        let store = Arc::clone(&self.store);
        store
            .write(move |txn| {
                if let Some(mut recipient) = SendStore::get_recipient_sync(txn, account_id)? {
                    recipient.remove_devices([device_id]);
                    SendStore::save_recipient(txn, &recipient)?;
                }
                Ok(())
            })
            .await?;
        send.recipient.remove_devices([device_id]);
        send.device_ids.retain(|&d| d != device_id);
        Ok(())
    }
}

/// A snapshot of the current identity key, read once under `SendStore::read`
/// and handed to `PrekeyClient::fetch` as a `TrustCheck` implementor —
/// avoids holding the storage mutex across the network call.
struct StoreTrustCheckOwned {
    current: Option<Vec<u8>>,
}

impl crate::negative_cache::TrustCheck for StoreTrustCheckOwned {
    fn is_untrusted_for_outgoing(&self, _address: &crate::address::Address, new_identity_key: &[u8]) -> bool {
        match &self.current {
            Some(current) => current.as_slice() != new_identity_key,
            None => false,
        }
    }

    fn current_identity_key(&self, _address: &crate::address::Address) -> Option<Vec<u8>> {
        self.current.clone()
    }
}
