//! Signal protocol session management.
//!
//! Provides X3DH/PQXDH-based outgoing session creation, session recovery
//! on corruption, and skipped message key pruning.

use libsignal_protocol::{
    DeviceId, IdentityKey, PreKeyBundle, ProtocolAddress, PublicKey,
    SignedPreKeyId, KyberPreKeyId, kem,
};
use rusqlite::Connection;

use crate::error::CryptoError;
use crate::prekeys::SerializedPreKeyBundle;
use crate::storage::CryptoStore;

/// Describes the result of a session recovery attempt.
#[derive(Debug, PartialEq)]
pub enum RecoveryAction {
    /// Session was deleted. Caller should request a new pre-key bundle
    /// from the server and re-establish the session.
    SessionReset,
    /// Session is unrecoverable. The user should be notified.
    Unrecoverable(String),
}

/// Create an outgoing session with a remote party's primary device (device
/// id 1), using their pre-key bundle. Thin wrapper around
/// `create_outgoing_session_for_device` kept for existing single-device
/// callers.
///
/// The `remote_bundle` is JSON-serialized `SerializedPreKeyBundle` data from the server.
/// The bundle's `user_id` field (server-assigned UUID) is used as the address name.
///
/// Returns the `ProtocolAddress` for subsequent message encryption calls.
pub fn create_outgoing_session(
    conn: &Connection,
    remote_bundle: &[u8],
) -> Result<ProtocolAddress, CryptoError> {
    create_outgoing_session_for_device(conn, remote_bundle, 1)
}

/// Create an outgoing session with one specific device of a remote party,
/// using a pre-key bundle fetched for that device. Accounts may have
/// several linked devices, each with its own session keyed by
/// `(address, device_id)` (see `crates/send`'s `SessionEstablisher`, which
/// drives this per pending `(recipient, device)` pair).
///
/// Returns the `ProtocolAddress` for subsequent message encryption calls.
pub fn create_outgoing_session_for_device(
    conn: &Connection,
    remote_bundle: &[u8],
    device_id: u32,
) -> Result<ProtocolAddress, CryptoError> {
    let bundle: SerializedPreKeyBundle = serde_json::from_slice(remote_bundle)?;

    let device_id = DeviceId::new(device_id)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid device id: {e}")))?;

    // Reconstruct libsignal types from serialized bundle
    let identity_key = IdentityKey::decode(&bundle.identity_key)?;

    let signed_pre_key_public = PublicKey::deserialize(&bundle.signed_pre_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let kyber_pre_key_public = kem::PublicKey::deserialize(&bundle.kyber_pre_key)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid kyber key: {e}")))?;

    let pre_key_bundle = PreKeyBundle::new(
        bundle.registration_id,
        device_id,
        None, // no one-time pre-key in V1 bundle
        SignedPreKeyId::from(bundle.signed_pre_key_id),
        signed_pre_key_public,
        bundle.signed_pre_key_signature.clone(),
        KyberPreKeyId::from(bundle.kyber_pre_key_id),
        kyber_pre_key_public,
        bundle.kyber_pre_key_signature.clone(),
        identity_key,
    )
    .map_err(|e| CryptoError::SignalProtocolError(e.to_string()))?;

    let remote_address = ProtocolAddress::new(bundle.user_id, device_id);

    // Wrap in transaction so identity save + session save are atomic
    let tx = conn.unchecked_transaction()?;

    let mut session_store = CryptoStore::new(conn);
    let mut identity_store = CryptoStore::new(conn);
    let now = std::time::SystemTime::now();

    futures::executor::block_on(libsignal_protocol::process_prekey_bundle(
        &remote_address,
        &mut session_store,
        &mut identity_store,
        &pre_key_bundle,
        now,
        &mut rand::rng(),
    ))
    .map_err(|e| match e {
        libsignal_protocol::SignalProtocolError::UntrustedIdentity(addr) => {
            CryptoError::UntrustedIdentity {
                address: addr.name().to_string(),
            }
        }
        other => CryptoError::SignalProtocolError(other.to_string()),
    })?;

    tx.commit()?;

    Ok(remote_address)
}

/// Recover from a corrupted session by deleting it and its associated state.
///
/// Deletes the session record and all associated skipped message keys.
/// The caller should request a new pre-key bundle and call `create_outgoing_session`.
pub fn recover_session(
    conn: &Connection,
    address: &ProtocolAddress,
) -> Result<RecoveryAction, CryptoError> {
    let tx = conn.unchecked_transaction()?;

    let addr_name = address.name();
    let device_id: u32 = address.device_id().into();

    conn.execute(
        "DELETE FROM crypto_sessions WHERE address = ?1 AND device_id = ?2",
        rusqlite::params![addr_name, device_id],
    )?;

    conn.execute(
        "DELETE FROM crypto_skipped_message_keys WHERE session_address = ?1 AND session_device_id = ?2",
        rusqlite::params![addr_name, device_id],
    )?;

    tx.commit()?;
    Ok(RecoveryAction::SessionReset)
}

/// Delete skipped message keys older than `max_age_seconds`.
///
/// Returns the number of entries deleted. Recommended to call on app startup
/// with `max_age_seconds = 604800` (7 days).
pub fn prune_old_skipped_keys(
    conn: &Connection,
    max_age_seconds: u64,
) -> Result<u32, CryptoError> {
    let store = CryptoStore::new(conn);
    store.prune_skipped_message_keys(max_age_seconds)
}
