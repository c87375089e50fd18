//! Identity keypair management for openconv-crypto.
//!
//! Generates Curve25519 identity keypairs via libsignal, persists them in
//! encrypted SQLite, and provides public key export and challenge signing
//! for the registration/login flows.

use base64::Engine;
use libsignal_protocol::IdentityKeyPair;
use rand::Rng;
use rusqlite::Connection;

use crate::error::CryptoError;
use crate::storage::{with_transaction, CryptoStore};

/// Generate a new Curve25519 identity keypair and store it in the database.
///
/// Also generates and stores a registration ID in the 14-bit range (1..=16380)
/// as required by the libsignal protocol specification.
///
/// Returns an error if an identity already exists (to prevent accidental
/// overwrite, which would break existing sessions).
pub fn generate_identity(conn: &Connection) -> Result<IdentityKeyPair, CryptoError> {
    let keypair = IdentityKeyPair::generate(&mut rand::rng());
    let reg_id: u32 = rand::rng().random_range(1..=16380);

    with_transaction(conn, |store| {
        // Check if identity already exists
        match store.get_identity_keypair() {
            Ok(_) => return Err(CryptoError::StorageError("identity already exists".into())),
            Err(CryptoError::IdentityNotInitialized) => {} // expected, proceed
            Err(e) => return Err(e),
        }

        store.store_identity_keypair(
            keypair.public_key().serialize().as_ref(),
            &keypair.private_key().serialize(),
        )?;

        store.store_config("registration_id", &reg_id.to_be_bytes())?;

        Ok(())
    })?;

    Ok(keypair)
}

/// Retrieve the local identity keypair from the database.
///
/// Returns `CryptoError::IdentityNotInitialized` if no identity has been
/// generated yet.
pub fn get_identity(conn: &Connection) -> Result<IdentityKeyPair, CryptoError> {
    let store = CryptoStore::new(conn);
    let (pub_bytes, priv_bytes) = store.get_identity_keypair()?;

    let public = libsignal_protocol::IdentityKey::decode(&pub_bytes)?;
    let private = libsignal_protocol::PrivateKey::deserialize(&priv_bytes)
        .map_err(|e| CryptoError::SignalProtocolError(e.to_string()))?;
    Ok(IdentityKeyPair::new(public, private))
}

/// Get the local identity public key as a base64-encoded string.
///
/// This is the value used for `RegisterRequest.public_key` and
/// `LoginChallengeRequest.public_key` in the shared API types.
pub fn get_public_key_string(conn: &Connection) -> Result<String, CryptoError> {
    let keypair = get_identity(conn)?;
    let pub_bytes = keypair.public_key().serialize();
    Ok(base64::engine::general_purpose::STANDARD.encode(pub_bytes))
}

/// Sign a challenge byte slice using the local identity private key.
///
/// Used for the login challenge-response flow. The caller base64-encodes
/// the returned signature bytes for `LoginVerifyRequest.signature`.
pub fn sign_challenge(conn: &Connection, challenge: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let keypair = get_identity(conn)?;
    let signature = keypair
        .private_key()
        .calculate_signature(challenge, &mut rand::rng())
        .map_err(|e| CryptoError::SignalProtocolError(e.to_string()))?;
    Ok(Vec::from(signature.as_ref()))
}
