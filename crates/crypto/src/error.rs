//! Error types for the openconv-crypto crate.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided key material is invalid (wrong length, malformed, etc.).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Decryption failed (wrong key, tampered ciphertext, etc.).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// No session exists for the given address.
    #[error("session not found for address: {address}")]
    SessionNotFound { address: String },

    /// Session state is corrupted and needs recovery.
    #[error("session corrupted for address {address}: {detail}")]
    SessionCorrupted { address: String, detail: String },

    /// No identity keypair has been generated yet.
    #[error("identity not initialized")]
    IdentityNotInitialized,

    /// All one-time pre-keys have been consumed.
    #[error("pre-keys exhausted")]
    PreKeyExhausted,

    /// Database storage error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// OS keychain operation failed.
    #[error("keychain error: {0}")]
    KeychainError(String),

    /// No credential found in OS keychain for the requested entry.
    #[error("keychain entry not found")]
    KeychainEntryNotFound,

    /// OS keychain is not available on this platform — triggers passphrase fallback.
    #[error("keychain unavailable")]
    KeychainUnavailable,

    /// A passphrase is required but was not provided.
    #[error("passphrase required")]
    PassphraseRequired,

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Error from the Signal protocol layer.
    #[error("signal protocol error: {0}")]
    SignalProtocolError(String),

    /// `process_prekey_bundle` rejected the remote identity key because it
    /// differs from the one already trusted for this address. Distinguished
    /// from `SignalProtocolError` by matching on
    /// `libsignal_protocol::SignalProtocolError::UntrustedIdentity` rather
    /// than string-sniffing the error message.
    #[error("untrusted identity for address: {address}")]
    UntrustedIdentity { address: String },

    /// File encryption/decryption error.
    #[error("file encryption error: {0}")]
    FileEncryptionError(String),
}

impl From<rusqlite::Error> for CryptoError {
    fn from(err: rusqlite::Error) -> Self {
        CryptoError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::SerializationError(err.to_string())
    }
}

impl From<CryptoError> for openconv_shared::error::OpenConvError {
    fn from(err: CryptoError) -> Self {
        openconv_shared::error::OpenConvError::Crypto(err.to_string())
    }
}

impl From<keyring::Error> for CryptoError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => CryptoError::KeychainEntryNotFound,
            keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_) => {
                CryptoError::KeychainUnavailable
            }
            other => CryptoError::KeychainError(other.to_string()),
        }
    }
}
