//! Error types for the outgoing message delivery core.

use thiserror::Error;

/// How a caller should react to a `SendError` surfacing from the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Do not retry this send; the failure is final for this recipient.
    Permanent,
    /// Retry is pointless until local state changes (e.g. a cache TTL
    /// expires, or the user re-verifies a safety number).
    PermanentForNow,
    /// The pipeline already reconciled local state (device set, sessions);
    /// a retry driven by the caller is expected to succeed.
    RetryableAfterReconciliation,
    /// Transport hiccup or unclassified server error; retry up to
    /// `MessageSend::remaining_attempts`.
    RetryableNow,
}

/// Errors raised by the outgoing message delivery core.
#[derive(Debug, Error)]
pub enum SendError {
    /// Server 413 on a prekey fetch.
    #[error("prekey rate limit for device {device_id} of {address}")]
    PrekeyRateLimit { address: String, device_id: u32 },

    /// Session-builder raised an untrusted-identity signal, or the
    /// stale-identity cache short-circuited without a network call.
    #[error("untrusted identity for {address}")]
    UntrustedIdentity { address: String },

    /// 404 on a prekey fetch; the device has been pruned locally.
    #[error("missing device {device_id} for {address}")]
    MissingDevice { address: String, device_id: u32 },

    /// Attempted a 1:1 send to a blocked contact.
    #[error("recipient {address} is blocked")]
    BlockedContactRecipient { address: String },

    /// The thread referenced by the outgoing message no longer exists.
    #[error("thread no longer exists")]
    ThreadMissing,

    /// Server 404 on message submission. `ignorable_for_groups` is set
    /// when the send was part of a group fan-out, in which case the
    /// caller should treat this as a partial success rather than a hard
    /// failure of the whole send.
    #[error("no such recipient: {address}")]
    NoSuchRecipient {
        address: String,
        ignorable_for_groups: bool,
    },

    /// Server 401 on message submission.
    #[error("unauthorized device for {address}")]
    UnauthorizedDevice { address: String },

    /// Server 409 on message submission; devices have been reconciled,
    /// caller should retry.
    #[error("mismatched devices for {address}")]
    MismatchedDevices { address: String },

    /// Server 410 on message submission; stale sessions were deleted,
    /// caller should retry.
    #[error("stale devices for {address}")]
    StaleDevices { address: String },

    /// Discovery, directory, or certificate-provider failure. Not an
    /// internal invariant violation — the collaborator itself reported
    /// whether the caller should retry (spec.md §4.1 step 4: "surface
    /// retryability from the discovery error's `retrySuggested`").
    #[error("directory/certificate error: {message}")]
    Collaborator { message: String, retry_suggested: bool },

    /// The send's `remaining_attempts` reached zero.
    #[error("retries exhausted for {address}: {last_error}")]
    RetriesExhausted { address: String, last_error: String },

    /// An internal invariant was violated (e.g. no session exists right
    /// after `EnsureSessions` reported success). This should never
    /// happen and indicates a bug in the pipeline, not a remote/transport
    /// failure.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// Transport-layer failure (connection, timeout, malformed
    /// response) not otherwise classified.
    #[error("transport error: {0}")]
    Transport(String),

    /// Underlying cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] openconv_crypto::error::CryptoError),

    /// Local storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SendError {
    /// Classify how the caller's retry loop should react.
    pub fn retryable(&self) -> Retryability {
        use Retryability::*;
        match self {
            SendError::PrekeyRateLimit { .. } => RetryableNow,
            SendError::UntrustedIdentity { .. } => PermanentForNow,
            SendError::MissingDevice { .. } => Permanent,
            SendError::BlockedContactRecipient { .. } => Permanent,
            SendError::ThreadMissing => Permanent,
            SendError::NoSuchRecipient { .. } => Permanent,
            SendError::UnauthorizedDevice { .. } => Permanent,
            SendError::MismatchedDevices { .. } => RetryableAfterReconciliation,
            SendError::StaleDevices { .. } => RetryableAfterReconciliation,
            SendError::Collaborator { retry_suggested, .. } => {
                if *retry_suggested {
                    RetryableNow
                } else {
                    Permanent
                }
            }
            SendError::RetriesExhausted { .. } => Permanent,
            SendError::Internal(_) => Permanent,
            SendError::Transport(_) => RetryableNow,
            SendError::Crypto(_) => Permanent,
            SendError::Storage(_) => RetryableNow,
        }
    }

    /// True when this error, raised during a group send, should be
    /// treated as a partial success rather than failing the whole
    /// fan-out.
    pub fn ignorable_for_groups(&self) -> bool {
        matches!(
            self,
            SendError::NoSuchRecipient {
                ignorable_for_groups: true,
                ..
            }
        )
    }
}

impl From<rusqlite::Error> for SendError {
    fn from(err: rusqlite::Error) -> Self {
        SendError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        SendError::Transport(err.to_string())
    }
}

impl From<SendError> for openconv_shared::error::OpenConvError {
    fn from(err: SendError) -> Self {
        openconv_shared::error::OpenConvError::Internal(err.to_string())
    }
}
