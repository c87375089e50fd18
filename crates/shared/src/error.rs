/// Shared error type used across server and client.
#[derive(Debug, thiserror::Error)]
pub enum OpenConvError {
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("rate limited")]
    RateLimited,

    #[error("session compromised")]
    SessionCompromised,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}
