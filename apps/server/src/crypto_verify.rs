use base64::Engine;
use openconv_shared::error::OpenConvError;

/// Parse a base64-encoded public key string into a libsignal PublicKey.
/// Expects 33 bytes after base64 decoding (Curve25519 compressed point).
pub fn parse_public_key(base64_key: &str) -> Result<libsignal_protocol::PublicKey, OpenConvError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_key)
        .map_err(|e| OpenConvError::Validation(format!("invalid base64 public key: {e}")))?;

    if bytes.len() != 33 {
        return Err(OpenConvError::Validation(format!(
            "expected 33-byte public key, got {} bytes",
            bytes.len()
        )));
    }

    libsignal_protocol::PublicKey::deserialize(&bytes)
        .map_err(|e| OpenConvError::Validation(format!("invalid public key: {e}")))
}

/// Verify a signature against a challenge using a libsignal PublicKey.
/// The signature was produced by `private_key.calculate_signature()` on the client.
pub fn verify_challenge_signature(
    public_key: &libsignal_protocol::PublicKey,
    challenge: &[u8],
    signature: &[u8],
) -> bool {
    public_key.verify_signature(challenge, signature)
}
