use crate::ids::UserId;
use serde::{Deserialize, Serialize};

/// Registration request with public key, email, and display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub public_key: String,
    pub email: String,
    pub display_name: String,
}

/// Registration response with new user ID and auth token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: UserId,
    pub token: String,
}

/// Login challenge request with public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginChallengeRequest {
    pub public_key: String,
}

/// Login challenge response containing the challenge to sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginChallengeResponse {
    pub challenge: String,
}

/// Login verification request with public key and signed challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginVerifyRequest {
    pub public_key: String,
    pub signature: String,
}

/// Login verification response with auth token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginVerifyResponse {
    pub token: String,
}
