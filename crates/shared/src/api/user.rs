use crate::ids::UserId;
use serde::{Deserialize, Serialize};

/// User profile details response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfileResponse {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}
