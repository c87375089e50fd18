use crate::ids::{GuildId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request body for POST /api/guilds/:guild_id/invites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInviteRequest {
    /// Maximum number of uses. None = unlimited.
    pub max_uses: Option<i32>,
    /// When the invite expires. None = never.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Response for invite CRUD operations (guild-scoped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteResponse {
    pub code: String,
    pub guild_id: GuildId,
    pub inviter_id: UserId,
    pub max_uses: Option<i32>,
    pub use_count: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Response for GET /api/invites/:code (public invite lookup).
/// Contains enough info for the user to decide whether to join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteInfoResponse {
    pub code: String,
    pub guild_name: String,
    pub guild_id: GuildId,
    pub member_count: i64,
    pub inviter_display_name: Option<String>,
}
