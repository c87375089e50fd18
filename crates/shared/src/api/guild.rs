use crate::ids::{GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};

/// Request to create a new guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct CreateGuildRequest {
    pub name: String,
}

/// Request to update guild properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UpdateGuildRequest {
    pub name: Option<String>,
    pub icon_url: Option<String>,
}

/// Guild details response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct GuildResponse {
    pub id: GuildId,
    pub name: String,
    pub owner_id: UserId,
    pub icon_url: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_count: Option<i64>,
}

/// List of guilds response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct GuildListResponse {
    pub guilds: Vec<GuildResponse>,
}

/// Response for a guild member with role information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct GuildMemberResponse {
    pub user_id: UserId,
    pub display_name: String,
    pub joined_at: chrono::DateTime<chrono::Utc>,
    pub roles: Vec<RoleSummary>,
}

/// Minimal role info included in member listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct RoleSummary {
    pub id: RoleId,
    pub name: String,
    pub position: i32,
}
