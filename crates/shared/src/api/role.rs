use crate::ids::{GuildId, RoleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to create a new custom role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub permissions: u64,
}

/// Request to update an existing role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub permissions: Option<u64>,
    pub position: Option<i32>,
}

/// Role details response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleResponse {
    pub id: RoleId,
    pub guild_id: GuildId,
    pub name: String,
    pub permissions: u64,
    pub position: i32,
    pub role_type: String,
    pub created_at: DateTime<Utc>,
}
