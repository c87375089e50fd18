use crate::ids::{DmChannelId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to create a DM channel.
/// - For 1:1 DMs: provide a single user_id in `user_ids`
/// - For group DMs: provide 2+ user_ids (up to 24, since the creator is added automatically)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDmChannelRequest {
    pub user_ids: Vec<UserId>,
    pub name: Option<String>,
}

/// Response for a DM channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmChannelResponse {
    pub id: DmChannelId,
    pub name: Option<String>,
    pub creator_id: Option<UserId>,
    pub is_group: bool,
    pub members: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Request to add a member to a group DM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDmMemberRequest {
    pub user_id: UserId,
}
