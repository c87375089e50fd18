use crate::ids::{ChannelId, DmChannelId, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Serde module for serializing `Vec<u8>` as base64 strings in JSON.
pub mod base64_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        s.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

/// Request to send an encrypted message to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(with = "base64_serde")]
    pub encrypted_content: Vec<u8>,
    #[serde(with = "base64_serde")]
    pub nonce: Vec<u8>,
}

/// Message details response with encrypted content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dm_channel_id: Option<DmChannelId>,
    pub sender_id: UserId,
    #[serde(with = "base64_serde")]
    pub encrypted_content: Vec<u8>,
    #[serde(with = "base64_serde")]
    pub nonce: Vec<u8>,
    pub edited_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Query parameters for cursor-based message history.
#[derive(Debug, Deserialize)]
pub struct MessageHistoryQuery {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

/// Paginated message history response.
#[derive(Debug, Serialize)]
pub struct MessageHistoryResponse {
    pub messages: Vec<MessageResponse>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}
