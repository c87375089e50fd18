use crate::api::message::base64_serde;
use crate::ids::{ChannelId, GuildId, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Presence status for a user connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    Offline,
}

/// Messages sent from the client to the server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[serde(tag = "type")]
pub enum ClientMessage {
    Subscribe {
        channel_id: ChannelId,
    },
    Unsubscribe {
        channel_id: ChannelId,
    },
    SendMessage {
        channel_id: ChannelId,
        #[serde(with = "base64_serde")]
        encrypted_content: Vec<u8>,
        #[serde(with = "base64_serde")]
        nonce: Vec<u8>,
    },
    EditMessage {
        channel_id: ChannelId,
        message_id: MessageId,
        #[serde(with = "base64_serde")]
        encrypted_content: Vec<u8>,
        #[serde(with = "base64_serde")]
        nonce: Vec<u8>,
    },
    DeleteMessage {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    StartTyping {
        channel_id: ChannelId,
    },
    StopTyping {
        channel_id: ChannelId,
    },
    SetPresence {
        status: PresenceStatus,
    },
    Ping {
        ts: u64,
    },
}

/// Messages sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[serde(tag = "type")]
pub enum ServerMessage {
    Ready {
        user_id: UserId,
        guild_ids: Vec<GuildId>,
    },
    MessageCreated {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    MessageUpdated {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    MessageDeleted {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    TypingStarted {
        channel_id: ChannelId,
        user_id: UserId,
    },
    PresenceUpdate {
        user_id: UserId,
        status: PresenceStatus,
    },
    MemberJoined {
        guild_id: GuildId,
        user_id: UserId,
    },
    MemberLeft {
        guild_id: GuildId,
        user_id: UserId,
    },
    Pong {
        ts: u64,
    },
    Error {
        code: u32,
        message: String,
    },
    ReplayComplete {
        channel_id: ChannelId,
    },
}

/// WebSocket error codes.
pub mod error_codes {
    pub const PERMISSION_DENIED: u32 = 4001;
    pub const NOT_FOUND: u32 = 4002;
    pub const RATE_LIMITED: u32 = 4003;
    pub const INVALID_MESSAGE_FORMAT: u32 = 4004;
    pub const CHANNEL_NOT_SUBSCRIBED: u32 = 4005;
    pub const LAGGED: u32 = 4006;
}
