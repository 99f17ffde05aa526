//! Wire format: one JSON object per UDP datagram
//!
//! ```json
//! { "id": 1, "method": "hi", "params": { "player": "Alice" } }
//! ```
//!
//! `id` is optional and only echoed for diagnostics. The method catalog is
//! closed: anything outside [`METHODS`] is rejected at decode time.

use crate::campaign::{ChatEntry, Position, TokenId, TokenRecord, Veil};
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// UDP port the master listens on for notifications
pub const MASTER_API_PORT: u16 = 2214;
/// HTTP port of the master's bulk channel
pub const RESOURCE_PORT: u16 = 2215;
/// UDP port a player listens on
pub const PLAYER_API_PORT: u16 = 2216;
/// Largest UDP payload we attempt to receive
pub const MAX_DATAGRAM: usize = 65_507;
/// Request id carried by every `hi`
pub const HI_ID: u64 = 1;

pub const METHODS: [&str; 7] = [
    "hi",
    "update_token",
    "token_temp_position_changed",
    "page_changed",
    "veils_updated",
    "player_chat",
    "new_chat",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Notification {
    /// Player → master handshake
    Hi {
        #[serde(alias = "name")]
        player: String,
    },
    UpdateToken {
        token: TokenRecord,
    },
    TokenTempPositionChanged {
        token_id: TokenId,
        position: Position,
    },
    /// Master → players
    PageChanged {
        players_page: usize,
    },
    VeilsUpdated {
        page_id: usize,
        veils: Vec<Veil>,
    },
    /// Player → master; the master rebroadcasts it as `NewChat`
    PlayerChat {
        message: ChatEntry,
    },
    NewChat {
        message: ChatEntry,
    },
}

impl Notification {
    pub fn method(&self) -> &'static str {
        match self {
            Notification::Hi { .. } => "hi",
            Notification::UpdateToken { .. } => "update_token",
            Notification::TokenTempPositionChanged { .. } => "token_temp_position_changed",
            Notification::PageChanged { .. } => "page_changed",
            Notification::VeilsUpdated { .. } => "veils_updated",
            Notification::PlayerChat { .. } => "player_chat",
            Notification::NewChat { .. } => "new_chat",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPacket {
    #[serde(default)]
    id: Option<u64>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// A decoded datagram
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub id: Option<u64>,
    pub notification: Notification,
}

impl Packet {
    pub fn new(notification: Notification) -> Self {
        Self {
            id: None,
            notification,
        }
    }

    pub fn with_id(id: u64, notification: Notification) -> Self {
        Self {
            id: Some(id),
            notification,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut value = serde_json::to_value(&self.notification).map_err(ProtocolError::Encode)?;
        if let (Some(id), Value::Object(map)) = (self.id, &mut value) {
            map.insert("id".to_string(), Value::from(id));
        }
        serde_json::to_vec(&value).map_err(ProtocolError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawPacket = serde_json::from_slice(bytes).map_err(ProtocolError::Malformed)?;
        if !METHODS.contains(&raw.method.as_str()) {
            return Err(ProtocolError::UnknownMethod(raw.method));
        }

        let method = raw.method.clone();
        let tagged = serde_json::json!({ "method": raw.method, "params": raw.params });
        let notification =
            serde_json::from_value(tagged).map_err(|source| ProtocolError::InvalidParams { method, source })?;

        Ok(Packet {
            id: raw.id,
            notification,
        })
    }
}
