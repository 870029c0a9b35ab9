//! Wire protocol shared by the room server and its clients.
//!
//! Every frame in either direction is a JSON envelope `{ "type": ..., "payload": ... }`.
//! Inbound frames are decoded in two steps so that an unknown `type` and a bad
//! payload for a known `type` can be reported differently.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub const BOARD_CELLS: usize = 9;
pub const ROOM_CODE_LENGTH: usize = 6;

/// Mark placed on the board by one of the two seated players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Symbol {
    X,
    O,
}

impl Symbol {
    pub fn other(self) -> Self {
        match self {
            Symbol::X => Symbol::O,
            Symbol::O => Symbol::X,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Symbol::X => "X",
            Symbol::O => "O",
        }
    }
}

/// Participant role inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    PlayerX,
    PlayerO,
    Spectator,
}

impl Role {
    pub fn symbol(self) -> Option<Symbol> {
        match self {
            Role::PlayerX => Some(Symbol::X),
            Role::PlayerO => Some(Symbol::O),
            Role::Spectator => None,
        }
    }

    /// Label sent to clients in `room_created` / `room_joined`.
    pub fn label(self) -> &'static str {
        match self {
            Role::Spectator => "spectator",
            _ => "player",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Waiting,
    InProgress,
    Paused,
    Win,
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    BothLeft,
    Timeout,
}

// Inbound payloads

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRoomPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomPayload {
    pub room_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub spectator: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovePayload {
    pub room_code: String,
    pub player_id: String,
    /// Signed so out-of-range values reach validation instead of failing to decode.
    pub cell: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RematchPayload {
    pub room_code: String,
    pub player_id: String,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    CreateRoom(CreateRoomPayload),
    JoinRoom(JoinRoomPayload),
    Move(MovePayload),
    Rematch(RematchPayload),
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom(_) => "create_room",
            ClientMessage::JoinRoom(_) => "join_room",
            ClientMessage::Move(_) => "move",
            ClientMessage::Rematch(_) => "rematch",
        }
    }

    /// Encodes the message as a JSON envelope, as a client would send it.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let payload = match self {
            ClientMessage::CreateRoom(p) => serde_json::to_value(p)?,
            ClientMessage::JoinRoom(p) => serde_json::to_value(p)?,
            ClientMessage::Move(p) => serde_json::to_value(p)?,
            ClientMessage::Rematch(p) => serde_json::to_value(p)?,
        };
        serde_json::to_string(&Envelope {
            kind: self.kind().to_string(),
            payload,
        })
    }
}

/// Raw envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not an envelope at all. Treated as a protocol violation.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown message type")]
    UnknownType(String),
    #[error("invalid {kind} payload")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Whether the connection can keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DecodeError::Malformed(_))
    }
}

fn payload<T: for<'de> Deserialize<'de>>(
    kind: &'static str,
    value: Value,
) -> Result<T, DecodeError> {
    // An absent payload decodes like an empty object.
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|source| DecodeError::InvalidPayload { kind, source })
}

/// Decodes one inbound text frame.
pub fn decode(text: &str) -> Result<ClientMessage, DecodeError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    match envelope.kind.as_str() {
        "create_room" => payload("create_room", envelope.payload).map(ClientMessage::CreateRoom),
        "join_room" => payload("join_room", envelope.payload).map(ClientMessage::JoinRoom),
        "move" => payload("move", envelope.payload).map(ClientMessage::Move),
        "rematch" => payload("rematch", envelope.payload).map(ClientMessage::Rematch),
        _ => Err(DecodeError::UnknownType(envelope.kind)),
    }
}

// Outbound payloads

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub connected: bool,
}

/// Authoritative room state broadcast after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub room_code: String,
    /// Nine cells, each `""`, `"X"` or `"O"`.
    pub board: Vec<String>,
    pub turn: Symbol,
    pub status: Status,
    /// `""` unless the status is `win`.
    pub winner: String,
    pub players: BTreeMap<Symbol, PlayerInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomResponse {
    pub room_code: String,
    pub player_id: String,
    /// `"X"`, `"O"` or `""` for spectators.
    pub symbol: String,
    /// `"player"` or `"spectator"`.
    pub role: String,
    pub reconnected: bool,
    pub state: StatePayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomCreated(RoomResponse),
    RoomJoined(RoomResponse),
    State(StatePayload),
    PlayerLeft { player_id: String },
    RoomClosed { reason: CloseReason },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
