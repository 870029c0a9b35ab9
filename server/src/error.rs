//! Error types surfaced by the room engine and its collaborators.

use thiserror::Error;

/// Validation failures. The `Display` text is sent verbatim to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room not found")]
    RoomNotFound,
    #[error("room is closed")]
    RoomClosed,
    #[error("invalid cell")]
    InvalidCell,
    #[error("player not found in room")]
    PlayerNotFound,
    #[error("player disconnected")]
    PlayerDisconnected,
    #[error("waiting for opponent")]
    WaitingForOpponent,
    #[error("game already finished")]
    GameFinished,
    #[error("not your turn")]
    NotYourTurn,
    #[error("cell already taken")]
    CellTaken,
    #[error("player already connected")]
    AlreadyConnected,
    #[error("spectator already connected")]
    SpectatorAlreadyConnected,
    #[error("room already full")]
    RoomFull,
    #[error("game not finished")]
    GameNotFinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("invalid ws ticket")]
    InvalidTicket,
    #[error("ticket expired")]
    TicketExpired,
    #[error("missing user id")]
    MissingUser,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Anything a single request can fail with. Reported to the requester only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}
