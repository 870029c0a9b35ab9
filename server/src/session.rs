//! Per-connection binding to the (room, player) pair it currently drives.

use crate::player::ConnectionId;
use crate::room::Room;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
pub struct Attachment {
    pub room: Arc<Room>,
    pub player_id: String,
}

impl Attachment {
    fn same_as(&self, other: &Attachment) -> bool {
        Arc::ptr_eq(&self.room, &other.room) && self.player_id == other.player_id
    }
}

/// Shared by a connection's read loop and its keepalive ticker.
#[derive(Debug)]
pub struct Session {
    conn_id: ConnectionId,
    user_id: Option<i64>,
    attached: Mutex<Option<Attachment>>,
}

impl Session {
    pub fn new(conn_id: ConnectionId, user_id: Option<i64>) -> Self {
        Self {
            conn_id,
            user_id,
            attached: Mutex::new(None),
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// User id established during the handshake, if any.
    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    fn lock(&self) -> MutexGuard<'_, Option<Attachment>> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a new pair. Returns the previous one if it was different.
    pub fn attach(&self, room: Arc<Room>, player_id: String) -> Option<Attachment> {
        let next = Attachment { room, player_id };
        let previous = self.lock().replace(next.clone());
        previous.filter(|previous| !previous.same_as(&next))
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Empties the session. Only the first call after an attach returns the pair.
    pub fn take(&self) -> Option<Attachment> {
        self.lock().take()
    }
}
