//! Routes decoded client messages to registry and room operations and fans
//! the results out to room participants.
//!
//! Room operations return snapshots and recipient outboxes while holding the
//! room lock; everything sent from here happens after that lock is released.

use crate::error::{DispatchError, RoomError};
use crate::history::HistoryStore;
use crate::identity::IdentityProvider;
use crate::player::{ConnectionId, Outbox, Player};
use crate::registry::Registry;
use crate::room::{Departure, JoinRequest, Joined, Room, DEFAULT_NAME_X};
use crate::session::{Attachment, Session};
use crate::utils::{random_player_id, sanitize_name};
use log::{debug, error, info};
use shared::{
    ClientMessage, CloseReason, CreateRoomPayload, JoinRoomPayload, MovePayload, RematchPayload,
    Role, ServerMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Shared by every connection task. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    identity: Arc<dyn IdentityProvider>,
    history: Arc<dyn HistoryStore>,
    disconnect_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        identity: Arc<dyn IdentityProvider>,
        history: Arc<dyn HistoryStore>,
        disconnect_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            identity,
            history,
            disconnect_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    /// Runs one inbound message for the connection behind `session`.
    ///
    /// Failures go back to `outbox` as an `error` envelope and nothing is broadcast.
    pub fn handle(&self, session: &Session, outbox: &Outbox, message: ClientMessage) {
        let kind = message.kind();
        let result = match message {
            ClientMessage::CreateRoom(payload) => self.create_room(session, outbox, payload),
            ClientMessage::JoinRoom(payload) => self.join_room(session, outbox, payload),
            ClientMessage::Move(payload) => self.apply_move(payload),
            ClientMessage::Rematch(payload) => self.rematch(payload),
        };

        if let Err(err) = result {
            debug!(
                "Rejected {} from connection {}: {}",
                kind,
                session.conn_id(),
                err
            );
            outbox.send(ServerMessage::error(err.to_string()));
        }
    }

    fn create_room(
        &self,
        session: &Session,
        outbox: &Outbox,
        payload: CreateRoomPayload,
    ) -> Result<(), DispatchError> {
        let name = sanitize_name(&payload.name, DEFAULT_NAME_X);
        let user_id =
            self.identity
                .resolve(session.user_id(), payload.guest_id.as_deref(), &name)?;

        let host = Player::new(random_player_id(), name, Role::PlayerX, user_id, outbox.clone());
        let player_id = host.id.clone();
        let room = self.registry.create(host);

        let created = Joined {
            player_id: player_id.clone(),
            role: Role::PlayerX,
            reconnected: false,
            broadcast: room.broadcast(),
        };
        outbox.send(ServerMessage::RoomCreated(created.response()));
        self.attach(session, room, player_id);
        Ok(())
    }

    fn join_room(
        &self,
        session: &Session,
        outbox: &Outbox,
        payload: JoinRoomPayload,
    ) -> Result<(), DispatchError> {
        let room = self
            .registry
            .lookup(&payload.room_code)
            .ok_or(RoomError::RoomNotFound)?;

        let identity_name = sanitize_name(payload.name.as_deref().unwrap_or_default(), "");
        let user_id = self.identity.resolve(
            session.user_id(),
            payload.guest_id.as_deref(),
            &identity_name,
        )?;

        let joined = room.join(
            JoinRequest {
                player_id: payload.player_id,
                name: payload.name,
                spectator: payload.spectator,
                user_id,
            },
            outbox.clone(),
        )?;

        outbox.send(ServerMessage::RoomJoined(joined.response()));
        self.attach(session, Arc::clone(&room), joined.player_id.clone());
        fan_out(
            &ServerMessage::State(joined.broadcast.state),
            &joined.broadcast.recipients,
        );
        Ok(())
    }

    fn apply_move(&self, payload: MovePayload) -> Result<(), DispatchError> {
        let room = self
            .registry
            .lookup(&payload.room_code)
            .ok_or(RoomError::RoomNotFound)?;
        let applied = room.apply_move(&payload.player_id, payload.cell)?;

        if let Some(record) = &applied.record {
            info!(
                "Room {} game over: {}",
                record.room_code,
                record.winner.map_or("draw", |symbol| symbol.as_str())
            );
            // The outcome stands even if the store is down.
            if let Err(err) = self.history.record(record) {
                error!("Game record for room {} failed: {}", record.room_code, err);
            }
        }

        fan_out(
            &ServerMessage::State(applied.broadcast.state),
            &applied.broadcast.recipients,
        );
        Ok(())
    }

    fn rematch(&self, payload: RematchPayload) -> Result<(), DispatchError> {
        let room = self
            .registry
            .lookup(&payload.room_code)
            .ok_or(RoomError::RoomNotFound)?;
        let broadcast = room.rematch(&payload.player_id)?;
        fan_out(&ServerMessage::State(broadcast.state), &broadcast.recipients);
        Ok(())
    }

    /// Records the new pair on the session, releasing any seat it replaces.
    fn attach(&self, session: &Session, room: Arc<Room>, player_id: String) {
        if let Some(previous) = session.attach(room, player_id) {
            debug!(
                "Connection {} moved away from {} in room {}",
                session.conn_id(),
                previous.player_id,
                previous.room.code()
            );
            self.disconnect(previous, session.conn_id());
        }
    }

    /// Disconnect path for a finished connection. Safe to call more than once.
    pub fn disconnect_session(&self, session: &Session) {
        if let Some(attachment) = session.take() {
            self.disconnect(attachment, session.conn_id());
        }
    }

    fn disconnect(&self, attachment: Attachment, conn_id: ConnectionId) {
        let Attachment { room, player_id } = attachment;
        let departure = room.disconnect(&player_id, conn_id, |generation| {
            self.spawn_disconnect_timer(Arc::clone(&room), player_id.clone(), generation)
        });

        match departure {
            Departure::Ignored => {}
            Departure::SpectatorLeft(broadcast) => {
                fan_out(&ServerMessage::State(broadcast.state), &broadcast.recipients);
            }
            Departure::SeatLeft {
                player_id,
                broadcast,
            } => {
                fan_out(&ServerMessage::PlayerLeft { player_id }, &broadcast.recipients);
                fan_out(&ServerMessage::State(broadcast.state), &broadcast.recipients);
            }
            Departure::Closed { reason, recipients } => {
                self.finish_close(&room, reason, recipients);
            }
        }
    }

    fn spawn_disconnect_timer(
        &self,
        room: Arc<Room>,
        player_id: String,
        generation: u64,
    ) -> AbortHandle {
        let dispatcher = self.clone();
        let timeout = self.disconnect_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Runs to completion without yielding, so aborting ourselves during close is harmless.
            if let Some(recipients) = room.close_if_still_away(&player_id, generation) {
                info!(
                    "Player {} did not return to room {} in time",
                    player_id,
                    room.code()
                );
                dispatcher.finish_close(&room, CloseReason::Timeout, recipients);
            }
        });
        task.abort_handle()
    }

    /// Closes `room` with `reason` unless it is already closed.
    pub fn close_room(&self, room: &Room, reason: CloseReason) -> bool {
        match room.close() {
            Some(recipients) => {
                self.finish_close(room, reason, recipients);
                true
            }
            None => false,
        }
    }

    /// Closes every live room. Used on shutdown.
    pub fn close_all(&self, reason: CloseReason) {
        for code in self.registry.codes() {
            if let Some(room) = self.registry.lookup(&code) {
                self.close_room(&room, reason);
            }
        }
    }

    fn finish_close(&self, room: &Room, reason: CloseReason, recipients: Vec<Outbox>) {
        let notice = ServerMessage::RoomClosed { reason };
        for outbox in &recipients {
            outbox.send(notice.clone());
            outbox.close();
        }
        self.registry.remove(room.code());
        info!("Room {} closed ({:?})", room.code(), reason);
    }
}

fn fan_out(message: &ServerMessage, recipients: &[Outbox]) {
    for outbox in recipients {
        outbox.send(message.clone());
    }
}
