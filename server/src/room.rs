//! The authoritative state machine for one room.
//!
//! Every operation takes the room's mutex for its whole duration and never
//! awaits, so operations on one room are totally ordered. Fan-out happens
//! after the lock is released: operations return the snapshot and the
//! outboxes to notify, and the dispatcher does the sending.

use crate::error::RoomError;
use crate::game::{GameState, MoveOutcome};
use crate::history::GameRecord;
use crate::player::{ConnectionId, Outbox, Player};
use crate::utils::{random_player_id, sanitize_name};
use log::{debug, info};
use shared::{CloseReason, PlayerInfo, Role, RoomResponse, StatePayload, Status, Symbol};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tokio::task::AbortHandle;

pub const DEFAULT_NAME_X: &str = "Player X";
pub const DEFAULT_NAME_O: &str = "Player O";
pub const DEFAULT_NAME_SPECTATOR: &str = "Spectator";

/// Parameters of a join or reconnect attempt.
#[derive(Debug, Clone, Default)]
pub struct JoinRequest {
    /// Id from an earlier session; matching it reattaches instead of creating.
    pub player_id: Option<String>,
    pub name: Option<String>,
    pub spectator: bool,
    pub user_id: Option<i64>,
}

/// A state snapshot and the participants that should receive it.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub state: StatePayload,
    pub recipients: Vec<Outbox>,
}

#[derive(Debug, Clone)]
pub struct Joined {
    pub player_id: String,
    pub role: Role,
    pub reconnected: bool,
    pub broadcast: Broadcast,
}

impl Joined {
    pub fn response(&self) -> RoomResponse {
        RoomResponse {
            room_code: self.broadcast.state.room_code.clone(),
            player_id: self.player_id.clone(),
            symbol: self.role.symbol().map_or("", Symbol::as_str).to_string(),
            role: self.role.label().to_string(),
            reconnected: self.reconnected,
            state: self.broadcast.state.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MoveApplied {
    pub outcome: MoveOutcome,
    pub broadcast: Broadcast,
    /// Present only on the move that decided the game.
    pub record: Option<GameRecord>,
}

/// What a disconnect did to the room.
#[derive(Debug)]
pub enum Departure {
    /// Room already closed, unknown player, or the player is attached to another connection.
    Ignored,
    SpectatorLeft(Broadcast),
    /// A seat went dark; its disconnect timer is armed.
    SeatLeft { player_id: String, broadcast: Broadcast },
    /// The last connected seat left and the room was closed.
    Closed { reason: CloseReason, recipients: Vec<Outbox> },
}

#[derive(Debug)]
struct RoomState {
    game: GameState,
    player_x: Option<Player>,
    player_o: Option<Player>,
    spectators: HashMap<String, Player>,
    closed: bool,
}

impl RoomState {
    fn seat(&self, player_id: &str) -> Option<&Player> {
        [self.player_x.as_ref(), self.player_o.as_ref()]
            .into_iter()
            .flatten()
            .find(|player| player.id == player_id)
    }

    fn seat_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        [self.player_x.as_mut(), self.player_o.as_mut()]
            .into_iter()
            .flatten()
            .find(|player| player.id == player_id)
    }

    fn seat_connected(seat: &Option<Player>) -> bool {
        seat.as_ref().is_some_and(Player::is_connected)
    }

    fn both_seats_connected(&self) -> bool {
        Self::seat_connected(&self.player_x) && Self::seat_connected(&self.player_o)
    }

    fn status(&self) -> Status {
        if self.game.winner.is_some() {
            Status::Win
        } else if self.game.draw {
            Status::Draw
        } else if self.player_x.is_none() || self.player_o.is_none() {
            Status::Waiting
        } else if !self.both_seats_connected() {
            Status::Paused
        } else {
            Status::InProgress
        }
    }

    fn snapshot(&self, code: &str) -> StatePayload {
        let mut players = BTreeMap::new();
        for seat in [&self.player_x, &self.player_o].into_iter().flatten() {
            if let Some(symbol) = seat.symbol() {
                players.insert(
                    symbol,
                    PlayerInfo {
                        id: seat.id.clone(),
                        name: seat.name.clone(),
                        connected: seat.is_connected(),
                    },
                );
            }
        }

        StatePayload {
            room_code: code.to_string(),
            board: self.game.board_strings(),
            turn: self.game.turn,
            status: self.status(),
            winner: self.game.winner.map_or("", Symbol::as_str).to_string(),
            players,
        }
    }

    /// Outboxes of every connected participant, seats first.
    fn recipients(&self) -> Vec<Outbox> {
        [self.player_x.as_ref(), self.player_o.as_ref()]
            .into_iter()
            .flatten()
            .chain(self.spectators.values())
            .filter_map(|player| player.outbox().cloned())
            .collect()
    }

    fn broadcast(&self, code: &str) -> Broadcast {
        Broadcast {
            state: self.snapshot(code),
            recipients: self.recipients(),
        }
    }

    fn game_record(&self, code: &str, ended_at: SystemTime) -> GameRecord {
        GameRecord::new(
            code,
            &self.game,
            ended_at,
            self.player_x.as_ref(),
            self.player_o.as_ref(),
        )
    }

    /// Flips `closed`, stops timers and detaches every transport.
    fn close(&mut self) -> Vec<Outbox> {
        self.closed = true;
        let mut outboxes = Vec::new();
        let seats = [self.player_x.as_mut(), self.player_o.as_mut()].into_iter().flatten();
        for player in seats.chain(self.spectators.values_mut()) {
            player.cancel_disconnect_timer();
            if let Some(outbox) = player.detach() {
                outboxes.push(outbox);
            }
        }
        self.spectators.clear();
        outboxes
    }
}

fn reattach(player: &mut Player, outbox: Outbox, request: &JoinRequest) {
    player.attach(outbox);
    if let Some(name) = request.name.as_deref().filter(|name| !name.trim().is_empty()) {
        player.name = sanitize_name(name, &player.name);
    }
    if player.user_id.is_none() {
        player.user_id = request.user_id;
    }
}

/// One game room, shared between the registry, sessions and timers.
#[derive(Debug)]
pub struct Room {
    code: String,
    state: Mutex<RoomState>,
}

impl Room {
    /// Creates a room with `host` seated as X.
    pub fn new(code: String, mut host: Player) -> Self {
        host.role = Role::PlayerX;
        Self {
            code,
            state: Mutex::new(RoomState {
                game: GameState::new(),
                player_x: Some(host),
                player_o: None,
                spectators: HashMap::new(),
                closed: false,
            }),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    fn lock(&self) -> MutexGuard<'_, RoomState> {
        // Operations are all-or-nothing, so state behind a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn snapshot(&self) -> StatePayload {
        self.lock().snapshot(&self.code)
    }

    pub fn broadcast(&self) -> Broadcast {
        self.lock().broadcast(&self.code)
    }

    /// Seat or spectator id lookup: `Some(connected)` if the id is known.
    pub fn participant_connected(&self, player_id: &str) -> Option<bool> {
        let state = self.lock();
        state
            .seat(player_id)
            .or_else(|| state.spectators.get(player_id))
            .map(Player::is_connected)
    }

    pub fn spectator_count(&self) -> usize {
        self.lock().spectators.len()
    }

    /// Adds a participant or reattaches a returning one to `outbox`.
    ///
    /// Reconnection by id always wins over filling the O seat.
    pub fn join(&self, request: JoinRequest, outbox: Outbox) -> Result<Joined, RoomError> {
        let mut state = self.lock();
        if state.closed {
            return Err(RoomError::RoomClosed);
        }

        let (player_id, role, reconnected) = if request.spectator {
            self.join_spectator(&mut state, &request, outbox)?
        } else {
            self.join_seat(&mut state, &request, outbox)?
        };

        Ok(Joined {
            player_id,
            role,
            reconnected,
            broadcast: state.broadcast(&self.code),
        })
    }

    fn join_seat(
        &self,
        state: &mut RoomState,
        request: &JoinRequest,
        outbox: Outbox,
    ) -> Result<(String, Role, bool), RoomError> {
        if let Some(player_id) = request.player_id.as_deref().filter(|id| !id.is_empty()) {
            if let Some(player) = state.seat_mut(player_id) {
                if player.is_connected() {
                    return Err(RoomError::AlreadyConnected);
                }
                reattach(player, outbox, request);
                info!("Player {} reconnected to room {} as {:?}", player.id, self.code, player.role);
                return Ok((player.id.clone(), player.role, true));
            }
        }

        if state.player_o.is_some() {
            return Err(RoomError::RoomFull);
        }

        let name = sanitize_name(request.name.as_deref().unwrap_or_default(), DEFAULT_NAME_O);
        let player = Player::new(random_player_id(), name, Role::PlayerO, request.user_id, outbox);
        let player_id = player.id.clone();
        info!("Player {} joined room {} as O", player_id, self.code);
        state.player_o = Some(player);
        Ok((player_id, Role::PlayerO, false))
    }

    fn join_spectator(
        &self,
        state: &mut RoomState,
        request: &JoinRequest,
        outbox: Outbox,
    ) -> Result<(String, Role, bool), RoomError> {
        if let Some(spectator_id) = request.player_id.as_deref().filter(|id| !id.is_empty()) {
            if let Some(spectator) = state.spectators.get_mut(spectator_id) {
                if spectator.is_connected() {
                    return Err(RoomError::SpectatorAlreadyConnected);
                }
                reattach(spectator, outbox, request);
                return Ok((spectator.id.clone(), Role::Spectator, true));
            }
        }

        let name = sanitize_name(
            request.name.as_deref().unwrap_or_default(),
            DEFAULT_NAME_SPECTATOR,
        );
        let spectator = Player::new(random_player_id(), name, Role::Spectator, request.user_id, outbox);
        let spectator_id = spectator.id.clone();
        debug!("Spectator {} joined room {}", spectator_id, self.code);
        state.spectators.insert(spectator_id.clone(), spectator);
        Ok((spectator_id, Role::Spectator, false))
    }

    /// Places the mover's symbol on `cell`.
    ///
    /// Checks run in a fixed order and any failure leaves the room untouched.
    pub fn apply_move(&self, player_id: &str, cell: i64) -> Result<MoveApplied, RoomError> {
        let mut state = self.lock();
        if state.closed {
            return Err(RoomError::RoomClosed);
        }
        let index = GameState::cell_index(cell)?;
        let player = state.seat(player_id).ok_or(RoomError::PlayerNotFound)?;
        if !player.is_connected() {
            return Err(RoomError::PlayerDisconnected);
        }
        let symbol = player.symbol().ok_or(RoomError::PlayerNotFound)?;
        if !state.both_seats_connected() {
            return Err(RoomError::WaitingForOpponent);
        }

        let outcome = state.game.apply_move(symbol, index)?;
        let record = if state.game.mark_recorded() {
            Some(state.game_record(&self.code, SystemTime::now()))
        } else {
            None
        };

        Ok(MoveApplied {
            outcome,
            broadcast: state.broadcast(&self.code),
            record,
        })
    }

    /// Starts the next game once the current one is decided.
    pub fn rematch(&self, player_id: &str) -> Result<Broadcast, RoomError> {
        let mut state = self.lock();
        if state.closed {
            return Err(RoomError::RoomClosed);
        }
        if state.seat(player_id).is_none() {
            return Err(RoomError::PlayerNotFound);
        }
        if !state.both_seats_connected() {
            return Err(RoomError::WaitingForOpponent);
        }
        if !state.game.is_finished() {
            return Err(RoomError::GameNotFinished);
        }

        state.game.reset_for_rematch();
        info!(
            "Room {} rematch, {} starts",
            self.code,
            state.game.starting_symbol.as_str()
        );
        Ok(state.broadcast(&self.code))
    }

    /// Detaches `player_id` if it is still bound to connection `conn_id`.
    ///
    /// Spectators are removed outright. A seat gets a disconnect timer from
    /// `arm_timer` unless the other seat is dark too, in which case the room
    /// closes with `both_left` under the same lock.
    pub fn disconnect<F>(&self, player_id: &str, conn_id: ConnectionId, arm_timer: F) -> Departure
    where
        F: FnOnce(u64) -> AbortHandle,
    {
        let mut state = self.lock();
        if state.closed {
            return Departure::Ignored;
        }

        if let Some(spectator) = state.spectators.get(player_id) {
            if !spectator.is_attached_to(conn_id) {
                return Departure::Ignored;
            }
            state.spectators.remove(player_id);
            debug!("Spectator {} left room {}", player_id, self.code);
            return Departure::SpectatorLeft(state.broadcast(&self.code));
        }

        match state.seat_mut(player_id) {
            Some(player) if player.is_attached_to(conn_id) => {
                player.detach();
            }
            _ => return Departure::Ignored,
        }

        if !RoomState::seat_connected(&state.player_x) && !RoomState::seat_connected(&state.player_o) {
            return Departure::Closed {
                reason: CloseReason::BothLeft,
                recipients: state.close(),
            };
        }

        if let Some(player) = state.seat_mut(player_id) {
            if !player.has_disconnect_timer() {
                player.arm_disconnect_timer(arm_timer);
                info!("Player {} left room {}, disconnect timer armed", player_id, self.code);
            }
        }

        Departure::SeatLeft {
            player_id: player_id.to_string(),
            broadcast: state.broadcast(&self.code),
        }
    }

    /// Closes the room. Returns the outboxes that were still attached, or
    /// `None` if the room was already closed.
    pub fn close(&self) -> Option<Vec<Outbox>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        Some(state.close())
    }

    /// Fired by a disconnect timer: closes the room only if `player_id` is
    /// still away and `generation` is the timer that is still pending.
    /// A timer that was superseded by a reconnect, even one followed by a
    /// fresh disconnect, is a no-op.
    pub fn close_if_still_away(&self, player_id: &str, generation: u64) -> Option<Vec<Outbox>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        match state.seat(player_id) {
            Some(player) if !player.is_connected() && player.timer_pending(generation) => {
                Some(state.close())
            }
            _ => None,
        }
    }
}
