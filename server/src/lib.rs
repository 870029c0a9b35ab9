//! # Tic-Tac-Toe Room Server Library
//!
//! This library provides the authoritative server for real-time multiplayer
//! tic-tac-toe. Clients connect over WebSocket, create or join rooms by a
//! short code, and receive the full room state after every change.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Rooms
//! Each room owns its board, turn, status and participants. Every move,
//! join, rematch and disconnect is validated and applied on the server; the
//! resulting state is broadcast to all connected participants of the room.
//!
//! ### Connection Lifecycle
//! Handles the complete lifecycle of a participant connection:
//! - Handshake with origin checks and optional ticket authentication
//! - Decoding of JSON envelopes and error reporting to the sender
//! - Keepalive pings and a rolling read deadline
//! - Disconnect handling with a grace period for reconnection
//!
//! ### Game Records
//! When a game is decided, one record is handed to the history store with
//! the participants' user ids, names, outcome and timestamps.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! Every accepted connection runs in its own task with a dedicated writer
//! task behind a bounded outbox. A peer that stops draining its outbox is
//! dropped once the queue fills. Rooms are guarded by a short mutex that
//! is never held across an await; fan-out happens after the lock is dropped.
//!
//! ### Disconnect Timers
//! A seat that goes dark gets a timer. If the seat is still dark when the
//! timer fires the room closes with reason `timeout`. Each timer carries a
//! generation so one superseded by a reconnect never closes the room. If both seats go dark
//! the room closes immediately with reason `both_left`.
//!
//! ## Module Organization
//!
//! - `config`: runtime settings and the origin allow-list
//! - `connection`: handshake, read loop, keepalive and writer task
//! - `dispatch`: routes client messages to rooms and fans results out
//! - `error`: error types and their client facing messages
//! - `game`: board, turn and win/draw detection
//! - `history`: game records and the in-memory history store
//! - `identity`: guest identities and WebSocket tickets
//! - `network`: TCP accept loop
//! - `player`: participants and their outboxes
//! - `registry`: room code to room mapping
//! - `room`: the per-room state machine
//! - `session`: per-connection binding to a room and player
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::dispatch::Dispatcher;
//! use server::history::MemoryHistory;
//! use server::identity::GuestDirectory;
//! use server::network::Server;
//! use server::registry::Registry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let dispatcher = Dispatcher::new(
//!         Arc::new(Registry::new()),
//!         Arc::new(GuestDirectory::new()),
//!         Arc::new(MemoryHistory::new()),
//!         config.disconnect_timeout,
//!     );
//!
//!     let server = Server::new(config, dispatcher).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod game;
pub mod history;
pub mod identity;
pub mod network;
pub mod player;
pub mod registry;
pub mod room;
pub mod session;
pub mod utils;
