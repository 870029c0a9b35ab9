//! Room participants and the outbound half of their transport.
//!
//! A `Player` is bound to at most one live connection at a time through an
//! `Outbox`. Each connection has exactly one writer task draining its outbox,
//! so frames for a player are never interleaved, and pushing into an outbox
//! never blocks the caller on network I/O. The outbox is bounded: a peer that
//! lets it fill up is dropped instead of buffering without limit.

use log::{debug, warn};
use shared::{Role, ServerMessage, Symbol};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::AbortHandle;

/// Frames a connection may have queued before it is considered stalled.
pub const OUTBOX_CAPACITY: usize = 256;

/// Identifies one accepted connection for the lifetime of the process.
pub type ConnectionId = u64;

/// Instructions for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Message(ServerMessage),
    Ping,
    /// Send a close frame and stop writing.
    Close,
}

/// Cloneable sending handle for one connection.
#[derive(Debug, Clone)]
pub struct Outbox {
    conn_id: ConnectionId,
    sender: mpsc::Sender<Outgoing>,
    overflow: Arc<Notify>,
}

impl Outbox {
    pub fn channel(conn_id: ConnectionId) -> (Self, mpsc::Receiver<Outgoing>) {
        Self::with_capacity(conn_id, OUTBOX_CAPACITY)
    }

    pub fn with_capacity(
        conn_id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outgoing>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let outbox = Self {
            conn_id,
            sender,
            overflow: Arc::new(Notify::new()),
        };
        (outbox, receiver)
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Queues a message. Returns false if the writer has stopped or fallen behind.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.push(Outgoing::Message(message))
    }

    pub fn ping(&self) -> bool {
        self.push(Outgoing::Ping)
    }

    pub fn close(&self) -> bool {
        self.push(Outgoing::Close)
    }

    fn push(&self, outgoing: Outgoing) -> bool {
        match self.sender.try_send(outgoing) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbox for connection {} is full, dropping connection", self.conn_id);
                self.overflow.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Dropped frame for closed connection {}", self.conn_id);
                false
            }
        }
    }

    /// Resolves when the writer task has gone away or the queue overflowed.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.sender.closed() => {}
            _ = self.overflow.notified() => {}
        }
    }
}

#[derive(Debug)]
struct DisconnectTimer {
    generation: u64,
    handle: AbortHandle,
}

/// One participant of a room: a seated player or a spectator.
#[derive(Debug)]
pub struct Player {
    /// Random id, stable across reconnects.
    pub id: String,
    pub name: String,
    pub role: Role,
    /// Durable identity handle used for history attribution.
    pub user_id: Option<i64>,
    outbox: Option<Outbox>,
    disconnect_timer: Option<DisconnectTimer>,
    timer_generation: u64,
}

impl Player {
    pub fn new(id: String, name: String, role: Role, user_id: Option<i64>, outbox: Outbox) -> Self {
        Self {
            id,
            name,
            role,
            user_id,
            outbox: Some(outbox),
            disconnect_timer: None,
            timer_generation: 0,
        }
    }

    pub fn symbol(&self) -> Option<Symbol> {
        self.role.symbol()
    }

    /// Connected iff a transport is attached.
    pub fn is_connected(&self) -> bool {
        self.outbox.is_some()
    }

    pub fn outbox(&self) -> Option<&Outbox> {
        self.outbox.as_ref()
    }

    pub fn is_attached_to(&self, conn_id: ConnectionId) -> bool {
        self.outbox
            .as_ref()
            .is_some_and(|outbox| outbox.conn_id() == conn_id)
    }

    /// Binds a new transport and cancels any pending disconnect timer.
    pub fn attach(&mut self, outbox: Outbox) {
        self.outbox = Some(outbox);
        if self.cancel_disconnect_timer() {
            debug!("Disconnect timer for {} cancelled", self.id);
        }
    }

    /// Drops the transport handle, returning it to the caller.
    pub fn detach(&mut self) -> Option<Outbox> {
        self.outbox.take()
    }

    pub fn has_disconnect_timer(&self) -> bool {
        self.disconnect_timer.is_some()
    }

    /// Whether the timer armed as `generation` is still the pending one.
    pub fn timer_pending(&self, generation: u64) -> bool {
        self.disconnect_timer
            .as_ref()
            .is_some_and(|timer| timer.generation == generation)
    }

    /// Replaces any pending timer with the one `spawn` starts for the next generation.
    pub fn arm_disconnect_timer<F>(&mut self, spawn: F) -> u64
    where
        F: FnOnce(u64) -> AbortHandle,
    {
        self.cancel_disconnect_timer();
        self.timer_generation += 1;
        let generation = self.timer_generation;
        self.disconnect_timer = Some(DisconnectTimer {
            generation,
            handle: spawn(generation),
        });
        generation
    }

    pub fn cancel_disconnect_timer(&mut self) -> bool {
        match self.disconnect_timer.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spectator(conn_id: ConnectionId) -> (Player, mpsc::Receiver<Outgoing>) {
        let (outbox, rx) = Outbox::channel(conn_id);
        let player = Player::new("s1".into(), "Sam".into(), Role::Spectator, None, outbox);
        (player, rx)
    }

    fn idle_task() -> AbortHandle {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(3600))).abort_handle()
    }

    #[test]
    fn test_connected_tracks_outbox() {
        let (mut player, _rx) = spectator(1);
        assert!(player.is_connected());
        assert!(player.is_attached_to(1));
        assert!(!player.is_attached_to(2));

        let outbox = player.detach();
        assert!(outbox.is_some());
        assert!(!player.is_connected());
        assert!(!player.is_attached_to(1));
    }

    #[test]
    fn test_outbox_delivers_in_order() {
        let (outbox, mut rx) = Outbox::channel(7);
        assert!(outbox.send(ServerMessage::error("first")));
        assert!(outbox.ping());
        assert!(outbox.close());

        assert_eq!(
            rx.try_recv().unwrap(),
            Outgoing::Message(ServerMessage::error("first"))
        );
        assert_eq!(rx.try_recv().unwrap(), Outgoing::Ping);
        assert_eq!(rx.try_recv().unwrap(), Outgoing::Close);
    }

    #[tokio::test]
    async fn test_outbox_reports_closed_writer() {
        let (outbox, rx) = Outbox::channel(3);
        drop(rx);
        assert!(!outbox.send(ServerMessage::error("lost")));
        tokio::time::timeout(Duration::from_secs(1), outbox.closed())
            .await
            .expect("closed resolves once the writer is gone");
    }

    #[tokio::test]
    async fn test_full_outbox_signals_stalled_connection() {
        let (outbox, mut rx) = Outbox::with_capacity(4, 2);
        assert!(outbox.send(ServerMessage::error("one")));
        assert!(outbox.ping());
        assert!(!outbox.send(ServerMessage::error("three")));

        // A clone held by a room observes the overflow too
        let watcher = outbox.clone();
        tokio::time::timeout(Duration::from_secs(1), watcher.closed())
            .await
            .expect("overflow ends the connection");

        // Nothing past capacity was queued
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_attach_cancels_timer() {
        let (mut player, _rx) = spectator(1);
        player.detach();

        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)));
        let generation = player.arm_disconnect_timer(|_| timer.abort_handle());
        assert!(player.has_disconnect_timer());
        assert!(player.timer_pending(generation));

        let (outbox, _rx2) = Outbox::channel(2);
        player.attach(outbox);
        assert!(!player.has_disconnect_timer());
        assert!(!player.timer_pending(generation));
        assert!(player.is_attached_to(2));
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_rearming_advances_generation() {
        let (mut player, _rx) = spectator(1);
        player.detach();

        let first = player.arm_disconnect_timer(|_| idle_task());
        let second = player.arm_disconnect_timer(|generation| {
            assert_eq!(generation, first + 1);
            idle_task()
        });
        assert!(!player.timer_pending(first));
        assert!(player.timer_pending(second));
    }
}
