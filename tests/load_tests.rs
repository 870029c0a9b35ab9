//! Load tests for the room engine and the networked server

use futures_util::{SinkExt, StreamExt};
use server::config::ServerConfig;
use server::dispatch::Dispatcher;
use server::error::RoomError;
use server::history::{HistoryStore, MemoryHistory};
use server::identity::GuestDirectory;
use server::network::Server;
use server::player::{Outbox, Player};
use server::registry::Registry;
use server::room::{JoinRequest, Room};
use shared::{
    ClientMessage, CreateRoomPayload, JoinRoomPayload, MovePayload, Role, ServerMessage, Status,
};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Builds a room with both seats filled, returning it with the two player ids.
fn seated_room(registry: &Registry, conn_base: u64) -> (Arc<Room>, String, String) {
    let (host_outbox, _) = Outbox::channel(conn_base);
    let host = Player::new(
        format!("x-{}", conn_base),
        "Host".to_string(),
        Role::PlayerX,
        Some(conn_base as i64),
        host_outbox,
    );
    let room = registry.create(host);
    let (guest_outbox, _) = Outbox::channel(conn_base + 1);
    let joined = room
        .join(
            JoinRequest {
                name: Some("Guest".to_string()),
                user_id: Some(conn_base as i64 + 1),
                ..Default::default()
            },
            guest_outbox,
        )
        .unwrap();
    (room, format!("x-{}", conn_base), joined.player_id)
}

/// Plays many rooms to completion in parallel
#[test]
fn parallel_rooms_are_independent() {
    let registry = Arc::new(Registry::new());
    let history = Arc::new(MemoryHistory::new());
    let rooms = 200;

    let start = Instant::now();
    let handles: Vec<_> = (0..rooms)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let history = Arc::clone(&history);
            std::thread::spawn(move || {
                let (room, px, po) = seated_room(&registry, i * 2);
                for (player, cell) in [(&px, 0), (&po, 1), (&px, 3), (&po, 4), (&px, 6)] {
                    let applied = room.apply_move(player, cell).unwrap();
                    if let Some(record) = applied.record {
                        history.record(&record).unwrap();
                    }
                }
                room.snapshot()
            })
        })
        .collect();

    for handle in handles {
        let state = handle.join().unwrap();
        assert_eq!(state.status, Status::Win);
        assert_eq!(state.winner, "X");
    }
    let duration = start.elapsed();
    println!("{} rooms played to completion in {:?}", rooms, duration);

    assert_eq!(registry.len(), rooms as usize);
    assert_eq!(history.len(), rooms as usize);
    // Every record belongs to its own room
    let mut codes: Vec<_> = history.records().into_iter().map(|r| r.room_code).collect();
    codes.sort();
    codes.dedup();
    assert_eq!(codes.len(), rooms as usize);
}

/// Races the same player's move from many threads; exactly one may land
#[test]
fn concurrent_moves_apply_exactly_once() {
    let registry = Registry::new();
    let (room, px, _po) = seated_room(&registry, 1);
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let results: Vec<Result<(), RoomError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                let room = Arc::clone(&room);
                let px = px.clone();
                scope.spawn(move || {
                    barrier.wait();
                    room.apply_move(&px, i as i64).map(|_| ())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let applied = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(applied, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|err| *err == RoomError::NotYourTurn));

    let state = room.snapshot();
    assert_eq!(state.board.iter().filter(|cell| *cell == "X").count(), 1);
    assert_eq!(state.turn, shared::Symbol::O);
}

/// Runs several full games over real WebSocket connections at once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_networked_games() {
    let history = Arc::new(MemoryHistory::new());
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    let dispatcher = Dispatcher::new(
        Arc::new(Registry::new()),
        Arc::new(GuestDirectory::new()),
        history.clone(),
        config.disconnect_timeout,
    );
    let server = Server::new(config, dispatcher.clone()).await.unwrap();
    let url = format!("ws://{}/ws", server.local_addr().unwrap());
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let games = 20;
    let start = Instant::now();
    let handles: Vec<_> = (0..games)
        .map(|_| {
            let url = url.clone();
            tokio::spawn(async move { play_networked_game(&url).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Status::Win);
    }
    println!("{} networked games finished in {:?}", games, start.elapsed());

    assert_eq!(history.len(), games);
}

async fn play_networked_game(url: &str) -> Status {
    let (x, _) = connect_async(url).await.unwrap();
    let (o, _) = connect_async(url).await.unwrap();
    let (mut x_tx, mut x_rx) = x.split();
    let (mut o_tx, mut o_rx) = o.split();

    async fn next<S>(rx: &mut S) -> ServerMessage
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(10), rx.next())
                .await
                .expect("Timed out")
                .expect("Stream ended")
                .expect("Read error");
            if let Message::Text(text) = frame {
                return ServerMessage::from_json(&text).unwrap();
            }
        }
    }

    let create = ClientMessage::CreateRoom(CreateRoomPayload::default());
    x_tx.send(Message::Text(create.to_json().unwrap())).await.unwrap();
    let (code, px) = match next(&mut x_rx).await {
        ServerMessage::RoomCreated(r) => (r.room_code, r.player_id),
        other => panic!("Unexpected: {:?}", other),
    };

    let join = ClientMessage::JoinRoom(JoinRoomPayload {
        room_code: code.clone(),
        ..Default::default()
    });
    o_tx.send(Message::Text(join.to_json().unwrap())).await.unwrap();
    let po = match next(&mut o_rx).await {
        ServerMessage::RoomJoined(r) => r.player_id,
        other => panic!("Unexpected: {:?}", other),
    };
    next(&mut o_rx).await;
    next(&mut x_rx).await;

    let mut status = Status::InProgress;
    for (is_x, cell) in [(true, 0), (false, 1), (true, 3), (false, 4), (true, 6)] {
        let message = ClientMessage::Move(MovePayload {
            room_code: code.clone(),
            player_id: if is_x { px.clone() } else { po.clone() },
            cell,
        });
        let frame = Message::Text(message.to_json().unwrap());
        if is_x {
            x_tx.send(frame).await.unwrap();
        } else {
            o_tx.send(frame).await.unwrap();
        }
        next(&mut o_rx).await;
        if let ServerMessage::State(state) = next(&mut x_rx).await {
            status = state.status;
        }
    }
    status
}
