use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use shared::{
    ClientMessage, CreateRoomPayload, JoinRoomPayload, MovePayload, RoomResponse, ServerMessage,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Peer {
    label: &'static str,
    sink: SplitSink<Socket, Message>,
    stream: SplitStream<Socket>,
}

impl Peer {
    async fn connect(label: &'static str, url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws, _) = connect_async(url).await?;
        println!("[{}] connected to {}", label, url);
        let (sink, stream) = ws.split();
        Ok(Peer {
            label,
            sink,
            stream,
        })
    }

    async fn send(&mut self, message: ClientMessage) -> Result<(), Box<dyn std::error::Error>> {
        println!("[{}] -> {:?}", self.label, message);
        self.sink.send(Message::Text(message.to_json()?)).await?;
        Ok(())
    }

    // Wait for the next server message, skipping control frames
    async fn recv(&mut self) -> Result<ServerMessage, Box<dyn std::error::Error>> {
        loop {
            let frame = timeout(Duration::from_secs(5), self.stream.next())
                .await?
                .ok_or("connection closed")??;
            if let Message::Text(text) = frame {
                let message = ServerMessage::from_json(&text)?;
                println!("[{}] <- {:?}", self.label, message);
                return Ok(message);
            }
        }
    }

    async fn recv_room(&mut self) -> Result<RoomResponse, Box<dyn std::error::Error>> {
        match self.recv().await? {
            ServerMessage::RoomCreated(response) | ServerMessage::RoomJoined(response) => Ok(response),
            other => Err(format!("expected a room response, got {:?}", other).into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/ws".to_string());

    let mut host = Peer::connect("X", &url).await?;
    let mut guest = Peer::connect("O", &url).await?;

    host.send(ClientMessage::CreateRoom(CreateRoomPayload {
        name: "Alice".to_string(),
        guest_id: Some("smoke-alice".to_string()),
    }))
    .await?;
    let created = host.recv_room().await?;
    println!("Room {} created, host is {}", created.room_code, created.player_id);

    guest
        .send(ClientMessage::JoinRoom(JoinRoomPayload {
            room_code: created.room_code.clone(),
            name: Some("Bob".to_string()),
            guest_id: Some("smoke-bob".to_string()),
            ..Default::default()
        }))
        .await?;
    let joined = guest.recv_room().await?;
    guest.recv().await?;
    host.recv().await?;

    // X takes the left column
    let script = [(true, 0), (false, 1), (true, 3), (false, 4), (true, 6)];
    for (is_host, cell) in script {
        let (mover, player_id) = if is_host {
            (&mut host, &created.player_id)
        } else {
            (&mut guest, &joined.player_id)
        };
        mover
            .send(ClientMessage::Move(MovePayload {
                room_code: created.room_code.clone(),
                player_id: player_id.clone(),
                cell,
            }))
            .await?;
        host.recv().await?;
        let state = guest.recv().await?;
        if let ServerMessage::State(state) = state {
            println!("Board: {:?} status={:?}", state.board, state.status);
        }
    }

    println!("Smoke test finished");
    Ok(())
}
