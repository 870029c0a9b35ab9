//! Lifecycle of one WebSocket connection.
//!
//! The handshake enforces the origin allow-list and exchanges an optional
//! `?ticket=` for a user id. After that the stream is split: a single writer
//! task drains the connection's outbox, while the read loop decodes frames
//! and hands them to the dispatcher. The connection ends when the peer goes
//! away, the read deadline passes, a frame is malformed, or the writer stops.

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::player::{ConnectionId, Outbox, Outgoing};
use crate::session::Session;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{decode, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Value of `name` in a raw query string.
fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then_some(value)
    })
}

fn websocket_config(config: &ServerConfig) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);
    ws_config
}

/// Runs the connection until it closes, then releases whatever it was attached to.
pub async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    conn_id: ConnectionId,
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
) {
    let mut user_id = None;
    let identity = Arc::clone(dispatcher.identity());
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let origin = request
            .headers()
            .get("origin")
            .and_then(|value| value.to_str().ok());
        if !config.origin_allowed(origin) {
            warn!("Rejected connection from {}: origin {:?} not allowed", peer, origin);
            return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
        }

        let ticket = request
            .uri()
            .query()
            .and_then(|query| query_param(query, "ticket"))
            .filter(|ticket| !ticket.is_empty());
        if let Some(ticket) = ticket {
            match identity.consume_ticket(ticket) {
                Ok(id) => user_id = Some(id),
                Err(err) => {
                    warn!("Rejected connection from {}: {}", peer, err);
                    return Err(reject(StatusCode::UNAUTHORIZED, "invalid ws ticket"));
                }
            }
        }
        Ok(response)
    };

    let ws = match accept_hdr_async_with_config(stream, callback, Some(websocket_config(&config)))
        .await
    {
        Ok(ws) => ws,
        Err(err) => {
            debug!("WebSocket handshake with {} failed: {}", peer, err);
            return;
        }
    };
    info!("Connection {} opened from {} (user {:?})", conn_id, peer, user_id);

    let (sink, source) = ws.split();
    let (outbox, receiver) = Outbox::channel(conn_id);
    let mut writer = tokio::spawn(write_loop(sink, receiver, config.write_wait, conn_id));
    let session = Session::new(conn_id, user_id);

    tokio::select! {
        _ = read_loop(source, &session, &outbox, &dispatcher, config.pong_wait) => {}
        _ = keepalive(&session, &outbox, config.ping_period) => {}
        _ = outbox.closed() => debug!("Writer for connection {} stopped", conn_id),
    }

    dispatcher.disconnect_session(&session);
    outbox.close();
    drop(outbox);
    if timeout(config.write_wait, &mut writer).await.is_err() {
        writer.abort();
    }
    info!("Connection {} from {} closed", conn_id, peer);
}

async fn read_loop(
    mut source: WsSource,
    session: &Session,
    outbox: &Outbox,
    dispatcher: &Dispatcher,
    pong_wait: Duration,
) {
    let conn_id = session.conn_id();
    loop {
        let frame = match timeout(pong_wait, source.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(err))) => {
                debug!("Read error on connection {}: {}", conn_id, err);
                return;
            }
            Ok(None) => return,
            Err(_) => {
                info!("Connection {} missed its read deadline", conn_id);
                return;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Connection {} sent a non UTF-8 frame", conn_id);
                    return;
                }
            },
            Message::Close(_) => return,
            // Any frame resets the deadline; pongs to pings are queued by the protocol layer.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        match decode(&text) {
            Ok(message) => dispatcher.handle(session, outbox, message),
            Err(err) if err.is_recoverable() => {
                debug!("Connection {}: {}", conn_id, err);
                outbox.send(ServerMessage::error(err.to_string()));
            }
            Err(err) => {
                warn!("Closing connection {}: {}", conn_id, err);
                return;
            }
        }
    }
}

/// Pings the peer while it is attached to a room.
async fn keepalive(session: &Session, outbox: &Outbox, ping_period: Duration) {
    let mut ticker = interval(ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if session.is_attached() && !outbox.ping() {
            return;
        }
    }
}

async fn write_loop(
    mut sink: WsSink,
    mut receiver: mpsc::Receiver<Outgoing>,
    write_wait: Duration,
    conn_id: ConnectionId,
) {
    while let Some(outgoing) = receiver.recv().await {
        let (frame, last) = match outgoing {
            Outgoing::Message(message) => match message.to_json() {
                Ok(json) => (Message::Text(json), false),
                Err(err) => {
                    warn!("Failed to encode message for connection {}: {}", conn_id, err);
                    continue;
                }
            },
            Outgoing::Ping => (Message::Ping(Vec::new()), false),
            Outgoing::Close => (Message::Close(None), true),
        };

        match timeout(write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!("Write error on connection {}: {}", conn_id, err);
                return;
            }
            Err(_) => {
                info!("Write to connection {} timed out", conn_id);
                return;
            }
        }
        if last {
            break;
        }
    }
    let _ = timeout(write_wait, sink.close()).await;
}
