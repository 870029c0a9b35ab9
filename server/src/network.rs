//! Server network layer: accepts TCP connections and hands each one to its own task

use crate::config::ServerConfig;
use crate::connection;
use crate::dispatch::Dispatcher;
use crate::player::ConnectionId;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Listening WebSocket endpoint for the room server
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
    next_conn_id: AtomicU64,
}

impl Server {
    pub async fn new(
        config: ServerConfig,
        dispatcher: Dispatcher,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            config: Arc::new(config),
            dispatcher,
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Bound address; useful when binding to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Accept loop. Runs until the surrounding task is dropped.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Server started successfully");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Usually file descriptor exhaustion; back off instead of spinning
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                error!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            let conn_id: ConnectionId = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
            let config = Arc::clone(&self.config);
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(connection::serve(stream, peer, conn_id, config, dispatcher));
        }
    }
}
