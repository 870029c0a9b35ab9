use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::dispatch::Dispatcher;
use server::history::MemoryHistory;
use server::identity::GuestDirectory;
use server::network::Server;
use server::registry::Registry;
use shared::CloseReason;
use std::sync::Arc;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, wires the room engine together and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Seconds a disconnected player has to come back before the room closes
        #[clap(long, default_value = "60")]
        disconnect_timeout_secs: u64,
        /// Seconds between keepalive pings
        #[clap(long, default_value = "50")]
        ping_period_secs: u64,
        /// Seconds without any inbound frame before a connection is dropped
        #[clap(long, default_value = "60")]
        pong_wait_secs: u64,
        /// Largest inbound message in bytes
        #[clap(long, default_value = "4096")]
        max_message_size: usize,
        /// Comma separated list of allowed origins; empty allows all
        #[clap(long, default_value = "")]
        allowed_origins: String,
    }

    if std::env::var("RUST_LOG").is_err() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        info!("Use RUST_LOG=debug for detailed logs");
    } else {
        env_logger::init();
    }

    let args = Args::parse();
    if args.ping_period_secs >= args.pong_wait_secs {
        return Err("ping period must be shorter than pong wait".into());
    }

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_message_size: args.max_message_size,
        pong_wait: Duration::from_secs(args.pong_wait_secs),
        ping_period: Duration::from_secs(args.ping_period_secs),
        disconnect_timeout: Duration::from_secs(args.disconnect_timeout_secs),
        ..ServerConfig::default()
    }
    .with_allowed_origins(&args.allowed_origins);

    info!("Starting tic-tac-toe room server with {:?}", config);
    let dispatcher = Dispatcher::new(
        Arc::new(Registry::new()),
        Arc::new(GuestDirectory::new()),
        Arc::new(MemoryHistory::new()),
        config.disconnect_timeout,
    );
    let server = Server::new(config, dispatcher.clone()).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    dispatcher.close_all(CloseReason::Timeout);
    // Give writer tasks a moment to flush the close notices
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}
