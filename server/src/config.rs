use std::time::Duration;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024;
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(50);
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runtime settings for the room server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Largest inbound WebSocket message accepted.
    pub max_message_size: usize,
    /// Rolling read deadline, reset by any inbound frame.
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_wait: Duration,
    /// How long a seat may stay dark before its room is closed.
    pub disconnect_timeout: Duration,
    /// Lowercased origins or hosts; empty allows every origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PING_PERIOD,
            write_wait: DEFAULT_WRITE_WAIT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Parses a comma separated allow-list. Full origins also allow their host.
    pub fn with_allowed_origins(mut self, raw: &str) -> Self {
        let mut origins = Vec::new();
        for entry in raw.split(',') {
            let entry = entry.trim().to_ascii_lowercase();
            if entry.is_empty() {
                continue;
            }
            if let Some(host) = origin_host(&entry) {
                origins.push(host.to_string());
            }
            origins.push(entry);
        }
        origins.dedup();
        self.allowed_origins = origins;
        self
    }

    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        // Non-browser clients don't send an Origin header.
        let origin = match origin.map(str::trim) {
            None | Some("") => return true,
            Some(origin) => origin.to_ascii_lowercase(),
        };
        if self.allowed_origins.iter().any(|allowed| *allowed == origin) {
            return true;
        }
        match origin_host(&origin) {
            Some(host) => self.allowed_origins.iter().any(|allowed| allowed == host),
            None => false,
        }
    }
}

fn origin_host(origin: &str) -> Option<&str> {
    let (_, rest) = origin.split_once("://")?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}
