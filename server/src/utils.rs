use rand::Rng;
use shared::ROOM_CODE_LENGTH;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_NAME_CHARS: usize = 20;

// Get current timestamp in seconds
pub fn unix_timestamp(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

// Generate a room code of uppercase ASCII letters
pub fn random_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LENGTH)
        .map(|_| rng.gen_range(b'A'..=b'Z') as char)
        .collect()
}

// Generate an opaque participant id (16 hex chars)
pub fn random_player_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Trims a display name and caps it at 20 characters, falling back when empty.
pub fn sanitize_name(name: &str, fallback: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return fallback.to_string();
    }
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_code_format() {
        for _ in 0..100 {
            let code = random_room_code();
            assert_eq!(code.len(), ROOM_CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_player_ids_are_distinct() {
        let a = random_player_id();
        let b = random_player_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Ann  ", "Player X"), "Ann");
        assert_eq!(sanitize_name("   ", "Player X"), "Player X");
        assert_eq!(sanitize_name("abcdefghijklmnopqrstuvwxyz", "x"), "abcdefghijklmnopqrst");
        // Counts characters, not bytes
        assert_eq!(sanitize_name("ééééééééééééééééééééé", "x").chars().count(), 20);
    }

    #[test]
    fn test_normalize_room_code() {
        assert_eq!(normalize_room_code(" abcDEF "), "ABCDEF");
    }

    #[test]
    fn test_unix_timestamp() {
        assert_eq!(unix_timestamp(UNIX_EPOCH + Duration::from_secs(42)), 42);
        assert_eq!(unix_timestamp(UNIX_EPOCH), 0);
    }
}
