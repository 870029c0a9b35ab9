//! Process-wide mapping from room code to room.
//!
//! The registry lock only guards the map itself and is never held while a
//! room operation runs; callers get an `Arc<Room>` and drop the lock first.

use crate::player::Player;
use crate::room::Room;
use crate::utils::{normalize_room_code, random_room_code};
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct Registry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh code and registers a room with `host` seated as X.
    ///
    /// Collision check and insert happen under one write lock, so two
    /// concurrent creates can never end up with the same code.
    pub fn create(&self, host: Player) -> Arc<Room> {
        self.create_with(host, random_room_code)
    }

    fn create_with<F>(&self, host: Player, mut next_code: F) -> Arc<Room>
    where
        F: FnMut() -> String,
    {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let code = loop {
            let code = next_code();
            if !rooms.contains_key(&code) {
                break code;
            }
        };
        let room = Arc::new(Room::new(code.clone(), host));
        rooms.insert(code.clone(), Arc::clone(&room));
        info!("Room {} created ({} live)", code, rooms.len());
        room
    }

    /// Case-insensitive lookup.
    pub fn lookup(&self, code: &str) -> Option<Arc<Room>> {
        let code = normalize_room_code(code);
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&code)
            .cloned()
    }

    /// Idempotent. Returns true if the code was present.
    pub fn remove(&self, code: &str) -> bool {
        let code = normalize_room_code(code);
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let removed = rooms.remove(&code).is_some();
        if removed {
            info!("Room {} removed ({} live)", code, rooms.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn codes(&self) -> Vec<String> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Outbox;
    use shared::{Role, ROOM_CODE_LENGTH};
    use std::collections::HashSet;

    fn host() -> Player {
        let (outbox, _rx) = Outbox::channel(1);
        Player::new("p1".into(), "Ann".into(), Role::PlayerX, None, outbox)
    }

    #[test]
    fn test_create_and_lookup() {
        let registry = Registry::new();
        assert!(registry.is_empty());

        let room = registry.create(host());
        assert_eq!(room.code().len(), ROOM_CODE_LENGTH);
        assert_eq!(registry.len(), 1);

        let found = registry.lookup(&room.code().to_lowercase()).expect("case-insensitive");
        assert!(Arc::ptr_eq(&found, &room));
        assert!(registry.lookup("ZZZZZZ1").is_none());
    }

    #[test]
    fn test_create_retries_on_collision() {
        let registry = Registry::new();
        let mut codes = vec!["AAAAAA", "AAAAAA", "BBBBBB"].into_iter();
        let first = registry.create_with(host(), || "AAAAAA".to_string());
        let second = registry.create_with(host(), || codes.next().unwrap().to_string());

        assert_eq!(first.code(), "AAAAAA");
        assert_eq!(second.code(), "BBBBBB");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = Registry::new();
        let room = registry.create(host());
        assert!(registry.remove(room.code()));
        assert!(!registry.remove(room.code()));
        assert!(registry.lookup(room.code()).is_none());
    }

    #[test]
    fn test_concurrent_creates_get_unique_codes() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| registry.create(host()).code().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for code in handle.join().unwrap() {
                assert!(seen.insert(code), "duplicate room code");
            }
        }
        assert_eq!(registry.len(), 400);
        assert_eq!(registry.codes().len(), 400);
    }
}
