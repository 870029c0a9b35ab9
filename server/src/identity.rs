//! Resolution of connections to durable user ids.
//!
//! The room engine treats user ids as opaque handles for history attribution.
//! `GuestDirectory` is the in-process provider: it mints ids for guest
//! identifiers sent by clients and hands out one-shot WebSocket tickets.

use crate::error::IdentityError;
use log::debug;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const TICKET_TTL: Duration = Duration::from_secs(30);
const MAX_GUEST_ID_LEN: usize = 64;
const DEFAULT_GUEST_NAME: &str = "Guest";

pub trait IdentityProvider: Send + Sync {
    /// Exchanges a WebSocket ticket for a user id. Tickets work once.
    fn consume_ticket(&self, ticket: &str) -> Result<i64, IdentityError>;

    /// Picks the identity for a create/join request.
    ///
    /// An authenticated session wins; otherwise a valid guest id maps to a
    /// guest user; otherwise the participant stays anonymous.
    fn resolve(
        &self,
        session_user: Option<i64>,
        guest_id: Option<&str>,
        name: &str,
    ) -> Result<Option<i64>, IdentityError>;
}

/// Trims a client supplied guest id and rejects anything outside `[A-Za-z0-9_:-]{1,64}`.
pub fn normalize_guest_id(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= MAX_GUEST_ID_LEN
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'));
    valid.then_some(trimmed)
}

#[derive(Debug)]
struct GuestUser {
    user_id: i64,
    name: String,
}

#[derive(Debug)]
struct Ticket {
    user_id: i64,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct GuestDirectory {
    guests: Mutex<HashMap<String, GuestUser>>,
    tickets: Mutex<HashMap<String, Ticket>>,
    next_user_id: AtomicI64,
    ticket_ttl: Duration,
}

impl Default for GuestDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GuestDirectory {
    pub fn new() -> Self {
        Self::with_ticket_ttl(TICKET_TTL)
    }

    pub fn with_ticket_ttl(ticket_ttl: Duration) -> Self {
        Self {
            guests: Mutex::new(HashMap::new()),
            tickets: Mutex::new(HashMap::new()),
            next_user_id: AtomicI64::new(1),
            ticket_ttl,
        }
    }

    /// Issues a one-shot ticket a client can pass as `?ticket=` when connecting.
    pub fn issue_ticket(&self, user_id: i64) -> Result<String, IdentityError> {
        if user_id == 0 {
            return Err(IdentityError::MissingUser);
        }
        let ticket: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        let mut tickets = locked(&self.tickets);
        let now = Instant::now();
        tickets.retain(|_, t| t.expires_at > now);
        tickets.insert(
            ticket.clone(),
            Ticket {
                user_id,
                expires_at: now + self.ticket_ttl,
            },
        );
        Ok(ticket)
    }

    fn ensure_guest(&self, guest_id: &str, name: &str) -> i64 {
        let name = if name.is_empty() { DEFAULT_GUEST_NAME } else { name };
        let mut guests = locked(&self.guests);
        let guest = guests.entry(guest_id.to_string()).or_insert_with(|| {
            let user_id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
            debug!("Minted guest user {} for {}", user_id, guest_id);
            GuestUser {
                user_id,
                name: name.to_string(),
            }
        });
        guest.name = name.to_string();
        guest.user_id
    }
}

impl IdentityProvider for GuestDirectory {
    fn consume_ticket(&self, ticket: &str) -> Result<i64, IdentityError> {
        let ticket = ticket.trim();
        if ticket.is_empty() {
            return Err(IdentityError::InvalidTicket);
        }
        let entry = locked(&self.tickets)
            .remove(ticket)
            .ok_or(IdentityError::InvalidTicket)?;
        if entry.expires_at <= Instant::now() {
            return Err(IdentityError::TicketExpired);
        }
        Ok(entry.user_id)
    }

    fn resolve(
        &self,
        session_user: Option<i64>,
        guest_id: Option<&str>,
        name: &str,
    ) -> Result<Option<i64>, IdentityError> {
        if let Some(user_id) = session_user.filter(|id| *id != 0) {
            return Ok(Some(user_id));
        }
        Ok(guest_id
            .and_then(normalize_guest_id)
            .map(|guest_id| self.ensure_guest(guest_id, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Display name last seen for a guest user.
    fn guest_name(directory: &GuestDirectory, user_id: i64) -> Option<String> {
        locked(&directory.guests)
            .values()
            .find(|guest| guest.user_id == user_id)
            .map(|guest| guest.name.clone())
    }

    #[test]
    fn test_normalize_guest_id() {
        assert_eq!(normalize_guest_id("  guest:abc-1_2 "), Some("guest:abc-1_2"));
        assert_eq!(normalize_guest_id(""), None);
        assert_eq!(normalize_guest_id("has space"), None);
        assert_eq!(normalize_guest_id("drop;table"), None);
        assert_eq!(normalize_guest_id(&"a".repeat(65)), None);
        assert!(normalize_guest_id(&"a".repeat(64)).is_some());
    }

    #[test]
    fn test_session_user_wins() {
        let directory = GuestDirectory::new();
        assert_eq!(directory.resolve(Some(77), Some("guest-1"), "Ann"), Ok(Some(77)));
    }

    #[test]
    fn test_guest_ids_are_stable() {
        let directory = GuestDirectory::new();
        let first = directory.resolve(None, Some("guest-1"), "Ann").unwrap();
        let again = directory.resolve(None, Some(" guest-1 "), "Annie").unwrap();
        let other = directory.resolve(None, Some("guest-2"), "").unwrap();

        assert!(first.is_some());
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(guest_name(&directory, first.unwrap()).as_deref(), Some("Annie"));
        assert_eq!(guest_name(&directory, other.unwrap()).as_deref(), Some("Guest"));
    }

    #[test]
    fn test_anonymous_without_guest_id() {
        let directory = GuestDirectory::new();
        assert_eq!(directory.resolve(None, None, "Ann"), Ok(None));
        assert_eq!(directory.resolve(None, Some("bad id!"), "Ann"), Ok(None));
    }

    #[test]
    fn test_ticket_is_one_shot() {
        let directory = GuestDirectory::new();
        let ticket = directory.issue_ticket(5).unwrap();
        assert_eq!(directory.consume_ticket(&ticket), Ok(5));
        assert_eq!(directory.consume_ticket(&ticket), Err(IdentityError::InvalidTicket));
        assert_eq!(directory.consume_ticket(""), Err(IdentityError::InvalidTicket));
        assert_eq!(directory.issue_ticket(0), Err(IdentityError::MissingUser));
    }

    #[test]
    fn test_ticket_expires() {
        let directory = GuestDirectory::with_ticket_ttl(Duration::ZERO);
        let ticket = directory.issue_ticket(5).unwrap();
        assert_eq!(directory.consume_ticket(&ticket), Err(IdentityError::TicketExpired));
    }
}
