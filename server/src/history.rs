//! Finished-game records and the store they are handed to.
//!
//! The room engine only produces `GameRecord`s; where they end up is the
//! store's business. `MemoryHistory` keeps them in process and answers the
//! per-user history and stats queries.

use crate::error::HistoryError;
use crate::game::GameState;
use crate::player::Player;
use crate::utils::unix_timestamp;
use shared::Symbol;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

/// Immutable summary of one finished game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    pub room_code: String,
    /// Unix seconds.
    pub started_at: i64,
    pub ended_at: i64,
    pub winner: Option<Symbol>,
    pub is_draw: bool,
    pub player_x_user_id: Option<i64>,
    pub player_o_user_id: Option<i64>,
    pub player_x_name: String,
    pub player_o_name: String,
}

impl GameRecord {
    pub fn new(
        room_code: &str,
        game: &GameState,
        ended_at: SystemTime,
        player_x: Option<&Player>,
        player_o: Option<&Player>,
    ) -> Self {
        Self {
            room_code: room_code.to_string(),
            started_at: unix_timestamp(game.started_at),
            ended_at: unix_timestamp(ended_at),
            winner: game.winner,
            is_draw: game.draw,
            player_x_user_id: player_x.and_then(|p| p.user_id),
            player_o_user_id: player_o.and_then(|p| p.user_id),
            player_x_name: player_x.map(|p| p.name.clone()).unwrap_or_default(),
            player_o_name: player_o.map(|p| p.name.clone()).unwrap_or_default(),
        }
    }

    /// The symbol `user_id` played, if they took part.
    pub fn symbol_of(&self, user_id: i64) -> Option<Symbol> {
        if self.player_x_user_id == Some(user_id) {
            Some(Symbol::X)
        } else if self.player_o_user_id == Some(user_id) {
            Some(Symbol::O)
        } else {
            None
        }
    }
}

/// Receives one record per finished game.
pub trait HistoryStore: Send + Sync {
    fn record(&self, record: &GameRecord) -> Result<(), HistoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Win,
    Loss,
    Draw,
}

/// One finished game from a participant's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItem {
    pub room_code: String,
    pub started_at: i64,
    pub ended_at: i64,
    pub result: GameResult,
    pub winner: Option<Symbol>,
    pub your_symbol: Symbol,
    pub opponent_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub draws: usize,
}

#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<GameRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<GameRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Most recent games first, at most `limit` of them.
    pub fn history_for(&self, user_id: i64, limit: usize) -> Vec<HistoryItem> {
        let mut items: Vec<HistoryItem> = self
            .records()
            .into_iter()
            .filter_map(|record| {
                let your_symbol = record.symbol_of(user_id)?;
                let result = if record.is_draw {
                    GameResult::Draw
                } else if record.winner == Some(your_symbol) {
                    GameResult::Win
                } else {
                    GameResult::Loss
                };
                let opponent_name = match your_symbol {
                    Symbol::X => record.player_o_name.clone(),
                    Symbol::O => record.player_x_name.clone(),
                };
                Some(HistoryItem {
                    room_code: record.room_code,
                    started_at: record.started_at,
                    ended_at: record.ended_at,
                    result,
                    winner: record.winner,
                    your_symbol,
                    opponent_name,
                })
            })
            .collect();

        // Stable sort keeps insertion order for games ending in the same second
        items.reverse();
        items.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        items.truncate(limit);
        items
    }

    pub fn stats_for(&self, user_id: i64) -> Stats {
        self.history_for(user_id, usize::MAX)
            .iter()
            .fold(Stats::default(), |mut stats, item| {
                stats.total += 1;
                match item.result {
                    GameResult::Win => stats.wins += 1,
                    GameResult::Loss => stats.losses += 1,
                    GameResult::Draw => stats.draws += 1,
                }
                stats
            })
    }
}

impl HistoryStore for MemoryHistory {
    fn record(&self, record: &GameRecord) -> Result<(), HistoryError> {
        self.records
            .lock()
            .map_err(|_| HistoryError::Unavailable("history lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}
