//! Board and turn rules for a single game of tic-tac-toe.
//!
//! `GameState` knows nothing about connections or seats; the room decides who
//! may move and passes the mover's symbol in.

use crate::error::RoomError;
use shared::{Symbol, BOARD_CELLS};
use std::time::SystemTime;

const WIN_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Result of placing a mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Continue,
    Win(Symbol),
    Draw,
}

#[derive(Debug, Clone)]
pub struct GameState {
    pub board: [Option<Symbol>; BOARD_CELLS],
    pub turn: Symbol,
    /// Who opened the current game. Alternates on every rematch.
    pub starting_symbol: Symbol,
    pub winner: Option<Symbol>,
    pub draw: bool,
    pub started_at: SystemTime,
    /// Set once the finished game has been handed to the history store.
    pub recorded: bool,
}

impl GameState {
    pub fn new() -> Self {
        Self {
            board: [None; BOARD_CELLS],
            turn: Symbol::X,
            starting_symbol: Symbol::X,
            winner: None,
            draw: false,
            started_at: SystemTime::now(),
            recorded: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.winner.is_some() || self.draw
    }

    /// Validates the cell index, returning it as a board index.
    pub fn cell_index(cell: i64) -> Result<usize, RoomError> {
        usize::try_from(cell)
            .ok()
            .filter(|index| *index < BOARD_CELLS)
            .ok_or(RoomError::InvalidCell)
    }

    /// Places `symbol` on `cell` if the rules allow it. Nothing changes on error.
    pub fn apply_move(&mut self, symbol: Symbol, cell: usize) -> Result<MoveOutcome, RoomError> {
        if self.is_finished() {
            return Err(RoomError::GameFinished);
        }
        if self.turn != symbol {
            return Err(RoomError::NotYourTurn);
        }
        let slot = self.board.get_mut(cell).ok_or(RoomError::InvalidCell)?;
        if slot.is_some() {
            return Err(RoomError::CellTaken);
        }
        *slot = Some(symbol);

        if let Some(winner) = self.check_winner() {
            self.winner = Some(winner);
            Ok(MoveOutcome::Win(winner))
        } else if self.board_full() {
            self.draw = true;
            Ok(MoveOutcome::Draw)
        } else {
            self.turn = self.turn.other();
            Ok(MoveOutcome::Continue)
        }
    }

    fn check_winner(&self) -> Option<Symbol> {
        WIN_LINES.iter().find_map(|[a, b, c]| {
            let first = self.board[*a]?;
            (self.board[*b] == Some(first) && self.board[*c] == Some(first)).then_some(first)
        })
    }

    fn board_full(&self) -> bool {
        self.board.iter().all(Option::is_some)
    }

    /// Marks the outcome as recorded. Returns false if it already was.
    pub fn mark_recorded(&mut self) -> bool {
        if !self.is_finished() || self.recorded {
            return false;
        }
        self.recorded = true;
        true
    }

    /// Clears the board for the next game and hands the opening move to the other symbol.
    pub fn reset_for_rematch(&mut self) {
        self.board = [None; BOARD_CELLS];
        self.starting_symbol = self.starting_symbol.other();
        self.turn = self.starting_symbol;
        self.winner = None;
        self.draw = false;
        self.recorded = false;
        self.started_at = SystemTime::now();
    }

    pub fn board_strings(&self) -> Vec<String> {
        self.board
            .iter()
            .map(|cell| cell.map_or("", Symbol::as_str).to_string())
            .collect()
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}
