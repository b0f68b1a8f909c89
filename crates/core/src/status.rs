//! Per-board lifecycle status.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pinmap::BoardType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoardStatus {
    /// Nothing loaded yet
    #[default]
    Idle,
    /// Program flashed, not running
    Loaded,
    Running,
    /// Was running, CPU state kept for a resume
    Stopped,
    /// The worker died; the machine was rebuilt from the program image
    Faulted,
}

impl fmt::Display for BoardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BoardStatus::Idle => "idle",
            BoardStatus::Loaded => "loaded",
            BoardStatus::Running => "running",
            BoardStatus::Stopped => "stopped",
            BoardStatus::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Status of every board the simulator has touched. Boards never seen are
/// [`BoardStatus::Idle`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardRegistry {
    entries: HashMap<BoardType, BoardStatus>,
}

impl BoardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, board: BoardType) -> BoardStatus {
        self.entries.get(&board).copied().unwrap_or_default()
    }

    pub fn mark_loaded(&mut self, board: BoardType) {
        self.set(board, BoardStatus::Loaded);
    }

    pub fn mark_running(&mut self, board: BoardType) {
        self.set(board, BoardStatus::Running);
    }

    pub fn mark_stopped(&mut self, board: BoardType) {
        self.set(board, BoardStatus::Stopped);
    }

    pub fn mark_faulted(&mut self, board: BoardType) {
        self.set(board, BoardStatus::Faulted);
    }

    pub fn reset(&mut self, board: BoardType) {
        self.entries.remove(&board);
    }

    /// Boards with a status other than idle.
    pub fn iter(&self) -> impl Iterator<Item = (BoardType, BoardStatus)> + '_ {
        self.entries.iter().map(|(b, s)| (*b, *s))
    }

    fn set(&mut self, board: BoardType, status: BoardStatus) {
        let old = self.entries.insert(board, status).unwrap_or_default();
        if old != status {
            tracing::debug!("{}: {} -> {}", board.id(), old, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_board_is_idle() {
        let reg = BoardRegistry::new();
        assert_eq!(reg.status(BoardType::ArduinoMega), BoardStatus::Idle);
    }

    #[test]
    fn test_transitions_are_per_board() {
        let mut reg = BoardRegistry::new();
        reg.mark_loaded(BoardType::ArduinoUno);
        reg.mark_running(BoardType::ArduinoUno);
        reg.mark_faulted(BoardType::ArduinoNano);
        assert_eq!(reg.status(BoardType::ArduinoUno), BoardStatus::Running);
        assert_eq!(reg.status(BoardType::ArduinoNano), BoardStatus::Faulted);
        reg.mark_stopped(BoardType::ArduinoUno);
        assert_eq!(reg.status(BoardType::ArduinoUno), BoardStatus::Stopped);
        reg.reset(BoardType::ArduinoUno);
        assert_eq!(reg.status(BoardType::ArduinoUno), BoardStatus::Idle);
        assert_eq!(reg.iter().count(), 1);
    }

    #[test]
    fn test_registry_round_trips_through_bincode() {
        let mut reg = BoardRegistry::new();
        reg.mark_loaded(BoardType::ArduinoMega);
        let bytes = bincode::serialize(&reg).unwrap();
        let back: BoardRegistry = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.status(BoardType::ArduinoMega), BoardStatus::Loaded);
    }
}
