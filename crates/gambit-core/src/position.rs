//! Board coordinates.
//!
//! A `Position` is a (file, rank) pair, both 1-based and in `1..=8`, so that
//! `(1, 1)` is a1 and `(8, 8)` is h8. Positions are the keys of the entity
//! registry and the unit every move intent is expressed in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of files (and ranks) on the board.
pub const BOARD_SIZE: u8 = 8;

/// Error returned when parsing or building an out-of-range position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("file {0} is outside 1..=8")]
    FileOutOfRange(u8),

    #[error("rank {0} is outside 1..=8")]
    RankOutOfRange(u8),

    #[error("malformed square name: {0:?}")]
    Malformed(String),
}

/// A square on the board, addressed by file and rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawPosition", into = "RawPosition")]
pub struct Position {
    file: u8,
    rank: u8,
}

/// Unvalidated wire form; every deserialized position goes through `Position::new`.
#[derive(Serialize, Deserialize)]
struct RawPosition {
    file: u8,
    rank: u8,
}

impl Position {
    /// Create a position, validating both coordinates.
    pub fn new(file: u8, rank: u8) -> Result<Self, PositionError> {
        if !(1..=BOARD_SIZE).contains(&file) {
            return Err(PositionError::FileOutOfRange(file));
        }
        if !(1..=BOARD_SIZE).contains(&rank) {
            return Err(PositionError::RankOutOfRange(rank));
        }
        Ok(Self { file, rank })
    }

    /// File, 1 (a) through 8 (h)
    pub const fn file(&self) -> u8 {
        self.file
    }

    /// Rank, 1 through 8
    pub const fn rank(&self) -> u8 {
        self.rank
    }

    /// Index in `0..64`, a1 = 0, b1 = 1, ..., h8 = 63.
    pub const fn index(&self) -> u8 {
        (self.rank - 1) * BOARD_SIZE + (self.file - 1)
    }

    /// Inverse of [`Position::index`].
    pub fn from_index(index: u8) -> Result<Self, PositionError> {
        Self::new(index % BOARD_SIZE + 1, index / BOARD_SIZE + 1)
    }

    /// All 64 squares in index order.
    pub fn all() -> impl Iterator<Item = Position> {
        (1..=BOARD_SIZE).flat_map(|rank| (1..=BOARD_SIZE).map(move |file| Position { file, rank }))
    }
}

impl TryFrom<RawPosition> for Position {
    type Error = PositionError;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        Position::new(raw.file, raw.rank)
    }
}

impl From<Position> for RawPosition {
    fn from(pos: Position) -> Self {
        RawPosition {
            file: pos.file,
            rank: pos.rank,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = (b'a' + self.file - 1) as char;
        write!(f, "{}{}", file, self.rank)
    }
}

impl FromStr for Position {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err(PositionError::Malformed(s.to_string()));
        }
        let file = bytes[0].to_ascii_lowercase();
        let rank = bytes[1];
        if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
            return Err(PositionError::Malformed(s.to_string()));
        }
        Position::new(file - b'a' + 1, rank - b'0')
    }
}
