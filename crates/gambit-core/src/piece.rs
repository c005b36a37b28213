//! Sides, piece kinds and the entities that occupy the board.

use crate::ids::EntityId;
use crate::position::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two sides of the game. Exactly one of them is to move at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::White, Side::Black];

    /// The other side
    pub const fn opposite(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => write!(f, "white"),
            Side::Black => write!(f, "black"),
        }
    }
}

/// Piece type. Only the rules engine attaches meaning to it; the registry
/// and coordinator carry it around opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    /// Kinds a pawn may be promoted to
    pub const PROMOTIONS: [PieceKind; 4] = [
        PieceKind::Queen,
        PieceKind::Rook,
        PieceKind::Bishop,
        PieceKind::Knight,
    ];

    pub fn is_promotion_target(&self) -> bool {
        Self::PROMOTIONS.contains(self)
    }
}

/// A movable game piece and where it currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub side: Side,
    pub kind: PieceKind,
    pub position: Position,
}

impl Entity {
    pub fn new(id: EntityId, side: Side, kind: PieceKind, position: Position) -> Self {
        Self {
            id,
            side,
            kind,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_alternates() {
        assert_eq!(Side::White.opposite(), Side::Black);
        assert_eq!(Side::Black.opposite(), Side::White);
        assert_eq!(Side::White.opposite().opposite(), Side::White);
    }

    #[test]
    fn test_promotion_targets() {
        assert!(PieceKind::Queen.is_promotion_target());
        assert!(PieceKind::Knight.is_promotion_target());
        assert!(!PieceKind::King.is_promotion_target());
        assert!(!PieceKind::Pawn.is_promotion_target());
    }
}
