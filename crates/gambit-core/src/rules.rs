//! Contract with the external legality checker.
//!
//! The synchronization layer never decides what is legal. It hands the
//! current board and a candidate (from, to) pair to a [`RulesEngine`] and
//! gets back either nothing (illegal) or a fully specified [`ChessMove`]
//! that spells out every side effect the registry has to mirror: captured
//! piece square, the rook hop of a castle, and promotion substitution.
//!
//! Implementations must be pure: `try_get_legal_move` and `apply` never
//! mutate anything the caller can observe, and calling them twice has no
//! effect beyond the cost of the computation.

use crate::piece::{PieceKind, Side};
use crate::position::Position;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A legal move with all of its side effects resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChessMove {
    pub from: Position,
    pub to: Position,
    /// Kind of the moving piece before any promotion
    pub kind: PieceKind,
    /// Square of the captured piece. Differs from `to` for en passant.
    pub capture: Option<Position>,
    /// Kind the moving piece turns into on arrival
    pub promotion: Option<PieceKind>,
    /// Rook origin and destination when the move is a castle
    pub castle_rook: Option<(Position, Position)>,
}

impl ChessMove {
    /// A plain move with no side effects.
    pub fn quiet(from: Position, to: Position, kind: PieceKind) -> Self {
        Self {
            from,
            to,
            kind,
            capture: None,
            promotion: None,
            castle_rook: None,
        }
    }

    pub fn is_capture(&self) -> bool {
        self.capture.is_some()
    }
}

/// How a finished game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOutcome {
    Checkmate { winner: Side },
    Stalemate,
    InsufficientMaterial,
    Resignation { winner: Side },
}

impl GameOutcome {
    pub fn winner(&self) -> Option<Side> {
        match self {
            GameOutcome::Checkmate { winner } | GameOutcome::Resignation { winner } => {
                Some(*winner)
            }
            GameOutcome::Stalemate | GameOutcome::InsufficientMaterial => None,
        }
    }
}

/// Errors raised by a rules engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("board encoding rejected: {0}")]
    InvalidBoard(String),

    #[error("move {from}{to} cannot be applied: {reason}")]
    MoveRejected {
        from: Position,
        to: Position,
        reason: String,
    },
}

/// Legality oracle consumed by the move coordinator.
pub trait RulesEngine {
    /// The engine's own representation of a game state.
    type Board: Clone + std::fmt::Debug;

    /// The board a new match starts from.
    fn initial_board(&self) -> Self::Board;

    fn side_to_move(&self, board: &Self::Board) -> Side;

    /// The piece standing on `at`, if any.
    fn piece_at(&self, board: &Self::Board, at: Position) -> Option<(Side, PieceKind)>;

    /// Resolve a candidate move. `promotion` selects the promotion piece when
    /// the move promotes; engines pick a default when it is `None`.
    fn try_get_legal_move(
        &self,
        board: &Self::Board,
        from: Position,
        to: Position,
        promotion: Option<PieceKind>,
    ) -> Option<ChessMove>;

    /// Compute the state after `mv`. Must not mutate `board`.
    fn apply(&self, board: &Self::Board, mv: &ChessMove) -> Result<Self::Board, RulesError>;

    /// `Some` once the game is decided by the position itself.
    fn is_game_over(&self, board: &Self::Board) -> Option<GameOutcome>;

    /// Serialize a board for snapshots.
    fn encode(&self, board: &Self::Board) -> String;

    fn decode(&self, encoded: &str) -> Result<Self::Board, RulesError>;
}
