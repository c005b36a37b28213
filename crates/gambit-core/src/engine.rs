//! Rules engine backed by shakmaty.
//!
//! Candidate moves are matched against shakmaty's legal move list by
//! origin, destination and promotion piece. Castling is addressed by the
//! king's destination square (e1g1, e8c8), which is how a player drags the
//! king; the rook hop is reported back in [`ChessMove::castle_rook`].

use crate::piece::{PieceKind, Side};
use crate::position::Position;
use crate::rules::{ChessMove, GameOutcome, RulesEngine, RulesError};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position as _, Role, Square};

/// Standard chess rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyRules;

impl ShakmatyRules {
    pub fn new() -> Self {
        Self
    }

    fn find_move(
        &self,
        board: &Chess,
        from: Position,
        to: Position,
        promotion: Option<PieceKind>,
    ) -> Option<Move> {
        let from_sq = to_square(from);
        let to_sq = to_square(to);
        let turn = board.turn();
        let wanted = Role::from(promotion.unwrap_or(PieceKind::Queen));

        board
            .legal_moves()
            .iter()
            .find(|m| {
                m.from() == Some(from_sq)
                    && destination(m, turn) == to_sq
                    && m.promotion().map_or(true, |role| role == wanted)
            })
            .cloned()
    }

    fn describe(&self, m: &Move, turn: Color, from: Position, to: Position) -> Option<ChessMove> {
        let capture = match m {
            Move::EnPassant { .. } => Some(Position::new(to.file(), from.rank()).ok()?),
            _ if m.is_capture() => Some(to),
            _ => None,
        };

        let castle_rook = match m {
            Move::Castle { rook, .. } => {
                let side = m.castling_side()?;
                Some((from_square(*rook)?, from_square(side.rook_to(turn))?))
            }
            _ => None,
        };

        Some(ChessMove {
            from,
            to,
            kind: m.role().into(),
            capture,
            promotion: m.promotion().map(PieceKind::from),
            castle_rook,
        })
    }
}

impl RulesEngine for ShakmatyRules {
    type Board = Chess;

    fn initial_board(&self) -> Chess {
        Chess::default()
    }

    fn side_to_move(&self, board: &Chess) -> Side {
        board.turn().into()
    }

    fn piece_at(&self, board: &Chess, at: Position) -> Option<(Side, PieceKind)> {
        board
            .board()
            .piece_at(to_square(at))
            .map(|piece| (piece.color.into(), piece.role.into()))
    }

    fn try_get_legal_move(
        &self,
        board: &Chess,
        from: Position,
        to: Position,
        promotion: Option<PieceKind>,
    ) -> Option<ChessMove> {
        let m = self.find_move(board, from, to, promotion)?;
        self.describe(&m, board.turn(), from, to)
    }

    fn apply(&self, board: &Chess, mv: &ChessMove) -> Result<Chess, RulesError> {
        let m = self
            .find_move(board, mv.from, mv.to, mv.promotion)
            .ok_or_else(|| RulesError::MoveRejected {
                from: mv.from,
                to: mv.to,
                reason: "not legal in this position".to_string(),
            })?;

        board
            .clone()
            .play(&m)
            .map_err(|_| RulesError::MoveRejected {
                from: mv.from,
                to: mv.to,
                reason: "position rejected the move".to_string(),
            })
    }

    fn is_game_over(&self, board: &Chess) -> Option<GameOutcome> {
        if board.is_checkmate() {
            // The side to move is mated
            let loser: Side = board.turn().into();
            Some(GameOutcome::Checkmate {
                winner: loser.opposite(),
            })
        } else if board.is_stalemate() {
            Some(GameOutcome::Stalemate)
        } else if board.is_insufficient_material() {
            Some(GameOutcome::InsufficientMaterial)
        } else {
            None
        }
    }

    fn encode(&self, board: &Chess) -> String {
        Fen::from_position(board.clone(), EnPassantMode::Legal).to_string()
    }

    fn decode(&self, encoded: &str) -> Result<Chess, RulesError> {
        let fen: Fen = encoded
            .parse()
            .map_err(|e| RulesError::InvalidBoard(format!("{e}")))?;
        let board: Chess = fen
            .into_position(CastlingMode::Standard)
            .map_err(|e| RulesError::InvalidBoard(format!("{e}")))?;
        Ok(board)
    }
}

/// Where the moving king lands, or the plain destination for any other move.
fn destination(m: &Move, turn: Color) -> Square {
    match m.castling_side() {
        Some(side) => side.king_to(turn),
        None => m.to(),
    }
}

fn to_square(pos: Position) -> Square {
    Square::new(u32::from(pos.index()))
}

fn from_square(sq: Square) -> Option<Position> {
    Position::from_index(sq as u8).ok()
}

impl From<Color> for Side {
    fn from(c: Color) -> Self {
        match c {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

impl From<Role> for PieceKind {
    fn from(r: Role) -> Self {
        match r {
            Role::Pawn => PieceKind::Pawn,
            Role::Knight => PieceKind::Knight,
            Role::Bishop => PieceKind::Bishop,
            Role::Rook => PieceKind::Rook,
            Role::Queen => PieceKind::Queen,
            Role::King => PieceKind::King,
        }
    }
}

impl From<PieceKind> for Role {
    fn from(k: PieceKind) -> Self {
        match k {
            PieceKind::Pawn => Role::Pawn,
            PieceKind::Knight => Role::Knight,
            PieceKind::Bishop => Role::Bishop,
            PieceKind::Rook => Role::Rook,
            PieceKind::Queen => Role::Queen,
            PieceKind::King => Role::King,
        }
    }
}
