//! Turn bookkeeping and the side → participant binding.

use crate::ids::ParticipantId;
use crate::piece::Side;
use crate::rules::ChessMove;
use serde::{Deserialize, Serialize};

/// Whose move it is and how many moves have been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    pub side_to_move: Side,
    /// Number of applied moves. Starts at 0, +1 per applied move.
    pub move_number: u32,
    pub last_applied_move: Option<ChessMove>,
}

impl TurnState {
    pub fn new(side_to_move: Side) -> Self {
        Self {
            side_to_move,
            move_number: 0,
            last_applied_move: None,
        }
    }

    /// Record `mv` and hand the turn to the other side.
    pub fn advance(&mut self, mv: ChessMove) {
        self.side_to_move = self.side_to_move.opposite();
        self.move_number += 1;
        self.last_applied_move = Some(mv);
    }
}

impl Default for TurnState {
    fn default() -> Self {
        Self::new(Side::White)
    }
}

/// Which participant plays which side. Fixed when the match starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideBindings {
    pub white: ParticipantId,
    pub black: ParticipantId,
}

impl SideBindings {
    pub fn new(white: ParticipantId, black: ParticipantId) -> Self {
        Self { white, black }
    }

    pub fn participant(&self, side: Side) -> ParticipantId {
        match side {
            Side::White => self.white,
            Side::Black => self.black,
        }
    }

    /// The side `participant` plays, if it is bound at all.
    pub fn side_of(&self, participant: ParticipantId) -> Option<Side> {
        if participant == self.white {
            Some(Side::White)
        } else if participant == self.black {
            Some(Side::Black)
        } else {
            None
        }
    }

    pub fn is_bound(&self, participant: ParticipantId) -> bool {
        self.side_of(participant).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::PieceKind;

    #[test]
    fn test_advance_flips_side_and_counts() {
        let mut turn = TurnState::default();
        let mv = ChessMove::quiet(
            "e2".parse().unwrap(),
            "e4".parse().unwrap(),
            PieceKind::Pawn,
        );

        turn.advance(mv.clone());
        assert_eq!(turn.side_to_move, Side::Black);
        assert_eq!(turn.move_number, 1);
        assert_eq!(turn.last_applied_move, Some(mv));

        let reply = ChessMove::quiet(
            "e7".parse().unwrap(),
            "e5".parse().unwrap(),
            PieceKind::Pawn,
        );
        turn.advance(reply);
        assert_eq!(turn.side_to_move, Side::White);
        assert_eq!(turn.move_number, 2);
    }

    #[test]
    fn test_bindings_lookup() {
        let white = ParticipantId::new_v4();
        let black = ParticipantId::new_v4();
        let bindings = SideBindings::new(white, black);

        assert_eq!(bindings.participant(Side::Black), black);
        assert_eq!(bindings.side_of(white), Some(Side::White));
        assert_eq!(bindings.side_of(ParticipantId::new_v4()), None);
        assert!(bindings.is_bound(black));
    }
}
