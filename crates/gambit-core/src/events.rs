//! Messages crossing the authoritative boundary.
//!
//! Inbound intents (`MoveIntent`, `GrantRequest`) are what participants ask
//! for; outbound `MatchEvent`s are the only way replicas learn about state
//! changes.

use crate::ids::{EntityId, ParticipantId};
use crate::ownership::{GrantDenied, GrantOutcome};
use crate::piece::{Entity, PieceKind, Side};
use crate::position::Position;
use crate::rules::{ChessMove, GameOutcome};
use crate::snapshot::Snapshot;
use crate::turn::TurnState;
use serde::{Deserialize, Serialize};

/// A participant's proposed move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub participant_id: ParticipantId,
    pub from: Position,
    pub to: Position,
    pub promotion: Option<PieceKind>,
}

impl MoveIntent {
    pub fn new(participant_id: ParticipantId, from: Position, to: Position) -> Self {
        Self {
            participant_id,
            from,
            to,
            promotion: None,
        }
    }

    pub fn with_promotion(mut self, kind: PieceKind) -> Self {
        self.promotion = Some(kind);
        self
    }
}

/// A participant asking for the right to move one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    pub entity_id: EntityId,
    pub participant_id: ParticipantId,
}

/// An authoritatively applied move, numbered for ordered replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveApplied {
    pub move_number: u32,
    pub from: Position,
    pub to: Position,
    /// The fully resolved move replicas apply to their registry
    pub applied: ChessMove,
    /// Entities that moved or changed kind, in their final state
    pub resulting_entities: Vec<Entity>,
    pub removed_entity: Option<EntityId>,
    pub turn: TurnState,
    /// Set when this move ended the game
    pub outcome: Option<GameOutcome>,
}

/// Verdict carried by a [`GrantResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantVerdict {
    Granted,
    Denied(GrantDenied),
}

impl From<Result<GrantOutcome, GrantDenied>> for GrantVerdict {
    fn from(result: Result<GrantOutcome, GrantDenied>) -> Self {
        match result {
            Ok(_) => GrantVerdict::Granted,
            Err(reason) => GrantVerdict::Denied(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantResult {
    pub entity_id: EntityId,
    pub participant_id: ParticipantId,
    pub verdict: GrantVerdict,
}

impl GrantResult {
    pub fn is_granted(&self) -> bool {
        matches!(self.verdict, GrantVerdict::Granted)
    }
}

/// Everything a replica may receive from the authoritative side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchEvent {
    MoveApplied(MoveApplied),
    GrantResult(GrantResult),
    FullSnapshotPush { snapshot: Snapshot },
    SkinChanged { side: Side, skin: String },
    GameOver { outcome: GameOutcome },
}
