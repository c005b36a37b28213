//! Authoritative move coordinator.
//!
//! The coordinator owns the ground truth of a match: the rules-engine board,
//! the entity registry, the ownership grants and the turn state. Each intent
//! runs through
//!
//! ```text
//! AwaitingIntent → ValidatingOwnership → ValidatingLegality → Applying → Broadcasting → AwaitingIntent
//! ```
//!
//! as one uninterrupted call on `&mut self`; callers serialize intents by
//! owning the coordinator. A rejected intent leaves every piece of state
//! exactly as it was. Once the rules engine (or a resignation) decides the
//! game, the coordinator parks in `GameOver` and rejects further intents.

use crate::events::{GrantRequest, MoveApplied, MoveIntent};
use crate::ids::{MatchId, ParticipantId};
use crate::ownership::{GrantDenied, GrantOutcome, OwnershipManager};
use crate::piece::Side;
use crate::position::Position;
use crate::registry::EntityRegistry;
use crate::rules::{GameOutcome, RulesEngine};
use crate::snapshot::{Cosmetics, Snapshot, SnapshotError};
use crate::turn::{SideBindings, TurnState};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Where the coordinator is in processing an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorPhase {
    AwaitingIntent,
    ValidatingOwnership,
    ValidatingLegality,
    Applying,
    Broadcasting,
    GameOver,
}

/// Why an intent was rejected. Reported to the sender only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("Not your turn")]
    NotYourTurn,

    #[error("You do not hold the grant for that piece")]
    NoOwnership,

    #[error("Illegal move")]
    IllegalMove,

    #[error("Origin square no longer holds a piece")]
    StaleIntent,

    #[error("Game is over")]
    GameAlreadyOver,

    #[error("No such piece")]
    EntityNotFound,

    #[error("Not a participant of this match")]
    NotAParticipant,
}

/// Ground truth for one match.
#[derive(Debug, Clone)]
pub struct MoveCoordinator<R: RulesEngine> {
    rules: R,
    match_id: MatchId,
    board: R::Board,
    registry: EntityRegistry,
    ownership: OwnershipManager,
    turn: TurnState,
    bindings: SideBindings,
    cosmetics: Cosmetics,
    phase: CoordinatorPhase,
    outcome: Option<GameOutcome>,
}

impl<R: RulesEngine> MoveCoordinator<R> {
    /// Start a match from the rules engine's initial layout.
    pub fn new_match(rules: R, match_id: MatchId, bindings: SideBindings) -> Self {
        let board = rules.initial_board();
        Self::from_board(rules, match_id, bindings, board)
    }

    /// Start a match from an arbitrary board.
    pub fn from_board(rules: R, match_id: MatchId, bindings: SideBindings, board: R::Board) -> Self {
        let registry = EntityRegistry::from_layout(|pos| rules.piece_at(&board, pos));
        let turn = TurnState::new(rules.side_to_move(&board));
        let outcome = rules.is_game_over(&board);

        Self {
            rules,
            match_id,
            board,
            registry,
            ownership: OwnershipManager::new(),
            turn,
            bindings,
            cosmetics: Cosmetics::default(),
            phase: phase_for(outcome),
            outcome,
        }
    }

    /// Rehydrate a match from its latest snapshot.
    ///
    /// No grants survive a restore; the side to move re-acquires them on
    /// its next request.
    pub fn restore(rules: R, snapshot: &Snapshot) -> Result<Self, SnapshotError> {
        let board = rules.decode(&snapshot.board)?;

        let board_side = rules.side_to_move(&board);
        if board_side != snapshot.turn.side_to_move {
            return Err(SnapshotError::Inconsistent(format!(
                "board has {} to move, turn state has {}",
                board_side, snapshot.turn.side_to_move
            )));
        }

        let registry = snapshot.registry()?;
        for pos in Position::all() {
            let expected = rules.piece_at(&board, pos);
            let actual = registry.entity_at(pos).map(|e| (e.side, e.kind));
            if expected != actual {
                return Err(SnapshotError::Inconsistent(format!(
                    "square {pos}: board has {expected:?}, entities have {actual:?}"
                )));
            }
        }

        let outcome = snapshot.outcome.or_else(|| rules.is_game_over(&board));
        info!(
            match_id = %snapshot.match_id,
            move_number = snapshot.turn.move_number,
            "match restored from snapshot"
        );

        Ok(Self {
            rules,
            match_id: snapshot.match_id,
            board,
            registry,
            ownership: OwnershipManager::new(),
            turn: snapshot.turn.clone(),
            bindings: snapshot.bindings,
            cosmetics: snapshot.cosmetics.clone(),
            phase: phase_for(outcome),
            outcome,
        })
    }

    /// Point-in-time copy of the match, detached from live state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            match_id: self.match_id,
            board: self.rules.encode(&self.board),
            entities: self.registry.entities(),
            turn: self.turn.clone(),
            bindings: self.bindings,
            cosmetics: self.cosmetics.clone(),
            outcome: self.outcome,
        }
    }

    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn ownership(&self) -> &OwnershipManager {
        &self.ownership
    }

    pub fn turn(&self) -> &TurnState {
        &self.turn
    }

    pub fn bindings(&self) -> &SideBindings {
        &self.bindings
    }

    pub fn cosmetics(&self) -> &Cosmetics {
        &self.cosmetics
    }

    pub fn board(&self) -> &R::Board {
        &self.board
    }

    pub fn phase(&self) -> CoordinatorPhase {
        self.phase
    }

    pub fn outcome(&self) -> Option<GameOutcome> {
        self.outcome
    }

    pub fn is_game_over(&self) -> bool {
        self.outcome.is_some()
    }

    /// Resolve a grant request in arrival order.
    pub fn request_grant(&mut self, request: &GrantRequest) -> Result<GrantOutcome, GrantDenied> {
        if self.outcome.is_some() {
            return Err(GrantDenied::GameAlreadyOver);
        }

        let result = self.ownership.request_grant(
            request.entity_id,
            request.participant_id,
            &self.registry,
            self.turn.side_to_move,
            &self.bindings,
        );
        if let Err(reason) = &result {
            debug!(
                entity = %request.entity_id,
                participant = %request.participant_id,
                %reason,
                "grant denied"
            );
        }
        result
    }

    /// Validate and apply a move intent.
    pub fn submit_move_intent(&mut self, intent: &MoveIntent) -> Result<MoveApplied, ProtocolError> {
        if self.outcome.is_some() {
            return Err(ProtocolError::GameAlreadyOver);
        }

        let result = self.process_intent(intent);

        match &result {
            Ok(applied) => info!(
                match_id = %self.match_id,
                move_number = applied.move_number,
                from = %intent.from,
                to = %intent.to,
                "move applied"
            ),
            Err(reason) => warn!(
                participant = %intent.participant_id,
                from = %intent.from,
                to = %intent.to,
                %reason,
                "move intent rejected"
            ),
        }

        self.transition(phase_for(self.outcome));
        result
    }

    fn process_intent(&mut self, intent: &MoveIntent) -> Result<MoveApplied, ProtocolError> {
        let Some(side) = self.bindings.side_of(intent.participant_id) else {
            return Err(ProtocolError::NotYourTurn);
        };

        // A vacated origin means the intent was already applied or overtaken
        let entity = *self
            .registry
            .entity_at(intent.from)
            .ok_or(ProtocolError::StaleIntent)?;

        if side != self.turn.side_to_move {
            return Err(ProtocolError::NotYourTurn);
        }

        self.transition(CoordinatorPhase::ValidatingOwnership);
        if !self.ownership.is_granted(entity.id, intent.participant_id) {
            return Err(ProtocolError::NoOwnership);
        }

        self.transition(CoordinatorPhase::ValidatingLegality);
        let mv = self
            .rules
            .try_get_legal_move(&self.board, intent.from, intent.to, intent.promotion)
            .ok_or(ProtocolError::IllegalMove)?;
        let next_board = self.rules.apply(&self.board, &mv).map_err(|e| {
            error!(error = %e, "rules engine could not apply its own legal move");
            ProtocolError::IllegalMove
        })?;

        self.transition(CoordinatorPhase::Applying);
        // Work on a copy so a registry failure cannot leave a half-applied move
        let mut next_registry = self.registry.clone();
        let effects = next_registry.apply_move(&mv).map_err(|e| {
            error!(error = %e, "registry diverged from rules engine board");
            ProtocolError::StaleIntent
        })?;

        let mover = self.turn.side_to_move;
        self.board = next_board;
        self.registry = next_registry;
        self.turn.advance(mv.clone());
        self.ownership.revoke_all(mover, &self.registry);
        self.outcome = self.rules.is_game_over(&self.board);
        if let Some(outcome) = self.outcome {
            info!(match_id = %self.match_id, ?outcome, "game over");
        }

        self.transition(CoordinatorPhase::Broadcasting);
        Ok(MoveApplied {
            move_number: self.turn.move_number,
            from: intent.from,
            to: intent.to,
            applied: mv,
            resulting_entities: effects.moved,
            removed_entity: effects.removed,
            turn: self.turn.clone(),
            outcome: self.outcome,
        })
    }

    /// End the game in the opponent's favour.
    pub fn resign(&mut self, participant: ParticipantId) -> Result<GameOutcome, ProtocolError> {
        if self.outcome.is_some() {
            return Err(ProtocolError::GameAlreadyOver);
        }
        let side = self
            .bindings
            .side_of(participant)
            .ok_or(ProtocolError::NotAParticipant)?;

        let outcome = GameOutcome::Resignation {
            winner: side.opposite(),
        };
        self.outcome = Some(outcome);
        self.ownership.clear();
        self.transition(CoordinatorPhase::GameOver);
        info!(match_id = %self.match_id, %side, "side resigned");
        Ok(outcome)
    }

    /// Record a skin choice for the participant's side.
    pub fn set_skin(&mut self, participant: ParticipantId, skin: String) -> Result<Side, ProtocolError> {
        let side = self
            .bindings
            .side_of(participant)
            .ok_or(ProtocolError::NotAParticipant)?;
        self.cosmetics.set_skin(side, skin);
        Ok(side)
    }

    fn transition(&mut self, next: CoordinatorPhase) {
        debug!(from = ?self.phase, to = ?next, "coordinator phase");
        self.phase = next;
    }
}

fn phase_for(outcome: Option<GameOutcome>) -> CoordinatorPhase {
    if outcome.is_some() {
        CoordinatorPhase::GameOver
    } else {
        CoordinatorPhase::AwaitingIntent
    }
}
