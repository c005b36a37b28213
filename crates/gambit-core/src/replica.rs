//! Non-authoritative mirror of a match.
//!
//! A replica only changes state in response to [`MatchEvent`]s. Move events
//! are applied strictly in `move_number` order; events that arrive early
//! are held back until the gap closes. When the gap cannot close (too many
//! held events) or an event does not fit the mirrored board, the replica
//! stops applying and asks for a full snapshot.

use crate::events::{GrantVerdict, MatchEvent, MoveApplied};
use crate::ids::{EntityId, MatchId, ParticipantId};
use crate::registry::EntityRegistry;
use crate::rules::GameOutcome;
use crate::snapshot::{Cosmetics, Snapshot};
use crate::turn::{SideBindings, TurnState};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_MAX_PENDING: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DesyncDetected {
    #[error("missing move {expected}, already holding moves up to {received}")]
    Gap { expected: u32, received: u32 },

    #[error("move {move_number} does not fit the mirrored board")]
    Divergent { move_number: u32 },

    #[error("snapshot rejected: {0}")]
    BadSnapshot(String),
}

/// What [`Replica::apply_event`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaStatus {
    /// Replaced local state with a snapshot
    Synced { move_number: u32 },
    /// Applied moves up to and including `move_number`
    Applied { move_number: u32 },
    /// Held back until `awaiting` arrives
    Buffered { awaiting: u32 },
    /// Already applied, ignored
    Duplicate,
    /// Non-move state changed
    Updated,
    ResyncRequired(DesyncDetected),
}

#[derive(Debug, Clone)]
pub struct Replica {
    match_id: Option<MatchId>,
    registry: EntityRegistry,
    turn: TurnState,
    bindings: Option<SideBindings>,
    cosmetics: Cosmetics,
    outcome: Option<GameOutcome>,
    grants: HashMap<EntityId, ParticipantId>,
    pending: BTreeMap<u32, MoveApplied>,
    max_pending: usize,
    synced: bool,
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl Replica {
    /// An empty replica waiting for its first snapshot.
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            match_id: None,
            registry: EntityRegistry::new(),
            turn: TurnState::default(),
            bindings: None,
            cosmetics: Cosmetics::default(),
            outcome: None,
            grants: HashMap::new(),
            pending: BTreeMap::new(),
            max_pending,
            synced: false,
        }
    }

    pub fn apply_event(&mut self, event: MatchEvent) -> ReplicaStatus {
        match event {
            MatchEvent::FullSnapshotPush { snapshot } => self.load_snapshot(&snapshot),
            MatchEvent::MoveApplied(applied) => self.receive_move(applied),
            MatchEvent::GrantResult(result) => {
                if result.verdict == GrantVerdict::Granted {
                    self.grants.insert(result.entity_id, result.participant_id);
                }
                ReplicaStatus::Updated
            }
            MatchEvent::SkinChanged { side, skin } => {
                self.cosmetics.set_skin(side, skin);
                ReplicaStatus::Updated
            }
            MatchEvent::GameOver { outcome } => {
                self.outcome = Some(outcome);
                self.grants.clear();
                ReplicaStatus::Updated
            }
        }
    }

    fn load_snapshot(&mut self, snapshot: &Snapshot) -> ReplicaStatus {
        let registry = match snapshot.registry() {
            Ok(registry) => registry,
            Err(e) => {
                warn!(error = %e, "discarding unusable snapshot");
                self.synced = false;
                return ReplicaStatus::ResyncRequired(DesyncDetected::BadSnapshot(e.to_string()));
            }
        };

        self.match_id = Some(snapshot.match_id);
        self.registry = registry;
        self.turn = snapshot.turn.clone();
        self.bindings = Some(snapshot.bindings);
        self.cosmetics = snapshot.cosmetics.clone();
        self.outcome = snapshot.outcome;
        self.grants.clear();
        self.synced = true;

        let base = self.turn.move_number;
        self.pending.retain(|number, _| *number > base);
        debug!(move_number = base, held = self.pending.len(), "replica synced");

        match self.drain_pending() {
            Ok(Some(latest)) => ReplicaStatus::Applied {
                move_number: latest,
            },
            Ok(None) => ReplicaStatus::Synced { move_number: base },
            Err(desync) => ReplicaStatus::ResyncRequired(desync),
        }
    }

    fn receive_move(&mut self, applied: MoveApplied) -> ReplicaStatus {
        let number = applied.move_number;
        let expected = self.turn.move_number + 1;

        if self.synced && number < expected {
            return ReplicaStatus::Duplicate;
        }

        self.pending.insert(number, applied);
        if !self.synced || number > expected {
            if self.pending.len() > self.max_pending {
                let received = self.pending.keys().next_back().copied().unwrap_or(number);
                warn!(expected, received, "replica fell too far behind");
                self.synced = false;
                self.pending.clear();
                return ReplicaStatus::ResyncRequired(DesyncDetected::Gap { expected, received });
            }
            return ReplicaStatus::Buffered { awaiting: expected };
        }

        match self.drain_pending() {
            Ok(Some(latest)) => ReplicaStatus::Applied {
                move_number: latest,
            },
            // The event we just inserted is next in line
            Ok(None) => ReplicaStatus::Buffered { awaiting: expected },
            Err(desync) => ReplicaStatus::ResyncRequired(desync),
        }
    }

    /// Apply every held event that continues the sequence.
    fn drain_pending(&mut self) -> Result<Option<u32>, DesyncDetected> {
        let mut latest = None;
        while let Some(applied) = self.pending.remove(&(self.turn.move_number + 1)) {
            self.apply_move(&applied)?;
            latest = Some(applied.move_number);
        }
        Ok(latest)
    }

    fn apply_move(&mut self, applied: &MoveApplied) -> Result<(), DesyncDetected> {
        let divergent = DesyncDetected::Divergent {
            move_number: applied.move_number,
        };

        let mut next = self.registry.clone();
        if let Err(e) = next.apply_move(&applied.applied) {
            warn!(move_number = applied.move_number, error = %e, "replica could not apply move");
            return Err(self.lose_sync(divergent));
        }
        let agrees = applied
            .resulting_entities
            .iter()
            .all(|entity| next.get(entity.id) == Some(entity))
            && applied.removed_entity.map_or(true, |id| next.get(id).is_none());
        if !agrees {
            warn!(move_number = applied.move_number, "replica disagrees with move result");
            return Err(self.lose_sync(divergent));
        }

        self.registry = next;
        self.turn = applied.turn.clone();
        self.grants.clear();
        if applied.outcome.is_some() {
            self.outcome = applied.outcome;
        }
        Ok(())
    }

    fn lose_sync(&mut self, desync: DesyncDetected) -> DesyncDetected {
        self.synced = false;
        self.pending.clear();
        desync
    }

    pub fn match_id(&self) -> Option<MatchId> {
        self.match_id
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn turn(&self) -> &TurnState {
        &self.turn
    }

    pub fn bindings(&self) -> Option<&SideBindings> {
        self.bindings.as_ref()
    }

    pub fn cosmetics(&self) -> &Cosmetics {
        &self.cosmetics
    }

    pub fn outcome(&self) -> Option<GameOutcome> {
        self.outcome
    }

    pub fn holder(&self, entity_id: EntityId) -> Option<ParticipantId> {
        self.grants.get(&entity_id).copied()
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
