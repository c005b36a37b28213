//! Exclusive per-entity mutation rights.
//!
//! Each entity is either unowned or granted to exactly one participant.
//! A grant can only be held by the participant bound to the entity's side,
//! and only while that side is to move; every turn flip revokes the grants
//! of the side that just moved. Requests are resolved in arrival order by
//! the authoritative process, and a repeated request from the current
//! holder is a successful no-op.

use crate::ids::{EntityId, ParticipantId};
use crate::piece::Side;
use crate::registry::EntityRegistry;
use crate::turn::SideBindings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Successful grant resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantOutcome {
    /// Newly granted
    Granted,
    /// The requester already held the grant
    AlreadyHeld,
}

/// Why a grant request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GrantDenied {
    #[error("entity does not exist")]
    EntityNotFound,

    #[error("entity belongs to the side not to move")]
    WrongSide,

    #[error("requester does not play the side to move")]
    NotTurnOwner,

    #[error("game is over")]
    GameAlreadyOver,
}

/// Live grants, keyed by entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipManager {
    grants: HashMap<EntityId, ParticipantId>,
}

impl OwnershipManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a grant request against the current board and turn.
    pub fn request_grant(
        &mut self,
        entity_id: EntityId,
        participant: ParticipantId,
        registry: &EntityRegistry,
        side_to_move: Side,
        bindings: &SideBindings,
    ) -> Result<GrantOutcome, GrantDenied> {
        let entity = registry.get(entity_id).ok_or(GrantDenied::EntityNotFound)?;

        if entity.side != side_to_move {
            return Err(GrantDenied::WrongSide);
        }
        if bindings.participant(side_to_move) != participant {
            return Err(GrantDenied::NotTurnOwner);
        }

        match self.grants.get(&entity_id) {
            Some(holder) if *holder == participant => Ok(GrantOutcome::AlreadyHeld),
            // Unreachable while the binding invariant holds
            Some(_) => Err(GrantDenied::NotTurnOwner),
            None => {
                self.grants.insert(entity_id, participant);
                debug!(entity = %entity_id, %participant, "grant issued");
                Ok(GrantOutcome::Granted)
            }
        }
    }

    pub fn holder(&self, entity_id: EntityId) -> Option<ParticipantId> {
        self.grants.get(&entity_id).copied()
    }

    pub fn is_granted(&self, entity_id: EntityId, participant: ParticipantId) -> bool {
        self.holder(entity_id) == Some(participant)
    }

    /// Drop every grant on an entity of `side`, and any grant whose entity
    /// has left the board.
    pub fn revoke_all(&mut self, side: Side, registry: &EntityRegistry) {
        let before = self.grants.len();
        self.grants.retain(|id, _| {
            registry
                .get(*id)
                .map_or(false, |entity| entity.side != side)
        });
        debug!(%side, revoked = before - self.grants.len(), "grants revoked");
    }

    pub fn clear(&mut self) {
        self.grants.clear();
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Snapshot of live grants, ordered by entity.
    pub fn grants(&self) -> Vec<(EntityId, ParticipantId)> {
        let mut all: Vec<_> = self.grants.iter().map(|(e, p)| (*e, *p)).collect();
        all.sort();
        all
    }
}
