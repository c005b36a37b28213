//! Serializable capture of a match for persistence and resume.

use crate::ids::MatchId;
use crate::piece::{Entity, Side};
use crate::registry::EntityRegistry;
use crate::rules::{GameOutcome, RulesError};
use crate::turn::{SideBindings, TurnState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("snapshot decoding failed: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("snapshot board is unreadable: {0}")]
    Board(#[from] RulesError),

    #[error("snapshot is inconsistent: {0}")]
    Inconsistent(String),
}

/// Per-side cosmetic choices. Carried along but never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cosmetics {
    pub white_skin: Option<String>,
    pub black_skin: Option<String>,
}

impl Cosmetics {
    pub fn skin(&self, side: Side) -> Option<&str> {
        match side {
            Side::White => self.white_skin.as_deref(),
            Side::Black => self.black_skin.as_deref(),
        }
    }

    pub fn set_skin(&mut self, side: Side, skin: String) {
        match side {
            Side::White => self.white_skin = Some(skin),
            Side::Black => self.black_skin = Some(skin),
        }
    }
}

/// The latest state of one match. Overwritten on every save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub match_id: MatchId,
    /// Rules-engine encoding of the board (FEN for standard chess)
    pub board: String,
    /// Every entity on the board, ordered by id
    pub entities: Vec<Entity>,
    pub turn: TurnState,
    pub bindings: SideBindings,
    pub cosmetics: Cosmetics,
    pub outcome: Option<GameOutcome>,
}

impl Snapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec(self).map_err(SnapshotError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        serde_json::from_slice(bytes).map_err(SnapshotError::Decode)
    }

    /// Registry holding exactly the captured entities.
    pub fn registry(&self) -> Result<EntityRegistry, SnapshotError> {
        let registry = EntityRegistry::from_entities(self.entities.iter().copied());
        if registry.len() != self.entities.len() {
            return Err(SnapshotError::Inconsistent(
                "two entities share a square or an id".to_string(),
            ));
        }
        Ok(registry)
    }
}
