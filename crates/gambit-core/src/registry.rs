//! Entity registry: which entity stands on which square.
//!
//! The registry is a plain data structure with no network awareness. The
//! authoritative coordinator and every replica keep one and mutate it with
//! the same calls, in the same order, so they stay identical.

use crate::ids::EntityId;
use crate::piece::{Entity, PieceKind, Side};
use crate::position::Position;
use crate::rules::ChessMove;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no entity at {0}")]
    NotFound(Position),
}

/// What a single applied move did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveEffects {
    /// Entities whose position or kind changed, in their final state
    pub moved: Vec<Entity>,
    /// Entity taken off the board by a capture
    pub removed: Option<EntityId>,
}

/// Position → entity index with O(1) lookup in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRegistry {
    squares: HashMap<Position, EntityId>,
    entities: HashMap<EntityId, Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a board description, numbering entities 1, 2, ...
    /// in square order (a1, b1, ..., h8).
    pub fn from_layout<F>(piece_at: F) -> Self
    where
        F: Fn(Position) -> Option<(Side, PieceKind)>,
    {
        let mut registry = Self::new();
        let mut next_id = 1;
        for pos in Position::all() {
            if let Some((side, kind)) = piece_at(pos) {
                registry.register(Entity::new(EntityId(next_id), side, kind, pos), pos);
                next_id += 1;
            }
        }
        registry
    }

    /// Rebuild a registry from a flat list of entities.
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut registry = Self::new();
        for entity in entities {
            registry.register(entity, entity.position);
        }
        registry
    }

    pub fn lookup(&self, position: Position) -> Option<EntityId> {
        self.squares.get(&position).copied()
    }

    pub fn entity_at(&self, position: Position) -> Option<&Entity> {
        self.lookup(position).and_then(|id| self.entities.get(&id))
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All entities ordered by id.
    pub fn entities(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.entities.values().copied().collect();
        all.sort_by_key(|e| e.id);
        all
    }

    pub fn entities_of(&self, side: Side) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(move |e| e.side == side)
    }

    /// Put `entity` on `position`. Whatever stood there is dropped, and if the
    /// entity was already registered elsewhere its old square is vacated.
    pub fn register(&mut self, mut entity: Entity, position: Position) {
        if let Some(previous) = self.entities.get(&entity.id) {
            self.squares.remove(&previous.position);
        }
        if let Some(displaced) = self.squares.insert(position, entity.id) {
            if displaced != entity.id {
                self.entities.remove(&displaced);
            }
        }
        entity.position = position;
        self.entities.insert(entity.id, entity);
    }

    /// Remove whatever stands on `position`. Empty squares are a no-op.
    pub fn unregister(&mut self, position: Position) -> Option<Entity> {
        let id = self.squares.remove(&position)?;
        self.entities.remove(&id)
    }

    /// Move the entity on `from` to `to`, overwriting any occupant of `to`.
    ///
    /// Returns the id of the overwritten entity. Callers resolve captures
    /// with [`EntityRegistry::unregister`] first, so a `Some` here means the
    /// caller skipped that step.
    pub fn move_entity(
        &mut self,
        from: Position,
        to: Position,
    ) -> Result<Option<EntityId>, RegistryError> {
        let id = self
            .squares
            .remove(&from)
            .ok_or(RegistryError::NotFound(from))?;

        let displaced = self.squares.insert(to, id).filter(|d| *d != id);
        if let Some(displaced) = displaced {
            warn!(entity = %displaced, square = %to, "entity overwritten by move");
            self.entities.remove(&displaced);
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.position = to;
        }
        Ok(displaced)
    }

    /// Replace the kind of the entity on `position` (promotion).
    pub fn set_kind(&mut self, position: Position, kind: PieceKind) -> Result<(), RegistryError> {
        let id = self.lookup(position).ok_or(RegistryError::NotFound(position))?;
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.kind = kind;
        }
        Ok(())
    }

    /// Mirror a resolved move: remove the captured entity, move the piece,
    /// hop the rook on a castle, then substitute the promotion kind.
    pub fn apply_move(&mut self, mv: &ChessMove) -> Result<MoveEffects, RegistryError> {
        if self.lookup(mv.from).is_none() {
            return Err(RegistryError::NotFound(mv.from));
        }
        if let Some((rook_from, _)) = mv.castle_rook {
            if self.lookup(rook_from).is_none() {
                return Err(RegistryError::NotFound(rook_from));
            }
        }

        let removed = mv
            .capture
            .and_then(|square| self.unregister(square))
            .map(|e| e.id);

        let mut touched = Vec::with_capacity(2);
        let mover = self.lookup(mv.from).ok_or(RegistryError::NotFound(mv.from))?;
        self.move_entity(mv.from, mv.to)?;
        touched.push(mover);

        if let Some((rook_from, rook_to)) = mv.castle_rook {
            let rook = self
                .lookup(rook_from)
                .ok_or(RegistryError::NotFound(rook_from))?;
            self.move_entity(rook_from, rook_to)?;
            touched.push(rook);
        }

        if let Some(kind) = mv.promotion {
            self.set_kind(mv.to, kind)?;
        }

        let moved = touched
            .into_iter()
            .filter_map(|id| self.entities.get(&id).copied())
            .collect();

        Ok(MoveEffects { moved, removed })
    }
}
