//! Gambit - authoritative synchronization core for networked two-player chess
//!
//! This crate holds the match logic shared by the server and by any client
//! that wants to mirror a match locally:
//! - Stable entity identities for the pieces on the board
//! - Per-entity ownership grants tied to the side to move
//! - An authoritative move coordinator that validates and applies intents
//! - Snapshots for persistence and late-join resync
//! - A replica that mirrors the authority from its event stream
//!
//! # Architecture
//!
//! Legality is never decided here. The coordinator delegates it to a
//! [`RulesEngine`]; [`ShakmatyRules`] is the standard chess implementation.
//! Nothing in this crate performs I/O, so the same code runs on the server
//! and inside clients.
//!
//! # Modules
//!
//! - [`position`]: Board squares
//! - [`registry`]: Entity registry (square ↔ entity mapping)
//! - [`rules`] / [`engine`]: Rules engine contract and its chess implementation
//! - [`ownership`]: Grant bookkeeping
//! - [`coordinator`]: Authoritative intent processing
//! - [`snapshot`] / [`replica`]: Persistence format and client-side mirror

pub mod coordinator;
pub mod engine;
pub mod events;
pub mod ids;
pub mod ownership;
pub mod piece;
pub mod position;
pub mod registry;
pub mod replica;
pub mod rules;
pub mod snapshot;
pub mod turn;

// Re-export commonly used types
pub use coordinator::{CoordinatorPhase, MoveCoordinator, ProtocolError};
pub use engine::ShakmatyRules;
pub use events::{GrantRequest, GrantResult, GrantVerdict, MatchEvent, MoveApplied, MoveIntent};
pub use ids::{EntityId, MatchId, ParticipantId};
pub use ownership::{GrantDenied, GrantOutcome, OwnershipManager};
pub use piece::{Entity, PieceKind, Side};
pub use position::{Position, PositionError};
pub use registry::{EntityRegistry, MoveEffects, RegistryError};
pub use replica::{DesyncDetected, Replica, ReplicaStatus};
pub use rules::{ChessMove, GameOutcome, RulesEngine, RulesError};
pub use snapshot::{Cosmetics, Snapshot, SnapshotError};
pub use turn::{SideBindings, TurnState};
