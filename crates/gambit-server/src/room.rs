//! Live match management.

use gambit_core::{
    EntityId, GrantRequest, GrantResult, GrantVerdict, MatchEvent, MatchId, MoveCoordinator,
    MoveIntent, ParticipantId, PieceKind, Position, ShakmatyRules, Side, SideBindings,
};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::ServerMessage;
use crate::sync::SnapshotSender;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Match not found")]
    MatchNotFound,

    #[error("Match already started")]
    MatchAlreadyStarted,

    #[error("Cannot play against yourself")]
    SelfJoin,

    #[error("Not a participant of this match")]
    NotAParticipant,

    #[error("Already in a match")]
    AlreadyInMatch,

    #[error("Saved match is unusable: {0}")]
    Restore(#[from] gambit_core::SnapshotError),
}

/// A match-level command from one participant.
#[derive(Debug, Clone)]
pub enum MatchCommand {
    Grant {
        entity_id: EntityId,
    },
    Move {
        from: Position,
        to: Position,
        promotion: Option<PieceKind>,
    },
    Resync,
    ApplySkin {
        skin: String,
    },
    Resign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    All,
    Only(ParticipantId),
}

/// A message to deliver once the room lock is released.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Recipient,
    pub message: ServerMessage,
}

impl Outbound {
    fn all(message: impl Into<ServerMessage>) -> Self {
        Self {
            to: Recipient::All,
            message: message.into(),
        }
    }

    fn only(participant: ParticipantId, message: impl Into<ServerMessage>) -> Self {
        Self {
            to: Recipient::Only(participant),
            message: message.into(),
        }
    }
}

/// A match waiting for its second participant.
#[derive(Debug, Clone)]
pub struct Lobby {
    pub creator: ParticipantId,
    pub creator_name: String,
}

/// A live match: the authoritative coordinator plus connection bookkeeping.
///
/// Every command runs to completion under the caller's exclusive borrow,
/// so intents for one match are never interleaved.
pub struct MatchRoom {
    pub id: MatchId,
    coordinator: MoveCoordinator<ShakmatyRules>,
    connected: HashSet<ParticipantId>,
    persister: SnapshotSender,
}

impl MatchRoom {
    /// Start a fresh match from the opening position.
    pub fn start(id: MatchId, bindings: SideBindings, persister: SnapshotSender) -> Self {
        let coordinator = MoveCoordinator::new_match(ShakmatyRules::new(), id, bindings);
        let room = Self::with_coordinator(coordinator, persister);
        room.persist();
        room
    }

    /// Resume a match from an existing coordinator (usually a restored one).
    pub fn with_coordinator(
        coordinator: MoveCoordinator<ShakmatyRules>,
        persister: SnapshotSender,
    ) -> Self {
        Self {
            id: coordinator.match_id(),
            coordinator,
            connected: HashSet::new(),
            persister,
        }
    }

    pub fn coordinator(&self) -> &MoveCoordinator<ShakmatyRules> {
        &self.coordinator
    }

    pub fn participants(&self) -> [ParticipantId; 2] {
        let bindings = self.coordinator.bindings();
        [bindings.white, bindings.black]
    }

    pub fn side_of(&self, participant: ParticipantId) -> Option<Side> {
        self.coordinator.bindings().side_of(participant)
    }

    pub fn is_connected(&self, participant: ParticipantId) -> bool {
        self.connected.contains(&participant)
    }

    /// No participant is connected any more.
    pub fn is_idle(&self) -> bool {
        self.connected.is_empty()
    }

    /// Record a participant's connection state and announce it.
    pub fn set_connected(&mut self, participant: ParticipantId, connected: bool) -> Vec<Outbound> {
        if self.side_of(participant).is_none() {
            return Vec::new();
        }
        let changed = if connected {
            self.connected.insert(participant)
        } else {
            self.connected.remove(&participant)
        };
        if !changed {
            return Vec::new();
        }

        debug!(match_id = %self.id, %participant, connected, "participant status");
        vec![Outbound::all(ServerMessage::ParticipantStatus {
            participant_id: participant,
            connected,
        })]
    }

    /// Messages that bring a (re)connecting participant up to date.
    pub fn welcome(&self, participant: ParticipantId) -> Result<Vec<Outbound>, RoomError> {
        let side = self.side_of(participant).ok_or(RoomError::NotAParticipant)?;
        Ok(vec![
            Outbound::only(
                participant,
                ServerMessage::MatchStarted {
                    match_id: self.id,
                    side,
                },
            ),
            Outbound::only(participant, self.snapshot_push()),
        ])
    }

    fn snapshot_push(&self) -> MatchEvent {
        MatchEvent::FullSnapshotPush {
            snapshot: self.coordinator.snapshot(),
        }
    }

    fn persist(&self) {
        self.persister.save(self.coordinator.snapshot());
    }

    /// Run one command through the coordinator.
    pub fn handle(&mut self, participant: ParticipantId, command: MatchCommand) -> Vec<Outbound> {
        match command {
            MatchCommand::Grant { entity_id } => {
                let verdict = GrantVerdict::from(self.coordinator.request_grant(&GrantRequest {
                    entity_id,
                    participant_id: participant,
                }));
                let result = GrantResult {
                    entity_id,
                    participant_id: participant,
                    verdict,
                };

                if result.is_granted() {
                    vec![Outbound::all(MatchEvent::GrantResult(result))]
                } else {
                    vec![Outbound::only(participant, MatchEvent::GrantResult(result))]
                }
            }

            MatchCommand::Move {
                from,
                to,
                promotion,
            } => {
                let intent = MoveIntent {
                    participant_id: participant,
                    from,
                    to,
                    promotion,
                };
                match self.coordinator.submit_move_intent(&intent) {
                    Ok(applied) => {
                        let outcome = applied.outcome;
                        let mut out = vec![Outbound::all(MatchEvent::MoveApplied(applied))];
                        if let Some(outcome) = outcome {
                            info!(match_id = %self.id, ?outcome, "match finished");
                            out.push(Outbound::all(MatchEvent::GameOver { outcome }));
                        }
                        self.persist();
                        out
                    }
                    Err(reason) => vec![Outbound::only(
                        participant,
                        ServerMessage::MoveRejected { from, to, reason },
                    )],
                }
            }

            MatchCommand::Resync => vec![Outbound::only(participant, self.snapshot_push())],

            MatchCommand::ApplySkin { skin } => {
                match self.coordinator.set_skin(participant, skin.clone()) {
                    Ok(side) => {
                        self.persist();
                        vec![Outbound::all(MatchEvent::SkinChanged { side, skin })]
                    }
                    Err(e) => vec![error_to(participant, e)],
                }
            }

            MatchCommand::Resign => match self.coordinator.resign(participant) {
                Ok(outcome) => {
                    self.persist();
                    vec![Outbound::all(MatchEvent::GameOver { outcome })]
                }
                Err(e) => vec![error_to(participant, e)],
            },
        }
    }
}

fn error_to(participant: ParticipantId, error: impl std::fmt::Display) -> Outbound {
    Outbound::only(
        participant,
        ServerMessage::Error {
            message: error.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gambit_core::{GameOutcome, ProtocolError, Snapshot};
    use tokio::sync::watch;

    struct Fixture {
        room: MatchRoom,
        white: ParticipantId,
        black: ParticipantId,
        saved: watch::Receiver<Option<Snapshot>>,
    }

    fn fixture() -> Fixture {
        let white = ParticipantId::new_v4();
        let black = ParticipantId::new_v4();
        let match_id = MatchId::new_v4();
        let (persister, saved) = SnapshotSender::detached(match_id);
        let room = MatchRoom::start(match_id, SideBindings::new(white, black), persister);
        Fixture {
            room,
            white,
            black,
            saved,
        }
    }

    fn sq(name: &str) -> Position {
        name.parse().unwrap()
    }

    fn entity_on(room: &MatchRoom, square: &str) -> EntityId {
        room.coordinator().registry().lookup(sq(square)).unwrap()
    }

    #[test]
    fn test_start_persists_opening_snapshot() {
        let f = fixture();
        let saved = f.saved.borrow().clone().unwrap();
        assert_eq!(saved.turn.move_number, 0);
        assert_eq!(saved.entities.len(), 32);
        assert_eq!(f.room.participants(), [f.white, f.black]);
    }

    #[test]
    fn test_granted_result_goes_to_everyone() {
        let mut f = fixture();
        let pawn = entity_on(&f.room, "e2");

        let out = f.room.handle(f.white, MatchCommand::Grant { entity_id: pawn });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, Recipient::All);
        assert!(matches!(&out[0].message, ServerMessage::GrantResult(r) if r.is_granted()));
    }

    #[test]
    fn test_denied_result_goes_to_requester_only() {
        let mut f = fixture();
        let pawn = entity_on(&f.room, "e7");

        let out = f.room.handle(f.black, MatchCommand::Grant { entity_id: pawn });
        assert_eq!(out[0].to, Recipient::Only(f.black));
        assert!(matches!(&out[0].message, ServerMessage::GrantResult(r) if !r.is_granted()));
    }

    #[test]
    fn test_move_broadcasts_and_persists() {
        let mut f = fixture();
        let pawn = entity_on(&f.room, "e2");
        f.room.handle(f.white, MatchCommand::Grant { entity_id: pawn });

        let out = f.room.handle(
            f.white,
            MatchCommand::Move {
                from: sq("e2"),
                to: sq("e4"),
                promotion: None,
            },
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, Recipient::All);
        assert!(matches!(&out[0].message, ServerMessage::MoveApplied(a) if a.move_number == 1));

        let saved = f.saved.borrow().clone().unwrap();
        assert_eq!(saved.turn.move_number, 1);
        assert_eq!(saved.turn.side_to_move, Side::Black);
    }

    #[test]
    fn test_rejected_move_is_private() {
        let mut f = fixture();
        let out = f.room.handle(
            f.white,
            MatchCommand::Move {
                from: sq("e2"),
                to: sq("e4"),
                promotion: None,
            },
        );

        assert_eq!(out[0].to, Recipient::Only(f.white));
        assert!(matches!(
            out[0].message,
            ServerMessage::MoveRejected {
                reason: ProtocolError::NoOwnership,
                ..
            }
        ));
        assert_eq!(f.saved.borrow().as_ref().unwrap().turn.move_number, 0);
    }

    #[test]
    fn test_resign_and_skin() {
        let mut f = fixture();

        let out = f.room.handle(
            f.black,
            MatchCommand::ApplySkin {
                skin: "ebony".to_string(),
            },
        );
        assert!(matches!(
            &out[0].message,
            ServerMessage::SkinChanged { side: Side::Black, skin } if skin == "ebony"
        ));

        let out = f.room.handle(f.black, MatchCommand::Resign);
        assert!(matches!(
            out[0].message,
            ServerMessage::GameOver {
                outcome: GameOutcome::Resignation { winner: Side::White }
            }
        ));
        let saved = f.saved.borrow().clone().unwrap();
        assert!(saved.outcome.is_some());
        assert_eq!(saved.cosmetics.skin(Side::Black), Some("ebony"));

        let stranger = ParticipantId::new_v4();
        let out = f.room.handle(stranger, MatchCommand::Resign);
        assert!(matches!(out[0].message, ServerMessage::Error { .. }));
    }

    #[test]
    fn test_connection_tracking() {
        let mut f = fixture();
        assert!(f.room.is_idle());

        assert_eq!(f.room.set_connected(f.white, true).len(), 1);
        assert!(f.room.set_connected(f.white, true).is_empty());
        assert!(f.room.set_connected(ParticipantId::new_v4(), true).is_empty());
        assert!(f.room.is_connected(f.white));

        f.room.set_connected(f.white, false);
        assert!(f.room.is_idle());
    }

    #[test]
    fn test_welcome_pushes_snapshot() {
        let f = fixture();
        let out = f.room.welcome(f.black).unwrap();

        assert!(matches!(
            out[0].message,
            ServerMessage::MatchStarted {
                side: Side::Black,
                ..
            }
        ));
        assert!(matches!(out[1].message, ServerMessage::FullSnapshotPush { .. }));
        assert!(f.room.welcome(ParticipantId::new_v4()).is_err());
    }
}
