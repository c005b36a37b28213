//! WebSocket protocol messages for Gambit matches.

use gambit_core::{
    EntityId, GameOutcome, GrantResult, MatchEvent, MatchId, MoveApplied, ParticipantId,
    PieceKind, Position, ProtocolError, Side, Snapshot,
};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Open a match and wait for an opponent (creator plays White)
    CreateMatch { player_name: String },

    /// Take the Black side of a waiting match
    JoinMatch { match_id: MatchId, player_name: String },

    /// Resume as a participant of an existing match
    Rejoin {
        match_id: MatchId,
        participant_id: ParticipantId,
    },

    /// Ask for the right to move one piece
    GrantRequest { entity_id: EntityId },

    /// Propose a move
    MoveIntent {
        from: Position,
        to: Position,
        #[serde(default)]
        promotion: Option<PieceKind>,
    },

    /// Ask for a full snapshot
    RequestResync,

    /// Choose a cosmetic skin for your side
    ApplySkin { skin: String },

    Resign,

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Welcome message with the connection's participant ID
    Welcome { participant_id: ParticipantId },

    /// Match created, waiting for an opponent
    MatchCreated { match_id: MatchId },

    /// Match is live and you play `side`
    MatchStarted { match_id: MatchId, side: Side },

    FullSnapshotPush { snapshot: Snapshot },

    MoveApplied(MoveApplied),

    GrantResult(GrantResult),

    /// Your move intent was refused
    MoveRejected {
        from: Position,
        to: Position,
        reason: ProtocolError,
    },

    SkinChanged { side: Side, skin: String },

    GameOver { outcome: GameOutcome },

    /// A participant connected or dropped
    ParticipantStatus {
        participant_id: ParticipantId,
        connected: bool,
    },

    /// Error occurred
    Error { message: String },

    /// Pong response
    Pong,
}

impl From<MatchEvent> for ServerMessage {
    fn from(event: MatchEvent) -> Self {
        match event {
            MatchEvent::MoveApplied(applied) => ServerMessage::MoveApplied(applied),
            MatchEvent::GrantResult(result) => ServerMessage::GrantResult(result),
            MatchEvent::FullSnapshotPush { snapshot } => ServerMessage::FullSnapshotPush { snapshot },
            MatchEvent::SkinChanged { side, skin } => ServerMessage::SkinChanged { side, skin },
            MatchEvent::GameOver { outcome } => ServerMessage::GameOver { outcome },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_shape() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "MoveIntent",
            "payload": {
                "from": { "file": 5, "rank": 2 },
                "to": { "file": 5, "rank": 4 }
            }
        }))
        .unwrap();

        match msg {
            ClientMessage::MoveIntent {
                from,
                to,
                promotion,
            } => {
                assert_eq!(from.to_string(), "e2");
                assert_eq!(to.to_string(), "e4");
                assert_eq!(promotion, None);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_unit_variants_need_no_payload() {
        let msg: ClientMessage = serde_json::from_value(json!({ "type": "Resign" })).unwrap();
        assert!(matches!(msg, ClientMessage::Resign));

        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong, json!({ "type": "Pong" }));
    }

    #[test]
    fn test_rejection_reason_on_the_wire() {
        let msg = ServerMessage::MoveRejected {
            from: "e2".parse().unwrap(),
            to: "e5".parse().unwrap(),
            reason: ProtocolError::IllegalMove,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "MoveRejected");
        assert_eq!(value["payload"]["reason"], "IllegalMove");
    }

    #[test]
    fn test_events_keep_their_shape() {
        let msg = ServerMessage::from(MatchEvent::SkinChanged {
            side: Side::Black,
            skin: "onyx".to_string(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "SkinChanged");
        assert_eq!(value["payload"]["side"], "Black");
        assert_eq!(value["payload"]["skin"], "onyx");
    }
}
