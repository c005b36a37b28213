//! WebSocket server and connection handling.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::room::{Lobby, MatchCommand, MatchRoom, Outbound, Recipient, RoomError};
use crate::sync::SessionSynchronizer;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use gambit_core::{MatchId, MoveCoordinator, ParticipantId, ShakmatyRules, SideBindings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};

/// Server state shared across all connections.
pub struct ServerState {
    /// Live matches
    pub matches: DashMap<MatchId, MatchRoom>,
    /// Matches waiting for a second participant
    pub lobbies: DashMap<MatchId, Lobby>,
    /// Mapping from participant ID to their match
    pub participant_matches: DashMap<ParticipantId, MatchId>,
    /// Mapping from participant ID to their message sender
    pub participant_senders: DashMap<ParticipantId, mpsc::UnboundedSender<ServerMessage>>,
    pub sync: Arc<SessionSynchronizer>,
}

impl ServerState {
    pub fn new(sync: Arc<SessionSynchronizer>) -> Self {
        Self {
            matches: DashMap::new(),
            lobbies: DashMap::new(),
            participant_matches: DashMap::new(),
            participant_senders: DashMap::new(),
            sync,
        }
    }

    /// Send a message to a specific participant.
    pub fn send_to_participant(&self, participant: ParticipantId, msg: ServerMessage) {
        if let Some(sender) = self.participant_senders.get(&participant) {
            let _ = sender.send(msg);
        }
    }

    fn send_error(&self, participant: ParticipantId, message: impl ToString) {
        self.send_to_participant(
            participant,
            ServerMessage::Error {
                message: message.to_string(),
            },
        );
    }

    /// Deliver room output. Must be called with no room lock held.
    fn deliver(&self, participants: [ParticipantId; 2], outbound: Vec<Outbound>) {
        for Outbound { to, message } in outbound {
            match to {
                Recipient::All => {
                    for participant in participants {
                        self.send_to_participant(participant, message.clone());
                    }
                }
                Recipient::Only(participant) => self.send_to_participant(participant, message),
            }
        }
    }

    /// Run a command against the participant's match.
    pub fn dispatch(&self, participant: ParticipantId, command: MatchCommand) {
        let Some(match_id) = self.participant_matches.get(&participant).map(|m| *m) else {
            self.send_error(participant, "Not in a match");
            return;
        };

        let (participants, outbound) = match self.matches.get_mut(&match_id) {
            Some(mut room) => (room.participants(), room.handle(participant, command)),
            None => {
                self.send_error(participant, "Match has not started");
                return;
            }
        };
        self.deliver(participants, outbound);
    }

    /// Detach a participant from a finished match, or refuse while they
    /// still have a lobby or a match in play.
    fn ensure_free(&self, participant: ParticipantId) -> Result<(), RoomError> {
        let Some(current) = self.participant_matches.get(&participant).map(|m| *m) else {
            return Ok(());
        };
        let finished = self
            .matches
            .get(&current)
            .is_some_and(|room| room.coordinator().is_game_over());
        if !finished {
            return Err(RoomError::AlreadyInMatch);
        }
        self.leave(participant);
        Ok(())
    }

    fn create_match(&self, participant: ParticipantId, player_name: String) -> Result<(), RoomError> {
        self.ensure_free(participant)?;

        let match_id = MatchId::new_v4();
        info!(%match_id, %participant, %player_name, "match created");

        self.lobbies.insert(
            match_id,
            Lobby {
                creator: participant,
                creator_name: player_name,
            },
        );
        self.participant_matches.insert(participant, match_id);
        self.send_to_participant(participant, ServerMessage::MatchCreated { match_id });
        Ok(())
    }

    fn join_match(
        &self,
        participant: ParticipantId,
        match_id: MatchId,
        player_name: String,
    ) -> Result<(), RoomError> {
        if self.matches.contains_key(&match_id) {
            return Err(RoomError::MatchAlreadyStarted);
        }
        if self
            .lobbies
            .get(&match_id)
            .is_some_and(|lobby| lobby.creator == participant)
        {
            return Err(RoomError::SelfJoin);
        }
        self.ensure_free(participant)?;

        let lobby = match self.lobbies.entry(match_id) {
            Entry::Occupied(entry) if entry.get().creator == participant => {
                return Err(RoomError::SelfJoin);
            }
            Entry::Occupied(entry) => entry.remove(),
            Entry::Vacant(_) => return Err(RoomError::MatchNotFound),
        };

        info!(
            %match_id,
            white = %lobby.creator_name,
            black = %player_name,
            "match started"
        );
        let bindings = SideBindings::new(lobby.creator, participant);
        let persister = self.sync.attach_persister(match_id);
        let mut room = MatchRoom::start(match_id, bindings, persister);
        self.participant_matches.insert(participant, match_id);

        let mut outbound = Vec::new();
        for p in room.participants() {
            if self.participant_senders.contains_key(&p) {
                outbound.extend(room.set_connected(p, true));
            }
            outbound.extend(room.welcome(p)?);
        }
        let participants = room.participants();
        self.matches.insert(match_id, room);
        self.deliver(participants, outbound);
        Ok(())
    }

    /// Reattach a connection to a match, restoring it from storage if it
    /// is not live.
    async fn rejoin(
        &self,
        connection: ParticipantId,
        match_id: MatchId,
        participant: ParticipantId,
    ) -> Result<(), RoomError> {
        // A connection carries one participant in one match at a time
        if connection != participant && self.participant_matches.contains_key(&connection) {
            return Err(RoomError::AlreadyInMatch);
        }
        if self
            .participant_matches
            .get(&participant)
            .is_some_and(|current| *current != match_id)
        {
            return Err(RoomError::AlreadyInMatch);
        }

        if !self.matches.contains_key(&match_id) {
            // Attach first so a save still in flight keeps its snapshot visible
            let persister = self.sync.attach_persister(match_id);
            let loaded = self
                .sync
                .load_latest_snapshot(match_id)
                .await
                .ok_or(RoomError::MatchNotFound)?;

            // Another connection may have restored it while we were loading
            if let Entry::Vacant(entry) = self.matches.entry(match_id) {
                let snapshot = persister.latest().unwrap_or(loaded);
                let coordinator = MoveCoordinator::restore(ShakmatyRules::new(), &snapshot)?;
                entry.insert(MatchRoom::with_coordinator(coordinator, persister));
                info!(
                    %match_id,
                    move_number = snapshot.turn.move_number,
                    "match resumed from snapshot"
                );
            }
        }

        let (participants, outbound) = {
            let mut room = self
                .matches
                .get_mut(&match_id)
                .ok_or(RoomError::MatchNotFound)?;
            let mut outbound = room.welcome(participant)?;
            outbound.extend(room.set_connected(participant, true));
            (room.participants(), outbound)
        };

        if connection != participant {
            if let Some((_, sender)) = self.participant_senders.remove(&connection) {
                self.participant_senders.insert(participant, sender);
            }
        }
        self.participant_matches.insert(participant, match_id);

        self.deliver(participants, outbound);
        Ok(())
    }

    /// Drop a participant's lobby or mark them gone from their match.
    fn leave(&self, participant: ParticipantId) {
        let Some((_, match_id)) = self.participant_matches.remove(&participant) else {
            return;
        };

        // Creator left before anyone joined
        if self
            .lobbies
            .remove_if(&match_id, |_, lobby| lobby.creator == participant)
            .is_some()
        {
            info!(%match_id, "lobby closed");
            return;
        }

        let delivery = self.matches.get_mut(&match_id).map(|mut room| {
            let outbound = room.set_connected(participant, false);
            (room.participants(), outbound)
        });
        if let Some((participants, outbound)) = delivery {
            self.deliver(participants, outbound);
        }

        // Evict once nobody is connected; the persister finishes on its own
        if self
            .matches
            .remove_if(&match_id, |_, room| room.is_idle())
            .is_some()
        {
            info!(%match_id, "match evicted from memory");
        }
    }
}

/// Run the WebSocket server.
pub async fn run_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Gambit server listening on {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }

    Ok(())
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New WebSocket connection from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Assign a participant ID; a Rejoin replaces it
    let mut participant_id = ParticipantId::new_v4();

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.participant_senders.insert(participant_id, tx.clone());

    // Send welcome message
    let welcome = ServerMessage::Welcome { participant_id };
    let msg_text = serde_json::to_string(&welcome)?;
    ws_sender.send(Message::Text(msg_text.into())).await?;

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to encode outgoing message: {}", e),
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    handle_message(&mut participant_id, client_msg, &state).await;
                }
                Err(e) => {
                    warn!("Invalid message from {}: {}", participant_id, e);
                    state.send_error(participant_id, format!("Invalid message: {e}"));
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client {} closing connection", participant_id);
                break;
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", participant_id, e);
                break;
            }
            _ => {}
        }
    }

    // Only the connection that currently owns the participant cleans up
    let owned = state
        .participant_senders
        .remove_if(&participant_id, |_, sender| sender.same_channel(&tx))
        .is_some();
    if owned {
        handle_disconnect(participant_id, &state);
    }
    send_task.abort();

    info!("Connection closed for {}", participant_id);
    Ok(())
}

/// Handle a client message.
async fn handle_message(participant_id: &mut ParticipantId, msg: ClientMessage, state: &Arc<ServerState>) {
    let participant = *participant_id;
    match msg {
        ClientMessage::CreateMatch { player_name } => {
            if let Err(e) = state.create_match(participant, player_name) {
                state.send_error(participant, e);
            }
        }

        ClientMessage::JoinMatch {
            match_id,
            player_name,
        } => {
            if let Err(e) = state.join_match(participant, match_id, player_name) {
                state.send_error(participant, e);
            }
        }

        ClientMessage::Rejoin {
            match_id,
            participant_id: resumed,
        } => match state.rejoin(participant, match_id, resumed).await {
            Ok(()) => {
                info!(%match_id, connection = %participant, participant = %resumed, "participant rejoined");
                *participant_id = resumed;
            }
            Err(e) => state.send_error(participant, e),
        },

        ClientMessage::GrantRequest { entity_id } => {
            state.dispatch(participant, MatchCommand::Grant { entity_id });
        }

        ClientMessage::MoveIntent {
            from,
            to,
            promotion,
        } => {
            state.dispatch(
                participant,
                MatchCommand::Move {
                    from,
                    to,
                    promotion,
                },
            );
        }

        ClientMessage::RequestResync => state.dispatch(participant, MatchCommand::Resync),

        ClientMessage::ApplySkin { skin } => {
            state.dispatch(participant, MatchCommand::ApplySkin { skin });
        }

        ClientMessage::Resign => state.dispatch(participant, MatchCommand::Resign),

        ClientMessage::Ping => {
            state.send_to_participant(participant, ServerMessage::Pong);
        }
    }
}

/// Handle participant disconnect.
fn handle_disconnect(participant: ParticipantId, state: &Arc<ServerState>) {
    state.leave(participant);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SlowStore, SnapshotStore};
    use gambit_core::{GameOutcome, ProtocolError, Side, Snapshot};
    use std::time::Duration;

    fn state_with_store(store: Arc<dyn SnapshotStore>) -> Arc<ServerState> {
        let sync = Arc::new(SessionSynchronizer::new(store, Duration::ZERO));
        Arc::new(ServerState::new(sync))
    }

    fn connect(state: &ServerState) -> (ParticipantId, mpsc::UnboundedReceiver<ServerMessage>) {
        let participant = ParticipantId::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        state.participant_senders.insert(participant, tx);
        (participant, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn created_match(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> MatchId {
        drain(rx)
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::MatchCreated { match_id } => Some(match_id),
                _ => None,
            })
            .unwrap()
    }

    struct LiveMatch {
        state: Arc<ServerState>,
        match_id: MatchId,
        white: ParticipantId,
        black: ParticipantId,
        white_rx: mpsc::UnboundedReceiver<ServerMessage>,
        black_rx: mpsc::UnboundedReceiver<ServerMessage>,
    }

    fn live_match(store: Arc<dyn SnapshotStore>) -> LiveMatch {
        let state = state_with_store(store);
        let (white, mut white_rx) = connect(&state);
        let (black, mut black_rx) = connect(&state);
        state.create_match(white, "Alice".to_string()).unwrap();
        let match_id = created_match(&mut white_rx);
        state.join_match(black, match_id, "Bob".to_string()).unwrap();
        drain(&mut white_rx);
        drain(&mut black_rx);
        LiveMatch {
            state,
            match_id,
            white,
            black,
            white_rx,
            black_rx,
        }
    }

    fn move_command(from: &str, to: &str) -> MatchCommand {
        MatchCommand::Move {
            from: from.parse().unwrap(),
            to: to.parse().unwrap(),
            promotion: None,
        }
    }

    fn grant_and_move(state: &ServerState, participant: ParticipantId, from: &str, to: &str) {
        let match_id = *state.participant_matches.get(&participant).unwrap();
        let entity_id = state
            .matches
            .get(&match_id)
            .unwrap()
            .coordinator()
            .registry()
            .lookup(from.parse().unwrap())
            .unwrap();
        state.dispatch(participant, MatchCommand::Grant { entity_id });
        state.dispatch(participant, move_command(from, to));
    }

    fn rejections(messages: &[ServerMessage]) -> Vec<ProtocolError> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::MoveRejected { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_lobby_to_live_match() {
        let state = state_with_store(Arc::new(MemoryStore::new()));
        let (white, mut white_rx) = connect(&state);
        let (black, mut black_rx) = connect(&state);

        state.create_match(white, "Alice".to_string()).unwrap();
        let match_id = created_match(&mut white_rx);
        state.join_match(black, match_id, "Bob".to_string()).unwrap();

        assert!(state.lobbies.is_empty());
        let room = state.matches.get(&match_id).unwrap();
        assert_eq!(room.side_of(white), Some(Side::White));
        assert_eq!(room.side_of(black), Some(Side::Black));
        drop(room);

        let black_msgs = drain(&mut black_rx);
        assert!(black_msgs.iter().any(|m| matches!(
            m,
            ServerMessage::MatchStarted {
                side: Side::Black,
                ..
            }
        )));
        assert!(black_msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::FullSnapshotPush { .. })));

        assert!(matches!(
            state.join_match(ParticipantId::new_v4(), match_id, "Eve".to_string()),
            Err(RoomError::MatchAlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_cannot_join_own_match() {
        let state = state_with_store(Arc::new(MemoryStore::new()));
        let (white, mut white_rx) = connect(&state);
        state.create_match(white, "Alice".to_string()).unwrap();
        let match_id = created_match(&mut white_rx);

        assert!(matches!(
            state.join_match(white, match_id, "Alice".to_string()),
            Err(RoomError::SelfJoin)
        ));
        assert!(state.lobbies.contains_key(&match_id));
    }

    #[tokio::test]
    async fn test_second_create_match_is_refused() {
        let state = state_with_store(Arc::new(MemoryStore::new()));
        let (white, mut white_rx) = connect(&state);
        state.create_match(white, "Alice".to_string()).unwrap();
        let first = created_match(&mut white_rx);

        assert!(matches!(
            state.create_match(white, "Alice".to_string()),
            Err(RoomError::AlreadyInMatch)
        ));
        assert_eq!(state.lobbies.len(), 1);
        assert_eq!(state.participant_matches.get(&white).map(|m| *m), Some(first));
        assert!(drain(&mut white_rx).is_empty());
    }

    #[tokio::test]
    async fn test_live_player_cannot_open_a_lobby() {
        let mut m = live_match(Arc::new(MemoryStore::new()));

        assert!(matches!(
            m.state.create_match(m.white, "Alice".to_string()),
            Err(RoomError::AlreadyInMatch)
        ));
        assert!(m.state.lobbies.is_empty());

        // Disconnecting still reaches the live room
        handle_disconnect(m.white, &m.state);
        assert!(drain(&mut m.black_rx).iter().any(|msg| matches!(
            msg,
            ServerMessage::ParticipantStatus { participant_id, connected: false }
                if *participant_id == m.white
        )));
        assert!(!m.state.matches.get(&m.match_id).unwrap().is_connected(m.white));
    }

    #[tokio::test]
    async fn test_creator_cannot_join_another_match() {
        let state = state_with_store(Arc::new(MemoryStore::new()));
        let (alice, mut alice_rx) = connect(&state);
        let (bob, mut bob_rx) = connect(&state);
        state.create_match(alice, "Alice".to_string()).unwrap();
        let alices = created_match(&mut alice_rx);
        state.create_match(bob, "Bob".to_string()).unwrap();
        let bobs = created_match(&mut bob_rx);

        assert!(matches!(
            state.join_match(alice, bobs, "Alice".to_string()),
            Err(RoomError::AlreadyInMatch)
        ));
        assert!(state.lobbies.contains_key(&alices));
        assert!(state.lobbies.contains_key(&bobs));
        assert!(state.matches.is_empty());

        // Her own lobby still closes with her connection
        handle_disconnect(alice, &state);
        assert!(!state.lobbies.contains_key(&alices));
    }

    #[tokio::test]
    async fn test_finished_match_frees_the_participant() {
        let mut m = live_match(Arc::new(MemoryStore::new()));
        m.state.dispatch(m.black, MatchCommand::Resign);
        assert!(drain(&mut m.white_rx).iter().any(|msg| matches!(
            msg,
            ServerMessage::GameOver {
                outcome: GameOutcome::Resignation { winner: Side::White }
            }
        )));

        m.state.create_match(m.white, "Alice".to_string()).unwrap();
        let next = created_match(&mut m.white_rx);
        assert_eq!(m.state.participant_matches.get(&m.white).map(|id| *id), Some(next));
        assert!(!m.state.matches.get(&m.match_id).unwrap().is_connected(m.white));
    }

    #[tokio::test]
    async fn test_dispatch_routes_grant_results() {
        let mut m = live_match(Arc::new(MemoryStore::new()));

        let pawn = m
            .state
            .matches
            .get(&m.match_id)
            .unwrap()
            .coordinator()
            .registry()
            .lookup("e7".parse().unwrap())
            .unwrap();
        m.state.dispatch(m.black, MatchCommand::Grant { entity_id: pawn });

        assert!(drain(&mut m.white_rx).is_empty());
        assert!(matches!(
            drain(&mut m.black_rx).as_slice(),
            [ServerMessage::GrantResult(r)] if !r.is_granted()
        ));
    }

    #[tokio::test]
    async fn test_back_to_back_intents_see_each_others_effects() {
        let mut m = live_match(Arc::new(MemoryStore::new()));

        m.state.dispatch(m.black, move_command("e7", "e5"));
        assert_eq!(rejections(&drain(&mut m.black_rx)), vec![ProtocolError::NotYourTurn]);

        grant_and_move(&m.state, m.white, "e2", "e4");
        m.state.dispatch(m.white, move_command("e2", "e4"));
        m.state.dispatch(m.white, move_command("d2", "d4"));

        let white_msgs = drain(&mut m.white_rx);
        let applied: Vec<u32> = white_msgs
            .iter()
            .filter_map(|msg| match msg {
                ServerMessage::MoveApplied(a) => Some(a.move_number),
                _ => None,
            })
            .collect();
        assert_eq!(applied, vec![1]);
        assert_eq!(
            rejections(&white_msgs),
            vec![ProtocolError::StaleIntent, ProtocolError::NotYourTurn]
        );
        assert!(rejections(&drain(&mut m.black_rx)).is_empty());

        let room = m.state.matches.get(&m.match_id).unwrap();
        assert_eq!(room.coordinator().turn().move_number, 1);
        assert_eq!(room.coordinator().turn().side_to_move, Side::Black);
    }

    #[tokio::test]
    async fn test_evicted_match_resumes_from_store() {
        let store = Arc::new(MemoryStore::new());
        let m = live_match(store.clone());

        handle_disconnect(m.white, &m.state);
        assert!(m.state.matches.contains_key(&m.match_id));
        handle_disconnect(m.black, &m.state);
        assert!(!m.state.matches.contains_key(&m.match_id));

        wait_until(|| m.state.sync.active_persisters() == 0).await;
        assert!(!store.is_empty());

        let (connection, mut rx) = connect(&m.state);
        m.state.rejoin(connection, m.match_id, m.black).await.unwrap();

        assert!(m.state.participant_senders.contains_key(&m.black));
        assert!(!m.state.participant_senders.contains_key(&connection));
        assert!(!m.state.participant_matches.contains_key(&connection));
        let room = m.state.matches.get(&m.match_id).unwrap();
        assert!(room.is_connected(m.black));
        assert!(room.coordinator().ownership().is_empty());
        drop(room);

        let snapshot: Option<Snapshot> = drain(&mut rx).into_iter().find_map(|msg| match msg {
            ServerMessage::FullSnapshotPush { snapshot } => Some(snapshot),
            _ => None,
        });
        assert_eq!(snapshot.map(|s| s.match_id), Some(m.match_id));
    }

    #[tokio::test]
    async fn test_rejoin_during_slow_save_keeps_applied_moves() {
        let store = Arc::new(SlowStore::new(Duration::from_millis(100)));
        let mut m = live_match(store.clone());
        // Let the persister start writing the opening snapshot
        tokio::time::sleep(Duration::from_millis(20)).await;

        grant_and_move(&m.state, m.white, "e2", "e4");
        assert!(drain(&mut m.black_rx)
            .iter()
            .any(|msg| matches!(msg, ServerMessage::MoveApplied(a) if a.move_number == 1)));

        // Evicted while the opening snapshot is still being written
        handle_disconnect(m.white, &m.state);
        handle_disconnect(m.black, &m.state);
        assert!(!m.state.matches.contains_key(&m.match_id));
        assert_eq!(store.puts(), 0);

        let (connection, mut rx) = connect(&m.state);
        m.state.rejoin(connection, m.match_id, m.white).await.unwrap();
        let resumed = m
            .state
            .matches
            .get(&m.match_id)
            .unwrap()
            .coordinator()
            .turn()
            .move_number;
        assert_eq!(resumed, 1);
        assert!(drain(&mut rx).iter().any(|msg| matches!(
            msg,
            ServerMessage::FullSnapshotPush { snapshot } if snapshot.turn.move_number == 1
        )));

        // Both queued saves land through the one persister, newest last
        wait_until(|| store.puts() >= 2).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.puts(), 2);
        assert_eq!(m.state.sync.active_persisters(), 1);
        let stored = store.get(m.match_id).await.unwrap().unwrap();
        assert_eq!(Snapshot::from_bytes(&stored).unwrap().turn.move_number, 1);
    }

    #[tokio::test]
    async fn test_rejoin_from_a_busy_connection_is_refused() {
        let m = live_match(Arc::new(MemoryStore::new()));
        let (connection, mut rx) = connect(&m.state);
        m.state.create_match(connection, "Carol".to_string()).unwrap();
        let lobby = created_match(&mut rx);

        assert!(matches!(
            m.state.rejoin(connection, m.match_id, m.white).await,
            Err(RoomError::AlreadyInMatch)
        ));
        assert_eq!(m.state.participant_matches.get(&connection).map(|id| *id), Some(lobby));
        assert!(m.state.participant_senders.contains_key(&connection));
        assert!(m.state.lobbies.contains_key(&lobby));
    }

    #[tokio::test]
    async fn test_rejoin_unknown_match_fails() {
        let state = state_with_store(Arc::new(MemoryStore::new()));
        let (connection, _rx) = connect(&state);

        assert!(matches!(
            state
                .rejoin(connection, MatchId::new_v4(), ParticipantId::new_v4())
                .await,
            Err(RoomError::MatchNotFound)
        ));
        assert!(state.matches.is_empty());
    }
}
