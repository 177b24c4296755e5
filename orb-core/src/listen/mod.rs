//! Listen-along: one host broadcasts playback state to many guests through a
//! per-session in-memory hub, with KV-backed session snapshots and guest
//! tokens.
pub mod hub;
pub mod messages;

pub use hub::{GuestJoined, HubHandle, Outbound, OUTBOUND_BUFFER};
pub use messages::{
    ClientMessage, ListenSession, Participant, PlaybackState, ServerMessage, TrackInfo,
};

use crate::db::Database;
use crate::kv::{keys, ttl, KvStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Persistence operations the hub actor needs, behind a trait so hub tests
/// can run against an in-memory mock.
///
/// All operations are best-effort from the hub's point of view: failures are
/// logged by the implementation and never stall the session.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn load_session(&self, session_id: &str) -> Option<ListenSession>;
    async fn save_state(&self, session_id: &str, state: &PlaybackState);
    async fn delete_session(&self, session_id: &str);
    async fn put_guest_token(&self, token: &str, session_id: &str);
    async fn delete_guest_token(&self, token: &str);
    /// Session id a guest token authorizes, if it is still live.
    async fn guest_token_session(&self, token: &str) -> Option<String>;
    async fn resolve_track(&self, track_id: &str) -> Option<TrackInfo>;
}

/// Production backend: KV for presence, catalog for track info.
pub struct OrbSessionBackend {
    kv: KvStore,
    db: Database,
}

impl OrbSessionBackend {
    pub fn new(kv: KvStore, db: Database) -> Self {
        Self { kv, db }
    }
}

#[async_trait]
impl SessionBackend for OrbSessionBackend {
    async fn load_session(&self, session_id: &str) -> Option<ListenSession> {
        match self.kv.get_json(&keys::listen_session(session_id)).await {
            Ok(session) => session,
            Err(e) => {
                warn!("failed to load session {}: {}", session_id, e);
                None
            }
        }
    }

    async fn save_state(&self, session_id: &str, state: &PlaybackState) {
        let Some(mut session) = self.load_session(session_id).await else {
            return;
        };
        session.state = state.clone();
        if let Err(e) = self
            .kv
            .set_json(
                &keys::listen_session(session_id),
                &session,
                ttl::LISTEN_SESSION,
            )
            .await
        {
            warn!("failed to persist state for session {}: {}", session_id, e);
        }
    }

    async fn delete_session(&self, session_id: &str) {
        if let Err(e) = self.kv.delete(&keys::listen_session(session_id)).await {
            warn!("failed to delete session {}: {}", session_id, e);
        }
    }

    async fn put_guest_token(&self, token: &str, session_id: &str) {
        if let Err(e) = self
            .kv
            .set_string(&keys::listen_guest(token), session_id, ttl::GUEST_TOKEN)
            .await
        {
            warn!("failed to store guest token: {}", e);
        }
    }

    async fn delete_guest_token(&self, token: &str) {
        if let Err(e) = self.kv.delete(&keys::listen_guest(token)).await {
            warn!("failed to delete guest token: {}", e);
        }
    }

    async fn guest_token_session(&self, token: &str) -> Option<String> {
        match self.kv.get_string(&keys::listen_guest(token)).await {
            Ok(session) => session,
            Err(e) => {
                warn!("failed to look up guest token: {}", e);
                None
            }
        }
    }

    async fn resolve_track(&self, track_id: &str) -> Option<TrackInfo> {
        let id = Uuid::parse_str(track_id).ok()?;
        let track = match self.db.get_track(id).await {
            Ok(track) => track?,
            Err(e) => {
                warn!("track lookup failed for {}: {}", track_id, e);
                return None;
            }
        };

        let artist_name = match &track.artist_id {
            Some(artist_id) => self
                .db
                .get_artist(artist_id)
                .await
                .ok()
                .flatten()
                .map(|a| a.name),
            None => None,
        };

        Some(TrackInfo {
            id: track.id.to_string(),
            title: track.title,
            artist_name,
            album_id: track.album_id,
            bit_depth: track.bit_depth,
            sample_rate: track.sample_rate,
            duration_ms: track.duration_ms,
        })
    }
}

/// Process-wide map of live hubs, created lazily on first connection.
pub struct HubRegistry {
    map: Arc<Mutex<HashMap<String, HubHandle>>>,
    backend: Arc<dyn SessionBackend>,
}

impl HubRegistry {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            map: Arc::new(Mutex::new(HashMap::new())),
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<dyn SessionBackend> {
        &self.backend
    }

    /// Handle for a session's hub, spawning the actor on first use.
    pub async fn handle(&self, session_id: &str) -> HubHandle {
        let mut map = self.map.lock().await;
        if let Some(handle) = map.get(session_id) {
            return handle.clone();
        }
        let handle = hub::spawn(
            session_id.to_string(),
            Arc::clone(&self.backend),
            Arc::clone(&self.map),
        );
        map.insert(session_id.to_string(), handle.clone());
        handle
    }

    /// Live guest count without creating a hub.
    pub async fn participant_count(&self, session_id: &str) -> usize {
        let handle = {
            let map = self.map.lock().await;
            map.get(session_id).cloned()
        };
        match handle {
            Some(handle) => handle.participant_count().await,
            None => 0,
        }
    }

    /// End a session: tear down the hub if one is live, and delete the KV
    /// snapshot either way.
    pub async fn end_session(&self, session_id: &str) {
        let handle = {
            let map = self.map.lock().await;
            map.get(session_id).cloned()
        };
        match handle {
            Some(handle) => handle.end().await,
            None => self.backend.delete_session(session_id).await,
        }
    }

    /// True while a hub task is registered for this id.
    pub async fn is_live(&self, session_id: &str) -> bool {
        self.map.lock().await.contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    /// In-memory backend that records every mutation.
    #[derive(Default)]
    struct MockBackend {
        sessions: StdMutex<HashMap<String, ListenSession>>,
        guest_tokens: StdMutex<HashMap<String, String>>,
        tracks: StdMutex<HashMap<String, TrackInfo>>,
        resolve_calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionBackend for MockBackend {
        async fn load_session(&self, session_id: &str) -> Option<ListenSession> {
            self.sessions.lock().unwrap().get(session_id).cloned()
        }

        async fn save_state(&self, session_id: &str, state: &PlaybackState) {
            if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
                session.state = state.clone();
            }
        }

        async fn delete_session(&self, session_id: &str) {
            self.sessions.lock().unwrap().remove(session_id);
        }

        async fn put_guest_token(&self, token: &str, session_id: &str) {
            self.guest_tokens
                .lock()
                .unwrap()
                .insert(token.to_string(), session_id.to_string());
        }

        async fn delete_guest_token(&self, token: &str) {
            self.guest_tokens.lock().unwrap().remove(token);
        }

        async fn guest_token_session(&self, token: &str) -> Option<String> {
            self.guest_tokens.lock().unwrap().get(token).cloned()
        }

        async fn resolve_track(&self, track_id: &str) -> Option<TrackInfo> {
            self.resolve_calls
                .lock()
                .unwrap()
                .push(track_id.to_string());
            self.tracks.lock().unwrap().get(track_id).cloned()
        }
    }

    fn track_info(id: &str) -> TrackInfo {
        TrackInfo {
            id: id.to_string(),
            title: "So What".to_string(),
            artist_name: Some("Miles Davis".to_string()),
            album_id: Some("aabb".to_string()),
            bit_depth: Some(24),
            sample_rate: 96_000,
            duration_ms: 300_000,
        }
    }

    fn registry_with(backend: Arc<MockBackend>) -> HubRegistry {
        HubRegistry::new(backend)
    }

    fn conn() -> (hub::ConnTx, mpsc::Receiver<Outbound>) {
        mpsc::channel(OUTBOUND_BUFFER)
    }

    async fn recv_msg(rx: &mut mpsc::Receiver<Outbound>) -> ServerMessage {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
        {
            Outbound::Message(msg) => msg,
            Outbound::Close => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn sync_fans_out_to_every_guest_in_order() {
        let backend = Arc::new(MockBackend::default());
        backend
            .tracks
            .lock()
            .unwrap()
            .insert("T".to_string(), track_info("T"));
        let registry = registry_with(backend.clone());

        let handle = registry.handle("s1").await;
        let (host_tx, _host_rx) = conn();
        handle.attach_host(host_tx).await.unwrap();

        let (alice_tx, mut alice_rx) = conn();
        handle.join_guest("Alice".to_string(), alice_tx).await.unwrap();
        let (bob_tx, mut bob_rx) = conn();
        handle.join_guest("Bob".to_string(), bob_tx).await.unwrap();

        // Alice sees Bob arrive.
        match recv_msg(&mut alice_rx).await {
            ServerMessage::ParticipantJoined { participant } => {
                assert_eq!(participant.nickname, "Bob");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        for position in [1000i64, 2000, 3000] {
            handle
                .host_sync(PlaybackState {
                    track_id: "T".to_string(),
                    position_ms: position,
                    playing: true,
                    server_time_ms: 0,
                })
                .await;
        }

        for rx in [&mut alice_rx, &mut bob_rx] {
            for expected in [1000i64, 2000, 3000] {
                match recv_msg(rx).await {
                    ServerMessage::Sync { state, track_info } => {
                        assert_eq!(state.position_ms, expected);
                        assert!(state.server_time_ms > 0, "server time must be stamped");
                        assert_eq!(track_info.unwrap().id, "T");
                    }
                    other => panic!("unexpected message: {:?}", other),
                }
            }
        }

        // Track info resolved once despite three syncs.
        assert_eq!(backend.resolve_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn kick_notifies_closes_and_revokes_token() {
        let backend = Arc::new(MockBackend::default());
        let registry = registry_with(backend.clone());

        let handle = registry.handle("s1").await;
        let (host_tx, mut host_rx) = conn();
        handle.attach_host(host_tx).await.unwrap();

        let (alice_tx, mut alice_rx) = conn();
        handle.join_guest("Alice".to_string(), alice_tx).await.unwrap();
        let (bob_tx, mut bob_rx) = conn();
        let bob = handle.join_guest("Bob".to_string(), bob_tx).await.unwrap();

        // Drain the join notifications.
        let _ = recv_msg(&mut host_rx).await;
        let _ = recv_msg(&mut host_rx).await;
        let _ = recv_msg(&mut alice_rx).await;

        assert!(backend
            .guest_tokens
            .lock()
            .unwrap()
            .contains_key(&bob.guest_token));

        assert!(handle.kick(bob.participant_id.clone()).await);
        // Kicking an unknown participant is a no-op.
        assert!(!handle.kick("nobody".to_string()).await);

        match recv_msg(&mut bob_rx).await {
            ServerMessage::Kicked => {}
            other => panic!("expected kicked, got {:?}", other),
        }

        // Bob's socket is closed shortly after the flush delay.
        match tokio::time::timeout(Duration::from_secs(1), bob_rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            Outbound::Close => {}
            other => panic!("expected close, got {:?}", other),
        }

        // Host and Alice both learn Bob left.
        for rx in [&mut host_rx, &mut alice_rx] {
            match recv_msg(rx).await {
                ServerMessage::ParticipantLeft { participant } => {
                    assert_eq!(participant.participant_id, bob.participant_id);
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }

        // Bob's guest token is gone.
        assert!(!backend
            .guest_tokens
            .lock()
            .unwrap()
            .contains_key(&bob.guest_token));
    }

    #[tokio::test]
    async fn host_disconnect_tears_everything_down() {
        let backend = Arc::new(MockBackend::default());
        backend.sessions.lock().unwrap().insert(
            "s1".to_string(),
            ListenSession::new("s1".to_string(), Uuid::new_v4(), "Host".to_string()),
        );
        let registry = registry_with(backend.clone());

        let handle = registry.handle("s1").await;
        assert!(registry.is_live("s1").await);

        let (host_tx, _host_rx) = conn();
        handle.attach_host(host_tx).await.unwrap();

        let (alice_tx, mut alice_rx) = conn();
        handle.join_guest("Alice".to_string(), alice_tx).await.unwrap();
        let (bob_tx, mut bob_rx) = conn();
        handle.join_guest("Bob".to_string(), bob_tx).await.unwrap();
        let _ = recv_msg(&mut alice_rx).await; // Bob's join

        handle.host_closed().await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            match recv_msg(rx).await {
                ServerMessage::SessionEnded => {}
                other => panic!("expected session_ended, got {:?}", other),
            }
            match tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap()
            {
                Outbound::Close => {}
                other => panic!("expected close, got {:?}", other),
            }
        }

        // Give the actor a turn to finish its cleanup.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(backend.guest_tokens.lock().unwrap().is_empty());
        assert!(backend.sessions.lock().unwrap().is_empty());
        assert!(!registry.is_live("s1").await);
    }

    #[tokio::test]
    async fn slow_guest_drops_messages_but_stays_ordered() {
        let backend = Arc::new(MockBackend::default());
        let registry = registry_with(backend.clone());
        let handle = registry.handle("s1").await;

        let (guest_tx, mut guest_rx) = conn();
        handle.join_guest("Slow".to_string(), guest_tx).await.unwrap();

        // Overrun the buffer: only the first OUTBOUND_BUFFER syncs fit.
        let total = OUTBOUND_BUFFER + 20;
        for position in 0..total {
            handle
                .host_sync(PlaybackState {
                    track_id: String::new(),
                    position_ms: position as i64,
                    playing: true,
                    server_time_ms: 0,
                })
                .await;
        }

        let mut last = -1i64;
        let mut received = 0usize;
        while let Ok(Some(Outbound::Message(ServerMessage::Sync { state, .. }))) =
            tokio::time::timeout(Duration::from_millis(100), guest_rx.recv()).await
        {
            assert!(
                state.position_ms > last,
                "messages must arrive in send order"
            );
            last = state.position_ms;
            received += 1;
        }

        assert!(received <= OUTBOUND_BUFFER, "buffer overrun must drop");
        assert!(received > 0);
    }

    #[tokio::test]
    async fn end_session_without_hub_deletes_snapshot() {
        let backend = Arc::new(MockBackend::default());
        backend.sessions.lock().unwrap().insert(
            "s9".to_string(),
            ListenSession::new("s9".to_string(), Uuid::new_v4(), "Host".to_string()),
        );
        let registry = registry_with(backend.clone());

        registry.end_session("s9").await;
        assert!(backend.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn registry_reuses_live_hub() {
        let backend = Arc::new(MockBackend::default());
        let registry = registry_with(backend);

        let a = registry.handle("s1").await;
        let (guest_tx, _guest_rx) = conn();
        a.join_guest("Alice".to_string(), guest_tx).await.unwrap();

        // Second lookup must reach the same actor.
        assert_eq!(registry.participant_count("s1").await, 1);
        assert_eq!(registry.participant_count("s2").await, 0);
    }
}
