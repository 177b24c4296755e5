//! Per-session fan-out actor.
//!
//! One task owns all mutable session state: the host connection, the guest
//! map, and the track-info cache. Everything else talks to it through
//! commands, so there is no lock ordering to get wrong. Outbound sends are
//! non-blocking: a guest whose buffer is full misses the message instead of
//! stalling the host.
use super::messages::{Participant, PlaybackState, ServerMessage, TrackInfo};
use super::SessionBackend;
use crate::util::now_ms;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-connection outbound buffer. A full buffer drops messages for that
/// client only.
pub const OUTBOUND_BUFFER: usize = 64;

/// Delay between sending `kicked` and closing the socket, so the frame has a
/// chance to flush.
pub const KICK_FLUSH_DELAY: Duration = Duration::from_millis(500);

/// Deadline for the catalog lookup behind `track_info`.
pub const TRACK_INFO_TIMEOUT: Duration = Duration::from_secs(3);

/// What the writer task receives for one connection.
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

pub type ConnTx = mpsc::Sender<Outbound>;

/// Reply to a successful guest join.
#[derive(Debug)]
pub struct GuestJoined {
    pub participant_id: String,
    pub guest_token: String,
    pub participants: Vec<Participant>,
    /// Snapshot the guest starts from.
    pub current_state: PlaybackState,
    pub track_info: Option<TrackInfo>,
}

enum HubCommand {
    AttachHost {
        tx: ConnTx,
        reply: oneshot::Sender<Vec<Participant>>,
    },
    JoinGuest {
        nickname: String,
        tx: ConnTx,
        reply: oneshot::Sender<GuestJoined>,
    },
    GuestClosed {
        participant_id: String,
    },
    HostSync {
        state: PlaybackState,
    },
    Kick {
        participant_id: String,
        reply: oneshot::Sender<bool>,
    },
    HostClosed,
    End,
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Cheap clonable handle to a session's actor.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn attach_host(&self, tx: ConnTx) -> Option<Vec<Participant>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(HubCommand::AttachHost { tx, reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn join_guest(&self, nickname: String, tx: ConnTx) -> Option<GuestJoined> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::JoinGuest { nickname, tx, reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn guest_closed(&self, participant_id: String) {
        let _ = self.tx.send(HubCommand::GuestClosed { participant_id }).await;
    }

    pub async fn host_sync(&self, state: PlaybackState) {
        let _ = self.tx.send(HubCommand::HostSync { state }).await;
    }

    pub async fn kick(&self, participant_id: String) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HubCommand::Kick { participant_id, reply })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn host_closed(&self) {
        let _ = self.tx.send(HubCommand::HostClosed).await;
    }

    pub async fn end(&self) {
        let _ = self.tx.send(HubCommand::End).await;
    }

    pub async fn participant_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HubCommand::Count { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

struct GuestConn {
    nickname: String,
    token: String,
    tx: ConnTx,
}

struct HubActor {
    session_id: String,
    backend: Arc<dyn SessionBackend>,
    registry: Arc<Mutex<HashMap<String, HubHandle>>>,
    host: Option<ConnTx>,
    guests: HashMap<String, GuestConn>,
    /// One catalog lookup per distinct track id for the session's lifetime.
    track_info: HashMap<String, Option<TrackInfo>>,
    /// Last state the host pushed through this hub, if any.
    last_state: Option<PlaybackState>,
}

/// Spawn the actor for a session and return its handle.
pub(super) fn spawn(
    session_id: String,
    backend: Arc<dyn SessionBackend>,
    registry: Arc<Mutex<HashMap<String, HubHandle>>>,
) -> HubHandle {
    let (tx, rx) = mpsc::channel(64);
    let actor = HubActor {
        session_id,
        backend,
        registry,
        host: None,
        guests: HashMap::new(),
        track_info: HashMap::new(),
        last_state: None,
    };
    tokio::spawn(actor.run(rx));
    HubHandle { tx }
}

impl HubActor {
    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        debug!("hub actor started for session {}", self.session_id);
        while let Some(cmd) = rx.recv().await {
            match cmd {
                HubCommand::AttachHost { tx, reply } => {
                    self.host = Some(tx);
                    let _ = reply.send(self.participants());
                }
                HubCommand::JoinGuest { nickname, tx, reply } => {
                    let joined = self.join_guest(nickname, tx).await;
                    let _ = reply.send(joined);
                }
                HubCommand::GuestClosed { participant_id } => {
                    self.remove_guest(&participant_id).await;
                }
                HubCommand::HostSync { state } => {
                    self.host_sync(state).await;
                }
                HubCommand::Kick { participant_id, reply } => {
                    let kicked = self.kick(&participant_id).await;
                    let _ = reply.send(kicked);
                }
                HubCommand::HostClosed | HubCommand::End => {
                    self.shutdown().await;
                    break;
                }
                HubCommand::Count { reply } => {
                    let _ = reply.send(self.guests.len());
                }
            }
        }
        debug!("hub actor stopped for session {}", self.session_id);
    }

    fn participants(&self) -> Vec<Participant> {
        let mut list: Vec<Participant> = self
            .guests
            .iter()
            .map(|(id, conn)| Participant {
                participant_id: id.clone(),
                nickname: conn.nickname.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        list
    }

    /// Non-blocking send; a slow client misses the message.
    fn try_send(tx: &ConnTx, msg: ServerMessage) {
        if tx.try_send(Outbound::Message(msg)).is_err() {
            debug!("dropping message for slow or closed connection");
        }
    }

    fn broadcast(&self, msg: &ServerMessage, except: Option<&str>) {
        if let Some(host) = &self.host {
            Self::try_send(host, msg.clone());
        }
        for (id, guest) in &self.guests {
            if except == Some(id.as_str()) {
                continue;
            }
            Self::try_send(&guest.tx, msg.clone());
        }
    }

    async fn join_guest(&mut self, nickname: String, tx: ConnTx) -> GuestJoined {
        let participant_id = Uuid::new_v4().to_string();
        let guest_token = Uuid::new_v4().to_string();

        self.backend
            .put_guest_token(&guest_token, &self.session_id)
            .await;

        // State the newcomer starts from: what the host last pushed, or the
        // persisted snapshot for a hub that has not seen a sync yet.
        let current_state = match &self.last_state {
            Some(state) => state.clone(),
            None => self
                .backend
                .load_session(&self.session_id)
                .await
                .map(|s| s.state)
                .unwrap_or_default(),
        };
        let track_info = self.resolve_track_info(&current_state.track_id).await;

        let participant = Participant {
            participant_id: participant_id.clone(),
            nickname: nickname.clone(),
        };
        self.guests.insert(
            participant_id.clone(),
            GuestConn {
                nickname,
                token: guest_token.clone(),
                tx,
            },
        );

        self.broadcast(
            &ServerMessage::ParticipantJoined { participant },
            Some(&participant_id),
        );

        info!(
            "guest {} joined session {} ({} guests)",
            participant_id,
            self.session_id,
            self.guests.len()
        );

        GuestJoined {
            participant_id,
            guest_token,
            participants: self.participants(),
            current_state,
            track_info,
        }
    }

    async fn remove_guest(&mut self, participant_id: &str) {
        let Some(conn) = self.guests.remove(participant_id) else {
            return;
        };
        self.backend.delete_guest_token(&conn.token).await;
        self.broadcast(
            &ServerMessage::ParticipantLeft {
                participant: Participant {
                    participant_id: participant_id.to_string(),
                    nickname: conn.nickname,
                },
            },
            None,
        );
    }

    async fn host_sync(&mut self, mut state: PlaybackState) {
        state.server_time_ms = now_ms();
        self.backend.save_state(&self.session_id, &state).await;

        let track_info = self.resolve_track_info(&state.track_id).await;
        self.last_state = Some(state.clone());
        let msg = ServerMessage::Sync { state, track_info };
        for guest in self.guests.values() {
            Self::try_send(&guest.tx, msg.clone());
        }
    }

    /// Resolve track info once per distinct id, under a hard deadline. On
    /// timeout or error the info is simply omitted.
    async fn resolve_track_info(&mut self, track_id: &str) -> Option<TrackInfo> {
        if track_id.is_empty() {
            return None;
        }
        if let Some(cached) = self.track_info.get(track_id) {
            return cached.clone();
        }
        let resolved =
            match tokio::time::timeout(TRACK_INFO_TIMEOUT, self.backend.resolve_track(track_id))
                .await
            {
                Ok(info) => info,
                Err(_) => {
                    warn!("track info lookup timed out for {}", track_id);
                    None
                }
            };
        self.track_info.insert(track_id.to_string(), resolved.clone());
        resolved
    }

    async fn kick(&mut self, participant_id: &str) -> bool {
        let Some(conn) = self.guests.remove(participant_id) else {
            return false;
        };

        self.backend.delete_guest_token(&conn.token).await;
        Self::try_send(&conn.tx, ServerMessage::Kicked);

        // Close after a short flush delay so the frame gets out first.
        let tx = conn.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(KICK_FLUSH_DELAY).await;
            let _ = tx.send(Outbound::Close).await;
        });

        self.broadcast(
            &ServerMessage::ParticipantLeft {
                participant: Participant {
                    participant_id: participant_id.to_string(),
                    nickname: conn.nickname,
                },
            },
            None,
        );

        info!(
            "kicked {} from session {}",
            participant_id, self.session_id
        );
        true
    }

    /// Host disconnect or explicit end: notify everyone, revoke tokens,
    /// delete the KV snapshot, drop out of the registry.
    async fn shutdown(&mut self) {
        info!("shutting down session {}", self.session_id);

        let guests: Vec<GuestConn> = self.guests.drain().map(|(_, conn)| conn).collect();
        for conn in guests {
            Self::try_send(&conn.tx, ServerMessage::SessionEnded);
            let _ = conn.tx.try_send(Outbound::Close);
            self.backend.delete_guest_token(&conn.token).await;
        }

        if let Some(host) = self.host.take() {
            let _ = host.try_send(Outbound::Close);
        }

        self.backend.delete_session(&self.session_id).await;
        self.registry.lock().await.remove(&self.session_id);
    }
}
