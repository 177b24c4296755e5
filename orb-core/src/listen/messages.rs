//! Listen-along wire protocol (JSON text frames).
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest accepted guest nickname, in characters.
pub const MAX_NICKNAME_CHARS: usize = 32;

/// Authoritative playback snapshot.
///
/// `server_time_ms` is stamped by the server on every persisted sync; guests
/// add `(now - server_time_ms)` to `position_ms` while playing to compensate
/// for propagation latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub track_id: String,
    pub position_ms: i64,
    pub playing: bool,
    #[serde(default)]
    pub server_time_ms: i64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            track_id: String::new(),
            position_ms: 0,
            playing: false,
            server_time_ms: 0,
        }
    }
}

/// Catalog data guests need to render the host's current track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    pub artist_name: Option<String>,
    pub album_id: Option<String>,
    pub bit_depth: Option<i32>,
    pub sample_rate: i32,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub nickname: String,
}

/// The KV snapshot under `listen_session:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenSession {
    pub id: String,
    pub host_id: Uuid,
    pub host_name: String,
    pub created_at: DateTime<Utc>,
    pub state: PlaybackState,
}

impl ListenSession {
    pub fn new(id: String, host_id: Uuid, host_name: String) -> Self {
        Self {
            id,
            host_id,
            host_name,
            created_at: Utc::now(),
            state: PlaybackState::default(),
        }
    }
}

/// Frames the server accepts.
///
/// `join` is guest-only and MUST be a guest's first frame; `sync_state` and
/// `kick` are host-only. `ping` is accepted from either side as liveness.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SyncState { state: PlaybackState },
    Kick { participant_id: String },
    Join { nickname: String },
    Ping,
}

/// Frames the server emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined {
        role: &'static str,
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        participant_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        guest_token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_state: Option<PlaybackState>,
        #[serde(skip_serializing_if = "Option::is_none")]
        track_info: Option<TrackInfo>,
    },
    Participants {
        participants: Vec<Participant>,
    },
    ParticipantJoined {
        participant: Participant,
    },
    ParticipantLeft {
        participant: Participant,
    },
    Sync {
        state: PlaybackState,
        #[serde(skip_serializing_if = "Option::is_none")]
        track_info: Option<TrackInfo>,
    },
    Kicked,
    SessionEnded,
}

/// Trim and validate a guest nickname: 1..=32 characters after trimming.
pub fn validate_nickname(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let chars = trimmed.chars().count();
    if chars == 0 || chars > MAX_NICKNAME_CHARS {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_parsed() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join","nickname":" Alice "}"#).unwrap();
        match msg {
            ClientMessage::Join { nickname } => assert_eq!(nickname, " Alice "),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn sync_state_without_server_time() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"sync_state","state":{"track_id":"T","position_ms":1500,"playing":true}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::SyncState { state } => {
                assert_eq!(state.track_id, "T");
                assert_eq!(state.position_ms, 1500);
                assert!(state.playing);
                assert_eq!(state.server_time_ms, 0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"teleport"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn server_messages_tag_correctly() {
        let json = serde_json::to_string(&ServerMessage::Kicked).unwrap();
        assert_eq!(json, r#"{"type":"kicked"}"#);

        let json = serde_json::to_string(&ServerMessage::SessionEnded).unwrap();
        assert_eq!(json, r#"{"type":"session_ended"}"#);

        let json = serde_json::to_string(&ServerMessage::Sync {
            state: PlaybackState {
                track_id: "T".into(),
                position_ms: 1500,
                playing: true,
                server_time_ms: 42,
            },
            track_info: None,
        })
        .unwrap();
        assert!(json.contains(r#""type":"sync""#));
        assert!(!json.contains("track_info"));
    }

    #[test]
    fn joined_omits_empty_fields() {
        let json = serde_json::to_string(&ServerMessage::Joined {
            role: "host",
            session_id: "s1".into(),
            participant_id: None,
            guest_token: None,
            current_state: None,
            track_info: None,
        })
        .unwrap();
        assert!(json.contains(r#""role":"host""#));
        assert!(!json.contains("guest_token"));
    }

    #[test]
    fn nickname_validation() {
        assert_eq!(validate_nickname(" Alice "), Some("Alice".to_string()));
        assert_eq!(validate_nickname(""), None);
        assert_eq!(validate_nickname("   "), None);
        assert_eq!(validate_nickname(&"x".repeat(32)), Some("x".repeat(32)));
        assert_eq!(validate_nickname(&"x".repeat(33)), None);
        // Characters, not bytes
        assert!(validate_nickname(&"ü".repeat(32)).is_some());
    }
}
