//! Listen-along session REST surface and the WebSocket endpoint.
use super::{auth, stream, ApiError, AppState};
use crate::kv::{keys, ttl};
use crate::listen::hub::{ConnTx, Outbound, OUTBOUND_BUFFER};
use crate::listen::messages::{
    validate_nickname, ClientMessage, ListenSession, ServerMessage,
};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Read deadline; refreshed by any inbound frame, including pongs.
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Per-frame write deadline.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Protocol-level ping cadence, comfortably inside the read deadline.
const PING_INTERVAL: Duration = Duration::from_secs(54);
/// Largest accepted inbound text frame.
const MAX_FRAME_BYTES: usize = 4 * 1024;

/// WebSocket close code for a protocol violation (RFC 6455).
const CLOSE_PROTOCOL_ERROR: u16 = 1002;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Reuse an existing session id instead of minting a new one.
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub host_name: String,
    pub participants: usize,
    pub created_at: DateTime<Utc>,
}

async fn session_info_of(state: &AppState, session: &ListenSession) -> SessionInfo {
    SessionInfo {
        id: session.id.clone(),
        host_name: session.host_name.clone(),
        participants: state.hubs.participant_count(&session.id).await,
        created_at: session.created_at,
    }
}

/// `POST /listen` — authenticated host creates (or re-claims) a session.
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<Json<SessionInfo>, ApiError> {
    let user_id = auth::authenticate(&state, &headers, &query).await?;
    let user = state
        .db
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("unknown user".to_string()))?;

    let requested = body
        .and_then(|b| b.0.session_id)
        .filter(|id| !id.trim().is_empty());

    // At most one active session per id: creating with a live id reuses it.
    if let Some(id) = &requested {
        if let Some(existing) = state.hubs.backend().load_session(id).await {
            if existing.host_id != user_id {
                return Err(ApiError::Forbidden(
                    "session belongs to another host".to_string(),
                ));
            }
            return Ok(Json(session_info_of(&state, &existing).await));
        }
    }

    let id = requested.unwrap_or_else(|| Uuid::new_v4().to_string());
    let session = ListenSession::new(id.clone(), user_id, user.username);
    state
        .kv
        .set_json(&keys::listen_session(&id), &session, ttl::LISTEN_SESSION)
        .await?;

    info!("user {} created listen session {}", session.host_name, id);
    Ok(Json(session_info_of(&state, &session).await))
}

/// `GET /listen/{id}` — public session info.
pub async fn session_info(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    let session = state
        .hubs
        .backend()
        .load_session(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound("session not found".to_string()))?;
    Ok(Json(session_info_of(&state, &session).await))
}

/// `DELETE /listen/{id}` — only the host may end a session.
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = auth::authenticate(&state, &headers, &query).await?;
    let session = state
        .hubs
        .backend()
        .load_session(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound("session not found".to_string()))?;
    if session.host_id != user_id {
        return Err(ApiError::Forbidden("only the host can end a session".to_string()));
    }

    state.hubs.end_session(&session_id).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

enum Role {
    Host,
    Guest,
}

/// `GET /listen/{id}/ws` — upgrade to the session message stream.
///
/// A caller whose token resolves to the session host connects as host;
/// everyone else is a guest and must open with a `join` frame.
pub async fn ws_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session = state
        .hubs
        .backend()
        .load_session(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound("session not found".to_string()))?;

    let role = match auth::authenticate(&state, &headers, &query).await {
        Ok(user_id) if user_id == session.host_id => Role::Host,
        _ => Role::Guest,
    };

    Ok(ws.on_upgrade(move |socket| async move {
        match role {
            Role::Host => host_session(state, session, socket).await,
            Role::Guest => guest_session(state, session, socket).await,
        }
    }))
}

async fn host_session(state: AppState, session: ListenSession, socket: WebSocket) {
    let hub = state.hubs.handle(&session.id).await;

    let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
    let Some(participants) = hub.attach_host(outbound_tx.clone()).await else {
        return;
    };

    queue(&outbound_tx, ServerMessage::Joined {
        role: "host",
        session_id: session.id.clone(),
        participant_id: None,
        guest_token: None,
        current_state: None,
        track_info: None,
    });
    queue(&outbound_tx, ServerMessage::Participants { participants });

    let (sink, mut ws_rx) = socket.split();
    tokio::spawn(write_loop(sink, outbound_rx));

    loop {
        let frame = tokio::time::timeout(READ_DEADLINE, ws_rx.next()).await;
        match frame {
            Err(_) | Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(Message::Text(text)))) => {
                if text.len() > MAX_FRAME_BYTES {
                    break;
                }
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::SyncState { state }) => hub.host_sync(state).await,
                    Ok(ClientMessage::Kick { participant_id }) => {
                        hub.kick(participant_id).await;
                    }
                    Ok(ClientMessage::Ping) => {}
                    Ok(ClientMessage::Join { .. }) => {
                        debug!("ignoring join frame from host");
                    }
                    Err(e) => debug!("unparseable host frame: {}", e),
                }
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            // Pings/pongs refresh the deadline by arriving at all.
            Ok(Some(Ok(_))) => {}
        }
    }

    info!("host disconnected from session {}", session.id);
    hub.host_closed().await;
}

async fn guest_session(state: AppState, session: ListenSession, mut socket: WebSocket) {
    // The first frame MUST be a valid join.
    let first = tokio::time::timeout(READ_DEADLINE, socket.recv()).await;
    let nickname = match first {
        Ok(Some(Ok(Message::Text(text)))) if text.len() <= MAX_FRAME_BYTES => {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Join { nickname }) => match validate_nickname(&nickname) {
                    Some(nickname) => nickname,
                    None => return close_protocol_error(socket).await,
                },
                _ => return close_protocol_error(socket).await,
            }
        }
        _ => return close_protocol_error(socket).await,
    };

    let hub = state.hubs.handle(&session.id).await;

    let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
    let Some(joined) = hub.join_guest(nickname, outbound_tx.clone()).await else {
        return close_protocol_error(socket).await;
    };

    queue(&outbound_tx, ServerMessage::Joined {
        role: "guest",
        session_id: session.id.clone(),
        participant_id: Some(joined.participant_id.clone()),
        guest_token: Some(joined.guest_token.clone()),
        current_state: Some(joined.current_state.clone()),
        track_info: joined.track_info.clone(),
    });
    queue(&outbound_tx, ServerMessage::Participants {
        participants: joined.participants.clone(),
    });

    let (sink, mut ws_rx) = socket.split();
    tokio::spawn(write_loop(sink, outbound_rx));

    loop {
        let frame = tokio::time::timeout(READ_DEADLINE, ws_rx.next()).await;
        match frame {
            Err(_) | Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(Message::Text(text)))) => {
                if text.len() > MAX_FRAME_BYTES {
                    break;
                }
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Ping) => {}
                    // Guests have nothing else to say; stray frames are noise.
                    _ => debug!("ignoring guest frame"),
                }
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(_))) => {}
        }
    }

    debug!("guest {} disconnected", joined.participant_id);
    hub.guest_closed(joined.participant_id).await;
}

fn queue(tx: &ConnTx, msg: ServerMessage) {
    let _ = tx.try_send(Outbound::Message(msg));
}

async fn close_protocol_error(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_PROTOCOL_ERROR,
            reason: "protocol error".into(),
        })))
        .await;
}

/// Writer task for one connection: serializes outbound messages, enforces
/// the write deadline, and keeps the socket alive with periodic pings.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
) {
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + PING_INTERVAL,
        PING_INTERVAL,
    );
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Message(msg)) => {
                    let Ok(text) = serde_json::to_string(&msg) else {
                        continue;
                    };
                    match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Text(text))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
}

// ----------------------------------------------------------------------
// Guest-authorized asset access
// ----------------------------------------------------------------------

/// Check that a guest token is live and bound to this session.
async fn authorize_guest(
    state: &AppState,
    session_id: &str,
    query: &HashMap<String, String>,
) -> Result<(), ApiError> {
    let token = query
        .get("guest_token")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing guest token".to_string()))?;

    let bound = state
        .hubs
        .backend()
        .guest_token_session(token)
        .await
        .ok_or_else(|| ApiError::Forbidden("invalid guest token".to_string()))?;

    if bound != session_id {
        return Err(ApiError::Forbidden(
            "guest token belongs to another session".to_string(),
        ));
    }
    Ok(())
}

/// `GET /listen/{id}/stream/{track_id}?guest_token=…`
pub async fn guest_stream(
    State(state): State<AppState>,
    Path((session_id, track_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    authorize_guest(&state, &session_id, &query).await?;
    let meta = stream::resolve_meta(&state, track_id).await?;
    stream::serve_ranged(state.storage.as_ref(), &meta, stream::range_header(&headers)).await
}

/// `GET /listen/{id}/cover/{album_id}?guest_token=…`
pub async fn guest_cover(
    State(state): State<AppState>,
    Path((session_id, album_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    authorize_guest(&state, &session_id, &query).await?;
    super::covers::album_cover(State(state), Path(album_id)).await
}
