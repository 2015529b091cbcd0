use crate::{
    config::Config,
    history::{self, History},
    housekeeping,
    presence::{PresenceRegistry, Touch},
    simulate,
    typing::TypingTracker,
};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::{stream, Stream, StreamExt};
use portal_protocol::{
    now_millis, Activity, ControlRequest, ControlResponse, Identity, Message, PresenceEntry,
    Status, StreamEvent, UserRef,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub presence: Arc<PresenceRegistry>,
    pub history: Arc<History>,
    pub typing: Arc<TypingTracker>,
    pub event_tx: broadcast::Sender<StreamEvent>,
    pub config: Config,
    /// Cancelled on shutdown; ends open streams and background tasks.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        let history = History::new(config.history.capacity);
        if let Some(text) = &config.history.welcome {
            history.append(history::welcome_message(text));
        }
        let presence = PresenceRegistry::new(
            config.presence.offline_debounce,
            config.presence.heartbeat_timeout,
        );
        if config.demo.enabled {
            presence.seed_demo(config.demo.members.iter().map(|name| demo_identity(name)));
        }
        Self {
            presence: Arc::new(presence),
            history: Arc::new(history),
            typing: Arc::new(TypingTracker::new(config.presence.typing_debounce)),
            event_tx: tx,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Snapshot sent first on every stream: presence plus the newest page
    /// of history.
    pub fn init_event(&self) -> StreamEvent {
        StreamEvent::Init {
            messages: self.history.before(None, self.config.history.init_page),
            users: self.presence.snapshot(),
        }
    }

    pub fn publish(&self, event: StreamEvent) {
        // no subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    pub fn publish_presence(&self) {
        self.publish(StreamEvent::UsersUpdate(self.presence.snapshot()));
    }
}

fn demo_identity(name: &str) -> Identity {
    Identity::new(format!("demo-{}", name.to_lowercase()), name)
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", get(stream_events).post(control))
        .route("/api/chat/history", get(history))
        .route("/api/chat/users", get(users))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResp>);

fn err(status: StatusCode, msg: &str) -> ApiError {
    (status, Json(ErrorResp { error: msg.into() }))
}

fn ok() -> Json<ControlResponse> {
    Json(ControlResponse {
        ok: true,
        message: None,
    })
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, serde_json::Error>>> {
    // subscribe before the snapshot so nothing published in between is lost
    let rx = state.event_tx.subscribe();
    let init = state.init_event();
    debug!(subscribers = state.event_tx.receiver_count(), "stream opened");
    let shutdown = state.shutdown.clone();
    let updates = BroadcastStream::new(rx).filter_map(move |res| {
        let state = state.clone();
        async move {
            match res {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "stream lagged, resending snapshot");
                    Some(state.init_event())
                }
            }
        }
    });
    let events = stream::once(async move { init })
        .chain(updates)
        .take_until(async move { shutdown.cancelled().await })
        .map(|ev| Event::default().event(ev.kind()).json_data(&ev));
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn control(
    State(state): State<AppState>,
    Json(req): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    match req {
        ControlRequest::UserOnline(identity) => {
            if identity.id.trim().is_empty() {
                return Err(err(StatusCode::BAD_REQUEST, "invalid_identity"));
            }
            let id = identity.id.clone();
            if state.presence.connect(identity) {
                info!(user = %id, "user online");
                state.publish_presence();
            }
            Ok(ok())
        }
        ControlRequest::UserOffline(UserRef { id }) => {
            let state = state.clone();
            tokio::spawn(async move {
                if state.presence.disconnect(&id).await {
                    info!(user = %id, "user offline");
                    state.typing.clear(&id);
                    state.publish_presence();
                }
            });
            Ok(ok())
        }
        ControlRequest::SendMessage(out) => {
            let content = out.content.trim();
            if content.is_empty() {
                return Err(err(StatusCode::BAD_REQUEST, "empty_message"));
            }
            if content.chars().count() > state.config.max_message_len {
                return Err(err(StatusCode::BAD_REQUEST, "message_too_long"));
            }
            let message = Message {
                id: out
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                content: content.to_string(),
                sender: out.sender,
                timestamp: now_millis(),
            };
            // sending ends typing and counts as a heartbeat
            state.typing.clear(&message.sender.id);
            if state.presence.touch(&message.sender.id, Some(Status::Online)) == Touch::Changed {
                state.publish_presence();
            }
            state.history.append(message.clone());
            debug!(id = %message.id, sender = %message.sender.id, "message accepted");
            state.publish(StreamEvent::Message(message.clone()));
            Ok(Json(ControlResponse {
                ok: true,
                message: Some(message),
            }))
        }
        ControlRequest::UserActivity(Activity { id, status }) => {
            match state.presence.touch(&id, status) {
                Touch::Unknown => Err(err(StatusCode::NOT_FOUND, "unknown_user")),
                Touch::Unchanged => Ok(ok()),
                Touch::Changed => {
                    if status == Some(Status::Typing) && !state.typing.typing(&id) {
                        return Ok(ok());
                    }
                    state.publish_presence();
                    Ok(ok())
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    before: Option<String>,
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Json<Vec<Message>> {
    Json(state.history.before(q.before.as_deref(), q.limit.unwrap_or(50)))
}

async fn users(State(state): State<AppState>) -> Json<Vec<PresenceEntry>> {
    Json(state.presence.snapshot())
}

/// Run the HTTP server and its background tasks until Ctrl+C.
pub async fn run_http_server(config: Config) -> Result<()> {
    let state = AppState::new(config);
    let addr: SocketAddr = state.config.bind.parse()?;
    let sweeper = housekeeping::spawn_sweeper(state.clone());
    let simulator = state
        .config
        .demo
        .enabled
        .then(|| simulate::spawn_simulator(state.clone()));
    let shutdown = state.shutdown.clone();
    info!(%addr, demo = state.config.demo.enabled, "chat server listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            shutdown.cancel();
        })
        .await?;
    let _ = sweeper.await;
    if let Some(simulator) = simulator {
        let _ = simulator.await;
    }
    Ok(())
}
