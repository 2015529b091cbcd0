pub mod frame;
pub mod simulate;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use frame::{FrameDecoder, FrameError};

/// Role attached to an identity at login time.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Who a user is for the lifetime of a session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar: None,
            role: Role::User,
        }
    }
}

/// Presence status as displayed to other users.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Online,
    Away,
    Busy,
    Offline,
    Typing,
}

/// One user's presence. The identity fields are flattened on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(default)]
    pub status: Status,
    /// Unix milliseconds.
    #[serde(default)]
    pub last_seen: i64,
}

impl PresenceEntry {
    pub fn online(identity: Identity) -> Self {
        Self {
            identity,
            status: Status::Online,
            last_seen: now_millis(),
        }
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }
}

/// A chat message. Never mutated once created.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender: Identity,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// Frames pushed from the server over the event stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Init {
        messages: Vec<Message>,
        users: Vec<PresenceEntry>,
    },
    Message(Message),
    UsersUpdate(Vec<PresenceEntry>),
}

impl StreamEvent {
    /// Wire name of the event, also used as the SSE `event:` field.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Init { .. } => "init",
            StreamEvent::Message(_) => "message",
            StreamEvent::UsersUpdate(_) => "users_update",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Client generated id; the server assigns one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    pub sender: Identity,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Activity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

/// Requests accepted by the control endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum ControlRequest {
    UserOnline(Identity),
    UserOffline(UserRef),
    SendMessage(OutgoingMessage),
    UserActivity(Activity),
}

/// Body returned by the control endpoint on success.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

/// Current wall clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
