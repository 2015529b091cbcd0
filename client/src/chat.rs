use crate::{
    error::ClientError,
    message_log::DEFAULT_CAPACITY,
    supervisor::{ConnectionState, LiveGuard, ReconnectPolicy, Supervisor},
    transport::ChatTransport,
    view::{ChatView, ViewChange},
};
use parking_lot::Mutex;
use portal_protocol::{
    now_millis, ControlRequest, Identity, Message, OutgoingMessage, PresenceEntry, UserRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub reconnect: ReconnectPolicy,
    /// Period of the `user_activity` heartbeat while connected.
    pub heartbeat: Duration,
    pub history_capacity: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            heartbeat: Duration::from_secs(20),
            history_capacity: DEFAULT_CAPACITY,
        }
    }
}

struct Running {
    identity: Identity,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Chat session of one user: a single push-channel subscription kept alive
/// by a supervisor task, plus the local view it feeds.
pub struct ChatClient<T: ChatTransport> {
    transport: Arc<T>,
    settings: ChatSettings,
    view: Arc<Mutex<ChatView>>,
    visible: watch::Sender<bool>,
    state: watch::Sender<ConnectionState>,
    running: Option<Running>,
    live: Arc<AtomicUsize>,
}

impl<T: ChatTransport> ChatClient<T> {
    pub fn new(transport: T, settings: ChatSettings) -> Self {
        Self::with_transport(Arc::new(transport), settings)
    }

    pub fn with_transport(transport: Arc<T>, settings: ChatSettings) -> Self {
        let (visible, _) = watch::channel(true);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            view: Arc::new(Mutex::new(ChatView::new(settings.history_capacity))),
            settings,
            visible,
            state,
            running: None,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start the session for `identity`, replacing any running one.
    /// Failures are reported through [`ChatClient::state`], not here.
    pub async fn connect(&mut self, identity: Identity) {
        self.disconnect().await;
        info!(user = %identity.id, "connecting");
        self.view.lock().set_local(Some(identity.id.clone()));
        let cancel = CancellationToken::new();
        let supervisor = Supervisor {
            transport: self.transport.clone(),
            view: self.view.clone(),
            identity: identity.clone(),
            policy: self.settings.reconnect,
            heartbeat: self.settings.heartbeat,
            visible: self.visible.subscribe(),
            state: self.state.clone(),
            cancel: cancel.clone(),
            _live: LiveGuard::new(&self.live),
        };
        let task = tokio::spawn(supervisor.run());
        self.running = Some(Running {
            identity,
            cancel,
            task,
        });
    }

    /// Close the stream and announce the user offline. No-op when not connected.
    pub async fn disconnect(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, "supervisor task failed");
        }
        let bye = ControlRequest::UserOffline(UserRef {
            id: running.identity.id.clone(),
        });
        if let Err(error) = self.transport.control(bye).await {
            warn!(%error, "failed to announce offline");
        }
        self.state.send_replace(ConnectionState::Disconnected);
        info!(user = %running.identity.id, "disconnected");
    }

    /// Page visibility. Hidden closes the stream and cancels a pending
    /// retry; visible reconnects immediately.
    pub fn set_visible(&self, visible: bool) {
        self.visible.send_replace(visible);
    }

    /// Send a message. Whitespace-only content is ignored and returns `None`.
    /// The message is shown locally before the server sees it.
    pub async fn send(&self, content: &str) -> Result<Option<Message>, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        let sender = self
            .running
            .as_ref()
            .map(|r| r.identity.clone())
            .ok_or(ClientError::NotConnected)?;
        let message = Message {
            id: client_message_id(),
            content: content.to_string(),
            sender: sender.clone(),
            timestamp: now_millis(),
        };
        self.view.lock().push_local(message.clone());
        let sent = self
            .transport
            .control(ControlRequest::SendMessage(OutgoingMessage {
                id: Some(message.id.clone()),
                content: message.content.clone(),
                sender,
            }))
            .await;
        if let Err(error) = sent {
            self.view.lock().forget_pending(&message.id);
            return Err(error);
        }
        Ok(Some(message))
    }

    /// Fetch up to `limit` messages older than the oldest one shown.
    pub async fn load_older(&self, limit: usize) -> Result<usize, ClientError> {
        let oldest = self.view.lock().log().oldest_id().map(str::to_string);
        let older = self
            .transport
            .history_before(oldest.as_deref(), limit)
            .await?;
        Ok(self.view.lock().prepend_older(older))
    }

    pub fn messages(&self) -> Vec<Message> {
        self.view.lock().messages()
    }

    pub fn presence(&self) -> Vec<PresenceEntry> {
        self.view.lock().presence().to_vec()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn changes(&self) -> broadcast::Receiver<ViewChange> {
        self.view.lock().subscribe()
    }

    pub fn pending_sends(&self) -> usize {
        self.view.lock().pending_sends()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.running.as_ref().map(|r| &r.identity)
    }

    /// Number of live supervisor tasks; at most one.
    pub fn active_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

impl<T: ChatTransport> Drop for ChatClient<T> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

fn client_message_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now_millis(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{demo::DemoTransport, transport::EventStream};
    use async_trait::async_trait;
    use futures::{stream, StreamExt};

    /// Accepts presence calls, rejects every message.
    struct RejectingSends;

    #[async_trait]
    impl ChatTransport for RejectingSends {
        async fn subscribe(&self) -> Result<EventStream, ClientError> {
            Ok(stream::pending().boxed())
        }

        async fn control(&self, request: ControlRequest) -> Result<(), ClientError> {
            match request {
                ControlRequest::SendMessage(_) => Err(ClientError::Rejected(400)),
                _ => Ok(()),
            }
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn demo_client() -> ChatClient<DemoTransport> {
        ChatClient::new(DemoTransport::with_default_roster(), ChatSettings::default())
    }

    #[tokio::test]
    async fn whitespace_send_is_a_no_op() {
        let mut client = demo_client();
        assert!(client.send("   \n\t").await.unwrap().is_none());
        client.connect(Identity::new("u1", "ann")).await;
        settle().await;
        let before = client.messages().len();
        assert!(client.send("  ").await.unwrap().is_none());
        assert_eq!(client.messages().len(), before);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let client = demo_client();
        assert!(matches!(client.send("hi").await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn optimistic_send_is_not_duplicated_by_echo() {
        let demo = DemoTransport::with_default_roster().reply_delay(Duration::from_secs(3600));
        let mut client = ChatClient::new(demo, ChatSettings::default());
        client.connect(Identity::new("u1", "ann")).await;
        settle().await;
        assert_eq!(client.state(), ConnectionState::Connected);
        let sent = client.send("  hello  ").await.unwrap().unwrap();
        assert_eq!(sent.content, "hello");
        settle().await;
        let ids: Vec<String> = client.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![sent.id]);
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn message_ids_are_timestamp_prefixed() {
        let id = client_message_id();
        let (ts, rest) = id.split_once('-').unwrap();
        assert!(ts.parse::<i64>().unwrap() > 0);
        assert_eq!(rest.len(), 8);
    }

    #[tokio::test]
    async fn rejected_send_is_no_longer_pending() {
        let mut client = ChatClient::new(RejectingSends, ChatSettings::default());
        client.connect(Identity::new("u1", "ann")).await;
        let err = client.send("hello").await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(400)));
        assert_eq!(client.pending_sends(), 0);
        client.disconnect().await;
    }
}
