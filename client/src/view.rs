use crate::message_log::MessageLog;
use portal_protocol::{Message, PresenceEntry, StreamEvent};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::trace;

/// Notification emitted whenever the local view changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewChange {
    /// The log and presence were replaced by an `init` snapshot.
    Snapshot,
    Message(Message),
    /// Older history was loaded in front of the log.
    History(usize),
    Presence,
}

/// Client-local state fed by the event stream: the message log and the
/// presence of everyone except the local user.
pub struct ChatView {
    local_id: Option<String>,
    log: MessageLog,
    presence: Vec<PresenceEntry>,
    /// Ids of messages sent by this client and not yet seen on the stream.
    pending: HashSet<String>,
    changes: broadcast::Sender<ViewChange>,
}

impl ChatView {
    pub fn new(capacity: usize) -> Self {
        let (changes, _rx) = broadcast::channel(256);
        Self {
            local_id: None,
            log: MessageLog::new(capacity),
            presence: Vec::new(),
            pending: HashSet::new(),
            changes,
        }
    }

    pub fn set_local(&mut self, id: Option<String>) {
        self.local_id = id;
    }

    /// Dispatch one decoded stream event.
    pub fn apply(&mut self, event: StreamEvent) {
        trace!(kind = event.kind(), "applying event");
        match event {
            StreamEvent::Init { messages, users } => {
                self.log.replace(messages);
                self.pending.clear();
                self.presence = self.without_local(users);
                self.notify(ViewChange::Snapshot);
            }
            StreamEvent::Message(message) => {
                if self.pending.remove(&message.id) {
                    // server echo of our own optimistic send
                    return;
                }
                self.log.append(message.clone());
                self.notify(ViewChange::Message(message));
            }
            StreamEvent::UsersUpdate(users) => {
                self.presence = self.without_local(users);
                self.notify(ViewChange::Presence);
            }
        }
    }

    /// Optimistically show a message sent by this client.
    pub fn push_local(&mut self, message: Message) {
        self.pending.insert(message.id.clone());
        self.log.append(message.clone());
        self.notify(ViewChange::Message(message));
    }

    /// Stop waiting for the server echo of a send that failed.
    pub fn forget_pending(&mut self, id: &str) -> bool {
        self.pending.remove(id)
    }

    /// Optimistic sends not yet confirmed by the stream.
    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    pub fn prepend_older(&mut self, older: Vec<Message>) -> usize {
        let n = self.log.prepend_older(older);
        if n > 0 {
            self.notify(ViewChange::History(n));
        }
        n
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn messages(&self) -> Vec<Message> {
        self.log.iter().cloned().collect()
    }

    pub fn presence(&self) -> &[PresenceEntry] {
        &self.presence
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewChange> {
        self.changes.subscribe()
    }

    fn without_local(&self, users: Vec<PresenceEntry>) -> Vec<PresenceEntry> {
        match &self.local_id {
            Some(local) => users.into_iter().filter(|u| u.id() != local).collect(),
            None => users,
        }
    }

    fn notify(&self, change: ViewChange) {
        let _ = self.changes.send(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_protocol::{Identity, Status};

    fn msg(id: &str) -> Message {
        Message {
            id: id.into(),
            content: format!("content {id}"),
            sender: Identity::new("u9", "zed"),
            timestamp: 0,
        }
    }

    fn entry(id: &str) -> PresenceEntry {
        PresenceEntry {
            identity: Identity::new(id, format!("user-{id}")),
            status: Status::Online,
            last_seen: 0,
        }
    }

    fn ids(users: &[PresenceEntry]) -> Vec<&str> {
        users.iter().map(|u| u.id()).collect()
    }

    fn view(local: &str) -> ChatView {
        let mut view = ChatView::new(100);
        view.set_local(Some(local.into()));
        view
    }

    #[test]
    fn init_then_messages_in_delivery_order() {
        for k in 0..5 {
            let mut v = view("u1");
            v.apply(StreamEvent::Init {
                messages: vec![msg("welcome")],
                users: vec![],
            });
            for i in 0..k {
                v.apply(StreamEvent::Message(msg(&format!("m{i}"))));
            }
            assert_eq!(v.log().len(), 1 + k);
            let got: Vec<String> = v.messages().into_iter().map(|m| m.id).collect();
            let mut expected = vec!["welcome".to_string()];
            expected.extend((0..k).map(|i| format!("m{i}")));
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn init_replaces_and_excludes_local_user() {
        let mut v = view("u1");
        v.apply(StreamEvent::Message(msg("stale")));
        v.apply(StreamEvent::Init {
            messages: vec![],
            users: vec![entry("u2"), entry("u1")],
        });
        assert!(v.log().is_empty());
        assert_eq!(ids(v.presence()), vec!["u2"]);
    }

    #[test]
    fn users_update_replaces_wholesale() {
        let mut v = view("u1");
        v.apply(StreamEvent::UsersUpdate(vec![entry("u2"), entry("u3")]));
        v.apply(StreamEvent::UsersUpdate(vec![entry("u4"), entry("u1")]));
        assert_eq!(ids(v.presence()), vec!["u4"]);
    }

    #[test]
    fn replayed_message_is_duplicated() {
        let mut v = view("u1");
        v.apply(StreamEvent::Message(msg("a")));
        v.apply(StreamEvent::Message(msg("a")));
        assert_eq!(v.log().len(), 2);
    }

    #[test]
    fn own_echo_confirms_pending_send_once() {
        let mut v = view("u1");
        let mut rx = v.subscribe();
        v.push_local(msg("mine"));
        v.apply(StreamEvent::Message(msg("mine")));
        assert_eq!(v.log().len(), 1);
        // a second delivery is not a confirmation any more
        v.apply(StreamEvent::Message(msg("mine")));
        assert_eq!(v.log().len(), 2);
        assert_eq!(rx.try_recv().unwrap(), ViewChange::Message(msg("mine")));
        assert_eq!(rx.try_recv().unwrap(), ViewChange::Message(msg("mine")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn forgotten_send_is_not_swallowed() {
        let mut v = view("u1");
        v.push_local(msg("lost"));
        assert_eq!(v.pending_sends(), 1);
        assert!(v.forget_pending("lost"));
        assert_eq!(v.pending_sends(), 0);
        v.apply(StreamEvent::Message(msg("lost")));
        assert_eq!(v.log().len(), 2);
    }
}
