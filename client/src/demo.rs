//! In-memory chat backend for demos and offline use.
//!
//! This is the only place where replies and presence changes are made up;
//! nothing here talks to a server.

use crate::{
    error::ClientError,
    transport::{ChatTransport, EventStream},
};
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use parking_lot::Mutex;
use portal_protocol::{
    now_millis,
    simulate::{simulate_tick, SimulationRates},
    ControlRequest, Identity, Message, PresenceEntry, Status, StreamEvent,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle, time::interval};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

const REPLIES: &[&str] = &[
    "That sounds great!",
    "Has anyone watched the new release yet?",
    "Totally agree.",
    "Nice pick, adding it to my watchlist.",
    "Haha, love it",
    "Which plan are you on?",
];

struct DemoState {
    roster: Vec<PresenceEntry>,
    messages: Vec<Message>,
    rng: StdRng,
}

/// Demo transport with a fabricated roster that answers every message
/// after `reply_delay`.
#[derive(Clone)]
pub struct DemoTransport {
    state: Arc<Mutex<DemoState>>,
    tx: broadcast::Sender<StreamEvent>,
    reply_delay: Duration,
    rates: SimulationRates,
}

impl DemoTransport {
    pub fn new(roster: Vec<Identity>) -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(DemoState {
                roster: roster.into_iter().map(PresenceEntry::online).collect(),
                messages: Vec::new(),
                rng: StdRng::from_entropy(),
            })),
            tx,
            reply_delay: Duration::from_secs(2),
            rates: SimulationRates::default(),
        }
    }

    pub fn with_default_roster() -> Self {
        Self::new(
            [("demo-1", "MovieBuff"), ("demo-2", "SeriesFan"), ("demo-3", "CinemaLover")]
                .into_iter()
                .map(|(id, name)| Identity::new(id, name))
                .collect(),
        )
    }

    pub fn reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    pub fn rates(mut self, rates: SimulationRates) -> Self {
        self.rates = rates;
        self
    }

    /// Make the generator deterministic.
    pub fn seeded(self, seed: u64) -> Self {
        self.state.lock().rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Randomise roster presence once; publishes `users_update` on change.
    pub fn tick(&self) -> bool {
        let roster = {
            let mut guard = self.state.lock();
            let DemoState { roster, rng, .. } = &mut *guard;
            if !simulate_tick(roster.iter_mut(), self.rates, rng, now_millis()) {
                return false;
            }
            roster.clone()
        };
        let _ = self.tx.send(StreamEvent::UsersUpdate(roster));
        true
    }

    pub fn spawn_ticker(&self, period: Duration) -> JoinHandle<()> {
        let demo = self.clone();
        tokio::spawn(async move {
            let mut tick = interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                demo.tick();
            }
        })
    }

    fn publish(&self, message: Message) {
        self.state.lock().messages.push(message.clone());
        let _ = self.tx.send(StreamEvent::Message(message));
    }

    fn schedule_reply(&self, to: &Identity) {
        let picked = {
            let mut guard = self.state.lock();
            let DemoState { roster, rng, .. } = &mut *guard;
            let candidates: Vec<&PresenceEntry> = roster
                .iter()
                .filter(|e| e.status != Status::Offline && e.id() != to.id)
                .collect();
            candidates
                .choose(rng)
                .map(|e| e.identity.clone())
                .zip(REPLIES.choose(rng).copied())
        };
        let Some((sender, text)) = picked else {
            return;
        };
        let demo = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(demo.reply_delay).await;
            demo.publish(Message {
                id: Uuid::new_v4().to_string(),
                content: text.to_string(),
                sender,
                timestamp: now_millis(),
            });
        });
    }
}

#[async_trait]
impl ChatTransport for DemoTransport {
    async fn subscribe(&self) -> Result<EventStream, ClientError> {
        let rx = self.tx.subscribe();
        let init = {
            let guard = self.state.lock();
            StreamEvent::Init {
                messages: guard.messages.clone(),
                users: guard.roster.clone(),
            }
        };
        let updates = BroadcastStream::new(rx).filter_map(|r| future::ready(r.ok().map(Ok)));
        Ok(stream::once(future::ready(Ok(init))).chain(updates).boxed())
    }

    async fn control(&self, request: ControlRequest) -> Result<(), ClientError> {
        if let ControlRequest::SendMessage(out) = request {
            let message = Message {
                id: out.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                content: out.content,
                sender: out.sender,
                timestamp: now_millis(),
            };
            let sender = message.sender.clone();
            self.publish(message);
            self.schedule_reply(&sender);
        }
        Ok(())
    }

    async fn history_before(
        &self,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, ClientError> {
        let guard = self.state.lock();
        let end = before
            .and_then(|id| guard.messages.iter().position(|m| m.id == id))
            .unwrap_or(guard.messages.len());
        Ok(guard.messages[end.saturating_sub(limit)..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_protocol::OutgoingMessage;

    #[tokio::test(start_paused = true)]
    async fn replies_come_from_someone_else_after_delay() {
        let demo = DemoTransport::with_default_roster()
            .reply_delay(Duration::from_secs(2))
            .seeded(7);
        let mut events = demo.subscribe().await.unwrap();
        assert!(matches!(events.next().await, Some(Ok(StreamEvent::Init { .. }))));

        let me = Identity::new("u1", "ann");
        demo.control(ControlRequest::SendMessage(OutgoingMessage {
            id: Some("c1".into()),
            content: "hello".into(),
            sender: me.clone(),
        }))
        .await
        .unwrap();

        match events.next().await {
            Some(Ok(StreamEvent::Message(m))) => assert_eq!(m.id, "c1"),
            other => panic!("unexpected {other:?}"),
        }
        let start = tokio::time::Instant::now();
        match events.next().await {
            Some(Ok(StreamEvent::Message(m))) => {
                assert_ne!(m.sender.id, me.id);
                assert!(REPLIES.contains(&m.content.as_str()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(demo.history_before(None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tick_publishes_roster() {
        let demo = DemoTransport::with_default_roster()
            .rates(SimulationRates { flip: 1.0, typing: 0.0 })
            .seeded(1);
        let mut events = demo.subscribe().await.unwrap();
        events.next().await;
        assert!(demo.tick());
        match events.next().await {
            Some(Ok(StreamEvent::UsersUpdate(users))) => {
                assert_eq!(users.len(), 3);
                assert!(users.iter().all(|u| u.status == Status::Offline));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
