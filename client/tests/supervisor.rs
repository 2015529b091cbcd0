use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use portal_client::{
    ChatClient, ChatSettings, ChatTransport, ClientError, ConnectionState, EventStream,
    ReconnectPolicy,
};
use portal_protocol::{ControlRequest, Identity, Message, PresenceEntry, StreamEvent};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::time::{sleep, timeout, Instant};

enum Step {
    Fail,
    /// Deliver the events, then stay open.
    Open(Vec<StreamEvent>),
    /// Deliver the events, then close the stream.
    OpenThenClose(Vec<StreamEvent>),
}

/// Transport replaying a fixed script of subscription outcomes. Once the
/// script runs out every subscription fails.
#[derive(Default)]
struct Scripted {
    steps: Mutex<VecDeque<Step>>,
    subscribes: Mutex<Vec<Instant>>,
    controls: Mutex<Vec<ControlRequest>>,
}

impl Scripted {
    fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Default::default()
        })
    }

    fn subscribe_times(&self) -> Vec<Instant> {
        self.subscribes.lock().clone()
    }

    fn gaps(&self) -> Vec<Duration> {
        self.subscribe_times().windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn offline_count(&self) -> usize {
        self.controls
            .lock()
            .iter()
            .filter(|c| matches!(c, ControlRequest::UserOffline(_)))
            .count()
    }

    fn online_count(&self) -> usize {
        self.controls
            .lock()
            .iter()
            .filter(|c| matches!(c, ControlRequest::UserOnline(_)))
            .count()
    }
}

#[async_trait]
impl ChatTransport for Scripted {
    async fn subscribe(&self) -> Result<EventStream, ClientError> {
        self.subscribes.lock().push(Instant::now());
        let step = self.steps.lock().pop_front().unwrap_or(Step::Fail);
        match step {
            Step::Fail => Err(ClientError::Rejected(503)),
            Step::Open(events) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Step::OpenThenClose(events) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
        }
    }

    async fn control(&self, request: ControlRequest) -> Result<(), ClientError> {
        self.controls.lock().push(request);
        Ok(())
    }
}

fn init(users: &[&str]) -> StreamEvent {
    StreamEvent::Init {
        messages: Vec::<Message>::new(),
        users: users
            .iter()
            .map(|id| PresenceEntry::online(Identity::new(*id, format!("user-{id}"))))
            .collect(),
    }
}

fn me() -> Identity {
    Identity::new("u1", "ann")
}

fn client(transport: &Arc<Scripted>, policy: ReconnectPolicy) -> ChatClient<Scripted> {
    let settings = ChatSettings {
        reconnect: policy,
        ..ChatSettings::default()
    };
    ChatClient::with_transport(transport.clone(), settings)
}

async fn wait_state(client: &ChatClient<Scripted>, f: impl Fn(&ConnectionState) -> bool) {
    let mut rx = client.watch_state();
    timeout(Duration::from_secs(600), rx.wait_for(|s| f(s)))
        .await
        .expect("state not reached")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn retry_happens_after_exact_delay() {
    let transport = Scripted::new([Step::Fail, Step::Open(vec![init(&["u2"])])]);
    let mut client = client(&transport, ReconnectPolicy::default());
    client.connect(me()).await;

    sleep(Duration::from_millis(2900)).await;
    assert_eq!(transport.subscribe_times().len(), 1);
    assert_eq!(
        client.state(),
        ConnectionState::Backoff {
            attempt: 1,
            delay: Duration::from_secs(3)
        }
    );

    wait_state(&client, |s| *s == ConnectionState::Connected).await;
    assert_eq!(transport.gaps(), vec![Duration::from_secs(3)]);
    let ids: Vec<String> = client.presence().into_iter().map(|u| u.identity.id).collect();
    assert_eq!(ids, vec!["u2"]);
    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn hide_cancels_pending_retry_and_show_reconnects() {
    let transport = Scripted::new([Step::Fail, Step::Open(vec![init(&[])])]);
    let mut client = client(&transport, ReconnectPolicy::default());
    client.connect(me()).await;
    sleep(Duration::from_secs(1)).await;
    assert!(matches!(client.state(), ConnectionState::Backoff { .. }));

    client.set_visible(false);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.subscribe_times().len(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let shown_at = Instant::now();
    client.set_visible(true);
    wait_state(&client, |s| *s == ConnectionState::Connected).await;
    let times = transport.subscribe_times();
    assert_eq!(times.len(), 2);
    assert_eq!(times[1], shown_at);
    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn hiding_a_live_session_announces_offline() {
    let transport = Scripted::new([Step::Open(vec![init(&[])]), Step::Open(vec![init(&[])])]);
    let mut client = client(&transport, ReconnectPolicy::default());
    client.connect(me()).await;
    wait_state(&client, |s| *s == ConnectionState::Connected).await;

    client.set_visible(false);
    wait_state(&client, |s| *s == ConnectionState::Disconnected).await;
    assert_eq!(transport.offline_count(), 1);

    client.set_visible(true);
    wait_state(&client, |s| *s == ConnectionState::Connected).await;
    assert_eq!(transport.online_count(), 2);
    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn connect_disconnect_cycles_leave_one_session() {
    let transport = Scripted::new((0..20).map(|_| Step::Open(vec![init(&[])])));
    let mut client = client(&transport, ReconnectPolicy::default());
    for _ in 0..5 {
        client.connect(me()).await;
        // a second connect replaces the first session
        client.connect(me()).await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(client.active_sessions(), 1);
        client.disconnect().await;
        assert_eq!(client.active_sessions(), 0);
        client.disconnect().await;
    }
    // one announcement per real disconnect, none for the repeated calls
    assert_eq!(transport.offline_count(), 10);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_to_cap_then_gives_up() {
    let transport = Scripted::new([]);
    let mut client = client(
        &transport,
        ReconnectPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(3),
            max_attempts: Some(4),
        },
    );
    client.connect(me()).await;
    wait_state(&client, |s| matches!(s, ConnectionState::GaveUp { .. })).await;
    assert_eq!(client.state(), ConnectionState::GaveUp { attempts: 4 });
    assert_eq!(
        transport.gaps(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(3)
        ]
    );
    sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.subscribe_times().len(), 4);
    assert_eq!(client.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn established_session_resets_backoff() {
    let transport = Scripted::new([
        Step::Fail,
        Step::OpenThenClose(vec![init(&[])]),
        Step::Open(vec![init(&[])]),
    ]);
    let mut client = client(&transport, ReconnectPolicy::default());
    client.connect(me()).await;
    timeout(Duration::from_secs(60), async {
        while transport.subscribe_times().len() < 3 {
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .unwrap();
    // the failure after a delivered snapshot starts again from the initial delay
    let gaps = transport.gaps();
    assert_eq!(gaps[1], Duration::from_secs(3));
    client.disconnect().await;
}
