use crate::{
    error::ClientError,
    transport::ChatTransport,
    view::ChatView,
};
use futures::StreamExt;
use parking_lot::Mutex;
use portal_protocol::{Activity, ControlRequest, Identity, UserRef};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connectivity as seen by the user interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `delay` before retry number `attempt`.
    Backoff { attempt: u32, delay: Duration },
    /// Too many consecutive failures; a new `connect` is required.
    GaveUp { attempts: u32 },
}

/// Capped exponential backoff between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Give up after this many consecutive failures; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(3),
            max: Duration::from_secs(60),
            max_attempts: Some(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retrying after `failures` consecutive failures (>= 1).
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32
            .checked_shl(failures.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.map_or(false, |max| failures >= max)
    }
}

/// Counts live supervisor tasks; decremented on every exit path.
pub(crate) struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    pub(crate) fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum SessionEnd {
    Cancelled,
    Hidden,
    Failed {
        error: ClientError,
        established: bool,
    },
}

/// One connection lifetime: owns the stream, the heartbeat timer and the
/// retry timer. Everything is released when `run` returns.
pub(crate) struct Supervisor<T: ChatTransport> {
    pub(crate) transport: Arc<T>,
    pub(crate) view: Arc<Mutex<ChatView>>,
    pub(crate) identity: Identity,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) heartbeat: Duration,
    pub(crate) visible: watch::Receiver<bool>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) cancel: CancellationToken,
    pub(crate) _live: LiveGuard,
}

impl<T: ChatTransport> Supervisor<T> {
    pub(crate) async fn run(mut self) {
        let mut failures = 0u32;
        loop {
            if !*self.visible.borrow_and_update() {
                self.set_state(ConnectionState::Disconnected);
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    changed = self.visible.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                }
            }
            self.set_state(ConnectionState::Connecting);
            match self.session().await {
                SessionEnd::Cancelled => return,
                SessionEnd::Hidden => {
                    info!(user = %self.identity.id, "hidden, closing event stream");
                    self.announce_offline().await;
                    failures = 0;
                }
                SessionEnd::Failed { error, established } => {
                    if established {
                        failures = 0;
                    }
                    failures += 1;
                    if self.policy.exhausted(failures) {
                        warn!(%error, attempts = failures, "giving up on event stream");
                        self.set_state(ConnectionState::GaveUp { attempts: failures });
                        return;
                    }
                    let delay = self.policy.delay(failures);
                    warn!(%error, attempt = failures, ?delay, "event stream failed, retrying");
                    self.set_state(ConnectionState::Backoff {
                        attempt: failures,
                        delay,
                    });
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = sleep(delay) => {}
                        _ = wait_hidden(&mut self.visible) => debug!("retry cancelled while hidden"),
                    }
                }
            }
        }
    }

    async fn session(&mut self) -> SessionEnd {
        let mut established = false;
        let opened = async {
            self.transport
                .control(ControlRequest::UserOnline(self.identity.clone()))
                .await?;
            self.transport.subscribe().await
        };
        let mut events = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
            res = opened => match res {
                Ok(events) => events,
                Err(error) => return SessionEnd::Failed { error, established },
            },
        };
        self.set_state(ConnectionState::Connected);
        debug!(user = %self.identity.id, "connected");

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                _ = wait_hidden(&mut self.visible) => return SessionEnd::Hidden,
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        established = true;
                        self.view.lock().apply(event);
                    }
                    Some(Err(error)) => return SessionEnd::Failed { error, established },
                    None => {
                        return SessionEnd::Failed {
                            error: ClientError::Closed,
                            established,
                        }
                    }
                },
                _ = heartbeat.tick() => {
                    let ping = ControlRequest::UserActivity(Activity {
                        id: self.identity.id.clone(),
                        status: None,
                    });
                    if let Err(error) = self.transport.control(ping).await {
                        return SessionEnd::Failed { error, established };
                    }
                }
            }
        }
    }

    async fn announce_offline(&self) {
        let bye = ControlRequest::UserOffline(UserRef {
            id: self.identity.id.clone(),
        });
        if let Err(error) = self.transport.control(bye).await {
            warn!(%error, "failed to announce offline");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// Resolves once the visibility flag flips to hidden.
async fn wait_hidden(visible: &mut watch::Receiver<bool>) {
    loop {
        if visible.changed().await.is_err() {
            // sender gone: visibility can no longer change
            std::future::pending::<()>().await;
        }
        if !*visible.borrow_and_update() {
            return;
        }
    }
}
