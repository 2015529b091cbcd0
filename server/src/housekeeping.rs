use crate::api::AppState;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::info;

/// Periodically expire users whose heartbeats stopped.
pub fn spawn_sweeper(state: AppState) -> JoinHandle<()> {
    let period = state.config.presence.sweep_interval;
    tokio::spawn(async move {
        let mut tick = interval(period);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            let expired = state.presence.sweep();
            if expired.is_empty() {
                continue;
            }
            info!(?expired, "presence expired");
            for id in &expired {
                state.typing.clear(id);
            }
            state.publish_presence();
        }
    })
}
