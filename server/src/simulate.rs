use crate::api::AppState;
use rand::{rngs::StdRng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::debug;

/// Drive the demo presence simulation on the shared registry, so every
/// client observes the same fabricated activity.
pub fn spawn_simulator(state: AppState) -> JoinHandle<()> {
    let period = state.config.demo.tick;
    let rates = state.config.demo.rates;
    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();
        let mut tick = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            if state.presence.simulate(rates, &mut rng) {
                debug!("demo presence changed");
                state.publish_presence();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use portal_protocol::{simulate::SimulationRates, Status, StreamEvent};
    use std::time::Duration;

    #[tokio::test]
    async fn ticks_publish_demo_changes() {
        let mut cfg = Config::default();
        cfg.demo.enabled = true;
        cfg.demo.tick = Duration::from_millis(10);
        cfg.demo.rates = SimulationRates { flip: 1.0, typing: 0.0 };
        cfg.demo.members = vec!["Zed".into()];
        let state = AppState::new(cfg);
        let mut rx = state.event_tx.subscribe();
        let task = spawn_simulator(state.clone());
        let ev = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match ev {
            StreamEvent::UsersUpdate(users) => assert_eq!(users[0].status, Status::Offline),
            other => panic!("unexpected {other:?}"),
        }
        state.shutdown.cancel();
        task.await.unwrap();
    }
}
