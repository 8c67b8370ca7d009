use std::time::Duration;

use gru_core::SessionEvent;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Send a [`SessionEvent::Tick`] every `period` until cancelled.
///
/// Late ticks are not replayed in a burst; the session clock counts whole
/// intervals from its start instant and catches up on its own.
pub async fn run_ticker(tx: mpsc::Sender<SessionEvent>, period: Duration, cancel: CancellationToken) {
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if tx.send(SessionEvent::Tick).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("ticker stopped");
}
