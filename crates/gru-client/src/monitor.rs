use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gru_core::{ProbeResult, SessionEvent};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::server::{QuizServer, ServerError};

/// Periodically pings the server and reports each result as a
/// [`SessionEvent::Probe`]. Never decides anything about the session.
pub struct ConnectionMonitor<S: ?Sized> {
    server: Arc<S>,
    tx: mpsc::Sender<SessionEvent>,
    interval: Duration,
    timeout: Duration,
}

impl<S: QuizServer + ?Sized> ConnectionMonitor<S> {
    pub fn new(server: Arc<S>, tx: mpsc::Sender<SessionEvent>, interval: Duration, timeout: Duration) -> Self {
        Self {
            server,
            tx,
            interval,
            timeout,
        }
    }

    /// Probe until cancelled. Probes run one at a time: a slow probe delays
    /// the next one.
    pub async fn run(self, cancel: CancellationToken) {
        // The handshake counts as the first ping.
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval = ?self.interval, timeout = ?self.timeout, "connection monitor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.probe() => result,
            };
            if self.tx.send(SessionEvent::Probe(result)).await.is_err() {
                break;
            }
        }
        debug!("connection monitor stopped");
    }

    async fn probe(&self) -> ProbeResult {
        let outcome = tokio::time::timeout(self.timeout, self.server.ping()).await;
        let completed_at = Utc::now();
        match outcome {
            Ok(Ok(server_time)) => {
                trace!(%server_time, "pong");
                ProbeResult::success(completed_at, server_time)
            }
            Ok(Err(e)) => ProbeResult::failure(completed_at, e.to_string()),
            Err(_) => ProbeResult::failure(completed_at, ServerError::Timeout(self.timeout).to_string()),
        }
    }
}
