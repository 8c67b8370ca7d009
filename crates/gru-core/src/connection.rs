//! Connection health record fed by periodic probes.
//!
//! The status is never stored. It is derived from the last probe outcome and
//! the age of the last successful ping at the moment it is read, so a stale
//! success turns Degraded on its own even if no new probe result arrives.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success { server_time: DateTime<Utc> },
    Failure { reason: String },
}

/// One completed probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub completed_at: DateTime<Utc>,
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    pub fn success(completed_at: DateTime<Utc>, server_time: DateTime<Utc>) -> Self {
        Self {
            completed_at,
            outcome: ProbeOutcome::Success { server_time },
        }
    }

    pub fn failure(completed_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            completed_at,
            outcome: ProbeOutcome::Failure {
                reason: reason.into(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    ping_timeout: Duration,
    last_ping_at: Option<DateTime<Utc>>,
    last_probe_ok: bool,
    consecutive_failures: u32,
}

impl ConnectionHealth {
    pub fn new(ping_timeout: Duration) -> Self {
        Self {
            ping_timeout,
            last_ping_at: None,
            last_probe_ok: false,
            consecutive_failures: 0,
        }
    }

    /// A successful handshake counts as a fresh ping.
    pub fn mark_connected(&mut self, at: DateTime<Utc>) {
        self.last_ping_at = Some(at);
        self.last_probe_ok = true;
        self.consecutive_failures = 0;
    }

    /// Fold one probe result in. A failure degrades immediately and is
    /// returned as a transient error for the caller to log or escalate.
    pub fn record(&mut self, result: &ProbeResult) -> Result<(), SessionError> {
        match &result.outcome {
            ProbeOutcome::Success { server_time } => {
                if !self.last_probe_ok {
                    info!(failures = self.consecutive_failures, "connection recovered");
                }
                debug!(server_time = %server_time, "ping ok");
                self.last_ping_at = Some(result.completed_at);
                self.last_probe_ok = true;
                self.consecutive_failures = 0;
                Ok(())
            }
            ProbeOutcome::Failure { reason } => {
                self.last_probe_ok = false;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(
                    reason = %reason,
                    consecutive_failures = self.consecutive_failures,
                    "ping failed"
                );
                Err(SessionError::TransientConnection {
                    reason: reason.clone(),
                })
            }
        }
    }

    /// Healthy only when the last probe succeeded and that success is no
    /// older than the ping timeout at `now`.
    pub fn status(&self, now: DateTime<Utc>) -> ConnectionStatus {
        let fresh = self.last_ping_at.is_some_and(|at| {
            let age = now.signed_duration_since(at);
            age.to_std().map_or(true, |age| age <= self.ping_timeout)
        });
        if self.last_probe_ok && fresh {
            ConnectionStatus::Healthy
        } else {
            ConnectionStatus::Degraded
        }
    }

    pub fn last_ping_at(&self) -> Option<DateTime<Utc>> {
        self.last_ping_at
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Text for the status box.
    pub fn status_line(&self, now: DateTime<Utc>) -> String {
        match (self.status(now), self.last_ping_at) {
            (ConnectionStatus::Healthy, Some(at)) => format!(
                "Connected to server. Last ping received at: {}",
                at.with_timezone(&Local).format("%H:%M:%S")
            ),
            _ => "Trouble connecting to the server. Hang on for a sec!".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn health() -> ConnectionHealth {
        ConnectionHealth::new(Duration::from_secs(10))
    }

    #[test]
    fn unknown_until_first_success() {
        let h = health();
        assert_eq!(h.status(t(0)), ConnectionStatus::Degraded);
        assert_eq!(h.last_ping_at(), None);
    }

    #[test]
    fn success_is_healthy_until_timeout() {
        let mut h = health();
        h.record(&ProbeResult::success(t(0), t(0))).unwrap();
        assert_eq!(h.status(t(0)), ConnectionStatus::Healthy);
        assert_eq!(h.status(t(10)), ConnectionStatus::Healthy);
        assert_eq!(h.status(t(11)), ConnectionStatus::Degraded);
    }

    #[test]
    fn single_failure_degrades_immediately() {
        let mut h = health();
        h.mark_connected(t(0));
        let err = h.record(&ProbeResult::failure(t(3), "timeout")).unwrap_err();
        assert!(matches!(err, SessionError::TransientConnection { .. }));
        assert_eq!(h.status(t(3)), ConnectionStatus::Degraded);
        assert_eq!(h.consecutive_failures(), 1);
    }

    #[test]
    fn five_failed_pings_stay_degraded_until_success() {
        let mut h = health();
        h.mark_connected(t(0));
        assert_eq!(h.status(t(0)), ConnectionStatus::Healthy);

        for n in 1..=5 {
            let at = t(3 * n);
            let _ = h.record(&ProbeResult::failure(at, "connection refused"));
            assert_eq!(h.status(at), ConnectionStatus::Degraded);
        }
        assert_eq!(h.consecutive_failures(), 5);
        assert_eq!(h.last_ping_at(), Some(t(0)));

        h.record(&ProbeResult::success(t(18), t(18))).unwrap();
        assert_eq!(h.status(t(18)), ConnectionStatus::Healthy);
        assert_eq!(h.consecutive_failures(), 0);
    }

    #[test]
    fn first_failure_after_success_keeps_last_ping_time() {
        let mut h = health();
        h.record(&ProbeResult::success(t(0), t(0))).unwrap();
        let _ = h.record(&ProbeResult::failure(t(3), "reset"));
        assert_eq!(h.last_ping_at(), Some(t(0)));
    }

    #[test]
    fn status_line_text() {
        let mut h = health();
        assert!(h.status_line(t(0)).starts_with("Trouble connecting"));
        h.mark_connected(t(0));
        assert!(h.status_line(t(1)).starts_with("Connected to server. Last ping received at: "));
        assert!(h.status_line(t(30)).starts_with("Trouble connecting"));
    }

    #[test]
    fn clock_skew_counts_as_fresh() {
        let mut h = health();
        h.mark_connected(t(5));
        assert_eq!(h.status(t(5) - TimeDelta::seconds(1)), ConnectionStatus::Healthy);
    }
}
