//! The quiz server as seen by the client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gru_core::{AnswerSubmission, Handshake, QuestionEvent};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("server rejected request: {0}")]
    Rejected(String),
}

/// Operations the session needs from the server.
///
/// Implementations are shared between the orchestrator and its tasks, so
/// every method takes `&self`. `close` must be idempotent.
#[async_trait]
pub trait QuizServer: Send + Sync {
    async fn connect(&self) -> Result<Handshake, ServerError>;

    /// Round trip used as a liveness probe. Returns the server's clock.
    async fn ping(&self) -> Result<DateTime<Utc>, ServerError>;

    async fn start_demo(&self, duration: Duration) -> Result<mpsc::Receiver<QuestionEvent>, ServerError>;

    async fn start_test(&self, duration: Duration) -> Result<mpsc::Receiver<QuestionEvent>, ServerError>;

    async fn submit_answer(&self, submission: &AnswerSubmission) -> Result<(), ServerError>;

    async fn close(&self);
}
