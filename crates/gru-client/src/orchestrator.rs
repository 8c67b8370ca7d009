use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gru_core::{
    Effect, Now, QuestionEvent, Session, SessionConfig, SessionEvent, Snapshot, TerminalReason,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::monitor::ConnectionMonitor;
use crate::server::{QuizServer, ServerError};
use crate::ticker::run_ticker;

const EVENT_BUFFER: usize = 256;

/// How long teardown waits for in-flight answer submissions.
const SUBMIT_GRACE: Duration = Duration::from_secs(2);

/// Broadcast once, after teardown, when a session reaches Final or Error.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEnded {
    pub reason: TerminalReason,
}

/// Result of [`Orchestrator::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub reason: TerminalReason,
    pub time_spent: Duration,
    pub score: f64,
}

fn now() -> Now {
    Now {
        // Follows tokio's clock so paused-time tests drive the session clock.
        mono: tokio::time::Instant::now().into_std(),
        wall: Utc::now(),
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Demo,
    Test,
}

/// A background task with its own stop signal.
struct Worker {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "task ended abnormally");
        }
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            warn!(error = %e, "server call panicked");
        }
    }
}

#[derive(Default)]
struct Tasks {
    ticker: Option<Worker>,
    monitor: Option<Worker>,
    stream: Option<JoinHandle<()>>,
    calls: JoinSet<()>,
}

impl Tasks {
    fn replace_stream(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.stream.replace(handle) {
            old.abort();
        }
    }

    fn stop_stream(&mut self) {
        if let Some(old) = self.stream.take() {
            old.abort();
        }
    }

    /// Ticker, then monitor, then question streams, then pending calls.
    async fn shutdown(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop().await;
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }
        if let Some(stream) = self.stream.take() {
            stream.abort();
            let _ = stream.await;
        }
        let drained = tokio::time::timeout(SUBMIT_GRACE, async {
            while let Some(result) = self.calls.join_next().await {
                log_join(result);
            }
        })
        .await;
        if drained.is_err() {
            warn!(pending = self.calls.len(), "abandoning unfinished server calls");
            self.calls.shutdown().await;
        }
    }
}

async fn pump_stream<S: QuizServer + ?Sized>(
    server: Arc<S>,
    kind: StreamKind,
    epoch: u64,
    duration: Duration,
    tx: mpsc::Sender<SessionEvent>,
) {
    let started = match kind {
        StreamKind::Demo => server.start_demo(duration).await,
        StreamKind::Test => server.start_test(duration).await,
    };
    let mut rx = match started {
        Ok(rx) => rx,
        Err(e) => {
            warn!(?kind, epoch, error = %e, "could not start question stream");
            let _ = tx
                .send(SessionEvent::StreamFailed {
                    epoch,
                    reason: e.to_string(),
                })
                .await;
            return;
        }
    };
    debug!(?kind, epoch, "question stream open");
    while let Some(event) = rx.recv().await {
        let last = event == QuestionEvent::End;
        if tx.send(SessionEvent::Stream { epoch, event }).await.is_err() || last {
            return;
        }
    }
    let _ = tx
        .send(SessionEvent::StreamFailed {
            epoch,
            reason: ServerError::Closed.to_string(),
        })
        .await;
}

/// Runs one quiz session from handshake to exit.
///
/// The session is mutated only inside [`run`](Self::run). Ticker, monitor,
/// question streams and the key listener are producers on one event
/// channel; renderers read [`Snapshot`]s from a watch channel.
pub struct Orchestrator<S: QuizServer + 'static> {
    server: Arc<S>,
    config: SessionConfig,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    snapshot_tx: watch::Sender<Option<Snapshot>>,
    ended_tx: broadcast::Sender<SessionEnded>,
    cancel: CancellationToken,
}

impl<S: QuizServer + 'static> Orchestrator<S> {
    pub fn new(server: Arc<S>, config: SessionConfig) -> Self {
        Self::with_cancel(server, config, CancellationToken::new())
    }

    /// Cancelling `cancel` ends the session as if the user pressed the end key.
    pub fn with_cancel(server: Arc<S>, config: SessionConfig, cancel: CancellationToken) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (snapshot_tx, _) = watch::channel(None);
        let (ended_tx, _) = broadcast::channel(4);
        Self {
            server,
            config,
            events_tx,
            events_rx,
            snapshot_tx,
            ended_tx,
            cancel,
        }
    }

    /// Producer handle for key events.
    pub fn events(&self) -> mpsc::Sender<SessionEvent> {
        self.events_tx.clone()
    }

    /// `None` until the handshake finished. Closes when `run` returns.
    pub fn snapshots(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn subscribe_ended(&self) -> broadcast::Receiver<SessionEnded> {
        self.ended_tx.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(mut self) -> Outcome {
        let mut session = self.handshake().await;
        self.publish(&session);

        let mut tasks = Tasks::default();
        let reason = match session.terminal_reason().cloned() {
            Some(reason) => reason,
            None => {
                self.spawn_background(&mut tasks);
                self.drive(&mut session, &mut tasks).await
            }
        };

        tasks.shutdown().await;
        self.server.close().await;
        if self.ended_tx.send(SessionEnded { reason: reason.clone() }).is_err() {
            debug!("no SessionEnded subscribers");
        }
        self.publish(&session);

        let hold = match reason {
            TerminalReason::Final { .. } => self.config.final_display,
            TerminalReason::Error { .. } => self.config.error_display,
        };
        info!(?reason, hold = ?hold, "session over");
        tokio::time::sleep(hold).await;

        Outcome {
            reason,
            time_spent: session.clock().elapsed(),
            score: session.score(),
        }
    }

    async fn handshake(&self) -> Session {
        let limit = self.config.handshake_timeout;
        match tokio::time::timeout(limit, self.server.connect()).await {
            Ok(Ok(handshake)) => Session::connected(self.config.clone(), &handshake, &now()),
            Ok(Err(e)) => Session::unreachable(self.config.clone(), e.to_string()),
            Err(_) => Session::unreachable(self.config.clone(), ServerError::Timeout(limit).to_string()),
        }
    }

    fn spawn_background(&self, tasks: &mut Tasks) {
        let cancel = self.cancel.child_token();
        tasks.ticker = Some(Worker {
            name: "ticker",
            handle: tokio::spawn(run_ticker(
                self.events_tx.clone(),
                self.config.tick_interval,
                cancel.clone(),
            )),
            cancel,
        });

        let cancel = self.cancel.child_token();
        let monitor = ConnectionMonitor::new(
            Arc::clone(&self.server),
            self.events_tx.clone(),
            self.config.probe_interval,
            self.config.ping_timeout,
        );
        tasks.monitor = Some(Worker {
            name: "monitor",
            handle: tokio::spawn(monitor.run(cancel.clone())),
            cancel,
        });
    }

    /// The event loop. Returns once the session is terminal.
    async fn drive(&mut self, session: &mut Session, tasks: &mut Tasks) -> TerminalReason {
        info!("session loop started");
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("cancellation requested");
                    SessionEvent::Cancel
                }
                Some(event) = self.events_rx.recv() => event,
                Some(result) = tasks.calls.join_next() => {
                    log_join(result);
                    continue;
                }
                else => SessionEvent::Cancel,
            };

            for effect in session.apply(event, &now()) {
                self.execute(effect, tasks);
            }
            self.publish(session);

            if let Some(reason) = session.terminal_reason() {
                return reason.clone();
            }
        }
    }

    fn execute(&self, effect: Effect, tasks: &mut Tasks) {
        match effect {
            Effect::StartDemo { epoch, duration } => {
                tasks.replace_stream(self.spawn_stream(StreamKind::Demo, epoch, duration));
            }
            Effect::StartTest { epoch, duration } => {
                tasks.replace_stream(self.spawn_stream(StreamKind::Test, epoch, duration));
            }
            Effect::StopStreams => tasks.stop_stream(),
            Effect::SubmitAnswer(submission) => {
                let server = Arc::clone(&self.server);
                tasks.calls.spawn(async move {
                    if let Err(e) = server.submit_answer(&submission).await {
                        warn!(question = %submission.question_id, error = %e, "answer not delivered");
                    }
                });
            }
            Effect::Ended(reason) => debug!(?reason, "terminal transition"),
        }
    }

    fn spawn_stream(&self, kind: StreamKind, epoch: u64, duration: Duration) -> JoinHandle<()> {
        tokio::spawn(pump_stream(
            Arc::clone(&self.server),
            kind,
            epoch,
            duration,
            self.events_tx.clone(),
        ))
    }

    fn publish(&self, session: &Session) {
        self.snapshot_tx.send_replace(Some(session.snapshot(Utc::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::DateTime;
    use gru_core::{
        AnswerOption, AnswerSubmission, EndReason, ErrorReason, Handshake, Key, Page, Question,
    };
    use tokio::sync::broadcast::error::TryRecvError;

    #[derive(Default)]
    struct MockServer {
        reject: Option<String>,
        connect_delay: Option<Duration>,
        ping_fails: bool,
        fail_test_start: bool,
        handshake: Handshake,
        demo: Vec<QuestionEvent>,
        test: Vec<QuestionEvent>,
        log: Mutex<Vec<String>>,
        open: Mutex<Vec<mpsc::Sender<QuestionEvent>>>,
    }

    impl MockServer {
        fn record(&self, call: impl Into<String>) {
            self.log.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn stream(&self, events: &[QuestionEvent]) -> mpsc::Receiver<QuestionEvent> {
            let (tx, rx) = mpsc::channel(16);
            for event in events {
                tx.try_send(event.clone()).unwrap();
            }
            self.open.lock().unwrap().push(tx);
            rx
        }
    }

    #[async_trait]
    impl QuizServer for MockServer {
        async fn connect(&self) -> Result<Handshake, ServerError> {
            self.record("connect");
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            match &self.reject {
                Some(reason) => Err(ServerError::Rejected(reason.clone())),
                None => Ok(self.handshake.clone()),
            }
        }

        async fn ping(&self) -> Result<DateTime<Utc>, ServerError> {
            if self.ping_fails {
                Err(ServerError::Closed)
            } else {
                Ok(Utc::now())
            }
        }

        async fn start_demo(&self, _: Duration) -> Result<mpsc::Receiver<QuestionEvent>, ServerError> {
            self.record("start_demo");
            Ok(self.stream(&self.demo))
        }

        async fn start_test(&self, _: Duration) -> Result<mpsc::Receiver<QuestionEvent>, ServerError> {
            self.record("start_test");
            if self.fail_test_start {
                return Err(ServerError::Rejected("test not scheduled".into()));
            }
            Ok(self.stream(&self.test))
        }

        async fn submit_answer(&self, submission: &AnswerSubmission) -> Result<(), ServerError> {
            self.record(format!("answer {} {:?}", submission.question_id, submission.answer_ids));
            Ok(())
        }

        async fn close(&self) {
            self.record("close");
        }
    }

    fn question(id: &str) -> QuestionEvent {
        QuestionEvent::Question(Question {
            id: id.to_string(),
            text: format!("question {id}"),
            options: (0..3)
                .map(|i| AnswerOption {
                    id: format!("{id}-{i}"),
                    text: format!("option {i}"),
                })
                .collect(),
            positive: 5.0,
            negative: 2.5,
            multiple: false,
            time_left: None,
        })
    }

    async fn wait_for(snaps: &mut watch::Receiver<Option<Snapshot>>, f: impl Fn(&Snapshot) -> bool) {
        snaps
            .wait_for(|s| s.as_ref().is_some_and(&f))
            .await
            .expect("orchestrator exited early");
    }

    async fn key(tx: &mpsc::Sender<SessionEvent>, key: Key) {
        tx.send(SessionEvent::Key(key)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn demo_then_test_then_user_end() {
        let server = Arc::new(MockServer {
            demo: vec![question("d1"), QuestionEvent::End],
            test: vec![question("t1")],
            ..MockServer::default()
        });
        let orch = Orchestrator::new(Arc::clone(&server), SessionConfig::default());
        let keys = orch.events();
        let mut snaps = orch.snapshots();
        let mut ended = orch.subscribe_ended();
        let run = tokio::spawn(orch.run());

        wait_for(&mut snaps, |s| s.page == Page::Instructions).await;
        key(&keys, Key::Char('s')).await;
        wait_for(&mut snaps, |s| s.page == Page::Instructions && s.demo_taken).await;

        key(&keys, Key::Char('s')).await;
        wait_for(&mut snaps, |s| s.page == Page::Test && s.question.is_some()).await;
        key(&keys, Key::Char('a')).await;
        key(&keys, Key::Enter).await;
        key(&keys, Key::CtrlQ).await;

        let outcome = run.await.unwrap();
        let user_ended = TerminalReason::Final {
            reason: EndReason::UserEnded,
        };
        assert_eq!(outcome.reason, user_ended);
        assert_eq!(ended.recv().await.unwrap().reason, user_ended);
        assert!(matches!(ended.try_recv(), Err(TryRecvError::Closed)));

        assert_eq!(
            server.calls(),
            vec![
                "connect".to_string(),
                "start_demo".to_string(),
                "start_test".to_string(),
                "answer t1 [\"t1-0\"]".to_string(),
                "close".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expiry_ends_on_final() {
        let config = SessionConfig {
            demo_duration: Duration::from_secs(2),
            test_duration: Duration::from_secs(5),
            ..SessionConfig::default()
        };
        let server = Arc::new(MockServer::default());
        let orch = Orchestrator::new(Arc::clone(&server), config);
        let keys = orch.events();
        let mut snaps = orch.snapshots();
        let run = tokio::spawn(orch.run());

        wait_for(&mut snaps, |s| s.page == Page::Instructions).await;
        key(&keys, Key::Char('s')).await;
        wait_for(&mut snaps, |s| s.page == Page::Instructions && s.demo_taken).await;
        key(&keys, Key::Char('s')).await;

        let outcome = run.await.unwrap();
        assert_eq!(
            outcome.reason,
            TerminalReason::Final {
                reason: EndReason::TimeExpired
            }
        );
        assert_eq!(outcome.time_spent, Duration::from_secs(5));
        assert_eq!(server.calls().iter().filter(|c| *c == "close").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_handshake_holds_error_page() {
        let server = Arc::new(MockServer {
            reject: Some("unknown candidate".into()),
            ..MockServer::default()
        });
        let config = SessionConfig::default();
        let orch = Orchestrator::new(Arc::clone(&server), config.clone());
        let snaps = orch.snapshots();
        let mut ended = orch.subscribe_ended();

        let started = tokio::time::Instant::now();
        let outcome = orch.run().await;
        assert!(started.elapsed() >= config.error_display);
        assert!(matches!(
            outcome.reason,
            TerminalReason::Error {
                reason: ErrorReason::HandshakeFailed { ref detail }
            } if detail.contains("unknown candidate")
        ));
        assert_eq!(server.calls(), vec!["connect".to_string(), "close".to_string()]);
        assert!(ended.recv().await.is_ok());
        assert_eq!(snaps.borrow().as_ref().map(|s| s.page), Some(Page::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handshake_times_out() {
        let server = Arc::new(MockServer {
            connect_delay: Some(Duration::from_secs(60)),
            ..MockServer::default()
        });
        let outcome = Orchestrator::new(server, SessionConfig::default()).run().await;
        match outcome.reason {
            TerminalReason::Error {
                reason: ErrorReason::HandshakeFailed { detail },
            } => assert!(detail.contains("timed out")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_escalates_to_error() {
        let server = Arc::new(MockServer {
            ping_fails: true,
            ..MockServer::default()
        });
        let config = SessionConfig {
            max_consecutive_failures: 3,
            ..SessionConfig::default()
        };
        let outcome = Orchestrator::new(Arc::clone(&server), config).run().await;
        assert_eq!(
            outcome.reason,
            TerminalReason::Error {
                reason: ErrorReason::ConnectionLost { failures: 3 }
            }
        );
        assert_eq!(server.calls(), vec!["connect".to_string(), "close".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_test_start_goes_to_error() {
        let server = Arc::new(MockServer {
            demo: vec![QuestionEvent::End],
            fail_test_start: true,
            ..MockServer::default()
        });
        let orch = Orchestrator::new(Arc::clone(&server), SessionConfig::default());
        let keys = orch.events();
        let mut snaps = orch.snapshots();
        let run = tokio::spawn(orch.run());

        wait_for(&mut snaps, |s| s.page == Page::Instructions).await;
        key(&keys, Key::Char('s')).await;
        wait_for(&mut snaps, |s| s.demo_taken).await;
        key(&keys, Key::Char('s')).await;

        let outcome = run.await.unwrap();
        assert!(matches!(
            outcome.reason,
            TerminalReason::Error {
                reason: ErrorReason::StreamFailed { .. }
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_a_user_end() {
        let orch = Orchestrator::new(Arc::new(MockServer::default()), SessionConfig::default());
        let cancel = orch.cancel_token();
        let mut snaps = orch.snapshots();
        let run = tokio::spawn(orch.run());

        wait_for(&mut snaps, |s| s.page == Page::Instructions).await;
        cancel.cancel();
        let outcome = run.await.unwrap();
        assert_eq!(
            outcome.reason,
            TerminalReason::Final {
                reason: EndReason::UserEnded
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_end_keys_broadcast_once() {
        let server = Arc::new(MockServer::default());
        let orch = Orchestrator::new(Arc::clone(&server), SessionConfig::default());
        let keys = orch.events();
        let mut ended = orch.subscribe_ended();
        key(&keys, Key::CtrlQ).await;
        key(&keys, Key::CtrlQ).await;
        key(&keys, Key::CtrlC).await;

        orch.run().await;
        assert!(ended.recv().await.is_ok());
        assert!(matches!(ended.try_recv(), Err(TryRecvError::Closed)));
        assert_eq!(server.calls().iter().filter(|c| *c == "close").count(), 1);
    }
}
