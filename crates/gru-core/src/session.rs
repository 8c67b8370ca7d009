//! The session aggregate and its single mutation entry point.
//!
//! [`Session::apply`] is the only way state changes. The orchestrator calls
//! it from one loop, one event at a time, and executes the returned
//! [`Effect`]s; nothing else holds a mutable reference.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, TickOutcome};
use crate::config::SessionConfig;
use crate::connection::{ConnectionHealth, ProbeResult};
use crate::controller::PageController;
use crate::duration::parse_go_duration;
use crate::error::SessionError;
use crate::handlers::{Action, Key, answer_key};
use crate::page::{EndReason, ErrorReason, Page, TerminalReason};
use crate::question::{AnswerSubmission, Question, QuestionEvent, Selection};
use crate::snapshot::{OptionView, QuestionView, Snapshot};

/// The two clocks every event is applied against.
#[derive(Debug, Clone, Copy)]
pub struct Now {
    pub mono: Instant,
    pub wall: DateTime<Utc>,
}

impl Now {
    pub fn current() -> Self {
        Self {
            mono: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// What the server said when the connection was established. Durations are
/// optional overrides of the configured ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    pub demo_duration: Option<String>,
    pub test_duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Tick,
    Probe(ProbeResult),
    Key(Key),
    /// An item from the question stream started at `epoch`.
    Stream { epoch: u64, event: QuestionEvent },
    StreamFailed { epoch: u64, reason: String },
    /// The process was asked to stop.
    Cancel,
}

/// Work the orchestrator performs on the session's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartDemo { epoch: u64, duration: Duration },
    StartTest { epoch: u64, duration: Duration },
    SubmitAnswer(AnswerSubmission),
    /// The page that owned the running question stream was left.
    StopStreams,
    /// Emitted once, on the transition into Final or Error.
    Ended(TerminalReason),
}

#[derive(Debug, Clone)]
pub struct Session {
    config: SessionConfig,
    controller: PageController,
    clock: Clock,
    connection: ConnectionHealth,
    demo_duration: Duration,
    test_duration: Duration,
    demo_taken: bool,
    score: f64,
    last_score: f64,
    question: Option<Question>,
    selection: Selection,
    terminal: Option<TerminalReason>,
}

fn resolve_duration(field: &str, reported: Option<&str>, fallback: Duration) -> Duration {
    let Some(raw) = reported else {
        return fallback;
    };
    match parse_go_duration(raw) {
        Ok(d) if !d.is_zero() => d,
        Ok(_) => {
            warn!(field, "server reported a zero duration, keeping configured value");
            fallback
        }
        Err(source) => {
            let err = SessionError::MalformedTimerInput {
                input: raw.to_string(),
                source,
            };
            warn!(field, error = %err, kept = ?fallback, "ignoring server duration");
            fallback
        }
    }
}

impl Session {
    fn base(config: SessionConfig, initial: Page) -> Self {
        Self {
            controller: PageController::new(initial),
            clock: Clock::new(config.tick_interval),
            connection: ConnectionHealth::new(config.ping_timeout),
            demo_duration: config.demo_duration,
            test_duration: config.test_duration,
            demo_taken: false,
            score: 0.0,
            last_score: 0.0,
            question: None,
            selection: Selection::default(),
            terminal: None,
            config,
        }
    }

    /// A session whose handshake succeeded; starts on Instructions.
    pub fn connected(config: SessionConfig, handshake: &Handshake, now: &Now) -> Self {
        let mut session = Self::base(config, Page::Instructions);
        session.demo_duration = resolve_duration(
            "demo_duration",
            handshake.demo_duration.as_deref(),
            session.config.demo_duration,
        );
        session.test_duration = resolve_duration(
            "test_duration",
            handshake.test_duration.as_deref(),
            session.config.test_duration,
        );
        session.connection.mark_connected(now.wall);
        info!(
            demo = ?session.demo_duration,
            test = ?session.test_duration,
            "session started"
        );
        session
    }

    /// A session that never reached the server; starts, and stays, on Error.
    pub fn unreachable(config: SessionConfig, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        warn!(detail = %detail, "handshake failed");
        let mut session = Self::base(config, Page::Error);
        session.terminal = Some(TerminalReason::Error {
            reason: ErrorReason::HandshakeFailed { detail },
        });
        session
    }

    pub fn page(&self) -> Page {
        self.controller.page()
    }

    pub fn controller(&self) -> &PageController {
        &self.controller
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn connection(&self) -> &ConnectionHealth {
        &self.connection
    }

    pub fn demo_taken(&self) -> bool {
        self.demo_taken
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn last_score(&self) -> f64 {
        self.last_score
    }

    pub fn question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    pub fn is_ended(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn terminal_reason(&self) -> Option<&TerminalReason> {
        self.terminal.as_ref()
    }

    /// Apply one event. Events after the session ended are dropped.
    pub fn apply(&mut self, event: SessionEvent, now: &Now) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.terminal.is_some() {
            trace!(?event, "session ended, dropping event");
            return effects;
        }
        match event {
            SessionEvent::Tick => self.on_tick(now, &mut effects),
            SessionEvent::Probe(result) => self.on_probe(&result, &mut effects),
            SessionEvent::Key(key) => self.on_key(key, now, &mut effects),
            SessionEvent::Stream { epoch, event } => {
                if self.owns_stream(epoch) {
                    self.on_stream(event, &mut effects);
                } else {
                    debug!(epoch, current = self.controller.epoch(), "dropping stale stream event");
                }
            }
            SessionEvent::StreamFailed { epoch, reason } => {
                if self.owns_stream(epoch) {
                    self.terminate(ErrorReason::StreamFailed { detail: reason }, &mut effects);
                } else {
                    debug!(epoch, reason = %reason, "stale stream failure ignored");
                }
            }
            SessionEvent::Cancel => self.terminate(EndReason::UserEnded, &mut effects),
        }
        effects
    }

    fn owns_stream(&self, epoch: u64) -> bool {
        self.page().is_timed() && epoch == self.controller.epoch()
    }

    fn on_tick(&mut self, now: &Now, effects: &mut Vec<Effect>) {
        if !self.page().is_timed() {
            return;
        }
        if self.clock.tick(now.mono) == TickOutcome::Expired {
            match self.page() {
                Page::Demo => {
                    info!("demo time is up");
                    self.finish_demo(effects);
                }
                Page::Test => self.terminate(EndReason::TimeExpired, effects),
                _ => {}
            }
        }
    }

    fn on_probe(&mut self, result: &ProbeResult, effects: &mut Vec<Effect>) {
        if self.connection.record(result).is_ok() {
            return;
        }
        let failures = self.connection.consecutive_failures();
        if failures >= self.config.max_consecutive_failures {
            let err = SessionError::PersistentConnection { failures };
            warn!(error = %err, "escalating to error page");
            self.terminate(ErrorReason::ConnectionLost { failures }, effects);
        }
    }

    fn on_key(&mut self, key: Key, now: &Now, effects: &mut Vec<Effect>) {
        let Ok(action) = self.controller.dispatch(key) else {
            return;
        };
        debug!(%key, ?action, page = %self.page(), "key action");
        match action {
            Action::StartDemo => {
                if let Some(epoch) = self.start_timed(Page::Demo, self.demo_duration, now) {
                    effects.push(Effect::StartDemo {
                        epoch,
                        duration: self.demo_duration,
                    });
                }
            }
            Action::StartTest => {
                if let Some(epoch) = self.start_timed(Page::Test, self.test_duration, now) {
                    effects.push(Effect::StartTest {
                        epoch,
                        duration: self.test_duration,
                    });
                }
            }
            Action::EndQuiz | Action::EndTest => self.terminate(EndReason::UserEnded, effects),
            Action::EndDemo => self.finish_demo(effects),
            Action::ToggleAnswer(index) => {
                if let Some(question) = &self.question {
                    self.selection.toggle(question, index);
                }
            }
            Action::SubmitAnswer => {
                if let Some(question) = self.question.take() {
                    let submission = self.selection.submission(&question);
                    self.selection.clear();
                    debug!(question = %submission.question_id, skip = submission.is_skip(), "answer submitted");
                    effects.push(Effect::SubmitAnswer(submission));
                }
            }
        }
    }

    fn start_timed(&mut self, page: Page, duration: Duration, now: &Now) -> Option<u64> {
        match self.controller.enter(page, self.demo_taken) {
            Ok(epoch) => {
                self.clock.start(duration, now.mono);
                self.question = None;
                self.selection.clear();
                self.score = 0.0;
                self.last_score = 0.0;
                info!(%page, ?duration, "timed page started");
                Some(epoch)
            }
            Err(e) => {
                warn!(error = %e, "cannot start timed page");
                None
            }
        }
    }

    fn on_stream(&mut self, event: QuestionEvent, effects: &mut Vec<Effect>) {
        match event {
            QuestionEvent::Question(question) => {
                if let Some(time_left) = &question.time_left {
                    // A malformed value is logged by the clock and the
                    // previous remaining time stays.
                    let _ = self.clock.set_time_left_str(time_left);
                }
                debug!(question = %question.id, "question received");
                self.question = Some(question);
                self.selection.clear();
            }
            QuestionEvent::Score { total, last } => {
                self.score = total;
                self.last_score = last;
            }
            QuestionEvent::End => match self.page() {
                Page::Demo => self.finish_demo(effects),
                Page::Test => self.terminate(EndReason::AllAnswered, effects),
                _ => {}
            },
        }
    }

    fn finish_demo(&mut self, effects: &mut Vec<Effect>) {
        match self.controller.return_from_demo() {
            Ok(_) => {
                self.clock.stop();
                self.question = None;
                self.selection.clear();
                self.demo_taken = true;
                info!("demo finished");
                effects.push(Effect::StopStreams);
            }
            Err(e) => warn!(error = %e, "cannot leave demo"),
        }
    }

    fn terminate(&mut self, reason: impl Into<TerminalReason>, effects: &mut Vec<Effect>) {
        if self.terminal.is_some() {
            return;
        }
        let reason = reason.into();
        if let Err(e) = self.controller.enter(reason.page(), self.demo_taken) {
            warn!(error = %e, "terminal transition refused");
            return;
        }
        self.clock.stop();
        self.question = None;
        self.selection.clear();
        info!(?reason, "session ended");
        self.terminal = Some(reason.clone());
        effects.push(Effect::Ended(reason));
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Snapshot {
        let reading = self.clock.reading();
        let question = self.question.as_ref().map(|q| QuestionView {
            text: q.text.clone(),
            multiple: q.multiple,
            scoring_info: q.scoring_info(),
            options: q
                .options
                .iter()
                .enumerate()
                .filter_map(|(i, o)| {
                    answer_key(i).map(|key| OptionView {
                        key,
                        text: o.text.clone(),
                        selected: self.selection.is_selected(i),
                    })
                })
                .collect(),
        });
        Snapshot {
            page: self.page(),
            time_left: reading.remaining,
            time_spent: reading.elapsed,
            score: self.score,
            last_score: self.last_score,
            connection: self.connection.status(now),
            last_ping_at: self.connection.last_ping_at(),
            status_line: self.connection.status_line(now),
            demo_taken: self.demo_taken,
            demo_duration: self.demo_duration,
            test_duration: self.test_duration,
            question,
            message: self.terminal.as_ref().map(|r| r.message().to_string()),
        }
    }
}
