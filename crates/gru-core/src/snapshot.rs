//! Immutable view of the session handed to the renderer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connection::ConnectionStatus;
use crate::duration::format_clock;
use crate::page::Page;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionView {
    pub key: char,
    pub text: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    pub text: String,
    pub options: Vec<OptionView>,
    pub multiple: bool,
    pub scoring_info: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub page: Page,
    pub time_left: Duration,
    pub time_spent: Duration,
    pub score: f64,
    pub last_score: f64,
    pub connection: ConnectionStatus,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub status_line: String,
    pub demo_taken: bool,
    pub demo_duration: Duration,
    pub test_duration: Duration,
    /// `None` between questions (after a submit, before the next arrives).
    pub question: Option<QuestionView>,
    /// Final or Error page text.
    pub message: Option<String>,
}

impl Snapshot {
    pub fn time_left_display(&self) -> String {
        format_clock(self.time_left)
    }

    pub fn time_spent_display(&self) -> String {
        format_clock(self.time_spent)
    }

    pub fn score_display(&self) -> String {
        format!("{:.1}", self.score)
    }

    pub fn last_score_display(&self) -> String {
        format!("{:.1}", self.last_score)
    }

    /// Prompt under the Instructions text.
    pub fn start_prompt(&self) -> &'static str {
        if self.demo_taken {
            "Press s to start the quiz."
        } else {
            "We have a demo of how the quiz would look like. Press s to start the demo."
        }
    }
}
