use std::fmt;

use serde::{Deserialize, Serialize};

/// One screen of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    Error,
    Instructions,
    Demo,
    Test,
    Final,
}

impl Page {
    /// Final and Error have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Page::Final | Page::Error)
    }

    /// Pages that run the countdown clock.
    pub fn is_timed(self) -> bool {
        matches!(self, Page::Demo | Page::Test)
    }

    /// Whether `self -> to` is an edge of the page graph.
    pub fn can_enter(self, to: Page) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, to) {
            (_, Page::Final | Page::Error) => true,
            (Page::Instructions, Page::Demo | Page::Test) => true,
            (Page::Demo, Page::Instructions) => true,
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Page::Error => "error",
            Page::Instructions => "instructions",
            Page::Demo => "demo",
            Page::Test => "test",
            Page::Final => "final",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why the quiz reached the Final page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    TimeExpired,
    UserEnded,
    AllAnswered,
}

impl EndReason {
    pub fn message(self) -> &'static str {
        match self {
            EndReason::TimeExpired => {
                "Your time is up. Thank you for taking the quiz. We will get back to you soon."
            }
            EndReason::UserEnded => {
                "You ended the quiz. Thank you for taking it. We will get back to you soon."
            }
            EndReason::AllAnswered => {
                "You have answered all the questions. Thank you for taking the quiz. We will get back to you soon."
            }
        }
    }
}

/// Why the session landed on the Error page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorReason {
    HandshakeFailed { detail: String },
    ConnectionLost { failures: u32 },
    StreamFailed { detail: String },
}

pub const ERROR_MESSAGE: &str =
    "Can't connect to server. Please send the file gru.log to the quiz administrator.";

/// The single reason a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum TerminalReason {
    Final { reason: EndReason },
    Error { reason: ErrorReason },
}

impl TerminalReason {
    pub fn page(&self) -> Page {
        match self {
            TerminalReason::Final { .. } => Page::Final,
            TerminalReason::Error { .. } => Page::Error,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            TerminalReason::Final { reason } => reason.message(),
            TerminalReason::Error { .. } => ERROR_MESSAGE,
        }
    }
}

impl From<EndReason> for TerminalReason {
    fn from(reason: EndReason) -> Self {
        TerminalReason::Final { reason }
    }
}

impl From<ErrorReason> for TerminalReason {
    fn from(reason: ErrorReason) -> Self {
        TerminalReason::Error { reason }
    }
}
