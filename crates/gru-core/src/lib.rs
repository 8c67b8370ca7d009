//! gru-core: quiz session state for the terminal client.
//! Page graph, per-page key bindings, the countdown clock, connection
//! health and the session aggregate that ties them together.
//! No IO here: the client crate feeds events in and executes effects.

pub mod clock;
pub mod config;
pub mod connection;
pub mod controller;
pub mod duration;
pub mod error;
pub mod handlers;
pub mod page;
pub mod question;
pub mod session;
pub mod snapshot;

pub use clock::{Clock, ClockReading, TickOutcome};
pub use config::{ConfigError, SessionConfig};
pub use connection::{ConnectionHealth, ConnectionStatus, ProbeOutcome, ProbeResult};
pub use controller::PageController;
pub use duration::{DurationParseError, format_clock, format_go_duration, parse_go_duration};
pub use error::SessionError;
pub use handlers::{Action, HandlerSet, Key};
pub use page::{EndReason, ErrorReason, Page, TerminalReason};
pub use question::{AnswerOption, AnswerSubmission, Question, QuestionEvent, Selection};
pub use session::{Effect, Handshake, Now, Session, SessionEvent};
pub use snapshot::{OptionView, QuestionView, Snapshot};
