//! Error taxonomy for the session core.
//!
//! None of these abort the process. The orchestrator decides which ones
//! escalate to a page transition.

use thiserror::Error;

use crate::duration::DurationParseError;
use crate::handlers::Key;
use crate::page::Page;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A single failed probe. Only the status indicator changes.
    #[error("connection probe failed: {reason}")]
    TransientConnection { reason: String },

    /// Probe failures beyond the configured grace threshold.
    #[error("connection lost after {failures} consecutive failed probes")]
    PersistentConnection { failures: u32 },

    /// A duration value that could not be parsed. The previous value is kept.
    #[error("malformed timer input {input:?}: {source}")]
    MalformedTimerInput {
        input: String,
        #[source]
        source: DurationParseError,
    },

    /// A key with no binding on the current page.
    #[error("key {key} is not bound on the {page} page")]
    InputOutOfContext { key: Key, page: Page },

    #[error("no transition from the {from} page to the {to} page")]
    InvalidTransition { from: Page, to: Page },
}
