//! gru-client: terminal quiz client.
//! Owns every side effect of a session: the server connection, ticker and
//! probe tasks, the orchestrator loop and the ratatui front end.
//! Session state itself lives in `gru-core`.

pub mod cli;
pub mod config;
pub mod monitor;
pub mod orchestrator;
pub mod server;
pub mod ticker;
pub mod transport;
pub mod tui;
