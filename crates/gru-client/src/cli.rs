//! CLI definition using clap derive.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use gru_core::{SessionConfig, parse_go_duration};

#[derive(Parser, Debug)]
#[command(name = "gruclient", about = "Terminal client for timed multiple-choice quizzes")]
pub struct Cli {
    /// Quiz server address (host:port)
    #[arg(long, short = 's', env = "GRU_SERVER", default_value = "localhost:8888")]
    pub server: String,

    /// Candidate token sent with the handshake
    #[arg(long, env = "GRU_TOKEN")]
    pub token: Option<String>,

    /// TOML file with session settings
    #[arg(long, short = 'c', env = "GRU_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where logs go; the terminal belongs to the quiz
    #[arg(long, default_value = "gru.log")]
    pub log_file: PathBuf,

    /// Log at debug level unless GRU_LOG or RUST_LOG says otherwise
    #[arg(long)]
    pub debug: bool,

    /// Demo length, e.g. "2m"
    #[arg(long, value_parser = parse_duration_arg)]
    pub demo_duration: Option<Duration>,

    /// Test length, e.g. "60m"
    #[arg(long, value_parser = parse_duration_arg)]
    pub test_duration: Option<Duration>,

    /// Time between connection probes
    #[arg(long, value_parser = parse_duration_arg)]
    pub probe_interval: Option<Duration>,

    /// Age after which the last successful ping no longer counts
    #[arg(long, value_parser = parse_duration_arg)]
    pub ping_timeout: Option<Duration>,

    /// Failed probes in a row before giving up on the server
    #[arg(long)]
    pub max_failures: Option<u32>,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_go_duration(s).map_err(|e| e.to_string())
}

impl Cli {
    /// Flags win over whatever the config file said.
    pub fn apply_overrides(&self, config: &mut SessionConfig) {
        if let Some(d) = self.demo_duration {
            config.demo_duration = d;
        }
        if let Some(d) = self.test_duration {
            config.test_duration = d;
        }
        if let Some(d) = self.probe_interval {
            config.probe_interval = d;
        }
        if let Some(d) = self.ping_timeout {
            config.ping_timeout = d;
        }
        if let Some(n) = self.max_failures {
            config.max_consecutive_failures = n;
        }
    }

    pub fn default_log_filter(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}
