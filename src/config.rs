//! Rig configuration: link endpoints and per-session context.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("expected {expected} `ip:port` lines, got {got}")]
    WrongLineCount { expected: usize, got: usize },

    #[error("line {line} is not a valid `ip:port` endpoint: `{text}`")]
    BadEndpoint { line: usize, text: String },
}

/// Endpoints for one link: blocking receive, send, and (for polling links)
/// the dedicated low-latency receive endpoint.
#[derive(Debug, Clone, Copy)]
pub struct LinkEndpoints {
    pub recv: SocketAddr,
    pub send: SocketAddr,
    pub poll: Option<SocketAddr>,
}

/// Endpoint layout for the whole rig, parsed from 8 newline-separated
/// `ip:port` pairs: display recv/send/poll, tracker recv/send/poll,
/// goggle recv/send.
#[derive(Debug, Clone, Copy)]
pub struct RigLayout {
    pub display: LinkEndpoints,
    pub tracker: LinkEndpoints,
    pub goggle: LinkEndpoints,
}

impl RigLayout {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() != 8 {
            return Err(ConfigError::WrongLineCount {
                expected: 8,
                got: lines.len(),
            });
        }

        let mut addrs = Vec::with_capacity(8);
        for (i, line) in lines.iter().enumerate() {
            let addr: SocketAddr = line.parse().map_err(|_| ConfigError::BadEndpoint {
                line: i + 1,
                text: (*line).to_owned(),
            })?;
            addrs.push(addr);
        }

        Ok(Self {
            display: LinkEndpoints {
                recv: addrs[0],
                send: addrs[1],
                poll: Some(addrs[2]),
            },
            tracker: LinkEndpoints {
                recv: addrs[3],
                send: addrs[4],
                poll: Some(addrs[5]),
            },
            goggle: LinkEndpoints {
                recv: addrs[6],
                send: addrs[7],
                poll: None,
            },
        })
    }
}

/// Session context carried by the trial runner.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RigCtx {
    /// Timestamp identifying the experiment session within a subject record
    pub experiment_timestamp: String,

    /// Subject identifier
    pub subject: String,

    /// Blocking await deadline per link
    pub display_timeout: Duration,
    pub tracker_timeout: Duration,
    pub goggle_timeout: Duration,

    /// Interval between non-blocking receive polls
    pub poll_interval: Duration,

    /// Interval between elapsed-time readout updates while a trial runs
    pub elapsed_interval: Duration,
}

impl Default for RigCtx {
    fn default() -> Self {
        // Current time with seconds as the experiment timestamp, stripped of
        // characters that would be awkward in file names
        let experiment_timestamp = DateTime::<Utc>::from(SystemTime::now())
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            .replace(":", "");
        Self {
            experiment_timestamp,
            subject: String::new(),
            display_timeout: Duration::from_millis(500),
            tracker_timeout: Duration::from_millis(500),
            goggle_timeout: Duration::from_millis(2500),
            poll_interval: Duration::from_millis(15),
            elapsed_interval: Duration::from_secs(1),
        }
    }
}
