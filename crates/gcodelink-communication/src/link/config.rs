//! Link tuning

use std::time::Duration;

/// Timing and protocol settings for a [`LinkManager`](super::LinkManager)
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Interval between status polls while connected
    pub status_poll_interval: Duration,
    /// Number of waits for the first status packet after opening
    pub handshake_attempts: u32,
    /// Length of each handshake wait
    pub handshake_interval: Duration,
    /// Number of waits for a queried reply (position, offsets)
    pub query_attempts: u32,
    /// Length of each query wait
    pub query_interval: Duration,
    /// How long to wait for the answer to a line of a replaced batch
    pub orphan_ack_timeout: Duration,
    /// Time allowed for the read task to stop on disconnect
    pub shutdown_timeout: Duration,
    /// Command words that make the controller hold
    pub pause_commands: Vec<String>,
    /// Character starting a same-line comment
    pub comment_marker: char,
    /// Request a status packet after every acknowledged line
    ///
    /// With the default of `true`, a `?` follows each `ok` while a batch runs,
    /// so position tracks the stream. The periodic poll still never writes
    /// while a line is outstanding. Set `false` for no status-only writes at
    /// all during a batch.
    pub status_after_ack: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            status_poll_interval: Duration::from_millis(250),
            handshake_attempts: 10,
            handshake_interval: Duration::from_millis(100),
            query_attempts: 20,
            query_interval: Duration::from_millis(100),
            orphan_ack_timeout: Duration::from_millis(2000),
            shutdown_timeout: Duration::from_millis(500),
            pause_commands: ["M0", "M00", "M1", "M01"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            comment_marker: ';',
            status_after_ack: true,
        }
    }
}

impl LinkConfig {
    /// Total time allowed for a queried reply
    pub fn query_timeout(&self) -> Duration {
        self.query_interval * self.query_attempts
    }
}
