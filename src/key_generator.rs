//! Window key derivation for the per-client counters.

use std::fmt;

/// Length of one rate limit window, in seconds.
pub const WINDOW_SECS: u64 = 60;

const KEY_PREFIX: &str = "rl";

/// Counter key for one client in one wall-clock minute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    client: String,
    window: u64,
}

impl WindowKey {
    pub fn new(client: &str, unix_seconds: u64) -> Self {
        Self {
            client: Self::sanitize(client),
            window: unix_seconds / WINDOW_SECS,
        }
    }

    /// Seconds until this window closes, as seen at `unix_seconds`.
    pub fn seconds_remaining(&self, unix_seconds: u64) -> u64 {
        let end = (self.window + 1) * WINDOW_SECS;
        end.saturating_sub(unix_seconds).max(1)
    }

    /// Keep keys printable; whitespace and control characters become `_`.
    fn sanitize(client: &str) -> String {
        let trimmed = client.trim();
        if trimmed.is_empty() {
            return "unknown".to_string();
        }
        trimmed
            .chars()
            .map(|c| {
                if c.is_whitespace() || c.is_control() {
                    '_'
                } else {
                    c
                }
            })
            .collect()
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", KEY_PREFIX, self.client, self.window)
    }
}
