use std::time::Duration;

use resilink_frame::{DEFAULT_MAX_LINE, HEADER_LEN};

use crate::error::{LinkError, Result};

/// Smallest usable keepalive timeout. Below this the keepalive interval
/// (a quarter of the timeout) races the scheduler.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Tunables shared by both ends of a link.
///
/// `timeout` must be identical on client and server: each side emits
/// keepalives at a quarter of it and declares the link down after a full
/// window with no inbound frame. Mismatched values make one side flap.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Keepalive timeout. No inbound frame for this long means the link
    /// is down.
    pub timeout: Duration,
    /// Maximum line length in bytes, delimiter excluded.
    pub max_line: usize,
    /// Inbound line queue depth. Overflow forces a reconnect so the
    /// sender retransmits instead of us dropping silently.
    pub queue_depth: usize,
    /// Pause between client reconnection attempts.
    pub retry_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_line: DEFAULT_MAX_LINE,
            queue_depth: 20,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl LinkConfig {
    /// Interval between outbound keepalives: a quarter of the timeout,
    /// so several may be lost before the peer's watchdog fires.
    pub fn keepalive_interval(&self) -> Duration {
        self.timeout / 4
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout < MIN_TIMEOUT {
            return Err(LinkError::Config(format!(
                "timeout {:?} is below the minimum {:?}",
                self.timeout, MIN_TIMEOUT
            )));
        }
        if self.max_line <= HEADER_LEN {
            return Err(LinkError::Config(format!(
                "max_line {} leaves no room for a payload",
                self.max_line
            )));
        }
        if self.queue_depth == 0 {
            return Err(LinkError::Config("queue_depth must be non-zero".into()));
        }
        Ok(())
    }
}
