//! Global flags and pipeline tunables

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Global configuration flags
pub static VERBOSE: AtomicBool = AtomicBool::new(false);
pub static DEBUG: AtomicBool = AtomicBool::new(false);

/// Check if verbose logging is enabled
#[inline]
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Check if debug logging is enabled
#[inline]
pub fn is_debug() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

pub const DEFAULT_RTSP_PORT: u16 = 554;
pub const MAX_TRANSPORT_ERRORS: u32 = 50;
pub const STARVATION_THRESHOLD: u32 = 10;

/// Timeouts, thresholds and sizes used by the controller and decode loops.
///
/// `Default` gives the production values; tests shrink the waits.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// TCP connect timeout per resolved address
    pub connect_timeout: Duration,
    /// Socket read timeout while the session is running
    pub read_timeout: Duration,
    /// Window after start in which the session must report progress
    /// before the empty state is shown
    pub watchdog_timeout: Duration,
    /// Transient transport faults tolerated before the restart action fires
    pub max_transport_errors: u32,
    /// First delay between reconnect attempts, doubled up to `max_retry_delay`
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Bounded wait for a decoder input slot
    pub input_timeout: Duration,
    /// Bounded wait for decoder output
    pub output_timeout: Duration,
    /// Bounded wait on the frame queue
    pub pop_timeout: Duration,
    /// Consecutive empty pops reported as one starvation event
    pub starvation_threshold: u32,
    /// Requested decoder output size
    pub surface_width: u32,
    pub surface_height: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            watchdog_timeout: Duration::from_secs(5),
            max_transport_errors: MAX_TRANSPORT_ERRORS,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(10),
            input_timeout: Duration::from_millis(500),
            output_timeout: Duration::from_millis(100),
            pop_timeout: Duration::from_millis(100),
            starvation_threshold: STARVATION_THRESHOLD,
            surface_width: 1920,
            surface_height: 1080,
        }
    }
}

impl PlayerConfig {
    /// Next reconnect delay after `current`, capped at `max_retry_delay`
    pub fn next_retry_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_retry_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_up_to_cap() {
        let config = PlayerConfig::default();
        let mut delay = config.retry_delay;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(delay.as_secs());
            delay = config.next_retry_delay(delay);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 10, 10]);
    }
}
