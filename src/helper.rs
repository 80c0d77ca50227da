//! Helper utilities for Udprelay
//!
//! Shared defaults and small utilities used by the relay engine and the CLI.

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::borrow::Cow;
use std::time::Duration;

/// Default maximum datagram size in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Largest payload a UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Default idle timeout for client flows in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Default upstream re-resolution interval in seconds
pub const DEFAULT_RESOLVE_INTERVAL_SECS: u64 = 30;

/// First delay after a listener read error
pub const READ_ERROR_INITIAL_DELAY: Duration = Duration::from_millis(10);

/// Upper bound on the delay between failing listener reads
pub const READ_ERROR_MAX_DELAY: Duration = Duration::from_secs(1);

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Backoff policy applied between consecutive listener read errors.
///
/// Never gives up: the listener keeps reading for as long as the relay is
/// open, the policy only spaces out the retries.
pub fn read_error_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(READ_ERROR_INITIAL_DELAY)
        .with_randomization_factor(0.0)
        .with_multiplier(2.0)
        .with_max_interval(READ_ERROR_MAX_DELAY)
        .with_max_elapsed_time(None)
        .build()
}

/// Render a payload for debug records
pub fn payload_preview(data: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_BUFFER_SIZE, 4096);
        assert_eq!(MAX_DATAGRAM_SIZE, 65535);
        assert_eq!(DEFAULT_IDLE_TIMEOUT_SECS, 60);
        assert_eq!(DEFAULT_RESOLVE_INTERVAL_SECS, 30);
    }

    #[test]
    fn test_duration_from_secs() {
        assert_eq!(duration_from_secs(5), Duration::from_secs(5));
        assert_eq!(duration_from_secs(0), Duration::from_secs(0));
        assert_eq!(duration_from_secs(3600), Duration::from_secs(3600));
    }

    #[test]
    fn test_read_error_backoff_grows_and_caps() {
        let mut policy = read_error_backoff();

        let first = policy.next_backoff().unwrap();
        assert!(first >= READ_ERROR_INITIAL_DELAY);
        assert!(first < READ_ERROR_INITIAL_DELAY * 2);

        let second = policy.next_backoff().unwrap();
        assert!(second > first);

        for _ in 0..20 {
            let delay = policy.next_backoff().unwrap();
            assert!(delay <= READ_ERROR_MAX_DELAY + Duration::from_millis(1));
        }
    }

    #[test]
    fn test_read_error_backoff_reset() {
        let mut policy = read_error_backoff();
        for _ in 0..5 {
            policy.next_backoff();
        }
        policy.reset();
        let delay = policy.next_backoff().unwrap();
        assert!(delay < READ_ERROR_INITIAL_DELAY * 2);
    }

    #[test]
    fn test_payload_preview() {
        assert_eq!(payload_preview(b"PING"), "PING");
        assert_eq!(payload_preview(&[0x50, 0xFF]), "P\u{FFFD}");
    }
}
