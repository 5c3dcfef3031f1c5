//! Reconnect delay schedule

use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

use crate::config::ClientConfig;

/// Delays between reconnect attempts
///
/// Doubles from the base delay up to the ceiling and yields exactly
/// `max_reconnect_attempts` values. No jitter is applied, so the schedule
/// never decreases.
pub fn reconnect_delays(config: &ClientConfig) -> impl Iterator<Item = Duration> {
    let base_ms = u64::try_from(config.reconnect_base_delay.as_millis()).unwrap_or(u64::MAX);

    // from_millis(2) doubles each step; the factor scales the first step to the base delay
    ExponentialBackoff::from_millis(2)
        .factor((base_ms / 2).max(1))
        .max_delay(config.reconnect_max_delay)
        .take(config.max_reconnect_attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::UserId;

    fn config(base_ms: u64, max_ms: u64, attempts: usize) -> ClientConfig {
        ClientConfig {
            reconnect_base_delay: Duration::from_millis(base_ms),
            reconnect_max_delay: Duration::from_millis(max_ms),
            max_reconnect_attempts: attempts,
            ..ClientConfig::new(UserId::new())
        }
    }

    #[test]
    fn test_delays_double_from_base() {
        let delays: Vec<u64> = reconnect_delays(&config(1000, 60_000, 4))
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn test_delays_capped_and_non_decreasing() {
        let delays: Vec<Duration> = reconnect_delays(&config(500, 3000, 10)).collect();
        assert_eq!(delays.len(), 10);
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(3000)));
        assert_eq!(delays.last(), Some(&Duration::from_millis(3000)));
    }

    #[test]
    fn test_zero_attempts_yields_nothing() {
        assert_eq!(reconnect_delays(&config(1000, 30_000, 0)).count(), 0);
    }
}
