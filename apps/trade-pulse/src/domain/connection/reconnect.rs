//! Reconnection Schedule
//!
//! Fixed lookup table of delays between reconnection attempts. Not
//! exponential: once the table is used up the session gives up.

use std::time::Duration;

/// Default schedule: immediately, then 2s, 10s and 30s.
pub const DEFAULT_RECONNECT_DELAYS: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Reconnection schedule driven by a fixed delay table.
///
/// Each delay is waited out after the previous attempt concluded.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use trade_pulse::domain::connection::ReconnectSchedule;
///
/// let mut schedule = ReconnectSchedule::default();
/// assert_eq!(schedule.next_delay(), Some(Duration::ZERO));
/// assert_eq!(schedule.next_delay(), Some(Duration::from_secs(2)));
///
/// // Successful reconnect
/// schedule.reset();
/// assert_eq!(schedule.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    delays: Vec<Duration>,
    attempt_count: usize,
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAYS.to_vec())
    }
}

impl ReconnectSchedule {
    /// Create a schedule from an explicit delay table.
    #[must_use]
    pub const fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the table is exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.delays.get(self.attempt_count).copied()?;
        self.attempt_count += 1;
        Some(delay)
    }

    /// Start over after a successful reconnect.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> usize {
        self.attempt_count
    }

    /// Maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.attempt_count < self.delays.len()
    }

    /// The delay table.
    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_fixed_table() {
        let mut schedule = ReconnectSchedule::default();

        assert_eq!(schedule.next_delay(), Some(Duration::ZERO));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(10)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(30)));

        // No fifth attempt
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.attempt_count(), 4);
        assert!(!schedule.should_retry());
    }

    #[test]
    fn exhausted_schedule_stays_exhausted() {
        let mut schedule = ReconnectSchedule::default();
        while schedule.next_delay().is_some() {}

        for _ in 0..10 {
            assert_eq!(schedule.next_delay(), None);
        }
        assert_eq!(schedule.attempt_count(), schedule.max_attempts());
    }

    #[test]
    fn reset_restarts_table() {
        let mut schedule = ReconnectSchedule::default();
        let _ = schedule.next_delay();
        let _ = schedule.next_delay();
        assert_eq!(schedule.attempt_count(), 2);

        schedule.reset();

        assert_eq!(schedule.attempt_count(), 0);
        assert!(schedule.should_retry());
        assert_eq!(schedule.next_delay(), Some(Duration::ZERO));
    }

    #[test]
    fn custom_table() {
        let mut schedule = ReconnectSchedule::new(vec![Duration::from_millis(5)]);
        assert_eq!(schedule.delays(), &[Duration::from_millis(5)]);
        assert_eq!(schedule.max_attempts(), 1);
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(5)));
        assert_eq!(schedule.next_delay(), None);
    }

    #[test]
    fn empty_table_never_retries() {
        let mut schedule = ReconnectSchedule::new(Vec::new());
        assert!(!schedule.should_retry());
        assert_eq!(schedule.next_delay(), None);
    }
}
