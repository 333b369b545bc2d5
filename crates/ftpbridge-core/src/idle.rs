//! # Idle Counter
//!
//! Throttles the "no files to process" report of the poll loop.
//!
//! With a period of 25 the report fires on empty cycles 1, 26, 51, ...
//! A successful claim resets the counter so the next empty cycle reports again.

use crate::IDLE_REPORT_EVERY;

/// Rolling counter of consecutive empty poll cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleCounter {
    count: i64,
    report_every: i64,
}

impl Default for IdleCounter {
    fn default() -> Self {
        Self::new(IDLE_REPORT_EVERY)
    }
}

impl IdleCounter {
    pub fn new(report_every: u32) -> Self {
        Self {
            count: 0,
            report_every: i64::from(report_every.max(1)),
        }
    }

    /// Records one empty cycle; returns true when it should be reported.
    pub fn record_empty(&mut self) -> bool {
        let value = self.count;
        self.count += 1;
        if value >= self.report_every || value < 0 {
            self.count = 1;
            return true;
        }
        value == 0
    }

    /// Records a successful claim.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> i64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_first_and_every_twenty_fifth_after() {
        let mut counter = IdleCounter::default();
        let reported: Vec<usize> = (1..=60)
            .filter(|_| counter.record_empty())
            .collect();
        assert_eq!(reported, vec![1, 26, 51]);
    }

    #[test]
    fn test_cycles_two_to_twenty_five_are_silent() {
        let mut counter = IdleCounter::default();
        assert!(counter.record_empty());
        for cycle in 2..=25 {
            assert!(!counter.record_empty(), "cycle {} reported", cycle);
        }
        assert!(counter.record_empty());
    }

    #[test]
    fn test_reset_after_claim() {
        let mut counter = IdleCounter::default();
        for _ in 0..10 {
            counter.record_empty();
        }
        counter.reset();
        assert_eq!(counter.count(), 0);
        assert!(counter.record_empty());
    }

    #[test]
    fn test_negative_count_wraps() {
        let mut counter = IdleCounter {
            count: -3,
            report_every: 25,
        };
        assert!(counter.record_empty());
        assert_eq!(counter.count(), 1);
    }
}
