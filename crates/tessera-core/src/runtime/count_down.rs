//! One-shot countdown latch joining a parallel fan-out

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Countdown latch
///
/// Initialized with the exact number of expected [`CountDown::decrease`]
/// calls. The initiating thread blocks in [`CountDown::wait`] until all of
/// them happened. A latch is not reused after it reached zero.
#[derive(Debug, Default)]
pub struct CountDown {
    count: Mutex<u64>,
    zero: Condvar,
}

crate::proxy_opaque!(CountDown => "CountDown");

impl CountDown {
    /// Arm the latch for `count` decrements
    pub fn init(&mut self, count: u64) {
        *self.count.get_mut() = count;
    }

    /// Record one completion; wakes waiters on reaching zero
    pub fn decrease(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "CountDown decreased past zero");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Block until the count reaches zero
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }

    /// Block until zero or until `timeout` elapses; true if zero was reached
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        while *count > 0 {
            if self.zero.wait_for(&mut count, timeout).timed_out() {
                return *count == 0;
            }
        }
        true
    }

    /// Remaining decrements
    pub fn remaining(&self) -> u64 {
        *self.count.lock()
    }

    /// Release the latch
    pub fn destroy(&mut self) {
        *self.count.get_mut() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_after_all_decrements() {
        let mut latch = CountDown::default();
        latch.init(4);
        let latch = Arc::new(latch);
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || latch.decrease())
            })
            .collect();
        latch.wait();
        assert_eq!(latch.remaining(), 0);
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_missing_decrement_keeps_waiter_blocked() {
        let mut latch = CountDown::default();
        latch.init(2);
        latch.decrease();
        assert!(!latch.wait_timeout(Duration::from_millis(50)));
        latch.decrease();
        assert!(latch.wait_timeout(Duration::from_millis(50)));
    }

    #[test]
    fn test_zero_count_does_not_block() {
        let latch = CountDown::default();
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }
}
