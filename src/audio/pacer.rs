//! Fixed-period loop pacing for the software backends

use std::time::{Duration, Instant};

/// Sleeps until the next tick of a fixed period.
///
/// Ticks are scheduled from the previous deadline rather than from the end of
/// the loop body, so the time spent in callbacks does not accumulate as drift.
/// A loop that misses a deadline restarts from now instead of bursting to
/// catch up.
#[derive(Debug)]
pub struct Pacer {
    period: Duration,
    next: Instant,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Block until the next tick
    pub fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            std::thread::sleep(self.next - now);
            self.next += self.period;
        } else {
            self.next = now + self.period;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_are_paced() {
        let mut pacer = Pacer::new(Duration::from_millis(5));
        let start = Instant::now();
        for _ in 0..4 {
            pacer.wait();
        }
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(pacer.period(), Duration::from_millis(5));
    }

    #[test]
    fn test_late_loop_does_not_burst() {
        let mut pacer = Pacer::new(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(30));
        pacer.wait();

        let start = Instant::now();
        pacer.wait();
        assert!(start.elapsed() >= Duration::from_millis(3));
    }
}
