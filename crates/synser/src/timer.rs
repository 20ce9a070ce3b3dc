use std::time::{Duration, Instant};

/// Fixed-interval tick, checked rather than scheduled: the event loop asks
/// how long it may sleep and whether the interval has elapsed.
#[derive(Clone, Copy, Debug)]
pub struct Repeater {
    interval: Duration,
    last_fired: Instant,
}

impl Repeater {
    pub fn every(interval: Duration) -> Self {
        Self { interval, last_fired: Instant::now() }
    }

    /// True once per elapsed interval; firing re-arms the timer.
    pub fn fired(&mut self) -> bool {
        if self.last_fired.elapsed() >= self.interval {
            self.last_fired = Instant::now();
            true
        } else {
            false
        }
    }

    /// Time remaining until the next fire, for use as a poll timeout.
    pub fn until_next(&self) -> Duration {
        self.interval.saturating_sub(self.last_fired.elapsed())
    }
}
