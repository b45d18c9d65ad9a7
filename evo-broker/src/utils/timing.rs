#[cfg(test)]
#[path = "../../tests/unit/utils/timing_test.rs"]
mod timing_test;

use std::time::{Duration, Instant};

/// Implements performance timer functionality.
#[derive(Clone, Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    /// Returns elapsed time.
    pub fn elapsed(&self) -> Duration {
        Instant::now() - self.start
    }

    /// Returns elapsed time in whole seconds.
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }

    /// Returns elapsed time in seconds as float.
    pub fn elapsed_secs_as_float(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Returns time left till given budget is exhausted.
    pub fn remaining(&self, budget: Duration) -> Duration {
        budget.saturating_sub(self.elapsed())
    }

    /// Measures duration of given action.
    pub fn measure_duration<R, F: FnOnce() -> R>(action: F) -> (R, Duration) {
        let start = Timer::start();
        let result = action();

        (result, start.elapsed())
    }
}

/// Sleeps for given duration in small slices and returns earlier when `is_stopped` becomes true.
/// Returns true if full duration has been slept.
pub fn sleep_interruptibly<F: Fn() -> bool>(duration: Duration, slice: Duration, is_stopped: F) -> bool {
    let timer = Timer::start();
    let slice = slice.max(Duration::from_millis(1));

    loop {
        if is_stopped() {
            return false;
        }

        let remaining = timer.remaining(duration);
        if remaining.is_zero() {
            return true;
        }

        std::thread::sleep(remaining.min(slice));
    }
}
