use tokio::time::{Duration, Instant};

/// One-shot timer polled from the control loop.
pub struct Timer {
    timer_active: bool,
    timeout_duration: Duration,
    start_time: Instant,
}

impl Timer {
    #[allow(missing_docs)]
    pub fn new(timeout_duration: Duration) -> Timer {
        Timer {
            timer_active: false,
            timeout_duration,
            start_time: Instant::now(),
        }
    }

    /// (Re)starts the timer from now.
    pub fn timer_start(&mut self) {
        self.timer_active = true;
        self.start_time = Instant::now();
    }

    #[allow(missing_docs)]
    pub fn timer_stop(&mut self) {
        self.timer_active = false;
    }

    #[allow(missing_docs)]
    pub fn is_active(&self) -> bool {
        self.timer_active
    }

    /// `true` once an active timer has run for its whole duration. A zero duration times out at once.
    pub fn timer_timeouted(&self) -> bool {
        self.timer_active && self.start_time.elapsed() >= self.timeout_duration
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_timer_never_times_out() {
        let mut t = Timer::new(Duration::ZERO);
        assert!(!t.timer_timeouted());
        t.timer_start();
        assert!(t.timer_timeouted());
        t.timer_stop();
        assert!(!t.timer_timeouted());
    }

    #[test]
    fn long_timer_is_not_due_right_away() {
        let mut t = Timer::new(Duration::from_secs(60));
        t.timer_start();
        assert!(t.is_active());
        assert!(!t.timer_timeouted());
    }
}
