use std::time::{Duration, Instant};

/// Priority class a loop is currently serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// Per-loop priority time-sharing state: the current class and when it was
/// last entered.
///
/// The timed rotation gives each class a bounded share of the loop:
/// high-priority work runs for up to `lp_max_delay` before yielding, and
/// low-priority work runs for up to `hp_max_delay` before high-priority
/// work resumes. With `hp_max_delay < lp_max_delay`, high-priority work
/// dominates throughput while low-priority starvation stays bounded.
///
/// Callers must flip at most once per scheduler iteration: when
/// [`tick`](Self::tick) reports a flip, the empty-refill
/// [`flip`](Self::flip) is skipped for that iteration.
#[derive(Debug, Clone, Copy)]
pub struct PriorityState {
    level: Priority,
    since: Instant,
}

impl PriorityState {
    /// New loops start serving high-priority work.
    pub fn new(now: Instant) -> Self {
        Self {
            level: Priority::High,
            since: now,
        }
    }

    pub fn level(&self) -> Priority {
        self.level
    }

    pub fn since(&self) -> Instant {
        self.since
    }

    /// Apply the timed rotation rule. Returns whether a flip occurred.
    pub fn tick(&mut self, now: Instant, hp_max_delay: Duration, lp_max_delay: Duration) -> bool {
        let elapsed = now.saturating_duration_since(self.since);
        let expired = match self.level {
            Priority::High => elapsed > lp_max_delay,
            Priority::Low => elapsed > hp_max_delay,
        };
        if expired {
            self.flip(now);
        }
        expired
    }

    /// Unconditional flip, used when a refill found free slots but nothing
    /// to dispatch at the current class.
    pub fn flip(&mut self, now: Instant) {
        self.level = match self.level {
            Priority::High => Priority::Low,
            Priority::Low => Priority::High,
        };
        self.since = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HP_DELAY: Duration = Duration::from_secs(30);
    const LP_DELAY: Duration = Duration::from_secs(60);

    #[test]
    fn starts_high() {
        let state = PriorityState::new(Instant::now());
        assert_eq!(state.level(), Priority::High);
    }

    #[test]
    fn flip_on_empty_refill() {
        // A loop that begins high and sees an empty refill at t=5 flips to
        // low immediately, resetting the hold timestamp.
        let start = Instant::now();
        let mut state = PriorityState::new(start);

        let t5 = start + Duration::from_secs(5);
        assert!(!state.tick(t5, HP_DELAY, LP_DELAY));
        state.flip(t5);
        assert_eq!(state.level(), Priority::Low);
        assert_eq!(state.since(), t5);
    }

    #[test]
    fn high_holds_until_lp_max_delay() {
        let start = Instant::now();
        let mut state = PriorityState::new(start);

        assert!(!state.tick(start + LP_DELAY, HP_DELAY, LP_DELAY));
        assert_eq!(state.level(), Priority::High);

        let after = start + LP_DELAY + Duration::from_secs(1);
        assert!(state.tick(after, HP_DELAY, LP_DELAY));
        assert_eq!(state.level(), Priority::Low);
        assert_eq!(state.since(), after);
    }

    #[test]
    fn low_holds_until_hp_max_delay() {
        let start = Instant::now();
        let mut state = PriorityState::new(start);
        state.flip(start);
        assert_eq!(state.level(), Priority::Low);

        assert!(!state.tick(start + HP_DELAY, HP_DELAY, LP_DELAY));
        let after = start + HP_DELAY + Duration::from_secs(1);
        assert!(state.tick(after, HP_DELAY, LP_DELAY));
        assert_eq!(state.level(), Priority::High);
    }

    #[test]
    fn tick_flips_at_most_once() {
        // Far past both deadlines, a single tick still produces a single
        // flip; the hold timestamp resets so the next tick does not flip
        // again immediately.
        let start = Instant::now();
        let mut state = PriorityState::new(start);

        let late = start + Duration::from_secs(600);
        assert!(state.tick(late, HP_DELAY, LP_DELAY));
        assert_eq!(state.level(), Priority::Low);
        assert!(!state.tick(late, HP_DELAY, LP_DELAY));
        assert_eq!(state.level(), Priority::Low);
    }
}
