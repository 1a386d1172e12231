use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fail-fast call budget: a sliding per-window cap plus an optional daily
/// cap. `try_acquire` never waits; when the budget is exhausted the caller
/// reports absence instead of queueing.
pub struct CallBudget {
    per_window: usize,
    window: Duration,
    per_day: Option<usize>,
    state: Mutex<BudgetState>,
}

struct BudgetState {
    recent: VecDeque<Instant>,
    day_started: Instant,
    day_count: usize,
}

impl CallBudget {
    pub fn per_minute(calls: usize) -> Self {
        Self::new(calls, Duration::from_secs(60), None)
    }

    pub fn per_minute_and_day(calls: usize, daily: usize) -> Self {
        Self::new(calls, Duration::from_secs(60), Some(daily))
    }

    pub fn new(per_window: usize, window: Duration, per_day: Option<usize>) -> Self {
        Self {
            per_window,
            window,
            per_day,
            state: Mutex::new(BudgetState {
                recent: VecDeque::new(),
                day_started: Instant::now(),
                day_count: 0,
            }),
        }
    }

    /// Take one call slot if available right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("budget lock poisoned");
        let now = Instant::now();

        while let Some(&front) = state.recent.front() {
            if now.duration_since(front) >= self.window {
                state.recent.pop_front();
            } else {
                break;
            }
        }

        if now.duration_since(state.day_started) >= Duration::from_secs(86_400) {
            state.day_started = now;
            state.day_count = 0;
        }

        if state.recent.len() >= self.per_window {
            return false;
        }
        if let Some(daily) = self.per_day {
            if state.day_count >= daily {
                return false;
            }
        }

        state.recent.push_back(now);
        state.day_count += 1;
        true
    }
}

/// Minimum spacing between consecutive calls, also fail-fast.
pub struct MinInterval {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl MinInterval {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut last = self.last.lock().expect("interval lock poisoned");
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_denies_after_window_cap() {
        let budget = CallBudget::per_minute(3);
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        // Fourth call in the same window fails immediately
        assert!(!budget.try_acquire());
    }

    #[test]
    fn daily_cap_binds_before_window_refills() {
        let budget = CallBudget::new(10, Duration::from_millis(1), Some(2));
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        std::thread::sleep(Duration::from_millis(5));
        // Window has refilled but the daily budget is spent
        assert!(!budget.try_acquire());
    }

    #[test]
    fn min_interval_spacing() {
        let limiter = MinInterval::new(Duration::from_millis(20));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.try_acquire());
    }
}
