use std::time::{Duration, Instant};

/// Budget used for per-frame work such as redraws and pointer moves.
pub const FRAME_BUDGET: Duration = Duration::from_millis(16);

/// Lets a call through only if at least `interval` has elapsed since the
/// last call it let through. Callers pass the current instant so the gate
/// stays deterministic under test.
#[derive(Debug, Clone)]
pub struct MinIntervalGate {
    interval: Duration,
    last: Option<Instant>,
}

impl MinIntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn try_pass(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for MinIntervalGate {
    fn default() -> Self {
        Self::new(FRAME_BUDGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_passes() {
        let mut gate = MinIntervalGate::default();
        assert!(gate.try_pass(Instant::now()));
    }

    #[test]
    fn test_calls_inside_budget_are_dropped() {
        let mut gate = MinIntervalGate::new(Duration::from_millis(16));
        let t0 = Instant::now();
        assert!(gate.try_pass(t0));
        assert!(!gate.try_pass(t0 + Duration::from_millis(5)));
        assert!(!gate.try_pass(t0 + Duration::from_millis(15)));
        assert!(gate.try_pass(t0 + Duration::from_millis(16)));
        assert!(!gate.try_pass(t0 + Duration::from_millis(20)));
    }

    #[test]
    fn test_reset_reopens_gate() {
        let mut gate = MinIntervalGate::default();
        let t0 = Instant::now();
        assert!(gate.try_pass(t0));
        gate.reset();
        assert!(gate.try_pass(t0));
    }
}
