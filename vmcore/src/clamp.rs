/// Clamps a playback time into `[0, duration]`.
///
/// Non-finite times collapse to 0, and a non-finite or negative duration is
/// treated as 0.
pub fn clamp_time(time: f64, duration: f64) -> f64 {
    if !time.is_finite() {
        return 0.0;
    }
    let max = if duration.is_finite() {
        duration.max(0.0)
    } else {
        0.0
    };
    time.clamp(0.0, max)
}

/// Progress percentage (0..=100) for `time` within `duration`.
pub fn progress_percent(time: f64, duration: f64) -> f64 {
    let progress = time / duration * 100.0;
    if progress.is_finite() { progress } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_times_collapse_to_zero() {
        assert_eq!(clamp_time(f64::NAN, 10.0), 0.0);
        assert_eq!(clamp_time(f64::INFINITY, 10.0), 0.0);
        assert_eq!(clamp_time(f64::NEG_INFINITY, 10.0), 0.0);
    }

    #[test]
    fn test_clamps_into_duration() {
        assert_eq!(clamp_time(-1.5, 10.0), 0.0);
        assert_eq!(clamp_time(12.0, 10.0), 10.0);
        assert_eq!(clamp_time(4.2, 10.0), 4.2);
    }

    #[test]
    fn test_unknown_duration_clamps_to_zero() {
        assert_eq!(clamp_time(3.0, f64::NAN), 0.0);
        assert_eq!(clamp_time(3.0, -2.0), 0.0);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(5.0, 10.0), 50.0);
        assert_eq!(progress_percent(1.0, 0.0), 0.0);
        assert_eq!(progress_percent(0.0, f64::NAN), 0.0);
    }
}
