use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Console progress for one batch phase: percentage, elapsed and remaining
/// time, refreshed whenever the coordinator observes new completions.
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    pub fn new(label: &str, total: u64) -> Self {
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template(
            "{msg} {bar:40.cyan/blue} {percent:>3}% ({elapsed_precise} elapsed, {eta_precise} left)",
        ) {
            bar.set_style(style);
        }
        bar.set_message(label.to_string());
        Self { bar }
    }

    pub fn update(&self, done: u64) {
        self.bar.set_position(done);
    }

    pub fn finish(&self) {
        self.bar.finish();
    }

    /// Leaves the bar at its current position, used when a batch aborts.
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Remaining-time estimate from the average pace so far.
pub fn estimate_remaining(elapsed: Duration, done: u64, total: u64) -> Duration {
    if done == 0 {
        return Duration::ZERO;
    }
    let per_unit = elapsed.as_secs_f64() / done as f64;
    Duration::from_secs_f64(per_unit * total.saturating_sub(done) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_proportional_to_remaining_work() {
        let remaining = estimate_remaining(Duration::from_secs(10), 10, 20);
        assert_eq!(remaining, Duration::from_secs(10));

        let remaining = estimate_remaining(Duration::from_secs(30), 10, 40);
        assert_eq!(remaining, Duration::from_secs(90));
    }

    #[test]
    fn estimate_with_no_completions_is_zero() {
        assert_eq!(
            estimate_remaining(Duration::from_secs(5), 0, 20),
            Duration::ZERO
        );
    }

    #[test]
    fn estimate_at_completion_is_zero() {
        assert_eq!(
            estimate_remaining(Duration::from_secs(5), 20, 20),
            Duration::ZERO
        );
    }
}
