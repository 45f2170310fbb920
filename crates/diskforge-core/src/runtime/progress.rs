//! Maps a stage's local percentage onto the pipeline-wide percentage and
//! estimates the remaining time.

use std::time::{Duration, Instant};

use tracing::warn;

/// Global percentage for `local` percent of a stage that starts at `offset`
/// (sum of preceding weights) and spans `weight` of the pipeline.
pub fn global_percent(offset: f64, weight: f64, local: f64) -> f64 {
    offset * 100.0 + local * weight
}

/// Time left assuming constant throughput since the stage began.
///
/// `None` while nothing has been done yet (`percent <= 0`).
pub fn estimate_remaining(elapsed: Duration, percent: f64) -> Option<Duration> {
    if !percent.is_finite() || percent <= 0.0 {
        return None;
    }
    let elapsed = elapsed.as_secs_f64();
    let total = elapsed / (percent.min(100.0) / 100.0);
    Duration::try_from_secs_f64((total - elapsed).max(0.0)).ok()
}

/// One derived progress sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    /// Global percentage, clamped to `0..=100` and never below an earlier value.
    pub percent: f64,
    pub remaining: Option<Duration>,
}

/// Per-run progress state.
#[derive(Debug)]
pub struct ProgressTracker {
    offset: f64,
    weight: f64,
    stage_started: Instant,
    last_local: f64,
    last_global: f64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            offset: 0.0,
            weight: 1.0,
            stage_started: Instant::now(),
            last_local: 0.0,
            last_global: 0.0,
        }
    }

    /// Start timing a new stage.
    pub fn begin_stage(&mut self, offset: f64, weight: f64) {
        self.offset = offset;
        self.weight = weight;
        self.stage_started = Instant::now();
        self.last_local = 0.0;
    }

    pub fn sample(&mut self, local: f64) -> ProgressUpdate {
        self.sample_at(local, self.stage_started.elapsed())
    }

    /// Like [`sample`](Self::sample) with an explicit elapsed time.
    pub fn sample_at(&mut self, local: f64, elapsed: Duration) -> ProgressUpdate {
        let local = if local.is_finite() {
            local.clamp(0.0, 100.0)
        } else {
            0.0
        };

        // Local progress is expected to rise within a stage; a drop is kept
        // out of the global figure.
        if local < self.last_local {
            warn!(
                previous = self.last_local,
                current = local,
                "stage progress went backwards"
            );
        } else {
            self.last_local = local;
        }

        let global = global_percent(self.offset, self.weight, local).clamp(0.0, 100.0);
        self.last_global = self.last_global.max(global);

        ProgressUpdate {
            percent: self.last_global,
            remaining: estimate_remaining(elapsed, local),
        }
    }

    pub fn last_percent(&self) -> f64 {
        self.last_global
    }
}

/// Format a byte count with a 1024 base and one decimal, e.g. `10.0 MB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} PB")
}

/// Format a duration as `1h 02m 03s`, `2m 05s` or `7s`.
///
/// Anything above a week is not a useful estimate and renders as `—`.
pub fn human_duration(d: Duration) -> String {
    const WEEK: u64 = 7 * 24 * 3600;
    let secs = d.as_secs();
    if secs > WEEK {
        return "—".to_string();
    }
    let (h, rem) = (secs / 3600, secs % 3600);
    let (m, s) = (rem / 60, rem % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn two_equal_stages_hit_fifty_then_hundred() {
        assert_eq!(global_percent(0.0, 0.5, 100.0), 50.0);
        assert_eq!(global_percent(0.5, 0.5, 100.0), 100.0);
        assert_eq!(global_percent(0.5, 0.5, 0.0), 50.0);
    }

    #[test]
    fn eta_is_unknown_at_zero() {
        assert_eq!(estimate_remaining(Duration::from_secs(5), 0.0), None);
        assert_eq!(estimate_remaining(Duration::from_secs(5), f64::NAN), None);
    }

    #[test]
    fn eta_assumes_constant_rate() {
        let r = estimate_remaining(Duration::from_secs(10), 25.0).unwrap();
        assert_eq!(r.as_secs(), 30);
        let r = estimate_remaining(Duration::from_secs(10), 100.0).unwrap();
        assert_eq!(r, Duration::ZERO);
    }

    #[test]
    fn increasing_local_samples_never_decrease_global() {
        let mut t = ProgressTracker::new();
        let weights = [0.4, 0.3, 0.3];
        let mut offset = 0.0;
        let mut last = 0.0;
        for w in weights {
            t.begin_stage(offset, w);
            for local in [0.0, 1.5, 20.0, 33.3, 80.0, 99.9, 100.0] {
                let u = t.sample_at(local, Duration::from_secs(1));
                assert!(u.percent >= last, "{} < {}", u.percent, last);
                assert!((0.0..=100.0).contains(&u.percent));
                last = u.percent;
            }
            offset += w;
        }
        assert!((last - 100.0).abs() < 1e-9);
    }

    #[test]
    #[traced_test]
    fn backwards_sample_is_held_and_logged() {
        let mut t = ProgressTracker::new();
        t.begin_stage(0.0, 1.0);
        assert_eq!(t.sample_at(60.0, Duration::from_secs(6)).percent, 60.0);
        let u = t.sample_at(10.0, Duration::from_secs(7));
        assert_eq!(u.percent, 60.0);
        assert!(logs_contain("stage progress went backwards"));
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let mut t = ProgressTracker::new();
        assert_eq!(t.sample_at(250.0, Duration::from_secs(1)).percent, 100.0);
        let mut t = ProgressTracker::new();
        assert_eq!(t.sample_at(-3.0, Duration::from_secs(1)).percent, 0.0);
    }

    #[test]
    fn sizes() {
        assert_eq!(human_size(0), "0.0 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(10 * 1024 * 1024), "10.0 MB");
        assert_eq!(human_size(1u64 << 50), "1.0 PB");
    }

    #[test]
    fn durations() {
        assert_eq!(human_duration(Duration::from_secs(7)), "7s");
        assert_eq!(human_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(human_duration(Duration::from_secs(3723)), "1h 02m 03s");
        assert_eq!(human_duration(Duration::from_secs(8 * 24 * 3600)), "—");
    }
}
