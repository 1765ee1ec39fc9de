//! Latency collection over repeated invocations.

use std::fmt;

/// Execution times of repeated invocations, in microseconds.
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    samples: Vec<u64>,
}

/// Point-in-time summary of a [`LatencyStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    /// Number of samples
    pub count: usize,
    /// Fastest sample
    pub min_us: u64,
    /// Arithmetic mean
    pub mean_us: f64,
    /// Median (nearest rank)
    pub p50_us: u64,
    /// 99th percentile (nearest rank)
    pub p99_us: u64,
    /// Slowest sample
    pub max_us: u64,
}

impl LatencyStats {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation's execution time.
    pub fn record(&mut self, us: u64) {
        self.samples.push(us);
    }

    /// Number of recorded samples.
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Nearest-rank percentile: the smallest sample such that at least `p`
    /// percent of samples are at or below it. `p` is clamped to 1..=100.
    pub fn percentile(&self, p: u8) -> Option<u64> {
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        nearest_rank(&sorted, p)
    }

    /// Summarize all samples with a single sort. `None` when empty.
    pub fn summary(&self) -> Option<LatencySummary> {
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let (&min_us, &max_us) = (sorted.first()?, sorted.last()?);
        let total: u128 = sorted.iter().map(|&us| u128::from(us)).sum();

        Some(LatencySummary {
            count: sorted.len(),
            min_us,
            mean_us: total as f64 / sorted.len() as f64,
            p50_us: nearest_rank(&sorted, 50)?,
            p99_us: nearest_rank(&sorted, 99)?,
            max_us,
        })
    }
}

fn nearest_rank(sorted: &[u64], p: u8) -> Option<u64> {
    let p = usize::from(p.clamp(1, 100));
    let rank = (p * sorted.len()).div_ceil(100);
    sorted.get(rank.checked_sub(1)?).copied()
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} min={}us mean={:.1}us p50={}us p99={}us max={}us",
            self.count, self.min_us, self.mean_us, self.p50_us, self.p99_us, self.max_us
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_has_no_summary() {
        let stats = LatencyStats::new();
        assert_eq!(stats.count(), 0);
        assert!(stats.summary().is_none());
        assert!(stats.percentile(50).is_none());
    }

    #[test]
    fn test_two_sample_median_is_lower_sample() {
        let mut stats = LatencyStats::new();
        stats.record(20);
        stats.record(10);

        let summary = stats.summary().unwrap();
        assert_eq!(summary.p50_us, 10);
        assert_eq!(summary.p99_us, 20);
        assert_eq!(summary.min_us, 10);
        assert_eq!(summary.max_us, 20);
    }

    #[test]
    fn test_nearest_rank_over_hundred_samples() {
        let mut stats = LatencyStats::new();
        for us in (1..=100).rev() {
            stats.record(us);
        }

        let summary = stats.summary().unwrap();
        assert_eq!(summary.count, 100);
        assert_eq!(summary.p50_us, 50);
        assert_eq!(summary.p99_us, 99);
        assert!((summary.mean_us - 50.5).abs() < 0.001);
        assert_eq!(stats.percentile(100), Some(100));
        assert_eq!(stats.percentile(0), Some(1));
    }

    #[test]
    fn test_single_sample() {
        let mut stats = LatencyStats::new();
        stats.record(7);
        let summary = stats.summary().unwrap();
        assert_eq!((summary.p50_us, summary.p99_us), (7, 7));
    }

    #[test]
    fn test_summary_display() {
        let mut stats = LatencyStats::new();
        stats.record(10);
        stats.record(20);

        let text = stats.summary().unwrap().to_string();
        assert_eq!(text, "n=2 min=10us mean=15.0us p50=10us p99=20us max=20us");
    }
}
