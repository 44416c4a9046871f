//! Latency distribution statistics

/// Arithmetic mean, 0 for no samples
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of samples sorted ascending; the two middle values are averaged on even counts.
pub fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Percentile of samples sorted ascending, interpolating linearly between the
/// closest ranks (`rank = p / 100 * (n - 1)`).
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Mean, median and p99 computed in one pass over a sorted copy
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencySummary {
    pub mean: f64,
    pub median: f64,
    pub p99: f64,
}

impl LatencySummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        Self {
            mean: mean(&sorted),
            median: median(&sorted),
            p99: percentile(&sorted, 99.0),
        }
    }
}
