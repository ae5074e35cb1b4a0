use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Widest first-to-last span the per-second gap fill will expand. A single
/// stray timestamp far outside the run would otherwise size the counts
/// vector by years.
const MAX_GAP_FILL_SPAN_SECS: i64 = 7 * 24 * 60 * 60;

/// Summary of one series of samples, in the shape the perf harness stores
/// and graphs. Percentiles are nearest-rank.
#[derive(Debug, Clone, Serialize)]
pub struct DataStats {
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    pub percentile90: f64,
    pub percentile99: f64,
}

impl DataStats {
    pub fn compute(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let samples = sorted.len();
        let mean = sorted.iter().sum::<f64>() / samples as f64;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples as f64;

        Some(Self {
            samples,
            min: sorted[0],
            max: sorted[samples - 1],
            mean,
            median: percentile(&sorted, 50.0),
            stddev: variance.sqrt(),
            percentile90: percentile(&sorted, 90.0),
            percentile99: percentile(&sorted, 99.0),
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Completions per second between the first and the last timestamp, with
/// silent seconds carried as zero. Expects the input ascending. Spans wider
/// than `MAX_GAP_FILL_SPAN_SECS` are not zero-filled; only the seconds that
/// saw completions are counted.
pub fn per_second_rates(timestamps: &[DateTime<Utc>]) -> Vec<f64> {
    let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) else {
        return Vec::new();
    };
    let start = first.timestamp();
    let end = last.timestamp();
    if end < start {
        return Vec::new();
    }

    if end - start >= MAX_GAP_FILL_SPAN_SECS {
        let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
        for timestamp in timestamps {
            *counts.entry(timestamp.timestamp()).or_insert(0) += 1;
        }
        return counts.into_values().map(|count| count as f64).collect();
    }

    let mut counts = vec![0u64; (end - start + 1) as usize];
    for timestamp in timestamps {
        if let Ok(slot) = usize::try_from(timestamp.timestamp() - start) {
            if let Some(count) = counts.get_mut(slot) {
                *count += 1;
            }
        }
    }
    counts.into_iter().map(|count| count as f64).collect()
}

/// Render a terminal histogram of the samples, one line per bucket with a
/// `#` bar scaled to `width` characters.
pub fn histogram_lines(values: &[f64], buckets: usize, width: usize) -> Vec<String> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || buckets == 0 {
        return Vec::new();
    }

    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max - min < f64::EPSILON {
        return vec![format!(
            "{min:>10.3} .. {max:>10.3} | {:<width$} {}",
            "#".repeat(width),
            finite.len(),
        )];
    }

    let step = (max - min) / buckets as f64;
    let mut counts = vec![0usize; buckets];
    for value in &finite {
        let slot = (((value - min) / step) as usize).min(buckets - 1);
        counts[slot] += 1;
    }

    let tallest = counts.iter().copied().max().unwrap_or(1).max(1);
    counts
        .iter()
        .enumerate()
        .map(|(bucket, count)| {
            let lo = min + step * bucket as f64;
            let hi = lo + step;
            let bar = "#".repeat(count * width / tallest);
            format!("{lo:>10.3} .. {hi:>10.3} | {bar:<width$} {count}")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_stats_of_a_known_series() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let stats = DataStats::compute(&values).expect("series is not empty");

        assert_eq!(stats.samples, 10);
        assert!(close(stats.min, 1.0));
        assert!(close(stats.max, 10.0));
        assert!(close(stats.mean, 5.5));
        assert!(close(stats.median, 5.0));
        assert!(close(stats.percentile90, 9.0));
        assert!(close(stats.percentile99, 10.0));
        assert!(close(stats.stddev, 8.25f64.sqrt()));
    }

    #[test]
    fn test_empty_series_has_no_stats() {
        assert!(DataStats::compute(&[]).is_none());
        assert!(DataStats::compute(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_stats_serialize_with_named_fields() {
        let stats = DataStats::compute(&[2.0]).expect("series is not empty");
        let value = stats.to_value();

        assert_eq!(value["samples"], 1);
        assert_eq!(value["median"], 2.0);
    }

    #[test]
    fn test_rates_fill_silent_seconds_with_zero() {
        let at = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap();
        let rates = per_second_rates(&[at(0), at(0), at(2)]);

        assert_eq!(rates, vec![2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_rates_of_nothing_are_empty() {
        assert!(per_second_rates(&[]).is_empty());
    }

    #[test]
    fn test_rates_skip_the_gap_fill_past_the_span_cap() {
        let at = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap();
        // one timestamp decades out would otherwise zero-fill the whole span
        let far_out = 100 * 365 * 24 * 60 * 60;
        let rates = per_second_rates(&[at(0), at(0), at(2), at(far_out)]);

        assert_eq!(rates, vec![2.0, 1.0, 1.0]);
    }

    #[test]
    fn test_histogram_covers_the_range() {
        let lines = histogram_lines(&[0.0, 1.0, 2.0, 3.0], 2, 20);

        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" 2"));
        assert!(lines[1].ends_with(" 2"));
        assert!(lines[1].contains('#'));
    }

    #[test]
    fn test_histogram_of_a_constant_series_is_one_line() {
        let lines = histogram_lines(&[4.0, 4.0, 4.0], 10, 20);

        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" 3"));
    }

    #[test]
    fn test_histogram_of_nothing_is_empty() {
        assert!(histogram_lines(&[], 10, 20).is_empty());
    }
}
