use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tocsin_common::types::{MatchedMetric, MetricValue};

/// One metric's samples returned by [`MetricsBuffer::fetch`]. Values are
/// ascending by timestamp; steps without a sample are simply absent.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSeries {
    pub metric: String,
    /// Retention step in seconds; 0 while the metric has never been seen.
    pub retention: i64,
    pub values: Vec<MetricValue>,
}

struct MetricSeries {
    retention: i64,
    /// Keyed by retention-aligned timestamp.
    samples: BTreeMap<i64, f64>,
}

/// In-memory time-series buffer holding recent samples per metric name.
///
/// `put` is idempotent per `(metric, timestamp)`: a later write with the
/// same timestamp overwrites. Samples older than the configured horizon
/// are dropped by `evict`.
pub struct MetricsBuffer {
    inner: RwLock<HashMap<String, MetricSeries>>,
}

impl MetricsBuffer {
    pub fn new() -> Self {
        MetricsBuffer {
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, MetricSeries>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, MetricSeries>> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores one sample at its retention-aligned timestamp.
    pub fn put(&self, metric: &MatchedMetric) {
        let mut series_map = self.write();
        let series = series_map
            .entry(metric.metric.clone())
            .or_insert_with(|| MetricSeries {
                retention: metric.retention,
                samples: BTreeMap::new(),
            });
        series.retention = metric.retention;
        series
            .samples
            .insert(metric.retention_timestamp, metric.value);
    }

    /// Resolves `pattern` against known metric names and returns samples
    /// in `[from, to]` per metric, ascending by timestamp.
    ///
    /// A pattern without glob metacharacters names exactly one metric and
    /// always yields one (possibly empty) series, so callers can tell a
    /// known-but-silent metric apart from an unmatched glob.
    pub fn fetch(&self, pattern: &str, from: i64, to: i64) -> Vec<FetchedSeries> {
        let series_map = self.read();

        if !has_glob_metacharacters(pattern) {
            let series = series_map.get(pattern);
            return vec![FetchedSeries {
                metric: pattern.to_string(),
                retention: series.map_or(0, |s| s.retention),
                values: series.map_or_else(Vec::new, |s| collect_range(s, from, to)),
            }];
        }

        let mut out: Vec<FetchedSeries> = series_map
            .iter()
            .filter(|(name, _)| glob_match::glob_match(pattern, name))
            .map(|(name, series)| FetchedSeries {
                metric: name.clone(),
                retention: series.retention,
                values: collect_range(series, from, to),
            })
            .collect();
        out.sort_by(|a, b| a.metric.cmp(&b.metric));
        out
    }

    /// The most recent sample timestamp per metric matching `pattern`.
    pub fn last_timestamps(&self, pattern: &str) -> HashMap<String, i64> {
        let series_map = self.read();
        series_map
            .iter()
            .filter(|(name, _)| pattern_matches(pattern, name))
            .filter_map(|(name, series)| {
                series
                    .samples
                    .keys()
                    .next_back()
                    .map(|ts| (name.clone(), *ts))
            })
            .collect()
    }

    /// Drops samples older than `horizon` and returns how many were
    /// removed. Metrics left without samples are forgotten entirely.
    pub fn evict(&self, horizon: i64) -> usize {
        let mut series_map = self.write();
        let mut removed = 0;
        series_map.retain(|_, series| {
            let keep = series.samples.split_off(&horizon);
            removed += series.samples.len();
            series.samples = keep;
            !series.samples.is_empty()
        });
        removed
    }

    /// Number of metrics currently held.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl Default for MetricsBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_range(series: &MetricSeries, from: i64, to: i64) -> Vec<MetricValue> {
    series
        .samples
        .range(from..=to)
        .map(|(ts, value)| MetricValue {
            retention_timestamp: *ts,
            timestamp: *ts,
            value: *value,
        })
        .collect()
}

fn has_glob_metacharacters(pattern: &str) -> bool {
    pattern
        .chars()
        .any(|c| matches!(c, '*' | '{' | '?' | '['))
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    if has_glob_metacharacters(pattern) {
        glob_match::glob_match(pattern, name)
    } else {
        pattern == name
    }
}
