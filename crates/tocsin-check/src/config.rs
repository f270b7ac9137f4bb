use serde::Deserialize;

/// Check engine configuration, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    /// Number of parallel check workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Seconds between dispatch ticks; every known trigger is checked
    /// once per tick.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Lookback applied when resuming a metric's evaluation, so late
    /// samples within the gap are still seen.
    #[serde(default = "default_check_point_gap_secs")]
    pub check_point_gap_secs: i64,
    /// Per-check deadline; a check that misses it aborts without
    /// persisting.
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,
    /// Extra slack added on top of the largest trigger TTL when evicting
    /// old samples from the metrics buffer.
    #[serde(default = "default_metric_ttl_slack_secs")]
    pub metric_ttl_slack_secs: i64,
    /// Eviction horizon used while no trigger defines a TTL.
    #[serde(default = "default_buffer_retention_secs")]
    pub buffer_retention_secs: i64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        CheckConfig {
            workers: default_workers(),
            check_interval_secs: default_check_interval_secs(),
            check_point_gap_secs: default_check_point_gap_secs(),
            check_timeout_secs: default_check_timeout_secs(),
            metric_ttl_slack_secs: default_metric_ttl_slack_secs(),
            buffer_retention_secs: default_buffer_retention_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_check_interval_secs() -> u64 {
    10
}

fn default_check_point_gap_secs() -> i64 {
    120
}

fn default_check_timeout_secs() -> u64 {
    10
}

fn default_metric_ttl_slack_secs() -> i64 {
    60
}

fn default_buffer_retention_secs() -> i64 {
    3600
}

impl CheckConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}
