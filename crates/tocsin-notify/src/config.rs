use serde::Deserialize;

/// One throttling rule: more than `max_count` sends to the same
/// `(contact, trigger)` pair within `window_secs` delays the next
/// notification by `delay_secs`.
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleRule {
    pub window_secs: i64,
    pub max_count: u64,
    pub delay_secs: i64,
}

/// Notifier configuration, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Delivery worker count.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Event-consumer worker count; events partition across them by
    /// trigger id so per-metric order is preserved.
    #[serde(default = "default_event_workers")]
    pub event_workers: usize,
    /// Seconds between queue polls.
    #[serde(default = "default_fetch_interval_secs")]
    pub fetch_interval_secs: u64,
    /// Lifetime of deduplication keys.
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: i64,
    /// Delivery attempts beyond the first before a notification is
    /// dropped.
    #[serde(default = "default_max_send_retries")]
    pub max_send_retries: i32,
    /// First retry delay; doubles per failed attempt.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: i64,
    /// Upper bound on the retry delay.
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: i64,
    /// Deadline for a single delivery attempt.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Throttling rules; the largest exceeded delay wins.
    #[serde(default = "default_throttling")]
    pub throttling: Vec<ThrottleRule>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        NotifierConfig {
            workers: default_workers(),
            event_workers: default_event_workers(),
            fetch_interval_secs: default_fetch_interval_secs(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            max_send_retries: default_max_send_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            throttling: default_throttling(),
        }
    }
}

impl NotifierConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Retry delay for the given failure count, exponential with a cap.
    pub fn backoff(&self, send_fail: i32) -> i64 {
        let doublings = send_fail.clamp(0, 30) as u32;
        self.backoff_base_secs
            .saturating_mul(1_i64 << doublings)
            .min(self.backoff_cap_secs)
    }
}

fn default_workers() -> usize {
    4
}

fn default_event_workers() -> usize {
    4
}

fn default_fetch_interval_secs() -> u64 {
    1
}

fn default_dedup_ttl_secs() -> i64 {
    3600
}

fn default_max_send_retries() -> i32 {
    3
}

fn default_backoff_base_secs() -> i64 {
    30
}

fn default_backoff_cap_secs() -> i64 {
    1800
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_throttling() -> Vec<ThrottleRule> {
    vec![
        ThrottleRule {
            window_secs: 3 * 3600,
            max_count: 10,
            delay_secs: 30 * 60,
        },
        ThrottleRule {
            window_secs: 3600,
            max_count: 20,
            delay_secs: 3600,
        },
    ]
}
