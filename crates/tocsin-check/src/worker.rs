use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::interval;

use tocsin_storage::buffer::MetricsBuffer;
use tocsin_storage::Database;

use crate::check::Checker;
use crate::error::CheckError;

/// Table of per-trigger mutexes. A held entry means a check for that
/// trigger is in flight; dispatch attempts for the same trigger are
/// skipped, never queued behind it.
pub struct KeyedMutexes {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedMutexes {
    pub fn new() -> Self {
        KeyedMutexes {
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops entries nobody holds; called between dispatch ticks.
    pub fn purge(&self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeyedMutexes {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the check engine: N workers with per-trigger affinity (trigger
/// ids hash onto workers, so one trigger is always handled by the same
/// worker), a keyed mutex enforcing one in-flight check per trigger, and
/// per-check deadlines.
pub struct CheckScheduler {
    checker: Arc<Checker>,
    database: Arc<dyn Database>,
    buffer: Arc<MetricsBuffer>,
    locks: Arc<KeyedMutexes>,
    shutdown: watch::Receiver<bool>,
}

impl CheckScheduler {
    /// Returns the scheduler and the sender that stops it; send `true`
    /// (or drop the sender) to shut down.
    pub fn new(
        checker: Arc<Checker>,
        database: Arc<dyn Database>,
        buffer: Arc<MetricsBuffer>,
    ) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            CheckScheduler {
                checker,
                database,
                buffer,
                locks: Arc::new(KeyedMutexes::new()),
                shutdown: rx,
            },
            tx,
        )
    }

    pub async fn run(mut self) {
        let config = self.checker.config().clone();
        let workers = config.workers.max(1);
        let check_timeout = Duration::from_secs(config.check_timeout_secs);

        let mut senders = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let (tx, mut rx) = mpsc::channel::<String>(1024);
            senders.push(tx);

            let checker = self.checker.clone();
            let locks = self.locks.clone();
            let mut shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        received = rx.recv() => {
                            let Some(trigger_id) = received else { break };
                            run_check(&checker, &locks, &trigger_id, check_timeout).await;
                        }
                    }
                }
                tracing::debug!(worker_id, "Check worker stopped");
            });
        }

        let mut ticker = interval(Duration::from_secs(config.check_interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let trigger_ids = match self.database.trigger_ids() {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to list triggers, retrying next tick");
                    continue;
                }
            };

            self.evict_buffer(&trigger_ids, &config);

            for trigger_id in trigger_ids {
                let slot = worker_slot(&trigger_id, workers);
                if let Err(err) = senders[slot].try_send(trigger_id) {
                    tracing::warn!(error = %err, "Check worker queue full, dropping dispatch");
                }
            }
            self.locks.purge();
        }
        tracing::info!("Check scheduler stopped");
    }

    /// Evicts buffer samples older than the largest trigger TTL plus
    /// slack, falling back to the configured retention when no trigger
    /// defines a TTL.
    fn evict_buffer(&self, trigger_ids: &[String], config: &crate::config::CheckConfig) {
        let max_ttl = trigger_ids
            .iter()
            .filter_map(|id| self.database.get_trigger(id).ok())
            .map(|trigger| trigger.ttl)
            .max()
            .unwrap_or(0);
        let window = if max_ttl > 0 {
            max_ttl + config.metric_ttl_slack_secs
        } else {
            config.buffer_retention_secs
        };
        let removed = self.buffer.evict(unix_now() - window);
        if removed > 0 {
            tracing::debug!(removed, "Evicted stale buffer samples");
        }
    }
}

async fn run_check(
    checker: &Arc<Checker>,
    locks: &Arc<KeyedMutexes>,
    trigger_id: &str,
    check_timeout: Duration,
) {
    let lock = locks.get(trigger_id);
    let Ok(_guard) = lock.try_lock() else {
        tracing::debug!(trigger_id, "Check already in flight, skipping");
        return;
    };

    let now = unix_now();
    let deadline = Instant::now() + check_timeout;
    let checker = checker.clone();
    let id = trigger_id.to_string();
    let outcome = tokio::time::timeout(
        check_timeout,
        tokio::task::spawn_blocking(move || checker.check_with_deadline(&id, now, Some(deadline))),
    )
    .await;

    match outcome {
        Err(_) => tracing::warn!(trigger_id, "Check exceeded its deadline"),
        Ok(Err(join_err)) => tracing::error!(trigger_id, error = %join_err, "Check task failed"),
        Ok(Ok(Err(CheckError::InvalidTrigger(err)))) => {
            tracing::warn!(trigger_id, error = %err, "Skipping malformed trigger")
        }
        Ok(Ok(Err(err))) => tracing::warn!(trigger_id, error = %err, "Check failed"),
        Ok(Ok(Ok(check))) => {
            tracing::debug!(trigger_id, state = %check.state, score = check.score, "Check complete")
        }
    }
}

fn worker_slot(trigger_id: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    trigger_id.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}
