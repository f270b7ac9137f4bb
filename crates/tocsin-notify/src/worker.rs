use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;

use tocsin_common::types::{NotificationEvent, ScheduledNotification};
use tocsin_storage::Database;

use crate::planner::Planner;
use crate::scheduler::Scheduler;

/// Runs the notifier: M event-consumer workers feeding the planner and
/// K delivery workers draining the due queue.
///
/// Events partition across consumers by trigger id hash, so events of
/// the same `(trigger, metric)` are planned in emission order. Delivery
/// has no ordering requirement and distributes round-robin.
pub struct NotifierWorkers {
    planner: Arc<Planner>,
    scheduler: Arc<Scheduler>,
    database: Arc<dyn Database>,
    shutdown: watch::Receiver<bool>,
}

impl NotifierWorkers {
    /// Returns the worker set and the sender that stops it.
    pub fn new(
        planner: Arc<Planner>,
        scheduler: Arc<Scheduler>,
        database: Arc<dyn Database>,
    ) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            NotifierWorkers {
                planner,
                scheduler,
                database,
                shutdown: rx,
            },
            tx,
        )
    }

    pub async fn run(mut self) {
        let config = self.scheduler.config().clone();
        let event_workers = config.event_workers.max(1);
        let delivery_workers = config.workers.max(1);

        let mut event_txs = Vec::with_capacity(event_workers);
        for worker_id in 0..event_workers {
            let (tx, mut rx) = mpsc::channel::<NotificationEvent>(1024);
            event_txs.push(tx);

            let planner = self.planner.clone();
            let mut shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        received = rx.recv() => {
                            let Some(event) = received else { break };
                            match planner.plan(&event, unix_now()) {
                                Ok(scheduled) if scheduled > 0 => {
                                    tracing::debug!(%event, scheduled, "Event planned");
                                }
                                Ok(_) => {}
                                Err(err) => {
                                    tracing::warn!(%event, error = %err, "Planning failed");
                                }
                            }
                        }
                    }
                }
                tracing::debug!(worker_id, "Event worker stopped");
            });
        }

        let mut delivery_txs = Vec::with_capacity(delivery_workers);
        for worker_id in 0..delivery_workers {
            let (tx, mut rx) = mpsc::channel::<ScheduledNotification>(1024);
            delivery_txs.push(tx);

            let scheduler = self.scheduler.clone();
            let mut shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        received = rx.recv() => {
                            let Some(notification) = received else { break };
                            if let Err(err) = scheduler.deliver(notification, unix_now()).await {
                                tracing::warn!(error = %err, "Delivery bookkeeping failed");
                            }
                        }
                    }
                }
                tracing::debug!(worker_id, "Delivery worker stopped");
            });
        }

        let mut ticker = interval(Duration::from_secs(config.fetch_interval_secs.max(1)));
        let mut next_delivery_slot = 0usize;
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            // Drain the event inbox into the consumer pool.
            loop {
                match self.database.pop_event() {
                    Ok(Some(event)) => {
                        let slot = event_slot(&event.trigger_id, event_workers);
                        if let Err(err) = event_txs[slot].try_send(event) {
                            tracing::warn!(error = %err, "Event worker queue full, dropping dispatch");
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to fetch events, retrying next tick");
                        break;
                    }
                }
            }

            // Hand due notifications to the delivery pool.
            match self.scheduler.pop_due(unix_now()) {
                Ok(due) => {
                    for notification in due {
                        let slot = next_delivery_slot % delivery_workers;
                        next_delivery_slot = next_delivery_slot.wrapping_add(1);
                        if let Err(err) = delivery_txs[slot].try_send(notification) {
                            tracing::warn!(error = %err, "Delivery worker queue full, dropping dispatch");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to pop due notifications");
                }
            }
        }
        tracing::info!("Notifier stopped");
    }
}

fn event_slot(trigger_id: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    trigger_id.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}
