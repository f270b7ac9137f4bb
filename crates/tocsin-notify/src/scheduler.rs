use std::sync::Arc;
use std::time::Duration;

use tocsin_common::types::{ScheduledNotification, State};
use tocsin_storage::Database;

use crate::config::NotifierConfig;
use crate::error::Result;
use crate::plugin::SenderRegistry;

/// What happened to a notification handed to [`Scheduler::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Delivery failed; the notification went back into the queue with
    /// an increased failure count and back-off.
    Requeued,
    /// Dropped for good: retry cap reached or no sender for the type.
    Dropped,
}

/// Owns the time-ordered notification queue and the delivery edge.
pub struct Scheduler {
    database: Arc<dyn Database>,
    registry: SenderRegistry,
    config: NotifierConfig,
}

impl Scheduler {
    pub fn new(
        database: Arc<dyn Database>,
        registry: SenderRegistry,
        config: NotifierConfig,
    ) -> Self {
        Scheduler {
            database,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Enqueues a notification unless an identical one is already
    /// pending or was recently sent. Returns whether it was accepted.
    pub fn enqueue(&self, notification: &ScheduledNotification, now: i64) -> Result<bool> {
        let key = notification.key();
        if self.database.notification_key_exists(&key, now)? {
            tracing::debug!(key = %key, "Duplicate notification dropped");
            return Ok(false);
        }
        self.database
            .add_notification_key(&key, self.config.dedup_ttl_secs, now)?;
        self.database.add_notification(notification)?;
        Ok(true)
    }

    /// Atomically removes and returns every notification due by `now`.
    pub fn pop_due(&self, now: i64) -> Result<Vec<ScheduledNotification>> {
        Ok(self.database.pop_due_notifications(now)?)
    }

    /// Sends one popped notification through the sender registered for
    /// its contact type. Failures re-enqueue with exponential back-off
    /// until the retry cap, then drop with an error-level self event in
    /// the log.
    pub async fn deliver(
        &self,
        mut notification: ScheduledNotification,
        now: i64,
    ) -> Result<DeliveryOutcome> {
        let key = notification.key();

        let Some(sender) = self.registry.get(&notification.contact.contact_type) else {
            tracing::error!(
                contact_type = %notification.contact.contact_type,
                contact_id = %notification.contact.id,
                event = %notification.event,
                "No sender for contact type, dropping notification"
            );
            self.database.remove_notification_key(&key)?;
            return Ok(DeliveryOutcome::Dropped);
        };

        let attempt = tokio::time::timeout(
            Duration::from_secs(self.config.send_timeout_secs),
            sender.send(&notification),
        )
        .await;

        let failure = match attempt {
            Ok(Ok(())) => {
                self.database.remove_notification_key(&key)?;
                tracing::debug!(
                    contact_id = %notification.contact.id,
                    event = %notification.event,
                    "Notification delivered"
                );
                return Ok(DeliveryOutcome::Delivered);
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => "send deadline exceeded".to_string(),
        };

        // The failed attempt's key no longer guards anything; the retry
        // gets its own key via the bumped send_fail and due time.
        self.database.remove_notification_key(&key)?;
        notification.send_fail += 1;

        if notification.send_fail > self.config.max_send_retries {
            tracing::error!(
                contact_id = %notification.contact.id,
                contact_type = %notification.contact.contact_type,
                event = %notification.event,
                error = %failure,
                state = %State::Exception,
                "Notification dropped after retry cap"
            );
            return Ok(DeliveryOutcome::Dropped);
        }

        notification.timestamp = now + self.config.backoff(notification.send_fail);
        tracing::warn!(
            contact_id = %notification.contact.id,
            send_fail = notification.send_fail,
            retry_at = notification.timestamp,
            error = %failure,
            "Delivery failed, re-enqueued with back-off"
        );
        self.enqueue(&notification, now)?;
        Ok(DeliveryOutcome::Requeued)
    }
}
