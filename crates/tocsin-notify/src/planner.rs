use std::sync::Arc;

use tocsin_common::types::{NotificationEvent, ScheduledNotification, State, TriggerData};
use tocsin_storage::error::StorageError;
use tocsin_storage::Database;

use crate::config::NotifierConfig;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::throttling::Throttler;

/// Turns state-transition events into scheduled notifications.
pub struct Planner {
    database: Arc<dyn Database>,
    scheduler: Arc<Scheduler>,
    throttler: Throttler,
}

impl Planner {
    pub fn new(
        database: Arc<dyn Database>,
        scheduler: Arc<Scheduler>,
        config: &NotifierConfig,
    ) -> Self {
        let throttler = Throttler::new(database.clone(), config.throttling.clone());
        Planner {
            database,
            scheduler,
            throttler,
        }
    }

    /// Plans deliveries for one event and returns how many notifications
    /// were scheduled.
    ///
    /// Events for deleted triggers and contacts are skipped with a log
    /// line rather than failing the stream; storage errors propagate so
    /// the worker can retry the event.
    pub fn plan(&self, event: &NotificationEvent, now: i64) -> Result<usize> {
        if event.state == State::Test {
            // Manual test sends are delivered upstream of the planner.
            return Ok(0);
        }

        let trigger = match self.database.get_trigger(&event.trigger_id) {
            Ok(trigger) => trigger,
            Err(StorageError::NotFound { .. }) => {
                tracing::warn!(
                    trigger_id = %event.trigger_id,
                    "Event for unknown trigger, skipping"
                );
                return Ok(0);
            }
            Err(err) => return Err(err.into()),
        };
        let trigger_data = TriggerData::from_trigger(&trigger);

        let subscriptions = self.database.tag_subscriptions(&trigger.tags)?;
        let mut scheduled = 0;

        for subscription in subscriptions {
            if subscription.must_ignore(event) {
                tracing::debug!(
                    subscription_id = %subscription.id,
                    %event,
                    "Transition ignored by subscription policy"
                );
                continue;
            }
            if !subscription.schedule_allows(event.timestamp) {
                tracing::debug!(
                    subscription_id = %subscription.id,
                    "Subscription schedule disallows this time, skipping"
                );
                continue;
            }

            for contact_id in &subscription.contacts {
                let contact = match self.database.get_contact(contact_id) {
                    Ok(contact) => contact,
                    Err(StorageError::NotFound { .. }) => {
                        tracing::warn!(
                            contact_id = %contact_id,
                            subscription_id = %subscription.id,
                            "Subscription references unknown contact, skipping"
                        );
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };

                let delay = if subscription.throttling_enabled {
                    self.throttler.delay(contact_id, &trigger.id, now)?
                } else {
                    0
                };

                let mut event = event.clone();
                event.subscription_id = Some(subscription.id.clone());
                event.contact_id = contact.id.clone();

                let notification = ScheduledNotification {
                    timestamp: event.timestamp + delay,
                    event,
                    trigger: trigger_data.clone(),
                    contact,
                    plotting: subscription.plotting.clone(),
                    throttled: delay > 0,
                    send_fail: 0,
                };

                if self.scheduler.enqueue(&notification, now)? {
                    self.throttler.register(contact_id, &trigger.id, now)?;
                    scheduled += 1;
                }
            }
        }

        Ok(scheduled)
    }
}
