//! Storage layer for the tocsin alerting core.
//!
//! [`Database`] is the contract the core consumes: user entities,
//! per-trigger check state, the event stream between the check engine and
//! the notifier, the time-ordered notification queue, and the expiring
//! sets backing deduplication and throttling. [`memory::MemoryDatabase`]
//! is the in-process implementation used by tests and single-node
//! deployments; a persistent backend is an external collaborator that
//! implements the same trait.
//!
//! [`buffer::MetricsBuffer`] retains recent metric samples per metric
//! name and resolves trigger target patterns against them.

pub mod buffer;
pub mod error;
pub mod memory;


use error::Result;
use tocsin_common::types::{
    CheckData, ContactData, NotificationEvent, ScheduledNotification, SubscriptionData, Trigger,
};

/// Persistence contract consumed by the check engine and notifier.
///
/// Implementations must be safe to share across worker tasks
/// (`Send + Sync`). All timestamps are UNIX seconds; expiry-sensitive
/// operations take `now` explicitly so callers stay in control of the
/// clock.
pub trait Database: Send + Sync {
    /// Fetches a trigger by id.
    fn get_trigger(&self, id: &str) -> Result<Trigger>;

    /// Creates or replaces a trigger.
    fn save_trigger(&self, trigger: &Trigger) -> Result<()>;

    /// Deletes a trigger. Deleting an unknown id is a no-op.
    fn remove_trigger(&self, id: &str) -> Result<()>;

    /// All known trigger ids.
    fn trigger_ids(&self) -> Result<Vec<String>>;

    /// Fetches a subscription by id.
    fn get_subscription(&self, id: &str) -> Result<SubscriptionData>;

    /// Creates or replaces a subscription.
    fn save_subscription(&self, subscription: &SubscriptionData) -> Result<()>;

    /// Deletes a subscription. Deleting an unknown id is a no-op.
    fn remove_subscription(&self, id: &str) -> Result<()>;

    /// Enabled subscriptions whose tag set is a subset of `tags`.
    fn tag_subscriptions(&self, tags: &[String]) -> Result<Vec<SubscriptionData>>;

    /// Fetches a contact by id.
    fn get_contact(&self, id: &str) -> Result<ContactData>;

    /// Creates or replaces a contact.
    fn save_contact(&self, contact: &ContactData) -> Result<()>;

    /// Deletes a contact. Deleting an unknown id is a no-op.
    fn remove_contact(&self, id: &str) -> Result<()>;

    /// Most recently persisted check data for a trigger.
    fn trigger_last_check(&self, trigger_id: &str) -> Result<Option<CheckData>>;

    /// Replaces a trigger's check data in a single atomic swap; readers
    /// never observe a partially applied update.
    fn set_trigger_last_check(&self, trigger_id: &str, check: &CheckData) -> Result<()>;

    /// Appends a state-transition event to the notifier's inbox.
    fn push_event(&self, event: &NotificationEvent) -> Result<()>;

    /// Removes and returns the oldest pending event, if any.
    fn pop_event(&self) -> Result<Option<NotificationEvent>>;

    /// Inserts a notification into the time-ordered delivery queue.
    fn add_notification(&self, notification: &ScheduledNotification) -> Result<()>;

    /// Atomically removes and returns every notification due at or
    /// before `now`, ordered by due time.
    fn pop_due_notifications(&self, now: i64) -> Result<Vec<ScheduledNotification>>;

    /// Removes a queued notification by its dedup key, if present.
    fn remove_notification(&self, key: &str) -> Result<()>;

    /// Records a dedup key with a time-to-live in seconds.
    fn add_notification_key(&self, key: &str, ttl: i64, now: i64) -> Result<()>;

    /// Whether a dedup key is present and unexpired.
    fn notification_key_exists(&self, key: &str, now: i64) -> Result<bool>;

    /// Drops a dedup key ahead of its expiry.
    fn remove_notification_key(&self, key: &str) -> Result<()>;

    /// Records one planned send for the `(contact, trigger)` pair.
    fn register_throttle_event(
        &self,
        contact_id: &str,
        trigger_id: &str,
        ts: i64,
    ) -> Result<()>;

    /// Number of sends recorded for the pair since `since` (inclusive).
    fn count_throttle_events(
        &self,
        contact_id: &str,
        trigger_id: &str,
        since: i64,
    ) -> Result<u64>;
}
