use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tocsin_common::types::{
    CheckData, ContactData, NotificationEvent, ScheduledNotification, SubscriptionData, Trigger,
};

use crate::error::{Result, StorageError};
use crate::Database;

/// Throttle history older than this is pruned on write.
const THROTTLE_HISTORY_HORIZON: i64 = 24 * 3600;

#[derive(Default)]
struct Inner {
    triggers: HashMap<String, Trigger>,
    subscriptions: HashMap<String, SubscriptionData>,
    contacts: HashMap<String, ContactData>,
    last_checks: HashMap<String, CheckData>,
    events: VecDeque<NotificationEvent>,
    /// Keyed by `(due timestamp, dedup key)` so iteration is due-order.
    notifications: BTreeMap<(i64, String), ScheduledNotification>,
    /// Dedup key -> expiry timestamp.
    notification_keys: HashMap<String, i64>,
    /// `(contact, trigger)` -> send timestamps.
    throttle_history: HashMap<(String, String), Vec<i64>>,
}

/// In-process [`Database`] implementation.
///
/// All state lives behind a single mutex; operations are short and
/// lock-free callers never observe partial updates, which is what the
/// check engine's single-writer contract requires from a backend.
#[derive(Default)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Database for MemoryDatabase {
    fn get_trigger(&self, id: &str) -> Result<Trigger> {
        self.lock()
            .triggers
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                entity: "trigger",
                id: id.to_string(),
            })
    }

    fn save_trigger(&self, trigger: &Trigger) -> Result<()> {
        self.lock()
            .triggers
            .insert(trigger.id.clone(), trigger.clone());
        Ok(())
    }

    fn remove_trigger(&self, id: &str) -> Result<()> {
        self.lock().triggers.remove(id);
        Ok(())
    }

    fn trigger_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.lock().triggers.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn get_subscription(&self, id: &str) -> Result<SubscriptionData> {
        self.lock()
            .subscriptions
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                entity: "subscription",
                id: id.to_string(),
            })
    }

    fn save_subscription(&self, subscription: &SubscriptionData) -> Result<()> {
        self.lock()
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    fn remove_subscription(&self, id: &str) -> Result<()> {
        self.lock().subscriptions.remove(id);
        Ok(())
    }

    fn tag_subscriptions(&self, tags: &[String]) -> Result<Vec<SubscriptionData>> {
        let tag_set: HashSet<&str> = tags.iter().map(String::as_str).collect();
        let mut matched: Vec<SubscriptionData> = self
            .lock()
            .subscriptions
            .values()
            .filter(|sub| {
                sub.enabled
                    && !sub.tags.is_empty()
                    && sub.tags.iter().all(|tag| tag_set.contains(tag.as_str()))
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matched)
    }

    fn get_contact(&self, id: &str) -> Result<ContactData> {
        self.lock()
            .contacts
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                entity: "contact",
                id: id.to_string(),
            })
    }

    fn save_contact(&self, contact: &ContactData) -> Result<()> {
        self.lock()
            .contacts
            .insert(contact.id.clone(), contact.clone());
        Ok(())
    }

    fn remove_contact(&self, id: &str) -> Result<()> {
        self.lock().contacts.remove(id);
        Ok(())
    }

    fn trigger_last_check(&self, trigger_id: &str) -> Result<Option<CheckData>> {
        Ok(self.lock().last_checks.get(trigger_id).cloned())
    }

    fn set_trigger_last_check(&self, trigger_id: &str, check: &CheckData) -> Result<()> {
        self.lock()
            .last_checks
            .insert(trigger_id.to_string(), check.clone());
        Ok(())
    }

    fn push_event(&self, event: &NotificationEvent) -> Result<()> {
        self.lock().events.push_back(event.clone());
        Ok(())
    }

    fn pop_event(&self) -> Result<Option<NotificationEvent>> {
        Ok(self.lock().events.pop_front())
    }

    fn add_notification(&self, notification: &ScheduledNotification) -> Result<()> {
        self.lock().notifications.insert(
            (notification.timestamp, notification.key()),
            notification.clone(),
        );
        Ok(())
    }

    fn pop_due_notifications(&self, now: i64) -> Result<Vec<ScheduledNotification>> {
        let mut inner = self.lock();
        let pending = std::mem::take(&mut inner.notifications);
        let mut due = Vec::new();
        for ((ts, key), notification) in pending {
            if ts <= now {
                due.push(notification);
            } else {
                inner.notifications.insert((ts, key), notification);
            }
        }
        Ok(due)
    }

    fn remove_notification(&self, key: &str) -> Result<()> {
        let mut inner = self.lock();
        inner
            .notifications
            .retain(|(_, stored_key), _| stored_key != key);
        Ok(())
    }

    fn add_notification_key(&self, key: &str, ttl: i64, now: i64) -> Result<()> {
        self.lock()
            .notification_keys
            .insert(key.to_string(), now + ttl);
        Ok(())
    }

    fn notification_key_exists(&self, key: &str, now: i64) -> Result<bool> {
        let mut inner = self.lock();
        match inner.notification_keys.get(key) {
            Some(expires_at) if *expires_at > now => Ok(true),
            Some(_) => {
                inner.notification_keys.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn remove_notification_key(&self, key: &str) -> Result<()> {
        self.lock().notification_keys.remove(key);
        Ok(())
    }

    fn register_throttle_event(
        &self,
        contact_id: &str,
        trigger_id: &str,
        ts: i64,
    ) -> Result<()> {
        let mut inner = self.lock();
        let history = inner
            .throttle_history
            .entry((contact_id.to_string(), trigger_id.to_string()))
            .or_default();
        history.push(ts);
        let horizon = ts - THROTTLE_HISTORY_HORIZON;
        history.retain(|recorded| *recorded >= horizon);
        Ok(())
    }

    fn count_throttle_events(
        &self,
        contact_id: &str,
        trigger_id: &str,
        since: i64,
    ) -> Result<u64> {
        let inner = self.lock();
        let count = inner
            .throttle_history
            .get(&(contact_id.to_string(), trigger_id.to_string()))
            .map_or(0, |history| {
                history.iter().filter(|ts| **ts >= since).count()
            });
        Ok(count as u64)
    }
}
