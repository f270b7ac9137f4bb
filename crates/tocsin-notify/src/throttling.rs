use std::sync::Arc;

use tocsin_storage::Database;

use crate::config::ThrottleRule;
use crate::error::Result;

/// Maps recent send volume per `(contact, trigger)` pair to a delay.
///
/// Counters live in the store with short TTLs and are fail-open: a lost
/// write can only make a notification leave earlier, never suppress it.
pub struct Throttler {
    database: Arc<dyn Database>,
    rules: Vec<ThrottleRule>,
}

impl Throttler {
    pub fn new(database: Arc<dyn Database>, rules: Vec<ThrottleRule>) -> Self {
        Throttler { database, rules }
    }

    /// The delay to apply to the next notification for the pair; the
    /// largest exceeded rule wins, 0 when nothing is exceeded.
    pub fn delay(&self, contact_id: &str, trigger_id: &str, now: i64) -> Result<i64> {
        let mut delay = 0;
        for rule in &self.rules {
            let count = self.database.count_throttle_events(
                contact_id,
                trigger_id,
                now - rule.window_secs,
            )?;
            if count > rule.max_count {
                delay = delay.max(rule.delay_secs);
            }
        }
        Ok(delay)
    }

    /// Records one planned send for the pair.
    pub fn register(&self, contact_id: &str, trigger_id: &str, now: i64) -> Result<()> {
        self.database
            .register_throttle_event(contact_id, trigger_id, now)?;
        Ok(())
    }
}
