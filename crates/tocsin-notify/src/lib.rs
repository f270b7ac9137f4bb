//! Event planning and notification delivery.
//!
//! [`planner::Planner`] turns state-transition events into scheduled
//! notifications: it resolves matching subscriptions by tag, applies the
//! ignore policy and schedule windows, throttles chatty
//! `(contact, trigger)` pairs and deduplicates. [`scheduler::Scheduler`]
//! owns the time-ordered queue and dispatches due notifications to the
//! [`Sender`] registered for each contact type, retrying failures with
//! exponential back-off. [`worker::NotifierWorkers`] runs both sides as
//! tokio worker pools.

pub mod config;
pub mod error;
pub mod planner;
pub mod plugin;
pub mod scheduler;
pub mod throttling;
pub mod worker;

#[cfg(test)]
mod tests;

use anyhow::Result;
use async_trait::async_trait;
use tocsin_common::types::ScheduledNotification;

/// A delivery transport for one contact type (email, webhook, …).
///
/// Implementations are registered in the [`plugin::SenderRegistry`] and
/// looked up by `contact.type` at delivery time. Transports are external
/// collaborators; the scheduler only assumes `send` honors its own
/// deadline and reports failure through the returned `Result`.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Delivers the notification to its contact.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery failed; the scheduler re-enqueues
    /// with back-off until the retry cap.
    async fn send(&self, notification: &ScheduledNotification) -> Result<()>;

    /// The contact type this sender handles (e.g. `"webhook"`).
    fn sender_type(&self) -> &str;
}
