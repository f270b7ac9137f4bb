//! Shared data model for the tocsin alerting core.
//!
//! Defines triggers, per-metric and per-trigger check state, state
//! transition events, subscriptions, contacts and scheduled
//! notifications, together with the severity scoring, ignore-policy and
//! schedule-window rules that the check engine and notifier apply.

pub mod error;
pub mod logging;
pub mod types;
