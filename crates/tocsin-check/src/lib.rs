//! Trigger check engine.
//!
//! [`check::Checker`] evaluates a trigger against the time-series buffer:
//! it derives a state per metric and timestamp, walks transitions in
//! order, applies TTL-based stale detection and maintenance suppression,
//! aggregates the per-metric states into the trigger state, and emits
//! [`tocsin_common::types::NotificationEvent`]s for every transition.
//!
//! [`worker::CheckScheduler`] drives the engine: a fixed worker pool with
//! per-trigger affinity, a keyed mutex guaranteeing at most one in-flight
//! check per trigger, and a per-check deadline that aborts without
//! persisting.

pub mod check;
pub mod config;
pub mod error;
pub mod expression;
pub mod target;
pub mod worker;
