use std::sync::Arc;
use std::time::Instant;

use tocsin_common::types::{
    CheckData, NotificationEvent, State, Trigger, TriggerType, TtlState,
};
use tocsin_index::TriggerIndex;
use tocsin_storage::buffer::MetricsBuffer;
use tocsin_storage::Database;

use crate::config::CheckConfig;
use crate::error::{CheckError, Result};
use crate::expression::{self, Bindings};
use crate::target::{self, TargetMetric, TriggerTargets};

/// Stateful trigger evaluator.
///
/// One `check` call implements a full evaluation pass: load previous
/// state, evaluate targets, walk per-metric transitions, detect stale
/// metrics, aggregate, score, persist, sync the search index, and push
/// the resulting events downstream. Storage failures abort before any
/// mutation is persisted; evaluation failures degrade the trigger to
/// EXCEPTION and still persist.
pub struct Checker {
    database: Arc<dyn Database>,
    buffer: Arc<MetricsBuffer>,
    index: Option<Arc<TriggerIndex>>,
    config: CheckConfig,
}

impl Checker {
    pub fn new(
        database: Arc<dyn Database>,
        buffer: Arc<MetricsBuffer>,
        config: CheckConfig,
    ) -> Self {
        Checker {
            database,
            buffer,
            index: None,
            config,
        }
    }

    /// Attaches the search index kept in sync with check scores.
    pub fn with_index(mut self, index: Arc<TriggerIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Runs one check of `trigger_id` at wall-clock `now`.
    pub fn check(&self, trigger_id: &str, now: i64) -> Result<CheckData> {
        self.check_with_deadline(trigger_id, now, None)
    }

    /// Like [`Checker::check`], aborting without persisting anything if
    /// `deadline` passes before results are ready to be written.
    pub fn check_with_deadline(
        &self,
        trigger_id: &str,
        now: i64,
        deadline: Option<Instant>,
    ) -> Result<CheckData> {
        let trigger = self.database.get_trigger(trigger_id)?;
        trigger.validate()?;

        // A trigger checked for the first time starts from an OK
        // aggregate so data arriving later doesn't fire a recovery.
        let mut check = self
            .database
            .trigger_last_check(trigger_id)?
            .unwrap_or_else(|| CheckData {
                state: State::Ok,
                ..Default::default()
            });
        let gap = self.config.check_point_gap_secs;
        let from = if check.timestamp == 0 {
            now - gap
        } else {
            (check.timestamp - gap).max(check.event_timestamp)
        };

        let mut events = Vec::new();

        match target::evaluate_targets(&self.buffer, &trigger, from, now) {
            Ok(targets) => {
                let walk = self.walk_metrics(&trigger, &mut check, &targets, from, now, &mut events);
                match walk {
                    Ok(()) => {
                        self.detect_stale(&trigger, &mut check, now, &mut events);
                        let aggregate = check
                            .metrics
                            .values()
                            .map(|metric| metric.state)
                            .max_by_key(|state| state.score())
                            .unwrap_or(State::Ok);
                        transition_aggregate(&trigger, &mut check, aggregate, None, now, &mut events);
                    }
                    Err(message) => {
                        transition_aggregate(
                            &trigger,
                            &mut check,
                            State::Exception,
                            Some(message),
                            now,
                            &mut events,
                        );
                    }
                }
            }
            Err(CheckError::TargetEvaluation { index, message }) => {
                transition_aggregate(
                    &trigger,
                    &mut check,
                    State::Exception,
                    Some(format!("target t{index}: {message}")),
                    now,
                    &mut events,
                );
            }
            Err(other) => return Err(other),
        }

        check.timestamp = now;
        check.last_successful_check_timestamp = now;
        check.update_score();

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(CheckError::DeadlineExceeded);
            }
        }

        self.database.set_trigger_last_check(trigger_id, &check)?;
        if let Some(index) = &self.index {
            index.update_score(trigger_id, check.score);
        }
        for event in &events {
            self.database.push_event(event)?;
            tracing::debug!(trigger_id, %event, "Emitted state transition");
        }

        Ok(check)
    }

    /// Walks every metric of the primary target in timestamp order,
    /// emitting a transition event on each state change. Returns the
    /// error text if an expression fails to evaluate.
    fn walk_metrics(
        &self,
        trigger: &Trigger,
        check: &mut CheckData,
        targets: &TriggerTargets,
        from: i64,
        now: i64,
        events: &mut Vec<NotificationEvent>,
    ) -> std::result::Result<(), String> {
        for metric in &targets.primary {
            self.walk_metric(trigger, check, targets, metric, from, now, events)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_metric(
        &self,
        trigger: &Trigger,
        check: &mut CheckData,
        targets: &TriggerTargets,
        metric: &TargetMetric,
        from: i64,
        now: i64,
        events: &mut Vec<NotificationEvent>,
    ) -> std::result::Result<(), String> {
        let mut state =
            check.get_or_create_metric_state(&metric.name, from, trigger.mute_new_metrics, now);
        let check_point = state.check_point(self.config.check_point_gap_secs);

        for sample in &metric.values {
            if sample.timestamp <= check_point {
                continue;
            }

            let new_state = match trigger.trigger_type {
                TriggerType::Rising => {
                    threshold_state(sample.value, trigger, |value, limit| value >= limit)
                }
                TriggerType::Falling => {
                    threshold_state(sample.value, trigger, |value, limit| value <= limit)
                }
                TriggerType::Expression => {
                    let Some(bindings) = build_bindings(trigger, targets, sample.timestamp, sample.value)
                    else {
                        // An auxiliary target has no value at this step.
                        continue;
                    };
                    let source = trigger.expression_source().unwrap_or_default();
                    match expression::evaluate(source, &bindings) {
                        Ok(result) => result,
                        Err(err) => return Err(err.to_string()),
                    }
                }
            };

            if new_state != state.state {
                let event = NotificationEvent {
                    is_trigger_event: false,
                    timestamp: sample.timestamp,
                    metric: metric.name.clone(),
                    value: Some(sample.value),
                    state: new_state,
                    trigger_id: trigger.id.clone(),
                    subscription_id: None,
                    contact_id: String::new(),
                    old_state: state.state,
                    message: None,
                };
                if check.maintenance > now || state.maintenance > now {
                    state.suppressed = true;
                    state.suppressed_state = Some(new_state);
                    tracing::debug!(
                        trigger_id = %trigger.id,
                        metric = %metric.name,
                        "Transition suppressed (maintenance)"
                    );
                } else {
                    state.suppressed = false;
                    state.suppressed_state = None;
                    events.push(event);
                }
                state.state = new_state;
                state.event_timestamp = sample.timestamp;
            } else if check.maintenance <= now && state.maintenance <= now && state.suppressed {
                state.suppressed = false;
                state.suppressed_state = None;
            }
            state.timestamp = sample.timestamp;
            state.value = Some(sample.value);
        }

        check.metrics.insert(metric.name.clone(), state);
        Ok(())
    }

    /// Transitions metrics without fresh samples to the trigger's TTL
    /// state. `DEL` removes the metric silently; a TTL of zero disables
    /// stale detection entirely.
    fn detect_stale(
        &self,
        trigger: &Trigger,
        check: &mut CheckData,
        now: i64,
        events: &mut Vec<NotificationEvent>,
    ) {
        if trigger.ttl == 0 {
            return;
        }
        let ttl_state = trigger.ttl_state.unwrap_or(TtlState::Nodata);
        let horizon = now - trigger.ttl;
        let maintenance = check.maintenance;
        let mut removed = Vec::new();

        for (name, state) in check.metrics.iter_mut() {
            if state.timestamp >= horizon {
                continue;
            }
            match ttl_state.state() {
                None => removed.push(name.clone()),
                Some(stale) if stale != state.state => {
                    let event = NotificationEvent {
                        is_trigger_event: false,
                        timestamp: now,
                        metric: name.clone(),
                        value: None,
                        state: stale,
                        trigger_id: trigger.id.clone(),
                        subscription_id: None,
                        contact_id: String::new(),
                        old_state: state.state,
                        message: None,
                    };
                    if maintenance > now || state.maintenance > now {
                        state.suppressed = true;
                        state.suppressed_state = Some(stale);
                    } else {
                        state.suppressed = false;
                        state.suppressed_state = None;
                        events.push(event);
                    }
                    state.state = stale;
                    state.event_timestamp = now;
                    state.value = None;
                }
                Some(_) => {}
            }
        }

        for name in removed {
            check.metrics.remove(&name);
            tracing::debug!(
                trigger_id = %trigger.id,
                metric = %name,
                "Removed stale metric (ttl_state = DEL)"
            );
        }
    }
}

fn threshold_state(value: f64, trigger: &Trigger, breached: impl Fn(f64, f64) -> bool) -> State {
    // validate() guarantees both thresholds for rising/falling triggers.
    let error_value = trigger.error_value.unwrap_or_default();
    let warn_value = trigger.warn_value.unwrap_or_default();
    if breached(value, error_value) {
        State::Error
    } else if breached(value, warn_value) {
        State::Warn
    } else {
        State::Ok
    }
}

/// Binds `t1`…`tN`, `warn_value` and `error_value` for one timestamp.
/// Returns `None` when an auxiliary target has no sample at `ts`.
fn build_bindings(
    trigger: &Trigger,
    targets: &TriggerTargets,
    ts: i64,
    primary_value: f64,
) -> Option<Bindings> {
    let mut bindings = Bindings::new();
    bindings.set("t1", primary_value);
    for index in 2..=(targets.additional.len() + 1) {
        bindings.set(&format!("t{index}"), targets.additional_value(index, ts)?);
    }
    if let Some(warn) = trigger.warn_value {
        bindings.set("warn_value", warn);
    }
    if let Some(error) = trigger.error_value {
        bindings.set("error_value", error);
    }
    Some(bindings)
}

/// Applies the aggregate state transition, emitting a trigger-level
/// event unless trigger maintenance suppresses it.
fn transition_aggregate(
    trigger: &Trigger,
    check: &mut CheckData,
    new_state: State,
    message: Option<String>,
    now: i64,
    events: &mut Vec<NotificationEvent>,
) {
    check.message = message;
    if check.state != new_state {
        let event = NotificationEvent {
            is_trigger_event: true,
            timestamp: now,
            metric: String::new(),
            value: None,
            state: new_state,
            trigger_id: trigger.id.clone(),
            subscription_id: None,
            contact_id: String::new(),
            old_state: check.state,
            message: check.message.clone(),
        };
        if check.maintenance > now {
            check.suppressed = true;
            check.suppressed_state = Some(new_state);
            tracing::debug!(
                trigger_id = %trigger.id,
                "Trigger transition suppressed (maintenance)"
            );
        } else {
            check.suppressed = false;
            check.suppressed_state = None;
            events.push(event);
        }
        check.state = new_state;
        check.event_timestamp = now;
    } else if check.maintenance <= now && check.suppressed {
        check.suppressed = false;
        check.suppressed_state = None;
    }
}
