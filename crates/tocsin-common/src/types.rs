use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const MINUTES_IN_DAY: i64 = 24 * 60;
const SECONDS_IN_DAY: i64 = 24 * 3600;

/// Evaluation state of a metric or trigger.
///
/// `TEST` only appears on manually fired test notifications; checks never
/// produce it and it carries no severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Ok,
    Warn,
    Error,
    #[default]
    Nodata,
    Exception,
    Test,
}

impl State {
    /// Severity score used for check aggregation and search ranking.
    pub fn score(self) -> i64 {
        match self {
            State::Ok | State::Test => 0,
            State::Warn => 1,
            State::Error => 100,
            State::Nodata => 1000,
            State::Exception => 100_000,
        }
    }

    /// Weight used by the subscription ignore policy. States outside the
    /// policy (EXCEPTION, TEST) have no weight and are never ignored.
    pub fn event_weight(self) -> Option<i64> {
        match self {
            State::Ok => Some(0),
            State::Warn => Some(1),
            State::Error => Some(100),
            State::Nodata => Some(10_000),
            State::Exception | State::Test => None,
        }
    }

    fn subject_rank(self) -> u8 {
        match self {
            State::Ok => 0,
            State::Warn => 1,
            State::Error => 2,
            State::Nodata => 3,
            State::Exception => 4,
            State::Test => 5,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Ok => write!(f, "OK"),
            State::Warn => write!(f, "WARN"),
            State::Error => write!(f, "ERROR"),
            State::Nodata => write!(f, "NODATA"),
            State::Exception => write!(f, "EXCEPTION"),
            State::Test => write!(f, "TEST"),
        }
    }
}

impl std::str::FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(State::Ok),
            "WARN" => Ok(State::Warn),
            "ERROR" => Ok(State::Error),
            "NODATA" => Ok(State::Nodata),
            "EXCEPTION" => Ok(State::Exception),
            "TEST" => Ok(State::Test),
            _ => Err(format!("unknown state: {s}")),
        }
    }
}

/// State assigned to a metric whose samples went stale. `DEL` removes the
/// metric from the check data instead of transitioning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TtlState {
    Ok,
    Warn,
    Error,
    Nodata,
    Del,
}

impl TtlState {
    /// The state a stale metric transitions to, or `None` for `DEL`.
    pub fn state(self) -> Option<State> {
        match self {
            TtlState::Ok => Some(State::Ok),
            TtlState::Warn => Some(State::Warn),
            TtlState::Error => Some(State::Error),
            TtlState::Nodata => Some(State::Nodata),
            TtlState::Del => None,
        }
    }
}

/// Most critical state in a batch of events, used for notification
/// subjects. Severity order here is the fixed subject order, not the
/// scoring order.
pub fn subject_state(events: &[NotificationEvent]) -> Option<State> {
    events
        .iter()
        .map(|e| e.state)
        .max_by_key(|s| s.subject_rank())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// OK < WARN < ERROR on the value axis.
    Rising,
    /// OK > WARN > ERROR on the value axis.
    Falling,
    /// User-supplied expression decides the state.
    Expression,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerType::Rising => write!(f, "rising"),
            TriggerType::Falling => write!(f, "falling"),
            TriggerType::Expression => write!(f, "expression"),
        }
    }
}

/// User-defined alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    pub targets: Vec<String>,
    pub warn_value: Option<f64>,
    pub error_value: Option<f64>,
    pub trigger_type: TriggerType,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_state: Option<TtlState>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: i64,
    #[serde(rename = "sched", default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Deprecated alias for `expression`; rejected when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_expression: Option<String>,
    /// Metric-name glob patterns derived from `targets`.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// If set, newly seen metrics start in OK instead of NODATA.
    #[serde(default)]
    pub mute_new_metrics: bool,
}

impl Trigger {
    /// Checks the structural invariants of the trigger definition.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::ValidationError;

        if self.targets.is_empty() {
            return Err(ValidationError::NoTargets(self.id.clone()));
        }
        if self.tags.is_empty() {
            return Err(ValidationError::NoTags(self.id.clone()));
        }
        match self.trigger_type {
            TriggerType::Rising | TriggerType::Falling => {
                let (warn, error) = match (self.warn_value, self.error_value) {
                    (Some(w), Some(e)) => (w, e),
                    _ => return Err(ValidationError::MissingThresholds(self.id.clone())),
                };
                if warn == error {
                    return Err(ValidationError::EqualThresholds(self.id.clone()));
                }
            }
            TriggerType::Expression => {
                if self.expression.is_some() && self.python_expression.is_some() {
                    return Err(ValidationError::AmbiguousExpression(self.id.clone()));
                }
                if self.expression_source().map_or(true, str::is_empty) {
                    return Err(ValidationError::MissingExpression(self.id.clone()));
                }
            }
        }
        Ok(())
    }

    /// The effective expression text, honoring the deprecated alias.
    pub fn expression_source(&self) -> Option<&str> {
        self.expression
            .as_deref()
            .or(self.python_expression.as_deref())
    }

    /// True when the trigger can only ever describe a single metric:
    /// one target, one pattern, and no glob metacharacters.
    pub fn is_simple(&self) -> bool {
        if self.targets.len() > 1 || self.patterns.len() > 1 {
            return false;
        }
        !self.patterns.iter().any(|pattern| {
            pattern
                .chars()
                .any(|c| matches!(c, '*' | '{' | '?' | '['))
        })
    }
}

/// Weekly allow-window. Days are Monday-first; offsets are minutes from
/// local midnight. A window whose end is before its start wraps past
/// midnight into the next day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleData {
    pub days: Vec<ScheduleDay>,
    #[serde(rename = "tzOffset")]
    pub timezone_offset: i64,
    #[serde(rename = "startOffset")]
    pub start_offset: i64,
    #[serde(rename = "endOffset")]
    pub end_offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDay {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl ScheduleData {
    /// An all-days, all-hours schedule in UTC.
    pub fn always(day_names: [&str; 7]) -> Self {
        ScheduleData {
            days: day_names
                .iter()
                .map(|name| ScheduleDay {
                    enabled: true,
                    name: (*name).to_string(),
                })
                .collect(),
            timezone_offset: 0,
            start_offset: 0,
            end_offset: MINUTES_IN_DAY - 1,
        }
    }

    /// Whether the window allows the given UNIX timestamp.
    ///
    /// An equal start and end offset is an empty window and denies
    /// everything. For a wrapped window the day-enabled flag is checked
    /// against the day containing the window's start.
    pub fn is_allowed(&self, ts: i64) -> bool {
        let (mut end, start) = (self.end_offset, self.start_offset);
        if end == start {
            return false;
        }
        if end < start {
            end += MINUTES_IN_DAY;
        }

        let ts = ts - ts.rem_euclid(60) - self.timezone_offset * 60;
        let Some(date) = DateTime::<Utc>::from_timestamp(ts, 0) else {
            return false;
        };
        let weekday = date.weekday().num_days_from_monday() as usize;
        let day_start = ts - ts.rem_euclid(SECONDS_IN_DAY);
        let start_ts = day_start + start * 60;
        let end_ts = day_start + end * 60;

        if end < MINUTES_IN_DAY {
            self.day_enabled(weekday) && ts >= start_ts && ts <= end_ts
        } else {
            let end_ts = end_ts - SECONDS_IN_DAY;
            if ts > start_ts {
                self.day_enabled(weekday)
            } else if ts < end_ts {
                // The window started the previous day.
                self.day_enabled((weekday + 6) % 7)
            } else {
                false
            }
        }
    }

    fn day_enabled(&self, weekday: usize) -> bool {
        self.days.get(weekday).is_some_and(|day| day.enabled)
    }
}

/// Per-(trigger, metric) evaluation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricState {
    pub event_timestamp: i64,
    pub state: State,
    pub suppressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppressed_state: Option<State>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub maintenance: i64,
}

impl MetricState {
    /// The timestamp from which the next check resumes evaluating this
    /// metric: recent samples are re-read up to `gap` seconds back, but
    /// never past the last state transition.
    pub fn check_point(&self, gap: i64) -> i64 {
        (self.timestamp - gap).max(self.event_timestamp)
    }

    /// Event timestamp, falling back to the sample timestamp while no
    /// transition has happened yet.
    pub fn actual_event_timestamp(&self) -> i64 {
        if self.event_timestamp == 0 {
            self.timestamp
        } else {
            self.event_timestamp
        }
    }
}

/// Persistent result of the most recent check of a trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckData {
    #[serde(default)]
    pub metrics: HashMap<String, MetricState>,
    pub score: i64,
    pub state: State,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub maintenance: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub event_timestamp: i64,
    pub last_successful_check_timestamp: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub suppressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppressed_state: Option<State>,
    #[serde(rename = "msg", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckData {
    /// Fetches the state slice for `metric`, creating it when the metric
    /// is first seen. Muted triggers start new metrics in OK at the
    /// current wall clock; otherwise they start in NODATA at `empty_ts`
    /// so the first real sample produces a transition.
    pub fn get_or_create_metric_state(
        &mut self,
        metric: &str,
        empty_ts: i64,
        mute_new: bool,
        now: i64,
    ) -> MetricState {
        self.metrics
            .entry(metric.to_string())
            .or_insert_with(|| {
                if mute_new {
                    MetricState {
                        state: State::Ok,
                        timestamp: now,
                        event_timestamp: now,
                        ..Default::default()
                    }
                } else {
                    MetricState {
                        state: State::Nodata,
                        timestamp: empty_ts,
                        ..Default::default()
                    }
                }
            })
            .clone()
    }

    /// Recomputes the severity score from the aggregate and per-metric
    /// states, stores it and returns it.
    pub fn update_score(&mut self) -> i64 {
        self.score = self.state.score()
            + self
                .metrics
                .values()
                .map(|metric| metric.state.score())
                .sum::<i64>();
        self.score
    }

    /// Event timestamp, falling back to the check timestamp while no
    /// aggregate transition has happened yet.
    pub fn actual_event_timestamp(&self) -> i64 {
        if self.event_timestamp == 0 {
            self.timestamp
        } else {
            self.event_timestamp
        }
    }
}

/// State-transition record emitted by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "trigger_event", default, skip_serializing_if = "is_false")]
    pub is_trigger_event: bool,
    pub timestamp: i64,
    pub metric: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub state: State,
    pub trigger_id: String,
    #[serde(rename = "sub_id", default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(rename = "contactId", default, skip_serializing_if = "String::is_empty")]
    pub contact_id: String,
    pub old_state: State,
    #[serde(rename = "msg", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TriggerId: {}, Metric: {}, Value: {}, OldState: {}, State: {}, Message: '{}', Timestamp: {}",
            self.trigger_id,
            self.metric,
            self.value.unwrap_or(0.0),
            self.old_state,
            self.state,
            self.message.as_deref().unwrap_or(""),
            self.timestamp,
        )
    }
}

/// Trigger snapshot carried inside scheduled notifications. Events keep
/// snapshots, never back-references, so queue entries stay self-contained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerData {
    pub id: String,
    pub name: String,
    pub desc: String,
    pub targets: Vec<String>,
    pub warn_value: f64,
    pub error_value: f64,
    #[serde(rename = "__notifier_trigger_tags")]
    pub tags: Vec<String>,
}

impl TriggerData {
    pub fn from_trigger(trigger: &Trigger) -> Self {
        TriggerData {
            id: trigger.id.clone(),
            name: trigger.name.clone(),
            desc: trigger.desc.clone().unwrap_or_default(),
            targets: trigger.targets.clone(),
            warn_value: trigger.warn_value.unwrap_or(0.0),
            error_value: trigger.error_value.unwrap_or(0.0),
            tags: trigger.tags.clone(),
        }
    }

    /// Tags rendered as `"[tag1][tag2]…"` for notification subjects.
    pub fn get_tags(&self) -> String {
        let mut out = String::new();
        for tag in &self.tags {
            out.push('[');
            out.push_str(tag);
            out.push(']');
        }
        out
    }
}

/// Deliverable address with a channel type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactData {
    #[serde(rename = "type")]
    pub contact_type: String,
    pub value: String,
    pub id: String,
    pub user: String,
}

/// Plot-rendering settings carried through to the delivery sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlottingData {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub theme: String,
}

/// User-owned binding of a tag filter to a set of contacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionData {
    pub contacts: Vec<String>,
    pub tags: Vec<String>,
    #[serde(rename = "sched", default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleData>,
    #[serde(default)]
    pub plotting: PlottingData,
    pub id: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_warnings: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_recoverings: bool,
    #[serde(rename = "throttling")]
    pub throttling_enabled: bool,
    pub user: String,
}

impl SubscriptionData {
    /// Ignore policy: recoveries are dropped for `ignore_recoverings`
    /// subscriptions; single-step transitions touching WARN are dropped
    /// for `ignore_warnings` (and one-step recoveries for either flag).
    /// Transitions involving unweighted states are never ignored.
    pub fn must_ignore(&self, event: &NotificationEvent) -> bool {
        let (old_weight, new_weight) = match (
            event.old_state.event_weight(),
            event.state.event_weight(),
        ) {
            (Some(old), Some(new)) => (old, new),
            _ => return false,
        };
        let delta = new_weight - old_weight;
        if delta < 0 {
            if delta == -1 && (self.ignore_recoverings || self.ignore_warnings) {
                return true;
            }
            return self.ignore_recoverings;
        }
        if delta == 1 {
            return self.ignore_warnings;
        }
        false
    }

    /// Whether the subscription's schedule allows the given timestamp.
    /// Subscriptions without a schedule are always allowed.
    pub fn schedule_allows(&self, ts: i64) -> bool {
        self.schedule
            .as_ref()
            .map_or(true, |schedule| schedule.is_allowed(ts))
    }
}

/// A planned delivery of one event to one contact, due at `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub event: NotificationEvent,
    pub trigger: TriggerData,
    pub contact: ContactData,
    #[serde(default)]
    pub plotting: PlottingData,
    pub throttled: bool,
    pub send_fail: i32,
    pub timestamp: i64,
}

impl ScheduledNotification {
    /// Deduplication key; two notifications with the same key describe
    /// the same delivery and only one of them may be scheduled.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{:.6}:{}:{}:{}",
            self.contact.contact_type,
            self.contact.value,
            self.event.trigger_id,
            self.event.metric,
            self.event.state,
            self.event.timestamp,
            self.event.value.unwrap_or(0.0),
            self.send_fail,
            self.throttled,
            self.timestamp,
        )
    }
}

/// Parsed and pattern-matched metric sample pushed by the feeder.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedMetric {
    pub metric: String,
    pub patterns: Vec<String>,
    pub value: f64,
    pub timestamp: i64,
    /// Timestamp aligned to the metric's retention step.
    pub retention_timestamp: i64,
    /// Retention step in seconds.
    pub retention: i64,
}

/// Stored metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    #[serde(rename = "step", default, skip_serializing_if = "is_zero")]
    pub retention_timestamp: i64,
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub value: f64,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}
