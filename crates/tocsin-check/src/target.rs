use std::collections::HashMap;

use tocsin_common::types::{MetricValue, Trigger};
use tocsin_storage::buffer::MetricsBuffer;

use crate::error::{CheckError, Result};

/// One metric produced by the primary target.
#[derive(Debug, Clone)]
pub struct TargetMetric {
    pub name: String,
    pub values: Vec<MetricValue>,
}

/// Resolved time series for all of a trigger's targets.
///
/// The primary target (`t1`) may expand to any number of metrics; each
/// additional target must resolve to exactly one metric and provides an
/// auxiliary value series bound by name (`t2`…) inside expressions.
#[derive(Debug, Clone)]
pub struct TriggerTargets {
    pub primary: Vec<TargetMetric>,
    /// Auxiliary series, index 0 holding `t2`: timestamp -> value.
    pub additional: Vec<HashMap<i64, f64>>,
}

impl TriggerTargets {
    /// The auxiliary value for `t{index}` (2-based) at `ts`.
    pub fn additional_value(&self, index: usize, ts: i64) -> Option<f64> {
        self.additional
            .get(index.checked_sub(2)?)
            .and_then(|series| series.get(&ts).copied())
    }
}

/// Evaluates every target of `trigger` against the buffer over
/// `[from, to]`.
pub fn evaluate_targets(
    buffer: &MetricsBuffer,
    trigger: &Trigger,
    from: i64,
    to: i64,
) -> Result<TriggerTargets> {
    let mut targets = trigger.targets.iter().enumerate();

    let (_, primary_pattern) = targets.next().ok_or(CheckError::TargetEvaluation {
        index: 1,
        message: "trigger has no targets".to_string(),
    })?;

    let primary = buffer
        .fetch(primary_pattern, from, to)
        .into_iter()
        .map(|series| TargetMetric {
            name: series.metric,
            values: series.values,
        })
        .collect();

    let mut additional = Vec::new();
    for (i, pattern) in targets {
        let index = i + 1;
        let mut series = buffer.fetch(pattern, from, to);
        if series.len() != 1 {
            return Err(CheckError::TargetEvaluation {
                index,
                message: format!(
                    "target must resolve to exactly one metric, got {}",
                    series.len()
                ),
            });
        }
        let series = series.remove(0);
        additional.push(
            series
                .values
                .iter()
                .map(|value| (value.timestamp, value.value))
                .collect(),
        );
    }

    Ok(TriggerTargets {
        primary,
        additional,
    })
}
