//! Polling plan construction.
//!
//! A plan is built once from user input: each entry is `metricType` or
//! `metricType|scheduleExpr`, and the result holds at most one
//! [`MetricSpec`] per metric type.

use tracing::debug;

use crate::error::{RelayError, Result};
use crate::schedule::Schedule;

/// Schedule used when an entry has none.
pub const DEFAULT_SCHEDULE: &str = "*/10 * * * *";

/// Separator between the metric type and the schedule in a plan entry.
pub const ENTRY_SEPARATOR: char = '|';

/// A metric type and the schedule it is polled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    metric_type: String,
    schedule: Schedule,
}

impl MetricSpec {
    /// Creates a spec, parsing the schedule expression.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidSchedule` if `schedule_expr` does not parse.
    pub fn new(metric_type: impl Into<String>, schedule_expr: &str) -> Result<Self> {
        Ok(Self {
            metric_type: metric_type.into(),
            schedule: Schedule::parse(schedule_expr)?,
        })
    }

    /// The metric type.
    #[must_use]
    pub fn metric_type(&self) -> &str {
        &self.metric_type
    }

    /// The schedule expression as supplied.
    #[must_use]
    pub fn schedule_expr(&self) -> &str {
        self.schedule.expr()
    }

    /// The parsed schedule.
    #[must_use]
    pub const fn schedule(&self) -> &Schedule {
        &self.schedule
    }
}

/// Parses a single plan entry.
///
/// # Errors
///
/// Returns `RelayError::MalformedEntry` for more than two fields or an
/// empty metric type, and `RelayError::InvalidSchedule` for a schedule that
/// does not parse.
pub fn parse_entry(entry: &str) -> Result<MetricSpec> {
    let fields: Vec<&str> = entry.split(ENTRY_SEPARATOR).collect();
    let malformed = |reason: &str| RelayError::MalformedEntry {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };

    match fields.as_slice() {
        [metric_type, ..] if metric_type.is_empty() => Err(malformed("empty metric type")),
        [metric_type] => MetricSpec::new(*metric_type, DEFAULT_SCHEDULE),
        [metric_type, schedule_expr] => MetricSpec::new(*metric_type, schedule_expr),
        _ => Err(malformed(&format!(
            "expected at most 2 fields separated by '{ENTRY_SEPARATOR}', found {}",
            fields.len()
        ))),
    }
}

/// Normalizes raw entries into a deduplicated plan.
///
/// Entries are processed in order. A metric type seen before is dropped,
/// so its first schedule wins. Any malformed entry fails the whole plan.
///
/// # Errors
///
/// Returns the first `MalformedEntry` or `InvalidSchedule` error encountered.
pub fn normalize<I, S>(entries: I) -> Result<Vec<MetricSpec>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut plan: Vec<MetricSpec> = Vec::new();
    for entry in entries {
        let spec = parse_entry(entry.as_ref())?;
        if plan.iter().any(|s| s.metric_type == spec.metric_type) {
            debug!(
                metric_type = %spec.metric_type,
                schedule = %spec.schedule,
                "dropping duplicate plan entry"
            );
            continue;
        }
        plan.push(spec);
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn entry_with_schedule() {
        let spec = parse_entry("metrictype|*/1 * * * *").unwrap();
        assert_eq!(spec.metric_type(), "metrictype");
        assert_eq!(spec.schedule_expr(), "*/1 * * * *");
    }

    #[test]
    fn entry_without_schedule_gets_default() {
        let spec = parse_entry("storage.googleapis.com/storage/total_bytes").unwrap();
        assert_eq!(spec.schedule_expr(), DEFAULT_SCHEDULE);
    }

    #[test_case("metrictype|*/1 * * * *|dummy"; "three fields")]
    #[test_case("|*/5 * * * *"; "empty metric type")]
    #[test_case(""; "empty entry")]
    fn malformed_entries(entry: &str) {
        assert!(matches!(
            parse_entry(entry),
            Err(RelayError::MalformedEntry { .. })
        ));
    }

    #[test_case("metrictype|*/99 * * * *"; "step out of range")]
    #[test_case("metrictype|"; "empty schedule")]
    #[test_case("metrictype|every minute"; "not cron")]
    fn invalid_schedules(entry: &str) {
        assert!(matches!(
            parse_entry(entry),
            Err(RelayError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn keeps_input_order() {
        let plan = normalize([
            "storage.googleapis.com/storage/total_bytes|*/10 * * * *",
            "storage.googleapis.com/storage/object_count|*/5 * * * *",
        ])
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].metric_type(), "storage.googleapis.com/storage/total_bytes");
        assert_eq!(plan[1].metric_type(), "storage.googleapis.com/storage/object_count");
        assert_eq!(plan[0].schedule_expr(), "*/10 * * * *");
        assert_eq!(plan[1].schedule_expr(), "*/5 * * * *");
    }

    #[test]
    fn first_occurrence_wins() {
        let plan = normalize(["a/b/c", "a/b/c|*/5 * * * *", "x/y/z"]).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].metric_type(), "a/b/c");
        assert_eq!(plan[0].schedule_expr(), DEFAULT_SCHEDULE);
        assert_eq!(plan[1].metric_type(), "x/y/z");
        assert_eq!(plan[1].schedule_expr(), DEFAULT_SCHEDULE);
    }

    #[test]
    fn first_explicit_schedule_wins() {
        let plan = normalize(["a/b/c|*/5 * * * *", "a/b/c|*/15 * * * *"]).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].schedule_expr(), "*/5 * * * *");
    }

    #[test]
    fn bad_entry_fails_whole_plan() {
        let result = normalize([
            "storage.googleapis.com/storage/total_bytes|*/5 * * * *",
            "storage.googleapis.com/storage/object_count|*/99 * * * *",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn too_many_fields_fails_whole_plan() {
        let result = normalize([
            "storage.googleapis.com/storage/total_bytes|*/10 * * * *",
            "storage.googleapis.com/storage/object_count|*/5 * * * *|Dummy",
        ]);
        assert!(matches!(result, Err(RelayError::MalformedEntry { .. })));
    }

    #[test]
    fn empty_input_is_empty_plan() {
        let plan = normalize(Vec::<String>::new()).unwrap();
        assert!(plan.is_empty());
    }

    proptest! {
        #[test]
        fn one_spec_per_metric_type(
            entries in proptest::collection::vec(
                ("[a-c]\\.com/[a-c]", proptest::option::of(1u32..30)),
                0..20,
            )
        ) {
            let raw: Vec<String> = entries
                .iter()
                .map(|(metric, step)| match step {
                    Some(step) => format!("{metric}|*/{step} * * * *"),
                    None => metric.clone(),
                })
                .collect();
            let plan = normalize(&raw).unwrap();

            let mut seen = std::collections::HashSet::new();
            for spec in &plan {
                prop_assert!(seen.insert(spec.metric_type().to_string()));
                let first = entries.iter().position(|(m, _)| m == spec.metric_type()).unwrap();
                let expected = raw[first].split_once('|').map_or(DEFAULT_SCHEDULE, |(_, s)| s);
                prop_assert_eq!(spec.schedule_expr(), expected);
            }
            let distinct: std::collections::HashSet<_> = entries.iter().map(|(m, _)| m).collect();
            prop_assert_eq!(plan.len(), distinct.len());
        }
    }
}
