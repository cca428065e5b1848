//! Polling window derivation.

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::error::{RelayError, Result};
use crate::schedule::Schedule;
use crate::types::Window;

/// Window ending at `now` whose length approximates the schedule's period.
///
/// `now` is truncated to whole seconds. The time until the next fire,
/// truncated to whole minutes, stands in for the gap since the previous
/// fire, which holds for evenly spaced schedules like `*/N * * * *`.
///
/// # Errors
///
/// Returns `RelayError::InvalidSchedule` if `expr` does not parse and
/// `RelayError::DegenerateWindow` when the next fire is less than a minute
/// away, which would make the window empty.
pub fn window_for_schedule(expr: &str, now: DateTime<Utc>) -> Result<Window> {
    let schedule = Schedule::parse(expr)?;
    window_for(&schedule, now)
}

/// [`window_for_schedule`] for an already parsed schedule.
pub fn window_for(schedule: &Schedule, now: DateTime<Utc>) -> Result<Window> {
    let end = truncate(now, Duration::seconds(1));
    let next = schedule.next_after(end)?;
    let elapsed = next - end;
    let whole_minutes = Duration::minutes(elapsed.num_minutes());
    if whole_minutes.is_zero() {
        return Err(RelayError::DegenerateWindow {
            expr: schedule.expr().to_string(),
            elapsed_secs: elapsed.num_seconds(),
        });
    }
    Window::new(end - whole_minutes, end)
}

/// Window of fixed length `interval` ending at `now` (truncated to seconds).
///
/// # Errors
///
/// Returns `RelayError::InvalidWindow` if `interval` is not positive.
pub fn window_for_interval(interval: Duration, now: DateTime<Utc>) -> Result<Window> {
    let end = truncate(now, Duration::seconds(1));
    Window::new(end - interval, end)
}

fn truncate(t: DateTime<Utc>, unit: Duration) -> DateTime<Utc> {
    t.duration_trunc(unit).unwrap_or(t)
}
