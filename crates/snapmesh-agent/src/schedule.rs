//! Execution instants aligned on a fixed quantum.
//!
//! Agents that receive the same backup event fire at the same wall clock
//! instant, so the instant is computed once by the sender and rounded up to
//! the next quantum boundary.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors computing an execution instant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// The quantum is zero.
    #[error("schedule quantum must be positive")]
    ZeroQuantum,
    /// The result does not fit in a timestamp.
    #[error("schedule quantum of {0:?} is out of range")]
    OutOfRange(Duration),
}

/// First quantum boundary strictly after `now`: `floor(now/quantum)*quantum + quantum`.
pub fn next_quantum(now: DateTime<Utc>, quantum: Duration) -> Result<DateTime<Utc>, ScheduleError> {
    if quantum.is_zero() {
        return Err(ScheduleError::ZeroQuantum);
    }
    let q = i64::try_from(quantum.as_micros()).map_err(|_| ScheduleError::OutOfRange(quantum))?;
    if q == 0 {
        return Err(ScheduleError::ZeroQuantum);
    }
    let next = now
        .timestamp_micros()
        .div_euclid(q)
        .checked_mul(q)
        .and_then(|floor| floor.checked_add(q))
        .ok_or(ScheduleError::OutOfRange(quantum))?;
    Utc.timestamp_opt(
        next.div_euclid(1_000_000),
        (next.rem_euclid(1_000_000) * 1_000) as u32,
    )
    .single()
    .ok_or(ScheduleError::OutOfRange(quantum))
}
