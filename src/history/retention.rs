//! Log retention: drop execution history older than each schedule allows.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use super::{HistoryEngine, LogStore, SqliteLogStore};
use crate::error::HistoryResult;
use crate::schedules::{ScheduleDefinition, ScheduleStore};
use crate::storage::Pool;

/// Purge one schedule's log according to its `log_retention_days`.
/// A retention of zero or less keeps everything, and so does one reaching
/// past the earliest representable time.
pub fn prune_schedule<S: LogStore>(
    engine: &HistoryEngine<S>,
    schedule: &ScheduleDefinition,
    now: DateTime<Utc>,
) -> HistoryResult<u64> {
    if schedule.log_retention_days <= 0 {
        return Ok(0);
    }
    let cutoff = TimeDelta::try_days(schedule.log_retention_days)
        .and_then(|window| now.checked_sub_signed(window));
    let Some(cutoff) = cutoff else {
        debug!(
            schedule_id = schedule.id,
            retention_days = schedule.log_retention_days,
            "retention window exceeds the calendar, keeping all logs"
        );
        return Ok(0);
    };
    engine.purge_logs_older_than(schedule.id, cutoff)
}

/// Apply retention to every schedule. A failure on one schedule is logged
/// and does not stop the others; the first failure is returned at the end.
pub fn prune_all(pool: &Pool, now: DateTime<Utc>) -> HistoryResult<u64> {
    let schedules = ScheduleStore::new(pool.clone()).list_all()?;
    let engine = HistoryEngine::new(SqliteLogStore::new(pool.clone()));

    let mut total = 0;
    let mut first_err = None;
    for schedule in &schedules {
        match prune_schedule(&engine, schedule, now) {
            Ok(deleted) => total += deleted,
            Err(e) => {
                warn!(schedule_id = schedule.id, error = %e, "log retention failed");
                first_err.get_or_insert(e);
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(total),
    }
}

/// Periodically apply retention until the task is dropped.
pub async fn run_retention_loop(pool: Pool, every: Duration) {
    info!(interval_secs = every.as_secs(), "retention loop started");

    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        let pool = pool.clone();
        match tokio::task::spawn_blocking(move || prune_all(&pool, Utc::now())).await {
            Ok(Ok(deleted)) => {
                if deleted > 0 {
                    info!(deleted, "retention pass complete");
                }
            }
            Ok(Err(e)) => error!("Retention pass failed: {}", e),
            Err(e) => error!("Retention task panicked: {}", e),
        }
    }
}
