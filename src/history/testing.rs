//! Fixtures shared by the history tests.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;

use super::{LogId, ScheduleId, SqliteLogStore};
use crate::storage::{encode_ts, open_memory_pool};

/// `secs` seconds after a fixed epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

pub fn store_with_schedules(ids: &[ScheduleId]) -> SqliteLogStore {
    let pool = open_memory_pool().unwrap();
    {
        let conn = pool.get().unwrap();
        for id in ids {
            conn.execute(
                "INSERT INTO report_schedule (id, type, name, crontab) VALUES (?1, 'Report', ?2, '0 9 * * *')",
                params![id, format!("schedule-{id}")],
            )
            .unwrap();
        }
    }
    SqliteLogStore::new(pool)
}

/// Insert a row directly, bypassing lifecycle checks, so tests can build
/// histories the store API would refuse to produce.
pub fn insert_raw(
    store: &SqliteLogStore,
    schedule: ScheduleId,
    state: &str,
    ended: Option<i64>,
    error_message: Option<&str>,
) -> LogId {
    let conn = store.get_pool().get().unwrap();
    conn.execute(
        "INSERT INTO report_execution_log (uuid, report_schedule_id, state, scheduled_dttm, start_dttm, end_dttm, error_message)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6)",
        params![
            uuid::Uuid::new_v4().to_string(),
            schedule,
            state,
            encode_ts(&at(0)),
            ended.map(|secs| encode_ts(&at(secs))),
            error_message,
        ],
    )
    .unwrap();
    conn.last_insert_rowid()
}
