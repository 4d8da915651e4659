//! SQLite-backed [`LogStore`].

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::store::{LogQuery, LogStore, MessageFilter};
use super::{ExecutionLogEntry, ExecutionOutcome, ExecutionState, LogId, ScheduleId};
use crate::error::{HistoryError, HistoryResult};
use crate::storage::{encode_ts, Pool};

const LOG_COLUMNS: &str = "id, uuid, report_schedule_id, state, scheduled_dttm, start_dttm, \
     end_dttm, error_message, report_content, screenshot_path, csv_path, pdf_path";

// Running entries sort ahead of finished ones; SQLite would otherwise put
// NULLs last in a descending order.
const MOST_RECENT_FIRST: &str = "ORDER BY end_dttm IS NULL DESC, end_dttm DESC, id DESC";

/// Execution log stored in the `report_execution_log` table.
#[derive(Clone)]
pub struct SqliteLogStore {
    pool: Pool,
}

impl SqliteLogStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn get_pool(&self) -> &Pool {
        &self.pool
    }
}

impl LogStore for SqliteLogStore {
    fn schedule_exists(&self, schedule: ScheduleId) -> HistoryResult<bool> {
        let conn = self.pool.get()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM report_schedule WHERE id = ?1)",
            params![schedule],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn latest(
        &self,
        schedule: ScheduleId,
        query: &LogQuery,
    ) -> HistoryResult<Option<ExecutionLogEntry>> {
        let mut sql =
            format!("SELECT {LOG_COLUMNS} FROM report_execution_log WHERE report_schedule_id = ?");
        let mut args = vec![Value::Integer(schedule)];

        if !query.states.is_empty() {
            sql.push_str(&format!(" AND state IN ({})", placeholders(query.states.len())));
            args.extend(query.states.iter().map(state_value));
        }
        if !query.excluded_states.is_empty() {
            sql.push_str(&format!(
                " AND state NOT IN ({})",
                placeholders(query.excluded_states.len())
            ));
            args.extend(query.excluded_states.iter().map(state_value));
        }
        match &query.error_message {
            MessageFilter::Any => {}
            MessageFilter::Absent => sql.push_str(" AND error_message IS NULL"),
            MessageFilter::Equals(message) => {
                sql.push_str(" AND error_message = ?");
                args.push(Value::Text(message.clone()));
            }
        }
        if let Some(cutoff) = &query.ended_before {
            sql.push_str(" AND end_dttm < ?");
            args.push(Value::Text(encode_ts(cutoff)));
        }
        if query.finished_only {
            sql.push_str(" AND end_dttm IS NOT NULL");
        }
        sql.push(' ');
        sql.push_str(MOST_RECENT_FIRST);
        sql.push_str(" LIMIT 1");

        tracing::debug!(schedule_id = schedule, %sql, "latest execution log lookup");

        let conn = self.pool.get()?;
        let entry = conn
            .query_row(&sql, params_from_iter(args.iter()), entry_from_row)
            .optional()?;
        Ok(entry)
    }

    fn count(&self, schedule: ScheduleId) -> HistoryResult<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM report_execution_log WHERE report_schedule_id = ?1",
            params![schedule],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn page(
        &self,
        schedule: ScheduleId,
        offset: u64,
        limit: u64,
    ) -> HistoryResult<Vec<ExecutionLogEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM report_execution_log
             WHERE report_schedule_id = ?1 {MOST_RECENT_FIRST} LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![schedule, clamp_i64(limit), clamp_i64(offset)],
            entry_from_row,
        )?;

        let mut entries = Vec::new();
        for r in rows {
            entries.push(r?);
        }
        Ok(entries)
    }

    fn get(&self, log_id: LogId) -> HistoryResult<Option<ExecutionLogEntry>> {
        let conn = self.pool.get()?;
        select_entry(&conn, log_id)
    }

    fn delete_ended_before(
        &self,
        schedule: ScheduleId,
        cutoff: DateTime<Utc>,
    ) -> HistoryResult<u64> {
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM report_execution_log WHERE report_schedule_id = ?1 AND end_dttm < ?2",
            params![schedule, encode_ts(&cutoff)],
        )?;
        Ok(deleted as u64)
    }

    fn insert_working(
        &self,
        schedule: ScheduleId,
        scheduled_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> HistoryResult<ExecutionLogEntry> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO report_execution_log (uuid, report_schedule_id, state, scheduled_dttm, start_dttm)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                schedule,
                ExecutionState::Working.as_str(),
                encode_ts(&scheduled_at),
                encode_ts(&started_at),
            ],
        )?;

        let id = conn.last_insert_rowid();
        select_entry(&conn, id)?.ok_or(HistoryError::NotFound { entity: "execution log", id })
    }

    fn insert_finished(
        &self,
        schedule: ScheduleId,
        outcome: &ExecutionOutcome,
        at: DateTime<Utc>,
    ) -> HistoryResult<ExecutionLogEntry> {
        if !outcome.state.is_terminal() {
            return Err(HistoryError::invalid(
                "a finished execution log needs a terminal state",
            ));
        }

        let ts = encode_ts(&at);
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO report_execution_log (
                uuid, report_schedule_id, state, scheduled_dttm, start_dttm, end_dttm,
                error_message, report_content, screenshot_path, csv_path, pdf_path
            ) VALUES (?1, ?2, ?3, ?4, ?4, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                Uuid::new_v4().to_string(),
                schedule,
                outcome.state.as_str(),
                ts,
                outcome.error_message,
                outcome.report_content,
                outcome.screenshot_path,
                outcome.csv_path,
                outcome.pdf_path,
            ],
        )?;

        let id = conn.last_insert_rowid();
        select_entry(&conn, id)?.ok_or(HistoryError::NotFound { entity: "execution log", id })
    }

    fn complete(
        &self,
        log_id: LogId,
        outcome: &ExecutionOutcome,
        ended_at: DateTime<Utc>,
    ) -> HistoryResult<ExecutionLogEntry> {
        if !outcome.state.is_terminal() {
            return Err(HistoryError::invalid(format!(
                "execution log {log_id} cannot be concluded as {}",
                outcome.state
            )));
        }

        let conn = self.pool.get()?;
        let current = select_entry(&conn, log_id)?.ok_or(HistoryError::NotFound {
            entity: "execution log",
            id: log_id,
        })?;
        if current.state.is_terminal() {
            return Err(HistoryError::invalid(format!(
                "execution log {log_id} already concluded as {}",
                current.state
            )));
        }

        conn.execute(
            "UPDATE report_execution_log
             SET state = ?1, end_dttm = ?2, error_message = ?3, report_content = ?4,
                 screenshot_path = ?5, csv_path = ?6, pdf_path = ?7
             WHERE id = ?8",
            params![
                outcome.state.as_str(),
                encode_ts(&ended_at),
                outcome.error_message,
                outcome.report_content,
                outcome.screenshot_path,
                outcome.csv_path,
                outcome.pdf_path,
                log_id,
            ],
        )?;

        select_entry(&conn, log_id)?.ok_or(HistoryError::NotFound {
            entity: "execution log",
            id: log_id,
        })
    }
}

fn select_entry(conn: &Connection, log_id: LogId) -> HistoryResult<Option<ExecutionLogEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {LOG_COLUMNS} FROM report_execution_log WHERE id = ?1"),
            params![log_id],
            entry_from_row,
        )
        .optional()?;
    Ok(entry)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionLogEntry> {
    let uuid: String = row.get(1)?;
    let uuid = Uuid::parse_str(&uuid)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let state: String = row.get(3)?;

    Ok(ExecutionLogEntry {
        id: row.get(0)?,
        uuid,
        schedule_id: row.get(2)?,
        state: ExecutionState::parse(&state),
        scheduled_at: optional_ts(row, 4)?.ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(4, "scheduled_dttm".to_string(), Type::Null)
        })?,
        started_at: optional_ts(row, 5)?,
        ended_at: optional_ts(row, 6)?,
        error_message: row.get(7)?,
        report_content: row.get(8)?,
        screenshot_path: row.get(9)?,
        csv_path: row.get(10)?,
        pdf_path: row.get(11)?,
    })
}

fn optional_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn state_value(state: &ExecutionState) -> Value {
    Value::Text(state.as_str().to_string())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
