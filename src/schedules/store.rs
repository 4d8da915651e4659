//! SQLite persistence for schedules and recipients.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use super::{
    validate_crontab, NewSchedule, Recipient, RecipientType, ScheduleDefinition, ScheduleType,
    ScheduleUpdate,
};
use crate::error::{HistoryError, HistoryResult};
use crate::storage::Pool;

const SCHEDULE_COLUMNS: &str = "id, name, type, description, crontab, timezone, active, \
     chart_id, dashboard_id, database_id, created_by_fk, extra_json, log_retention";

#[derive(Clone)]
pub struct ScheduleStore {
    pool: Pool,
}

impl ScheduleStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert a schedule and its recipients in one transaction.
    pub fn create(&self, new: &NewSchedule) -> HistoryResult<ScheduleDefinition> {
        validate_crontab(&new.crontab)?;
        if !self.validate_update_uniqueness(&new.name, new.kind, None)? {
            return Err(HistoryError::invalid(format!(
                "{} named '{}' already exists",
                new.kind, new.name
            )));
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO report_schedule (
                name, type, description, crontab, timezone, active, chart_id, dashboard_id,
                database_id, created_by_fk, extra_json, log_retention
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                new.name,
                new.kind.as_str(),
                new.description,
                new.crontab,
                new.timezone,
                new.active,
                new.chart_id,
                new.dashboard_id,
                new.database_id,
                new.created_by,
                new.extra.to_string(),
                new.log_retention_days,
            ],
        )?;
        let id = tx.last_insert_rowid();
        insert_recipients(&tx, id, &new.recipients)?;
        tx.commit()?;

        info!(schedule_id = id, name = %new.name, kind = %new.kind, "report schedule created");
        load_schedule(&conn, id)?.ok_or(HistoryError::NotFound { entity: "report schedule", id })
    }

    pub fn update(&self, id: i64, changes: &ScheduleUpdate) -> HistoryResult<ScheduleDefinition> {
        let mut current = self
            .get(id)?
            .ok_or(HistoryError::NotFound { entity: "report schedule", id })?;

        if let Some(crontab) = &changes.crontab {
            validate_crontab(crontab)?;
            current.crontab = crontab.clone();
        }
        if let Some(name) = &changes.name {
            if !self.validate_update_uniqueness(name, current.kind, Some(id))? {
                return Err(HistoryError::invalid(format!(
                    "{} named '{}' already exists",
                    current.kind, name
                )));
            }
            current.name = name.clone();
        }
        if let Some(description) = &changes.description {
            current.description = Some(description.clone());
        }
        if let Some(active) = changes.active {
            current.active = active;
        }
        if let Some(extra) = &changes.extra {
            current.extra = extra.clone();
        }
        if let Some(days) = changes.log_retention_days {
            current.log_retention_days = days;
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE report_schedule
             SET name = ?1, description = ?2, crontab = ?3, active = ?4, extra_json = ?5,
                 log_retention = ?6, changed_on = datetime('now')
             WHERE id = ?7",
            params![
                current.name,
                current.description,
                current.crontab,
                current.active,
                current.extra.to_string(),
                current.log_retention_days,
                id,
            ],
        )?;
        if let Some(recipients) = &changes.recipients {
            tx.execute(
                "DELETE FROM report_recipient WHERE report_schedule_id = ?1",
                params![id],
            )?;
            insert_recipients(&tx, id, recipients)?;
        }
        tx.commit()?;

        load_schedule(&conn, id)?.ok_or(HistoryError::NotFound { entity: "report schedule", id })
    }

    pub fn get(&self, id: i64) -> HistoryResult<Option<ScheduleDefinition>> {
        let conn = self.pool.get()?;
        load_schedule(&conn, id)
    }

    /// Delete a schedule; its recipients and execution logs go with it.
    pub fn delete(&self, id: i64) -> HistoryResult<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute("DELETE FROM report_schedule WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(HistoryError::NotFound { entity: "report schedule", id });
        }
        info!(schedule_id = id, "report schedule deleted");
        Ok(())
    }

    pub fn list_all(&self) -> HistoryResult<Vec<ScheduleDefinition>> {
        self.select_where("1 = 1", Vec::new())
    }

    pub fn find_active(&self) -> HistoryResult<Vec<ScheduleDefinition>> {
        self.select_where("active = 1", Vec::new())
    }

    pub fn find_by_chart_id(&self, chart_id: i64) -> HistoryResult<Vec<ScheduleDefinition>> {
        self.find_by_chart_ids(&[chart_id])
    }

    pub fn find_by_chart_ids(&self, chart_ids: &[i64]) -> HistoryResult<Vec<ScheduleDefinition>> {
        self.select_in("chart_id", chart_ids)
    }

    pub fn find_by_dashboard_id(&self, dashboard_id: i64) -> HistoryResult<Vec<ScheduleDefinition>> {
        self.find_by_dashboard_ids(&[dashboard_id])
    }

    pub fn find_by_dashboard_ids(
        &self,
        dashboard_ids: &[i64],
    ) -> HistoryResult<Vec<ScheduleDefinition>> {
        self.select_in("dashboard_id", dashboard_ids)
    }

    pub fn find_by_database_id(&self, database_id: i64) -> HistoryResult<Vec<ScheduleDefinition>> {
        self.find_by_database_ids(&[database_id])
    }

    pub fn find_by_database_ids(
        &self,
        database_ids: &[i64],
    ) -> HistoryResult<Vec<ScheduleDefinition>> {
        self.select_in("database_id", database_ids)
    }

    /// Schedules whose extra metadata mentions `slug` anywhere.
    pub fn find_by_extra_metadata(&self, slug: &str) -> HistoryResult<Vec<ScheduleDefinition>> {
        self.select_where(
            "instr(extra_json, ?) > 0",
            vec![Value::Text(slug.to_string())],
        )
    }

    /// True if no other schedule uses this name and type. `expect_id` is the
    /// schedule allowed to hold the pair already (the one being updated).
    pub fn validate_update_uniqueness(
        &self,
        name: &str,
        kind: ScheduleType,
        expect_id: Option<i64>,
    ) -> HistoryResult<bool> {
        let conn = self.pool.get()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM report_schedule WHERE name = ?1 AND type = ?2 LIMIT 1",
                params![name, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_none() || found == expect_id)
    }

    /// True if `user_id` has no schedule of their own on this dashboard/chart yet.
    pub fn validate_unique_creation_method(
        &self,
        user_id: Option<i64>,
        dashboard_id: Option<i64>,
        chart_id: Option<i64>,
    ) -> HistoryResult<bool> {
        let mut sql = "SELECT EXISTS(SELECT 1 FROM report_schedule WHERE created_by_fk IS ?".to_string();
        let mut args = vec![user_id.map_or(Value::Null, Value::Integer)];
        if let Some(dashboard_id) = dashboard_id {
            sql.push_str(" AND dashboard_id = ?");
            args.push(Value::Integer(dashboard_id));
        }
        if let Some(chart_id) = chart_id {
            sql.push_str(" AND chart_id = ?");
            args.push(Value::Integer(chart_id));
        }
        sql.push(')');

        let conn = self.pool.get()?;
        let exists: bool = conn.query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;
        Ok(!exists)
    }

    fn select_in(&self, column: &str, ids: &[i64]) -> HistoryResult<Vec<ScheduleDefinition>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        self.select_where(
            &format!("{column} IN ({placeholders})"),
            ids.iter().copied().map(Value::Integer).collect(),
        )
    }

    fn select_where(
        &self,
        condition: &str,
        args: Vec<Value>,
    ) -> HistoryResult<Vec<ScheduleDefinition>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM report_schedule WHERE {condition} ORDER BY id"
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), schedule_from_row)?;

        let mut schedules = Vec::new();
        for r in rows {
            let mut schedule = r?;
            schedule.recipients = load_recipients(&conn, schedule.id)?;
            schedules.push(schedule);
        }
        Ok(schedules)
    }
}

fn insert_recipients(conn: &Connection, schedule_id: i64, recipients: &[Recipient]) -> HistoryResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO report_recipient (type, recipient_config_json, report_schedule_id)
         VALUES (?1, ?2, ?3)",
    )?;
    for recipient in recipients {
        stmt.execute(params![
            recipient.kind.as_str(),
            recipient.config.to_string(),
            schedule_id
        ])?;
    }
    Ok(())
}

fn load_schedule(conn: &Connection, id: i64) -> HistoryResult<Option<ScheduleDefinition>> {
    let schedule = conn
        .query_row(
            &format!("SELECT {SCHEDULE_COLUMNS} FROM report_schedule WHERE id = ?1"),
            params![id],
            schedule_from_row,
        )
        .optional()?;

    match schedule {
        Some(mut schedule) => {
            schedule.recipients = load_recipients(conn, id)?;
            Ok(Some(schedule))
        }
        None => Ok(None),
    }
}

fn load_recipients(conn: &Connection, schedule_id: i64) -> HistoryResult<Vec<Recipient>> {
    let mut stmt = conn.prepare(
        "SELECT id, type, recipient_config_json FROM report_recipient
         WHERE report_schedule_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![schedule_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut recipients = Vec::new();
    for r in rows {
        let (id, kind, config) = r?;
        let kind: RecipientType = match kind.parse() {
            Ok(kind) => kind,
            Err(_) => {
                warn!(recipient_id = id, %kind, "skipping recipient of unknown type");
                continue;
            }
        };
        recipients.push(Recipient {
            id: Some(id),
            kind,
            config: decode_json(&config, "recipient_config_json", id),
        });
    }
    Ok(recipients)
}

/// Stored JSON columns decode to `null` when malformed.
fn decode_json(raw: &str, column: &'static str, id: i64) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(id, column, error = %e, "stored JSON is malformed, using null");
        serde_json::Value::Null
    })
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleDefinition> {
    let kind: String = row.get(2)?;
    let kind = kind.parse::<ScheduleType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let extra: String = row.get(11)?;

    Ok(ScheduleDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        kind,
        description: row.get(3)?,
        crontab: row.get(4)?,
        timezone: row.get(5)?,
        active: row.get(6)?,
        chart_id: row.get(7)?,
        dashboard_id: row.get(8)?,
        database_id: row.get(9)?,
        created_by: row.get(10)?,
        extra: decode_json(&extra, "extra_json", row.get(0)?),
        log_retention_days: row.get(12)?,
        recipients: Vec::new(),
    })
}
