//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Columns added to `report_execution_log` after its first release, with
/// their SQL types. Older databases get them through `ALTER TABLE`.
const LOG_CONTENT_COLUMNS: &[(&str, &str)] = &[
    ("report_content", "TEXT"),
    ("screenshot_path", "TEXT"),
    ("csv_path", "TEXT"),
    ("pdf_path", "TEXT"),
];

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS report_schedule (
            id INTEGER PRIMARY KEY,
            type TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            crontab TEXT NOT NULL,
            timezone TEXT NOT NULL DEFAULT 'UTC',
            active INTEGER NOT NULL DEFAULT 1,
            chart_id INTEGER,
            dashboard_id INTEGER,
            database_id INTEGER,
            created_by_fk INTEGER,
            extra_json TEXT NOT NULL DEFAULT '{}',
            log_retention INTEGER NOT NULL DEFAULT 90,
            created_on TEXT NOT NULL DEFAULT (datetime('now')),
            changed_on TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (name, type)
        );

        CREATE TABLE IF NOT EXISTS report_recipient (
            id INTEGER PRIMARY KEY,
            type TEXT NOT NULL,
            recipient_config_json TEXT NOT NULL DEFAULT '{}',
            report_schedule_id INTEGER NOT NULL,
            FOREIGN KEY (report_schedule_id) REFERENCES report_schedule(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS report_execution_log (
            id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            report_schedule_id INTEGER NOT NULL,
            state TEXT NOT NULL,
            scheduled_dttm TEXT NOT NULL,
            start_dttm TEXT,
            end_dttm TEXT,
            error_message TEXT,
            FOREIGN KEY (report_schedule_id) REFERENCES report_schedule(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_report_schedule_chart ON report_schedule(chart_id);
        CREATE INDEX IF NOT EXISTS idx_report_schedule_dashboard ON report_schedule(dashboard_id);
        CREATE INDEX IF NOT EXISTS idx_report_recipient_schedule ON report_recipient(report_schedule_id);
        CREATE INDEX IF NOT EXISTS idx_execution_log_schedule_end
            ON report_execution_log(report_schedule_id, end_dttm);",
    )?;

    // Migration: add content/artifact columns to the execution log if missing
    for (column, sql_type) in LOG_CONTENT_COLUMNS {
        let present: i32 = conn
            .query_row(
                "SELECT count(*) FROM pragma_table_info('report_execution_log') WHERE name = ?1",
                [column],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if present == 0 {
            conn.execute(
                &format!("ALTER TABLE report_execution_log ADD COLUMN {column} {sql_type}"),
                [],
            )?;
            tracing::debug!(%column, "added execution log column");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        // Verify tables exist by querying them
        for table in ["report_schedule", "report_recipient", "report_execution_log"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table} should start empty");
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_migrate_adds_content_columns_to_old_log_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE report_execution_log (
                id INTEGER PRIMARY KEY,
                uuid TEXT NOT NULL UNIQUE,
                report_schedule_id INTEGER NOT NULL,
                state TEXT NOT NULL,
                scheduled_dttm TEXT NOT NULL,
                start_dttm TEXT,
                end_dttm TEXT,
                error_message TEXT
            );",
        )
        .unwrap();

        migrate(&conn).unwrap();

        let columns: i64 = conn
            .query_row(
                "SELECT count(*) FROM pragma_table_info('report_execution_log')
                 WHERE name IN ('report_content', 'screenshot_path', 'csv_path', 'pdf_path')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(columns, 4);
    }
}
