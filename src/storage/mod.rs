//! SQLite storage layer -- pool, schema, timestamp encoding.

pub mod schema;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    tracing::info!(%path, "report history database ready");

    Ok(pool)
}

/// Open a private in-memory database.
///
/// Every SQLite `:memory:` connection is its own database, so the pool is
/// capped at one connection.
pub fn open_memory_pool() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = R2D2Pool::builder().max_size(1).build(manager)?;

    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Encode a timestamp for storage.
///
/// Fixed-width UTC text at full nanosecond precision, so `ORDER BY` and `<`
/// on the column follow chronological order exactly.
pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Decode a stored timestamp. Rows written by other tools may use any RFC3339
/// offset; they are normalized to UTC.
pub fn decode_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_encoded_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()
            + chrono::Duration::microseconds(5);

        let (a, b) = (encode_ts(&early), encode_ts(&late));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(decode_ts(&b), Some(late));
    }

    #[test]
    fn test_sub_microsecond_order_is_kept() {
        let base = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let a = base + chrono::Duration::nanoseconds(1_500);
        let b = base + chrono::Duration::nanoseconds(1_900);

        assert!(encode_ts(&a) < encode_ts(&b));
        assert_eq!(decode_ts(&encode_ts(&a)), Some(a));
    }

    #[test]
    fn test_decode_normalizes_offsets() {
        let dt = decode_ts("2024-03-01T10:00:00+02:00").unwrap();
        assert_eq!(encode_ts(&dt), "2024-03-01T08:00:00.000000000Z");
        assert!(decode_ts("yesterday").is_none());
    }

    #[test]
    fn test_file_pool_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM report_execution_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
