//! Read models handed to whatever front end exposes the execution history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use super::{ExecutionLogEntry, ExecutionState, HistoryEngine, LogId, LogStore, ScheduleId};
use crate::artifacts::{suggested_filename, ArtifactKind, ArtifactStore};
use crate::error::{HistoryError, HistoryResult};

/// Stand-in for stored report content that is not valid JSON.
pub const UNDECODABLE_CONTENT: &str = "unable to decode report content";

/// One row of a log listing.
#[derive(Debug, Clone, Serialize)]
pub struct LogSummary {
    pub id: LogId,
    pub scheduled_dttm: String,
    pub start_dttm: Option<String>,
    pub end_dttm: Option<String>,
    pub state: ExecutionState,
    pub error_message: Option<String>,
    pub has_content: bool,
}

impl From<&ExecutionLogEntry> for LogSummary {
    fn from(entry: &ExecutionLogEntry) -> Self {
        Self {
            id: entry.id,
            scheduled_dttm: entry.scheduled_at.to_rfc3339(),
            start_dttm: fmt_opt(entry.started_at),
            end_dttm: fmt_opt(entry.ended_at),
            state: entry.state.clone(),
            error_message: entry.error_message.clone(),
            has_content: entry.has_content(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub logs: Vec<LogSummary>,
    pub count: u64,
}

/// Everything recorded for one execution, with its content decoded.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContent {
    pub id: LogId,
    pub uuid: String,
    pub scheduled_dttm: String,
    pub start_dttm: Option<String>,
    pub end_dttm: Option<String>,
    pub state: ExecutionState,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
    pub available_artifacts: Vec<ArtifactKind>,
}

impl ExecutionContent {
    pub fn has_artifact(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Screenshot => self.screenshot_path.is_some(),
            ArtifactKind::Csv => self.csv_path.is_some(),
            ArtifactKind::Pdf => self.pdf_path.is_some(),
        }
    }
}

/// Raw artifact bytes ready to hand out.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    pub kind: ArtifactKind,
    pub content_type: &'static str,
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl<S: LogStore> HistoryEngine<S> {
    /// Paginated listing of `schedule`'s log with a content flag per entry.
    pub fn list_log_summaries(
        &self,
        schedule: ScheduleId,
        page: i64,
        page_size: i64,
    ) -> HistoryResult<LogPage> {
        let (logs, count) = self.list_logs(schedule, page, page_size)?;
        Ok(LogPage {
            logs: logs.iter().map(LogSummary::from).collect(),
            count,
        })
    }

    /// Decoded content of one log entry, `None` if the entry does not exist.
    pub fn get_content(&self, log_id: LogId) -> HistoryResult<Option<ExecutionContent>> {
        let Some(entry) = self.get_log(log_id)? else {
            return Ok(None);
        };

        let content = entry.report_content.as_deref().map(|raw| {
            serde_json::from_str::<Value>(raw).unwrap_or_else(|e| {
                warn!(log_id, error = %e, "stored report content is not valid JSON");
                json!({ "error": UNDECODABLE_CONTENT })
            })
        });

        let available_artifacts = entry.recorded_artifacts();
        Ok(Some(ExecutionContent {
            id: entry.id,
            uuid: entry.uuid.to_string(),
            scheduled_dttm: entry.scheduled_at.to_rfc3339(),
            start_dttm: fmt_opt(entry.started_at),
            end_dttm: fmt_opt(entry.ended_at),
            state: entry.state,
            error_message: entry.error_message,
            content,
            screenshot_path: entry.screenshot_path,
            csv_path: entry.csv_path,
            pdf_path: entry.pdf_path,
            available_artifacts,
        }))
    }

    /// Bytes of one artifact of a log entry.
    ///
    /// `file_type` is the caller's raw type parameter; it is checked before
    /// anything is looked up.
    pub fn fetch_artifact(
        &self,
        artifacts: &dyn ArtifactStore,
        log_id: LogId,
        file_type: Option<&str>,
    ) -> HistoryResult<ArtifactFile> {
        let kind: ArtifactKind = file_type
            .ok_or_else(|| HistoryError::invalid("file type is required"))?
            .parse()?;

        let entry = self.get_log(log_id)?.ok_or(HistoryError::NotFound {
            entity: "execution log",
            id: log_id,
        })?;
        let missing = HistoryError::ArtifactMissing {
            log_id,
            kind: kind.as_str(),
        };

        let Some(path) = entry.artifact_path(kind) else {
            return Err(missing);
        };
        if !artifacts.exists(path) {
            warn!(log_id, %kind, %path, "artifact path recorded but file is absent");
            return Err(missing);
        }

        let bytes = match artifacts.read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(missing),
            Err(e) => return Err(e.into()),
        };

        Ok(ArtifactFile {
            kind,
            content_type: kind.content_type(),
            filename: suggested_filename(path, kind, log_id),
            bytes,
        })
    }
}

fn fmt_opt(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::FsArtifactStore;
    use crate::history::testing::{at, insert_raw, store_with_schedules};
    use crate::history::{ExecutionOutcome, SqliteLogStore};

    fn engine() -> HistoryEngine<SqliteLogStore> {
        HistoryEngine::new(store_with_schedules(&[1]))
    }

    #[test]
    fn test_summaries_flag_content() {
        let engine = engine();
        let bare = insert_raw(engine.store(), 1, "Error", Some(10), Some("timeout"));
        let started = engine.record_start(1, at(20), at(20)).unwrap();
        engine
            .record_outcome(
                started.id,
                &ExecutionOutcome::success().with_artifact(ArtifactKind::Pdf, "/tmp/r.pdf"),
                at(21),
            )
            .unwrap();

        let page = engine.list_log_summaries(1, 0, 10).unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.logs[0].id, started.id);
        assert!(page.logs[0].has_content);
        assert_eq!(page.logs[1].id, bare);
        assert!(!page.logs[1].has_content);
        assert_eq!(page.logs[1].error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_content_is_decoded() {
        let engine = engine();
        let started = engine.record_start(1, at(0), at(1)).unwrap();
        let outcome = ExecutionOutcome::success()
            .with_content(&json!({"total": 42}))
            .with_artifact(ArtifactKind::Csv, "/reports/q1.csv");
        engine.record_outcome(started.id, &outcome, at(2)).unwrap();

        let content = engine.get_content(started.id).unwrap().unwrap();
        assert_eq!(content.content, Some(json!({"total": 42})));
        assert_eq!(content.state, ExecutionState::Success);
        assert!(content.has_artifact(ArtifactKind::Csv));
        assert!(!content.has_artifact(ArtifactKind::Screenshot));
        assert_eq!(content.available_artifacts, vec![ArtifactKind::Csv]);

        let body = serde_json::to_value(&content).unwrap();
        assert_eq!(body["csv_path"], "/reports/q1.csv");
        assert_eq!(body["available_artifacts"], json!(["csv"]));
        assert!(body.get("pdf_path").is_none());
        assert_eq!(body["state"], "Success");
    }

    #[test]
    fn test_malformed_content_yields_placeholder() {
        let engine = engine();
        let started = engine.record_start(1, at(0), at(1)).unwrap();
        let outcome = ExecutionOutcome::success().with_raw_content("{not json");
        engine.record_outcome(started.id, &outcome, at(2)).unwrap();

        let content = engine.get_content(started.id).unwrap().unwrap();
        assert_eq!(content.content, Some(json!({ "error": UNDECODABLE_CONTENT })));
    }

    #[test]
    fn test_missing_log_has_no_content() {
        assert!(engine().get_content(404).unwrap().is_none());
    }

    #[test]
    fn test_fetch_artifact_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("weekly.png"), [0x89, b'P', b'N', b'G']).unwrap();
        let artifacts = FsArtifactStore::new(Some(dir.path().to_path_buf()));

        let engine = engine();
        let started = engine.record_start(1, at(0), at(0)).unwrap();
        let outcome =
            ExecutionOutcome::success().with_artifact(ArtifactKind::Screenshot, "weekly.png");
        engine.record_outcome(started.id, &outcome, at(1)).unwrap();

        let file = engine
            .fetch_artifact(&artifacts, started.id, Some("screenshot"))
            .unwrap();
        assert_eq!(file.content_type, "image/png");
        assert_eq!(file.filename, "weekly.png");
        assert_eq!(file.bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_fetch_artifact_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let artifacts = FsArtifactStore::new(Some(dir.path().to_path_buf()));

        let engine = engine();
        let started = engine.record_start(1, at(0), at(0)).unwrap();
        let outcome = ExecutionOutcome::success().with_artifact(ArtifactKind::Pdf, "gone.pdf");
        engine.record_outcome(started.id, &outcome, at(1)).unwrap();

        // type is validated before the log is looked up
        assert!(matches!(
            engine.fetch_artifact(&artifacts, 999, None),
            Err(HistoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.fetch_artifact(&artifacts, 999, Some("docx")),
            Err(HistoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.fetch_artifact(&artifacts, 999, Some("pdf")),
            Err(HistoryError::NotFound { .. })
        ));
        assert!(matches!(
            engine.fetch_artifact(&artifacts, started.id, Some("csv")),
            Err(HistoryError::ArtifactMissing { kind: "csv", .. })
        ));
        let absent = engine
            .fetch_artifact(&artifacts, started.id, Some("pdf"))
            .unwrap_err();
        assert_eq!(absent.status_hint(), 404);
    }
}
