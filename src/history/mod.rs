//! Execution history for scheduled reports.
//!
//! Every attempt to run a schedule leaves one [`ExecutionLogEntry`]. The
//! [`engine::HistoryEngine`] answers questions about that log (last success,
//! last in-flight run, whether an error notification should be withheld) on
//! top of any [`store::LogStore`].

pub mod engine;
pub mod retention;
pub mod sqlite;
pub mod store;
pub mod views;

#[cfg(test)]
mod testing;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::artifacts::ArtifactKind;

pub use self::engine::HistoryEngine;
pub use self::sqlite::SqliteLogStore;
pub use self::store::{LogQuery, LogStore, MessageFilter};

pub type ScheduleId = i64;
pub type LogId = i64;

/// `error_message` value recording that an error notification went out,
/// as opposed to describing a failure.
pub const ERROR_NOTIFICATION_MARKER: &str = "Notification sent with error";

/// State of one execution attempt, stored as its display text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    Working,
    Success,
    Error,
    /// Alert evaluated and nothing had to be sent.
    Noop,
    /// Inside the grace period after a previous alert.
    Grace,
    /// Written by something newer than this crate. Treated as terminal,
    /// neither success nor error.
    Other(String),
}

impl ExecutionState {
    pub fn as_str(&self) -> &str {
        match self {
            ExecutionState::Working => "Working",
            ExecutionState::Success => "Success",
            ExecutionState::Error => "Error",
            ExecutionState::Noop => "Not triggered",
            ExecutionState::Grace => "On Grace",
            ExecutionState::Other(raw) => raw,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "Working" => ExecutionState::Working,
            "Success" => ExecutionState::Success,
            "Error" => ExecutionState::Error,
            "Not triggered" => ExecutionState::Noop,
            "On Grace" => ExecutionState::Grace,
            other => ExecutionState::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Working)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ExecutionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One execution attempt of a schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLogEntry {
    pub id: LogId,
    pub uuid: Uuid,
    pub schedule_id: ScheduleId,
    pub state: ExecutionState,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// `None` while the attempt is still running.
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Serialized JSON produced by the run, if any.
    pub report_content: Option<String>,
    pub screenshot_path: Option<String>,
    pub csv_path: Option<String>,
    pub pdf_path: Option<String>,
}

impl ExecutionLogEntry {
    pub fn artifact_path(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Screenshot => self.screenshot_path.as_deref(),
            ArtifactKind::Csv => self.csv_path.as_deref(),
            ArtifactKind::Pdf => self.pdf_path.as_deref(),
        }
    }

    /// Artifact kinds with a recorded path, in a stable order.
    pub fn recorded_artifacts(&self) -> Vec<ArtifactKind> {
        ArtifactKind::ALL
            .into_iter()
            .filter(|kind| self.artifact_path(*kind).is_some())
            .collect()
    }

    /// True if the run stored content or produced any artifact.
    pub fn has_content(&self) -> bool {
        self.report_content.is_some() || !self.recorded_artifacts().is_empty()
    }

    pub fn is_error_notification(&self) -> bool {
        self.error_message.as_deref() == Some(ERROR_NOTIFICATION_MARKER)
    }
}

/// What an attempt concluded with. Applied once to a WORKING entry.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub state: ExecutionState,
    pub error_message: Option<String>,
    pub report_content: Option<String>,
    pub screenshot_path: Option<String>,
    pub csv_path: Option<String>,
    pub pdf_path: Option<String>,
}

impl ExecutionOutcome {
    pub fn new(state: ExecutionState) -> Self {
        Self {
            state,
            error_message: None,
            report_content: None,
            screenshot_path: None,
            csv_path: None,
            pdf_path: None,
        }
    }

    pub fn success() -> Self {
        Self::new(ExecutionState::Success)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(ExecutionState::Error)
        }
    }

    /// Store computed values as JSON text.
    pub fn with_content(mut self, content: &serde_json::Value) -> Self {
        self.report_content = Some(content.to_string());
        self
    }

    /// Store content verbatim, without checking that it is valid JSON.
    pub fn with_raw_content(mut self, raw: impl Into<String>) -> Self {
        self.report_content = Some(raw.into());
        self
    }

    pub fn with_artifact(mut self, kind: ArtifactKind, path: impl Into<String>) -> Self {
        let path = Some(path.into());
        match kind {
            ArtifactKind::Screenshot => self.screenshot_path = path,
            ArtifactKind::Csv => self.csv_path = path,
            ArtifactKind::Pdf => self.pdf_path = path,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_text_roundtrip() {
        for state in [
            ExecutionState::Working,
            ExecutionState::Success,
            ExecutionState::Error,
            ExecutionState::Noop,
            ExecutionState::Grace,
        ] {
            assert_eq!(ExecutionState::parse(state.as_str()), state);
        }
        assert_eq!(
            ExecutionState::parse("Paused"),
            ExecutionState::Other("Paused".to_string())
        );
        assert!(ExecutionState::parse("Paused").is_terminal());
        assert!(!ExecutionState::Working.is_terminal());
    }

    #[test]
    fn test_outcome_builder_sets_artifacts() {
        let outcome = ExecutionOutcome::success()
            .with_content(&serde_json::json!({"rows": 3}))
            .with_artifact(ArtifactKind::Csv, "/var/reports/7.csv");

        assert_eq!(outcome.report_content.as_deref(), Some(r#"{"rows":3}"#));
        assert_eq!(outcome.csv_path.as_deref(), Some("/var/reports/7.csv"));
        assert!(outcome.pdf_path.is_none());
    }
}
