//! Storage interface consumed by the history engine.

use chrono::{DateTime, Utc};

use super::{ExecutionLogEntry, ExecutionOutcome, ExecutionState, LogId, ScheduleId};
use crate::error::HistoryResult;

/// Filter on `error_message`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageFilter {
    #[default]
    Any,
    /// `error_message IS NULL`
    Absent,
    Equals(String),
}

/// Filters for a "latest matching entry" lookup within one schedule.
///
/// All conditions are ANDed. An entry without `ended_at` never satisfies
/// `ended_before`.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub states: Vec<ExecutionState>,
    pub excluded_states: Vec<ExecutionState>,
    pub error_message: MessageFilter,
    pub ended_before: Option<DateTime<Utc>>,
    pub finished_only: bool,
}

impl LogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: ExecutionState) -> Self {
        self.states.push(state);
        self
    }

    pub fn without_states(mut self, states: &[ExecutionState]) -> Self {
        self.excluded_states.extend_from_slice(states);
        self
    }

    pub fn message(mut self, filter: MessageFilter) -> Self {
        self.error_message = filter;
        self
    }

    pub fn ended_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.ended_before = Some(cutoff);
        self
    }

    pub fn finished_only(mut self) -> Self {
        self.finished_only = true;
        self
    }
}

/// Read/write access to the execution log.
///
/// "Most recent" everywhere means: entries still running (no `ended_at`)
/// first, then `ended_at` descending, ties broken by `id` descending.
pub trait LogStore {
    fn schedule_exists(&self, schedule: ScheduleId) -> HistoryResult<bool>;

    /// Most recent entry of `schedule` matching `query`.
    fn latest(
        &self,
        schedule: ScheduleId,
        query: &LogQuery,
    ) -> HistoryResult<Option<ExecutionLogEntry>>;

    fn count(&self, schedule: ScheduleId) -> HistoryResult<u64>;

    /// Entries of `schedule`, most recent first.
    fn page(
        &self,
        schedule: ScheduleId,
        offset: u64,
        limit: u64,
    ) -> HistoryResult<Vec<ExecutionLogEntry>>;

    fn get(&self, log_id: LogId) -> HistoryResult<Option<ExecutionLogEntry>>;

    /// Delete entries of `schedule` with `ended_at < cutoff` in one statement.
    fn delete_ended_before(&self, schedule: ScheduleId, cutoff: DateTime<Utc>)
        -> HistoryResult<u64>;

    /// Append a WORKING entry for an attempt that just started.
    fn insert_working(
        &self,
        schedule: ScheduleId,
        scheduled_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> HistoryResult<ExecutionLogEntry>;

    /// Append an entry that is already concluded.
    fn insert_finished(
        &self,
        schedule: ScheduleId,
        outcome: &ExecutionOutcome,
        at: DateTime<Utc>,
    ) -> HistoryResult<ExecutionLogEntry>;

    /// Conclude a WORKING entry.
    fn complete(
        &self,
        log_id: LogId,
        outcome: &ExecutionOutcome,
        ended_at: DateTime<Utc>,
    ) -> HistoryResult<ExecutionLogEntry>;
}
