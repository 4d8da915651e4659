//! Execution History Query Engine.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::store::{LogQuery, LogStore, MessageFilter};
use super::{
    ExecutionLogEntry, ExecutionOutcome, ExecutionState, LogId, ScheduleId,
    ERROR_NOTIFICATION_MARKER,
};
use crate::error::{HistoryError, HistoryResult};

/// Largest page a caller may request unless configured otherwise.
pub const DEFAULT_MAX_PAGE_SIZE: i64 = 1000;

/// Queries and lifecycle writes over the execution log of report schedules.
///
/// The engine owns no state besides its store; every call is a single
/// read or write against it.
pub struct HistoryEngine<S: LogStore> {
    store: S,
    max_page_size: i64,
}

impl<S: LogStore> HistoryEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    pub fn with_max_page_size(mut self, max_page_size: i64) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Most recent successful run of `schedule`.
    pub fn find_last_success(&self, schedule: ScheduleId) -> HistoryResult<Option<ExecutionLogEntry>> {
        self.require_schedule(schedule)?;
        self.store
            .latest(schedule, &LogQuery::new().with_state(ExecutionState::Success))
    }

    /// Most recent WORKING entry that carries no error message.
    ///
    /// A WORKING row that already has `ended_at` is still returned, so callers
    /// can spot attempts that never reported back.
    pub fn find_last_active_working(
        &self,
        schedule: ScheduleId,
    ) -> HistoryResult<Option<ExecutionLogEntry>> {
        self.require_schedule(schedule)?;
        let query = LogQuery::new()
            .with_state(ExecutionState::Working)
            .message(MessageFilter::Absent);
        self.store.latest(schedule, &query)
    }

    /// The last error notification sent for `schedule`, if it still applies.
    ///
    /// It applies when no entry that is neither ERROR nor WORKING ended
    /// before it. Note the comparison runs against entries that ended
    /// *before* the notification, not after it.
    pub fn find_last_error_notification(
        &self,
        schedule: ScheduleId,
    ) -> HistoryResult<Option<ExecutionLogEntry>> {
        self.require_schedule(schedule)?;
        let notified = LogQuery::new()
            .message(MessageFilter::Equals(ERROR_NOTIFICATION_MARKER.to_string()))
            .finished_only();
        let Some(notification) = self.store.latest(schedule, &notified)? else {
            return Ok(None);
        };
        let Some(notified_at) = notification.ended_at else {
            return Ok(None);
        };

        let recovered = LogQuery::new()
            .without_states(&[ExecutionState::Error, ExecutionState::Working])
            .ended_before(notified_at);
        match self.store.latest(schedule, &recovered)? {
            Some(other) => {
                debug!(
                    schedule_id = schedule,
                    notification_id = notification.id,
                    log_id = other.id,
                    state = %other.state,
                    "non-error run precedes last error notification"
                );
                Ok(None)
            }
            None => Ok(Some(notification)),
        }
    }

    /// Whether a new error notification for `schedule` should be withheld.
    pub fn should_suppress_error_notification(&self, schedule: ScheduleId) -> HistoryResult<bool> {
        Ok(self.find_last_error_notification(schedule)?.is_some())
    }

    /// One page of `schedule`'s log, most recent first, with the total count.
    ///
    /// `page` is zero-based. Negative pages, non-positive sizes and sizes above
    /// the configured maximum are rejected.
    pub fn list_logs(
        &self,
        schedule: ScheduleId,
        page: i64,
        page_size: i64,
    ) -> HistoryResult<(Vec<ExecutionLogEntry>, u64)> {
        if page < 0 {
            return Err(HistoryError::invalid(format!("page must be >= 0, got {page}")));
        }
        if page_size <= 0 || page_size > self.max_page_size {
            return Err(HistoryError::invalid(format!(
                "page_size must be between 1 and {}, got {page_size}",
                self.max_page_size
            )));
        }
        let offset = page
            .checked_mul(page_size)
            .ok_or_else(|| HistoryError::invalid("page is out of range"))?;

        self.require_schedule(schedule)?;
        let total = self.store.count(schedule)?;
        let logs = self.store.page(schedule, offset as u64, page_size as u64)?;
        Ok((logs, total))
    }

    pub fn get_log(&self, log_id: LogId) -> HistoryResult<Option<ExecutionLogEntry>> {
        self.store.get(log_id)
    }

    /// Delete `schedule`'s entries that ended before `cutoff`.
    ///
    /// Entries still running are kept. Running it again with the same cutoff
    /// deletes nothing and returns 0.
    pub fn purge_logs_older_than(
        &self,
        schedule: ScheduleId,
        cutoff: DateTime<Utc>,
    ) -> HistoryResult<u64> {
        self.require_schedule(schedule)?;
        let deleted = self.store.delete_ended_before(schedule, cutoff)?;
        if deleted > 0 {
            info!(schedule_id = schedule, %cutoff, deleted, "purged execution logs");
        }
        Ok(deleted)
    }

    /// Record that an attempt for `schedule` has started.
    pub fn record_start(
        &self,
        schedule: ScheduleId,
        scheduled_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> HistoryResult<ExecutionLogEntry> {
        self.require_schedule(schedule)?;
        self.store.insert_working(schedule, scheduled_at, started_at)
    }

    /// Conclude a started attempt.
    pub fn record_outcome(
        &self,
        log_id: LogId,
        outcome: &ExecutionOutcome,
        ended_at: DateTime<Utc>,
    ) -> HistoryResult<ExecutionLogEntry> {
        self.store.complete(log_id, outcome, ended_at)
    }

    /// Append the marker entry recording that an error notification was sent.
    pub fn record_error_notification(
        &self,
        schedule: ScheduleId,
        at: DateTime<Utc>,
    ) -> HistoryResult<ExecutionLogEntry> {
        self.require_schedule(schedule)?;
        self.store
            .insert_finished(schedule, &ExecutionOutcome::error(ERROR_NOTIFICATION_MARKER), at)
    }

    fn require_schedule(&self, schedule: ScheduleId) -> HistoryResult<()> {
        if self.store.schedule_exists(schedule)? {
            Ok(())
        } else {
            Err(HistoryError::NotFound {
                entity: "report schedule",
                id: schedule,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::testing::{at, insert_raw, store_with_schedules};
    use crate::history::SqliteLogStore;

    fn engine(ids: &[ScheduleId]) -> HistoryEngine<SqliteLogStore> {
        HistoryEngine::new(store_with_schedules(ids))
    }

    #[test]
    fn test_last_success_picks_latest_end() {
        let engine = engine(&[1, 2]);
        insert_raw(engine.store(), 1, "Success", Some(10), None);
        let latest = insert_raw(engine.store(), 1, "Success", Some(30), None);
        insert_raw(engine.store(), 1, "Error", Some(40), None);
        insert_raw(engine.store(), 2, "Success", Some(50), None);

        let found = engine.find_last_success(1).unwrap().unwrap();
        assert_eq!(found.id, latest);
        assert_eq!(found.ended_at, Some(at(30)));
    }

    #[test]
    fn test_last_success_none_without_success() {
        let engine = engine(&[1]);
        insert_raw(engine.store(), 1, "Error", Some(10), None);
        insert_raw(engine.store(), 1, "Not triggered", Some(20), None);

        assert!(engine.find_last_success(1).unwrap().is_none());
    }

    #[test]
    fn test_last_active_working_skips_error_bearing_rows() {
        let engine = engine(&[1]);
        let clean = insert_raw(engine.store(), 1, "Working", Some(10), None);
        insert_raw(engine.store(), 1, "Working", Some(20), Some("Report Schedule is still working"));

        let found = engine.find_last_active_working(1).unwrap().unwrap();
        assert_eq!(found.id, clean);
        assert!(found.error_message.is_none());
    }

    #[test]
    fn test_last_active_working_prefers_running_entry() {
        let engine = engine(&[1]);
        insert_raw(engine.store(), 1, "Working", Some(10), None);
        let started = engine.record_start(1, at(15), at(16)).unwrap();

        let found = engine.find_last_active_working(1).unwrap().unwrap();
        assert_eq!(found.id, started.id);
    }

    #[test]
    fn test_suppression_allows_notification_after_earlier_success() {
        let engine = engine(&[1]);
        insert_raw(engine.store(), 1, "Success", Some(10), None);
        insert_raw(engine.store(), 1, "Error", Some(20), Some(ERROR_NOTIFICATION_MARKER));

        assert!(!engine.should_suppress_error_notification(1).unwrap());
    }

    #[test]
    fn test_suppression_when_only_errors_precede_notification() {
        let engine = engine(&[1]);
        insert_raw(engine.store(), 1, "Error", Some(10), None);
        let marker = insert_raw(engine.store(), 1, "Error", Some(20), Some(ERROR_NOTIFICATION_MARKER));

        assert!(engine.should_suppress_error_notification(1).unwrap());
        let found = engine.find_last_error_notification(1).unwrap().unwrap();
        assert_eq!(found.id, marker);
    }

    #[test]
    fn test_no_marker_never_suppresses() {
        let engine = engine(&[1]);
        insert_raw(engine.store(), 1, "Error", Some(10), None);
        insert_raw(engine.store(), 1, "Error", Some(20), Some("timeout"));

        assert!(!engine.should_suppress_error_notification(1).unwrap());
    }

    #[test]
    fn test_success_after_notification_does_not_lift_suppression() {
        let engine = engine(&[1]);
        insert_raw(engine.store(), 1, "Error", Some(10), Some(ERROR_NOTIFICATION_MARKER));
        insert_raw(engine.store(), 1, "Success", Some(20), None);

        assert!(engine.should_suppress_error_notification(1).unwrap());
    }

    #[test]
    fn test_unknown_state_counts_as_recovery() {
        let engine = engine(&[1]);
        insert_raw(engine.store(), 1, "Paused", Some(5), None);
        insert_raw(engine.store(), 1, "Working", Some(8), None);
        insert_raw(engine.store(), 1, "Error", Some(20), Some(ERROR_NOTIFICATION_MARKER));

        assert!(!engine.should_suppress_error_notification(1).unwrap());
    }

    #[test]
    fn test_marker_on_success_row_is_still_a_notification() {
        let engine = engine(&[1]);
        insert_raw(engine.store(), 1, "Success", Some(20), Some(ERROR_NOTIFICATION_MARKER));

        assert!(engine.should_suppress_error_notification(1).unwrap());
    }

    #[test]
    fn test_recorded_notification_is_found() {
        let engine = engine(&[1]);
        insert_raw(engine.store(), 1, "Error", Some(10), Some("boom"));
        let sent = engine.record_error_notification(1, at(11)).unwrap();

        assert!(sent.is_error_notification());
        assert_eq!(sent.state, ExecutionState::Error);
        assert!(engine.should_suppress_error_notification(1).unwrap());
    }

    #[test]
    fn test_list_logs_second_page() {
        let engine = engine(&[1]);
        let ids: Vec<LogId> = (1..=5)
            .map(|i| insert_raw(engine.store(), 1, "Success", Some(i * 10), None))
            .collect();

        let (logs, total) = engine.list_logs(1, 1, 2).unwrap();
        assert_eq!(total, 5);
        let got: Vec<LogId> = logs.iter().map(|e| e.id).collect();
        // 3rd and 4th most recent
        assert_eq!(got, vec![ids[2], ids[1]]);
    }

    #[test]
    fn test_list_logs_rejects_bad_paging() {
        let engine = engine(&[1]);
        for (page, size) in [(-1, 10), (0, 0), (0, -5), (0, DEFAULT_MAX_PAGE_SIZE + 1)] {
            let result = engine.list_logs(1, page, size);
            assert!(
                matches!(result, Err(HistoryError::InvalidArgument(_))),
                "page={page} size={size}"
            );
        }
    }

    #[test]
    fn test_list_logs_unknown_schedule() {
        let engine = engine(&[1]);
        assert!(matches!(
            engine.list_logs(42, 0, 10),
            Err(HistoryError::NotFound { id: 42, .. })
        ));
    }

    #[test]
    fn test_purge_is_idempotent() {
        let engine = engine(&[1]);
        insert_raw(engine.store(), 1, "Success", Some(10), None);
        insert_raw(engine.store(), 1, "Error", Some(20), None);
        insert_raw(engine.store(), 1, "Success", Some(30), None);

        assert_eq!(engine.purge_logs_older_than(1, at(25)).unwrap(), 2);
        assert_eq!(engine.purge_logs_older_than(1, at(25)).unwrap(), 0);
        assert_eq!(engine.store().count(1).unwrap(), 1);
    }

    #[test]
    fn test_start_then_outcome_lifecycle() {
        let engine = engine(&[1]);
        let started = engine.record_start(1, at(0), at(1)).unwrap();
        assert_eq!(
            engine.find_last_active_working(1).unwrap().map(|e| e.id),
            Some(started.id)
        );

        engine
            .record_outcome(started.id, &ExecutionOutcome::success(), at(9))
            .unwrap();
        assert!(engine.find_last_active_working(1).unwrap().is_none());
        assert_eq!(engine.find_last_success(1).unwrap().map(|e| e.id), Some(started.id));
    }

    #[test]
    fn test_record_start_unknown_schedule() {
        let engine = engine(&[]);
        assert!(matches!(
            engine.record_start(5, at(0), at(0)),
            Err(HistoryError::NotFound { id: 5, .. })
        ));
    }

    #[test]
    fn test_lookups_unknown_schedule() {
        let engine = engine(&[1]);
        assert!(matches!(
            engine.find_last_success(99),
            Err(HistoryError::NotFound { id: 99, .. })
        ));
        assert!(matches!(
            engine.find_last_active_working(99),
            Err(HistoryError::NotFound { id: 99, .. })
        ));
        assert!(matches!(
            engine.should_suppress_error_notification(99),
            Err(HistoryError::NotFound { id: 99, .. })
        ));
    }

    #[test]
    fn test_purge_cutoff_within_same_microsecond() {
        let engine = engine(&[1]);
        let ended = at(10) + chrono::Duration::nanoseconds(1_500);
        engine
            .store()
            .insert_finished(1, &ExecutionOutcome::success(), ended)
            .unwrap();

        // cutoff is 400ns later; the entry ended strictly before it
        let cutoff = at(10) + chrono::Duration::nanoseconds(1_900);
        assert_eq!(engine.purge_logs_older_than(1, cutoff).unwrap(), 1);
    }

    #[test]
    fn test_purge_keeps_entry_at_cutoff() {
        let engine = engine(&[1]);
        let ended = at(10) + chrono::Duration::nanoseconds(1_500);
        engine
            .store()
            .insert_finished(1, &ExecutionOutcome::success(), ended)
            .unwrap();

        assert_eq!(engine.purge_logs_older_than(1, ended).unwrap(), 0);
        assert_eq!(engine.store().count(1).unwrap(), 1);
    }
}
