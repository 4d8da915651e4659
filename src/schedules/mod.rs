//! Report schedule definitions and their recipients.
//!
//! Schedules are owned elsewhere; this crate keeps them only so execution
//! logs have an owner, retention has a policy, and creation can be checked
//! for uniqueness.

pub mod store;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::HistoryError;

pub use self::store::ScheduleStore;

/// Days of execution history kept when a schedule does not say otherwise.
pub const DEFAULT_LOG_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScheduleType {
    Alert,
    Report,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Alert => "Alert",
            ScheduleType::Report => "Report",
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleType {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alert" => Ok(ScheduleType::Alert),
            "report" => Ok(ScheduleType::Report),
            _ => Err(HistoryError::invalid(format!("unknown schedule type '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecipientType {
    Email,
    Slack,
    SlackV2,
    Webhook,
}

impl RecipientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::Email => "Email",
            RecipientType::Slack => "Slack",
            RecipientType::SlackV2 => "SlackV2",
            RecipientType::Webhook => "Webhook",
        }
    }
}

impl FromStr for RecipientType {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Email" => Ok(RecipientType::Email),
            "Slack" => Ok(RecipientType::Slack),
            "SlackV2" => Ok(RecipientType::SlackV2),
            "Webhook" => Ok(RecipientType::Webhook),
            _ => Err(HistoryError::invalid(format!("unknown recipient type '{s}'"))),
        }
    }
}

/// Where a schedule delivers to. `config` is stored as JSON text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipient {
    pub id: Option<i64>,
    pub kind: RecipientType,
    pub config: serde_json::Value,
}

impl Recipient {
    pub fn new(kind: RecipientType, config: serde_json::Value) -> Self {
        Self { id: None, kind, config }
    }

    pub fn email(target: &str) -> Self {
        Self::new(RecipientType::Email, serde_json::json!({ "target": target }))
    }
}

/// A stored schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleDefinition {
    pub id: i64,
    pub name: String,
    pub kind: ScheduleType,
    pub description: Option<String>,
    pub crontab: String,
    pub timezone: String,
    pub active: bool,
    pub chart_id: Option<i64>,
    pub dashboard_id: Option<i64>,
    pub database_id: Option<i64>,
    pub created_by: Option<i64>,
    pub extra: serde_json::Value,
    pub log_retention_days: i64,
    pub recipients: Vec<Recipient>,
}

/// Builder for a schedule about to be created. Recipients are attached
/// here and linked to the new row by the store.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub name: String,
    pub kind: ScheduleType,
    pub crontab: String,
    pub description: Option<String>,
    pub timezone: String,
    pub active: bool,
    pub chart_id: Option<i64>,
    pub dashboard_id: Option<i64>,
    pub database_id: Option<i64>,
    pub created_by: Option<i64>,
    pub extra: serde_json::Value,
    pub log_retention_days: i64,
    pub recipients: Vec<Recipient>,
}

impl NewSchedule {
    pub fn new(name: impl Into<String>, kind: ScheduleType, crontab: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            crontab: crontab.into(),
            description: None,
            timezone: "UTC".to_string(),
            active: true,
            chart_id: None,
            dashboard_id: None,
            database_id: None,
            created_by: None,
            extra: serde_json::json!({}),
            log_retention_days: DEFAULT_LOG_RETENTION_DAYS,
            recipients: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = tz.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn for_chart(mut self, chart_id: i64) -> Self {
        self.chart_id = Some(chart_id);
        self
    }

    pub fn for_dashboard(mut self, dashboard_id: i64) -> Self {
        self.dashboard_id = Some(dashboard_id);
        self
    }

    pub fn for_database(mut self, database_id: i64) -> Self {
        self.database_id = Some(database_id);
        self
    }

    pub fn created_by(mut self, user_id: i64) -> Self {
        self.created_by = Some(user_id);
        self
    }

    pub fn extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }

    pub fn log_retention_days(mut self, days: i64) -> Self {
        self.log_retention_days = days;
        self
    }

    pub fn recipient(mut self, recipient: Recipient) -> Self {
        self.recipients.push(recipient);
        self
    }
}

/// Changes to an existing schedule. `None` leaves a field alone;
/// `recipients: Some(..)` replaces the whole recipient list.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub crontab: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
    pub extra: Option<serde_json::Value>,
    pub log_retention_days: Option<i64>,
    pub recipients: Option<Vec<Recipient>>,
}

/// Check crontab syntax. Five-field expressions get a leading seconds field.
pub fn validate_crontab(expr: &str) -> Result<(), HistoryError> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map(|_| ())
        .map_err(|e| HistoryError::invalid(format!("invalid crontab '{expr}': {e}")))
}
