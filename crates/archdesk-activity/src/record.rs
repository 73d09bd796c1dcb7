//! Activity record model and query filters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "success" => Ok(Self::Success),
            _ => Err(format!(
                "Unknown severity '{s}'. Expected: info, warning, error, success"
            )),
        }
    }
}

/// One line of the activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Dotted event name, e.g. `file.uploaded`
    pub event: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub severity: Severity,
}

impl ActivityRecord {
    /// New record with a random id and the current time
    pub fn new(event: impl Into<String>, description: impl Into<String>, options: &LogOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event: event.into(),
            description: description.into(),
            user_id: options.actor.user_id.clone(),
            user_email: options.actor.user_email.clone(),
            ip: options.actor.ip.clone(),
            metadata: options.metadata.clone(),
            severity: options.severity,
        }
    }

    /// Webhook event name for this record
    pub fn webhook_event(&self) -> String {
        format!("activity.{}", self.event)
    }
}

/// Who caused an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub ip: Option<String>,
}

impl Actor {
    pub fn user(user_id: impl Into<String>, user_email: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            user_email: Some(user_email.into()),
            ip: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

/// Per-event options for [`ActivityLog::log_event`](crate::ActivityLog::log_event)
#[derive(Debug, Clone, PartialEq)]
pub struct LogOptions {
    pub actor: Actor,
    pub metadata: Option<serde_json::Value>,
    pub severity: Severity,
    /// Write synchronously instead of batching
    pub immediate: bool,
    /// Fan the record out to webhook subscribers
    pub trigger_webhook: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            actor: Actor::default(),
            metadata: None,
            severity: Severity::Info,
            immediate: false,
            trigger_webhook: true,
        }
    }
}

impl LogOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor: &Actor) -> Self {
        self.actor = actor.clone();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn without_webhooks(mut self) -> Self {
        self.trigger_webhook = false;
        self
    }
}

/// Conjunctive filter for [`ActivityLog::query_events`](crate::ActivityLog::query_events)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityFilter {
    pub event: Option<String>,
    pub user_id: Option<String>,
    pub severity: Option<Severity>,
    /// Inclusive lower bound
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub end: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

impl ActivityFilter {
    pub fn matches(&self, record: &ActivityRecord) -> bool {
        self.event.as_ref().map_or(true, |event| &record.event == event)
            && self
                .user_id
                .as_ref()
                .map_or(true, |user| record.user_id.as_ref() == Some(user))
            && self.severity.map_or(true, |severity| record.severity == severity)
            && self.start.map_or(true, |start| record.timestamp >= start)
            && self.end.map_or(true, |end| record.timestamp <= end)
    }

    /// Filter records stored oldest-first and return them newest-first
    pub fn apply(&self, records: Vec<ActivityRecord>) -> Vec<ActivityRecord> {
        let mut matched: Vec<ActivityRecord> = records.into_iter().filter(|r| self.matches(r)).collect();
        if let Some(limit) = self.limit {
            let excess = matched.len().saturating_sub(limit);
            matched.drain(..excess);
        }
        matched.reverse();
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(event: &str, user: Option<&str>, severity: Severity, minutes_ago: i64) -> ActivityRecord {
        let mut record = ActivityRecord::new(
            event,
            format!("{event} happened"),
            &LogOptions::new().with_severity(severity),
        );
        record.user_id = user.map(str::to_string);
        record.timestamp = Utc::now() - Duration::minutes(minutes_ago);
        record
    }

    #[test]
    fn test_serialized_shape() {
        let record = ActivityRecord::new(
            "file.uploaded",
            "File uploaded: a.zip",
            &LogOptions::new()
                .with_actor(&Actor::user("u1", "ops@example.com"))
                .with_metadata(serde_json::json!({"filename": "a.zip"}))
                .with_severity(Severity::Success),
        );
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "file.uploaded");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["userEmail"], "ops@example.com");
        assert_eq!(json["severity"], "success");
        assert!(json.get("ip").is_none());

        let back: ActivityRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_filter_is_conjunctive_and_newest_first() {
        let records = vec![
            record("file.uploaded", Some("u1"), Severity::Success, 30),
            record("file.deleted", Some("u1"), Severity::Warning, 20),
            record("file.uploaded", Some("u2"), Severity::Success, 10),
            record("file.uploaded", Some("u1"), Severity::Success, 5),
        ];

        let filter = ActivityFilter {
            event: Some("file.uploaded".into()),
            user_id: Some("u1".into()),
            ..ActivityFilter::default()
        };
        let found = filter.apply(records.clone());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, records[3].id);
        assert_eq!(found[1].id, records[0].id);

        let recent = ActivityFilter {
            start: Some(Utc::now() - Duration::minutes(15)),
            ..ActivityFilter::default()
        };
        assert_eq!(recent.apply(records.clone()).len(), 2);

        let limited = ActivityFilter {
            limit: Some(3),
            ..ActivityFilter::default()
        };
        let found = limited.apply(records.clone());
        assert_eq!(
            found.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec![records[3].id.as_str(), records[2].id.as_str(), records[1].id.as_str()]
        );

        let warnings = ActivityFilter {
            severity: Some(Severity::Warning),
            ..ActivityFilter::default()
        };
        assert_eq!(warnings.apply(records).len(), 1);
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!("WARN".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("fatal".parse::<Severity>().is_err());
    }
}
