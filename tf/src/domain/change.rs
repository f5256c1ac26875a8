//! Change notifications delivered to consumers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of row change reported by the live feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(format!("Unknown change kind: {}", s)),
        }
    }
}

/// A single row change on a watched table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the change happened on
    pub table: String,

    /// INSERT, UPDATE or DELETE
    #[serde(rename = "type")]
    pub kind: ChangeKind,

    /// Row after the change (empty object for deletes)
    #[serde(default)]
    pub record: Value,

    /// Row before the change, when the platform reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    /// Create a change event with no previous record
    pub fn new(table: impl Into<String>, kind: ChangeKind, record: Value) -> Self {
        Self {
            table: table.into(),
            kind,
            record,
            old_record: None,
            commit_timestamp: None,
        }
    }
}

/// Why the consumer is being asked to refetch instead of applying a live change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshReason {
    /// Polling fallback tick while the live feed is not connected
    Poll,
    /// The live feed came back after failures; changes may have been missed
    Reconnected,
}

/// What a consumer's data-change callback receives
#[derive(Debug, Clone, PartialEq)]
pub enum DataChange {
    /// A change pushed by the live feed
    Live(ChangeEvent),
    /// Refetch everything; the feed cannot be trusted to have delivered it
    Refresh(RefreshReason),
}

impl DataChange {
    pub fn is_refresh(&self) -> bool {
        matches!(self, Self::Refresh(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_kind_parse() {
        assert_eq!("insert".parse::<ChangeKind>().unwrap(), ChangeKind::Insert);
        assert_eq!("DELETE".parse::<ChangeKind>().unwrap(), ChangeKind::Delete);
        assert!("truncate".parse::<ChangeKind>().is_err());
    }

    #[test]
    fn test_change_event_from_feed_payload() {
        let payload = r#"{
            "table": "showing_requests",
            "type": "UPDATE",
            "record": {"id": 7, "status": "confirmed"},
            "old_record": {"id": 7, "status": "pending"},
            "commit_timestamp": "2024-03-01T12:00:00Z"
        }"#;

        let event: ChangeEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.table, "showing_requests");
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.record["status"], "confirmed");
        assert_eq!(event.old_record.unwrap()["status"], "pending");
        assert!(event.commit_timestamp.is_some());
    }

    #[test]
    fn test_change_event_optional_fields() {
        let event: ChangeEvent = serde_json::from_str(r#"{"table": "messages", "type": "DELETE"}"#).unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.record.is_null());
        assert!(event.old_record.is_none());

        let json = serde_json::to_value(ChangeEvent::new("messages", ChangeKind::Insert, json!({"id": 1}))).unwrap();
        assert_eq!(json["type"], "INSERT");
        assert!(json.get("old_record").is_none());
    }

    #[test]
    fn test_data_change_is_refresh() {
        assert!(DataChange::Refresh(RefreshReason::Poll).is_refresh());
        let live = DataChange::Live(ChangeEvent::new("offers", ChangeKind::Insert, json!({})));
        assert!(!live.is_refresh());
    }
}
