use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timezone::parse_timestamp;

const REPLY_KEYS: [&str; 3] = ["reply_to", "parent_id", "in_reply_to"];

/// One message delivered to the user.
///
/// Only the timestamp drives the calendar; everything else rides along in
/// `payload` untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(
        default,
        alias = "sent_at",
        alias = "sentAt",
        alias = "created_at",
        alias = "createdAt"
    )]
    pub timestamp: Value,

    #[serde(flatten)]
    pub payload: BTreeMap<String, Value>,
}

impl Event {
    pub fn new(timestamp: impl Into<Value>) -> Self {
        Self {
            timestamp: timestamp.into(),
            payload: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// `None` when the timestamp is missing or malformed.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    pub fn id(&self) -> Option<String> {
        self.payload.get("id").and_then(id_text)
    }

    pub fn reply_to(&self) -> Option<String> {
        REPLY_KEYS
            .iter()
            .find_map(|key| self.payload.get(*key).and_then(id_text))
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Latest parseable instant across `events`.
pub fn latest_sent_at(events: &[Event]) -> Option<DateTime<Utc>> {
    events.iter().filter_map(Event::sent_at).max()
}
