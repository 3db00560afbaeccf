use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, anyhow};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::event::Event;

const ENVELOPE_KEYS: [&str; 3] = ["events", "messages", "data"];

/// Loads an event export. `-` reads stdin.
#[tracing::instrument(skip(path), fields(file = %path.display()))]
pub fn load_events(path: &Path) -> anyhow::Result<Vec<Event>> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed reading events from stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };

    let events = parse_events(&text).with_context(|| format!("failed parsing {}", path.display()))?;
    info!(count = events.len(), "loaded events");
    Ok(events)
}

/// Accepts a JSON array, an envelope object holding one under
/// `events`/`messages`/`data`, or JSON lines.
pub fn parse_events(text: &str) -> anyhow::Result<Vec<Event>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let items = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items,
        Ok(Value::Object(mut map)) => {
            let envelope = ENVELOPE_KEYS
                .iter()
                .find(|key| map.get(**key).is_some_and(Value::is_array));
            match envelope.and_then(|key| map.remove(*key)) {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(map)],
            }
        }
        Ok(other) => {
            return Err(anyhow!("expected an array or object of events, got {}", kind(&other)));
        }
        Err(_) => load_json_lines(trimmed)?,
    };

    Ok(to_events(items))
}

fn load_json_lines(text: &str) -> anyhow::Result<Vec<Value>> {
    debug!("document is not a single JSON value; reading as json lines");
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(trimmed).with_context(|| format!("invalid JSON on line {}", idx + 1))?;
        out.push(value);
    }
    Ok(out)
}

fn to_events(items: Vec<Value>) -> Vec<Event> {
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        if !item.is_object() {
            warn!(index = idx, kind = kind(&item), "skipping non-object event entry");
            continue;
        }
        match serde_json::from_value::<Event>(item) {
            Ok(event) => out.push(event),
            Err(err) => warn!(index = idx, error = %err, "skipping malformed event entry"),
        }
    }
    out
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::{load_events, parse_events};

    #[test]
    fn reads_plain_array_and_skips_non_objects() {
        let events = parse_events(
            r#"[{"timestamp": "2024-01-01T00:00:00Z", "message": "hi"}, 4, null, {"sentAt": 1704067200000}]"#,
        )
        .expect("parse array");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sent_at(), events[1].sent_at());
    }

    #[test]
    fn reads_envelope_object() {
        let events = parse_events(r#"{"count": 1, "messages": [{"created_at": "2024-01-01"}]}"#)
            .expect("parse envelope");
        assert_eq!(events.len(), 1);
        assert!(events[0].sent_at().is_some());
    }

    #[test]
    fn reads_json_lines() {
        let text = "{\"timestamp\": \"2024-01-01T00:00:00Z\"}\n\n{\"timestamp\": \"bogus\"}\n";
        let events = parse_events(text).expect("parse jsonl");
        assert_eq!(events.len(), 2);
        assert!(events[1].sent_at().is_none());
    }

    #[test]
    fn rejects_broken_documents() {
        assert!(parse_events("{\"timestamp\": \n not json").is_err());
        assert!(parse_events("\"just a string\"").is_err());
        assert!(parse_events("   ").expect("empty").is_empty());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.json");
        std::fs::write(&path, r#"[{"timestamp": "2024-02-02T10:00:00Z"}]"#).expect("write feed");
        let events = load_events(&path).expect("load feed");
        assert_eq!(events.len(), 1);

        assert!(load_events(&dir.path().join("missing.json")).is_err());
    }
}
