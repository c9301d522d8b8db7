use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Canonical record shape shared by all three tabs. Wire names keep the
/// camelCase the artifact consumers expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, rename = "dText")]
    pub d_text: String,
    #[serde(default, rename = "dUrl")]
    pub d_url: String,
}

/// Field names the endpoint has been observed to nest its row array under.
/// Probed in this order; the first array wins.
const ROW_HOLDER_KEYS: [&str; 9] = [
    "rows", "data", "items", "list", "values", "records", "result", "payload", "response",
];

const NESTED_ROW_HOLDERS: [&str; 3] = ["result", "payload", "response"];

/// Locates the row collection inside an arbitrary response value. The
/// envelope is not stable across deployments of the web app, so this walks
/// the whole value breadth-first and also re-parses string members, which
/// the endpoint sometimes uses to double-encode the real payload.
///
/// `None` means no collection anywhere; callers treat that as a failed fetch.
pub fn resolve_rows(payload: &Value) -> Option<Vec<Value>> {
    let mut queue: VecDeque<Value> = VecDeque::new();
    queue.push_back(payload.clone());

    while let Some(current) = queue.pop_front() {
        match current {
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                    queue.push_back(parsed);
                }
            }
            Value::Array(items) => {
                if looks_like_rows(&items) {
                    return Some(items);
                }
            }
            Value::Object(map) => {
                for key in ROW_HOLDER_KEYS {
                    match map.get(key) {
                        Some(Value::Array(items)) => return Some(items.clone()),
                        Some(Value::Object(inner)) => queue.push_back(Value::Object(inner.clone())),
                        _ => {}
                    }
                }
                for key in NESTED_ROW_HOLDERS {
                    if let Some(Value::Array(items)) = map.get(key).and_then(|v| v.get("rows")) {
                        return Some(items.clone());
                    }
                }
                for (key, value) in &map {
                    match value {
                        Value::Object(_) if ROW_HOLDER_KEYS.contains(&key.as_str()) => {}
                        Value::Object(_) | Value::Array(_) | Value::String(_) => {
                            queue.push_back(value.clone());
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    None
}

// A flat array of primitives is a field value, not a row collection.
fn looks_like_rows(items: &[Value]) -> bool {
    match items.first() {
        None => true,
        Some(Value::Array(_) | Value::Object(_)) => true,
        Some(_) => false,
    }
}

/// Maps raw resolved rows into canonical records. Positional rows fill the
/// five fields in order, keyed rows are reduced to the five known fields,
/// anything else is dropped.
pub fn rows_from_values(raw: &[Value]) -> Vec<Row> {
    raw.iter().filter_map(row_from_value).collect()
}

fn row_from_value(value: &Value) -> Option<Row> {
    match value {
        Value::Array(items) => Some(Row {
            artist: to_str(items.first()),
            title: to_str(items.get(1)),
            kind: to_str(items.get(2)),
            d_text: to_str(items.get(3)),
            d_url: to_str(items.get(4)),
        }),
        Value::Object(map) => Some(Row {
            artist: to_str(map.get("artist")),
            title: to_str(map.get("title")),
            kind: to_str(map.get("kind")),
            d_text: to_str(map.get("dText")),
            d_url: to_str(map.get("dUrl")),
        }),
        _ => None,
    }
}

fn to_str(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Counts arrive as numbers or numeric strings depending on the sheet
/// formula; anything else counts as unreported.
pub(crate) fn to_count(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
