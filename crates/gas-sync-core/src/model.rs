use chrono::{DateTime, SecondsFormat, Utc};
use gas_sync_client::{Row, TablePayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MANIFEST_SOURCE: &str = "gas-sync";

/// On-disk shape of one `<tab>.json` artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableArtifact {
    pub ok: bool,
    pub sheet: String,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: String,
    pub rows: Vec<Row>,
    pub total: u64,
    pub matched: u64,
}

impl TableArtifact {
    /// Counts the server never reported fall back to what was retrieved.
    pub fn from_payload(payload: TablePayload, fetched_at: DateTime<Utc>) -> Self {
        let row_count = payload.rows.len() as u64;
        Self {
            ok: true,
            sheet: payload.tab.as_str().to_string(),
            fetched_at: format_timestamp(fetched_at),
            rows: payload.rows,
            total: payload.total.unwrap_or(row_count),
            matched: payload.matched.unwrap_or(row_count),
        }
    }
}

/// On-disk shape of `meta.json`. Written after every artifact, so its
/// presence marks a run that got all the way through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub ok: bool,
    pub source: String,
    #[serde(rename = "generatedAt")]
    pub generated_at: String,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    pub tabs: Vec<String>,
    pub counts: BTreeMap<String, Option<u64>>,
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
