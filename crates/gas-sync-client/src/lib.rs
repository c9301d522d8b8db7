pub mod normalize;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use gas_sync_config::EndpointConfig;
use normalize::to_count;
use reqwest::{header::ACCEPT, Client, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use normalize::{resolve_rows, rows_from_values, Row};

const RETRY_BACKOFF_MS: u64 = 400;

/// Substrings that mark the endpoint's oversized-page rejection. The web app
/// reports the Japanese variant when the script runs under a ja locale.
const PAGE_TOO_LARGE_MARKERS: [&str; 3] =
    ["argument too large", "引数が大きすぎます", "arg_too_large"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tab {
    Songs,
    Gags,
    Archive,
}

impl Tab {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Songs => "songs",
            Self::Gags => "gags",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page request. `limit: None` falls back to the per-tab configured
/// default; zero offsets and limits are left off the URL entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageQuery {
    pub offset: u64,
    pub limit: Option<u32>,
}

/// What one successful fetch produced, after normalization.
#[derive(Debug, Clone)]
pub struct TablePayload {
    pub tab: Tab,
    pub total: Option<u64>,
    pub matched: Option<u64>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// The endpoint refused the requested page size. Recoverable by asking
    /// for a smaller page; fatal anywhere that cannot shrink.
    #[error("[{tab}] page too large: {message}")]
    PageTooLarge { tab: Tab, message: String },
    #[error("[{tab}] fetch failed after {attempts} attempts: {message}")]
    Failed {
        tab: Tab,
        attempts: u32,
        message: String,
    },
}

impl FetchError {
    pub fn is_page_too_large(&self) -> bool {
        matches!(self, Self::PageTooLarge { .. })
    }
}

#[derive(Clone)]
pub struct GasClient {
    cfg: EndpointConfig,
    http: Client,
}

impl GasClient {
    pub fn new(cfg: EndpointConfig) -> Result<Self> {
        let timeout = Duration::from_millis(cfg.timeout_ms.max(1));
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to construct reqwest client")?;

        Ok(Self { cfg, http })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.cfg
    }

    fn default_limit(&self, tab: Tab) -> u32 {
        match tab {
            Tab::Songs => self.cfg.songs_limit,
            Tab::Gags => self.cfg.gags_limit,
            Tab::Archive => self.cfg.archive_limit,
        }
    }

    fn build_url(&self, tab: Tab, page: PageQuery) -> Result<Url> {
        let mut url = Url::parse(&self.cfg.base_url).context("invalid endpoint URL")?;
        let limit = match page.limit {
            Some(limit) if limit > 0 => limit,
            _ => self.default_limit(tab),
        };

        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("sheet", tab.as_str());
            if limit > 0 {
                qp.append_pair("limit", &limit.to_string());
            }
            if page.offset > 0 {
                qp.append_pair("offset", &page.offset.to_string());
            }
            qp.append_pair("authuser", "0");
            // Cache buster; the script host serves stale responses without it.
            qp.append_pair("v", &Utc::now().timestamp_millis().to_string());
        }

        Ok(url)
    }

    /// Fetches one page of one tab, retrying with linear backoff. The error
    /// carries the classified failure kind after the attempt cap is spent.
    pub async fn fetch_table(
        &self,
        tab: Tab,
        page: PageQuery,
    ) -> Result<TablePayload, FetchError> {
        let attempts = self.cfg.max_retry.max(1);
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 1..=attempts {
            match self.fetch_once(tab, page).await {
                Ok(payload) => return Ok(payload),
                Err(err) => {
                    warn!("fetch {tab} attempt {attempt}/{attempts} failed: {err:#}");
                    last_err = Some(err);
                    if attempt < attempts {
                        let backoff = RETRY_BACKOFF_MS * u64::from(attempt);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        let cause = last_err.unwrap_or_else(|| anyhow!("no fetch attempts were made"));
        Err(classify_failure(tab, attempts, &cause))
    }

    async fn fetch_once(&self, tab: Tab, page: PageQuery) -> Result<TablePayload> {
        let url = self.build_url(tab, page)?;
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("failed to read response body (status {status})"))?;

        if !status.is_success() {
            return Err(anyhow!("HTTP {status}"));
        }

        let payload: Value = serde_json::from_str(text.trim()).with_context(|| {
            format!("response body was not JSON: {}", truncate_for_error(&text))
        })?;

        if let Some(envelope) = payload.as_object() {
            if envelope.get("ok").and_then(Value::as_bool) == Some(false) {
                let message = envelope
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("endpoint reported ok=false");
                return Err(anyhow!("{message}"));
            }

            // The archive deployment echoes whichever sheet it last served,
            // so identity is only enforced for the two core tabs.
            if tab != Tab::Archive {
                if let Some(sheet) = envelope.get("sheet").and_then(Value::as_str) {
                    let got = sheet.trim().to_ascii_lowercase();
                    if !got.is_empty() && got != tab.as_str() {
                        return Err(anyhow!("sheet mismatch: requested {tab}, got {got}"));
                    }
                }
            }
        }

        let raw_rows =
            resolve_rows(&payload).ok_or_else(|| anyhow!("no row collection found in response"))?;

        Ok(TablePayload {
            tab,
            total: to_count(payload.get("total")),
            matched: to_count(payload.get("matched")),
            rows: rows_from_values(&raw_rows),
        })
    }
}

fn classify_failure(tab: Tab, attempts: u32, cause: &anyhow::Error) -> FetchError {
    let message = format!("{cause:#}");
    if is_page_too_large_text(&message) {
        FetchError::PageTooLarge { tab, message }
    } else {
        FetchError::Failed {
            tab,
            attempts,
            message,
        }
    }
}

fn is_page_too_large_text(message: &str) -> bool {
    let lower = message.to_lowercase();
    PAGE_TOO_LARGE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

fn truncate_for_error(text: &str) -> String {
    const LIMIT: usize = 240;
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= LIMIT {
        compact
    } else {
        let head: String = compact.chars().take(LIMIT).collect();
        format!("{head}...")
    }
}
