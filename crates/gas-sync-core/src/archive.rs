use anyhow::{bail, Context, Result};
use gas_sync_client::{FetchError, GasClient, PageQuery, Row, Tab, TablePayload};
use gas_sync_config::ArchiveConfig;
use std::collections::HashSet;
use tracing::{debug, warn};

/// U+001F never occurs in sheet text, so joined field values stay unambiguous.
const KEY_SEPARATOR: &str = "\u{1f}";

const HEALTH_CHECK_LIMIT: u32 = 1;

/// Duplicate-detection key: the five field values, trimmed, case preserved.
pub(crate) fn row_key(row: &Row) -> String {
    [
        row.artist.trim(),
        row.title.trim(),
        row.kind.trim(),
        row.d_text.trim(),
        row.d_url.trim(),
    ]
    .join(KEY_SEPARATOR)
}

/// Pagination state: merged rows in first-seen order plus the counts the
/// server reported on the first page that carried them.
#[derive(Default)]
struct ArchiveAccumulator {
    merged: Vec<Row>,
    seen: HashSet<String>,
    total: Option<u64>,
    matched: Option<u64>,
    pages: u32,
}

impl ArchiveAccumulator {
    fn observe_counts(&mut self, payload: &TablePayload) {
        if self.total.is_none() {
            self.total = payload.total;
        }
        if self.matched.is_none() {
            self.matched = payload.matched;
        }
    }

    /// Appends unseen rows, stopping once the merged count hits the cap.
    /// Returns how many rows were new.
    fn merge(&mut self, rows: Vec<Row>, total_cap: usize) -> usize {
        let mut new_rows = 0;
        for row in rows {
            if self.merged.len() >= total_cap {
                break;
            }
            if !self.seen.insert(row_key(&row)) {
                continue;
            }
            self.merged.push(row);
            new_rows += 1;
        }
        new_rows
    }

    fn into_payload(self) -> TablePayload {
        let merged_len = self.merged.len() as u64;
        TablePayload {
            tab: Tab::Archive,
            total: Some(self.total.unwrap_or(merged_len)),
            matched: Some(self.matched.unwrap_or(merged_len)),
            rows: self.merged,
        }
    }
}

/// Probes the archive tab with a single-row page before committing to a
/// crawl. A server that claims rows but returns none would otherwise send
/// the pagination loop chasing an empty dataset.
async fn verify_health(client: &GasClient) -> Result<()> {
    let probe = client
        .fetch_table(
            Tab::Archive,
            PageQuery {
                offset: 0,
                limit: Some(HEALTH_CHECK_LIMIT),
            },
        )
        .await
        .context("archive health check fetch failed")?;

    let total = probe.total.unwrap_or(0);
    if probe.rows.is_empty() && total > 0 {
        bail!("archive health check failed: server reports {total} rows but returned none");
    }

    debug!(
        "archive health check passed (total {total}, sampled {} rows)",
        probe.rows.len()
    );
    Ok(())
}

/// Fetches one archive page, walking the descending candidate sizes whenever
/// the endpoint rejects a page as too large. Any other failure aborts.
async fn fetch_page_with_shrink(
    client: &GasClient,
    limits: &[u32],
    offset: u64,
) -> Result<TablePayload, FetchError> {
    let mut last_err: Option<FetchError> = None;

    for &limit in limits {
        match client
            .fetch_table(
                Tab::Archive,
                PageQuery {
                    offset,
                    limit: Some(limit),
                },
            )
            .await
        {
            Ok(payload) => return Ok(payload),
            Err(err) if err.is_page_too_large() => {
                warn!("archive page at offset {offset} too large at limit {limit}; shrinking");
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    match last_err {
        Some(err) => Err(err),
        None => Err(FetchError::Failed {
            tab: Tab::Archive,
            attempts: 0,
            message: "no candidate page sizes configured".to_string(),
        }),
    }
}

/// Crawls the whole archive tab into one merged payload. Returns an error
/// rather than a partial result; the caller decides what a failure means.
pub(crate) async fn fetch_archive_all(
    client: &GasClient,
    cfg: &ArchiveConfig,
) -> Result<TablePayload> {
    verify_health(client).await?;

    let page_limit = cfg.page_limit.max(1);
    let total_cap = cfg.total_cap;
    let mut acc = ArchiveAccumulator::default();
    let mut offset = 0u64;

    for page in 0..cfg.max_pages {
        let payload = fetch_page_with_shrink(client, &cfg.shrink_limits, offset)
            .await
            .with_context(|| format!("archive page {page} at offset {offset} failed"))?;

        acc.observe_counts(&payload);
        acc.pages += 1;

        let page_rows = payload.rows.len();
        if page_rows == 0 {
            break;
        }

        let new_rows = acc.merge(payload.rows, total_cap);
        debug!(
            "archive page {page}: offset {offset}, {page_rows} fetched, {new_rows} new, {} merged",
            acc.merged.len()
        );

        if acc.merged.len() >= total_cap {
            warn!("archive merge reached the row cap ({total_cap}); stopping");
            break;
        }
        if page_rows < page_limit as usize {
            break;
        }
        if new_rows == 0 {
            warn!("archive page at offset {offset} repeated known rows; server may ignore offset");
            break;
        }
        if let Some(total) = acc.total {
            if acc.merged.len() as u64 >= total {
                break;
            }
        }

        offset += u64::from(page_limit);
    }

    debug!(
        "archive pagination finished: {} pages, {} rows",
        acc.pages,
        acc.merged.len()
    );
    Ok(acc.into_payload())
}
