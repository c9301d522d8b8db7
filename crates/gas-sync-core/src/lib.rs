//! Sync pipeline: fetch every tab from the sheet endpoint, normalize the
//! payloads, and publish JSON artifacts plus a run manifest.

pub mod model;

mod archive;
mod sink;

use anyhow::{Context, Result};
use chrono::Utc;
use gas_sync_client::{FetchError, GasClient, PageQuery, Tab};
use gas_sync_config::AppConfig;
use model::{RunManifest, TableArtifact, MANIFEST_SOURCE};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Tabs fetched in a single request each. The archive tab goes through the
/// pagination engine instead.
const CORE_TABS: [Tab; 2] = [Tab::Songs, Tab::Gags];

/// True when the error chain bottoms out in a page-too-large rejection.
pub(crate) fn is_page_too_large(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FetchError>()
        .is_some_and(FetchError::is_page_too_large)
}

/// Runs one full sync. The manifest is written only after every artifact,
/// so its timestamp vouches for all of them.
///
/// A core tab failure aborts the run. An archive crawl that dies on page
/// size alone is downgraded to a warning and the previous archive artifact
/// stays in place.
pub async fn run_sync(config: AppConfig) -> Result<()> {
    let started_at = Utc::now();
    let out_dir = Path::new(&config.sync.out_dir);

    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output dir {}", out_dir.display()))?;

    let client = GasClient::new(config.endpoint.clone())?;
    let mut tabs: Vec<String> = Vec::new();
    let mut counts: BTreeMap<String, Option<u64>> = BTreeMap::new();

    for tab in CORE_TABS {
        let payload = client
            .fetch_table(tab, PageQuery::default())
            .await
            .with_context(|| format!("failed to sync {tab}"))?;

        let artifact = TableArtifact::from_payload(payload, Utc::now());
        let path = sink::write_table_artifact(out_dir, tab, &artifact)?;
        info!(
            "synced {}: {} rows (total {}) -> {}",
            tab,
            artifact.rows.len(),
            artifact.total,
            path.display()
        );

        tabs.push(tab.as_str().to_string());
        counts.insert(tab.as_str().to_string(), Some(artifact.rows.len() as u64));
    }

    if config.sync.archive_enabled {
        tabs.push(Tab::Archive.as_str().to_string());
        match archive::fetch_archive_all(&client, &config.archive).await {
            Ok(payload) => {
                let artifact = TableArtifact::from_payload(payload, Utc::now());
                let path = sink::write_table_artifact(out_dir, Tab::Archive, &artifact)?;
                info!(
                    "synced archive: {} rows (total {}) -> {}",
                    artifact.rows.len(),
                    artifact.total,
                    path.display()
                );
                counts.insert(
                    Tab::Archive.as_str().to_string(),
                    Some(artifact.rows.len() as u64),
                );
            }
            Err(err) if is_page_too_large(&err) => {
                warn!("archive sync skipped, keeping previous artifact: {:#}", err);
                counts.insert(Tab::Archive.as_str().to_string(), None);
            }
            Err(err) => return Err(err),
        }
    } else {
        info!("archive sync disabled; skipping");
    }

    let manifest = RunManifest {
        ok: true,
        source: MANIFEST_SOURCE.to_string(),
        generated_at: model::format_timestamp(Utc::now()),
        started_at: model::format_timestamp(started_at),
        tabs,
        counts,
    };
    let path = sink::write_manifest(out_dir, &manifest)?;
    info!("sync complete -> {}", path.display());

    Ok(())
}
