use anyhow::{Context, Result};
use gas_sync_client::Tab;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "meta.json";

/// Pretty-printed with a trailing newline so the artifacts diff cleanly
/// under version control.
fn write_json_file(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut body = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    body.push('\n');
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

pub(crate) fn write_table_artifact(
    out_dir: &Path,
    tab: Tab,
    artifact: &impl Serialize,
) -> Result<PathBuf> {
    let path = out_dir.join(format!("{}.json", tab.as_str()));
    write_json_file(&path, artifact)?;
    Ok(path)
}

pub(crate) fn write_manifest(out_dir: &Path, manifest: &impl Serialize) -> Result<PathBuf> {
    let path = out_dir.join(MANIFEST_FILE);
    write_json_file(&path, manifest)?;
    Ok(path)
}
