use axum::{extract::Query, http::StatusCode, routing::get, Router};
use gas_sync_config::AppConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Spawns a mock sheet endpoint and logs every `(sheet, limit, offset)`
/// triple it serves.
async fn spawn_gas_server<F>(respond: F) -> (String, Arc<Mutex<Vec<(String, u32, u64)>>>)
where
    F: Fn(&str, u32, u64) -> (StatusCode, String) + Clone + Send + Sync + 'static,
{
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();

    let app = Router::new().route(
        "/",
        get(move |Query(params): Query<HashMap<String, String>>| {
            let respond = respond.clone();
            let log = log.clone();
            async move {
                let sheet = params.get("sheet").cloned().unwrap_or_default();
                let limit = params
                    .get("limit")
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(0);
                let offset = params
                    .get("offset")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                log.lock()
                    .expect("request log poisoned")
                    .push((sheet.clone(), limit, offset));
                respond(&sheet, limit, offset)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{}", addr), requests)
}

fn core_body(sheet: &str) -> (StatusCode, String) {
    match sheet {
        "songs" => (
            StatusCode::OK,
            json!({
                "ok": true,
                "sheet": "songs",
                "total": 2,
                "rows": [
                    ["A", "T1", "kind1", "d1", "u1"],
                    ["B", "T2", "kind2", "d2", "u2"],
                ],
            })
            .to_string(),
        ),
        "gags" => (
            StatusCode::OK,
            json!({ "ok": true, "sheet": "gags", "rows": [] }).to_string(),
        ),
        other => (StatusCode::NOT_FOUND, format!("unknown sheet {other}")),
    }
}

fn test_config(base_url: String, out_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.endpoint.base_url = base_url;
    config.endpoint.timeout_ms = 5000;
    config.endpoint.max_retry = 1;
    config.sync.out_dir = out_dir.to_string_lossy().into_owned();
    config.archive.page_limit = 10;
    config.archive.shrink_limits = vec![10];
    config
}

fn read_json(path: &Path) -> Value {
    let body = std::fs::read_to_string(path).expect("read artifact");
    serde_json::from_str(&body).expect("parse artifact")
}

#[tokio::test(flavor = "multi_thread")]
async fn full_run_publishes_artifacts_and_manifest() {
    let (base_url, _requests) = spawn_gas_server(|sheet, _limit, _offset| core_body(sheet)).await;
    let out = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(base_url, out.path());
    config.sync.archive_enabled = false;

    gas_sync_core::run_sync(config).await.expect("sync run");

    let songs = read_json(&out.path().join("songs.json"));
    assert_eq!(songs["ok"], json!(true));
    assert_eq!(songs["sheet"], json!("songs"));
    assert_eq!(songs["total"], json!(2));
    assert_eq!(songs["matched"], json!(2));
    assert_eq!(
        songs["rows"],
        json!([
            { "artist": "A", "title": "T1", "kind": "kind1", "dText": "d1", "dUrl": "u1" },
            { "artist": "B", "title": "T2", "kind": "kind2", "dText": "d2", "dUrl": "u2" },
        ])
    );
    assert!(songs["fetchedAt"].as_str().expect("fetchedAt").ends_with('Z'));

    let gags = read_json(&out.path().join("gags.json"));
    assert_eq!(gags["rows"], json!([]));
    assert_eq!(gags["total"], json!(0));

    let meta_raw = std::fs::read_to_string(out.path().join("meta.json")).expect("read manifest");
    assert!(meta_raw.ends_with('\n'));
    let meta: Value = serde_json::from_str(&meta_raw).expect("parse manifest");
    assert_eq!(meta["ok"], json!(true));
    assert_eq!(meta["source"], json!("gas-sync"));
    assert_eq!(meta["tabs"], json!(["songs", "gags"]));
    assert_eq!(meta["counts"], json!({ "gags": 0, "songs": 2 }));

    assert!(!out.path().join("archive.json").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn archive_crawl_lands_in_its_own_artifact() {
    let respond = |sheet: &str, limit: u32, offset: u64| {
        if sheet != "archive" {
            return core_body(sheet);
        }
        let remaining = 12u64.saturating_sub(offset);
        let rows: Vec<Value> = (offset..offset + remaining.min(u64::from(limit)))
            .map(|i| json!([format!("old-{i}"), format!("gone-{i}"), "k", "d", "u"]))
            .collect();
        (
            StatusCode::OK,
            json!({ "ok": true, "sheet": "archive", "total": 12, "rows": rows }).to_string(),
        )
    };
    let (base_url, _requests) = spawn_gas_server(respond).await;
    let out = tempfile::tempdir().expect("tempdir");
    let config = test_config(base_url, out.path());

    gas_sync_core::run_sync(config).await.expect("sync run");

    let archive = read_json(&out.path().join("archive.json"));
    assert_eq!(archive["total"], json!(12));
    assert_eq!(archive["rows"].as_array().expect("rows").len(), 12);
    assert_eq!(archive["rows"][0]["artist"], json!("old-0"));
    assert_eq!(archive["rows"][11]["artist"], json!("old-11"));

    let meta = read_json(&out.path().join("meta.json"));
    assert_eq!(meta["tabs"], json!(["songs", "gags", "archive"]));
    assert_eq!(meta["counts"], json!({ "archive": 12, "gags": 0, "songs": 2 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn repeating_archive_server_yields_one_page_of_unique_rows() {
    // Serves the first page regardless of offset, like a deployment that
    // dropped the parameter.
    let respond = |sheet: &str, limit: u32, _offset: u64| {
        if sheet != "archive" {
            return core_body(sheet);
        }
        let rows: Vec<Value> = (0..u64::from(limit).min(10))
            .map(|i| json!([format!("old-{i}"), format!("gone-{i}"), "k", "d", "u"]))
            .collect();
        (
            StatusCode::OK,
            json!({ "ok": true, "sheet": "archive", "rows": rows }).to_string(),
        )
    };
    let (base_url, _requests) = spawn_gas_server(respond).await;
    let out = tempfile::tempdir().expect("tempdir");
    let config = test_config(base_url, out.path());

    gas_sync_core::run_sync(config).await.expect("sync run");

    let archive = read_json(&out.path().join("archive.json"));
    assert_eq!(archive["rows"].as_array().expect("rows").len(), 10);
    assert_eq!(archive["total"], json!(10));

    let meta = read_json(&out.path().join("meta.json"));
    assert_eq!(meta["counts"]["archive"], json!(10));
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_archive_keeps_the_previous_artifact() {
    let respond = |sheet: &str, limit: u32, _offset: u64| {
        if sheet != "archive" {
            return core_body(sheet);
        }
        if limit == 1 {
            return (
                StatusCode::OK,
                json!({ "ok": true, "sheet": "archive", "rows": [["x", "y", "k", "d", "u"]] })
                    .to_string(),
            );
        }
        (
            StatusCode::OK,
            json!({ "ok": false, "error": "引数が大きすぎます" }).to_string(),
        )
    };
    let (base_url, _requests) = spawn_gas_server(respond).await;
    let out = tempfile::tempdir().expect("tempdir");
    let stale = "{ \"ok\": true, \"stale\": true }\n";
    std::fs::write(out.path().join("archive.json"), stale).expect("seed stale artifact");

    let config = test_config(base_url, out.path());
    gas_sync_core::run_sync(config).await.expect("sync run");

    let kept = std::fs::read_to_string(out.path().join("archive.json")).expect("read archive");
    assert_eq!(kept, stale);

    let meta = read_json(&out.path().join("meta.json"));
    assert_eq!(meta["tabs"], json!(["songs", "gags", "archive"]));
    assert_eq!(meta["counts"]["archive"], Value::Null);
    assert_eq!(meta["counts"]["songs"], json!(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn core_tab_failure_aborts_before_the_manifest() {
    let respond = |_sheet: &str, _limit: u32, _offset: u64| {
        (StatusCode::INTERNAL_SERVER_ERROR, "upstream broke".to_string())
    };
    let (base_url, _requests) = spawn_gas_server(respond).await;
    let out = tempfile::tempdir().expect("tempdir");
    let config = test_config(base_url, out.path());

    let err = gas_sync_core::run_sync(config)
        .await
        .expect_err("songs tab down");

    assert!(
        format!("{err:#}").contains("failed to sync songs"),
        "unexpected error: {err:#}"
    );
    assert!(!out.path().join("meta.json").exists());
    assert!(!out.path().join("songs.json").exists());
}
