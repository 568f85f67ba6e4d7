use axum::{routing::post, Json, Router};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn blip_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("blip");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    setup_test_env_with_feed("http://127.0.0.1:9/api/messagethread")
}

fn setup_test_env_with_feed(feed_url: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/blip.sqlite"

[source]
base_url = "{}"

[server]
bind = "127.0.0.1:7341"
"#,
        root.display(),
        feed_url
    );

    let config_path = config_dir.join("blip.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn blip_command(config_path: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(blip_binary());
    cmd.arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env_remove("GOOGLE_PLACES_API_KEY")
        .env_remove("CRON_SECRET");
    cmd
}

fn run(mut cmd: Command) -> (String, String, bool) {
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run blip binary at {:?}: {}", blip_binary(), e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_blip(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run(blip_command(config_path, args))
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_blip(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/blip.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_blip(&config_path, &["init"]);
    assert!(success);
    let (_, stderr, success) = run_blip(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_incidents_empty_database() {
    let (_tmp, config_path) = setup_test_env();
    run_blip(&config_path, &["init"]);

    let (stdout, stderr, success) = run_blip(&config_path, &["incidents"]);
    assert!(success, "incidents failed: {}", stderr);
    assert!(stdout.contains("No incidents since"));
}

#[test]
fn test_incidents_json() {
    let (_tmp, config_path) = setup_test_env();
    run_blip(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_blip(&config_path, &["incidents", "--since", "2024-03-01", "--json"]);
    assert!(success, "incidents --json failed: {}", stderr);

    let body: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(body["fromDate"], "2024-03-01T00:00:00Z");
    assert!(body["markerData"].as_array().unwrap().is_empty());
}

#[test]
fn test_incidents_rejects_bad_since() {
    let (_tmp, config_path) = setup_test_env();
    run_blip(&config_path, &["init"]);

    let (_, stderr, success) = run_blip(&config_path, &["incidents", "--since", "soon"]);
    assert!(!success);
    assert!(stderr.contains("invalid date"));
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_blip(&config_path, &["init"]);

    let (stdout, stderr, success) = run_blip(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("total:      0"));
    assert!(stdout.contains("last write: never"));
}

#[test]
fn test_districts_without_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, stderr, success) = run_blip(&missing, &["districts"]);
    assert!(success, "districts failed: {}", stderr);
    assert!(stdout.contains("Oslo Politidistrikt"));
    assert!(stdout.contains("Troms Politidistrikt"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_blip(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config_path) = setup_test_env();
    let mut content = fs::read_to_string(&config_path).unwrap();
    content.push_str("\n[extraction]\nbatch_size = 0\n");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_blip(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("extraction.batch_size must be > 0"));
}

#[test]
fn test_sync_requires_api_key() {
    let (_tmp, config_path) = setup_test_env();
    run_blip(&config_path, &["init"]);

    let (_, stderr, success) = run_blip(&config_path, &["sync"]);
    assert!(!success);
    assert!(stderr.contains("OPENAI_API_KEY"));
}

#[test]
fn test_serve_requires_cron_secret() {
    let (_tmp, config_path) = setup_test_env();

    let mut cmd = blip_command(&config_path, &["serve"]);
    cmd.env("OPENAI_API_KEY", "sk-test")
        .env("GOOGLE_PLACES_API_KEY", "places-key");
    let (_, stderr, success) = run(cmd);
    assert!(!success);
    assert!(stderr.contains("CRON_SECRET"));
}

fn feed_thread(id: &str) -> Value {
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    json!({
        "id": id,
        "district": "Oslo Politidistrikt",
        "districtId": 1,
        "category": "Trafikk",
        "municipality": "Oslo",
        "area": null,
        "createdOn": now,
        "updatedOn": now,
        "lastMessageOn": now,
        "isActive": true,
        "messages": [{
            "id": format!("{}-0", id),
            "text": "Collision reported",
            "createdOn": now,
            "updatedOn": now,
            "hasImage": false,
            "previouslyIncludedImage": false,
            "type": "Text"
        }]
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sync_dry_run_needs_no_api_keys() {
    let app = Router::new().route(
        "/api/messagethread",
        post(|| async {
            Json(json!({
                "messageThreads": [feed_thread("t1"), feed_thread("t2")],
                "count": 2
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (_tmp, config_path) =
        setup_test_env_with_feed(&format!("http://{}/api/messagethread", addr));

    let (stdout, stderr, success) = tokio::task::spawn_blocking(move || {
        let (_, stderr, success) = run_blip(&config_path, &["init"]);
        assert!(success, "init failed: {}", stderr);
        run_blip(&config_path, &["sync", "--dry-run"])
    })
    .await
    .unwrap();

    assert!(success, "sync --dry-run failed: {}", stderr);
    assert!(!stderr.contains("OPENAI_API_KEY"));
    assert!(stdout.contains("sync (dry-run)"));
    assert!(stdout.contains("threads fetched: 2"));
    assert!(stdout.contains("new threads: 2"));
    assert!(stdout.contains("active incidents: 0"));
}
