use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mingest_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mingest"))
}

fn setup_test_env(resolver: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_dir = tmp.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        config_dir.join("settings.json"),
        r#"{
  "api_url": "http://127.0.0.1:9/download",
  "payload_template": {"format": "CSV", "region": "DE-LU", "type": "discrete", "language": "de", "resolution": ""}
}"#,
    )
    .unwrap();

    fs::write(
        config_dir.join("categories.json"),
        r#"{"main": [
  {"name": "MM-Name.Stromerzeugung", "sub": [
    {"name": "MM-Name.Realisierte Erzeugung", "module": {
      "default": [{"id": 1001224, "region": ["DE-LU", "AT"]}],
      "other": [{"id": 1, "region": ["DE-LU"]}, {"id": 2, "region": ["AT"]}]
    }}
  ]}
]}"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[provider]
settings_path = "settings.json"
categories_path = "categories.json"

{}

[object_store]
bucket = "market-raw"
project = "energy"

[warehouse]
project = "energy"
dataset = "smard"
"#,
        resolver
    );
    let config_path = config_dir.join("mingest.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mingest(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mingest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("GCP_ACCESS_TOKEN")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mingest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_resolve_exact_with_namespace() {
    let (_tmp, config) = setup_test_env(
        "[resolver]\nmatch = \"exact\"\nnamespace = \"MM-Name.\"\nbuckets = \"default_and_other\"",
    );
    let (stdout, stderr, ok) = run_mingest(
        &config,
        &["resolve", "--main", "Stromerzeugung", "--sub", "Realisierte Erzeugung"],
    );
    assert!(ok, "resolve failed: {}", stderr);
    let ids: Vec<&str> = stdout.lines().collect();
    assert_eq!(ids, vec!["1001224", "1"]);
}

#[test]
fn test_resolve_contains_other_only_with_region() {
    let (_tmp, config) =
        setup_test_env("[resolver]\nmatch = \"contains\"\nbuckets = \"other_only\"");
    let (stdout, stderr, ok) = run_mingest(
        &config,
        &[
            "resolve",
            "--main",
            "Stromerzeugung",
            "--sub",
            "Realisierte",
            "--region",
            "AT",
        ],
    );
    assert!(ok, "resolve failed: {}", stderr);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["2"]);
}

#[test]
fn test_resolve_no_match_is_not_an_error() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, _stderr, ok) = run_mingest(
        &config,
        &["resolve", "--main", "Stromverbrauch", "--sub", "Netzlast"],
    );
    assert!(ok);
    assert!(stdout.trim().is_empty());
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_stdout, stderr, ok) = run_mingest(
        &tmp.path().join("nope.toml"),
        &["resolve", "--main", "a", "--sub", "b"],
    );
    assert!(!ok);
    assert!(stderr.contains("nope.toml"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_value_fails() {
    let (_tmp, config) = setup_test_env("[staging]\nchunk_size = 0");
    let (_stdout, stderr, ok) =
        run_mingest(&config, &["resolve", "--main", "a", "--sub", "b"]);
    assert!(!ok);
    assert!(stderr.contains("chunk_size"), "stderr: {}", stderr);
}

#[test]
fn test_run_without_token_fails_before_download() {
    let (_tmp, config) = setup_test_env("");
    let (_stdout, stderr, ok) = run_mingest(
        &config,
        &[
            "run",
            "--start",
            "15.01.2024",
            "--main",
            "Stromerzeugung",
            "--sub",
            "Realisierte Erzeugung",
            "--progress",
            "off",
        ],
    );
    assert!(!ok);
    assert!(stderr.contains("GCP_ACCESS_TOKEN"), "stderr: {}", stderr);
}

#[test]
fn test_run_rejects_reversed_dates() {
    let (_tmp, config) = setup_test_env("");
    let (_stdout, stderr, ok) = run_mingest(
        &config,
        &[
            "run",
            "--start",
            "15.01.2024",
            "--end",
            "14.01.2024",
            "--main",
            "Stromerzeugung",
            "--sub",
            "Realisierte Erzeugung",
        ],
    );
    assert!(!ok);
    assert!(stderr.contains("before start"), "stderr: {}", stderr);
}
