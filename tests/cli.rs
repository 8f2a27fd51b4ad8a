use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn qms_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("qms");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("procedures");
    fs::create_dir_all(docs_dir.join("design")).unwrap();
    fs::write(
        docs_dir.join("design/sop-design-change.md"),
        "# 7.3.9 Design change control\n\nEvery design change needs a change request.\n\n# Risk\n\nThe risk analysis is updated before release.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("sop-capa.txt"),
        "Corrective and preventive actions are opened within five days of a complaint.",
    )
    .unwrap();
    fs::write(docs_dir.join("scan.pdf"), [0x25_u8, 0x50, 0x44, 0x46]).unwrap();

    let config_content = format!(
        r#"[chunking]
chunk_size = 120
overlap = 20

[embedding]
provider = "hash"
dims = 128

[model]
provider = "disabled"

[documents]
root = "{}/procedures"

[history]
path = "{}/data/reviews.jsonl"
"#,
        root.display(),
        root.display()
    );
    let config_path = config_dir.join("qms.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_qms(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(qms_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run qms");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_ingest_dry_run() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_qms(&config, &["ingest", "--dry-run"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.starts_with("2 documents"), "unexpected: {}", stdout);
    assert!(stdout.contains("0 indexed"));
    assert!(stdout.contains("[dry run]"));
}

#[test]
fn test_ingest_indexes_everything() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_qms(&config, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("0 failed"));
    assert!(!stdout.contains(" 0 indexed"));
}

#[test]
fn test_search_ranks_matching_procedure_first() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) =
        run_qms(&config, &["search", "corrective and preventive actions", "--limit", "2"]);
    assert!(success, "search failed: {}", stderr);
    let first = stdout.lines().next().unwrap();
    assert!(first.starts_with("1. ["));
    assert!(first.contains("sop-capa.txt"), "unexpected: {}", stdout);
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config) = setup_test_env();
    let (first, _, _) = run_qms(&config, &["search", "design change request"]);
    let (second, _, _) = run_qms(&config, &["search", "design change request"]);
    assert_eq!(first, second);
}

#[test]
fn test_status() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_qms(&config, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("initialized:      true"));
    assert!(stdout.contains("capacity:         10000"));
}

#[test]
fn test_review_with_disabled_model_fails_and_is_recorded() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, success) = run_qms(&config, &["review", "Add a fever alarm"]);
    assert!(!success);
    assert!(stderr.contains("aborted"), "unexpected: {}", stderr);

    let history = fs::read_to_string(tmp.path().join("data/reviews.jsonl")).unwrap();
    assert!(history.lines().next().unwrap().contains("\"phase\":\"SYNTHESIS\""));

    let (stdout, _, success) = run_qms(&config, &["history"]);
    assert!(success);
    assert!(stdout.contains("SYNTHESIS"));
    assert!(stdout.contains("Add a fever alarm"));
}

#[test]
fn test_history_empty() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_qms(&config, &["history"]);
    assert!(success);
    assert!(stdout.contains("No reviews recorded."));
}

#[test]
fn test_missing_config_fails() {
    let (_, stderr, success) = run_qms(Path::new("/definitely/not/here.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
