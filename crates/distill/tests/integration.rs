use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn distill_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_distill"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        root.join("export.json"),
        r#"[
  {
    "id": "conv-1",
    "title": "Borrowing in Rust",
    "platform": "chatgpt",
    "created_at": "2024-05-01T10:00:00Z",
    "messages": [
      {"role": "user", "text": "How does borrowing work?"},
      {"role": "assistant", "text": "Many shared borrows or one mutable borrow."}
    ]
  },
  {
    "id": "topic-1",
    "kind": "topic",
    "platform": "pdf",
    "created_at": 1717200000,
    "messages": [{"role": "document", "text": "Queues decouple producers from consumers."}]
  }
]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/distill.sqlite"

[chunking]
max_chars = 500

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("distill.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_distill(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = distill_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run distill binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn export_path(config_path: &Path) -> String {
    config_path
        .parent()
        .and_then(Path::parent)
        .unwrap()
        .join("export.json")
        .to_str()
        .unwrap()
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_distill(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));
    assert!(tmp.path().join("data/distill.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_distill(&config_path, &["init"]);
    let (_, stderr, second) = run_distill(&config_path, &["init"]);
    assert!(first);
    assert!(second, "second init failed: {}", stderr);
}

#[test]
fn test_import_then_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_distill(&config_path, &["init"]);

    let export = export_path(&config_path);
    let (stdout, stderr, success) = run_distill(&config_path, &["import", &export]);
    assert!(success, "import failed: {}", stderr);
    assert!(stdout.contains("sources imported: 2"));
    assert!(stdout.contains("spans added: 3"));

    let (stdout, _, success) = run_distill(&config_path, &["import", &export]);
    assert!(success);
    assert!(stdout.contains("sources unchanged: 2"));

    let (stdout, stderr, success) = run_distill(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Sources:     2"));
    assert!(stdout.contains("Spans:       3"));
    assert!(stdout.contains("chatgpt"));
    assert!(stdout.contains("pdf"));
}

#[test]
fn test_import_rejects_bad_json() {
    let (tmp, config_path) = setup_test_env();
    run_distill(&config_path, &["init"]);

    let bad = tmp.path().join("bad.json");
    fs::write(&bad, "{ not json").unwrap();
    let (_, stderr, success) = run_distill(&config_path, &["import", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to parse import file"));
}

#[test]
fn test_learnings_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_distill(&config_path, &["init"]);

    let (stdout, stderr, success) = run_distill(&config_path, &["learnings", "--random"]);
    assert!(success, "learnings failed: {}", stderr);
    assert!(stdout.contains("No learnings."));

    let (stdout, _, success) = run_distill(&config_path, &["learnings", "--json"]);
    assert!(success);
    assert_eq!(stdout.trim(), "[]");
}

#[test]
fn test_extract_requires_llm() {
    let (_tmp, config_path) = setup_test_env();
    run_distill(&config_path, &["init"]);

    let (_, stderr, success) = run_distill(&config_path, &["extract", "--all"]);
    assert!(!success);
    assert!(stderr.contains("LLM provider is disabled"));
}

#[test]
fn test_extract_requires_selection() {
    let (_tmp, config_path) = setup_test_env();
    run_distill(&config_path, &["init"]);

    let (_, stderr, success) = run_distill(&config_path, &["extract"]);
    assert!(!success);
    assert!(stderr.contains("--all or at least one --id"));
}

#[test]
fn test_search_requires_embeddings() {
    let (_tmp, config_path) = setup_test_env();
    run_distill(&config_path, &["init"]);

    let (_, stderr, success) = run_distill(&config_path, &["search", "borrowing"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"));
}

#[test]
fn test_embed_requires_provider() {
    let (_tmp, config_path) = setup_test_env();
    run_distill(&config_path, &["init"]);

    let (_, stderr, success) = run_distill(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("Embedding provider is disabled"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_distill(&missing, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("distill.toml");
    fs::write(
        &config_path,
        "[db]\npath = \"x.sqlite\"\n\n[embedding]\nprovider = \"openai\"\n",
    )
    .unwrap();

    let (_, stderr, success) = run_distill(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("embedding.dims"));
}
