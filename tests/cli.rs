use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn nrag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_nrag"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::write(
        root.join("feed.xml"),
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Actu</title>
<item>
  <title>La BCE maintient ses taux</title>
  <link>https://www.lemonde.fr/economie/taux.html</link>
  <description>Les taux directeurs restent inchangés.</description>
  <pubDate>Mon, 04 Mar 2024 08:15:00 +0000</pubDate>
</item>
<item>
  <title>Le chômage recule</title>
  <link>https://www.lemonde.fr/economie/emploi.html</link>
  <description>Le marché du travail se tend.</description>
  <pubDate>Tue, 05 Mar 2024 09:00:00 +0000</pubDate>
</item>
<item>
  <title>Sans date</title>
  <link>https://www.lemonde.fr/economie/sans-date.html</link>
</item>
</channel></rss>
"#,
    )
    .unwrap();
    fs::write(
        root.join("feeds.txt"),
        format!("file://{}\n", root.join("feed.xml").display()),
    )
    .unwrap();

    let config_content = format!(
        r#"[paths]
feed_list = "{root}/feeds.txt"
document_root = "{root}/data/news"
document_index = "{root}/data/news.sqlite"
entity_root = "{root}/data/wiki"
entity_index = "{root}/data/wiki.sqlite"

[embedding]
provider = "hashing"
model = "bow"
dims = 128

[generation]
provider = "ollama"
model = "mistral"
request_timeout_secs = 5
url = "http://127.0.0.1:9"

[chat]
token_limit = 500

[annotation]
input_token_limit = 1000

[indexing]
doc_limit = 0
num_workers = 2
span_max_tokens = 128

[retrieval]
span_top_k = 5
table_cells_maxchars = 200
max_displayed_concepts = 5
max_concept_desc_len = 80

[entities]
max_filename_len = 50
"#,
        root = root.display()
    );

    let config_path = root.join("newsrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_nrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = nrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "newsrag=warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run nrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_invalid_scope_aborts_before_touching_indexes() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, success) = run_nrag(&config, &["reindex", "everything"]);
    assert!(!success);
    assert!(stderr.contains("everything"), "stderr: {}", stderr);
    assert!(!tmp.path().join("data/news.sqlite").exists());
    assert!(!tmp.path().join("data/wiki.sqlite").exists());
    assert!(!tmp.path().join("data/news").exists());
}

#[test]
fn test_ingest_is_idempotent() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, success) = run_nrag(&config, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("created: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("ok"));
    assert!(tmp.path().join("data/news/2024/3/4/8").is_dir());

    let (stdout, _, success) = run_nrag(&config, &["ingest"]);
    assert!(success);
    assert!(stdout.contains("created: 0"), "stdout: {}", stdout);
    assert!(stdout.contains("already present: 2"), "stdout: {}", stdout);
}

#[test]
fn test_search_requires_an_index() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_nrag(&config, &["search", "taux"]);
    assert!(!success);
    assert!(stderr.contains("reindex"), "stderr: {}", stderr);
}

#[test]
fn test_reindex_then_search() {
    let (tmp, config) = setup_test_env();

    // The generation server is unreachable: annotations degrade to empty
    // and the rebuild still completes.
    let (stdout, stderr, success) = run_nrag(&config, &["reindex", "both", "--progress", "off"]);
    assert!(success, "reindex failed: {}", stderr);
    assert!(stdout.contains("reindex documents"), "stdout: {}", stdout);
    assert!(stdout.contains("indexed: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("reindex entities"), "stdout: {}", stdout);
    assert!(tmp.path().join("data/news.sqlite").exists());
    assert!(tmp.path().join("data/wiki.sqlite").exists());

    let (stdout, stderr, success) = run_nrag(&config, &["search", "taux directeurs BCE"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.starts_with("<table><tr><th>Sélection</th>"));
    assert_eq!(stdout.matches("append_docs(this)").count(), 2);
    assert!(stdout.contains("La BCE maintient ses taux"));

    let query_file = tmp.path().join("query.txt");
    fs::write(&query_file, "Le marché du travail").unwrap();
    let (stdout, _, success) = run_nrag(
        &config,
        &["search", "--file", query_file.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("Le chômage recule"));

    let (stdout, _, success) = run_nrag(&config, &["extend", "BCE"]);
    assert!(success);
    assert!(stdout.starts_with("<table><tr><th>sélection</th>"));
    assert_eq!(stdout.matches("append_query(this)").count(), 0);

    let (_, _, success) = run_nrag(&config, &["search", "c7 taux"]);
    assert!(!success);
}

#[test]
fn test_reindex_legacy_scope_name() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_nrag(&config, &["reindex", "wiki", "--progress", "off"]);
    assert!(success, "reindex failed: {}", stderr);
    assert!(stdout.contains("reindex entities"));
    assert!(!stdout.contains("reindex documents"));
    assert!(tmp.path().join("data/wiki.sqlite").exists());
    assert!(!tmp.path().join("data/news.sqlite").exists());
}
