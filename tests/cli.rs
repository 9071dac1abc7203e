// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

const FOX: &str = "The quick brown fox. It jumps over the lazy dog.";

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join(".ragcore.toml"),
        r#"
[chunking]
max_chunk_size = 20
overlap_size = 5

[embeddings]
backend = "hash"
"#,
    );
    dir
}

fn ragcore(root: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("ragcore");
    cmd.current_dir(root)
        .env("RAGCORE_EMBED_BACKEND", "hash")
        .env("NO_COLOR", "1")
        .env_remove("RAGCORE_LOG");
    cmd
}

fn run_json(root: &Path, args: &[&str]) -> Value {
    let output = ragcore(root)
        .args(args)
        .args(["--format", "json"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn ingest_then_retrieve_returns_fox_chunk() {
    let dir = workspace();
    write_file(&dir.path().join("fox.txt"), FOX);

    ragcore(dir.path())
        .args(["ingest", "fox.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fox.txt (3 chunks)"));

    let hits = run_json(dir.path(), &["retrieve", "fox", "-k", "1"]);
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["record_id"], "fox.txt:0");
    assert!(hits[0]["text"].as_str().unwrap().contains("quick brown fox"));
    assert_eq!(hits[0]["metadata"]["source_id"], "fox.txt");

    assert!(dir.path().join(".ragcore").join("vectors.sqlite").exists());
}

#[test]
fn ingest_directory_reports_each_document() {
    let dir = workspace();
    write_file(&dir.path().join("docs").join("a.txt"), FOX);
    write_file(&dir.path().join("docs").join("nested").join("b.md"), "A short note.");
    write_file(&dir.path().join("docs").join("skip.bin"), "binary");

    let results = run_json(dir.path(), &["ingest", "docs"]);
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["chunks"], 3);
    assert_eq!(results[1]["chunks"], 1);
    assert!(results.iter().all(|r| r.get("error").is_none()));

    let stats = run_json(dir.path(), &["stats"]);
    assert_eq!(stats["collection"], "documents");
    assert_eq!(stats["exists"], true);
    assert_eq!(stats["dimension"], 384);
    assert_eq!(stats["records"], 4);
}

#[test]
fn source_id_override_and_remove() {
    let dir = workspace();
    write_file(&dir.path().join("fox.txt"), FOX);
    write_file(&dir.path().join("dog.txt"), "dogs bark loudly");

    ragcore(dir.path())
        .args(["ingest", "fox.txt", "--source-id", "handbook"])
        .assert()
        .success();
    ragcore(dir.path()).args(["ingest", "dog.txt"]).assert().success();

    let filtered = run_json(dir.path(), &["retrieve", "dogs", "-k", "10", "--source", "handbook"]);
    let filtered = filtered.as_array().unwrap();
    assert_eq!(filtered.len(), 3);
    assert!(filtered.iter().all(|hit| hit["metadata"]["source_id"] == "handbook"));

    let removed = run_json(dir.path(), &["remove", "handbook"]);
    assert_eq!(removed["removed"], 3);

    let hits = run_json(dir.path(), &["retrieve", "fox", "-k", "10"]);
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["record_id"], "dog.txt:0");
}

#[test]
fn source_id_requires_single_file() {
    let dir = workspace();
    write_file(&dir.path().join("a.txt"), "alpha");
    write_file(&dir.path().join("b.txt"), "beta");

    ragcore(dir.path())
        .args(["ingest", "a.txt", "b.txt", "--source-id", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--source-id"));
}

#[test]
fn ingest_missing_path_fails() {
    let dir = workspace();
    ragcore(dir.path())
        .args(["ingest", "missing.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("path not found"));
}

#[test]
fn collections_list_and_drop() {
    let dir = workspace();
    write_file(&dir.path().join("fox.txt"), FOX);
    ragcore(dir.path()).args(["ingest", "fox.txt"]).assert().success();

    let listed = run_json(dir.path(), &["collections", "list"]);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["name"], "documents");
    assert_eq!(listed[0]["metric"], "cosine");
    assert_eq!(listed[0]["model"], "hash-blake3-384");
    assert_eq!(listed[0]["records"], 3);

    ragcore(dir.path())
        .args(["collections", "drop", "documents"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dropped collection documents"));

    ragcore(dir.path())
        .args(["collections", "drop", "documents"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));

    let stats = run_json(dir.path(), &["stats"]);
    assert_eq!(stats["exists"], false);
    assert_eq!(stats["records"], 0);
}

#[test]
fn explicit_config_flag_overrides_discovery() {
    let dir = workspace();
    write_file(
        &dir.path().join("custom.toml"),
        r#"
[chunking]
max_chunk_size = 100
overlap_size = 10

[store]
location = "custom/vectors.sqlite"
collection = "notes"
"#,
    );
    write_file(&dir.path().join("fox.txt"), FOX);

    let results = run_json(dir.path(), &["--config", "custom.toml", "ingest", "fox.txt"]);
    assert_eq!(results[0]["chunks"], 1);
    assert!(dir.path().join("custom").join("vectors.sqlite").exists());

    let stats = run_json(dir.path(), &["--config", "custom.toml", "stats"]);
    assert_eq!(stats["collection"], "notes");
    assert_eq!(stats["records"], 1);
}

#[test]
fn invalid_config_is_reported() {
    let dir = workspace();
    write_file(
        &dir.path().join("bad.toml"),
        "[chunking]\nmax_chunk_size = 10\noverlap_size = 10\n",
    );
    write_file(&dir.path().join("fox.txt"), FOX);

    ragcore(dir.path())
        .args(["--config", "bad.toml", "ingest", "fox.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("overlap_size"));
}

#[test]
fn completions_are_generated() {
    let dir = workspace();
    ragcore(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ragcore"));
}
