use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::{tempdir, TempDir};

fn create_test_files(dir: &TempDir, files: &[(&str, &str)]) -> Result<()> {
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }
    Ok(())
}

fn fastfind(cwd: &TempDir) -> Result<Command> {
    let mut cmd = Command::cargo_bin("fastfind")?;
    cmd.current_dir(cwd.path())
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .arg("--no-progress");
    Ok(cmd)
}

#[test]
fn test_prints_name_and_content_matches() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(
        &dir,
        &[
            ("src/needle_name.rs", "fn main() {}"),
            ("docs/guide.md", "mentions needle_name once"),
            ("other.txt", "nothing"),
        ],
    )?;

    fastfind(&dir)?
        .arg("needle_name")
        .assert()
        .success()
        .stdout(predicate::str::contains("needle_name.rs"))
        .stdout(predicate::str::contains("guide.md"))
        .stdout(predicate::str::contains("other.txt").not())
        .stdout(predicate::str::contains("2 matches in 3 of 3 files"));
    Ok(())
}

#[test]
fn test_extension_filter_flag() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(
        &dir,
        &[("keep.txt", "needle_value"), ("skip.txtx", "needle_value")],
    )?;

    fastfind(&dir)?
        .args(["needle_value", ".", "--ext", r"\.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("keep.txt"))
        .stdout(predicate::str::contains("skip.txtx").not());
    Ok(())
}

#[test]
fn test_invalid_extension_pattern_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    fastfind(&dir)?
        .args(["needle_value", ".", "--ext", "(unclosed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid pattern"));
    Ok(())
}

#[test]
fn test_missing_root_fails_but_other_roots_run() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("present/hit.txt", "needle_value")])?;

    fastfind(&dir)?
        .args(["needle_value", "absent_dir", "present"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Failed absent_dir"))
        .stdout(predicate::str::contains("hit.txt"))
        .stderr(predicate::str::contains("1 of 2 searches failed"));
    Ok(())
}

#[test]
fn test_stats_only_hides_matches() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("hit.txt", "needle_value"), ("miss.txt", "hay")])?;

    fastfind(&dir)?
        .args(["needle_value", "--stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 matches in 2 of 2 files"))
        .stdout(predicate::str::contains("hit.txt").not());
    Ok(())
}

#[test]
fn test_json_output() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("hit.txt", "needle_value")])?;

    let output = fastfind(&dir)?
        .args(["needle_value", "--json"])
        .output()?;
    assert!(output.status.success());

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let report = &reports[0];
    assert_eq!(report["state"]["state"], "completed");
    assert_eq!(report["scanned_count"], 1);
    assert_eq!(report["matches"][0]["kind"], "content");
    Ok(())
}

#[test]
fn test_local_config_file_is_used() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(
        &dir,
        &[
            ("hit.txt", "needle_value"),
            ("vendor/also.txt", "needle_value"),
            (".fastfind.yaml", "ignore_patterns:\n  - \"**/vendor/**\"\n"),
        ],
    )?;

    fastfind(&dir)?
        .arg("needle_value")
        .assert()
        .success()
        .stdout(predicate::str::contains("hit.txt"))
        .stdout(predicate::str::contains("also.txt").not());
    Ok(())
}
