use assert_cmd::Command;
use chrono::{TimeZone, Utc};
use gigstore::init::initialize;
use gigstore::model::{Gig, GigStatus};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn gigstore(data: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gigstore").unwrap();
    cmd.env_remove("GIGSTORE_DATA")
        .env_remove("RUST_LOG")
        .arg("--data")
        .arg(data);
    cmd
}

fn seed_gig(data: &Path, gig: Gig) {
    let ctx = initialize(data, Some(data.to_path_buf()));
    ctx.api.gigs().save(&gig).unwrap();
}

fn gig_on(id: &str, day: u32) -> Gig {
    let mut gig = Gig::new(id, "9", "Logo design");
    gig.created_at = Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap();
    gig
}

#[test]
fn resolve_prints_the_date_shard() {
    let temp = TempDir::new().unwrap();
    seed_gig(temp.path(), gig_on("g1", 5));

    gigstore(temp.path())
        .args(["resolve", "gig", "g1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2024/03/05/g1"))
        .stdout(predicate::str::contains("(index)"));
}

#[test]
fn show_missing_document_fails() {
    let temp = TempDir::new().unwrap();

    gigstore(temp.path())
        .args(["show", "gig", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error:"));
}

#[test]
fn json_listing_is_machine_readable() {
    let temp = TempDir::new().unwrap();
    seed_gig(temp.path(), gig_on("g1", 5));
    seed_gig(temp.path(), gig_on("g2", 6));

    let output = gigstore(temp.path())
        .args(["--json", "list", "gigs"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = value["listed"]
        .as_array()
        .unwrap()
        .iter()
        .map(|doc| doc["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["g2", "g1"]);
}

#[test]
fn match_then_validate_is_clean() {
    let temp = TempDir::new().unwrap();
    seed_gig(temp.path(), gig_on("g1", 5));

    gigstore(temp.path())
        .args([
            "match",
            "--gig",
            "g1",
            "--freelancer",
            "7",
            "--commissioner",
            "9",
            "--task",
            "Sketches",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("created with 1 task(s)"))
        .stdout(predicate::str::contains("Sketches"));

    gigstore(temp.path())
        .args(["validate", "--strict"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No inconsistencies found"));
}

#[test]
fn validate_reports_orphaned_gig_and_strict_fails() {
    let temp = TempDir::new().unwrap();
    let mut gig = gig_on("g1", 5);
    gig.status = GigStatus::Unavailable;
    seed_gig(temp.path(), gig);

    gigstore(temp.path())
        .arg("validate")
        .assert()
        .success()
        .stderr(predicate::str::contains("UNAVAILABLE_GIG_WITHOUT_PROJECT"));

    gigstore(temp.path())
        .args(["validate", "--strict"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("1 inconsistency(ies) found"));
}

#[test]
fn migrate_dry_run_then_for_real() {
    let temp = TempDir::new().unwrap();
    let legacy = temp.path().join("gigs").join("g9");
    fs::create_dir_all(&legacy).unwrap();
    fs::write(
        legacy.join("gig.json"),
        r#"{"id":"g9","commissionerId":"9","title":"Old","status":"Available","createdAt":"2023-11-02T08:00:00Z"}"#,
    )
    .unwrap();
    let shard = temp
        .path()
        .join("gigs/2023/11/02/g9/gig.json");

    gigstore(temp.path())
        .args(["migrate", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[dry run]"));
    assert!(!shard.exists());

    gigstore(temp.path()).arg("migrate").assert().success();
    assert!(shard.exists());
    assert!(legacy.join("gig.json").exists());
    assert!(legacy.join("_migrated.README").exists());

    gigstore(temp.path())
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to migrate"));
}

#[test]
fn reindex_restores_a_deleted_index() {
    let temp = TempDir::new().unwrap();
    seed_gig(temp.path(), gig_on("g1", 5));
    fs::remove_file(temp.path().join("gigs/gigs-index.json")).unwrap();

    gigstore(temp.path())
        .args(["reindex", "gig"])
        .assert()
        .success();
    assert!(temp.path().join("gigs/gigs-index.json").exists());
}

#[test]
fn bare_config_prints_resolved_values() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("gigstore.toml"), "index_ttl_secs = 5\n").unwrap();

    gigstore(temp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("index_ttl_secs = 5"))
        .stdout(predicate::str::contains("verify_index_writes = true"));
}

#[test]
fn malformed_config_warns_and_uses_defaults() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("gigstore.toml"), "index_ttl_secs = [\n").unwrap();

    gigstore(temp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("verify_index_writes = true"))
        .stderr(predicate::str::contains("ignoring unreadable config"));
}
