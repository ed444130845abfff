use chrono::{TimeZone, Utc};
use gigstore::config::StoreConfig;
use gigstore::migrate::MigrateOptions;
use gigstore::model::{EntityId, Gig, Project};
use gigstore::store::atomic::{StagedWrite, TEMP_PREFIX};
use gigstore::store::fs_backend::FsBackend;
use gigstore::store::{IndexMap, ResolveSource};
use gigstore::Marketplace;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn open(root: &Path) -> Marketplace<FsBackend> {
    Marketplace::new(FsBackend::new(root), StoreConfig::default())
}

fn gig_on(id: &str, day: u32) -> Gig {
    let mut gig = Gig::new(id, "9", "Logo");
    gig.created_at = Utc.with_ymd_and_hms(2024, 3, day, 9, 30, 0).unwrap();
    gig
}

fn read_index(root: &Path) -> IndexMap {
    let bytes = fs::read(root.join("gigs/gigs-index.json")).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[test]
fn test_staged_write_leaves_destination_intact_until_commit() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("gigs/2024/03/05/g1/gig.json");
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    fs::write(&dest, br#"{"old":true}"#).unwrap();

    let staged = StagedWrite::stage(&dest, br#"{"new":true}"#).unwrap();
    assert_eq!(fs::read(&dest).unwrap(), br#"{"old":true}"#);
    assert!(staged.temp_path().exists());

    // Crash before the rename: the temp file goes away, the old content stays.
    let tmp = staged.temp_path().to_path_buf();
    drop(staged);
    assert!(!tmp.exists());
    assert_eq!(fs::read(&dest).unwrap(), br#"{"old":true}"#);

    StagedWrite::stage(&dest, br#"{"new":true}"#)
        .unwrap()
        .commit()
        .unwrap();
    assert_eq!(fs::read(&dest).unwrap(), br#"{"new":true}"#);
    let leftovers = fs::read_dir(dest.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_save_shards_by_creation_date() {
    let temp = TempDir::new().unwrap();
    let market = open(temp.path());

    let rel = market.gigs().save(&gig_on("g1", 5)).unwrap();
    assert_eq!(rel, "2024/03/05/g1");
    assert!(temp.path().join("gigs/2024/03/05/g1/gig.json").is_file());
    assert_eq!(read_index(temp.path())["g1"].path, "2024/03/05/g1");
}

#[test]
fn test_resolver_order_index_then_scan_then_legacy() {
    let temp = TempDir::new().unwrap();
    let market = open(temp.path());
    market.gigs().save(&gig_on("g1", 5)).unwrap();

    let found = market.gigs().resolve(&"g1".into()).unwrap();
    assert_eq!(found.source, ResolveSource::Index);

    // Without an index the hierarchy is scanned.
    fs::remove_file(temp.path().join("gigs/gigs-index.json")).unwrap();
    let market = open(temp.path());
    let found = market.gigs().resolve(&"g1".into()).unwrap();
    assert_eq!(found.source, ResolveSource::Scan);
    assert_eq!(found.path, "2024/03/05/g1");

    // A flat legacy document is the last resort.
    let legacy = temp.path().join("gigs/g2");
    fs::create_dir_all(&legacy).unwrap();
    fs::write(
        legacy.join("gig.json"),
        r#"{"id":"g2","commissionerId":"9","title":"Old","status":"Available","createdAt":"2023-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    let found = market.gigs().resolve(&"g2".into()).unwrap();
    assert_eq!(found.source, ResolveSource::LegacyFallback);
    assert_eq!(found.path, "g2");
}

#[test]
fn test_stale_index_entry_heals_on_read() {
    let temp = TempDir::new().unwrap();
    let market = open(temp.path());
    market.gigs().save(&gig_on("g1", 5)).unwrap();

    // Point the index at a shard that does not exist.
    let mut index = read_index(temp.path());
    index.get_mut("g1").unwrap().path = "2020/01/01/g1".to_string();
    fs::write(
        temp.path().join("gigs/gigs-index.json"),
        serde_json::to_vec(&index).unwrap(),
    )
    .unwrap();

    let market = open(temp.path());
    let gig = market.gigs().read(&"g1".into()).unwrap();
    assert_eq!(gig.title, "Logo");
    assert_eq!(read_index(temp.path())["g1"].path, "2024/03/05/g1");
}

#[test]
fn test_delete_removes_document_and_index_entry() {
    let temp = TempDir::new().unwrap();
    let market = open(temp.path());
    market.gigs().save(&gig_on("g1", 5)).unwrap();

    market.gigs().delete(&"g1".into()).unwrap();
    assert!(market.gigs().read(&"g1".into()).is_none());
    assert!(!read_index(temp.path()).contains_key("g1"));
    assert!(market.gigs().delete(&"g1".into()).unwrap_err().is_not_found());
}

#[test]
fn test_migration_is_idempotent_on_disk() {
    let temp = TempDir::new().unwrap();
    let legacy = temp.path().join("projects/p1");
    fs::create_dir_all(legacy.join("tasks")).unwrap();
    fs::write(
        legacy.join("project.json"),
        r#"{"id":"p1","freelancerId":"7","commissionerId":"9","title":"Site","status":"ongoing","createdAt":"2023-06-15T10:00:00Z"}"#,
    )
    .unwrap();
    fs::write(
        legacy.join("tasks/t1.json"),
        r#"{"id":"t1","projectId":"p1","title":"Wireframes","createdAt":"2023-06-15T10:00:00Z"}"#,
    )
    .unwrap();

    let market = open(temp.path());
    let dry = market.migrate_all(MigrateOptions { dry_run: true });
    assert_eq!(dry.total.migrated, 1);
    assert!(!temp.path().join("projects/2023").exists());

    let first = market.migrate_all(MigrateOptions::default());
    assert_eq!(first.total.migrated, 1);
    assert!(first.total.errors.is_empty());
    let shard = temp.path().join("projects/2023/06/15/p1");
    assert!(shard.join("project.json").is_file());
    assert!(shard.join("tasks/t1.json").is_file());
    assert!(legacy.join("project.json").is_file());
    assert!(legacy.join("_migrated.README").is_file());

    let second = open(temp.path()).migrate_all(MigrateOptions::default());
    assert!(!second.total.has_changes());
    assert_eq!(second.total.skipped, 1);

    let market = open(temp.path());
    let project: Project = market.projects().read(&"p1".into()).unwrap();
    assert_eq!(project.title, "Site");
    assert_eq!(
        market.projects().resolve(&"p1".into()).unwrap().source,
        ResolveSource::Index
    );
    assert_eq!(market.projects().read_tasks(&EntityId::from("p1")).len(), 1);
}

#[test]
fn test_resave_on_another_day_leaves_one_document() {
    let temp = TempDir::new().unwrap();
    let market = open(temp.path());
    market.gigs().save(&gig_on("g1", 5)).unwrap();

    let rel = market.gigs().save(&gig_on("g1", 9)).unwrap();
    assert_eq!(rel, "2024/03/09/g1");
    assert!(!temp.path().join("gigs/2024/03/05").exists());
    assert_eq!(read_index(temp.path())["g1"].path, "2024/03/09/g1");

    fs::remove_file(temp.path().join("gigs/gigs-index.json")).unwrap();
    let market = open(temp.path());
    assert_eq!(market.gigs().read_all().len(), 1);

    market.gigs().delete(&"g1".into()).unwrap();
    assert!(market.gigs().read(&"g1".into()).is_none());
    assert!(market.gigs().read_all().is_empty());
}

#[test]
fn test_migration_normalizes_date_only_timestamp() {
    let temp = TempDir::new().unwrap();
    let legacy = temp.path().join("gigs/g3");
    fs::create_dir_all(&legacy).unwrap();
    fs::write(
        legacy.join("gig.json"),
        r#"{"id":"g3","commissionerId":"9","title":"Old","status":"Available","createdAt":"2023-02-14"}"#,
    )
    .unwrap();

    let report = open(temp.path()).migrate_all(MigrateOptions::default());
    assert_eq!(report.total.migrated, 1);
    assert!(report.total.errors.is_empty());

    let market = open(temp.path());
    let gig = market.gigs().read(&"g3".into()).unwrap();
    assert_eq!(gig.created_at, Utc.with_ymd_and_hms(2023, 2, 14, 0, 0, 0).unwrap());
    assert_eq!(market.gigs().read_all().len(), 1);
    assert!(temp.path().join("gigs/2023/02/14/g3/gig.json").is_file());
}
