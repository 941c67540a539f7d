use assert_cmd::Command;
use predicates::prelude::*;

fn dpt(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dpt").unwrap();
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

fn init(dir: &tempfile::TempDir) {
    dpt(dir).arg("init").assert().success();
}

#[test]
fn init_writes_config_and_database() {
    let dir = tempfile::tempdir().unwrap();
    dpt(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized dpt database"));

    assert!(dir.path().join("dpt.toml").exists());
    assert!(dir.path().join("dpt.db").exists());

    // A second init keeps the existing config.
    dpt(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote").not());
}

#[test]
fn init_honours_custom_database_location() {
    let dir = tempfile::tempdir().unwrap();
    dpt(&dir)
        .args(["init", "--db", "state/provenance.db"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized dpt database"));
    assert!(dir.path().join("state/provenance.db").exists());
    assert!(!dir.path().join("dpt.db").exists());
}

#[test]
fn track_then_lineage() {
    let dir = tempfile::tempdir().unwrap();
    init(&dir);
    std::fs::write(dir.path().join("raw.csv"), "a,b\n1,2\n").unwrap();
    std::fs::write(dir.path().join("clean.csv"), "a,b\n1,2\n").unwrap();

    dpt(&dir)
        .args(["track", "raw.csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("as data product 1"));
    dpt(&dir)
        .args(["track", "clean.csv", "--parent", "raw.csv"])
        .assert()
        .success();

    dpt(&dir)
        .args(["lineage", "clean.csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("raw.csv"))
        .stdout(predicate::str::contains("clean.csv"))
        .stdout(predicate::str::contains("2 products"));

    dpt(&dir)
        .args(["status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"data_products\": 2"))
        .stdout(predicate::str::contains("\"dependencies\": 1"))
        .stdout(predicate::str::contains("\"environments\": 1"));
}

#[test]
fn lineage_shortens_non_ascii_hashes_by_character() {
    let dir = tempfile::tempdir().unwrap();
    init(&dir);
    std::fs::write(dir.path().join("f.csv"), "x\n").unwrap();

    dpt(&dir)
        .args(["track", "f.csv", "--hash", "aééééééééééééé"])
        .assert()
        .success();
    dpt(&dir)
        .args(["lineage", "f.csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("aééééééééééé"))
        .stdout(predicate::str::contains("aéééééééééééé").not());
}

#[test]
fn untracked_parent_on_disk_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    init(&dir);
    std::fs::write(dir.path().join("input.txt"), "in").unwrap();
    std::fs::write(dir.path().join("output.txt"), "out").unwrap();

    dpt(&dir)
        .args(["track", "output.txt", "-p", "input.txt"])
        .assert()
        .success();
    dpt(&dir)
        .args(["status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"data_products\": 2"));
}

#[test]
fn cyclic_dependency_exits_with_cycle_code() {
    let dir = tempfile::tempdir().unwrap();
    init(&dir);
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    std::fs::write(dir.path().join("b.txt"), "b").unwrap();

    dpt(&dir).args(["track", "a.txt"]).assert().success();
    dpt(&dir)
        .args(["track", "b.txt", "-p", "a.txt"])
        .assert()
        .success();
    dpt(&dir)
        .args(["track", "a.txt", "-p", "b.txt"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("cycle"));
}

#[test]
fn missing_parent_fails() {
    let dir = tempfile::tempdir().unwrap();
    init(&dir);
    std::fs::write(dir.path().join("out.txt"), "x").unwrap();

    dpt(&dir)
        .args(["track", "out.txt", "-p", "nowhere.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn env_is_reused_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    init(&dir);

    dpt(&dir)
        .args(["env", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"created\": true"));
    dpt(&dir)
        .args(["env", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"created\": false"));
}

#[test]
fn status_without_database_is_database_error() {
    let dir = tempfile::tempdir().unwrap();
    dpt(&dir)
        .arg("status")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("dpt init"));
}

#[test]
fn invalid_config_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("dpt.toml"), "[store]\npath = 42\n").unwrap();
    dpt(&dir).arg("status").assert().code(2);
}

#[test]
fn lineage_of_untracked_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    init(&dir);
    dpt(&dir)
        .args(["lineage", "ghost.csv"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No data product recorded"));
}
