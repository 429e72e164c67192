use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn mdimg(root: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("mdimg");
    cmd.current_dir(root)
        .env("MDIMG_CONFIG_PATH", root.join("no-config.toml"))
        .env_remove("MDIMG_LOG");
    cmd
}

fn seed_repairable(root: &Path, original: &[u8]) -> std::path::PathBuf {
    fs::create_dir_all(root.join("Pic")).expect("mkdir");
    fs::create_dir_all(root.join("docs")).expect("mkdir");
    fs::write(root.join("Pic/img.png"), "png").expect("image");
    fs::write(root.join("docs/note.md"), original).expect("doc");

    let target = root.join("Pic/img.png").to_string_lossy().replace('\\', "/");
    let manifest = serde_json::json!({
        "catalogue": [target],
        "dangling": { "docs/note.md": ["lost/img.png"] },
    });
    let path = root.join("manifest.json");
    fs::write(&path, manifest.to_string()).expect("manifest");
    path
}

#[test]
fn undo_without_backups_reports_zero_restored() {
    let tmp = tempdir().expect("tempdir");

    mdimg(tmp.path())
        .arg("undo")
        .arg("--workspace")
        .arg(tmp.path())
        .assert()
        .code(2)
        .stdout(predicate::str::contains("restored=0"))
        .stdout(predicate::str::contains("no backup sessions"));
}

#[test]
fn undo_of_missing_backup_dir_is_not_a_crash() {
    let tmp = tempdir().expect("tempdir");

    mdimg(tmp.path())
        .arg("undo")
        .arg("--workspace")
        .arg(tmp.path())
        .arg("--backup-dir")
        .arg(tmp.path().join(".backup/smart_fix_19700101_000000"))
        .assert()
        .code(2)
        .stdout(predicate::str::contains("restored=0"))
        .stdout(predicate::str::contains("backup directory not found"));
}

#[test]
fn repair_then_undo_restores_original_bytes() {
    let tmp = tempdir().expect("tempdir");
    let original = b"title\r\n\r\n![pic](lost/img.png)\r\ntrailing without newline";
    let manifest = seed_repairable(tmp.path(), original);

    mdimg(tmp.path())
        .arg("repair")
        .arg("--workspace")
        .arg(tmp.path())
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .success();
    let rewritten = fs::read_to_string(tmp.path().join("docs/note.md")).expect("read");
    assert!(rewritten.contains("![pic](../Pic/img.png)"));

    mdimg(tmp.path())
        .arg("undo")
        .arg("--workspace")
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("restored=1"));
    assert_eq!(
        fs::read(tmp.path().join("docs/note.md")).expect("read"),
        original
    );

    // The undone session is skipped next time.
    mdimg(tmp.path())
        .arg("undo")
        .arg("--workspace")
        .arg(tmp.path())
        .assert()
        .code(2)
        .stdout(predicate::str::contains("restored=0"));
}

#[test]
fn sessions_and_prune_manage_backup_dirs() {
    let tmp = tempdir().expect("tempdir");
    let manifest = seed_repairable(tmp.path(), b"![](lost/img.png)\n");

    for _ in 0..2 {
        fs::write(tmp.path().join("docs/note.md"), "![](lost/img.png)\n").expect("reset");
        mdimg(tmp.path())
            .arg("repair")
            .arg("--workspace")
            .arg(tmp.path())
            .arg("--manifest")
            .arg(&manifest)
            .arg("--no-verify")
            .assert()
            .success();
    }

    mdimg(tmp.path())
        .arg("sessions")
        .arg("--workspace")
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("sessions=2"));

    mdimg(tmp.path())
        .arg("prune")
        .arg("--workspace")
        .arg(tmp.path())
        .arg("--keep")
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed=1"));

    mdimg(tmp.path())
        .arg("sessions")
        .arg("--workspace")
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("sessions=1"));
}
