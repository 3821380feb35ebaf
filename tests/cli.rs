// E2E tests for the orph CLI verbs
use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use orph::orph_core::store::read_store;
use predicates::prelude::*;

mod common;
use common::{jpeg_bytes, mp4_bytes, png_bytes};

fn orph() -> Command {
    Command::cargo_bin("orph").unwrap()
}

fn dir_arg(dir: &TempDir) -> String {
    dir.path().to_string_lossy().into_owned()
}

#[test]
fn test_check_hash_creates_catalogs() {
    let dir = TempDir::new().unwrap();
    dir.child("a.jpg")
        .write_binary(&jpeg_bytes(b"Exif", &[1, 2, 3]))
        .unwrap();
    dir.child("sub/b.png")
        .write_binary(&png_bytes(None, &[4, 5]))
        .unwrap();

    orph()
        .arg("check-hash")
        .arg(dir_arg(&dir))
        .assert()
        .success()
        .stdout(predicate::str::contains("2 file(s) hashed"));

    let set = read_store(dir.child(".orphdat").path()).unwrap();
    let record = &set["a.jpg"];
    assert_ne!(record.md5, record.full_md5, "jpeg has a content hash");
    assert!(dir.child("sub/.orphdat").path().exists());

    // Everything is current on the second pass.
    orph()
        .arg("check-hash")
        .arg(dir_arg(&dir))
        .assert()
        .success()
        .stdout(predicate::str::contains("2 already current"));
}

#[test]
fn test_metadata_edit_keeps_content_hash() {
    let dir = TempDir::new().unwrap();
    let photo = dir.child("a.jpg");
    photo.write_binary(&jpeg_bytes(b"Comment-one", &[1, 2, 3])).unwrap();

    orph().arg("check-hash").arg(dir_arg(&dir)).assert().success();
    let before = read_store(dir.child(".orphdat").path()).unwrap()["a.jpg"].clone();

    // Metadata-only edit: different APP1 payload (different length, so the
    // stat changes), identical scan data.
    photo
        .write_binary(&jpeg_bytes(b"Comment-two-longer", &[1, 2, 3]))
        .unwrap();
    orph().arg("check-hash").arg(dir_arg(&dir)).assert().success();

    let after = read_store(dir.child(".orphdat").path()).unwrap()["a.jpg"].clone();
    assert_eq!(after.md5, before.md5, "content hash survives the edit");
    assert_ne!(after.full_md5, before.full_md5);
    assert_eq!(after.version, before.version);
}

#[test]
fn test_verify_hash_reports_content_changes() {
    let dir = TempDir::new().unwrap();
    let photo = dir.child("a.jpg");
    photo.write_binary(&jpeg_bytes(b"Exif", &[1, 2, 3])).unwrap();
    orph().arg("check-hash").arg(dir_arg(&dir)).assert().success();

    orph()
        .arg("verify-hash")
        .arg(dir_arg(&dir))
        .assert()
        .success()
        .stdout(predicate::str::contains("1 file(s) verified, 0 mismatched"));

    // Pixel edit: the scan data changes.
    photo
        .write_binary(&jpeg_bytes(b"Exif", &[9, 9, 9, 9]))
        .unwrap();
    orph()
        .arg("verify-hash")
        .arg(dir_arg(&dir))
        .assert()
        .success()
        .stdout(predicate::str::contains("1 mismatched"));

    // verify-hash never writes: the record still holds the old digests.
    let set = read_store(dir.child(".orphdat").path()).unwrap();
    assert!(set.contains_key("a.jpg"));
}

#[test]
fn test_find_dupe_files_by_hash_trashes_second_copy() {
    let dir = TempDir::new().unwrap();
    let bytes = jpeg_bytes(b"Exif", &[1, 2, 3]);
    dir.child("a.jpg").write_binary(&bytes).unwrap();
    dir.child("b.jpg").write_binary(&bytes).unwrap();
    orph().arg("check-hash").arg(dir_arg(&dir)).assert().success();

    orph()
        .arg("find-dupe-files")
        .arg(dir_arg(&dir))
        .write_stdin("t2\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Duplicate group 1 of 1"))
        .stdout(predicate::str::contains("Suggested: t2"));

    assert!(dir.child("a.jpg").path().exists());
    assert!(!dir.child("b.jpg").path().exists());
    assert!(dir.child(".orphtrash/b.jpg").path().exists());
    let trash_set = read_store(dir.child(".orphtrash/.orphdat").path()).unwrap();
    assert!(trash_set.contains_key("b.jpg"), "record followed the file");
}

#[test]
fn test_find_dupe_files_quit_is_clean() {
    let dir = TempDir::new().unwrap();
    let bytes = jpeg_bytes(b"Exif", &[1, 2, 3]);
    dir.child("a.jpg").write_binary(&bytes).unwrap();
    dir.child("b.jpg").write_binary(&bytes).unwrap();
    orph().arg("check-hash").arg(dir_arg(&dir)).assert().success();

    orph()
        .arg("find-dupe-files")
        .arg(dir_arg(&dir))
        .write_stdin("q\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Quit."));

    assert!(dir.child("a.jpg").path().exists());
    assert!(dir.child("b.jpg").path().exists());
}

#[test]
fn test_find_dupe_files_by_name_suggests_continue_for_live_videos() {
    let dir = TempDir::new().unwrap();
    // Two live-photo videos sharing a name key; their HEIC siblings exist
    // and are large enough, so nothing should be suggested for trashing.
    dir.child("A/IMG_0001.MOV")
        .write_binary(&mp4_bytes(b"qt  ", b"", &[1; 600]))
        .unwrap();
    dir.child("A/IMG_0001.HEIC").write_binary(&[7; 500]).unwrap();
    dir.child("B/IMG_0001.MOV")
        .write_binary(&mp4_bytes(b"qt  ", b"", &[2; 600]))
        .unwrap();
    dir.child("B/IMG_0001.HEIC").write_binary(&[8; 500]).unwrap();

    orph()
        .arg("find-dupe-files")
        .arg("--by-name")
        .arg(dir_arg(&dir))
        .write_stdin("c\nc\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Suggested: c"));

    assert!(dir.child("A/IMG_0001.MOV").path().exists());
    assert!(dir.child("B/IMG_0001.MOV").path().exists());
}

#[test]
fn test_legacy_catalog_is_promoted_to_json() {
    let dir = TempDir::new().unwrap();
    dir.child("a.jpg")
        .write_binary(&jpeg_bytes(b"Exif", &[1, 2, 3]))
        .unwrap();
    dir.child(".orphdat")
        .write_str("a.jpg: 00112233445566778899aabbccddeeff\n")
        .unwrap();

    orph().arg("check-hash").arg(dir_arg(&dir)).assert().success();

    let contents = std::fs::read_to_string(dir.child(".orphdat").path()).unwrap();
    assert!(contents.trim_start().starts_with('{'), "rewritten as JSON");
    let set = read_store(dir.child(".orphdat").path()).unwrap();
    assert!(set["a.jpg"].version > 0, "stale record was re-hashed");
}

#[test]
fn test_collect_trash_mirrors_tree_under_root() {
    let dir = TempDir::new().unwrap();
    for rel in [
        "A/.orphtrash/1.jpg",
        "A/.orphtrash/2.jpg",
        "B/.orphtrash/3.jpg",
        "B/C/.orphtrash/4.jpg",
    ] {
        dir.child(rel).write_binary(&jpeg_bytes(b"x", &[1])).unwrap();
    }

    orph()
        .arg("collect-trash")
        .arg(dir_arg(&dir))
        .assert()
        .success()
        .stdout(predicate::str::contains("4 file(s) collected"));

    for rel in [
        ".orphtrash/A/1.jpg",
        ".orphtrash/A/2.jpg",
        ".orphtrash/B/3.jpg",
        ".orphtrash/B/C/4.jpg",
    ] {
        assert!(dir.child(rel).path().exists(), "missing {rel}");
    }
    assert!(!dir.child("A/.orphtrash").path().exists());
    assert!(!dir.child("B/.orphtrash").path().exists());
    assert!(!dir.child("B/C/.orphtrash").path().exists());
}

#[test]
fn test_restore_trash_round_trip() {
    let dir = TempDir::new().unwrap();
    let bytes = jpeg_bytes(b"Exif", &[1, 2, 3]);
    dir.child("A/a.jpg").write_binary(&bytes).unwrap();
    dir.child("A/b.jpg").write_binary(&bytes).unwrap();
    orph().arg("check-hash").arg(dir_arg(&dir)).assert().success();

    // Trash b.jpg through the dupe review, then restore it.
    orph()
        .arg("find-dupe-files")
        .arg(dir_arg(&dir))
        .write_stdin("t2\n")
        .assert()
        .success();
    assert!(!dir.child("A/b.jpg").path().exists());

    orph()
        .arg("restore-trash")
        .arg(dir_arg(&dir))
        .assert()
        .success()
        .stdout(predicate::str::contains("1 trash directory(ies) restored"));

    assert!(dir.child("A/b.jpg").path().exists());
    let set = read_store(dir.child("A/.orphdat").path()).unwrap();
    assert!(set.contains_key("a.jpg"));
    assert!(set.contains_key("b.jpg"));
}

#[test]
fn test_remove_empties() {
    let dir = TempDir::new().unwrap();
    dir.child("empty/nested").create_dir_all().unwrap();
    dir.child("kept/a.jpg")
        .write_binary(&jpeg_bytes(b"Exif", &[1]))
        .unwrap();

    orph()
        .arg("remove-empties")
        .arg(dir_arg(&dir))
        .assert()
        .success()
        .stdout(predicate::str::contains("2 empty directory(ies) removed"));

    assert!(!dir.child("empty").path().exists());
    assert!(dir.child("kept/a.jpg").path().exists());
}

#[test]
fn test_purge_md5_drops_stale_records() {
    let dir = TempDir::new().unwrap();
    dir.child("a.jpg").write_binary(&jpeg_bytes(b"Exif", &[1])).unwrap();
    dir.child("b.jpg").write_binary(&jpeg_bytes(b"Exif", &[2])).unwrap();
    orph().arg("check-hash").arg(dir_arg(&dir)).assert().success();
    std::fs::remove_file(dir.child("b.jpg").path()).unwrap();

    orph()
        .arg("purge-md5")
        .arg(dir_arg(&dir))
        .assert()
        .success()
        .stdout(predicate::str::contains("1 stale record(s) purged"));

    let set = read_store(dir.child(".orphdat").path()).unwrap();
    assert!(set.contains_key("a.jpg"));
    assert!(!set.contains_key("b.jpg"));
}
