#[path = "../src/backup.rs"]
mod backup;

mod test_support;

use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use test_support::{request_err, request_ok, seed_campus, spawn_sidecar, temp_dir};
use zip::write::FileOptions;

fn sqlite_like_payload(tag: &str) -> Vec<u8> {
    let mut bytes = b"SQLite format 3\0".to_vec();
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("rollcall-backup-src");
    let workspace2 = temp_dir("rollcall-backup-dst");
    let out_dir = temp_dir("rollcall-backup-out");

    let bytes = sqlite_like_payload("roundtrip");
    std::fs::write(workspace.join("rollcall.sqlite3"), &bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.entry_count, 2);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], backup::BUNDLE_FORMAT);
    assert_eq!(manifest["db"]["sha256"], export.db_sha256.as_str());
    assert_eq!(manifest["db"]["bytes"], bytes.len());

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT);
    assert_eq!(import.db_sha256, export.db_sha256);

    let restored = std::fs::read(workspace2.join("rollcall.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    assert!(!workspace2.join("rollcall.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_bundle_is_rejected_and_leaves_workspace_untouched() {
    let out_dir = temp_dir("rollcall-backup-tampered");
    let workspace = temp_dir("rollcall-backup-tampered-dst");
    let original = sqlite_like_payload("keep-me");
    std::fs::write(workspace.join("rollcall.sqlite3"), &original).expect("write existing db");

    let bundle_path = out_dir.join("tampered.zip");
    {
        let mut zip = zip::ZipWriter::new(File::create(&bundle_path).expect("create bundle"));
        let opts = FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(
            json!({
                "format": backup::BUNDLE_FORMAT,
                "db": { "entry": "db/rollcall.sqlite3", "sha256": "00".repeat(32) },
            })
            .to_string()
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/rollcall.sqlite3", opts).expect("db entry");
        zip.write_all(&sqlite_like_payload("evil")).expect("write db");
        zip.finish().expect("finish");
    }

    let e = backup::import_workspace_bundle(&bundle_path, &workspace).unwrap_err();
    assert!(format!("{e:#}").contains("digest mismatch"), "{e:#}");
    let kept = std::fs::read(workspace.join("rollcall.sqlite3")).expect("read kept db");
    assert_eq!(kept, original);

    let junk = out_dir.join("notes.txt");
    std::fs::write(&junk, b"just some text").expect("write junk");
    assert!(backup::import_workspace_bundle(&junk, &workspace).is_err());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = temp_dir("rollcall-backup-raw");
    let workspace = temp_dir("rollcall-backup-raw-dst");

    let raw_file = out_dir.join("copy.sqlite3");
    let bytes = sqlite_like_payload("raw-copy");
    std::fs::write(&raw_file, &bytes).expect("write raw sqlite file");

    let import = backup::import_workspace_bundle(&raw_file, &workspace).expect("import raw sqlite");
    assert_eq!(import.bundle_format_detected, backup::RAW_SQLITE_FORMAT);

    let restored = std::fs::read(workspace.join("rollcall.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn ipc_backup_restores_an_earlier_workspace_state() {
    let workspace = temp_dir("rollcall-backup-ipc");
    let bundle = workspace.join("before.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let c = seed_campus(&mut stdin, &mut reader, &workspace);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "1",
            "backup.exportWorkspaceBundle",
            json!({ "actorId": c.teacher, "outPath": bundle.to_string_lossy() }),
        ),
        "forbidden"
    );
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "backup.exportWorkspaceBundle",
        json!({ "actorId": c.admin, "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], backup::BUNDLE_FORMAT);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.delete",
        json!({ "actorId": c.admin, "courseId": c.course }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.importWorkspaceBundle",
        json!({ "actorId": c.admin, "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["bundleFormatDetected"], backup::BUNDLE_FORMAT);

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.get",
        json!({ "actorId": c.admin, "courseId": c.course }),
    );
    assert_eq!(course["code"], "CS301");

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "6",
            "backup.importWorkspaceBundle",
            json!({ "actorId": c.admin, "inPath": workspace.join("missing.zip").to_string_lossy() }),
        ),
        "not_found"
    );

    let _ = std::fs::remove_dir_all(workspace);
}
