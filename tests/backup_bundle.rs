#[path = "../src/backup.rs"]
mod backup;

use serde_json::json;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::ZipWriter;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn bundle_roundtrip_preserves_database() {
    let workspace = temp_dir("trackerd-backup-src");
    let restored = temp_dir("trackerd-backup-dst");
    let out_dir = temp_dir("trackerd-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("tracker.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.trackerbackup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    std::io::Read::read_to_string(
        &mut archive.by_name("manifest.json").expect("manifest entry"),
        &mut manifest,
    )
    .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/tracker.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &restored).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    let restored_bytes = std::fs::read(restored.join("tracker.sqlite3")).expect("read restored db");
    assert_eq!(restored_bytes, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(restored);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_bundle_is_rejected() {
    let out_dir = temp_dir("trackerd-backup-tampered");
    let target = temp_dir("trackerd-backup-tampered-dst");

    // A well-formed bundle whose manifest checksum does not match the payload.
    let bundle_path = out_dir.join("tampered.zip");
    let file = File::create(&bundle_path).expect("create bundle");
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default();
    zip.start_file("manifest.json", opts).expect("manifest entry");
    zip.write_all(
        json!({
            "format": backup::BUNDLE_FORMAT_V1,
            "version": 1,
            "dbSha256": "0".repeat(64),
        })
        .to_string()
        .as_bytes(),
    )
    .expect("write manifest");
    zip.start_file("db/tracker.sqlite3", opts).expect("db entry");
    zip.write_all(b"payload-that-does-not-match").expect("write db");
    zip.finish().expect("finish zip");

    let err = backup::import_workspace_bundle(&bundle_path, &target).unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"), "got: {}", err);
    assert!(!target.join("tracker.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(target);
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = temp_dir("trackerd-backup-raw");
    let target = temp_dir("trackerd-backup-raw-dst");

    let raw_file = out_dir.join("old-copy.sqlite3");
    let bytes = b"raw-sqlite-copy";
    std::fs::write(&raw_file, bytes).expect("write raw sqlite file");

    let import = backup::import_workspace_bundle(&raw_file, &target).expect("import raw sqlite");
    assert_eq!(import.bundle_format_detected, "raw-sqlite3");
    let restored = std::fs::read(target.join("tracker.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(target);
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_trackerd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn trackerd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn export_import_moves_a_live_workspace() {
    let workspace = temp_dir("trackerd-backup-live");
    let restored = temp_dir("trackerd-backup-live-dst");
    let out_dir = temp_dir("trackerd-backup-live-out");
    let bundle = out_dir.join("live.trackerbackup.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.add",
        json!({ "adminUsername": "admin", "name": "Jane Doe", "grade": "11", "section": "A" }),
    );

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        export.get("bundleFormat").and_then(|v| v.as_str()),
        Some(backup::BUNDLE_FORMAT_V1)
    );

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy(), "path": restored.to_string_lossy() }),
    );
    assert_eq!(
        import.get("workspacePath").and_then(|v| v.as_str()),
        Some(restored.to_string_lossy().as_ref())
    );

    // The restored workspace carries the student and the seeded accounts.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "adminUsername": "admin" }),
    );
    let students = listed.get("students").and_then(|v| v.as_array()).expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("name").and_then(|v| v.as_str()),
        Some("Jane Doe")
    );

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(restored);
    let _ = std::fs::remove_dir_all(out_dir);
}
