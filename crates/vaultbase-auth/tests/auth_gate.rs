use std::fs;

use tempfile::tempdir;
use vaultbase_auth::{AuthGate, Credentials};

const FAST: u32 = 1_000;

#[test]
fn default_password_is_created_once() {
    let dir = tempdir().expect("tempdir");
    let gate = AuthGate::new(dir.path().join("auth.json")).with_iterations(FAST);

    assert!(gate.ensure_credentials_exist("Admin").expect("create"));
    let first = fs::read(gate.path()).expect("read");

    // Second call is a no-op even with a different default.
    assert!(!gate.ensure_credentials_exist("Other").expect("noop"));
    assert_eq!(fs::read(gate.path()).expect("read again"), first);

    assert!(gate.verify("Admin"));
    assert!(!gate.verify("Other"));
}

#[test]
fn set_password_replaces_hash_and_salt() {
    let dir = tempdir().expect("tempdir");
    let gate = AuthGate::new(dir.path().join("auth.json")).with_iterations(FAST);
    gate.ensure_credentials_exist("Admin").expect("create");
    let before = Credentials::load(gate.path()).expect("load");

    assert!(gate.set_password("correct horse"));
    let after = Credentials::load(gate.path()).expect("load");

    assert_ne!(before, after);
    assert!(gate.verify("correct horse"));
    assert!(!gate.verify("Admin"));
}

#[test]
fn verification_fails_closed() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("auth.json");
    let gate = AuthGate::new(&path).with_iterations(FAST);

    // Missing file.
    assert!(!gate.verify("Admin"));

    // Not JSON.
    fs::write(&path, b"\0\0garbage").expect("write");
    assert!(!gate.verify("Admin"));

    // JSON with a truncated hash.
    fs::write(&path, br#"{"salt":"AAAA","hash":"AAAA","iterations":10}"#).expect("write");
    assert!(!gate.verify("Admin"));

    // Zero iterations.
    fs::write(
        &path,
        br#"{"salt":"AAAAAAAAAAAAAAAAAAAAAA==","hash":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=","iterations":0}"#,
    )
    .expect("write");
    assert!(!gate.verify(""));
}

#[test]
fn set_password_reports_io_failure() {
    let dir = tempdir().expect("tempdir");
    // A directory where the file should be makes the rename fail.
    let path = dir.path().join("auth.json");
    fs::create_dir(&path).expect("mkdir");

    let gate = AuthGate::new(&path).with_iterations(FAST);
    assert!(!gate.set_password("pw"));
    assert!(path.is_dir());
}

#[test]
fn no_temp_files_left_behind() {
    let dir = tempdir().expect("tempdir");
    let gate = AuthGate::new(dir.path().join("auth.json")).with_iterations(FAST);
    gate.ensure_credentials_exist("Admin").expect("create");
    assert!(gate.set_password("second"));

    let names: Vec<_> = fs::read_dir(dir.path())
        .expect("read_dir")
        .map(|e| e.expect("entry").file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("auth.json")]);
}
