use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::tempdir;
use vaultbase_attachments::{
    format_refs, install_legacy_key, AttachmentConfig, AttachmentError, AttachmentRef,
    AttachmentStore, Recovery,
};
use vaultbase_crypto::{is_sealed, Envelope, SecretKey, ATTACHMENT_DOMAIN};

fn config(root: &Path) -> AttachmentConfig {
    AttachmentConfig {
        blob_dir: root.join("files"),
        key_path: root.join("files_key.key"),
        legacy_key_path: Some(root.join("legacy_key.key")),
        view_dir: root.join("views"),
    }
}

#[test]
fn save_then_open_for_read() {
    let dir = tempdir().expect("tempdir");
    let store = AttachmentStore::open(config(dir.path())).expect("open store");

    let source = dir.path().join("invoice.pdf");
    fs::write(&source, b"%PDF-1.7 hello").expect("write source");

    let reference = store.save(&source).expect("save");
    assert_eq!(reference.original_name, "invoice.pdf");
    assert!(reference.blob_name.ends_with(".enc"));
    assert_eq!(reference.blob_name.len(), 32 + ".enc".len());

    let blob = fs::read(store.blob_path(&reference.blob_name).expect("path")).expect("read blob");
    assert!(is_sealed(&blob));
    assert!(!blob.windows(5).any(|w| w == b"hello"));

    let view = store.open_for_read(&reference).expect("open for read");
    assert!(view.starts_with(dir.path().join("views")));
    assert_eq!(view.extension().and_then(|e| e.to_str()), Some("pdf"));
    assert_eq!(fs::read(&view).expect("read view"), b"%PDF-1.7 hello");
}

#[test]
fn every_save_gets_a_fresh_blob() {
    let dir = tempdir().expect("tempdir");
    let store = AttachmentStore::open(config(dir.path())).expect("open store");

    let a = store.save_bytes("same.txt", b"x").expect("save a");
    let b = store.save_bytes("same.txt", b"x").expect("save b");
    assert_ne!(a.blob_name, b.blob_name);
}

#[test]
fn key_is_stable_across_reopen() {
    let dir = tempdir().expect("tempdir");
    let reference = {
        let store = AttachmentStore::open(config(dir.path())).expect("open store");
        store.save_bytes("note.txt", b"persisted").expect("save")
    };

    let store = AttachmentStore::open(config(dir.path())).expect("reopen store");
    let (plain, recovery) = store.read(&reference.blob_name).expect("read");
    assert_eq!(plain, b"persisted");
    assert_eq!(recovery, Recovery::CurrentKey);
}

#[test]
fn legacy_blob_is_migrated_to_current_key() {
    let dir = tempdir().expect("tempdir");
    let legacy = SecretKey::generate();
    install_legacy_key(&dir.path().join("legacy_key.key"), &legacy.to_base64())
        .expect("install legacy key");

    let store = AttachmentStore::open(config(dir.path())).expect("open store");
    let blob_path = store.blob_path("old.enc").expect("path");
    let sealed = Envelope::new(legacy, ATTACHMENT_DOMAIN)
        .seal(b"from an older install")
        .expect("seal");
    fs::write(&blob_path, &sealed).expect("write legacy blob");

    let (plain, recovery) = store.read("old.enc").expect("first read");
    assert_eq!(plain, b"from an older install");
    assert_eq!(recovery, Recovery::LegacyKey);

    // Re-sealed in place under the current key.
    assert_ne!(fs::read(&blob_path).expect("reread"), sealed);
    let (plain, recovery) = store.read("old.enc").expect("second read");
    assert_eq!(plain, b"from an older install");
    assert_eq!(recovery, Recovery::CurrentKey);
}

#[test]
fn unencrypted_legacy_file_passes_through() {
    let dir = tempdir().expect("tempdir");
    let store = AttachmentStore::open(config(dir.path())).expect("open store");
    fs::write(store.blob_path("report.docx").expect("path"), b"plain bytes").expect("write");

    let reference = AttachmentRef::legacy("report.docx");
    let view = store.open_for_read(&reference).expect("open for read");
    assert_eq!(fs::read(view).expect("read view"), b"plain bytes");
}

#[test]
fn foreign_ciphertext_is_reported() {
    let dir = tempdir().expect("tempdir");
    let store = AttachmentStore::open(config(dir.path())).expect("open store");
    let sealed = Envelope::new(SecretKey::generate(), ATTACHMENT_DOMAIN)
        .seal(b"someone else's")
        .expect("seal");
    fs::write(store.blob_path("x.enc").expect("path"), sealed).expect("write");

    let err = store.read("x.enc").expect_err("must not decrypt");
    assert!(matches!(err, AttachmentError::Undecryptable(name) if name == "x.enc"));
}

#[test]
fn missing_blob_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let store = AttachmentStore::open(config(dir.path())).expect("open store");
    let err = store
        .open_for_read(&AttachmentRef::new("gone.pdf", "deadbeef.enc"))
        .expect_err("missing");
    assert!(matches!(err, AttachmentError::MissingBlob(_)));
}

#[test]
fn delete_value_removes_every_referenced_blob() {
    let dir = tempdir().expect("tempdir");
    let store = AttachmentStore::open(config(dir.path())).expect("open store");
    let a = store.save_bytes("a.txt", b"a").expect("save a");
    let b = store.save_bytes("b.txt", b"b").expect("save b");
    let value = format_refs(&[a.clone(), b.clone()]);

    assert_eq!(store.delete_value(&value), 2);
    assert!(!store.blob_path(&a.blob_name).expect("path").exists());
    assert!(!store.blob_path(&b.blob_name).expect("path").exists());

    // Second pass finds nothing and does not fail.
    assert_eq!(store.delete_value(&value), 0);
    assert!(!store.delete(&a).expect("delete missing"));
}

#[test]
fn purge_views_only_touches_view_files() {
    let dir = tempdir().expect("tempdir");
    let store = AttachmentStore::open(config(dir.path())).expect("open store");
    let reference = store.save_bytes("a.txt", b"a").expect("save");
    store.open_for_read(&reference).expect("view one");
    store.open_for_read(&reference).expect("view two");

    let unrelated = dir.path().join("views").join("keep-me.txt");
    fs::write(&unrelated, b"mine").expect("write unrelated");

    assert_eq!(store.purge_views(), 2);
    assert!(unrelated.exists());
    assert!(store.blob_path(&reference.blob_name).expect("path").exists());
}

#[test]
fn invalid_legacy_key_is_ignored() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("legacy_key.key"), b"not a key").expect("write");

    let store = AttachmentStore::open(config(dir.path())).expect("open store");
    let reference = store.save_bytes("a.txt", b"still works").expect("save");
    let (plain, _) = store.read(&reference.blob_name).expect("read");
    assert_eq!(plain, b"still works");
}
