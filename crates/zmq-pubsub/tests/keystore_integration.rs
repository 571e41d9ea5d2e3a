//! Integration tests for the CURVE key store.
//!
//! # Purpose
//!
//! These tests drive [`KeyStore`] through its public API against real
//! temporary directories.  They verify:
//!
//! - Idempotence: repeated loads return the same pair and exactly one pair of
//!   key files exists.
//! - Path resolution: every relative path is a configuration error.
//! - First-run races: many stores initializing the same empty directory at
//!   once agree on a single key pair, generated exactly once.
//!
//! Each store gets a deterministic [`KeyGenerator`] so the tests do not depend
//! on libzmq being built with CURVE support.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use zmq_pubsub::error::KeyStoreError;
use zmq_pubsub::infrastructure::storage::keystore::{
    KeyGenerator, KeyStore, LOCK_FILE, PUBLIC_KEY_FILE, SECRET_KEY_FILE,
};
use zmq_pubsub_core::CurveKeyPair;

/// Produces a distinct, valid Z85 pair on every call.
#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
}

impl KeyGenerator for CountingGenerator {
    fn generate(&self) -> Result<CurveKeyPair, KeyStoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        CurveKeyPair::new(format!("{n:a>40}"), format!("{n:b>40}"))
            .map_err(|e| KeyStoreError::Generate(e.to_string()))
    }
}

fn key_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Idempotence ───────────────────────────────────────────────────────────────

#[test]
fn test_load_or_create_is_idempotent_across_store_instances() {
    // Arrange
    let tmp = tempfile::tempdir().unwrap();
    let generator = Arc::new(CountingGenerator::default());
    let open = || {
        KeyStore::open(Some(tmp.path()))
            .unwrap()
            .with_generator(generator.clone())
    };

    // Act
    let first = open().load_or_create_key_pair().unwrap();
    let second = open().load_or_create_key_pair().unwrap();

    // Assert
    assert_eq!(first, second);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(key_files(tmp.path()), [PUBLIC_KEY_FILE, SECRET_KEY_FILE]);
}

#[test]
fn test_existing_files_are_authoritative() {
    // Arrange: keys written by an earlier run.
    let tmp = tempfile::tempdir().unwrap();
    let public = "Yne@$w-vo<fVvi]a<NY6T1ed:M$fCG*[IaLV{hID";
    let secret = "D:)Q[IlAW!ahhC2ac:9*A}h:p?([4%wOTJ%JR%cs";
    fs::write(tmp.path().join(PUBLIC_KEY_FILE), format!("{public}\n")).unwrap();
    fs::write(tmp.path().join(SECRET_KEY_FILE), format!("{secret}\n")).unwrap();
    let generator = Arc::new(CountingGenerator::default());
    let store = KeyStore::open(Some(tmp.path()))
        .unwrap()
        .with_generator(generator.clone());

    // Act
    let pair = store.load_or_create_key_pair().unwrap();

    // Assert
    assert_eq!(pair.public_key(), public);
    assert_eq!(pair.secret_key(), secret);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

// ── Path resolution ───────────────────────────────────────────────────────────

#[test]
fn test_every_relative_path_is_rejected() {
    for path in ["curve", "./keys", "keys/nested", "."] {
        let err = KeyStore::open(Some(Path::new(path))).unwrap_err();
        assert!(
            matches!(err, KeyStoreError::RelativePath { .. }),
            "{path:?} must be rejected, got {err:?}"
        );
    }
}

#[test]
fn test_absolute_path_is_used_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    let store = KeyStore::open(Some(tmp.path())).unwrap();
    assert_eq!(store.directory(), tmp.path());
    assert_eq!(store.public_key_path(), tmp.path().join(PUBLIC_KEY_FILE));
}

#[test]
fn test_opening_a_store_touches_nothing_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("not-yet");

    KeyStore::open(Some(dir.as_path())).unwrap();

    assert!(!dir.exists());
}

// ── First-run race ────────────────────────────────────────────────────────────

#[test]
fn test_concurrent_first_run_yields_a_single_identity() {
    // Arrange: eight independent stores (standing in for eight processes)
    // share one generator so the total number of generations is observable.
    const RACERS: usize = 8;
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("curve");
    let generator = Arc::new(CountingGenerator::default());
    let barrier = Arc::new(Barrier::new(RACERS));

    // Act
    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let dir = dir.clone();
            let generator = generator.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let store = KeyStore::open(Some(dir.as_path())).unwrap().with_generator(generator);
                barrier.wait();
                store.load_or_create_key_pair()
            })
        })
        .collect();
    let pairs: Vec<CurveKeyPair> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .collect();

    // Assert
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1, "exactly one winner");
    assert!(pairs.iter().all(|pair| *pair == pairs[0]));
    assert_eq!(key_files(&dir), [PUBLIC_KEY_FILE, SECRET_KEY_FILE]);
    assert!(!dir.join(LOCK_FILE).exists());
}
