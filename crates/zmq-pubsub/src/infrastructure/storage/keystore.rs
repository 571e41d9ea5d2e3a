//! File-backed CURVE key store.
//!
//! A key store is a directory holding two single-line files:
//!
//! ```text
//! <dir>/secret_key.curve   # 40-character Z85 secret key + "\n"
//! <dir>/public_key.curve   # 40-character Z85 public key + "\n"
//! ```
//!
//! The pair is generated on first use and loaded unchanged afterwards.  Once
//! either file exists it is authoritative: a missing partner or an unreadable
//! key is reported as [`KeyStoreError::InvalidKey`], never repaired by
//! generating a new identity.
//!
//! # First-run initialization across processes
//!
//! Two processes starting against an empty directory would both see "no key
//! files".  Initialization therefore takes an exclusive lock file
//! (`.keys.lock`, created with `create_new`).  The holder re-checks, generates,
//! and publishes each key by writing a temporary file and hard-linking it to
//! its final name.  `hard_link` fails if the target exists, so a published key
//! is never overwritten.  Processes that lose the lock race poll until the
//! keys appear, and give up with [`KeyStoreError::Locked`] after the lock wait
//! (5 s by default).
//!
//! A lock file older than the stale lock age (30 s by default) is left over
//! from a process that died mid-initialization.  It is moved aside under a
//! unique name and removed, and the waiter retries.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;
use zmq_pubsub_core::domain::keys::validate_z85_key;
use zmq_pubsub_core::CurveKeyPair;

use crate::error::KeyStoreError;

/// File holding the Z85 secret key.
pub const SECRET_KEY_FILE: &str = "secret_key.curve";
/// File holding the Z85 public key.
pub const PUBLIC_KEY_FILE: &str = "public_key.curve";
/// Lock file guarding first-run initialization.
pub const LOCK_FILE: &str = ".keys.lock";

const DEFAULT_DIRECTORY: &str = "curve";
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);
const DEFAULT_STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// Source of fresh CURVE key pairs.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> Result<CurveKeyPair, KeyStoreError>;
}

/// Generates key pairs with libzmq's `zmq_curve_keypair`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZmqKeyGenerator;

impl KeyGenerator for ZmqKeyGenerator {
    fn generate(&self) -> Result<CurveKeyPair, KeyStoreError> {
        let raw = zmq::CurveKeyPair::new().map_err(|e| KeyStoreError::Generate(e.to_string()))?;
        let public_key = zmq::z85_encode(&raw.public_key)
            .map_err(|e| KeyStoreError::Generate(format!("{e:?}")))?;
        let secret_key = zmq::z85_encode(&raw.secret_key)
            .map_err(|e| KeyStoreError::Generate(format!("{e:?}")))?;
        CurveKeyPair::new(public_key, secret_key).map_err(|e| KeyStoreError::Generate(e.to_string()))
    }
}

/// A key pair directory.
#[derive(Clone)]
pub struct KeyStore {
    directory: PathBuf,
    generator: Arc<dyn KeyGenerator>,
    lock_wait: Duration,
    stale_lock_age: Duration,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("directory", &self.directory)
            .field("lock_wait", &self.lock_wait)
            .field("stale_lock_age", &self.stale_lock_age)
            .finish()
    }
}

impl KeyStore {
    /// Resolves the key directory.
    ///
    /// `None` resolves to `<current working directory>/curve`.  A supplied
    /// path must be absolute so the location of secrets never depends on
    /// where the process was started.
    ///
    /// # Errors
    ///
    /// - [`KeyStoreError::RelativePath`] for a relative path.
    /// - [`KeyStoreError::Io`] if the current directory cannot be read.
    pub fn resolve(path: Option<&Path>) -> Result<PathBuf, KeyStoreError> {
        match path {
            Some(path) if path.is_absolute() => Ok(path.to_path_buf()),
            Some(path) => Err(KeyStoreError::RelativePath {
                path: path.to_path_buf(),
            }),
            None => {
                let cwd = std::env::current_dir().map_err(|source| KeyStoreError::Io {
                    path: PathBuf::from("."),
                    source,
                })?;
                Ok(cwd.join(DEFAULT_DIRECTORY))
            }
        }
    }

    /// Opens the store at `path` (see [`KeyStore::resolve`]).  Touches nothing
    /// on disk.
    pub fn open(path: Option<&Path>) -> Result<Self, KeyStoreError> {
        Ok(Self {
            directory: Self::resolve(path)?,
            generator: Arc::new(ZmqKeyGenerator),
            lock_wait: DEFAULT_LOCK_WAIT,
            stale_lock_age: DEFAULT_STALE_LOCK_AGE,
        })
    }

    /// Replaces the key generator.
    pub fn with_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Sets how long to wait for another process's initialization.
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Sets the age past which an existing lock file is treated as
    /// abandoned and reclaimed.
    pub fn with_stale_lock_age(mut self, stale_lock_age: Duration) -> Self {
        self.stale_lock_age = stale_lock_age;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn secret_key_path(&self) -> PathBuf {
        self.directory.join(SECRET_KEY_FILE)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.directory.join(PUBLIC_KEY_FILE)
    }

    /// Loads the stored key pair, generating and persisting one if the
    /// directory holds none.  Idempotent.
    ///
    /// # Errors
    ///
    /// - [`KeyStoreError::InvalidKey`] if only one key file exists or a file
    ///   does not hold a valid key.
    /// - [`KeyStoreError::Locked`] if another process holds the init lock past
    ///   the lock wait.
    /// - [`KeyStoreError::Io`] for file system failures.
    pub fn load_or_create_key_pair(&self) -> Result<CurveKeyPair, KeyStoreError> {
        let deadline = Instant::now() + self.lock_wait;

        loop {
            match self.load_existing() {
                Ok(Some(pair)) => {
                    debug!(directory = %self.directory.display(), "loaded CURVE key pair");
                    return Ok(pair);
                }
                Ok(None) => {}
                // A half-written pair is expected while another process
                // holds the lock.
                Err(e) if self.directory.join(LOCK_FILE).exists() => {
                    debug!(error = %e, "key store initialization in progress");
                }
                // The lock holder may have finished between the read and the
                // lock check.
                Err(e) => return self.load_existing()?.ok_or(e),
            }

            fs::create_dir_all(&self.directory).map_err(|source| KeyStoreError::Io {
                path: self.directory.clone(),
                source,
            })?;

            if let Some(_lock) = LockGuard::try_acquire(&self.directory)? {
                // Another process may have finished between our check and
                // taking the lock.
                if let Some(pair) = self.load_existing()? {
                    return Ok(pair);
                }
                let pair = self.generator.generate()?;
                self.publish(SECRET_KEY_FILE, pair.secret_key())?;
                self.publish(PUBLIC_KEY_FILE, pair.public_key())?;
                return Ok(pair);
            }

            if LockGuard::reclaim_if_stale(&self.directory, self.stale_lock_age)? {
                continue;
            }
            if Instant::now() >= deadline {
                return Err(KeyStoreError::Locked {
                    path: self.directory.clone(),
                });
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    /// Returns the stored pair, `None` if neither file exists.
    fn load_existing(&self) -> Result<Option<CurveKeyPair>, KeyStoreError> {
        let secret = self.read_key(SECRET_KEY_FILE)?;
        let public = self.read_key(PUBLIC_KEY_FILE)?;
        match (public, secret) {
            (None, None) => Ok(None),
            (Some(public), Some(secret)) => {
                CurveKeyPair::new(public, secret)
                    .map(Some)
                    .map_err(|e| KeyStoreError::InvalidKey {
                        path: self.directory.clone(),
                        reason: e.to_string(),
                    })
            }
            (Some(_), None) => Err(self.missing_partner(SECRET_KEY_FILE)),
            (None, Some(_)) => Err(self.missing_partner(PUBLIC_KEY_FILE)),
        }
    }

    fn missing_partner(&self, file_name: &str) -> KeyStoreError {
        KeyStoreError::InvalidKey {
            path: self.directory.join(file_name),
            reason: "key file is missing while its partner exists".into(),
        }
    }

    /// Reads the first line of a key file.  `None` if the file does not exist.
    fn read_key(&self, file_name: &str) -> Result<Option<String>, KeyStoreError> {
        let path = self.directory.join(file_name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(KeyStoreError::Io { path, source }),
        };
        // `lines()` strips both "\n" and "\r\n".
        let key = content.lines().next().unwrap_or_default().to_string();
        let which = if file_name == SECRET_KEY_FILE {
            "secret"
        } else {
            "public"
        };
        validate_z85_key(which, &key).map_err(|e| KeyStoreError::InvalidKey {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(key))
    }

    /// Writes `key` to a temporary file and links it to `file_name`.  Fails if
    /// `file_name` already exists.
    fn publish(&self, file_name: &str, key: &str) -> Result<(), KeyStoreError> {
        let target = self.directory.join(file_name);
        let temp = self
            .directory
            .join(format!(".{file_name}.{}.tmp", std::process::id()));

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| KeyStoreError::Io { path, source }
        };

        let mut file = File::create(&temp).map_err(io_err(&temp))?;
        file.write_all(format!("{key}\n").as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(io_err(&temp))?;
        drop(file);

        let linked = fs::hard_link(&temp, &target).map_err(io_err(&target));
        if let Err(e) = fs::remove_file(&temp) {
            warn!(path = %temp.display(), error = %e, "failed to remove temporary key file");
        }
        linked?;

        info!("New key created: {}", target.display());
        Ok(())
    }
}

/// Holds `.keys.lock` and removes it on drop.
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// `Ok(None)` when another process holds the lock.
    fn try_acquire(directory: &Path) -> Result<Option<Self>, KeyStoreError> {
        let path = directory.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Best effort; the pid only helps when diagnosing a stale lock.
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(source) => Err(KeyStoreError::Io { path, source }),
        }
    }

    /// Removes a lock file last modified more than `max_age` ago.  `true`
    /// when the lock was reclaimed or had already gone, so the caller should
    /// retry at once.
    ///
    /// The lock is first renamed to a unique name, so two processes
    /// reclaiming at once cannot both remove it.  If the renamed file turns
    /// out to be a fresh lock taken in the meantime, it is linked back.
    fn reclaim_if_stale(directory: &Path, max_age: Duration) -> Result<bool, KeyStoreError> {
        let path = directory.join(LOCK_FILE);
        if !is_older_than(&path, max_age) {
            return Ok(false);
        }

        let parked = directory.join(format!("{LOCK_FILE}.{}.stale", Uuid::new_v4()));
        match fs::rename(&path, &parked) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(source) => return Err(KeyStoreError::Io { path, source }),
        }

        if is_older_than(&parked, max_age) {
            warn!(path = %path.display(), "removed stale key store lock");
        } else if let Err(e) = fs::hard_link(&parked, &path) {
            debug!(error = %e, "fresh lock not restored; a newer lock exists");
        }
        if let Err(e) = fs::remove_file(&parked) {
            warn!(path = %parked.display(), error = %e, "failed to remove reclaimed lock");
        }
        Ok(true)
    }
}

/// `false` when the file is missing or its age cannot be determined.
fn is_older_than(path: &Path, max_age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > max_age)
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove key store lock");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    const PUBLIC: &str = "Yne@$w-vo<fVvi]a<NY6T1ed:M$fCG*[IaLV{hID";
    const SECRET: &str = "D:)Q[IlAW!ahhC2ac:9*A}h:p?([4%wOTJ%JR%cs";

    /// Returns the fixed documentation key pair and counts calls.
    #[derive(Default)]
    struct FixedGenerator {
        calls: AtomicUsize,
    }

    impl KeyGenerator for FixedGenerator {
        fn generate(&self) -> Result<CurveKeyPair, KeyStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CurveKeyPair::new(PUBLIC, SECRET).unwrap())
        }
    }

    fn store_in(dir: &Path) -> (KeyStore, Arc<FixedGenerator>) {
        let generator = Arc::new(FixedGenerator::default());
        let store = KeyStore::open(Some(dir))
            .unwrap()
            .with_generator(generator.clone());
        (store, generator)
    }

    #[test]
    fn test_resolve_defaults_to_curve_under_cwd() {
        let resolved = KeyStore::resolve(None).unwrap();
        assert_eq!(resolved, std::env::current_dir().unwrap().join("curve"));
    }

    #[test]
    fn test_resolve_rejects_relative_paths() {
        for path in ["curve", "./keys", "../keys"] {
            let result = KeyStore::resolve(Some(Path::new(path)));
            assert!(
                matches!(result, Err(KeyStoreError::RelativePath { .. })),
                "{path} must be rejected"
            );
        }
    }

    #[test]
    fn test_first_call_creates_directory_and_both_files() {
        // Arrange
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("curve");
        let (store, generator) = store_in(&dir);

        // Act
        let pair = store.load_or_create_key_pair().unwrap();

        // Assert
        assert_eq!(pair.public_key(), PUBLIC);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fs::read_to_string(dir.join(PUBLIC_KEY_FILE)).unwrap(),
            format!("{PUBLIC}\n")
        );
        assert_eq!(
            fs::read_to_string(dir.join(SECRET_KEY_FILE)).unwrap(),
            format!("{SECRET}\n")
        );
        assert!(!dir.join(LOCK_FILE).exists(), "lock must be released");
    }

    #[test]
    fn test_second_call_loads_without_generating() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, generator) = store_in(tmp.path());

        let first = store.load_or_create_key_pair().unwrap();
        let second = store.load_or_create_key_pair().unwrap();

        assert_eq!(first, second);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_crlf_line_endings_are_stripped() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(PUBLIC_KEY_FILE), format!("{PUBLIC}\r\n")).unwrap();
        fs::write(tmp.path().join(SECRET_KEY_FILE), format!("{SECRET}\r\nignored")).unwrap();
        let (store, generator) = store_in(tmp.path());

        let pair = store.load_or_create_key_pair().unwrap();

        assert_eq!(pair.public_key(), PUBLIC);
        assert_eq!(pair.secret_key(), SECRET);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_single_existing_file_is_an_error_not_a_regeneration() {
        // Arrange
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(PUBLIC_KEY_FILE), format!("{PUBLIC}\n")).unwrap();
        let (store, generator) = store_in(tmp.path());

        // Act
        let result = store.load_or_create_key_pair();

        // Assert
        assert!(matches!(result, Err(KeyStoreError::InvalidKey { .. })));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            fs::read_to_string(tmp.path().join(PUBLIC_KEY_FILE)).unwrap(),
            format!("{PUBLIC}\n"),
            "existing identity must be untouched"
        );
    }

    #[test]
    fn test_empty_key_file_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(PUBLIC_KEY_FILE), "").unwrap();
        fs::write(tmp.path().join(SECRET_KEY_FILE), format!("{SECRET}\n")).unwrap();
        let (store, _) = store_in(tmp.path());

        assert!(matches!(
            store.load_or_create_key_pair(),
            Err(KeyStoreError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_held_lock_times_out_with_locked_error() {
        // Arrange
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(LOCK_FILE), "12345\n").unwrap();
        let (store, generator) = store_in(tmp.path());
        let store = store.with_lock_wait(Duration::from_millis(60));

        // Act
        let result = store.load_or_create_key_pair();

        // Assert
        assert!(matches!(result, Err(KeyStoreError::Locked { .. })));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_abandoned_lock_is_reclaimed_and_keys_created() {
        // Arrange: a lock left behind by a process that died a minute ago.
        let tmp = tempfile::tempdir().unwrap();
        let lock = tmp.path().join(LOCK_FILE);
        fs::write(&lock, "12345\n").unwrap();
        File::options()
            .write(true)
            .open(&lock)
            .unwrap()
            .set_modified(std::time::SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        let (store, generator) = store_in(tmp.path());
        let store = store
            .with_lock_wait(Duration::from_millis(60))
            .with_stale_lock_age(Duration::from_secs(10));

        // Act
        let pair = store.load_or_create_key_pair().unwrap();

        // Assert
        assert_eq!(pair.public_key(), PUBLIC);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        let mut names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, [PUBLIC_KEY_FILE, SECRET_KEY_FILE]);
    }

    #[test]
    fn test_recent_lock_is_not_reclaimed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(LOCK_FILE), "12345\n").unwrap();

        let reclaimed = LockGuard::reclaim_if_stale(tmp.path(), Duration::from_secs(10)).unwrap();

        assert!(!reclaimed);
        assert!(tmp.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_waiter_loads_keys_published_by_lock_holder() {
        // Arrange: a foreign lock is held and the keys appear shortly after.
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        fs::write(dir.join(LOCK_FILE), "1\n").unwrap();
        let (store, generator) = store_in(&dir);

        let writer_dir = dir.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            fs::write(writer_dir.join(SECRET_KEY_FILE), format!("{SECRET}\n")).unwrap();
            fs::write(writer_dir.join(PUBLIC_KEY_FILE), format!("{PUBLIC}\n")).unwrap();
            fs::remove_file(writer_dir.join(LOCK_FILE)).unwrap();
        });

        // Act
        let result = store.load_or_create_key_pair();
        writer.join().unwrap();

        // Assert
        let pair = result.unwrap();
        assert_eq!(pair.public_key(), PUBLIC);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zmq_generator_produces_valid_z85_pair() {
        if !zmq::has("curve").unwrap_or(false) {
            return;
        }
        let pair = ZmqKeyGenerator.generate().unwrap();
        assert_eq!(pair.public_key().len(), 40);
        assert_ne!(pair.public_key(), pair.secret_key());
    }
}
