//! Username → password-hash table backed by a JSON file.
//!
//! The table is loaded once at startup and rewritten in full after every
//! successful registration. A missing or unreadable file never stops the
//! server: it starts with an empty table and logs a warning.
//!
//! New hashes are PBKDF2-HMAC-SHA256 with a random per-user salt, stored as
//! `pbkdf2-sha256$<iterations>$<salt>$<hash>` (unpadded base64). Entries that
//! are a bare hex SHA-256 digest are still accepted on login so credential
//! files written by older servers keep working.

use base64::engine::general_purpose::STANDARD_NO_PAD as B64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Default PBKDF2 iteration count for new registrations.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Errors raised while persisting the credential table.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Writing or renaming the table file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The table could not be serialized.
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable credential table.
///
/// Owned by the hub and only mutated from its event loop, so it needs no
/// interior locking.
#[derive(Debug)]
pub struct CredentialStore {
    users: BTreeMap<String, String>,
    path: PathBuf,
    iterations: u32,
}

impl CredentialStore {
    /// Loads the table from `path`.
    ///
    /// A missing file yields an empty table. A file that cannot be read or
    /// parsed also yields an empty table, with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let users = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(users) => users,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "credential file is empty or invalid, starting fresh"
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no credential file yet");
                BTreeMap::new()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "credential file unreadable, starting fresh"
                );
                BTreeMap::new()
            }
        };

        Self {
            users,
            path,
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Sets the PBKDF2 iteration count used for new registrations.
    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    /// Returns `true` if `username` is registered.
    #[must_use]
    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    /// Registers a new user and persists the whole table.
    ///
    /// Returns `Ok(false)` without touching the file if the username is
    /// already taken. If persisting fails the insert is rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the table cannot be written.
    pub fn register(&mut self, username: &str, password: &str) -> Result<bool, CredentialError> {
        if self.users.contains_key(username) {
            return Ok(false);
        }

        let hash = hash_password(password, self.iterations);
        self.users.insert(username.to_string(), hash);

        if let Err(e) = self.save() {
            self.users.remove(username);
            return Err(e);
        }
        Ok(true)
    }

    /// Returns `true` iff `username` is registered and `password` matches.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|stored| verify_password(password, stored))
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns `true` if no users are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize the whole table and replace the file atomically.
    fn save(&self) -> Result<(), CredentialError> {
        let contents = serde_json::to_string_pretty(&self.users)?;

        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        // Persist the rename itself. Directories cannot be opened on every
        // platform, so this step is best effort.
        if let Ok(dir) = File::open(parent.unwrap_or(Path::new("."))) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

/// Hashes `password` with a fresh random salt.
#[must_use]
pub fn hash_password(password: &str, iterations: u32) -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill(&mut salt);

    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut out);

    format!(
        "{SCHEME}${iterations}${}${}",
        B64.encode(salt),
        B64.encode(out)
    )
}

/// Checks `password` against a stored hash in either supported format.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    if let Some(rest) = stored.strip_prefix(SCHEME).and_then(|r| r.strip_prefix('$')) {
        return verify_pbkdf2(password, rest);
    }
    if is_legacy_digest(stored) {
        let computed = legacy_digest(password);
        return bool::from(computed.as_bytes().ct_eq(stored.to_ascii_lowercase().as_bytes()));
    }
    false
}

fn verify_pbkdf2(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.splitn(3, '$');
    let (Some(iterations), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    if iterations == 0 {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (B64.decode(salt), B64.decode(expected)) else {
        return false;
    };
    if expected.len() != HASH_LEN {
        return false;
    }

    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut out);
    bool::from(out[..].ct_eq(&expected[..]))
}

fn is_legacy_digest(stored: &str) -> bool {
    stored.len() == 64 && stored.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Unsalted hex SHA-256, as written by older credential files.
fn legacy_digest(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: u32 = 1_000;

    fn store_in(dir: &tempfile::TempDir) -> CredentialStore {
        CredentialStore::load(dir.path().join("users.json")).with_iterations(FAST)
    }

    #[test]
    fn missing_file_yields_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.is_empty());
        assert!(!dir.path().join("users.json").exists());
    }

    #[test]
    fn corrupt_file_yields_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut store = CredentialStore::load(&path).with_iterations(FAST);
        assert!(store.is_empty());

        // Registration still works and overwrites the bad file.
        assert!(store.register("alice", "pw1").unwrap());
        let reloaded = CredentialStore::load(&path);
        assert!(reloaded.verify("alice", "pw1"));
    }

    #[test]
    fn empty_file_yields_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "").unwrap();
        assert!(CredentialStore::load(&path).is_empty());
    }

    #[test]
    fn register_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        assert!(store.register("alice", "pw1").unwrap());
        assert!(store.contains("alice"));
        assert!(store.verify("alice", "pw1"));
        assert!(!store.verify("alice", "wrong"));
        assert!(!store.verify("bob", "pw1"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        assert!(store.register("alice", "pw1").unwrap());
        assert!(!store.register("alice", "pw2").unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.verify("alice", "pw1"));
        assert!(!store.verify("alice", "pw2"));
    }

    #[test]
    fn verify_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        {
            let mut store = CredentialStore::load(&path).with_iterations(FAST);
            store.register("alice", "pw1").unwrap();
            store.register("bob", "pw2").unwrap();
        }

        let reloaded = CredentialStore::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.verify("alice", "pw1"));
        assert!(reloaded.verify("bob", "pw2"));
        assert!(!reloaded.verify("bob", "pw1"));
    }

    #[test]
    fn file_never_contains_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let mut store = CredentialStore::load(&path).with_iterations(FAST);
        store.register("alice", "hunter2-secret").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("alice"));
        assert!(!contents.contains("hunter2-secret"));
        assert!(contents.contains(SCHEME));
    }

    #[test]
    fn save_replaces_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("users.json");
        let mut store = CredentialStore::load(&path).with_iterations(FAST);
        store.register("alice", "pw1").unwrap();
        store.register("bob", "pw2").unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        let table: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(table.keys().collect::<Vec<_>>(), ["alice", "bob"]);
    }

    #[test]
    fn failed_save_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        // The table path is a directory, so the final rename fails.
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();

        let mut store = CredentialStore::load(&path).with_iterations(FAST);
        assert!(store.register("alice", "pw1").is_err());
        assert!(!store.contains("alice"));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("pw", FAST);
        let b = hash_password("pw", FAST);
        assert_ne!(a, b);
        assert!(verify_password("pw", &a));
        assert!(verify_password("pw", &b));
    }

    #[test]
    fn legacy_sha256_hex_is_accepted() {
        // sha256("pw1")
        let legacy = legacy_digest("pw1");
        assert_eq!(legacy.len(), 64);
        assert!(verify_password("pw1", &legacy));
        assert!(verify_password("pw1", &legacy.to_ascii_uppercase()));
        assert!(!verify_password("pw2", &legacy));
    }

    #[test]
    fn legacy_file_loads_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let table = format!("{{\n    \"carol\": \"{}\"\n}}", legacy_digest("pw"));
        std::fs::write(&path, table).unwrap();

        let store = CredentialStore::load(&path);
        assert!(store.verify("carol", "pw"));
        assert!(!store.verify("carol", "nope"));
    }

    #[test]
    fn malformed_hashes_never_verify() {
        for stored in [
            "",
            "pbkdf2-sha256$",
            "pbkdf2-sha256$0$AAAA$AAAA",
            "pbkdf2-sha256$abc$AAAA$AAAA",
            "pbkdf2-sha256$1000$!!!$AAAA",
            "pbkdf2-sha256$1000$AAAA$AAAA",
            "not-a-hash",
        ] {
            assert!(!verify_password("pw", stored), "accepted {stored:?}");
        }
    }
}
